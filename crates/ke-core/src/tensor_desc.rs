use std::fmt;

use crate::dtype::DataType;
use crate::error::{EngineError, Result};
use crate::format::FormatType;
use crate::shape::Shape;

/// Immutable description of one tensor: shape, element type and layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    shape: Shape,
    dtype: DataType,
    format: FormatType,
}

impl TensorDesc {
    /// Create a tensor descriptor.
    ///
    /// # Errors
    /// Returns `InvalidDescriptor` if the shape is empty or has a zero-sized
    /// dimension, if its byte size overflows `usize`, or if its rank
    /// disagrees with the rank implied by `format`.
    pub fn new(shape: impl Into<Shape>, dtype: DataType, format: FormatType) -> Result<Self> {
        let shape = shape.into();
        if shape.ndim() == 0 {
            return Err(EngineError::InvalidDescriptor(
                "tensor shape must have at least one dimension".to_string(),
            ));
        }
        if shape.is_degenerate() {
            return Err(EngineError::InvalidDescriptor(format!(
                "tensor shape {} has a zero-sized dimension",
                shape
            )));
        }
        let bytes = shape
            .checked_numel()
            .and_then(|n| n.checked_mul(dtype.size_in_bytes()));
        if bytes.is_none() {
            return Err(EngineError::InvalidDescriptor(format!(
                "tensor {} of {} overflows the address space",
                shape, dtype
            )));
        }
        if let Some(rank) = format.rank() {
            if rank != shape.ndim() {
                return Err(EngineError::InvalidDescriptor(format!(
                    "format {} expects rank {}, got shape {}",
                    format, rank, shape
                )));
            }
        }
        Ok(TensorDesc {
            shape,
            dtype,
            format,
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn format(&self) -> FormatType {
        self.format
    }

    /// Number of elements (product of the dimensions).
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Bytes needed to hold the tensor densely.
    pub fn size_in_bytes(&self) -> usize {
        self.numel() * self.dtype.size_in_bytes()
    }
}

impl fmt::Display for TensorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.shape, self.dtype, self.format)
    }
}
