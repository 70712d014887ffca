use bytemuck::Pod;
use ke_core::TensorDesc;

use crate::error::{Result, ValidateError};

/// Host byte buffer sized for one tensor.
///
/// Backed by 8-byte words so the bytes can be viewed as any element type
/// the engine supports without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct HostBuffer {
    desc: TensorDesc,
    words: Vec<u64>,
    len: usize,
}

impl HostBuffer {
    /// A zero-filled buffer for `desc`.
    pub fn zeroed(desc: &TensorDesc) -> Self {
        let len = desc.size_in_bytes();
        Self {
            desc: desc.clone(),
            words: vec![0u64; len.div_ceil(8)],
            len,
        }
    }

    /// A buffer for `desc` holding a copy of `bytes`.
    ///
    /// # Errors
    /// `View` when `bytes` is not exactly the tensor's size.
    pub fn from_bytes(desc: &TensorDesc, bytes: &[u8]) -> Result<Self> {
        let mut buffer = Self::zeroed(desc);
        if bytes.len() != buffer.len {
            return Err(ValidateError::View {
                len: bytes.len(),
                elem: desc.dtype().size_in_bytes(),
            });
        }
        buffer.as_bytes_mut().copy_from_slice(bytes);
        Ok(buffer)
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut bytemuck::cast_slice_mut(&mut self.words)[..len]
    }

    /// View the contents as elements of `T`.
    pub fn as_slice<T: Pod>(&self) -> Result<&[T]> {
        bytemuck::try_cast_slice(self.as_bytes()).map_err(|_| ValidateError::View {
            len: self.len,
            elem: std::mem::size_of::<T>(),
        })
    }

    pub fn as_mut_slice<T: Pod>(&mut self) -> Result<&mut [T]> {
        let len = self.len;
        bytemuck::try_cast_slice_mut(self.as_bytes_mut()).map_err(|_| ValidateError::View {
            len,
            elem: std::mem::size_of::<T>(),
        })
    }
}
