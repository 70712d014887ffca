use std::fmt;

/// Element data types a tensor descriptor can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 32-bit floating point.
    F32,
    /// 32-bit signed integer.
    S32,
    /// 8-bit unsigned integer.
    U8,
    /// 8-bit signed integer.
    S8,
    /// 16-bit floating point (IEEE 754 half-precision, via the `half` crate).
    F16,
    /// bfloat16 (via the `half` crate).
    Bf16,
}

impl DataType {
    /// Returns the size in bytes of a single element.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::F32 | DataType::S32 => 4,
            DataType::F16 | DataType::Bf16 => 2,
            DataType::U8 | DataType::S8 => 1,
        }
    }

    /// Converts a stable numeric id (as used across the C ABI) to a `DataType`.
    ///
    /// - 0 => F32
    /// - 1 => S32
    /// - 2 => U8
    /// - 3 => S8
    /// - 4 => F16
    /// - 5 => Bf16
    pub fn from_id(id: u32) -> Option<DataType> {
        match id {
            0 => Some(DataType::F32),
            1 => Some(DataType::S32),
            2 => Some(DataType::U8),
            3 => Some(DataType::S8),
            4 => Some(DataType::F16),
            5 => Some(DataType::Bf16),
            _ => None,
        }
    }

    /// Returns the stable numeric id for this `DataType`.
    pub fn id(&self) -> u32 {
        match self {
            DataType::F32 => 0,
            DataType::S32 => 1,
            DataType::U8 => 2,
            DataType::S8 => 3,
            DataType::F16 => 4,
            DataType::Bf16 => 5,
        }
    }

    pub fn is_floating_point(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F16 | DataType::Bf16)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::F32 => write!(f, "fp32"),
            DataType::S32 => write!(f, "s32"),
            DataType::U8 => write!(f, "u8"),
            DataType::S8 => write!(f, "s8"),
            DataType::F16 => write!(f, "fp16"),
            DataType::Bf16 => write!(f, "bf16"),
        }
    }
}
