use ke_core::{DataType, EngineError, KernelKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidateError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("buffer of {len} bytes cannot be viewed as {elem}-byte elements")]
    View { len: usize, elem: usize },
    #[error("case provides {got} data buffers, descriptor has {expected} tensors")]
    DataCount { got: usize, expected: usize },
    #[error("no reference implementation for {kind} on {dtype}")]
    NoReference { kind: KernelKind, dtype: DataType },
}

pub type Result<T> = std::result::Result<T, ValidateError>;
