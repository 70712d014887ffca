use thiserror::Error;

use crate::engine::{EngineKind, RuntimeKind};
use crate::storage::{CopyDirection, Residency};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("no engine registered for ({engine}, {runtime})")]
    UnsupportedBackend {
        engine: EngineKind,
        runtime: RuntimeKind,
    },
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),
    #[error("context mismatch: {0}")]
    ContextMismatch(String),
    #[error("invalid kernel state: {0}")]
    InvalidState(String),
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
    #[error("copy of {requested} bytes exceeds capacity {capacity}")]
    CopySize { requested: usize, capacity: usize },
    #[error("copy direction {direction} is invalid for {residency} storage")]
    InvalidCopyDirection {
        direction: CopyDirection,
        residency: Residency,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("device error: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
