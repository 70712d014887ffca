use std::sync::Arc;

use ke_core::{Engine, EngineError, Kernel, MemoryStorage, OperatorDesc, Stream};

/// Status codes returned by all FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeStatus {
    Ok = 0,
    InvalidArgument = 1,
    UnsupportedBackend = 2,
    UnsupportedOperator = 3,
    ContextMismatch = 4,
    InvalidState = 5,
    OutOfMemory = 6,
    CopySize = 7,
    Device = 8,
    Internal = 9,
}

impl From<&EngineError> for KeStatus {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::UnsupportedBackend { .. } => KeStatus::UnsupportedBackend,
            EngineError::UnsupportedOperator(_) => KeStatus::UnsupportedOperator,
            EngineError::ContextMismatch(_) => KeStatus::ContextMismatch,
            EngineError::InvalidState(_) => KeStatus::InvalidState,
            EngineError::OutOfMemory { .. } => KeStatus::OutOfMemory,
            EngineError::CopySize { .. } => KeStatus::CopySize,
            EngineError::InvalidCopyDirection { .. }
            | EngineError::InvalidDescriptor(_)
            | EngineError::InvalidConfig(_) => KeStatus::InvalidArgument,
            EngineError::Device(_) => KeStatus::Device,
        }
    }
}

/// Opaque handle to a shared engine. Releasing it leaves the engine alive
/// in the process factory.
pub struct KeEngine {
    pub(crate) engine: Arc<dyn Engine>,
}

/// Opaque stream handle.
pub struct KeStream {
    pub(crate) stream: Stream,
}

/// Opaque storage handle. The allocation is freed once this handle and
/// every context or kernel binding holding it are gone.
pub struct KeStorage {
    pub(crate) storage: MemoryStorage,
}

/// Opaque operator descriptor handle.
pub struct KeOpDesc {
    pub(crate) desc: Arc<OperatorDesc>,
}

/// Opaque kernel handle.
pub struct KeKernel {
    pub(crate) kernel: Arc<Kernel>,
}
