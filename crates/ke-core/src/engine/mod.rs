pub mod cpu;
pub mod opencl;

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::kernel::Kernel;
use crate::op_desc::OperatorDesc;
use crate::storage::MemoryStorage;
use crate::stream::Stream;

pub use cpu::CpuEngine;
pub use opencl::OpenclEngine;

/// Class of compute device an engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Cpu,
    Gpu,
}

impl EngineKind {
    pub fn from_id(id: u32) -> Option<EngineKind> {
        match id {
            0 => Some(EngineKind::Cpu),
            1 => Some(EngineKind::Gpu),
            _ => None,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            EngineKind::Cpu => 0,
            EngineKind::Gpu => 1,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Cpu => write!(f, "cpu"),
            EngineKind::Gpu => write!(f, "gpu"),
        }
    }
}

/// Programming runtime used to reach the device. CPU engines use `Undef`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    Undef,
    Opencl,
}

impl RuntimeKind {
    pub fn from_id(id: u32) -> Option<RuntimeKind> {
        match id {
            0 => Some(RuntimeKind::Undef),
            1 => Some(RuntimeKind::Opencl),
            _ => None,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            RuntimeKind::Undef => 0,
            RuntimeKind::Opencl => 1,
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeKind::Undef => write!(f, "undef"),
            RuntimeKind::Opencl => write!(f, "opencl"),
        }
    }
}

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one engine instance. Streams, storages and kernels record the
/// id of the engine that created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(u64);

impl EngineId {
    pub fn next() -> Self {
        EngineId(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A compute device behind one runtime.
///
/// Engines hand out the streams, storages and kernels that run on them.
/// Everything they create is tagged with [`Engine::id`], and mixing objects
/// of two engines is rejected at kernel creation and `init`.
pub trait Engine: Send + Sync + Debug {
    fn id(&self) -> EngineId;

    fn kind(&self) -> EngineKind;

    fn runtime(&self) -> RuntimeKind;

    /// Returns the name of this engine (e.g., "cpu", "gpu:opencl").
    fn name(&self) -> &str;

    /// Create a new ordered execution queue.
    ///
    /// # Errors
    /// `Device` when the backend could not be initialized.
    fn create_stream(&self) -> Result<Stream>;

    /// Allocate `byte_size` bytes resident on this engine.
    ///
    /// # Errors
    /// `OutOfMemory` when the allocation cannot be satisfied.
    fn create_memory_storage(&self, byte_size: usize) -> Result<MemoryStorage>;

    /// Resolve `desc` to a kernel for this engine.
    ///
    /// # Errors
    /// `UnsupportedOperator` when `desc` targets another engine or no
    /// implementation is registered for it; `ContextMismatch` when `stream`
    /// belongs to another engine.
    fn create_kernel(&self, desc: Arc<OperatorDesc>, stream: &Stream) -> Result<Arc<Kernel>>;
}

/// Checks shared by every `create_kernel` implementation.
pub(crate) fn check_kernel_request(
    engine: &dyn Engine,
    desc: &OperatorDesc,
    stream: &Stream,
) -> Result<()> {
    if desc.engine_kind() != engine.kind() || desc.runtime_kind() != engine.runtime() {
        return Err(EngineError::UnsupportedOperator(format!(
            "{} targets ({}, {}), engine {} is ({}, {})",
            desc.kind(),
            desc.engine_kind(),
            desc.runtime_kind(),
            engine.name(),
            engine.kind(),
            engine.runtime()
        )));
    }
    if stream.owner() != engine.id() {
        return Err(EngineError::ContextMismatch(format!(
            "stream #{} belongs to engine {}, not {}",
            stream.id(),
            stream.owner(),
            engine.id()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_ids() {
        for kind in [EngineKind::Cpu, EngineKind::Gpu] {
            assert_eq!(EngineKind::from_id(kind.id()), Some(kind));
        }
        for runtime in [RuntimeKind::Undef, RuntimeKind::Opencl] {
            assert_eq!(RuntimeKind::from_id(runtime.id()), Some(runtime));
        }
        assert_eq!(EngineKind::from_id(2), None);
        assert_eq!(RuntimeKind::from_id(7), None);
    }

    #[test]
    fn test_engine_ids_are_unique() {
        let a = EngineId::next();
        let b = EngineId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }
}
