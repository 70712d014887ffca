//! `ke-core` - Heterogeneous kernel execution engine.
//!
//! This crate provides:
//! - Tensor and operator descriptors (`TensorDesc`, `OperatorDesc`)
//! - Engines for the host CPU and an OpenCL GPU, resolved through `EngineFactory`
//! - Memory storages with directed host/device copies
//! - Ordered streams and per-invocation execution contexts
//! - A kernel registration table with reference and tiled matmul kernels

pub mod config;
pub mod context;
pub mod device;
pub mod dtype;
pub mod engine;
pub mod error;
pub mod factory;
pub mod format;
pub mod kernel;
pub mod kernels;
pub mod op_desc;
pub mod registry;
pub mod shape;
pub mod storage;
pub mod stream;
mod sync;
pub mod tensor_desc;

// Re-export primary types at the crate root for convenience.
pub use config::EngineConfig;
pub use context::ExecContext;
pub use dtype::DataType;
pub use engine::{CpuEngine, Engine, EngineId, EngineKind, OpenclEngine, RuntimeKind};
pub use error::{EngineError, Result};
pub use factory::{EngineBuilder, EngineFactory};
pub use format::FormatType;
pub use kernel::{Kernel, KernelState, KernelVariant};
pub use op_desc::{matmul_dst_dtype, KernelKind, KernelProp, OperatorDesc, TensorRole};
pub use registry::{BuildTarget, KernelBuilder, KernelKey, KernelRegistry};
pub use shape::Shape;
pub use storage::{CopyBuffer, CopyDirection, MemoryStorage, Residency};
pub use stream::Stream;
pub use tensor_desc::TensorDesc;
