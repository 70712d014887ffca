use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::config::EngineConfig;
use crate::device::{ClDevice, CommandQueue};
use crate::engine::{check_kernel_request, Engine, EngineId, EngineKind, RuntimeKind};
use crate::error::Result;
use crate::kernel::Kernel;
use crate::op_desc::OperatorDesc;
use crate::registry::{BuildTarget, KernelRegistry};
use crate::storage::MemoryStorage;
use crate::stream::Stream;

/// GPU engine driven through the OpenCL runtime.
///
/// Construction never fails: when no device can be opened the engine still
/// exists, and every stream, storage or kernel request on it reports the
/// device error.
#[derive(Debug)]
pub struct OpenclEngine {
    id: EngineId,
    device: Result<ClDevice>,
    queues: AtomicUsize,
    kernels: Arc<KernelRegistry>,
}

impl OpenclEngine {
    pub fn new(config: &EngineConfig, kernels: Arc<KernelRegistry>) -> Self {
        let id = EngineId::next();
        let device = ClDevice::open(config);
        match &device {
            Ok(dev) => debug!("created gpu engine {} on {}", id, dev.info().name),
            Err(err) => warn!("gpu engine {} has no device: {}", id, err),
        }
        Self {
            id,
            device,
            queues: AtomicUsize::new(0),
            kernels,
        }
    }

    /// The opened device.
    ///
    /// # Errors
    /// The `Device` error recorded when opening failed.
    pub fn device(&self) -> Result<&ClDevice> {
        self.device.as_ref().map_err(Clone::clone)
    }
}

impl Engine for OpenclEngine {
    fn id(&self) -> EngineId {
        self.id
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Gpu
    }

    fn runtime(&self) -> RuntimeKind {
        RuntimeKind::Opencl
    }

    fn name(&self) -> &str {
        "gpu:opencl"
    }

    fn create_stream(&self) -> Result<Stream> {
        self.device()?;
        let n = self.queues.fetch_add(1, Ordering::Relaxed);
        let queue = CommandQueue::spawn(format!("ke-ocl-{}-q{}", self.id.get(), n))?;
        Ok(Stream::device(EngineKind::Gpu, self.id, queue))
    }

    fn create_memory_storage(&self, byte_size: usize) -> Result<MemoryStorage> {
        let buffer = self.device()?.alloc(byte_size)?;
        Ok(MemoryStorage::device(EngineKind::Gpu, self.id, buffer))
    }

    fn create_kernel(&self, desc: Arc<OperatorDesc>, stream: &Stream) -> Result<Arc<Kernel>> {
        check_kernel_request(self, &desc, stream)?;
        let device = self.device()?;
        let variant = self
            .kernels
            .resolve(&desc, EngineKind::Gpu, BuildTarget::Device(device))?;
        debug!("gpu engine {}: {} for {}", self.id, variant.name(), desc);
        Ok(Arc::new(Kernel::new(desc, self.id, EngineKind::Gpu, variant)))
    }
}
