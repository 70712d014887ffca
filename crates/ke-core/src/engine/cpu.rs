use std::sync::Arc;

use log::debug;

use crate::config::EngineConfig;
use crate::engine::{check_kernel_request, Engine, EngineId, EngineKind, RuntimeKind};
use crate::error::Result;
use crate::kernel::Kernel;
use crate::op_desc::OperatorDesc;
use crate::registry::{BuildTarget, KernelRegistry};
use crate::storage::MemoryStorage;
use crate::stream::Stream;

/// Host engine.
///
/// Storages are plain host allocations and streams run work inline, so every
/// operation has completed when its call returns. Kernels are the reference
/// implementations registered for [`EngineKind::Cpu`].
#[derive(Debug)]
pub struct CpuEngine {
    id: EngineId,
    max_alloc_bytes: usize,
    kernels: Arc<KernelRegistry>,
}

impl CpuEngine {
    pub fn new(config: &EngineConfig, kernels: Arc<KernelRegistry>) -> Self {
        let id = EngineId::next();
        debug!("created cpu engine {}", id);
        Self {
            id,
            max_alloc_bytes: config.host_max_alloc_bytes,
            kernels,
        }
    }
}

impl Engine for CpuEngine {
    fn id(&self) -> EngineId {
        self.id
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Cpu
    }

    fn runtime(&self) -> RuntimeKind {
        RuntimeKind::Undef
    }

    fn name(&self) -> &str {
        "cpu"
    }

    fn create_stream(&self) -> Result<Stream> {
        Ok(Stream::host(EngineKind::Cpu, self.id))
    }

    fn create_memory_storage(&self, byte_size: usize) -> Result<MemoryStorage> {
        MemoryStorage::host(EngineKind::Cpu, self.id, byte_size, self.max_alloc_bytes)
    }

    fn create_kernel(&self, desc: Arc<OperatorDesc>, stream: &Stream) -> Result<Arc<Kernel>> {
        check_kernel_request(self, &desc, stream)?;
        let variant = self.kernels.resolve(&desc, EngineKind::Cpu, BuildTarget::Host)?;
        debug!("cpu engine {}: {} for {}", self.id, variant.name(), desc);
        Ok(Arc::new(Kernel::new(desc, self.id, EngineKind::Cpu, variant)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecContext;
    use crate::dtype::DataType;
    use crate::error::EngineError;
    use crate::format::FormatType;
    use crate::kernel::KernelState;
    use crate::op_desc::{KernelKind, KernelProp};
    use crate::tensor_desc::TensorDesc;
    use approx::assert_relative_eq;
    use half::f16;

    fn engine() -> CpuEngine {
        CpuEngine::new(
            &EngineConfig::default(),
            Arc::new(KernelRegistry::with_builtins()),
        )
    }

    fn matmul_desc(m: usize, k: usize, n: usize, src: DataType, dst: DataType) -> Arc<OperatorDesc> {
        let t = |dims: [usize; 2], dtype| TensorDesc::new(dims.to_vec(), dtype, FormatType::Ab).unwrap();
        Arc::new(
            OperatorDesc::new(
                KernelKind::Matmul,
                KernelProp::ForwardInference,
                EngineKind::Cpu,
                RuntimeKind::Undef,
                vec![t([m, k], src), t([k, n], src), t([m, n], dst)],
                Default::default(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_matmul_end_to_end() {
        let engine = engine();
        let stream = engine.create_stream().unwrap();
        let desc = matmul_desc(2, 2, 2, DataType::F32, DataType::F32);
        let a = engine.create_memory_storage(16).unwrap();
        let b = engine.create_memory_storage(16).unwrap();
        let c = engine.create_memory_storage(16).unwrap();
        a.write_slice(&[1.0f32, 2.0, 3.0, 4.0], Some(&stream)).unwrap();
        b.write_slice(&[5.0f32, 6.0, 7.0, 8.0], Some(&stream)).unwrap();

        let kernel = engine.create_kernel(desc, &stream).unwrap();
        assert_eq!(kernel.name(), "ref_matmul_f32");
        assert_eq!(kernel.state(), KernelState::Uninitialized);

        let mut ctx = ExecContext::new(&stream);
        ctx.add_input(&a);
        ctx.add_input(&b);
        ctx.add_output(&c);
        kernel.init(&ctx).unwrap();
        assert_eq!(kernel.state(), KernelState::Initialized);
        kernel.execute().unwrap();
        assert_eq!(kernel.state(), KernelState::Executed);

        let out: Vec<f32> = c.read_vec(4, Some(&stream)).unwrap();
        assert_eq!(out, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_execute_before_init() {
        let engine = engine();
        let stream = engine.create_stream().unwrap();
        let kernel = engine
            .create_kernel(matmul_desc(1, 1, 1, DataType::F32, DataType::F32), &stream)
            .unwrap();
        assert!(matches!(kernel.execute(), Err(EngineError::InvalidState(_))));
    }

    #[test]
    fn test_wrong_input_count() {
        let engine = engine();
        let stream = engine.create_stream().unwrap();
        let kernel = engine
            .create_kernel(matmul_desc(1, 1, 1, DataType::F32, DataType::F32), &stream)
            .unwrap();
        let a = engine.create_memory_storage(4).unwrap();
        let c = engine.create_memory_storage(4).unwrap();
        let mut ctx = ExecContext::new(&stream);
        ctx.add_input(&a);
        ctx.add_output(&c);
        assert!(matches!(kernel.init(&ctx), Err(EngineError::ContextMismatch(_))));
        assert_eq!(kernel.state(), KernelState::Uninitialized);
    }

    #[test]
    fn test_undersized_storage() {
        let engine = engine();
        let stream = engine.create_stream().unwrap();
        let kernel = engine
            .create_kernel(matmul_desc(2, 2, 2, DataType::F32, DataType::F32), &stream)
            .unwrap();
        let full = engine.create_memory_storage(16).unwrap();
        let short = engine.create_memory_storage(12).unwrap();
        let mut ctx = ExecContext::new(&stream);
        ctx.add_input(&full);
        ctx.add_input(&full);
        ctx.add_output(&short);
        assert!(matches!(kernel.init(&ctx), Err(EngineError::ContextMismatch(_))));
    }

    #[test]
    fn test_reinit_rebinds() {
        let engine = engine();
        let stream = engine.create_stream().unwrap();
        let kernel = engine
            .create_kernel(matmul_desc(1, 1, 1, DataType::F32, DataType::F32), &stream)
            .unwrap();
        let a = engine.create_memory_storage(4).unwrap();
        let b = engine.create_memory_storage(4).unwrap();
        let c1 = engine.create_memory_storage(4).unwrap();
        let c2 = engine.create_memory_storage(4).unwrap();
        a.write_slice(&[3.0f32], None).unwrap();
        b.write_slice(&[4.0f32], None).unwrap();

        for out in [&c1, &c2] {
            let mut ctx = ExecContext::new(&stream);
            ctx.add_input(&a);
            ctx.add_input(&b);
            ctx.add_output(out);
            kernel.init(&ctx).unwrap();
            kernel.execute().unwrap();
            assert_eq!(kernel.executions(), 1);
        }
        assert_eq!(c1.read_vec::<f32>(1, None).unwrap(), vec![12.0]);
        assert_eq!(c2.read_vec::<f32>(1, None).unwrap(), vec![12.0]);
    }

    #[test]
    fn test_objects_of_another_engine_are_rejected() {
        let first = engine();
        let second = engine();
        let desc = matmul_desc(1, 1, 1, DataType::F32, DataType::F32);
        let foreign_stream = second.create_stream().unwrap();
        assert!(matches!(
            first.create_kernel(Arc::clone(&desc), &foreign_stream),
            Err(EngineError::ContextMismatch(_))
        ));

        let stream = first.create_stream().unwrap();
        let kernel = first.create_kernel(desc, &stream).unwrap();
        let mine = first.create_memory_storage(4).unwrap();
        let theirs = second.create_memory_storage(4).unwrap();
        let mut ctx = ExecContext::new(&stream);
        ctx.add_input(&mine);
        ctx.add_input(&theirs);
        ctx.add_output(&mine);
        assert!(matches!(kernel.init(&ctx), Err(EngineError::ContextMismatch(_))));
    }

    #[test]
    fn test_column_major_weight_is_unsupported() {
        let engine = engine();
        let stream = engine.create_stream().unwrap();
        let t = |format| TensorDesc::new(vec![2usize, 2], DataType::F32, format).unwrap();
        let desc = OperatorDesc::new(
            KernelKind::Matmul,
            KernelProp::ForwardInference,
            EngineKind::Cpu,
            RuntimeKind::Undef,
            vec![t(FormatType::Ab), t(FormatType::Ba), t(FormatType::Ab)],
            Default::default(),
        )
        .unwrap();
        assert!(matches!(
            engine.create_kernel(Arc::new(desc), &stream),
            Err(EngineError::UnsupportedOperator(_))
        ));
    }

    #[test]
    fn test_mixed_input_dtypes_are_rejected() {
        let src = TensorDesc::new(vec![2usize, 2], DataType::F32, FormatType::Ab).unwrap();
        let wei = TensorDesc::new(vec![2usize, 2], DataType::F16, FormatType::Ab).unwrap();
        let err = OperatorDesc::new(
            KernelKind::Matmul,
            KernelProp::ForwardInference,
            EngineKind::Cpu,
            RuntimeKind::Undef,
            vec![src.clone(), wei, src],
            Default::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidDescriptor(_)));
    }

    #[test]
    fn test_gpu_descriptor_is_unsupported() {
        let engine = engine();
        let stream = engine.create_stream().unwrap();
        let t = TensorDesc::new(vec![1usize, 1], DataType::F32, FormatType::Ab).unwrap();
        let desc = OperatorDesc::new(
            KernelKind::Matmul,
            KernelProp::ForwardInference,
            EngineKind::Gpu,
            RuntimeKind::Opencl,
            vec![t.clone(), t.clone(), t],
            Default::default(),
        )
        .unwrap();
        assert!(matches!(
            engine.create_kernel(Arc::new(desc), &stream),
            Err(EngineError::UnsupportedOperator(_))
        ));
    }

    #[test]
    fn test_f16_matmul() {
        let engine = engine();
        let stream = engine.create_stream().unwrap();
        let kernel = engine
            .create_kernel(matmul_desc(1, 2, 1, DataType::F16, DataType::F16), &stream)
            .unwrap();
        let a = engine.create_memory_storage(4).unwrap();
        let b = engine.create_memory_storage(4).unwrap();
        let c = engine.create_memory_storage(2).unwrap();
        a.write_slice(&[f16::from_f32(1.5), f16::from_f32(-2.0)], None).unwrap();
        b.write_slice(&[f16::from_f32(2.0), f16::from_f32(0.25)], None).unwrap();
        let mut ctx = ExecContext::new(&stream);
        ctx.add_input(&a);
        ctx.add_input(&b);
        ctx.add_output(&c);
        kernel.init(&ctx).unwrap();
        kernel.execute().unwrap();
        let out: Vec<f16> = c.read_vec(1, None).unwrap();
        assert_relative_eq!(out[0].to_f32(), 2.5, epsilon = 1e-3);
    }

    #[test]
    fn test_s8_matmul_accumulates_in_s32() {
        let engine = engine();
        let stream = engine.create_stream().unwrap();
        let kernel = engine
            .create_kernel(matmul_desc(1, 2, 1, DataType::S8, DataType::S32), &stream)
            .unwrap();
        let a = engine.create_memory_storage(2).unwrap();
        let b = engine.create_memory_storage(2).unwrap();
        let c = engine.create_memory_storage(4).unwrap();
        a.write_slice(&[-128i8, 127], None).unwrap();
        b.write_slice(&[127i8, 127], None).unwrap();
        let mut ctx = ExecContext::new(&stream);
        ctx.add_input(&a);
        ctx.add_input(&b);
        ctx.add_output(&c);
        kernel.init(&ctx).unwrap();
        kernel.execute().unwrap();
        assert_eq!(c.read_vec::<i32>(1, None).unwrap(), vec![-127]);
    }

    #[test]
    fn test_softmax_kernel() {
        let engine = engine();
        let stream = engine.create_stream().unwrap();
        let t = TensorDesc::new(vec![2usize, 2], DataType::F32, FormatType::Ab).unwrap();
        let desc = OperatorDesc::new(
            KernelKind::Softmax,
            KernelProp::ForwardInference,
            EngineKind::Cpu,
            RuntimeKind::Undef,
            vec![t.clone(), t],
            Default::default(),
        )
        .unwrap();
        let kernel = engine.create_kernel(Arc::new(desc), &stream).unwrap();
        let x = engine.create_memory_storage(16).unwrap();
        x.write_slice(&[0.0f32, 0.0, 1.0, 1.0], None).unwrap();
        // Softmax in place: the same storage is input and output.
        let mut ctx = ExecContext::new(&stream);
        ctx.add_input(&x);
        ctx.add_output(&x);
        kernel.init(&ctx).unwrap();
        kernel.execute().unwrap();
        for v in x.read_vec::<f32>(4, None).unwrap() {
            assert_relative_eq!(v, 0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_host_storage_limits() {
        let config = EngineConfig {
            host_max_alloc_bytes: 64,
            ..EngineConfig::default()
        };
        let engine = CpuEngine::new(&config, Arc::new(KernelRegistry::with_builtins()));
        assert_eq!(engine.create_memory_storage(0).unwrap().capacity(), 0);
        assert!(engine.create_memory_storage(64).is_ok());
        assert!(matches!(
            engine.create_memory_storage(65),
            Err(EngineError::OutOfMemory { requested: 65, .. })
        ));
    }
}
