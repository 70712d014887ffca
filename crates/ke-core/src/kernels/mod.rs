//! Built-in kernel implementations and their registration.

pub mod matmul;
pub mod opencl_matmul;
pub mod softmax;

use crate::dtype::DataType;
use crate::engine::EngineKind;
use crate::format::FormatType;
use crate::op_desc::KernelKind;
use crate::registry::{KernelKey, KernelRegistry};

pub(crate) fn register_builtins(registry: &KernelRegistry) {
    let host_matmul = [
        (DataType::F32, matmul::build_f32 as crate::registry::KernelBuilder),
        (DataType::F16, matmul::build_f16),
        (DataType::Bf16, matmul::build_bf16),
        (DataType::S8, matmul::build_s8),
        (DataType::U8, matmul::build_u8),
    ];
    for (dtype, builder) in host_matmul {
        registry.register(
            KernelKey::new(KernelKind::Matmul, dtype, FormatType::Ab, EngineKind::Cpu),
            builder,
        );
    }
    registry.register(
        KernelKey::new(KernelKind::Softmax, DataType::F32, FormatType::Ab, EngineKind::Cpu),
        softmax::build_f32,
    );
    registry.register(
        KernelKey::new(KernelKind::Matmul, DataType::F32, FormatType::Ab, EngineKind::Gpu),
        opencl_matmul::build_f32,
    );
}
