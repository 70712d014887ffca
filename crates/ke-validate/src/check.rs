use std::sync::Arc;

use ke_core::{
    CopyBuffer, CopyDirection, DataType, EngineFactory, ExecContext, FormatType, KernelKind,
    MemoryStorage, Residency,
};
use log::{debug, info, warn};

use crate::buffer::HostBuffer;
use crate::case::{OpArgs, TestParams};
use crate::error::{Result, ValidateError};
use crate::reference::{compare_data, reference_matmul, DEFAULT_TOLERANCE};

/// Run `args` end to end on the engine its descriptor targets.
///
/// Creates a stream and one storage per tensor, uploads every buffer,
/// binds the storages in role order, executes once and downloads the
/// outputs. Returns one buffer per output role.
pub fn run_on_engine(factory: &EngineFactory, args: &OpArgs) -> Result<Vec<HostBuffer>> {
    let desc = &args.desc;
    let descs = desc.tensor_descs();
    if args.data.len() != descs.len() {
        return Err(ValidateError::DataCount {
            got: args.data.len(),
            expected: descs.len(),
        });
    }

    let engine = factory.create(desc.engine_kind(), desc.runtime_kind())?;
    let stream = engine.create_stream()?;
    let storages = descs
        .iter()
        .map(|d| engine.create_memory_storage(d.size_in_bytes()))
        .collect::<ke_core::Result<Vec<MemoryStorage>>>()?;
    for (storage, data) in storages.iter().zip(&args.data) {
        storage.copy(
            CopyBuffer::From(data.as_bytes()),
            data.len(),
            upload_direction(storage),
            Some(&stream),
        )?;
    }

    let kernel = engine.create_kernel(Arc::clone(desc), &stream)?;
    let roles = desc.kind().roles();
    let mut ctx = ExecContext::new(&stream);
    for (role, storage) in roles.iter().zip(&storages) {
        if role.is_input() {
            ctx.add_input(storage);
        } else {
            ctx.add_output(storage);
        }
    }
    kernel.init(&ctx)?;
    kernel.execute()?;
    debug!("{} executed {} on {}", kernel.name(), desc, engine.name());

    let mut outputs = Vec::new();
    for ((role, storage), tensor) in roles.iter().zip(&storages).zip(descs) {
        if role.is_input() {
            continue;
        }
        let mut out = HostBuffer::zeroed(tensor);
        let len = out.len();
        storage.copy(
            CopyBuffer::Into(out.as_bytes_mut()),
            len,
            download_direction(storage),
            Some(&stream),
        )?;
        outputs.push(out);
    }
    stream.synchronize()?;
    Ok(outputs)
}

fn upload_direction(storage: &MemoryStorage) -> CopyDirection {
    match storage.residency() {
        Residency::Host => CopyDirection::HostToHost,
        Residency::Device => CopyDirection::HostToDevice,
    }
}

fn download_direction(storage: &MemoryStorage) -> CopyDirection {
    match storage.residency() {
        Residency::Host => CopyDirection::HostToHost,
        Residency::Device => CopyDirection::DeviceToHost,
    }
}

/// Reference output for `args`, computed on the host. Only row-major f32
/// matmuls have one.
pub fn reference_output(args: &OpArgs) -> Result<Vec<f32>> {
    let desc = &args.desc;
    let dtype = desc.tensor_descs()[0].dtype();
    let row_major = desc
        .tensor_descs()
        .iter()
        .all(|d| d.format() == FormatType::Ab);
    match (desc.kind(), desc.matmul_dims()) {
        (KernelKind::Matmul, Some((m, k, n))) if dtype == DataType::F32 && row_major => {
            if args.data.len() < 2 {
                return Err(ValidateError::DataCount {
                    got: args.data.len(),
                    expected: desc.tensor_descs().len(),
                });
            }
            let a = args.data[0].as_slice::<f32>()?;
            let b = args.data[1].as_slice::<f32>()?;
            Ok(reference_matmul(a, b, m, k, n))
        }
        (kind, _) => Err(ValidateError::NoReference { kind, dtype }),
    }
}

fn evaluate(factory: &EngineFactory, params: &TestParams) -> Result<bool> {
    let (p, q) = &params.args;
    let outputs = run_on_engine(factory, p)?;
    let expected = reference_output(q)?;
    let got = match outputs.first() {
        Some(out) => out.as_slice::<f32>()?,
        None => &[],
    };
    Ok(compare_data(got, &expected, DEFAULT_TOLERANCE))
}

/// Run a case and report whether it behaved as expected.
///
/// A case passes when it runs and matches the reference within
/// [`DEFAULT_TOLERANCE`], or, for `expect_to_fail` cases, when it errors or
/// produces a mismatch.
pub fn check_result(factory: &EngineFactory, params: &TestParams) -> bool {
    match evaluate(factory, params) {
        Ok(true) => {
            if params.expect_to_fail {
                warn!("{} succeeded but was expected to fail", params.args.0.desc);
            }
            !params.expect_to_fail
        }
        Ok(false) => {
            info!("{} does not match the reference", params.args.0.desc);
            params.expect_to_fail
        }
        Err(err) => {
            info!("{} failed: {}", params.args.0.desc, err);
            params.expect_to_fail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::gen_matmul_case;
    use ke_core::{EngineConfig, EngineKind, RuntimeKind};

    #[test]
    fn test_cpu_case_passes() {
        let factory = EngineFactory::new(EngineConfig::default());
        let args = gen_matmul_case(4, 3, 2, EngineKind::Cpu, RuntimeKind::Undef, 1).unwrap();
        assert!(check_result(&factory, &TestParams::new(args)));
    }

    #[test]
    fn test_data_count_checked() {
        let factory = EngineFactory::new(EngineConfig::default());
        let (mut p, _) = gen_matmul_case(2, 2, 2, EngineKind::Cpu, RuntimeKind::Undef, 1).unwrap();
        p.data.pop();
        assert!(matches!(
            run_on_engine(&factory, &p),
            Err(ValidateError::DataCount { got: 2, expected: 3 })
        ));
    }

    #[test]
    fn test_corrupted_reference_fails() {
        let factory = EngineFactory::new(EngineConfig::default());
        let (p, mut q) = gen_matmul_case(2, 2, 2, EngineKind::Cpu, RuntimeKind::Undef, 3).unwrap();
        // Reference becomes 2000 everywhere; engine output stays within 200.
        q.data[0].as_mut_slice::<f32>().unwrap().fill(1000.0);
        q.data[1].as_mut_slice::<f32>().unwrap().fill(1.0);
        let args = (p, q);
        assert!(!check_result(&factory, &TestParams::new(args.clone())));
        assert!(check_result(&factory, &TestParams::expecting_failure(args)));
    }
}
