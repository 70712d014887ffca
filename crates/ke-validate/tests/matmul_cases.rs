use std::collections::HashMap;
use std::sync::Arc;

use ke_core::{
    CopyBuffer, CopyDirection, DataType, EngineConfig, EngineError, EngineFactory, EngineKind,
    FormatType, KernelKind, KernelProp, OperatorDesc, RuntimeKind, TensorDesc,
};
use approx::assert_relative_eq;
use ke_validate::{
    check_result, gen_matmul_case, init_logging, make_data, reference_output, run_on_engine,
    DataSpec, OpArgs, TestParams, ValidateError, DEFAULT_TOLERANCE,
};

fn factory() -> EngineFactory {
    init_logging();
    EngineFactory::new(EngineConfig::default())
}

#[test]
fn gpu_matmul_16x16x16_matches_reference() {
    let factory = factory();
    let args = gen_matmul_case(16, 16, 16, EngineKind::Gpu, RuntimeKind::Opencl, 2021).unwrap();
    assert!(check_result(&factory, &TestParams::new(args)));
}

#[test]
fn degenerate_1x1x1_on_both_engines() {
    let factory = factory();
    for (engine, runtime) in [
        (EngineKind::Cpu, RuntimeKind::Undef),
        (EngineKind::Gpu, RuntimeKind::Opencl),
    ] {
        let args = gen_matmul_case(1, 1, 1, engine, runtime, 5).unwrap();
        assert!(check_result(&factory, &TestParams::new(args)), "{}", engine);
    }
}

#[test]
fn cpu_and_gpu_agree_on_ragged_shapes() {
    let factory = factory();
    for (i, (m, k, n)) in [(3, 5, 7), (17, 9, 33), (64, 1, 2)].into_iter().enumerate() {
        let seed = 100 + i as u64;
        let (gpu, _) = gen_matmul_case(m, k, n, EngineKind::Gpu, RuntimeKind::Opencl, seed).unwrap();
        let (cpu, _) = gen_matmul_case(m, k, n, EngineKind::Cpu, RuntimeKind::Undef, seed).unwrap();
        let gpu_out = run_on_engine(&factory, &gpu).unwrap();
        let cpu_out = run_on_engine(&factory, &cpu).unwrap();
        let gpu_c = gpu_out[0].as_slice::<f32>().unwrap();
        let cpu_c = cpu_out[0].as_slice::<f32>().unwrap();
        assert_eq!(gpu_c.len(), m * n);
        for (x, y) in gpu_c.iter().zip(cpu_c) {
            assert_relative_eq!(
                x,
                y,
                epsilon = DEFAULT_TOLERANCE,
                max_relative = DEFAULT_TOLERANCE
            );
        }
    }
}

fn eltwise_case(engine: EngineKind, runtime: RuntimeKind) -> (OpArgs, OpArgs) {
    let t = TensorDesc::new(vec![4usize, 4], DataType::F32, FormatType::Ab).unwrap();
    let mut attrs = HashMap::new();
    attrs.insert("algorithm".to_string(), "relu".to_string());
    let desc = Arc::new(
        OperatorDesc::new(
            KernelKind::Eltwise,
            KernelProp::ForwardInference,
            engine,
            runtime,
            vec![t.clone(), t.clone()],
            attrs,
        )
        .unwrap(),
    );
    let (a, a_copy) = make_data(&t, &DataSpec::default()).unwrap();
    let (b, b_copy) = make_data(&t, &DataSpec { clear: true, ..DataSpec::default() }).unwrap();
    (
        OpArgs {
            desc: Arc::clone(&desc),
            data: vec![a, b],
        },
        OpArgs {
            desc,
            data: vec![a_copy, b_copy],
        },
    )
}

#[test]
fn unregistered_operator_is_expected_to_fail() {
    let factory = factory();
    let args = eltwise_case(EngineKind::Gpu, RuntimeKind::Opencl);
    let err = run_on_engine(&factory, &args.0).unwrap_err();
    assert!(matches!(
        err,
        ValidateError::Engine(EngineError::UnsupportedOperator(_))
    ));
    assert!(check_result(&factory, &TestParams::expecting_failure(args.clone())));
    assert!(!check_result(&factory, &TestParams::new(args)));
}

fn column_major_weight_case(engine: EngineKind, runtime: RuntimeKind) -> (OpArgs, OpArgs) {
    let src = TensorDesc::new(vec![2usize, 2], DataType::F32, FormatType::Ab).unwrap();
    let wei = TensorDesc::new(vec![2usize, 2], DataType::F32, FormatType::Ba).unwrap();
    let desc = Arc::new(
        OperatorDesc::new(
            KernelKind::Matmul,
            KernelProp::ForwardInference,
            engine,
            runtime,
            vec![src.clone(), wei.clone(), src.clone()],
            HashMap::new(),
        )
        .unwrap(),
    );
    let mut data = Vec::new();
    let mut pristine = Vec::new();
    for (i, (t, clear)) in [(&src, false), (&wei, false), (&src, true)].into_iter().enumerate() {
        let spec = DataSpec {
            clear,
            seed: i as u64,
            ..DataSpec::default()
        };
        let (work, copy) = make_data(t, &spec).unwrap();
        data.push(work);
        pristine.push(copy);
    }
    (
        OpArgs {
            desc: Arc::clone(&desc),
            data,
        },
        OpArgs {
            desc,
            data: pristine,
        },
    )
}

#[test]
fn column_major_weight_is_unsupported_on_both_engines() {
    let factory = factory();
    for (engine, runtime) in [
        (EngineKind::Cpu, RuntimeKind::Undef),
        (EngineKind::Gpu, RuntimeKind::Opencl),
    ] {
        let args = column_major_weight_case(engine, runtime);
        assert!(
            matches!(
                run_on_engine(&factory, &args.0),
                Err(ValidateError::Engine(EngineError::UnsupportedOperator(_)))
            ),
            "{}",
            engine
        );
        assert!(matches!(
            reference_output(&args.1),
            Err(ValidateError::NoReference { .. })
        ));
        assert!(check_result(&factory, &TestParams::expecting_failure(args)));
    }
}

#[test]
fn mixed_matmul_dtypes_never_reach_an_engine() {
    let src = TensorDesc::new(vec![4usize, 4], DataType::F32, FormatType::Ab).unwrap();
    let wei = TensorDesc::new(vec![4usize, 4], DataType::F16, FormatType::Ab).unwrap();
    for (engine, runtime) in [
        (EngineKind::Cpu, RuntimeKind::Undef),
        (EngineKind::Gpu, RuntimeKind::Opencl),
    ] {
        let err = OperatorDesc::new(
            KernelKind::Matmul,
            KernelProp::ForwardInference,
            engine,
            runtime,
            vec![src.clone(), wei.clone(), src.clone()],
            HashMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidDescriptor(_)));
    }
}

#[test]
fn disabled_gpu_fails_cleanly() {
    init_logging();
    let factory = EngineFactory::new(EngineConfig {
        gpu_disabled: true,
        ..EngineConfig::default()
    });
    let args = gen_matmul_case(4, 4, 4, EngineKind::Gpu, RuntimeKind::Opencl, 9).unwrap();
    assert!(matches!(
        run_on_engine(&factory, &args.0),
        Err(ValidateError::Engine(EngineError::Device(_)))
    ));
    assert!(check_result(&factory, &TestParams::expecting_failure(args)));
}

#[test]
fn copy_round_trip_is_bit_exact() {
    let factory = factory();
    let gpu = factory.create(EngineKind::Gpu, RuntimeKind::Opencl).unwrap();
    let cpu = factory.create(EngineKind::Cpu, RuntimeKind::Undef).unwrap();
    let stream = gpu.create_stream().unwrap();
    let desc = TensorDesc::new(vec![7usize, 13], DataType::S8, FormatType::Ab).unwrap();
    let (data, _) = make_data(&desc, &DataSpec { range: (-128.0, 127.0), seed: 3, ..DataSpec::default() })
        .unwrap();
    let bytes = data.as_bytes();

    let dev = gpu.create_memory_storage(bytes.len()).unwrap();
    dev.copy(CopyBuffer::From(bytes), bytes.len(), CopyDirection::HostToDevice, Some(&stream))
        .unwrap();
    let mut back = vec![0u8; bytes.len()];
    dev.copy(CopyBuffer::Into(&mut back), bytes.len(), CopyDirection::DeviceToHost, Some(&stream))
        .unwrap();
    assert_eq!(back, bytes);

    let host = cpu.create_memory_storage(bytes.len()).unwrap();
    host.copy(CopyBuffer::From(bytes), bytes.len(), CopyDirection::HostToHost, None)
        .unwrap();
    let mut again = vec![0u8; bytes.len()];
    host.copy(CopyBuffer::Into(&mut again), bytes.len(), CopyDirection::HostToHost, None)
        .unwrap();
    assert_eq!(again, bytes);
}

#[test]
fn invalid_copies_are_rejected() {
    let factory = factory();
    let gpu = factory.create(EngineKind::Gpu, RuntimeKind::Opencl).unwrap();
    let dev = gpu.create_memory_storage(8).unwrap();
    let src = [0u8; 16];
    assert!(matches!(
        dev.copy(CopyBuffer::From(&src), 16, CopyDirection::HostToDevice, None),
        Err(EngineError::CopySize { requested: 16, capacity: 8 })
    ));
    assert!(matches!(
        dev.copy(CopyBuffer::From(&src), 8, CopyDirection::HostToHost, None),
        Err(EngineError::InvalidCopyDirection { .. })
    ));
}

#[test]
fn factory_engines_are_shared_across_threads() {
    let factory = factory();
    let ids: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| factory.create(EngineKind::Cpu, RuntimeKind::Undef).unwrap().id()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(factory.engines_created(), 1);
}
