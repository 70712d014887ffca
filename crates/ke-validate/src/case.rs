use std::sync::Arc;

use ke_core::{
    DataType, EngineKind, FormatType, KernelKind, KernelProp, OperatorDesc, RuntimeKind,
    TensorDesc,
};

use crate::buffer::HostBuffer;
use crate::data::{make_data, DataSpec};
use crate::error::Result;

/// One operator invocation: the descriptor and a buffer per tensor, in
/// descriptor order.
#[derive(Debug, Clone)]
pub struct OpArgs {
    pub desc: Arc<OperatorDesc>,
    pub data: Vec<HostBuffer>,
}

/// A case run on the engine (`args.0`) and checked against a reference
/// computed from pristine copies of the same data (`args.1`).
#[derive(Debug, Clone)]
pub struct TestParams {
    pub args: (OpArgs, OpArgs),
    pub expect_to_fail: bool,
}

impl TestParams {
    pub fn new(args: (OpArgs, OpArgs)) -> Self {
        Self {
            args,
            expect_to_fail: false,
        }
    }

    pub fn expecting_failure(args: (OpArgs, OpArgs)) -> Self {
        Self {
            args,
            expect_to_fail: true,
        }
    }
}

/// An fp32 `[m, k] @ [k, n]` matmul targeting `(engine, runtime)`.
///
/// Sources are drawn from [-10, 10]; the destination starts zeroed.
pub fn gen_matmul_case(
    m: usize,
    k: usize,
    n: usize,
    engine: EngineKind,
    runtime: RuntimeKind,
    seed: u64,
) -> Result<(OpArgs, OpArgs)> {
    let descs = vec![
        TensorDesc::new(vec![m, k], DataType::F32, FormatType::Ab)?,
        TensorDesc::new(vec![k, n], DataType::F32, FormatType::Ab)?,
        TensorDesc::new(vec![m, n], DataType::F32, FormatType::Ab)?,
    ];
    let mut working = Vec::with_capacity(descs.len());
    let mut pristine = Vec::with_capacity(descs.len());
    for (index, desc) in descs.iter().enumerate() {
        let spec = DataSpec {
            clear: index == 2,
            seed: seed.wrapping_add(index as u64),
            ..DataSpec::default()
        };
        let (data, copy) = make_data(desc, &spec)?;
        working.push(data);
        pristine.push(copy);
    }
    let desc = Arc::new(OperatorDesc::new(
        KernelKind::Matmul,
        KernelProp::ForwardInference,
        engine,
        runtime,
        descs,
        Default::default(),
    )?);
    Ok((
        OpArgs {
            desc: Arc::clone(&desc),
            data: working,
        },
        OpArgs {
            desc,
            data: pristine,
        },
    ))
}
