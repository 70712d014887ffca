use crate::error::Result;
use crate::kernel::{HostKernel, KernelVariant};
use crate::op_desc::OperatorDesc;
use crate::registry::BuildTarget;

/// Softmax over consecutive chunks of `row` elements.
///
/// For each chunk: result[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
pub fn softmax_rows(x: &[f32], row: usize) -> Vec<f32> {
    let mut result = vec![0.0f32; x.len()];
    for (src, dst) in x.chunks_exact(row).zip(result.chunks_exact_mut(row)) {
        // Subtract the max for numerical stability
        let max_val = src.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let mut sum = 0.0f32;
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = (s - max_val).exp();
            sum += *d;
        }
        for d in dst.iter_mut() {
            *d /= sum;
        }
    }
    result
}

fn run_f32(desc: &OperatorDesc, inputs: &[&[u8]], outputs: &mut [Vec<u8>]) -> Result<()> {
    let row = desc.tensor_descs()[0].shape().last_dim().unwrap_or(1);
    let x: Vec<f32> = bytemuck::pod_collect_to_vec(inputs[0]);
    let y = softmax_rows(&x, row);
    outputs[0].copy_from_slice(bytemuck::cast_slice(&y));
    Ok(())
}

pub fn build_f32(_: &OperatorDesc, _: BuildTarget<'_>) -> Result<KernelVariant> {
    Ok(KernelVariant::Host(HostKernel {
        name: "ref_softmax_f32",
        run: run_f32,
    }))
}
