//! Tiled f32 matmul for the OpenCL engine.
//!
//! The program is built from [`MATMUL_SOURCE`] with `-DTILE=<edge>`; launches
//! are emulated one work group at a time with the same local-memory tiling
//! and zero padding the OpenCL C code performs.

use log::warn;

use crate::device::NdRange;
use crate::error::{EngineError, Result};
use crate::kernel::{DeviceKernel, KernelVariant};
use crate::kernels::matmul::dims;
use crate::op_desc::OperatorDesc;
use crate::registry::BuildTarget;

pub const MATMUL_ENTRY: &str = "matmul_tiled";

pub const MATMUL_SOURCE: &str = r#"
#ifndef TILE
#define TILE 8
#endif

__kernel void matmul_tiled(
    __global const float* A, __global const float* B,
    __global float* C,
    const int M, const int N, const int K)
{
    __local float As[TILE][TILE];
    __local float Bs[TILE][TILE];
    int tx = get_local_id(0), ty = get_local_id(1);
    int col = get_group_id(0) * TILE + tx;
    int row = get_group_id(1) * TILE + ty;
    float sum = 0.0f;
    for (int t = 0; t < (K + TILE - 1) / TILE; t++) {
        int k0 = t * TILE;
        As[ty][tx] = (row < M && k0 + tx < K) ? A[row * K + k0 + tx] : 0.0f;
        Bs[ty][tx] = (k0 + ty < K && col < N) ? B[(k0 + ty) * N + col] : 0.0f;
        barrier(CLK_LOCAL_MEM_FENCE);
        for (int k = 0; k < TILE; k++)
            sum += As[ty][k] * Bs[k][tx];
        barrier(CLK_LOCAL_MEM_FENCE);
    }
    if (row < M && col < N) C[row * N + col] = sum;
}
"#;

/// Largest square tile not above `tile` whose work group fits the device.
fn fit_tile(tile: usize, max_work_group_size: usize) -> usize {
    tile.clamp(1, edge_limit(max_work_group_size))
}

/// Largest `e >= 1` with `e * e <= max_work_group_size`.
fn edge_limit(max_work_group_size: usize) -> usize {
    let mut edge = (max_work_group_size as f64).sqrt() as usize;
    while edge > 1 && edge.checked_mul(edge).map_or(true, |sq| sq > max_work_group_size) {
        edge -= 1;
    }
    while (edge + 1)
        .checked_mul(edge + 1)
        .is_some_and(|sq| sq <= max_work_group_size)
    {
        edge += 1;
    }
    edge.max(1)
}

pub fn build_f32(desc: &OperatorDesc, target: BuildTarget<'_>) -> Result<KernelVariant> {
    let BuildTarget::Device(device) = target else {
        return Err(EngineError::UnsupportedOperator(
            "tiled OpenCL matmul needs a device".to_string(),
        ));
    };
    let (m, _, n) = dims(desc)?;
    let info = device.info();
    let tile = fit_tile(info.preferred_tile, info.max_work_group_size);
    if tile != info.preferred_tile {
        warn!(
            "tile {} exceeds the work group limit of {}, using {}",
            info.preferred_tile, info.max_work_group_size, tile
        );
    }
    let program = device.build_program(MATMUL_SOURCE, MATMUL_ENTRY, &format!("-DTILE={}", tile))?;
    let range = NdRange::new_2d([n, m], [tile, tile])?;
    range.validate(info.max_work_group_size)?;
    Ok(KernelVariant::Device(DeviceKernel {
        name: "ocl_matmul_tiled_f32",
        program,
        range,
        run: run_tiled,
    }))
}

fn run_tiled(
    desc: &OperatorDesc,
    range: &NdRange,
    inputs: &[&[u8]],
    outputs: &mut [Vec<u8>],
) -> Result<()> {
    let (m, k, n) = dims(desc)?;
    let a: Vec<f32> = bytemuck::pod_collect_to_vec(inputs[0]);
    let b: Vec<f32> = bytemuck::pod_collect_to_vec(inputs[1]);
    let c = tiled_matmul(&a, &b, m, k, n, range);
    outputs[0].copy_from_slice(bytemuck::cast_slice(&c));
    Ok(())
}

fn tiled_matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize, range: &NdRange) -> Vec<f32> {
    let [tile_x, tile_y] = range.local;
    let [groups_x, groups_y] = range.num_groups();
    // Square tiles share one edge for the k step.
    let tile_k = tile_x.min(tile_y);
    let mut c = vec![0.0f32; m * n];
    let mut a_tile = vec![0.0f32; tile_y * tile_k];
    let mut b_tile = vec![0.0f32; tile_k * tile_x];
    let mut acc = vec![0.0f32; tile_y * tile_x];

    for gy in 0..groups_y {
        for gx in 0..groups_x {
            acc.iter_mut().for_each(|v| *v = 0.0);
            for k0 in (0..k).step_by(tile_k) {
                for ty in 0..tile_y {
                    let row = gy * tile_y + ty;
                    for tk in 0..tile_k {
                        let kk = k0 + tk;
                        a_tile[ty * tile_k + tk] =
                            if row < m && kk < k { a[row * k + kk] } else { 0.0 };
                    }
                }
                for tk in 0..tile_k {
                    let kk = k0 + tk;
                    for tx in 0..tile_x {
                        let col = gx * tile_x + tx;
                        b_tile[tk * tile_x + tx] =
                            if kk < k && col < n { b[kk * n + col] } else { 0.0 };
                    }
                }
                // barrier
                for ty in 0..tile_y {
                    for tx in 0..tile_x {
                        let mut sum = acc[ty * tile_x + tx];
                        for tk in 0..tile_k {
                            sum += a_tile[ty * tile_k + tk] * b_tile[tk * tile_x + tx];
                        }
                        acc[ty * tile_x + tx] = sum;
                    }
                }
            }
            for ty in 0..tile_y {
                let row = gy * tile_y + ty;
                for tx in 0..tile_x {
                    let col = gx * tile_x + tx;
                    if row < m && col < n {
                        c[row * n + col] = acc[ty * tile_x + tx];
                    }
                }
            }
        }
    }
    c
}
