//! Reference matmul kernels for the CPU engine.
//!
//! Plain triple loops, written for correctness rather than speed. Half
//! precision inputs accumulate in f32; 8-bit integer inputs accumulate in
//! i32 and produce an s32 destination.

use bytemuck::Pod;
use half::{bf16, f16};

use crate::error::{EngineError, Result};
use crate::kernel::{HostKernel, KernelVariant};
use crate::op_desc::OperatorDesc;
use crate::registry::BuildTarget;

/// `C = A @ B` for row-major `a` of shape [m, k] and `b` of shape [k, n].
pub fn matmul_f32(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0f32;
            for p in 0..k {
                sum += a[i * k + p] * b[p * n + j];
            }
            c[i * n + j] = sum;
        }
    }
    c
}

/// Integer product with wrapping i32 accumulation.
pub fn matmul_i32(a: &[i32], b: &[i32], m: usize, k: usize, n: usize) -> Vec<i32> {
    let mut c = vec![0i32; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0i32;
            for p in 0..k {
                sum = sum.wrapping_add(a[i * k + p].wrapping_mul(b[p * n + j]));
            }
            c[i * n + j] = sum;
        }
    }
    c
}

pub(crate) fn dims(desc: &OperatorDesc) -> Result<(usize, usize, usize)> {
    desc.matmul_dims().ok_or_else(|| {
        EngineError::UnsupportedOperator(format!("{} is not a matmul", desc.kind()))
    })
}

fn widen<T: Pod>(bytes: &[u8], f: impl Fn(T) -> f32) -> Vec<f32> {
    bytemuck::pod_collect_to_vec::<u8, T>(bytes)
        .into_iter()
        .map(f)
        .collect()
}

fn widen_int<T: Pod>(bytes: &[u8], f: impl Fn(T) -> i32) -> Vec<i32> {
    bytemuck::pod_collect_to_vec::<u8, T>(bytes)
        .into_iter()
        .map(f)
        .collect()
}

fn store<T: Pod>(out: &mut [u8], values: &[T]) {
    out.copy_from_slice(bytemuck::cast_slice(values));
}

fn run_f32(desc: &OperatorDesc, inputs: &[&[u8]], outputs: &mut [Vec<u8>]) -> Result<()> {
    let (m, k, n) = dims(desc)?;
    let a: Vec<f32> = bytemuck::pod_collect_to_vec(inputs[0]);
    let b: Vec<f32> = bytemuck::pod_collect_to_vec(inputs[1]);
    store(&mut outputs[0], &matmul_f32(&a, &b, m, k, n));
    Ok(())
}

fn run_f16(desc: &OperatorDesc, inputs: &[&[u8]], outputs: &mut [Vec<u8>]) -> Result<()> {
    let (m, k, n) = dims(desc)?;
    let a = widen(inputs[0], f16::to_f32);
    let b = widen(inputs[1], f16::to_f32);
    let c: Vec<f16> = matmul_f32(&a, &b, m, k, n)
        .into_iter()
        .map(f16::from_f32)
        .collect();
    store(&mut outputs[0], &c);
    Ok(())
}

fn run_bf16(desc: &OperatorDesc, inputs: &[&[u8]], outputs: &mut [Vec<u8>]) -> Result<()> {
    let (m, k, n) = dims(desc)?;
    let a = widen(inputs[0], bf16::to_f32);
    let b = widen(inputs[1], bf16::to_f32);
    let c: Vec<bf16> = matmul_f32(&a, &b, m, k, n)
        .into_iter()
        .map(bf16::from_f32)
        .collect();
    store(&mut outputs[0], &c);
    Ok(())
}

fn run_s8(desc: &OperatorDesc, inputs: &[&[u8]], outputs: &mut [Vec<u8>]) -> Result<()> {
    let (m, k, n) = dims(desc)?;
    let a = widen_int(inputs[0], |v: i8| v as i32);
    let b = widen_int(inputs[1], |v: i8| v as i32);
    store(&mut outputs[0], &matmul_i32(&a, &b, m, k, n));
    Ok(())
}

fn run_u8(desc: &OperatorDesc, inputs: &[&[u8]], outputs: &mut [Vec<u8>]) -> Result<()> {
    let (m, k, n) = dims(desc)?;
    let a = widen_int(inputs[0], |v: u8| v as i32);
    let b = widen_int(inputs[1], |v: u8| v as i32);
    store(&mut outputs[0], &matmul_i32(&a, &b, m, k, n));
    Ok(())
}

fn host(name: &'static str, run: crate::kernel::HostKernelFn) -> Result<KernelVariant> {
    Ok(KernelVariant::Host(HostKernel { name, run }))
}

pub fn build_f32(_: &OperatorDesc, _: BuildTarget<'_>) -> Result<KernelVariant> {
    host("ref_matmul_f32", run_f32)
}

pub fn build_f16(_: &OperatorDesc, _: BuildTarget<'_>) -> Result<KernelVariant> {
    host("ref_matmul_f16", run_f16)
}

pub fn build_bf16(_: &OperatorDesc, _: BuildTarget<'_>) -> Result<KernelVariant> {
    host("ref_matmul_bf16", run_bf16)
}

pub fn build_s8(_: &OperatorDesc, _: BuildTarget<'_>) -> Result<KernelVariant> {
    host("ref_matmul_s8s8s32", run_s8)
}

pub fn build_u8(_: &OperatorDesc, _: BuildTarget<'_>) -> Result<KernelVariant> {
    host("ref_matmul_u8u8s32", run_u8)
}
