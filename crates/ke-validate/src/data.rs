use half::{bf16, f16};
use ke_core::{DataType, TensorDesc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::buffer::HostBuffer;
use crate::error::Result;

/// How [`make_data`] fills a tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSpec {
    /// Zero-fill instead of drawing random values.
    pub clear: bool,
    /// Inclusive value range. Integer types clamp it to what they can hold.
    pub range: (f32, f32),
    pub seed: u64,
}

impl Default for DataSpec {
    fn default() -> Self {
        Self {
            clear: false,
            range: (-10.0, 10.0),
            seed: 0,
        }
    }
}

/// Generate data for `desc`, returning the working buffer and a pristine
/// copy of it.
pub fn make_data(desc: &TensorDesc, spec: &DataSpec) -> Result<(HostBuffer, HostBuffer)> {
    let mut buffer = HostBuffer::zeroed(desc);
    if !spec.clear {
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let (lo, hi) = if spec.range.0 <= spec.range.1 {
            spec.range
        } else {
            (spec.range.1, spec.range.0)
        };
        match desc.dtype() {
            DataType::F32 => fill(buffer.as_mut_slice::<f32>()?, || rng.gen_range(lo..=hi)),
            DataType::F16 => fill(buffer.as_mut_slice::<f16>()?, || {
                f16::from_f32(rng.gen_range(lo..=hi))
            }),
            DataType::Bf16 => fill(buffer.as_mut_slice::<bf16>()?, || {
                bf16::from_f32(rng.gen_range(lo..=hi))
            }),
            DataType::S32 => {
                let (a, b) = int_range(lo, hi, i32::MIN as f32, i32::MAX as f32);
                fill(buffer.as_mut_slice::<i32>()?, || rng.gen_range(a as i32..=b as i32))
            }
            DataType::S8 => {
                let (a, b) = int_range(lo, hi, i8::MIN as f32, i8::MAX as f32);
                fill(buffer.as_mut_slice::<i8>()?, || rng.gen_range(a as i8..=b as i8))
            }
            DataType::U8 => {
                let (a, b) = int_range(lo, hi, u8::MIN as f32, u8::MAX as f32);
                fill(buffer.as_mut_slice::<u8>()?, || rng.gen_range(a as u8..=b as u8))
            }
        }
    }
    let pristine = buffer.clone();
    Ok((buffer, pristine))
}

fn fill<T>(dst: &mut [T], mut next: impl FnMut() -> T) {
    for v in dst.iter_mut() {
        *v = next();
    }
}

/// Clamp `[lo, hi]` into `[min, max]`, collapsing to the nearer bound when
/// the range lies entirely outside.
fn int_range(lo: f32, hi: f32, min: f32, max: f32) -> (f32, f32) {
    let a = lo.ceil().clamp(min, max);
    let b = hi.floor().clamp(min, max);
    if a <= b {
        (a, b)
    } else {
        (a, a)
    }
}
