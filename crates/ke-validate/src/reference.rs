use log::debug;

/// Default tolerance for comparing engine output against the reference.
pub const DEFAULT_TOLERANCE: f32 = 5e-3;

/// `A @ B` for row-major `a` ([m, k]) and `b` ([k, n]), accumulated in f64
/// so it stays independent of the engines' f32 summation order.
pub fn reference_matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut acc = vec![0.0f64; m * n];
    for (a_row, c_row) in a.chunks_exact(k).take(m).zip(acc.chunks_exact_mut(n)) {
        for (&x, b_row) in a_row.iter().zip(b.chunks_exact(n)) {
            for (c, &y) in c_row.iter_mut().zip(b_row) {
                *c += f64::from(x) * f64::from(y);
            }
        }
    }
    acc.into_iter().map(|v| v as f32).collect()
}

/// True when `a` and `b` have the same length and every pair of elements is
/// within `tol`, either absolutely or relative to the expected value `b[i]`.
pub fn compare_data(a: &[f32], b: &[f32], tol: f32) -> bool {
    if a.len() != b.len() {
        debug!("length mismatch: {} vs {}", a.len(), b.len());
        return false;
    }
    match first_mismatch(a, b, tol) {
        Some(i) => {
            debug!("element {} differs: {} vs {}", i, a[i], b[i]);
            false
        }
        None => true,
    }
}

/// Index of the first element pair outside tolerance.
pub fn first_mismatch(a: &[f32], b: &[f32], tol: f32) -> Option<usize> {
    a.iter().zip(b).position(|(&x, &y)| {
        let diff = (x - y).abs();
        // NaN never compares as within tolerance.
        !(diff <= tol || diff <= tol * y.abs())
    })
}
