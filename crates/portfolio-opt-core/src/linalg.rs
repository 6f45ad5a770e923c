//! Dense f64 helpers shared by the formulation and both solvers.

use crate::error::OptimizerError;
use crate::OptimizerResult;

/// Dot product.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Matrix-vector multiplication.
pub fn mat_vec(mat: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    mat.iter().map(|row| dot(row, v)).collect()
}

/// Quadratic form w' * M * w.
pub fn quad_form(w: &[f64], mat: &[Vec<f64>]) -> f64 {
    mat.iter()
        .zip(w.iter())
        .filter(|(_, wi)| **wi != 0.0)
        .map(|(row, wi)| wi * dot(row, w))
        .sum()
}

/// Lower-triangular Cholesky factor L with M = L * L'.
///
/// Covariance estimates are often only positive semi-definite, so a diagonal
/// jitter is added (and grown tenfold per retry) until the factorization
/// succeeds.
#[allow(clippy::needless_range_loop)]
pub fn cholesky_psd(mat: &[Vec<f64>]) -> OptimizerResult<Vec<Vec<f64>>> {
    let n = mat.len();
    let scale = (0..n).map(|i| mat[i][i].abs()).fold(0.0_f64, f64::max).max(1e-12);
    let mut jitter = 0.0;

    for _ in 0..8 {
        if let Some(l) = try_cholesky(mat, jitter) {
            return Ok(l);
        }
        jitter = if jitter == 0.0 { scale * 1e-12 } else { jitter * 10.0 };
    }

    Err(OptimizerError::InvalidInput {
        field: "covariance_matrix".into(),
        reason: "Matrix is not positive semi-definite".into(),
    })
}

#[allow(clippy::needless_range_loop)]
fn try_cholesky(mat: &[Vec<f64>], jitter: f64) -> Option<Vec<Vec<f64>>> {
    let n = mat.len();
    let mut l = vec![vec![0.0; n]; n];
    for j in 0..n {
        let mut diag = mat[j][j] + jitter;
        for k in 0..j {
            diag -= l[j][k] * l[j][k];
        }
        if diag < 0.0 {
            return None;
        }
        let ljj = diag.sqrt();
        l[j][j] = ljj;
        for i in (j + 1)..n {
            let mut s = mat[i][j];
            for k in 0..j {
                s -= l[i][k] * l[j][k];
            }
            l[i][j] = if ljj > 0.0 { s / ljj } else { 0.0 };
        }
    }
    if l.iter().flatten().all(|v| v.is_finite()) {
        Some(l)
    } else {
        None
    }
}

/// Sample covariance of equally long series (n - 1 denominator).
pub fn sample_covariance(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return f64::NAN;
    }
    let ma = a[..n].iter().sum::<f64>() / n as f64;
    let mb = b[..n].iter().sum::<f64>() / n as f64;
    a[..n]
        .iter()
        .zip(b[..n].iter())
        .map(|(x, y)| (x - ma) * (y - mb))
        .sum::<f64>()
        / (n as f64 - 1.0)
}
