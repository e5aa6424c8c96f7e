//! Dense linear algebra on ndarray, with factorizations done by faer

use faer::linalg::solvers::{ColPivQr, Solve};
use faer::linalg::triangular_solve::solve_upper_triangular_in_place;
use faer::{Mat, MatRef, Par, Side};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Diagonal entries of R smaller than this, relative to the first, mark a
/// rank deficient design
const RANK_TOLERANCE: f64 = 1e-10;

/// A Cholesky pivot whose square is below this fraction of the matching
/// diagonal entry marks a singular matrix
const SINGULAR_TOLERANCE: f64 = 1e-10;

fn to_faer(x: ArrayView2<'_, f64>) -> Mat<f64> {
    Mat::from_fn(x.nrows(), x.ncols(), |i, j| x[[i, j]])
}

fn to_ndarray(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

/// Full-rank least squares solution of `X b = y`
#[derive(Debug, Clone)]
pub struct LeastSquares {
    pub coefficients: Array1<f64>,
    /// `(X'X)^-1`, in the original column order
    pub unscaled_cov: Array2<f64>,
}

/// Solve `X b = y` by column-pivoted QR
///
/// Returns `None` when `X` has fewer rows than columns or is rank deficient.
#[must_use]
pub fn least_squares(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Option<LeastSquares> {
    let (n, p) = x.dim();
    if n < p || p == 0 || y.len() != n || x.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let a = to_faer(x);
    let qr = ColPivQr::new(a.as_ref());
    let r = qr.R();
    let pivot: Vec<usize> = qr.P().arrays().0.to_vec();

    let lead = r[(0, 0)].abs();
    if lead == 0.0 || (1..p).any(|i| r[(i, i)].abs() <= RANK_TOLERANCE * lead) {
        return None;
    }

    // R^-1 from the leading p x p block of R
    let mut r_inv = Mat::<f64>::identity(p, p);
    solve_upper_triangular_in_place(r.submatrix(0, 0, p, p), r_inv.as_mut(), Par::Seq);
    let r_inv = to_ndarray(r_inv.as_ref());

    let q = to_ndarray(qr.compute_thin_Q().as_ref());
    let beta_pivoted = r_inv.dot(&q.t().dot(&y));
    let cov_pivoted = r_inv.dot(&r_inv.t());

    let mut coefficients = Array1::zeros(p);
    let mut unscaled_cov = Array2::zeros((p, p));
    for (i, &pi) in pivot.iter().enumerate() {
        coefficients[pi] = beta_pivoted[i];
        for (j, &pj) in pivot.iter().enumerate() {
            unscaled_cov[[pi, pj]] = cov_pivoted[[i, j]];
        }
    }

    Some(LeastSquares {
        coefficients,
        unscaled_cov,
    })
}

/// Inverse of a symmetric positive definite matrix via Cholesky
///
/// Returns `None` if the matrix is not square, has non-finite entries, or is
/// singular to working precision.
#[must_use]
pub fn spd_inverse(matrix: ArrayView2<'_, f64>) -> Option<Array2<f64>> {
    let n = matrix.nrows();
    if n == 0 || n != matrix.ncols() || matrix.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let a = to_faer(matrix);
    let factor = a.as_ref().llt(Side::Lower).ok()?;
    let l = factor.L();
    if (0..n).any(|i| l[(i, i)].powi(2) <= SINGULAR_TOLERANCE * matrix[[i, i]].abs()) {
        return None;
    }

    let inverse = factor.solve(Mat::<f64>::identity(n, n).as_ref());
    Some(to_ndarray(inverse.as_ref()))
}

/// Column means of a samples x features matrix
#[must_use]
pub fn column_means(x: ArrayView2<'_, f64>) -> Array1<f64> {
    x.mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()))
}

/// Sample covariance (ddof = 1) with rows as observations, columns as variables
///
/// Returns `None` with fewer than two observations.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn covariance(x: ArrayView2<'_, f64>) -> Option<Array2<f64>> {
    let n = x.nrows();
    if n < 2 {
        return None;
    }
    let centered = &x - &column_means(x);
    Some(centered.t().dot(&centered) / (n - 1) as f64)
}

/// `v' M v`
#[must_use]
pub fn quadratic_form(matrix: ArrayView2<'_, f64>, v: ArrayView1<'_, f64>) -> f64 {
    v.dot(&matrix.dot(&v))
}
