//! Dense-decomposition helpers bridging `ndarray` storage to `nalgebra`.
//!
//! All numeric state in this crate lives in `ndarray` arrays; the
//! eigendecomposition and SVD needed for whitening and operator
//! construction run through `nalgebra`, which is pure Rust (no BLAS or
//! LAPACK). These helpers convert at the boundary and hand back plain
//! `Array1`/`Array2` results.
use nalgebra::{DMatrix, SymmetricEigen, SVD};
use ndarray::{Array1, Array2};

use crate::error::{MinvError, Result};

/// Copy an `ndarray` matrix into a dense `nalgebra` matrix.
pub fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// Copy a dense `nalgebra` matrix back into an `ndarray` matrix.
pub fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Symmetric eigendecomposition, eigenvalues sorted **descending**.
///
/// Returns `(eigenvalues, eigenvectors)` where column `k` of the
/// eigenvector matrix pairs with eigenvalue `k`. The input is symmetrized
/// as `(A + Aᵗ)/2` first so that accumulated round-off in a nominally
/// symmetric matrix cannot push the decomposition off the real spectrum.
pub fn eigh(a: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(MinvError::DimensionMismatch(format!(
            "eigendecomposition needs a square matrix, got {}x{}",
            n,
            a.ncols()
        )));
    }
    let m = to_dmatrix(a);
    let sym = (&m + m.transpose()) * 0.5;
    let eig = SymmetricEigen::new(sym);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        eig.eigenvalues[j]
            .partial_cmp(&eig.eigenvalues[i])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let vals = Array1::from_iter(order.iter().map(|&i| eig.eigenvalues[i]));
    let vecs = Array2::from_shape_fn((n, n), |(i, j)| eig.eigenvectors[(i, order[j])]);
    Ok((vals, vecs))
}

/// Thin SVD `A = U · diag(s) · Vᵗ` with singular values descending.
///
/// `U` is `[m, r]`, `s` is `[r]`, `V` is `[n, r]` with `r = min(m, n)`.
/// Rank is preserved: no truncation happens here — regularization is the
/// caller's business, applied to `s` at kernel-assembly time.
pub fn thin_svd(a: &Array2<f64>) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>)> {
    let (m, n) = a.dim();
    let r = m.min(n);
    let svd = SVD::try_new(to_dmatrix(a), true, true, f64::EPSILON, 0).ok_or_else(|| {
        MinvError::Numerical(format!("SVD of a {m}x{n} matrix did not converge"))
    })?;
    let u_full = svd.u.ok_or_else(|| MinvError::Numerical("SVD returned no U".into()))?;
    let vt_full = svd
        .v_t
        .ok_or_else(|| MinvError::Numerical("SVD returned no Vᵗ".into()))?;

    let u = Array2::from_shape_fn((m, r), |(i, j)| u_full[(i, j)]);
    let s = Array1::from_iter(svd.singular_values.iter().take(r).copied());
    let v = Array2::from_shape_fn((n, r), |(i, j)| vt_full[(j, i)]);
    Ok((u, s, v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn eigh_identity() {
        let a = Array2::<f64>::eye(4);
        let (vals, _) = eigh(&a).unwrap();
        for &v in vals.iter() {
            approx::assert_abs_diff_eq!(v, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn eigh_sorted_descending() {
        let a = array![[2.0, 0.0], [0.0, 5.0]];
        let (vals, vecs) = eigh(&a).unwrap();
        approx::assert_abs_diff_eq!(vals[0], 5.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(vals[1], 2.0, epsilon = 1e-12);
        // First eigenvector must point along the second axis.
        approx::assert_abs_diff_eq!(vecs[[0, 0]].abs(), 0.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(vecs[[1, 0]].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn eigh_reconstructs() {
        let a = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let (vals, vecs) = eigh(&a).unwrap();
        // A ≈ V diag(λ) Vᵗ
        let lam = Array2::from_diag(&vals);
        let rec = vecs.dot(&lam).dot(&vecs.t());
        for (&x, &y) in a.iter().zip(rec.iter()) {
            approx::assert_abs_diff_eq!(x, y, epsilon = 1e-10);
        }
    }

    #[test]
    fn eigh_rejects_non_square() {
        let a = Array2::<f64>::zeros((3, 4));
        assert!(matches!(eigh(&a), Err(MinvError::DimensionMismatch(_))));
    }

    #[test]
    fn svd_reconstructs_wide() {
        let a = array![[1.0, 2.0, 3.0, 4.0], [0.5, -1.0, 2.5, 0.0]];
        let (u, s, v) = thin_svd(&a).unwrap();
        assert_eq!(u.dim(), (2, 2));
        assert_eq!(s.len(), 2);
        assert_eq!(v.dim(), (4, 2));
        let rec = u.dot(&Array2::from_diag(&s)).dot(&v.t());
        for (&x, &y) in a.iter().zip(rec.iter()) {
            approx::assert_abs_diff_eq!(x, y, epsilon = 1e-10);
        }
    }

    #[test]
    fn svd_singular_values_descending() {
        let a = array![[3.0, 0.0], [0.0, 7.0], [0.0, 0.0]];
        let (_, s, _) = thin_svd(&a).unwrap();
        approx::assert_abs_diff_eq!(s[0], 7.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(s[1], 3.0, epsilon = 1e-12);
    }
}
