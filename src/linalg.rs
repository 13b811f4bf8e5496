//! Small dense linear-algebra helpers shared by the Hessian updates and the
//! convex-hull QP.

use ndarray::{Array1, Array2, ArrayView1};

/// Euclidean norm of a vector.
#[inline]
pub fn norm2(v: ArrayView1<'_, f64>) -> f64 {
    v.dot(&v).sqrt()
}

/// Largest absolute entry of a vector.
#[inline]
pub fn norm_inf(v: ArrayView1<'_, f64>) -> f64 {
    v.iter().fold(0.0, |acc, &x| f64::max(acc, x.abs()))
}

/// Infinity norm (max absolute row sum) of a matrix.
pub fn matrix_norm_inf(a: &Array2<f64>) -> f64 {
    a.rows()
        .into_iter()
        .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

#[inline]
pub fn all_finite(v: ArrayView1<'_, f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Outer product `a bᵀ`.
pub fn outer(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Array2<f64> {
    let col = a.insert_axis(ndarray::Axis(1));
    let row = b.insert_axis(ndarray::Axis(0));
    col.dot(&row)
}

/// Largest absolute entry of `A - Aᵀ`.
pub fn asymmetry(a: &Array2<f64>) -> f64 {
    let n = a.nrows();
    let mut worst = 0.0f64;
    for i in 0..n {
        for j in (i + 1)..n {
            worst = worst.max((a[[i, j]] - a[[j, i]]).abs());
        }
    }
    worst
}

// Simple dense SPD Cholesky (LL^T) and solve utilities
pub fn chol_decompose(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return None;
    }
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Solves `L y = b` for lower-triangular `L`.
pub fn forward_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }
    y
}

/// Solves `(L Lᵀ) x = b` given the Cholesky factor `L`.
pub fn chol_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let y = forward_solve(l, b);
    // Backward solve: L^T x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use spectral::prelude::*;

    #[test]
    fn cholesky_solves_spd_system() {
        let a = array![[4.0, 2.0, 0.4], [2.0, 5.0, 1.0], [0.4, 1.0, 3.0]];
        let b = array![1.0, -2.0, 0.5];
        let l = chol_decompose(&a).unwrap();
        let x = chol_solve(&l, &b);
        let residual = &a.dot(&x) - &b;
        assert_that!(&norm_inf(residual.view())).is_less_than(1e-12);
    }

    #[test]
    fn cholesky_rejects_indefinite_matrix() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(chol_decompose(&a).is_none());
    }

    #[test]
    fn outer_product_and_asymmetry() {
        let a = array![1.0, 2.0];
        let b = array![3.0, -1.0];
        let m = outer(a.view(), b.view());
        assert_eq!(m, array![[3.0, -1.0], [6.0, -2.0]]);
        assert_that!(&asymmetry(&m)).is_close_to(7.0, 1e-15);
        assert_that!(&matrix_norm_inf(&m)).is_close_to(8.0, 1e-15);
    }
}
