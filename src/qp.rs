//! Shortest vector in the convex hull of a set of gradients.
//!
//! Solves `min ‖G w‖²` subject to `w ≥ 0`, `Σ w = 1` with a Mehrotra
//! predictor–corrector interior-point iteration on the `m × m` Gram matrix
//! `Q = GᵀG`. `m` (the number of cached gradients) is small, so each Newton
//! system is solved with a dense Cholesky factorization of `Q + diag(z/w)`.

use ndarray::{Array1, Array2};

use crate::linalg::{chol_decompose, chol_solve, forward_solve, matrix_norm_inf, norm_inf};

const MAX_ITERATIONS: usize = 100;
const STEP_DAMPING: f64 = 0.9995;
const CENTERING_POWER: f64 = 3.0;
const TOL_COMPLEMENTARITY: f64 = 1e-5;
const TOL_RESIDUAL: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QpStatus {
    Converged,
    MaxIterations,
    /// The Newton matrix stopped being numerically positive definite; the
    /// last interior iterate was used.
    CholeskyFailed,
}

/// Result of [`min_norm_in_hull`].
#[derive(Debug, Clone)]
pub struct HullPoint {
    /// Convex-combination weights, one per column.
    pub weights: Array1<f64>,
    /// `G · weights`.
    pub vector: Array1<f64>,
    /// `‖vector‖²`.
    pub squared_norm: f64,
    pub status: QpStatus,
    pub iterations: usize,
}

/// Finds the minimum-norm point of the convex hull of the columns of `g`.
///
/// A single column is returned as is. An empty matrix gives empty weights
/// and the zero vector.
pub fn min_norm_in_hull(g: &Array2<f64>) -> HullPoint {
    let m = g.ncols();
    if m <= 1 {
        let weights = Array1::from_elem(m, 1.0);
        let vector = g.dot(&weights);
        return HullPoint {
            squared_norm: vector.dot(&vector),
            weights,
            vector,
            status: QpStatus::Converged,
            iterations: 0,
        };
    }

    let q = g.t().dot(g);
    let e = Array1::<f64>::ones(m);
    let mut x = Array1::from_elem(m, 1.0 / m as f64);
    let mut z = x.clone();
    let mut y = 0.0;

    let mu0 = x.dot(&z) / m as f64;
    let kmu = TOL_COMPLEMENTARITY * mu0;
    let krs = TOL_RESIDUAL * (matrix_norm_inf(&q) + 2.0);

    let mut status = QpStatus::MaxIterations;
    let mut iterations = 0;
    for k in 0..MAX_ITERATIONS {
        iterations = k;
        let r1 = -q.dot(&x) + y + &z;
        let r2 = x.sum() - 1.0;
        let r3 = -(&x * &z);
        let rs = norm_inf(r1.view()).max(r2.abs());
        let mu = -r3.sum() / m as f64;
        if mu < kmu && rs < krs {
            status = QpStatus::Converged;
            break;
        }

        let mut qd = q.clone();
        for i in 0..m {
            qd[[i, i]] += z[i] / x[i];
        }
        let l = match chol_decompose(&qd) {
            Some(l) => l,
            None => {
                log::debug!("[QP] Newton matrix not positive definite at iteration {k}.");
                status = QpStatus::CholeskyFailed;
                break;
            }
        };
        let kt = forward_solve(&l, &e);
        let big_m = kt.dot(&kt);

        // Predictor.
        let pred = newton_step(&l, &kt, big_m, &x, &z, &r1, r2, &r3);
        let ap = step_to_boundary(&x, &pred.dx);
        let ad = step_to_boundary(&z, &pred.dz);
        let mun = (&x + &(&pred.dx * ap)).dot(&(&z + &(&pred.dz * ad))) / m as f64;
        let sigma = (mun / mu).powf(CENTERING_POWER);

        // Corrector.
        let r3c = &r3 + sigma * mu - &(&pred.dx * &pred.dz);
        let corr = newton_step(&l, &kt, big_m, &x, &z, &r1, r2, &r3c);
        let ap = step_to_boundary(&x, &corr.dx);
        let ad = step_to_boundary(&z, &corr.dz);
        x.scaled_add(STEP_DAMPING * ap, &corr.dx);
        z.scaled_add(STEP_DAMPING * ad, &corr.dz);
        y += STEP_DAMPING * ad * corr.dy;
        iterations = k + 1;
    }
    if status == QpStatus::MaxIterations {
        log::debug!("[QP] Interior point stopped after {MAX_ITERATIONS} iterations.");
    }

    x.mapv_inplace(|v| v.max(0.0));
    let total = x.sum();
    if total > 0.0 && total.is_finite() {
        x /= total;
    } else {
        x.fill(1.0 / m as f64);
    }
    let vector = g.dot(&x);
    HullPoint {
        squared_norm: vector.dot(&vector),
        weights: x,
        vector,
        status,
        iterations,
    }
}

struct NewtonDirection {
    dx: Array1<f64>,
    dy: f64,
    dz: Array1<f64>,
}

/// Solves the reduced KKT system given the Cholesky factor `L` of
/// `Q + diag(z/x)` and `kt = L⁻¹e`.
#[allow(clippy::too_many_arguments)]
fn newton_step(
    l: &Array2<f64>,
    kt: &Array1<f64>,
    big_m: f64,
    x: &Array1<f64>,
    z: &Array1<f64>,
    r1: &Array1<f64>,
    r2: f64,
    r3: &Array1<f64>,
) -> NewtonDirection {
    let r4 = r1 + &(r3 / x);
    let r5 = kt.dot(&forward_solve(l, &r4));
    let dy = -(r2 + r5) / big_m;
    let r7 = &r4 + dy;
    let dx = chol_solve(l, &r7);
    let dz = (r3 - &(z * &dx)) / x;
    NewtonDirection { dx, dy, dz }
}

/// Largest step in `(0, 1]` keeping `v + a·dv` nonnegative.
fn step_to_boundary(v: &Array1<f64>, dv: &Array1<f64>) -> f64 {
    v.iter()
        .zip(dv.iter())
        .map(|(&vi, &di)| -vi / di)
        .filter(|&a| a > 0.0)
        .fold(1.0, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::norm2;
    use ndarray::array;
    use spectral::prelude::*;

    fn check_simplex(w: &Array1<f64>) {
        assert!(w.iter().all(|&v| v >= 0.0));
        assert_that!(&w.sum()).is_close_to(1.0, 1e-12);
    }

    #[test]
    fn single_column_is_returned_unchanged() {
        let g = array![[3.0], [-4.0]];
        let hp = min_norm_in_hull(&g);
        assert_eq!(hp.weights, array![1.0]);
        assert_eq!(hp.vector, array![3.0, -4.0]);
        assert_that!(&hp.squared_norm).is_close_to(25.0, 1e-15);
    }

    #[test]
    fn opposite_gradients_contain_origin() {
        let g = array![[1.0, -1.0], [1.0, -1.0]];
        let hp = min_norm_in_hull(&g);
        check_simplex(&hp.weights);
        assert_that!(&norm2(hp.vector.view())).is_less_than(1e-2);
        assert_that!(&hp.weights[0]).is_close_to(0.5, 1e-2);
    }

    #[test]
    fn unit_vectors_meet_at_midpoint() {
        let g = array![[1.0, 0.0], [0.0, 1.0]];
        let hp = min_norm_in_hull(&g);
        assert_eq!(hp.status, QpStatus::Converged);
        check_simplex(&hp.weights);
        assert_that!(&hp.vector[0]).is_close_to(0.5, 1e-3);
        assert_that!(&hp.vector[1]).is_close_to(0.5, 1e-3);
    }

    #[test]
    fn result_is_no_longer_than_any_column() {
        let g = array![
            [1.0, 2.0, 0.5, -0.3],
            [0.0, 1.0, 2.0, 1.5],
            [0.2, 0.1, -0.4, 0.9]
        ];
        let hp = min_norm_in_hull(&g);
        check_simplex(&hp.weights);
        let d = norm2(hp.vector.view());
        for col in g.columns() {
            assert_that!(&d).is_less_than_or_equal_to(norm2(col) + 1e-6);
        }
        let reconstructed = g.dot(&hp.weights);
        assert_that!(&norm_inf((&reconstructed - &hp.vector).view())).is_less_than(1e-15);
    }

    #[test]
    fn vertex_solution_is_found() {
        // The shortest point of the segment [(1,0), (2,1)] is its first end.
        let g = array![[1.0, 2.0], [0.0, 1.0]];
        let hp = min_norm_in_hull(&g);
        check_simplex(&hp.weights);
        assert_that!(&hp.weights[0]).is_close_to(1.0, 1e-4);
        assert_that!(&norm2(hp.vector.view())).is_close_to(1.0, 1e-4);
    }

    #[test]
    fn repeated_columns_do_not_break_the_solver() {
        let g = array![[1.0, 1.0, 1.0], [2.0, 2.0, 2.0]];
        let hp = min_norm_in_hull(&g);
        check_simplex(&hp.weights);
        assert_that!(&hp.vector[0]).is_close_to(1.0, 1e-9);
        assert_that!(&hp.vector[1]).is_close_to(2.0, 1e-9);
    }
}
