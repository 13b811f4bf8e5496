//! Inverse Hessian approximations: a dense matrix updated by the rank-two
//! BFGS formula, or an implicit limited-memory form applied through the
//! two-loop recursion (Nocedal & Wright, Alg. 7.4).

use std::collections::VecDeque;

use ndarray::{Array1, Array2};

use crate::linalg::outer;

/// What happened to the approximation on an update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Applied,
    /// Applied, but `ρ²·yᵀHy + ρ` was negative and the `ssᵀ` term was
    /// clamped to zero because `H` is no longer numerically PSD.
    Clamped,
    /// `sᵀy ≤ 0` (or NaN); the approximation was left untouched.
    Skipped,
}

/// Bounded history of step / gradient-difference pairs, oldest first.
#[derive(Debug, Clone)]
pub struct LimitedMemory {
    h0: Array2<f64>,
    base: Array2<f64>,
    s: VecDeque<Array1<f64>>,
    y: VecDeque<Array1<f64>>,
    cap: usize,
}

impl LimitedMemory {
    pub fn new(h0: Array2<f64>, cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            base: h0.clone(),
            h0,
            s: VecDeque::with_capacity(cap),
            y: VecDeque::with_capacity(cap),
            cap,
        }
    }

    fn push(&mut self, s: Array1<f64>, y: Array1<f64>) {
        if self.s.len() == self.cap {
            self.s.pop_front();
            self.y.pop_front();
        }
        self.s.push_back(s);
        self.y.push_back(y);
    }

    /// Number of stored pairs.
    pub fn len(&self) -> usize {
        self.s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.s.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Base matrix seeding the recursion (`H0`, possibly rescaled).
    pub fn base(&self) -> &Array2<f64> {
        &self.base
    }

    pub fn steps(&self) -> impl Iterator<Item = &Array1<f64>> {
        self.s.iter()
    }

    pub fn gradient_differences(&self) -> impl Iterator<Item = &Array1<f64>> {
        self.y.iter()
    }
}

/// The inverse Hessian approximation `H` carried by a BFGS run.
#[derive(Debug, Clone)]
pub enum InverseHessian {
    Full(Array2<f64>),
    Limited(LimitedMemory),
}

impl InverseHessian {
    /// `memory == 0` selects the dense form; otherwise up to `memory` pairs
    /// are retained.
    pub fn new(h0: Array2<f64>, memory: usize) -> Self {
        if memory == 0 {
            InverseHessian::Full(h0)
        } else {
            InverseHessian::Limited(LimitedMemory::new(h0, memory))
        }
    }

    /// Computes `H·v`.
    pub fn apply(&self, v: &Array1<f64>) -> Array1<f64> {
        match self {
            InverseHessian::Full(h) => h.dot(v),
            InverseHessian::Limited(lm) => two_loop_product(&lm.base, &lm.s, &lm.y, v),
        }
    }

    /// Quasi-Newton search direction `p = -H·g`.
    pub fn direction(&self, g: &Array1<f64>) -> Array1<f64> {
        -self.apply(g)
    }

    /// Folds the pair `(s, y)` into the approximation.
    ///
    /// With `scale`, the dense form is multiplied by `sᵀy / yᵀy` before the
    /// first update only (`first_iteration`), and the limited-memory base is
    /// reset to `(sᵀy / yᵀy)·H0` on every update.
    pub fn update(
        &mut self,
        s: Array1<f64>,
        y: Array1<f64>,
        first_iteration: bool,
        scale: bool,
    ) -> UpdateStatus {
        let sty = s.dot(&y);
        if !(sty > 0.0) || !sty.is_finite() {
            return UpdateStatus::Skipped;
        }
        match self {
            InverseHessian::Full(h) => {
                if first_iteration && scale {
                    *h *= sty / y.dot(&y);
                }
                bfgs_inverse_update(h, &s, &y)
            }
            InverseHessian::Limited(lm) => {
                if scale {
                    lm.base = &lm.h0 * (sty / y.dot(&y));
                }
                lm.push(s, y);
                UpdateStatus::Applied
            }
        }
    }

    pub fn as_dense(&self) -> Option<&Array2<f64>> {
        match self {
            InverseHessian::Full(h) => Some(h),
            InverseHessian::Limited(_) => None,
        }
    }

    pub fn as_limited(&self) -> Option<&LimitedMemory> {
        match self {
            InverseHessian::Full(_) => None,
            InverseHessian::Limited(lm) => Some(lm),
        }
    }
}

/// Rank-two BFGS update of the dense inverse Hessian, in place.
///
/// Writing `M = I - ρ s yᵀ`, the update `H ← M H Mᵀ + ρ s sᵀ` expands to
/// `H - ρ(Hy sᵀ + s (Hy)ᵀ) + (ρ² yᵀHy + ρ) s sᵀ`. The last term is formed as
/// an outer product of a scaled `s` with itself so that the result is
/// exactly symmetric. The coefficient is clamped at zero, which departs from
/// the textbook formula only when `H` has lost positive semidefiniteness to
/// rounding; the secant equation `H y = s` then no longer holds.
///
/// Requires `sᵀy > 0`.
pub fn bfgs_inverse_update(h: &mut Array2<f64>, s: &Array1<f64>, y: &Array1<f64>) -> UpdateStatus {
    let rho = 1.0 / s.dot(y);
    let hy = h.dot(y);
    let rho_hy_st = outer(hy.view(), s.view()) * rho;
    let yhy = y.dot(&hy);
    let raw = rho * rho * yhy + rho;
    let status = if raw < 0.0 {
        log::warn!(
            "[BFGS] Inverse Hessian not numerically PSD (yᵀHy = {:.3e}); clamping ssᵀ term.",
            yhy
        );
        UpdateStatus::Clamped
    } else {
        UpdateStatus::Applied
    };
    let s_scaled = s * raw.max(0.0).sqrt();
    *h -= &rho_hy_st.t();
    *h -= &rho_hy_st;
    *h += &outer(s_scaled.view(), s_scaled.view());
    status
}

/// Two-loop recursion computing `H·v` for the implicit limited-memory `H`
/// built from `base` and the pairs `(s_i, y_i)`, oldest first.
pub fn two_loop_product(
    base: &Array2<f64>,
    s: &VecDeque<Array1<f64>>,
    y: &VecDeque<Array1<f64>>,
    v: &Array1<f64>,
) -> Array1<f64> {
    let m = s.len();
    let mut rho = vec![0.0; m];
    let mut alpha = vec![0.0; m];
    let mut q = v.clone();
    for i in (0..m).rev() {
        rho[i] = 1.0 / s[i].dot(&y[i]);
        alpha[i] = rho[i] * s[i].dot(&q);
        q.scaled_add(-alpha[i], &y[i]);
    }
    let mut r = base.dot(&q);
    for i in 0..m {
        let beta = rho[i] * y[i].dot(&r);
        r.scaled_add(alpha[i] - beta, &s[i]);
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{asymmetry, norm_inf};
    use ndarray::array;
    use spectral::prelude::*;

    fn spd3() -> Array2<f64> {
        array![[2.0, 0.3, 0.1], [0.3, 1.5, -0.2], [0.1, -0.2, 1.0]]
    }

    #[test]
    fn full_update_is_symmetric_and_satisfies_secant() {
        let mut h = spd3();
        let s = array![0.5, -1.0, 0.25];
        let y = array![1.0, -0.7, 0.4];
        assert_that!(&s.dot(&y)).is_greater_than(0.0);
        let status = bfgs_inverse_update(&mut h, &s, &y);
        assert_eq!(status, UpdateStatus::Applied);
        assert_that!(&asymmetry(&h)).is_less_than(1e-14);
        let residual = &h.dot(&y) - &s;
        assert_that!(&norm_inf(residual.view())).is_less_than(1e-12);
    }

    #[test]
    fn full_update_stays_symmetric_over_many_steps() {
        let mut hess = InverseHessian::new(Array2::eye(3), 0);
        let a = array![[3.0, 1.0, 0.0], [1.0, 2.0, 0.5], [0.0, 0.5, 1.0]];
        for k in 0..20 {
            let t = k as f64;
            let s = array![t.sin() + 0.1, (1.3 * t).cos(), 0.2 + 0.1 * t.sin()];
            let y = a.dot(&s);
            hess.update(s, y, k == 0, true);
        }
        let h = hess.as_dense().unwrap();
        assert_that!(&asymmetry(h)).is_less_than(1e-12);
    }

    #[test]
    fn negative_curvature_pair_is_skipped() {
        let mut hess = InverseHessian::new(Array2::eye(2), 0);
        let status = hess.update(array![1.0, 0.0], array![-1.0, 0.0], true, true);
        assert_eq!(status, UpdateStatus::Skipped);
        assert_eq!(hess.as_dense().unwrap(), &Array2::<f64>::eye(2));
    }

    #[test]
    fn first_update_rescales_before_applying() {
        let mut hess = InverseHessian::new(Array2::eye(2), 0);
        let s = array![1.0, 0.0];
        let y = array![4.0, 0.0];
        hess.update(s.clone(), y.clone(), true, true);
        let h = hess.as_dense().unwrap();
        // Secant along s, and the untouched direction carries the sᵀy/yᵀy scale.
        assert_that!(&h[[0, 0]]).is_close_to(0.25, 1e-14);
        assert_that!(&h[[1, 1]]).is_close_to(0.25, 1e-14);
    }

    #[test]
    fn clamp_activates_on_indefinite_matrix() {
        let mut h = array![[-5.0, 0.0], [0.0, 1.0]];
        let s = array![1.0, 0.0];
        let y = array![1.0, 0.0];
        let status = bfgs_inverse_update(&mut h, &s, &y);
        assert_eq!(status, UpdateStatus::Clamped);
        assert_that!(&asymmetry(&h)).is_less_than(1e-15);
    }

    #[test]
    fn two_loop_without_pairs_is_base_product() {
        let hess = InverseHessian::new(spd3(), 5);
        let g = array![1.0, 2.0, -1.0];
        let p = hess.direction(&g);
        let expected = -spd3().dot(&g);
        assert_that!(&norm_inf((&p - &expected).view())).is_less_than(1e-15);
    }

    #[test]
    fn two_loop_matches_dense_bfgs_without_scaling() {
        let mut dense = InverseHessian::new(Array2::eye(3), 0);
        let mut limited = InverseHessian::new(Array2::eye(3), 10);
        let a = array![[4.0, 1.0, 0.0], [1.0, 3.0, 0.5], [0.0, 0.5, 2.0]];
        let steps = [
            array![1.0, 0.0, 0.0],
            array![0.0, 1.0, 0.5],
            array![0.3, -0.2, 1.0],
        ];
        for (k, s) in steps.iter().enumerate() {
            let y = a.dot(s);
            dense.update(s.clone(), y.clone(), k == 0, false);
            limited.update(s.clone(), y, k == 0, false);
        }
        let g = array![0.7, -1.1, 0.4];
        let diff = &dense.direction(&g) - &limited.direction(&g);
        assert_that!(&norm_inf(diff.view())).is_less_than(1e-12);
    }

    #[test]
    fn limited_memory_evicts_oldest_pair() {
        let mut hess = InverseHessian::new(Array2::eye(2), 2);
        for k in 1..=3 {
            let s = array![k as f64, 0.0];
            let y = array![2.0 * k as f64, 0.0];
            hess.update(s, y, k == 1, true);
        }
        let lm = hess.as_limited().unwrap();
        assert_eq!(lm.len(), 2);
        let firsts: Vec<f64> = lm.steps().map(|s| s[0]).collect();
        assert_eq!(firsts, vec![2.0, 3.0]);
        // base = (sᵀy / yᵀy)·I = 0.5·I
        assert_that!(&lm.base()[[1, 1]]).is_close_to(0.5, 1e-15);
    }
}
