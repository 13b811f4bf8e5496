//! Inexact line searches returning a step that satisfies the weak or strong
//! Wolfe conditions, or a typed report of why none was found.
//!
//! The weak Wolfe search is the bisection/doubling scheme of Lewis & Overton,
//! which is the recommended choice for nonsmooth objectives: it never relies
//! on interpolation, so kinks along the ray do not derail it. The strong
//! Wolfe search follows Nocedal & Wright (Alg. 3.5 and 3.6).

use ndarray::Array1;

use crate::linalg::norm2;
use crate::objective::Objective;

/// Why a line search returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LineSearchStatus {
    /// Both Wolfe conditions hold, or the target value was reached.
    Satisfied,
    /// A minimizer was bracketed but the Wolfe conditions were never met
    /// inside the bisection budget.
    Bracketed,
    /// No upper bracket was found; `f` may be unbounded below along the ray.
    Unbounded,
}

impl LineSearchStatus {
    /// Numeric fail flag: `0`, `1` or `-1`.
    pub fn code(self) -> i8 {
        match self {
            LineSearchStatus::Satisfied => 0,
            LineSearchStatus::Bracketed => 1,
            LineSearchStatus::Unbounded => -1,
        }
    }
}

/// Which built-in line search a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LineSearchKind {
    #[default]
    WeakWolfe,
    StrongWolfe,
}

/// The accepted (or best available) step and the function values seen.
#[derive(Debug, Clone)]
pub struct LineSearchOutcome {
    pub alpha: f64,
    pub x: Array1<f64>,
    pub f: f64,
    pub g: Array1<f64>,
    pub status: LineSearchStatus,
    /// Every function value evaluated during the search, in order.
    pub trace: Vec<f64>,
}

/// A step-length procedure along a descent direction.
pub trait LineSearch {
    /// Searches along `p` from `x` (where `f(x) = f` and `∇f(x) = g`).
    ///
    /// `wolfe1` and `wolfe2` are the sufficient-decrease and curvature
    /// constants. The search stops early once a value below `fvalquit` is
    /// seen.
    #[allow(clippy::too_many_arguments)]
    fn search<O: Objective + ?Sized>(
        &self,
        objective: &mut O,
        x: &Array1<f64>,
        f: f64,
        g: &Array1<f64>,
        p: &Array1<f64>,
        wolfe1: f64,
        wolfe2: f64,
        fvalquit: f64,
    ) -> LineSearchOutcome;
}

// One evaluated point on the ray (internal only)
#[derive(Clone)]
struct Trial {
    alpha: f64,
    x: Array1<f64>,
    f: f64,
    g: Array1<f64>,
    gtp: f64,
}

impl Trial {
    fn evaluate<O: Objective + ?Sized>(
        objective: &mut O,
        x0: &Array1<f64>,
        p: &Array1<f64>,
        alpha: f64,
        trace: &mut Vec<f64>,
    ) -> Self {
        let mut x = x0.clone();
        x.scaled_add(alpha, p);
        let f = objective.value(&x);
        let g = objective.gradient(&x);
        let gtp = g.dot(p);
        trace.push(f);
        Self {
            alpha,
            x,
            f,
            g,
            gtp,
        }
    }

    fn into_outcome(self, status: LineSearchStatus, trace: Vec<f64>) -> LineSearchOutcome {
        LineSearchOutcome {
            alpha: self.alpha,
            x: self.x,
            f: self.f,
            g: self.g,
            status,
            trace,
        }
    }
}

fn budget(v: f64, floor: usize) -> usize {
    if v.is_finite() {
        v.round().max(floor as f64) as usize
    } else {
        floor
    }
}

/// Weak Wolfe search by doubling and bisection.
///
/// The unit step is always tried first. A trial that violates sufficient
/// decrease becomes the upper bracket; one that violates the curvature
/// condition becomes the lower bracket. Once an upper bracket exists the
/// next trial bisects, otherwise the lower end is doubled.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeakWolfe;

impl LineSearch for WeakWolfe {
    fn search<O: Objective + ?Sized>(
        &self,
        objective: &mut O,
        x: &Array1<f64>,
        f: f64,
        g: &Array1<f64>,
        p: &Array1<f64>,
        wolfe1: f64,
        wolfe2: f64,
        fvalquit: f64,
    ) -> LineSearchOutcome {
        let g0p = g.dot(p);
        let pnorm = norm2(p.view());
        let max_bisect = budget((1e5 * pnorm).log2(), 30);
        let max_expand = budget((1e5 / pnorm).log2(), 10);

        let mut trace = Vec::new();
        let mut lo = Trial {
            alpha: 0.0,
            x: x.clone(),
            f,
            g: g.clone(),
            gtp: g0p,
        };
        let mut beta = f64::INFINITY;
        let mut t = 1.0;
        let mut nbisect = 0usize;
        let mut nexpand = 0usize;
        loop {
            let trial = Trial::evaluate(objective, x, p, t, &mut trace);
            if trial.f < fvalquit {
                return trial.into_outcome(LineSearchStatus::Satisfied, trace);
            }
            // Sufficient decrease is tested first; note the >=.
            if trial.f >= f + wolfe1 * t * g0p || trial.f.is_nan() {
                beta = t;
            } else if trial.gtp <= wolfe2 * g0p || trial.gtp.is_nan() {
                lo = trial;
            } else {
                return trial.into_outcome(LineSearchStatus::Satisfied, trace);
            }

            if beta.is_finite() {
                if nbisect >= max_bisect {
                    break;
                }
                nbisect += 1;
                t = 0.5 * (lo.alpha + beta);
            } else {
                if nexpand >= max_expand {
                    break;
                }
                nexpand += 1;
                t = 2.0 * lo.alpha;
            }
        }

        let status = if beta.is_finite() {
            log::debug!(
                "[LineSearch] Weak Wolfe: minimizer bracketed in [{:.3e}, {:.3e}] but conditions not met after {} bisections.",
                lo.alpha,
                beta,
                nbisect
            );
            LineSearchStatus::Bracketed
        } else {
            log::debug!(
                "[LineSearch] Weak Wolfe: no bracket after {} expansions (alpha = {:.3e}, f = {:.6e}).",
                nexpand,
                lo.alpha,
                lo.f
            );
            LineSearchStatus::Unbounded
        };
        lo.into_outcome(status, trace)
    }
}

/// Strong Wolfe search: expansion until a bracket is found, then zoom with
/// safeguarded cubic interpolation.
///
/// With `wolfe2 == 0` the search simulates an exact line search, and the
/// returned step is pushed slightly forward (by `1e-8·(1 + α)`) so that the
/// new point lands on the far side of a kink rather than exactly on it.
#[derive(Debug, Clone, Copy)]
pub struct StrongWolfe {
    pub max_expansions: usize,
    pub max_zoom: usize,
}

impl Default for StrongWolfe {
    fn default() -> Self {
        Self {
            max_expansions: 30,
            max_zoom: 30,
        }
    }
}

impl LineSearch for StrongWolfe {
    fn search<O: Objective + ?Sized>(
        &self,
        objective: &mut O,
        x: &Array1<f64>,
        f: f64,
        g: &Array1<f64>,
        p: &Array1<f64>,
        wolfe1: f64,
        wolfe2: f64,
        fvalquit: f64,
    ) -> LineSearchOutcome {
        let mut out = self.bracket_and_zoom(objective, x, f, g, p, wolfe1, wolfe2, fvalquit);
        if wolfe2 == 0.0 && out.alpha > 0.0 && out.f >= fvalquit {
            let increase = 1e-8 * (1.0 + out.alpha);
            log::debug!(
                "[LineSearch] Exact line search simulation: increasing step from {:.6e} to {:.6e}.",
                out.alpha,
                out.alpha + increase
            );
            out.x.scaled_add(increase, p);
            out.alpha += increase;
            out.f = objective.value(&out.x);
            out.g = objective.gradient(&out.x);
            out.trace.push(out.f);
        }
        out
    }
}

impl StrongWolfe {
    #[allow(clippy::too_many_arguments)]
    fn bracket_and_zoom<O: Objective + ?Sized>(
        &self,
        objective: &mut O,
        x: &Array1<f64>,
        f: f64,
        g: &Array1<f64>,
        p: &Array1<f64>,
        c1: f64,
        c2: f64,
        fvalquit: f64,
    ) -> LineSearchOutcome {
        let g0p = g.dot(p);
        let mut trace = Vec::new();
        let mut prev = Trial {
            alpha: 0.0,
            x: x.clone(),
            f,
            g: g.clone(),
            gtp: g0p,
        };
        let mut alpha_i: f64 = 1.0; // Per Nocedal & Wright, always start with a unit step.
        for i in 0..self.max_expansions {
            let trial = Trial::evaluate(objective, x, p, alpha_i, &mut trace);
            if trial.f < fvalquit {
                return trial.into_outcome(LineSearchStatus::Satisfied, trace);
            }
            let armijo_fails = !trial.f.is_finite() || trial.f > f + c1 * alpha_i * g0p;
            if armijo_fails || (i > 0 && trial.f >= prev.f) {
                return self.zoom(objective, x, f, p, g0p, c1, c2, fvalquit, prev, trial, trace);
            }
            if trial.gtp.abs() <= -c2 * g0p {
                return trial.into_outcome(LineSearchStatus::Satisfied, trace);
            }
            if trial.gtp >= 0.0 {
                return self.zoom(objective, x, f, p, g0p, c1, c2, fvalquit, trial, prev, trace);
            }
            prev = trial;
            alpha_i *= 2.0;
        }
        log::debug!(
            "[LineSearch] Strong Wolfe: no bracket after {} expansions (alpha = {:.3e}).",
            self.max_expansions,
            prev.alpha
        );
        prev.into_outcome(LineSearchStatus::Unbounded, trace)
    }

    /// Narrows `[lo, hi]`, where `lo` satisfies sufficient decrease and has
    /// the lowest value seen, until a strong Wolfe point is found.
    #[allow(clippy::too_many_arguments)]
    fn zoom<O: Objective + ?Sized>(
        &self,
        objective: &mut O,
        x: &Array1<f64>,
        f: f64,
        p: &Array1<f64>,
        g0p: f64,
        c1: f64,
        c2: f64,
        fvalquit: f64,
        mut lo: Trial,
        mut hi: Trial,
        mut trace: Vec<f64>,
    ) -> LineSearchOutcome {
        let min_alpha_step = 1e-12; // Prevents division by zero or degenerate steps.
        for _ in 0..self.max_zoom {
            if (hi.alpha - lo.alpha).abs() < min_alpha_step {
                break;
            }
            let alpha_j = interpolate(&lo, &hi);
            let trial = Trial::evaluate(objective, x, p, alpha_j, &mut trace);
            if trial.f < fvalquit {
                return trial.into_outcome(LineSearchStatus::Satisfied, trace);
            }
            if !trial.f.is_finite() || trial.f > f + c1 * alpha_j * g0p || trial.f >= lo.f {
                hi = trial;
            } else {
                if trial.gtp.abs() <= -c2 * g0p {
                    return trial.into_outcome(LineSearchStatus::Satisfied, trace);
                }
                if trial.gtp * (hi.alpha - lo.alpha) >= 0.0 {
                    hi = lo;
                }
                lo = trial;
            }
        }
        log::debug!(
            "[LineSearch] Strong Wolfe: zoom exhausted in [{:.3e}, {:.3e}].",
            lo.alpha.min(hi.alpha),
            lo.alpha.max(hi.alpha)
        );
        lo.into_outcome(LineSearchStatus::Bracketed, trace)
    }
}

/// Cubic interpolation inside the bracket, falling back to bisection when
/// the model is unusable or its minimizer lies too close to either end.
fn interpolate(lo: &Trial, hi: &Trial) -> f64 {
    let (a, b) = if lo.alpha <= hi.alpha { (lo, hi) } else { (hi, lo) };
    let mid = 0.5 * (a.alpha + b.alpha);
    let width = b.alpha - a.alpha;
    let usable = [a.f, b.f, a.gtp, b.gtp].iter().all(|v| v.is_finite());
    if width <= 0.0 || !usable {
        return mid;
    }
    let d1 = a.gtp + b.gtp - 3.0 * (b.f - a.f) / width;
    let d2_sq = d1 * d1 - a.gtp * b.gtp;
    if !(d2_sq >= 0.0) || !d2_sq.is_finite() {
        return mid;
    }
    let d2 = d2_sq.sqrt();
    let trial = b.alpha - width * (b.gtp + d2 - d1) / (b.gtp - a.gtp + 2.0 * d2);
    // Stay at least a tenth of the bracket away from either end.
    let guard = 0.1 * width;
    if !trial.is_finite() || trial < a.alpha + guard || trial > b.alpha - guard {
        mid
    } else {
        trial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::FnObjective;
    use ndarray::array;
    use spectral::prelude::*;

    fn sign(v: f64) -> f64 {
        if v > 0.0 {
            1.0
        } else if v < 0.0 {
            -1.0
        } else {
            0.0
        }
    }

    fn quadratic() -> impl Objective {
        FnObjective::new(|x: &Array1<f64>| x.dot(x), |x: &Array1<f64>| 2.0 * x)
    }

    fn l1() -> impl Objective {
        FnObjective::new(
            |x: &Array1<f64>| x.iter().map(|v| v.abs()).sum(),
            |x: &Array1<f64>| x.mapv(sign),
        )
    }

    #[test]
    fn weak_wolfe_bisects_overshooting_unit_step() {
        let mut obj = quadratic();
        let x = array![3.0, -4.0];
        let (f, g) = obj.evaluate(&x);
        let p = -&g;
        let out = WeakWolfe.search(&mut obj, &x, f, &g, &p, 0.0, 0.5, f64::NEG_INFINITY);
        assert_eq!(out.status, LineSearchStatus::Satisfied);
        assert_that!(&out.alpha).is_close_to(0.5, 1e-15);
        assert_that!(&out.f).is_close_to(0.0, 1e-15);
        assert_eq!(out.trace.len(), 2);
    }

    #[test]
    fn weak_wolfe_expands_short_steps_on_l1() {
        let mut obj = l1();
        let x = array![3.0, -4.0];
        let (f, g) = obj.evaluate(&x);
        let p = -&g;
        let out = WeakWolfe.search(&mut obj, &x, f, &g, &p, 0.0, 0.5, f64::NEG_INFINITY);
        assert_eq!(out.status, LineSearchStatus::Satisfied);
        assert_that!(&out.alpha).is_close_to(4.0, 1e-15);
        assert_that!(&out.f).is_less_than(f);
        assert_eq!(out.trace, vec![5.0, 3.0, 1.0]);
    }

    #[test]
    fn weak_wolfe_reports_unbounded_linear_function() {
        let mut obj = FnObjective::new(|x: &Array1<f64>| -x[0], |_: &Array1<f64>| array![-1.0]);
        let x = array![0.0];
        let (f, g) = obj.evaluate(&x);
        let p = array![1.0];
        let out = WeakWolfe.search(&mut obj, &x, f, &g, &p, 1e-4, 0.5, f64::NEG_INFINITY);
        assert_eq!(out.status, LineSearchStatus::Unbounded);
        assert_eq!(out.status.code(), -1);
        assert_that!(&out.alpha).is_greater_than(1.0);
    }

    #[test]
    fn weak_wolfe_stops_below_target_value() {
        let mut obj = quadratic();
        let x = array![3.0, -4.0];
        let (f, g) = obj.evaluate(&x);
        let p = -&g * 0.1;
        let out = WeakWolfe.search(&mut obj, &x, f, &g, &p, 0.0, 0.5, 20.0);
        assert_eq!(out.status, LineSearchStatus::Satisfied);
        assert_that!(&out.f).is_less_than(20.0);
        assert_eq!(out.trace.len(), 1);
    }

    #[test]
    fn weak_wolfe_bracketed_failure_on_step_discontinuity() {
        // f jumps up just past the origin of the ray, so no step decreases f
        // and the derivative test can never pass.
        let mut obj = FnObjective::new(
            |x: &Array1<f64>| if x[0] > 0.0 { 1.0 } else { -x[0] },
            |x: &Array1<f64>| if x[0] > 0.0 { array![0.0] } else { array![-1.0] },
        );
        let x = array![-1e-30];
        let (f, g) = obj.evaluate(&x);
        let p = array![1.0];
        let out = WeakWolfe.search(&mut obj, &x, f, &g, &p, 0.0, 0.5, f64::NEG_INFINITY);
        assert_eq!(out.status, LineSearchStatus::Bracketed);
        assert_eq!(out.status.code(), 1);
        assert_that!(&out.alpha).is_equal_to(0.0);
        assert_eq!(out.x, x);
    }

    #[test]
    fn strong_wolfe_finds_curvature_point_on_quadratic() {
        let mut obj = quadratic();
        let x = array![1.0, 2.0];
        let (f, g) = obj.evaluate(&x);
        let p = -&g * 0.1;
        let out =
            StrongWolfe::default().search(&mut obj, &x, f, &g, &p, 1e-4, 0.1, f64::NEG_INFINITY);
        assert_eq!(out.status, LineSearchStatus::Satisfied);
        let gtp = out.g.dot(&p);
        assert_that!(&gtp.abs()).is_less_than_or_equal_to(0.1 * g.dot(&p).abs());
        assert_that!(&out.f).is_less_than(f);
    }

    #[test]
    fn strong_wolfe_exact_simulation_steps_past_kink() {
        let mut obj = l1();
        let x = array![1.0];
        let (f, g) = obj.evaluate(&x);
        let p = array![-0.75];
        let out =
            StrongWolfe::default().search(&mut obj, &x, f, &g, &p, 0.0, 0.0, f64::NEG_INFINITY);
        // The accepted step is nudged forward and f, g are re-evaluated there.
        assert_that!(&out.alpha).is_greater_than(0.0);
        assert_eq!(out.trace.last().copied(), Some(out.f));
        assert_that!(&out.f).is_less_than(f);
    }
}
