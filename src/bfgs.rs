//! A single BFGS run for (possibly) nonsmooth objectives.
//!
//! The iteration is plain BFGS with an inexact line search, but stationarity
//! is judged from the shortest vector in the convex hull of gradients cached
//! at nearby iterates rather than from the latest gradient alone. On a
//! nonsmooth function the gradient norm does not go to zero at a kink, while
//! that shortest vector does.

use std::fmt;
use std::time::{Duration, Instant};

use ndarray::{Array1, Array2, array};

use crate::cache::GradientCache;
use crate::error::HansoError;
use crate::hessian::{InverseHessian, UpdateStatus};
use crate::line_search::{
    LineSearch, LineSearchKind, LineSearchOutcome, LineSearchStatus, StrongWolfe, WeakWolfe,
};
use crate::linalg::{all_finite, norm2};
use crate::objective::{FnObjective, Objective};
use crate::qp::min_norm_in_hull;

/// Why a run stopped.
///
/// Every run ends with exactly one of these. The numeric [`code`] is stable
/// and is what callers comparing against other HANSO implementations expect.
///
/// [`code`]: Termination::code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Termination {
    /// The shortest vector in the hull of cached gradients is below `normtol`.
    OptimalityReached,
    MaxIterations,
    /// A value below `fvalquit` was found.
    TargetValueReached,
    /// `‖x‖₂` exceeded `xnormquit`.
    IterateNormExceeded,
    TimeLimitExceeded,
    /// `f` or `∇f` is not finite at the starting point.
    InvalidInitialPoint,
    /// `gᵀp ≥ 0`, which only happens once `H` has lost positive definiteness
    /// to rounding.
    NonDescentDirection,
    /// The line search bracketed a step but could not satisfy both Wolfe
    /// conditions.
    LineSearchWolfeFailure,
    /// The line search kept doubling without finding an upper bracket.
    UnboundedBelow,
}

impl Termination {
    pub fn code(self) -> u8 {
        match self {
            Termination::OptimalityReached => 0,
            Termination::MaxIterations => 1,
            Termination::TargetValueReached => 2,
            Termination::IterateNormExceeded => 3,
            Termination::TimeLimitExceeded => 4,
            Termination::InvalidInitialPoint => 5,
            Termination::NonDescentDirection => 6,
            Termination::LineSearchWolfeFailure => 7,
            Termination::UnboundedBelow => 8,
        }
    }

    /// `true` for outcomes that signal a numerical or modelling problem
    /// rather than a stopping rule chosen by the caller.
    pub fn is_hard_failure(self) -> bool {
        matches!(
            self,
            Termination::InvalidInitialPoint
                | Termination::NonDescentDirection
                | Termination::LineSearchWolfeFailure
                | Termination::UnboundedBelow
        )
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::OptimalityReached => write!(f, "optimality measure below tolerance"),
            Termination::MaxIterations => write!(f, "maximum iterations reached"),
            Termination::TargetValueReached => write!(f, "target objective value reached"),
            Termination::IterateNormExceeded => write!(f, "norm of iterate exceeded limit"),
            Termination::TimeLimitExceeded => write!(f, "time limit exceeded"),
            Termination::InvalidInitialPoint => {
                write!(f, "objective or gradient not finite at initial point")
            }
            Termination::NonDescentDirection => write!(f, "search direction is not a descent direction"),
            Termination::LineSearchWolfeFailure => {
                write!(f, "line search failed to satisfy the Wolfe conditions")
            }
            Termination::UnboundedBelow => write!(f, "objective may be unbounded below"),
        }
    }
}

/// Settings for a BFGS run.
///
/// `Default` gives the usual HANSO choices; the builder methods on [`Bfgs`]
/// and [`crate::Hanso`] edit these fields.
#[derive(Debug, Clone)]
pub struct BfgsOptions {
    pub max_iterations: usize,
    /// Number of `(s, y)` pairs kept for limited-memory BFGS. `0` selects
    /// full BFGS with a dense inverse Hessian.
    pub memory: usize,
    /// Capacity of the gradient cache. `None` means `min(100, 2n, n + 10)`.
    pub gradient_cache_size: Option<usize>,
    pub normtol: f64,
    pub fvalquit: f64,
    pub xnormquit: f64,
    /// Wall-clock budget, checked once per iteration.
    pub cpu_max: Option<Duration>,
    pub line_search: LineSearchKind,
    pub wolfe1: f64,
    pub wolfe2: f64,
    /// Stop when the line search brackets a step without satisfying the
    /// Wolfe conditions. When `false` the run logs and carries on.
    pub quit_on_line_search_failure: bool,
    /// Gradients are only kept in the cache while successive steps are no
    /// longer than this.
    pub evaldist: f64,
    /// Initial inverse Hessian. `None` means the identity.
    pub initial_hessian: Option<Array2<f64>>,
    pub scale: bool,
    pub record_history: bool,
}

impl Default for BfgsOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            memory: 0,
            gradient_cache_size: None,
            normtol: 1e-4,
            fvalquit: f64::NEG_INFINITY,
            xnormquit: f64::INFINITY,
            cpu_max: None,
            line_search: LineSearchKind::WeakWolfe,
            wolfe1: 0.0,
            wolfe2: 0.5,
            quit_on_line_search_failure: true,
            evaldist: 1e-4,
            initial_hessian: None,
            scale: true,
            record_history: false,
        }
    }
}

impl BfgsOptions {
    /// Checks the settings against a problem of dimension `n`.
    pub fn validate(&self, n: usize) -> Result<(), HansoError> {
        if n == 0 {
            return Err(HansoError::EmptyPoint);
        }
        let (w1, w2) = (self.wolfe1, self.wolfe2);
        if !(0.0..1.0).contains(&w1) || !(w1..1.0).contains(&w2) {
            return Err(HansoError::WolfeParameters {
                wolfe1: w1,
                wolfe2: w2,
            });
        }
        non_negative("normtol", self.normtol)?;
        non_negative("evaldist", self.evaldist)?;
        if self.fvalquit.is_nan() {
            return Err(HansoError::InvalidParameter {
                name: "fvalquit",
                value: self.fvalquit,
                reason: "must not be NaN",
            });
        }
        if !(self.xnormquit > 0.0) {
            return Err(HansoError::InvalidParameter {
                name: "xnormquit",
                value: self.xnormquit,
                reason: "must be positive",
            });
        }
        if self.gradient_cache_size == Some(0) {
            return Err(HansoError::InvalidParameter {
                name: "gradient_cache_size",
                value: 0.0,
                reason: "must hold at least one gradient",
            });
        }
        if let Some(h0) = &self.initial_hessian {
            let (rows, cols) = h0.dim();
            if rows != n || cols != n {
                return Err(HansoError::InitialHessianShape {
                    expected: n,
                    rows,
                    cols,
                });
            }
            if !h0.iter().all(|v| v.is_finite()) {
                return Err(HansoError::InitialHessianNotFinite);
            }
        }
        Ok(())
    }

    fn cache_capacity(&self, n: usize) -> usize {
        self.gradient_cache_size
            .unwrap_or_else(|| GradientCache::default_capacity(n))
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), HansoError> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(HansoError::InvalidParameter {
            name,
            value,
            reason: "must be non-negative",
        })
    }
}

/// Per-iteration record kept when `record_history` is set.
#[derive(Debug, Clone, Default)]
pub struct IterationHistory {
    /// Point reached by each iteration's line search.
    pub iterates: Vec<Array1<f64>>,
    /// The approximation used to compute each iteration's direction.
    pub hessians: Vec<InverseHessian>,
    /// Function values evaluated by each iteration's line search.
    pub line_search_traces: Vec<Vec<f64>>,
}

/// The state at the end of a run.
#[derive(Debug, Clone)]
pub struct BfgsSolution {
    pub final_point: Array1<f64>,
    pub final_value: f64,
    /// Shortest vector in the convex hull of the cached gradients.
    pub optimality_vector: Array1<f64>,
    /// `‖optimality_vector‖₂`.
    pub optimality_norm: f64,
    pub hessian: InverseHessian,
    /// Loop index at which the run stopped. A stop detected after the line
    /// search of loop index `it` reports `it`, so a run ending on its first
    /// step reports 0. `MaxIterations` reports `max_iterations`.
    pub iterations: usize,
    pub termination: Termination,
    pub cache: GradientCache,
    /// Convex-combination weights producing `optimality_vector` from the
    /// cached gradients.
    pub weights: Array1<f64>,
    /// Number of objective value evaluations.
    pub func_evals: usize,
    pub history: Option<IterationHistory>,
}

// Counts value evaluations on behalf of the run.
struct Counted<'a, O: ?Sized> {
    inner: &'a mut O,
    evals: usize,
}

impl<O: Objective + ?Sized> Objective for Counted<'_, O> {
    fn value(&mut self, x: &Array1<f64>) -> f64 {
        self.evals += 1;
        self.inner.value(x)
    }

    fn gradient(&mut self, x: &Array1<f64>) -> Array1<f64> {
        self.inner.gradient(x)
    }
}

struct RunState {
    x: Array1<f64>,
    f: f64,
    g: Array1<f64>,
    d: Array1<f64>,
    dnorm: f64,
    w: Array1<f64>,
    hessian: InverseHessian,
    cache: GradientCache,
    history: Option<IterationHistory>,
}

impl RunState {
    fn finish(self, iterations: usize, termination: Termination, func_evals: usize) -> BfgsSolution {
        BfgsSolution {
            final_point: self.x,
            final_value: self.f,
            optimality_vector: self.d,
            optimality_norm: self.dnorm,
            hessian: self.hessian,
            iterations,
            termination,
            cache: self.cache,
            weights: self.w,
            func_evals,
            history: self.history,
        }
    }
}

/// Runs BFGS from `x0` with an explicit line search.
///
/// `deadline` overrides `options.cpu_max` when given, so that several runs
/// can share one budget.
pub(crate) fn minimize<O, L>(
    objective: &mut O,
    x0: &Array1<f64>,
    options: &BfgsOptions,
    line_search: &L,
    deadline: Option<Instant>,
) -> Result<BfgsSolution, HansoError>
where
    O: Objective + ?Sized,
    L: LineSearch,
{
    let n = x0.len();
    options.validate(n)?;
    let deadline = deadline.or_else(|| options.cpu_max.map(|budget| Instant::now() + budget));

    let mut objective = Counted {
        inner: objective,
        evals: 0,
    };
    let (f0, g0) = objective.evaluate(x0);
    if g0.len() != n {
        return Err(HansoError::GradientDimension {
            expected: n,
            got: g0.len(),
        });
    }

    let h0 = options
        .initial_hessian
        .clone()
        .unwrap_or_else(|| Array2::eye(n));
    let mut state = RunState {
        x: x0.clone(),
        f: f0,
        d: g0.clone(),
        dnorm: norm2(g0.view()),
        w: array![1.0],
        hessian: InverseHessian::new(h0, options.memory),
        cache: GradientCache::new(options.cache_capacity(n), x0.clone(), g0.clone()),
        g: g0,
        history: options.record_history.then(IterationHistory::default),
    };

    if !f0.is_finite() || !all_finite(state.g.view()) {
        log::warn!("[BFGS] f or its gradient is not finite at the initial point (f = {f0}).");
        return Ok(state.finish(0, Termination::InvalidInitialPoint, objective.evals));
    }

    for it in 0..options.max_iterations {
        let p = state.hessian.direction(&state.g);
        let gtp = state.g.dot(&p);
        if !(gtp < 0.0) {
            log::warn!(
                "[BFGS] Not a descent direction (gᵀp = {:.3e}); quitting after {} iteration(s), f = {:.6e}, dnorm = {:.3e}.",
                gtp,
                it,
                state.f,
                state.dnorm
            );
            return Ok(state.finish(it, Termination::NonDescentDirection, objective.evals));
        }

        let hessian_used = state.history.as_ref().map(|_| state.hessian.clone());
        let LineSearchOutcome {
            alpha,
            x,
            f,
            g,
            status,
            trace,
        } = line_search.search(
            &mut objective,
            &state.x,
            state.f,
            &state.g,
            &p,
            options.wolfe1,
            options.wolfe2,
            options.fvalquit,
        );

        // Gradients from far-away points say nothing about stationarity here.
        if alpha * norm2(p.view()) > options.evaldist {
            state.cache.reset(x.clone(), g.clone());
        } else {
            state.cache.push(x.clone(), g.clone());
        }
        if state.cache.len() > 1 {
            let hull = min_norm_in_hull(&state.cache.gradient_matrix());
            state.d = hull.vector;
            state.w = hull.weights;
        } else {
            state.d = g.clone();
            state.w = array![1.0];
        }
        state.dnorm = norm2(state.d.view());

        log::debug!(
            "[BFGS] iter {}: nfevals = {}, step = {:.1e}, f = {:.6e}, nG = {}, dnorm = {:.1e}",
            it,
            trace.len(),
            alpha,
            f,
            state.cache.len(),
            state.dnorm
        );
        if let (Some(history), Some(hessian)) = (state.history.as_mut(), hessian_used) {
            history.iterates.push(x.clone());
            history.hessians.push(hessian);
            history.line_search_traces.push(trace);
        }

        let gprev = std::mem::replace(&mut state.g, g);
        state.x = x;
        state.f = f;
        let done = it + 1;

        if state.f < options.fvalquit {
            log::info!(
                "[BFGS] Reached target objective after {done} iteration(s), f = {:.6e}.",
                state.f
            );
            return Ok(state.finish(it, Termination::TargetValueReached, objective.evals));
        }
        if norm2(state.x.view()) > options.xnormquit {
            log::info!("[BFGS] Norm of x exceeds the specified limit after {done} iteration(s).");
            return Ok(state.finish(it, Termination::IterateNormExceeded, objective.evals));
        }
        match status {
            LineSearchStatus::Bracketed if options.quit_on_line_search_failure => {
                log::warn!(
                    "[BFGS] Line search failed; quitting after {done} iteration(s), f = {:.6e}, dnorm = {:.3e}.",
                    state.f,
                    state.dnorm
                );
                return Ok(state.finish(it, Termination::LineSearchWolfeFailure, objective.evals));
            }
            LineSearchStatus::Bracketed => {
                log::debug!("[BFGS] Continuing although the line search failed.");
            }
            LineSearchStatus::Unbounded => {
                log::warn!(
                    "[BFGS] f may be unbounded below; quitting after {done} iteration(s), f = {:.6e}.",
                    state.f
                );
                return Ok(state.finish(it, Termination::UnboundedBelow, objective.evals));
            }
            LineSearchStatus::Satisfied => {}
        }
        if state.dnorm <= options.normtol {
            if state.cache.len() == 1 {
                log::info!(
                    "[BFGS] Gradient norm below tolerance; quitting after {done} iteration(s), f = {:.6e}.",
                    state.f
                );
            } else {
                log::info!(
                    "[BFGS] Norm of smallest vector in convex hull of gradients below tolerance; quitting after {done} iteration(s), f = {:.6e}.",
                    state.f
                );
            }
            return Ok(state.finish(it, Termination::OptimalityReached, objective.evals));
        }
        if deadline.is_some_and(|end| Instant::now() > end) {
            log::info!("[BFGS] Time limit exceeded; quitting after {done} iteration(s).");
            return Ok(state.finish(it, Termination::TimeLimitExceeded, objective.evals));
        }

        let s = &p * alpha;
        let y = &state.g - &gprev;
        if state.hessian.update(s, y, it == 0, options.scale) == UpdateStatus::Skipped {
            log::debug!("[BFGS] sᵀy <= 0; skipping BFGS update at iteration {it}.");
        }
    }

    log::info!(
        "[BFGS] {} iteration(s) reached, f = {:.6e}, dnorm = {:.3e}.",
        options.max_iterations,
        state.f,
        state.dnorm
    );
    let evals = objective.evals;
    Ok(state.finish(options.max_iterations, Termination::MaxIterations, evals))
}

/// Runs the line search named by `options.line_search`.
pub(crate) fn minimize_with_kind<O>(
    objective: &mut O,
    x0: &Array1<f64>,
    options: &BfgsOptions,
    deadline: Option<Instant>,
) -> Result<BfgsSolution, HansoError>
where
    O: Objective + ?Sized,
{
    match options.line_search {
        LineSearchKind::WeakWolfe => minimize(objective, x0, options, &WeakWolfe, deadline),
        LineSearchKind::StrongWolfe => {
            minimize(objective, x0, options, &StrongWolfe::default(), deadline)
        }
    }
}

/// A configurable BFGS run from a single starting point.
pub struct Bfgs<O> {
    x0: Array1<f64>,
    objective: O,
    options: BfgsOptions,
}

impl<F, G> Bfgs<FnObjective<F, G>>
where
    F: FnMut(&Array1<f64>) -> f64,
    G: FnMut(&Array1<f64>) -> Array1<f64>,
{
    /// Creates a run from separate value and gradient closures.
    ///
    /// # Arguments
    /// * `x0` - The starting point.
    /// * `func` - Returns `f(x)`.
    /// * `grad` - Returns a gradient of `f` at `x`. At points of
    ///   nondifferentiability any nearby gradient will do.
    pub fn new(x0: Array1<f64>, func: F, grad: G) -> Self {
        Self::from_objective(x0, FnObjective::new(func, grad))
    }
}

impl<O: Objective> Bfgs<O> {
    pub fn from_objective(x0: Array1<f64>, objective: O) -> Self {
        Self {
            x0,
            objective,
            options: BfgsOptions::default(),
        }
    }

    /// Replaces every setting at once.
    pub fn with_options(mut self, options: BfgsOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the maximum number of iterations (default: 100).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.options.max_iterations = max_iterations;
        self
    }

    /// Switches to limited-memory BFGS keeping `memory` pairs (default: 0,
    /// full BFGS).
    pub fn with_memory(mut self, memory: usize) -> Self {
        self.options.memory = memory;
        self
    }

    pub fn with_gradient_cache_size(mut self, size: usize) -> Self {
        self.options.gradient_cache_size = Some(size);
        self
    }

    /// Sets the tolerance on the optimality measure (default: 1e-4).
    pub fn with_normtol(mut self, normtol: f64) -> Self {
        self.options.normtol = normtol;
        self
    }

    /// Stops as soon as a value below `fvalquit` is found.
    pub fn with_fvalquit(mut self, fvalquit: f64) -> Self {
        self.options.fvalquit = fvalquit;
        self
    }

    /// Stops once `‖x‖₂` exceeds `xnormquit`.
    pub fn with_xnormquit(mut self, xnormquit: f64) -> Self {
        self.options.xnormquit = xnormquit;
        self
    }

    pub fn with_cpu_max(mut self, budget: Duration) -> Self {
        self.options.cpu_max = Some(budget);
        self
    }

    pub fn with_line_search(mut self, kind: LineSearchKind) -> Self {
        self.options.line_search = kind;
        self
    }

    /// Sets the sufficient-decrease and curvature constants
    /// (default: 0 and 0.5).
    ///
    /// Requires `0 ≤ wolfe1 ≤ wolfe2 < 1`. Equality is accepted so that
    /// `(0, 0)` can select the exact line search simulation of the strong
    /// Wolfe search.
    pub fn with_wolfe(mut self, wolfe1: f64, wolfe2: f64) -> Self {
        self.options.wolfe1 = wolfe1;
        self.options.wolfe2 = wolfe2;
        self
    }

    pub fn with_quit_on_line_search_failure(mut self, enable: bool) -> Self {
        self.options.quit_on_line_search_failure = enable;
        self
    }

    pub fn with_evaldist(mut self, evaldist: f64) -> Self {
        self.options.evaldist = evaldist;
        self
    }

    pub fn with_initial_hessian(mut self, h0: Array2<f64>) -> Self {
        self.options.initial_hessian = Some(h0);
        self
    }

    /// Enables `sᵀy / yᵀy` scaling of the inverse Hessian (default: on).
    pub fn with_scale(mut self, enable: bool) -> Self {
        self.options.scale = enable;
        self
    }

    /// Keeps iterates, Hessian snapshots and line-search traces.
    pub fn with_history(mut self, enable: bool) -> Self {
        self.options.record_history = enable;
        self
    }

    pub fn options(&self) -> &BfgsOptions {
        &self.options
    }

    /// Executes the run with the configured line search.
    pub fn run(&mut self) -> Result<BfgsSolution, HansoError> {
        minimize_with_kind(&mut self.objective, &self.x0, &self.options, None)
    }

    /// Executes the run with a caller-supplied line search. The
    /// `line_search` option is ignored.
    pub fn run_with<L: LineSearch>(&mut self, line_search: &L) -> Result<BfgsSolution, HansoError> {
        minimize(&mut self.objective, &self.x0, &self.options, line_search, None)
    }
}
