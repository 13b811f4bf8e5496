//! Multi-start driver.
//!
//! BFGS is run from each starting point in turn and the run with the lowest
//! finite final value is reported as the answer. All runs share one
//! wall-clock budget.

use std::time::{Duration, Instant};

use ndarray::Array1;

use crate::bfgs::{BfgsOptions, BfgsSolution, Termination, minimize_with_kind};
use crate::error::HansoError;
use crate::line_search::LineSearchKind;
use crate::linalg::norm2;
use crate::objective::{FnObjective, Objective};

/// What to do after the BFGS phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Refinement {
    #[default]
    None,
    /// Gradient sampling around the best BFGS point. Not available; selecting
    /// it makes [`Hanso::run`] fail before any evaluation.
    GradientSampling,
}

/// Local optimality measure of the best point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalOptimality {
    /// Norm of the shortest vector in the hull of the cached gradients.
    pub dnorm: f64,
    /// Largest distance from the best point to a point whose gradient is in
    /// the cache.
    pub evaldist: f64,
}

#[derive(Debug, Clone)]
pub struct HansoSolution {
    /// Index into `runs` of the run with the lowest finite final value.
    pub best_index: usize,
    /// One entry per start actually run, in order.
    pub runs: Vec<BfgsSolution>,
    pub local_optimality: LocalOptimality,
}

impl HansoSolution {
    pub fn best(&self) -> &BfgsSolution {
        &self.runs[self.best_index]
    }
}

/// BFGS from several starting points.
pub struct Hanso<O> {
    objective: O,
    starts: Vec<Array1<f64>>,
    options: BfgsOptions,
    refinement: Refinement,
}

impl<F, G> Hanso<FnObjective<F, G>>
where
    F: FnMut(&Array1<f64>) -> f64,
    G: FnMut(&Array1<f64>) -> Array1<f64>,
{
    pub fn new(func: F, grad: G, starts: Vec<Array1<f64>>) -> Self {
        Self::from_objective(FnObjective::new(func, grad), starts)
    }
}

impl<O: Objective> Hanso<O> {
    pub fn from_objective(objective: O, starts: Vec<Array1<f64>>) -> Self {
        Self {
            objective,
            starts,
            options: BfgsOptions::default(),
            refinement: Refinement::None,
        }
    }

    /// Settings applied to every run.
    pub fn with_options(mut self, options: BfgsOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.options.max_iterations = max_iterations;
        self
    }

    pub fn with_memory(mut self, memory: usize) -> Self {
        self.options.memory = memory;
        self
    }

    pub fn with_normtol(mut self, normtol: f64) -> Self {
        self.options.normtol = normtol;
        self
    }

    /// Stops all runs once a value below `fvalquit` has been found.
    pub fn with_fvalquit(mut self, fvalquit: f64) -> Self {
        self.options.fvalquit = fvalquit;
        self
    }

    /// Wall-clock budget shared by all runs.
    pub fn with_cpu_max(mut self, budget: Duration) -> Self {
        self.options.cpu_max = Some(budget);
        self
    }

    pub fn with_line_search(mut self, kind: LineSearchKind) -> Self {
        self.options.line_search = kind;
        self
    }

    pub fn with_refinement(mut self, refinement: Refinement) -> Self {
        self.refinement = refinement;
        self
    }

    fn check_starts(&self) -> Result<usize, HansoError> {
        let first = self.starts.first().ok_or(HansoError::NoStartingPoints)?;
        let n = first.len();
        if n == 0 {
            return Err(HansoError::EmptyPoint);
        }
        for (index, x0) in self.starts.iter().enumerate() {
            if x0.len() != n {
                return Err(HansoError::StartDimension {
                    index,
                    expected: n,
                    got: x0.len(),
                });
            }
        }
        Ok(n)
    }

    /// Runs BFGS from each start and picks the best result.
    pub fn run(&mut self) -> Result<HansoSolution, HansoError> {
        if self.refinement == Refinement::GradientSampling {
            return Err(HansoError::GradientSamplingUnsupported);
        }
        let n = self.check_starts()?;
        self.options.validate(n)?;

        let deadline = self.options.cpu_max.map(|budget| Instant::now() + budget);
        let mut runs = Vec::with_capacity(self.starts.len());
        for (index, x0) in self.starts.iter().enumerate() {
            let sol = minimize_with_kind(&mut self.objective, x0, &self.options, deadline)?;
            log::debug!(
                "[HANSO] start {}: f = {:.6e}, dnorm = {:.3e}, {} iteration(s), {}.",
                index,
                sol.final_value,
                sol.optimality_norm,
                sol.iterations,
                sol.termination
            );
            let stop = sol.termination == Termination::TargetValueReached
                || sol.termination == Termination::TimeLimitExceeded
                || deadline.is_some_and(|end| Instant::now() > end);
            runs.push(sol);
            if stop && index + 1 < self.starts.len() {
                log::info!(
                    "[HANSO] Skipping the remaining {} start(s).",
                    self.starts.len() - index - 1
                );
                break;
            }
        }

        let best_index = best_run(&runs);
        let best = &runs[best_index];
        let local_optimality = LocalOptimality {
            dnorm: best.optimality_norm,
            evaldist: best
                .cache
                .points()
                .map(|p| norm2((p - &best.final_point).view()))
                .fold(0.0, f64::max),
        };

        if !best.final_value.is_finite() {
            log::warn!("[HANSO] f is infinite or NaN at all starting points.");
        } else if best.termination == Termination::TimeLimitExceeded {
            log::info!("[HANSO] Time limit exceeded.");
        } else if best.final_value < self.options.fvalquit {
            log::info!("[HANSO] Reached target objective.");
        } else if local_optimality.dnorm <= self.options.normtol {
            log::info!("[HANSO] Verified optimality within tolerance in BFGS phase.");
        }
        log::info!(
            "[HANSO] Best point found has f = {:.6e} with local optimality measure: dnorm = {:.1e}, evaldist = {:.1e}.",
            best.final_value,
            local_optimality.dnorm,
            local_optimality.evaldist
        );

        Ok(HansoSolution {
            best_index,
            runs,
            local_optimality,
        })
    }
}

// Lowest finite value wins; ties keep the earlier run.
fn best_run(runs: &[BfgsSolution]) -> usize {
    runs.iter()
        .enumerate()
        .filter(|(_, r)| r.final_value.is_finite())
        .fold(None, |best: Option<(usize, f64)>, (i, r)| match best {
            Some((_, v)) if v <= r.final_value => best,
            _ => Some((i, r.final_value)),
        })
        .map_or(0, |(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use spectral::prelude::*;

    fn double_well(x: &Array1<f64>) -> f64 {
        (x[0] * x[0] - 1.0).powi(2) + 0.3 * x[0]
    }

    fn double_well_grad(x: &Array1<f64>) -> Array1<f64> {
        array![4.0 * x[0] * (x[0] * x[0] - 1.0) + 0.3]
    }

    #[test]
    fn lowest_local_minimum_is_selected() {
        let sol = Hanso::new(double_well, double_well_grad, vec![array![0.5], array![-0.5]])
            .run()
            .unwrap();
        assert_eq!(sol.runs.len(), 2);
        assert_eq!(sol.best_index, 1);
        assert_that!(&sol.best().final_point[0]).is_close_to(-1.0356, 1e-3);
        assert_that!(&sol.runs[0].final_point[0]).is_close_to(0.9601, 1e-3);
        assert_that!(&sol.runs[0].final_value).is_greater_than(sol.best().final_value);
    }

    #[test]
    fn empty_start_list_is_rejected() {
        let err = Hanso::new(double_well, double_well_grad, vec![])
            .run()
            .unwrap_err();
        assert!(matches!(err, HansoError::NoStartingPoints));
    }

    #[test]
    fn inconsistent_start_dimensions_are_rejected() {
        let starts = vec![array![1.0, 2.0], array![1.0, 2.0, 3.0]];
        let err = Hanso::new(|x: &Array1<f64>| x.dot(x), |x: &Array1<f64>| 2.0 * x, starts)
            .run()
            .unwrap_err();
        assert!(matches!(
            err,
            HansoError::StartDimension {
                index: 1,
                expected: 2,
                got: 3
            }
        ));
    }

    #[test]
    fn gradient_sampling_fails_before_evaluating() {
        let mut calls = 0usize;
        let result = Hanso::new(
            |x: &Array1<f64>| {
                calls += 1;
                x.dot(x)
            },
            |x: &Array1<f64>| 2.0 * x,
            vec![array![1.0]],
        )
        .with_refinement(Refinement::GradientSampling)
        .run();
        assert!(matches!(result, Err(HansoError::GradientSamplingUnsupported)));
        assert_eq!(calls, 0);
    }

    #[test]
    fn target_value_skips_remaining_starts() {
        let starts = vec![array![3.0, -4.0], array![1.0, 1.0], array![5.0, 5.0]];
        let sol = Hanso::new(|x: &Array1<f64>| x.dot(x), |x: &Array1<f64>| 2.0 * x, starts)
            .with_fvalquit(100.0)
            .run()
            .unwrap();
        assert_eq!(sol.runs.len(), 1);
        assert_eq!(sol.best().termination, Termination::TargetValueReached);
    }

    #[test]
    fn non_finite_starts_do_not_win() {
        let func = |x: &Array1<f64>| if x[0] > 10.0 { f64::NAN } else { x[0] * x[0] };
        let grad = |x: &Array1<f64>| array![2.0 * x[0]];
        let sol = Hanso::new(func, grad, vec![array![20.0], array![3.0]])
            .run()
            .unwrap();
        assert_eq!(sol.runs[0].termination, Termination::InvalidInitialPoint);
        assert_eq!(sol.best_index, 1);
        assert_that!(&sol.best().final_value).is_less_than(1e-8);
    }

    #[test]
    fn local_measure_of_single_step_run() {
        let sol = Hanso::new(
            |x: &Array1<f64>| x.dot(x),
            |x: &Array1<f64>| 2.0 * x,
            vec![array![3.0, -4.0]],
        )
        .run()
        .unwrap();
        assert_eq!(sol.local_optimality.dnorm, 0.0);
        assert_eq!(sol.local_optimality.evaldist, 0.0);
    }

    #[test]
    fn best_run_ignores_nan_and_prefers_earlier_ties() {
        let template = Hanso::new(
            |x: &Array1<f64>| x.dot(x),
            |x: &Array1<f64>| 2.0 * x,
            vec![array![1.0]],
        )
        .with_max_iterations(0)
        .run()
        .unwrap()
        .runs
        .remove(0);
        let with_value = |v: f64| {
            let mut r = template.clone();
            r.final_value = v;
            r
        };
        let runs = vec![with_value(f64::NAN), with_value(2.0), with_value(2.0), with_value(3.0)];
        assert_eq!(best_run(&runs), 1);
        assert_eq!(best_run(&[with_value(f64::NAN)]), 0);
    }
}
