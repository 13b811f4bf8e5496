//! HANSO: Hybrid Algorithm for Non-Smooth Optimization, BFGS phase.
//!
//! Minimizes a function `f: ℝⁿ → ℝ` that may be nonsmooth and nonconvex,
//! given oracles for `f` and for a gradient wherever `f` is differentiable.
//! Nonsmooth functions are differentiable almost everywhere, and BFGS with
//! an inexact weak Wolfe line search handles them well in practice; the
//! approximate inverse Hessian typically becomes very ill conditioned as the
//! iterates approach a kink.
//!
//! # Features
//! - Full BFGS with an explicitly symmetric rank-two update, or limited-memory
//!   BFGS through the two-loop recursion (`with_memory`).
//! - Weak Wolfe line search by doubling and bisection (default), or a strong
//!   Wolfe search with cubic interpolation (`with_line_search`).
//! - A stationarity test for nonsmooth functions: the shortest vector in the
//!   convex hull of gradients cached at nearby iterates, found by a small
//!   interior-point QP.
//! - Typed termination reasons and optional per-iteration history.
//! - A multi-start driver ([`Hanso`]) keeping the best run.
//!
//! ## Defaults (key settings)
//! - `max_iterations = 100`, `normtol = 1e-4`, `evaldist = 1e-4`.
//! - Wolfe constants `wolfe1 = 0`, `wolfe2 = 0.5`; stop on line search failure.
//! - Full memory, `H0 = I`, with `sᵀy / yᵀy` scaling.
//! - Gradient cache of `min(100, 2n, n + 10)` entries.
//!
//! # Example
//!
//! Minimize `|x₀ - 1| + 2|x₁| + x₂²`, which is nonsmooth at its minimizer.
//!
//! ```
//! use hanso::{Bfgs, Termination};
//! use ndarray::{array, Array1};
//!
//! let sign = |v: f64| if v > 0.0 { 1.0 } else if v < 0.0 { -1.0 } else { 0.0 };
//! let func = |x: &Array1<f64>| (x[0] - 1.0).abs() + 2.0 * x[1].abs() + x[2] * x[2];
//! let grad = move |x: &Array1<f64>| array![sign(x[0] - 1.0), 2.0 * sign(x[1]), 2.0 * x[2]];
//!
//! let solution = Bfgs::new(array![1.5, -0.5, 2.0], func, grad)
//!     .with_max_iterations(100)
//!     .run()
//!     .expect("options are valid");
//!
//! assert_eq!(solution.termination, Termination::OptimalityReached);
//! assert!((solution.final_point[0] - 1.0).abs() < 1e-4);
//! println!(
//!     "f = {:.3e} after {} iterations, dnorm = {:.1e}",
//!     solution.final_value, solution.iterations, solution.optimality_norm
//! );
//! ```

pub mod bfgs;
pub mod cache;
pub mod error;
pub mod hanso;
pub mod hessian;
pub mod line_search;
pub mod linalg;
pub mod objective;
pub mod qp;

pub use bfgs::{Bfgs, BfgsOptions, BfgsSolution, IterationHistory, Termination};
pub use cache::GradientCache;
pub use error::HansoError;
pub use hanso::{Hanso, HansoSolution, LocalOptimality, Refinement};
pub use hessian::{InverseHessian, LimitedMemory, UpdateStatus};
pub use line_search::{
    LineSearch, LineSearchKind, LineSearchOutcome, LineSearchStatus, StrongWolfe, WeakWolfe,
};
pub use objective::{FnObjective, Objective};
pub use qp::{HullPoint, QpStatus, min_norm_in_hull};
