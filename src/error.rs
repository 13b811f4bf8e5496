/// Configuration problems detected before a run starts.
///
/// Run outcomes, including numerical failures inside the iteration, are not
/// errors; they are reported through [`crate::Termination`].
#[derive(Debug, thiserror::Error)]
pub enum HansoError {
    #[error("initial Hessian must be {expected}x{expected}, got {rows}x{cols}")]
    InitialHessianShape {
        expected: usize,
        rows: usize,
        cols: usize,
    },
    #[error("initial Hessian contains non-finite entries")]
    InitialHessianNotFinite,
    #[error("gradient at the initial point has length {got}, expected {expected}")]
    GradientDimension { expected: usize, got: usize },
    #[error("starting point {index} has dimension {got}, expected {expected}")]
    StartDimension {
        index: usize,
        expected: usize,
        got: usize,
    },
    #[error("the starting point is empty")]
    EmptyPoint,
    #[error("no starting points were supplied")]
    NoStartingPoints,
    #[error("invalid Wolfe parameters: wolfe1 = {wolfe1}, wolfe2 = {wolfe2}")]
    WolfeParameters { wolfe1: f64, wolfe2: f64 },
    #[error("invalid value {value} for `{name}`: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
    #[error(
        "gradient sampling refinement is not supported in this build; run without it and inspect the BFGS optimality measure instead"
    )]
    GradientSamplingUnsupported,
}
