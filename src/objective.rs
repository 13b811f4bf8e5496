use ndarray::Array1;

/// Objective and gradient oracles.
///
/// Both methods take `&mut self` so implementors may cache results or count
/// evaluations. The solver treats them as side-effect free: the same point
/// must give the same answer.
pub trait Objective {
    /// Evaluates `f(x)`.
    fn value(&mut self, x: &Array1<f64>) -> f64;

    /// Evaluates a gradient (or any element of the generalized gradient) at `x`.
    fn gradient(&mut self, x: &Array1<f64>) -> Array1<f64>;

    /// Evaluates `(f(x), ∇f(x))`.
    fn evaluate(&mut self, x: &Array1<f64>) -> (f64, Array1<f64>) {
        (self.value(x), self.gradient(x))
    }
}

/// Adapter turning a pair of closures into an [`Objective`].
///
/// Extra problem data is carried by closure capture.
pub struct FnObjective<F, G> {
    func: F,
    grad: G,
}

impl<F, G> FnObjective<F, G>
where
    F: FnMut(&Array1<f64>) -> f64,
    G: FnMut(&Array1<f64>) -> Array1<f64>,
{
    pub fn new(func: F, grad: G) -> Self {
        Self { func, grad }
    }
}

impl<F, G> Objective for FnObjective<F, G>
where
    F: FnMut(&Array1<f64>) -> f64,
    G: FnMut(&Array1<f64>) -> Array1<f64>,
{
    fn value(&mut self, x: &Array1<f64>) -> f64 {
        (self.func)(x)
    }

    fn gradient(&mut self, x: &Array1<f64>) -> Array1<f64> {
        (self.grad)(x)
    }
}
