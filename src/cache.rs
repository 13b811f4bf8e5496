//! Bounded window of recent gradients used by the stationarity test.

use std::collections::VecDeque;

use ndarray::{Array1, Array2};

/// A bounded window of recent `(point, gradient)` pairs, newest first.
///
/// The gradients held here are the candidates whose convex hull is searched
/// for a short vector when testing for (approximate) Clarke stationarity.
/// Entries are never modified after insertion.
#[derive(Debug, Clone)]
pub struct GradientCache {
    entries: VecDeque<(Array1<f64>, Array1<f64>)>,
    cap: usize,
}

impl GradientCache {
    /// Creates a cache holding the single pair `(x, g)`.
    pub fn new(cap: usize, x: Array1<f64>, g: Array1<f64>) -> Self {
        let cap = cap.max(1);
        let mut entries = VecDeque::with_capacity(cap);
        entries.push_front((x, g));
        Self { entries, cap }
    }

    /// Default capacity for an `n`-dimensional problem: `min(100, 2n, n + 10)`.
    pub fn default_capacity(n: usize) -> usize {
        100.min(2 * n).min(n + 10).max(1)
    }

    /// Discards every entry and keeps only `(x, g)`.
    pub fn reset(&mut self, x: Array1<f64>, g: Array1<f64>) {
        self.entries.clear();
        self.entries.push_front((x, g));
    }

    /// Adds `(x, g)` as the newest entry, evicting the oldest once full.
    pub fn push(&mut self, x: Array1<f64>, g: Array1<f64>) {
        if self.entries.len() == self.cap {
            self.entries.pop_back();
        }
        self.entries.push_front((x, g));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn points(&self) -> impl Iterator<Item = &Array1<f64>> {
        self.entries.iter().map(|(x, _)| x)
    }

    pub fn gradients(&self) -> impl Iterator<Item = &Array1<f64>> {
        self.entries.iter().map(|(_, g)| g)
    }

    /// Most recently inserted gradient.
    pub fn newest_gradient(&self) -> Option<&Array1<f64>> {
        self.entries.front().map(|(_, g)| g)
    }

    /// Gradients as the columns of an `n × len` matrix, in cache order.
    pub fn gradient_matrix(&self) -> Array2<f64> {
        Self::stack_columns(self.gradients())
    }

    /// Points as the columns of an `n × len` matrix, in cache order.
    pub fn point_matrix(&self) -> Array2<f64> {
        Self::stack_columns(self.points())
    }

    fn stack_columns<'a>(cols: impl Iterator<Item = &'a Array1<f64>>) -> Array2<f64> {
        let cols: Vec<&Array1<f64>> = cols.collect();
        let n = cols.first().map_or(0, |c| c.len());
        let mut m = Array2::<f64>::zeros((n, cols.len()));
        for (j, c) in cols.iter().enumerate() {
            m.column_mut(j).assign(c);
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn pair(k: f64) -> (Array1<f64>, Array1<f64>) {
        (array![k, 0.0], array![0.0, k])
    }

    #[test]
    fn push_below_capacity_grows() {
        let (x, g) = pair(0.0);
        let mut cache = GradientCache::new(5, x, g);
        for k in 1..4 {
            let (x, g) = pair(k as f64);
            cache.push(x, g);
        }
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.newest_gradient(), Some(&array![0.0, 3.0]));
    }

    #[test]
    fn push_past_capacity_keeps_most_recent() {
        let cap = 3;
        let (x, g) = pair(0.0);
        let mut cache = GradientCache::new(cap, x, g);
        for k in 1..(cap + 4) {
            let (x, g) = pair(k as f64);
            cache.push(x, g);
        }
        assert_eq!(cache.len(), cap);
        let firsts: Vec<f64> = cache.points().map(|p| p[0]).collect();
        assert_eq!(firsts, vec![6.0, 5.0, 4.0]);
    }

    #[test]
    fn reset_leaves_singleton() {
        let (x, g) = pair(0.0);
        let mut cache = GradientCache::new(4, x, g);
        for k in 1..10 {
            let (x, g) = pair(k as f64);
            cache.push(x, g);
        }
        let (x, g) = pair(42.0);
        cache.reset(x, g);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.newest_gradient(), Some(&array![0.0, 42.0]));
    }

    #[test]
    fn matrices_hold_columns_in_cache_order() {
        let (x, g) = pair(1.0);
        let mut cache = GradientCache::new(4, x, g);
        let (x, g) = pair(2.0);
        cache.push(x, g);
        let gm = cache.gradient_matrix();
        assert_eq!(gm, array![[0.0, 0.0], [2.0, 1.0]]);
        let xm = cache.point_matrix();
        assert_eq!(xm, array![[2.0, 1.0], [0.0, 0.0]]);
    }

    #[test]
    fn default_capacity_matches_rule() {
        assert_eq!(GradientCache::default_capacity(2), 4);
        assert_eq!(GradientCache::default_capacity(20), 30);
        assert_eq!(GradientCache::default_capacity(500), 100);
    }
}
