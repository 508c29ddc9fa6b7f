//! One-dimensional interpolation on the radial grid.
//!
//! Both splines share the same segment lookup; evaluation outside the node
//! range is the caller's responsibility (the multipole handles the inner
//! and outer asymptotics explicitly).

/// Locate `x` within the nodes: the index `i` such that
/// `nodes[i] <= x <= nodes[i + 1]`, clamped to the first/last segment.
fn segment(nodes: &[f64], x: f64) -> usize {
    let n = nodes.len();
    let i = nodes.partition_point(|&v| v <= x);
    i.saturating_sub(1).min(n.saturating_sub(2))
}

/// Piecewise cubic Hermite interpolant with prescribed derivatives.
#[derive(Debug, Clone)]
pub struct HermiteSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    dy: Vec<f64>,
}

impl HermiteSpline {
    /// Nodes, values and derivatives must have equal length >= 2.
    pub fn new(x: Vec<f64>, y: Vec<f64>, dy: Vec<f64>) -> Self {
        debug_assert!(x.len() >= 2 && x.len() == y.len() && y.len() == dy.len());
        Self { x, y, dy }
    }

    /// Interpolated value
    pub fn eval(&self, x: f64) -> f64 {
        let i = segment(&self.x, x);
        let h = self.x[i + 1] - self.x[i];
        let t = (x - self.x[i]) / h;
        let t1 = 1.0 - t;
        let h00 = (1.0 + 2.0 * t) * t1 * t1;
        let h10 = t * t1 * t1;
        let h01 = t * t * (3.0 - 2.0 * t);
        let h11 = -t * t * t1;
        h00 * self.y[i] + h10 * h * self.dy[i] + h01 * self.y[i + 1] + h11 * h * self.dy[i + 1]
    }

    /// Value and derivative at the first node
    pub fn first(&self) -> (f64, f64) {
        (self.y[0], self.dy[0])
    }

    /// Value and derivative at the last node
    pub fn last(&self) -> (f64, f64) {
        let n = self.y.len() - 1;
        (self.y[n], self.dy[n])
    }
}

/// Natural cubic spline (zero second derivative at both ends).
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    y2: Vec<f64>,
}

impl CubicSpline {
    /// Build the spline through `(x[i], y[i])`; requires at least two
    /// strictly increasing nodes.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        let n = x.len();
        debug_assert!(n >= 2 && n == y.len());
        let mut y2 = vec![0.0; n];
        let mut u = vec![0.0; n];
        for i in 1..n - 1 {
            let sig = (x[i] - x[i - 1]) / (x[i + 1] - x[i - 1]);
            let p = sig * y2[i - 1] + 2.0;
            y2[i] = (sig - 1.0) / p;
            let slope = (y[i + 1] - y[i]) / (x[i + 1] - x[i]) - (y[i] - y[i - 1]) / (x[i] - x[i - 1]);
            u[i] = (6.0 * slope / (x[i + 1] - x[i - 1]) - sig * u[i - 1]) / p;
        }
        y2[n - 1] = 0.0;
        for k in (0..n - 1).rev() {
            y2[k] = y2[k] * y2[k + 1] + u[k];
        }
        y2[0] = 0.0;
        Self { x, y, y2 }
    }

    fn weights(&self, x: f64) -> (usize, f64, f64, f64) {
        let i = segment(&self.x, x);
        let h = self.x[i + 1] - self.x[i];
        let a = (self.x[i + 1] - x) / h;
        (i, h, a, 1.0 - a)
    }

    /// Interpolated value
    pub fn eval(&self, x: f64) -> f64 {
        let (i, h, a, b) = self.weights(x);
        a * self.y[i]
            + b * self.y[i + 1]
            + ((a * a * a - a) * self.y2[i] + (b * b * b - b) * self.y2[i + 1]) * h * h / 6.0
    }

    /// First derivative of the interpolant
    pub fn deriv(&self, x: f64) -> f64 {
        let (i, h, a, b) = self.weights(x);
        (self.y[i + 1] - self.y[i]) / h - (3.0 * a * a - 1.0) / 6.0 * h * self.y2[i]
            + (3.0 * b * b - 1.0) / 6.0 * h * self.y2[i + 1]
    }

    /// First node
    pub fn x_min(&self) -> f64 {
        self.x[0]
    }

    /// Last node
    pub fn x_max(&self) -> f64 {
        self.x[self.x.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hermite_reproduces_cubic() {
        let f = |x: f64| 2.0 * x * x * x - x + 0.5;
        let df = |x: f64| 6.0 * x * x - 1.0;
        let x: Vec<f64> = vec![0.0, 0.7, 1.5, 3.0];
        let s = HermiteSpline::new(
            x.clone(),
            x.iter().map(|&v| f(v)).collect(),
            x.iter().map(|&v| df(v)).collect(),
        );
        for &t in &[0.0, 0.3, 1.0, 2.2, 3.0] {
            assert!((s.eval(t) - f(t)).abs() < 1e-12, "x={}", t);
        }
    }

    #[test]
    fn test_natural_spline_reproduces_line() {
        let x: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v - 1.0).collect();
        let s = CubicSpline::new(x, y);
        assert!((s.eval(2.25) - 5.75).abs() < 1e-13);
        assert!((s.deriv(0.0) - 3.0).abs() < 1e-12);
        assert!((s.deriv(4.5) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_natural_spline_accuracy_on_smooth_function() {
        let n = 80;
        let x: Vec<f64> = (0..n).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|v| v.sin()).collect();
        let s = CubicSpline::new(x, y);
        // away from the ends the natural end condition no longer matters
        for &t in &[2.05, 3.33, 5.51] {
            assert!((s.eval(t) - t.sin()).abs() < 1e-5, "x={}", t);
            assert!((s.deriv(t) - t.cos()).abs() < 1e-3, "x={}", t);
        }
    }
}
