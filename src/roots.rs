//! Bracketed root finding for orbit turning points.
//!
//! The spherical action finder needs the peri- and apocentre radii of each
//! orbit, i.e. the zeros of `2(E - Φ(r)) - L²/r²`. Both are bracketed before
//! the search starts, so Brent's method converges unconditionally.
//!
//! Reference: Brent, R.P. (1973). "Algorithms for Minimization without
//! Derivatives". Prentice-Hall, ch. 4.

use thiserror::Error;

/// Errors from the turning-point search
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrentError {
    /// The end points do not straddle a sign change
    #[error("root not bracketed: f({lo}) = {f_lo}, f({hi}) = {f_hi}")]
    NotBracketed {
        /// Lower end point
        lo: f64,
        /// Function value at `lo`
        f_lo: f64,
        /// Upper end point
        hi: f64,
        /// Function value at `hi`
        f_hi: f64,
    },
    /// The iteration limit was hit first
    #[error("no convergence after {iterations} iterations (best estimate {best})")]
    NoConvergence {
        /// Best root estimate so far
        best: f64,
        /// Iterations performed
        iterations: usize,
    },
}

/// An interval known to contain a sign change, with the function values at
/// its end points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    /// Lower end point
    pub lo: f64,
    /// Function value at `lo`
    pub f_lo: f64,
    /// Upper end point
    pub hi: f64,
    /// Function value at `hi`
    pub f_hi: f64,
}

impl Bracket {
    /// Wrap already known end-point values.
    pub fn new(lo: f64, f_lo: f64, hi: f64, f_hi: f64) -> Result<Self, BrentError> {
        if !f_lo.is_finite() || !f_hi.is_finite() || f_lo * f_hi > 0.0 {
            return Err(BrentError::NotBracketed { lo, f_lo, hi, f_hi });
        }
        Ok(Self { lo, f_lo, hi, f_hi })
    }

    /// Evaluate `f` at both end points.
    pub fn evaluate<F: FnMut(f64) -> f64>(mut f: F, lo: f64, hi: f64) -> Result<Self, BrentError> {
        let (f_lo, f_hi) = (f(lo), f(hi));
        Self::new(lo, f_lo, hi, f_hi)
    }
}

/// A located root
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Root {
    /// Abscissa
    pub x: f64,
    /// Function value at `x`
    pub value: f64,
    /// Function evaluations spent
    pub iterations: usize,
}

/// Brent's method: inverse quadratic interpolation and secant steps,
/// falling back to bisection whenever they do not shrink the bracket fast
/// enough.
#[derive(Debug, Clone)]
pub struct BrentSolver {
    /// Absolute tolerance on the root location
    pub xtol: f64,
    /// Maximum iterations
    pub max_iter: usize,
}

impl Default for BrentSolver {
    fn default() -> Self {
        Self {
            xtol: 1e-12,
            max_iter: 100,
        }
    }
}

impl BrentSolver {
    /// Solver with the given absolute tolerance and iteration limit
    pub fn new(xtol: f64, max_iter: usize) -> Self {
        Self { xtol, max_iter }
    }

    /// Locate a zero of `f` inside `bracket`.
    pub fn solve<F: FnMut(f64) -> f64>(&self, mut f: F, bracket: Bracket) -> Result<Root, BrentError> {
        let Bracket {
            lo: mut a,
            f_lo: mut fa,
            hi: mut b,
            f_hi: mut fb,
        } = bracket;
        if fa == 0.0 {
            return Ok(Root { x: a, value: fa, iterations: 0 });
        }

        // b is the current estimate, [b, c] always contains the root and
        // a is the previous estimate
        let (mut c, mut fc) = (a, fa);
        let mut step = b - a;
        let mut prev_step = step;

        for iteration in 1..=self.max_iter {
            if fb * fc > 0.0 {
                c = a;
                fc = fa;
                step = b - a;
                prev_step = step;
            }
            if fc.abs() < fb.abs() {
                a = b;
                b = c;
                c = a;
                fa = fb;
                fb = fc;
                fc = fa;
            }

            let tol = 2.0 * f64::EPSILON * b.abs() + 0.5 * self.xtol;
            let half = 0.5 * (c - b);
            if half.abs() <= tol || fb == 0.0 {
                return Ok(Root { x: b, value: fb, iterations: iteration });
            }

            if prev_step.abs() >= tol && fa.abs() > fb.abs() {
                let s = fb / fa;
                let (mut p, mut q) = if a == c {
                    (2.0 * half * s, 1.0 - s)
                } else {
                    let (qa, rb) = (fa / fc, fb / fc);
                    (
                        s * (2.0 * half * qa * (qa - rb) - (b - a) * (rb - 1.0)),
                        (qa - 1.0) * (rb - 1.0) * (s - 1.0),
                    )
                };
                if p > 0.0 {
                    q = -q;
                } else {
                    p = -p;
                }
                if 2.0 * p < (3.0 * half * q - (tol * q).abs()).min((prev_step * q).abs()) {
                    prev_step = step;
                    step = p / q;
                } else {
                    step = half;
                    prev_step = half;
                }
            } else {
                step = half;
                prev_step = half;
            }

            a = b;
            fa = fb;
            b += if step.abs() > tol { step } else { tol.copysign(half) };
            fb = f(b);
        }

        Err(BrentError::NoConvergence {
            best: b,
            iterations: self.max_iter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kepler_turning_points() {
        // 2(E + 1/r) - L²/r² with E = -0.5, L = 0.8: roots at 1 ± sqrt(1 - L²)
        let (e, l) = (-0.5, 0.8);
        let g = |r: f64| 2.0 * (e + 1.0 / r) - l * l / (r * r);
        let solver = BrentSolver::new(1e-14, 100);
        let apo = solver.solve(g, Bracket::evaluate(g, 1.0, 4.0).unwrap()).unwrap();
        let peri = solver.solve(g, Bracket::evaluate(g, 0.1, 1.0).unwrap()).unwrap();
        assert!((apo.x - 1.6).abs() < 1e-12, "apo = {}", apo.x);
        assert!((peri.x - 0.4).abs() < 1e-12, "peri = {}", peri.x);
        assert!(apo.iterations < 20);
    }

    #[test]
    fn test_radial_orbit_in_harmonic_core() {
        // 2(E - r²/2) with E = 0.5 has its apocentre at r = 1
        let g = |r: f64| 2.0 * (0.5 - 0.5 * r * r);
        let root = BrentSolver::default()
            .solve(g, Bracket::evaluate(g, 0.5, 8.0).unwrap())
            .unwrap();
        assert!((root.x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_missing_sign_change() {
        assert!(matches!(
            Bracket::evaluate(|r: f64| r * r + 1.0, -1.0, 1.0),
            Err(BrentError::NotBracketed { .. })
        ));
        assert!(Bracket::new(0.0, f64::NAN, 1.0, -1.0).is_err());
    }

    #[test]
    fn test_root_at_end_point() {
        let root = BrentSolver::default()
            .solve(|x| x - 1.0, Bracket::new(1.0, 0.0, 3.0, 2.0).unwrap())
            .unwrap();
        assert_eq!(root.x, 1.0);
        assert_eq!(root.value, 0.0);
    }

    #[test]
    fn test_iteration_limit() {
        let solver = BrentSolver::new(0.0, 2);
        let g = |x: f64| x.powi(3) - 0.3;
        let result = solver.solve(g, Bracket::evaluate(g, 0.0, 10.0).unwrap());
        assert!(matches!(result, Err(BrentError::NoConvergence { iterations: 2, .. })));
    }
}
