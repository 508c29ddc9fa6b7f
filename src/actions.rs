//! Maps from phase-space points to actions `(Jr, Jz, Jphi)`.
//!
//! [`SphericalActionFinder`] computes the actions in the spherically
//! averaged profile of a [`Potential`]:
//!
//! - `Jphi = Lz`, `Jz = L - |Lz|`,
//! - `Jr = (1/π) ∫ sqrt(2 (E - Φ(r)) - L²/r²) dr` between the peri- and
//!   apocentre radii, which are bracketed and refined with Brent's method.
//!
//! Unbound orbits (`E >= 0`) get `Jr = +inf`. [`UserActionFinder`] wraps an
//! external M x 6 -> M x 3 callback instead.

use std::f64::consts::PI;

use rayon::prelude::*;

use crate::batch::{Action3, Batch, Point3, Velocity3};
use crate::cubature::{Cubature, Region, Tolerances};
use crate::error::{GalaxyError, GalaxyResult};
use crate::field::{Execution, FnField, UserFunction, VectorField};
use crate::potential::Potential;
use crate::roots::{Bracket, BrentSolver};

/// Number of times a turning-point bracket may be halved or doubled
const MAX_BRACKET_STEPS: usize = 200;

/// A deterministic map from phase-space points to actions.
pub trait ActionFinder: Send + Sync {
    /// Thread-safety tag of the finder, including anything it calls.
    fn execution(&self) -> Execution {
        Execution::Parallel
    }

    /// Actions of every point of an M x 6 batch `(x, y, z, vx, vy, vz)`,
    /// returned as an M x 3 batch `(Jr, Jz, Jphi)`.
    ///
    /// `execution` is the context of the enclosing call: with
    /// [`Execution::Serial`] the points are processed on the calling thread.
    fn actions_at(&self, points: &Batch, execution: Execution) -> GalaxyResult<Batch>;
}

/// Actions in the monopole profile of a potential.
#[derive(Debug, Clone)]
pub struct SphericalActionFinder<'a> {
    potential: &'a Potential,
    /// Relative tolerance of the radial-action integral
    pub tolerance: f64,
}

impl<'a> SphericalActionFinder<'a> {
    /// Bind a finder to a potential.
    pub fn new(potential: &'a Potential) -> Self {
        Self {
            potential,
            tolerance: 1e-10,
        }
    }

    /// The potential the finder is bound to
    pub fn potential(&self) -> &'a Potential {
        self.potential
    }

    /// Actions of a single phase-space point.
    pub fn actions(&self, x: Point3, v: Velocity3) -> GalaxyResult<Action3> {
        let r = (x[0] * x[0] + x[1] * x[1] + x[2] * x[2]).sqrt();
        let lvec = [
            x[1] * v[2] - x[2] * v[1],
            x[2] * v[0] - x[0] * v[2],
            x[0] * v[1] - x[1] * v[0],
        ];
        let l = (lvec[0] * lvec[0] + lvec[1] * lvec[1] + lvec[2] * lvec[2]).sqrt();
        let lz = lvec[2];
        let energy = self.potential.radial_potential(r) + 0.5 * (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]);
        if !energy.is_finite() {
            return Err(GalaxyError::Domain(format!(
                "energy is not finite at r = {}",
                r
            )));
        }

        let jz = (l - lz.abs()).max(0.0);
        let jr = if energy >= 0.0 {
            f64::INFINITY
        } else {
            self.radial_action(energy, l, r)?
        };
        Ok([jr, jz, lz])
    }

    fn radial_action(&self, energy: f64, l: f64, r: f64) -> GalaxyResult<f64> {
        let l2 = l * l;
        let f = |s: f64| {
            let kinetic = 2.0 * (energy - self.potential.radial_potential(s));
            if l2 > 0.0 {
                kinetic - l2 / (s * s)
            } else {
                kinetic
            }
        };

        // an interior point with strictly positive radial kinetic energy
        let inside = [r, r * (1.0 + 1e-6), r * (1.0 - 1e-6)]
            .into_iter()
            .map(|s| (s, f(s)))
            .find(|&(_, fs)| fs > 0.0);
        let Some((r_in, f_in)) = inside else {
            // at rest in the radial direction at an extremum: circular orbit
            return Ok(0.0);
        };

        let peri = if l2 == 0.0 {
            0.0
        } else {
            let mut lo = 0.5 * r_in;
            let mut f_lo = f(lo);
            let mut steps = 0;
            while f_lo > 0.0 && steps < MAX_BRACKET_STEPS {
                lo *= 0.5;
                f_lo = f(lo);
                steps += 1;
            }
            if f_lo > 0.0 {
                0.0
            } else {
                BrentSolver::new(1e-13 * r_in, 200)
                    .solve(f, Bracket::new(lo, f_lo, r_in, f_in)?)?
                    .x
            }
        };

        let mut hi = if r_in > 0.0 { 2.0 * r_in } else { 1.0 };
        let mut f_hi = f(hi);
        let mut steps = 0;
        while f_hi > 0.0 && steps < MAX_BRACKET_STEPS {
            hi *= 2.0;
            f_hi = f(hi);
            steps += 1;
        }
        if f_hi > 0.0 {
            return Ok(f64::INFINITY);
        }
        let apo = BrentSolver::new(1e-13 * hi, 200)
            .solve(f, Bracket::new(r_in, f_in, hi, f_hi)?)?
            .x;

        let mid = 0.5 * (apo + peri);
        let half = 0.5 * (apo - peri);
        if half <= 0.0 {
            return Ok(0.0);
        }

        // s = mid - half cos(psi) removes the square-root endpoint behaviour
        let integrand = FnField::new(1, |p: &Batch, out: &mut Batch| {
            for (o, &psi) in out.column_mut(0).iter_mut().zip(p.column(0)) {
                let s = mid - half * psi.cos();
                *o = f(s).max(0.0).sqrt() * psi.sin();
            }
        });
        let result = Cubature::new(Tolerances::new(1e-15 * half, self.tolerance))
            .with_execution(Execution::Serial)
            .integrate(&integrand, &Region::new(&[0.0], &[PI])?)?;
        Ok(half / PI * result.scalar())
    }
}

impl ActionFinder for SphericalActionFinder<'_> {
    fn actions_at(&self, points: &Batch, execution: Execution) -> GalaxyResult<Batch> {
        points.expect_cols(6, "action computation")?;
        let one = |i: usize| {
            let p = points.row::<6>(i);
            self.actions([p[0], p[1], p[2]], [p[3], p[4], p[5]])
        };
        let rows: Vec<Action3> = match execution {
            Execution::Parallel => (0..points.rows())
                .into_par_iter()
                .map(one)
                .collect::<GalaxyResult<_>>()?,
            Execution::Serial => (0..points.rows()).map(one).collect::<GalaxyResult<_>>()?,
        };
        Ok(Batch::from_rows(&rows))
    }
}

/// Actions from an external callback taking M x 6 points and returning
/// M x 3 actions in column-major order.
#[derive(Debug, Clone)]
pub struct UserActionFinder {
    callback: UserFunction,
}

impl UserActionFinder {
    /// Wrap a callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Batch) -> Vec<f64> + Send + Sync + 'static,
    {
        Self {
            callback: UserFunction::with_values(6, 3, callback),
        }
    }
}

impl ActionFinder for UserActionFinder {
    fn execution(&self) -> Execution {
        Execution::Serial
    }

    fn actions_at(&self, points: &Batch, _execution: Execution) -> GalaxyResult<Batch> {
        points.expect_cols(6, "action computation")?;
        let mut actions = Batch::zeros(points.rows(), 3);
        self.callback.eval_batch(points, &mut actions);
        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::potential::AnalyticPotential;

    fn isochrone_jr(mass: f64, b: f64, energy: f64, l: f64) -> f64 {
        mass / (-2.0 * energy).sqrt() - 0.5 * (l + (l * l + 4.0 * mass * b).sqrt())
    }

    #[test]
    fn test_isochrone_actions_match_closed_form() {
        let (mass, b) = (1.0, 1.0);
        let potential: Potential = AnalyticPotential::isochrone(mass, b).unwrap().into();
        let finder = SphericalActionFinder::new(&potential);

        let cases = [
            ([1.0, 0.0, 0.0], [0.1, 0.4, 0.2]),
            ([0.3, -0.5, 0.8], [-0.2, 0.1, 0.3]),
            ([2.0, 1.0, -0.5], [0.05, -0.3, 0.25]),
            ([0.0, 0.0, 0.7], [0.0, 0.0, 0.6]),
        ];
        for (x, v) in cases {
            let (x, v): ([f64; 3], [f64; 3]) = (x, v);
            let [jr, jz, jphi] = finder.actions(x, v).unwrap();
            let r = (x[0] * x[0] + x[1] * x[1] + x[2] * x[2]).sqrt();
            let energy = potential.value(x) + 0.5 * (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]);
            let lvec = [
                x[1] * v[2] - x[2] * v[1],
                x[2] * v[0] - x[0] * v[2],
                x[0] * v[1] - x[1] * v[0],
            ];
            let l = (lvec[0] * lvec[0] + lvec[1] * lvec[1] + lvec[2] * lvec[2]).sqrt();
            let expected = isochrone_jr(mass, b, energy, l);
            assert!(
                (jr - expected).abs() < 1e-8,
                "x={:?} r={}: Jr={} expected {}",
                x,
                r,
                jr,
                expected
            );
            assert!((jphi - lvec[2]).abs() < 1e-15);
            assert!((jz + jphi.abs() - l).abs() < 1e-14);
        }
    }

    #[test]
    fn test_circular_orbit_has_zero_radial_action() {
        let potential: Potential = AnalyticPotential::plummer(1.0, 1.0).unwrap().into();
        let finder = SphericalActionFinder::new(&potential);
        // v_c² = r² M / (r² + a²)^(3/2)
        let r: f64 = 1.3;
        let vc = (r * r / (r * r + 1.0).powf(1.5)).sqrt();
        let [jr, jz, jphi] = finder.actions([r, 0.0, 0.0], [0.0, vc, 0.0]).unwrap();
        assert!(jr.abs() < 1e-6, "Jr = {}", jr);
        assert!(jz.abs() < 1e-15);
        assert!((jphi - r * vc).abs() < 1e-15);
    }

    #[test]
    fn test_unbound_orbit() {
        let potential: Potential = AnalyticPotential::plummer(1.0, 1.0).unwrap().into();
        let finder = SphericalActionFinder::new(&potential);
        let [jr, _, _] = finder.actions([1.0, 0.0, 0.0], [2.0, 0.0, 0.0]).unwrap();
        assert!(jr.is_infinite());
    }

    #[test]
    fn test_batch_serial_and_parallel_agree() {
        let potential: Potential = AnalyticPotential::dehnen(1.0, 1.0, 1.0).unwrap().into();
        let finder = SphericalActionFinder::new(&potential);
        let points = Batch::from_rows(&[
            [0.5, 0.1, 0.0, 0.1, 0.3, 0.2],
            [1.5, -0.4, 0.3, -0.2, 0.1, 0.05],
            [0.1, 0.0, 0.0, 0.0, 0.0, 0.4],
        ]);
        let a = finder.actions_at(&points, Execution::Parallel).unwrap();
        let b = finder.actions_at(&points, Execution::Serial).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cols(), 3);

        let wrong = Batch::zeros(2, 3);
        assert!(matches!(
            finder.actions_at(&wrong, Execution::Serial),
            Err(GalaxyError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_user_action_finder() {
        let finder = UserActionFinder::new(|p: &Batch| {
            let m = p.rows();
            let mut out = vec![0.0; 3 * m];
            for i in 0..m {
                out[i] = p.get(i, 0).abs();
                out[2 * m + i] = p.get(i, 3);
            }
            out
        });
        assert_eq!(finder.execution(), Execution::Serial);
        let actions = finder
            .actions_at(&Batch::from_rows(&[[-2.0, 0.0, 0.0, 0.5, 0.0, 0.0]]), Execution::Serial)
            .unwrap();
        assert_eq!(actions.row::<3>(0), [2.0, 0.0, 0.5]);
    }
}
