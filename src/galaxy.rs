//! Velocity-space moments of a distribution function in a potential.
//!
//! [`GalaxyModel::moments`] integrates `f(J(x, v))` over the ball of bound
//! velocities at a point, in spherical velocity coordinates
//! `(|v|, θ, φ) ∈ [0, v_esc] × [0, π] × [0, 2π]` with the Jacobian
//! `|v|² sin θ` folded into the integrand. One integration yields the
//! density together with the radial and tangential second moments.

use std::fmt;
use std::sync::OnceLock;

use crate::actions::{ActionFinder, SphericalActionFinder};
use crate::batch::{Batch, Point3};
use crate::cubature::{Cubature, IntegrationStatus, Region, Tolerances};
use crate::df::DistributionFunction;
use crate::error::{GalaxyError, GalaxyResult};
use crate::field::{Execution, VectorField};
use crate::potential::Potential;

/// Densities below this give NaN velocity dispersions
pub const DEFAULT_MIN_DENSITY: f64 = 1e-300;

/// Velocity dispersions as second moments per unit density, `<v_i²>`.
///
/// These are squared velocities; take the square root for the
/// one-dimensional spread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dispersion {
    /// `<v_r²>` along the position vector
    pub radial: f64,
    /// `<v_t²> / 2`, one tangential direction (the mean of the two)
    pub tangential: f64,
}

/// Output of [`GalaxyModel::moments`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    /// Zeroth moment
    pub density: f64,
    /// Second moments per unit density, NaN if the density is below the model's
    /// `min_density`
    pub dispersion: Dispersion,
    /// Error estimate of the density
    pub error: f64,
    /// Phase-space points evaluated
    pub evaluations: u64,
    /// Whether the tolerance was met
    pub status: IntegrationStatus,
}

/// A distribution function paired with the potential it lives in.
///
/// The model only borrows its parts. Unless a custom finder is supplied,
/// actions come from a [`SphericalActionFinder`] bound to the potential,
/// created on the first call to [`moments`](Self::moments).
pub struct GalaxyModel<'a> {
    potential: &'a Potential,
    df: &'a DistributionFunction,
    custom_finder: Option<&'a dyn ActionFinder>,
    default_finder: OnceLock<SphericalActionFinder<'a>>,
    min_density: f64,
}

impl fmt::Debug for GalaxyModel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GalaxyModel")
            .field("potential", self.potential)
            .field("df", self.df)
            .field("custom_finder", &self.custom_finder.is_some())
            .field("min_density", &self.min_density)
            .finish()
    }
}

impl<'a> GalaxyModel<'a> {
    /// Pair a DF with a potential.
    pub fn new(potential: &'a Potential, df: &'a DistributionFunction) -> Self {
        Self {
            potential,
            df,
            custom_finder: None,
            default_finder: OnceLock::new(),
            min_density: DEFAULT_MIN_DENSITY,
        }
    }

    /// Use `finder` instead of the spherical finder.
    pub fn with_action_finder(mut self, finder: &'a dyn ActionFinder) -> Self {
        self.custom_finder = Some(finder);
        self
    }

    /// Set the density below which dispersions are reported as NaN.
    pub fn with_min_density(mut self, min_density: f64) -> Self {
        self.min_density = min_density;
        self
    }

    /// Density threshold for dispersions
    pub fn min_density(&self) -> f64 {
        self.min_density
    }

    /// The potential
    pub fn potential(&self) -> &'a Potential {
        self.potential
    }

    /// The distribution function
    pub fn df(&self) -> &'a DistributionFunction {
        self.df
    }

    fn finder(&self) -> &dyn ActionFinder {
        match self.custom_finder {
            Some(finder) => finder,
            None => self
                .default_finder
                .get_or_init(|| SphericalActionFinder::new(self.potential)),
        }
    }

    /// Density and velocity dispersions at `point` to relative accuracy
    /// `tolerance`.
    ///
    /// # Returns
    /// * `Ok(moments)` - possibly with [`IntegrationStatus::ToleranceNotMet`]
    /// * `Err(GalaxyError::Domain)` - the point is unbound (`Φ >= 0`)
    /// * `Err(GalaxyError::InvalidInput)` - non-finite point or bad tolerance
    /// * `Err(GalaxyError::NumericalFailure)` - the integrand stayed non-finite
    pub fn moments(&self, point: Point3, tolerance: f64) -> GalaxyResult<Moments> {
        if point.iter().any(|x| !x.is_finite()) {
            return Err(GalaxyError::InvalidInput(format!("point {:?} is not finite", point)));
        }
        let phi = self.potential.value(point);
        if !phi.is_finite() || phi >= 0.0 {
            return Err(GalaxyError::Domain(format!(
                "point {:?} is not bound (potential {})",
                point, phi
            )));
        }
        let v_escape = (-2.0 * phi).sqrt();

        let finder = self.finder();
        let execution = self.df.execution().and(finder.execution());
        let integrand = VelocityMoments {
            point,
            finder,
            df: self.df,
            execution,
        };
        let region = Region::new(
            &[0.0, 0.0, 0.0],
            &[v_escape, std::f64::consts::PI, 2.0 * std::f64::consts::PI],
        )?;
        let result = Cubature::new(Tolerances::relative(tolerance))
            .with_execution(execution)
            .integrate(&integrand, &region)?;

        let density = result.value[0];
        let dispersion = if density >= self.min_density {
            Dispersion {
                radial: result.value[1] / density,
                tangential: result.value[2] / density,
            }
        } else {
            Dispersion {
                radial: f64::NAN,
                tangential: f64::NAN,
            }
        };
        Ok(Moments {
            density,
            dispersion,
            error: result.error[0],
            evaluations: result.evaluations,
            status: result.status,
        })
    }
}

/// Integrand over `(|v|, θ, φ)` returning `f J`, `f J v_r²` and
/// `f J v_t² / 2` with `J = |v|² sin θ`.
struct VelocityMoments<'m> {
    point: Point3,
    finder: &'m dyn ActionFinder,
    df: &'m DistributionFunction,
    execution: Execution,
}

impl VectorField for VelocityMoments<'_> {
    fn ndim(&self) -> usize {
        3
    }

    fn nvalues(&self) -> usize {
        3
    }

    fn execution(&self) -> Execution {
        self.execution
    }

    fn eval_batch(&self, points: &Batch, values: &mut Batch) {
        let m = points.rows();
        let [x, y, z] = self.point;
        let r = (x * x + y * y + z * z).sqrt();

        let mut phase = Batch::zeros(m, 6);
        let mut jacobian = vec![0.0; m];
        let mut v_r2 = vec![0.0; m];
        let mut v_t2 = vec![0.0; m];
        for i in 0..m {
            let (speed, theta, azimuth) = (points.get(i, 0), points.get(i, 1), points.get(i, 2));
            let (sin_t, cos_t) = theta.sin_cos();
            let (sin_p, cos_p) = azimuth.sin_cos();
            let v = [speed * sin_t * cos_p, speed * sin_t * sin_p, speed * cos_t];
            for (j, c) in [x, y, z].into_iter().chain(v).enumerate() {
                phase.set(i, j, c);
            }
            let v2 = speed * speed;
            jacobian[i] = v2 * sin_t;
            if r > 0.0 {
                let vr = (x * v[0] + y * v[1] + z * v[2]) / r;
                v_r2[i] = vr * vr;
                v_t2[i] = (v2 - vr * vr).max(0.0);
            } else {
                v_r2[i] = v2 / 3.0;
                v_t2[i] = 2.0 * v2 / 3.0;
            }
        }

        let actions = match self.finder.actions_at(&phase, self.execution) {
            Ok(actions) => actions,
            Err(e) => {
                log::error!("action computation failed for {} velocities: {}", m, e);
                values.fill(f64::NAN);
                return;
            }
        };
        let mut f = Batch::zeros(m, 1);
        self.df.eval_batch(&actions, &mut f);

        for (i, &fi) in f.column(0).iter().enumerate() {
            let weight = fi * jacobian[i];
            values.set(i, 0, weight);
            values.set(i, 1, weight * v_r2[i]);
            values.set(i, 2, 0.5 * weight * v_t2[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::actions::UserActionFinder;
    use crate::cubature::integrate_ndim;
    use crate::df::{DoublePowerLaw, UserDf};
    use crate::field::FnField;
    use crate::potential::AnalyticPotential;

    fn constant_df(value: f64) -> DistributionFunction {
        UserDf::new(move |j: &Batch| vec![value; j.rows()]).into()
    }

    #[test]
    fn test_constant_df_moments() {
        // f = 1 inside the escape sphere: ρ = 4π/3 v³, <v_i²> = v² / 5 per axis
        let potential: Potential = AnalyticPotential::plummer(1.0, 1.0).unwrap().into();
        let df = constant_df(1.0);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, b) = (in_flight.clone(), peak.clone());
        let finder = UserActionFinder::new(move |p: &Batch| {
            let now = a.fetch_add(1, Ordering::SeqCst) + 1;
            b.fetch_max(now, Ordering::SeqCst);
            a.fetch_sub(1, Ordering::SeqCst);
            vec![0.0; 3 * p.rows()]
        });
        let model = GalaxyModel::new(&potential, &df).with_action_finder(&finder);

        for point in [[1.0, 0.0, 0.0], [0.3, -0.4, 1.2], [0.0, 0.0, 0.0]] {
            let moments = model.moments(point, 1e-8).unwrap();
            let v_esc2 = -2.0 * potential.value(point);
            let density = 4.0 * PI / 3.0 * v_esc2.powf(1.5);
            let second = v_esc2 / 5.0;
            assert_eq!(moments.status, IntegrationStatus::Converged);
            assert!((moments.density - density).abs() < 1e-7 * density, "{:?}", moments);
            assert!(
                (moments.dispersion.radial - second).abs() < 1e-7 * second,
                "radial {} vs {}",
                moments.dispersion.radial,
                second
            );
            assert!((moments.dispersion.tangential - second).abs() < 1e-7 * second);
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_moments_match_direct_velocity_integral() {
        let potential: Potential = AnalyticPotential::isochrone(1.0, 1.0).unwrap().into();
        let df: DistributionFunction = DoublePowerLaw::new(1.0, 0.0, 5.0, 1.0).unwrap().into();
        let model = GalaxyModel::new(&potential, &df);
        let point = [0.0, 0.0, 1.0];
        let moments = model.moments(point, 1e-8).unwrap();

        let finder = SphericalActionFinder::new(&potential);
        let integrand = FnField::with_values(3, 3, |p: &Batch, out: &mut Batch| {
            for i in 0..p.rows() {
                let (speed, theta, azimuth) = (p.get(i, 0), p.get(i, 1), p.get(i, 2));
                let v = [
                    speed * theta.sin() * azimuth.cos(),
                    speed * theta.sin() * azimuth.sin(),
                    speed * theta.cos(),
                ];
                let f = finder.actions(point, v).map_or(f64::NAN, |j| df.value(j));
                let weight = f * speed * speed * theta.sin();
                // the point is on the z axis, so v_r = v_z
                let v_t2 = v[0] * v[0] + v[1] * v[1];
                out.set(i, 0, weight);
                out.set(i, 1, weight * v[2] * v[2]);
                out.set(i, 2, weight * 0.5 * v_t2);
            }
        });
        let v_esc = (-2.0 * potential.value(point)).sqrt();
        let direct = integrate_ndim(&integrand, &[0.0, 0.0, 0.0], &[v_esc, PI, 2.0 * PI], 1e-8).unwrap();

        assert!(
            (moments.density - direct.scalar()).abs() < 1e-6 * direct.scalar(),
            "moments {} vs direct {}",
            moments.density,
            direct.scalar()
        );
        let radial = direct.value[1] / direct.value[0];
        let tangential = direct.value[2] / direct.value[0];
        assert!(
            (moments.dispersion.radial - radial).abs() < 1e-6 * radial,
            "radial {} vs direct {}",
            moments.dispersion.radial,
            radial
        );
        assert!(
            (moments.dispersion.tangential - tangential).abs() < 1e-6 * tangential,
            "tangential {} vs direct {}",
            moments.dispersion.tangential,
            tangential
        );
        // <v²> stays below v_esc²
        assert!(moments.dispersion.radial + 2.0 * moments.dispersion.tangential < v_esc * v_esc);
    }

    #[test]
    fn test_unbound_and_invalid_points() {
        let potential: Potential = AnalyticPotential::plummer(1.0, 1.0).unwrap().into();
        let df = constant_df(1.0);
        let model = GalaxyModel::new(&potential, &df);
        assert!(matches!(model.moments([1e200, 0.0, 0.0], 1e-6), Err(GalaxyError::Domain(_))));
        assert!(matches!(
            model.moments([f64::NAN, 0.0, 0.0], 1e-6),
            Err(GalaxyError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_empty_df_gives_nan_dispersion() {
        let potential: Potential = AnalyticPotential::plummer(1.0, 1.0).unwrap().into();
        let df = constant_df(0.0);
        let finder = UserActionFinder::new(|p: &Batch| vec![0.0; 3 * p.rows()]);
        let model = GalaxyModel::new(&potential, &df)
            .with_action_finder(&finder)
            .with_min_density(1e-12);
        let moments = model.moments([0.5, 0.0, 0.0], 1e-6).unwrap();
        assert_eq!(moments.density, 0.0);
        assert!(moments.dispersion.radial.is_nan());
        assert!(moments.dispersion.tangential.is_nan());
    }
}
