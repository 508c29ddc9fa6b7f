//! Distribution functions in action space.
//!
//! A [`DistributionFunction`] is either the closed-form [`DoublePowerLaw`]
//! or a [`UserDf`] wrapping an external batch callback. Both carry the
//! derived operations (total mass, action scale) so that a bare callback
//! and a usable model are never the same type.

use std::f64::consts::PI;

use crate::batch::{Action3, Batch};
use crate::config::{DfConfig, DfKind};
use crate::cubature::{Cubature, IntegrationResult, Region, Tolerances};
use crate::error::{GalaxyError, GalaxyResult};
use crate::field::{Execution, UserFunction, VectorField};

/// `(2π)³`, the phase-space volume factor of action-angle coordinates
const TWO_PI_CUBED: f64 = 8.0 * PI * PI * PI;

/// Double-power-law DF (Posti et al. 2015, Vasiliev 2019):
///
/// ```text
/// f(J) = norm / (2π J0)³ · (1 + J0 / h(J))^slope_in · (1 + g(J) / J0)^(-slope_out)
/// h(J) = a_r Jr + a_z Jz + (3 - a_r - a_z) |Jphi|    (inner coefficients)
/// g(J) = b_r Jr + b_z Jz + (3 - b_r - b_z) |Jphi|    (outer coefficients)
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoublePowerLaw {
    /// Action scale of the break between the two power laws
    pub j0: f64,
    /// Inner slope
    pub slope_in: f64,
    /// Outer slope
    pub slope_out: f64,
    /// Normalisation
    pub norm: f64,
    /// Inner Jr coefficient
    pub coef_jr_in: f64,
    /// Inner Jz coefficient
    pub coef_jz_in: f64,
    /// Outer Jr coefficient
    pub coef_jr_out: f64,
    /// Outer Jz coefficient
    pub coef_jz_out: f64,
}

impl DoublePowerLaw {
    /// Isotropic-in-action model (all combination coefficients 1).
    pub fn new(j0: f64, slope_in: f64, slope_out: f64, norm: f64) -> GalaxyResult<Self> {
        let df = Self {
            j0,
            slope_in,
            slope_out,
            norm,
            coef_jr_in: 1.0,
            coef_jz_in: 1.0,
            coef_jr_out: 1.0,
            coef_jz_out: 1.0,
        };
        df.validate()?;
        Ok(df)
    }

    /// Replace the action combination coefficients.
    pub fn with_coefficients(mut self, jr_in: f64, jz_in: f64, jr_out: f64, jz_out: f64) -> GalaxyResult<Self> {
        self.coef_jr_in = jr_in;
        self.coef_jz_in = jz_in;
        self.coef_jr_out = jr_out;
        self.coef_jz_out = jz_out;
        self.validate()?;
        Ok(self)
    }

    /// Check the parameters.
    pub fn validate(&self) -> GalaxyResult<()> {
        if !(self.j0 > 0.0) || !self.j0.is_finite() {
            return Err(GalaxyError::Configuration(format!("J0 must be positive, got {}", self.j0)));
        }
        if !(self.slope_out > 3.0) || !self.slope_out.is_finite() {
            return Err(GalaxyError::Configuration(format!(
                "slopeOut must exceed 3, got {}",
                self.slope_out
            )));
        }
        if !(self.slope_in < 3.0) || !self.slope_in.is_finite() {
            return Err(GalaxyError::Configuration(format!(
                "slopeIn must be below 3, got {}",
                self.slope_in
            )));
        }
        if !(self.norm > 0.0) || !self.norm.is_finite() {
            return Err(GalaxyError::Configuration(format!(
                "norm must be positive, got {}",
                self.norm
            )));
        }
        for (name, jr, jz) in [
            ("inner", self.coef_jr_in, self.coef_jz_in),
            ("outer", self.coef_jr_out, self.coef_jz_out),
        ] {
            if !(jr > 0.0 && jz > 0.0 && jr + jz < 3.0) {
                return Err(GalaxyError::Configuration(format!(
                    "{} action coefficients must be positive with sum below 3, got {} and {}",
                    name, jr, jz
                )));
            }
        }
        Ok(())
    }

    /// DF value at one action triple.
    ///
    /// Negative radial or vertical actions lie outside the support and give 0.
    pub fn value(&self, j: Action3) -> f64 {
        let [jr, jz, jphi] = j;
        if jr < 0.0 || jz < 0.0 {
            return 0.0;
        }
        let h = self.coef_jr_in * jr + self.coef_jz_in * jz + (3.0 - self.coef_jr_in - self.coef_jz_in) * jphi.abs();
        let g = self.coef_jr_out * jr
            + self.coef_jz_out * jz
            + (3.0 - self.coef_jr_out - self.coef_jz_out) * jphi.abs();
        let inner = if self.slope_in == 0.0 {
            1.0
        } else {
            (1.0 + self.j0 / h).powf(self.slope_in)
        };
        let outer = (1.0 + g / self.j0).powf(-self.slope_out);
        self.norm / (2.0 * PI * self.j0).powi(3) * inner * outer
    }
}

/// A DF given by an external batch callback of three actions.
#[derive(Debug, Clone)]
pub struct UserDf {
    callback: UserFunction,
    action_scale: f64,
}

impl UserDf {
    /// Wrap a callback taking an M x 3 batch `(Jr, Jz, Jphi)` and
    /// returning M values.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Batch) -> Vec<f64> + Send + Sync + 'static,
    {
        Self::from_function(UserFunction::new(3, callback))
    }

    /// Wrap an existing user function.
    pub fn from_function(callback: UserFunction) -> Self {
        Self {
            callback,
            action_scale: 1.0,
        }
    }

    /// Set the action scale used to map action space onto the unit cube.
    pub fn with_action_scale(mut self, scale: f64) -> GalaxyResult<Self> {
        if !(scale > 0.0) || !scale.is_finite() {
            return Err(GalaxyError::Configuration(format!(
                "action scale must be positive, got {}",
                scale
            )));
        }
        self.action_scale = scale;
        Ok(self)
    }
}

/// A distribution function `f(Jr, Jz, Jphi)`.
#[derive(Debug, Clone)]
pub enum DistributionFunction {
    /// Closed-form double power law
    Analytic(DoublePowerLaw),
    /// External callback
    User(UserDf),
}

impl From<DoublePowerLaw> for DistributionFunction {
    fn from(df: DoublePowerLaw) -> Self {
        DistributionFunction::Analytic(df)
    }
}

impl From<UserDf> for DistributionFunction {
    fn from(df: UserDf) -> Self {
        DistributionFunction::User(df)
    }
}

impl DistributionFunction {
    /// Construct from a configuration. A `User` type takes its callback
    /// from `user`; analytic types must not be given one.
    pub fn from_config(config: &DfConfig, user: Option<UserFunction>) -> GalaxyResult<Self> {
        let kind = config.resolve_kind()?;
        match (kind, user) {
            (DfKind::User, Some(callback)) => {
                if callback.ndim() != 3 || callback.nvalues() != 1 {
                    return Err(GalaxyError::Configuration(format!(
                        "user DF must map 3 actions to 1 value, got {} -> {}",
                        callback.ndim(),
                        callback.nvalues()
                    )));
                }
                let df = UserDf::from_function(callback).with_action_scale(config.action_scale.unwrap_or(1.0))?;
                Ok(df.into())
            }
            (DfKind::User, None) => Err(GalaxyError::Configuration(
                "type User requires a callback".to_string(),
            )),
            (kind, Some(_)) => Err(GalaxyError::Configuration(format!(
                "a callback cannot be combined with type {}",
                kind
            ))),
            (DfKind::DoublePowerLaw, None) => {
                let required = |value: Option<f64>, name: &str| {
                    value.ok_or_else(|| {
                        GalaxyError::Configuration(format!("DoublePowerLaw requires {}", name))
                    })
                };
                let df = DoublePowerLaw::new(
                    required(config.j0, "J0")?,
                    required(config.slope_in, "slopeIn")?,
                    required(config.slope_out, "slopeOut")?,
                    config.norm.unwrap_or(1.0),
                )?
                .with_coefficients(
                    config.coef_jr_in.unwrap_or(1.0),
                    config.coef_jz_in.unwrap_or(1.0),
                    config.coef_jr_out.unwrap_or(1.0),
                    config.coef_jz_out.unwrap_or(1.0),
                )?;
                Ok(df.into())
            }
        }
    }

    /// DF value at one action triple.
    pub fn value(&self, j: Action3) -> f64 {
        match self {
            DistributionFunction::Analytic(df) => df.value(j),
            DistributionFunction::User(_) => {
                let mut out = Batch::zeros(1, 1);
                self.eval_batch(&Batch::from_rows(&[j]), &mut out);
                out.get(0, 0)
            }
        }
    }

    /// DF values at every row of an M x 3 batch of actions.
    pub fn value_at(&self, actions: &Batch) -> GalaxyResult<Vec<f64>> {
        actions.expect_cols(3, "distribution function")?;
        let mut out = Batch::zeros(actions.rows(), 1);
        self.eval_batch(actions, &mut out);
        Ok(out.into_vec())
    }

    /// Action scale used to compactify action space: `J0` for the double
    /// power law, configurable for user DFs.
    pub fn action_scale(&self) -> f64 {
        match self {
            DistributionFunction::Analytic(df) => df.j0,
            DistributionFunction::User(df) => df.action_scale,
        }
    }

    /// Total mass `(2π)³ ∫ f(J) d³J` over `Jr, Jz >= 0` and both signs of
    /// `Jphi`, to relative accuracy `tolerance`.
    ///
    /// Action space is mapped onto the unit cube with
    /// `Jsum = scale · s / (1 - s)`, `Jr = Jsum u`, `Jz = Jsum (1 - u) w`,
    /// `|Jphi| = Jsum (1 - u)(1 - w)`.
    pub fn total_mass(&self, tolerance: f64) -> GalaxyResult<IntegrationResult> {
        let integrand = ActionSpaceMass {
            df: self,
            scale: self.action_scale(),
        };
        let region = Region::unit_cube(3)?;
        Cubature::new(Tolerances::relative(tolerance)).integrate(&integrand, &region)
    }
}

impl VectorField for DistributionFunction {
    fn ndim(&self) -> usize {
        3
    }

    fn execution(&self) -> Execution {
        match self {
            DistributionFunction::Analytic(_) => Execution::Parallel,
            DistributionFunction::User(_) => Execution::Serial,
        }
    }

    fn eval_batch(&self, points: &Batch, values: &mut Batch) {
        match self {
            DistributionFunction::Analytic(df) => {
                for (i, v) in values.column_mut(0).iter_mut().enumerate() {
                    *v = df.value(points.row::<3>(i));
                }
            }
            DistributionFunction::User(df) => df.callback.eval_batch(points, values),
        }
    }
}

/// Integrand of the total mass on the unit cube, evaluating both signs of
/// `Jphi` in one DF call.
struct ActionSpaceMass<'a> {
    df: &'a DistributionFunction,
    scale: f64,
}

impl VectorField for ActionSpaceMass<'_> {
    fn ndim(&self) -> usize {
        3
    }

    fn execution(&self) -> Execution {
        self.df.execution()
    }

    fn eval_batch(&self, points: &Batch, values: &mut Batch) {
        let m = points.rows();
        let mut actions = Batch::zeros(2 * m, 3);
        let mut jacobian = vec![0.0; m];
        for i in 0..m {
            let (s, u, w) = (points.get(i, 0), points.get(i, 1), points.get(i, 2));
            let jsum = self.scale * s / (1.0 - s);
            let (jr, jz, jphi) = (jsum * u, jsum * (1.0 - u) * w, jsum * (1.0 - u) * (1.0 - w));
            for (row, sign) in [(i, 1.0), (m + i, -1.0)] {
                actions.set(row, 0, jr);
                actions.set(row, 1, jz);
                actions.set(row, 2, sign * jphi);
            }
            jacobian[i] = jsum * jsum * (1.0 - u) * self.scale / ((1.0 - s) * (1.0 - s));
        }

        let mut f = Batch::zeros(2 * m, 1);
        self.df.eval_batch(&actions, &mut f);
        let f = f.column(0);
        for (i, v) in values.column_mut(0).iter_mut().enumerate() {
            *v = TWO_PI_CUBED * jacobian[i] * (f[i] + f[m + i]);
        }
    }
}
