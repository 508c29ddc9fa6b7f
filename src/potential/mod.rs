//! Gravitational potential models.
//!
//! A [`Potential`] is either a closed-form spherical model
//! ([`AnalyticPotential`]) or a [`Multipole`] expansion built once from an
//! arbitrary density field. Both are immutable after construction and are
//! evaluated in parallel over the points of a batch.

mod analytic;
mod harmonics;
mod multipole;
mod spline;

pub use analytic::AnalyticPotential;
pub use multipole::{Multipole, MultipoleParams};

use rayon::prelude::*;

use crate::batch::{Batch, Point3};
use crate::config::{PotentialConfig, PotentialKind};
use crate::error::{GalaxyError, GalaxyResult};
use crate::field::VectorField;

/// A gravitational potential-density pair.
#[derive(Debug, Clone)]
pub enum Potential {
    /// Closed-form spherical model
    Analytic(AnalyticPotential),
    /// Multipole expansion of a density
    Multipole(Box<Multipole>),
}

impl From<AnalyticPotential> for Potential {
    fn from(model: AnalyticPotential) -> Self {
        Potential::Analytic(model)
    }
}

impl From<Multipole> for Potential {
    fn from(model: Multipole) -> Self {
        Potential::Multipole(Box::new(model))
    }
}

impl Potential {
    /// Build a multipole expansion of `density`.
    pub fn multipole<F: VectorField + ?Sized>(density: &F, params: MultipoleParams) -> GalaxyResult<Self> {
        Ok(Multipole::from_density(density, params)?.into())
    }

    /// Construct from a configuration, with an optional external density
    /// for the `Multipole` type.
    ///
    /// All parameters are checked here; a model that is returned is ready
    /// to use.
    pub fn from_config(config: &PotentialConfig, density: Option<&dyn VectorField>) -> GalaxyResult<Self> {
        let kind = config.validate()?;
        match (kind, density) {
            (PotentialKind::Multipole, Some(density)) => {
                Self::multipole(density, config.multipole_params())
            }
            (PotentialKind::Multipole, None) => Err(GalaxyError::Configuration(
                "type Multipole requires a density".to_string(),
            )),
            (_, Some(_)) => Err(GalaxyError::Configuration(format!(
                "a density can only be supplied with type Multipole, not {}",
                config.kind
            ))),
            (kind, None) => Ok(analytic_model(kind, config)?.into()),
        }
    }

    /// Potential at a point
    pub fn value(&self, point: Point3) -> f64 {
        match self {
            Potential::Analytic(model) => model.value(radius(point)),
            Potential::Multipole(model) => model.value(point),
        }
    }

    /// Density at a point
    pub fn density(&self, point: Point3) -> f64 {
        match self {
            Potential::Analytic(model) => model.density(radius(point)),
            Potential::Multipole(model) => model.density(point),
        }
    }

    /// Spherically averaged potential at radius `r`
    pub fn radial_potential(&self, r: f64) -> f64 {
        match self {
            Potential::Analytic(model) => model.value(r),
            Potential::Multipole(model) => model.radial_potential(r),
        }
    }

    /// Total mass of the model
    pub fn total_mass(&self) -> f64 {
        match self {
            Potential::Analytic(model) => model.total_mass(),
            Potential::Multipole(model) => model.total_mass(),
        }
    }

    /// Potential at every point of an M x 3 batch.
    pub fn potential_at(&self, points: &Batch) -> GalaxyResult<Vec<f64>> {
        points.expect_cols(3, "potential evaluation")?;
        Ok((0..points.rows())
            .into_par_iter()
            .map(|i| self.value(points.row::<3>(i)))
            .collect())
    }

    /// Density at every point of an M x 3 batch.
    pub fn density_at(&self, points: &Batch) -> GalaxyResult<Vec<f64>> {
        points.expect_cols(3, "density evaluation")?;
        Ok((0..points.rows())
            .into_par_iter()
            .map(|i| self.density(points.row::<3>(i)))
            .collect())
    }

    /// The density of this model as a thread-safe field, e.g. to build a
    /// multipole expansion of an analytic model.
    pub fn density_field(&self) -> DensityField<'_> {
        DensityField { potential: self }
    }
}

/// Density of a [`Potential`] viewed as a [`VectorField`] of three inputs.
#[derive(Debug, Clone, Copy)]
pub struct DensityField<'a> {
    potential: &'a Potential,
}

impl VectorField for DensityField<'_> {
    fn ndim(&self) -> usize {
        3
    }

    fn eval_batch(&self, points: &Batch, values: &mut Batch) {
        for (i, v) in values.column_mut(0).iter_mut().enumerate() {
            *v = self.potential.density(points.row::<3>(i));
        }
    }
}

fn analytic_model(kind: PotentialKind, config: &PotentialConfig) -> GalaxyResult<AnalyticPotential> {
    let mass = config.required_mass()?;
    let scale = config.required_scale_radius()?;
    match kind {
        PotentialKind::Plummer => AnalyticPotential::plummer(mass, scale),
        PotentialKind::Isochrone => AnalyticPotential::isochrone(mass, scale),
        PotentialKind::Dehnen => AnalyticPotential::dehnen(mass, scale, config.gamma.unwrap_or(1.0)),
        PotentialKind::Hernquist => AnalyticPotential::dehnen(mass, scale, 1.0),
        PotentialKind::Jaffe => AnalyticPotential::dehnen(mass, scale, 2.0),
        PotentialKind::Nfw => AnalyticPotential::nfw(mass, scale),
        PotentialKind::Multipole => Err(GalaxyError::Configuration(
            "type Multipole is not a closed-form model".to_string(),
        )),
    }
}

fn radius(p: Point3) -> f64 {
    (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt()
}
