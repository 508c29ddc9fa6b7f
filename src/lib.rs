//! # galaxy_df: action-based galaxy models
//!
//! Adaptive multidimensional cubature and the model layer built on it:
//! gravitational potentials, actions, distribution functions in action
//! space and their velocity moments.
//!
//! ## Features
//!
//! - Adaptive cubature over boxes of any dimension, with embedded
//!   Gauss-Kronrod (1-D) and Genz-Malik (D >= 2) rules and vector-valued
//!   integrands
//! - Batch evaluators ([`VectorField`]) tagged as thread-safe or serial;
//!   anything that reaches an external callback runs single-threaded with
//!   maximally coalesced batches
//! - Closed-form potentials (Plummer, isochrone, Dehnen, NFW) and multipole
//!   expansions of arbitrary densities
//! - Spherical action finder, double-power-law and user-supplied DFs
//! - Density and velocity dispersions (second moments per unit density) at
//!   any bound point
//!
//! ## Basic Usage
//!
//! ```rust
//! use galaxy_df::{integrate_ndim, Batch, UserFunction};
//!
//! // ∫ exp(-x² - y²) over [-5, 5]² = π
//! let gaussian = UserFunction::new(2, |p: &Batch| {
//!     (0..p.rows())
//!         .map(|i| (-p.get(i, 0).powi(2) - p.get(i, 1).powi(2)).exp())
//!         .collect()
//! });
//! let result = integrate_ndim(&gaussian, &[-5.0, -5.0], &[5.0, 5.0], 1e-8).unwrap();
//! assert!((result.scalar() - std::f64::consts::PI).abs() < 1e-7);
//! ```
//!
//! ## Galaxy Models
//!
//! ```rust,no_run
//! use galaxy_df::{
//!     DfConfig, DistributionFunction, GalaxyModel, Potential, PotentialConfig,
//! };
//!
//! let potential = Potential::from_config(&PotentialConfig::analytic("Plummer", 1.0, 1.0), None)?;
//! let df = DistributionFunction::from_config(
//!     &DfConfig::double_power_law(1.0, 0.0, 5.0, 1.0),
//!     None,
//! )?;
//! println!("DF mass = {}", df.total_mass(1e-6)?.scalar());
//!
//! let model = GalaxyModel::new(&potential, &df);
//! let moments = model.moments([1.0, 0.0, 0.0], 1e-4)?;
//! println!(
//!     "rho = {}, <v_r^2> = {}, <v_t^2> = {}",
//!     moments.density, moments.dispersion.radial, moments.dispersion.tangential
//! );
//! # Ok::<(), galaxy_df::GalaxyError>(())
//! ```
//!
//! ## Errors
//!
//! A missed tolerance is not an error: the result carries
//! [`IntegrationStatus::ToleranceNotMet`] and a warning is logged through
//! the `log` facade. Unbound points, malformed options and persistent
//! non-finite integrands are reported as [`GalaxyError`] variants.
//!
//! ## References
//!
//! 1. Genz, A.C. & Malik, A.A. (1980). "An adaptive algorithm for numerical
//!    integration over an N-dimensional rectangular region". J. Comput.
//!    Appl. Math. 6, 295.
//!
//! 2. Binney, J. & Tremaine, S. (2008). "Galactic Dynamics", 2nd ed.
//!    Princeton University Press.
//!
//! 3. Vasiliev, E. (2019). "AGAMA: action-based galaxy modelling
//!    architecture". MNRAS 482, 1525.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod actions;
pub mod batch;
pub mod coefficients;
pub mod config;
pub mod cubature;
pub mod df;
pub mod error;
pub mod field;
pub mod galaxy;
pub mod potential;
pub mod roots;

pub use actions::{ActionFinder, SphericalActionFinder, UserActionFinder};
pub use batch::{Action3, Batch, Point3, Velocity3};
pub use config::{DfConfig, DfKind, PotentialConfig, PotentialKind};
pub use cubature::{
    integrate_ndim, Cubature, FieldFamily, IntegrationResult, IntegrationStatus, Region, Stats,
    Tolerances,
};
pub use df::{DistributionFunction, DoublePowerLaw, UserDf};
pub use error::{GalaxyError, GalaxyResult};
pub use field::{BatchCallback, Execution, FnField, UserFunction, VectorField};
pub use galaxy::{Dispersion, GalaxyModel, Moments};
pub use potential::{AnalyticPotential, DensityField, Multipole, MultipoleParams, Potential};
pub use roots::{Bracket, BrentError, BrentSolver, Root};
