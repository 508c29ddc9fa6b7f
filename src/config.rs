//! Construction options for potentials and distribution functions.
//!
//! Both structs deserialise from JSON with camelCase keys; the model is
//! selected by `"type"`. Lower-case spellings such as `scaleradius` are
//! accepted as aliases. Validation happens when a model is constructed
//! from the config, so a bad option is reported before any work is done.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GalaxyError, GalaxyResult};
use crate::potential::MultipoleParams;

/// Potential model selected by [`PotentialConfig::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PotentialKind {
    /// Plummer sphere
    Plummer,
    /// Isochrone
    Isochrone,
    /// Dehnen model with configurable `gamma`
    Dehnen,
    /// Dehnen model with `gamma = 1`
    Hernquist,
    /// Dehnen model with `gamma = 2`
    Jaffe,
    /// Navarro-Frenk-White halo
    Nfw,
    /// Multipole expansion of a supplied density
    Multipole,
}

impl FromStr for PotentialKind {
    type Err = GalaxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plummer" => Ok(Self::Plummer),
            "isochrone" => Ok(Self::Isochrone),
            "dehnen" => Ok(Self::Dehnen),
            "hernquist" => Ok(Self::Hernquist),
            "jaffe" => Ok(Self::Jaffe),
            "nfw" => Ok(Self::Nfw),
            "multipole" => Ok(Self::Multipole),
            _ => Err(GalaxyError::Configuration(format!("unknown potential type '{}'", s))),
        }
    }
}

/// Options of a [`Potential`](crate::Potential).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PotentialConfig {
    /// Model type, e.g. `"Plummer"` or `"Multipole"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Total mass (normalisation for NFW)
    #[serde(default)]
    pub mass: Option<f64>,
    /// Scale radius
    #[serde(default, alias = "scaleradius")]
    pub scale_radius: Option<f64>,
    /// Inner slope of the Dehnen model (default 1)
    #[serde(default)]
    pub gamma: Option<f64>,
    /// Highest harmonic order of a multipole expansion
    #[serde(default)]
    pub lmax: Option<usize>,
    /// Number of radial nodes of a multipole expansion
    #[serde(default, alias = "gridsizer")]
    pub grid_size_r: Option<usize>,
    /// Innermost radial node
    #[serde(default, alias = "rmin")]
    pub r_min: Option<f64>,
    /// Outermost radial node
    #[serde(default, alias = "rmax")]
    pub r_max: Option<f64>,
}

impl PotentialConfig {
    /// An empty config of the given type.
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            mass: None,
            scale_radius: None,
            gamma: None,
            lmax: None,
            grid_size_r: None,
            r_min: None,
            r_max: None,
        }
    }

    /// Closed-form model with mass and scale radius.
    pub fn analytic(kind: &str, mass: f64, scale_radius: f64) -> Self {
        Self {
            mass: Some(mass),
            scale_radius: Some(scale_radius),
            ..Self::new(kind)
        }
    }

    /// Check the options and resolve the model type.
    pub fn validate(&self) -> GalaxyResult<PotentialKind> {
        let kind: PotentialKind = self.kind.parse()?;
        if kind == PotentialKind::Multipole {
            self.multipole_params().validate()?;
        } else {
            self.required_mass()?;
            self.required_scale_radius()?;
        }
        if let Some(gamma) = self.gamma {
            if kind != PotentialKind::Dehnen {
                return Err(GalaxyError::Configuration(format!(
                    "gamma = {} is only meaningful for type Dehnen",
                    gamma
                )));
            }
        }
        Ok(kind)
    }

    /// Mass, which closed-form models require.
    pub fn required_mass(&self) -> GalaxyResult<f64> {
        self.mass.ok_or_else(|| {
            GalaxyError::Configuration(format!("type {} requires a mass", self.kind))
        })
    }

    /// Scale radius, which closed-form models require.
    pub fn required_scale_radius(&self) -> GalaxyResult<f64> {
        self.scale_radius.ok_or_else(|| {
            GalaxyError::Configuration(format!("type {} requires a scaleRadius", self.kind))
        })
    }

    /// Multipole settings, with defaults for anything not given.
    pub fn multipole_params(&self) -> MultipoleParams {
        let defaults = MultipoleParams::default();
        MultipoleParams {
            lmax: self.lmax.unwrap_or(defaults.lmax),
            grid_size: self.grid_size_r.unwrap_or(defaults.grid_size),
            r_min: self.r_min.unwrap_or(defaults.r_min),
            r_max: self.r_max.unwrap_or(defaults.r_max),
            tolerance: defaults.tolerance,
        }
    }

    /// Load from a JSON string.
    pub fn from_json(json: &str) -> GalaxyResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| GalaxyError::Configuration(format!("JSON parse error: {e}")))
    }
}

/// Distribution function selected by [`DfConfig::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfKind {
    /// Double-power-law DF in actions
    DoublePowerLaw,
    /// External callback
    User,
}

impl FromStr for DfKind {
    type Err = GalaxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "doublepowerlaw" => Ok(Self::DoublePowerLaw),
            "user" | "userfunction" => Ok(Self::User),
            _ => Err(GalaxyError::Configuration(format!(
                "unknown distribution function type '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for DfKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DfKind::DoublePowerLaw => write!(f, "DoublePowerLaw"),
            DfKind::User => write!(f, "User"),
        }
    }
}

/// Options of a [`DistributionFunction`](crate::DistributionFunction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DfConfig {
    /// Model type: `"DoublePowerLaw"` or `"User"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Action scale separating the inner and outer power laws
    #[serde(default, rename = "J0", alias = "j0")]
    pub j0: Option<f64>,
    /// Inner slope (must be < 3)
    #[serde(default, alias = "slopein")]
    pub slope_in: Option<f64>,
    /// Outer slope (must be > 3)
    #[serde(default, alias = "slopeout")]
    pub slope_out: Option<f64>,
    /// Overall normalisation (default 1)
    #[serde(default)]
    pub norm: Option<f64>,
    /// Weight of Jr in the inner action combination (default 1)
    #[serde(default, alias = "coefjrin")]
    pub coef_jr_in: Option<f64>,
    /// Weight of Jz in the inner action combination (default 1)
    #[serde(default, alias = "coefjzin")]
    pub coef_jz_in: Option<f64>,
    /// Weight of Jr in the outer action combination (default 1)
    #[serde(default, alias = "coefjrout")]
    pub coef_jr_out: Option<f64>,
    /// Weight of Jz in the outer action combination (default 1)
    #[serde(default, alias = "coefjzout")]
    pub coef_jz_out: Option<f64>,
    /// Action scale used to map action space onto the unit cube when
    /// computing the mass of a user DF (default 1)
    #[serde(default, alias = "actionscale")]
    pub action_scale: Option<f64>,
}

impl DfConfig {
    /// An empty config of the given type.
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            j0: None,
            slope_in: None,
            slope_out: None,
            norm: None,
            coef_jr_in: None,
            coef_jz_in: None,
            coef_jr_out: None,
            coef_jz_out: None,
            action_scale: None,
        }
    }

    /// Double-power-law DF with the required parameters.
    pub fn double_power_law(j0: f64, slope_in: f64, slope_out: f64, norm: f64) -> Self {
        Self {
            j0: Some(j0),
            slope_in: Some(slope_in),
            slope_out: Some(slope_out),
            norm: Some(norm),
            ..Self::new("DoublePowerLaw")
        }
    }

    /// Resolve the model type.
    pub fn resolve_kind(&self) -> GalaxyResult<DfKind> {
        self.kind.parse()
    }

    /// Load from a JSON string.
    pub fn from_json(json: &str) -> GalaxyResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| GalaxyError::Configuration(format!("JSON parse error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_potential_config_aliases() {
        let a = PotentialConfig::from_json(r#"{"type": "Dehnen", "mass": 2, "scaleRadius": 0.5, "gamma": 1.5}"#).unwrap();
        let b = PotentialConfig::from_json(r#"{"type": "dehnen", "mass": 2, "scaleradius": 0.5, "gamma": 1.5}"#).unwrap();
        assert_eq!(a.scale_radius, b.scale_radius);
        assert_eq!(a.validate().unwrap(), PotentialKind::Dehnen);
        assert_eq!(b.validate().unwrap(), PotentialKind::Dehnen);
    }

    #[test]
    fn test_potential_config_errors() {
        assert!(PotentialConfig::from_json(r#"{"mass": 1}"#).is_err());
        assert!(matches!(
            PotentialConfig::analytic("Kepler", 1.0, 1.0).validate(),
            Err(GalaxyError::Configuration(_))
        ));
        assert!(matches!(
            PotentialConfig::new("Plummer").validate(),
            Err(GalaxyError::Configuration(_))
        ));
        let mut gamma_on_plummer = PotentialConfig::analytic("Plummer", 1.0, 1.0);
        gamma_on_plummer.gamma = Some(1.0);
        assert!(gamma_on_plummer.validate().is_err());
    }

    #[test]
    fn test_multipole_params_from_config() {
        let config = PotentialConfig::from_json(r#"{"type": "Multipole", "lmax": 2, "gridSizeR": 50, "rmax": 100}"#).unwrap();
        let params = config.multipole_params();
        assert_eq!(params.lmax, 2);
        assert_eq!(params.grid_size, 50);
        assert_eq!(params.r_max, 100.0);
        assert_eq!(params.r_min, MultipoleParams::default().r_min);
        assert_eq!(config.validate().unwrap(), PotentialKind::Multipole);
    }

    #[test]
    fn test_df_config() {
        let config = DfConfig::from_json(r#"{"type": "DoublePowerLaw", "J0": 2.0, "slopeIn": 0, "slopeOut": 5, "norm": 3.5}"#).unwrap();
        assert_eq!(config, DfConfig::double_power_law(2.0, 0.0, 5.0, 3.5));
        assert_eq!(config.resolve_kind().unwrap(), DfKind::DoublePowerLaw);
        assert!(DfConfig::new("Isotropic").resolve_kind().is_err());
    }
}
