//! Closed-form spherical potential-density pairs (G = 1).

use std::f64::consts::PI;

use crate::error::{GalaxyError, GalaxyResult};

/// A spherical model with closed-form potential and density.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnalyticPotential {
    /// Plummer sphere: `Φ = -M / sqrt(r² + a²)`
    Plummer {
        /// Total mass
        mass: f64,
        /// Scale radius `a`
        scale_radius: f64,
    },
    /// Hénon's isochrone: `Φ = -M / (b + sqrt(r² + b²))`
    Isochrone {
        /// Total mass
        mass: f64,
        /// Scale radius `b`
        scale_radius: f64,
    },
    /// Dehnen (1993) family with inner density slope `gamma` in [0, 2].
    /// `gamma = 1` is the Hernquist model, `gamma = 2` the Jaffe model.
    Dehnen {
        /// Total mass
        mass: f64,
        /// Scale radius `a`
        scale_radius: f64,
        /// Inner density slope
        gamma: f64,
    },
    /// Navarro-Frenk-White halo: `Φ = -M ln(1 + r/a) / r`. The mass
    /// parameter is the normalisation; the total mass diverges.
    Nfw {
        /// Mass normalisation
        mass: f64,
        /// Scale radius `a`
        scale_radius: f64,
    },
}

fn check_scale(mass: f64, scale_radius: f64) -> GalaxyResult<()> {
    if !mass.is_finite() {
        return Err(GalaxyError::Configuration(format!("mass must be finite, got {}", mass)));
    }
    if !(scale_radius > 0.0) || !scale_radius.is_finite() {
        return Err(GalaxyError::Configuration(format!(
            "scale radius must be positive, got {}",
            scale_radius
        )));
    }
    Ok(())
}

impl AnalyticPotential {
    /// Plummer model
    pub fn plummer(mass: f64, scale_radius: f64) -> GalaxyResult<Self> {
        check_scale(mass, scale_radius)?;
        Ok(Self::Plummer { mass, scale_radius })
    }

    /// Isochrone model
    pub fn isochrone(mass: f64, scale_radius: f64) -> GalaxyResult<Self> {
        check_scale(mass, scale_radius)?;
        Ok(Self::Isochrone { mass, scale_radius })
    }

    /// Dehnen model with `0 <= gamma <= 2`
    pub fn dehnen(mass: f64, scale_radius: f64, gamma: f64) -> GalaxyResult<Self> {
        check_scale(mass, scale_radius)?;
        if !(0.0..=2.0).contains(&gamma) {
            return Err(GalaxyError::Configuration(format!(
                "Dehnen inner slope gamma must lie in [0, 2], got {}",
                gamma
            )));
        }
        Ok(Self::Dehnen {
            mass,
            scale_radius,
            gamma,
        })
    }

    /// NFW halo
    pub fn nfw(mass: f64, scale_radius: f64) -> GalaxyResult<Self> {
        check_scale(mass, scale_radius)?;
        Ok(Self::Nfw { mass, scale_radius })
    }

    /// Potential at spherical radius `r`
    pub fn value(&self, r: f64) -> f64 {
        match *self {
            Self::Plummer { mass, scale_radius: a } => -mass / (r * r + a * a).sqrt(),
            Self::Isochrone { mass, scale_radius: b } => -mass / (b + (r * r + b * b).sqrt()),
            Self::Dehnen {
                mass,
                scale_radius: a,
                gamma,
            } => {
                if gamma == 2.0 {
                    mass / a * (r / (r + a)).ln()
                } else {
                    mass / a * (1.0 - (r / (r + a)).powf(2.0 - gamma)) / (gamma - 2.0)
                }
            }
            Self::Nfw { mass, scale_radius: a } => {
                let x = r / a;
                if x < 1e-8 {
                    -mass / a * (1.0 - 0.5 * x)
                } else {
                    -mass / r * x.ln_1p()
                }
            }
        }
    }

    /// Density at spherical radius `r`
    pub fn density(&self, r: f64) -> f64 {
        match *self {
            Self::Plummer { mass, scale_radius: a } => {
                3.0 * mass * a * a / (4.0 * PI) * (r * r + a * a).powf(-2.5)
            }
            Self::Isochrone { mass, scale_radius: b } => {
                let s = (r * r + b * b).sqrt();
                mass * (3.0 * (b + s) * s * s - r * r * (b + 3.0 * s))
                    / (4.0 * PI * (b + s).powi(3) * s.powi(3))
            }
            Self::Dehnen {
                mass,
                scale_radius: a,
                gamma,
            } => mass * a * (3.0 - gamma) / (4.0 * PI) * r.powf(-gamma) * (r + a).powf(gamma - 4.0),
            Self::Nfw { mass, scale_radius: a } => {
                let x = r / a;
                mass / (4.0 * PI * a * a * a) / (x * (1.0 + x) * (1.0 + x))
            }
        }
    }

    /// Total mass (infinite for NFW)
    pub fn total_mass(&self) -> f64 {
        match *self {
            Self::Plummer { mass, .. } | Self::Isochrone { mass, .. } | Self::Dehnen { mass, .. } => mass,
            Self::Nfw { .. } => f64::INFINITY,
        }
    }

    /// Model name as used in configuration
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plummer { .. } => "Plummer",
            Self::Isochrone { .. } => "Isochrone",
            Self::Dehnen { .. } => "Dehnen",
            Self::Nfw { .. } => "NFW",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Enclosed mass from the density by the trapezoid rule in ln r.
    fn enclosed(model: &AnalyticPotential, r: f64) -> f64 {
        let n = 20000;
        let (x0, x1) = ((1e-6f64).ln(), r.ln());
        let h = (x1 - x0) / n as f64;
        (0..=n)
            .map(|i| {
                let s = (x0 + i as f64 * h).exp();
                let w = if i == 0 || i == n { 0.5 } else { 1.0 };
                w * 4.0 * PI * s * s * s * model.density(s)
            })
            .sum::<f64>()
            * h
    }

    #[test]
    fn test_central_values() {
        let plummer = AnalyticPotential::plummer(3.0, 1.5).unwrap();
        assert!((plummer.value(0.0) + 2.0).abs() < 1e-15);

        let hernquist = AnalyticPotential::dehnen(1.0, 2.0, 1.0).unwrap();
        assert!((hernquist.value(0.0) + 0.5).abs() < 1e-15);
        assert!((hernquist.value(3.0) + 1.0 / 5.0).abs() < 1e-15);

        let nfw = AnalyticPotential::nfw(1.0, 2.0).unwrap();
        assert!((nfw.value(0.0) + 0.5).abs() < 1e-15);
        assert!((nfw.value(1e-9) - nfw.value(0.0)).abs() < 1e-9);
    }

    #[test]
    fn test_densities_match_enclosed_mass() {
        // Gauss's law: -r² dΦ/dr evaluated numerically vs ∫ 4π r² ρ dr
        let models = [
            AnalyticPotential::plummer(3.0, 1.5).unwrap(),
            AnalyticPotential::isochrone(1.0, 1.0).unwrap(),
            AnalyticPotential::dehnen(2.0, 1.0, 0.5).unwrap(),
            AnalyticPotential::dehnen(1.0, 1.0, 1.0).unwrap(),
            AnalyticPotential::nfw(1.0, 1.0).unwrap(),
        ];
        for model in &models {
            let r: f64 = 1.7;
            let h = 1e-5;
            let grad = (model.value(r + h) - model.value(r - h)) / (2.0 * h);
            let m_enc = enclosed(model, r);
            assert!(
                (r * r * grad - m_enc).abs() < 1e-5 * m_enc,
                "{}: r²Φ' = {}, M(<r) = {}",
                model.name(),
                r * r * grad,
                m_enc
            );
        }
    }

    #[test]
    fn test_potential_vanishes_at_infinity() {
        let models = [
            AnalyticPotential::plummer(1.0, 1.0).unwrap(),
            AnalyticPotential::isochrone(1.0, 1.0).unwrap(),
            AnalyticPotential::dehnen(1.0, 1.0, 2.0).unwrap(),
        ];
        for model in &models {
            let far = model.value(1e8);
            assert!(far < 0.0 && far > -1.1e-8, "{}: {}", model.name(), far);
        }
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            AnalyticPotential::plummer(1.0, 0.0),
            Err(GalaxyError::Configuration(_))
        ));
        assert!(matches!(
            AnalyticPotential::dehnen(1.0, 1.0, 2.5),
            Err(GalaxyError::Configuration(_))
        ));
        assert!(matches!(
            AnalyticPotential::nfw(f64::NAN, 1.0),
            Err(GalaxyError::Configuration(_))
        ));
    }
}
