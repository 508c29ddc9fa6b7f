//! Multipole approximation of the potential of an arbitrary density.
//!
//! The density is projected onto real spherical harmonics `Y_lm` on a
//! logarithmic radial grid. For every harmonic the potential follows from
//! the two radial moments
//!
//! ```text
//! P_lm(r) = ∫_0^r ρ_lm(s) s^(l+2) ds,     Q_lm(r) = ∫_r^∞ ρ_lm(s) s^(1-l) ds,
//! Φ_lm(r) = -4π / (2l+1) * (P_lm(r) / r^(l+1) + Q_lm(r) r^l)
//! ```
//!
//! which are accumulated shell by shell. All shells are integrated in one
//! call of the adaptive integrator, as a family of regions. The
//! moments are stored in the scaled form `p = P / r^l`, `q = Q r^l`, which
//! keeps every shell contribution of order unity for any `l`.
//!
//! The source density is only evaluated during construction. Afterwards the
//! expansion is immutable and may be evaluated from any number of threads,
//! even when the density was an external callback.

use std::f64::consts::PI;

use super::harmonics::{eval_harmonics, num_terms, term_orders, AngularGrid};
use super::spline::{CubicSpline, HermiteSpline};
use crate::batch::{Batch, Point3};
use crate::cubature::{Cubature, FieldFamily, Region, Tolerances};
use crate::error::{GalaxyError, GalaxyResult};
use crate::field::{Execution, VectorField};

/// Terms whose coefficients never exceed this fraction of the monopole are
/// dropped from the expansion.
const NEGLIGIBLE: f64 = 1e-12;

/// Numerical settings of a multipole expansion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultipoleParams {
    /// Highest harmonic order
    pub lmax: usize,
    /// Number of radial grid nodes
    pub grid_size: usize,
    /// Innermost grid radius
    pub r_min: f64,
    /// Outermost grid radius
    pub r_max: f64,
    /// Relative tolerance of the radial integrals
    pub tolerance: f64,
}

impl Default for MultipoleParams {
    fn default() -> Self {
        Self {
            lmax: 6,
            grid_size: 200,
            r_min: 1e-4,
            r_max: 1e4,
            tolerance: 1e-10,
        }
    }
}

impl MultipoleParams {
    /// Check the settings, reporting the first problem found.
    pub fn validate(&self) -> GalaxyResult<()> {
        if self.lmax > 32 {
            return Err(GalaxyError::Configuration(format!(
                "lmax must not exceed 32, got {}",
                self.lmax
            )));
        }
        if self.grid_size < 4 {
            return Err(GalaxyError::Configuration(format!(
                "radial grid needs at least 4 nodes, got {}",
                self.grid_size
            )));
        }
        if !(self.r_min > 0.0) || !(self.r_max > self.r_min) || !self.r_max.is_finite() {
            return Err(GalaxyError::Configuration(format!(
                "radial grid must satisfy 0 < rmin < rmax < inf, got [{}, {}]",
                self.r_min, self.r_max
            )));
        }
        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            return Err(GalaxyError::Configuration(format!(
                "multipole tolerance must lie in (0, 1), got {}",
                self.tolerance
            )));
        }
        Ok(())
    }

    fn radii(&self) -> Vec<f64> {
        let (x0, x1) = (self.r_min.ln(), self.r_max.ln());
        let step = (x1 - x0) / (self.grid_size - 1) as f64;
        (0..self.grid_size)
            .map(|k| {
                if k + 1 == self.grid_size {
                    self.r_max
                } else {
                    (x0 + k as f64 * step).exp()
                }
            })
            .collect()
    }
}

/// Radial segment of the moment integrals, one region of the family
/// integration.
#[derive(Debug, Clone, Copy)]
enum Segment {
    /// `s` in `[inner, outer]`: first half of the outputs accumulates `p` at
    /// `outer`, second half `q` at `inner`.
    Shell { inner: f64, outer: f64 },
    /// Everything beyond `r_max`, with `s = r_max / t` for `t` in (0, 1]:
    /// first half `q` at `r_max`, second half the monopole mass beyond
    /// `r_max` (zero for `l > 0`).
    Tail { r_max: f64 },
}

impl Segment {
    fn region(&self) -> GalaxyResult<Region> {
        match *self {
            Segment::Shell { inner, outer } => Region::new(&[inner], &[outer]),
            Segment::Tail { .. } => Region::unit_cube(1),
        }
    }

    fn radius(&self, u: f64) -> f64 {
        match *self {
            Segment::Shell { .. } => u,
            Segment::Tail { r_max } => r_max / u,
        }
    }

    /// Integrands of the two moments of a term of order `l` with density
    /// coefficient `rho` at abscissa `u`.
    fn weights(&self, u: f64, l: usize, rho: f64) -> (f64, f64) {
        let l = l as i32;
        match *self {
            Segment::Shell { inner, outer } => (
                rho * (u / outer).powi(l) * u * u,
                rho * (inner / u).powi(l) * u,
            ),
            Segment::Tail { r_max } => {
                let outer_mass = if l == 0 {
                    rho * r_max.powi(3) * u.powi(-4)
                } else {
                    0.0
                };
                (rho * r_max * r_max * u.powi(l - 3), outer_mass)
            }
        }
    }
}

/// Harmonic projections of the density along every radial segment,
/// weighted so that their integrals are the segment contributions to `p`
/// and `q`. Member `k` of the family is segment `k`.
struct RadialMoments<'a, F: ?Sized> {
    density: &'a F,
    grid: &'a AngularGrid,
    orders: &'a [usize],
    segments: &'a [Segment],
}

impl<F: VectorField + ?Sized> FieldFamily for RadialMoments<'_, F> {
    fn ndim(&self) -> usize {
        1
    }

    fn nvalues(&self) -> usize {
        2 * self.grid.nterms()
    }

    fn execution(&self) -> Execution {
        self.density.execution()
    }

    fn eval_members(&self, members: &[usize], points: &Batch, values: &mut Batch) {
        let radii: Vec<f64> = members
            .iter()
            .zip(points.column(0))
            .map(|(&k, &u)| self.segments[k].radius(u))
            .collect();
        let rho = project_density(self.density, self.grid, &radii);
        let nterms = self.grid.nterms();

        for (i, rho_lm) in rho.iter().enumerate() {
            let segment = &self.segments[members[i]];
            let u = points.get(i, 0);
            for (lm, (&r, &l)) in rho_lm.iter().zip(self.orders).enumerate() {
                let (first, second) = segment.weights(u, l, r);
                values.set(i, lm, first);
                values.set(i, nterms + lm, second);
            }
        }
    }
}

/// Harmonic coefficients `ρ_lm(r)` at each radius, with a single call to
/// the density for all radii and directions.
fn project_density<F: VectorField + ?Sized>(density: &F, grid: &AngularGrid, radii: &[f64]) -> Vec<Vec<f64>> {
    let nang = grid.len();
    let mut points = Batch::zeros(radii.len() * nang, 3);
    for (i, &r) in radii.iter().enumerate() {
        for (k, d) in grid.directions().iter().enumerate() {
            for (j, dj) in d.iter().enumerate() {
                points.set(i * nang + k, j, r * dj);
            }
        }
    }
    let mut values = Batch::zeros(points.rows(), 1);
    density.eval_batch(&points, &mut values);
    let rho = values.column(0);

    radii
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let mut out = vec![0.0; grid.nterms()];
            grid.project(&rho[i * nang..(i + 1) * nang], |_| 1.0, &mut out);
            out
        })
        .collect()
}

/// Monopole moments `P_00` and `Q_00`, interpolated in log space when both
/// are positive everywhere on the grid.
#[derive(Debug, Clone)]
struct Monopole {
    p: HermiteSpline,
    q: HermiteSpline,
    log: bool,
    x_min: f64,
    x_max: f64,
    /// P at r_min and d ln P / d ln r there
    p_inner: (f64, f64),
    /// Q at r_min, r_max and at the origin
    q_inner: f64,
    q_outer: (f64, f64),
    q_origin: f64,
    /// Total P including the tail beyond r_max
    p_total: f64,
}

impl Monopole {
    fn moments(&self, r: f64) -> (f64, f64) {
        let x = r.ln();
        if x < self.x_min {
            let (p0, slope) = self.p_inner;
            let ratio = r / self.x_min.exp();
            let p = p0 * ratio.powf(slope);
            let q = self.q_inner + (self.q_origin - self.q_inner) * (1.0 - ratio * ratio);
            return (p, q);
        }
        if x > self.x_max {
            let (q_end, slope) = self.q_outer;
            return (self.p_total, q_end * (slope * (x - self.x_max)).exp());
        }
        if self.log {
            (self.p.eval(x).exp(), self.q.eval(x).exp())
        } else {
            (self.p.eval(x), self.q.eval(x))
        }
    }

    /// `Φ_00(r)`
    fn potential(&self, r: f64) -> f64 {
        if r == 0.0 {
            return -4.0 * PI * self.q_origin;
        }
        let (p, q) = self.moments(r);
        -4.0 * PI * (p / r + q)
    }
}

/// Radial profile of one density coefficient `ρ_lm`.
#[derive(Debug, Clone)]
struct DensityTerm {
    index: usize,
    l: usize,
    spline: CubicSpline,
    /// Spline of `ln ρ_00` rather than `ρ_lm`
    log: bool,
}

impl DensityTerm {
    fn eval(&self, r: f64) -> f64 {
        let x = r.ln();
        let (lo, hi) = (self.spline.x_min(), self.spline.x_max());
        if (lo..=hi).contains(&x) {
            let y = self.spline.eval(x);
            return if self.log { y.exp() } else { y };
        }
        if self.log {
            // power-law continuation on both sides
            let edge = if x < lo { lo } else { hi };
            let slope = self.spline.deriv(edge);
            if r == 0.0 && slope.abs() < 1e-3 {
                return self.spline.eval(edge).exp();
            }
            return (self.spline.eval(edge) + slope * (x - edge)).exp();
        }
        if x > hi {
            0.0
        } else {
            self.spline.eval(lo) * (r / lo.exp()).powi(self.l as i32)
        }
    }
}

/// Potential term `Φ_lm(r)` for `l > 0`.
#[derive(Debug, Clone)]
struct PotentialTerm {
    index: usize,
    l: usize,
    spline: HermiteSpline,
}

impl PotentialTerm {
    fn eval(&self, r: f64, x_min: f64, x_max: f64) -> f64 {
        let x = r.ln();
        if x < x_min {
            let (phi0, _) = self.spline.first();
            phi0 * (r / x_min.exp()).powi(self.l as i32)
        } else if x > x_max {
            let (phi1, _) = self.spline.last();
            phi1 * (x_max.exp() / r).powi(self.l as i32 + 1)
        } else {
            self.spline.eval(x)
        }
    }
}

/// Multipole expansion of a density and its potential.
#[derive(Debug, Clone)]
pub struct Multipole {
    params: MultipoleParams,
    monopole: Monopole,
    terms: Vec<PotentialTerm>,
    density: Vec<DensityTerm>,
    evaluations: u64,
}

impl Multipole {
    /// Build the expansion from a density field of three inputs.
    ///
    /// All radial segments are refined together, so each refinement round
    /// costs one density call for every segment at once. When the density
    /// is an external callback the whole construction runs on the calling
    /// thread; otherwise a round is split across the worker threads.
    ///
    /// # Errors
    /// * `Configuration` - invalid parameters or a density of the wrong shape
    /// * `NumericalFailure` - the density returned non-finite values that
    ///   could not be isolated by subdivision
    pub fn from_density<F: VectorField + ?Sized>(density: &F, params: MultipoleParams) -> GalaxyResult<Self> {
        params.validate()?;
        if density.ndim() != 3 || density.nvalues() != 1 {
            return Err(GalaxyError::Configuration(format!(
                "density must map 3 coordinates to 1 value, got {} -> {}",
                density.ndim(),
                density.nvalues()
            )));
        }

        let execution = density.execution();
        let grid = AngularGrid::new(params.lmax);
        let nterms = num_terms(params.lmax);
        let orders = term_orders(params.lmax);
        let radii = params.radii();
        let n = radii.len();

        let rho_nodes = project_density(density, &grid, &radii);
        let mut evaluations = (n * grid.len()) as u64;

        let mut segments = Vec::with_capacity(n + 1);
        segments.push(Segment::Shell {
            inner: 0.0,
            outer: radii[0],
        });
        for k in 0..n - 1 {
            segments.push(Segment::Shell {
                inner: radii[k],
                outer: radii[k + 1],
            });
        }
        segments.push(Segment::Tail { r_max: params.r_max });

        let regions: Vec<Region> = segments.iter().map(Segment::region).collect::<GalaxyResult<_>>()?;
        let family = RadialMoments {
            density,
            grid: &grid,
            orders: &orders,
            segments: &segments,
        };
        let mut cubature = Cubature::new(Tolerances::relative(params.tolerance)).with_execution(execution);
        let results = cubature.integrate_family(&family, &regions)?;
        evaluations += cubature.stats.evaluations * grid.len() as u64;
        log::trace!(
            "multipole moments: {} segments in {} density calls",
            segments.len(),
            cubature.stats.batches + 1
        );

        let (core, shells, tail) = (&results[0], &results[1..n], &results[n]);

        // accumulate p outwards and q inwards
        let mut p = vec![vec![0.0; nterms]; n];
        let mut q = vec![vec![0.0; nterms]; n];
        p[0].copy_from_slice(&core.value[..nterms]);
        for k in 0..n - 1 {
            for lm in 0..nterms {
                let shrink = (radii[k] / radii[k + 1]).powi(orders[lm] as i32);
                p[k + 1][lm] = p[k][lm] * shrink + shells[k].value[lm];
            }
        }
        q[n - 1].copy_from_slice(&tail.value[..nterms]);
        for k in (0..n - 1).rev() {
            for lm in 0..nterms {
                let shrink = (radii[k] / radii[k + 1]).powi(orders[lm] as i32);
                q[k][lm] = q[k + 1][lm] * shrink + shells[k].value[nterms + lm];
            }
        }
        let q_origin = q[0][0] + core.value[nterms];
        let p_total = p[n - 1][0] + tail.value[nterms];

        let x: Vec<f64> = radii.iter().map(|r| r.ln()).collect();
        let monopole = build_monopole(&x, &radii, &p, &q, &rho_nodes, q_origin, p_total);

        let mut terms = Vec::new();
        for lm in 1..nterms {
            let l = orders[lm];
            let c = -4.0 * PI / (2 * l + 1) as f64;
            let phi: Vec<f64> = (0..n).map(|k| c * (p[k][lm] / radii[k] + q[k][lm])).collect();
            let significant = (0..n).any(|k| {
                let phi00 = -4.0 * PI * (p[k][0] / radii[k] + q[k][0]);
                phi[k].abs() > NEGLIGIBLE * phi00.abs()
            });
            if !significant {
                continue;
            }
            let dphi: Vec<f64> = (0..n)
                .map(|k| c * (l as f64 * q[k][lm] - (l + 1) as f64 * p[k][lm] / radii[k]))
                .collect();
            terms.push(PotentialTerm {
                index: lm,
                l,
                spline: HermiteSpline::new(x.clone(), phi, dphi),
            });
        }

        let mut density_terms = Vec::new();
        let rho00: Vec<f64> = rho_nodes.iter().map(|r| r[0]).collect();
        let log_density = rho00.iter().all(|&v| v > 0.0 && v.is_finite());
        density_terms.push(DensityTerm {
            index: 0,
            l: 0,
            spline: CubicSpline::new(
                x.clone(),
                if log_density {
                    rho00.iter().map(|v| v.ln()).collect()
                } else {
                    rho00.clone()
                },
            ),
            log: log_density,
        });
        for lm in 1..nterms {
            let rho_lm: Vec<f64> = rho_nodes.iter().map(|r| r[lm]).collect();
            if !rho_lm
                .iter()
                .zip(&rho00)
                .any(|(v, v00)| v.abs() > NEGLIGIBLE * v00.abs())
            {
                continue;
            }
            density_terms.push(DensityTerm {
                index: lm,
                l: orders[lm],
                spline: CubicSpline::new(x.clone(), rho_lm),
                log: false,
            });
        }

        log::debug!(
            "multipole expansion: lmax={}, {} radial nodes in [{:e}, {:e}], {} potential and {} density terms, {} density evaluations",
            params.lmax,
            n,
            params.r_min,
            params.r_max,
            terms.len() + 1,
            density_terms.len(),
            evaluations
        );

        Ok(Self {
            params,
            monopole,
            terms,
            density: density_terms,
            evaluations,
        })
    }

    /// Settings used to build the expansion
    pub fn params(&self) -> &MultipoleParams {
        &self.params
    }

    /// Number of density evaluations spent during construction
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Total mass of the source density, including the extrapolated core and tail
    pub fn total_mass(&self) -> f64 {
        (4.0 * PI).sqrt() * self.monopole.p_total
    }

    /// Spherically averaged potential at radius `r`
    pub fn radial_potential(&self, r: f64) -> f64 {
        self.monopole.potential(r) * Y00
    }

    /// Potential at a point
    pub fn value(&self, point: Point3) -> f64 {
        let r = norm(point);
        let phi00 = self.radial_potential(r);
        if self.terms.is_empty() || r == 0.0 {
            return phi00;
        }
        let ylm = self.harmonics(point, r);
        let (x_min, x_max) = (self.monopole.x_min, self.monopole.x_max);
        phi00
            + self
                .terms
                .iter()
                .map(|t| t.eval(r, x_min, x_max) * ylm[t.index])
                .sum::<f64>()
    }

    /// Interpolated density at a point
    pub fn density(&self, point: Point3) -> f64 {
        let r = norm(point);
        if r == 0.0 || self.density.len() == 1 {
            return self.density[0].eval(r) * Y00;
        }
        let ylm = self.harmonics(point, r);
        self.density.iter().map(|t| t.eval(r) * ylm[t.index]).sum()
    }

    fn harmonics(&self, point: Point3, r: f64) -> Vec<f64> {
        let mut ylm = vec![0.0; num_terms(self.params.lmax)];
        eval_harmonics(self.params.lmax, point[2] / r, point[1].atan2(point[0]), &mut ylm);
        ylm
    }
}

/// `Y_00 = 1 / sqrt(4π)`
const Y00: f64 = 0.282_094_791_773_878_143_474_039_725_780_386_3;

fn norm(p: Point3) -> f64 {
    (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt()
}

fn build_monopole(
    x: &[f64],
    radii: &[f64],
    p: &[Vec<f64>],
    q: &[Vec<f64>],
    rho: &[Vec<f64>],
    q_origin: f64,
    p_total: f64,
) -> Monopole {
    let n = radii.len();
    let p00: Vec<f64> = p.iter().map(|v| v[0]).collect();
    let q00: Vec<f64> = q.iter().map(|v| v[0]).collect();
    // dP/dx = ρ r³,  dQ/dx = -ρ r²
    let dp: Vec<f64> = (0..n).map(|k| rho[k][0] * radii[k].powi(3)).collect();
    let dq: Vec<f64> = (0..n).map(|k| -rho[k][0] * radii[k] * radii[k]).collect();

    let log = p00.iter().chain(&q00).all(|&v| v > 0.0);
    let (p_spline, q_spline) = if log {
        (
            HermiteSpline::new(
                x.to_vec(),
                p00.iter().map(|v| v.ln()).collect(),
                dp.iter().zip(&p00).map(|(d, v)| d / v).collect(),
            ),
            HermiteSpline::new(
                x.to_vec(),
                q00.iter().map(|v| v.ln()).collect(),
                dq.iter().zip(&q00).map(|(d, v)| d / v).collect(),
            ),
        )
    } else {
        (
            HermiteSpline::new(x.to_vec(), p00.clone(), dp.clone()),
            HermiteSpline::new(x.to_vec(), q00.clone(), dq.clone()),
        )
    };

    let p_slope = if p00[0] > 0.0 { dp[0] / p00[0] } else { 3.0 };
    let q_slope = if q00[n - 1] > 0.0 { dq[n - 1] / q00[n - 1] } else { 0.0 };
    Monopole {
        p: p_spline,
        q: q_spline,
        log,
        x_min: x[0],
        x_max: x[n - 1],
        p_inner: (p00[0], p_slope),
        q_inner: q00[0],
        q_outer: (q00[n - 1].max(0.0), q_slope),
        q_origin,
        p_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FnField, UserFunction};
    use crate::potential::AnalyticPotential;

    fn plummer_density(mass: f64, a: f64) -> impl Fn(&Batch, &mut Batch) + Send + Sync {
        move |p: &Batch, v: &mut Batch| {
            for i in 0..p.rows() {
                let r2 = p.get(i, 0).powi(2) + p.get(i, 1).powi(2) + p.get(i, 2).powi(2);
                v.set(i, 0, 3.0 * mass * a * a / (4.0 * PI) * (r2 + a * a).powf(-2.5));
            }
        }
    }

    #[test]
    fn test_plummer_from_native_density() {
        let field = FnField::new(3, plummer_density(3.0, 1.5));
        let multipole = Multipole::from_density(&field, MultipoleParams::default()).unwrap();
        let exact = AnalyticPotential::plummer(3.0, 1.5).unwrap();

        assert!((multipole.value([0.0, 0.0, 0.0]) - exact.value(0.0)).abs() < 1e-6);
        for &r in &[0.01, 0.5, 1.0, 3.7, 20.0, 500.0] {
            let approx = multipole.value([r / 3f64.sqrt(), -r / 3f64.sqrt(), r / 3f64.sqrt()]);
            assert!(
                (approx - exact.value(r)).abs() < 1e-6 * exact.value(r).abs(),
                "r={}: {} vs {}",
                r,
                approx,
                exact.value(r)
            );
            let rho = multipole.density([0.0, r, 0.0]);
            assert!(
                (rho - exact.density(r)).abs() < 1e-5 * exact.density(r),
                "r={}: rho {} vs {}",
                r,
                rho,
                exact.density(r)
            );
        }
        assert!((multipole.total_mass() - 3.0).abs() < 1e-7);
        // only the monopole survives for a spherical source
        assert!(multipole.terms.is_empty());
        assert_eq!(multipole.density.len(), 1);
    }

    #[test]
    fn test_extrapolation_beyond_grid() {
        let field = FnField::new(3, plummer_density(1.0, 1.0));
        let params = MultipoleParams {
            r_min: 1e-2,
            r_max: 1e2,
            grid_size: 100,
            ..MultipoleParams::default()
        };
        let multipole = Multipole::from_density(&field, params).unwrap();
        let exact = AnalyticPotential::plummer(1.0, 1.0).unwrap();
        assert!((multipole.value([1e-3, 0.0, 0.0]) - exact.value(1e-3)).abs() < 1e-6);
        assert!((multipole.value([0.0, 0.0, 1e4]) - exact.value(1e4)).abs() < 1e-8);
        assert!(multipole.value([0.0, 0.0, 1e8]).abs() < 1e-7);
    }

    #[test]
    fn test_flattened_density_has_quadrupole() {
        // ρ ∝ exp(-(x² + y² + 4 z²)): oblate, symmetric under z -> -z
        let field = FnField::new(3, |p: &Batch, v: &mut Batch| {
            for i in 0..p.rows() {
                let (x, y, z) = (p.get(i, 0), p.get(i, 1), p.get(i, 2));
                v.set(i, 0, (-(x * x + y * y + 4.0 * z * z)).exp());
            }
        });
        let params = MultipoleParams {
            lmax: 8,
            r_min: 1e-3,
            r_max: 1e2,
            grid_size: 120,
            ..MultipoleParams::default()
        };
        let multipole = Multipole::from_density(&field, params).unwrap();

        // mass = π^(3/2) / 2
        let mass = PI.powf(1.5) / 2.0;
        assert!((multipole.total_mass() - mass).abs() < 1e-4 * mass);
        assert!(multipole.terms.iter().any(|t| t.l == 2));
        assert!(multipole.terms.iter().all(|t| t.l % 2 == 0));
        // deeper potential in the plane than along the axis at equal radius
        assert!(multipole.value([1.0, 0.0, 0.0]) < multipole.value([0.0, 0.0, 1.0]));
        let rho_plane = multipole.density([0.7, 0.0, 0.0]);
        assert!((rho_plane - (-0.49f64).exp()).abs() < 5e-3);
    }

    #[test]
    fn test_user_density_is_called_serially() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let rho = plummer_density(1.0, 1.0);
        let user = UserFunction::new(3, move |p: &Batch| {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut out = Batch::zeros(p.rows(), 1);
            rho(p, &mut out);
            out.into_vec()
        });
        let params = MultipoleParams {
            grid_size: 40,
            r_min: 1e-2,
            r_max: 1e2,
            ..MultipoleParams::default()
        };
        let multipole = Multipole::from_density(&user, params).unwrap();
        let before = calls.load(Ordering::SeqCst);
        assert!(before > 0);
        // one call for the grid nodes plus one per refinement round, far
        // fewer than the 41 radial segments
        assert!(before < 20, "{} density calls", before);
        assert!((multipole.total_mass() - 1.0).abs() < 1e-6);

        // evaluation after construction never touches the callback
        let _ = multipole.value([0.3, 0.2, 0.1]);
        let _ = multipole.density([0.3, 0.2, 0.1]);
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    #[test]
    fn test_invalid_params() {
        let field = FnField::new(3, plummer_density(1.0, 1.0));
        let bad = MultipoleParams {
            r_min: 10.0,
            r_max: 1.0,
            ..MultipoleParams::default()
        };
        assert!(matches!(
            Multipole::from_density(&field, bad),
            Err(GalaxyError::Configuration(_))
        ));
        let wrong_shape = FnField::new(2, |_: &Batch, _: &mut Batch| {});
        assert!(matches!(
            Multipole::from_density(&wrong_shape, MultipoleParams::default()),
            Err(GalaxyError::Configuration(_))
        ));
    }

    #[test]
    fn test_default_grid_needs_few_density_calls() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let rho = plummer_density(2.0, 0.5);
        let user = UserFunction::new(3, move |p: &Batch| {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut out = Batch::zeros(p.rows(), 1);
            rho(p, &mut out);
            out.into_vec()
        });
        let multipole = Multipole::from_density(&user, MultipoleParams::default()).unwrap();
        let exact = AnalyticPotential::plummer(2.0, 0.5).unwrap();

        // 201 shells and a tail, integrated together
        let used = calls.load(Ordering::SeqCst);
        assert!(used < 40, "{} density calls", used);
        assert!((multipole.total_mass() - 2.0).abs() < 1e-7);
        assert!((multipole.value([0.0, 0.8, 0.0]) - exact.value(0.8)).abs() < 1e-6 * exact.value(0.8).abs());
    }

    #[test]
    fn test_tail_outer_mass_is_monopole_only() {
        let field = FnField::new(3, |p: &Batch, v: &mut Batch| {
            for i in 0..p.rows() {
                let (x, y, z) = (p.get(i, 0), p.get(i, 1), p.get(i, 2));
                v.set(i, 0, (x * x + y * y + 4.0 * z * z + 1.0).powf(-2.5));
            }
        });
        let lmax = 4;
        let grid = AngularGrid::new(lmax);
        let orders = term_orders(lmax);
        let nterms = num_terms(lmax);
        let r_max = 2.0;
        let segments = [Segment::Tail { r_max }];
        let family = RadialMoments {
            density: &field,
            grid: &grid,
            orders: &orders,
            segments: &segments,
        };

        let ts = [0.1, 0.35, 0.8, 1.0];
        let mut points = Batch::zeros(ts.len(), 1);
        for (i, &t) in ts.iter().enumerate() {
            points.set(i, 0, t);
        }
        let mut values = Batch::zeros(ts.len(), 2 * nterms);
        family.eval_members(&[0; 4], &points, &mut values);

        let radii: Vec<f64> = ts.iter().map(|t| r_max / t).collect();
        let rho = project_density(&field, &grid, &radii);
        for (i, &t) in ts.iter().enumerate() {
            let expected = rho[i][0] * r_max.powi(3) / t.powi(4);
            assert!(
                (values.get(i, nterms) - expected).abs() < 1e-14 * expected.abs(),
                "t={}: {} vs {}",
                t,
                values.get(i, nterms),
                expected
            );
            for lm in 1..nterms {
                assert_eq!(values.get(i, nterms + lm), 0.0);
                let q = rho[i][lm] * r_max * r_max * t.powi(orders[lm] as i32 - 3);
                assert!((values.get(i, lm) - q).abs() <= 1e-14 * q.abs().max(1e-300));
            }
        }
        // the quadrupole is present, so its outer moment really was dropped
        assert!(rho
            .iter()
            .any(|r| r[1..].iter().any(|v| v.abs() > 1e-6 * r[0].abs())));
    }
}
