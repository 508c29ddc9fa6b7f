//! Real spherical harmonics and the angular quadrature used to project a
//! density onto them.
//!
//! Harmonics are orthonormal on the unit sphere, without the Condon-Shortley
//! phase, and indexed `l * l + l + m` for `-l <= m <= l`:
//!
//! - `m > 0`: `sqrt(2) N_lm P_l^m(cos θ) cos(m φ)`
//! - `m = 0`: `N_l0 P_l(cos θ)`
//! - `m < 0`: `sqrt(2) N_l|m| P_l^|m|(cos θ) sin(|m| φ)`

use std::f64::consts::PI;

/// Number of harmonic terms up to and including order `lmax`.
pub fn num_terms(lmax: usize) -> usize {
    (lmax + 1) * (lmax + 1)
}

/// Index of the `(l, m)` term.
#[inline]
pub fn term_index(l: usize, m: i64) -> usize {
    ((l * l + l) as i64 + m) as usize
}

/// Order `l` of every term, in index order.
pub fn term_orders(lmax: usize) -> Vec<usize> {
    (0..=lmax)
        .flat_map(|l| std::iter::repeat(l).take(2 * l + 1))
        .collect()
}

/// Gauss-Legendre nodes and weights on [-1, 1], nodes in descending order.
pub fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];
    for i in 0..n {
        let mut z = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut dp = 1.0;
        for _ in 0..100 {
            let (mut p1, mut p2) = (1.0, 0.0);
            for j in 1..=n {
                let p3 = p2;
                p2 = p1;
                p1 = ((2 * j - 1) as f64 * z * p2 - (j - 1) as f64 * p3) / j as f64;
            }
            dp = n as f64 * (z * p1 - p2) / (z * z - 1.0);
            let dz = p1 / dp;
            z -= dz;
            if dz.abs() < 1e-15 {
                break;
            }
        }
        nodes[i] = z;
        weights[i] = 2.0 / ((1.0 - z * z) * dp * dp);
    }
    (nodes, weights)
}

/// Evaluate all real harmonics up to `lmax` at one direction.
///
/// `out` must hold `num_terms(lmax)` values.
pub fn eval_harmonics(lmax: usize, cos_theta: f64, phi: f64, out: &mut [f64]) {
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();

    // normalised associated Legendre functions, column by column in m
    let mut pmm = (0.25 / PI).sqrt();
    for m in 0..=lmax {
        if m > 0 {
            pmm *= ((2 * m + 1) as f64 / (2 * m) as f64).sqrt() * sin_theta;
        }
        let (cos_mphi, sin_mphi) = if m == 0 {
            (1.0, 0.0)
        } else {
            let a = m as f64 * phi;
            (2f64.sqrt() * a.cos(), 2f64.sqrt() * a.sin())
        };

        let mut store = |l: usize, plm: f64| {
            out[term_index(l, m as i64)] = plm * cos_mphi;
            if m > 0 {
                out[term_index(l, -(m as i64))] = plm * sin_mphi;
            }
        };

        store(m, pmm);
        if m == lmax {
            break;
        }
        let mut prev = pmm;
        let mut cur = ((2 * m + 3) as f64).sqrt() * cos_theta * pmm;
        store(m + 1, cur);
        for l in m + 2..=lmax {
            let (lf, mf) = (l as f64, m as f64);
            let a = ((4.0 * lf * lf - 1.0) / (lf * lf - mf * mf)).sqrt();
            let b = (((lf - 1.0) * (lf - 1.0) - mf * mf) / (4.0 * (lf - 1.0) * (lf - 1.0) - 1.0)).sqrt();
            let next = a * (cos_theta * cur - b * prev);
            prev = cur;
            cur = next;
            store(l, cur);
        }
    }
}

/// Product quadrature on the sphere: Gauss-Legendre in `cos θ` times a
/// uniform grid in `φ`, exact for products of two harmonics up to `lmax`.
#[derive(Debug, Clone)]
pub struct AngularGrid {
    lmax: usize,
    /// Unit vectors of the nodes
    directions: Vec<[f64; 3]>,
    /// Quadrature weight times harmonic value, `weighted[node * nterms + idx]`
    weighted: Vec<f64>,
}

impl AngularGrid {
    /// Build the quadrature for expansion order `lmax`.
    pub fn new(lmax: usize) -> Self {
        let n_theta = lmax + 2;
        let n_phi = 2 * lmax + 2;
        let nterms = num_terms(lmax);
        let (nodes, weights) = gauss_legendre(n_theta);
        let dphi = 2.0 * PI / n_phi as f64;

        let mut directions = Vec::with_capacity(n_theta * n_phi);
        let mut weighted = Vec::with_capacity(n_theta * n_phi * nterms);
        let mut ylm = vec![0.0; nterms];
        for (&ct, &w) in nodes.iter().zip(&weights) {
            let st = (1.0 - ct * ct).max(0.0).sqrt();
            for k in 0..n_phi {
                let phi = (k as f64 + 0.5) * dphi;
                directions.push([st * phi.cos(), st * phi.sin(), ct]);
                eval_harmonics(lmax, ct, phi, &mut ylm);
                weighted.extend(ylm.iter().map(|y| y * w * dphi));
            }
        }
        Self {
            lmax,
            directions,
            weighted,
        }
    }

    /// Number of harmonic terms
    pub fn nterms(&self) -> usize {
        num_terms(self.lmax)
    }

    /// Number of quadrature nodes
    pub fn len(&self) -> usize {
        self.directions.len()
    }

    /// Unit vectors of the quadrature nodes
    pub fn directions(&self) -> &[[f64; 3]] {
        &self.directions
    }

    /// Add the projection of `values` (one per node) onto every harmonic,
    /// scaled by `factor[l]`, into `out`.
    pub fn project(&self, values: &[f64], factor: impl Fn(usize) -> f64, out: &mut [f64]) {
        let nterms = self.nterms();
        let orders = term_orders(self.lmax);
        let mut sums = vec![0.0; nterms];
        for (node, &v) in values.iter().enumerate() {
            if v == 0.0 {
                continue;
            }
            let row = &self.weighted[node * nterms..(node + 1) * nterms];
            for (s, w) in sums.iter_mut().zip(row) {
                *s += v * w;
            }
        }
        for (idx, s) in sums.into_iter().enumerate() {
            out[idx] += s * factor(orders[idx]);
        }
    }
}
