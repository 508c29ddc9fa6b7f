//! Adaptive Multidimensional Cubature
//!
//! Globally adaptive integration of vector-valued integrands over
//! axis-aligned boxes, in the spirit of Genz & Malik (1980) and Berntsen,
//! Espelid & Genz (1991).
//!
//! Every region carries the difference between two embedded rules as its
//! local error estimate. The regions with the largest errors are split in
//! half until the total error meets the tolerance or the evaluation budget
//! runs out. All children produced in one refinement round are evaluated
//! together: in a single integrand call when the integrand is tagged
//! [`Execution::Serial`], or in one call per worker-thread chunk otherwise.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rayon::prelude::*;

use crate::batch::Batch;
use crate::coefficients::{
    genz_malik_points, GenzMalikWeights, GK_POINTS, GM_LAMBDA2, GM_LAMBDA4, GM_LAMBDA5, GM_RATIO,
    GM_WEIGHT2, GM_WEIGHT4, GM_WEIGHT_E2, GM_WEIGHT_E4, WG, WGK, XGK,
};
use crate::error::{GalaxyError, GalaxyResult};
use crate::field::{Execution, VectorField};

/// Default cap on integrand evaluations (counted per point)
pub const DEFAULT_MAX_EVALS: u64 = 1_000_000;

/// Default limit on how many times a region may be halved
pub const DEFAULT_MAX_DEPTH: u32 = 60;

/// Tolerance specification for error control
///
/// Integration stops once `max_i err_i <= max(abs, rel * max_i |value_i|)`,
/// i.e. when either the absolute or the relative target is met.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    /// Absolute tolerance
    pub abs: f64,
    /// Relative tolerance
    pub rel: f64,
}

impl Tolerances {
    /// Create tolerances with both targets
    pub fn new(abs: f64, rel: f64) -> Self {
        Self { abs, rel }
    }

    /// Purely relative tolerance
    pub fn relative(rel: f64) -> Self {
        Self { abs: 0.0, rel }
    }

    /// Error level accepted for a result of the given magnitude
    pub fn threshold(&self, value_norm: f64) -> f64 {
        self.abs.max(self.rel * value_norm)
    }

    fn validate(&self) -> GalaxyResult<()> {
        if !self.abs.is_finite() || self.abs < 0.0 {
            return Err(GalaxyError::InvalidInput(format!(
                "absolute tolerance must be non-negative and finite, got {}",
                self.abs
            )));
        }
        if !self.rel.is_finite() || self.rel < 0.0 {
            return Err(GalaxyError::InvalidInput(format!(
                "relative tolerance must be non-negative and finite, got {}",
                self.rel
            )));
        }
        if self.abs == 0.0 && self.rel == 0.0 {
            return Err(GalaxyError::InvalidInput(
                "at least one of the absolute and relative tolerances must be positive"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// An axis-aligned integration box `[lower_i, upper_i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Region {
    /// Create a region, checking `lower_i <= upper_i` and finiteness.
    ///
    /// Infinite bounds must be mapped to finite ones by the caller (e.g. the
    /// escape speed for velocity integrals, or a `t / (1 - t)` substitution).
    pub fn new(lower: &[f64], upper: &[f64]) -> GalaxyResult<Self> {
        if lower.is_empty() {
            return Err(GalaxyError::InvalidInput(
                "integration region needs at least one dimension".to_string(),
            ));
        }
        if lower.len() != upper.len() {
            return Err(GalaxyError::InvalidInput(format!(
                "lower bounds have {} dimensions, upper bounds have {}",
                lower.len(),
                upper.len()
            )));
        }
        for (i, (&lo, &hi)) in lower.iter().zip(upper).enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(GalaxyError::InvalidInput(format!(
                    "bounds of dimension {} must be finite, got [{}, {}]",
                    i, lo, hi
                )));
            }
            if lo > hi {
                return Err(GalaxyError::InvalidInput(format!(
                    "lower bound {} exceeds upper bound {} in dimension {}",
                    lo, hi, i
                )));
            }
        }
        Ok(Self {
            lower: lower.to_vec(),
            upper: upper.to_vec(),
        })
    }

    /// The unit cube `[0, 1]^n`.
    pub fn unit_cube(n: usize) -> GalaxyResult<Self> {
        Self::new(&vec![0.0; n], &vec![1.0; n])
    }

    /// Dimensionality of the region
    pub fn ndim(&self) -> usize {
        self.lower.len()
    }

    /// Lower corner
    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    /// Upper corner
    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Volume of the box
    pub fn volume(&self) -> f64 {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| hi - lo)
            .product()
    }

    fn root_cell(&self) -> Cell {
        Cell {
            center: self
                .lower
                .iter()
                .zip(&self.upper)
                .map(|(lo, hi)| 0.5 * (lo + hi))
                .collect(),
            halfwidth: self
                .lower
                .iter()
                .zip(&self.upper)
                .map(|(lo, hi)| 0.5 * (hi - lo))
                .collect(),
            depth: 0,
        }
    }
}

/// Outcome of an integration with respect to the requested tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationStatus {
    /// The error estimate meets the tolerance
    Converged,
    /// The evaluation budget ran out first; the result is the best available
    /// estimate and its error estimate exceeds the requested tolerance
    ToleranceNotMet,
}

/// Result of an adaptive integration
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationResult {
    /// Integral of each integrand component
    pub value: Vec<f64>,
    /// Non-negative error estimate of each component
    pub error: Vec<f64>,
    /// Number of integrand evaluations (counted per point)
    pub evaluations: u64,
    /// Whether the tolerance was met
    pub status: IntegrationStatus,
}

impl IntegrationResult {
    /// Value of the first (for scalar integrands, the only) component
    pub fn scalar(&self) -> f64 {
        self.value[0]
    }

    /// Error estimate of the first component
    pub fn error_estimate(&self) -> f64 {
        self.error[0]
    }

    /// True if the tolerance was met
    pub fn converged(&self) -> bool {
        self.status == IntegrationStatus::Converged
    }
}

/// Integration statistics for diagnostics
#[derive(Debug, Clone, Default)]
pub struct Stats {
    /// Total number of integrand evaluations (per point)
    pub evaluations: u64,
    /// Number of integrand invocations (batches)
    pub batches: u64,
    /// Number of regions split in half
    pub subdivisions: u64,
    /// Number of regions in the final partition
    pub regions: u64,
}

/// Adaptive cubature integrator
///
/// # Example
/// ```
/// use galaxy_df::{Batch, Cubature, FnField, Region, Tolerances};
///
/// // ∫∫ x y dx dy over [0, 1] x [0, 2] = 1
/// let f = FnField::new(2, |p: &Batch, v: &mut Batch| {
///     for (i, out) in v.column_mut(0).iter_mut().enumerate() {
///         *out = p.get(i, 0) * p.get(i, 1);
///     }
/// });
/// let region = Region::new(&[0.0, 0.0], &[1.0, 2.0]).unwrap();
/// let mut cubature = Cubature::new(Tolerances::relative(1e-10));
/// let result = cubature.integrate(&f, &region).unwrap();
/// assert!((result.scalar() - 1.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone)]
pub struct Cubature {
    /// Tolerance specification
    tol: Tolerances,
    /// Maximum number of integrand evaluations
    pub max_evals: u64,
    /// Maximum subdivision depth of a single region
    pub max_depth: u32,
    /// Execution context imposed by the caller. The effective context of a
    /// call is this combined with the integrand's own tag.
    pub execution: Execution,
    /// Statistics of the last call
    pub stats: Stats,
}

impl Cubature {
    /// Create a new integrator with the given tolerances
    pub fn new(tol: Tolerances) -> Self {
        Self {
            tol,
            max_evals: DEFAULT_MAX_EVALS,
            max_depth: DEFAULT_MAX_DEPTH,
            execution: Execution::Parallel,
            stats: Stats::default(),
        }
    }

    /// Set the evaluation budget
    pub fn with_max_evals(mut self, max_evals: u64) -> Self {
        self.max_evals = max_evals;
        self
    }

    /// Impose an execution context (e.g. inherited from an enclosing call)
    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }

    /// Tolerance specification
    pub fn tolerances(&self) -> Tolerances {
        self.tol
    }

    /// Integrate `f` over `region`.
    ///
    /// # Returns
    /// * `Ok(result)` - converged, or the best estimate with
    ///   [`IntegrationStatus::ToleranceNotMet`] when the budget ran out
    /// * `Err(GalaxyError::InvalidInput)` - malformed tolerances or a
    ///   dimension mismatch
    /// * `Err(GalaxyError::NumericalFailure)` - non-finite integrand values
    ///   that survive the maximum subdivision depth or the budget
    pub fn integrate<F: VectorField + ?Sized>(
        &mut self,
        f: &F,
        region: &Region,
    ) -> GalaxyResult<IntegrationResult> {
        self.integrate_family(&Single(f), std::slice::from_ref(region))?
            .pop()
            .ok_or_else(|| GalaxyError::InvalidInput("no integration region".to_string()))
    }

    /// Integrate member `k` of `f` over `regions[k]`, for all `k` at once.
    ///
    /// Every region is refined against its own tolerance, but the children
    /// of one refinement round are evaluated together across regions. The
    /// evaluation budget is shared.
    pub fn integrate_family<F: FieldFamily + ?Sized>(
        &mut self,
        f: &F,
        regions: &[Region],
    ) -> GalaxyResult<Vec<IntegrationResult>> {
        self.validate_inputs(f, regions)?;
        self.stats = Stats::default();

        let nvalues = f.nvalues();
        let execution = self.execution.and(f.execution());
        let Some(first) = regions.first() else {
            return Ok(Vec::new());
        };

        let rule = Rule::for_dimension(first.ndim());
        let per_cell = rule.points() as u64;
        if per_cell > self.max_evals {
            return Err(GalaxyError::InvalidInput(format!(
                "evaluation budget {} is smaller than one rule application ({} points)",
                self.max_evals, per_cell
            )));
        }

        let mut states: Vec<RegionState> = regions
            .iter()
            .map(|region| RegionState {
                status: (region.volume() == 0.0).then_some(IntegrationStatus::Converged),
                ..RegionState::default()
            })
            .collect();
        let roots: Vec<(usize, Cell)> = regions
            .iter()
            .enumerate()
            .filter(|(k, _)| states[*k].status.is_none())
            .map(|(k, region)| (k, region.root_cell()))
            .collect();
        for (k, estimate) in self.evaluate(f, &rule, roots, execution) {
            states[k].evaluations += per_cell;
            states[k].heap.push(estimate);
        }

        loop {
            let budget_left = self.max_evals.saturating_sub(self.stats.evaluations);
            let mut cap = (budget_left / (2 * per_cell)) as usize;
            let mut children: Vec<(usize, Cell)> = Vec::new();

            for (k, state) in states.iter_mut().enumerate() {
                if state.status.is_some() {
                    continue;
                }
                let (value, error) = state.totals(nvalues);
                let threshold = self.tol.threshold(norm_inf(&value));
                let all_finite = state.heap.iter().all(|e| e.finite);
                if all_finite && norm_inf(&error) <= threshold {
                    state.status = Some(IntegrationStatus::Converged);
                    continue;
                }
                if cap == 0 || state.heap.is_empty() {
                    state.status = Some(IntegrationStatus::ToleranceNotMet);
                    continue;
                }

                // Pop the worst regions until what is left would meet the
                // tolerance; non-finite regions sort first and are always taken.
                let mut remaining = error;
                let mut selected = Vec::new();
                while let Some(top) = state.heap.peek() {
                    if selected.len() >= cap {
                        break;
                    }
                    if top.finite && !selected.is_empty() && norm_inf(&remaining) <= threshold {
                        break;
                    }
                    if let Some(worst) = state.heap.pop() {
                        if worst.finite {
                            for (r, e) in remaining.iter_mut().zip(&worst.error) {
                                *r -= e;
                            }
                        }
                        selected.push(worst);
                    }
                }
                cap -= selected.len();

                for worst in selected {
                    if worst.cell.depth >= self.max_depth {
                        if !worst.finite {
                            return Err(GalaxyError::NumericalFailure {
                                depth: worst.cell.depth,
                                evaluations: self.stats.evaluations,
                            });
                        }
                        // finite cells at the depth limit stay in the sum
                        state.frozen.push(worst);
                        continue;
                    }
                    let (left, right) = worst.cell.split(worst.split);
                    children.push((k, left));
                    children.push((k, right));
                    self.stats.subdivisions += 1;
                }
            }

            if children.is_empty() {
                if states.iter().all(|s| s.status.is_some()) {
                    break;
                }
                continue;
            }
            for (k, estimate) in self.evaluate(f, &rule, children, execution) {
                states[k].evaluations += per_cell;
                states[k].heap.push(estimate);
            }
        }

        let mut results = Vec::with_capacity(states.len());
        for (k, state) in states.iter().enumerate() {
            if let Some(bad) = state.heap.iter().find(|e| !e.finite) {
                return Err(GalaxyError::NumericalFailure {
                    depth: bad.cell.depth,
                    evaluations: self.stats.evaluations,
                });
            }
            let (value, error) = state.totals(nvalues);
            self.stats.regions += (state.heap.len() + state.frozen.len()) as u64;
            let status = state.status.unwrap_or(IntegrationStatus::ToleranceNotMet);

            if status == IntegrationStatus::ToleranceNotMet {
                log::warn!(
                    "integration of region {} stopped after {} evaluations: error {:.3e} exceeds tolerance {:.3e}",
                    k,
                    state.evaluations,
                    norm_inf(&error),
                    self.tol.threshold(norm_inf(&value))
                );
            }
            results.push(IntegrationResult {
                value,
                error,
                evaluations: state.evaluations,
                status,
            });
        }
        Ok(results)
    }

    /// Apply the rule to every cell, coalescing points into as few integrand
    /// calls as the execution context allows.
    fn evaluate<F: FieldFamily + ?Sized>(
        &mut self,
        f: &F,
        rule: &Rule,
        cells: Vec<(usize, Cell)>,
        execution: Execution,
    ) -> Vec<(usize, Estimate)> {
        if cells.is_empty() {
            return Vec::new();
        }
        self.stats.evaluations += (cells.len() * rule.points()) as u64;

        match execution {
            Execution::Serial => {
                self.stats.batches += 1;
                evaluate_cells(f, rule, &cells)
            }
            Execution::Parallel => {
                let threads = rayon::current_num_threads().max(1);
                let chunk = cells.len().div_ceil(threads).max(1);
                self.stats.batches += cells.len().div_ceil(chunk) as u64;
                cells
                    .par_chunks(chunk)
                    .map(|group| evaluate_cells(f, rule, group))
                    .collect::<Vec<_>>()
                    .into_iter()
                    .flatten()
                    .collect()
            }
        }
    }

    fn validate_inputs<F: FieldFamily + ?Sized>(&self, f: &F, regions: &[Region]) -> GalaxyResult<()> {
        self.tol.validate()?;
        for region in regions {
            if f.ndim() != region.ndim() {
                return Err(GalaxyError::InvalidInput(format!(
                    "integrand expects {} dimensions, region has {}",
                    f.ndim(),
                    region.ndim()
                )));
            }
        }
        if f.nvalues() == 0 {
            return Err(GalaxyError::InvalidInput(
                "integrand must return at least one value per point".to_string(),
            ));
        }
        Ok(())
    }
}

/// Integrate `f` over the box `[lower, upper]` to relative accuracy
/// `tolerance`, with the default evaluation budget.
///
/// This is the one-call entry point of the integrator; it accepts any
/// dimensionality >= 1.
pub fn integrate_ndim<F: VectorField + ?Sized>(
    f: &F,
    lower: &[f64],
    upper: &[f64],
    tolerance: f64,
) -> GalaxyResult<IntegrationResult> {
    let region = Region::new(lower, upper)?;
    Cubature::new(Tolerances::relative(tolerance)).integrate(f, &region)
}

/// A family of integrands over the same dimensionality, evaluated together.
///
/// Used with [`Cubature::integrate_family`]: row `i` of a batch belongs to
/// the integrand of region `members[i]`. Every [`VectorField`] is a family
/// whose members are all the same function.
pub trait FieldFamily: Send + Sync {
    /// Number of input components per point
    fn ndim(&self) -> usize;

    /// Number of output values per point
    fn nvalues(&self) -> usize {
        1
    }

    /// Thread-safety tag of the whole family
    fn execution(&self) -> Execution {
        Execution::Parallel
    }

    /// Evaluate each row with the member it belongs to.
    fn eval_members(&self, members: &[usize], points: &Batch, values: &mut Batch);
}

/// A single field viewed as a family.
struct Single<'f, F: ?Sized>(&'f F);

impl<F: VectorField + ?Sized> FieldFamily for Single<'_, F> {
    fn ndim(&self) -> usize {
        self.0.ndim()
    }

    fn nvalues(&self) -> usize {
        self.0.nvalues()
    }

    fn execution(&self) -> Execution {
        self.0.execution()
    }

    fn eval_members(&self, _members: &[usize], points: &Batch, values: &mut Batch) {
        self.0.eval_batch(points, values)
    }
}

/// Refinement state of one region of a family integration.
#[derive(Debug, Default)]
struct RegionState {
    heap: BinaryHeap<Estimate>,
    /// finite cells that reached the depth limit
    frozen: Vec<Estimate>,
    evaluations: u64,
    /// set once the region stops refining
    status: Option<IntegrationStatus>,
}

impl RegionState {
    fn totals(&self, nvalues: usize) -> (Vec<f64>, Vec<f64>) {
        totals(self.heap.iter().chain(self.frozen.iter()), nvalues)
    }
}

fn evaluate_cells<F: FieldFamily + ?Sized>(f: &F, rule: &Rule, cells: &[(usize, Cell)]) -> Vec<(usize, Estimate)> {
    let per_cell = rule.points();
    let ndim = cells.first().map_or(0, |(_, c)| c.center.len());
    let mut points = Batch::zeros(cells.len() * per_cell, ndim);
    let mut members = Vec::with_capacity(points.rows());
    for (j, (k, cell)) in cells.iter().enumerate() {
        rule.fill(cell, &mut points, j * per_cell);
        members.extend(std::iter::repeat(*k).take(per_cell));
    }
    let mut values = Batch::zeros(points.rows(), f.nvalues());
    f.eval_members(&members, &points, &mut values);
    cells
        .iter()
        .enumerate()
        .map(|(j, (k, cell))| (*k, rule.estimate(cell.clone(), &values, j * per_cell)))
        .collect()
}

fn totals<'a>(estimates: impl Iterator<Item = &'a Estimate>, nvalues: usize) -> (Vec<f64>, Vec<f64>) {
    let mut value = vec![0.0; nvalues];
    let mut error = vec![0.0; nvalues];
    for e in estimates {
        for q in 0..nvalues {
            value[q] += e.value[q];
            error[q] += e.error[q];
        }
    }
    (value, error)
}

fn norm_inf(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

/// A sub-box in centre/half-width form.
#[derive(Debug, Clone)]
struct Cell {
    center: Vec<f64>,
    halfwidth: Vec<f64>,
    depth: u32,
}

impl Cell {
    fn volume(&self) -> f64 {
        self.halfwidth.iter().map(|h| 2.0 * h).product()
    }

    fn split(&self, dim: usize) -> (Cell, Cell) {
        let mut left = self.clone();
        let h = 0.5 * self.halfwidth[dim];
        left.halfwidth[dim] = h;
        left.center[dim] -= h;
        left.depth += 1;
        let mut right = left.clone();
        right.center[dim] += 2.0 * h;
        (left, right)
    }
}

/// A cell with its rule estimate.
#[derive(Debug)]
struct Estimate {
    cell: Cell,
    value: Vec<f64>,
    error: Vec<f64>,
    /// L-infinity norm of `error`, +inf for non-finite results
    norm: f64,
    finite: bool,
    /// Axis along which the cell should be halved
    split: usize,
}

impl Estimate {
    fn new(cell: Cell, value: Vec<f64>, error: Vec<f64>, split: usize) -> Self {
        let finite = value.iter().chain(&error).all(|v| v.is_finite());
        let norm = if finite { norm_inf(&error) } else { f64::INFINITY };
        Self {
            cell,
            value,
            error,
            norm,
            finite,
            split,
        }
    }
}

impl PartialEq for Estimate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Estimate {}

impl PartialOrd for Estimate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Estimate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.norm.total_cmp(&other.norm)
    }
}

/// Embedded rule pair chosen by dimensionality.
#[derive(Debug, Clone)]
enum Rule {
    GaussKronrod,
    GenzMalik { n: usize, w: GenzMalikWeights },
}

impl Rule {
    fn for_dimension(n: usize) -> Self {
        if n == 1 {
            Rule::GaussKronrod
        } else {
            Rule::GenzMalik {
                n,
                w: GenzMalikWeights::for_dimension(n),
            }
        }
    }

    fn points(&self) -> usize {
        match self {
            Rule::GaussKronrod => GK_POINTS,
            Rule::GenzMalik { n, .. } => genz_malik_points(*n),
        }
    }

    /// Write the rule's nodes for `cell` into rows `offset..offset + points()`.
    fn fill(&self, cell: &Cell, points: &mut Batch, offset: usize) {
        match self {
            Rule::GaussKronrod => {
                let (c, h) = (cell.center[0], cell.halfwidth[0]);
                points.set(offset, 0, c);
                for (k, x) in XGK[..7].iter().enumerate() {
                    points.set(offset + 1 + 2 * k, 0, c - x * h);
                    points.set(offset + 2 + 2 * k, 0, c + x * h);
                }
            }
            Rule::GenzMalik { n, .. } => {
                let n = *n;
                let mut row = offset;
                let mut put = |p: &[f64], row: &mut usize| {
                    for (j, &v) in p.iter().enumerate() {
                        points.set(*row, j, v);
                    }
                    *row += 1;
                };
                let mut p = cell.center.clone();
                put(&p, &mut row);

                for i in 0..n {
                    for (sign, lambda) in [(-1.0, GM_LAMBDA2), (1.0, GM_LAMBDA2), (-1.0, GM_LAMBDA4), (1.0, GM_LAMBDA4)] {
                        p[i] = cell.center[i] + sign * lambda * cell.halfwidth[i];
                        put(&p, &mut row);
                    }
                    p[i] = cell.center[i];
                }

                for i in 0..n {
                    for j in i + 1..n {
                        for (si, sj) in [(-1.0, -1.0), (-1.0, 1.0), (1.0, -1.0), (1.0, 1.0)] {
                            p[i] = cell.center[i] + si * GM_LAMBDA4 * cell.halfwidth[i];
                            p[j] = cell.center[j] + sj * GM_LAMBDA4 * cell.halfwidth[j];
                            put(&p, &mut row);
                        }
                        p[i] = cell.center[i];
                        p[j] = cell.center[j];
                    }
                }

                for mask in 0..(1usize << n) {
                    for k in 0..n {
                        let sign = if (mask >> k) & 1 == 1 { 1.0 } else { -1.0 };
                        p[k] = cell.center[k] + sign * GM_LAMBDA5 * cell.halfwidth[k];
                    }
                    put(&p, &mut row);
                }
            }
        }
    }

    /// Combine the integrand values at this cell's nodes into an estimate.
    fn estimate(&self, cell: Cell, values: &Batch, offset: usize) -> Estimate {
        let nvalues = values.cols();
        let mut value = vec![0.0; nvalues];
        let mut error = vec![0.0; nvalues];

        match self {
            Rule::GaussKronrod => {
                let h = cell.halfwidth[0];
                for q in 0..nvalues {
                    let f = values.column(q);
                    let f0 = f[offset];
                    let mut kronrod = WGK[7] * f0;
                    let mut gauss = WG[3] * f0;
                    for k in 0..7 {
                        let fsum = f[offset + 1 + 2 * k] + f[offset + 2 + 2 * k];
                        kronrod += WGK[k] * fsum;
                        if k % 2 == 1 {
                            gauss += WG[k / 2] * fsum;
                        }
                    }
                    value[q] = kronrod * h;
                    error[q] = ((kronrod - gauss) * h).abs();
                }
                Estimate::new(cell, value, error, 0)
            }
            Rule::GenzMalik { n, w } => {
                let n = *n;
                let vol = cell.volume();
                let mut diff = vec![0.0; n];
                let pairs_start = offset + 1 + 4 * n;
                let corners_start = pairs_start + 2 * n * (n - 1);
                let corners = 1usize << n;

                for q in 0..nvalues {
                    let f = values.column(q);
                    let f0 = f[offset];
                    let mut sum2 = 0.0;
                    let mut sum3 = 0.0;
                    for (i, d) in diff.iter_mut().enumerate() {
                        let base = offset + 1 + 4 * i;
                        let (f2a, f2b, f3a, f3b) = (f[base], f[base + 1], f[base + 2], f[base + 3]);
                        sum2 += f2a + f2b;
                        sum3 += f3a + f3b;
                        *d += (f2a + f2b - 2.0 * f0 - GM_RATIO * (f3a + f3b - 2.0 * f0)).abs();
                    }
                    let sum4: f64 = f[pairs_start..corners_start].iter().sum();
                    let sum5: f64 = f[corners_start..corners_start + corners].iter().sum();

                    let seventh =
                        w.w1 * f0 + GM_WEIGHT2 * sum2 + w.w3 * sum3 + GM_WEIGHT4 * sum4 + w.w5 * sum5;
                    let fifth = w.e1 * f0 + GM_WEIGHT_E2 * sum2 + w.e3 * sum3 + GM_WEIGHT_E4 * sum4;
                    value[q] = vol * seventh;
                    error[q] = (vol * (seventh - fifth)).abs();
                }

                // largest fourth difference; near-ties go to the widest axis
                let max_diff = diff.iter().cloned().fold(0.0, f64::max);
                let mut split = 0;
                let mut widest = -1.0;
                for (i, &d) in diff.iter().enumerate() {
                    let tied = !(max_diff > 0.0) || (max_diff - d) <= 1e-10 * max_diff;
                    if tied && cell.halfwidth[i] > widest {
                        widest = cell.halfwidth[i];
                        split = i;
                    }
                }
                if !max_diff.is_finite() {
                    split = (0..n)
                        .max_by(|&a, &b| cell.halfwidth[a].total_cmp(&cell.halfwidth[b]))
                        .unwrap_or(0);
                }
                Estimate::new(cell, value, error, split)
            }
        }
    }
}
