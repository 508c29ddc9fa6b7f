//! Batch evaluators ("vector fields").
//!
//! A [`VectorField`] evaluates K values at each of M points of a D-dimensional
//! [`Batch`] in one call. Integrands, densities, distribution functions and
//! action maps all share this contract.
//!
//! Two kinds of evaluator exist and are told apart by their [`Execution`]
//! tag, not by their type signature:
//!
//! - native evaluators (closed-form models, [`FnField`]) are pure and may be
//!   called from several worker threads at once;
//! - external callbacks ([`UserFunction`]) carry no reentrancy guarantee.
//!   Any computation that reaches one, directly or through nested
//!   evaluators, runs single-threaded for the whole call and packs as many
//!   points as possible into each invocation.
//!
//! Every evaluator must be idempotent: the same input batch gives the same
//! output batch, because adaptive refinement may revisit overlapping regions.

use std::fmt;
use std::sync::Arc;

use crate::batch::Batch;

/// Whether an evaluator may be invoked concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    /// Thread-safe; batches may be dispatched across worker threads.
    #[default]
    Parallel,
    /// Must only be called from one thread at a time.
    Serial,
}

impl Execution {
    /// Combine two tags: a single serial component makes the whole chain serial.
    pub fn and(self, other: Execution) -> Execution {
        match (self, other) {
            (Execution::Parallel, Execution::Parallel) => Execution::Parallel,
            _ => Execution::Serial,
        }
    }

    /// True if worker-thread dispatch is allowed.
    pub fn is_parallel(self) -> bool {
        self == Execution::Parallel
    }
}

/// Evaluate `nvalues()` quantities at each point of a batch.
///
/// # Example
///
/// ```
/// use galaxy_df::{Batch, VectorField};
///
/// struct SquaredRadius;
///
/// impl VectorField for SquaredRadius {
///     fn ndim(&self) -> usize {
///         3
///     }
///     fn eval_batch(&self, points: &Batch, values: &mut Batch) {
///         let (x, y, z) = (points.column(0), points.column(1), points.column(2));
///         for (i, v) in values.column_mut(0).iter_mut().enumerate() {
///             *v = x[i] * x[i] + y[i] * y[i] + z[i] * z[i];
///         }
///     }
/// }
/// ```
pub trait VectorField: Send + Sync {
    /// Number of input components per point (D).
    fn ndim(&self) -> usize;

    /// Number of output values per point (K).
    fn nvalues(&self) -> usize {
        1
    }

    /// Thread-safety tag of this evaluator, including anything it calls.
    fn execution(&self) -> Execution {
        Execution::Parallel
    }

    /// Evaluate the field.
    ///
    /// # Arguments
    /// * `points` - M x `ndim()` input batch
    /// * `values` - Output: M x `nvalues()` batch, pre-allocated by the caller
    fn eval_batch(&self, points: &Batch, values: &mut Batch);
}

impl<T: VectorField + ?Sized> VectorField for &T {
    fn ndim(&self) -> usize {
        (**self).ndim()
    }
    fn nvalues(&self) -> usize {
        (**self).nvalues()
    }
    fn execution(&self) -> Execution {
        (**self).execution()
    }
    fn eval_batch(&self, points: &Batch, values: &mut Batch) {
        (**self).eval_batch(points, values)
    }
}

impl<T: VectorField + ?Sized> VectorField for Arc<T> {
    fn ndim(&self) -> usize {
        (**self).ndim()
    }
    fn nvalues(&self) -> usize {
        (**self).nvalues()
    }
    fn execution(&self) -> Execution {
        (**self).execution()
    }
    fn eval_batch(&self, points: &Batch, values: &mut Batch) {
        (**self).eval_batch(points, values)
    }
}

impl<T: VectorField + ?Sized> VectorField for Box<T> {
    fn ndim(&self) -> usize {
        (**self).ndim()
    }
    fn nvalues(&self) -> usize {
        (**self).nvalues()
    }
    fn execution(&self) -> Execution {
        (**self).execution()
    }
    fn eval_batch(&self, points: &Batch, values: &mut Batch) {
        (**self).eval_batch(points, values)
    }
}

/// Signature of an externally supplied batch callback.
///
/// The callback receives an M x D batch and returns M x K values in
/// column-major order (for K = 1, simply one value per point).
pub type BatchCallback = dyn Fn(&Batch) -> Vec<f64> + Send + Sync;

/// An externally supplied batch function.
///
/// The `Send + Sync` bounds only allow the handle to be shared; the
/// evaluator is tagged [`Execution::Serial`] and is never invoked from two
/// threads at once.
#[derive(Clone)]
pub struct UserFunction {
    ndim: usize,
    nvalues: usize,
    callback: Arc<BatchCallback>,
}

impl UserFunction {
    /// Wrap a scalar-valued callback of `ndim` inputs.
    pub fn new<F>(ndim: usize, callback: F) -> Self
    where
        F: Fn(&Batch) -> Vec<f64> + Send + Sync + 'static,
    {
        Self::with_values(ndim, 1, callback)
    }

    /// Wrap a callback returning `nvalues` outputs per point.
    pub fn with_values<F>(ndim: usize, nvalues: usize, callback: F) -> Self
    where
        F: Fn(&Batch) -> Vec<f64> + Send + Sync + 'static,
    {
        Self {
            ndim,
            nvalues,
            callback: Arc::new(callback),
        }
    }

    /// Invoke the callback directly, without shape checks.
    pub fn call(&self, points: &Batch) -> Vec<f64> {
        (self.callback)(points)
    }
}

impl fmt::Debug for UserFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserFunction")
            .field("ndim", &self.ndim)
            .field("nvalues", &self.nvalues)
            .finish_non_exhaustive()
    }
}

impl VectorField for UserFunction {
    fn ndim(&self) -> usize {
        self.ndim
    }

    fn nvalues(&self) -> usize {
        self.nvalues
    }

    fn execution(&self) -> Execution {
        Execution::Serial
    }

    fn eval_batch(&self, points: &Batch, values: &mut Batch) {
        let out = (self.callback)(points);
        let expected = points.rows() * self.nvalues;
        if out.len() != expected {
            log::error!(
                "user callback returned {} values for {} points (expected {}); treating as NaN",
                out.len(),
                points.rows(),
                expected
            );
            values.fill(f64::NAN);
            return;
        }
        values.as_mut_slice().copy_from_slice(&out);
    }
}

/// A native, thread-safe evaluator built from a closure that writes into
/// the output batch.
pub struct FnField<F> {
    ndim: usize,
    nvalues: usize,
    f: F,
}

impl<F> FnField<F>
where
    F: Fn(&Batch, &mut Batch) + Send + Sync,
{
    /// Scalar-valued field of `ndim` inputs.
    pub fn new(ndim: usize, f: F) -> Self {
        Self { ndim, nvalues: 1, f }
    }

    /// Field returning `nvalues` outputs per point.
    pub fn with_values(ndim: usize, nvalues: usize, f: F) -> Self {
        Self { ndim, nvalues, f }
    }
}

impl<F> VectorField for FnField<F>
where
    F: Fn(&Batch, &mut Batch) + Send + Sync,
{
    fn ndim(&self) -> usize {
        self.ndim
    }

    fn nvalues(&self) -> usize {
        self.nvalues
    }

    fn eval_batch(&self, points: &Batch, values: &mut Batch) {
        (self.f)(points, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_serial_dominates() {
        assert_eq!(Execution::Parallel.and(Execution::Parallel), Execution::Parallel);
        assert_eq!(Execution::Parallel.and(Execution::Serial), Execution::Serial);
        assert_eq!(Execution::Serial.and(Execution::Parallel), Execution::Serial);
    }

    #[test]
    fn test_user_function_is_serial() {
        let f = UserFunction::new(2, |p: &Batch| p.column(0).to_vec());
        assert_eq!(f.execution(), Execution::Serial);
        assert_eq!(f.ndim(), 2);

        let points = Batch::from_rows(&[[1.0, 2.0], [3.0, 4.0]]);
        let mut values = Batch::zeros(2, 1);
        f.eval_batch(&points, &mut values);
        assert_eq!(values.column(0), &[1.0, 3.0]);
    }

    #[test]
    fn test_user_function_wrong_length_gives_nan() {
        let f = UserFunction::new(1, |_p: &Batch| vec![1.0]);
        let points = Batch::from_rows(&[[1.0], [2.0], [3.0]]);
        let mut values = Batch::zeros(3, 1);
        f.eval_batch(&points, &mut values);
        assert!(values.as_slice().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_fn_field_is_parallel_and_idempotent() {
        let f = FnField::new(1, |p: &Batch, v: &mut Batch| {
            for (o, x) in v.column_mut(0).iter_mut().zip(p.column(0)) {
                *o = x.sin();
            }
        });
        assert!(f.execution().is_parallel());

        let points = Batch::from_rows(&[[0.1], [0.2], [0.3]]);
        let mut a = Batch::zeros(3, 1);
        let mut b = Batch::zeros(3, 1);
        f.eval_batch(&points, &mut a);
        f.eval_batch(&points, &mut b);
        assert_eq!(a, b);
    }
}
