//! Column-major point batches.
//!
//! Every evaluator in the crate works on whole batches of points at once.
//! A [`Batch`] stores M rows of D components with one contiguous column per
//! component, so that a callback can operate on `x`, `y`, `z` (or `Jr`,
//! `Jz`, `Jphi`) as plain slices.

use crate::error::{GalaxyError, GalaxyResult};

/// Position in Cartesian coordinates `(x, y, z)`.
pub type Point3 = [f64; 3];

/// Velocity in Cartesian coordinates `(vx, vy, vz)`.
pub type Velocity3 = [f64; 3];

/// Action triple `(Jr, Jz, Jphi)`.
pub type Action3 = [f64; 3];

/// An M x D matrix of `f64` stored column by column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Batch {
    /// A batch of `rows` points with `cols` components, all zero.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build a batch from an array-of-rows representation.
    pub fn from_rows<const D: usize>(rows: &[[f64; D]]) -> Self {
        let mut batch = Self::zeros(rows.len(), D);
        for (i, row) in rows.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                batch.data[j * batch.rows + i] = v;
            }
        }
        batch
    }

    /// Build a batch from its columns, which must all have the same length.
    pub fn from_columns(columns: &[&[f64]]) -> GalaxyResult<Self> {
        let rows = columns.first().map_or(0, |c| c.len());
        if let Some(bad) = columns.iter().position(|c| c.len() != rows) {
            return Err(GalaxyError::InvalidInput(format!(
                "column {} has length {}, expected {}",
                bad,
                columns[bad].len(),
                rows
            )));
        }
        let mut data = Vec::with_capacity(rows * columns.len());
        for c in columns {
            data.extend_from_slice(c);
        }
        Ok(Self {
            rows,
            cols: columns.len(),
            data,
        })
    }

    /// Wrap column-major storage of `rows * cols` values.
    pub fn from_column_major(rows: usize, cols: usize, data: Vec<f64>) -> GalaxyResult<Self> {
        if data.len() != rows * cols {
            return Err(GalaxyError::InvalidInput(format!(
                "{} values cannot form a {}x{} batch",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Number of points (M).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of components per point (D).
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// True when the batch holds no points.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Component `j` of every point.
    pub fn column(&self, j: usize) -> &[f64] {
        &self.data[j * self.rows..(j + 1) * self.rows]
    }

    /// Mutable access to component `j` of every point.
    pub fn column_mut(&mut self, j: usize) -> &mut [f64] {
        let rows = self.rows;
        &mut self.data[j * rows..(j + 1) * rows]
    }

    /// Component `j` of point `i`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[j * self.rows + i]
    }

    /// Set component `j` of point `i`.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[j * self.rows + i] = value;
    }

    /// Copy point `i` into a fixed-size array. `D` must not exceed `cols`.
    pub fn row<const D: usize>(&self, i: usize) -> [f64; D] {
        let mut out = [0.0; D];
        for (j, v) in out.iter_mut().enumerate() {
            *v = self.get(i, j);
        }
        out
    }

    /// Check the number of components, for entry points that require one.
    pub fn expect_cols(&self, cols: usize, what: &str) -> GalaxyResult<()> {
        if self.cols != cols {
            return Err(GalaxyError::InvalidInput(format!(
                "{} requires {} components per point, got {}",
                what, cols, self.cols
            )));
        }
        Ok(())
    }

    /// Raw column-major storage.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Mutable raw column-major storage.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Consume the batch and return its column-major storage.
    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Fill every entry with `value`.
    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    /// Rows `start..start + len` as a new batch.
    pub fn slice_rows(&self, start: usize, len: usize) -> Batch {
        let mut out = Batch::zeros(len, self.cols);
        for j in 0..self.cols {
            out.column_mut(j)
                .copy_from_slice(&self.column(j)[start..start + len]);
        }
        out
    }

    /// Write `src` into rows `start..start + src.rows()`.
    pub fn write_rows(&mut self, start: usize, src: &Batch) {
        for j in 0..self.cols.min(src.cols) {
            let len = src.rows;
            self.column_mut(j)[start..start + len].copy_from_slice(src.column(j));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_stored_column_major() {
        let b = Batch::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(b.rows(), 2);
        assert_eq!(b.cols(), 3);
        assert_eq!(b.as_slice(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(b.column(1), &[2.0, 5.0]);
        assert_eq!(b.row::<3>(1), [4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_from_columns_rejects_ragged_input() {
        let x = [1.0, 2.0];
        let y = [1.0];
        let result = Batch::from_columns(&[&x, &y]);
        assert!(matches!(result, Err(GalaxyError::InvalidInput(_))));
    }

    #[test]
    fn test_slice_and_write_rows() {
        let b = Batch::from_rows(&[[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]]);
        let mid = b.slice_rows(1, 2);
        assert_eq!(mid.row::<2>(0), [2.0, 20.0]);

        let mut target = Batch::zeros(4, 2);
        target.write_rows(2, &mid);
        assert_eq!(target.row::<2>(3), [3.0, 30.0]);
        assert_eq!(target.row::<2>(0), [0.0, 0.0]);
    }

    #[test]
    fn test_expect_cols() {
        let b = Batch::zeros(5, 3);
        assert!(b.expect_cols(3, "test").is_ok());
        assert!(b.expect_cols(6, "test").is_err());
    }
}
