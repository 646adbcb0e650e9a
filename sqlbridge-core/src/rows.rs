//! Forward-only row streams.

use std::iter::FusedIterator;
use std::ops::Index;
use std::sync::Arc;

use log::warn;
use sqlbridge_db::{wire, Token, Value};

use crate::boundary::Boundary;
use crate::error::Result;
use crate::handle::{Handle, Resource};

/// One result row: the column values in statement order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(Vec<Value>);

impl Row {
    /// Number of values. Zero only for the exhaustion sentinel.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for the exhaustion sentinel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The value of column `idx`.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.0.get(idx)
    }

    /// All values, in column order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Consumes the row into its values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, idx: usize) -> &Value {
        &self.0[idx]
    }
}

impl IntoIterator for Row {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A pull-based cursor over the results of one query.
///
/// Each [`next_row`](Self::next_row) crosses the boundary once and decodes
/// one row. An empty [`Row`] means the stream is exhausted; it is not an
/// error. Column metadata is read from the engine on every call.
///
/// Dropping an open stream closes it.
pub struct Rows {
    handle: Handle,
    boundary: Arc<dyn Boundary>,
}

impl Rows {
    pub(crate) fn new(token: Token, boundary: Arc<dyn Boundary>) -> Result<Self> {
        Ok(Self {
            handle: Handle::new(token, Resource::Rows)?,
            boundary,
        })
    }

    /// Pulls the next row; an empty row signals exhaustion.
    ///
    /// # Errors
    ///
    /// Fails on a closed stream, an engine error or a malformed row buffer.
    pub fn next_row(&self) -> Result<Row> {
        let token = self.handle.get()?;
        let buf = self.boundary.rows_next(token)?;
        Ok(Row(wire::decode_row(&buf)?))
    }

    /// Pulls the next row, mapping exhaustion to `None`.
    ///
    /// # Errors
    ///
    /// Same as [`next_row`](Self::next_row).
    pub fn try_next(&self) -> Result<Option<Row>> {
        let row = self.next_row()?;
        Ok((!row.is_empty()).then_some(row))
    }

    /// Number of result columns.
    ///
    /// # Errors
    ///
    /// Fails on a closed stream or an engine error.
    pub fn column_count(&self) -> Result<u32> {
        Ok(self.boundary.rows_column_count(self.handle.get()?)?)
    }

    /// Name of column `idx`.
    ///
    /// # Errors
    ///
    /// Fails on a closed stream or an out-of-range index.
    pub fn column_name(&self, idx: u32) -> Result<String> {
        Ok(self.boundary.rows_column_name(self.handle.get()?, idx)?)
    }

    /// Declared type of column `idx`; `None` for expressions.
    ///
    /// # Errors
    ///
    /// Fails on a closed stream or an out-of-range index.
    pub fn column_type(&self, idx: u32) -> Result<Option<String>> {
        Ok(self.boundary.rows_column_type(self.handle.get()?, idx)?)
    }

    /// Closes the stream.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DoubleClose`](crate::Error::DoubleClose) on a
    /// closed stream; an engine failure still leaves the stream closed.
    pub fn close(&mut self) -> Result<()> {
        let boundary = Arc::clone(&self.boundary);
        self.handle.close_with(|token| boundary.rows_close(token))
    }

    /// Returns `true` once the stream is closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Iterates over the remaining rows.
    ///
    /// The iterator reads one row ahead so it can answer
    /// [`RowsIter::has_next`]; the first row is pulled here.
    #[must_use]
    pub fn iter(&self) -> RowsIter<'_> {
        RowsIter::new(self)
    }
}

impl<'a> IntoIterator for &'a Rows {
    type Item = Result<Row>;
    type IntoIter = RowsIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        if !self.handle.is_closed() {
            if let Err(err) = self.close() {
                warn!("failed to close rows on drop: {err}");
            }
        }
    }
}

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Iterator over a [`Rows`] stream with one row of look-ahead.
///
/// Rows come out in stream order and each is pulled from the boundary
/// exactly once. The iterator is fused: after exhaustion or an error it
/// yields nothing more.
pub struct RowsIter<'a> {
    rows: &'a Rows,
    next: Option<Result<Row>>,
    done: bool,
}

impl<'a> RowsIter<'a> {
    fn new(rows: &'a Rows) -> Self {
        let mut iter = Self {
            rows,
            next: None,
            done: false,
        };
        iter.next = iter.pull();
        iter
    }

    /// Returns `true` if another item is buffered.
    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.next.is_some()
    }

    fn pull(&mut self) -> Option<Result<Row>> {
        if self.done {
            return None;
        }
        match self.rows.next_row() {
            Ok(row) if row.is_empty() => {
                self.done = true;
                None
            }
            Ok(row) => Some(Ok(row)),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl Iterator for RowsIter<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = self.pull();
        Some(current)
    }
}

impl FusedIterator for RowsIter<'_> {}

impl std::fmt::Debug for RowsIter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowsIter")
            .field("has_next", &self.has_next())
            .field("done", &self.done)
            .finish()
    }
}
