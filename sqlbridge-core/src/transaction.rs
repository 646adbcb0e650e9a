//! Transactions: connections with a commit-on-close scope.

use std::sync::Arc;

use sqlbridge_db::{Params, Token};

use crate::boundary::Boundary;
use crate::connection::{Conn, ConnectionCore};
use crate::error::Result;
use crate::handle::Resource;
use crate::rows::Rows;

/// An open transaction.
///
/// A transaction has its own handle, distinct from the connection (or
/// transaction) it was opened on, and supports every [`Conn`] operation.
/// Calling [`Conn::transaction`] on it opens a nested scope.
///
/// [`Conn::close`] commits (or releases, when nested). Dropping a
/// transaction without closing it rolls it back. Closing a transaction never
/// closes its parent.
#[derive(Debug)]
pub struct Transaction {
    core: ConnectionCore,
    depth: usize,
}

impl Transaction {
    pub(crate) fn new(token: Token, depth: usize, boundary: Arc<dyn Boundary>) -> Result<Self> {
        Ok(Self {
            core: ConnectionCore::new(token, Resource::Transaction, boundary)?,
            depth,
        })
    }

    /// Nesting depth: `1` for a transaction opened on a connection.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }
}

impl Conn for Transaction {
    fn execute_params(&self, sql: &str, params: &Params) -> Result<u64> {
        self.core.execute(sql, params)
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        self.core.execute_batch(sql)
    }

    fn query_params(&self, sql: &str, params: &Params) -> Result<Rows> {
        self.core.query(sql, params)
    }

    fn transaction(&self) -> Result<Self> {
        self.core.begin(self.depth + 1)
    }

    fn close(&mut self) -> Result<()> {
        self.core.close()
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    fn ensure_open(&self) -> Result<()> {
        self.core.ensure_open()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.core.release(true);
    }
}
