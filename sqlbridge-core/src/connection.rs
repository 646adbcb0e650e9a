//! Connections and the capability set they share with transactions.

use std::sync::Arc;

use log::{debug, warn};
use sqlbridge_db::{wire, Params, Token};

use crate::boundary::Boundary;
use crate::error::Result;
use crate::handle::{Handle, Resource};
use crate::rows::Rows;
use crate::transaction::Transaction;
use crate::value::IntoParams;

/// What can be done with a connection.
///
/// Implemented by [`Connection`] and [`Transaction`]; a transaction *is* a
/// connection and supports the identical set of operations. Every operation
/// checks that the handle is still open before anything else, including
/// parameter conversion.
pub trait Conn {
    /// Executes one statement with already-built parameters and returns the
    /// number of rows it changed.
    ///
    /// # Errors
    ///
    /// Fails on a closed handle or an engine error.
    fn execute_params(&self, sql: &str, params: &Params) -> Result<u64>;

    /// Executes `;`-separated statements in order. Produces no rows.
    ///
    /// # Errors
    ///
    /// Fails on a closed handle or at the first failing statement.
    fn execute_batch(&self, sql: &str) -> Result<()>;

    /// Starts a query with already-built parameters.
    ///
    /// # Errors
    ///
    /// Fails on a closed handle or an engine error.
    fn query_params(&self, sql: &str, params: &Params) -> Result<Rows>;

    /// Opens a transaction nested inside this connection's scope.
    ///
    /// # Errors
    ///
    /// Fails on a closed handle or when the engine refuses to nest.
    fn transaction(&self) -> Result<Transaction>;

    /// Closes the handle. A transaction commits.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DoubleClose`](crate::Error::DoubleClose) on a
    /// closed handle. An engine failure still leaves the handle closed.
    fn close(&mut self) -> Result<()>;

    /// Returns `true` once closed.
    fn is_closed(&self) -> bool;

    /// Fails with [`Error::UseAfterClose`](crate::Error::UseAfterClose) once
    /// closed.
    ///
    /// # Errors
    ///
    /// See above.
    fn ensure_open(&self) -> Result<()>;

    /// Executes one statement and returns the number of rows it changed.
    ///
    /// ```no_run
    /// # use sqlbridge_core::{params, Conn};
    /// # fn demo(conn: &sqlbridge_core::Connection) -> sqlbridge_core::Result<()> {
    /// conn.execute("INSERT INTO t (x) VALUES (?)", params![1_i64])?;
    /// conn.execute("DELETE FROM t", ())?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Fails on a closed handle, an unsupported parameter or an engine error.
    fn execute<P: IntoParams>(&self, sql: &str, params: P) -> Result<u64>
    where
        Self: Sized,
    {
        self.ensure_open()?;
        self.execute_params(sql, &params.into_params()?)
    }

    /// Starts a query and returns its row stream.
    ///
    /// # Errors
    ///
    /// Fails on a closed handle, an unsupported parameter or an engine error.
    fn query<P: IntoParams>(&self, sql: &str, params: P) -> Result<Rows>
    where
        Self: Sized,
    {
        self.ensure_open()?;
        self.query_params(sql, &params.into_params()?)
    }
}

/// State shared by [`Connection`] and [`Transaction`].
pub(crate) struct ConnectionCore {
    handle: Handle,
    boundary: Arc<dyn Boundary>,
}

impl ConnectionCore {
    pub(crate) fn new(token: Token, resource: Resource, boundary: Arc<dyn Boundary>) -> Result<Self> {
        Ok(Self {
            handle: Handle::new(token, resource)?,
            boundary,
        })
    }

    pub(crate) fn execute(&self, sql: &str, params: &Params) -> Result<u64> {
        let token = self.handle.get()?;
        let buf = wire::encode_params(params)?;
        Ok(self.boundary.conn_execute(token, sql, &buf)?)
    }

    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        let token = self.handle.get()?;
        Ok(self.boundary.conn_execute_batch(token, sql)?)
    }

    pub(crate) fn query(&self, sql: &str, params: &Params) -> Result<Rows> {
        let token = self.handle.get()?;
        let buf = wire::encode_params(params)?;
        let rows = self.boundary.conn_query(token, sql, &buf)?;
        Rows::new(rows, Arc::clone(&self.boundary))
    }

    /// Opens a transaction scope at `depth` on top of this one.
    pub(crate) fn begin(&self, depth: usize) -> Result<Transaction> {
        let token = self.handle.get()?;
        let tx = self.boundary.conn_begin_transaction(token)?;
        debug!("began transaction at depth {depth}");
        Transaction::new(tx, depth, Arc::clone(&self.boundary))
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        self.handle.get().map(|_| ())
    }

    pub(crate) const fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Closes the handle; the engine commits a transaction.
    pub(crate) fn close(&mut self) -> Result<()> {
        let boundary = Arc::clone(&self.boundary);
        self.handle.close_with(|token| boundary.conn_close(token))
    }

    /// Closes the handle; the engine rolls a transaction back.
    pub(crate) fn abandon(&mut self) -> Result<()> {
        let boundary = Arc::clone(&self.boundary);
        self.handle.close_with(|token| boundary.conn_abandon(token))
    }

    /// Best-effort cleanup for `Drop`.
    pub(crate) fn release(&mut self, abandon: bool) {
        if self.handle.is_closed() {
            return;
        }
        let resource = self.handle.resource();
        let result = if abandon { self.abandon() } else { self.close() };
        if let Err(err) = result {
            warn!("failed to release {resource} on drop: {err}");
        }
    }
}

impl std::fmt::Debug for ConnectionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCore")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// A connection to a database, obtained from
/// [`Database::connect`](crate::Database::connect).
///
/// Closed when dropped.
#[derive(Debug)]
pub struct Connection {
    core: ConnectionCore,
}

impl Connection {
    pub(crate) fn new(token: Token, boundary: Arc<dyn Boundary>) -> Result<Self> {
        Ok(Self {
            core: ConnectionCore::new(token, Resource::Connection, boundary)?,
        })
    }
}

impl Conn for Connection {
    fn execute_params(&self, sql: &str, params: &Params) -> Result<u64> {
        self.core.execute(sql, params)
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        self.core.execute_batch(sql)
    }

    fn query_params(&self, sql: &str, params: &Params) -> Result<Rows> {
        self.core.query(sql, params)
    }

    fn transaction(&self) -> Result<Transaction> {
        self.core.begin(1)
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

impl Drop for Connection {
    fn drop(&mut self) {
        self.core.release(false);
    }
}
