//! FFI objects wrapping the core resources.
//!
//! Foreign code may call an object from any thread, so each wraps its
//! resource in a mutex. A poisoned lock is recovered: the resource itself
//! guards against use after close.

#![allow(clippy::implicit_hasher)] // UniFFI maps only the default-hasher `HashMap`

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::types::{named, positional, ReplicaOptions, SqlValue};
use crate::connection::Conn;
use crate::database::{Database, EmbeddedReplica};
use crate::driver::Driver;
use crate::error::Result;
use crate::rows::Rows;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opens (or creates) a local database file.
///
/// # Errors
///
/// Fails if the engine cannot be initialized or the file cannot be opened.
#[uniffi::export]
pub fn open_local(path: &str) -> Result<Arc<DatabaseHandle>> {
    let db = Driver::global()?.open_local(path)?;
    Ok(Arc::new(DatabaseHandle {
        inner: Mutex::new(db),
    }))
}

/// Opens a remote database.
///
/// # Errors
///
/// Fails if the engine cannot be initialized or the primary cannot be opened.
#[uniffi::export]
pub fn open_remote(url: &str, auth_token: &str) -> Result<Arc<DatabaseHandle>> {
    let db = Driver::global()?.open_remote(url, auth_token)?;
    Ok(Arc::new(DatabaseHandle {
        inner: Mutex::new(db),
    }))
}

/// Opens an embedded replica at `path` of the primary at `url`.
///
/// # Errors
///
/// Fails if the engine cannot be initialized or either end cannot be opened.
#[uniffi::export]
pub fn open_embedded_replica(
    path: &str,
    url: &str,
    auth_token: &str,
    options: ReplicaOptions,
) -> Result<Arc<ReplicaHandle>> {
    let replica = Driver::global()?.open_replica(path, url, auth_token, &options.into())?;
    Ok(Arc::new(ReplicaHandle {
        inner: Mutex::new(replica),
    }))
}

/// A local or remote database.
#[derive(uniffi::Object)]
pub struct DatabaseHandle {
    inner: Mutex<Database>,
}

#[uniffi::export]
impl DatabaseHandle {
    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Fails on a closed database or an engine error.
    pub fn connect(&self) -> Result<Arc<ConnectionHandle>> {
        let conn = lock(&self.inner).connect()?;
        Ok(ConnectionHandle::wrap(Box::new(conn)))
    }

    /// Closes the database. Its connections stay open.
    ///
    /// # Errors
    ///
    /// Fails if the database is already closed.
    pub fn close(&self) -> Result<()> {
        lock(&self.inner).close()
    }

    /// Returns `true` once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.inner).is_closed()
    }
}

/// An embedded replica.
#[derive(uniffi::Object)]
pub struct ReplicaHandle {
    inner: Mutex<EmbeddedReplica>,
}

#[uniffi::export]
impl ReplicaHandle {
    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Fails on a closed replica or an engine error.
    pub fn connect(&self) -> Result<Arc<ConnectionHandle>> {
        let conn = lock(&self.inner).connect()?;
        Ok(ConnectionHandle::wrap(Box::new(conn)))
    }

    /// Runs one sync round with the primary; returns the rounds completed.
    ///
    /// # Errors
    ///
    /// Fails on a closed replica or a failed round.
    pub fn sync(&self) -> Result<u64> {
        lock(&self.inner).sync()
    }

    /// Closes the replica and stops periodic sync.
    ///
    /// # Errors
    ///
    /// Fails if the replica is already closed.
    pub fn close(&self) -> Result<()> {
        lock(&self.inner).close()
    }

    /// Returns `true` once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.inner).is_closed()
    }
}

/// A connection or a transaction.
///
/// `close` commits a transaction; a transaction released without `close`
/// rolls back.
#[derive(uniffi::Object)]
pub struct ConnectionHandle {
    inner: Mutex<Box<dyn Conn + Send>>,
}

impl ConnectionHandle {
    fn wrap(conn: Box<dyn Conn + Send>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(conn),
        })
    }
}

#[uniffi::export]
impl ConnectionHandle {
    /// Executes one statement with positional parameters; returns the number
    /// of changed rows.
    ///
    /// # Errors
    ///
    /// Fails on a closed connection or an engine error.
    pub fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
        lock(&self.inner).execute_params(sql, &positional(params))
    }

    /// Executes one statement with named parameters.
    ///
    /// # Errors
    ///
    /// Fails on a closed connection or an engine error.
    pub fn execute_named(&self, sql: &str, params: HashMap<String, SqlValue>) -> Result<u64> {
        lock(&self.inner).execute_params(sql, &named(params))
    }

    /// Executes `;`-separated statements in order.
    ///
    /// # Errors
    ///
    /// Fails on a closed connection or at the first failing statement.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        lock(&self.inner).execute_batch(sql)
    }

    /// Starts a query with positional parameters.
    ///
    /// # Errors
    ///
    /// Fails on a closed connection or an engine error.
    pub fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Arc<RowsHandle>> {
        let rows = lock(&self.inner).query_params(sql, &positional(params))?;
        Ok(RowsHandle::wrap(rows))
    }

    /// Starts a query with named parameters.
    ///
    /// # Errors
    ///
    /// Fails on a closed connection or an engine error.
    pub fn query_named(
        &self,
        sql: &str,
        params: HashMap<String, SqlValue>,
    ) -> Result<Arc<RowsHandle>> {
        let rows = lock(&self.inner).query_params(sql, &named(params))?;
        Ok(RowsHandle::wrap(rows))
    }

    /// Opens a (nested) transaction with its own handle.
    ///
    /// # Errors
    ///
    /// Fails on a closed connection or when the engine refuses.
    pub fn transaction(&self) -> Result<Arc<Self>> {
        let tx = lock(&self.inner).transaction()?;
        Ok(Self::wrap(Box::new(tx)))
    }

    /// Closes the connection; commits a transaction.
    ///
    /// # Errors
    ///
    /// Fails if already closed, or if the commit fails (the handle is closed
    /// either way).
    pub fn close(&self) -> Result<()> {
        lock(&self.inner).close()
    }

    /// Returns `true` once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.inner).is_closed()
    }
}

/// A forward-only stream of rows.
#[derive(uniffi::Object)]
pub struct RowsHandle {
    inner: Mutex<Rows>,
}

impl RowsHandle {
    fn wrap(rows: Rows) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(rows),
        })
    }
}

#[uniffi::export]
impl RowsHandle {
    /// Pulls the next row. An empty list means the stream is exhausted.
    ///
    /// # Errors
    ///
    /// Fails on a closed stream, an engine error or a malformed row.
    pub fn next_row(&self) -> Result<Vec<SqlValue>> {
        let row = lock(&self.inner).next_row()?;
        Ok(row.into_iter().map(SqlValue::from).collect())
    }

    /// Number of result columns.
    ///
    /// # Errors
    ///
    /// Fails on a closed stream.
    pub fn column_count(&self) -> Result<u32> {
        lock(&self.inner).column_count()
    }

    /// Name of column `idx`.
    ///
    /// # Errors
    ///
    /// Fails on a closed stream or an out-of-range index.
    pub fn column_name(&self, idx: u32) -> Result<String> {
        lock(&self.inner).column_name(idx)
    }

    /// Declared type of column `idx`, if any.
    ///
    /// # Errors
    ///
    /// Fails on a closed stream or an out-of-range index.
    pub fn column_type(&self, idx: u32) -> Result<Option<String>> {
        lock(&self.inner).column_type(idx)
    }

    /// Closes the stream.
    ///
    /// # Errors
    ///
    /// Fails if already closed.
    pub fn close(&self) -> Result<()> {
        lock(&self.inner).close()
    }

    /// Returns `true` once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.inner).is_closed()
    }
}
