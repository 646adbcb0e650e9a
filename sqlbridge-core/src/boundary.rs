//! The operations the core consumes from the SQL engine.

use std::sync::{Arc, OnceLock};

use log::debug;
use sqlbridge_db::{DbResult, Engine, ReplicaConfig, Token};

use crate::error::Result;

/// The engine side of the boundary.
///
/// Every resource is named by a nonzero [`Token`]; parameter sets and rows
/// travel as [`sqlbridge_db::wire`] buffers. The default implementation is
/// the bundled [`Engine`]; anything else (a test double, a network
/// transport) can be handed to [`Driver::with_boundary`](crate::Driver::with_boundary).
pub trait Boundary: Send + Sync {
    /// Opens or creates a file-backed database.
    fn open_local(&self, path: &str) -> DbResult<Token>;

    /// Opens a remote database with no local storage.
    fn open_remote(&self, url: &str, auth_token: &str) -> DbResult<Token>;

    /// Opens a local replica of a remote primary.
    fn open_replica(
        &self,
        path: &str,
        url: &str,
        auth_token: &str,
        config: &ReplicaConfig,
    ) -> DbResult<Token>;

    /// Opens a connection to a database.
    fn db_connect(&self, db: Token) -> DbResult<Token>;

    /// Runs one sync round of a replica; returns the completed round count.
    fn db_sync(&self, db: Token) -> DbResult<u64>;

    /// Closes a database.
    fn db_close(&self, db: Token) -> DbResult<()>;

    /// Executes one statement; returns the number of changed rows.
    fn conn_execute(&self, conn: Token, sql: &str, params: &[u8]) -> DbResult<u64>;

    /// Executes `;`-separated statements in order.
    fn conn_execute_batch(&self, conn: Token, sql: &str) -> DbResult<()>;

    /// Starts a query; returns a rows token.
    fn conn_query(&self, conn: Token, sql: &str, params: &[u8]) -> DbResult<Token>;

    /// Opens a (possibly nested) transaction; returns its own token.
    fn conn_begin_transaction(&self, conn: Token) -> DbResult<Token>;

    /// Closes a connection; commits a transaction.
    fn conn_close(&self, conn: Token) -> DbResult<()>;

    /// Closes a connection; rolls a transaction back.
    fn conn_abandon(&self, conn: Token) -> DbResult<()>;

    /// Returns the next encoded row, empty once exhausted.
    fn rows_next(&self, rows: Token) -> DbResult<Vec<u8>>;

    /// Number of result columns.
    fn rows_column_count(&self, rows: Token) -> DbResult<u32>;

    /// Name of a result column.
    fn rows_column_name(&self, rows: Token, idx: u32) -> DbResult<String>;

    /// Declared type of a result column, if any.
    fn rows_column_type(&self, rows: Token, idx: u32) -> DbResult<Option<String>>;

    /// Closes a rows stream.
    fn rows_close(&self, rows: Token) -> DbResult<()>;
}

impl Boundary for Engine {
    fn open_local(&self, path: &str) -> DbResult<Token> {
        Self::open_local(self, path)
    }

    fn open_remote(&self, url: &str, auth_token: &str) -> DbResult<Token> {
        Self::open_remote(self, url, auth_token)
    }

    fn open_replica(
        &self,
        path: &str,
        url: &str,
        auth_token: &str,
        config: &ReplicaConfig,
    ) -> DbResult<Token> {
        Self::open_replica(self, path, url, auth_token, config)
    }

    fn db_connect(&self, db: Token) -> DbResult<Token> {
        Self::db_connect(self, db)
    }

    fn db_sync(&self, db: Token) -> DbResult<u64> {
        Self::db_sync(self, db)
    }

    fn db_close(&self, db: Token) -> DbResult<()> {
        Self::db_close(self, db)
    }

    fn conn_execute(&self, conn: Token, sql: &str, params: &[u8]) -> DbResult<u64> {
        Self::conn_execute(self, conn, sql, params)
    }

    fn conn_execute_batch(&self, conn: Token, sql: &str) -> DbResult<()> {
        Self::conn_execute_batch(self, conn, sql)
    }

    fn conn_query(&self, conn: Token, sql: &str, params: &[u8]) -> DbResult<Token> {
        Self::conn_query(self, conn, sql, params)
    }

    fn conn_begin_transaction(&self, conn: Token) -> DbResult<Token> {
        Self::conn_begin_transaction(self, conn)
    }

    fn conn_close(&self, conn: Token) -> DbResult<()> {
        Self::conn_close(self, conn)
    }

    fn conn_abandon(&self, conn: Token) -> DbResult<()> {
        Self::conn_abandon(self, conn)
    }

    fn rows_next(&self, rows: Token) -> DbResult<Vec<u8>> {
        Self::rows_next(self, rows)
    }

    fn rows_column_count(&self, rows: Token) -> DbResult<u32> {
        Self::rows_column_count(self, rows)
    }

    fn rows_column_name(&self, rows: Token, idx: u32) -> DbResult<String> {
        Self::rows_column_name(self, rows, idx)
    }

    fn rows_column_type(&self, rows: Token, idx: u32) -> DbResult<Option<String>> {
        Self::rows_column_type(self, rows, idx)
    }

    fn rows_close(&self, rows: Token) -> DbResult<()> {
        Self::rows_close(self, rows)
    }
}

static BOUNDARY: OnceLock<Arc<dyn Boundary>> = OnceLock::new();

/// Initializes the process-wide engine.
///
/// The first call initializes `SQLite` and creates the shared [`Engine`];
/// every later call returns that same engine. All of the `open_*` entry
/// points call this, so calling it up front is only needed to surface
/// initialization failures early.
///
/// # Errors
///
/// Fails if the engine cannot be initialized.
pub fn init() -> Result<Arc<dyn Boundary>> {
    if let Some(boundary) = BOUNDARY.get() {
        return Ok(Arc::clone(boundary));
    }
    let engine = Engine::new()?;
    let boundary = BOUNDARY.get_or_init(|| {
        debug!("process engine created");
        Arc::new(engine)
    });
    Ok(Arc::clone(boundary))
}
