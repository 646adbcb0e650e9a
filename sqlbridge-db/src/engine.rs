//! The engine: every boundary operation, keyed by generational tokens.
//!
//! The registry lock is held only while a token is looked up, inserted or
//! removed. Entries are `Arc`-shared, so work on independent connections
//! runs concurrently; calls on one connection queue up on its worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use log::{debug, info, warn};
use secrecy::SecretString;

use crate::error::{DbError, DbResult};
use crate::replica::{resolve_primary, PeriodicSync, Replica, ReplicaConfig};
use crate::session::{Cursor, Session};
use crate::slots::{Kind, SlotTable, Token};
use crate::sqlite::{self, OpenMode, SharedConn};
use crate::wire;

static INITIALIZED: OnceLock<DbResult<()>> = OnceLock::new();

/// Initializes the `SQLite` library once per process by opening a scratch
/// in-memory database.
///
/// Later calls return the outcome of the first one without repeating it.
///
/// # Errors
///
/// Fails if the library cannot open a database at all.
pub fn initialize() -> DbResult<()> {
    INITIALIZED
        .get_or_init(|| {
            let result = rusqlite::Connection::open_in_memory()
                .map(drop)
                .map_err(DbError::from);
            match &result {
                Ok(()) => info!("sqlite {} initialized", rusqlite::version()),
                Err(err) => warn!("sqlite initialization failed: {err}"),
            }
            result
        })
        .clone()
}

/// How connections to a database are made.
enum Target {
    /// A file opened per connection. `:memory:` gives every connection its
    /// own private database.
    Path { path: String, mode: OpenMode },
    /// An embedded replica and its periodic sync worker, if any.
    Replica {
        replica: Arc<Replica>,
        periodic: Option<PeriodicSync>,
    },
}

struct DatabaseEntry {
    target: Target,
}

impl DatabaseEntry {
    fn connect(&self) -> DbResult<Session> {
        match &self.target {
            Target::Path { path, mode } => SharedConn::open(path, *mode).map(Session::direct),
            Target::Replica { replica, .. } => Session::replica(replica),
        }
    }

    fn replica(&self) -> DbResult<&Arc<Replica>> {
        match &self.target {
            Target::Replica { replica, .. } => Ok(replica),
            Target::Path { .. } => Err(DbError::new(
                sqlite::SQLITE_MISUSE,
                "sync is only supported by embedded replicas",
            )),
        }
    }
}

impl Drop for DatabaseEntry {
    fn drop(&mut self) {
        if let Target::Replica { periodic, .. } = &mut self.target {
            if periodic.take().is_some() {
                debug!("stopped periodic sync");
            }
        }
    }
}

struct Registry {
    databases: SlotTable<Arc<DatabaseEntry>>,
    sessions: SlotTable<Arc<Session>>,
    cursors: SlotTable<Arc<Cursor>>,
}

impl Registry {
    const fn new() -> Self {
        Self {
            databases: SlotTable::new(Kind::Database),
            sessions: SlotTable::new(Kind::Session),
            cursors: SlotTable::new(Kind::Cursor),
        }
    }
}

/// Counts of live handles, by resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveHandles {
    /// Open databases.
    pub databases: usize,
    /// Open connections and transactions.
    pub connections: usize,
    /// Open row streams.
    pub rows: usize,
}

/// SQLite-backed implementation of every boundary operation.
///
/// Tokens returned by the engine are never `0`. A token that was closed,
/// belongs to another resource kind, or was never issued is rejected with a
/// `SQLITE_MISUSE` error.
pub struct Engine {
    registry: Mutex<Registry>,
    savepoints: AtomicU64,
}

impl Engine {
    /// Creates an engine, initializing `SQLite` if this is the first one.
    ///
    /// # Errors
    ///
    /// Fails if the library cannot be initialized.
    pub fn new() -> DbResult<Self> {
        initialize()?;
        Ok(Self {
            registry: Mutex::new(Registry::new()),
            savepoints: AtomicU64::new(0),
        })
    }

    // ── Database ────────────────────────────────────────────────────────

    /// Opens (or creates) a file-backed database at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or created.
    pub fn open_local(&self, path: &str) -> DbResult<Token> {
        // Open once so a bad path fails here rather than on first connect.
        sqlite::open(path, OpenMode::ReadWriteCreate)?;
        debug!("opened local database {path}");
        self.insert_database(Target::Path {
            path: path.to_string(),
            mode: OpenMode::ReadWriteCreate,
        })
    }

    /// Opens a remote primary with no local storage.
    ///
    /// # Errors
    ///
    /// Fails for unsupported transports and for primaries that do not exist.
    pub fn open_remote(&self, url: &str, auth_token: &str) -> DbResult<Token> {
        let path = resolve_primary(url)?;
        sqlite::open(&path, OpenMode::ReadWrite)?;
        debug!(
            "opened remote database {url} (token {})",
            if auth_token.is_empty() { "absent" } else { "present" }
        );
        self.insert_database(Target::Path {
            path,
            mode: OpenMode::ReadWrite,
        })
    }

    /// Opens a local replica at `path` of the primary at `url`.
    ///
    /// No sync happens at open time. A non-zero
    /// [`ReplicaConfig::sync_interval`] starts background syncing, which
    /// stops when the database is closed.
    ///
    /// # Errors
    ///
    /// Fails if either end cannot be opened.
    pub fn open_replica(
        &self,
        path: &str,
        url: &str,
        auth_token: &str,
        config: &ReplicaConfig,
    ) -> DbResult<Token> {
        let replica = Arc::new(Replica::open(
            path,
            url,
            SecretString::from(auth_token.to_string()),
            config.clone(),
        )?);
        let periodic = if config.sync_interval > Duration::ZERO {
            Some(PeriodicSync::start(&replica, config.sync_interval)?)
        } else {
            None
        };
        self.insert_database(Target::Replica { replica, periodic })
    }

    /// Opens a new connection to the database.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens or if the connection cannot be opened.
    pub fn db_connect(&self, db: Token) -> DbResult<Token> {
        let entry = self.database(db)?;
        let session = entry.connect()?;
        let token = self.registry()?.sessions.insert(Arc::new(session))?;
        debug!("connected {token:#x} to database {db:#x}");
        Ok(token)
    }

    /// Runs one sync round of a replica and returns the number of completed
    /// rounds.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens, non-replica databases and failed rounds.
    pub fn db_sync(&self, db: Token) -> DbResult<u64> {
        self.database(db)?.replica()?.sync()
    }

    /// Closes the database handle. Connections made from it stay open.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens.
    pub fn db_close(&self, db: Token) -> DbResult<()> {
        let entry = self.registry()?.databases.remove(db)?;
        // The sync worker stops once the last in-flight call lets go.
        drop(entry);
        debug!("closed database {db:#x}");
        Ok(())
    }

    // ── Connection / Transaction ────────────────────────────────────────

    /// Executes one statement with an encoded parameter set and returns the
    /// number of rows changed.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens, malformed parameters and SQL errors.
    pub fn conn_execute(&self, conn: Token, sql: &str, params: &[u8]) -> DbResult<u64> {
        let params = wire::decode_params(params)?;
        self.session(conn)?.execute(sql, &params)
    }

    /// Executes `;`-separated statements in order.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens and on the first failing statement.
    pub fn conn_execute_batch(&self, conn: Token, sql: &str) -> DbResult<()> {
        self.session(conn)?.execute_batch(sql)
    }

    /// Prepares a query and returns a rows token.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens, malformed parameters and SQL errors.
    pub fn conn_query(&self, conn: Token, sql: &str, params: &[u8]) -> DbResult<Token> {
        let params = wire::decode_params(params)?;
        let cursor = self.session(conn)?.query(sql, &params)?;
        self.registry()?.cursors.insert(Arc::new(cursor))
    }

    /// Opens a transaction on the connection (or a nested one on a
    /// transaction) and returns its own token.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens or if the engine refuses the transaction.
    pub fn conn_begin_transaction(&self, conn: Token) -> DbResult<Token> {
        let seq = self.savepoints.fetch_add(1, Ordering::Relaxed);
        let scope = self.session(conn)?.begin(seq)?;
        self.registry()?.sessions.insert(Arc::new(scope))
    }

    /// Closes a connection, or commits and closes a transaction.
    ///
    /// The token is invalid afterwards even when the commit fails.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens or a failed commit.
    pub fn conn_close(&self, conn: Token) -> DbResult<()> {
        let session = self.take_session(conn)?;
        debug!("closing connection {conn:#x}");
        session.close()
    }

    /// Closes a connection, or rolls back and closes a transaction.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens or a failed rollback.
    pub fn conn_abandon(&self, conn: Token) -> DbResult<()> {
        let session = self.take_session(conn)?;
        debug!("abandoning connection {conn:#x}");
        session.abandon()
    }

    // ── Rows ────────────────────────────────────────────────────────────

    /// Returns the next encoded row, or an empty buffer once exhausted.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens and on step errors.
    pub fn rows_next(&self, rows: Token) -> DbResult<Vec<u8>> {
        self.cursor(rows)?.next()
    }

    /// Number of result columns.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens.
    pub fn rows_column_count(&self, rows: Token) -> DbResult<u32> {
        self.cursor(rows)?.column_count()
    }

    /// Name of result column `idx`.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens and out-of-range indices.
    pub fn rows_column_name(&self, rows: Token, idx: u32) -> DbResult<String> {
        self.cursor(rows)?.column_name(idx)
    }

    /// Declared type of result column `idx`, `None` for expressions.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens and out-of-range indices.
    pub fn rows_column_type(&self, rows: Token, idx: u32) -> DbResult<Option<String>> {
        self.cursor(rows)?.column_type(idx)
    }

    /// Finalizes the query. A writing query on a read-your-writes replica
    /// then syncs the replica, on a best-effort basis.
    ///
    /// A call still running on another thread keeps the statement alive
    /// until it returns; finalizing and syncing happen then.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens.
    pub fn rows_close(&self, rows: Token) -> DbResult<()> {
        let cursor = self.registry()?.cursors.remove(rows)?;
        drop(cursor);
        debug!("closed rows {rows:#x}");
        Ok(())
    }

    // ── Introspection ───────────────────────────────────────────────────

    /// Counts the handles currently open.
    ///
    /// # Errors
    ///
    /// Fails if the registry lock is poisoned.
    pub fn live_handles(&self) -> DbResult<LiveHandles> {
        let registry = self.registry()?;
        Ok(LiveHandles {
            databases: registry.databases.len(),
            connections: registry.sessions.len(),
            rows: registry.cursors.len(),
        })
    }

    /// Number of completed sync rounds of a replica.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens and non-replica databases.
    pub fn sync_rounds(&self, db: Token) -> DbResult<u64> {
        Ok(self.database(db)?.replica()?.rounds())
    }

    /// Returns `true` if `conn` names an open transaction.
    ///
    /// # Errors
    ///
    /// Fails for stale tokens.
    pub fn is_transaction(&self, conn: Token) -> DbResult<bool> {
        Ok(self.session(conn)?.is_transaction())
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn registry(&self) -> DbResult<MutexGuard<'_, Registry>> {
        self.registry.lock().map_err(|_| DbError::poisoned("registry"))
    }

    fn insert_database(&self, target: Target) -> DbResult<Token> {
        let entry = Arc::new(DatabaseEntry { target });
        self.registry()?.databases.insert(entry)
    }

    fn database(&self, token: Token) -> DbResult<Arc<DatabaseEntry>> {
        self.registry()?.databases.get(token).cloned()
    }

    fn session(&self, token: Token) -> DbResult<Arc<Session>> {
        self.registry()?.sessions.get(token).cloned()
    }

    fn cursor(&self, token: Token) -> DbResult<Arc<Cursor>> {
        self.registry()?.cursors.get(token).cloned()
    }

    fn take_session(&self, token: Token) -> DbResult<Session> {
        let session = self.registry()?.sessions.remove(token)?;
        Arc::try_unwrap(session).map_err(|_| {
            DbError::new(
                sqlite::SQLITE_MISUSE,
                format!("connection {token:#x} closed while in use"),
            )
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::value::Params;

    fn drain(engine: &Engine, rows: Token) {
        while !engine.rows_next(rows).expect("next").is_empty() {}
    }

    #[test]
    fn test_rows_closed_mid_call_still_sync_the_replica() {
        let dir = TempDir::new().expect("tempdir");
        let primary_path = dir.path().join("primary.db");
        let primary_path = primary_path.to_str().expect("utf-8");
        let replica_path = dir.path().join("replica.db");
        let replica_path = replica_path.to_str().expect("utf-8");

        let engine = Engine::new().expect("engine");
        let primary = engine.open_local(primary_path).expect("open primary");
        let writer = engine.db_connect(primary).expect("connect primary");
        engine
            .conn_execute_batch(writer, "CREATE TABLE t (x)")
            .expect("seed");

        let db = engine
            .open_replica(
                replica_path,
                &format!("file://{primary_path}"),
                "",
                &ReplicaConfig::default(),
            )
            .expect("open replica");
        engine.db_sync(db).expect("initial sync");
        let conn = engine.db_connect(db).expect("connect replica");

        let params = wire::encode_params(&Params::None).expect("encode");
        let rows = engine
            .conn_query(conn, "INSERT INTO t VALUES (1) RETURNING x", &params)
            .expect("query");
        drain(&engine, rows);

        // Stands in for a pull still running on another thread.
        let in_flight = engine.cursor(rows).expect("cursor");
        engine.rows_close(rows).expect("close");
        assert_eq!(engine.sync_rounds(db).expect("rounds"), 1);
        assert!(engine.rows_next(rows).is_err());

        drop(in_flight);
        assert_eq!(engine.sync_rounds(db).expect("rounds"), 2);
    }
}
