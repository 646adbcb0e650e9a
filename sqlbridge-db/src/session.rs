//! Connection sessions, transaction scopes and cursors.
//!
//! A [`Session`] is what a connection or transaction token names inside the
//! engine. Sessions of a replica database carry a second, local connection
//! and route each statement: read-only statements run against the local
//! replica, everything else against the primary.
//!
//! Every session made from one connection shares a stack of open scope ids,
//! innermost last. Only the innermost scope may open a nested one, and a
//! scope that an outer scope already ended cannot be finalized again.

use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::error::{DbError, DbResult};
use crate::replica::Replica;
use crate::sqlite::{self, SharedConn, Stmt};
use crate::value::Params;
use crate::wire;

/// How a transaction scope is finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Finalize {
    /// Outermost transaction: `COMMIT` / `ROLLBACK`.
    Commit,
    /// Nested transaction on the named savepoint: `RELEASE` / `ROLLBACK TO`.
    Release(String),
}

impl Finalize {
    fn commit_sql(&self) -> String {
        match self {
            Self::Commit => "COMMIT".to_string(),
            Self::Release(name) => format!("RELEASE {name}"),
        }
    }

    fn rollback_sql(&self) -> String {
        match self {
            Self::Commit => "ROLLBACK".to_string(),
            Self::Release(name) => format!("ROLLBACK TO {name}; RELEASE {name}"),
        }
    }
}

#[derive(Debug)]
struct Scope {
    id: u64,
    finalize: Finalize,
}

/// Where a statement runs.
enum Route {
    Primary,
    Local(Arc<SharedConn>),
}

/// The target of a connection or transaction token.
#[derive(Debug)]
pub(crate) struct Session {
    primary: Arc<SharedConn>,
    local: Option<Arc<SharedConn>>,
    replica: Option<Arc<Replica>>,
    scopes: Arc<Mutex<Vec<u64>>>,
    scope: Option<Scope>,
}

impl Session {
    /// A plain connection to a local or remote database.
    pub(crate) fn direct(db: SharedConn) -> Self {
        Self {
            primary: Arc::new(db),
            local: None,
            replica: None,
            scopes: Arc::default(),
            scope: None,
        }
    }

    /// A connection to an embedded replica.
    pub(crate) fn replica(replica: &Arc<Replica>) -> DbResult<Self> {
        Ok(Self {
            primary: Arc::new(replica.connect_primary()?),
            local: Some(Arc::new(replica.connect_local()?)),
            replica: Some(Arc::clone(replica)),
            scopes: Arc::default(),
            scope: None,
        })
    }

    /// Returns `true` for transaction sessions.
    pub(crate) const fn is_transaction(&self) -> bool {
        self.scope.is_some()
    }

    /// Runs one statement to completion and returns the number of rows it
    /// changed.
    ///
    /// Once a write has committed, the result is the write's: a failed
    /// read-your-writes sync afterwards is logged, not returned.
    pub(crate) fn execute(&self, sql: &str, params: &Params) -> DbResult<u64> {
        self.ensure_open()?;
        match self.route(sql)? {
            Route::Local(local) => {
                local.execute(sql, params)?;
                Ok(0)
            }
            Route::Primary => {
                let executed = self.primary.execute(sql, params)?;
                if executed.writes {
                    self.after_write();
                }
                Ok(executed.changes)
            }
        }
    }

    /// Runs `;`-separated statements in order. Always on the primary.
    pub(crate) fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.ensure_open()?;
        self.primary.exec(sql)?;
        self.after_write();
        Ok(())
    }

    /// Prepares and binds a statement for row-by-row consumption.
    pub(crate) fn query(&self, sql: &str, params: &Params) -> DbResult<Cursor> {
        self.ensure_open()?;
        let stmt = match self.route(sql)? {
            Route::Local(local) => local.prepare(sql, params)?,
            Route::Primary => self.primary.prepare(sql, params)?,
        };
        let sync_on_close = if stmt.writes() {
            self.sync_target().map(SyncOnDrop)
        } else {
            None
        };
        Ok(Cursor {
            stmt,
            _sync_on_close: sync_on_close,
        })
    }

    /// Opens a transaction scope on the same underlying connection.
    ///
    /// The outermost scope uses `BEGIN DEFERRED`; scopes opened inside a
    /// transaction become savepoints named by `seq`. Fails while another
    /// scope of the connection is open and this session is not its
    /// innermost one.
    pub(crate) fn begin(&self, seq: u64) -> DbResult<Self> {
        let mut open = self.lock_scopes()?;
        match &self.scope {
            Some(scope) => {
                if !open.contains(&scope.id) {
                    return Err(ended());
                }
                if open.last() != Some(&scope.id) {
                    return Err(DbError::new(
                        sqlite::SQLITE_MISUSE,
                        "transaction already has an open nested transaction",
                    ));
                }
            }
            None if !open.is_empty() => {
                return Err(DbError::new(
                    sqlite::SQLITE_MISUSE,
                    "connection already has an open transaction",
                ));
            }
            None => {}
        }
        let finalize = if self.primary.is_autocommit()? {
            self.primary.exec("BEGIN DEFERRED")?;
            Finalize::Commit
        } else {
            let name = format!("sqlbridge_sp_{seq}");
            self.primary.exec(&format!("SAVEPOINT {name}"))?;
            Finalize::Release(name)
        };
        debug!("began transaction scope {seq} ({finalize:?})");
        open.push(seq);
        Ok(Self {
            primary: Arc::clone(&self.primary),
            local: None,
            replica: self.replica.clone(),
            scopes: Arc::clone(&self.scopes),
            scope: Some(Scope { id: seq, finalize }),
        })
    }

    /// Finalizes the session: commits a transaction scope, or simply lets a
    /// plain connection go.
    pub(crate) fn close(self) -> DbResult<()> {
        match &self.scope {
            Some(scope) => self.end(scope, true),
            None => Ok(()),
        }
    }

    /// Ends the session without committing: rolls back a transaction scope.
    pub(crate) fn abandon(self) -> DbResult<()> {
        match &self.scope {
            Some(scope) => self.end(scope, false),
            None => Ok(()),
        }
    }

    /// Commits or rolls back `scope` together with any scope nested in it.
    fn end(&self, scope: &Scope, commit: bool) -> DbResult<()> {
        let mut open = self.lock_scopes()?;
        let depth = open
            .iter()
            .position(|id| *id == scope.id)
            .ok_or_else(ended)?;
        open.truncate(depth);
        if self.primary.is_autocommit()? {
            // Ended behind our back, e.g. by a COMMIT inside a batch.
            open.clear();
            return Err(ended());
        }
        if !commit {
            debug!("rolling back transaction scope {} ({:?})", scope.id, scope.finalize);
            return self.primary.exec(&scope.finalize.rollback_sql());
        }
        if let Err(err) = self.primary.exec(&scope.finalize.commit_sql()) {
            // A failed commit must not keep the scope open behind a handle
            // that no longer exists.
            let _ = self.primary.exec(&scope.finalize.rollback_sql());
            return Err(err);
        }
        drop(open);
        self.after_write();
        Ok(())
    }

    fn ensure_open(&self) -> DbResult<()> {
        match &self.scope {
            Some(scope) if !self.lock_scopes()?.contains(&scope.id) => Err(ended()),
            _ => Ok(()),
        }
    }

    fn lock_scopes(&self) -> DbResult<MutexGuard<'_, Vec<u64>>> {
        self.scopes
            .lock()
            .map_err(|_| DbError::poisoned("transaction scopes"))
    }

    /// Decides where `sql` runs. Replica reads use the local file unless a
    /// transaction is open on the primary, or the local file missed a write
    /// and still cannot catch up.
    fn route(&self, sql: &str) -> DbResult<Route> {
        let (Some(local), Some(replica)) = (&self.local, &self.replica) else {
            return Ok(Route::Primary);
        };
        if self.primary.writes(sql)? || !self.primary.is_autocommit()? {
            return Ok(Route::Primary);
        }
        if replica.is_stale() && !replica.refresh() {
            return Ok(Route::Primary);
        }
        Ok(Route::Local(Arc::clone(local)))
    }

    /// Replica to sync after a committed write, if read-your-writes applies.
    fn sync_target(&self) -> Option<Arc<Replica>> {
        self.replica
            .as_ref()
            .filter(|replica| replica.config().read_your_writes)
            .cloned()
    }

    fn after_write(&self) {
        if let Some(replica) = self.sync_target() {
            if matches!(self.primary.is_autocommit(), Ok(true)) {
                replica.refresh();
            }
        }
    }
}

fn ended() -> DbError {
    DbError::new(sqlite::SQLITE_MISUSE, "transaction already ended")
}

/// Syncs a read-your-writes replica once dropped.
struct SyncOnDrop(Arc<Replica>);

impl Drop for SyncOnDrop {
    fn drop(&mut self) {
        self.0.refresh();
    }
}

/// An in-flight query. Rows are produced one at a time.
pub(crate) struct Cursor {
    // Fields drop in order: the statement is finalized before the sync.
    stmt: Stmt,
    _sync_on_close: Option<SyncOnDrop>,
}

impl Cursor {
    /// Encodes the next row, or returns an empty buffer once exhausted.
    ///
    /// The cursor stays exhausted: later pulls keep returning an empty
    /// buffer rather than restarting the statement.
    pub(crate) fn next(&self) -> DbResult<Vec<u8>> {
        match self.stmt.next_row()? {
            Some(values) => Ok(wire::encode_row(&values)?),
            None => Ok(Vec::new()),
        }
    }

    pub(crate) fn column_count(&self) -> DbResult<u32> {
        let count = self.stmt.column_count()?;
        Ok(u32::try_from(count).unwrap_or(0))
    }

    pub(crate) fn column_name(&self, idx: u32) -> DbResult<String> {
        self.stmt
            .column_name(column_index(idx)?)?
            .ok_or_else(|| out_of_range(idx))
    }

    /// Declared type of a column; `None` for expressions.
    pub(crate) fn column_type(&self, idx: u32) -> DbResult<Option<String>> {
        self.stmt
            .column_decltype(column_index(idx)?)?
            .ok_or_else(|| out_of_range(idx))
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("stmt", &self.stmt)
            .finish_non_exhaustive()
    }
}

fn column_index(idx: u32) -> DbResult<usize> {
    usize::try_from(idx).map_err(|_| out_of_range(idx))
}

fn out_of_range(idx: u32) -> DbError {
    DbError::new(
        sqlite::SQLITE_RANGE,
        format!("column index {idx} out of range"),
    )
}
