//! `SQLite` connections and statements on top of `rusqlite`.
//!
//! A [`SharedConn`] is one `rusqlite::Connection` owned by a dedicated
//! worker thread. Sessions, transaction scopes and cursors send it jobs over
//! a channel and wait for the reply. Open statements live on the worker next
//! to the connection they borrow, so a cursor can be stepped one row per
//! call from any thread.

use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use rusqlite::backup::{Backup, StepResult};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, OpenFlags, Statement};

use crate::error::{DbError, DbResult};
use crate::value::{Params, Value};

pub(crate) use rusqlite::ffi::{
    SQLITE_BUSY, SQLITE_CANTOPEN, SQLITE_ERROR, SQLITE_LOCKED, SQLITE_MISMATCH, SQLITE_MISUSE,
    SQLITE_RANGE, SQLITE_TOOBIG,
};

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// How a database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenMode {
    /// Read-only; the file must exist.
    ReadOnly,
    /// Read-write; the file must exist.
    ReadWrite,
    /// Read-write, creating the file if missing.
    ReadWriteCreate,
}

impl OpenMode {
    const fn flags(self) -> OpenFlags {
        let access = match self {
            Self::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            Self::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE,
            Self::ReadWriteCreate => OpenFlags::SQLITE_OPEN_READ_WRITE
                .union(OpenFlags::SQLITE_OPEN_CREATE),
        };
        access.union(OpenFlags::SQLITE_OPEN_NO_MUTEX)
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            // Primary code only; extended codes keep it in the low byte.
            rusqlite::Error::SqliteFailure(failure, _)
            | rusqlite::Error::SqlInputError { error: failure, .. } => failure.extended_code & 0xff,
            rusqlite::Error::InvalidParameterCount(..)
            | rusqlite::Error::InvalidColumnIndex(_)
            | rusqlite::Error::InvalidParameterName(_) => SQLITE_RANGE,
            rusqlite::Error::NulError(_) | rusqlite::Error::MultipleStatement => SQLITE_MISUSE,
            rusqlite::Error::InvalidPath(_) => SQLITE_CANTOPEN,
            rusqlite::Error::ToSqlConversionFailure(_) => SQLITE_MISMATCH,
            _ => SQLITE_ERROR,
        };
        let message = match &err {
            rusqlite::Error::SqliteFailure(_, Some(message)) => message.clone(),
            other => other.to_string(),
        };
        Self::new(code, message)
    }
}

/// Opens the database at `path` on the calling thread.
pub(crate) fn open(path: &str, mode: OpenMode) -> DbResult<Connection> {
    let conn = Connection::open_with_flags(path, mode.flags())
        .map_err(|err| with_context(err, &format!("cannot open {path}")))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Replaces the content of `target` with the content of `source`.
///
/// A lock conflict on either side fails with `SQLITE_BUSY` or
/// `SQLITE_LOCKED` instead of waiting.
pub(crate) fn copy_database(source: &Connection, target: &mut Connection) -> DbResult<()> {
    let backup = Backup::new(source, target)?;
    loop {
        match backup.step(-1)? {
            StepResult::Done => return Ok(()),
            StepResult::Busy => return Err(DbError::new(SQLITE_BUSY, "database is locked")),
            StepResult::Locked => {
                return Err(DbError::new(SQLITE_LOCKED, "database table is locked"));
            }
            _ => {}
        }
    }
}

fn with_context(err: rusqlite::Error, context: &str) -> DbError {
    let err = DbError::from(err);
    DbError::new(err.code.0, format!("{context}: {}", err.message))
}

// =============================================================================
// Worker
// =============================================================================

type Job = Box<dyn for<'c> FnOnce(&mut Worker<'c>) + Send>;

/// State owned by a connection's worker thread.
struct Worker<'c> {
    conn: &'c Connection,
    statements: HashMap<u64, Open<'c>>,
    next_id: u64,
}

struct Open<'c> {
    stmt: Statement<'c>,
    done: bool,
}

impl<'c> Worker<'c> {
    fn statement(&mut self, id: u64) -> DbResult<&mut Open<'c>> {
        self.statements
            .get_mut(&id)
            .ok_or_else(|| DbError::new(SQLITE_MISUSE, "statement already finalized"))
    }
}

fn serve(conn: Connection, jobs: mpsc::Receiver<Job>) {
    let mut worker = Worker {
        conn: &conn,
        statements: HashMap::new(),
        next_id: 0,
    };
    for job in jobs {
        job(&mut worker);
    }
    drop(worker);
    if let Err((_, err)) = conn.close() {
        warn!("closing connection failed: {err}");
    }
}

// =============================================================================
// SharedConn
// =============================================================================

/// Outcome of [`SharedConn::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Executed {
    /// Rows changed; `0` for read-only statements.
    pub(crate) changes: u64,
    pub(crate) writes: bool,
}

/// A connection shared by a session, its transaction scopes and their
/// cursors. Dropping the last reference closes it.
pub(crate) struct SharedConn {
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl SharedConn {
    /// Opens the database at `path` and hands the connection to a new
    /// worker thread.
    pub(crate) fn open(path: &str, mode: OpenMode) -> DbResult<Self> {
        let conn = open(path, mode)?;
        let (jobs, queue) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name("sqlbridge-conn".to_string())
            .spawn(move || serve(conn, queue))
            .map_err(|e| {
                DbError::new(SQLITE_ERROR, format!("cannot start connection thread: {e}"))
            })?;
        Ok(Self {
            jobs: Some(jobs),
            worker: Some(worker),
        })
    }

    /// Executes one or more `;`-separated statements, discarding any rows.
    pub(crate) fn exec(&self, sql: &str) -> DbResult<()> {
        let sql = sql.to_string();
        self.call(move |worker| Ok(worker.conn.execute_batch(&sql)?))
    }

    /// Returns `true` when no transaction is open on this connection.
    pub(crate) fn is_autocommit(&self) -> DbResult<bool> {
        self.call(|worker| Ok(worker.conn.is_autocommit()))
    }

    /// Prepares `sql` without running it and reports whether it writes.
    pub(crate) fn writes(&self, sql: &str) -> DbResult<bool> {
        let sql = sql.to_string();
        self.call(move |worker| Ok(!worker.conn.prepare(&sql)?.readonly()))
    }

    /// Runs one statement to completion, discarding any rows.
    pub(crate) fn execute(&self, sql: &str, params: &Params) -> DbResult<Executed> {
        let sql = sql.to_string();
        let params = params.clone();
        self.call(move |worker| {
            let mut stmt = worker.conn.prepare(&sql)?;
            bind(&mut stmt, &params)?;
            let mut rows = stmt.raw_query();
            while rows.next()?.is_some() {}
            drop(rows);
            let writes = !stmt.readonly();
            Ok(Executed {
                changes: if writes { worker.conn.changes() } else { 0 },
                writes,
            })
        })
    }

    /// Prepares and binds a statement for row-by-row consumption.
    pub(crate) fn prepare(self: &Arc<Self>, sql: &str, params: &Params) -> DbResult<Stmt> {
        let sql = sql.to_string();
        let params = params.clone();
        let (id, writes) = self.call(move |worker| {
            let mut stmt = worker.conn.prepare(&sql)?;
            bind(&mut stmt, &params)?;
            let writes = !stmt.readonly();
            let id = worker.next_id;
            worker.next_id += 1;
            worker.statements.insert(id, Open { stmt, done: false });
            Ok((id, writes))
        })?;
        Ok(Stmt {
            conn: Arc::clone(self),
            id,
            writes,
        })
    }

    /// Runs `f` on the worker thread and waits for its result.
    fn call<R, F>(&self, f: F) -> DbResult<R>
    where
        R: Send + 'static,
        F: for<'c> FnOnce(&mut Worker<'c>) -> DbResult<R> + Send + 'static,
    {
        let (reply, result) = mpsc::sync_channel(1);
        let job: Job = Box::new(move |worker: &mut Worker<'_>| {
            let _ = reply.send(f(worker));
        });
        self.jobs
            .as_ref()
            .and_then(|jobs| jobs.send(job).ok())
            .ok_or_else(closed)?;
        result.recv().map_err(|_| closed())?
    }
}

fn closed() -> DbError {
    DbError::new(SQLITE_MISUSE, "connection thread is gone")
}

impl Drop for SharedConn {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop.
        drop(self.jobs.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("connection thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for SharedConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConn").finish_non_exhaustive()
    }
}

// =============================================================================
// Stmt
// =============================================================================

/// A prepared statement parked on its connection's worker. Finalized on
/// drop.
pub(crate) struct Stmt {
    conn: Arc<SharedConn>,
    id: u64,
    writes: bool,
}

impl Stmt {
    /// Returns `true` if the statement changes the database.
    pub(crate) const fn writes(&self) -> bool {
        self.writes
    }

    /// Steps to the next row. `None` once the statement is exhausted; it
    /// stays exhausted afterwards, including after a failed step.
    pub(crate) fn next_row(&self) -> DbResult<Option<Vec<Value>>> {
        self.with(|open| {
            if open.done {
                return Ok(None);
            }
            let width = open.stmt.column_count();
            let mut rows = open.stmt.raw_query();
            let row = match rows.next() {
                Ok(Some(row)) => (0..width)
                    .map(|idx| row.get_ref(idx).map(value_from_ref))
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map(Some),
                Ok(None) => Ok(None),
                Err(err) => Err(err),
            };
            if matches!(row, Ok(Some(_))) {
                // Dropping `Rows` resets the statement. It owns nothing else,
                // so forgetting it keeps the cursor where it is.
                std::mem::forget(rows);
            } else {
                drop(rows);
                open.done = true;
            }
            Ok(row?)
        })
    }

    pub(crate) fn column_count(&self) -> DbResult<usize> {
        self.with(|open| Ok(open.stmt.column_count()))
    }

    /// Name of result column `idx`, `None` when out of range.
    pub(crate) fn column_name(&self, idx: usize) -> DbResult<Option<String>> {
        self.with(move |open| Ok(open.stmt.column_name(idx).ok().map(str::to_string)))
    }

    /// Declared type of result column `idx`. The outer `None` means out of
    /// range, the inner one an expression column.
    pub(crate) fn column_decltype(&self, idx: usize) -> DbResult<Option<Option<String>>> {
        self.with(move |open| {
            Ok(open
                .stmt
                .columns()
                .get(idx)
                .map(|column| column.decl_type().map(str::to_string)))
        })
    }

    fn with<R, F>(&self, f: F) -> DbResult<R>
    where
        R: Send + 'static,
        F: for<'a, 'c> FnOnce(&'a mut Open<'c>) -> DbResult<R> + Send + 'static,
    {
        let id = self.id;
        self.conn.call(move |worker| f(worker.statement(id)?))
    }
}

impl Drop for Stmt {
    fn drop(&mut self) {
        let id = self.id;
        let finalized = self.conn.call(move |worker| {
            worker.statements.remove(&id);
            Ok(())
        });
        if let Err(err) = finalized {
            debug!("statement {id} not finalized: {err}");
        }
    }
}

impl std::fmt::Debug for Stmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stmt")
            .field("id", &self.id)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Values and parameters
// =============================================================================

/// Converts a column value. TEXT that is not valid UTF-8 comes back as a
/// blob with the same bytes.
fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::Text(text.to_string()),
            Err(_) => Value::Blob(bytes.to_vec()),
        },
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

fn value_to_ref(value: &Value) -> ValueRef<'_> {
    match value {
        Value::Null => ValueRef::Null,
        Value::Integer(v) => ValueRef::Integer(*v),
        Value::Real(v) => ValueRef::Real(*v),
        Value::Text(v) => ValueRef::Text(v.as_bytes()),
        Value::Blob(v) => ValueRef::Blob(v),
    }
}

/// Binds a decoded parameter set to `stmt`.
fn bind(stmt: &mut Statement<'_>, params: &Params) -> DbResult<()> {
    match params {
        Params::None => Ok(()),
        Params::Positional(values) => {
            let declared = stmt.parameter_count();
            if values.len() > declared {
                return Err(DbError::new(
                    SQLITE_RANGE,
                    format!(
                        "{} positional parameters supplied, statement takes {declared}",
                        values.len()
                    ),
                ));
            }
            for (idx, value) in (1..).zip(values) {
                stmt.raw_bind_parameter(idx, ToSqlOutput::Borrowed(value_to_ref(value)))?;
            }
            Ok(())
        }
        Params::Named(values) => {
            for (name, value) in values {
                let idx = named_index(stmt, name)?.ok_or_else(|| {
                    DbError::new(SQLITE_RANGE, format!("no parameter named {name}"))
                })?;
                stmt.raw_bind_parameter(idx, ToSqlOutput::Borrowed(value_to_ref(value)))?;
            }
            Ok(())
        }
    }
}

/// Looks `name` up as given when it carries a prefix, otherwise tries each
/// of `:`, `@` and `$`.
fn named_index(stmt: &Statement<'_>, name: &str) -> DbResult<Option<usize>> {
    if name.starts_with([':', '@', '$', '?']) {
        return Ok(stmt.parameter_index(name)?);
    }
    for prefix in [':', '@', '$'] {
        if let Some(idx) = stmt.parameter_index(&format!("{prefix}{name}"))? {
            return Ok(Some(idx));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shared(dir: &TempDir) -> Arc<SharedConn> {
        let path = dir.path().join("unit.db");
        let path = path.to_str().expect("utf-8 temp path");
        Arc::new(SharedConn::open(path, OpenMode::ReadWriteCreate).expect("open"))
    }

    #[test]
    fn test_statement_steps_one_row_per_call() {
        let dir = TempDir::new().expect("tempdir");
        let conn = shared(&dir);
        conn.exec("CREATE TABLE t (x); CREATE TABLE u (y); INSERT INTO t VALUES (1), (2);")
            .expect("seed");

        let stmt = conn
            .prepare("SELECT x FROM t ORDER BY x", &Params::None)
            .expect("prepare");
        assert!(!stmt.writes());
        assert_eq!(stmt.next_row().expect("row"), Some(vec![Value::Integer(1)]));
        // Other work on the connection does not disturb the cursor.
        assert_eq!(
            conn.execute("INSERT INTO u VALUES (3)", &Params::None)
                .expect("insert")
                .changes,
            1
        );
        assert_eq!(stmt.next_row().expect("row"), Some(vec![Value::Integer(2)]));
        assert_eq!(stmt.next_row().expect("end"), None);
        assert_eq!(stmt.next_row().expect("still done"), None);
    }

    #[test]
    fn test_invalid_utf8_text_comes_back_as_blob() {
        let dir = TempDir::new().expect("tempdir");
        let conn = shared(&dir);
        let stmt = conn
            .prepare("SELECT CAST(x'ff61' AS TEXT), typeof(CAST(x'ff61' AS TEXT))", &Params::None)
            .expect("prepare");
        assert_eq!(
            stmt.next_row().expect("row"),
            Some(vec![
                Value::Blob(vec![0xff, 0x61]),
                Value::Text("text".to_string())
            ])
        );
    }

    #[test]
    fn test_copy_database_fails_fast_when_target_is_locked() {
        let dir = TempDir::new().expect("tempdir");
        let source_path = dir.path().join("source.db");
        let target_path = dir.path().join("target.db");
        let source_path = source_path.to_str().expect("utf-8");
        let target_path = target_path.to_str().expect("utf-8");

        let source = open(source_path, OpenMode::ReadWriteCreate).expect("source");
        source.execute_batch("CREATE TABLE t (x)").expect("seed");
        let holder = open(target_path, OpenMode::ReadWriteCreate).expect("holder");
        holder.execute_batch("BEGIN EXCLUSIVE").expect("lock");

        let mut target = open(target_path, OpenMode::ReadWrite).expect("target");
        target.busy_timeout(Duration::ZERO).expect("timeout");
        let err = copy_database(&source, &mut target).expect_err("locked");
        assert!(err.is_busy(), "{err}");

        holder.execute_batch("COMMIT").expect("unlock");
        copy_database(&source, &mut target).expect("copy");
    }
}
