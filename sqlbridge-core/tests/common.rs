//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use sqlbridge_core::{Boundary, DbError, DbResult, Driver, ReplicaConfig, Token};
use sqlbridge_db::Engine;
use tempfile::TempDir;

/// Engine result code for a busy database.
pub const BUSY: i32 = 5;

/// A [`Boundary`] that forwards to a private [`Engine`] and records every
/// call.
///
/// Closes can be made to fail after the engine has released the resource,
/// and row buffers can be replaced with garbage.
pub struct RecordingBoundary {
    engine: Engine,
    calls: Mutex<HashMap<&'static str, usize>>,
    fail_closes: AtomicBool,
    corrupt_rows: AtomicBool,
}

impl RecordingBoundary {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            engine: Engine::new().expect("engine"),
            calls: Mutex::new(HashMap::new()),
            fail_closes: AtomicBool::new(false),
            corrupt_rows: AtomicBool::new(false),
        })
    }

    pub fn driver(self: &Arc<Self>) -> Driver {
        Driver::with_boundary(self.clone())
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Number of times `op` crossed the boundary.
    pub fn calls(&self, op: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    pub fn fail_closes(&self, fail: bool) {
        self.fail_closes.store(fail, Ordering::SeqCst);
    }

    pub fn corrupt_rows(&self, corrupt: bool) {
        self.corrupt_rows.store(corrupt, Ordering::SeqCst);
    }

    fn record(&self, op: &'static str) {
        *self.calls.lock().expect("calls lock").entry(op).or_default() += 1;
    }

    fn close_result(&self, result: DbResult<()>) -> DbResult<()> {
        result?;
        if self.fail_closes.load(Ordering::SeqCst) {
            return Err(DbError::new(BUSY, "database is locked"));
        }
        Ok(())
    }
}

impl Boundary for RecordingBoundary {
    fn open_local(&self, path: &str) -> DbResult<Token> {
        self.record("open_local");
        self.engine.open_local(path)
    }

    fn open_remote(&self, url: &str, auth_token: &str) -> DbResult<Token> {
        self.record("open_remote");
        self.engine.open_remote(url, auth_token)
    }

    fn open_replica(
        &self,
        path: &str,
        url: &str,
        auth_token: &str,
        config: &ReplicaConfig,
    ) -> DbResult<Token> {
        self.record("open_replica");
        self.engine.open_replica(path, url, auth_token, config)
    }

    fn db_connect(&self, db: Token) -> DbResult<Token> {
        self.record("db_connect");
        self.engine.db_connect(db)
    }

    fn db_sync(&self, db: Token) -> DbResult<u64> {
        self.record("db_sync");
        self.engine.db_sync(db)
    }

    fn db_close(&self, db: Token) -> DbResult<()> {
        self.record("db_close");
        self.close_result(self.engine.db_close(db))
    }

    fn conn_execute(&self, conn: Token, sql: &str, params: &[u8]) -> DbResult<u64> {
        self.record("conn_execute");
        self.engine.conn_execute(conn, sql, params)
    }

    fn conn_execute_batch(&self, conn: Token, sql: &str) -> DbResult<()> {
        self.record("conn_execute_batch");
        self.engine.conn_execute_batch(conn, sql)
    }

    fn conn_query(&self, conn: Token, sql: &str, params: &[u8]) -> DbResult<Token> {
        self.record("conn_query");
        self.engine.conn_query(conn, sql, params)
    }

    fn conn_begin_transaction(&self, conn: Token) -> DbResult<Token> {
        self.record("conn_begin_transaction");
        self.engine.conn_begin_transaction(conn)
    }

    fn conn_close(&self, conn: Token) -> DbResult<()> {
        self.record("conn_close");
        self.close_result(self.engine.conn_close(conn))
    }

    fn conn_abandon(&self, conn: Token) -> DbResult<()> {
        self.record("conn_abandon");
        self.close_result(self.engine.conn_abandon(conn))
    }

    fn rows_next(&self, rows: Token) -> DbResult<Vec<u8>> {
        self.record("rows_next");
        let buf = self.engine.rows_next(rows)?;
        if self.corrupt_rows.load(Ordering::SeqCst) {
            return Ok(vec![0xff, 0x00]);
        }
        Ok(buf)
    }

    fn rows_column_count(&self, rows: Token) -> DbResult<u32> {
        self.record("rows_column_count");
        self.engine.rows_column_count(rows)
    }

    fn rows_column_name(&self, rows: Token, idx: u32) -> DbResult<String> {
        self.record("rows_column_name");
        self.engine.rows_column_name(rows, idx)
    }

    fn rows_column_type(&self, rows: Token, idx: u32) -> DbResult<Option<String>> {
        self.record("rows_column_type");
        self.engine.rows_column_type(rows, idx)
    }

    fn rows_close(&self, rows: Token) -> DbResult<()> {
        self.record("rows_close");
        self.close_result(self.engine.rows_close(rows))
    }
}

pub fn temp_root() -> TempDir {
    TempDir::new().expect("tempdir")
}

pub fn db_path(root: &Path, name: &str) -> PathBuf {
    root.join(name)
}

pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}
