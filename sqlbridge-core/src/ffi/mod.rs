//! FFI bindings for databases, connections and row streams.
//!
//! Every object here wraps one of the crate's resources and keeps its
//! lifecycle rules: a closed object rejects further use, and a second
//! `close` fails.
//!
//! # Main Entry Points
//!
//! - [`open_local`], [`open_remote`] - Open a [`DatabaseHandle`]
//! - [`open_embedded_replica`] - Open a [`ReplicaHandle`]
//!
//! # Example (Kotlin)
//!
//! ```kotlin
//! val db = openLocal(context.filesDir.resolve("app.db").path)
//! val conn = db.connect()
//! conn.executeBatch("CREATE TABLE IF NOT EXISTS t (x INTEGER)")
//! conn.execute("INSERT INTO t (x) VALUES (?)", listOf(SqlValue.Integer(1)))
//!
//! val rows = conn.query("SELECT x FROM t", emptyList())
//! while (true) {
//!     val row = rows.nextRow()
//!     if (row.isEmpty()) break
//!     println(row)
//! }
//! rows.close()
//! conn.close()
//! db.close()
//! ```

mod handles;
mod types;

pub use handles::{
    open_embedded_replica, open_local, open_remote, ConnectionHandle, DatabaseHandle,
    ReplicaHandle, RowsHandle,
};
pub use types::{ReplicaOptions, SqlValue};
