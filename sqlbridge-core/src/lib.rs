//! Client-side access to sqlbridge databases.
//!
//! This crate is the application's half of the sqlbridge boundary. It owns
//! the lifecycle of every remote resource and marshals values across:
//!
//! * [`Driver`] (or the [`open_local`], [`open_remote`] and [`open_replica`]
//!   shortcuts) opens a [`Database`] or an [`EmbeddedReplica`].
//! * A [`Connection`] executes statements; a [`Transaction`] is a connection
//!   with a commit-on-close scope. Both implement [`Conn`].
//! * [`Rows`] is a forward-only stream of [`Row`]s.
//!
//! Every resource is closed exactly once: a closed resource rejects further
//! use with [`Error::UseAfterClose`] and a second close fails with
//! [`Error::DoubleClose`]. Dropping an open resource closes it.
//!
//! ```no_run
//! use sqlbridge_core::{params, Conn};
//!
//! # fn main() -> sqlbridge_core::Result<()> {
//! let db = sqlbridge_core::open_local("app.db")?;
//! let conn = db.connect()?;
//! conn.execute_batch("CREATE TABLE IF NOT EXISTS t (x INTEGER)")?;
//! conn.execute("INSERT INTO t (x) VALUES (?)", params![42_i64])?;
//! for row in &conn.query("SELECT x FROM t", ())? {
//!     println!("{:?}", row?.values());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Foreign callers use the [`ffi`] module, exported with `UniFFI`.

mod boundary;
mod connection;
mod database;
mod driver;
mod error;
mod handle;
mod rows;
mod transaction;
mod value;

pub mod ffi;
pub mod logger;

pub use boundary::{init, Boundary};
pub use connection::{Conn, Connection};
pub use database::{Database, EmbeddedReplica, Mode};
pub use driver::{open_local, open_remote, open_replica, Driver};
pub use error::{Error, Result};
pub use handle::Resource;
pub use rows::{Row, Rows, RowsIter};
pub use transaction::Transaction;
pub use value::{from_any, from_json, IntoParams};

pub use sqlbridge_db::{
    named_params, params, DbError, DbResult, Params, ReplicaConfig, Token, Value, ValueType,
    WireError,
};

uniffi::setup_scaffolding!("sqlbridge_core");
