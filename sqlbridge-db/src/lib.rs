//! Boundary-side SQL engine for sqlbridge.
//!
//! This crate implements the engine half of the sqlbridge boundary on top
//! of the bundled `SQLite` library:
//!
//! * [`Engine`] serves every boundary operation (open, connect, execute,
//!   query, transaction, sync, close) and names resources with opaque,
//!   generational [`Token`]s.
//! * [`wire`] defines the versioned binary format for parameter sets and
//!   rows that both sides of the boundary speak.
//! * [`ReplicaConfig`] configures embedded replicas, which keep a local file
//!   in step with a primary database.
//!
//! Database access goes through `rusqlite`'s safe API; the crate itself
//! contains no `unsafe` code.

#![forbid(unsafe_code)]

mod engine;
pub mod error;
mod replica;
mod session;
mod slots;
mod sqlite;
pub mod value;
pub mod wire;

pub use engine::{initialize, Engine, LiveHandles};
pub use error::{DbError, DbErrorCode, DbResult};
pub use replica::ReplicaConfig;
pub use slots::Token;
pub use value::{Params, Value, ValueType};
pub use wire::WireError;
