//! Databases and embedded replicas.

use std::sync::Arc;

use log::{debug, warn};
use sqlbridge_db::Token;
use strum::Display;

use crate::boundary::Boundary;
use crate::connection::Connection;
use crate::error::Result;
use crate::handle::{Handle, Resource};

/// How a [`Database`] was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// A local file.
    Local,
    /// A remote primary with no local storage.
    Remote,
    /// A local replica of a remote primary.
    Replica,
}

/// An open database from which connections are made.
///
/// Closing a database does not close the connections made from it; each
/// connection is closed on its own. Closed when dropped.
pub struct Database {
    handle: Handle,
    boundary: Arc<dyn Boundary>,
    mode: Mode,
}

impl Database {
    pub(crate) fn new(token: Token, mode: Mode, boundary: Arc<dyn Boundary>) -> Result<Self> {
        Ok(Self {
            handle: Handle::new(token, Resource::Database)?,
            boundary,
            mode,
        })
    }

    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Fails on a closed database or an engine error.
    pub fn connect(&self) -> Result<Connection> {
        let token = self.boundary.db_connect(self.handle.get()?)?;
        Connection::new(token, Arc::clone(&self.boundary))
    }

    /// How this database was opened.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Closes the database.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DoubleClose`](crate::Error::DoubleClose) on a
    /// closed database; an engine failure still leaves it closed.
    pub fn close(&mut self) -> Result<()> {
        let boundary = Arc::clone(&self.boundary);
        debug!("closing {} database", self.mode);
        self.handle.close_with(|token| boundary.db_close(token))
    }

    /// Returns `true` once closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    fn sync(&self) -> Result<u64> {
        Ok(self.boundary.db_sync(self.handle.get()?)?)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.handle.is_closed() {
            if let Err(err) = self.close() {
                warn!("failed to close database on drop: {err}");
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("handle", &self.handle)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// A local replica of a remote primary.
///
/// Supports everything a [`Database`] does, plus [`sync`](Self::sync).
#[derive(Debug)]
pub struct EmbeddedReplica {
    db: Database,
}

impl EmbeddedReplica {
    pub(crate) fn new(token: Token, boundary: Arc<dyn Boundary>) -> Result<Self> {
        Ok(Self {
            db: Database::new(token, Mode::Replica, boundary)?,
        })
    }

    /// Brings the local replica up to date with the primary.
    ///
    /// Blocks until one sync round completes or fails and returns the
    /// number of rounds completed so far.
    ///
    /// # Errors
    ///
    /// Fails on a closed replica or a failed round.
    pub fn sync(&self) -> Result<u64> {
        self.db.sync()
    }

    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Fails on a closed replica or an engine error.
    pub fn connect(&self) -> Result<Connection> {
        self.db.connect()
    }

    /// Closes the replica and stops any periodic sync.
    ///
    /// # Errors
    ///
    /// Same as [`Database::close`].
    pub fn close(&mut self) -> Result<()> {
        self.db.close()
    }

    /// Returns `true` once closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.db.is_closed()
    }

    /// The replica as a plain database.
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }
}
