//! The three ways to open a database.

use std::path::Path;
use std::sync::Arc;

use log::debug;
use sqlbridge_db::{DbError, ReplicaConfig};

use crate::boundary::{init, Boundary};
use crate::database::{Database, EmbeddedReplica, Mode};
use crate::error::{Error, Result};

/// Opens databases through one [`Boundary`].
///
/// [`Driver::global`] uses the process-wide engine; [`Driver::with_boundary`]
/// routes every call through another implementation.
#[derive(Clone)]
pub struct Driver {
    boundary: Arc<dyn Boundary>,
}

impl Driver {
    /// A driver backed by the process-wide engine, initializing it on first
    /// use.
    ///
    /// # Errors
    ///
    /// Fails if the engine cannot be initialized.
    pub fn global() -> Result<Self> {
        Ok(Self { boundary: init()? })
    }

    /// A driver backed by `boundary`.
    #[must_use]
    pub const fn with_boundary(boundary: Arc<dyn Boundary>) -> Self {
        Self { boundary }
    }

    /// Opens (or creates) a local database file.
    ///
    /// # Errors
    ///
    /// Fails if the path is not valid UTF-8 or the engine cannot open the
    /// file.
    pub fn open_local(&self, path: impl AsRef<Path>) -> Result<Database> {
        let path = utf8_path(path.as_ref())?;
        let token = self.boundary.open_local(path)?;
        debug!("opened local database {path}");
        Database::new(token, Mode::Local, Arc::clone(&self.boundary))
    }

    /// Opens a remote database.
    ///
    /// # Errors
    ///
    /// Fails if the engine cannot reach or open the primary.
    pub fn open_remote(&self, url: &str, auth_token: &str) -> Result<Database> {
        let token = self.boundary.open_remote(url, auth_token)?;
        debug!("opened remote database {url}");
        Database::new(token, Mode::Remote, Arc::clone(&self.boundary))
    }

    /// Opens an embedded replica at `path` of the primary at `url`.
    ///
    /// # Errors
    ///
    /// Fails if the path is not valid UTF-8 or either end cannot be opened.
    pub fn open_replica(
        &self,
        path: impl AsRef<Path>,
        url: &str,
        auth_token: &str,
        config: &ReplicaConfig,
    ) -> Result<EmbeddedReplica> {
        let path = utf8_path(path.as_ref())?;
        let token = self.boundary.open_replica(path, url, auth_token, config)?;
        debug!("opened replica {path} of {url}");
        EmbeddedReplica::new(token, Arc::clone(&self.boundary))
    }
}

/// Paths cross the boundary as UTF-8 text. A lossy conversion would open a
/// different file, so other paths are refused.
fn utf8_path(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        Error::from(DbError::cannot_open(format!(
            "database path is not valid UTF-8: {}",
            path.display()
        )))
    })
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver").finish_non_exhaustive()
    }
}

/// Opens (or creates) a local database file with the process-wide engine.
///
/// # Errors
///
/// Fails if the engine cannot be initialized or the file cannot be opened.
pub fn open_local(path: impl AsRef<Path>) -> Result<Database> {
    Driver::global()?.open_local(path)
}

/// Opens a remote database with the process-wide engine.
///
/// # Errors
///
/// Fails if the engine cannot be initialized or the primary cannot be opened.
pub fn open_remote(url: &str, auth_token: &str) -> Result<Database> {
    Driver::global()?.open_remote(url, auth_token)
}

/// Opens an embedded replica with the process-wide engine.
///
/// # Errors
///
/// Fails if the engine cannot be initialized or either end cannot be opened.
pub fn open_replica(
    path: impl AsRef<Path>,
    url: &str,
    auth_token: &str,
    config: &ReplicaConfig,
) -> Result<EmbeddedReplica> {
    Driver::global()?.open_replica(path, url, auth_token, config)
}
