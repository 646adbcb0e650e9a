//! Embedded replicas: a local database file kept in step with a primary.
//!
//! A sync round copies the primary into the local file with the `SQLite`
//! online-backup API. Rounds are serialized per replica. Explicit and
//! periodic rounds retry lock conflicts with a constant backoff before the
//! error surfaces. The round after a read-your-writes write is attempted
//! once; if it fails the replica is marked stale and reads go to the
//! primary until a later round succeeds.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use backon::{BlockingRetryable, ConstantBuilder};
use log::{debug, warn};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};
use crate::sqlite::{self, OpenMode, SharedConn};

const SYNC_RETRY_DELAY: Duration = Duration::from_millis(25);
const SYNC_RETRY_TIMES: usize = 20;
/// Lock wait of one sync attempt; the backoff does the rest.
const SYNC_BUSY_TIMEOUT: Duration = Duration::from_millis(100);

/// Options recognized when opening an embedded replica.
///
/// Deserializes from camelCase JSON, e.g.
/// `{"syncInterval": 5000, "readYourWrites": false}`; missing keys take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplicaConfig {
    /// Cadence of automatic background syncs, in milliseconds on the wire.
    /// Zero disables automatic sync.
    #[serde(with = "millis")]
    pub sync_interval: Duration,
    /// Whether writes made through the replica are visible to its own reads
    /// before the next explicit or periodic sync.
    pub read_your_writes: bool,
    /// Whether remote TLS certificates are validated against the bundled
    /// web PKI roots.
    pub with_webpki: bool,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::ZERO,
            read_your_writes: true,
            with_webpki: true,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Resolves a primary URL to a database path the engine can open.
///
/// Only `file:` URLs are served by the built-in engine. Network schemes are
/// recognized and rejected so callers get a clear error instead of a file
/// named after the URL.
pub(crate) fn resolve_primary(url: &str) -> DbResult<String> {
    if let Some(rest) = url.strip_prefix("file://") {
        if rest.starts_with('/') {
            return Ok(rest.to_string());
        }
        // `file://host/path` is not a local file.
        return Err(unsupported(url, "file URL with a host"));
    }
    if let Some(rest) = url.strip_prefix("file:") {
        if rest.is_empty() {
            return Err(DbError::new(sqlite::SQLITE_CANTOPEN, "empty file URL"));
        }
        return Ok(rest.to_string());
    }
    let scheme = url.split_once(':').map_or(url, |(scheme, _)| scheme);
    match scheme {
        "libsql" | "http" | "https" | "ws" | "wss" => Err(unsupported(url, scheme)),
        _ => Err(DbError::new(
            sqlite::SQLITE_CANTOPEN,
            format!("not a database URL: {url}"),
        )),
    }
}

fn unsupported(url: &str, transport: &str) -> DbError {
    DbError::new(
        sqlite::SQLITE_CANTOPEN,
        format!("unsupported transport `{transport}` for {url}"),
    )
}

/// Shared state of one embedded replica.
pub(crate) struct Replica {
    local_path: String,
    primary_path: String,
    auth_token: SecretString,
    config: ReplicaConfig,
    gate: Mutex<()>,
    rounds: AtomicU64,
    stale: AtomicBool,
}

impl Replica {
    /// Validates both ends and returns the replica. Does not sync.
    pub(crate) fn open(
        local_path: &str,
        url: &str,
        auth_token: SecretString,
        config: ReplicaConfig,
    ) -> DbResult<Self> {
        let primary_path = resolve_primary(url)?;
        sqlite::open(&primary_path, OpenMode::ReadOnly)?;
        sqlite::open(local_path, OpenMode::ReadWriteCreate)?;
        debug!(
            "opened replica {local_path} of {url} (interval {:?}, read-your-writes {}, webpki {}, token {})",
            config.sync_interval,
            config.read_your_writes,
            config.with_webpki,
            if auth_token.expose_secret().is_empty() {
                "absent"
            } else {
                "present"
            },
        );
        Ok(Self {
            local_path: local_path.to_string(),
            primary_path,
            auth_token,
            config,
            gate: Mutex::new(()),
            rounds: AtomicU64::new(0),
            stale: AtomicBool::new(false),
        })
    }

    pub(crate) const fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    /// Connection to the local replica file, used for reads.
    pub(crate) fn connect_local(&self) -> DbResult<SharedConn> {
        SharedConn::open(&self.local_path, OpenMode::ReadWriteCreate)
    }

    /// Connection to the primary, used for writes and transactions.
    pub(crate) fn connect_primary(&self) -> DbResult<SharedConn> {
        SharedConn::open(&self.primary_path, OpenMode::ReadWrite)
    }

    /// Runs one sync round and returns its sequence number.
    pub(crate) fn sync(&self) -> DbResult<u64> {
        let _gate = self.gate.lock().map_err(|_| DbError::poisoned("replica sync"))?;
        let backoff = ConstantBuilder::default()
            .with_delay(SYNC_RETRY_DELAY)
            .with_max_times(SYNC_RETRY_TIMES);
        (|| self.copy_primary())
            .retry(backoff)
            .sleep(thread::sleep)
            .when(DbError::is_busy)
            .notify(|err: &DbError, delay: Duration| {
                debug!("replica {} busy, retrying in {delay:?}: {err}", self.local_path);
            })
            .call()?;
        Ok(self.finish_round())
    }

    /// Catches up after a committed write with a single attempt. Returns
    /// `false` and marks the replica stale when the attempt fails.
    pub(crate) fn refresh(&self) -> bool {
        let attempt = self
            .gate
            .lock()
            .map_err(|_| DbError::poisoned("replica sync"))
            .and_then(|_gate| {
                self.copy_primary()?;
                Ok(self.finish_round())
            });
        match attempt {
            Ok(_) => true,
            Err(err) => {
                self.stale.store(true, Ordering::SeqCst);
                warn!(
                    "read-your-writes sync of {} failed, reading from the primary until it catches up: {err}",
                    self.local_path
                );
                false
            }
        }
    }

    /// Whether the local file missed a write that the primary committed.
    pub(crate) fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    /// Number of completed sync rounds.
    pub(crate) fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::SeqCst)
    }

    /// Whether a non-empty auth token was supplied. File primaries do not
    /// check it.
    fn is_authenticated(&self) -> bool {
        !self.auth_token.expose_secret().is_empty()
    }

    fn copy_primary(&self) -> DbResult<()> {
        let source = sqlite::open(&self.primary_path, OpenMode::ReadOnly)?;
        let mut target = sqlite::open(&self.local_path, OpenMode::ReadWriteCreate)?;
        source.busy_timeout(SYNC_BUSY_TIMEOUT)?;
        target.busy_timeout(SYNC_BUSY_TIMEOUT)?;
        sqlite::copy_database(&source, &mut target)
    }

    fn finish_round(&self) -> u64 {
        self.stale.store(false, Ordering::SeqCst);
        let round = self.rounds.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "replica {} synced (round {round}, authenticated {})",
            self.local_path,
            self.is_authenticated()
        );
        round
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("local_path", &self.local_path)
            .field("primary_path", &self.primary_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Background thread that syncs a replica on a fixed cadence.
///
/// Dropping it stops the thread and waits for an in-flight round to finish.
pub(crate) struct PeriodicSync {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl PeriodicSync {
    /// Starts syncing every `interval`. The thread exits on its own once the
    /// replica is gone.
    pub(crate) fn start(replica: &Arc<Replica>, interval: Duration) -> DbResult<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let replica: Weak<Replica> = Arc::downgrade(replica);
        let worker = thread::Builder::new()
            .name("sqlbridge-replica-sync".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let Some(replica) = replica.upgrade() else {
                    break;
                };
                if let Err(err) = replica.sync() {
                    warn!("periodic sync of {} failed: {err}", replica.local_path);
                }
            })
            .map_err(|e| {
                DbError::new(sqlite::SQLITE_ERROR, format!("cannot start sync thread: {e}"))
            })?;
        Ok(Self {
            stop: Some(stop),
            worker: Some(worker),
        })
    }
}

impl Drop for PeriodicSync {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("replica sync thread panicked");
            }
        }
    }
}
