//! Single-host run lock.
//!
//! A pass holds an exclusively created marker file for its whole duration.
//! The marker payload is `<created_ms> <pid> <nonce>`; the whole payload is
//! the owner token. A marker older than the configured maximum age is assumed
//! to belong to a crashed pass and is reclaimed. The guard removes the marker
//! when dropped, so every exit path of a pass releases it, but only while the
//! marker still carries the guard's own token.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, warn};

/// Lock marker location and staleness policy.
#[derive(Debug, Clone)]
pub struct RunLock {
    path: PathBuf,
    /// Age after which an existing marker may be reclaimed
    stale_after: Option<Duration>,
}

/// Proof of holding the run lock; releases it on drop.
#[derive(Debug)]
pub struct RunLockGuard {
    path: PathBuf,
    token: String,
    released: bool,
}

/// Marker contents as observed before a reclaim.
struct Observed {
    payload: String,
    age: Duration,
}

impl RunLock {
    pub fn new(path: impl Into<PathBuf>, stale_after: Option<Duration>) -> Self {
        Self {
            path: path.into(),
            stale_after,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to take the lock without waiting.
    ///
    /// Returns `Ok(None)` when another live pass holds it.
    pub fn try_acquire(&self) -> io::Result<Option<RunLockGuard>> {
        match self.create_marker() {
            Ok(guard) => return Ok(Some(guard)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }

        let Some(max_age) = self.stale_after else {
            return Ok(None);
        };
        let Some(observed) = self.observe() else {
            return Ok(None);
        };
        if observed.age <= max_age {
            debug!("Run lock {:?} held for {:?}", self.path, observed.age);
            return Ok(None);
        }

        warn!(
            "Reclaiming stale run lock {:?} (age {}s, limit {}s)",
            self.path,
            observed.age.as_secs(),
            max_age.as_secs()
        );
        if !self.evict(&observed.payload)? {
            return Ok(None);
        }

        // Another reclaimer may have created a fresh marker in between.
        match self.create_marker() {
            Ok(guard) => Ok(Some(guard)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove the marker regardless of who created it.
    pub fn force_release(&self) -> io::Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_marker(&self) -> io::Result<RunLockGuard> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;

        let guard = RunLockGuard {
            path: self.path.clone(),
            token: new_token(),
            released: false,
        };
        file.write_all(guard.token.as_bytes())?;
        file.sync_all()?;

        Ok(guard)
    }

    /// Current payload and age of the marker. The age comes from the payload
    /// timestamp, or from the mtime when the payload is unreadable.
    fn observe(&self) -> Option<Observed> {
        let payload = fs::read_to_string(&self.path).unwrap_or_default();
        let created_ms = payload
            .split_whitespace()
            .next()
            .and_then(|ts| ts.parse::<u64>().ok())
            .or_else(|| {
                let modified = fs::metadata(&self.path).ok()?.modified().ok()?;
                Some(modified.duration_since(UNIX_EPOCH).ok()?.as_millis() as u64)
            })?;

        Some(Observed {
            payload,
            age: Duration::from_millis(now_millis().saturating_sub(created_ms)),
        })
    }

    /// Move the stale marker out of the way under a name unique to this
    /// attempt, then delete it.
    ///
    /// Returns `false` when the marker moved was not the one judged stale; it
    /// is linked back into place and the reclaim is abandoned.
    fn evict(&self, stale_payload: &str) -> io::Result<bool> {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".stale-{}-{:016x}", std::process::id(), rand::random::<u64>()));
        let grave = self.path.with_file_name(name);

        match fs::rename(&self.path, &grave) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        }

        let moved = fs::read_to_string(&grave).unwrap_or_default();
        if moved != stale_payload {
            debug!("Run lock {:?} was reclaimed by another process", self.path);
            if let Err(e) = fs::hard_link(&grave, &self.path) {
                warn!("Failed to restore run lock {:?}: {}", self.path, e);
            }
            remove_if_present(&grave)?;
            return Ok(false);
        }

        remove_if_present(&grave)?;
        Ok(true)
    }
}

impl RunLockGuard {
    /// Owner token written into the marker.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release the lock now instead of at drop.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match fs::read_to_string(&self.path) {
            Ok(payload) if payload == self.token => {}
            Ok(_) => {
                warn!(
                    "Run lock {:?} was taken over by another pass, leaving it in place",
                    self.path
                );
                return;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("Failed to read run lock {:?}: {}", self.path, e);
                return;
            }
        }

        if let Err(e) = remove_if_present(&self.path) {
            warn!("Failed to remove run lock {:?}: {}", self.path, e);
        }
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.remove();
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn new_token() -> String {
    format!(
        "{} {} {:016x}",
        now_millis(),
        std::process::id(),
        rand::random::<u64>()
    )
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
