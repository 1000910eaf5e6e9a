//! Hot reload of the FUJI policy file.
//!
//! [`PolicyStore`] owns the on-disk policy document and publishes an
//! immutable [`Arc<FujiPolicy>`] snapshot. On every [`snapshot`] call the
//! file's mtime is compared against the last observed value; when it
//! changes, the file is re-read **through a single file descriptor**
//! (open, `fstat`, read – all on the same handle) so the content that is
//! parsed is exactly the content that was stat'ed. A reload mutex
//! serializes writers; readers always observe either the previous or the
//! new policy object, never a partial one.
//!
//! A reload that fails to parse or validate keeps the previous policy
//! running and logs a `policy_reload_failed` warning. The gate never
//! fails open.
//!
//! [`snapshot`]: PolicyStore::snapshot

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::policy::{FujiPolicy, PolicyError};

/// Owns the policy file and the published snapshot.
#[derive(Debug)]
pub struct PolicyStore {
    path: PathBuf,
    current: RwLock<Arc<FujiPolicy>>,
    last_mtime: Mutex<SystemTime>,
    reload_lock: Mutex<()>,
}

impl PolicyStore {
    /// Load the policy at startup. A missing or invalid file is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Missing`] when no file exists at `path`,
    /// or the underlying read/parse/validation error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(PolicyError::Missing { path });
        }
        let (policy, mtime) = read_via_fd(&path)?;
        info!(
            policy_version = %policy.version,
            path = %path.display(),
            "fuji policy loaded"
        );
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(policy)),
            last_mtime: Mutex::new(mtime),
            reload_lock: Mutex::new(()),
        })
    }

    /// Write `policy` to disk as the baseline document, then open the store.
    ///
    /// Used to seed a fresh data directory. The write itself is the
    /// caller's atomic-replace responsibility; this helper is only for
    /// bootstrap paths where the directory was just created.
    ///
    /// # Errors
    ///
    /// Propagates serialization and I/O failures as [`PolicyError`].
    pub fn seed(path: impl AsRef<Path>, policy: &FujiPolicy) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        policy.check()?;
        let json = policy.to_json_string()?;
        std::fs::write(path, json).map_err(|source| PolicyError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::open(path)
    }

    /// Path of the backing policy file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the current policy snapshot, hot-reloading first when the
    /// file's mtime has changed.
    ///
    /// Reload failures are swallowed: the previous snapshot is returned
    /// and a structured warning is emitted. Use [`try_reload`] to observe
    /// the error directly.
    ///
    /// [`try_reload`]: PolicyStore::try_reload
    #[must_use]
    pub fn snapshot(&self) -> Arc<FujiPolicy> {
        if self.mtime_changed() {
            if let Err(err) = self.try_reload() {
                warn!(
                    error = %err,
                    path = %self.path.display(),
                    event = "policy_reload_failed",
                    "keeping previous fuji policy"
                );
            }
        }
        self.current.read().clone()
    }

    /// Force a reload attempt regardless of mtime.
    ///
    /// # Errors
    ///
    /// Returns the read/parse/validation error; the published snapshot is
    /// left untouched on failure.
    pub fn try_reload(&self) -> Result<Arc<FujiPolicy>, PolicyError> {
        let _guard = self.reload_lock.lock();

        // Re-check under the lock: another reloader may have already
        // published the new content.
        let disk_mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|source| PolicyError::FileRead {
                path: self.path.clone(),
                source,
            })?;
        if disk_mtime == *self.last_mtime.lock() {
            return Ok(self.current.read().clone());
        }

        let (policy, mtime) = read_via_fd(&self.path)?;
        let published = Arc::new(policy);
        *self.current.write() = published.clone();
        *self.last_mtime.lock() = mtime;
        info!(
            policy_version = %published.version,
            updated_by = %published.updated_by,
            "fuji policy reloaded"
        );
        Ok(published)
    }

    fn mtime_changed(&self) -> bool {
        match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime != *self.last_mtime.lock(),
            // Stat failure is treated as "unchanged"; the previous policy
            // keeps running and the next successful stat resolves it.
            Err(_) => false,
        }
    }
}

/// Open, fstat, and read the policy through one file descriptor.
///
/// The mtime returned is taken from the open handle, so the (content,
/// mtime) pair is consistent even if the file is replaced between calls.
fn read_via_fd(path: &Path) -> Result<(FujiPolicy, SystemTime), PolicyError> {
    let mut file = File::open(path).map_err(|source| PolicyError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let mtime = file
        .metadata()
        .and_then(|m| m.modified())
        .map_err(|source| PolicyError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
    let mut raw = String::new();
    file.read_to_string(&mut raw)
        .map_err(|source| PolicyError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
    let policy = FujiPolicy::from_json_str(&raw)?;
    Ok((policy, mtime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_policy(path: &Path, version: &str, deny_upper: f32) {
        let mut policy = FujiPolicy::baseline("test");
        policy.version = version.to_string();
        policy.risk_thresholds.deny_upper = deny_upper;
        std::fs::write(path, policy.to_json_string().unwrap()).unwrap();
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = tempdir().unwrap();
        let err = PolicyStore::open(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, PolicyError::Missing { .. }));
    }

    #[test]
    fn reload_publishes_new_policy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fuji_policy.json");
        write_policy(&path, "1.0", 0.85);

        let store = PolicyStore::open(&path).unwrap();
        assert_eq!(store.snapshot().version, "1.0");

        write_policy(&path, "1.1", 0.9);
        // mtime granularity can be coarse; force the reload path.
        let reloaded = store.try_reload().unwrap();
        assert_eq!(reloaded.version, "1.1");
        assert_eq!(store.snapshot().risk_thresholds.deny_upper, 0.9);
    }

    #[test]
    fn invalid_reload_keeps_previous_policy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fuji_policy.json");
        write_policy(&path, "1.0", 0.85);

        let store = PolicyStore::open(&path).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        assert!(store.try_reload().is_err());
        // Previous snapshot still served.
        assert_eq!(store.snapshot().version, "1.0");
    }

    #[test]
    fn seed_writes_then_opens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fuji_policy.json");
        let store = PolicyStore::seed(&path, &FujiPolicy::baseline("boot")).unwrap();
        assert_eq!(store.snapshot().updated_by, "boot");
        assert!(path.exists());
    }
}
