// Session persistence between CLI invocations

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::types::Session;
use crate::error::{AuthError, Result};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const SESSION_FILE_MODE: u32 = 0o600;
const SESSION_DIR_MODE: u32 = 0o700;

/// An exclusive file lock. Released on drop (file close releases flock).
pub struct FileLock {
    _file: File,
}

impl FileLock {
    /// Acquire an exclusive lock, blocking until available.
    pub fn exclusive(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| store_error("open lock file", path, e))?;
        file.lock_exclusive()
            .map_err(|e| store_error("acquire lock", path, e))?;
        Ok(Self { _file: file })
    }
}

/// Session as written to disk, tied to the credential that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub session: Session,
    /// `AuthMethod::fingerprint` of the method that produced `session`
    pub fingerprint: String,
}

/// JSON file holding at most one session
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored session; expired or unreadable sessions count as absent
    pub fn load(&self) -> Result<Option<StoredSession>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let _lock = self.lock()?;
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error("read session", &self.path, e)),
        };

        let stored: StoredSession = match serde_json::from_str(&contents) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring unreadable session file"
                );
                return Ok(None);
            }
        };

        if stored.session.is_expired() {
            tracing::debug!(
                method = %stored.session.method,
                "Persisted session has expired"
            );
            return Ok(None);
        }

        Ok(Some(stored))
    }

    /// Atomically replace the stored session
    pub fn save(&self, session: &Session, fingerprint: &str) -> Result<()> {
        let dir = self.ensure_dir()?;
        let _lock = self.lock()?;

        let stored = StoredSession {
            session: session.clone(),
            fingerprint: fingerprint.to_string(),
        };
        let contents = serde_json::to_vec_pretty(&stored)
            .map_err(|e| AuthError::Store(format!("serialize session: {}", e)))?;

        // Write to a temp file in the same directory, then rename over the target
        let mut tmp = tempfile::Builder::new()
            .prefix(".session-")
            .tempfile_in(&dir)
            .map_err(|e| store_error("create temp file", &dir, e))?;
        set_permissions(tmp.path(), SESSION_FILE_MODE)?;
        tmp.write_all(&contents)
            .map_err(|e| store_error("write session", tmp.path(), e))?;
        tmp.flush()
            .map_err(|e| store_error("flush session", tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| store_error("persist session", &self.path, e.error))?;

        tracing::debug!(path = %self.path.display(), "Session persisted");
        Ok(())
    }

    /// Remove the stored session
    pub fn clear(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let _lock = self.lock()?;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_error("remove session", &self.path, e)),
        }
    }

    fn lock(&self) -> Result<FileLock> {
        FileLock::exclusive(&self.path.with_extension("lock"))
    }

    fn ensure_dir(&self) -> Result<PathBuf> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| store_error("create directory", &dir, e))?;
            set_permissions(&dir, SESSION_DIR_MODE)?;
        }
        Ok(dir)
    }
}

fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| store_error(&format!("set permissions {:o}", mode), path, e))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

fn store_error(action: &str, path: &Path, e: std::io::Error) -> AuthError {
    AuthError::Store(format!("{} {}: {}", action, path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::SecretToken;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn session(minutes: i64) -> Session {
        Session {
            token: SecretToken::new("persisted-token"),
            expires_at: Utc::now() + Duration::minutes(minutes),
            method: "universal-auth".to_string(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("nested/session.json"));

        assert_eq!(store.load().unwrap(), None);

        let original = session(30);
        store.save(&original, "fp-1").unwrap();
        assert_eq!(
            store.load().unwrap(),
            Some(StoredSession {
                session: original,
                fingerprint: "fp-1".to_string(),
            })
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_session_file_is_private() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        store.save(&session(30), "fp").unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_expired_session_is_absent_on_load() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        store.save(&session(-1), "fp").unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_corrupt_session_is_absent_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(SessionStore::new(path).load().unwrap(), None);
    }

    #[test]
    fn test_session_without_fingerprint_is_absent_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, serde_json::to_vec(&session(30)).unwrap()).unwrap();
        assert_eq!(SessionStore::new(path).load().unwrap(), None);
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        store.save(&session(30), "fp").unwrap();
        store.clear().unwrap();
        assert!(!store.path().exists());
        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("session.lock");
        {
            let _lock = FileLock::exclusive(&lock_path).unwrap();
        }
        let file = OpenOptions::new().write(true).open(&lock_path).unwrap();
        assert!(file.try_lock_exclusive().is_ok());
    }
}
