//! Pidfile primitive: an absolute path holding the daemon's decimal PID,
//! held write-locked for the daemon's lifetime via the `fs2` advisory-lock
//! crate, so a stale file left behind by a crashed process is distinguishable
//! from one held by a live daemon.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::info;

use crate::error::{Error, Result};

/// A locked pidfile held open for the process lifetime. Dropping it
/// releases the lock (and, best-effort, removes the file).
#[derive(Debug)]
pub struct Pidfile {
    path: PathBuf,
    file: File,
}

impl Pidfile {
    /// Opens (creating if absent) `path`, takes an exclusive advisory
    /// lock, and writes the current process's PID. `path` must be
    /// absolute, matching the original's `xassert(pidfile[0] == '/')`.
    ///
    /// A file that exists but is unlocked is stale (the daemon that
    /// wrote it is gone) and is silently reclaimed. A file that exists
    /// and is locked means a live daemon already holds it.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(Error::ReservationInvalid(format!(
                "pidfile path must be absolute: {}",
                path.display()
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| Error::SocketError(format!("unable to open pidfile {}: {e}", path.display())))?;

        file.try_lock_exclusive().map_err(|_| {
            Error::AlreadyRunning {
                what: format!("a process already holds pidfile {}", path.display()),
            }
        })?;

        let pid = std::process::id();
        file.set_len(0).map_err(|e| Error::SocketError(format!("unable to truncate pidfile: {e}")))?;
        let mut f = &file;
        f.seek(SeekFrom::Start(0)).map_err(|e| Error::SocketError(e.to_string()))?;
        writeln!(f, "{pid}").map_err(|e| Error::SocketError(format!("unable to write pidfile: {e}")))?;
        f.flush().map_err(|e| Error::SocketError(e.to_string()))?;

        info!(path = %path.display(), pid, "pidfile acquired");
        Ok(Self { path: path.to_path_buf(), file })
    }

    /// Reads back the PID recorded in `path` without taking the lock.
    /// Returns `None` if the file is absent, corrupt, or currently
    /// unlocked (no live daemon holds it).
    pub fn read_pid(path: impl AsRef<Path>) -> Option<u32> {
        let path = path.as_ref();
        let mut file = File::open(path).ok()?;
        if file.try_lock_exclusive().is_ok() {
            // Lock acquired: nothing was holding it, so this is stale.
            let _ = fs2::FileExt::unlock(&file);
            return None;
        }
        let mut contents = String::new();
        file.read_to_string(&mut contents).ok()?;
        contents.trim().parse().ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Pidfile {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_writes_decimal_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gridctld.pid");
        let pf = Pidfile::create(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
        drop(pf);
        assert!(!path.exists());
    }

    #[test]
    fn rejects_relative_path() {
        assert!(Pidfile::create("relative.pid").is_err());
    }

    #[test]
    fn second_create_on_live_pidfile_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gridctld.pid");
        let _pf = Pidfile::create(&path).unwrap();
        assert!(Pidfile::create(&path).is_err());
    }

    #[test]
    fn read_pid_on_unlocked_stale_file_returns_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gridctld.pid");
        std::fs::write(&path, "1234\n").unwrap();
        assert_eq!(Pidfile::read_pid(&path), None);
    }
}
