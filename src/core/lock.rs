//! Keg lock management
//!
//! Only one install may write into a given keg at a time. The lock lives next
//! to the keg directory (`<cellar>/<name>.lock`) so it can be taken before the
//! keg itself exists. The lock is an advisory `flock`, released by the kernel
//! when its holder exits, so a lock file left behind by a crashed run never
//! blocks the next one.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Attempts before giving up when the lock file keeps being replaced under us.
const MAX_ATTEMPTS: usize = 5;

#[derive(Error, Debug)]
pub enum LockError {
    #[error(
        "'{name}' is already being installed by another process (lock held on '{}')",
        path.display()
    )]
    Busy { name: String, path: PathBuf },

    #[error("cannot create lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Path of the lock file guarding `<cellar>/<name>`.
pub fn lock_path(cellar: &Path, name: &str) -> PathBuf {
    cellar.join(format!("{}.lock", name))
}

/// Take an exclusive lock on a keg. The guard releases it when dropped.
pub fn acquire_keg_lock(cellar: &Path, name: &str) -> Result<KegLock, LockError> {
    let path = lock_path(cellar, name);
    let io_err = |source| LockError::Io {
        path: path.clone(),
        source,
    };

    std::fs::create_dir_all(cellar).map_err(io_err)?;

    for _ in 0..MAX_ATTEMPTS {
        // Never truncate: the file may belong to a live holder.
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        if file.try_lock_exclusive().is_err() {
            return Err(LockError::Busy {
                name: name.to_string(),
                path,
            });
        }

        // A releasing holder unlinks the file; if ours was unlinked between
        // open and lock, retry on the new one.
        if still_linked(&file, &path) {
            return Ok(KegLock { file, path });
        }
    }

    Err(LockError::Busy {
        name: name.to_string(),
        path,
    })
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}

/// RAII guard for a keg lock
#[derive(Debug)]
pub struct KegLock {
    file: File,
    path: PathBuf,
}

impl KegLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for KegLock {
    fn drop(&mut self) {
        // Unlink before unlocking.
        let _ = std::fs::remove_file(&self.path);
        let _ = FileExt::unlock(&self.file);
    }
}
