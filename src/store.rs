//! Lock file plus JSON state file for one resource kind.
//!
//! Every read or write of a [`ServiceRecord`] happens while holding an
//! exclusive advisory lock on `<shared_dir>/<kind>.json.lock`. The lock is an
//! `flock`, so the kernel releases it if the holder dies, and it belongs to
//! the open file description, so two handles in the same process exclude each
//! other as well.

use crate::error::{Error, Result};
use crate::record::ServiceRecord;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SharedRecordStore {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl SharedRecordStore {
    pub fn new(shared_dir: &Path, kind: &str) -> Self {
        Self {
            state_path: shared_dir.join(format!("{}.json", kind)),
            lock_path: shared_dir.join(format!("{}.json.lock", kind)),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Block until the exclusive lock is held. The lock is released when the
    /// returned guard is dropped or destroyed.
    pub async fn lock(&self) -> Result<RecordGuard> {
        let lock_path = self.lock_path.clone();
        let file = tokio::task::spawn_blocking(move || acquire(&lock_path))
            .await
            .map_err(|e| Error::Filesystem(format!("Lock task failed: {}", e)))??;

        debug!("Acquired lock {:?}", self.lock_path);
        Ok(RecordGuard {
            file,
            state_path: self.state_path.clone(),
            lock_path: self.lock_path.clone(),
        })
    }

    /// Run a synchronous critical section under the lock. The lock is
    /// released whether or not the closure succeeds.
    pub async fn with_lock<T, F>(&self, critical_section: F) -> Result<T>
    where
        F: FnOnce(&mut RecordGuard) -> Result<T>,
    {
        let mut guard = self.lock().await?;
        critical_section(&mut guard)
    }
}

/// Exclusive access to the state file of one resource kind.
#[derive(Debug)]
pub struct RecordGuard {
    file: File,
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl RecordGuard {
    /// Read the current record. `None` means no manager has claimed the
    /// resource yet.
    pub fn load(&self) -> Result<Option<ServiceRecord>> {
        let contents = match fs::read_to_string(&self.state_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Filesystem(format!(
                    "Failed to read {}: {}",
                    self.state_path.display(),
                    e
                )))
            }
        };

        ServiceRecord::parse(&contents)
            .map(Some)
            .map_err(|reason| Error::CorruptState {
                path: self.state_path.clone(),
                reason,
            })
    }

    /// Overwrite the state file with `record`.
    pub fn persist(&self, record: &ServiceRecord) -> Result<()> {
        let contents = record.to_json()?;
        atomic_write(&self.state_path, &contents)
    }

    /// Delete the state file, then the lock file, then release the lock.
    pub fn destroy(self) -> Result<()> {
        remove_if_exists(&self.state_path)?;
        remove_if_exists(&self.lock_path)?;
        debug!("Removed {:?} and {:?}", self.state_path, self.lock_path);
        Ok(())
    }
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to unlock {:?}: {}", self.lock_path, e);
        }
    }
}

fn acquire(lock_path: &Path) -> Result<File> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::Filesystem(format!(
                "Failed to create shared directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    loop {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .map_err(|e| Error::Filesystem(format!("Failed to open lock file: {}", e)))?;

        FileExt::lock_exclusive(&file).map_err(|e| {
            Error::Filesystem(format!("Failed to lock {}: {}", lock_path.display(), e))
        })?;

        // The manager unlinks the lock file during teardown. A waiter that was
        // blocked on the old inode must not proceed, or a newcomer locking the
        // fresh file at the same path would run concurrently with it.
        if still_linked(&file, lock_path) {
            return Ok(file);
        }
        debug!("Lock file {:?} was replaced while waiting, retrying", lock_path);
    }
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}

/// Write-then-rename so readers never observe a half-written document.
fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let mut file = File::create(&temp_path)
        .map_err(|e| Error::Filesystem(format!("Failed to create temp file: {}", e)))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| Error::Filesystem(format!("Failed to write temp file: {}", e)))?;
    file.sync_all()
        .map_err(|e| Error::Filesystem(format!("Failed to sync temp file: {}", e)))?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|e| Error::Filesystem(format!("Failed to rename temp file: {}", e)))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Filesystem(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}
