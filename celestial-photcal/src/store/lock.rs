//! Writer lock on a sidecar file next to the cache.
//!
//! Writers serialize on an exclusive advisory lock; readers never take it.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// `path` with `suffix` appended to the full file name.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Exclusive lock held until dropped.
#[derive(Debug)]
pub(crate) struct WriteLock {
    file: File,
    path: PathBuf,
}

impl WriteLock {
    /// Block until the lock on `<data path>.lock` is ours. Missing parent
    /// directories are created first.
    pub(crate) fn acquire(data_path: &Path) -> io::Result<Self> {
        if let Some(parent) = data_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let path = sibling(data_path, ".lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        file.lock()?;
        log::debug!("acquired cache lock {:?}", path);
        Ok(Self { file, path })
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("failed to release cache lock {:?}: {}", self.path, e);
        }
    }
}
