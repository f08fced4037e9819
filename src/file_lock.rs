use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use fs2::FileExt;
use log::info;

use crate::Config;

/// Exclusive lock on the storage directory, held for the lifetime of an open
/// storage instance to prevent concurrent openers.
#[derive(Debug)]
pub(crate) struct FileLock {
    config: Arc<Config>,
    f: File,
}

impl FileLock {
    pub const LOCK_FILE_NAME: &'static str = "LOCK";

    pub(crate) fn new(config: Arc<Config>) -> Result<Self, io::Error> {
        let path = Self::lock_path(config.as_ref());

        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        f.try_lock_exclusive().map_err(|e| {
            io::Error::new(
                io::ErrorKind::WouldBlock,
                format!(
                    "Directory '{}' is already locked by another process, \
                    shutdown other process to continue; \
                    error:({})",
                    config.dir, e
                ),
            )
        })?;

        info!(
            "Directory lock acquired: {}",
            Self::lock_path(config.as_ref()).display()
        );

        Ok(Self { config, f })
    }

    pub(crate) fn lock_path(config: &Config) -> PathBuf {
        PathBuf::from(&config.dir).join(Self::LOCK_FILE_NAME)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.f.unlock();
        info!(
            "Directory lock released: {}",
            Self::lock_path(self.config.as_ref()).display()
        );
    }
}
