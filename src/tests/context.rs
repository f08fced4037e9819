use std::path::PathBuf;

use tempfile::TempDir;

use crate::errors::StorageError;
use crate::Config;
use crate::DiskStorage;

pub(crate) fn new_testing()
-> Result<(TestContext, DiskStorage), StorageError> {
    let ctx = TestContext::new()?;
    let store = ctx.open()?;

    Ok((ctx, store))
}

pub(crate) struct TestContext {
    pub(crate) config: Config,

    _temp_dir: TempDir,
}

impl TestContext {
    /// Small segments and tolerant startup, matching how the storage is
    /// exercised in production tests.
    pub(crate) fn new() -> Result<TestContext, StorageError> {
        let temp_dir = tempfile::tempdir()?;

        let config = Config {
            dir: temp_dir.path().join("store").display().to_string(),
            log_file_size: Some(1024),
            allow_corrupt_startup: Some(true),
            ..Default::default()
        };

        Ok(TestContext {
            config,
            _temp_dir: temp_dir,
        })
    }

    pub(crate) fn config(&self) -> Config {
        self.config.clone()
    }

    pub(crate) fn open(&self) -> Result<DiskStorage, StorageError> {
        DiskStorage::open(self.config())
    }

    /// Segment files currently on disk, in seqno order.
    pub(crate) fn segment_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.config.dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.extension().map(|x| x == "log").unwrap_or(false)
            })
            .collect();
        files.sort();
        files
    }
}
