//! Mutual exclusion between runs.
//!
//! Runs sharing a staging directory share an authoritative table, and two merges into the same
//! table must never overlap. [`RunLock`] is a lock file created exclusively inside the staging
//! directory and removed when the lock is dropped. A lock left behind by a crashed process is
//! never broken automatically; the error names the file to remove once the holder is known to be
//! gone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;

/// File name of the lock inside the staging directory.
pub const RUN_LOCK_FILE_NAME: &str = "merge.lock";

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub created_at: DateTime<Utc>,
    pub job: String,
}

/// An acquired run lock.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    info: LockInfo,
    released: bool,
}

impl RunLock {
    /// Acquires the lock for `job` in `staging_dir`, creating the directory when needed.
    ///
    /// Fails with [`ErrorKind::ConcurrentRun`] while another run holds the lock.
    pub fn acquire(staging_dir: &Path, job: &str) -> EtlResult<Self> {
        fs::create_dir_all(staging_dir)?;
        let path = staging_dir.join(RUN_LOCK_FILE_NAME);

        let info = LockInfo {
            pid: std::process::id(),
            created_at: Utc::now(),
            job: job.to_owned(),
        };

        let mut file = match OpenOptions::new().create_new(true).write(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let holder = match Self::holder(staging_dir) {
                    Ok(Some(holder)) => format!(
                        "held by pid {} for job '{}' since {}",
                        holder.pid, holder.job, holder.created_at
                    ),
                    _ => "held by an unknown run".to_owned(),
                };

                return Err(etl_error!(
                    ErrorKind::ConcurrentRun,
                    "Another run is merging into the authoritative table",
                    format!(
                        "{holder}; remove {} if that run is no longer alive",
                        path.display()
                    )
                ));
            }
            Err(err) => return Err(err.into()),
        };

        let lock = Self {
            path,
            info,
            released: false,
        };

        // From here on dropping `lock` removes the file, also when writing the info fails.
        file.write_all(&serde_json::to_vec_pretty(&lock.info)?)?;
        file.sync_all()?;

        debug!(path = %lock.path.display(), job, "acquired run lock");

        Ok(lock)
    }

    /// Returns the holder recorded in the lock file of `staging_dir`, if there is one.
    pub fn holder(staging_dir: &Path) -> EtlResult<Option<LockInfo>> {
        let path = staging_dir.join(RUN_LOCK_FILE_NAME);
        match fs::read(&path) {
            Ok(contents) => Ok(Some(serde_json::from_slice(&contents)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock, reporting failures to remove the lock file.
    pub fn release(mut self) -> EtlResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> EtlResult<()> {
        if self.released {
            return Ok(());
        }

        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = self.release_inner() {
            warn!(path = %self.path.display(), error = %err, "failed to remove run lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquisition_is_rejected_until_release() {
        let dir = tempfile::tempdir().unwrap();

        let lock = RunLock::acquire(dir.path(), "delta").unwrap();
        let err = RunLock::acquire(dir.path(), "bootstrap").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrentRun);
        assert!(err.detail().unwrap().contains("job 'delta'"));

        lock.release().unwrap();
        assert!(RunLock::holder(dir.path()).unwrap().is_none());
        RunLock::acquire(dir.path(), "bootstrap").unwrap();
    }

    #[test]
    fn dropping_the_lock_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();

        {
            let lock = RunLock::acquire(dir.path(), "delta").unwrap();
            let holder = RunLock::holder(dir.path()).unwrap().unwrap();
            assert_eq!(&holder, lock.info());
        }

        assert!(!dir.path().join(RUN_LOCK_FILE_NAME).exists());
    }

    #[test]
    fn leftover_lock_files_are_not_broken() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(RUN_LOCK_FILE_NAME), b"garbage").unwrap();

        let err = RunLock::acquire(dir.path(), "delta").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrentRun);
        assert!(dir.path().join(RUN_LOCK_FILE_NAME).exists());
    }

    #[test]
    fn missing_staging_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("nested").join("staging");

        let _lock = RunLock::acquire(&staging, "delta").unwrap();
        assert!(staging.join(RUN_LOCK_FILE_NAME).exists());
    }
}
