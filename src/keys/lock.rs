// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Best-effort cross-process lock based on exclusive file creation.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Held lock; the lock file is removed when dropped.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Try to create `path` exclusively, polling up to `retries` times.
    ///
    /// Returns `None` when the lock could not be taken in time; callers go on
    /// without it rather than blocking forever on a stale file.
    pub async fn acquire(path: &Path, retries: u32, delay: Duration) -> Option<Self> {
        for attempt in 1..=retries {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(_) => {
                    debug!(path = %path.display(), attempt, "Lock file acquired");
                    return Some(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot create lock file");
                    return None;
                }
            }
        }

        warn!(
            path = %path.display(),
            retries,
            "Lock file still held, continuing without it"
        );
        None
    }

    /// Location of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
            }
        }
    }
}
