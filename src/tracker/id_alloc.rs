// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Monotonic connection-id allocator persisted across daemon restarts.

use std::{
    fs,
    io::Write,
    os::unix::fs::{MetadataExt, OpenOptionsExt},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

/// Mode bits the persisted id file is written with and expected to carry.
const CONN_ID_FILE_MODE: u32 = 0o600;

/// Hands out connection ids and remembers the last one across restarts.
///
/// Accessed only from the reconciliation task; ids are never reused within
/// a process lifetime and survive restarts through [`ConnIdAllocator::store`].
#[derive(Debug)]
pub struct ConnIdAllocator {
    path: PathBuf,
    last: u64,
}

impl ConnIdAllocator {
    /// Loads the last assigned id from `path`. A missing file starts the
    /// counter at zero; any other read failure surfaces.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let last = read_last_id(&path)?;
        debug!(last, path = %path.display(), "connection id allocator loaded");
        Ok(Self { path, last })
    }

    /// Increments the counter and returns the freshly assigned id.
    pub fn allocate(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    pub fn last(&self) -> u64 {
        self.last
    }

    /// Persists the counter with user-only permissions. A zero counter is
    /// never written; write failures are logged, not propagated.
    pub fn store(&self) {
        if self.last == 0 {
            return;
        }

        debug!(last = self.last, path = %self.path.display(), "writing last connection id");

        let written = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(CONN_ID_FILE_MODE)
            .open(&self.path)
            .and_then(|mut file| {
                file.write_all(format!("{}\n", self.last).as_bytes())?;
                file.sync_all()
            });

        if let Err(e) = written {
            warn!(error = %e, path = %self.path.display(), "connection id file write failed");
        }
    }
}

fn read_last_id(path: &Path) -> Result<u64> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "connection id file does not yet exist, starting at zero");
            return Ok(0);
        },
        Err(e) => {
            return Err(e).with_context(|| format!("stat against {} failed", path.display()));
        },
    };

    let file_type = meta.file_type();
    if !file_type.is_file() && !file_type.is_symlink() {
        bail!(
            "{} is not a regular file or symbolic link",
            path.display()
        );
    }

    if meta.mode() & 0o777 != CONN_ID_FILE_MODE {
        warn!(
            path = %path.display(),
            "permissions should only be user read/write (0600, -rw-------)"
        );
    }
    let caller_uid = unsafe { libc::getuid() };
    if meta.uid() != caller_uid {
        warn!(
            path = %path.display(),
            owner = meta.uid(),
            caller = caller_uid,
            "file not owned by current effective user id"
        );
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed
        .parse::<u64>()
        .with_context(|| format!("failed to parse connection id from {}", path.display()))
}
