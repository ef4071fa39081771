//! Single-writer lock for mutating operations.
//!
//! An advisory `flock` (via `fs2`) on `SYSTEM/flowsort.lock`. Acquisition
//! polls until the configured timeout; the lock is released when the guard
//! drops, or by the kernel if the process dies.

use chrono::Utc;
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::FlowError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Serialize)]
struct Holder {
    pid: u32,
    acquired: String,
}

pub struct FlowLock {
    file: File,
    path: PathBuf,
}

impl FlowLock {
    /// Blocks for at most `timeout` waiting for the lock.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, FlowError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let started = Instant::now();
        loop {
            // fully qualified so newer std's File::try_lock_exclusive is not picked
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(FlowError::LockTimeout {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    debug!("waiting for lock {:?}", path);
                    thread::sleep(POLL_INTERVAL.min(timeout - waited));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut lock = Self {
            file,
            path: path.to_path_buf(),
        };
        lock.record_holder();
        info!("acquired {:?}", lock.path);
        Ok(lock)
    }

    /// Best effort; the lock itself is what matters.
    fn record_holder(&mut self) {
        let holder = Holder {
            pid: std::process::id(),
            acquired: Utc::now().to_rfc3339(),
        };
        let written = serde_json::to_vec(&holder)
            .map_err(io::Error::from)
            .and_then(|payload| {
                self.file.set_len(0)?;
                self.file.seek(SeekFrom::Start(0))?;
                self.file.write_all(&payload)
            });
        if let Err(e) = written {
            debug!("could not record lock holder in {:?}: {}", self.path, e);
        }
    }
}

impl Drop for FlowLock {
    fn drop(&mut self) {
        debug!("releasing {:?}", self.path);
        let _ = FileExt::unlock(&self.file);
    }
}
