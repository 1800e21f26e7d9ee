// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The cooperative lock that serialises report mutations across workers.
//!
//! Workers on different hosts share nothing but a filesystem, so the lock is a
//! file next to the report. Acquiring it is an exclusive create (`O_EXCL`),
//! which either makes us the holder or fails because somebody else already
//! is; there is no window between checking and claiming. The file contains a
//! single line: the holder's obsid. No file means the lock is available.
//!
//! Older tooling released the lock by writing "Available" into the file; such
//! a file is treated as available. A lock that hasn't been touched for longer
//! than the configured stale age is presumed to belong to a crashed worker and
//! is broken.
//!
//! Breaking is serialised by a second marker file, also created exclusively.
//! While holding it, a breaker checks that the lock file is still the very
//! file (device, inode, modification time and content) it judged breakable,
//! and only then removes it. A live lock is never moved or removed by a
//! breaker.

use std::{
    fs::{self, File, Metadata, OpenOptions},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, SystemTime},
};

use crossbeam_channel::{after, select, Receiver};
use log::{debug, trace, warn};

use super::{LockError, Obsid};
use crate::constants::{
    DEFAULT_LOCK_ATTEMPTS, DEFAULT_LOCK_BACKOFF_SECS, DEFAULT_LOCK_STALE_AFTER_SECS,
    LOCK_AVAILABLE, LOCK_BREAK_FILE_NAME, LOCK_FILE_NAME,
};

/// How hard to try for the lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockConfig {
    /// The number of acquisition attempts before giving up.
    pub attempts: u32,

    /// The time to wait between attempts.
    pub backoff: Duration,

    /// A lock older than this is broken. `None` disables stale-lock breaking;
    /// operators then have to clear crashed locks by hand.
    pub stale_after: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            attempts: DEFAULT_LOCK_ATTEMPTS,
            backoff: Duration::from_secs_f64(DEFAULT_LOCK_BACKOFF_SECS),
            stale_after: Some(Duration::from_secs_f64(DEFAULT_LOCK_STALE_AFTER_SECS)),
        }
    }
}

/// What the lock file currently says.
#[derive(Debug, Clone, PartialEq)]
pub enum LockState {
    Available,
    Held {
        holder: String,
        /// When the holder took the lock, if the filesystem knows.
        since: Option<SystemTime>,
    },
}

/// A lock file as it was when somebody looked at it. Two identities are only
/// equal if they describe the same, unmodified file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct LockIdentity {
    dev: u64,
    ino: u64,
    modified: Option<SystemTime>,
    pub(super) contents: String,
}

#[cfg(unix)]
fn file_id(meta: &Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;

    (meta.dev(), meta.ino())
}

#[cfg(not(unix))]
fn file_id(_meta: &Metadata) -> (u64, u64) {
    (0, 0)
}

#[derive(Debug, Clone)]
pub struct ReportLock {
    path: PathBuf,

    /// Marker held while breaking a stale lock.
    break_path: PathBuf,

    config: LockConfig,
}

/// Proof of holding the lock. The lock is released when this is dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a ReportLock,
    holder: String,
}

impl LockGuard<'_> {
    pub fn holder(&self) -> &str {
        &self.holder
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release(&self.holder) {
            warn!("Couldn't release {}: {e}", self.lock.path.display());
        }
    }
}

impl ReportLock {
    /// The lock guarding `report` lives in the same directory as it.
    pub fn for_report(report: &Path, config: LockConfig) -> ReportLock {
        let dir = match report.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        ReportLock {
            path: dir.join(LOCK_FILE_NAME),
            break_path: dir.join(LOCK_BREAK_FILE_NAME),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    fn io_err(&self, err: std::io::Error) -> LockError {
        LockError::IO {
            file: self.path.display().to_string(),
            err,
        }
    }

    /// Read the lock file. `None` means there is no lock file.
    fn read_contents(&self, path: &Path) -> Result<Option<String>, LockError> {
        match File::open(path) {
            Ok(mut f) => {
                let mut contents = String::new();
                f.read_to_string(&mut contents)
                    .map_err(|e| self.io_err(e))?;
                Ok(Some(contents.trim().to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_err(e)),
        }
    }

    /// Look at the lock file. `None` means there is no lock file. The metadata
    /// and content come from the same open handle, so they describe the same
    /// file even if the lock changes hands meanwhile.
    pub(super) fn identify(&self) -> Result<Option<LockIdentity>, LockError> {
        let mut f = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        let meta = f.metadata().map_err(|e| self.io_err(e))?;
        let mut contents = String::new();
        f.read_to_string(&mut contents)
            .map_err(|e| self.io_err(e))?;
        let (dev, ino) = file_id(&meta);
        Ok(Some(LockIdentity {
            dev,
            ino,
            modified: meta.modified().ok(),
            contents: contents.trim().to_string(),
        }))
    }

    pub fn state(&self) -> Result<LockState, LockError> {
        match self.identify()? {
            None => Ok(LockState::Available),
            Some(id) if id.contents == LOCK_AVAILABLE => Ok(LockState::Available),
            Some(id) => Ok(LockState::Held {
                holder: id.contents,
                since: id.modified,
            }),
        }
    }

    /// Forcibly make the lock available, regardless of who holds it. Only for
    /// operators recovering from a crashed worker. An abandoned break marker is
    /// removed too.
    pub fn clear(&self) -> Result<(), LockError> {
        for path in [&self.path, &self.break_path] {
            match fs::remove_file(path) {
                Ok(()) => (),
                Err(e) if e.kind() == ErrorKind::NotFound => (),
                Err(e) => return Err(self.io_err(e)),
            }
        }
        Ok(())
    }

    fn is_stale(&self, modified: Option<SystemTime>) -> bool {
        let stale_after = match self.config.stale_after {
            Some(d) => d,
            None => return false,
        };
        modified
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .map(|age| age > stale_after)
            .unwrap_or(false)
    }

    /// May a lock file that looks like this be broken? An empty file is a
    /// holder that hasn't written its name yet, so it isn't.
    pub(super) fn is_breakable(&self, id: &LockIdentity) -> bool {
        id.contents == LOCK_AVAILABLE || self.is_stale(id.modified)
    }

    /// Remove the lock file, but only if it is still exactly the file that was
    /// `judged` breakable and it is still breakable. Returns whether the judged
    /// lock is gone.
    pub(super) fn break_lock(&self, judged: &LockIdentity) -> Result<bool, LockError> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.break_path)
        {
            Ok(_) => (),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                trace!("Somebody else is breaking {}", self.path.display());
                self.clear_abandoned_break()?;
                return Ok(false);
            }
            Err(e) => return Err(self.io_err(e)),
        }
        let _marker = scopeguard::guard(&self.break_path, |p| {
            if let Err(e) = fs::remove_file(p) {
                warn!("Couldn't remove {}: {e}", p.display());
            }
        });

        match self.identify()? {
            None => Ok(true),
            Some(current) if &current == judged && self.is_breakable(&current) => {
                match fs::remove_file(&self.path) {
                    Ok(()) => (),
                    Err(e) if e.kind() == ErrorKind::NotFound => (),
                    Err(e) => return Err(self.io_err(e)),
                }
                if judged.contents != LOCK_AVAILABLE {
                    warn!(
                        "Broke stale lock {} held by '{}'",
                        self.path.display(),
                        judged.contents
                    );
                }
                Ok(true)
            }
            Some(current) => {
                debug!(
                    "Lock {} changed hands (now '{}') since it was judged breakable; leaving it alone",
                    self.path.display(),
                    current.contents
                );
                Ok(false)
            }
        }
    }

    /// Break markers are only held for an instant. One older than the stale
    /// age belongs to a breaker that crashed.
    fn clear_abandoned_break(&self) -> Result<(), LockError> {
        let modified = match fs::metadata(&self.break_path) {
            Ok(m) => m.modified().ok(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(self.io_err(e)),
        };
        if self.is_stale(modified) {
            warn!("Removing abandoned {}", self.break_path.display());
            match fs::remove_file(&self.break_path) {
                Ok(()) => (),
                Err(e) if e.kind() == ErrorKind::NotFound => (),
                Err(e) => return Err(self.io_err(e)),
            }
        }
        Ok(())
    }

    /// One attempt at taking the lock.
    fn try_acquire(&self, holder: &str) -> Result<bool, LockError> {
        // Breaking a lock (or clearing an abandoned break marker first) costs
        // extra rounds.
        for _ in 0..4 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut f) => {
                    f.write_all(holder.as_bytes())
                        .and_then(|_| f.sync_all())
                        .map_err(|e| self.io_err(e))?;
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let judged = match self.identify()? {
                        Some(id) => id,
                        // Released between our create and read.
                        None => continue,
                    };
                    if self.is_breakable(&judged) {
                        self.break_lock(&judged)?;
                        continue;
                    }
                    trace!("Lock {} is held by '{}'", self.path.display(), judged.contents);
                    return Ok(false);
                }
                Err(e) => return Err(self.io_err(e)),
            }
        }
        Ok(false)
    }

    /// Wait out one backoff interval, unless `cancel` fires (or is dropped).
    fn wait(&self, cancel: Option<&Receiver<()>>) -> Result<(), LockError> {
        match cancel {
            Some(rx) => select! {
                recv(rx) -> _ => Err(LockError::Cancelled(self.path.display().to_string())),
                recv(after(self.config.backoff)) -> _ => Ok(()),
            },
            None => {
                thread::sleep(self.config.backoff);
                Ok(())
            }
        }
    }

    /// Acquire the lock on behalf of `obsid`, retrying up to the configured
    /// number of attempts. Sending on (or dropping the sender of) `cancel`
    /// abandons the wait early.
    pub fn acquire(
        &self,
        obsid: &Obsid,
        cancel: Option<&Receiver<()>>,
    ) -> Result<LockGuard, LockError> {
        let holder = obsid.as_str().to_string();
        let attempts = self.config.attempts.max(1);
        for attempt in 1..=attempts {
            if self.try_acquire(&holder)? {
                // The create is atomic, so this only fails if somebody
                // cleared the lock out from under us.
                if self.read_contents(&self.path)?.as_deref() == Some(holder.as_str()) {
                    debug!("Acquired {} on attempt {attempt}", self.path.display());
                    return Ok(LockGuard { lock: self, holder });
                }
                warn!("Lock {} was taken from us; retrying", self.path.display());
            }
            if attempt < attempts {
                self.wait(cancel)?;
            }
        }

        let holder = match self.state()? {
            LockState::Held { holder, .. } => holder,
            LockState::Available => LOCK_AVAILABLE.to_string(),
        };
        Err(LockError::Timeout {
            file: self.path.display().to_string(),
            attempts,
            waited_secs: self.config.backoff.as_secs_f64() * f64::from(attempts - 1),
            holder,
        })
    }

    /// Release the lock, but only if `holder` still has it.
    fn release(&self, holder: &str) -> Result<(), LockError> {
        match self.read_contents(&self.path)? {
            Some(c) if c == holder => match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(self.io_err(e)),
            },
            Some(c) => {
                warn!(
                    "Lock {} is now held by '{c}', not '{holder}'; leaving it alone",
                    self.path.display()
                );
                Ok(())
            }
            None => {
                warn!("Lock {} disappeared while held by '{holder}'", self.path.display());
                Ok(())
            }
        }
    }
}
