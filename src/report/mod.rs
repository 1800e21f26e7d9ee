// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The pipeline report: a shared table recording the progress of every
//! observation.
//!
//! Every pipeline stage, on every host, records its outcome here, and the
//! orchestration reads it to decide what to run next. Workers never talk to
//! each other; all mutations go through [`ObsStore`], which serialises them
//! with a [`ReportLock`] and always re-reads the whole table after taking the
//! lock, so no worker overwrites another's committed change.

mod error;
mod fields;
mod lock;
mod nextflow;
mod queue;
mod table;
#[cfg(test)]
mod tests;

pub use error::{LockError, ReportError};
pub use fields::{
    default_sub_channels, ObsStatus, PlainField, ReportField, SubChannel, SubChannelField,
    KNOWN_FIELDS_HELP,
};
pub use lock::{LockConfig, LockGuard, LockState, ReportLock};
pub use nextflow::report_path_from_nextflow_config;
pub use queue::{
    default_verify_products, select_queue, successful, verify, ProductTemplate, VerifySummary,
    DEFAULT_MOSAIC_STAGES, DEFAULT_VERIFY_STAGES,
};
pub use table::{ObsRecord, ReportTable};

use std::{
    fmt,
    path::{Path, PathBuf},
};

use crossbeam_channel::Receiver;
use itertools::Itertools;
use log::{debug, info};

use crate::constants::{OBSID_COLUMN, OBSID_KEY_WIDTH};

/// An observation's key in the report: the first ten characters of its ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Obsid(String);

impl Obsid {
    pub fn new<S: AsRef<str>>(s: S) -> Obsid {
        Obsid(s.as_ref().trim().chars().take(OBSID_KEY_WIDTH).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Obsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for Obsid {
    fn from(o: u64) -> Self {
        Obsid::new(o.to_string())
    }
}

/// Somewhere observation records are kept.
pub trait ObsStore {
    /// Get the current record of an observation, if it has one.
    fn get(&self, obsid: &Obsid) -> Result<Option<ObsRecord>, ReportError>;

    /// Read-modify-write one observation's record as a single transaction.
    /// Nobody else can mutate the store while `f` runs. The record handed to
    /// `f` is empty if the observation is new. Returns the record as
    /// committed.
    fn transact<F>(&self, obsid: &Obsid, f: F) -> Result<ObsRecord, ReportError>
    where
        F: FnOnce(&mut ObsRecord) -> Result<(), ReportError>;

    /// Set a single field of an observation's record.
    fn update(&self, obsid: &Obsid, field: &str, value: &str) -> Result<(), ReportError> {
        self.transact(obsid, |record| {
            record.set(field, value);
            Ok(())
        })
        .map(|_| ())
    }
}

/// A report kept as a CSV file on a shared filesystem.
#[derive(Debug, Clone)]
pub struct CsvReport {
    path: PathBuf,
    lock: ReportLock,
    cancel: Option<Receiver<()>>,
    quiet: bool,
}

impl CsvReport {
    pub fn new<P: AsRef<Path>>(path: P, lock_config: LockConfig) -> CsvReport {
        let path = path.as_ref().to_path_buf();
        CsvReport {
            lock: ReportLock::for_report(&path, lock_config),
            path,
            cancel: None,
            quiet: false,
        }
    }

    /// Abandon any wait for the lock when something is sent on (or the sender
    /// of) `cancel` is dropped. This is for programs using the library; the
    /// `pipectl` binary always waits out the configured attempts.
    pub fn with_cancel(mut self, cancel: Receiver<()>) -> CsvReport {
        self.cancel = Some(cancel);
        self
    }

    /// Don't log each change before it is made.
    pub fn quiet(mut self, quiet: bool) -> CsvReport {
        self.quiet = quiet;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock(&self) -> &ReportLock {
        &self.lock
    }

    /// Read the whole table without taking the lock. The table is always
    /// replaced atomically, so this sees some committed state.
    pub fn read_table(&self) -> Result<ReportTable, ReportError> {
        ReportTable::read(&self.path)
    }

    /// Write a new, empty report with the given columns.
    pub fn create<I, S>(&self, columns: I, overwrite: bool) -> Result<(), ReportError>
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        if self.path.exists() && !overwrite {
            return Err(ReportError::AlreadyExists(self.path.display().to_string()));
        }
        let table = ReportTable::new(columns);
        info!(
            "Creating report {} with columns {}",
            self.path.display(),
            table.columns().iter().join(", ")
        );
        table.write(&self.path)
    }
}

impl ObsStore for CsvReport {
    fn get(&self, obsid: &Obsid) -> Result<Option<ObsRecord>, ReportError> {
        Ok(self.read_table()?.get(obsid))
    }

    fn transact<F>(&self, obsid: &Obsid, f: F) -> Result<ObsRecord, ReportError>
    where
        F: FnOnce(&mut ObsRecord) -> Result<(), ReportError>,
    {
        if obsid.as_str().is_empty() {
            return Err(ReportError::EmptyObsid);
        }
        let _guard = self.lock.acquire(obsid, self.cancel.as_ref())?;
        let mut table = self.read_table()?;
        let before = table.get(obsid);
        let mut record = before.clone().unwrap_or_else(|| ObsRecord::new(obsid.clone()));
        f(&mut record)?;
        if before.as_ref() == Some(&record) {
            debug!("Nothing to change for {obsid}");
        } else {
            table.merge(&record);
            table.write(&self.path)?;
        }
        // `_guard` releases the lock here, after the table is written.
        Ok(record)
    }

    fn update(&self, obsid: &Obsid, field: &str, value: &str) -> Result<(), ReportError> {
        if !self.quiet {
            info!("Updating report - obsid: {obsid} - field: {field} - value: {value}");
        }
        self.transact(obsid, |record| {
            record.set(field, value);
            Ok(())
        })
        .map(|_| ())
    }
}

/// The columns of a freshly created report.
pub fn default_report_columns() -> Vec<String> {
    let mut columns: Vec<String> = [
        PlainField::GenerateCalibration,
        PlainField::ApplyCalibration,
        PlainField::FlagUv,
        PlainField::UvSub,
        PlainField::Image,
    ]
    .iter()
    .map(|f| f.to_string())
    .collect();
    let subs = default_sub_channels();
    for field in [
        SubChannelField::PostImage,
        SubChannelField::SourceCount,
        SubChannelField::Rms,
    ] {
        for &sub in &subs {
            columns.push(ReportField::PerSubChannel(field, sub).to_string());
        }
    }
    columns.push(PlainField::ObsDir.to_string());
    debug_assert!(!columns.iter().any(|c| c == OBSID_COLUMN));
    columns
}

/// Mark an observation as (re-)entering the queue: `status` becomes "Queued",
/// `attempts` goes up by one and `obsDir` is recorded. An observation that has
/// now been started more than `max_attempts` times is "Failed" instead.
pub fn start<S: ObsStore>(
    store: &S,
    obsid: &Obsid,
    obs_dir: &str,
    max_attempts: u32,
) -> Result<ObsRecord, ReportError> {
    info!("Starting {obsid} in {obs_dir}");
    store.transact(obsid, |record| {
        let attempts_field = ReportField::from(PlainField::Attempts);
        let previous = record.get(&attempts_field.to_string()).trim().to_string();
        attempts_field.validate_value(&previous)?;
        let attempts = previous.parse::<u32>().unwrap_or(0) + 1;
        let status = if attempts > max_attempts {
            ObsStatus::Failed
        } else {
            ObsStatus::Queued
        };

        for (field, value) in [
            (PlainField::Status, status.to_string()),
            (PlainField::Attempts, attempts.to_string()),
            (PlainField::ObsDir, obs_dir.to_string()),
        ] {
            info!("Updating report - obsid: {obsid} - field: {field} - value: {value}");
            record.set(field, value);
        }
        Ok(())
    })
}

/// Only start an observation that hasn't been processed in place yet. Until a
/// worker picks it up, `<obs_dir>/<obsid>` is a symlink to the downloaded
/// data. Returns `None` (and changes nothing) if it is not a symlink.
pub fn start_if_unprocessed<S: ObsStore>(
    store: &S,
    obsid: &Obsid,
    obs_dir: &str,
    max_attempts: u32,
) -> Result<Option<ObsRecord>, ReportError> {
    let link = Path::new(obs_dir).join(obsid.as_str());
    let is_symlink = link
        .symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if !is_symlink {
        info!("{obsid} has already been processed");
        return Ok(None);
    }
    start(store, obsid, obs_dir, max_attempts).map(Some)
}
