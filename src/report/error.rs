// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with reading, writing and locking reports.

use thiserror::Error;

use crate::io::GlobError;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Couldn't read report {file}: {err}")]
    Read { file: String, err: csv::Error },

    #[error("Couldn't write report {file}: {err}")]
    Write { file: String, err: csv::Error },

    #[error("Report {file} doesn't start with an '{expected}' column (got '{got}')")]
    MissingKeyColumn {
        file: String,
        expected: &'static str,
        got: String,
    },

    #[error("Report {file} line {line}: {num_cells} cells, but the header only has {num_columns} columns")]
    RowTooLong {
        file: String,
        line: u64,
        num_cells: usize,
        num_columns: usize,
    },

    #[error("Report {file} line {line}: {obsid} is already listed on line {first_line}")]
    DuplicateObsid {
        file: String,
        line: u64,
        first_line: u64,
        obsid: String,
    },

    #[error("Report {file} line {line}: the row has values but no obsid")]
    MissingObsid { file: String, line: u64 },

    #[error("An observation needs a non-empty obsid")]
    EmptyObsid,

    #[error("Refusing to overwrite the existing report {0}")]
    AlreadyExists(String),

    #[error("Observation {0} isn't in the report")]
    NoSuchObsid(String),

    #[error("Unknown report field '{0}'")]
    UnknownField(String),

    #[error("'{0}' isn't a sub-channel; expected 4 digits or MFS")]
    BadSubChannel(String),

    #[error("Report field '{field}' must be a non-negative integer, but got '{value}'")]
    NotAnInteger { field: String, value: String },

    #[error("Couldn't find a 'reportCsv=' entry in {0}")]
    NoReportInConfig(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

impl ReportError {
    /// Coordination failures: somebody else holds the lock for too long, or
    /// the shared filesystem hiccuped. A stage that hits one of these should
    /// carry on rather than die; the caller decides whether to retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReportError::Lock(_)
                | ReportError::Read { .. }
                | ReportError::Write { .. }
                | ReportError::IO(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Couldn't acquire the lock {file} after {attempts} attempts ({waited_secs:.0}s); it is held by '{holder}'")]
    Timeout {
        file: String,
        attempts: u32,
        waited_secs: f64,
        holder: String,
    },

    #[error("Gave up waiting for the lock {0}")]
    Cancelled(String),

    #[error("Lock file {file}: {err}")]
    IO { file: String, err: std::io::Error },
}
