// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all pipectl-related errors. This should be the *only* error
//! enum that is publicly visible.

use thiserror::Error;

use crate::{
    io::GlobError,
    report::{LockError, ReportError, KNOWN_FIELDS_HELP},
    solutions::{AssignError, QualityError, SolutionsReadError, SolutionsWriteError},
};

/// The *only* publicly visible error from pipectl. Each error message should
/// include a hint of where to look next, unless it's "generic".
#[derive(Error, Debug)]
pub enum PipectlError {
    /// An error related to reading or writing a report.
    #[error("{0}\n\nReports are CSV files whose first column is 'obsid'. A new one can be made with 'pipectl report-create'.")]
    Report(String),

    /// A report field or value that isn't part of the pipeline's vocabulary.
    #[error("{0}\nUse --allow-unknown-field to write other columns anyway.")]
    ReportField(String),

    /// An error related to the report's lock file.
    #[error("{0}\n\nIf the lock holder has crashed, see 'pipectl report-lock-status' and 'pipectl report-clear-lock'.")]
    Lock(String),

    /// Generic error surrounding calibration solutions.
    #[error("{0}\n\nSee 'pipectl solutions-check --help' for the supported solutions formats.")]
    Solutions(String),

    /// Error specific to AO calibration solutions.
    #[error("{0}\n\nAO solutions files start with a 48-byte 'MWAOCAL' header; this one may be truncated or not a solutions file at all.")]
    SolutionsAO(String),

    /// A quality check that can't be done as asked.
    #[error("{0}\n\nSee 'pipectl solutions-check --help' for the segment and edge-channel options.")]
    Quality(String),

    /// An error related to solutions-assign.
    #[error("{0}\n\nSee 'pipectl solutions-assign --help'.")]
    Assign(String),

    /// An error related to argument files.
    #[error("{0}\n\nArgument files hold the same options as the command line; 'pipectl <subcommand> --save-toml <file>' writes an example.")]
    ArgFile(String),

    /// A generic error that can't be clarified further, e.g. IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

impl From<ReportError> for PipectlError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::UnknownField(_)
            | ReportError::BadSubChannel(_)
            | ReportError::NotAnInteger { .. } => {
                Self::ReportField(format!("{e}\n\nKnown fields are {}.", *KNOWN_FIELDS_HELP))
            }
            ReportError::Lock(e) => Self::from(e),
            ReportError::Read { .. }
            | ReportError::Write { .. }
            | ReportError::MissingKeyColumn { .. }
            | ReportError::AlreadyExists(_)
            | ReportError::RowTooLong { .. }
            | ReportError::DuplicateObsid { .. }
            | ReportError::MissingObsid { .. }
            | ReportError::EmptyObsid
            | ReportError::NoSuchObsid(_)
            | ReportError::NoReportInConfig(_) => Self::Report(e.to_string()),
            ReportError::Glob(e) => Self::from(e),
            ReportError::IO(e) => Self::from(e),
        }
    }
}

impl From<LockError> for PipectlError {
    fn from(e: LockError) -> Self {
        Self::Lock(e.to_string())
    }
}

impl From<SolutionsReadError> for PipectlError {
    fn from(e: SolutionsReadError) -> Self {
        match e {
            SolutionsReadError::UnsupportedExt { .. } => Self::Solutions(e.to_string()),
            SolutionsReadError::AndreBinaryStr { .. }
            | SolutionsReadError::AndreBinaryVal { .. }
            | SolutionsReadError::BadShape { .. } => Self::SolutionsAO(e.to_string()),
            SolutionsReadError::IO(e) => Self::from(e),
        }
    }
}

impl From<SolutionsWriteError> for PipectlError {
    fn from(e: SolutionsWriteError) -> Self {
        match e {
            SolutionsWriteError::UnsupportedExt { .. } => Self::Solutions(e.to_string()),
            SolutionsWriteError::BadPolarisations(_) => Self::SolutionsAO(e.to_string()),
            SolutionsWriteError::IO(e) => Self::from(e),
        }
    }
}

impl From<QualityError> for PipectlError {
    fn from(e: QualityError) -> Self {
        match e {
            QualityError::IndivisibleSegments { .. }
            | QualityError::ZeroSegments
            | QualityError::MultipleTimeblocks(_)
            | QualityError::ChannelResolution { .. }
            | QualityError::EdgeChannelOverflow { .. }
            | QualityError::EdgesCoverBand { .. } => Self::Quality(e.to_string()),
            QualityError::Read(e) => Self::from(e),
        }
    }
}

impl From<AssignError> for PipectlError {
    fn from(e: AssignError) -> Self {
        match e {
            AssignError::NoUsableSolutions { .. }
            | AssignError::NoDonor(_)
            | AssignError::NoCenChanLookup
            | AssignError::MissingCenChans(_)
            | AssignError::Parse { .. } => Self::Assign(e.to_string()),
            AssignError::Quality(e) => Self::from(e),
            AssignError::IO(e) => Self::from(e),
        }
    }
}

impl From<GlobError> for PipectlError {
    fn from(e: GlobError) -> Self {
        Self::Generic(e.to_string())
    }
}

impl From<std::io::Error> for PipectlError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}
