// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `report-*` subcommands: what pipeline stages call to record their
//! progress, and what operators call to inspect it.

mod lock;
mod query;

pub(super) use lock::ReportLockArgs;
pub(super) use query::{ReportGetArgs, ReportSelectArgs, ReportSuccessfulArgs, ReportVerifyArgs};

use std::path::PathBuf;

use clap::Parser;
use itertools::Itertools;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::common::{display_warnings, ReportArgs, Warn, ARG_FILE_HELP};
use crate::{
    constants::DEFAULT_MAX_ATTEMPTS,
    report::{
        default_report_columns, start, start_if_unprocessed, CsvReport, ObsStore, Obsid,
        ReportError, ReportField,
    },
    PipectlError,
};

lazy_static::lazy_static! {
    static ref MAX_ATTEMPTS_HELP: String =
        format!("An observation started more than this many times is marked 'Failed'. Default: {DEFAULT_MAX_ATTEMPTS}");
}

/// Something that must be given, either on the command line or in an
/// arguments file.
pub(super) fn required<T>(value: Option<T>, arg: &str) -> Result<T, PipectlError> {
    value.ok_or_else(|| PipectlError::Generic(format!("{arg} must be supplied")))
}

/// `--obsid`, which must not be blank.
pub(super) fn required_obsid(value: Option<String>) -> Result<Obsid, PipectlError> {
    let obsid = Obsid::new(required(value, "--obsid")?);
    if obsid.as_str().is_empty() {
        return Err(ReportError::EmptyObsid.into());
    }
    Ok(obsid)
}

/// Stages must not die because the report is busy; they log and carry on, and
/// the orchestration notices the missing update later.
fn tolerate_transient<T>(result: Result<T, ReportError>) -> Result<Option<T>, PipectlError> {
    match result {
        Ok(t) => Ok(Some(t)),
        Err(e) if e.is_transient() => {
            warn!("Report update unsuccessful: {e}");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// The report must exist before a stage can write to it.
fn existing(report: CsvReport) -> Result<CsvReport, PipectlError> {
    if report.path().exists() {
        Ok(report)
    } else {
        Err(PipectlError::Report(format!(
            "Report {} doesn't exist",
            report.path().display()
        )))
    }
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct ReportCreateArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(default)]
    pub(super) report: ReportArgs,

    /// The columns of the new report, after 'obsid'. The default is the
    /// columns written by the imaging pipeline's stages.
    #[clap(short, long, multiple_values(true))]
    pub(super) columns: Option<Vec<String>>,

    /// Replace an existing report.
    #[clap(long)]
    #[serde(default)]
    pub(super) overwrite: bool,
}

impl ReportCreateArgs {
    pub(super) fn merge(self) -> Result<ReportCreateArgs, PipectlError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let ReportCreateArgs {
                args_file: _,
                report,
                columns,
                overwrite,
            } = unpack_arg_file!(arg_file);

            Ok(ReportCreateArgs {
                args_file: None,
                report: cli_args.report.merge(report),
                columns: cli_args.columns.or(columns),
                overwrite: cli_args.overwrite || overwrite,
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), PipectlError> {
        debug!("{:#?}", self);

        let ReportCreateArgs {
            args_file: _,
            report,
            columns,
            overwrite,
        } = self;

        let report = report.parse()?;
        let columns = columns.unwrap_or_else(default_report_columns);
        for column in &columns {
            if column.parse::<ReportField>().is_err() {
                format!("Column '{column}' isn't a field the pipeline writes").warn();
            }
        }
        if overwrite && report.path().exists() {
            format!("Overwriting {}", report.path().display()).warn();
        }
        display_warnings();

        if dry_run {
            info!(
                "Would create {} with columns {}",
                report.path().display(),
                columns.iter().join(", ")
            );
            return Ok(());
        }
        report.create(&columns, overwrite)?;
        Ok(())
    }
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct ReportUpdateArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(default)]
    pub(super) report: ReportArgs,

    /// The observation to update. Only its first 10 characters are used.
    #[clap(short, long)]
    pub(super) obsid: Option<String>,

    /// The report field (column) to set, e.g. status or postImage_0001.
    #[clap(short, long)]
    pub(super) field: Option<String>,

    /// The new value. May be empty.
    #[clap(long, allow_hyphen_values = true)]
    pub(super) value: Option<String>,

    /// Write fields that aren't part of the pipeline's vocabulary, creating
    /// new columns for them.
    #[clap(long)]
    #[serde(default)]
    pub(super) allow_unknown_field: bool,
}

impl ReportUpdateArgs {
    pub(super) fn merge(self) -> Result<ReportUpdateArgs, PipectlError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let ReportUpdateArgs {
                args_file: _,
                report,
                obsid,
                field,
                value,
                allow_unknown_field,
            } = unpack_arg_file!(arg_file);

            Ok(ReportUpdateArgs {
                args_file: None,
                report: cli_args.report.merge(report),
                obsid: cli_args.obsid.or(obsid),
                field: cli_args.field.or(field),
                value: cli_args.value.or(value),
                allow_unknown_field: cli_args.allow_unknown_field || allow_unknown_field,
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), PipectlError> {
        debug!("{:#?}", self);

        let ReportUpdateArgs {
            args_file: _,
            report,
            obsid,
            field,
            value,
            allow_unknown_field,
        } = self;

        let obsid = required_obsid(obsid)?;
        let field = required(field, "--field")?;
        let value = required(value, "--value")?;
        match field.parse::<ReportField>() {
            Ok(f) => f.validate_value(&value)?,
            Err(_) if allow_unknown_field => {
                format!("'{field}' isn't a known report field; writing it anyway").warn()
            }
            Err(e) => return Err(e.into()),
        }
        let report = existing(report.parse()?)?;
        display_warnings();

        if dry_run {
            info!("Would set {obsid}'s {field} to '{value}'");
            return Ok(());
        }
        tolerate_transient(report.update(&obsid, &field, &value))?;
        Ok(())
    }
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct ReportStartArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(default)]
    pub(super) report: ReportArgs,

    /// The observation being (re-)started.
    #[clap(short, long)]
    pub(super) obsid: Option<String>,

    /// The directory the observation is processed in.
    #[clap(short = 'd', long)]
    pub(super) obs_dir: Option<String>,

    #[clap(long, help = MAX_ATTEMPTS_HELP.as_str())]
    pub(super) max_attempts: Option<u32>,
}

impl ReportStartArgs {
    pub(super) fn merge(self) -> Result<ReportStartArgs, PipectlError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let ReportStartArgs {
                args_file: _,
                report,
                obsid,
                obs_dir,
                max_attempts,
            } = unpack_arg_file!(arg_file);

            Ok(ReportStartArgs {
                args_file: None,
                report: cli_args.report.merge(report),
                obsid: cli_args.obsid.or(obsid),
                obs_dir: cli_args.obs_dir.or(obs_dir),
                max_attempts: cli_args.max_attempts.or(max_attempts),
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), PipectlError> {
        self.run_inner(dry_run, false)
    }

    /// Only start the observation if it is still a symlink in its
    /// observation directory, i.e. nobody has processed it in place yet.
    pub(super) fn run_if_unprocessed(self, dry_run: bool) -> Result<(), PipectlError> {
        self.run_inner(dry_run, true)
    }

    fn run_inner(self, dry_run: bool, only_unprocessed: bool) -> Result<(), PipectlError> {
        debug!("{:#?}", self);

        let ReportStartArgs {
            args_file: _,
            report,
            obsid,
            obs_dir,
            max_attempts,
        } = self;

        let obsid = required_obsid(obsid)?;
        let obs_dir = required(obs_dir, "--obs-dir")?;
        let max_attempts = max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let report = existing(report.parse()?)?;
        display_warnings();

        if dry_run {
            info!("Would start {obsid} in {obs_dir}");
            return Ok(());
        }
        let record = if only_unprocessed {
            match tolerate_transient(start_if_unprocessed(
                &report,
                &obsid,
                &obs_dir,
                max_attempts,
            ))? {
                Some(None) => {
                    return Err(PipectlError::Generic(format!(
                        "{obsid} has already been processed"
                    )))
                }
                Some(record) => record,
                None => None,
            }
        } else {
            tolerate_transient(start(&report, &obsid, &obs_dir, max_attempts))?
        };
        if let Some(record) = record {
            debug!("{obsid} is now {:?}", record.non_empty().collect::<Vec<_>>());
        }
        Ok(())
    }
}
