// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Operator tools for the report's lock.

use std::{io::Write, path::PathBuf};

use chrono::{DateTime, Local};
use clap::Parser;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    cli::common::{display_warnings, open_output, ReportArgs, Warn, ARG_FILE_HELP},
    report::LockState,
    PipectlError,
};

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(in crate::cli) struct ReportLockArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(default)]
    pub(super) report: ReportArgs,
}

impl ReportLockArgs {
    pub(in crate::cli) fn merge(self) -> Result<ReportLockArgs, PipectlError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let ReportLockArgs {
                args_file: _,
                report,
            } = unpack_arg_file!(arg_file);

            Ok(ReportLockArgs {
                args_file: None,
                report: cli_args.report.merge(report),
            })
        } else {
            Ok(cli_args)
        }
    }

    /// Print who holds the lock, if anyone.
    pub(in crate::cli) fn run_status(self, _dry_run: bool) -> Result<(), PipectlError> {
        debug!("{:#?}", self);

        let report = self.report.parse()?;
        let lock = report.lock();
        let mut out = open_output(None)?;
        match lock.state()? {
            LockState::Available => writeln!(out, "Available")?,
            LockState::Held { holder, since } => {
                match since {
                    Some(since) => {
                        let since: DateTime<Local> = since.into();
                        writeln!(out, "{holder} (since {})", since.format("%Y-%m-%d %H:%M:%S"))?
                    }
                    None => writeln!(out, "{holder}")?,
                };
            }
        }
        out.flush()?;
        Ok(())
    }

    /// Forcibly release the lock, whoever holds it.
    pub(in crate::cli) fn run_clear(self, dry_run: bool) -> Result<(), PipectlError> {
        debug!("{:#?}", self);

        let report = self.report.parse()?;
        let lock = report.lock();
        let state = lock.state()?;
        if let LockState::Held { holder, .. } = &state {
            format!(
                "Clearing a lock held by '{holder}'; make sure it isn't still running"
            )
            .warn();
        }
        display_warnings();

        if dry_run {
            info!("Would clear {}", lock.path().display());
            return Ok(());
        }
        lock.clear()?;
        info!("Cleared lock file {}", lock.path().display());
        Ok(())
    }
}
