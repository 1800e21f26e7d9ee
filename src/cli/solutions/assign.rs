// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Assign every observation the calibration solutions it should use.

use std::{fs::File, io::BufWriter, path::PathBuf};

use clap::Parser;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::QualityArgs;
use crate::{
    cli::common::{display_warnings, open_output, Warn, ARG_FILE_HELP},
    constants::DEFAULT_SOLUTIONS_SUFFIX,
    report::ReportTable,
    solutions::{
        cenchans_from_report, find_valid_solutions, read_cenchan_file, read_obsids_file,
        write_assignment, AssignOptions, CenChanLookup,
    },
    PipectlError,
};

lazy_static::lazy_static! {
    static ref SUFFIX_HELP: String =
        format!("Solutions are read from <base-path>/<obsid>/<obsid><suffix>. Default: {DEFAULT_SOLUTIONS_SUFFIX}");
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(in crate::cli) struct SolutionsAssignArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    /// A text file of obsids, one per line.
    #[clap(short, long, parse(from_os_str))]
    pub(super) obsids: Option<PathBuf>,

    /// The directory containing a directory per observation. Default: .
    #[clap(short, long, parse(from_os_str))]
    pub(super) base_path: Option<PathBuf>,

    #[clap(long, help = SUFFIX_HELP.as_str())]
    pub(super) suffix: Option<String>,

    /// Take solutions from any observation, not just those sharing a central
    /// channel.
    #[clap(long)]
    #[serde(default)]
    pub(super) any_cenchan: bool,

    /// A text file of "obsid cenchan" lines.
    #[clap(long, parse(from_os_str), help_heading = "CENTRAL CHANNELS")]
    pub(super) cenchan_file: Option<PathBuf>,

    /// Read central channels from the 'cenchan' column of this report. Used
    /// when --cenchan-file isn't given.
    #[clap(long, parse(from_os_str), help_heading = "CENTRAL CHANNELS")]
    pub(super) cenchan_report: Option<PathBuf>,

    /// If central channels can't be found, put every observation in one group
    /// rather than stopping.
    #[clap(long, help_heading = "CENTRAL CHANNELS")]
    #[serde(default)]
    pub(super) disable_lookup_check: bool,

    #[clap(flatten)]
    #[serde(default)]
    pub(super) quality: QualityArgs,

    /// Don't print the assignment to stdout.
    #[clap(long, help_heading = "OUTPUT")]
    #[serde(default)]
    pub(super) no_report: bool,

    /// Also write the assignment to this file.
    #[clap(long, parse(from_os_str), help_heading = "OUTPUT")]
    pub(super) calids_out: Option<PathBuf>,

    /// Only write the assigned calibration obsids to --calids-out, one per
    /// line.
    #[clap(long, help_heading = "OUTPUT")]
    #[serde(default)]
    pub(super) only_calids: bool,
}

impl SolutionsAssignArgs {
    pub(in crate::cli) fn merge(self) -> Result<SolutionsAssignArgs, PipectlError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let SolutionsAssignArgs {
                args_file: _,
                obsids,
                base_path,
                suffix,
                any_cenchan,
                cenchan_file,
                cenchan_report,
                disable_lookup_check,
                quality,
                no_report,
                calids_out,
                only_calids,
            } = unpack_arg_file!(arg_file);

            Ok(SolutionsAssignArgs {
                args_file: None,
                obsids: cli_args.obsids.or(obsids),
                base_path: cli_args.base_path.or(base_path),
                suffix: cli_args.suffix.or(suffix),
                any_cenchan: cli_args.any_cenchan || any_cenchan,
                cenchan_file: cli_args.cenchan_file.or(cenchan_file),
                cenchan_report: cli_args.cenchan_report.or(cenchan_report),
                disable_lookup_check: cli_args.disable_lookup_check || disable_lookup_check,
                quality: cli_args.quality.merge(quality),
                no_report: cli_args.no_report || no_report,
                calids_out: cli_args.calids_out.or(calids_out),
                only_calids: cli_args.only_calids || only_calids,
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(in crate::cli) fn run(self, dry_run: bool) -> Result<(), PipectlError> {
        debug!("{:#?}", self);

        let SolutionsAssignArgs {
            args_file: _,
            obsids,
            base_path,
            suffix,
            any_cenchan,
            cenchan_file,
            cenchan_report,
            disable_lookup_check,
            quality,
            no_report,
            calids_out,
            only_calids,
        } = self;

        let obsids_file = obsids.ok_or_else(|| {
            PipectlError::Assign("A file of obsids must be supplied with --obsids".to_string())
        })?;
        let obsids = read_obsids_file(&obsids_file)?;
        if obsids.is_empty() {
            return Err(PipectlError::Assign(format!(
                "{} doesn't list any obsids",
                obsids_file.display()
            )));
        }
        info!("Read {} obsids from {}", obsids.len(), obsids_file.display());

        let lookup: Option<CenChanLookup> = match (cenchan_file, cenchan_report) {
            (Some(file), report) => {
                if report.is_some() {
                    "--cenchan-report is ignored when --cenchan-file is given".warn();
                }
                Some(read_cenchan_file(&file)?)
            }
            (None, Some(report)) => Some(cenchans_from_report(&ReportTable::read(&report)?)),
            (None, None) => None,
        };
        if any_cenchan && lookup.is_some() {
            "Central channels are ignored with --any-cenchan".warn();
        }
        if only_calids && calids_out.is_none() {
            "--only-calids does nothing without --calids-out".warn();
        }

        let options = AssignOptions {
            base_path: base_path.unwrap_or_else(|| PathBuf::from(".")),
            suffix: suffix.unwrap_or_else(|| DEFAULT_SOLUTIONS_SUFFIX.to_string()),
            check: quality.parse()?,
            same_cenchan: !any_cenchan,
            disable_lookup_check,
        };
        display_warnings();

        if dry_run {
            info!(
                "Would assign solutions to {} observations from {}",
                obsids.len(),
                options.base_path.display()
            );
            return Ok(());
        }

        info!("Assigning calibration");
        let donors = find_valid_solutions(&obsids, &options, lookup.as_ref())?;
        if !no_report {
            write_assignment(open_output(None)?, &obsids, &donors, false)?;
        }
        if let Some(calids_out) = calids_out {
            let f = BufWriter::new(File::create(&calids_out)?);
            write_assignment(f, &obsids, &donors, only_calids)?;
            info!("Wrote the assignment to {}", calids_out.display());
        }
        Ok(())
    }
}
