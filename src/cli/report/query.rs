// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Read-mostly report subcommands. Results go to stdout (or `--output`), so
//! they can be piped into the next pipeline step.

use std::{io::Write, path::PathBuf};

use clap::Parser;
use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{existing, required_obsid};
use crate::{
    cli::common::{display_warnings, open_output, ReportArgs, Warn, ARG_FILE_HELP},
    constants::{DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE_LIMIT},
    report::{
        default_verify_products, select_queue, successful, verify, ObsStore, ProductTemplate,
        ReportError, ReportField, SubChannel, DEFAULT_MOSAIC_STAGES, DEFAULT_VERIFY_STAGES,
    },
    PipectlError,
};

lazy_static::lazy_static! {
    static ref QUEUE_LIMIT_HELP: String =
        format!("The maximum number of observations to select. Default: {DEFAULT_QUEUE_LIMIT}");

    static ref SELECT_MAX_ATTEMPTS_HELP: String =
        format!("Skip observations that have been started this many times. Default: {DEFAULT_MAX_ATTEMPTS}");

    static ref VERIFY_STAGES_HELP: String =
        format!("Only verify observations whose fields all read 'Success'. Default: {}", DEFAULT_VERIFY_STAGES.iter().join(" "));

    static ref VERIFY_PRODUCTS_HELP: String =
        format!("Paths every verified observation must have; {{obsdir}}, {{obsid}} and {{sub}} are substituted and globs are allowed. Default: {}", default_verify_products().iter().map(|p| &p.0).join(" "));

    static ref SUCCESSFUL_STAGES_HELP: String =
        format!("Fields that must all read 'Success'. Default: {}", DEFAULT_MOSAIC_STAGES.iter().join(" "));
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(in crate::cli) struct ReportGetArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(default)]
    pub(super) report: ReportArgs,

    /// The observation to look up.
    #[clap(short, long)]
    pub(super) obsid: Option<String>,

    /// Only print the value of this field.
    #[clap(short, long)]
    pub(super) field: Option<String>,
}

impl ReportGetArgs {
    pub(in crate::cli) fn merge(self) -> Result<ReportGetArgs, PipectlError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let ReportGetArgs {
                args_file: _,
                report,
                obsid,
                field,
            } = unpack_arg_file!(arg_file);

            Ok(ReportGetArgs {
                args_file: None,
                report: cli_args.report.merge(report),
                obsid: cli_args.obsid.or(obsid),
                field: cli_args.field.or(field),
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(in crate::cli) fn run(self, dry_run: bool) -> Result<(), PipectlError> {
        debug!("{:#?}", self);

        let ReportGetArgs {
            args_file: _,
            report,
            obsid,
            field,
        } = self;

        let obsid = required_obsid(obsid)?;
        if let Some(field) = field.as_deref() {
            if field.parse::<ReportField>().is_err() {
                format!("'{field}' isn't a known report field").warn();
            }
        }
        let report = existing(report.parse()?)?;
        display_warnings();

        if dry_run {
            info!("Would look up {obsid} in {}", report.path().display());
            return Ok(());
        }
        let record = report
            .get(&obsid)?
            .ok_or_else(|| ReportError::NoSuchObsid(obsid.to_string()))?;
        let mut out = open_output(None)?;
        match field {
            Some(field) => writeln!(out, "{}", record.get(&field))?,
            None => {
                for (field, value) in record.non_empty() {
                    writeln!(out, "{field}: {value}")?;
                }
            }
        }
        out.flush()?;
        Ok(())
    }
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(in crate::cli) struct ReportSelectArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(default)]
    pub(super) report: ReportArgs,

    #[clap(short = 'n', long, help = QUEUE_LIMIT_HELP.as_str())]
    pub(super) limit: Option<usize>,

    #[clap(long, help = SELECT_MAX_ATTEMPTS_HELP.as_str())]
    pub(super) max_attempts: Option<u32>,

    /// Write the selected obsids here instead of stdout.
    #[clap(short = 'O', long, parse(from_os_str))]
    pub(super) output: Option<PathBuf>,
}

impl ReportSelectArgs {
    pub(in crate::cli) fn merge(self) -> Result<ReportSelectArgs, PipectlError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let ReportSelectArgs {
                args_file: _,
                report,
                limit,
                max_attempts,
                output,
            } = unpack_arg_file!(arg_file);

            Ok(ReportSelectArgs {
                args_file: None,
                report: cli_args.report.merge(report),
                limit: cli_args.limit.or(limit),
                max_attempts: cli_args.max_attempts.or(max_attempts),
                output: cli_args.output.or(output),
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(in crate::cli) fn run(self, dry_run: bool) -> Result<(), PipectlError> {
        debug!("{:#?}", self);

        let ReportSelectArgs {
            args_file: _,
            report,
            limit,
            max_attempts,
            output,
        } = self;

        let limit = limit.unwrap_or(DEFAULT_QUEUE_LIMIT);
        let max_attempts = max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let report = existing(report.parse()?)?;
        display_warnings();

        let table = report.read_table()?;
        let queue = select_queue(&table, limit, max_attempts);
        info!(
            "Selected {} of {} observations",
            queue.len(),
            table.num_rows()
        );
        if dry_run {
            return Ok(());
        }
        let mut out = open_output(output.as_deref())?;
        for obsid in queue {
            writeln!(out, "{obsid}")?;
        }
        out.flush()?;
        Ok(())
    }
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(in crate::cli) struct ReportVerifyArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(default)]
    pub(super) report: ReportArgs,

    #[clap(long, multiple_values(true), help = VERIFY_STAGES_HELP.as_str())]
    pub(super) stages: Option<Vec<String>>,

    #[clap(long, multiple_values(true), help = VERIFY_PRODUCTS_HELP.as_str())]
    pub(super) products: Option<Vec<String>>,

    /// The sub-channels substituted for {sub} in product paths. Default: 0000
    /// 0001 0002 0003 MFS
    #[clap(long, multiple_values(true))]
    pub(super) sub_channels: Option<Vec<String>>,
}

impl ReportVerifyArgs {
    pub(in crate::cli) fn merge(self) -> Result<ReportVerifyArgs, PipectlError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let ReportVerifyArgs {
                args_file: _,
                report,
                stages,
                products,
                sub_channels,
            } = unpack_arg_file!(arg_file);

            Ok(ReportVerifyArgs {
                args_file: None,
                report: cli_args.report.merge(report),
                stages: cli_args.stages.or(stages),
                products: cli_args.products.or(products),
                sub_channels: cli_args.sub_channels.or(sub_channels),
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(in crate::cli) fn run(self, dry_run: bool) -> Result<(), PipectlError> {
        debug!("{:#?}", self);

        let ReportVerifyArgs {
            args_file: _,
            report,
            stages,
            products,
            sub_channels,
        } = self;

        let stages = parse_stages(stages, &DEFAULT_VERIFY_STAGES)?;
        let products = products
            .map(|p| p.into_iter().map(ProductTemplate).collect())
            .unwrap_or_else(default_verify_products);
        let sub_channels = sub_channels
            .map(|subs| {
                subs.iter()
                    .map(|s| s.parse::<SubChannel>())
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;
        let report = existing(report.parse()?)?;
        display_warnings();

        if dry_run {
            info!(
                "Would verify observations in {} with {} successful",
                report.path().display(),
                stages.iter().join(", ")
            );
            return Ok(());
        }
        let summary = verify(&report, &stages, &products, sub_channels.as_deref())?;
        for obsid in &summary.missing {
            format!("{obsid} is missing data").warn();
        }
        display_warnings();
        Ok(())
    }
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(in crate::cli) struct ReportSuccessfulArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(default)]
    pub(super) report: ReportArgs,

    #[clap(long, multiple_values(true), help = SUCCESSFUL_STAGES_HELP.as_str())]
    pub(super) stages: Option<Vec<String>>,

    /// Also print each observation's directory.
    #[clap(long)]
    #[serde(default)]
    pub(super) with_dirs: bool,

    /// Write the obsids here instead of stdout.
    #[clap(short = 'O', long, parse(from_os_str))]
    pub(super) output: Option<PathBuf>,
}

impl ReportSuccessfulArgs {
    pub(in crate::cli) fn merge(self) -> Result<ReportSuccessfulArgs, PipectlError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let ReportSuccessfulArgs {
                args_file: _,
                report,
                stages,
                with_dirs,
                output,
            } = unpack_arg_file!(arg_file);

            Ok(ReportSuccessfulArgs {
                args_file: None,
                report: cli_args.report.merge(report),
                stages: cli_args.stages.or(stages),
                with_dirs: cli_args.with_dirs || with_dirs,
                output: cli_args.output.or(output),
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(in crate::cli) fn run(self, dry_run: bool) -> Result<(), PipectlError> {
        debug!("{:#?}", self);

        let ReportSuccessfulArgs {
            args_file: _,
            report,
            stages,
            with_dirs,
            output,
        } = self;

        let stages = parse_stages(stages, &DEFAULT_MOSAIC_STAGES)?;
        let report = existing(report.parse()?)?;
        display_warnings();

        let table = report.read_table()?;
        let done = successful(&table, &stages);
        info!(
            "{} of {} observations succeeded",
            done.len(),
            table.num_rows()
        );
        if dry_run {
            return Ok(());
        }
        let mut out = open_output(output.as_deref())?;
        for (obsid, obs_dir) in done {
            if with_dirs {
                writeln!(out, "{obsid} {obs_dir}")?;
            } else {
                writeln!(out, "{obsid}")?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

/// Stage fields to filter on. These are only ever read, so unknown names are
/// a warning rather than an error; such a column reads as empty and no
/// observation passes.
fn parse_stages(stages: Option<Vec<String>>, default: &[&str]) -> Result<Vec<String>, PipectlError> {
    let stages = stages.unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect());
    if stages.is_empty() {
        return Err(PipectlError::Generic(
            "At least one stage must be given".to_string(),
        ));
    }
    for stage in &stages {
        if stage.parse::<ReportField>().is_err() {
            format!("'{stage}' isn't a known report field").warn();
        }
    }
    Ok(stages)
}
