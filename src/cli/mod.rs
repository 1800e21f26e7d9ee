// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Command-line interface code. More specific options for `pipectl`
//! subcommands are contained in modules.
//!
//! All booleans must have `#[serde(default)]` annotated, and anything that
//! isn't a boolean must be optional. This allows all arguments to be optional
//! *and* usable in an arguments file.
//!
//! Only 3 things should be public in this module: `Pipectl`, `Pipectl::run`,
//! and `PipectlError`.

#[macro_use]
mod common;
mod error;
mod report;
mod solutions;

pub use error::PipectlError;

use std::path::PathBuf;

use clap::{AppSettings, Args, Parser, Subcommand};
use log::info;

use crate::PROGRESS_BARS;

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    about = r#"Coordination of Murchison Widefield Array (MWA) data-reduction pipelines.
Tracks per-observation progress in a shared report and triages calibration solutions."#
)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_subcommands = true)]
#[clap(propagate_version = true)]
#[clap(infer_long_args = true)]
pub struct Pipectl {
    #[clap(flatten)]
    global_opts: GlobalArgs,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Don't draw progress bars.
    #[clap(long)]
    #[clap(global = true)]
    no_progress_bars: bool,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv). The default is to print only high-level information.
    #[clap(short, long, parse(from_occurrences))]
    #[clap(global = true)]
    verbosity: u8,

    /// Only verify that arguments were correctly ingested and print out
    /// high-level information.
    #[clap(long)]
    #[clap(global = true)]
    dry_run: bool,

    /// Save the input arguments into a new TOML file that can be used to
    /// reproduce this run.
    #[clap(long)]
    #[clap(global = true)]
    save_toml: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
#[clap(arg_required_else_help = true)]
enum Command {
    #[clap(alias = "create-report")]
    #[clap(about = "Create a new, empty report.")]
    ReportCreate(report::ReportCreateArgs),

    #[clap(alias = "update-report")]
    #[clap(about = "Set one field of an observation's record.")]
    ReportUpdate(report::ReportUpdateArgs),

    #[clap(
        about = "Mark an observation as queued, counting the attempt. Observations started too many times are failed."
    )]
    ReportStart(report::ReportStartArgs),

    #[clap(
        about = "Like report-start, but only if the observation hasn't been processed in place yet."
    )]
    ReportStartCheck(report::ReportStartArgs),

    #[clap(about = "Print an observation's record.")]
    ReportGet(report::ReportGetArgs),

    #[clap(about = "Print the observations that should be processed next.")]
    ReportSelect(report::ReportSelectArgs),

    #[clap(about = "Check that finished observations produced their data products.")]
    ReportVerify(report::ReportVerifyArgs),

    #[clap(about = "Print the observations for which every given stage succeeded.")]
    ReportSuccessful(report::ReportSuccessfulArgs),

    #[clap(alias = "clear-lock")]
    #[clap(about = "Forcibly release the report's lock, e.g. after its holder crashed.")]
    ReportClearLock(report::ReportLockArgs),

    #[clap(about = "Print who holds the report's lock.")]
    ReportLockStatus(report::ReportLockArgs),

    #[clap(about = "Describe the sub-bands and edge channels of calibration solutions.")]
    SolutionsSubbands(solutions::SolutionsSubbandsArgs),

    #[clap(alias = "check-solutions")]
    #[clap(about = "Check whether calibration solutions are usable.")]
    SolutionsCheck(solutions::SolutionsCheckArgs),

    #[clap(alias = "assign-solutions")]
    #[clap(
        about = "Assign each observation usable calibration solutions, borrowing from the nearest observation where needed."
    )]
    SolutionsAssign(solutions::SolutionsAssignArgs),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::ReportCreate(_) => "report-create",
            Command::ReportUpdate(_) => "report-update",
            Command::ReportStart(_) => "report-start",
            Command::ReportStartCheck(_) => "report-start-check",
            Command::ReportGet(_) => "report-get",
            Command::ReportSelect(_) => "report-select",
            Command::ReportVerify(_) => "report-verify",
            Command::ReportSuccessful(_) => "report-successful",
            Command::ReportClearLock(_) => "report-clear-lock",
            Command::ReportLockStatus(_) => "report-lock-status",
            Command::SolutionsSubbands(_) => "solutions-subbands",
            Command::SolutionsCheck(_) => "solutions-check",
            Command::SolutionsAssign(_) => "solutions-assign",
        }
    }

    /// Subcommands whose results are printed to stdout; their logs go to
    /// stderr so the results can be piped.
    fn prints_results(&self) -> bool {
        matches!(
            self,
            Command::ReportGet(_)
                | Command::ReportSelect(_)
                | Command::ReportSuccessful(_)
                | Command::ReportLockStatus(_)
                | Command::SolutionsCheck(_)
                | Command::SolutionsAssign(_)
        )
    }
}

impl Pipectl {
    pub fn run(self) -> Result<(), PipectlError> {
        // Set up logging.
        let GlobalArgs {
            verbosity,
            dry_run,
            no_progress_bars,
            save_toml,
        } = self.global_opts;
        let target = if self.command.prints_results() {
            env_logger::Target::Stderr
        } else {
            env_logger::Target::Stdout
        };
        setup_logging(verbosity, target).expect("Failed to initialise logging.");
        // Enable progress bars if the user didn't say "no progress bars".
        if !no_progress_bars {
            PROGRESS_BARS.store(true);
        }

        // Print the version of pipectl and its build-time information.
        let sub_command = self.command.name();
        info!("pipectl {} {}", sub_command, env!("CARGO_PKG_VERSION"));
        display_build_info();

        macro_rules! merge_save_run {
            ($args:expr) => {
                merge_save_run!($args, run)
            };
            ($args:expr, $run:ident) => {{
                let args = $args.merge()?;
                if let Some(toml) = save_toml {
                    use std::{
                        fs::File,
                        io::{BufWriter, Write},
                    };

                    let mut f = BufWriter::new(File::create(toml)?);
                    let toml_str = toml::to_string(&args).map_err(|e| {
                        PipectlError::ArgFile(format!("Couldn't serialise the arguments: {e}"))
                    })?;
                    f.write_all(toml_str.as_bytes())?;
                }
                args.$run(dry_run)?;
            }};
        }

        match self.command {
            Command::ReportCreate(args) => merge_save_run!(args),
            Command::ReportUpdate(args) => merge_save_run!(args),
            Command::ReportStart(args) => merge_save_run!(args),
            Command::ReportStartCheck(args) => merge_save_run!(args, run_if_unprocessed),
            Command::ReportGet(args) => merge_save_run!(args),
            Command::ReportSelect(args) => merge_save_run!(args),
            Command::ReportVerify(args) => merge_save_run!(args),
            Command::ReportSuccessful(args) => merge_save_run!(args),
            Command::ReportClearLock(args) => merge_save_run!(args, run_clear),
            Command::ReportLockStatus(args) => merge_save_run!(args, run_status),

            // These take solutions files rather than options.
            Command::SolutionsSubbands(args) => args.run()?,
            Command::SolutionsCheck(args) => args.run()?,

            Command::SolutionsAssign(args) => merge_save_run!(args),
        }

        info!("pipectl {} complete.", sub_command);
        Ok(())
    }
}

/// Activate a logger. `env_logger` automatically only uses colours and fancy
/// symbols if we're on a tty (e.g. a terminal); piped output will be formatted
/// sensibly. Source code lines are displayed in log messages when verbosity
/// >= 3.
fn setup_logging(verbosity: u8, target: env_logger::Target) -> Result<(), log::SetLoggerError> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(target);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        2 => builder.filter_level(log::LevelFilter::Trace),
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
            builder.format(|buf, record| {
                use std::io::Write;

                let timestamp = buf.timestamp();
                let level = record.level();
                let target = record.target();
                let line = record.line().unwrap_or(0);
                let message = record.args();

                writeln!(buf, "[{timestamp} {level} {target}:{line}] {message}")
            })
        }
    };
    builder.try_init()
}

/// Write many info-level log lines of how this executable was compiled.
fn display_build_info() {
    let dirty = match GIT_DIRTY {
        Some(true) => " (dirty)",
        _ => "",
    };
    match GIT_COMMIT_HASH_SHORT {
        Some(hash) => {
            info!("Compiled on git commit hash: {hash}{dirty}");
        }
        None => info!("Compiled on git commit hash: <no git info>"),
    }
    if let Some(hr) = GIT_HEAD_REF {
        info!("            git head ref: {}", hr);
    }
    info!("            {}", BUILT_TIME_UTC);
    info!("         with compiler {}", RUSTC_VERSION);
    info!("");
}
