// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Common arguments for command-line interfaces. Every `report-*` subcommand
//! needs to find a report and its lock, so those arguments are shared between
//! them.

mod printers;

pub(super) use printers::InfoPrinter;
pub(crate) use printers::{display_warnings, Warn};

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use super::PipectlError;
use crate::{
    constants::{
        DEFAULT_LOCK_ATTEMPTS, DEFAULT_LOCK_BACKOFF_SECS, DEFAULT_LOCK_STALE_AFTER_SECS,
        DEFAULT_NEXTFLOW_CONFIG,
    },
    report::{report_path_from_nextflow_config, CsvReport, LockConfig},
};

lazy_static::lazy_static! {
    pub(super) static ref ARG_FILE_TYPES_COMMA_SEPARATED: String = ArgFileTypes::iter().join(", ");

    pub(super) static ref ARG_FILE_HELP: String =
        format!("All arguments may be specified in a file. Any CLI arguments override arguments set in the file. Supported formats: {}", *ARG_FILE_TYPES_COMMA_SEPARATED);

    static ref NEXTFLOW_CONFIG_HELP: String =
        format!("Find the report from the 'reportCsv' setting of this Nextflow config. Only used if --report isn't given. Default: {DEFAULT_NEXTFLOW_CONFIG}");

    static ref LOCK_ATTEMPTS_HELP: String =
        format!("The number of times to try for the report's lock before giving up. Default: {DEFAULT_LOCK_ATTEMPTS}");

    static ref LOCK_BACKOFF_HELP: String =
        format!("The time to wait between attempts for the report's lock [seconds]. Default: {DEFAULT_LOCK_BACKOFF_SECS}");

    static ref LOCK_STALE_AFTER_HELP: String =
        format!("Break a lock that has been held for longer than this, presuming its holder crashed [seconds]. 0 never breaks locks. Default: {DEFAULT_LOCK_STALE_AFTER_SECS}");
}

#[derive(Debug, Display, EnumIter, EnumString)]
pub(super) enum ArgFileTypes {
    #[strum(serialize = "toml")]
    Toml,
    #[strum(serialize = "json")]
    Json,
}

macro_rules! unpack_arg_file {
    ($arg_file:expr) => ({
        use std::{fs::File, io::Read, str::FromStr};

        use crate::cli::common::{ArgFileTypes, ARG_FILE_TYPES_COMMA_SEPARATED};

        debug!("Attempting to parse argument file {}", $arg_file.display());

        let mut contents = String::new();
        let arg_file_type = $arg_file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| ArgFileTypes::from_str(&e).ok());

        match arg_file_type {
            Some(ArgFileTypes::Toml) => {
                debug!("Parsing toml file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match toml::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(PipectlError::ArgFile(format!(
                            "Couldn't decode toml structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }
            Some(ArgFileTypes::Json) => {
                debug!("Parsing json file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match serde_json::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(PipectlError::ArgFile(format!(
                            "Couldn't decode json structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }

            _ => {
                return Err(PipectlError::ArgFile(format!(
                    "Argument file '{:?}' doesn't have a recognised file extension! Valid extensions are: {}", $arg_file, *ARG_FILE_TYPES_COMMA_SEPARATED)
                ))
            }
        }
    });
}

/// Where the report is, and how patiently to wait for its lock.
#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct ReportArgs {
    /// Path to the report CSV file.
    #[clap(short = 'r', long = "report", parse(from_os_str), help_heading = "REPORT")]
    pub(super) csv: Option<PathBuf>,

    #[clap(long, parse(from_os_str), help = NEXTFLOW_CONFIG_HELP.as_str(), help_heading = "REPORT")]
    pub(super) nextflow_config: Option<PathBuf>,

    #[clap(long, help = LOCK_ATTEMPTS_HELP.as_str(), help_heading = "REPORT")]
    pub(super) lock_attempts: Option<u32>,

    #[clap(long, help = LOCK_BACKOFF_HELP.as_str(), help_heading = "REPORT")]
    pub(super) lock_backoff: Option<f64>,

    #[clap(long, help = LOCK_STALE_AFTER_HELP.as_str(), help_heading = "REPORT")]
    pub(super) lock_stale_after: Option<f64>,
}

impl ReportArgs {
    /// Fill in anything not given on the command line from an arguments file.
    pub(super) fn merge(self, other: ReportArgs) -> ReportArgs {
        ReportArgs {
            csv: self.csv.or(other.csv),
            nextflow_config: self.nextflow_config.or(other.nextflow_config),
            lock_attempts: self.lock_attempts.or(other.lock_attempts),
            lock_backoff: self.lock_backoff.or(other.lock_backoff),
            lock_stale_after: self.lock_stale_after.or(other.lock_stale_after),
        }
    }

    pub(super) fn parse(self) -> Result<CsvReport, PipectlError> {
        let ReportArgs {
            csv,
            nextflow_config,
            lock_attempts,
            lock_backoff,
            lock_stale_after,
        } = self;

        let path = match csv {
            Some(p) => p,
            None => {
                let config =
                    nextflow_config.unwrap_or_else(|| PathBuf::from(DEFAULT_NEXTFLOW_CONFIG));
                if !config.exists() {
                    return Err(PipectlError::Generic(format!(
                        "No report was given and the Nextflow config '{}' doesn't exist; supply --report",
                        config.display()
                    )));
                }
                report_path_from_nextflow_config(&config)?
            }
        };
        debug!("Using report {}", path.display());

        let attempts = lock_attempts.unwrap_or(DEFAULT_LOCK_ATTEMPTS);
        if attempts == 0 {
            return Err(PipectlError::Generic(
                "--lock-attempts must be at least 1".to_string(),
            ));
        }
        let backoff = parse_seconds(
            lock_backoff.unwrap_or(DEFAULT_LOCK_BACKOFF_SECS),
            "--lock-backoff",
        )?;
        let stale_after = parse_seconds(
            lock_stale_after.unwrap_or(DEFAULT_LOCK_STALE_AFTER_SECS),
            "--lock-stale-after",
        )?;
        let config = LockConfig {
            attempts,
            backoff,
            stale_after: if stale_after.is_zero() {
                None
            } else {
                Some(stale_after)
            },
        };
        debug!("{config:?}");

        Ok(CsvReport::new(path, config))
    }
}

fn parse_seconds(secs: f64, arg: &str) -> Result<Duration, PipectlError> {
    if secs.is_finite() && secs >= 0.0 {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err(PipectlError::Generic(format!(
            "{arg} must be a non-negative number of seconds, but got {secs}"
        )))
    }
}

/// Where a subcommand's results go: a file if one was given, otherwise
/// stdout.
pub(super) fn open_output(output: Option<&Path>) -> Result<Box<dyn Write>, PipectlError> {
    match output {
        Some(file) => {
            debug!("Writing results to {}", file.display());
            Ok(Box::new(BufWriter::new(File::create(file)?)))
        }
        None => Ok(Box::new(BufWriter::new(std::io::stdout()))),
    }
}
