// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `solutions-*` subcommands: judging calibration solutions and finding
//! substitutes for bad ones.

mod assign;

pub(super) use assign::SolutionsAssignArgs;

use std::{io::Write, path::PathBuf};

use clap::Parser;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::common::{display_warnings, open_output, InfoPrinter, Warn};
use crate::{
    constants::{DEFAULT_EDGE_BANDWIDTH_KHZ, DEFAULT_FLAGGED_THRESHOLD, DEFAULT_NUM_SUB_BANDS},
    solutions::{inspect_sub_bands, normalise_threshold, QualityCheck, QualityError},
    PipectlError,
};

lazy_static::lazy_static! {
    static ref THRESHOLD_HELP: String =
        format!("The acceptable fraction of flagged (NaN) gains; values above 1 are percentages. Default: {DEFAULT_FLAGGED_THRESHOLD}");

    static ref EDGE_BANDWIDTH_HELP: String =
        format!("The bandwidth flagged at each edge of every sub-band [kHz]. Default: {DEFAULT_EDGE_BANDWIDTH_KHZ}");

    static ref NUM_SUB_BANDS_HELP: String =
        format!("The number of sub-bands across the band. Default: {DEFAULT_NUM_SUB_BANDS}");
}

/// How to judge a solutions file.
#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct QualityArgs {
    #[clap(short, long, help = THRESHOLD_HELP.as_str(), help_heading = "QUALITY CHECK")]
    pub(super) threshold: Option<f64>,

    /// Also check this many equal, contiguous segments of the band. Requires
    /// solutions with a single timeblock.
    #[clap(long, help_heading = "QUALITY CHECK")]
    pub(super) segments: Option<usize>,

    /// The threshold applied to each segment. Default: --threshold
    #[clap(long, help_heading = "QUALITY CHECK")]
    pub(super) segment_threshold: Option<f64>,

    /// Count the sub-band edge channels (which are always flagged) against
    /// the solutions.
    #[clap(long, help_heading = "QUALITY CHECK")]
    #[serde(default)]
    pub(super) include_edge_channels: bool,

    #[clap(long, help = EDGE_BANDWIDTH_HELP.as_str(), help_heading = "QUALITY CHECK")]
    pub(super) edge_bandwidth: Option<u32>,

    #[clap(long, help = NUM_SUB_BANDS_HELP.as_str(), help_heading = "QUALITY CHECK")]
    pub(super) num_sub_bands: Option<u32>,
}

impl QualityArgs {
    pub(super) fn merge(self, other: QualityArgs) -> QualityArgs {
        QualityArgs {
            threshold: self.threshold.or(other.threshold),
            segments: self.segments.or(other.segments),
            segment_threshold: self.segment_threshold.or(other.segment_threshold),
            include_edge_channels: self.include_edge_channels || other.include_edge_channels,
            edge_bandwidth: self.edge_bandwidth.or(other.edge_bandwidth),
            num_sub_bands: self.num_sub_bands.or(other.num_sub_bands),
        }
    }

    pub(super) fn parse(self) -> Result<QualityCheck, PipectlError> {
        let QualityArgs {
            threshold,
            segments,
            segment_threshold,
            include_edge_channels,
            edge_bandwidth,
            num_sub_bands,
        } = self;

        let threshold = check_threshold(
            threshold.unwrap_or(DEFAULT_FLAGGED_THRESHOLD),
            "--threshold",
        )?;
        let segment_threshold = segment_threshold
            .map(|t| check_threshold(t, "--segment-threshold"))
            .transpose()?;
        if segment_threshold.is_some() && segments.is_none() {
            "--segment-threshold does nothing without --segments".warn();
        }
        if segments == Some(0) {
            return Err(QualityError::ZeroSegments.into());
        }
        if let Some(segments) = segments {
            info!("Applying flagged-fraction checks to {segments} segments");
        }

        Ok(QualityCheck {
            threshold,
            ignore_edge_channels: !include_edge_channels,
            edge_bandwidth_khz: edge_bandwidth.unwrap_or(DEFAULT_EDGE_BANDWIDTH_KHZ),
            num_sub_bands: num_sub_bands.unwrap_or(DEFAULT_NUM_SUB_BANDS),
            segments,
            segment_threshold,
        })
    }
}

/// Thresholds are fractions, or percentages if above 1.
fn check_threshold(threshold: f64, arg: &str) -> Result<f64, PipectlError> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(PipectlError::Quality(format!(
            "{arg} must be a non-negative number, but got {threshold}"
        )));
    }
    if normalise_threshold(threshold) > 1.0 {
        return Err(PipectlError::Quality(format!(
            "{arg} can be at most 100%, but got {threshold}"
        )));
    }
    Ok(threshold)
}

#[derive(Parser, Debug, Default)]
pub(super) struct SolutionsSubbandsArgs {
    #[clap(name = "SOLUTIONS_FILES", parse(from_os_str))]
    files: Vec<PathBuf>,

    #[clap(long, help = EDGE_BANDWIDTH_HELP.as_str())]
    edge_bandwidth: Option<u32>,

    #[clap(long, help = NUM_SUB_BANDS_HELP.as_str())]
    num_sub_bands: Option<u32>,
}

impl SolutionsSubbandsArgs {
    pub(super) fn run(self) -> Result<(), PipectlError> {
        debug!("{:#?}", self);

        let edge_bandwidth = self.edge_bandwidth.unwrap_or(DEFAULT_EDGE_BANDWIDTH_KHZ);
        let num_sub_bands = self.num_sub_bands.unwrap_or(DEFAULT_NUM_SUB_BANDS);
        if self.files.is_empty() {
            return Err(PipectlError::Generic(
                "No solutions files were supplied".to_string(),
            ));
        }

        for file in &self.files {
            let info = inspect_sub_bands(file, edge_bandwidth, num_sub_bands)?;
            let mut printer = InfoPrinter::new(format!("Sub-bands of {}", file.display()).into());
            printer.push_block(vec![
                format!("{} channels", info.num_channels).into(),
                format!("{} kHz resolution", info.freq_res_khz).into(),
            ]);
            printer.push_block(vec![
                format!(
                    "{} edge channels per sub-band ({edge_bandwidth} kHz)",
                    info.edge_chans_per_sub_band
                )
                .into(),
                format!(
                    "{} edge channels across {num_sub_bands} sub-bands",
                    info.total_edge_chans
                )
                .into(),
            ]);
            printer.display();
        }
        Ok(())
    }
}

#[derive(Parser, Debug, Default)]
pub(super) struct SolutionsCheckArgs {
    #[clap(name = "SOLUTIONS_FILES", parse(from_os_str))]
    files: Vec<PathBuf>,

    #[clap(flatten)]
    quality: QualityArgs,
}

impl SolutionsCheckArgs {
    /// Print a verdict for every file. A file failing the check isn't an
    /// error.
    pub(super) fn run(self) -> Result<(), PipectlError> {
        debug!("{:#?}", self);

        if self.files.is_empty() {
            return Err(PipectlError::Generic(
                "No solutions files were supplied".to_string(),
            ));
        }
        let check = self.quality.parse()?;
        display_warnings();

        let mut out = open_output(None)?;
        for file in &self.files {
            let verdict = if check.check_file(file)? {
                "passed"
            } else {
                "failed"
            };
            writeln!(out, "{} {verdict}", file.display())?;
        }
        out.flush()?;
        Ok(())
    }
}
