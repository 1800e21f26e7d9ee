// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Deciding whether calibration solutions are good enough to apply.
//!
//! Solutions that failed to converge are NaN. A file is unusable when too
//! large a fraction of its gains is NaN, either overall or (optionally) in any
//! one contiguous segment of the band. The channels at the edges of every
//! sub-band are always flagged by the signal chain, regardless of the state of
//! the array, so by default they are discounted from the statistic.

use std::path::Path;

use log::{debug, log_enabled, warn, Level::Debug};
use ndarray::prelude::*;

use super::{count_flagged, is_flagged, CalibrationSolutions, QualityError, SolutionsReadError};
use crate::constants::{
    DEFAULT_EDGE_BANDWIDTH_KHZ, DEFAULT_FLAGGED_THRESHOLD, DEFAULT_NUM_SUB_BANDS,
    MWA_BANDWIDTH_KHZ,
};

/// Thresholds above 1 are percentages.
pub fn normalise_threshold(threshold: f64) -> f64 {
    if threshold > 1.0 {
        threshold / 100.0
    } else {
        threshold
    }
}

/// How the band of some solutions is divided up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubBandInfo {
    pub num_channels: usize,

    /// \[kHz\]
    pub freq_res_khz: u32,

    /// The number of channels flagged at each edge of every sub-band.
    pub edge_chans_per_sub_band: u32,

    /// The number of edge channels across the whole band.
    pub total_edge_chans: u32,
}

/// Work out how many channels are edge channels. All divisions are integer
/// divisions.
pub fn derive_edge_channels(
    num_channels: usize,
    edge_bandwidth_khz: u32,
    num_sub_bands: u32,
) -> Result<SubBandInfo, QualityError> {
    debug!("Number of channels {num_channels}");
    debug!("Supplied number of sub-bands {num_sub_bands}");
    let freq_res_khz = u32::try_from(num_channels)
        .ok()
        .filter(|&n| n > 0)
        .map(|n| MWA_BANDWIDTH_KHZ / n)
        .filter(|&r| r > 0)
        .ok_or(QualityError::ChannelResolution {
            num_channels,
            bandwidth_khz: MWA_BANDWIDTH_KHZ,
        })?;
    debug!("Channel frequency resolution {freq_res_khz} kHz");

    let edge_chans_per_sub_band = edge_bandwidth_khz / freq_res_khz;
    debug!("{edge_chans_per_sub_band} edge channels flagged either side of each sub-band");

    // Flagging either side of a sub-band.
    let total_edge_chans = edge_chans_per_sub_band
        .checked_mul(2)
        .and_then(|n| n.checked_mul(num_sub_bands))
        .ok_or(QualityError::EdgeChannelOverflow {
            edge_chans_per_sub_band,
            num_sub_bands,
        })?;
    if total_edge_chans as usize >= num_channels {
        return Err(QualityError::EdgesCoverBand {
            total_edge_chans,
            num_channels,
        });
    }
    debug!(
        "{num_sub_bands} sub-bands, {total_edge_chans} edge channels, {} kHz flagged",
        total_edge_chans * freq_res_khz
    );

    Ok(SubBandInfo {
        num_channels,
        freq_res_khz,
        edge_chans_per_sub_band,
        total_edge_chans,
    })
}

/// Read a solutions file and describe its sub-bands. Unlike a quality check, a
/// missing file is an error here.
pub fn inspect_sub_bands(
    file: &Path,
    edge_bandwidth_khz: u32,
    num_sub_bands: u32,
) -> Result<SubBandInfo, QualityError> {
    debug!("Loading solutions file {}", file.display());
    let sols = CalibrationSolutions::read_solutions_from_ext(file)?;
    derive_edge_channels(sols.num_channels(), edge_bandwidth_khz, num_sub_bands)
}

/// The fraction of flagged gains, after discounting gains that are expected
/// to be flagged. Callers guarantee that fewer gains are expected to be
/// flagged than there are.
fn flagged_fraction(num_flagged: usize, num_total: usize, expected_flagged: f64) -> f64 {
    (num_flagged as f64 - expected_flagged) / (num_total as f64 - expected_flagged)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityCheck {
    /// The acceptable fraction of flagged gains (0 to 1; values above 1 are
    /// percentages).
    pub threshold: f64,

    /// Discount sub-band edge channels from the statistic.
    pub ignore_edge_channels: bool,

    /// The bandwidth flagged at each edge of every sub-band \[kHz\].
    pub edge_bandwidth_khz: u32,

    pub num_sub_bands: u32,

    /// If set, also check this many equal, contiguous segments of the band.
    pub segments: Option<usize>,

    /// The threshold applied to each segment. Defaults to `threshold`.
    pub segment_threshold: Option<f64>,
}

impl Default for QualityCheck {
    fn default() -> Self {
        QualityCheck {
            threshold: DEFAULT_FLAGGED_THRESHOLD,
            ignore_edge_channels: true,
            edge_bandwidth_khz: DEFAULT_EDGE_BANDWIDTH_KHZ,
            num_sub_bands: DEFAULT_NUM_SUB_BANDS,
            segments: None,
            segment_threshold: None,
        }
    }
}

impl QualityCheck {
    /// Check a solutions file. A file that doesn't exist, or can't be read,
    /// isn't usable; that is not an error.
    pub fn check_file(&self, file: &Path) -> Result<bool, QualityError> {
        if !file.exists() {
            debug!("{} not found", file.display());
            return Ok(false);
        }

        debug!("Loading {}", file.display());
        let sols = match CalibrationSolutions::read_solutions_from_ext(file) {
            Ok(s) => s,
            Err(e @ SolutionsReadError::UnsupportedExt { .. }) => return Err(e.into()),
            Err(e) => {
                warn!("Treating {} as unusable: {e}", file.display());
                return Ok(false);
            }
        };
        self.check(&sols)
    }

    /// Are these solutions usable?
    pub fn check(&self, sols: &CalibrationSolutions) -> Result<bool, QualityError> {
        let threshold = normalise_threshold(self.threshold);
        debug!("Threshold level set is {threshold}");
        let (num_timeblocks, num_antennas, num_channels, num_pols) = sols.gains.dim();
        debug!("Solutions have dimensions {:?}", sols.gains.dim());

        // Problems with the request are reported before any verdict.
        if let Some(segments) = self.segments {
            if segments == 0 {
                return Err(QualityError::ZeroSegments);
            }
            if num_timeblocks != 1 {
                return Err(QualityError::MultipleTimeblocks(num_timeblocks));
            }
            if num_channels % segments != 0 {
                return Err(QualityError::IndivisibleSegments {
                    num_channels,
                    segments,
                });
            }
        }

        if sols.gains.is_empty() {
            warn!("Calibration solutions contain no gains");
            return Ok(false);
        }

        if log_enabled!(Debug) {
            log_antenna_flags(sols);
        }
        warn_partially_flagged(sols);

        // For each antenna this many edge gains are flagged.
        let edge_positions = if self.ignore_edge_channels {
            let info =
                derive_edge_channels(num_channels, self.edge_bandwidth_khz, self.num_sub_bands)?;
            (info.total_edge_chans as usize)
                .checked_mul(num_antennas)
                .and_then(|n| n.checked_mul(num_pols))
                .ok_or(QualityError::EdgeChannelOverflow {
                    edge_chans_per_sub_band: info.edge_chans_per_sub_band,
                    num_sub_bands: self.num_sub_bands,
                })?
        } else {
            0
        };
        debug!("Removing {edge_positions} expected edge gains from the statistic");

        let flagged = flagged_fraction(
            count_flagged(sols.gains.view()),
            sols.gains.len(),
            edge_positions as f64,
        );
        debug!("{flagged:.4} fraction flagged");
        if flagged > threshold {
            return Ok(false);
        }

        if let Some(segments) = self.segments {
            let segment_threshold =
                normalise_threshold(self.segment_threshold.unwrap_or(threshold));
            debug!("Using segment threshold {segment_threshold}");
            let stride = num_channels / segments;
            let segment_edges = edge_positions as f64 / segments as f64;
            if edge_positions > 0 {
                debug!("Assuming {segment_edges} edge gains per segment");
            }

            for i_segment in 0..segments {
                let chans = i_segment * stride..(i_segment + 1) * stride;
                let segment = sols.gains.slice(s![.., .., chans.clone(), ..]);
                let segment_flagged =
                    flagged_fraction(count_flagged(segment.view()), segment.len(), segment_edges);
                debug!("Segment {i_segment} (channels {chans:?}): {segment_flagged:.4} flagged");
                if segment_flagged > segment_threshold {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}

fn log_antenna_flags(sols: &CalibrationSolutions) {
    let mut num_fully_flagged = 0;
    for (i_ant, ant_gains) in sols.gains.axis_iter(Axis(1)).enumerate() {
        let num_flagged = count_flagged(ant_gains);
        let frac = num_flagged as f64 / ant_gains.len().max(1) as f64;
        debug!("Antenna {i_ant}: {:.2}% flagged", frac * 100.0);
        if num_flagged == ant_gains.len() {
            num_fully_flagged += 1;
        }
    }
    debug!("Total set of antennas completely flagged: {num_fully_flagged}");
}

/// A Jones matrix should be entirely NaN or entirely finite. Some older
/// processing turned the cross terms of flagged solutions finite, which skews
/// the statistics; say so when that is seen.
fn warn_partially_flagged(sols: &CalibrationSolutions) {
    let num_partial = sols
        .gains
        .lanes(Axis(3))
        .into_iter()
        .filter(|jones| {
            let num_flagged = jones.iter().filter(|g| is_flagged(g)).count();
            num_flagged > 0 && num_flagged < jones.len()
        })
        .count();
    if num_partial > 0 {
        warn!("{num_partial} Jones matrices are only partially flagged");
    }
}
