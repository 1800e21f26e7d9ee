// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with reading, writing and judging calibration solutions.

use itertools::Itertools;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolutionsReadError {
    #[error("Tried to read calibration solutions file with an unsupported extension '{ext}'!")]
    UnsupportedExt { ext: String },

    #[error(
        "When reading {file}, expected MWAOCAL as the first 7 characters, got '{got}' instead!"
    )]
    AndreBinaryStr { file: String, got: String },

    #[error(
        "When reading {file}, expected a value {expected} in the header, but got '{got}' instead!"
    )]
    AndreBinaryVal {
        file: String,
        expected: &'static str,
        got: String,
    },

    #[error("Based on the dimensions in its header, expected {file} to be {expected} bytes, but it is {actual} bytes")]
    BadShape {
        file: String,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SolutionsWriteError {
    #[error("Tried to write calibration solutions file with an unsupported extension '{ext}'!")]
    UnsupportedExt { ext: String },

    #[error("Calibration solutions must have 4 gains per Jones matrix, but these have {0}")]
    BadPolarisations(usize),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// Problems with how a quality check was asked for. These are never a verdict
/// on the solutions themselves.
#[derive(Error, Debug)]
pub enum QualityError {
    #[error("{num_channels} channels is not evenly divisible by {segments} segments")]
    IndivisibleSegments { num_channels: usize, segments: usize },

    #[error("The number of segments must be at least 1")]
    ZeroSegments,

    #[error("Segment checks are only possible with a single timeblock, but the solutions have {0}")]
    MultipleTimeblocks(usize),

    #[error("Can't derive a channel resolution from {num_channels} channels across {bandwidth_khz} kHz")]
    ChannelResolution {
        num_channels: usize,
        bandwidth_khz: u32,
    },

    #[error("{edge_chans_per_sub_band} edge channels either side of {num_sub_bands} sub-bands is too many to count")]
    EdgeChannelOverflow {
        edge_chans_per_sub_band: u32,
        num_sub_bands: u32,
    },

    #[error("{total_edge_chans} edge channels leave nothing of the {num_channels} channels to judge; check the edge bandwidth and number of sub-bands")]
    EdgesCoverBand {
        total_edge_chans: u32,
        num_channels: usize,
    },

    #[error(transparent)]
    Read(#[from] SolutionsReadError),
}

#[derive(Error, Debug)]
pub enum AssignError {
    #[error("None of the {num_obsids} observations have usable calibration solutions; is the base path ({base_path}) right?")]
    NoUsableSolutions {
        num_obsids: usize,
        base_path: String,
    },

    #[error("No usable calibration solutions share a central channel with {}", .0.iter().join(", "))]
    NoDonor(Vec<u64>),

    #[error("Observations must be matched on central channel, but no central channel lookup was supplied")]
    NoCenChanLookup,

    #[error("The central channel lookup doesn't know about {}", .0.iter().join(", "))]
    MissingCenChans(Vec<u64>),

    #[error("{file} line {line_num}: couldn't parse '{text}' as {what}")]
    Parse {
        file: String,
        line_num: usize,
        text: String,
        what: &'static str,
    },

    #[error(transparent)]
    Quality(#[from] QualityError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
