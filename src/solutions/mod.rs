// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Calibration solutions: reading them, judging whether they are usable, and
//! finding substitutes for observations whose own solutions are not.

pub(crate) mod ao;
mod assign;
mod error;
mod quality;

pub use assign::{
    cenchans_from_report, find_valid_solutions, read_cenchan_file, read_obsids_file,
    solutions_path, write_assignment, AssignOptions, CenChanLookup,
};
pub(crate) use assign::{assign_donors, group_by_cenchan};
pub use error::*;
pub use quality::{
    derive_edge_channels, inspect_sub_bands, normalise_threshold, QualityCheck, SubBandInfo,
};

use std::{path::Path, str::FromStr};

use hifitime::Epoch;
use itertools::Itertools;
use ndarray::prelude::*;
use num_complex::Complex;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// The number of complex gains in each (2x2 Jones) solution.
pub const NUM_POLARISATIONS: usize = 4;

lazy_static::lazy_static! {
    pub(crate) static ref CAL_SOLUTION_EXTENSIONS: String = CalSolutionType::iter().join(", ");
}

#[derive(Debug, Display, EnumIter, EnumString)]
pub(crate) enum CalSolutionType {
    /// The "André Offringa" format used by mwa-reduce.
    #[strum(serialize = "bin")]
    Bin,
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationSolutions {
    /// The complex gains, with dimensions (num_timeblocks, num_antennas,
    /// num_channels, 4). The last axis holds the elements of each antenna's
    /// Jones matrix. NaN gains are flagged.
    pub gains: Array4<Complex<f64>>,

    /// The start of the data used to make these solutions, if known.
    pub start_timestamp: Option<Epoch>,

    /// The end of the data used to make these solutions, if known.
    pub end_timestamp: Option<Epoch>,
}

impl CalibrationSolutions {
    /// Read in calibration solutions from a file. The format of the file is
    /// determined by the file's extension (e.g. ".bin").
    pub fn read_solutions_from_ext<P: AsRef<Path>>(
        file: P,
    ) -> Result<CalibrationSolutions, SolutionsReadError> {
        let file = file.as_ref();
        let ext = file.extension().and_then(|e| e.to_str());
        match ext.and_then(|s| CalSolutionType::from_str(s).ok()) {
            Some(CalSolutionType::Bin) => ao::read(file),
            None => Err(SolutionsReadError::UnsupportedExt {
                ext: ext.unwrap_or("<no extension>").to_string(),
            }),
        }
    }

    /// From the target file extension, write out the appropriately-formatted
    /// solutions.
    pub fn write_solutions_from_ext<P: AsRef<Path>>(
        &self,
        file: P,
    ) -> Result<(), SolutionsWriteError> {
        let file = file.as_ref();
        let ext = file.extension().and_then(|e| e.to_str());
        match ext.and_then(|s| CalSolutionType::from_str(s).ok()) {
            Some(CalSolutionType::Bin) => ao::write(self, file),
            None => Err(SolutionsWriteError::UnsupportedExt {
                ext: ext.unwrap_or("<no extension>").to_string(),
            }),
        }
    }

    pub fn num_timeblocks(&self) -> usize {
        self.gains.len_of(Axis(0))
    }

    pub fn num_antennas(&self) -> usize {
        self.gains.len_of(Axis(1))
    }

    pub fn num_channels(&self) -> usize {
        self.gains.len_of(Axis(2))
    }
}

/// A gain is flagged if either of its parts is NaN.
pub(crate) fn is_flagged(g: &Complex<f64>) -> bool {
    g.re.is_nan() || g.im.is_nan()
}

/// The number of flagged gains in a view of solutions.
pub(crate) fn count_flagged<D: Dimension>(gains: ArrayView<Complex<f64>, D>) -> usize {
    gains.iter().filter(|g| is_flagged(g)).count()
}
