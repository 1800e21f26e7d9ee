// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Coordination software for Murchison Widefield Array (MWA) data-reduction
pipelines.

Pipeline stages record their progress in a shared [`report`], and
[`solutions`] decides which calibration solutions are fit to apply, finding
substitutes from neighbouring observations where needed.
 */

mod cli;
pub mod constants;
mod io;
pub mod report;
pub mod solutions;

use crossbeam_utils::atomic::AtomicCell;

/// Should we draw progress bars? Off unless the command-line interface turns
/// them on.
pub(crate) static PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);

// Re-exports.
pub use cli::{Pipectl, PipectlError};
pub use io::GlobError;
pub use report::{CsvReport, ObsRecord, ObsStore, Obsid, ReportError, ReportTable};
pub use solutions::CalibrationSolutions;
