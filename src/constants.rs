// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

Defaults here are shared between the library and the `pipectl` command-line
interface, so help texts never disagree with behaviour.
 */

/// The total spectral coverage of the MWA signal chain \[kHz\].
pub const MWA_BANDWIDTH_KHZ: u32 = 30720;

/// The number of characters of an observation ID that identify it in the
/// report. Longer identifiers are truncated to this width.
pub const OBSID_KEY_WIDTH: usize = 10;

/// The name of the key column in a report.
pub const OBSID_COLUMN: &str = "obsid";

/// The name of the lock file that lives alongside a report.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Held (briefly) by whoever is breaking a stale lock, so that only one worker
/// at a time can decide a lock is dead and remove it.
pub const LOCK_BREAK_FILE_NAME: &str = ".lock.break";

/// Lock-file content written by older tooling to indicate that nobody holds
/// the lock.
pub const LOCK_AVAILABLE: &str = "Available";

/// The number of times to attempt acquiring the report lock before giving up.
pub const DEFAULT_LOCK_ATTEMPTS: u32 = 120;

/// The time to wait between lock acquisition attempts \[seconds\].
pub const DEFAULT_LOCK_BACKOFF_SECS: f64 = 5.0;

/// A lock untouched for this long is presumed to belong to a crashed worker
/// and is broken \[seconds\].
pub const DEFAULT_LOCK_STALE_AFTER_SECS: f64 = 900.0;

/// Observations started more than this many times are failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// The maximum number of observations handed out by a queue selection.
pub const DEFAULT_QUEUE_LIMIT: usize = 120;

/// The acceptable fraction of flagged calibration solutions before a file is
/// considered unusable.
pub const DEFAULT_FLAGGED_THRESHOLD: f64 = 0.25;

/// The bandwidth flagged at each edge of every sub-band \[kHz\].
pub const DEFAULT_EDGE_BANDWIDTH_KHZ: u32 = 80;

/// The number of sub-bands (coarse channels) across the MWA band.
pub const DEFAULT_NUM_SUB_BANDS: u32 = 24;

/// The suffix of calibration solutions files produced by the calibration
/// stage; files live at `<base>/<obsid>/<obsid><suffix>`.
pub const DEFAULT_SOLUTIONS_SUFFIX: &str = "_local_gleam_model_solutions_initial_ref.bin";

/// The imaging sub-channels produced for every observation.
pub const DEFAULT_SUB_CHANNELS: [&str; 5] = ["0000", "0001", "0002", "0003", "MFS"];

/// Where a Nextflow pipeline keeps its configuration, relative to the
/// directory it is launched from.
pub const DEFAULT_NEXTFLOW_CONFIG: &str = "nextflow.config";
