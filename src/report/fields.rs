// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The vocabulary of report fields and status values.
//!
//! A report accepts any column name, but pipeline stages only ever write the
//! names listed here. Validating against this vocabulary at the command-line
//! boundary catches typos that would otherwise silently create new columns.

use std::{fmt, str::FromStr};

use itertools::Itertools;
use regex::Regex;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use super::ReportError;
use crate::constants::DEFAULT_SUB_CHANNELS;

lazy_static::lazy_static! {
    static ref SUB_CHANNEL_FIELD_REGEX: Regex = Regex::new(
        r"^(?P<field>postImage|sourcecount|coord_rms|rms_estimate_xx|rms_estimate_yy|rms_xx|rms_yy|rms)_(?P<sub>\d{4}|MFS)$"
    ).unwrap();

    pub static ref KNOWN_FIELDS_HELP: String = format!(
        "{}, or one of {} followed by _<sub-channel> (e.g. postImage_0001, rms_MFS)",
        PlainField::iter().join(", "),
        SubChannelField::iter().join(", ")
    );
}

/// Fields that appear once per observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
pub enum PlainField {
    #[strum(serialize = "status")]
    Status,

    #[strum(serialize = "attempts")]
    Attempts,

    #[strum(serialize = "obsDir")]
    ObsDir,

    #[strum(serialize = "jobid")]
    JobId,

    #[strum(serialize = "job_status")]
    JobStatus,

    #[strum(serialize = "cenchan")]
    CenChan,

    #[strum(serialize = "flagged")]
    Flagged,

    #[strum(serialize = "calibration")]
    Calibration,

    #[strum(serialize = "generateCalibration")]
    GenerateCalibration,

    #[strum(serialize = "applyCalibration")]
    ApplyCalibration,

    #[strum(serialize = "flagUV")]
    FlagUv,

    #[strum(serialize = "uvSub")]
    UvSub,

    #[strum(serialize = "uvSub_SourceCount")]
    UvSubSourceCount,

    #[strum(serialize = "image")]
    Image,

    #[strum(serialize = "beamsize")]
    BeamSize,
}

/// Fields that appear once per imaging sub-channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
pub enum SubChannelField {
    #[strum(serialize = "postImage")]
    PostImage,

    #[strum(serialize = "sourcecount")]
    SourceCount,

    #[strum(serialize = "rms")]
    Rms,

    #[strum(serialize = "coord_rms")]
    CoordRms,

    #[strum(serialize = "rms_xx")]
    RmsXx,

    #[strum(serialize = "rms_yy")]
    RmsYy,

    #[strum(serialize = "rms_estimate_xx")]
    RmsEstimateXx,

    #[strum(serialize = "rms_estimate_yy")]
    RmsEstimateYy,
}

/// An imaging sub-channel: either a numbered channel (`0000`) or the
/// multi-frequency synthesis image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubChannel {
    Index(u16),
    Mfs,
}

impl fmt::Display for SubChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubChannel::Index(i) => write!(f, "{i:04}"),
            SubChannel::Mfs => write!(f, "MFS"),
        }
    }
}

impl FromStr for SubChannel {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MFS" => Ok(SubChannel::Mfs),
            _ if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) => s
                .parse()
                .map(SubChannel::Index)
                .map_err(|_| ReportError::BadSubChannel(s.to_string())),
            _ => Err(ReportError::BadSubChannel(s.to_string())),
        }
    }
}

/// The sub-channels every observation is imaged in.
pub fn default_sub_channels() -> Vec<SubChannel> {
    DEFAULT_SUB_CHANNELS
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// A validated report column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportField {
    Plain(PlainField),
    PerSubChannel(SubChannelField, SubChannel),
}

impl fmt::Display for ReportField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportField::Plain(p) => write!(f, "{p}"),
            ReportField::PerSubChannel(field, sub) => write!(f, "{field}_{sub}"),
        }
    }
}

impl FromStr for ReportField {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(p) = PlainField::from_str(s) {
            return Ok(ReportField::Plain(p));
        }
        let caps = SUB_CHANNEL_FIELD_REGEX
            .captures(s)
            .ok_or_else(|| ReportError::UnknownField(s.to_string()))?;
        let field = SubChannelField::from_str(&caps["field"])
            .map_err(|_| ReportError::UnknownField(s.to_string()))?;
        let sub = caps["sub"].parse()?;
        Ok(ReportField::PerSubChannel(field, sub))
    }
}

impl From<PlainField> for ReportField {
    fn from(p: PlainField) -> Self {
        ReportField::Plain(p)
    }
}

impl ReportField {
    /// Check that `value` makes sense for this field. Most fields hold free
    /// text; the retry counter must be a non-negative integer.
    pub fn validate_value(&self, value: &str) -> Result<(), ReportError> {
        match self {
            ReportField::Plain(PlainField::Attempts) if !value.is_empty() => value
                .parse::<u32>()
                .map(|_| ())
                .map_err(|_| ReportError::NotAnInteger {
                    field: self.to_string(),
                    value: value.to_string(),
                }),
            _ => Ok(()),
        }
    }
}

/// The informal vocabulary of `status` values. Stage fields share the same
/// words, but any free text (e.g. "Fail - Not enough sources detected.") is
/// also accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
pub enum ObsStatus {
    #[strum(serialize = "Queued")]
    Queued,

    #[strum(serialize = "Initiated")]
    Initiated,

    #[strum(serialize = "Success")]
    Success,

    #[strum(serialize = "Failed")]
    Failed,

    #[strum(serialize = "Missing Data")]
    MissingData,
}

impl ObsStatus {
    /// Is a record with this `status` value finished with?
    pub fn is_terminal(value: &str) -> bool {
        matches!(
            ObsStatus::from_str(value),
            Ok(ObsStatus::Success | ObsStatus::Failed)
        )
    }
}
