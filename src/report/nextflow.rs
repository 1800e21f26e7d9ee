// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Find the report used by a Nextflow pipeline.

use std::{borrow::Cow, fs, path::Path, path::PathBuf};

use log::debug;
use regex::{Captures, Regex};

use super::ReportError;

lazy_static::lazy_static! {
    static ref ENV_VAR_REGEX: Regex = Regex::new(r"\$(?:\{(\w+)\}|(\w+))").unwrap();
}

/// Expand `$VAR` and `${VAR}`. Unset variables are left as they are.
fn expand_env_vars(s: &str) -> Cow<str> {
    ENV_VAR_REGEX.replace_all(s, |caps: &Captures| {
        let name = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
        name.and_then(|n| std::env::var(n).ok())
            .unwrap_or_else(|| caps[0].to_string())
    })
}

/// Pull the `reportCsv = '...'` setting out of a `nextflow.config`.
pub fn report_path_from_nextflow_config(config: &Path) -> Result<PathBuf, ReportError> {
    debug!("Looking for the report in {}", config.display());
    let contents = fs::read_to_string(config)?;
    contents
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            if key.trim() != "reportCsv" {
                return None;
            }
            let value = value.trim().replace(['"', '\''], "");
            Some(PathBuf::from(expand_env_vars(&value).into_owned()))
        })
        .last()
        .ok_or_else(|| ReportError::NoReportInConfig(config.display().to_string()))
}
