// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Deciding what to run next, and whether finished work really finished.

use log::{debug, info};

use super::{
    default_sub_channels, CsvReport, ObsRecord, ObsStatus, ObsStore, Obsid, PlainField,
    ReportError, ReportTable, SubChannel,
};
use crate::io::get_all_matches_from_glob;

/// Stages that must have succeeded before an observation's products are
/// verified.
pub const DEFAULT_VERIFY_STAGES: [&str; 7] = [
    "calibration",
    "image",
    "postImage_0000",
    "postImage_0001",
    "postImage_0002",
    "postImage_0003",
    "postImage_MFS",
];

/// Stages that must have succeeded before an observation is mosaicked.
pub const DEFAULT_MOSAIC_STAGES: [&str; 10] = [
    "generateCalibration",
    "applyCalibration",
    "flagUV",
    "uvSub",
    "image",
    "postImage_0000",
    "postImage_0001",
    "postImage_0002",
    "postImage_0003",
    "postImage_MFS",
];

/// The observations that should be handed to workers next: they have a
/// download job, aren't finished, and haven't used up their attempts. At most
/// `limit` are returned, in report order.
pub fn select_queue(table: &ReportTable, limit: usize, max_attempts: u32) -> Vec<Obsid> {
    let status = PlainField::Status.to_string();
    let job_id = PlainField::JobId.to_string();
    let attempts = PlainField::Attempts.to_string();

    table
        .records()
        .filter(|r| !r.get(&job_id).trim().is_empty())
        .filter(|r| !ObsStatus::is_terminal(r.get(&status)))
        .filter(|r| {
            let a = r.get(&attempts).trim();
            match a.parse::<u32>() {
                Ok(a) => a < max_attempts,
                Err(_) if a.is_empty() => true,
                Err(_) => {
                    debug!("Skipping {}; its attempts are '{a}'", r.obsid());
                    false
                }
            }
        })
        .take(limit)
        .map(|r| r.obsid().clone())
        .collect()
}

fn all_succeeded(record: &ObsRecord, stages: &[String]) -> bool {
    stages
        .iter()
        .all(|stage| record.get(stage) == ObsStatus::Success.to_string())
}

/// Observations for which every one of `stages` succeeded, with their
/// working directories.
pub fn successful(table: &ReportTable, stages: &[String]) -> Vec<(Obsid, String)> {
    let obs_dir = PlainField::ObsDir.to_string();
    table
        .records()
        .filter(|r| all_succeeded(r, stages))
        .map(|r| (r.obsid().clone(), r.get(&obs_dir).to_string()))
        .collect()
}

/// A path to a product every finished observation must have. `{obsdir}`,
/// `{obsid}` and `{sub}` are substituted; the result may be a glob pattern.
/// Templates mentioning `{sub}` are checked once per sub-channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductTemplate(pub String);

impl ProductTemplate {
    fn expand(&self, obs_dir: &str, obsid: &Obsid, subs: &[SubChannel]) -> Vec<String> {
        let base = self
            .0
            .replace("{obsdir}", obs_dir)
            .replace("{obsid}", obsid.as_str());
        if base.contains("{sub}") {
            subs.iter()
                .map(|sub| base.replace("{sub}", &sub.to_string()))
                .collect()
        } else {
            vec![base]
        }
    }
}

pub fn default_verify_products() -> Vec<ProductTemplate> {
    vec![ProductTemplate(
        "{obsdir}/{obsid}/{obsid}_deep-{sub}-image-pb_warp.fits".to_string(),
    )]
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifySummary {
    pub succeeded: Vec<Obsid>,
    pub missing: Vec<Obsid>,
}

/// For every observation whose `stages` all succeeded but which isn't yet
/// marked "Success", check that its products exist on disk and set `status`
/// accordingly ("Success" or "Missing Data").
pub fn verify(
    report: &CsvReport,
    stages: &[String],
    products: &[ProductTemplate],
    subs: Option<&[SubChannel]>,
) -> Result<VerifySummary, ReportError> {
    let default_subs = default_sub_channels();
    let subs = subs.unwrap_or(&default_subs);
    let status = PlainField::Status.to_string();
    let obs_dir = PlainField::ObsDir.to_string();

    let table = report.read_table()?;
    let candidates: Vec<ObsRecord> = table
        .records()
        .filter(|r| all_succeeded(r, stages))
        .filter(|r| r.get(&status) != ObsStatus::Success.to_string())
        .collect();
    info!("Validating {} observations", candidates.len());

    let mut summary = VerifySummary::default();
    for record in candidates {
        let obsid = record.obsid();
        let mut missing = None;
        'products: for template in products {
            for pattern in template.expand(record.get(&obs_dir), obsid, subs) {
                if get_all_matches_from_glob(&pattern)?.is_empty() {
                    missing = Some(pattern);
                    break 'products;
                }
            }
        }

        match missing {
            None => {
                report.update(obsid, &status, &ObsStatus::Success.to_string())?;
                summary.succeeded.push(obsid.clone());
            }
            Some(pattern) => {
                debug!("{obsid} is missing {pattern}");
                report.update(obsid, &status, &ObsStatus::MissingData.to_string())?;
                summary.missing.push(obsid.clone());
            }
        }
    }
    info!(
        "{} observations verified, {} missing data",
        summary.succeeded.len(),
        summary.missing.len()
    );
    Ok(summary)
}
