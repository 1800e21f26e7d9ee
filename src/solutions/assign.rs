// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Find a substitute ("donor") for every observation whose own calibration
//! solutions are unusable.
//!
//! Solutions only transfer between observations with the same central
//! channel. Among those, the donor is the usable observation closest in time,
//! i.e. with the smallest obsid difference; ties go to the earlier obsid.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;

use super::{AssignError, QualityCheck, QualityError};
use crate::{
    constants::DEFAULT_SOLUTIONS_SUFFIX,
    report::{PlainField, ReportTable},
    PROGRESS_BARS,
};

/// Central channels, keyed by obsid.
pub type CenChanLookup = HashMap<u64, u32>;

#[derive(Debug, Clone)]
pub struct AssignOptions {
    /// Solutions live at `<base_path>/<obsid>/<obsid><suffix>`.
    pub base_path: PathBuf,

    pub suffix: String,

    pub check: QualityCheck,

    /// Only take solutions from observations with the same central channel.
    pub same_cenchan: bool,

    /// Carry on (with every observation in one group) when central channels
    /// can't be looked up.
    pub disable_lookup_check: bool,
}

impl Default for AssignOptions {
    fn default() -> Self {
        AssignOptions {
            base_path: PathBuf::from("."),
            suffix: DEFAULT_SOLUTIONS_SUFFIX.to_string(),
            check: QualityCheck::default(),
            same_cenchan: true,
            disable_lookup_check: false,
        }
    }
}

pub fn solutions_path(base_path: &Path, obsid: u64, suffix: &str) -> PathBuf {
    base_path
        .join(obsid.to_string())
        .join(format!("{obsid}{suffix}"))
}

/// Call `parse` with the whitespace-separated tokens of every line that isn't
/// blank or a comment.
fn parse_lines<T, F>(file: &Path, mut parse: F) -> Result<Vec<T>, AssignError>
where
    F: FnMut(&[&str], usize) -> Result<T, AssignError>,
{
    let reader = BufReader::new(File::open(file)?);
    let mut out = vec![];
    for (i_line, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        out.push(parse(&tokens, i_line + 1)?);
    }
    Ok(out)
}

fn parse_err(file: &Path, line_num: usize, text: &str, what: &'static str) -> AssignError {
    AssignError::Parse {
        file: file.display().to_string(),
        line_num,
        text: text.to_string(),
        what,
    }
}

/// Read a list of obsids, one per line. Only the first column is used.
pub fn read_obsids_file(file: &Path) -> Result<Vec<u64>, AssignError> {
    parse_lines(file, |tokens, line_num| {
        tokens[0]
            .parse()
            .map_err(|_| parse_err(file, line_num, tokens[0], "an obsid"))
    })
}

/// Read a two-column text file of `obsid cenchan`.
pub fn read_cenchan_file(file: &Path) -> Result<CenChanLookup, AssignError> {
    let pairs = parse_lines(file, |tokens, line_num| match tokens {
        [obsid, cenchan, ..] => {
            let obsid: u64 = obsid
                .parse()
                .map_err(|_| parse_err(file, line_num, obsid, "an obsid"))?;
            let cenchan: u32 = cenchan
                .parse()
                .map_err(|_| parse_err(file, line_num, cenchan, "a central channel"))?;
            Ok((obsid, cenchan))
        }
        _ => Err(parse_err(
            file,
            line_num,
            &tokens.join(" "),
            "an obsid and a central channel",
        )),
    })?;
    Ok(pairs.into_iter().collect())
}

/// Central channels recorded in a report's `cenchan` column. Rows without a
/// sensible value are skipped.
pub fn cenchans_from_report(table: &ReportTable) -> CenChanLookup {
    let cenchan_field = PlainField::CenChan.to_string();
    table
        .records()
        .filter_map(|r| {
            let obsid = r.obsid().as_str().parse::<u64>().ok()?;
            let cenchan = r.get(&cenchan_field).trim();
            match cenchan.parse::<u32>() {
                Ok(c) => Some((obsid, c)),
                Err(_) => {
                    if !cenchan.is_empty() {
                        debug!("Ignoring {obsid}'s central channel '{cenchan}'");
                    }
                    None
                }
            }
        })
        .collect()
}

/// The group each observation belongs to. Observations may only take
/// solutions from their own group.
pub(crate) fn group_by_cenchan(
    obsids: &[u64],
    lookup: Option<&CenChanLookup>,
    same_cenchan: bool,
    disable_lookup_check: bool,
) -> Result<Vec<u32>, AssignError> {
    let one_group = vec![1; obsids.len()];
    if !same_cenchan {
        return Ok(one_group);
    }

    let lookup = match (lookup, disable_lookup_check) {
        (Some(l), _) => l,
        (None, true) => {
            warn!("No central channel lookup; treating all observations as one group");
            return Ok(one_group);
        }
        (None, false) => return Err(AssignError::NoCenChanLookup),
    };

    let missing: Vec<u64> = obsids
        .iter()
        .copied()
        .filter(|o| !lookup.contains_key(o))
        .collect();
    if missing.is_empty() {
        Ok(obsids.iter().map(|o| lookup[o]).collect())
    } else if disable_lookup_check {
        warn!(
            "No central channel for {} observations; treating all observations as one group",
            missing.len()
        );
        Ok(one_group)
    } else {
        Err(AssignError::MissingCenChans(missing))
    }
}

/// Pick a donor for every observation. Usable observations are their own
/// donors.
pub(crate) fn assign_donors(
    obsids: &[u64],
    usable: &[bool],
    groups: &[u32],
) -> Result<Vec<u64>, AssignError> {
    debug_assert_eq!(obsids.len(), usable.len());
    debug_assert_eq!(obsids.len(), groups.len());

    let mut donors = obsids.to_vec();
    let mut no_donor = vec![];
    for (i, (&obsid, &group)) in obsids.iter().zip(groups).enumerate() {
        if usable[i] {
            continue;
        }
        let donor = obsids
            .iter()
            .zip(usable)
            .zip(groups)
            .filter(|&((_, &u), &g)| u && g == group)
            .map(|((&candidate, _), _)| candidate)
            .min_by_key(|&candidate| (candidate.abs_diff(obsid), candidate));
        match donor {
            Some(d) => donors[i] = d,
            None => no_donor.push(obsid),
        }
    }

    if no_donor.is_empty() {
        Ok(donors)
    } else {
        Err(AssignError::NoDonor(no_donor))
    }
}

/// Check every observation's solutions and assign donors. Returns a list
/// parallel to `obsids`.
pub fn find_valid_solutions(
    obsids: &[u64],
    options: &AssignOptions,
    lookup: Option<&CenChanLookup>,
) -> Result<Vec<u64>, AssignError> {
    debug!("{} observations to assign", obsids.len());

    let pb = ProgressBar::with_draw_target(
        Some(obsids.len() as _),
        if PROGRESS_BARS.load() {
            ProgressDrawTarget::stdout()
        } else {
            ProgressDrawTarget::hidden()
        },
    )
    .with_style(
        ProgressStyle::default_bar()
            .template("{msg:17}: [{wide_bar:.blue}] {pos:3}/{len:3} files ({elapsed_precise}<{eta_precise})")
            .unwrap()
            .progress_chars("=> "),
    )
    .with_position(0)
    .with_message("Checking solutions");
    let usable = obsids
        .par_iter()
        .progress_with(pb.clone())
        .map(|&obsid| {
            options
                .check
                .check_file(&solutions_path(&options.base_path, obsid, &options.suffix))
        })
        .collect::<Result<Vec<bool>, QualityError>>()?;
    pb.finish_and_clear();

    let num_usable = usable.iter().filter(|&&u| u).count();
    if num_usable == 0 {
        return Err(AssignError::NoUsableSolutions {
            num_obsids: obsids.len(),
            base_path: options.base_path.display().to_string(),
        });
    }
    info!(
        "{num_usable} of {} observations have usable calibration solutions",
        obsids.len()
    );

    let groups = group_by_cenchan(
        obsids,
        lookup,
        options.same_cenchan,
        options.disable_lookup_check,
    )?;
    let donors = assign_donors(obsids, &usable, &groups)?;
    for (obsid, donor) in obsids.iter().zip(&donors) {
        if obsid != donor {
            info!("{obsid} will use the calibration solutions of {donor}");
        }
    }
    Ok(donors)
}

/// Write one line per observation: `obsid donor`, or only `donor`.
pub fn write_assignment<W: Write>(
    mut w: W,
    obsids: &[u64],
    donors: &[u64],
    only_donors: bool,
) -> std::io::Result<()> {
    for (obsid, donor) in obsids.iter().zip(donors) {
        if only_donors {
            writeln!(w, "{donor}")?;
        } else {
            writeln!(w, "{obsid} {donor}")?;
        }
    }
    w.flush()
}
