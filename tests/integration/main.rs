// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod no_stderr;
mod report;
mod solutions;

use std::{
    fs,
    path::{Path, PathBuf},
    process::Output,
    str::from_utf8,
};

use assert_cmd::{output::OutputError, Command};
use indoc::indoc;
use ndarray::prelude::*;
use num_complex::Complex;

use mwa_pipectl::{
    constants::DEFAULT_SOLUTIONS_SUFFIX, solutions::solutions_path, CalibrationSolutions,
};

fn pipectl() -> Command {
    let mut cmd = Command::cargo_bin("pipectl").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

const REPORT: &str = indoc! {"
    obsid,jobid,status,attempts,image,obsDir
    1090008640,101,Success,1,Success,/scratch/obs
    1090008760,102,,,,
    1090008880,,,,,
"};

/// Write a small report into `dir`.
fn make_report(dir: &Path) -> PathBuf {
    let report = dir.join("report.csv");
    fs::write(&report, REPORT).unwrap();
    report
}

/// Write calibration solutions of 768 channels for `obsid` into `base`, with
/// the first `dead_chans` channels flagged.
fn make_solutions(base: &Path, obsid: u64, dead_chans: usize) -> PathBuf {
    let mut gains = Array4::from_elem((1, 16, 768, 4), Complex::new(1.0, 0.0));
    gains
        .slice_mut(s![.., .., ..dead_chans, ..])
        .fill(Complex::new(f64::NAN, f64::NAN));
    let sols = CalibrationSolutions {
        gains,
        ..Default::default()
    };
    let file = solutions_path(base, obsid, DEFAULT_SOLUTIONS_SUFFIX);
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    sols.write_solutions_from_ext::<&Path>(&file).unwrap();
    file
}
