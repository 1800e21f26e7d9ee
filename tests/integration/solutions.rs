// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests driving the `solutions-*` subcommands.

use std::fs;

use tempfile::TempDir;

use crate::{get_cmd_output, make_solutions, pipectl};

#[test]
fn test_check_prints_verdicts() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let good = make_solutions(tmp_dir.path(), 1090008640, 0);
    // A dead first quarter of the band.
    let bad = make_solutions(tmp_dir.path(), 1090008760, 192);

    #[rustfmt::skip]
    let cmd = pipectl()
        .args([
            "solutions-check",
            &good.display().to_string(),
            &bad.display().to_string(),
            "--threshold", "0.1",
        ])
        .ok();
    assert!(cmd.is_ok(), "{}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert_eq!(
        stdout,
        format!("{} passed\n{} failed\n", good.display(), bad.display())
    );

    // Over the whole band the dead quarter is tolerable...
    let cmd = pipectl()
        .args(["solutions-check", &bad.display().to_string()])
        .ok();
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.ends_with("passed\n"), "{stdout}");

    // ... but not segment by segment.
    #[rustfmt::skip]
    let cmd = pipectl()
        .args([
            "solutions-check",
            &bad.display().to_string(),
            "--segments", "4",
        ])
        .ok();
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.ends_with("failed\n"), "{stdout}");
}

#[test]
fn test_indivisible_segments_are_an_error() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let file = make_solutions(tmp_dir.path(), 1090008640, 0);

    #[rustfmt::skip]
    let cmd = pipectl()
        .args([
            "solutions-check",
            &file.display().to_string(),
            "--segments", "5",
        ])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("not evenly divisible by 5 segments"), "{stderr}");
}

#[test]
fn test_assign() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let base = tmp_dir.path();
    make_solutions(base, 1090008640, 0);
    make_solutions(base, 1090008760, 768);
    make_solutions(base, 1090009000, 0);
    // 1090008880 has no solutions at all.
    let obsids = base.join("obsids.txt");
    fs::write(&obsids, "1090008640\n1090008760\n1090008880\n1090009000\n").unwrap();
    let cenchans = base.join("cenchans.txt");
    fs::write(
        &cenchans,
        "1090008640 121\n1090008760 121\n1090008880 121\n1090009000 145\n",
    )
    .unwrap();

    #[rustfmt::skip]
    let cmd = pipectl()
        .args([
            "solutions-assign",
            "--no-progress-bars",
            "--obsids", &obsids.display().to_string(),
            "--base-path", &base.display().to_string(),
            "--cenchan-file", &cenchans.display().to_string(),
        ])
        .ok();
    assert!(cmd.is_ok(), "{}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert_eq!(
        stdout,
        "1090008640 1090008640\n1090008760 1090008640\n1090008880 1090008640\n1090009000 1090009000\n"
    );
}

#[test]
fn test_assign_without_usable_solutions_fails() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let base = tmp_dir.path();
    make_solutions(base, 1090008640, 768);
    let obsids = base.join("obsids.txt");
    fs::write(&obsids, "1090008640\n1090008760\n").unwrap();

    #[rustfmt::skip]
    let cmd = pipectl()
        .args([
            "solutions-assign",
            "--no-progress-bars",
            "--obsids", &obsids.display().to_string(),
            "--base-path", &base.display().to_string(),
            "--any-cenchan",
        ])
        .ok();
    assert!(cmd.is_err());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stdout.is_empty(), "{stdout}");
    assert!(stderr.contains("None of the 2 observations"), "{stderr}");
}
