// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests driving the `report-*` subcommands.

use std::{fs, os::unix::fs::symlink};

use tempfile::TempDir;

use crate::{get_cmd_output, make_report, pipectl, REPORT};

#[test]
fn test_update_then_get() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let report = make_report(tmp_dir.path());
    let report = report.display().to_string();

    #[rustfmt::skip]
    pipectl()
        .args([
            "report-update",
            "--report", &report,
            // Extra characters after the obsid are ignored.
            "--obsid", "1090008760_extra",
            "--field", "postImage_MFS",
            "--value", "Fail - Not enough sources detected.",
        ])
        .assert()
        .success();

    let cmd = pipectl()
        .args(["report-get", "--report", &report, "--obsid", "1090008760"])
        .ok();
    let (stdout, _) = get_cmd_output(cmd);
    assert_eq!(
        stdout,
        "jobid: 102\npostImage_MFS: Fail - Not enough sources detected.\n"
    );

    #[rustfmt::skip]
    let cmd = pipectl()
        .args([
            "report-get",
            "--report", &report,
            "--obsid", "1090008640",
            "--field", "image",
        ])
        .ok();
    let (stdout, _) = get_cmd_output(cmd);
    assert_eq!(stdout, "Success\n");
}

#[test]
fn test_unknown_field_fails() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let report = make_report(tmp_dir.path());

    #[rustfmt::skip]
    let cmd = pipectl()
        .args([
            "report-update",
            "--report", &report.display().to_string(),
            "--obsid", "1090008760",
            "--field", "imgae",
            "--value", "Success",
        ])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("Unknown report field 'imgae'"), "{stderr}");
    assert!(stderr.contains("Known fields are"), "{stderr}");
    assert_eq!(fs::read_to_string(&report).unwrap(), REPORT);
}

#[test]
fn test_busy_report_is_not_an_error() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let report = make_report(tmp_dir.path());
    let report = report.display().to_string();
    fs::write(tmp_dir.path().join(".lock"), "1090008999").unwrap();

    #[rustfmt::skip]
    let cmd = pipectl()
        .args([
            "report-update",
            "--report", &report,
            "--lock-attempts", "2",
            "--lock-backoff", "0.01",
            "--obsid", "1090008760",
            "--field", "status",
            "--value", "Initiated",
        ])
        .ok();
    assert!(cmd.is_ok(), "{}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("Report update unsuccessful"), "{stdout}");
    assert_eq!(fs::read_to_string(&report).unwrap(), REPORT);

    let cmd = pipectl()
        .args(["report-lock-status", "--report", &report])
        .ok();
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.starts_with("1090008999"), "{stdout}");

    pipectl()
        .args(["report-clear-lock", "--report", &report])
        .assert()
        .success();
    let cmd = pipectl()
        .args(["report-lock-status", "--report", &report])
        .ok();
    let (stdout, _) = get_cmd_output(cmd);
    assert_eq!(stdout, "Available\n");
}

#[test]
fn test_start_counts_attempts() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let report = make_report(tmp_dir.path());
    let report = report.display().to_string();
    let obs_dir = tmp_dir.path().join("obs");
    fs::create_dir(&obs_dir).unwrap();
    symlink(tmp_dir.path(), obs_dir.join("1090008760")).unwrap();
    let obs_dir = obs_dir.display().to_string();

    for expected in ["Queued", "Queued", "Queued", "Failed"] {
        #[rustfmt::skip]
        pipectl()
            .args([
                "report-start-check",
                "--report", &report,
                "--obsid", "1090008760",
                "--obs-dir", &obs_dir,
            ])
            .assert()
            .success();

        #[rustfmt::skip]
        let cmd = pipectl()
            .args([
                "report-get",
                "--report", &report,
                "--obsid", "1090008760",
                "--field", "status",
            ])
            .ok();
        let (stdout, _) = get_cmd_output(cmd);
        assert_eq!(stdout.trim(), expected);
    }

    // Once processed in place, the observation can't be started again.
    fs::remove_file(tmp_dir.path().join("obs").join("1090008760")).unwrap();
    #[rustfmt::skip]
    pipectl()
        .args([
            "report-start-check",
            "--report", &report,
            "--obsid", "1090008760",
            "--obs-dir", &obs_dir,
        ])
        .assert()
        .failure();
}

#[test]
fn test_select_prints_only_obsids() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let report = make_report(tmp_dir.path());

    let cmd = pipectl()
        .args(["report-select", "--report", &report.display().to_string()])
        .ok();
    let (stdout, stderr) = get_cmd_output(cmd);
    assert_eq!(stdout, "1090008760\n");
    // Logs go to stderr instead.
    assert!(stderr.contains("Selected 1 of 3 observations"), "{stderr}");
}

#[test]
fn test_report_from_nextflow_config() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let report = make_report(tmp_dir.path());
    fs::write(
        tmp_dir.path().join("nextflow.config"),
        format!("params.reportCsv = '{}'\nreportCsv = '{}'\n", "/nope.csv", report.display()),
    )
    .unwrap();

    let cmd = pipectl()
        .current_dir(tmp_dir.path())
        .args(["report-get", "--obsid", "1090008640", "--field", "jobid"])
        .ok();
    let (stdout, stderr) = get_cmd_output(cmd);
    assert_eq!(stdout, "101\n", "{stderr}");
}

#[test]
fn test_save_toml_reproduces_the_run() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let report = make_report(tmp_dir.path());
    let args = tmp_dir.path().join("update.toml");

    #[rustfmt::skip]
    pipectl()
        .args([
            "report-update",
            "--dry-run",
            "--save-toml", &args.display().to_string(),
            "--report", &report.display().to_string(),
            "--obsid", "1090008760",
            "--field", "image",
            "--value", "Success",
        ])
        .assert()
        .success();
    assert_eq!(fs::read_to_string(&report).unwrap(), REPORT);

    pipectl()
        .args(["report-update", &args.display().to_string()])
        .assert()
        .success();
    let cmd = pipectl()
        .args([
            "report-get",
            "--report",
            &report.display().to_string(),
            "--obsid",
            "1090008760",
            "--field",
            "image",
        ])
        .ok();
    let (stdout, _) = get_cmd_output(cmd);
    assert_eq!(stdout, "Success\n");
}
