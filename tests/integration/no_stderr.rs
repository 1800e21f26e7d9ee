// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests to ensure there is no stderr output for successful commands whose
//! logs go to stdout.

use tempfile::TempDir;

use crate::{get_cmd_output, make_report, pipectl};

#[test]
fn test_report_update_no_stderr() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let report = make_report(tmp_dir.path());

    #[rustfmt::skip]
    let cmd = pipectl()
        .args([
            "report-update",
            "--report", &report.display().to_string(),
            "--obsid", "1090008760",
            "--field", "status",
            "--value", "Initiated",
        ])
        .ok();
    assert!(
        cmd.is_ok(),
        "report-update failed on a simple report: {}",
        cmd.err().unwrap()
    );
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
    assert!(stdout.contains("Updating report - obsid: 1090008760 - field: status - value: Initiated"));
}

#[test]
fn test_report_create_no_stderr() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let report = tmp_dir.path().join("new.csv");

    let cmd = pipectl()
        .args(["report-create", "--report", &report.display().to_string()])
        .ok();
    assert!(cmd.is_ok(), "report-create failed: {}", cmd.err().unwrap());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
    assert!(report.exists());
}
