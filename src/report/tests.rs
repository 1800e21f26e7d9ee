// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::bounded;
use indoc::indoc;
use tempfile::TempDir;

use super::*;

const REPORT: &str = indoc! {"
    obsid,calibration,image,status,attempts,obsDir
    1090008640,Success,Success,Queued,1,/scratch/obs
    1090008760,Failed,,Failed,3,/scratch/obs
    1090008880,,,,,
"};

/// Quick lock settings so tests don't sit around for minutes.
fn fast_lock() -> LockConfig {
    LockConfig {
        attempts: 2000,
        backoff: Duration::from_millis(5),
        stale_after: None,
    }
}

fn make_report(contents: &str) -> (TempDir, PathBuf) {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let path = tmp_dir.path().join("report.csv");
    fs::write(&path, contents).unwrap();
    (tmp_dir, path)
}

fn lock_path(report: &Path) -> PathBuf {
    report.parent().unwrap().join(".lock")
}

#[test]
fn test_obsid_is_truncated() {
    assert_eq!(Obsid::new("1090008640123").as_str(), "1090008640");
    assert_eq!(Obsid::new(" 1090008640 ").as_str(), "1090008640");
    assert_eq!(Obsid::new("109000").as_str(), "109000");
    assert_eq!(Obsid::from(1090008640u64).as_str(), "1090008640");
}

#[test]
fn test_unmodified_round_trip_is_lossless() {
    let contents = indoc! {r#"
        obsid,calibration,status,flagged,obsDir
        1090008640,Success,Queued,"1,5,77",/scratch/obs
        1090008760,"Fail - ""bad"" tiles",Failed,,/scratch/obs
        1090008880,,,,
    "#};
    let (_tmp_dir, path) = make_report(contents);
    let table = ReportTable::read(&path).unwrap();
    table.write(&path).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), contents);
}

#[test]
fn test_short_rows_are_padded() {
    let (_tmp_dir, path) = make_report("obsid,a,b\n1090008640,x\n");
    let table = ReportTable::read(&path).unwrap();
    let record = table.get(&Obsid::new("1090008640")).unwrap();
    assert_eq!(record.get("a"), "x");
    assert_eq!(record.get("b"), "");
    table.write(&path).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "obsid,a,b\n1090008640,x,\n");
}

#[test]
fn test_long_rows_are_an_error() {
    let (_tmp_dir, path) = make_report("obsid,a,b\n1090008640,x,y\n1090008760,x,y,z\n");
    let result = ReportTable::read(&path);
    assert!(matches!(
        result,
        Err(ReportError::RowTooLong {
            line: 3,
            num_cells: 4,
            num_columns: 3,
            ..
        })
    ));
}

#[test]
fn test_duplicate_obsids_are_an_error() {
    // The second row truncates to the same key.
    let (_tmp_dir, path) = make_report("obsid,a\n1090008640,x\n10900086401,y\n");
    match ReportTable::read(&path) {
        Err(ReportError::DuplicateObsid {
            line,
            first_line,
            obsid,
            ..
        }) => {
            assert_eq!((line, first_line), (3, 2));
            assert_eq!(obsid, "1090008640");
        }
        other => panic!("expected a duplicate obsid error, got {other:?}"),
    }
}

#[test]
fn test_rows_without_obsids() {
    // Rows with nothing in them are skipped...
    let (_tmp_dir, path) = make_report("obsid,a\n1090008640,x\n,\n");
    let table = ReportTable::read(&path).unwrap();
    assert_eq!(table.num_rows(), 1);

    // ...but rows with values are not silently dropped.
    let (_tmp_dir, path) = make_report("obsid,a\n1090008640,x\n,y\n");
    assert!(matches!(
        ReportTable::read(&path),
        Err(ReportError::MissingObsid { line: 3, .. })
    ));
}

#[test]
fn test_blank_obsids_are_not_stored() {
    let (_tmp_dir, path) = make_report(REPORT);
    let report = CsvReport::new(&path, fast_lock());
    assert!(matches!(
        report.update(&Obsid::new(" "), "image", "Success"),
        Err(ReportError::EmptyObsid)
    ));
    assert_eq!(fs::read_to_string(&path).unwrap(), REPORT);
    assert!(!lock_path(&path).exists());
}

#[test]
fn test_report_needs_obsid_column() {
    let (_tmp_dir, path) = make_report("id,status\n1090008640,Queued\n");
    let result = ReportTable::read(&path);
    assert!(matches!(result, Err(ReportError::MissingKeyColumn { .. })));
}

#[test]
fn test_update_is_idempotent() {
    let (_tmp_dir, path) = make_report(REPORT);
    let report = CsvReport::new(&path, fast_lock());
    let obsid = Obsid::new("1090008880");

    report.update(&obsid, "image", "Success").unwrap();
    let once = fs::read_to_string(&path).unwrap();
    report.update(&obsid, "image", "Success").unwrap();
    let twice = fs::read_to_string(&path).unwrap();
    assert_eq!(once, twice);
    assert_eq!(report.get(&obsid).unwrap().unwrap().get("image"), "Success");
}

#[test]
fn test_long_obsids_hit_the_same_row() {
    let (_tmp_dir, path) = make_report(REPORT);
    let report = CsvReport::new(&path, fast_lock());

    report
        .update(&Obsid::new("1090008640999"), "beamsize", "0.5")
        .unwrap();
    report
        .update(&Obsid::new("1090008640"), "flagged", "1 2 3")
        .unwrap();

    let table = report.read_table().unwrap();
    assert_eq!(table.num_rows(), 3);
    let record = table.get(&Obsid::new("1090008640")).unwrap();
    assert_eq!(record.get("beamsize"), "0.5");
    assert_eq!(record.get("flagged"), "1 2 3");
}

#[test]
fn test_new_field_adds_exactly_one_column() {
    let (_tmp_dir, path) = make_report(REPORT);
    let report = CsvReport::new(&path, fast_lock());
    let before = report.read_table().unwrap();

    report
        .update(&Obsid::new("1090008760"), "sourcecount_MFS", "1234")
        .unwrap();

    let after = report.read_table().unwrap();
    assert_eq!(after.columns().len(), before.columns().len() + 1);
    assert_eq!(after.columns().last().unwrap(), "sourcecount_MFS");
    for record in after.records() {
        let expected = if record.obsid().as_str() == "1090008760" {
            "1234"
        } else {
            ""
        };
        assert_eq!(record.get("sourcecount_MFS"), expected);
    }
    // Nothing else changed.
    for record in before.records() {
        let new = after.get(record.obsid()).unwrap();
        for column in before.columns() {
            assert_eq!(record.get(column), new.get(column));
        }
    }
}

#[test]
fn test_new_obsids_get_new_rows() {
    let (_tmp_dir, path) = make_report(REPORT);
    let report = CsvReport::new(&path, fast_lock());
    report
        .update(&Obsid::new("1090009000"), "jobid", "55555")
        .unwrap();
    let table = report.read_table().unwrap();
    assert_eq!(table.num_rows(), 4);
    assert_eq!(table.obsids().last().unwrap().as_str(), "1090009000");
}

#[test]
fn test_concurrent_updates_are_not_lost() {
    let (_tmp_dir, path) = make_report(REPORT);
    let obsid = Obsid::new("1090008640");
    let num_workers = 20;

    thread::scope(|scope| {
        for i in 0..num_workers {
            let path = &path;
            let obsid = &obsid;
            scope.spawn(move || {
                let report = CsvReport::new(path, fast_lock()).quiet(true);
                report
                    .update(obsid, &format!("rms_{i:04}"), &i.to_string())
                    .unwrap();
            });
        }
    });

    let record = CsvReport::new(&path, fast_lock())
        .get(&obsid)
        .unwrap()
        .unwrap();
    for i in 0..num_workers {
        assert_eq!(record.get(&format!("rms_{i:04}")), i.to_string());
    }
    // The original values survived too.
    assert_eq!(record.get("calibration"), "Success");
    assert!(!lock_path(&path).exists());
}

#[test]
fn test_lock_timeout_leaves_report_alone() {
    let (_tmp_dir, path) = make_report(REPORT);
    fs::write(lock_path(&path), "1090001234").unwrap();
    let report = CsvReport::new(
        &path,
        LockConfig {
            attempts: 3,
            backoff: Duration::from_millis(1),
            stale_after: None,
        },
    );

    let err = report
        .update(&Obsid::new("1090008640"), "image", "Failed")
        .unwrap_err();
    assert!(err.is_transient());
    match err {
        ReportError::Lock(LockError::Timeout {
            holder, attempts, ..
        }) => {
            assert_eq!(holder, "1090001234");
            assert_eq!(attempts, 3);
        }
        e => panic!("expected a lock timeout, got {e:?}"),
    }
    assert_eq!(fs::read_to_string(&path).unwrap(), REPORT);
    // Somebody else's lock is untouched.
    assert_eq!(fs::read_to_string(lock_path(&path)).unwrap(), "1090001234");
}

#[test]
fn test_legacy_available_lock_is_usable() {
    let (_tmp_dir, path) = make_report(REPORT);
    fs::write(lock_path(&path), "Available").unwrap();
    let report = CsvReport::new(
        &path,
        LockConfig {
            attempts: 1,
            backoff: Duration::from_millis(1),
            stale_after: None,
        },
    );
    report
        .update(&Obsid::new("1090008640"), "image", "Failed")
        .unwrap();
    assert_eq!(report.lock().state().unwrap(), LockState::Available);
}

#[test]
fn test_stale_lock_is_broken() {
    let (_tmp_dir, path) = make_report(REPORT);
    fs::write(lock_path(&path), "1090001234").unwrap();
    thread::sleep(Duration::from_millis(50));
    let report = CsvReport::new(
        &path,
        LockConfig {
            attempts: 1,
            backoff: Duration::from_millis(1),
            stale_after: Some(Duration::from_millis(10)),
        },
    );
    report
        .update(&Obsid::new("1090008640"), "image", "Failed")
        .unwrap();
    assert!(!lock_path(&path).exists());
    // No tombstones left behind.
    let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".lock"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_late_break_spares_the_new_holder() {
    let (_tmp_dir, path) = make_report(REPORT);
    fs::write(lock_path(&path), "1090008640").unwrap();
    thread::sleep(Duration::from_millis(50));
    let config = LockConfig {
        attempts: 1,
        backoff: Duration::from_millis(1),
        stale_after: Some(Duration::from_millis(10)),
    };
    let lock = ReportLock::for_report(&path, config);

    // One worker judges the crashed lock breakable...
    let judged = lock.identify().unwrap().unwrap();
    assert!(lock.is_breakable(&judged));
    // ...but before it acts, another worker for the same observation breaks
    // it and takes the lock.
    let guard = lock.acquire(&Obsid::new("1090008640"), None).unwrap();

    assert!(!lock.break_lock(&judged).unwrap());
    assert_eq!(
        fs::read_to_string(lock_path(&path)).unwrap(),
        "1090008640"
    );
    // Nobody else gets in while the lock is held.
    let patient = ReportLock::for_report(
        &path,
        LockConfig {
            stale_after: Some(Duration::from_secs(600)),
            ..config
        },
    );
    assert!(matches!(
        patient.acquire(&Obsid::new("1090008760"), None),
        Err(LockError::Timeout { .. })
    ));

    drop(guard);
    assert!(!lock_path(&path).exists());
    assert!(!path.parent().unwrap().join(".lock.break").exists());
}

#[test]
fn test_abandoned_break_marker_is_cleared() {
    let (_tmp_dir, path) = make_report(REPORT);
    let dir = path.parent().unwrap();
    fs::write(lock_path(&path), "1090001234").unwrap();
    fs::write(dir.join(".lock.break"), "").unwrap();
    thread::sleep(Duration::from_millis(50));
    let report = CsvReport::new(
        &path,
        LockConfig {
            attempts: 1,
            backoff: Duration::from_millis(1),
            stale_after: Some(Duration::from_millis(10)),
        },
    );
    report
        .update(&Obsid::new("1090008640"), "image", "Failed")
        .unwrap();
    assert!(!lock_path(&path).exists());
    assert!(!dir.join(".lock.break").exists());
}

#[test]
fn test_clear_removes_break_marker() {
    let (_tmp_dir, path) = make_report(REPORT);
    let dir = path.parent().unwrap();
    fs::write(lock_path(&path), "1090001234").unwrap();
    fs::write(dir.join(".lock.break"), "").unwrap();
    ReportLock::for_report(&path, fast_lock()).clear().unwrap();
    assert!(!lock_path(&path).exists());
    assert!(!dir.join(".lock.break").exists());
}

#[test]
fn test_waiting_can_be_cancelled() {
    let (_tmp_dir, path) = make_report(REPORT);
    fs::write(lock_path(&path), "1090001234").unwrap();
    let (tx, rx) = bounded(1);
    let report = CsvReport::new(
        &path,
        LockConfig {
            attempts: 1000,
            backoff: Duration::from_secs(5),
            stale_after: None,
        },
    )
    .with_cancel(rx);

    let start = Instant::now();
    tx.send(()).unwrap();
    let result = report.update(&Obsid::new("1090008640"), "image", "Failed");
    assert!(matches!(
        result,
        Err(ReportError::Lock(LockError::Cancelled(_)))
    ));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_clear_lock() {
    let (_tmp_dir, path) = make_report(REPORT);
    let lock = ReportLock::for_report(&path, fast_lock());
    assert_eq!(lock.state().unwrap(), LockState::Available);
    // Clearing an available lock is fine.
    lock.clear().unwrap();

    fs::write(lock_path(&path), "1090001234").unwrap();
    assert!(matches!(
        lock.state().unwrap(),
        LockState::Held { ref holder, .. } if holder == "1090001234"
    ));
    lock.clear().unwrap();
    assert_eq!(lock.state().unwrap(), LockState::Available);
}

#[test]
fn test_guard_releases_only_its_own_lock() {
    let (_tmp_dir, path) = make_report(REPORT);
    let lock = ReportLock::for_report(&path, fast_lock());
    let guard = lock.acquire(&Obsid::new("1090008640"), None).unwrap();
    assert_eq!(guard.holder(), "1090008640");
    // An operator clears the lock and somebody else takes it.
    lock.clear().unwrap();
    fs::write(lock_path(&path), "1090001234").unwrap();
    drop(guard);
    assert_eq!(fs::read_to_string(lock_path(&path)).unwrap(), "1090001234");
}

#[test]
fn test_report_in_cwd_locks_in_cwd() {
    let lock = ReportLock::for_report(Path::new("report.csv"), LockConfig::default());
    assert_eq!(lock.path(), Path::new("./.lock"));
    assert_eq!(lock.config().attempts, 120);
    assert_eq!(lock.config().backoff, Duration::from_secs(5));
}

#[test]
fn test_start_counts_attempts() {
    let (_tmp_dir, path) = make_report(REPORT);
    let report = CsvReport::new(&path, fast_lock());

    // Empty attempts count as zero.
    let record = start(&report, &Obsid::new("1090008880"), "/scratch/new", 3).unwrap();
    assert_eq!(record.get("status"), "Queued");
    assert_eq!(record.get("attempts"), "1");
    assert_eq!(record.get("obsDir"), "/scratch/new");

    let record = start(&report, &Obsid::new("1090008640"), "/scratch/obs", 3).unwrap();
    assert_eq!(record.get("attempts"), "2");
    assert_eq!(record.get("status"), "Queued");
    // Other fields are untouched.
    assert_eq!(record.get("calibration"), "Success");

    // A brand new observation.
    let record = start(&report, &Obsid::new("1090009000"), "/scratch/obs", 3).unwrap();
    assert_eq!(record.get("attempts"), "1");
    assert!(report.read_table().unwrap().contains(&Obsid::new("1090009000")));
}

#[test]
fn test_start_fails_after_too_many_attempts() {
    let (_tmp_dir, path) = make_report(REPORT);
    let report = CsvReport::new(&path, fast_lock());
    let record = start(&report, &Obsid::new("1090008760"), "/scratch/obs", 3).unwrap();
    assert_eq!(record.get("attempts"), "4");
    assert_eq!(record.get("status"), "Failed");
}

#[test]
fn test_start_rejects_garbage_attempts() {
    let (_tmp_dir, path) = make_report("obsid,attempts\n1090008640,lots\n");
    let report = CsvReport::new(&path, fast_lock());
    let result = start(&report, &Obsid::new("1090008640"), "/scratch/obs", 3);
    assert!(matches!(result, Err(ReportError::NotAnInteger { .. })));
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "obsid,attempts\n1090008640,lots\n"
    );
    assert!(!lock_path(&path).exists());
}

#[cfg(unix)]
#[test]
fn test_start_only_unprocessed() {
    let (tmp_dir, path) = make_report(REPORT);
    let report = CsvReport::new(&path, fast_lock());
    let obs_dir = tmp_dir.path().join("obs");
    fs::create_dir(&obs_dir).unwrap();
    let data = tmp_dir.path().join("asvo");
    fs::create_dir(&data).unwrap();
    std::os::unix::fs::symlink(&data, obs_dir.join("1090008880")).unwrap();
    fs::create_dir(obs_dir.join("1090008640")).unwrap();
    let obs_dir = obs_dir.display().to_string();

    let started = start_if_unprocessed(&report, &Obsid::new("1090008880"), &obs_dir, 3).unwrap();
    assert!(started.is_some());

    let before = fs::read_to_string(&path).unwrap();
    let started = start_if_unprocessed(&report, &Obsid::new("1090008640"), &obs_dir, 3).unwrap();
    assert!(started.is_none());
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn test_create() {
    let tmp_dir = TempDir::new().unwrap();
    let path = tmp_dir.path().join("report.csv");
    let report = CsvReport::new(&path, fast_lock());
    report.create(default_report_columns(), false).unwrap();

    let table = report.read_table().unwrap();
    assert_eq!(table.num_rows(), 0);
    assert_eq!(table.columns()[0], "generateCalibration");
    assert!(table.columns().iter().any(|c| c == "postImage_MFS"));
    assert!(table.columns().iter().any(|c| c == "rms_0003"));
    assert_eq!(table.columns().last().unwrap(), "obsDir");
    // Every default column is in the known vocabulary.
    for column in table.columns() {
        assert!(column.parse::<ReportField>().is_ok(), "{column}");
    }

    assert!(matches!(
        report.create(default_report_columns(), false),
        Err(ReportError::AlreadyExists(_))
    ));
    report.create(["status"], true).unwrap();
    assert_eq!(report.read_table().unwrap().columns(), ["status"]);
}

#[test]
fn test_select_queue() {
    let contents = indoc! {"
        obsid,jobid,status,attempts
        1000000001,11,Queued,1
        1000000002,,Queued,
        1000000003,13,Success,1
        1000000004,14,Failed,3
        1000000005,15,Missing Data,2
        1000000006,16,Queued,3
        1000000007,17,,
        1000000008,18,Initiated,0
    "};
    let (_tmp_dir, path) = make_report(contents);
    let table = ReportTable::read(&path).unwrap();

    let queue: Vec<String> = select_queue(&table, 120, 3)
        .into_iter()
        .map(|o| o.to_string())
        .collect();
    assert_eq!(queue, ["1000000001", "1000000005", "1000000007", "1000000008"]);

    let queue = select_queue(&table, 2, 3);
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[1].as_str(), "1000000005");
}

#[test]
fn test_successful() {
    let contents = indoc! {"
        obsid,calibration,image,obsDir
        1000000001,Success,Success,/a
        1000000002,Success,Failed,/b
        1000000003,Success,Success,/c
    "};
    let (_tmp_dir, path) = make_report(contents);
    let table = ReportTable::read(&path).unwrap();
    let stages = ["calibration".to_string(), "image".to_string()];
    let good = successful(&table, &stages);
    assert_eq!(
        good,
        [
            (Obsid::new("1000000001"), "/a".to_string()),
            (Obsid::new("1000000003"), "/c".to_string())
        ]
    );
}

#[test]
fn test_verify() {
    let tmp_dir = TempDir::new().unwrap();
    let obs_dir = tmp_dir.path().join("obs");
    let path = tmp_dir.path().join("report.csv");
    let obs_dir_str = obs_dir.display().to_string();
    fs::write(
        &path,
        format!(
            "obsid,image,status,obsDir\n\
             1000000001,Success,Queued,{obs_dir_str}\n\
             1000000002,Success,,{obs_dir_str}\n\
             1000000003,Failed,Queued,{obs_dir_str}\n"
        ),
    )
    .unwrap();
    // Only the first observation has all of its products.
    for (obsid, subs) in [
        ("1000000001", &["0000", "MFS"][..]),
        ("1000000002", &["0000"][..]),
    ] {
        let dir = obs_dir.join(obsid);
        fs::create_dir_all(&dir).unwrap();
        for sub in subs {
            fs::write(dir.join(format!("{obsid}_deep-{sub}-image-pb_warp.fits")), "").unwrap();
        }
    }

    let report = CsvReport::new(&path, fast_lock()).quiet(true);
    let subs = [SubChannel::Index(0), SubChannel::Mfs];
    let summary = verify(
        &report,
        &["image".to_string()],
        &default_verify_products(),
        Some(&subs),
    )
    .unwrap();
    assert_eq!(summary.succeeded, [Obsid::new("1000000001")]);
    assert_eq!(summary.missing, [Obsid::new("1000000002")]);

    let table = report.read_table().unwrap();
    let status = |o: &str| table.get(&Obsid::new(o)).unwrap().get("status").to_string();
    assert_eq!(status("1000000001"), "Success");
    assert_eq!(status("1000000002"), "Missing Data");
    assert_eq!(status("1000000003"), "Queued");
}
