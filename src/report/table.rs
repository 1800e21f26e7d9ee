// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The in-memory form of a report: one row per observation, one column per
//! field, every cell text.

use std::{
    collections::HashMap,
    fs,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use indexmap::IndexMap;
use log::trace;

use super::{Obsid, ReportError};
use crate::constants::OBSID_COLUMN;

/// The fields of one observation. Fields that the report doesn't have read as
/// empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObsRecord {
    obsid: Obsid,
    fields: IndexMap<String, String>,
}

impl ObsRecord {
    pub fn new(obsid: Obsid) -> ObsRecord {
        ObsRecord {
            obsid,
            fields: IndexMap::new(),
        }
    }

    pub fn obsid(&self) -> &Obsid {
        &self.obsid
    }

    pub fn get(&self, field: &str) -> &str {
        self.fields.get(field).map(|s| s.as_str()).unwrap_or("")
    }

    pub fn set<F: ToString, V: ToString>(&mut self, field: F, value: V) {
        self.fields.insert(field.to_string(), value.to_string());
    }

    /// All fields with a value.
    pub fn non_empty(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTable {
    /// The name of the key column as it appears in the file.
    key_column: String,

    /// The names of all other columns, in file order.
    columns: Vec<String>,

    /// Cells of each row; every row is as long as `columns`.
    rows: IndexMap<Obsid, Vec<String>>,
}

impl Default for ReportTable {
    fn default() -> Self {
        ReportTable::new(std::iter::empty::<&str>())
    }
}

impl ReportTable {
    /// A table without any rows.
    pub fn new<I, S>(columns: I) -> ReportTable
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        ReportTable {
            key_column: OBSID_COLUMN.to_string(),
            columns: columns.into_iter().map(|c| c.to_string()).collect(),
            rows: IndexMap::new(),
        }
    }

    pub fn read(file: &Path) -> Result<ReportTable, ReportError> {
        let file_str = file.display().to_string();
        let read_err = |err| ReportError::Read {
            file: file_str.clone(),
            err,
        };
        trace!("Reading report {file_str}");

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(file)
            .map_err(read_err)?;
        let header = reader.headers().map_err(read_err)?.clone();
        let mut header_iter = header.iter();
        let key_column = header_iter.next().unwrap_or_default();
        if key_column != OBSID_COLUMN {
            return Err(ReportError::MissingKeyColumn {
                file: file_str.clone(),
                expected: OBSID_COLUMN,
                got: key_column.to_string(),
            });
        }
        let mut table = ReportTable::new(header_iter);
        let num_columns = table.columns.len();

        // Rows that can't be kept are errors; rewriting the table would
        // otherwise lose them.
        let mut first_lines: HashMap<Obsid, u64> = HashMap::new();
        for record in reader.records() {
            let record = record.map_err(read_err)?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let mut cells = record.iter();
            let key = cells.next().unwrap_or_default();
            let mut row: Vec<String> = cells.map(|c| c.to_string()).collect();
            if key.trim().is_empty() {
                if row.iter().all(|c| c.is_empty()) {
                    trace!("Skipping empty line {line}");
                    continue;
                }
                return Err(ReportError::MissingObsid {
                    file: file_str.clone(),
                    line,
                });
            }
            if row.len() > num_columns {
                return Err(ReportError::RowTooLong {
                    file: file_str.clone(),
                    line,
                    num_cells: row.len() + 1,
                    num_columns: num_columns + 1,
                });
            }
            row.resize(num_columns, String::new());

            let obsid = Obsid::new(key);
            if let Some(&first_line) = first_lines.get(&obsid) {
                return Err(ReportError::DuplicateObsid {
                    file: file_str.clone(),
                    line,
                    first_line,
                    obsid: obsid.to_string(),
                });
            }
            first_lines.insert(obsid.clone(), line);
            table.rows.insert(obsid, row);
        }

        Ok(table)
    }

    /// Write the table. The file is replaced atomically, so concurrent
    /// readers never see a partially written report.
    pub fn write(&self, file: &Path) -> Result<(), ReportError> {
        let file_str = file.display().to_string();
        let write_err = |err| ReportError::Write {
            file: file_str.clone(),
            err,
        };
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("report.csv");
        let tmp = file.with_file_name(format!(".{name}.tmp.{}.{nanos}", std::process::id()));

        // Don't leave temporary files behind on failure.
        let tmp_guard = scopeguard::guard(tmp, |tmp| {
            let _ = fs::remove_file(tmp);
        });
        {
            let mut writer = csv::Writer::from_path(&*tmp_guard).map_err(write_err)?;
            writer
                .write_record(std::iter::once(&self.key_column).chain(self.columns.iter()))
                .map_err(write_err)?;
            for (obsid, row) in &self.rows {
                writer
                    .write_record(std::iter::once(obsid.as_str()).chain(row.iter().map(|s| s.as_str())))
                    .map_err(write_err)?;
            }
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|e| ReportError::IO(e.into_error()))?
                .sync_all()?;
        }
        fs::rename(&*tmp_guard, file)?;
        // The temporary file is now the report; nothing to clean up.
        let _ = scopeguard::ScopeGuard::into_inner(tmp_guard);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn contains(&self, obsid: &Obsid) -> bool {
        self.rows.contains_key(obsid)
    }

    pub fn obsids(&self) -> impl Iterator<Item = &Obsid> {
        self.rows.keys()
    }

    fn record_from_row(&self, obsid: &Obsid, row: &[String]) -> ObsRecord {
        ObsRecord {
            obsid: obsid.clone(),
            fields: self
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect(),
        }
    }

    pub fn get(&self, obsid: &Obsid) -> Option<ObsRecord> {
        self.rows
            .get(obsid)
            .map(|row| self.record_from_row(obsid, row))
    }

    pub fn records(&self) -> impl Iterator<Item = ObsRecord> + '_ {
        self.rows
            .iter()
            .map(|(obsid, row)| self.record_from_row(obsid, row))
    }

    /// Get the index of a column, appending it (empty for every row) if the
    /// table doesn't have it yet.
    fn ensure_column(&mut self, field: &str) -> usize {
        match self.columns.iter().position(|c| c == field) {
            Some(i) => i,
            None => {
                self.columns.push(field.to_string());
                for row in self.rows.values_mut() {
                    row.push(String::new());
                }
                self.columns.len() - 1
            }
        }
    }

    /// Set one cell, creating the row and column as needed.
    pub fn set(&mut self, obsid: &Obsid, field: &str, value: &str) {
        let i_col = self.ensure_column(field);
        let num_columns = self.columns.len();
        let row = self
            .rows
            .entry(obsid.clone())
            .or_insert_with(|| vec![String::new(); num_columns]);
        row[i_col] = value.to_string();
    }

    /// Write every field of `record` into the table. Fields the record doesn't
    /// mention are left untouched.
    pub fn merge(&mut self, record: &ObsRecord) {
        if !self.rows.contains_key(&record.obsid) {
            let num_columns = self.columns.len();
            self.rows
                .insert(record.obsid.clone(), vec![String::new(); num_columns]);
        }
        for (field, value) in &record.fields {
            self.set(&record.obsid, field, value);
        }
    }
}
