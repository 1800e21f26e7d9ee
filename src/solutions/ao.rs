// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to read and write "André Offringa style" calibration solutions.
//!
//! The layout is a 48-byte header (the magic "MWAOCAL", nine zero bytes, four
//! little-endian u32 dimensions and two f64 GPS times) followed by the gains
//! as little-endian f64 (re, im) pairs, ordered timeblock, antenna, channel,
//! polarisation.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use hifitime::Epoch;
use ndarray::prelude::*;
use num_complex::Complex;

use super::{error::*, CalibrationSolutions, NUM_POLARISATIONS};

const MAGIC: &[u8; 7] = b"MWAOCAL";
const HEADER_LEN: u64 = 48;

pub(crate) fn read(file: &Path) -> Result<CalibrationSolutions, SolutionsReadError> {
    let file_str = file.display().to_string();
    let file_len = std::fs::metadata(file)?.len();
    let mut bin_file = BufReader::new(File::open(file)?);
    // The first 7 bytes should be ASCII "MWAOCAL".
    let mut magic = [0; 7];
    for byte in magic.iter_mut() {
        *byte = bin_file.read_u8()?;
    }
    if &magic != MAGIC {
        return Err(SolutionsReadError::AndreBinaryStr {
            file: file_str,
            got: String::from_utf8_lossy(&magic).into_owned(),
        });
    }
    for _ in 0..9 {
        match bin_file.read_u8()? {
            0 => (),
            v => {
                return Err(SolutionsReadError::AndreBinaryVal {
                    file: file_str,
                    expected: "0",
                    got: v.to_string(),
                })
            }
        }
    }
    let num_timeblocks = bin_file.read_u32::<LittleEndian>()? as usize;
    let num_antennas = bin_file.read_u32::<LittleEndian>()? as usize;
    let num_channels = bin_file.read_u32::<LittleEndian>()? as usize;
    let num_polarisations = bin_file.read_u32::<LittleEndian>()? as usize;
    if num_polarisations != NUM_POLARISATIONS {
        return Err(SolutionsReadError::AndreBinaryVal {
            file: file_str,
            expected: "4 (polarisations)",
            got: num_polarisations.to_string(),
        });
    }
    // If the start time (read in here as `t`) is 0, then we don't really have a
    // start time!
    let t = bin_file.read_f64::<LittleEndian>()?;
    let start_timestamp = if t.abs() < f64::EPSILON {
        None
    } else {
        Some(Epoch::from_gpst_seconds(t))
    };
    // And similarly for the end time.
    let t = bin_file.read_f64::<LittleEndian>()?;
    let end_timestamp = if t.abs() < f64::EPSILON {
        None
    } else {
        Some(Epoch::from_gpst_seconds(t))
    };

    // Check the size before allocating anything; a corrupt header could ask
    // for absurd amounts of memory.
    let expected = [num_timeblocks, num_antennas, num_channels, 2 * num_polarisations, 8]
        .into_iter()
        .try_fold(1u64, |acc, n| acc.checked_mul(n as u64))
        .and_then(|n| n.checked_add(HEADER_LEN));
    if expected != Some(file_len) {
        return Err(SolutionsReadError::BadShape {
            file: file_str,
            expected: expected.unwrap_or(u64::MAX),
            actual: file_len,
        });
    }

    // The rest of the binary is only gains.
    let mut floats = vec![0.0; num_timeblocks * num_antennas * num_channels * 2 * num_polarisations];
    bin_file.read_f64_into::<LittleEndian>(&mut floats)?;
    let gains = floats
        .chunks_exact(2)
        .map(|pair| Complex::new(pair[0], pair[1]))
        .collect::<Vec<_>>();
    let gains = Array4::from_shape_vec(
        (num_timeblocks, num_antennas, num_channels, num_polarisations),
        gains,
    )
    .map_err(|_| SolutionsReadError::BadShape {
        file: file.display().to_string(),
        expected: expected.unwrap_or(u64::MAX),
        actual: file_len,
    })?;

    Ok(CalibrationSolutions {
        gains,
        start_timestamp,
        end_timestamp,
    })
}

/// Write a "André-Offringa calibrate format" calibration solutions binary file.
pub(crate) fn write(sols: &CalibrationSolutions, file: &Path) -> Result<(), SolutionsWriteError> {
    let (num_timeblocks, num_antennas, num_channels, num_polarisations) = sols.gains.dim();
    if num_polarisations != NUM_POLARISATIONS {
        return Err(SolutionsWriteError::BadPolarisations(num_polarisations));
    }

    let mut bin_file = BufWriter::new(File::create(file)?);
    bin_file.write_all(MAGIC)?;
    bin_file.write_u8(0)?;
    bin_file.write_u32::<LittleEndian>(0)?;
    bin_file.write_u32::<LittleEndian>(0)?;
    bin_file.write_u32::<LittleEndian>(num_timeblocks as _)?;
    bin_file.write_u32::<LittleEndian>(num_antennas as _)?;
    bin_file.write_u32::<LittleEndian>(num_channels as _)?;
    bin_file.write_u32::<LittleEndian>(num_polarisations as _)?;
    // Zero means "unknown".
    bin_file.write_f64::<LittleEndian>(
        sols.start_timestamp
            .map(|e| e.to_gpst_seconds())
            .unwrap_or(0.0),
    )?;
    bin_file.write_f64::<LittleEndian>(
        sols.end_timestamp.map(|e| e.to_gpst_seconds()).unwrap_or(0.0),
    )?;

    // 2 floats, 8 bytes per float.
    let mut buf = [0; 2 * 8];
    for g in sols.gains.iter() {
        LittleEndian::write_f64_into(&[g.re, g.im], &mut buf);
        bin_file.write_all(&buf)?;
    }
    bin_file.flush()?;
    Ok(())
}
