// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! NMEA recommended-minimum (`$GPRMC`) sentence handling.
//!
//! Velodyne position packets embed the last sentence received from the
//! attached GNSS receiver. Only the receiver status, UTC time and UTC date
//! are used: together they give the absolute start of the current UTC hour,
//! which anchors the sensor's time-of-hour counter.

use chrono::NaiveDate;

use crate::lidar::Error;

/// Seconds per hour.
pub const SECS_PER_HOUR: i64 = 3600;

const FIELD_STATUS: usize = 2;
const FIELD_TIME: usize = 1;
const FIELD_DATE: usize = 9;

/// Receiver status flag (field 2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixStatus {
    /// `A`: the receiver has a valid fix and time.
    Active,
    /// Anything else (normally `V`, void).
    Void,
}

/// The parts of a `$GPRMC` sentence needed for time referencing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rmc {
    pub status: FixStatus,
    /// UTC hour of day, `0..24`.
    pub hour: u32,
    pub date: NaiveDate,
}

impl Rmc {
    /// Seconds since the UNIX epoch of the start of the sentence's UTC hour.
    pub fn hour_epoch(&self) -> i64 {
        let midnight = self.date.and_time(chrono::NaiveTime::MIN).and_utc();
        midnight.timestamp() + self.hour as i64 * SECS_PER_HOUR
    }
}

/// Split a raw sentence into comma-separated fields.
///
/// The sentence is cut at its terminator (`\r`, `\n` or NUL padding) and the
/// `*hh` checksum suffix is removed.
pub fn fields(sentence: &str) -> Vec<&str> {
    let line = sentence
        .split(['\r', '\n', '\0'])
        .next()
        .unwrap_or_default();
    let body = match line.find('*') {
        Some(idx) => &line[..idx],
        None => line,
    };
    body.split(',').collect()
}

/// Parse a `$GPRMC` sentence.
///
/// A sentence must carry 13 or 14 fields. Void sentences are returned with
/// [`FixStatus::Void`] and are not checked beyond the field count, since
/// receivers leave time and date empty before acquiring a fix.
pub fn parse_rmc(sentence: &str) -> Result<Rmc, Error> {
    let fields = fields(sentence);
    if fields.len() != 13 && fields.len() != 14 {
        return Err(Error::Parse(format!(
            "expected 13 or 14 fields, got {}",
            fields.len()
        )));
    }

    let status = match fields[FIELD_STATUS] {
        "A" => FixStatus::Active,
        _ => FixStatus::Void,
    };
    if status == FixStatus::Void {
        return Ok(Rmc {
            status,
            hour: 0,
            date: NaiveDate::MIN,
        });
    }

    let hour = parse_hour(fields[FIELD_TIME])?;
    let date = parse_date(fields[FIELD_DATE])?;

    Ok(Rmc { status, hour, date })
}

/// Hour from an `hhmmss[.sss]` field.
fn parse_hour(field: &str) -> Result<u32, Error> {
    let hour = field
        .get(0..2)
        .and_then(|hh| hh.parse::<u32>().ok())
        .filter(|hh| *hh < 24);
    hour.ok_or_else(|| Error::Parse(format!("invalid UTC time field {:?}", field)))
}

/// Date from a `ddmmyy` field; two-digit years are in the 2000s.
fn parse_date(field: &str) -> Result<NaiveDate, Error> {
    let invalid = || Error::Parse(format!("invalid UTC date field {:?}", field));
    if field.len() != 6 || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let day = field[0..2].parse::<u32>().map_err(|_| invalid())?;
    let month = field[2..4].parse::<u32>().map_err(|_| invalid())?;
    let year = field[4..6].parse::<i32>().map_err(|_| invalid())? + 2000;

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}
