// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Common LiDAR types shared by the decoder, trajectory and map builder.
//!
//! This module provides the point and timestamp types that flow through the
//! pipeline together with the crate-wide [`Error`] type.

use std::fmt;

use crate::velodyne::{ReturnMode, SensorModel};

/// Nanoseconds per second.
pub const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Absolute timestamp: seconds since the UNIX epoch plus a nanosecond
/// remainder.
///
/// The remainder is always normalized to `0..1_000_000_000`, which makes the
/// derived field-wise ordering a correct chronological ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Stamp {
    pub sec: i64,
    pub nanosec: u32,
}

impl Stamp {
    /// Create a stamp, carrying any excess nanoseconds into the seconds.
    pub fn new(sec: i64, nanosec: u32) -> Self {
        Self::from_nanos(sec as i128 * NANOS_PER_SEC + nanosec as i128)
    }

    /// Create a stamp from a total nanosecond count since the epoch.
    pub fn from_nanos(nanos: i128) -> Self {
        Self {
            sec: nanos.div_euclid(NANOS_PER_SEC) as i64,
            nanosec: nanos.rem_euclid(NANOS_PER_SEC) as u32,
        }
    }

    /// Total nanoseconds since the epoch.
    #[inline]
    pub fn as_nanos(&self) -> i128 {
        self.sec as i128 * NANOS_PER_SEC + self.nanosec as i128
    }

    /// Seconds since the epoch as a float.
    ///
    /// Loses precision below ~100ns at present-day epochs; use
    /// [`Self::as_nanos`] for differences.
    #[inline]
    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.nanosec as f64 * 1e-9
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nanosec)
    }
}

/// A single timestamped LiDAR return.
///
/// The same type carries points in the sensor frame (as produced by the
/// decoder) and in the map frame (after [`crate::transform`]).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: u8,
    pub stamp: Stamp,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64, intensity: u8, stamp: Stamp) -> Self {
        Self {
            x,
            y,
            z,
            intensity,
            stamp,
        }
    }

    /// Distance from the frame origin.
    #[inline]
    pub fn range(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Common error type for capture decoding and map building.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (capture or trajectory file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Capture file could not be parsed as pcap/pcapng
    #[error("invalid capture: {0}")]
    InvalidCapture(String),
    /// Malformed NMEA sentence in a position packet
    #[error("malformed position sentence: {0}")]
    Parse(String),
    /// Factory byte does not name a known return mode
    #[error("unknown return mode byte: {0:#04x}")]
    UnknownReturnMode(u8),
    /// Factory byte does not name a known sensor model
    #[error("unknown product id byte: {0:#04x}")]
    UnknownProductId(u8),
    /// Return mode is known but not decodable
    #[error("unsupported return mode: {0}")]
    UnsupportedReturnMode(ReturnMode),
    /// Sensor model is known but has no 32-channel geometry table
    #[error("unsupported sensor model: {0}")]
    UnsupportedModel(SensorModel),
    /// Model or return mode changed after the stream locked onto one
    #[error("sensor changed mid-stream: locked {locked_model}/{locked_mode}, got {model}/{mode}")]
    HardwareChanged {
        locked_model: SensorModel,
        locked_mode: ReturnMode,
        model: SensorModel,
        mode: ReturnMode,
    },
    /// Trajectory query outside the loaded time span
    #[error("timestamp {stamp} outside trajectory span [{first}, {last}]")]
    LookupRange {
        stamp: Stamp,
        first: Stamp,
        last: Stamp,
    },
    /// Trajectory has no poses to answer queries with
    #[error("trajectory is empty")]
    EmptyTrajectory,
    /// Requested capture index range exceeds the available file list
    #[error("capture range {start}..{end} outside available {available} files")]
    IndexRange {
        start: usize,
        end: usize,
        available: usize,
    },
    /// Trajectory table could not be read
    #[error("trajectory error: {0}")]
    Trajectory(String),
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for the unknown/unsupported/changed hardware family of errors.
    pub fn is_unsupported_hardware(&self) -> bool {
        matches!(
            self,
            Error::UnknownReturnMode(_)
                | Error::UnknownProductId(_)
                | Error::UnsupportedReturnMode(_)
                | Error::UnsupportedModel(_)
                | Error::HardwareChanged { .. }
        )
    }

    /// True for trajectory and capture-index range errors.
    pub fn is_lookup_range(&self) -> bool {
        matches!(
            self,
            Error::LookupRange { .. } | Error::EmptyTrajectory | Error::IndexRange { .. }
        )
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Trajectory(err.to_string())
    }
}
