// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Velodyne VLP/HDL packet decoder.
//!
//! Velodyne sensors emit two UDP streams which are recorded together in a
//! capture file:
//!
//! # Packet Structure
//!
//! ## Data packet - 1206 bytes, port 2368
//! - 12 blocks × 100 bytes
//!   - Flag: 2 bytes (`0xFF 0xEE`)
//!   - Azimuth: 2 bytes LE, hundredths of a degree
//!   - 32 channels × 3 bytes: range (2 bytes LE, 2mm units) and reflectivity
//! - Time of hour: 4 bytes LE, microseconds since the top of the UTC hour
//! - Factory bytes: return mode, product id
//!
//! ## Position packet - 512 bytes, port 8308
//! - NMEA `$GPRMC` sentence at byte 206 (up to 72 bytes, NUL padded)
//!
//! Decoding is stateful: the position packet anchors the time-of-hour counter
//! to an absolute hour, and the angular velocity used to extrapolate each
//! channel's azimuth is estimated from consecutive data packets. All of that
//! state lives in a [`DecoderState`] owned by the caller, one per independent
//! recording.

use std::{borrow::Cow, fmt};

use tracing::{debug, trace};

use crate::{
    lidar::{Error, NANOS_PER_SEC, Point, Stamp},
    nmea::{self, FixStatus, SECS_PER_HOUR},
};

/// Position packet UDP payload size in bytes
pub const POSITION_PACKET_SIZE: usize = 512;

/// Data packet UDP payload size in bytes
pub const DATA_PACKET_SIZE: usize = 1206;

/// Number of azimuth blocks per data packet
pub const BLOCKS_PER_PACKET: usize = 12;

/// Number of channels per azimuth block
pub const CHANNELS_PER_BLOCK: usize = 32;

/// Points carried by a single data packet
pub const POINTS_PER_PACKET: usize = BLOCKS_PER_PACKET * CHANNELS_PER_BLOCK;

/// Size of each azimuth block in bytes
pub const BLOCK_SIZE: usize = 100;

/// Size of each channel record in bytes
const CHANNEL_SIZE: usize = 3;

/// Block header (flag + azimuth) size in bytes
const BLOCK_HEADER_SIZE: usize = 4;

/// Block start flag: 0xFF, 0xEE
pub const BLOCK_FLAG: [u8; 2] = [0xff, 0xee];

/// Data packet byte offsets of the trailing fields
pub const TIMESTAMP_OFFSET: usize = 1200;
pub const RETURN_MODE_OFFSET: usize = 1204;
pub const PRODUCT_ID_OFFSET: usize = 1205;

/// Position packet NMEA sentence location
pub const NMEA_OFFSET: usize = 206;
pub const NMEA_SIZE: usize = 72;

/// Range resolution in meters (2mm)
const DISTANCE_RESOLUTION: f64 = 0.002;

/// Microseconds in one hour, the time-of-hour rollover period
pub const MICROS_PER_HOUR: u32 = 3_600_000_000;

/// Laser firing interval within a firing group, in nanoseconds (2.304µs)
const FIRING_INTERVAL_NS: u32 = 2_304;

/// Additional delay of the second firing group, in nanoseconds (18.432µs)
const SECOND_GROUP_DELAY_NS: u32 = 18_432;

/// Return mode, factory byte 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReturnMode {
    Strongest = 0x37,
    LastReturn = 0x38,
    DualReturn = 0x39,
    DualReturnConfidence = 0x3b,
}

impl ReturnMode {
    /// Only single-return modes carry one point per channel per block.
    pub fn is_supported(&self) -> bool {
        matches!(self, ReturnMode::Strongest | ReturnMode::LastReturn)
    }
}

impl TryFrom<u8> for ReturnMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x37 => Ok(ReturnMode::Strongest),
            0x38 => Ok(ReturnMode::LastReturn),
            0x39 => Ok(ReturnMode::DualReturn),
            0x3b => Ok(ReturnMode::DualReturnConfidence),
            _ => Err(Error::UnknownReturnMode(value)),
        }
    }
}

impl fmt::Display for ReturnMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReturnMode::Strongest => write!(f, "strongest"),
            ReturnMode::LastReturn => write!(f, "last"),
            ReturnMode::DualReturn => write!(f, "dual"),
            ReturnMode::DualReturnConfidence => write!(f, "dual+confidence"),
        }
    }
}

/// Sensor model, factory byte 2 (product id).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SensorModel {
    Hdl32e = 0x21,
    /// VLP-16 and Puck LITE share a product id
    Vlp16 = 0x22,
    PuckHiRes = 0x24,
    Vlp32c = 0x28,
    Velarray = 0x31,
    Vls128 = 0xa1,
}

impl SensorModel {
    /// Vertical angle of each of the 32 channels in a block, in degrees.
    ///
    /// 16-laser sensors report two firing sequences per block, so their table
    /// repeats. Returns `None` for sensors whose blocks do not map onto 32
    /// fixed channels.
    pub fn vertical_angles(&self) -> Option<&'static [f64; CHANNELS_PER_BLOCK]> {
        match self {
            SensorModel::Hdl32e => Some(&HDL32E_VERTICAL),
            SensorModel::Vlp16 => Some(&VLP16_VERTICAL),
            SensorModel::PuckHiRes => Some(&PUCK_HIRES_VERTICAL),
            SensorModel::Vlp32c => Some(&VLP32C_VERTICAL),
            SensorModel::Velarray | SensorModel::Vls128 => None,
        }
    }
}

impl TryFrom<u8> for SensorModel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x21 => Ok(SensorModel::Hdl32e),
            0x22 => Ok(SensorModel::Vlp16),
            0x24 => Ok(SensorModel::PuckHiRes),
            0x28 => Ok(SensorModel::Vlp32c),
            0x31 => Ok(SensorModel::Velarray),
            0xa1 => Ok(SensorModel::Vls128),
            _ => Err(Error::UnknownProductId(value)),
        }
    }
}

impl fmt::Display for SensorModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SensorModel::Hdl32e => write!(f, "HDL-32E"),
            SensorModel::Vlp16 => write!(f, "VLP-16"),
            SensorModel::PuckHiRes => write!(f, "Puck Hi-Res"),
            SensorModel::Vlp32c => write!(f, "VLP-32C"),
            SensorModel::Velarray => write!(f, "Velarray"),
            SensorModel::Vls128 => write!(f, "VLS-128"),
        }
    }
}

#[rustfmt::skip]
const VLP16_VERTICAL: [f64; CHANNELS_PER_BLOCK] = [
    -15.0, 1.0, -13.0, 3.0, -11.0, 5.0, -9.0, 7.0,
    -7.0, 9.0, -5.0, 11.0, -3.0, 13.0, -1.0, 15.0,
    -15.0, 1.0, -13.0, 3.0, -11.0, 5.0, -9.0, 7.0,
    -7.0, 9.0, -5.0, 11.0, -3.0, 13.0, -1.0, 15.0,
];

#[rustfmt::skip]
const PUCK_HIRES_VERTICAL: [f64; CHANNELS_PER_BLOCK] = [
    -10.0, 0.67, -8.67, 2.0, -7.33, 3.33, -6.0, 4.67,
    -4.67, 6.0, -3.33, 7.33, -2.0, 8.67, -0.67, 10.0,
    -10.0, 0.67, -8.67, 2.0, -7.33, 3.33, -6.0, 4.67,
    -4.67, 6.0, -3.33, 7.33, -2.0, 8.67, -0.67, 10.0,
];

#[rustfmt::skip]
const VLP32C_VERTICAL: [f64; CHANNELS_PER_BLOCK] = [
    -25.0, -1.0, -1.667, -15.639, -11.31, 0.0, -0.667, -8.843,
    -7.254, 0.333, -0.333, -6.148, -5.333, 1.333, 0.667, -4.0,
    -4.667, 1.667, 1.0, -3.667, -3.333, 3.333, 2.333, -2.667,
    -3.0, 7.0, 4.667, -2.333, -2.0, 15.0, 10.333, -1.333,
];

#[rustfmt::skip]
const HDL32E_VERTICAL: [f64; CHANNELS_PER_BLOCK] = [
    -30.67, -9.33, -29.33, -8.0, -28.0, -6.67, -26.67, -5.33,
    -25.33, -4.0, -24.0, -2.67, -22.67, -1.33, -21.33, 0.0,
    -20.0, 1.33, -18.67, 2.67, -17.33, 4.0, -16.0, 5.33,
    -14.67, 6.67, -13.33, 8.0, -12.0, 9.33, -10.67, 10.67,
];

/// Firing time of `channel` relative to the start of its block, in
/// nanoseconds.
///
/// Channels 0-15 form the first firing group; channels 16-31 fire after an
/// additional 18.432µs.
#[inline]
pub fn firing_offset_ns(channel: usize) -> u32 {
    let offset = FIRING_INTERVAL_NS * channel as u32;
    if channel < CHANNELS_PER_BLOCK / 2 {
        offset
    } else {
        SECOND_GROUP_DELAY_NS + offset
    }
}

/// Firing time of `channel` relative to the start of its block, in
/// microseconds.
#[inline]
pub fn firing_offset_us(channel: usize) -> f64 {
    firing_offset_ns(channel) as f64 / 1000.0
}

/// Azimuth travelled between two readings, in degrees.
///
/// Azimuth only increases, so a smaller reading means the scan crossed 0°.
#[inline]
pub fn azimuth_delta(last_deg: f64, current_deg: f64) -> f64 {
    let delta = current_deg - last_deg;
    if delta < 0.0 { delta + 360.0 } else { delta }
}

/// Time elapsed between two time-of-hour readings, in microseconds.
///
/// Returns the unwrapped difference and whether the counter rolled over into
/// the next hour.
#[inline]
pub fn time_of_hour_delta(last_us: u32, current_us: u32) -> (u32, bool) {
    if current_us < last_us {
        (MICROS_PER_HOUR.saturating_sub(last_us) + current_us, true)
    } else {
        (current_us - last_us, false)
    }
}

/// Interpretation of a captured payload, selected by its length alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketKind {
    Position,
    Data,
    /// Any other traffic present in the capture
    Foreign,
}

/// Classify a UDP payload by length.
#[inline]
pub fn classify(data: &[u8]) -> PacketKind {
    match data.len() {
        POSITION_PACKET_SIZE => PacketKind::Position,
        DATA_PACKET_SIZE => PacketKind::Data,
        _ => PacketKind::Foreign,
    }
}

/// Zero-copy view of a data packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DataPacketSlice<'a> {
    slice: &'a [u8],
}

impl<'a> DataPacketSlice<'a> {
    pub fn from_slice(slice: &'a [u8]) -> Result<DataPacketSlice<'a>, Error> {
        if slice.len() != DATA_PACKET_SIZE {
            return Err(Error::InvalidCapture(format!(
                "data packet is {} bytes, expected {}",
                slice.len(),
                DATA_PACKET_SIZE
            )));
        }

        Ok(DataPacketSlice { slice })
    }

    #[inline]
    fn block(&self, block: usize) -> &'a [u8] {
        let start = block * BLOCK_SIZE;
        &self.slice[start..start + BLOCK_SIZE]
    }

    pub fn block_flag(&self, block: usize) -> [u8; 2] {
        let b = self.block(block);
        [b[0], b[1]]
    }

    /// Raw block azimuth in hundredths of a degree.
    pub fn azimuth_raw(&self, block: usize) -> u16 {
        let b = self.block(block);
        u16::from_le_bytes([b[2], b[3]])
    }

    /// Block azimuth in degrees.
    #[inline]
    pub fn azimuth(&self, block: usize) -> f64 {
        self.azimuth_raw(block) as f64 / 100.0
    }

    /// Raw range (2mm units) and reflectivity of a channel.
    #[inline]
    pub fn channel(&self, block: usize, channel: usize) -> (u16, u8) {
        let b = self.block(block);
        let start = BLOCK_HEADER_SIZE + channel * CHANNEL_SIZE;
        (
            u16::from_le_bytes([b[start], b[start + 1]]),
            b[start + 2],
        )
    }

    /// Microseconds since the top of the UTC hour.
    pub fn time_of_hour(&self) -> u32 {
        let s = &self.slice[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4];
        u32::from_le_bytes([s[0], s[1], s[2], s[3]])
    }

    pub fn return_mode_byte(&self) -> u8 {
        self.slice[RETURN_MODE_OFFSET]
    }

    pub fn product_id_byte(&self) -> u8 {
        self.slice[PRODUCT_ID_OFFSET]
    }
}

/// Zero-copy view of a position packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PositionPacketSlice<'a> {
    slice: &'a [u8],
}

impl<'a> PositionPacketSlice<'a> {
    pub fn from_slice(slice: &'a [u8]) -> Result<PositionPacketSlice<'a>, Error> {
        if slice.len() != POSITION_PACKET_SIZE {
            return Err(Error::InvalidCapture(format!(
                "position packet is {} bytes, expected {}",
                slice.len(),
                POSITION_PACKET_SIZE
            )));
        }

        Ok(PositionPacketSlice { slice })
    }

    /// Embedded NMEA sentence, NUL padding included.
    pub fn sentence(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(&self.slice[NMEA_OFFSET..NMEA_OFFSET + NMEA_SIZE])
    }
}

/// Per-channel trigonometry for the locked sensor model.
#[derive(Clone, Debug)]
struct Geometry {
    cos_vertical: [f64; CHANNELS_PER_BLOCK],
    sin_vertical: [f64; CHANNELS_PER_BLOCK],
}

impl Geometry {
    fn for_model(model: SensorModel) -> Result<Self, Error> {
        let angles = model
            .vertical_angles()
            .ok_or(Error::UnsupportedModel(model))?;

        let mut cos_vertical = [0.0; CHANNELS_PER_BLOCK];
        let mut sin_vertical = [0.0; CHANNELS_PER_BLOCK];
        for (i, angle) in angles.iter().enumerate() {
            let rad = angle.to_radians();
            cos_vertical[i] = rad.cos();
            sin_vertical[i] = rad.sin();
        }

        Ok(Self {
            cos_vertical,
            sin_vertical,
        })
    }
}

/// Sensor identity locked from the first decodable data packet.
#[derive(Clone, Debug)]
struct Locked {
    model: SensorModel,
    mode: ReturnMode,
    geometry: Geometry,
}

/// Rolling decoder state for one recording.
///
/// Create one per capture file (or per sequence of files that form one
/// continuous recording) and pass it to every [`process_packet`] call in
/// capture order. The state is plain data and never shared between threads.
#[derive(Clone, Debug, Default)]
pub struct DecoderState {
    /// Start of the current UTC hour, seconds since the epoch
    hour_epoch: Option<i64>,
    locked: Option<Locked>,
    /// Whether the first data packet has seeded azimuth and time
    seeded: bool,
    /// Block 0 azimuth of the previous data packet, degrees
    last_azimuth: f64,
    /// Time of hour of the previous data packet, microseconds
    last_time_of_hour: u32,
    /// Estimated spin rate in degrees per microsecond
    angular_velocity: f64,
}

impl DecoderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything, as if no packet had been seen.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn has_time_reference(&self) -> bool {
        self.hour_epoch.is_some()
    }

    /// Start of the current UTC hour in seconds since the epoch.
    pub fn hour_epoch(&self) -> Option<i64> {
        self.hour_epoch
    }

    /// Locked sensor model and return mode.
    pub fn sensor(&self) -> Option<(SensorModel, ReturnMode)> {
        self.locked.as_ref().map(|l| (l.model, l.mode))
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn last_azimuth(&self) -> f64 {
        self.last_azimuth
    }

    pub fn last_time_of_hour(&self) -> u32 {
        self.last_time_of_hour
    }

    /// Spin rate estimated from the last two data packets, degrees per
    /// microsecond.
    pub fn angular_velocity(&self) -> f64 {
        self.angular_velocity
    }
}

/// Outcome of decoding one captured payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// Payload length matches no Velodyne packet
    Foreign,
    /// Position packet whose receiver has no fix yet
    PositionInactive,
    /// Position packet established the time reference (hour epoch, seconds)
    TimeReference(i64),
    /// Position packet after the time reference was established
    PositionIgnored,
    /// Data packet seen before any time reference; dropped
    AwaitingTimeReference,
    /// First data packet of the stream; seeds azimuth and time only
    Seeded,
    /// Data packet decoded into this many points
    Points(usize),
}

/// Decode one captured UDP payload.
///
/// Decoded points are appended to `points`. A returned error is fatal for the
/// recording: the caller should stop feeding this state and discard the
/// recording's output.
pub fn process_packet(
    data: &[u8],
    state: &mut DecoderState,
    points: &mut Vec<Point>,
) -> Result<Decoded, Error> {
    match classify(data) {
        PacketKind::Position => process_position(PositionPacketSlice::from_slice(data)?, state),
        PacketKind::Data => process_data(DataPacketSlice::from_slice(data)?, state, points),
        PacketKind::Foreign => {
            trace!(len = data.len(), "ignoring foreign packet");
            Ok(Decoded::Foreign)
        }
    }
}

fn process_position(
    packet: PositionPacketSlice,
    state: &mut DecoderState,
) -> Result<Decoded, Error> {
    let rmc = nmea::parse_rmc(&packet.sentence())?;

    if rmc.status != FixStatus::Active {
        trace!("position packet without GNSS fix");
        return Ok(Decoded::PositionInactive);
    }

    if state.hour_epoch.is_some() {
        return Ok(Decoded::PositionIgnored);
    }

    let hour_epoch = rmc.hour_epoch();
    debug!(hour_epoch, date = %rmc.date, hour = rmc.hour, "time reference established");
    state.hour_epoch = Some(hour_epoch);

    Ok(Decoded::TimeReference(hour_epoch))
}

/// Check the factory bytes against the locked sensor, locking on first use.
fn lock_sensor(packet: &DataPacketSlice, state: &mut DecoderState) -> Result<(), Error> {
    let mode = ReturnMode::try_from(packet.return_mode_byte())?;
    let model = SensorModel::try_from(packet.product_id_byte())?;

    if let Some(locked) = &state.locked {
        if locked.model != model || locked.mode != mode {
            return Err(Error::HardwareChanged {
                locked_model: locked.model,
                locked_mode: locked.mode,
                model,
                mode,
            });
        }
        return Ok(());
    }

    if !mode.is_supported() {
        return Err(Error::UnsupportedReturnMode(mode));
    }
    let geometry = Geometry::for_model(model)?;

    debug!(%model, %mode, "sensor locked");
    state.locked = Some(Locked {
        model,
        mode,
        geometry,
    });

    Ok(())
}

fn process_data(
    packet: DataPacketSlice,
    state: &mut DecoderState,
    points: &mut Vec<Point>,
) -> Result<Decoded, Error> {
    if state.hour_epoch.is_none() {
        trace!("data packet before time reference");
        return Ok(Decoded::AwaitingTimeReference);
    }

    lock_sensor(&packet, state)?;

    let time_of_hour = packet.time_of_hour();
    if time_of_hour >= MICROS_PER_HOUR {
        return Err(Error::InvalidCapture(format!(
            "time of hour {time_of_hour} µs is past the end of the hour"
        )));
    }

    if !state.seeded {
        state.last_azimuth = packet.azimuth(0);
        state.last_time_of_hour = time_of_hour;
        state.seeded = true;
        return Ok(Decoded::Seeded);
    }

    update_angular_velocity(packet.azimuth(0), time_of_hour, state);

    // Both are set by this point: the time reference was checked above and
    // lock_sensor either locked or returned an error.
    let (Some(hour_epoch), Some(locked)) = (state.hour_epoch, state.locked.as_ref()) else {
        return Ok(Decoded::AwaitingTimeReference);
    };

    let packet_nanos = hour_epoch as i128 * NANOS_PER_SEC + time_of_hour as i128 * 1_000;
    let geometry = &locked.geometry;
    let angular_velocity = state.angular_velocity;

    points.reserve(POINTS_PER_PACKET);
    for block in 0..BLOCKS_PER_PACKET {
        let block_azimuth = packet.azimuth(block);

        for channel in 0..CHANNELS_PER_BLOCK {
            let (range_raw, intensity) = packet.channel(block, channel);
            let offset_ns = firing_offset_ns(channel);

            let azimuth = (block_azimuth + angular_velocity * offset_ns as f64 / 1000.0)
                .rem_euclid(360.0)
                .to_radians();

            let range = range_raw as f64 * DISTANCE_RESOLUTION;
            let horizontal = range * geometry.cos_vertical[channel];

            points.push(Point {
                x: horizontal * azimuth.sin(),
                y: horizontal * azimuth.cos(),
                z: range * geometry.sin_vertical[channel],
                intensity,
                stamp: Stamp::from_nanos(packet_nanos + offset_ns as i128),
            });
        }
    }

    Ok(Decoded::Points(POINTS_PER_PACKET))
}

/// Re-estimate the spin rate from block 0 and advance the rolling state.
fn update_angular_velocity(azimuth: f64, time_of_hour: u32, state: &mut DecoderState) {
    let delta_azimuth = azimuth_delta(state.last_azimuth, azimuth);
    let (delta_us, rolled_over) = time_of_hour_delta(state.last_time_of_hour, time_of_hour);

    if rolled_over {
        if let Some(hour_epoch) = state.hour_epoch.as_mut() {
            *hour_epoch += SECS_PER_HOUR;
            debug!(hour_epoch = *hour_epoch, "time of hour rolled over");
        }
    }

    // Duplicate timestamps carry no rate information; keep the last estimate.
    if delta_us > 0 {
        state.angular_velocity = delta_azimuth / delta_us as f64;
    }

    state.last_azimuth = azimuth;
    state.last_time_of_hour = time_of_hour;
}
