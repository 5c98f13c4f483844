// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Synthetic Velodyne packets and pcap captures.
//!
//! Builders for well-formed position/data packets and minimal legacy pcap
//! and PCAPNG files, used by the unit tests, integration tests and benchmarks to
//! exercise the decoder without recorded sensor data.
//!
//! # Example
//!
//! ```
//! use edgefirst_lidarmap::synthetic::{DataPacketBuilder, capture, position_packet, rmc_sentence};
//!
//! let position = position_packet(&rmc_sentence(14, 15, 6, 22));
//! let data = DataPacketBuilder::new().azimuth(9_000).time_of_hour(1_000).build();
//! let pcap = capture(&[(8308, position), (2368, data)]);
//! assert!(pcap.len() > 1206 + 512);
//! ```

use crate::velodyne::{
    BLOCK_FLAG, BLOCK_SIZE, BLOCKS_PER_PACKET, CHANNELS_PER_BLOCK, DATA_PACKET_SIZE, NMEA_OFFSET,
    NMEA_SIZE, POSITION_PACKET_SIZE, PRODUCT_ID_OFFSET, RETURN_MODE_OFFSET, ReturnMode,
    SensorModel, TIMESTAMP_OFFSET,
};

/// Velodyne data UDP port
pub const DATA_PORT: u16 = 2368;

/// Velodyne position UDP port
pub const POSITION_PORT: u16 = 8308;

/// Minimal valid legacy pcap header (little-endian, Ethernet link type).
pub const PCAP_HEADER: [u8; 24] = [
    0xd4, 0xc3, 0xb2, 0xa1, // Magic number (little-endian)
    0x02, 0x00, // Major version
    0x04, 0x00, // Minor version
    0x00, 0x00, 0x00, 0x00, // Timezone
    0x00, 0x00, 0x00, 0x00, // Timestamp accuracy
    0xff, 0xff, 0x00, 0x00, // Snap length
    0x01, 0x00, 0x00, 0x00, // Network type (Ethernet)
];

/// PCAPNG block types
const SHB_TYPE: u32 = 0x0a0d_0d0a;
const IDB_TYPE: u32 = 0x0000_0001;
const EPB_TYPE: u32 = 0x0000_0006;
const SPB_TYPE: u32 = 0x0000_0003;

/// PCAPNG byte-order magic
const PCAPNG_BYTE_ORDER: u32 = 0x1a2b_3c4d;

/// Build an active `$GPRMC` sentence for the given UTC hour and date, with a
/// valid checksum.
pub fn rmc_sentence(hour: u32, day: u32, month: u32, year: u32) -> String {
    let body = format!(
        "GPRMC,{:02}2216,A,4102.4286,N,02900.8732,E,0.0,,{:02}{:02}{:02},6.0,E,A",
        hour,
        day,
        month,
        year % 100
    );
    let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("${}*{:02X}\r\n", body, checksum)
}

/// Wrap a sentence into a 512-byte position packet.
///
/// Sentences longer than the 72-byte NMEA field are truncated, as the sensor
/// would.
pub fn position_packet(sentence: &str) -> Vec<u8> {
    let mut packet = vec![0u8; POSITION_PACKET_SIZE];
    let bytes = sentence.as_bytes();
    let len = bytes.len().min(NMEA_SIZE);
    packet[NMEA_OFFSET..NMEA_OFFSET + len].copy_from_slice(&bytes[..len]);
    packet
}

/// Builder for 1206-byte data packets with uniform channel returns.
#[derive(Clone, Debug)]
pub struct DataPacketBuilder {
    azimuth: u16,
    azimuth_step: u16,
    time_of_hour: u32,
    return_mode: u8,
    product_id: u8,
    range: u16,
    intensity: u8,
}

impl Default for DataPacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DataPacketBuilder {
    /// VLP-16, strongest return, 10m returns at intensity 100.
    pub fn new() -> Self {
        Self {
            azimuth: 0,
            azimuth_step: 0,
            time_of_hour: 0,
            return_mode: ReturnMode::Strongest as u8,
            product_id: SensorModel::Vlp16 as u8,
            range: 5_000,
            intensity: 100,
        }
    }

    /// Block 0 azimuth in hundredths of a degree.
    pub fn azimuth(mut self, azimuth: u16) -> Self {
        self.azimuth = azimuth;
        self
    }

    /// Azimuth increment between consecutive blocks, hundredths of a degree.
    pub fn azimuth_step(mut self, step: u16) -> Self {
        self.azimuth_step = step;
        self
    }

    pub fn time_of_hour(mut self, micros: u32) -> Self {
        self.time_of_hour = micros;
        self
    }

    pub fn return_mode(mut self, byte: u8) -> Self {
        self.return_mode = byte;
        self
    }

    pub fn product_id(mut self, byte: u8) -> Self {
        self.product_id = byte;
        self
    }

    /// Range of every channel in 2mm units.
    pub fn range(mut self, range: u16) -> Self {
        self.range = range;
        self
    }

    pub fn intensity(mut self, intensity: u8) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut packet = vec![0u8; DATA_PACKET_SIZE];

        for block in 0..BLOCKS_PER_PACKET {
            let start = block * BLOCK_SIZE;
            let azimuth =
                ((self.azimuth as u32 + self.azimuth_step as u32 * block as u32) % 36_000) as u16;

            packet[start..start + 2].copy_from_slice(&BLOCK_FLAG);
            packet[start + 2..start + 4].copy_from_slice(&azimuth.to_le_bytes());

            for channel in 0..CHANNELS_PER_BLOCK {
                let offset = start + 4 + channel * 3;
                packet[offset..offset + 2].copy_from_slice(&self.range.to_le_bytes());
                packet[offset + 2] = self.intensity;
            }
        }

        packet[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4]
            .copy_from_slice(&self.time_of_hour.to_le_bytes());
        packet[RETURN_MODE_OFFSET] = self.return_mode;
        packet[PRODUCT_ID_OFFSET] = self.product_id;

        packet
    }
}

/// Create an Ethernet + IPv4 + UDP frame around `payload`.
pub fn udp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let udp_len = 8 + payload.len();
    let ip_len = 20 + udp_len;
    let total_len = 14 + ip_len; // Ethernet header is 14 bytes

    let mut packet = Vec::with_capacity(total_len);

    // Ethernet header (14 bytes)
    packet.extend_from_slice(&[0xff; 6]); // Dst MAC
    packet.extend_from_slice(&[0x60, 0x76, 0x88, 0x00, 0x00, 0x01]); // Src MAC
    packet.extend_from_slice(&[0x08, 0x00]); // EtherType: IPv4

    // IPv4 header (20 bytes, no options)
    packet.push(0x45); // Version + IHL
    packet.push(0x00); // DSCP + ECN
    packet.extend_from_slice(&(ip_len as u16).to_be_bytes()); // Total length
    packet.extend_from_slice(&[0x00, 0x00]); // Identification
    packet.extend_from_slice(&[0x40, 0x00]); // Flags (DF) + Fragment offset
    packet.push(0x40); // TTL
    packet.push(0x11); // Protocol: UDP
    packet.extend_from_slice(&[0x00, 0x00]); // Checksum (0 for test)
    packet.extend_from_slice(&[192, 168, 1, 201]); // Src IP
    packet.extend_from_slice(&[255, 255, 255, 255]); // Dst IP

    // UDP header (8 bytes)
    packet.extend_from_slice(&src_port.to_be_bytes());
    packet.extend_from_slice(&dst_port.to_be_bytes());
    packet.extend_from_slice(&(udp_len as u16).to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x00]); // Checksum (0 for test)

    packet.extend_from_slice(payload);

    packet
}

/// Create a legacy pcap packet record.
pub fn pcap_record(data: &[u8]) -> Vec<u8> {
    let len = data.len() as u32;
    let mut record = Vec::with_capacity(16 + data.len());

    record.extend_from_slice(&[0x00; 4]); // Timestamp seconds
    record.extend_from_slice(&[0x00; 4]); // Timestamp microseconds
    record.extend_from_slice(&len.to_le_bytes()); // Captured length
    record.extend_from_slice(&len.to_le_bytes()); // Original length

    record.extend_from_slice(data);

    record
}

/// Build a legacy pcap file holding one UDP frame per `(port, payload)`,
/// sent from and to `port`.
pub fn capture(payloads: &[(u16, Vec<u8>)]) -> Vec<u8> {
    let mut pcap = PCAP_HEADER.to_vec();
    for (port, payload) in payloads {
        pcap.extend_from_slice(&pcap_record(&udp_frame(*port, *port, payload)));
    }
    pcap
}

/// Frame a PCAPNG block: type, total length, body padded to 32 bits,
/// total length again.
fn pcapng_block(block_type: u32, body: &[u8]) -> Vec<u8> {
    let padded = body.len().next_multiple_of(4);
    let total = (12 + padded) as u32;

    let mut block = Vec::with_capacity(total as usize);
    block.extend_from_slice(&block_type.to_le_bytes());
    block.extend_from_slice(&total.to_le_bytes());
    block.extend_from_slice(body);
    block.resize(8 + padded, 0);
    block.extend_from_slice(&total.to_le_bytes());
    block
}

/// Little-endian Section Header Block followed by one Ethernet Interface
/// Description Block.
pub fn pcapng_header() -> Vec<u8> {
    let mut shb = Vec::with_capacity(16);
    shb.extend_from_slice(&PCAPNG_BYTE_ORDER.to_le_bytes());
    shb.extend_from_slice(&1u16.to_le_bytes()); // Major version
    shb.extend_from_slice(&0u16.to_le_bytes()); // Minor version
    shb.extend_from_slice(&(-1i64).to_le_bytes()); // Section length unknown

    let mut idb = Vec::with_capacity(8);
    idb.extend_from_slice(&1u16.to_le_bytes()); // Link type (Ethernet)
    idb.extend_from_slice(&[0x00, 0x00]); // Reserved
    idb.extend_from_slice(&0xffffu32.to_le_bytes()); // Snap length

    let mut header = pcapng_block(SHB_TYPE, &shb);
    header.extend_from_slice(&pcapng_block(IDB_TYPE, &idb));
    header
}

/// Create an Enhanced Packet Block on interface 0.
pub fn pcapng_enhanced_packet(data: &[u8]) -> Vec<u8> {
    let len = data.len() as u32;
    let mut body = Vec::with_capacity(20 + data.len());

    body.extend_from_slice(&0u32.to_le_bytes()); // Interface id
    body.extend_from_slice(&0u32.to_le_bytes()); // Timestamp high
    body.extend_from_slice(&0u32.to_le_bytes()); // Timestamp low
    body.extend_from_slice(&len.to_le_bytes()); // Captured length
    body.extend_from_slice(&len.to_le_bytes()); // Original length
    body.extend_from_slice(data);

    pcapng_block(EPB_TYPE, &body)
}

/// Create a Simple Packet Block.
pub fn pcapng_simple_packet(data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + data.len());
    body.extend_from_slice(&(data.len() as u32).to_le_bytes()); // Original length
    body.extend_from_slice(data);

    pcapng_block(SPB_TYPE, &body)
}

/// Build a PCAPNG file holding one Enhanced Packet Block per
/// `(port, payload)`, sent from and to `port`.
pub fn pcapng_capture(payloads: &[(u16, Vec<u8>)]) -> Vec<u8> {
    let mut pcapng = pcapng_header();
    for (port, payload) in payloads {
        pcapng.extend_from_slice(&pcapng_enhanced_packet(&udp_frame(*port, *port, payload)));
    }
    pcapng
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmea;

    #[test]
    fn test_rmc_sentence_parses() {
        let sentence = rmc_sentence(7, 2, 3, 2024);
        assert!(sentence.len() <= NMEA_SIZE);
        let rmc = nmea::parse_rmc(&sentence).unwrap();
        assert_eq!(rmc.hour, 7);
        assert_eq!(rmc.status, nmea::FixStatus::Active);
    }

    #[test]
    fn test_position_packet_layout() {
        let packet = position_packet("$GPRMC");
        assert_eq!(packet.len(), POSITION_PACKET_SIZE);
        assert_eq!(&packet[NMEA_OFFSET..NMEA_OFFSET + 6], b"$GPRMC");
        assert_eq!(packet[NMEA_OFFSET + 6], 0);
    }

    #[test]
    fn test_azimuth_step_wraps() {
        let packet = DataPacketBuilder::new()
            .azimuth(35_980)
            .azimuth_step(20)
            .build();
        let az1 = u16::from_le_bytes([packet[BLOCK_SIZE + 2], packet[BLOCK_SIZE + 3]]);
        assert_eq!(az1, 0);
    }

    #[test]
    fn test_capture_layout() {
        let pcap = capture(&[(DATA_PORT, vec![1, 2, 3])]);
        // header + record header + eth/ip/udp + payload
        assert_eq!(pcap.len(), 24 + 16 + 42 + 3);
    }

    #[test]
    fn test_pcapng_layout() {
        let header = pcapng_header();
        assert_eq!(header.len(), 28 + 20);
        assert_eq!(header[0..4], [0x0a, 0x0d, 0x0d, 0x0a]);

        // eth/ip/udp + 3 byte payload = 45, padded to 48
        let pcapng = pcapng_capture(&[(DATA_PORT, vec![1, 2, 3])]);
        assert_eq!(pcapng.len(), 48 + 32 + 48);

        let epb = &pcapng[48..];
        assert_eq!(epb[4..8], 80u32.to_le_bytes());
        assert_eq!(epb[76..80], 80u32.to_le_bytes());
        assert_eq!(epb[20..24], 45u32.to_le_bytes());
    }
}
