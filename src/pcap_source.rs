// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! PCAP file packet source for offline replay.
//!
//! This module provides [`PcapSource`], a [`PacketSource`] implementation that
//! reads UDP payloads from PCAP/PCAPNG captures of a Velodyne sensor.
//!
//! # Example
//!
//! ```no_run
//! use edgefirst_lidarmap::PcapSource;
//! use edgefirst_lidarmap::packet_source::PacketSource;
//!
//! // Load capture, keeping the data and position ports only
//! let mut source = PcapSource::from_file("drive_0001.pcap", &[2368, 8308])?;
//!
//! let mut buf = [0u8; 2048];
//! while source.has_more() {
//!     let len = source.next_packet(&mut buf)?;
//!     // Decode buf[..len]
//! }
//! # Ok::<(), edgefirst_lidarmap::lidar::Error>(())
//! ```

use std::path::Path;

use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use tracing::{debug, warn};

use crate::{
    lidar::Error,
    packet_source::{PacketSource, copy_packet},
};

/// Size of the legacy pcap global header, the smallest valid capture.
const PCAP_HEADER_SIZE: usize = 24;

/// PCAPNG Section Header Block magic
const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

/// PCAP file packet source.
///
/// Loads the entire capture into memory and provides UDP payloads in capture
/// order via the [`PacketSource`] trait. Supports both legacy PCAP and PCAPNG
/// formats with Ethernet framing.
pub struct PcapSource {
    /// Pre-extracted UDP payloads
    packets: Vec<Vec<u8>>,
    /// Frames that were not UDP or did not match the port filter
    skipped: usize,
    /// Current packet index
    index: usize,
}

impl PcapSource {
    /// Load a PCAP file from disk.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to PCAP or PCAPNG file
    /// * `ports` - Port filter matching source OR destination; empty keeps all
    pub fn from_file<P: AsRef<Path>>(path: P, ports: &[u16]) -> Result<Self, Error> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(&data, ports)
    }

    /// Load PCAP from bytes, see [`Self::from_file`].
    pub fn from_bytes(data: &[u8], ports: &[u16]) -> Result<Self, Error> {
        if data.len() < PCAP_HEADER_SIZE {
            return Err(Error::InvalidCapture(format!(
                "capture is {} bytes, shorter than a pcap header",
                data.len()
            )));
        }

        let mut source = Self {
            packets: Vec::new(),
            skipped: 0,
            index: 0,
        };

        if data[0..4] == PCAPNG_MAGIC {
            source.extract_pcapng(data, ports)?;
        } else {
            source.extract_legacy_pcap(data, ports)?;
        }

        debug!(
            packets = source.packets.len(),
            skipped = source.skipped,
            "capture loaded"
        );
        Ok(source)
    }

    fn push_frame(&mut self, frame: &[u8], ports: &[u16]) {
        match extract_udp_payload(frame, ports) {
            Some(payload) => self.packets.push(payload),
            None => self.skipped += 1,
        }
    }

    /// Extract packets from legacy PCAP format.
    fn extract_legacy_pcap(&mut self, data: &[u8], ports: &[u16]) -> Result<(), Error> {
        use pcap_parser::*;

        // Buffer size must be at least as large as the data to avoid Incomplete errors
        let mut reader = LegacyPcapReader::new(data.len(), data).map_err(|e| {
            Error::InvalidCapture(format!("failed to create PCAP reader: {:?}", e))
        })?;

        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    if let PcapBlockOwned::Legacy(packet) = block {
                        self.push_frame(packet.data, ports);
                    }
                    reader.consume(offset);
                }
                Err(PcapError::Eof) => break,
                Err(PcapError::Incomplete(_)) => {
                    warn!(packets = self.packets.len(), "capture truncated");
                    break;
                }
                Err(e) => {
                    return Err(Error::InvalidCapture(format!("PCAP parse error: {:?}", e)));
                }
            }
        }

        Ok(())
    }

    /// Extract packets from PCAPNG format.
    fn extract_pcapng(&mut self, data: &[u8], ports: &[u16]) -> Result<(), Error> {
        use pcap_parser::*;

        let mut reader = PcapNGReader::new(data.len(), data).map_err(|e| {
            Error::InvalidCapture(format!("failed to create PCAPNG reader: {:?}", e))
        })?;

        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    // Block data carries 32-bit padding past the captured length
                    match block {
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            self.push_frame(epb.packet_data(), ports);
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                            self.push_frame(spb.packet_data(), ports);
                        }
                        _ => {
                            // Skip other block types (SHB, IDB, etc.)
                        }
                    }
                    reader.consume(offset);
                }
                Err(PcapError::Eof) => break,
                Err(PcapError::Incomplete(_)) => {
                    warn!(packets = self.packets.len(), "capture truncated");
                    break;
                }
                Err(e) => {
                    return Err(Error::InvalidCapture(format!(
                        "PCAPNG parse error: {:?}",
                        e
                    )));
                }
            }
        }

        Ok(())
    }

    /// Reset source to beginning for replay.
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// Total number of extracted payloads.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Frames dropped during extraction (non-UDP or filtered by port).
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    /// Remaining payload count.
    pub fn remaining(&self) -> usize {
        self.packets.len().saturating_sub(self.index)
    }
}

/// Extract the UDP payload from an Ethernet frame.
///
/// Returns `None` for non-UDP frames, empty payloads, and ports not in a
/// non-empty `ports` filter.
fn extract_udp_payload(frame: &[u8], ports: &[u16]) -> Option<Vec<u8>> {
    use etherparse::SlicedPacket;

    let packet = SlicedPacket::from_ethernet(frame).ok()?;

    let udp = match packet.transport {
        Some(etherparse::TransportSlice::Udp(udp)) => udp,
        _ => return None,
    };

    if !ports.is_empty()
        && !ports.contains(&udp.source_port())
        && !ports.contains(&udp.destination_port())
    {
        return None;
    }

    let payload = udp.payload();
    if payload.is_empty() {
        return None;
    }

    Some(payload.to_vec())
}

impl PacketSource for PcapSource {
    fn next_packet(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let packet = self.packets.get(self.index).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no more packets in PCAP",
            ))
        })?;

        let len = copy_packet(packet, buf);
        self.index += 1;
        Ok(len)
    }

    fn has_more(&self) -> bool {
        self.index < self.packets.len()
    }
}
