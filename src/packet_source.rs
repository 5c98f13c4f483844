// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet source abstraction for offline capture replay.
//!
//! This module provides a [`PacketSource`] trait that abstracts where UDP
//! payloads come from, so the map builder can run the same way over:
//!
//! - **Capture files**: [`crate::pcap_source::PcapSource`]
//! - **Testing**: [`TestSource`] with packets built in memory
//!
//! # Example
//!
//! ```
//! use edgefirst_lidarmap::packet_source::{PacketSource, TestSource};
//!
//! let mut source = TestSource::new(vec![vec![1, 2, 3], vec![4, 5]]);
//!
//! let mut buf = [0u8; 2048];
//! let mut total = 0;
//! while source.has_more() {
//!     total += source.next_packet(&mut buf)?;
//! }
//! assert_eq!(total, 5);
//! # Ok::<(), edgefirst_lidarmap::lidar::Error>(())
//! ```

use crate::lidar::Error;

/// Largest possible UDP payload; a buffer this size never truncates.
pub const MAX_PACKET_SIZE: usize = 65_535;

/// Trait for finite, ordered packet sources.
pub trait PacketSource: Send {
    /// Copy the next packet into `buf`.
    ///
    /// # Returns
    /// - `Ok(len)` - Number of bytes written, truncated to `buf.len()`
    /// - `Err` - Source exhausted or I/O error
    fn next_packet(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Check if more packets are available.
    fn has_more(&self) -> bool;
}

fn exhausted() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "no more packets",
    ))
}

/// Copy `packet` into `buf`, truncating to the buffer length.
pub(crate) fn copy_packet(packet: &[u8], buf: &mut [u8]) -> usize {
    let len = packet.len().min(buf.len());
    buf[..len].copy_from_slice(&packet[..len]);
    len
}

/// Test packet source for unit testing.
///
/// Provides a sequence of pre-defined payloads for exercising the decoder and
/// map builder without capture files.
#[derive(Clone, Debug, Default)]
pub struct TestSource {
    packets: Vec<Vec<u8>>,
    index: usize,
}

impl TestSource {
    /// Create a new test source with the given packets.
    pub fn new(packets: Vec<Vec<u8>>) -> Self {
        Self { packets, index: 0 }
    }

    /// Create an empty test source.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Reset the source to the beginning.
    pub fn reset(&mut self) {
        self.index = 0;
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.index
    }
}

impl PacketSource for TestSource {
    fn next_packet(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let packet = self.packets.get(self.index).ok_or_else(exhausted)?;
        let len = copy_packet(packet, buf);
        self.index += 1;
        Ok(len)
    }

    fn has_more(&self) -> bool {
        self.index < self.packets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_basic() {
        let packets = vec![vec![1, 2, 3], vec![4, 5, 6, 7]];
        let mut source = TestSource::new(packets);

        assert!(source.has_more());
        assert_eq!(source.len(), 2);

        let mut buf = [0u8; 10];
        let len = source.next_packet(&mut buf).unwrap();
        assert_eq!(len, 3);
        assert_eq!(&buf[..len], &[1, 2, 3]);

        let len = source.next_packet(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[4, 5, 6, 7]);

        assert!(!source.has_more());
        assert!(source.next_packet(&mut buf).is_err());
    }

    #[test]
    fn test_source_reset() {
        let mut source = TestSource::new(vec![vec![1, 2, 3]]);
        let mut buf = [0u8; 10];

        source.next_packet(&mut buf).unwrap();
        assert!(!source.has_more());

        source.reset();
        assert!(source.has_more());
        assert_eq!(source.current_index(), 0);
    }

    #[test]
    fn test_source_truncates_to_buffer() {
        let mut source = TestSource::new(vec![vec![9; 16]]);
        let mut buf = [0u8; 4];
        assert_eq!(source.next_packet(&mut buf).unwrap(), 4);
    }

    #[test]
    fn test_empty_source() {
        let mut source = TestSource::empty();
        assert!(source.is_empty());
        assert!(!source.has_more());

        let mut buf = [0u8; 10];
        assert!(matches!(source.next_packet(&mut buf), Err(Error::Io(_))));
    }
}
