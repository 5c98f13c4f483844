// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capture to map pipeline.
//!
//! [`MapBuilder`] drives each capture through the decoder, the frame
//! transform and the voxel deduplicator:
//!
//! ```text
//! PacketSource ─► velodyne::process_packet ─► FrameTransformer::transform_all ─► VoxelGrid
//!   (ordered)          (sequential)                 (rayon, per frame)            (sequential)
//! ```
//!
//! Capture files are independent by default and fan out across the rayon
//! pool. In [`SessionMode::Continuous`] the files are treated as one
//! recording split into parts and share a single decoder state.

use std::path::Path;

use nalgebra::Vector3;
use rayon::prelude::*;
use tracing::{debug, info, info_span, instrument, warn};

use crate::{
    lidar::{Error, Point},
    packet_source::{MAX_PACKET_SIZE, PacketSource},
    pcap_source::PcapSource,
    trajectory::Trajectory,
    transform::{Calibration, FrameTransformer},
    velodyne::{self, Decoded, DecoderState, POINTS_PER_PACKET},
    voxel::{Insertion, VoxelGrid},
};

/// Default Velodyne data and position ports.
pub const DEFAULT_PORTS: [u16; 2] = [2368, 8308];

/// Default voxel edge length in meters.
pub const DEFAULT_VOXEL_RESOLUTION: f64 = 0.4;

/// How decoder state relates to the capture files of one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionMode {
    /// Every file is its own recording, processed in parallel
    #[default]
    Isolated,
    /// Files are consecutive parts of one recording, processed in order
    Continuous,
}

/// Map builder configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct MapperConfig {
    pub calibration: Calibration,
    /// Map origin subtracted from trajectory positions
    pub origin: Vector3<f64>,
    /// Voxel edge length in meters
    pub voxel_resolution: f64,
    /// UDP ports to keep from captures; empty keeps every UDP payload
    pub ports: Vec<u16>,
    pub session: SessionMode,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            calibration: Calibration {
                ned2enu: true,
                ..Default::default()
            },
            origin: Vector3::zeros(),
            voxel_resolution: DEFAULT_VOXEL_RESOLUTION,
            ports: DEFAULT_PORTS.to_vec(),
            session: SessionMode::Isolated,
        }
    }
}

impl MapperConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.voxel_resolution.is_finite() || self.voxel_resolution <= 0.0 {
            return Err(Error::Config(format!(
                "voxel resolution must be a positive finite number, got {}",
                self.voxel_resolution
            )));
        }

        if !self.origin.iter().all(|v| v.is_finite()) {
            return Err(Error::Config(format!(
                "origin must be finite, got {:?}",
                self.origin.as_slice()
            )));
        }

        let Calibration {
            roll, pitch, yaw, ..
        } = self.calibration;
        if ![roll, pitch, yaw].iter().all(|v| v.is_finite()) {
            return Err(Error::Config(format!(
                "calibration angles must be finite, got {} {} {}",
                roll, pitch, yaw
            )));
        }

        Ok(())
    }
}

/// Per-capture counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Payloads read from the source
    pub packets: usize,
    /// Payloads that were neither position nor data packets
    pub foreign: usize,
    /// Position packets
    pub position: usize,
    /// Data packets dropped while waiting for the first time reference
    pub awaiting_reference: usize,
    /// Data packets accepted by the decoder, seed packet included
    pub data: usize,
    /// Points produced by the decoder
    pub decoded: usize,
    /// Points whose timestamp the trajectory does not cover
    pub out_of_trajectory: usize,
    /// Points dropped because their voxel was already occupied
    pub occupied: usize,
    /// Points retained in the output cloud
    pub retained: usize,
}

/// Output cloud of one capture.
#[derive(Clone, Debug)]
pub struct FileCloud {
    /// Map-frame points, one per occupied voxel
    pub points: Vec<Point>,
    pub stats: CaptureStats,
}

/// Builds voxelized map-frame clouds from Velodyne captures.
///
/// Holds only read-only state, so one builder serves any number of worker
/// threads.
#[derive(Clone, Debug)]
pub struct MapBuilder {
    config: MapperConfig,
    trajectory: Trajectory,
    transformer: FrameTransformer,
}

impl MapBuilder {
    pub fn new(config: MapperConfig, trajectory: Trajectory) -> Result<Self, Error> {
        config.validate()?;
        if trajectory.is_empty() {
            return Err(Error::EmptyTrajectory);
        }

        let transformer = FrameTransformer::new(&config.calibration);
        Ok(Self {
            config,
            trajectory,
            transformer,
        })
    }

    /// Load the trajectory CSV with the configured origin and create a
    /// builder.
    pub fn from_csv_path<P: AsRef<Path>>(config: MapperConfig, path: P) -> Result<Self, Error> {
        let trajectory = Trajectory::from_csv_path(path, config.origin)?;
        Self::new(config, trajectory)
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// Build the cloud of one independent packet stream.
    pub fn build_from_source(&self, source: &mut dyn PacketSource) -> Result<FileCloud, Error> {
        let mut state = DecoderState::new();
        self.build_with_state(source, &mut state)
    }

    /// Build the cloud of one independent capture file.
    pub fn build_file<P: AsRef<Path>>(&self, path: P) -> Result<FileCloud, Error> {
        let mut state = DecoderState::new();
        self.build_file_with_state(path.as_ref(), &mut state)
    }

    /// Build one cloud per capture file, in input order.
    ///
    /// A failing file yields its error in its slot and leaves the other
    /// files unaffected.
    pub fn build_files<P: AsRef<Path> + Sync>(&self, paths: &[P]) -> Vec<Result<FileCloud, Error>> {
        match self.config.session {
            SessionMode::Isolated => paths
                .par_iter()
                .map(|path| self.build_file(path))
                .collect(),
            SessionMode::Continuous => {
                let mut state = DecoderState::new();
                paths
                    .iter()
                    .map(|path| {
                        let result = self.build_file_with_state(path.as_ref(), &mut state);
                        if result.is_err() {
                            state.reset();
                        }
                        result
                    })
                    .collect()
            }
        }
    }

    /// Build `count` files of `paths` starting at index `start`.
    pub fn build_range<P: AsRef<Path> + Sync>(
        &self,
        paths: &[P],
        start: usize,
        count: usize,
    ) -> Result<Vec<Result<FileCloud, Error>>, Error> {
        let end = start
            .checked_add(count)
            .filter(|end| *end <= paths.len())
            .ok_or(Error::IndexRange {
                start,
                end: start.saturating_add(count),
                available: paths.len(),
            })?;

        Ok(self.build_files(&paths[start..end]))
    }

    fn build_file_with_state(
        &self,
        path: &Path,
        state: &mut DecoderState,
    ) -> Result<FileCloud, Error> {
        let _span = info_span!("capture", file = %path.display()).entered();

        let result = PcapSource::from_file(path, &self.config.ports)
            .and_then(|mut source| self.build_with_state(&mut source, state));

        if let Err(err) = &result {
            warn!(%err, "capture failed");
        }
        result
    }

    fn build_with_state(
        &self,
        source: &mut dyn PacketSource,
        state: &mut DecoderState,
    ) -> Result<FileCloud, Error> {
        let mut grid = VoxelGrid::new(self.config.voxel_resolution)?;
        let mut stats = CaptureStats::default();
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let mut points = Vec::with_capacity(POINTS_PER_PACKET);

        while source.has_more() {
            let len = source.next_packet(&mut buf)?;
            stats.packets += 1;

            points.clear();
            match velodyne::process_packet(&buf[..len], state, &mut points)? {
                Decoded::Foreign => stats.foreign += 1,
                Decoded::PositionInactive
                | Decoded::TimeReference(_)
                | Decoded::PositionIgnored => stats.position += 1,
                Decoded::AwaitingTimeReference => stats.awaiting_reference += 1,
                Decoded::Seeded => stats.data += 1,
                Decoded::Points(n) => {
                    stats.data += 1;
                    stats.decoded += n;
                    self.accumulate(&points, &mut grid, &mut stats)?;
                }
            }
        }

        if stats.out_of_trajectory > 0 {
            warn!(
                points = stats.out_of_trajectory,
                "points outside trajectory span skipped"
            );
        }
        info!(
            packets = stats.packets,
            decoded = stats.decoded,
            retained = stats.retained,
            "capture processed"
        );

        Ok(FileCloud {
            points: grid.into_points(),
            stats,
        })
    }

    /// Transform one frame's points and offer them to the grid in order.
    #[instrument(level = "trace", skip_all, fields(points = points.len()))]
    fn accumulate(
        &self,
        points: &[Point],
        grid: &mut VoxelGrid,
        stats: &mut CaptureStats,
    ) -> Result<(), Error> {
        for result in self.transformer.transform_all(points, &self.trajectory) {
            match result {
                Ok(point) => match grid.insert(point) {
                    Insertion::Accepted => stats.retained += 1,
                    Insertion::Occupied => stats.occupied += 1,
                },
                Err(Error::LookupRange { stamp, .. }) => {
                    if stats.out_of_trajectory == 0 {
                        debug!(%stamp, "first point outside trajectory span");
                    }
                    stats.out_of_trajectory += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lidar::Stamp,
        packet_source::TestSource,
        synthetic::{DataPacketBuilder, position_packet, rmc_sentence},
        trajectory::Pose,
        velodyne::ReturnMode,
    };
    use nalgebra::UnitQuaternion;

    /// 2022-06-15T14:00:00Z
    const HOUR_EPOCH: i64 = 1_655_301_600;

    fn trajectory(from_us: u32, to_us: u32) -> Trajectory {
        let stamp = |us: u32| Stamp::from_nanos((HOUR_EPOCH as i128 * 1_000_000 + us as i128) * 1_000);
        Trajectory::new(
            [
                Pose::new(stamp(from_us), Vector3::zeros(), UnitQuaternion::identity()),
                Pose::new(stamp(to_us), Vector3::zeros(), UnitQuaternion::identity()),
            ],
            Vector3::zeros(),
        )
    }

    fn config() -> MapperConfig {
        MapperConfig {
            calibration: Calibration::default(),
            voxel_resolution: 0.1,
            ..Default::default()
        }
    }

    fn packets(count: u16, start_us: u32) -> Vec<Vec<u8>> {
        let mut packets = vec![position_packet(&rmc_sentence(14, 15, 6, 22))];
        for i in 0..count {
            packets.push(
                DataPacketBuilder::new()
                    .azimuth(i * 240)
                    .azimuth_step(20)
                    .time_of_hour(start_us + i as u32 * 1_327)
                    .build(),
            );
        }
        packets
    }

    #[test]
    fn test_config_validate() {
        assert!(MapperConfig::default().validate().is_ok());

        let bad = MapperConfig {
            voxel_resolution: 0.0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));

        let bad = MapperConfig {
            origin: Vector3::new(f64::NAN, 0.0, 0.0),
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));

        let bad = MapperConfig {
            calibration: Calibration::new(0.0, f64::INFINITY, 0.0, false),
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_trajectory_rejected() {
        let result = MapBuilder::new(config(), Trajectory::new([], Vector3::zeros()));
        assert!(matches!(result, Err(Error::EmptyTrajectory)));
    }

    #[test]
    fn test_build_from_source() {
        let builder = MapBuilder::new(config(), trajectory(0, 3_600_000_000 - 1)).unwrap();
        let mut source = TestSource::new(packets(4, 1_000));

        let cloud = builder.build_from_source(&mut source).unwrap();
        let stats = cloud.stats;

        assert_eq!(stats.packets, 5);
        assert_eq!(stats.position, 1);
        assert_eq!(stats.data, 4);
        // Seed packet emits nothing
        assert_eq!(stats.decoded, 3 * POINTS_PER_PACKET);
        assert_eq!(stats.out_of_trajectory, 0);
        assert_eq!(stats.retained + stats.occupied, stats.decoded);
        assert_eq!(cloud.points.len(), stats.retained);
        assert!(stats.retained > 0);
    }

    #[test]
    fn test_points_outside_trajectory_counted() {
        // Trajectory only covers the second decoded packet
        let builder = MapBuilder::new(config(), trajectory(3_600, 3_700)).unwrap();
        let mut source = TestSource::new(packets(4, 1_000));

        let cloud = builder.build_from_source(&mut source).unwrap();
        let stats = cloud.stats;

        assert_eq!(stats.decoded, 3 * POINTS_PER_PACKET);
        assert_eq!(
            stats.out_of_trajectory + stats.retained + stats.occupied,
            stats.decoded
        );
        assert!(stats.out_of_trajectory >= 2 * POINTS_PER_PACKET);
        assert!(stats.retained > 0);
    }

    #[test]
    fn test_fatal_error_no_partial_result() {
        let builder = MapBuilder::new(config(), trajectory(0, 3_600_000_000 - 1)).unwrap();
        let mut packets = packets(3, 1_000);
        packets.push(
            DataPacketBuilder::new()
                .time_of_hour(10_000)
                .return_mode(ReturnMode::LastReturn as u8)
                .build(),
        );

        let mut source = TestSource::new(packets);
        let err = builder.build_from_source(&mut source).unwrap_err();
        assert!(err.is_unsupported_hardware());
    }

    #[test]
    fn test_foreign_and_early_packets_counted() {
        let builder = MapBuilder::new(config(), trajectory(0, 3_600_000_000 - 1)).unwrap();
        let mut all = vec![
            vec![0u8; 64],
            DataPacketBuilder::new().time_of_hour(500).build(),
        ];
        all.extend(packets(2, 1_000));

        let cloud = builder
            .build_from_source(&mut TestSource::new(all))
            .unwrap();
        assert_eq!(cloud.stats.foreign, 1);
        assert_eq!(cloud.stats.awaiting_reference, 1);
        assert_eq!(cloud.stats.decoded, POINTS_PER_PACKET);
    }

    #[test]
    fn test_build_range_index_error() {
        let builder = MapBuilder::new(config(), trajectory(0, 1)).unwrap();
        let paths = ["a.pcap", "b.pcap", "c.pcap"];

        let err = builder.build_range(&paths, 2, 5).unwrap_err();
        assert!(matches!(
            err,
            Error::IndexRange {
                start: 2,
                end: 7,
                available: 3
            }
        ));
        assert!(builder.build_range(&paths, usize::MAX, 2).is_err());

        // In range: missing files fail individually
        let results = builder.build_range(&paths, 1, 2).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, Err(Error::Io(_)))));
    }
}
