// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! EdgeFirst LiDAR Map Library
//!
//! This library turns recorded Velodyne captures into a georeferenced,
//! voxel-deduplicated point cloud.
//!
//! # Architecture
//!
//! Each capture file is replayed through a fixed chain of stages:
//!
//! ```text
//! ┌─────────────────┐     ┌───────────────┐     ┌──────────────────┐     ┌─────────────┐
//! │  PacketSource   │ ──► │  velodyne     │ ──► │ FrameTransformer │ ──► │  VoxelGrid  │
//! │  (pcap/test)    │     │  (decoder)    │     │ (rayon per frame)│     │ (first wins)│
//! └─────────────────┘     └───────────────┘     └──────────────────┘     └─────────────┘
//!                                ▲                       ▲
//!                          GPRMC time ref           Trajectory
//! ```
//!
//! 1. Position packets carry a `$GPRMC` sentence that anchors the sensor's
//!    microsecond time-of-hour counter to absolute UTC.
//! 2. Data packets are decoded into timestamped sensor-frame points with
//!    per-channel firing-time azimuth correction.
//! 3. Every point is moved into the map frame with the trajectory pose at its
//!    own timestamp, composed with the fixed LiDAR to IMU calibration.
//! 4. The voxel grid keeps the first point per cell.
//!
//! # Modules
//!
//! - [`lidar`]: Common point/timestamp types and error handling
//! - [`nmea`]: `$GPRMC` sentence parsing
//! - [`velodyne`]: Packet layout, sensor tables and the rolling decoder
//! - [`trajectory`]: Pose table with interpolated lookup
//! - [`transform`]: Calibration and sensor to map transformation
//! - [`voxel`]: Voxel-grid deduplication
//! - [`packet_source`] / [`pcap_source`]: Packet sources for offline replay
//! - [`pipeline`]: Per-capture map builder
//!
//! # Example
//!
//! ```no_run
//! use edgefirst_lidarmap::{MapBuilder, MapperConfig};
//!
//! let config = MapperConfig::default();
//! let builder = MapBuilder::from_csv_path(config, "trajectory.csv")?;
//!
//! for result in builder.build_files(&["drive_0001.pcap", "drive_0002.pcap"]) {
//!     let cloud = result?;
//!     println!("{} points", cloud.points.len());
//! }
//! # Ok::<(), edgefirst_lidarmap::lidar::Error>(())
//! ```

pub mod lidar;
pub mod nmea;
pub mod packet_source;
pub mod pcap_source;
pub mod pipeline;
#[doc(hidden)]
pub mod synthetic;
pub mod trajectory;
pub mod transform;
pub mod velodyne;
pub mod voxel;

// Re-exports for convenience
pub use lidar::{Error, Point, Stamp};
pub use pcap_source::PcapSource;
pub use pipeline::{CaptureStats, FileCloud, MapBuilder, MapperConfig, SessionMode};
pub use trajectory::{Pose, Trajectory};
pub use transform::{Calibration, FrameTransformer};
pub use voxel::VoxelGrid;
