// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::path::PathBuf;

use clap::Parser;
use edgefirst_lidarmap::{
    pipeline::{DEFAULT_VOXEL_RESOLUTION, MapperConfig, SessionMode},
    transform::Calibration,
};
use nalgebra::Vector3;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory holding the Velodyne pcap captures.  Files are processed in
    /// lexicographic order of their names.
    #[arg(env)]
    pub pcap_dir: PathBuf,

    /// Trajectory CSV with columns sec,nanosec,x,y,z,qx,qy,qz,qw and optional
    /// covariance columns c0..c35.
    #[arg(long, env)]
    pub trajectory: PathBuf,

    /// Map origin subtracted from every trajectory position.
    #[arg(
        long,
        env,
        default_value = "0 0 0",
        value_names = ["X", "Y", "Z"],
        value_delimiter = ' ',
        num_args = 3,
        allow_negative_numbers = true
    )]
    pub origin: Vec<f64>,

    /// LiDAR to IMU mounting angles in degrees.
    #[arg(
        long,
        env,
        default_value = "0 0 0",
        value_names = ["ROLL", "PITCH", "YAW"],
        value_delimiter = ' ',
        num_args = 3,
        allow_negative_numbers = true
    )]
    pub imu2lidar: Vec<f64>,

    /// Convert the IMU frame from NED to ENU.
    #[arg(long, env, default_value = "true", action = clap::ArgAction::Set)]
    pub ned2enu: bool,

    /// Voxel edge length in meters.  One point is kept per voxel.
    #[arg(long, env, default_value_t = DEFAULT_VOXEL_RESOLUTION)]
    pub voxel_resolution: f64,

    /// UDP ports kept from the captures, empty keeps all.
    #[arg(long, env, default_value = "2368 8308", value_delimiter = ' ')]
    pub ports: Vec<u16>,

    /// Index of the first capture file to process.
    #[arg(long, env, default_value = "0")]
    pub start: usize,

    /// Number of capture files to process, all remaining when omitted.
    #[arg(long, env)]
    pub count: Option<usize>,

    /// Treat the captures as consecutive parts of one recording.
    #[arg(long, env)]
    pub continuous: bool,

    /// Worker threads, defaults to one per core.
    #[arg(long, env)]
    pub threads: Option<usize>,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,
}

impl From<&Args> for MapperConfig {
    fn from(args: &Args) -> Self {
        let triple = |v: &[f64]| match v {
            [a, b, c] => [*a, *b, *c],
            _ => [0.0; 3],
        };
        let [x, y, z] = triple(&args.origin);
        let [roll, pitch, yaw] = triple(&args.imu2lidar);

        MapperConfig {
            calibration: Calibration::new(roll, pitch, yaw, args.ned2enu),
            origin: Vector3::new(x, y, z),
            voxel_resolution: args.voxel_resolution,
            ports: args.ports.clone(),
            session: if args.continuous {
                SessionMode::Continuous
            } else {
                SessionMode::Isolated
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["lidarmap", "captures", "--trajectory", "traj.csv"])
            .unwrap();
        let config = MapperConfig::from(&args);

        assert_eq!(config, MapperConfig::default());
        assert_eq!(args.start, 0);
        assert!(args.count.is_none());
    }

    #[test]
    fn test_config_from_args() {
        let args = Args::try_parse_from([
            "lidarmap",
            "captures",
            "--trajectory",
            "traj.csv",
            "--origin",
            "658761.0",
            "4542599.5",
            "-116.25",
            "--imu2lidar",
            "0.5",
            "-1.0",
            "90",
            "--ned2enu",
            "false",
            "--voxel-resolution",
            "0.25",
            "--ports",
            "2368",
            "--continuous",
        ])
        .unwrap();
        let config = MapperConfig::from(&args);

        assert_eq!(config.origin, Vector3::new(658761.0, 4542599.5, -116.25));
        assert_eq!(config.calibration, Calibration::new(0.5, -1.0, 90.0, false));
        assert_eq!(config.voxel_resolution, 0.25);
        assert_eq!(config.ports, vec![2368]);
        assert_eq!(config.session, SessionMode::Continuous);
    }

    #[test]
    fn test_origin_requires_three_values() {
        let result = Args::try_parse_from([
            "lidarmap",
            "captures",
            "--trajectory",
            "traj.csv",
            "--origin",
            "1",
            "2",
        ]);
        assert!(result.is_err());
    }
}
