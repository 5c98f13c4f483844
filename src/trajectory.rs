// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Recorded sensor trajectory and time-based pose lookup.
//!
//! A [`Trajectory`] is an immutable, time-ordered table of absolute poses
//! (typically exported from a GNSS/INS post-processing tool). Positions are
//! shifted by a fixed map origin on load so that downstream arithmetic stays
//! in a small numeric range.
//!
//! # Lookup policy
//!
//! [`Trajectory::pose_at`] returns the stored pose on an exact timestamp
//! match, and otherwise interpolates between the two bracketing poses:
//! position linearly, orientation by spherical linear interpolation. The
//! covariance of the earlier pose is carried over. Queries outside the
//! recorded span are errors; there is no extrapolation.

use std::{fs::File, io, path::Path};

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::Deserialize;
use tracing::debug;

use crate::lidar::{Error, Stamp};

/// Row-major 6×6 pose covariance (x, y, z, roll, pitch, yaw).
pub type Covariance = [f64; 36];

/// Threshold below which slerp falls back to normalized lerp
const SLERP_EPSILON: f64 = 1e-12;

/// Absolute pose of the sensor platform at an instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub stamp: Stamp,
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub covariance: Option<Covariance>,
}

impl Pose {
    pub fn new(stamp: Stamp, position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self {
            stamp,
            position,
            orientation,
            covariance: None,
        }
    }

    /// Identity orientation at the origin.
    pub fn identity(stamp: Stamp) -> Self {
        Self::new(stamp, Vector3::zeros(), UnitQuaternion::identity())
    }
}

/// Time-ordered pose table.
///
/// Read-only after construction, so a single instance can serve lookups from
/// many worker threads.
#[derive(Clone, Debug)]
pub struct Trajectory {
    poses: Vec<Pose>,
    origin: Vector3<f64>,
}

impl Trajectory {
    /// Build a trajectory from unordered pose records.
    ///
    /// Records are sorted by timestamp; when several share a timestamp the
    /// first one supplied wins. `origin` is subtracted from every position.
    pub fn new(poses: impl IntoIterator<Item = Pose>, origin: Vector3<f64>) -> Self {
        let mut poses: Vec<Pose> = poses
            .into_iter()
            .map(|mut pose| {
                pose.position -= origin;
                pose
            })
            .collect();

        // Stable sort keeps first-seen order among equal stamps for dedup.
        poses.sort_by_key(|pose| pose.stamp);
        let loaded = poses.len();
        poses.dedup_by_key(|pose| pose.stamp);

        if poses.len() != loaded {
            debug!(
                duplicates = loaded - poses.len(),
                "dropped poses with duplicate timestamps"
            );
        }

        Self { poses, origin }
    }

    /// Read a trajectory from CSV.
    ///
    /// The header must name the columns `sec,nanosec,x,y,z,qx,qy,qz,qw`.
    /// When all of `c0`..`c35` are present they are read as the row-major
    /// covariance. Other columns are ignored. Quaternions are normalized.
    pub fn read_csv<R: io::Read>(reader: R, origin: Vector3<f64>) -> Result<Self, Error> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader.headers()?.clone();

        let covariance_columns: Option<Vec<usize>> = (0..36)
            .map(|i| {
                let name = format!("c{}", i);
                headers.iter().position(|h| h == name)
            })
            .collect();

        let mut poses = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let row: PoseRecord = record.deserialize(Some(&headers))?;

            let covariance = match &covariance_columns {
                Some(columns) => Some(parse_covariance(&record, columns, line)?),
                None => None,
            };

            poses.push(row.into_pose(covariance, line)?);
        }

        let trajectory = Self::new(poses, origin);
        debug!(poses = trajectory.len(), "trajectory loaded");
        Ok(trajectory)
    }

    /// Read a trajectory CSV file, see [`Self::read_csv`].
    pub fn from_csv_path<P: AsRef<Path>>(path: P, origin: Vector3<f64>) -> Result<Self, Error> {
        let file = File::open(path.as_ref())?;
        Self::read_csv(io::BufReader::new(file), origin)
    }

    /// Pose of the platform at `stamp`.
    pub fn pose_at(&self, stamp: Stamp) -> Result<Pose, Error> {
        let (first, last) = match (self.poses.first(), self.poses.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(Error::EmptyTrajectory),
        };

        if stamp < first.stamp || stamp > last.stamp {
            return Err(Error::LookupRange {
                stamp,
                first: first.stamp,
                last: last.stamp,
            });
        }

        // First pose not earlier than stamp; exists because stamp <= last.
        let idx = self.poses.partition_point(|pose| pose.stamp < stamp);
        let upper = &self.poses[idx];
        if upper.stamp == stamp {
            return Ok(*upper);
        }

        // idx > 0 because stamp > first.
        let lower = &self.poses[idx - 1];
        let span = (upper.stamp.as_nanos() - lower.stamp.as_nanos()) as f64;
        let t = (stamp.as_nanos() - lower.stamp.as_nanos()) as f64 / span;

        let orientation = lower
            .orientation
            .try_slerp(&upper.orientation, t, SLERP_EPSILON)
            .unwrap_or_else(|| lower.orientation.nlerp(&upper.orientation, t));

        Ok(Pose {
            stamp,
            position: lower.position.lerp(&upper.position, t),
            orientation,
            covariance: lower.covariance,
        })
    }

    /// Timestamps of the first and last pose.
    pub fn span(&self) -> Option<(Stamp, Stamp)> {
        match (self.poses.first(), self.poses.last()) {
            (Some(first), Some(last)) => Some((first.stamp, last.stamp)),
            _ => None,
        }
    }

    /// Origin-shifted poses in time order.
    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    /// The map origin subtracted from every position.
    pub fn origin(&self) -> Vector3<f64> {
        self.origin
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}

/// One CSV row.
#[derive(Debug, Deserialize)]
struct PoseRecord {
    sec: i64,
    nanosec: u32,
    x: f64,
    y: f64,
    z: f64,
    qx: f64,
    qy: f64,
    qz: f64,
    qw: f64,
}

impl PoseRecord {
    fn into_pose(self, covariance: Option<Covariance>, line: usize) -> Result<Pose, Error> {
        let orientation = UnitQuaternion::try_new(
            Quaternion::new(self.qw, self.qx, self.qy, self.qz),
            SLERP_EPSILON,
        )
        .ok_or_else(|| Error::Trajectory(format!("degenerate quaternion in row {}", line + 1)))?;

        Ok(Pose {
            stamp: Stamp::new(self.sec, self.nanosec),
            position: Vector3::new(self.x, self.y, self.z),
            orientation,
            covariance,
        })
    }
}

fn parse_covariance(
    record: &csv::StringRecord,
    columns: &[usize],
    line: usize,
) -> Result<Covariance, Error> {
    let mut covariance = [0.0; 36];
    for (value, &column) in covariance.iter_mut().zip(columns) {
        let field = record.get(column).unwrap_or_default();
        *value = field.parse().map_err(|_| {
            Error::Trajectory(format!(
                "invalid covariance value {:?} in row {}",
                field,
                line + 1
            ))
        })?;
    }
    Ok(covariance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn pose(sec: i64, x: f64, yaw: f64) -> Pose {
        Pose::new(
            Stamp::new(sec, 0),
            Vector3::new(x, 0.0, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, yaw),
        )
    }

    #[test]
    fn test_sorted_and_origin_shifted() {
        let origin = Vector3::new(100.0, 200.0, 10.0);
        let trajectory = Trajectory::new([pose(3, 103.0, 0.0), pose(1, 101.0, 0.0)], origin);

        assert_eq!(trajectory.len(), 2);
        assert_eq!(trajectory.poses()[0].stamp, Stamp::new(1, 0));
        assert_eq!(
            trajectory.poses()[0].position,
            Vector3::new(1.0, -200.0, -10.0)
        );
        assert_eq!(trajectory.span(), Some((Stamp::new(1, 0), Stamp::new(3, 0))));
        assert_eq!(trajectory.origin(), origin);
    }

    #[test]
    fn test_duplicate_stamp_first_wins() {
        let trajectory = Trajectory::new(
            [pose(2, 5.0, 0.0), pose(1, 0.0, 0.0), pose(2, 9.0, 0.0)],
            Vector3::zeros(),
        );

        assert_eq!(trajectory.len(), 2);
        let p = trajectory.pose_at(Stamp::new(2, 0)).unwrap();
        assert_eq!(p.position.x, 5.0);
    }

    #[test]
    fn test_exact_match() {
        let trajectory = Trajectory::new(
            [pose(1, 0.0, 0.0), pose(2, 10.0, FRAC_PI_2)],
            Vector3::zeros(),
        );
        let p = trajectory.pose_at(Stamp::new(2, 0)).unwrap();
        assert_eq!(p, trajectory.poses()[1]);
    }

    #[test]
    fn test_interpolation() {
        let trajectory = Trajectory::new(
            [pose(1, 0.0, 0.0), pose(2, 10.0, FRAC_PI_2)],
            Vector3::zeros(),
        );

        let p = trajectory.pose_at(Stamp::new(1, 250_000_000)).unwrap();
        assert_relative_eq!(p.position.x, 2.5, epsilon = 1e-12);
        let (_, _, yaw) = p.orientation.euler_angles();
        assert_relative_eq!(yaw, FRAC_PI_2 / 4.0, epsilon = 1e-12);
        assert_eq!(p.stamp, Stamp::new(1, 250_000_000));
    }

    #[test]
    fn test_interpolation_identical_orientation() {
        let trajectory = Trajectory::new(
            [pose(1, 0.0, 0.3), pose(2, 4.0, 0.3)],
            Vector3::zeros(),
        );
        let p = trajectory.pose_at(Stamp::new(1, 500_000_000)).unwrap();
        assert_relative_eq!(p.position.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(p.orientation.angle(), 0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_out_of_range() {
        let trajectory = Trajectory::new(
            [pose(10, 0.0, 0.0), pose(20, 1.0, 0.0)],
            Vector3::zeros(),
        );

        let err = trajectory.pose_at(Stamp::new(9, 999_999_999)).unwrap_err();
        assert!(matches!(err, Error::LookupRange { .. }));
        assert!(err.is_lookup_range());

        let err = trajectory.pose_at(Stamp::new(20, 1)).unwrap_err();
        assert!(matches!(err, Error::LookupRange { .. }));

        assert!(trajectory.pose_at(Stamp::new(10, 0)).is_ok());
        assert!(trajectory.pose_at(Stamp::new(20, 0)).is_ok());
    }

    #[test]
    fn test_empty() {
        let trajectory = Trajectory::new([], Vector3::zeros());
        assert!(trajectory.is_empty());
        assert!(trajectory.span().is_none());
        assert!(matches!(
            trajectory.pose_at(Stamp::default()),
            Err(Error::EmptyTrajectory)
        ));
    }

    #[test]
    fn test_read_csv() {
        let data = "\
sec, nanosec, x, y, z, qx, qy, qz, qw, speed
1655301600, 500000000, 658771.0, 4542600.0, 117.25, 0, 0, 0, 2, 3.2
1655301600, 0, 658761.0, 4542599.0, 116.25, 0, 0, 0, 1, 3.1
";
        let origin = Vector3::new(658761.0, 4542599.0, 116.25);
        let trajectory = Trajectory::read_csv(data.as_bytes(), origin).unwrap();

        assert_eq!(trajectory.len(), 2);
        let first = trajectory.poses()[0];
        assert_eq!(first.stamp, Stamp::new(1_655_301_600, 0));
        assert_eq!(first.position, Vector3::zeros());
        assert!(first.covariance.is_none());

        // Quaternion normalized on load
        let second = trajectory.poses()[1];
        assert_relative_eq!(second.orientation.w, 1.0);
        assert_relative_eq!(second.position.x, 10.0);
    }

    #[test]
    fn test_read_csv_covariance() {
        let mut header = String::from("sec,nanosec,x,y,z,qx,qy,qz,qw");
        let mut row = String::from("5,0,1,2,3,0,0,0,1");
        for i in 0..36 {
            header.push_str(&format!(",c{}", i));
            row.push_str(&format!(",{}", i as f64 * 0.5));
        }
        let data = format!("{}\n{}\n", header, row);

        let trajectory = Trajectory::read_csv(data.as_bytes(), Vector3::zeros()).unwrap();
        let covariance = trajectory.poses()[0].covariance.unwrap();
        assert_eq!(covariance[0], 0.0);
        assert_eq!(covariance[35], 17.5);
    }

    #[test]
    fn test_read_csv_errors() {
        let data = "sec,nanosec,x,y,z,qx,qy,qz,qw\n1,0,0,0,0,0,0,0,0\n";
        let err = Trajectory::read_csv(data.as_bytes(), Vector3::zeros()).unwrap_err();
        assert!(matches!(err, Error::Trajectory(_)));

        let data = "sec,nanosec,x\n1,0,0\n";
        let err = Trajectory::read_csv(data.as_bytes(), Vector3::zeros()).unwrap_err();
        assert!(matches!(err, Error::Trajectory(_)));
    }

    #[test]
    fn test_trajectory_is_sync() {
        fn assert_sync<T: Send + Sync>() {}
        assert_sync::<Trajectory>();
    }
}
