// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Sensor frame to map frame transformation.
//!
//! The full chain applied to each decoded point is
//!
//! ```text
//! p_map = pose.position + pose.orientation · R_cal · p_sensor
//! R_cal = Rz(yaw) · Ry(pitch) · Rx(roll) [· Rz(-90°) · Ry(0°) · Rx(180°)]
//! ```
//!
//! where the bracketed NED to ENU handedness change is optional and the
//! pose comes from the trajectory at the point's own timestamp.

use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use rayon::prelude::*;

use crate::{
    lidar::{Error, Point},
    trajectory::{Pose, Trajectory},
};

/// Fixed mounting of the LiDAR relative to the IMU, angles in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Calibration {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    /// Convert the IMU frame from NED to ENU
    pub ned2enu: bool,
}

impl Calibration {
    pub fn new(roll: f64, pitch: f64, yaw: f64, ned2enu: bool) -> Self {
        Self {
            roll,
            pitch,
            yaw,
            ned2enu,
        }
    }

    /// Sensor to IMU rotation.
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        let mounting = zyx(self.roll, self.pitch, self.yaw);
        if self.ned2enu {
            mounting * zyx(180.0, 0.0, -90.0)
        } else {
            mounting
        }
    }
}

/// Rz(yaw) · Ry(pitch) · Rx(roll) from angles in degrees.
fn zyx(roll: f64, pitch: f64, yaw: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), yaw.to_radians())
        * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), pitch.to_radians())
        * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), roll.to_radians())
}

/// Applies calibration and trajectory poses to sensor-frame points.
///
/// Holds only the precomputed calibration rotation, so it is cheap to share
/// across worker threads.
#[derive(Clone, Copy, Debug)]
pub struct FrameTransformer {
    calibration: UnitQuaternion<f64>,
}

impl FrameTransformer {
    pub fn new(calibration: &Calibration) -> Self {
        Self {
            calibration: calibration.rotation(),
        }
    }

    /// Sensor to IMU rotation, handedness change included.
    pub fn calibration(&self) -> UnitQuaternion<f64> {
        self.calibration
    }

    /// Rigid transform taking sensor coordinates to map coordinates at `pose`.
    #[inline]
    pub fn sensor_to_map(&self, pose: &Pose) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(pose.position),
            pose.orientation * self.calibration,
        )
    }

    /// Map a sensor-frame point into the map frame.
    ///
    /// Intensity and timestamp are carried through unchanged.
    pub fn transform(&self, point: &Point, pose: &Pose) -> Point {
        let p = self.sensor_to_map(pose) * Point3::new(point.x, point.y, point.z);
        Point {
            x: p.x,
            y: p.y,
            z: p.z,
            ..*point
        }
    }

    /// Map a map-frame point back into the sensor frame.
    pub fn inverse(&self, point: &Point, pose: &Pose) -> Point {
        let p = self
            .sensor_to_map(pose)
            .inverse_transform_point(&Point3::new(point.x, point.y, point.z));
        Point {
            x: p.x,
            y: p.y,
            z: p.z,
            ..*point
        }
    }

    /// Transform a batch of points, each with the pose at its own timestamp.
    ///
    /// Runs on the rayon pool; the output has one entry per input point in the
    /// same order. Points the trajectory cannot place yield their lookup error.
    pub fn transform_all(
        &self,
        points: &[Point],
        trajectory: &Trajectory,
    ) -> Vec<Result<Point, Error>> {
        points
            .par_iter()
            .map(|point| {
                trajectory
                    .pose_at(point.stamp)
                    .map(|pose| self.transform(point, &pose))
            })
            .collect()
    }
}
