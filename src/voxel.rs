// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Voxel-grid deduplication of map-frame points.
//!
//! Space is binned into axis-aligned cubes of edge `resolution`. The first
//! point inserted into a cube is kept and every later point landing in the
//! same cube is dropped, bounding the map density without averaging.

use std::collections::{HashMap, hash_map::Entry};

use crate::lidar::{Error, Point};

/// Integer cell coordinates, `floor(coord / resolution)` per axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoxelKey {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

/// Result of offering a point to the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Insertion {
    /// The cell was empty; the point is retained
    Accepted,
    /// The cell already holds a point; the offered point is dropped
    Occupied,
}

/// Sparse voxel grid retaining one point per occupied cell.
///
/// Retained points are kept in insertion order, so identical input always
/// yields an identical cloud.
#[derive(Clone, Debug)]
pub struct VoxelGrid {
    resolution: f64,
    cells: HashMap<VoxelKey, usize>,
    points: Vec<Point>,
}

impl VoxelGrid {
    /// Create an empty grid with the given cell edge length in meters.
    pub fn new(resolution: f64) -> Result<Self, Error> {
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(Error::Config(format!(
                "voxel resolution must be a positive finite number, got {}",
                resolution
            )));
        }

        Ok(Self {
            resolution,
            cells: HashMap::new(),
            points: Vec::new(),
        })
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    #[inline]
    pub fn key(&self, point: &Point) -> VoxelKey {
        VoxelKey {
            x: (point.x / self.resolution).floor() as i64,
            y: (point.y / self.resolution).floor() as i64,
            z: (point.z / self.resolution).floor() as i64,
        }
    }

    /// Offer a point; it is retained only if its cell is still empty.
    pub fn insert(&mut self, point: Point) -> Insertion {
        match self.cells.entry(self.key(&point)) {
            Entry::Occupied(_) => Insertion::Occupied,
            Entry::Vacant(cell) => {
                cell.insert(self.points.len());
                self.points.push(point);
                Insertion::Accepted
            }
        }
    }

    /// Whether a point is retained in the given cell.
    pub fn contains(&self, key: &VoxelKey) -> bool {
        self.cells.contains_key(key)
    }

    /// The point retained in the given cell.
    pub fn get(&self, key: &VoxelKey) -> Option<&Point> {
        self.cells.get(key).map(|&idx| &self.points[idx])
    }

    /// Retained points in insertion order.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Point> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
