// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Benchmarks for Velodyne decoding and map building.
//!
//! Measures:
//! - Packet decoding into sensor-frame points
//! - Voxel deduplication
//! - Full capture to map build on synthetic data
//!
//! Run with: cargo bench --bench pipeline_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use edgefirst_lidarmap::{
    Calibration, MapBuilder, MapperConfig, Point, Pose, Stamp, Trajectory, VoxelGrid,
    packet_source::TestSource,
    synthetic::{DataPacketBuilder, position_packet, rmc_sentence},
    velodyne::{DecoderState, POINTS_PER_PACKET, process_packet},
};
use nalgebra::{UnitQuaternion, Vector3};

/// 2022-06-15T14:00:00Z
const HOUR_EPOCH: i64 = 1_655_301_600;

/// One second of VLP-16 traffic at 600rpm
const PACKETS_PER_SECOND: u32 = 754;

fn recording(packets: u32) -> Vec<Vec<u8>> {
    let mut out = vec![position_packet(&rmc_sentence(14, 15, 6, 22))];
    for i in 0..packets {
        out.push(
            DataPacketBuilder::new()
                .azimuth(((i * 480) % 36_000) as u16)
                .azimuth_step(40)
                .time_of_hour(1_000 + i * 1_327)
                .range(2_000 + (i % 4_000) as u16)
                .intensity((i % 255) as u8)
                .build(),
        );
    }
    out
}

fn trajectory() -> Trajectory {
    Trajectory::new(
        (0..=3_600).map(|s| {
            Pose::new(
                Stamp::new(HOUR_EPOCH + s, 0),
                Vector3::new(s as f64 * 10.0, 0.0, 0.0),
                UnitQuaternion::from_euler_angles(0.0, 0.0, s as f64 * 0.01),
            )
        }),
        Vector3::zeros(),
    )
}

fn bench_decode(c: &mut Criterion) {
    let packets = recording(PACKETS_PER_SECOND);

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(
        PACKETS_PER_SECOND as u64 * POINTS_PER_PACKET as u64,
    ));

    group.bench_function("vlp16_1s", |b| {
        let mut points = Vec::with_capacity(packets.len() * POINTS_PER_PACKET);
        b.iter(|| {
            let mut state = DecoderState::new();
            points.clear();
            for packet in &packets {
                process_packet(black_box(packet), &mut state, &mut points).unwrap();
            }
            black_box(points.len())
        })
    });

    group.finish();
}

fn bench_voxel(c: &mut Criterion) {
    let mut state = DecoderState::new();
    let mut points: Vec<Point> = Vec::new();
    for packet in recording(PACKETS_PER_SECOND) {
        process_packet(&packet, &mut state, &mut points).unwrap();
    }

    let mut group = c.benchmark_group("voxel");
    group.throughput(Throughput::Elements(points.len() as u64));

    for resolution in [0.1, 0.4, 1.0] {
        group.bench_with_input(
            BenchmarkId::from_parameter(resolution),
            &resolution,
            |b, &resolution| {
                b.iter(|| {
                    let mut grid = VoxelGrid::new(resolution).unwrap();
                    for p in &points {
                        grid.insert(*p);
                    }
                    black_box(grid.len())
                })
            },
        );
    }

    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let packets = recording(PACKETS_PER_SECOND);
    let config = MapperConfig {
        calibration: Calibration::new(0.0, 0.0, 90.0, true),
        ..Default::default()
    };
    let builder = MapBuilder::new(config, trajectory()).unwrap();

    let mut group = c.benchmark_group("build");
    group.throughput(Throughput::Elements(
        PACKETS_PER_SECOND as u64 * POINTS_PER_PACKET as u64,
    ));
    group.sample_size(20);

    group.bench_function("vlp16_1s", |b| {
        b.iter(|| {
            let mut source = TestSource::new(packets.clone());
            let cloud = builder.build_from_source(&mut source).unwrap();
            black_box(cloud.points.len())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_voxel, bench_build);
criterion_main!(benches);
