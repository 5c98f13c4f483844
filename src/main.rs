// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{Context, Result, bail};
use args::Args;
use clap::Parser;
use edgefirst_lidarmap::{MapBuilder, MapperConfig, Trajectory};
use tracing::{error, info};

/// Capture files in `dir` with a `.pcap` or `.pcapng` extension, sorted by
/// name.
fn list_captures(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut captures = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let is_capture = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                ext.eq_ignore_ascii_case("pcap") || ext.eq_ignore_ascii_case("pcapng")
            });
        if path.is_file() && is_capture {
            captures.push(path);
        }
    }
    captures.sort();
    Ok(captures)
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.rust_log)
        .init();

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("configuring worker threads")?;
    }

    let config = MapperConfig::from(&args);
    config.validate()?;

    let trajectory = Trajectory::from_csv_path(&args.trajectory, config.origin)
        .with_context(|| format!("loading trajectory {}", args.trajectory.display()))?;
    if let Some((first, last)) = trajectory.span() {
        info!(poses = trajectory.len(), %first, %last, "trajectory loaded");
    }

    let captures = list_captures(&args.pcap_dir)?;
    if captures.is_empty() {
        bail!("no pcap files found in {}", args.pcap_dir.display());
    }

    let count = args
        .count
        .unwrap_or_else(|| captures.len().saturating_sub(args.start));
    info!(
        available = captures.len(),
        start = args.start,
        count,
        session = ?config.session,
        "processing captures"
    );

    let builder = MapBuilder::new(config, trajectory)?;
    let started = Instant::now();
    let results = builder.build_range(&captures, args.start, count)?;

    let mut failed = 0;
    let mut total = 0;
    for (path, result) in captures[args.start..].iter().zip(&results) {
        match result {
            Ok(cloud) => {
                total += cloud.points.len();
                info!(
                    file = %path.display(),
                    packets = cloud.stats.packets,
                    decoded = cloud.stats.decoded,
                    out_of_trajectory = cloud.stats.out_of_trajectory,
                    retained = cloud.stats.retained,
                    "capture done"
                );
            }
            Err(err) => {
                failed += 1;
                error!(file = %path.display(), %err, "capture failed");
            }
        }
    }

    info!(
        files = results.len(),
        failed,
        points = total,
        elapsed = ?started.elapsed(),
        "map build complete"
    );

    if !results.is_empty() && failed == results.len() {
        bail!("all {} captures failed", failed);
    }

    Ok(())
}
