//! Command line and environment configuration.

use crate::data::las_source::has_las_extension;
use clap::Parser;
use pointstream::{parse_byte_size, RenderQuality, StreamConfig};
use std::{path::PathBuf, time::Duration};
use walkdir::WalkDir;

/// Streams LAS/LAZ point clouds to the GPU in fixed-size batches.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// LAS/LAZ files, or directories scanned recursively for them.
    pub inputs: Vec<PathBuf>,

    /// Bytes per batch (`16m`, `512k`, ...). Clamped to the device's
    /// storage binding limit.
    #[arg(long, env = "POINTSTREAM_BATCH_SIZE", default_value = "16m", value_parser = parse_byte_size)]
    pub batch_size: u64,

    /// Compute threads per workgroup (1..=256).
    #[arg(long, env = "POINTSTREAM_THREADS_PER_WORKGROUP", default_value_t = 64)]
    pub threads_per_workgroup: u32,

    /// Level of detail: auto, coarse, medium or fine.
    #[arg(long, env = "POINTSTREAM_QUALITY", default_value = "auto")]
    pub quality: RenderQuality,

    /// Keep host copies of full batches after upload.
    #[arg(long, env = "POINTSTREAM_KEEP_HOST_BUFFERS")]
    pub keep_host_buffers: bool,

    /// Re-queue uploads that have not completed after this many milliseconds.
    #[arg(long, env = "POINTSTREAM_UPLOAD_TIMEOUT_MS")]
    pub upload_timeout_ms: Option<u64>,

    /// Points decoded per ingest step.
    #[arg(long, env = "POINTSTREAM_CHUNK_POINTS", default_value_t = 1 << 16)]
    pub chunk_points: usize,

    /// Ingest steps run per frame.
    #[arg(long, env = "POINTSTREAM_CHUNKS_PER_FRAME", default_value_t = 4)]
    pub chunks_per_frame: usize,

    /// Generate a synthetic cloud of this many points at startup.
    #[arg(long, env = "POINTSTREAM_DEMO_POINTS", default_value_t = 0)]
    pub demo_points: usize,
}

impl Args {
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            batch_bytes: self.batch_size,
            threads_per_workgroup: self.threads_per_workgroup,
            quality: self.quality,
            release_host_buffers: !self.keep_host_buffers,
            upload_timeout: self.upload_timeout_ms.map(Duration::from_millis),
            ingest_chunk_points: self.chunk_points,
        }
    }

    /// Expands directories and keeps `.las`/`.laz` files, sorted per directory.
    pub fn input_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for input in &self.inputs {
            if input.is_dir() {
                let mut found: Vec<_> = WalkDir::new(input)
                    .into_iter()
                    .filter_map(Result::ok)
                    .filter(|e| e.file_type().is_file() && has_las_extension(e.path()))
                    .map(|e| e.path().to_path_buf())
                    .collect();
                if found.is_empty() {
                    log::warn!("No .las/.laz files found in '{}'", input.display());
                }
                found.sort();
                files.extend(found);
            } else if has_las_extension(input) {
                files.push(input.clone());
            } else {
                log::warn!("Ignoring '{}': not a .las/.laz file", input.display());
            }
        }
        files
    }
}
