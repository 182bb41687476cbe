//! pointstream: out-of-core point batch streaming for GPU point-cloud rendering.
//!
//! - Input is an unbounded stream of 16-byte point records.
//! - Records are partitioned into fixed-capacity batches, one bounding box each.
//! - Every point is quantized against its batch box into three 10-bit tiers per axis.
//! - Host buffers reach the GPU through a paced, one-upload-per-frame schedule.
//! - Every frame, batches are culled and assigned a level of detail.
//!
//! Point record (little-endian, 16 bytes):
//!   00 : f32 x
//!   04 : f32 y
//!   08 : f32 z
//!   0C : u32 color (r << 16 | g << 8 | b)
//!
//! Channel words (one u32 per point and channel):
//!   q = floor((p - min) / (max - min) * (2^30 - 1))   per axis, 30 bits
//!   coarse = q[29:20], medium = q[19:10], fine = q[9:0]
//!   word   = (X << 20) | (Y << 10) | Z
//!
//! Reading only `coarse` gives 10 bits per axis, `coarse + medium` 20 bits,
//! all three the full 30 bits, all relative to the same box origin.

pub mod batch;
pub mod batch_set;
pub mod bindings;
pub mod bounds;
pub mod config;
pub mod error;
pub mod frame;
#[cfg(feature = "wgpu")]
pub mod gpu;
pub mod ingest;
pub mod point;
pub mod quantize;
pub mod upload;
pub mod visibility;

pub use self::batch::PointBatch;
pub use self::batch_set::{BatchSet, ChunkedAdd, PointDataHandler};
pub use self::bindings::BindingCache;
pub use self::bounds::BoundingBox;
pub use self::config::{parse_byte_size, RenderQuality, StreamConfig};
pub use self::error::StreamError;
pub use self::frame::{
    dispatch_size, evaluate_batch, evaluate_frame, BatchUniform, BatchVisibility, DrawParams, FrameReport,
    FrameSettings,
};
#[cfg(feature = "wgpu")]
pub use self::gpu::WgpuTransfer;
pub use self::ingest::{
    IngestJob, IngestOutcome, IngestProgress, IngestSession, MemorySource, PointSource, StreamingIngest,
};
pub use self::point::{PointRecord, SIZE_OF_POINT};
pub use self::quantize::{AccuracyLevel, QuantizedPoint};
pub use self::upload::{Channel, ChannelSet, SignalState, TransferQueue, UploadSignal, UploadState};
pub use self::visibility::{ProjectedBox, ProjectionCache};
