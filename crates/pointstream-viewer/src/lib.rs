//! Point-cloud viewer streaming LAS/LAZ files to the GPU in fixed-size
//! batches, with per-batch frustum culling and level-of-detail selection.

pub mod app;
pub mod camera;
pub mod config;
pub mod data;
pub mod renderer;
pub mod ui;
