//! Per-frame culling, level selection and draw parameter emission.

use crate::batch::PointBatch;
use crate::batch_set::BatchSet;
use crate::config::RenderQuality;
use crate::quantize::AccuracyLevel;
use glam::{Mat4, Vec2, Vec3};

/// Inputs of one frame besides the camera matrix.
#[derive(Clone, Copy, Debug)]
pub struct FrameSettings {
    pub screen_size: Vec2,
    pub quality: RenderQuality,
    pub threads_per_workgroup: u32,
    /// Device limit on workgroups per dispatch dimension.
    pub max_workgroups_per_dimension: u32,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            screen_size: Vec2::new(1280.0, 720.0),
            quality: RenderQuality::Auto,
            threads_per_workgroup: 64,
            max_workgroups_per_dimension: 65_535,
        }
    }
}

/// Everything a renderer needs to draw one batch this frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawParams {
    pub batch_id: u32,
    pub origin: Vec3,
    pub size: Vec3,
    pub screen_size: Vec2,
    pub level: AccuracyLevel,
    pub point_count: u32,
    pub workgroups: [u32; 3],
}

/// Per-batch uniform block, std140 compatible (128 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BatchUniform {
    pub screen_size: [f32; 2],
    pub _pad0: [f32; 2],
    pub view_proj: [[f32; 4]; 4],
    pub origin: [f32; 3],
    pub point_count: u32,
    pub size: [f32; 3],
    pub _pad1: f32,
    pub level: u32,
    pub _pad2: [u32; 3],
}

const _: [(); 128] = [(); core::mem::size_of::<BatchUniform>()];

impl DrawParams {
    pub fn uniform(&self, view_proj: &Mat4) -> BatchUniform {
        BatchUniform {
            screen_size: self.screen_size.to_array(),
            _pad0: [0.0; 2],
            view_proj: view_proj.to_cols_array_2d(),
            origin: self.origin.to_array(),
            point_count: self.point_count,
            size: self.size.to_array(),
            _pad1: 0.0,
            level: self.level.as_u32(),
            _pad2: [0; 3],
        }
    }
}

/// Outcome of one batch for this frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BatchVisibility {
    /// No upload has completed yet.
    NotResident,
    Culled,
    Drawn(DrawParams),
}

impl BatchVisibility {
    /// Level as shown in stats: -1 when not drawn.
    pub fn render_level(&self) -> i32 {
        match self {
            Self::Drawn(params) => params.level.as_u32() as i32,
            _ => -1,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FrameReport {
    /// One entry per batch, in batch order.
    pub batches: Vec<BatchVisibility>,
}

impl FrameReport {
    pub fn draws(&self) -> impl Iterator<Item = &DrawParams> {
        self.batches.iter().filter_map(|v| match v {
            BatchVisibility::Drawn(params) => Some(params),
            _ => None,
        })
    }

    pub fn shown_ids(&self) -> Vec<u32> {
        self.draws().map(|d| d.batch_id).collect()
    }

    pub fn render_levels(&self) -> Vec<i32> {
        self.batches.iter().map(BatchVisibility::render_level).collect()
    }

    pub fn drawn_points(&self) -> u64 {
        self.draws().map(|d| d.point_count as u64).sum()
    }

    pub fn culled_count(&self) -> usize {
        self.batches
            .iter()
            .filter(|v| matches!(v, BatchVisibility::Culled))
            .count()
    }
}

/// Workgroup counts covering `point_count` invocations with
/// `threads_per_workgroup` threads each, folded into further dimensions when
/// one exceeds `max_per_dimension`.
pub fn dispatch_size(point_count: u32, threads_per_workgroup: u32, max_per_dimension: u32) -> [u32; 3] {
    let tpw = threads_per_workgroup.max(1) as u64;
    let max = max_per_dimension.max(1) as u64;
    let total = (point_count as u64).div_ceil(tpw).max(1);

    if total <= max {
        return [total as u32, 1, 1];
    }

    if total <= max * max {
        let y = total.div_ceil(max);
        let x = total.div_ceil(y);
        return [x as u32, y as u32, 1];
    }

    let z = total.div_ceil(max * max);
    let per_layer = total.div_ceil(z);
    let y = per_layer.div_ceil(max);
    let x = per_layer.div_ceil(y);
    [x as u32, y as u32, z as u32]
}

/// Classifies one batch for the current frame.
pub fn evaluate_batch<B>(batch: &mut PointBatch<B>, view_proj: &Mat4, settings: &FrameSettings) -> BatchVisibility {
    if !batch.is_resident() {
        return BatchVisibility::NotResident;
    }

    let screen = settings.screen_size;
    if !batch.is_visible(view_proj, screen) {
        return BatchVisibility::Culled;
    }

    let level = match settings.quality.forced_level() {
        Some(level) => level,
        None => batch.accuracy_level(view_proj, screen),
    };

    let point_count = batch.resident_count();
    BatchVisibility::Drawn(DrawParams {
        batch_id: batch.id(),
        origin: batch.origin(),
        size: batch.size(),
        screen_size: screen,
        level,
        point_count,
        workgroups: dispatch_size(
            point_count,
            settings.threads_per_workgroup,
            settings.max_workgroups_per_dimension,
        ),
    })
}

/// Runs culling and level selection over every batch of `set`.
pub fn evaluate_frame<B>(set: &mut BatchSet<B>, view_proj: &Mat4, settings: &FrameSettings) -> FrameReport {
    FrameReport {
        batches: set
            .iter_mut()
            .map(|batch| evaluate_batch(batch, view_proj, settings))
            .collect(),
    }
}
