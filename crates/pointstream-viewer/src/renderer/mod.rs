//! The rendering orchestrator. Owns the GPU context, the raster framebuffer
//! and the point/display pipelines.

pub mod context;
pub mod pipelines;
pub mod targets;

use self::{
    context::GfxContext,
    pipelines::{display::DisplayPipeline, point_raster::PointRasterPipeline},
    targets::RasterTargets,
};
use glam::Mat4;
use pointstream::{BatchSet, BindingCache, DrawParams, FrameReport};
use std::sync::Arc;
use winit::window::Window;

/// Background color behind the points, packed `0xRRGGBB`.
const BACKGROUND: u32 = 0x0010_1418;

/// Owns all rendering-related state.
pub struct Renderer {
    pub gfx: GfxContext,
    pub targets: RasterTargets,
    pub points: PointRasterPipeline,
    pub display: DisplayPipeline,
    pub egui_renderer: egui_wgpu::Renderer,
    bindings: BindingCache<wgpu::BindGroup>,
}

impl Renderer {
    pub async fn new(window: Arc<Window>, threads_per_workgroup: u32) -> anyhow::Result<Self> {
        let gfx = GfxContext::new(window).await?;
        let size = gfx.size;

        let targets = RasterTargets::new(&gfx.device, size);
        let points = PointRasterPipeline::new(&gfx.device, &targets, threads_per_workgroup);
        let display = DisplayPipeline::new(&gfx.device, gfx.config.format, &targets);

        let egui_renderer =
            egui_wgpu::Renderer::new(&gfx.device, gfx.config.format, None, 1);

        Ok(Self {
            gfx,
            targets,
            points,
            display,
            egui_renderer,
            bindings: BindingCache::new(),
        })
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.gfx.resize(new_size);
            self.targets.resize(&self.gfx.device, new_size);
            self.points.rebind_targets(&self.gfx.device, &self.targets);
            self.display.rebind_targets(&self.gfx.device, &self.targets);
        }
    }

    pub fn bound_batches(&self) -> usize {
        self.bindings.len()
    }

    /// Rasterizes every batch drawn in `report` and resolves onto `swap_view`.
    pub fn render(
        &mut self,
        swap_view: &wgpu::TextureView,
        report: &FrameReport,
        batches: &BatchSet<wgpu::Buffer>,
        view_proj: &Mat4,
    ) {
        let device = &self.gfx.device;
        let queue = &self.gfx.queue;
        let draws: Vec<&DrawParams> = report.draws().collect();

        self.points.ensure_slots(device, &self.targets, draws.len());

        // Bind groups first; the pass below only borrows them.
        for draw in &draws {
            let Some(batch) = batches.get(draw.batch_id) else {
                continue;
            };
            let Some(buffers) = batch.device_buffers() else {
                continue;
            };
            let points = &self.points;
            self.bindings
                .get_or_build(draw.batch_id, batch.device_generation(), draw.level, || {
                    points.batch_bind_group(device, draw.batch_id, draw.level, buffers)
                });
        }

        for (slot, draw) in draws.iter().enumerate() {
            self.points
                .write_uniform(queue, slot as u32, &draw.uniform(view_proj));
        }
        self.display.update(queue, &self.targets, BACKGROUND);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });

        self.targets.clear(&mut encoder);

        // Pass 1: depth then color per visible batch
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Point Raster Pass"),
                timestamp_writes: None,
            });

            for (slot, draw) in draws.iter().enumerate() {
                let Some(batch) = batches.get(draw.batch_id) else {
                    continue;
                };
                let Some(bind) = self
                    .bindings
                    .get(draw.batch_id, batch.device_generation(), draw.level)
                else {
                    continue;
                };
                self.points
                    .dispatch(&mut cpass, slot as u32, bind, draw.level, draw.workgroups);
            }
        }

        // Pass 2: framebuffer to swapchain
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Display Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: swap_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            self.display.draw(&mut rpass);
        }

        queue.submit(std::iter::once(encoder.finish()));
    }
}
