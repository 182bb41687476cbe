use crate::{
    camera::{Camera, CameraController},
    config::Args,
    data::{las_source, synthetic::demo_cloud},
    renderer::Renderer,
    ui::{self, HudStats},
};
use anyhow::Result;
use glam::{DVec3, Vec2};
use pointstream::{
    evaluate_frame, BatchSet, FrameReport, FrameSettings, IngestJob, IngestOutcome, IngestProgress, PointSource,
    RenderQuality, StreamingIngest, WgpuTransfer,
};
use std::{collections::VecDeque, path::Path, sync::Arc};
use winit::{event::WindowEvent, window::Window};

type Job = IngestJob<Box<dyn PointSource>>;

pub struct App {
    pub renderer: Renderer,
    pub camera: Camera,
    pub camera_controller: CameraController,
    pub egui_ctx: egui::Context,
    pub egui_state: egui_winit::State,
    pub batches: BatchSet<wgpu::Buffer>,
    pub quality: RenderQuality,
    ingest: StreamingIngest,
    jobs: VecDeque<Job>,
    chunks_per_frame: usize,
    /// Offset subtracted from file coordinates, taken from the first file.
    world_origin: Option<DVec3>,
    /// Frame the camera when the first source's extent becomes known.
    needs_framing: bool,
    report: FrameReport,
}

impl App {
    pub async fn new(window: Arc<Window>, args: &Args) -> Result<Self> {
        let requested = args.stream_config();
        requested.validate()?;

        let renderer = Renderer::new(window.clone(), requested.threads_per_workgroup.clamp(1, 256)).await?;
        let size = renderer.gfx.size;

        let config = requested.clamp_to_device(renderer.gfx.max_binding_bytes());
        if config.batch_bytes != args.batch_size {
            log::warn!(
                "Batch size {} B adjusted to {} B (device binding limit {} B)",
                args.batch_size,
                config.batch_bytes,
                renderer.gfx.max_binding_bytes()
            );
        }
        log::info!(
            "Batches of {} points ({} B), {} threads per workgroup",
            config.capacity_points(),
            config.batch_bytes,
            config.threads_per_workgroup
        );

        let camera = Camera::new(size.width as f32 / size.height.max(1) as f32);
        let camera_controller = CameraController::new();

        let egui_ctx = egui::Context::default();
        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui_ctx.viewport_id(),
            &*window,
            None,
            None,
        );

        Ok(Self {
            renderer,
            camera,
            camera_controller,
            egui_ctx,
            egui_state,
            quality: config.quality,
            ingest: StreamingIngest::new(config.ingest_chunk_points),
            batches: BatchSet::new(config)?,
            jobs: VecDeque::new(),
            chunks_per_frame: args.chunks_per_frame.max(1),
            world_origin: None,
            needs_framing: true,
            report: FrameReport::default(),
        })
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.renderer.resize(new_size);
            self.camera.aspect = new_size.width as f32 / new_size.height as f32;
        }
    }

    pub fn handle_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(window, event);
        if response.consumed {
            return true;
        }

        self.camera_controller.handle_event(event, &mut self.camera);

        match event {
            WindowEvent::Resized(physical_size) => self.resize(*physical_size),
            WindowEvent::DroppedFile(path) => {
                if let Err(err) = self.open_path(path) {
                    log::error!("{err:#}");
                }
            }
            _ => {}
        }

        false
    }

    /// Queues a LAS/LAZ file for streaming. Files whose name was already
    /// ingested are skipped without being opened.
    pub fn open_path(&mut self, path: &Path) -> Result<()> {
        if !las_source::has_las_extension(path) {
            log::warn!("Ignoring '{}': not a .las/.laz file", path.display());
            return Ok(());
        }

        let Some(source) = las_source::open_unless_ingested(path, &self.ingest)? else {
            return Ok(());
        };
        let origin = *self.world_origin.get_or_insert_with(|| source.header_min());
        self.enqueue(Box::new(source.with_origin(origin)));
        Ok(())
    }

    pub fn add_demo_points(&mut self, count: usize) {
        self.enqueue(Box::new(demo_cloud(count, 0x5eed)));
    }

    fn enqueue(&mut self, source: Box<dyn PointSource>) {
        if self.needs_framing && !self.ingest.is_ingested(source.name()) {
            if let Some(extent) = source.header_extent() {
                self.camera.frame_extent(&extent);
                self.needs_framing = false;
            }
        }

        let job = self.ingest.begin(source);
        self.jobs.push_back(job);
    }

    /// Moves up to `chunks_per_frame` chunks from the queued sources into the
    /// batch set.
    fn pump_ingest(&mut self) {
        for _ in 0..self.chunks_per_frame {
            let Some(job) = self.jobs.front_mut() else {
                return;
            };

            match self.ingest.step(job, &mut self.batches) {
                Some(IngestProgress::Loaded { .. }) => {}
                Some(IngestProgress::Finished(outcome)) => {
                    if let IngestOutcome::Ingested { points, extent }
                    | IngestOutcome::Truncated { points, extent, .. } = &outcome
                    {
                        log::info!(
                            "{}: {} points; {} batches, {} points total, extent {:?}",
                            job.name(),
                            ui::group_digits(*points),
                            self.batches.len(),
                            ui::group_digits(self.batches.total_points()),
                            extent.to_array()
                        );
                    }
                    self.jobs.pop_front();
                }
                None => {
                    self.jobs.pop_front();
                }
            }

            if self.needs_framing && !self.batches.is_empty() {
                self.view_to_model();
            }
        }
    }

    /// Frames the camera on everything loaded so far.
    pub fn view_to_model(&mut self) {
        let extent = self.batches.total_extent();
        if !extent.is_empty() {
            self.camera.frame_extent(&extent);
            self.needs_framing = false;
        }
    }

    fn frame_settings(&self) -> FrameSettings {
        let size = self.renderer.gfx.size;
        FrameSettings {
            screen_size: Vec2::new(size.width.max(1) as f32, size.height.max(1) as f32),
            quality: self.quality,
            threads_per_workgroup: self.renderer.points.threads_per_workgroup(),
            max_workgroups_per_dimension: self.renderer.gfx.max_workgroups_per_dimension(),
        }
    }

    pub fn render(&mut self, window: &Window) -> Result<(), wgpu::SurfaceError> {
        // Fire completion callbacks of earlier uploads.
        self.renderer.gfx.device.poll(wgpu::Maintain::Poll);

        self.pump_ingest();

        let transfer = WgpuTransfer::new(&self.renderer.gfx.device, &self.renderer.gfx.queue);
        if let Some(id) = self.batches.write_one_buffer_to_gpu(&transfer) {
            log::trace!("Uploaded batch {id}");
        }

        let frame = self.renderer.gfx.surface.get_current_texture()?;
        let swap_view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let view_proj = self.camera.view_proj();
        let settings = self.frame_settings();
        self.report = evaluate_frame(&mut self.batches, &view_proj, &settings);

        self.renderer
            .render(&swap_view, &self.report, &self.batches, &view_proj);

        let shown = self.report.shown_ids();
        let render_levels = self.report.render_levels();
        let loading = self.jobs.front().map(|job| {
            (job.name(), job.points(), job.source().point_count_hint())
        });
        let stats = HudStats {
            total_points: self.batches.total_points(),
            drawn_points: self.report.drawn_points(),
            resident_points: self.batches.resident_points(),
            points_per_batch: self.batches.capacity_points(),
            batch_count: self.batches.len(),
            shown: &shown,
            render_levels: &render_levels,
            threads_per_workgroup: settings.threads_per_workgroup,
            workgroups: self.report.draws().last().map(|d| d.workgroups),
            pending_uploads: self.batches.pending_uploads(),
            loading,
        };

        let egui_input = self.egui_state.take_egui_input(window);
        self.egui_ctx.begin_frame(egui_input);

        let actions = ui::draw_hud(&self.egui_ctx, &stats, &mut self.quality);

        let egui_output = self.egui_ctx.end_frame();
        self.egui_state
            .handle_platform_output(window, egui_output.platform_output);
        let shapes = self
            .egui_ctx
            .tessellate(egui_output.shapes, self.egui_ctx.pixels_per_point());

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [
                self.renderer.gfx.config.width,
                self.renderer.gfx.config.height,
            ],
            pixels_per_point: self.egui_ctx.pixels_per_point(),
        };

        let mut encoder = self
            .renderer
            .gfx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("UI Encoder"),
            });

        for (id, delta) in &egui_output.textures_delta.set {
            self.renderer.egui_renderer.update_texture(
                &self.renderer.gfx.device,
                &self.renderer.gfx.queue,
                *id,
                delta,
            );
        }

        self.renderer.egui_renderer.update_buffers(
            &self.renderer.gfx.device,
            &self.renderer.gfx.queue,
            &mut encoder,
            &shapes,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("EGUI Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &swap_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            self.renderer
                .egui_renderer
                .render(&mut render_pass, &shapes, &screen_descriptor);
        }

        for id in &egui_output.textures_delta.free {
            self.renderer.egui_renderer.free_texture(id);
        }

        self.renderer
            .gfx
            .queue
            .submit(std::iter::once(encoder.finish()));
        frame.present();

        if actions.view_to_model {
            self.view_to_model();
        }

        Ok(())
    }
}
