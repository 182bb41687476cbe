//! Storage-buffer framebuffer written by the point raster passes.

/// One `u32` per pixel for depth and one for packed color. Depth 0 marks an
/// empty pixel; larger keys are nearer.
pub struct RasterTargets {
    pub depth: wgpu::Buffer,
    pub color: wgpu::Buffer,
    pub width: u32,
    pub height: u32,
}

impl RasterTargets {
    pub fn new(device: &wgpu::Device, size: winit::dpi::PhysicalSize<u32>) -> Self {
        let width = size.width.max(1);
        let height = size.height.max(1);
        let bytes = width as u64 * height as u64 * 4;

        let create = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: bytes,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };

        Self {
            depth: create("Raster Depth Buffer"),
            color: create("Raster Color Buffer"),
            width,
            height,
        }
    }

    pub fn resize(&mut self, device: &wgpu::Device, size: winit::dpi::PhysicalSize<u32>) {
        *self = Self::new(device, size);
    }

    /// Resets depth to "empty"; color is only read where depth is set.
    pub fn clear(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.clear_buffer(&self.depth, 0, None);
    }
}
