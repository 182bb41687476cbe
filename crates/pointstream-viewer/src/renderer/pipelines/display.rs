use super::super::targets::RasterTargets;

/// Full-screen triangle resolving the raster framebuffer onto the swapchain.
const DISPLAY_WGSL: &str = r#"
struct Display {
    size: vec2<u32>,
    background: u32,
    decode_srgb: u32,
}

@group(0) @binding(0) var<uniform> D: Display;
@group(0) @binding(1) var<storage, read> depth_fb: array<u32>;
@group(0) @binding(2) var<storage, read> color_fb: array<u32>;

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((vi << 1u) & 2u), f32(vi & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let x = min(u32(pos.x), D.size.x - 1u);
    let y = min(u32(pos.y), D.size.y - 1u);
    let i = y * D.size.x + x;

    var rgb = D.background;
    if (depth_fb[i] != 0u) {
        rgb = color_fb[i];
    }

    var c = vec3<f32>(
        f32((rgb >> 16u) & 0xFFu),
        f32((rgb >> 8u) & 0xFFu),
        f32(rgb & 0xFFu),
    ) / 255.0;
    if (D.decode_srgb != 0u) {
        c = pow(c, vec3<f32>(2.2));
    }
    return vec4<f32>(c, 1.0);
}
"#;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct DisplayUniform {
    size: [u32; 2],
    background: u32,
    decode_srgb: u32,
}

const _: [(); 16] = [(); core::mem::size_of::<DisplayUniform>()];

pub struct DisplayPipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    uniform: wgpu::Buffer,
    bind: wgpu::BindGroup,
    decode_srgb: bool,
}

impl DisplayPipeline {
    pub fn new(device: &wgpu::Device, surface_fmt: wgpu::TextureFormat, targets: &RasterTargets) -> Self {
        let storage = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Display Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<DisplayUniform>() as u64,
                        ),
                    },
                    count: None,
                },
                storage(1),
                storage(2),
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Display WGSL"),
            source: wgpu::ShaderSource::Wgsl(DISPLAY_WGSL.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Display PipelineLayout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Display Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_fmt,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Display UBO"),
            size: std::mem::size_of::<DisplayUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind = Self::create_bind(device, &layout, &uniform, targets);

        Self {
            pipeline,
            layout,
            uniform,
            bind,
            decode_srgb: surface_fmt.is_srgb(),
        }
    }

    fn create_bind(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        uniform: &wgpu::Buffer,
        targets: &RasterTargets,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Display Bind"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: targets.depth.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: targets.color.as_entire_binding(),
                },
            ],
        })
    }

    pub fn rebind_targets(&mut self, device: &wgpu::Device, targets: &RasterTargets) {
        self.bind = Self::create_bind(device, &self.layout, &self.uniform, targets);
    }

    /// `background` is packed `0xRRGGBB`.
    pub fn update(&self, queue: &wgpu::Queue, targets: &RasterTargets, background: u32) {
        let data = DisplayUniform {
            size: [targets.width, targets.height],
            background,
            decode_srgb: self.decode_srgb as u32,
        };
        queue.write_buffer(&self.uniform, 0, bytemuck::bytes_of(&data));
    }

    pub fn draw<'a>(&'a self, rpass: &mut wgpu::RenderPass<'a>) {
        rpass.set_pipeline(&self.pipeline);
        rpass.set_bind_group(0, &self.bind, &[]);
        rpass.draw(0..3, 0..1);
    }
}
