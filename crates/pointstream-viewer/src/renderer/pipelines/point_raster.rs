//! Compute rasterizer for quantized point batches.
//!
//! Every drawn batch runs two dispatches over its points: a depth pass that
//! keeps the nearest depth key per pixel with `atomicMax`, then a color pass
//! that writes the color of the point owning that key. The level of detail
//! decides how many tier channels the shader reads.

use super::super::targets::RasterTargets;
use pointstream::{AccuracyLevel, BatchUniform, ChannelSet};

/// Shader template; `{TPW}` and the `//{MEDIUM..}` / `//{FINE..}` markers are
/// filled in per level.
const RASTER_WGSL: &str = r#"
struct BatchUniform {
    screen_size: vec2<f32>,
    _pad0: vec2<f32>,
    view_proj: mat4x4<f32>,
    origin: vec3<f32>,
    point_count: u32,
    size: vec3<f32>,
    _pad1: f32,
    level: u32,
    _pad2: u32,
    _pad3: u32,
    _pad4: u32,
}

@group(0) @binding(0) var<uniform> U: BatchUniform;
@group(0) @binding(1) var<storage, read_write> depth_fb: array<atomic<u32>>;
@group(0) @binding(2) var<storage, read_write> color_fb: array<u32>;

@group(1) @binding(0) var<storage, read> colors: array<u32>;
@group(1) @binding(1) var<storage, read> coarse: array<u32>;
//{MEDIUM_BINDING}
//{FINE_BINDING}

fn tier(word: u32) -> vec3<u32> {
    return vec3<u32>((word >> 20u) & 0x3FFu, (word >> 10u) & 0x3FFu, word & 0x3FFu);
}

fn decode(i: u32) -> vec3<f32> {
    var q = tier(coarse[i]) << vec3<u32>(20u);
    //{MEDIUM_DECODE}
    //{FINE_DECODE}
    return U.origin + vec3<f32>(q) / 1073741823.0 * U.size;
}

struct Pixel {
    index: u32,
    depth: u32,
    valid: bool,
}

fn project(i: u32) -> Pixel {
    var px: Pixel;
    px.valid = false;

    let clip = U.view_proj * vec4<f32>(decode(i), 1.0);
    if (clip.w <= 0.0) {
        return px;
    }
    let ndc = clip.xyz / clip.w;
    if (abs(ndc.x) > 1.0 || abs(ndc.y) > 1.0 || ndc.z < 0.0 || ndc.z > 1.0) {
        return px;
    }

    let w = u32(U.screen_size.x);
    let h = u32(U.screen_size.y);
    let x = min(u32((ndc.x * 0.5 + 0.5) * U.screen_size.x), w - 1u);
    let y = min(u32((0.5 - ndc.y * 0.5) * U.screen_size.y), h - 1u);

    px.index = y * w + x;
    // 0 is reserved for empty pixels.
    px.depth = u32((1.0 - ndc.z) * 16777215.0) + 1u;
    px.valid = true;
    return px;
}

fn point_index(wid: vec3<u32>, nwg: vec3<u32>, lid: u32) -> u32 {
    let group = wid.x + wid.y * nwg.x + wid.z * nwg.x * nwg.y;
    return group * {TPW}u + lid;
}

@compute @workgroup_size({TPW})
fn depth_main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_index) lid: u32,
) {
    let i = point_index(wid, nwg, lid);
    if (i >= U.point_count) {
        return;
    }
    let px = project(i);
    if (px.valid) {
        atomicMax(&depth_fb[px.index], px.depth);
    }
}

@compute @workgroup_size({TPW})
fn color_main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_index) lid: u32,
) {
    let i = point_index(wid, nwg, lid);
    if (i >= U.point_count) {
        return;
    }
    let px = project(i);
    if (px.valid && atomicLoad(&depth_fb[px.index]) == px.depth) {
        color_fb[px.index] = colors[i];
    }
}
"#;

/// WGSL for one level of detail and workgroup size.
pub fn raster_wgsl(level: AccuracyLevel, threads_per_workgroup: u32) -> String {
    let (medium_binding, medium_decode) = if level.tier_count() >= 2 {
        (
            "@group(1) @binding(2) var<storage, read> medium: array<u32>;",
            "q = q | (tier(medium[i]) << vec3<u32>(10u));",
        )
    } else {
        ("", "")
    };
    let (fine_binding, fine_decode) = if level.tier_count() >= 3 {
        (
            "@group(1) @binding(3) var<storage, read> fine: array<u32>;",
            "q = q | tier(fine[i]);",
        )
    } else {
        ("", "")
    };

    RASTER_WGSL
        .replace("{TPW}", &threads_per_workgroup.to_string())
        .replace("//{MEDIUM_BINDING}", medium_binding)
        .replace("//{MEDIUM_DECODE}", medium_decode)
        .replace("//{FINE_BINDING}", fine_binding)
        .replace("//{FINE_DECODE}", fine_decode)
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Per-batch uniforms live in one buffer, one aligned slot per drawn batch,
/// selected with a dynamic offset.
pub struct PointRasterPipeline {
    frame_layout: wgpu::BindGroupLayout,
    batch_layouts: [wgpu::BindGroupLayout; 3],
    depth_pipelines: [wgpu::ComputePipeline; 3],
    color_pipelines: [wgpu::ComputePipeline; 3],
    uniforms: wgpu::Buffer,
    uniform_stride: u64,
    uniform_slots: u32,
    frame_bind: wgpu::BindGroup,
    threads_per_workgroup: u32,
}

impl PointRasterPipeline {
    pub fn new(device: &wgpu::Device, targets: &RasterTargets, threads_per_workgroup: u32) -> Self {
        let uniform_size = std::mem::size_of::<BatchUniform>() as u64;
        let align = device.limits().min_uniform_buffer_offset_alignment as u64;
        let uniform_stride = uniform_size.div_ceil(align) * align;

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Point Raster Frame Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(uniform_size),
                    },
                    count: None,
                },
                storage_entry(1, false),
                storage_entry(2, false),
            ],
        });

        let batch_layouts = AccuracyLevel::ALL.map(|level| {
            let entries: Vec<_> = (0..=level.tier_count()).map(|b| storage_entry(b, true)).collect();
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("Point Raster Batch Layout L{}", level.as_u32())),
                entries: &entries,
            })
        });

        let [l0, l1, l2] = AccuracyLevel::ALL.map(|level| {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("Point Raster WGSL L{}", level.as_u32())),
                source: wgpu::ShaderSource::Wgsl(raster_wgsl(level, threads_per_workgroup).into()),
            });
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Point Raster PipelineLayout"),
                bind_group_layouts: &[&frame_layout, &batch_layouts[level.index()]],
                push_constant_ranges: &[],
            });
            let pipeline = |label: &str, entry_point: &str| {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(&layout),
                    module: &shader,
                    entry_point,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                })
            };
            (
                pipeline("Point Depth Pipeline", "depth_main"),
                pipeline("Point Color Pipeline", "color_main"),
            )
        });

        let uniform_slots = 16;
        let uniforms = Self::create_uniforms(device, uniform_stride, uniform_slots);
        let frame_bind = Self::create_frame_bind(device, &frame_layout, &uniforms, uniform_size, targets);

        Self {
            frame_layout,
            batch_layouts,
            depth_pipelines: [l0.0, l1.0, l2.0],
            color_pipelines: [l0.1, l1.1, l2.1],
            uniforms,
            uniform_stride,
            uniform_slots,
            frame_bind,
            threads_per_workgroup,
        }
    }

    pub fn threads_per_workgroup(&self) -> u32 {
        self.threads_per_workgroup
    }

    fn create_uniforms(device: &wgpu::Device, stride: u64, slots: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Batch Uniforms"),
            size: stride * slots as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn create_frame_bind(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        uniforms: &wgpu::Buffer,
        uniform_size: u64,
        targets: &RasterTargets,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Point Raster Frame Bind"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: uniforms,
                        offset: 0,
                        size: wgpu::BufferSize::new(uniform_size),
                    }),
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

    /// Rebinds the framebuffer after a resize.
    pub fn rebind_targets(&mut self, device: &wgpu::Device, targets: &RasterTargets) {
        let uniform_size = std::mem::size_of::<BatchUniform>() as u64;
        self.frame_bind =
            Self::create_frame_bind(device, &self.frame_layout, &self.uniforms, uniform_size, targets);
    }

    /// Grows the uniform buffer to hold at least `count` slots.
    pub fn ensure_slots(&mut self, device: &wgpu::Device, targets: &RasterTargets, count: usize) {
        if count as u32 <= self.uniform_slots {
            return;
        }
        self.uniform_slots = (count as u32).next_power_of_two();
        log::debug!("Growing batch uniform buffer to {} slots", self.uniform_slots);
        self.uniforms = Self::create_uniforms(device, self.uniform_stride, self.uniform_slots);
        self.rebind_targets(device, targets);
    }

    pub fn write_uniform(&self, queue: &wgpu::Queue, slot: u32, uniform: &BatchUniform) {
        queue.write_buffer(
            &self.uniforms,
            slot as u64 * self.uniform_stride,
            bytemuck::bytes_of(uniform),
        );
    }

    /// Binds the channels a level reads: color, coarse, then medium and fine
    /// as the level requires.
    pub fn batch_bind_group(
        &self,
        device: &wgpu::Device,
        batch_id: u32,
        level: AccuracyLevel,
        buffers: &ChannelSet<wgpu::Buffer>,
    ) -> wgpu::BindGroup {
        let channels = [&buffers.color, &buffers.coarse, &buffers.medium, &buffers.fine];
        let entries: Vec<_> = channels[..=level.tier_count() as usize]
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();

        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("Batch {batch_id} Bind L{}", level.as_u32())),
            layout: &self.batch_layouts[level.index()],
            entries: &entries,
        })
    }

    pub fn dispatch<'a>(
        &'a self,
        cpass: &mut wgpu::ComputePass<'a>,
        slot: u32,
        batch_bind: &'a wgpu::BindGroup,
        level: AccuracyLevel,
        workgroups: [u32; 3],
    ) {
        let [x, y, z] = workgroups;
        let offset = (slot as u64 * self.uniform_stride) as u32;

        cpass.set_bind_group(0, &self.frame_bind, &[offset]);
        cpass.set_bind_group(1, batch_bind, &[]);

        cpass.set_pipeline(&self.depth_pipelines[level.index()]);
        cpass.dispatch_workgroups(x, y, z);

        cpass.set_pipeline(&self.color_pipelines[level.index()]);
        cpass.dispatch_workgroups(x, y, z);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_reads_only_the_needed_tiers() {
        let coarse = raster_wgsl(AccuracyLevel::Coarse, 64);
        assert!(coarse.contains("@workgroup_size(64)"));
        assert!(coarse.contains("group * 64u + lid"));
        assert!(!coarse.contains("medium"));
        assert!(!coarse.contains("fine"));
        assert!(!coarse.contains("{TPW}"));

        let medium = raster_wgsl(AccuracyLevel::Medium, 128);
        assert!(medium.contains("var<storage, read> medium"));
        assert!(medium.contains("tier(medium[i])"));
        assert!(!medium.contains("fine"));

        let fine = raster_wgsl(AccuracyLevel::Fine, 256);
        assert!(fine.contains("@group(1) @binding(3) var<storage, read> fine"));
        assert!(fine.contains("q = q | tier(fine[i]);"));
        assert!(!fine.contains("//{"));
    }
}
