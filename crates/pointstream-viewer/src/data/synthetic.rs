//! Procedural terrain used when no file is given (`--demo-points`).

use glam::Vec3;
use pointstream::{point::pack_rgb, BoundingBox, MemorySource, PointRecord};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Side length of the generated tile.
const EXTENT: f32 = 1000.0;

/// Rolling hills over `[0, 1000]²` with height-ramped colors. Points are
/// emitted in scan-line order so that consecutive batches cover strips.
pub fn demo_cloud(count: usize, seed: u64) -> MemorySource {
    let mut rng = StdRng::seed_from_u64(seed);
    let records: Vec<PointRecord> = (0..count)
        .map(|i| {
            let t = i as f32 / count.max(1) as f32;
            let x = rng.gen::<f32>() * EXTENT;
            let y = t * EXTENT;
            let z = height(x, y) + rng.gen_range(-0.5..0.5);
            PointRecord::new(x, y, z, ramp(z))
        })
        .collect();

    MemorySource::from_records(format!("demo-{count}-{seed}"), &records)
        .with_header_extent(BoundingBox::new(Vec3::ZERO, Vec3::new(EXTENT, EXTENT, 130.0)))
}

fn height(x: f32, y: f32) -> f32 {
    40.0 * (x / 130.0).sin() * (y / 170.0).cos() + 15.0 * (x / 37.0 + y / 53.0).sin() + 60.0
}

fn ramp(z: f32) -> u32 {
    let t = (z / 120.0).clamp(0.0, 1.0);
    let r = (40.0 + 200.0 * t) as u8;
    let g = (140.0 - 40.0 * t) as u8;
    let b = (60.0 + 160.0 * (1.0 - t)) as u8;
    pack_rgb(r, g, b)
}
