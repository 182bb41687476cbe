//! The 16-byte point record consumed by the batch pipeline.

use glam::Vec3;

/// Size of one point record in bytes.
pub const SIZE_OF_POINT: usize = 16;

/// One decoded point as produced by a point source.
/// Byte layout matches the record described in the crate docs.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PointRecord {
    pub position: [f32; 3],
    /// Packed `r << 16 | g << 8 | b`.
    pub color: u32,
}

const _: [(); SIZE_OF_POINT] = [(); core::mem::size_of::<PointRecord>()];

#[inline(always)]
fn le_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

#[inline(always)]
fn le_f32(b: &[u8], at: usize) -> f32 {
    f32::from_bits(le_u32(b, at))
}

impl PointRecord {
    #[inline]
    pub fn new(x: f32, y: f32, z: f32, color: u32) -> Self {
        Self {
            position: [x, y, z],
            color,
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    /// Decodes a record from the first 16 bytes of `chunk`.
    /// Alignment of `chunk` is irrelevant.
    #[inline(always)]
    pub fn read(chunk: &[u8]) -> Self {
        Self {
            position: [le_f32(chunk, 0), le_f32(chunk, 4), le_f32(chunk, 8)],
            color: le_u32(chunk, 12),
        }
    }

    /// Encodes the record into the first 16 bytes of `out`.
    #[inline]
    pub fn write(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.position[0].to_le_bytes());
        out[4..8].copy_from_slice(&self.position[1].to_le_bytes());
        out[8..12].copy_from_slice(&self.position[2].to_le_bytes());
        out[12..16].copy_from_slice(&self.color.to_le_bytes());
    }
}

/// Number of whole records in `bytes`; a trailing partial record is ignored.
#[inline]
pub fn record_count(bytes: &[u8]) -> usize {
    bytes.len() / SIZE_OF_POINT
}

/// Iterates over the whole records in `bytes`.
pub fn iter_records(bytes: &[u8]) -> impl ExactSizeIterator<Item = PointRecord> + '_ {
    bytes.chunks_exact(SIZE_OF_POINT).map(PointRecord::read)
}

/// Serializes records into the little-endian wire layout.
pub fn records_to_bytes(records: &[PointRecord]) -> Vec<u8> {
    #[cfg(target_endian = "little")]
    {
        bytemuck::cast_slice(records).to_vec()
    }

    #[cfg(not(target_endian = "little"))]
    {
        let mut out = vec![0u8; records.len() * SIZE_OF_POINT];
        for (record, chunk) in records.iter().zip(out.chunks_exact_mut(SIZE_OF_POINT)) {
            record.write(chunk);
        }
        out
    }
}

#[inline]
pub fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    (r as u32) << 16 | (g as u32) << 8 | b as u32
}

#[inline]
pub fn unpack_rgb(color: u32) -> [u8; 3] {
    [(color >> 16) as u8, (color >> 8) as u8, color as u8]
}

/// LAS colors are either 8-bit values or 16-bit values; the latter are scaled down.
#[inline]
pub fn color_to_8bit(value: u16) -> u8 {
    if value > 255 {
        (value / 256) as u8
    } else {
        value as u8
    }
}
