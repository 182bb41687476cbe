//! 30-bit fixed-point positions split into three 10-bit precision tiers.

use crate::bounds::BoundingBox;
use glam::Vec3;

/// Bits per axis of the full quantized position.
pub const QUANT_BITS: u32 = 30;
/// Largest quantized axis value, `2^30 - 1`.
pub const QUANT_MAX: u32 = (1 << QUANT_BITS) - 1;
/// Bits per axis in one tier.
pub const TIER_BITS: u32 = 10;
pub const TIER_MASK: u32 = (1 << TIER_BITS) - 1;

/// Level of detail: how many tiers a renderer reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u32)]
pub enum AccuracyLevel {
    #[default]
    Coarse = 0,
    Medium = 1,
    Fine = 2,
}

impl AccuracyLevel {
    pub const ALL: [AccuracyLevel; 3] = [Self::Coarse, Self::Medium, Self::Fine];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Number of positional channels read at this level.
    #[inline]
    pub fn tier_count(self) -> u32 {
        self as u32 + 1
    }

    /// Number of significant bits per axis at this level.
    #[inline]
    pub fn bits(self) -> u32 {
        self.tier_count() * TIER_BITS
    }
}

/// One point's three positional channel words.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct QuantizedPoint {
    pub coarse: u32,
    pub medium: u32,
    pub fine: u32,
}

/// Quantizes one coordinate against `[min, max]`.
///
/// Arithmetic runs in f64 so that `value == max` lands exactly on `QUANT_MAX`.
/// A zero-extent axis skips the division and quantizes to 0.
#[inline]
pub fn quantize_axis(value: f32, min: f32, max: f32) -> u32 {
    let extent = max as f64 - min as f64;
    let mut dist = value as f64 - min as f64;

    if extent > 0.0 {
        dist /= extent;
    } else {
        dist = 0.0;
    }

    let q = (dist * QUANT_MAX as f64).floor();
    // `as` saturates and maps NaN to 0
    (q as u32).min(QUANT_MAX)
}

/// Packs one tier of three quantized axes as `(X << 20) | (Y << 10) | Z`.
#[inline]
pub fn pack_tier(q: [u32; 3], shift: u32) -> u32 {
    let x = (q[0] >> shift) & TIER_MASK;
    let y = (q[1] >> shift) & TIER_MASK;
    let z = (q[2] >> shift) & TIER_MASK;
    (x << 20) | (y << 10) | z
}

/// Inverse of [`pack_tier`] for a single tier word.
#[inline]
pub fn unpack_tier(word: u32) -> [u32; 3] {
    [(word >> 20) & TIER_MASK, (word >> 10) & TIER_MASK, word & TIER_MASK]
}

/// Quantizes a position against the box `bbox`.
#[inline]
pub fn quantize_position(p: Vec3, bbox: &BoundingBox) -> QuantizedPoint {
    let q = [
        quantize_axis(p.x, bbox.min.x, bbox.max.x),
        quantize_axis(p.y, bbox.min.y, bbox.max.y),
        quantize_axis(p.z, bbox.min.z, bbox.max.z),
    ];

    QuantizedPoint {
        coarse: pack_tier(q, 2 * TIER_BITS),
        medium: pack_tier(q, TIER_BITS),
        fine: pack_tier(q, 0),
    }
}

impl QuantizedPoint {
    /// Reassembles the per-axis fixed-point values from the tiers `level` reads.
    pub fn combine(&self, level: AccuracyLevel) -> [u32; 3] {
        let mut q = unpack_tier(self.coarse).map(|v| v << (2 * TIER_BITS));

        if level >= AccuracyLevel::Medium {
            let m = unpack_tier(self.medium);
            for axis in 0..3 {
                q[axis] |= m[axis] << TIER_BITS;
            }
        }

        if level >= AccuracyLevel::Fine {
            let f = unpack_tier(self.fine);
            for axis in 0..3 {
                q[axis] |= f[axis];
            }
        }

        q
    }

    /// Reconstructs a world-space position the way a renderer reading
    /// `level` tiers would.
    pub fn decode(&self, level: AccuracyLevel, origin: Vec3, size: Vec3) -> Vec3 {
        let q = self.combine(level);
        let t = Vec3::new(q[0] as f32, q[1] as f32, q[2] as f32) / QUANT_MAX as f32;
        origin + t * size
    }
}
