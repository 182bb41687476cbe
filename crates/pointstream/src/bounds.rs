use glam::Vec3;

/// Axis-aligned bounding box. The empty box has `min = +inf`, `max = -inf`
/// so that extending it with any point yields that point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BoundingBox {
    pub const EMPTY: Self = Self {
        min: Vec3::INFINITY,
        max: Vec3::NEG_INFINITY,
    };

    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Builds a box from `[minX, minY, minZ, maxX, maxY, maxZ]`.
    #[inline]
    pub fn from_array(a: [f32; 6]) -> Self {
        Self {
            min: Vec3::new(a[0], a[1], a[2]),
            max: Vec3::new(a[3], a[4], a[5]),
        }
    }

    /// Returns `[minX, minY, minZ, maxX, maxY, maxZ]`.
    #[inline]
    pub fn to_array(&self) -> [f32; 6] {
        [
            self.min.x, self.min.y, self.min.z,
            self.max.x, self.max.y, self.max.z,
        ]
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[inline]
    pub fn extend(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// The min corner; quantized positions are measured from here.
    #[inline]
    pub fn origin(&self) -> Vec3 {
        self.min
    }

    /// `max - min` per axis, zero for an empty box.
    #[inline]
    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// The eight corners, x varying fastest, then y, then z.
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }
}

impl FromIterator<Vec3> for BoundingBox {
    fn from_iter<I: IntoIterator<Item = Vec3>>(iter: I) -> Self {
        let mut bbox = Self::EMPTY;
        for p in iter {
            bbox.extend(p);
        }
        bbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_box_has_zero_size() {
        let bbox = BoundingBox::EMPTY;
        assert!(bbox.is_empty());
        assert_eq!(bbox.size(), Vec3::ZERO);
        assert_eq!(bbox.to_array()[0], f32::INFINITY);
        assert_eq!(bbox.to_array()[3], f32::NEG_INFINITY);
    }

    #[test]
    fn extend_and_union() {
        let a: BoundingBox = [Vec3::new(1.0, 2.0, 3.0), Vec3::new(-1.0, 5.0, 0.0)]
            .into_iter()
            .collect();
        assert_eq!(a.to_array(), [-1.0, 2.0, 0.0, 1.0, 5.0, 3.0]);
        assert_eq!(a.size(), Vec3::new(2.0, 3.0, 3.0));

        let b = BoundingBox::new(Vec3::splat(4.0), Vec3::splat(6.0));
        let u = a.union(&b);
        assert_eq!(u.to_array(), [-1.0, 2.0, 0.0, 6.0, 6.0, 6.0]);
        assert_eq!(a.union(&BoundingBox::EMPTY), a);
    }

    #[test]
    fn corners_span_the_box() {
        let bbox = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        let corners = bbox.corners();
        assert_eq!(corners[0], Vec3::ZERO);
        assert_eq!(corners[7], Vec3::ONE);
        assert!(corners.iter().all(|c| bbox.contains(*c)));
    }
}
