//! Screen-space projection of batch boxes: frustum test and level of detail.

use crate::bounds::BoundingBox;
use crate::quantize::AccuracyLevel;
use glam::{Mat4, Vec2, Vec4Swizzles};

const MATRIX_EPSILON: f32 = 1e-6;

/// One box corner after projection.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProjectedCorner {
    pub ndc: Vec2,
    pub screen: Vec2,
    pub w: f32,
    /// False when the corner lies on or behind the camera plane.
    pub valid: bool,
}

/// The eight projected corners of a box plus the rectangles spanned by the
/// valid ones.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectedBox {
    pub corners: [ProjectedCorner; 8],
    pub valid_count: u32,
    pub ndc_min: Vec2,
    pub ndc_max: Vec2,
    pub screen_min: Vec2,
    pub screen_max: Vec2,
}

impl ProjectedBox {
    pub fn project(bbox: &BoundingBox, view_proj: &Mat4, screen_size: Vec2) -> Self {
        let mut out = Self {
            corners: [ProjectedCorner::default(); 8],
            valid_count: 0,
            ndc_min: Vec2::INFINITY,
            ndc_max: Vec2::NEG_INFINITY,
            screen_min: Vec2::INFINITY,
            screen_max: Vec2::NEG_INFINITY,
        };

        if bbox.is_empty() {
            return out;
        }

        for (slot, corner) in out.corners.iter_mut().zip(bbox.corners()) {
            let clip = *view_proj * corner.extend(1.0);
            if clip.w <= 0.0 || !clip.is_finite() {
                slot.w = clip.w;
                continue;
            }

            let ndc = clip.xy() / clip.w;
            let screen = (ndc * 0.5 + 0.5) * screen_size;
            *slot = ProjectedCorner {
                ndc,
                screen,
                w: clip.w,
                valid: true,
            };

            out.valid_count += 1;
            out.ndc_min = out.ndc_min.min(ndc);
            out.ndc_max = out.ndc_max.max(ndc);
            out.screen_min = out.screen_min.min(screen);
            out.screen_max = out.screen_max.max(screen);
        }

        out
    }

    /// Some corners in front of the camera and some behind.
    #[inline]
    pub fn straddles_camera(&self) -> bool {
        self.valid_count > 0 && self.valid_count < 8
    }

    /// Screen-space extent of the valid corners.
    #[inline]
    pub fn screen_extent(&self) -> Vec2 {
        if self.valid_count == 0 {
            Vec2::ZERO
        } else {
            self.screen_max - self.screen_min
        }
    }

    /// Overlap of the NDC rectangle with `[-1, 1]` on X and Y. Depth is not
    /// tested.
    pub fn is_visible(&self) -> bool {
        if self.valid_count == 0 {
            return false;
        }
        if self.straddles_camera() {
            return true;
        }

        self.ndc_max.x >= -1.0 && self.ndc_min.x <= 1.0 && self.ndc_max.y >= -1.0 && self.ndc_min.y <= 1.0
    }

    /// Fine above a quarter of the screen in either direction, medium above
    /// an eighth, coarse otherwise.
    pub fn accuracy_level(&self, screen_size: Vec2) -> AccuracyLevel {
        if self.valid_count == 0 {
            return AccuracyLevel::Coarse;
        }
        if self.straddles_camera() {
            return AccuracyLevel::Fine;
        }

        let extent = self.screen_extent();
        if extent.x > screen_size.x / 4.0 || extent.y > screen_size.y / 4.0 {
            AccuracyLevel::Fine
        } else if extent.x > screen_size.x / 8.0 || extent.y > screen_size.y / 8.0 {
            AccuracyLevel::Medium
        } else {
            AccuracyLevel::Coarse
        }
    }
}

/// Last projection of one box, reused while the camera and screen stay put.
#[derive(Clone, Debug, Default)]
pub struct ProjectionCache {
    key: Option<(Mat4, Vec2)>,
    projected: Option<ProjectedBox>,
}

impl ProjectionCache {
    pub fn get_or_project(&mut self, bbox: &BoundingBox, view_proj: &Mat4, screen_size: Vec2) -> &ProjectedBox {
        let hit = matches!(
            self.key,
            Some((m, s)) if s == screen_size && m.abs_diff_eq(*view_proj, MATRIX_EPSILON)
        );

        if !hit || self.projected.is_none() {
            self.key = Some((*view_proj, screen_size));
            self.projected = None;
        }

        self.projected
            .get_or_insert_with(|| ProjectedBox::project(bbox, view_proj, screen_size))
    }

    pub fn invalidate(&mut self) {
        self.key = None;
        self.projected = None;
    }

    pub fn is_cached(&self) -> bool {
        self.projected.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    const SCREEN: Vec2 = Vec2::new(1000.0, 800.0);

    fn camera_at(eye: Vec3, target: Vec3) -> Mat4 {
        let proj = Mat4::perspective_rh(60f32.to_radians(), SCREEN.x / SCREEN.y, 0.1, 1000.0);
        proj * Mat4::look_at_rh(eye, target, Vec3::Y)
    }

    fn unit_box_at(center: Vec3) -> BoundingBox {
        BoundingBox::new(center - Vec3::splat(0.5), center + Vec3::splat(0.5))
    }

    #[test]
    fn box_in_front_is_visible() {
        let vp = camera_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        let projected = ProjectedBox::project(&unit_box_at(Vec3::ZERO), &vp, SCREEN);
        assert_eq!(projected.valid_count, 8);
        assert!(projected.is_visible());
    }

    #[test]
    fn box_behind_camera_is_culled() {
        let vp = camera_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        let projected = ProjectedBox::project(&unit_box_at(Vec3::new(0.0, 0.0, 20.0)), &vp, SCREEN);
        assert_eq!(projected.valid_count, 0);
        assert!(!projected.is_visible());
        assert_eq!(projected.accuracy_level(SCREEN), AccuracyLevel::Coarse);
    }

    #[test]
    fn box_beside_frustum_is_culled() {
        let vp = camera_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        let projected = ProjectedBox::project(&unit_box_at(Vec3::new(50.0, 0.0, 0.0)), &vp, SCREEN);
        assert_eq!(projected.valid_count, 8);
        assert!(!projected.is_visible());
    }

    #[test]
    fn straddling_box_is_visible_and_fine() {
        let vp = camera_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));
        let bbox = BoundingBox::new(Vec3::splat(-5.0), Vec3::splat(5.0));
        let projected = ProjectedBox::project(&bbox, &vp, SCREEN);
        assert!(projected.straddles_camera());
        assert!(projected.is_visible());
        assert_eq!(projected.accuracy_level(SCREEN), AccuracyLevel::Fine);
    }

    #[test]
    fn level_grows_as_the_camera_approaches() {
        let bbox = unit_box_at(Vec3::ZERO);
        let level_at = |distance: f32| {
            let vp = camera_at(Vec3::new(0.0, 0.0, distance), Vec3::ZERO);
            ProjectedBox::project(&bbox, &vp, SCREEN).accuracy_level(SCREEN)
        };

        assert_eq!(level_at(200.0), AccuracyLevel::Coarse);
        assert_eq!(level_at(6.0), AccuracyLevel::Medium);
        assert_eq!(level_at(2.0), AccuracyLevel::Fine);
    }

    #[test]
    fn cache_reprojects_on_camera_or_screen_change() {
        let bbox = unit_box_at(Vec3::ZERO);
        let near = camera_at(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO);
        let far = camera_at(Vec3::new(0.0, 0.0, 200.0), Vec3::ZERO);
        let mut cache = ProjectionCache::default();

        let first = *cache.get_or_project(&bbox, &near, SCREEN);
        assert!(cache.is_cached());
        // A different box under the same key still hits the cache.
        let stale = *cache.get_or_project(&unit_box_at(Vec3::splat(100.0)), &near, SCREEN);
        assert_eq!(first, stale);

        let moved = *cache.get_or_project(&bbox, &far, SCREEN);
        assert_ne!(first, moved);

        let resized = *cache.get_or_project(&bbox, &far, SCREEN * 2.0);
        assert_ne!(moved.screen_max, resized.screen_max);

        cache.invalidate();
        assert!(!cache.is_cached());
    }
}
