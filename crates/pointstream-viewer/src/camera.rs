//! Orbit camera around a target point in a Z-up scene.

use glam::{Mat4, Vec3};
use pointstream::BoundingBox;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};

pub struct Camera {
    pub target: Vec3,
    pub radius: f32,
    pub azimuth_rad: f32,
    pub elevation_rad: f32,
    pub fov_y_rad: f32,
    pub aspect: f32,
    position: Vec3,
}

impl Camera {
    pub fn new(aspect: f32) -> Self {
        let mut camera = Self {
            target: Vec3::ZERO,
            radius: 100.0,
            azimuth_rad: -90f32.to_radians(),
            elevation_rad: 35f32.to_radians(),
            fov_y_rad: 60f32.to_radians(),
            aspect,
            position: Vec3::ZERO,
        };
        camera.update();
        camera
    }

    /// Recomputes the eye position from the orbit parameters.
    pub fn update(&mut self) {
        let (sin_el, cos_el) = self.elevation_rad.sin_cos();
        let (sin_az, cos_az) = self.azimuth_rad.sin_cos();
        let dir = Vec3::new(cos_el * cos_az, cos_el * sin_az, sin_el);
        self.position = self.target + dir * self.radius;
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Horizontal field of view; stays below 180° for any aspect.
    pub fn fov_x_rad(&self) -> f32 {
        2.0 * ((self.fov_y_rad * 0.5).tan() * self.aspect).atan()
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, Vec3::Z)
    }

    /// Near and far planes follow the orbit radius.
    pub fn proj(&self) -> Mat4 {
        let near = (self.radius * 1e-3).max(0.01);
        let far = self.radius * 100.0 + 1000.0;
        Mat4::perspective_rh(self.fov_y_rad, self.aspect, near, far)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj() * self.view()
    }

    /// Centers on `bbox` at a distance where its largest side spans the
    /// horizontal field of view. Empty boxes leave the camera unchanged.
    pub fn frame_extent(&mut self, bbox: &BoundingBox) {
        if bbox.is_empty() {
            return;
        }
        let max_size = bbox.size().max_element().max(1e-3);
        self.target = bbox.center();
        self.radius = max_size / (self.fov_x_rad() * 0.5).tan();
        self.update();
    }
}

/// Left drag orbits, right drag pans, the wheel zooms.
#[derive(Default)]
pub struct CameraController {
    orbiting: bool,
    panning: bool,
    last_mouse: Option<(f64, f64)>,
}

impl CameraController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_event(&mut self, event: &WindowEvent, camera: &mut Camera) {
        match event {
            WindowEvent::MouseInput { button, state, .. } => {
                let pressed = *state == ElementState::Pressed;
                match button {
                    MouseButton::Left => self.orbiting = pressed,
                    MouseButton::Right | MouseButton::Middle => self.panning = pressed,
                    _ => {}
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.handle_cursor((position.x, position.y), camera);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 120.0,
                };

                self.handle_scroll(scroll, camera);
            }
            _ => {}
        }
    }

    fn handle_scroll(&mut self, delta: f32, camera: &mut Camera) {
        // Scroll up zooms in.
        camera.radius *= 1.1_f32.powf(-delta);
        camera.radius = camera.radius.clamp(0.01, 1.0e7);
        camera.update();
    }

    fn handle_cursor(&mut self, xy: (f64, f64), camera: &mut Camera) {
        if let Some(last) = self.last_mouse {
            let dx = (xy.0 - last.0) as f32;
            let dy = (xy.1 - last.1) as f32;

            if self.orbiting {
                camera.azimuth_rad -= dx * 0.005;
                camera.elevation_rad += dy * 0.005;
                camera.elevation_rad = camera
                    .elevation_rad
                    .clamp(-89f32.to_radians(), 89f32.to_radians());
                camera.update();
            } else if self.panning {
                let forward = (camera.target - camera.position()).normalize_or_zero();
                let right = forward.cross(Vec3::Z).normalize_or_zero();
                let up = right.cross(forward);
                let scale = camera.radius * 0.0015;
                camera.target += (-right * dx + up * dy) * scale;
                camera.update();
            }
        }
        self.last_mouse = Some(xy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_uses_horizontal_fov() {
        let mut camera = Camera::new(1.5);
        let bbox = BoundingBox::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(100.0, 40.0, 10.0));
        camera.frame_extent(&bbox);

        assert_eq!(camera.target, Vec3::new(50.0, 20.0, 5.0));
        // tan(fovX / 2) = tan(fovY / 2) * aspect
        let expected = 100.0 / ((30f32.to_radians()).tan() * 1.5);
        assert!((camera.radius - expected).abs() < 1e-3);
        assert!((camera.position().distance(camera.target) - expected).abs() < 1e-2);
    }

    #[test]
    fn framed_box_is_in_front_of_the_camera() {
        let mut camera = Camera::new(1.0);
        let bbox = BoundingBox::new(Vec3::splat(-10.0), Vec3::splat(10.0));
        camera.frame_extent(&bbox);

        let clip = camera.view_proj() * bbox.center().extend(1.0);
        assert!(clip.w > 0.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-3 && ndc.y.abs() < 1e-3);
        assert!((0.0..1.0).contains(&ndc.z));
    }

    #[test]
    fn ultra_wide_window_still_frames_the_box() {
        let mut camera = Camera::new(32.0 / 9.0);
        assert!(camera.fov_x_rad() < std::f32::consts::PI);

        let bbox = BoundingBox::new(Vec3::ZERO, Vec3::splat(100.0));
        camera.frame_extent(&bbox);
        assert!(camera.radius > 0.0);

        let clip = camera.view_proj() * bbox.center().extend(1.0);
        assert!(clip.w > 0.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-3 && ndc.y.abs() < 1e-3);
        assert!((0.0..1.0).contains(&ndc.z));
    }

    #[test]
    fn empty_extent_is_ignored() {
        let mut camera = Camera::new(1.0);
        camera.frame_extent(&BoundingBox::EMPTY);
        assert_eq!(camera.target, Vec3::ZERO);
        assert_eq!(camera.radius, 100.0);
    }
}
