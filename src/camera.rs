// src/camera.rs
use glam::{Mat4, Vec2, Vec3};

/// Perspective camera with position and Euler rotation (yaw, pitch).
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// yaw: rotation around Y axis (radians). pitch: rotation around X axis (radians).
    pub yaw: f32,
    pub pitch: f32,

    pub fovy: f32,
    pub aspect: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 1.0, -5.0), 0.0, 0.0, 60f32.to_radians(), 16.0 / 9.0, 0.1, 100.0)
    }
}

impl Camera {
    /// Create a new perspective camera.
    pub fn new(position: Vec3, yaw: f32, pitch: f32, fovy_radians: f32, aspect: f32, znear: f32, zfar: f32) -> Self {
        Self {
            position,
            yaw,
            pitch,
            fovy: fovy_radians,
            aspect,
            znear,
            zfar,
        }
    }

    /// Unit view direction from yaw/pitch.
    pub fn forward(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw).normalize_or_zero()
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(Vec3::Y).normalize_or_zero()
    }

    /// Build view matrix from position + yaw/pitch (right-handed, Y up).
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), Vec3::Y)
    }

    /// Build projection matrix (perspective).
    pub fn proj_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fovy, self.aspect, self.znear, self.zfar)
    }

    /// Combined view-projection matrix.
    pub fn view_proj_matrix(&self) -> Mat4 {
        self.proj_matrix() * self.view_matrix()
    }

    /// Update aspect ratio (call on resize).
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    pub fn set_position(&mut self, pos: Vec3) {
        self.position = pos;
    }

    pub fn set_rotation(&mut self, yaw: f32, pitch: f32) {
        self.yaw = yaw;
        self.pitch = pitch;
    }

    /// Point the camera at `target`.
    pub fn look_at(&mut self, target: Vec3) {
        let dir = (target - self.position).normalize_or_zero();
        if dir == Vec3::ZERO {
            return;
        }
        self.pitch = dir.y.clamp(-1.0, 1.0).asin();
        self.yaw = dir.x.atan2(dir.z);
    }

    /// View-space depth of a world position; larger is farther.
    pub fn view_depth(&self, point: Vec3) -> f32 {
        (point - self.position).dot(self.forward())
    }
}

/// Free-fly controller. Fed movement axes and mouse deltas by the window
/// layer, applied once per frame.
#[derive(Debug, Clone)]
pub struct CameraController {
    pub speed: f32,
    pub sensitivity: f32,
    /// Movement intent in camera space: x right, y up, z forward. Each axis in -1..=1.
    movement: Vec3,
    /// Accumulated (yaw, pitch) since the last update, already scaled.
    look: Vec2,
}

const MAX_PITCH: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

impl CameraController {
    pub fn new(speed: f32, sensitivity: f32) -> Self {
        Self {
            speed,
            sensitivity,
            movement: Vec3::ZERO,
            look: Vec2::ZERO,
        }
    }

    pub fn process_keyboard(&mut self, forward: f32, right: f32, up: f32) {
        self.movement = Vec3::new(right, up, forward).clamp(Vec3::NEG_ONE, Vec3::ONE);
    }

    pub fn process_mouse(&mut self, dx: f32, dy: f32) {
        self.look += Vec2::new(dx, dy) * self.sensitivity;
    }

    /// Pending look delta not yet applied to a camera.
    pub fn pending_look(&self) -> Vec2 {
        self.look
    }

    pub fn update_camera(&mut self, camera: &mut Camera, dt: f32) {
        let look = std::mem::take(&mut self.look);
        camera.yaw += look.x;
        camera.pitch = (camera.pitch + look.y).clamp(-MAX_PITCH, MAX_PITCH);

        let step = self.speed * dt;
        camera.position += (camera.right() * self.movement.x + Vec3::Y * self.movement.y + camera.forward() * self.movement.z) * step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_look_at_faces_target() {
        let mut camera = Camera::default();
        camera.set_position(Vec3::ZERO);
        camera.look_at(Vec3::new(3.0, 0.0, 3.0));
        assert!(camera.forward().abs_diff_eq(Vec3::new(1.0, 0.0, 1.0).normalize(), 1e-5));
        assert!(camera.view_depth(Vec3::new(3.0, 0.0, 3.0)) > camera.view_depth(Vec3::new(1.0, 0.0, 1.0)));
    }

    #[test]
    fn test_controller_clamps_pitch() {
        let mut camera = Camera::default();
        let mut controller = CameraController::new(1.0, 1.0);
        controller.process_mouse(0.0, 10.0);
        controller.update_camera(&mut camera, 0.016);
        assert!(camera.pitch < std::f32::consts::FRAC_PI_2);
        assert_eq!(controller.pending_look(), Vec2::ZERO);
    }

    #[test]
    fn test_controller_moves_along_view() {
        let mut camera = Camera::default();
        camera.set_position(Vec3::ZERO);
        camera.set_rotation(0.0, 0.0);
        let mut controller = CameraController::new(2.0, 0.01);
        controller.process_keyboard(1.0, 0.0, 0.0);
        controller.update_camera(&mut camera, 0.5);
        assert!(camera.position.abs_diff_eq(Vec3::Z, 1e-5));
    }
}
