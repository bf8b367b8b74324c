//! Free-fly camera.
//!
//! - Right mouse drag: look around (yaw and pitch)
//! - WASD: move along the view plane, Q/E: down/up

use bevy::input::mouse::AccumulatedMouseMotion;
use bevy::prelude::*;

/// Pitch limit just short of straight up/down.
const MAX_PITCH: f32 = 1.54;

/// Free-fly camera state.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct FreeCamera {
    /// Rotation about +Y (radians)
    pub yaw: f32,
    /// Rotation about the camera's local X (radians)
    pub pitch: f32,
    /// Units per second
    pub speed: f32,
    /// Radians per pixel of mouse motion
    pub sensitivity: f32,
}

impl Default for FreeCamera {
    fn default() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            speed: 20.0,
            sensitivity: 0.003,
        }
    }
}

impl FreeCamera {
    /// Camera at `position` facing `target`.
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        let direction = (target - position).try_normalize().unwrap_or(Vec3::NEG_Z);
        Self {
            yaw: (-direction.x).atan2(-direction.z),
            pitch: direction.y.asin().clamp(-MAX_PITCH, MAX_PITCH),
            ..default()
        }
    }

    pub fn rotation(&self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.yaw, self.pitch, 0.0)
    }

    /// Apply a mouse delta in pixels.
    pub fn look(&mut self, delta: Vec2) {
        self.yaw -= delta.x * self.sensitivity;
        self.pitch = (self.pitch - delta.y * self.sensitivity).clamp(-MAX_PITCH, MAX_PITCH);
    }
}

/// Movement keys held this frame, as a local-space direction.
///
/// X = right, Y = up, Z = back (Bevy camera convention).
pub fn movement_axis(keys: &ButtonInput<KeyCode>) -> Vec3 {
    let axis = |positive: KeyCode, negative: KeyCode| {
        keys.pressed(positive) as i32 as f32 - keys.pressed(negative) as i32 as f32
    };
    Vec3::new(
        axis(KeyCode::KeyD, KeyCode::KeyA),
        axis(KeyCode::KeyE, KeyCode::KeyQ),
        axis(KeyCode::KeyS, KeyCode::KeyW),
    )
}

pub fn free_camera_system(
    time: Res<Time>,
    keys: Res<ButtonInput<KeyCode>>,
    mouse_button: Res<ButtonInput<MouseButton>>,
    mouse_motion: Res<AccumulatedMouseMotion>,
    mut query: Query<(&mut FreeCamera, &mut Transform)>,
) {
    let axis = movement_axis(&keys);
    for (mut camera, mut transform) in query.iter_mut() {
        if mouse_button.pressed(MouseButton::Right) {
            camera.look(mouse_motion.delta);
        }

        let rotation = camera.rotation();
        transform.rotation = rotation;
        if let Some(direction) = (rotation * axis).try_normalize() {
            transform.translation += direction * camera.speed * time.delta_secs();
        }
    }
}

pub struct FreeCameraPlugin;

impl Plugin for FreeCameraPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, free_camera_system);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looking_at_faces_target() {
        let position = Vec3::new(0.0, 5.0, 20.0);
        let camera = FreeCamera::looking_at(position, Vec3::ZERO);
        let forward = camera.rotation() * Vec3::NEG_Z;
        let expected = (Vec3::ZERO - position).normalize();
        assert!((forward - expected).length() < 1e-4, "forward {:?}", forward);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut camera = FreeCamera::default();
        camera.look(Vec2::new(0.0, -100_000.0));
        assert_eq!(camera.pitch, MAX_PITCH);
        camera.look(Vec2::new(0.0, 100_000.0));
        assert_eq!(camera.pitch, -MAX_PITCH);
    }

    #[test]
    fn test_wasd_axis() {
        let mut keys = ButtonInput::<KeyCode>::default();
        keys.press(KeyCode::KeyW);
        keys.press(KeyCode::KeyD);
        assert_eq!(movement_axis(&keys), Vec3::new(1.0, 0.0, -1.0));
        keys.press(KeyCode::KeyS);
        assert_eq!(movement_axis(&keys).z, 0.0, "opposite keys cancel");
    }

    #[test]
    fn test_default_speed() {
        assert_eq!(FreeCamera::default().speed, 20.0);
    }
}
