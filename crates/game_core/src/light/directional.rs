//! Directional light: parallel rays lighting every pixel.

use bevy::prelude::*;

/// Directional light state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredDirectionalLight {
    direction: Vec3,
    pub intensity: f32,
}

impl DeferredDirectionalLight {
    pub fn new(direction: Vec3) -> Self {
        Self {
            direction,
            intensity: 1.0,
        }
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    /// Normalized direction the light travels in.
    ///
    /// A zero vector falls back to straight down.
    pub fn direction(&self) -> Vec3 {
        self.direction.try_normalize().unwrap_or(Vec3::NEG_Y)
    }

    pub fn set_direction(&mut self, direction: Vec3) {
        self.direction = direction;
    }
}
