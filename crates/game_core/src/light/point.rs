//! Point light: omnidirectional light bounded by a sphere.

use bevy::prelude::*;

use super::{LightError, LightResult};

/// Point light state.
///
/// The radius is validated, so it is only reachable through
/// [`DeferredPointLight::set_radius`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredPointLight {
    pub position: Vec3,
    radius: f32,
    pub intensity: f32,
}

impl DeferredPointLight {
    pub fn new(position: Vec3, radius: f32, intensity: f32) -> LightResult<Self> {
        let mut light = Self {
            position,
            radius: 0.0,
            intensity,
        };
        light.set_radius(radius)?;
        Ok(light)
    }

    /// Like [`new`](Self::new) but clamps a negative or NaN radius to zero.
    pub fn clamped(position: Vec3, radius: f32, intensity: f32) -> Self {
        Self {
            position,
            radius: if radius >= 0.0 { radius } else { 0.0 },
            intensity,
        }
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn set_radius(&mut self, radius: f32) -> LightResult<()> {
        // NaN fails this test too
        if !(radius >= 0.0) {
            return Err(LightError::NegativeRadius(radius));
        }
        self.radius = radius;
        Ok(())
    }

    /// Unit sphere scaled to the radius and moved to the light.
    pub fn world_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(Vec3::splat(self.radius), Quat::IDENTITY, self.position)
    }

    /// Whether `point` lies strictly inside the light sphere.
    pub fn contains(&self, point: Vec3) -> bool {
        point.distance(self.position) < self.radius
    }
}
