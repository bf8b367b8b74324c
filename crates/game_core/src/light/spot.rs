//! Spot light: cone-shaped light with its own shadow map.
//!
//! The light keeps a view/projection pair for its shadow pass. Setters that
//! move or reshape the cone only mark the pair dirty; [`DeferredSpotLight::recompute`]
//! rebuilds it once per update tick.

use std::f32::consts::FRAC_PI_2;

use bevy::prelude::*;

use super::{LightError, LightResult};

/// Near plane of the shadow projection.
pub const SPOT_NEAR_PLANE: f32 = 1.0;

/// Smallest field of view fed to the projection so a zero angle stays finite.
const MIN_SPOT_FOV: f32 = 1.0e-3;

/// Spot light state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredSpotLight {
    position: Vec3,
    direction: Vec3,
    max_distance: f32,
    /// Full cone aperture in radians.
    angle: f32,
    /// Exponent of the falloff from the cone axis to its rim.
    pub decay_rate: f32,
    pub intensity: f32,
    view: Mat4,
    projection: Mat4,
    dirty: bool,
}

impl DeferredSpotLight {
    /// Create a spot light.
    ///
    /// An angle outside `[0, PI/2]` is replaced by `PI/2` rather than
    /// rejected; use [`set_angle`](Self::set_angle) for strict validation.
    pub fn new(
        position: Vec3,
        direction: Vec3,
        max_distance: f32,
        angle: f32,
        intensity: f32,
        decay_rate: f32,
    ) -> Self {
        let angle = if Self::angle_in_range(angle) { angle } else { FRAC_PI_2 };
        let mut light = Self {
            position,
            direction,
            max_distance: max_distance.max(0.0),
            angle,
            decay_rate,
            intensity,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            dirty: true,
        };
        light.recompute();
        light
    }

    fn angle_in_range(angle: f32) -> bool {
        (0.0..=FRAC_PI_2).contains(&angle)
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty = true;
    }

    /// Normalized light direction. A zero vector falls back to straight down.
    pub fn direction(&self) -> Vec3 {
        self.direction.try_normalize().unwrap_or(Vec3::NEG_Y)
    }

    pub fn set_direction(&mut self, direction: Vec3) {
        self.direction = direction;
        self.dirty = true;
    }

    pub fn max_distance(&self) -> f32 {
        self.max_distance
    }

    pub fn set_max_distance(&mut self, max_distance: f32) -> LightResult<()> {
        if !(max_distance >= 0.0) {
            return Err(LightError::NegativeDistance(max_distance));
        }
        self.max_distance = max_distance;
        self.dirty = true;
        Ok(())
    }

    /// Full cone aperture in radians, rim to rim.
    ///
    /// The shadow projection uses it as its field of view. The cone test and
    /// the light shader compare against `cos(angle / 2)` and the proxy cone
    /// radius is `tan(angle / 2)` per unit of distance.
    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// Set the cone aperture. Accepts exactly `[0, PI/2]` radians.
    pub fn set_angle(&mut self, angle: f32) -> LightResult<()> {
        if !Self::angle_in_range(angle) {
            return Err(LightError::AngleOutOfRange(angle));
        }
        self.angle = angle;
        self.dirty = true;
        Ok(())
    }

    /// Cosine of the angle between the axis and the cone rim.
    pub fn cos_half_angle(&self) -> f32 {
        (self.angle * 0.5).cos()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Rebuild view and projection if anything changed since the last call.
    ///
    /// Returns true when the matrices were rebuilt.
    pub fn recompute(&mut self) -> bool {
        if !self.dirty {
            return false;
        }

        let direction = self.direction();

        let mut target = self.position + direction;
        if target == Vec3::ZERO {
            target = Vec3::NEG_Y;
        }

        let up = if direction.cross(Vec3::Y).length_squared() < 1.0e-8 {
            Vec3::X
        } else {
            Vec3::Y
        };

        self.view = Mat4::look_at_rh(self.position, target, up);
        self.projection = Mat4::perspective_rh(
            self.angle.max(MIN_SPOT_FOV),
            1.0,
            SPOT_NEAR_PLANE,
            self.max_distance.max(SPOT_NEAR_PLANE + 1.0e-3),
        );
        self.dirty = false;
        true
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// World matrix for the unit cone proxy.
    ///
    /// The proxy has its apex at the origin and a base of radius 0.5 at
    /// `z = -1`. Rotation comes from decomposing `inverse(view) * scale`, so
    /// the cone follows the same frame as the shadow camera.
    pub fn cone_world_matrix(&self) -> Mat4 {
        let radial = (self.angle * 0.5).tan() * 2.0 * self.max_distance;
        let scale = Vec3::new(radial, radial, self.max_distance);
        let semi_product = self.view.inverse() * Mat4::from_scale(scale);
        let (_, rotation, _) = semi_product.to_scale_rotation_translation();
        Mat4::from_scale_rotation_translation(scale, rotation, self.position)
    }

    /// Whether `point` lies inside the lit cone.
    pub fn contains(&self, point: Vec3) -> bool {
        let to_point = point - self.position;
        let along = to_point.dot(self.direction());
        if along <= 0.0 || along > self.max_distance {
            return false;
        }
        along / to_point.length() >= self.cos_half_angle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn down_spot() -> DeferredSpotLight {
        DeferredSpotLight::new(Vec3::new(0.0, 15.0, 0.0), Vec3::NEG_Y, 100.0, FRAC_PI_2, 1.0, 1.0)
    }

    #[test]
    fn test_angle_setter_accepts_closed_interval() {
        let mut light = down_spot();
        assert!(light.set_angle(0.0).is_ok());
        assert!(light.set_angle(FRAC_PI_2).is_ok());
        assert!(light.set_angle(0.3).is_ok());
        assert_eq!(light.angle(), 0.3);
    }

    #[test]
    fn test_angle_setter_rejects_outside_values() {
        let mut light = down_spot();
        light.set_angle(0.3).unwrap();
        for bad in [-1.0e-4, FRAC_PI_2 + 1.0e-4, std::f32::consts::PI, f32::NAN] {
            let result = light.set_angle(bad);
            assert!(
                matches!(result, Err(LightError::AngleOutOfRange(_))),
                "angle {} should be rejected",
                bad
            );
        }
        assert_eq!(light.angle(), 0.3, "rejected angle must not stick");
    }

    #[test]
    fn test_constructor_clamps_invalid_angle() {
        let light = DeferredSpotLight::new(Vec3::ZERO, Vec3::NEG_Y, 10.0, 3.0, 1.0, 1.0);
        assert_eq!(light.angle(), FRAC_PI_2);
    }

    #[test]
    fn test_setters_mark_dirty_and_recompute_clears() {
        let mut light = down_spot();
        assert!(!light.is_dirty(), "constructor computes matrices");

        light.set_direction(Vec3::new(1.0, -1.0, 0.0));
        assert!(light.is_dirty());
        let stale_view = light.view();
        assert!(light.recompute());
        assert!(!light.is_dirty());
        assert_ne!(light.view(), stale_view);
        assert!(!light.recompute(), "second recompute is a no-op");
    }

    #[test]
    fn test_setters_do_not_touch_matrices() {
        let mut light = down_spot();
        let view = light.view();
        light.set_position(Vec3::new(5.0, 5.0, 5.0));
        assert_eq!(light.view(), view, "matrices only change on recompute");
    }

    #[test]
    fn test_vertical_direction_uses_fallback_up() {
        let light = down_spot();
        let view = light.view();
        assert!(view.is_finite(), "look-at with collinear up must not degenerate");
        let forward = view.inverse().transform_vector3(Vec3::NEG_Z);
        assert!((forward - Vec3::NEG_Y).length() < 1e-5);
    }

    #[test]
    fn test_target_at_origin_substituted() {
        let light = DeferredSpotLight::new(Vec3::new(0.0, 1.0, 0.0), Vec3::NEG_Y, 10.0, 0.5, 1.0, 1.0);
        assert!(light.view().is_finite());
    }

    #[test]
    fn test_cone_reaches_max_distance_along_direction() {
        let mut light = down_spot();
        light.set_direction(Vec3::new(1.0, -1.0, 0.0));
        light.set_angle(0.6).unwrap();
        light.recompute();

        let world = light.cone_world_matrix();
        let apex = world.transform_point3(Vec3::ZERO);
        let base_center = world.transform_point3(Vec3::NEG_Z);
        let rim = world.transform_point3(Vec3::new(0.5, 0.0, -1.0));

        assert!((apex - light.position()).length() < 1e-4);
        let expected = light.position() + light.direction() * light.max_distance();
        assert!((base_center - expected).length() < 1e-3, "{:?} vs {:?}", base_center, expected);

        let rim_radius = (rim - base_center).length();
        let expected_radius = (0.3f32).tan() * light.max_distance();
        assert!((rim_radius - expected_radius).abs() < 1e-3);
    }

    #[test]
    fn test_angle_is_full_aperture() {
        let mut light = down_spot();
        light.set_angle(0.8).unwrap();
        light.recompute();

        assert!((light.cos_half_angle() - 0.4f32.cos()).abs() < 1e-6);
        let focal = light.projection().y_axis.y;
        assert!(
            (focal - 1.0 / 0.4f32.tan()).abs() < 1e-4,
            "projection field of view is the whole aperture, got focal {}",
            focal
        );
        let rim = light.position() + Vec3::new(0.39f32.tan(), -1.0, 0.0) * 10.0;
        assert!(light.contains(rim), "just inside half the aperture");
    }

    #[test]
    fn test_contains_uses_cone_geometry() {
        let mut light = down_spot();
        light.set_angle(FRAC_PI_2).unwrap();
        light.recompute();

        assert!(light.contains(Vec3::new(0.0, 5.0, 0.0)), "on the axis");
        assert!(light.contains(Vec3::new(4.0, 5.0, 0.0)), "inside 45 degree half angle");
        assert!(!light.contains(Vec3::new(12.0, 5.0, 0.0)), "outside the rim");
        assert!(!light.contains(Vec3::new(0.0, 20.0, 0.0)), "behind the apex");
        assert!(!light.contains(Vec3::new(0.0, -200.0, 0.0)), "past max distance");
    }

    #[test]
    fn test_negative_distance_rejected() {
        let mut light = down_spot();
        assert_eq!(light.set_max_distance(-1.0), Err(LightError::NegativeDistance(-1.0)));
        assert_eq!(light.max_distance(), 100.0);
    }
}
