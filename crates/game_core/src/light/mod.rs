//! Light system for the deferred renderer.
//!
//! A light is a single [`DeferredLight`] component whose [`LightKind`] decides
//! how it reaches the accumulation buffer:
//!
//! - **Directional**: fullscreen quad, touches every pixel.
//! - **Point**: unit sphere scaled to the light radius.
//! - **Spot**: unit cone aligned with the light's view matrix; the only
//!   variant that renders a shadow map.
//!
//! Everything in this module is plain math so it can be exercised without a
//! GPU. The render world consumes the results through [`LightVolume`].
//!
//! ```rust,ignore
//! commands.spawn(DeferredLight::spot(
//!     DeferredSpotLight::new(Vec3::new(0.0, 15.0, 0.0), Vec3::NEG_Y, 100.0, FRAC_PI_2, 1.0, 1.0),
//!     Color::WHITE,
//! ));
//! ```

mod counter;
mod directional;
mod generator;
mod point;
mod spot;

pub use counter::*;
pub use directional::*;
pub use generator::*;
pub use point::*;
pub use spot::*;

use bevy::prelude::*;
use rand::Rng;

use crate::random::roll_probability;

/// Errors raised by light property setters.
#[derive(Debug, Clone, PartialEq)]
pub enum LightError {
    /// Spot angle outside `[0, PI/2]` radians
    AngleOutOfRange(f32),
    /// Point light radius below zero
    NegativeRadius(f32),
    /// Spot light reach below zero
    NegativeDistance(f32),
}

impl std::fmt::Display for LightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LightError::AngleOutOfRange(a) => {
                write!(f, "Spot angle out of range: {} rad (expected 0..=PI/2)", a)
            }
            LightError::NegativeRadius(r) => write!(f, "Point light radius out of range: {}", r),
            LightError::NegativeDistance(d) => write!(f, "Spot light distance out of range: {}", d),
        }
    }
}

impl std::error::Error for LightError {}

/// Result type for light configuration.
pub type LightResult<T> = Result<T, LightError>;

/// Which faces of a light volume get culled.
///
/// When the camera sits inside the volume the near faces are behind it, so
/// the far (back) faces must be rasterised instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeCull {
    Front,
    Back,
}

impl VolumeCull {
    pub fn for_camera_inside(inside: bool) -> Self {
        if inside {
            VolumeCull::Front
        } else {
            VolumeCull::Back
        }
    }

    pub fn face(self) -> wgpu::Face {
        match self {
            VolumeCull::Front => wgpu::Face::Front,
            VolumeCull::Back => wgpu::Face::Back,
        }
    }
}

/// Geometry a light is rasterised with during accumulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightVolume {
    /// Fullscreen quad.
    FullScreen,
    /// Unit sphere transformed by `world`.
    Sphere { world: Mat4, cull: VolumeCull },
    /// Unit cone (apex at origin, opening down -Z) transformed by `world`.
    Cone { world: Mat4, cull: VolumeCull },
}

/// Variant-specific light state.
#[derive(Debug, Clone, PartialEq)]
pub enum LightKind {
    Directional(DeferredDirectionalLight),
    Point(DeferredPointLight),
    Spot(DeferredSpotLight),
}

/// A light drawn by the deferred accumulation pass.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct DeferredLight {
    pub color: Color,
    /// Whether this light wants a shadow map. Turning this off releases the
    /// map on the next render-world prepare.
    pub cast_shadows: bool,
    /// A flickering light is skipped on a draw with the global flicker chance.
    pub can_flicker: bool,
    pub kind: LightKind,
}

impl DeferredLight {
    pub fn directional(light: DeferredDirectionalLight, color: Color) -> Self {
        Self {
            color,
            cast_shadows: false,
            can_flicker: false,
            kind: LightKind::Directional(light),
        }
    }

    pub fn point(light: DeferredPointLight, color: Color) -> Self {
        Self {
            color,
            cast_shadows: false,
            can_flicker: false,
            kind: LightKind::Point(light),
        }
    }

    pub fn spot(light: DeferredSpotLight, color: Color) -> Self {
        Self {
            color,
            cast_shadows: true,
            can_flicker: false,
            kind: LightKind::Spot(light),
        }
    }

    pub fn with_shadows(mut self, cast_shadows: bool) -> Self {
        self.cast_shadows = cast_shadows;
        self
    }

    pub fn with_flicker(mut self, can_flicker: bool) -> Self {
        self.can_flicker = can_flicker;
        self
    }

    /// Recompute derived state. Only spot lights cache anything.
    ///
    /// Returns true when matrices were rebuilt.
    pub fn update_light(&mut self) -> bool {
        match &mut self.kind {
            LightKind::Spot(spot) => spot.recompute(),
            LightKind::Directional(_) | LightKind::Point(_) => false,
        }
    }

    /// Whether this light renders a shadow map of its own.
    ///
    /// Directional and point lights accept the flag but have no shadow pass.
    pub fn renders_shadow_map(&self) -> bool {
        self.cast_shadows && matches!(self.kind, LightKind::Spot(_))
    }

    /// Decide whether this draw actually happens.
    ///
    /// Flickering lights re-roll on every call; nothing is cached between
    /// frames.
    pub fn should_draw<R: Rng + ?Sized>(&self, rng: &mut R, flicker_probability: u8) -> bool {
        if self.can_flicker {
            !roll_probability(rng, flicker_probability as i32)
        } else {
            true
        }
    }

    /// Volume and cull mode for a camera at `camera_position`.
    pub fn volume(&self, camera_position: Vec3) -> LightVolume {
        match &self.kind {
            LightKind::Directional(_) => LightVolume::FullScreen,
            LightKind::Point(point) => LightVolume::Sphere {
                world: point.world_matrix(),
                cull: VolumeCull::for_camera_inside(point.contains(camera_position)),
            },
            LightKind::Spot(spot) => LightVolume::Cone {
                world: spot.cone_world_matrix(),
                cull: VolumeCull::for_camera_inside(spot.contains(camera_position)),
            },
        }
    }

    /// World position, if the variant has one.
    pub fn position(&self) -> Option<Vec3> {
        match &self.kind {
            LightKind::Directional(_) => None,
            LightKind::Point(point) => Some(point.position),
            LightKind::Spot(spot) => Some(spot.position()),
        }
    }
}

/// Advance derived light state once per tick.
pub fn update_lights(mut lights: Query<&mut DeferredLight>) {
    for mut light in lights.iter_mut() {
        let needs_update = matches!(&light.kind, LightKind::Spot(spot) if spot.is_dirty());
        if needs_update {
            light.update_light();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_volume_cull_mapping() {
        assert_eq!(VolumeCull::for_camera_inside(true), VolumeCull::Front);
        assert_eq!(VolumeCull::for_camera_inside(false), VolumeCull::Back);
        assert_eq!(VolumeCull::Front.face(), wgpu::Face::Front);
    }

    #[test]
    fn test_only_shadowed_spots_render_shadow_maps() {
        let spot = DeferredSpotLight::new(Vec3::Y * 10.0, Vec3::NEG_Y, 50.0, 0.5, 1.0, 1.0);
        let point = DeferredPointLight::new(Vec3::ZERO, 5.0, 1.0).unwrap();
        let dir = DeferredDirectionalLight::new(Vec3::NEG_Y);

        assert!(DeferredLight::spot(spot.clone(), Color::WHITE).renders_shadow_map());
        assert!(!DeferredLight::spot(spot, Color::WHITE)
            .with_shadows(false)
            .renders_shadow_map());
        assert!(!DeferredLight::point(point, Color::WHITE)
            .with_shadows(true)
            .renders_shadow_map());
        assert!(!DeferredLight::directional(dir, Color::WHITE)
            .with_shadows(true)
            .renders_shadow_map());
    }

    #[test]
    fn test_steady_light_always_draws() {
        let mut rng = StdRng::seed_from_u64(1);
        let light = DeferredLight::directional(DeferredDirectionalLight::new(Vec3::NEG_Y), Color::WHITE);
        for _ in 0..100 {
            assert!(light.should_draw(&mut rng, 100));
        }
    }

    #[test]
    fn test_flicker_rerolls_each_draw() {
        let mut rng = StdRng::seed_from_u64(9);
        let light = DeferredLight::directional(DeferredDirectionalLight::new(Vec3::NEG_Y), Color::WHITE)
            .with_flicker(true);

        // Certain flicker: never drawn. No flicker: always drawn.
        assert!((0..50).all(|_| !light.should_draw(&mut rng, 100)));
        assert!((0..50).all(|_| light.should_draw(&mut rng, 0)));

        let draws: Vec<bool> = (0..400).map(|_| light.should_draw(&mut rng, 50)).collect();
        assert!(draws.contains(&true) && draws.contains(&false), "50% flicker should vary between draws");
    }

    #[test]
    fn test_directional_volume_is_fullscreen() {
        let light = DeferredLight::directional(DeferredDirectionalLight::new(Vec3::NEG_Y), Color::WHITE);
        assert_eq!(light.volume(Vec3::ZERO), LightVolume::FullScreen);
        assert_eq!(light.position(), None);
    }

    #[test]
    fn test_point_volume_cull_depends_on_camera() {
        let point = DeferredPointLight::new(Vec3::ZERO, 10.0, 1.0).unwrap();
        let light = DeferredLight::point(point, Color::WHITE);

        match light.volume(Vec3::new(0.0, 0.0, 5.0)) {
            LightVolume::Sphere { cull, .. } => assert_eq!(cull, VolumeCull::Front),
            other => panic!("expected sphere, got {:?}", other),
        }
        match light.volume(Vec3::new(0.0, 0.0, 15.0)) {
            LightVolume::Sphere { cull, .. } => assert_eq!(cull, VolumeCull::Back),
            other => panic!("expected sphere, got {:?}", other),
        }
    }

    #[test]
    fn test_update_light_clears_spot_dirty_flag() {
        let mut spot = DeferredSpotLight::new(Vec3::Y * 10.0, Vec3::NEG_Y, 50.0, 0.5, 1.0, 1.0);
        spot.set_position(Vec3::new(1.0, 10.0, 0.0));
        let mut light = DeferredLight::spot(spot, Color::WHITE);

        assert!(light.update_light(), "dirty spot should rebuild matrices");
        assert!(!light.update_light(), "clean spot should not rebuild");
    }
}
