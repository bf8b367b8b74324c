//! Randomised light builders used by the debug "spawn light" toggle.
//!
//! Each builder randomises only the documented fields of its variant:
//! vectors within +-10 per axis, 8-bit color channels, shadow casting by coin
//! flip. Callers override flicker explicitly.

use std::f32::consts::FRAC_PI_2;

use bevy::prelude::*;
use rand::Rng;

use super::{DeferredDirectionalLight, DeferredLight, DeferredPointLight, DeferredSpotLight};
use crate::random::{random_bool, random_color, random_vec3};

/// Axis extent for random positions and directions.
pub const RANDOM_LIGHT_EXTENT: f32 = 10.0;

/// Random directional light. Never flickers.
pub fn random_directional_light<R: Rng + ?Sized>(rng: &mut R) -> DeferredLight {
    let direction = random_vec3(rng, Vec3::splat(RANDOM_LIGHT_EXTENT));
    DeferredLight::directional(DeferredDirectionalLight::new(direction), random_color(rng))
        .with_shadows(random_bool(rng))
        .with_flicker(false)
}

/// Random point light with a radius in `[1, 10)`.
pub fn random_point_light<R: Rng + ?Sized>(rng: &mut R, can_flicker: bool) -> DeferredLight {
    let position = random_vec3(rng, Vec3::splat(RANDOM_LIGHT_EXTENT));
    let radius = rng.gen_range(1.0..RANDOM_LIGHT_EXTENT);
    let intensity = rng.gen_range(0.5..2.0);
    let point = DeferredPointLight::clamped(position, radius, intensity);
    DeferredLight::point(point, random_color(rng))
        .with_shadows(random_bool(rng))
        .with_flicker(can_flicker)
}

/// Random spot light aimed somewhere inside the +-10 box.
pub fn random_spot_light<R: Rng + ?Sized>(rng: &mut R, can_flicker: bool) -> DeferredLight {
    let position = random_vec3(rng, Vec3::splat(RANDOM_LIGHT_EXTENT));
    let direction = random_vec3(rng, Vec3::splat(RANDOM_LIGHT_EXTENT));
    let angle = rng.gen_range(0.1..FRAC_PI_2);
    let spot = DeferredSpotLight::new(position, direction, 50.0, angle, 1.0, 1.0);
    DeferredLight::spot(spot, random_color(rng))
        .with_shadows(random_bool(rng))
        .with_flicker(can_flicker)
}
