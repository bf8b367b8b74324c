//! Random helpers used for light flicker and light generation.

use bevy::prelude::*;
use rand::Rng;

/// Roll a percentage chance.
///
/// `<= 0` never succeeds and `>= 100` always succeeds; anything in between
/// draws a number in `1..=99` and succeeds when it is `<= probability`.
pub fn roll_probability<R: Rng + ?Sized>(rng: &mut R, probability: i32) -> bool {
    if probability <= 0 {
        false
    } else if probability >= 100 {
        true
    } else {
        let number = rng.gen_range(1..=99);
        number <= probability
    }
}

/// Random vector with each axis uniformly in `[-max, max)`.
pub fn random_vec3<R: Rng + ?Sized>(rng: &mut R, max: Vec3) -> Vec3 {
    Vec3::new(
        2.0 * max.x * rng.gen::<f32>() - max.x,
        2.0 * max.y * rng.gen::<f32>() - max.y,
        2.0 * max.z * rng.gen::<f32>() - max.z,
    )
}

/// Random opaque color with each 8-bit channel in `0..255`.
pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> Color {
    Color::srgb_u8(rng.gen_range(0..255), rng.gen_range(0..255), rng.gen_range(0..255))
}

/// Fair coin.
pub fn random_bool<R: Rng + ?Sized>(rng: &mut R) -> bool {
    roll_probability(rng, 50)
}
