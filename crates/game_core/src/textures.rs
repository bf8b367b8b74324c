//! Built-in textures generated at startup.
//!
//! The fallback normal/specular maps and the spot light cookie are made in
//! code rather than shipped as files, so a missing asset directory never
//! leaves a material unbound.

use bevy::asset::RenderAssetUsages;
use bevy::prelude::*;
use image::{DynamicImage, Rgba, RgbaImage};

use crate::material::DefaultTextures;

/// Edge length of the flat fallback images.
const FLAT_SIZE: u32 = 4;

/// Edge length of the spot cookie.
pub const SPOT_COOKIE_SIZE: u32 = 128;

fn flat(color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(FLAT_SIZE, FLAT_SIZE, Rgba(color))
}

/// Tangent-space "straight out" normal: (0, 0, 1) encoded as (128, 128, 255).
pub fn null_normal_image() -> RgbaImage {
    flat([128, 128, 255, 255])
}

/// No specular response.
pub fn null_specular_image() -> RgbaImage {
    flat([0, 0, 0, 255])
}

pub fn white_image() -> RgbaImage {
    flat([255, 255, 255, 255])
}

/// Radial falloff: full intensity at the centre, zero at the rim and beyond.
pub fn spot_cookie_image(size: u32) -> RgbaImage {
    let half = size as f32 * 0.5;
    RgbaImage::from_fn(size, size, |x, y| {
        let offset = Vec2::new(x as f32 + 0.5 - half, y as f32 + 0.5 - half);
        let t = (1.0 - offset.length() / half).clamp(0.0, 1.0);
        // Smoothstep keeps the rim soft
        let value = (t * t * (3.0 - 2.0 * t) * 255.0).round() as u8;
        Rgba([value, value, value, 255])
    })
}

/// Two-tone checkerboard, used as a placeholder albedo.
pub fn checker_image(size: u32, cells: u32, a: [u8; 4], b: [u8; 4]) -> RgbaImage {
    let cell = (size / cells.max(1)).max(1);
    RgbaImage::from_fn(size, size, |x, y| {
        if ((x / cell) + (y / cell)) % 2 == 0 {
            Rgba(a)
        } else {
            Rgba(b)
        }
    })
}

/// Wrap generated pixels as a Bevy image.
///
/// Data maps (normals, specular, cookie) stay linear; albedo is sRGB.
pub fn to_bevy_image(pixels: RgbaImage, srgb: bool) -> Image {
    Image::from_dynamic(
        DynamicImage::ImageRgba8(pixels),
        srgb,
        RenderAssetUsages::RENDER_WORLD,
    )
}

/// Create [`DefaultTextures`] before any scene setup runs.
pub fn setup_default_textures(mut commands: Commands, mut images: ResMut<Assets<Image>>) {
    commands.insert_resource(DefaultTextures {
        null_normal: images.add(to_bevy_image(null_normal_image(), false)),
        null_specular: images.add(to_bevy_image(null_specular_image(), false)),
        white: images.add(to_bevy_image(white_image(), true)),
        spot_cookie: images.add(to_bevy_image(spot_cookie_image(SPOT_COOKIE_SIZE), false)),
    });
    info!("Default textures generated");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_normal_points_out_of_surface() {
        let image = null_normal_image();
        assert!(image.pixels().all(|p| *p == Rgba([128, 128, 255, 255])));
    }

    #[test]
    fn test_cookie_falls_off_radially() {
        let cookie = spot_cookie_image(64);
        let centre = cookie.get_pixel(32, 32)[0];
        let midway = cookie.get_pixel(48, 32)[0];
        let corner = cookie.get_pixel(0, 0)[0];
        assert!(centre > 240, "centre was {}", centre);
        assert!(midway < centre && midway > corner);
        assert_eq!(corner, 0);
    }

    #[test]
    fn test_checker_alternates() {
        let checker = checker_image(8, 2, [255; 4], [0, 0, 0, 255]);
        assert_eq!(checker.get_pixel(0, 0)[0], 255);
        assert_eq!(checker.get_pixel(4, 0)[0], 0);
        assert_eq!(checker.get_pixel(4, 4)[0], 255);
    }

    #[test]
    fn test_default_textures_resource() {
        let mut app = App::new();
        app.add_plugins((MinimalPlugins, AssetPlugin::default()))
            .init_asset::<Image>()
            .add_systems(Startup, setup_default_textures);
        app.update();

        let defaults = app.world().resource::<DefaultTextures>();
        let images = app.world().resource::<Assets<Image>>();
        let cookie = images.get(&defaults.spot_cookie).unwrap();
        assert_eq!(cookie.width(), SPOT_COOKIE_SIZE);
        assert!(images.get(&defaults.null_normal).is_some());
    }
}
