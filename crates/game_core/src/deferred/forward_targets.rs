//! Render targets for the forward fallback path.
//!
//! The forward path renders the scene twice: once into a normal + depth
//! target read by the edge detector, once into a color target. The edge
//! detect post-process then writes the final image to the view target.

use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    render_resource::{
        Extent3d, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
    },
    renderer::RenderDevice,
    texture::{CachedTexture, TextureCache},
};

use super::targets::{DeferredCamera, DEFERRED_DEPTH_FORMAT};
use crate::settings::{RenderMode, RenderSettings};

/// Scene color format for the forward path.
pub const FORWARD_SCENE_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Encoded normal in RGB, linear depth in A.
pub const FORWARD_NORMAL_DEPTH_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Clear color of the normal/depth target.
pub const NORMAL_DEPTH_CLEAR: wgpu::Color = wgpu::Color::BLACK;

/// Clear color of the scene target (cornflower blue).
pub const SCENE_CLEAR: wgpu::Color = wgpu::Color {
    r: 100.0 / 255.0,
    g: 149.0 / 255.0,
    b: 237.0 / 255.0,
    a: 1.0,
};

/// Edge detector tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeDetectSettings {
    /// Sampling distance in pixels
    pub edge_width: f32,
    pub edge_intensity: f32,
    pub normal_threshold: f32,
    pub depth_threshold: f32,
    pub normal_sensitivity: f32,
    pub depth_sensitivity: f32,
}

impl Default for EdgeDetectSettings {
    fn default() -> Self {
        Self {
            edge_width: 1.0,
            edge_intensity: 1.0,
            normal_threshold: 0.5,
            depth_threshold: 0.1,
            normal_sensitivity: 1.0,
            depth_sensitivity: 10.0,
        }
    }
}

/// Forward targets for one camera in the render world.
#[derive(Component)]
pub struct ViewForwardTargets {
    pub scene: CachedTexture,
    pub normal_depth: CachedTexture,
    pub depth: CachedTexture,
    pub size: UVec2,
}

impl ViewForwardTargets {
    pub fn new(render_device: &RenderDevice, texture_cache: &mut TextureCache, size: UVec2) -> Self {
        let extent = Extent3d {
            width: size.x,
            height: size.y,
            depth_or_array_layers: 1,
        };
        let sampled = TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING;

        let scene = texture_cache.get(
            render_device,
            TextureDescriptor {
                label: Some("forward_scene"),
                size: extent,
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: FORWARD_SCENE_FORMAT,
                usage: sampled,
                view_formats: &[],
            },
        );

        let normal_depth = texture_cache.get(
            render_device,
            TextureDescriptor {
                label: Some("forward_normal_depth"),
                size: extent,
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: FORWARD_NORMAL_DEPTH_FORMAT,
                usage: sampled,
                view_formats: &[],
            },
        );

        let depth = texture_cache.get(
            render_device,
            TextureDescriptor {
                label: Some("forward_depth"),
                size: extent,
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: DEFERRED_DEPTH_FORMAT,
                usage: TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            },
        );

        Self {
            scene,
            normal_depth,
            depth,
            size,
        }
    }
}

/// Fetch this frame's forward targets when the forward path is active.
pub fn prepare_forward_targets(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    mut texture_cache: ResMut<TextureCache>,
    settings: Option<Res<RenderSettings>>,
    cameras: Query<(Entity, &ExtractedCamera), With<DeferredCamera>>,
) {
    let Some(settings) = settings else {
        return;
    };

    for (entity, camera) in cameras.iter() {
        if settings.mode != RenderMode::Forward {
            commands.entity(entity).remove::<ViewForwardTargets>();
            continue;
        }
        let Some(size) = camera.physical_viewport_size else {
            continue;
        };
        let targets = ViewForwardTargets::new(&render_device, &mut texture_cache, size);
        commands.entity(entity).insert(targets);
    }
}
