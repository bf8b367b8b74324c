//! Render targets for the deferred path.
//!
//! ## G-Buffer layout per quality tier
//!
//! | Target  | High           | Medium / Low                 |
//! |---------|----------------|------------------------------|
//! | diffuse | Rgba16Float    | Rgba8Unorm, full mip chain   |
//! | normal  | Rgba16Float    | Rgba8Unorm, full mip chain   |
//! | depth   | Rgba16Float    | Rg16Float, full mip chain    |
//!
//! The light accumulation target is always [`LIGHT_TARGET_FORMAT`] and owns a
//! depth attachment of its own: light volumes are depth-tested against it but
//! never write depth. The edge target exists only for the toon technique and
//! the blur scratch target only when a blur kernel is active.
//!
//! Passes render into and sample from mip 0; the lower mips are allocation
//! only.

use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    extract_component::ExtractComponent,
    render_resource::{
        Extent3d, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
        TextureView, TextureViewDescriptor,
    },
    renderer::RenderDevice,
    texture::{CachedTexture, TextureCache},
};

use crate::settings::{QualityTier, RenderMode, RenderSettings, RenderTechnique, ShadowBlur};

/// Marker for the camera the deferred renderer draws.
#[derive(Component, Clone, Copy, Debug, ExtractComponent)]
pub struct DeferredCamera {
    /// Far clip distance, used to normalise the linear depth proxy.
    pub far_clip: f32,
}

impl Default for DeferredCamera {
    fn default() -> Self {
        Self { far_clip: 1000.0 }
    }
}

/// Light accumulation format. Alpha carries the specular lightmap.
pub const LIGHT_TARGET_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Edge buffer format (toon technique only).
pub const EDGE_TARGET_FORMAT: TextureFormat = TextureFormat::Rg16Float;

/// Depth attachment format for geometry and light volumes.
pub const DEFERRED_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Format and mip count of one G-buffer target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSpec {
    pub format: TextureFormat,
    pub mip_level_count: u32,
}

/// Every target the deferred path needs for one view, decided from the
/// settings and the back-buffer size alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GBufferLayout {
    pub quality: QualityTier,
    pub size: UVec2,
    pub diffuse: TargetSpec,
    pub normal: TargetSpec,
    pub depth: TargetSpec,
    pub light: TargetSpec,
    pub edge: Option<TargetSpec>,
    pub blur: Option<TargetSpec>,
}

/// Diffuse, normal and depth formats for a quality tier.
pub fn gbuffer_formats(quality: QualityTier) -> [TextureFormat; 3] {
    match quality {
        QualityTier::High => [
            TextureFormat::Rgba16Float,
            TextureFormat::Rgba16Float,
            TextureFormat::Rgba16Float,
        ],
        QualityTier::Medium | QualityTier::Low => [
            TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8Unorm,
            TextureFormat::Rg16Float,
        ],
    }
}

/// Number of mips in a full chain for `size`.
pub fn full_mip_chain(size: UVec2) -> u32 {
    32 - size.x.max(size.y).max(1).leading_zeros()
}

impl GBufferLayout {
    pub fn new(
        quality: QualityTier,
        technique: RenderTechnique,
        blur: ShadowBlur,
        size: UVec2,
    ) -> Self {
        let mip_level_count = match quality {
            QualityTier::High => 1,
            QualityTier::Medium | QualityTier::Low => full_mip_chain(size),
        };
        let [diffuse, normal, depth] = gbuffer_formats(quality).map(|format| TargetSpec {
            format,
            mip_level_count,
        });

        let light = TargetSpec {
            format: LIGHT_TARGET_FORMAT,
            mip_level_count: 1,
        };

        let edge = technique.is_toon().then_some(TargetSpec {
            format: EDGE_TARGET_FORMAT,
            mip_level_count: 1,
        });

        let blur = (blur != ShadowBlur::None).then_some(light);

        Self {
            quality,
            size,
            diffuse,
            normal,
            depth,
            light,
            edge,
            blur,
        }
    }

    pub fn from_settings(settings: &RenderSettings, size: UVec2) -> Self {
        Self::new(settings.quality, settings.technique, settings.shadow_blur, size)
    }

    pub fn extent(&self) -> Extent3d {
        Extent3d {
            width: self.size.x,
            height: self.size.y,
            depth_or_array_layers: 1,
        }
    }
}

/// A cached texture plus a view of its first mip.
pub struct DeferredTarget {
    pub texture: CachedTexture,
    /// Mip 0 only, usable as both attachment and binding.
    pub view: TextureView,
    pub format: TextureFormat,
}

impl DeferredTarget {
    fn new(
        render_device: &RenderDevice,
        texture_cache: &mut TextureCache,
        label: &'static str,
        size: Extent3d,
        spec: TargetSpec,
    ) -> Self {
        let texture = texture_cache.get(
            render_device,
            TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: spec.mip_level_count,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: spec.format,
                usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
        );
        let view = texture.texture.create_view(&TextureViewDescriptor {
            label: Some(label),
            base_mip_level: 0,
            mip_level_count: Some(1),
            ..default()
        });
        Self {
            texture,
            view,
            format: spec.format,
        }
    }
}

fn depth_descriptor(label: &'static str, size: Extent3d) -> TextureDescriptor<'static> {
    TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: DEFERRED_DEPTH_FORMAT,
        usage: TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    }
}

/// Deferred targets for one camera in the render world.
#[derive(Component)]
pub struct ViewDeferredTargets {
    pub diffuse: DeferredTarget,
    pub normal: DeferredTarget,
    pub depth: DeferredTarget,
    /// Hardware depth for the geometry pass
    pub geometry_depth: CachedTexture,
    pub light: DeferredTarget,
    /// Hardware depth tested (never written) by light volumes
    pub light_depth: CachedTexture,
    pub edge: Option<DeferredTarget>,
    pub blur: Option<DeferredTarget>,
    pub layout: GBufferLayout,
}

impl ViewDeferredTargets {
    pub fn new(
        render_device: &RenderDevice,
        texture_cache: &mut TextureCache,
        layout: GBufferLayout,
    ) -> Self {
        let size = layout.extent();
        let mut target = |label: &'static str, spec: TargetSpec| {
            DeferredTarget::new(render_device, texture_cache, label, size, spec)
        };

        let diffuse = target("deferred_diffuse", layout.diffuse);
        let normal = target("deferred_normal", layout.normal);
        let depth = target("deferred_depth", layout.depth);
        let light = target("deferred_light", layout.light);
        let edge = layout.edge.map(|spec| target("deferred_edge", spec));
        let blur = layout.blur.map(|spec| target("deferred_blur", spec));

        let geometry_depth = texture_cache.get(
            render_device,
            depth_descriptor("deferred_geometry_depth", size),
        );
        let light_depth =
            texture_cache.get(render_device, depth_descriptor("deferred_light_depth", size));

        Self {
            diffuse,
            normal,
            depth,
            geometry_depth,
            light,
            light_depth,
            edge,
            blur,
            layout,
        }
    }

    /// The three G-buffer targets in attachment order.
    pub fn gbuffer(&self) -> [&DeferredTarget; 3] {
        [&self.diffuse, &self.normal, &self.depth]
    }
}

/// Fetch this frame's deferred targets for every deferred camera.
///
/// Identical descriptors hit the texture cache, so targets are only really
/// reallocated when the viewport or the layout changes.
pub fn prepare_deferred_targets(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    mut texture_cache: ResMut<TextureCache>,
    settings: Option<Res<RenderSettings>>,
    cameras: Query<(Entity, &ExtractedCamera), With<DeferredCamera>>,
    existing: Query<&ViewDeferredTargets>,
) {
    let Some(settings) = settings else {
        return;
    };

    for (entity, camera) in cameras.iter() {
        if settings.mode != RenderMode::Deferred {
            commands.entity(entity).remove::<ViewDeferredTargets>();
            continue;
        }
        let Some(physical_size) = camera.physical_viewport_size else {
            warn_once!("Deferred camera has no viewport size yet");
            continue;
        };

        let layout = GBufferLayout::from_settings(&settings, physical_size);
        if let Ok(previous) = existing.get(entity) {
            if previous.layout != layout {
                debug!(
                    "Deferred targets reallocated: {:?} -> {:?} at {}x{}",
                    previous.layout.diffuse.format,
                    layout.diffuse.format,
                    layout.size.x,
                    layout.size.y
                );
            }
        }

        let targets = ViewDeferredTargets::new(&render_device, &mut texture_cache, layout);
        commands.entity(entity).insert(targets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIERS: [QualityTier; 3] = [QualityTier::Low, QualityTier::Medium, QualityTier::High];

    #[test]
    fn test_targets_share_back_buffer_size() {
        let size = UVec2::new(1280, 720);
        for quality in TIERS {
            let layout = GBufferLayout::new(quality, RenderTechnique::Toon, ShadowBlur::Gaussian15, size);
            assert_eq!(layout.size, size);
            assert_eq!(layout.extent().width, 1280);
            assert_eq!(layout.extent().height, 720);
        }
    }

    #[test]
    fn test_high_tier_uses_half_float() {
        let layout = GBufferLayout::new(
            QualityTier::High,
            RenderTechnique::Realistic,
            ShadowBlur::None,
            UVec2::new(800, 600),
        );
        for spec in [layout.diffuse, layout.normal, layout.depth] {
            assert_eq!(spec.format, TextureFormat::Rgba16Float);
            assert_eq!(spec.mip_level_count, 1);
        }
    }

    #[test]
    fn test_lower_tiers_use_32_bit_color_with_mips() {
        for quality in [QualityTier::Low, QualityTier::Medium] {
            let layout = GBufferLayout::new(
                quality,
                RenderTechnique::Realistic,
                ShadowBlur::None,
                UVec2::new(1024, 512),
            );
            assert_eq!(layout.diffuse.format, TextureFormat::Rgba8Unorm);
            assert_eq!(layout.normal.format, TextureFormat::Rgba8Unorm);
            assert_eq!(layout.depth.format, TextureFormat::Rg16Float);
            assert_eq!(layout.diffuse.mip_level_count, 11);
        }
    }

    #[test]
    fn test_edge_target_only_for_toon() {
        let size = UVec2::new(640, 480);
        for quality in TIERS {
            let toon = GBufferLayout::new(quality, RenderTechnique::Toon, ShadowBlur::None, size);
            let realistic = GBufferLayout::new(quality, RenderTechnique::Realistic, ShadowBlur::None, size);
            assert_eq!(toon.edge.map(|e| e.format), Some(EDGE_TARGET_FORMAT));
            assert!(realistic.edge.is_none());
        }
    }

    #[test]
    fn test_blur_target_matches_light_target() {
        let size = UVec2::new(640, 480);
        let with_blur = GBufferLayout::new(QualityTier::Medium, RenderTechnique::Toon, ShadowBlur::Gaussian15, size);
        let without = GBufferLayout::new(QualityTier::Medium, RenderTechnique::Toon, ShadowBlur::None, size);
        assert_eq!(with_blur.blur, Some(with_blur.light));
        assert!(without.blur.is_none());
        assert_eq!(with_blur.light.format, LIGHT_TARGET_FORMAT);
    }

    #[test]
    fn test_layout_changes_only_with_inputs() {
        let settings = RenderSettings::default();
        let a = GBufferLayout::from_settings(&settings, UVec2::new(800, 600));
        let b = GBufferLayout::from_settings(&settings, UVec2::new(800, 600));
        assert_eq!(a, b, "same inputs must not reallocate");

        let resized = GBufferLayout::from_settings(&settings, UVec2::new(801, 600));
        assert_ne!(a, resized);

        let mut high = settings.clone();
        high.quality = QualityTier::High;
        assert_ne!(a, GBufferLayout::from_settings(&high, UVec2::new(800, 600)));
    }

    #[test]
    fn test_full_mip_chain() {
        assert_eq!(full_mip_chain(UVec2::new(1, 1)), 1);
        assert_eq!(full_mip_chain(UVec2::new(2, 1)), 2);
        assert_eq!(full_mip_chain(UVec2::new(1920, 1080)), 11);
        assert_eq!(full_mip_chain(UVec2::ZERO), 1);
    }
}
