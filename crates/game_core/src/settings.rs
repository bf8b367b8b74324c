//! Renderer configuration shared by every pass.
//!
//! All toggles live in [`RenderSettings`], which is extracted to the render
//! world each frame so graph nodes read the same values the main world saw.

use bevy::prelude::*;
use bevy::render::extract_resource::ExtractResource;
use serde::{Deserialize, Serialize};

/// Default edge length of a shadow map in texels.
pub const DEFAULT_SHADOW_MAP_SIZE: u32 = 1024;

/// G-buffer precision tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QualityTier {
    Low,
    #[default]
    Medium,
    High,
}

/// Which pipeline draws the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RenderMode {
    Forward,
    #[default]
    Deferred,
}

/// Shading style applied by the compositor (deferred) or scene pass (forward).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RenderTechnique {
    Realistic,
    #[default]
    Toon,
}

impl RenderTechnique {
    pub fn toggled(self) -> Self {
        match self {
            RenderTechnique::Realistic => RenderTechnique::Toon,
            RenderTechnique::Toon => RenderTechnique::Realistic,
        }
    }

    pub fn is_toon(self) -> bool {
        self == RenderTechnique::Toon
    }
}

/// Blur kernel applied to the light accumulation buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShadowBlur {
    None,
    #[default]
    Gaussian15,
}

impl ShadowBlur {
    /// Next blur type in the cycle `None -> Gaussian15 -> None`.
    pub fn next(self) -> Self {
        match self {
            ShadowBlur::None => ShadowBlur::Gaussian15,
            ShadowBlur::Gaussian15 => ShadowBlur::None,
        }
    }

    /// Shader implementing this kernel, if any.
    pub fn shader_path(self) -> Option<&'static str> {
        match self {
            ShadowBlur::None => None,
            ShadowBlur::Gaussian15 => Some("shaders/gaussian_blur15.wgsl"),
        }
    }
}

/// Renderer-wide configuration.
///
/// Replaces ambient global flags: every system that needs a toggle takes this
/// resource as a parameter, and the render world gets its own copy through
/// [`ExtractResource`].
#[derive(Resource, Clone, Debug, PartialEq, ExtractResource, Serialize, Deserialize)]
pub struct RenderSettings {
    pub quality: QualityTier,
    pub mode: RenderMode,
    pub technique: RenderTechnique,
    /// Master switch for shadow-map passes.
    pub shadows: bool,
    pub shadow_blur: ShadowBlur,
    /// Edge length of every per-light shadow map.
    pub shadow_map_size: u32,
    /// When false, lights are neither shadowed nor accumulated.
    pub draw_lights: bool,
    /// Show diffuse/normal/depth/light quadrants instead of the composite.
    pub debug_gbuffer: bool,
    /// Draw the physics collider overlay.
    pub physics_debug: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            quality: QualityTier::Medium,
            mode: RenderMode::Deferred,
            technique: RenderTechnique::Toon,
            shadows: true,
            shadow_blur: ShadowBlur::Gaussian15,
            shadow_map_size: DEFAULT_SHADOW_MAP_SIZE,
            draw_lights: true,
            debug_gbuffer: false,
            physics_debug: false,
        }
    }
}

impl RenderSettings {
    pub fn toggle_lights(&mut self) {
        self.draw_lights = !self.draw_lights;
    }

    pub fn toggle_gbuffer_debug(&mut self) {
        self.debug_gbuffer = !self.debug_gbuffer;
    }

    pub fn toggle_technique(&mut self) {
        self.technique = self.technique.toggled();
    }

    pub fn toggle_shadows(&mut self) {
        self.shadows = !self.shadows;
    }

    pub fn cycle_blur(&mut self) {
        self.shadow_blur = self.shadow_blur.next();
    }

    pub fn toggle_physics_debug(&mut self) {
        self.physics_debug = !self.physics_debug;
    }

    /// Whether a light flagged `cast_shadows` should render its shadow map.
    pub fn light_shadows_enabled(&self, cast_shadows: bool) -> bool {
        self.shadows && cast_shadows
    }
}

/// Light tuning shared by all light variants.
#[derive(Resource, Clone, Debug, ExtractResource)]
pub struct LightGlobals {
    /// Percentage chance (0..=100) that a flickering light is skipped on a draw.
    pub flicker_probability: u8,
}

impl Default for LightGlobals {
    fn default() -> Self {
        Self {
            flicker_probability: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_startup_scene() {
        let settings = RenderSettings::default();
        assert_eq!(settings.mode, RenderMode::Deferred);
        assert_eq!(settings.technique, RenderTechnique::Toon);
        assert_eq!(settings.quality, QualityTier::Medium);
        assert_eq!(settings.shadow_blur, ShadowBlur::Gaussian15);
        assert_eq!(settings.shadow_map_size, 1024);
        assert!(settings.shadows);
        assert!(settings.draw_lights);
        assert!(!settings.debug_gbuffer);
    }

    #[test]
    fn test_blur_cycle_wraps() {
        let mut settings = RenderSettings::default();
        settings.cycle_blur();
        assert_eq!(settings.shadow_blur, ShadowBlur::None);
        assert!(settings.shadow_blur.shader_path().is_none());
        settings.cycle_blur();
        assert_eq!(settings.shadow_blur, ShadowBlur::Gaussian15);
    }

    #[test]
    fn test_toggles_are_involutions() {
        let original = RenderSettings::default();
        let mut settings = original.clone();
        settings.toggle_lights();
        settings.toggle_gbuffer_debug();
        settings.toggle_technique();
        settings.toggle_shadows();
        settings.toggle_physics_debug();
        assert_ne!(settings, original);
        settings.toggle_lights();
        settings.toggle_gbuffer_debug();
        settings.toggle_technique();
        settings.toggle_shadows();
        settings.toggle_physics_debug();
        assert_eq!(settings, original, "double toggle should restore settings");
    }

    #[test]
    fn test_light_shadows_need_both_switches() {
        let mut settings = RenderSettings::default();
        assert!(settings.light_shadows_enabled(true));
        assert!(!settings.light_shadows_enabled(false));
        settings.shadows = false;
        assert!(!settings.light_shadows_enabled(true));
    }
}
