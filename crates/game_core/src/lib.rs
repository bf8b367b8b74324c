//! Deferred game renderer.
//!
//! This crate provides:
//! - Deferred shading pipeline (G-buffer, per-light accumulation, spot
//!   variance shadow maps, Gaussian blur, toon/realistic composite)
//! - Forward fallback path with post-process edge detection
//! - Directional, point and spot lights with flicker
//! - Material texture resolution with fallback chain
//! - Debug toggles, free-fly camera and HUD

pub mod commands;
pub mod deferred;
pub mod diagnostics;
pub mod drawable;
pub mod free_camera;
pub mod light;
pub mod material;
pub mod random;
pub mod settings;
pub mod textures;

pub use commands::{apply_renderer_commands, RendererCommand, RendererCommandsPlugin};
pub use deferred::{DeferredCamera, DeferredLabel, DeferredRenderingPlugin, FramePass, FramePlan};
pub use diagnostics::{DiagnosticsHudPlugin, FrameRateCounter, TriangleCounter};
pub use drawable::{DeferredMesh, Drawable};
pub use free_camera::{FreeCamera, FreeCameraPlugin};
pub use light::{
    DeferredDirectionalLight, DeferredLight, DeferredPointLight, DeferredSpotLight, LightCounter,
    LightError, LightKind,
};
pub use material::{DeferredMaterial, DefaultTextures, MaterialError};
pub use settings::{
    LightGlobals, QualityTier, RenderMode, RenderSettings, RenderTechnique, ShadowBlur,
};
