//! Render graph labels for the deferred and forward passes.

use bevy::render::render_graph::RenderLabel;

/// Labels for the renderer's nodes in the Core3d graph.
#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub enum DeferredLabel {
    /// Clear quad + geometry into diffuse/normal/depth
    GBufferPass,
    /// Toon outlines from normal and depth
    EdgePass,
    /// Shadow maps interleaved with per-light accumulation
    LightAccumulationPass,
    /// Horizontal then vertical Gaussian over the light buffer
    BlurPass,
    /// Forward path normal/depth and scene color passes
    ForwardScenePass,
    /// Deferred combine (or debug quadrants) into the view target
    CompositePass,
    /// Forward path post-process into the view target
    ForwardEdgeDetectPass,
}
