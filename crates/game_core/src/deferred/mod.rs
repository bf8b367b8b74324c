//! Deferred renderer with a forward fallback.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ┌──────────────────┐
//! │  G-Buffer Pass   │  ← clear quad + geometry into diffuse / normal / depth
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐
//! │    Edge Pass     │  ← toon only: outlines from normal + depth
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐
//! │ Light Accumulate │  ← clear, then per light: [shadow map] -> light volume
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐
//! │    Blur Pass     │  ← separable Gaussian, light -> scratch -> light
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐
//! │    Composite     │  ← diffuse x light (+ edges), or debug quadrants
//! └──────────────────┘
//! ```
//!
//! The forward path (normal/depth, toon scene, edge detect) replaces all of
//! the above when [`RenderSettings::mode`](crate::settings::RenderSettings)
//! is `Forward`. [`FramePlan`] decides which steps run each frame.
//!
//! ## G-Buffer Layout
//!
//! | Target  | High        | Medium / Low | Contents                       |
//! |---------|-------------|--------------|--------------------------------|
//! | diffuse | Rgba16Float | Rgba8Unorm   | RGB albedo, A specular         |
//! | normal  | Rgba16Float | Rgba8Unorm   | RGB normal * 0.5 + 0.5, A lit  |
//! | depth   | Rgba16Float | Rg16Float    | R linear depth / far           |
//! | light   | Rgba8Unorm  | Rgba8Unorm   | RGB light, A specular          |
//! | edge    | Rg16Float   | Rg16Float    | toon only                      |
//!
//! ## Usage
//!
//! ```rust,ignore
//! app.add_plugins(DeferredRenderingPlugin);
//!
//! commands.spawn((
//!     Camera3d::default(),
//!     Msaa::Off,
//!     DeferredCamera::default(),
//! ));
//! commands.spawn((
//!     DeferredMesh(meshes.add(Cuboid::default())),
//!     material,
//!     Transform::from_xyz(0.0, -10.0, 0.0),
//! ));
//! ```

mod blur;
mod blur_node;
mod composite_node;
mod edge_node;
mod extract;
mod forward;
mod forward_targets;
mod frame;
mod gbuffer;
mod gbuffer_node;
mod labels;
mod light_node;
mod light_volume;
mod lighting;
mod plugin;
mod quad;
mod shadow;
mod targets;
mod uniform_slots;

pub use blur::*;
pub use blur_node::*;
pub use composite_node::*;
pub use edge_node::*;
pub use extract::*;
pub use forward::*;
pub use forward_targets::*;
pub use frame::*;
pub use gbuffer::*;
pub use gbuffer_node::*;
pub use labels::*;
pub use light_node::*;
pub use light_volume::*;
pub use lighting::*;
pub use plugin::*;
pub use quad::*;
pub use shadow::*;
pub use targets::*;
pub use uniform_slots::*;
