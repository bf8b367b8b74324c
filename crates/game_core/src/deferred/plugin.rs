//! Plugin wiring the deferred and forward renderers into the Core3d graph.

use bevy::core_pipeline::core_3d::graph::{Core3d, Node3d};
use bevy::prelude::*;
use bevy::render::{
    extract_component::ExtractComponentPlugin,
    extract_resource::ExtractResourcePlugin,
    render_graph::{RenderGraphExt, ViewNodeRunner},
    ExtractSchedule, Render, RenderApp, RenderSystems,
};

use super::blur::{
    init_blur_pipeline, prepare_blur_uniforms, resolve_blur_kernel, BlurKernelInfo,
    GaussianKernelCache,
};
use super::blur_node::BlurPassNode;
use super::composite_node::{init_composite_pipeline, prepare_composite_params, CompositePassNode};
use super::edge_node::{init_edge_pipeline, EdgePassNode};
use super::extract::{extract_drawables, extract_lights, ExtractedDrawables, ExtractedLights};
use super::forward::{init_forward_pipelines, ForwardEdgeDetectNode, ForwardScenePassNode};
use super::forward_targets::prepare_forward_targets;
use super::frame::prepare_frame_plans;
use super::gbuffer::{
    init_deferred_mesh_layouts, init_gbuffer_pipelines, prepare_deferred_view_uniforms,
    prepare_drawables, PreparedDrawables,
};
use super::gbuffer_node::GBufferPassNode;
use super::labels::DeferredLabel;
use super::light_node::LightAccumulationNode;
use super::light_volume::init_light_volume_meshes;
use super::lighting::{init_light_pipelines, prepare_light_draws};
use super::quad::init_quad_renderer;
use super::shadow::{init_shadow_pipeline, prepare_spot_shadow_maps, SpotShadowMaps};
use super::targets::{prepare_deferred_targets, DeferredCamera};
use crate::drawable::sync_drawable_transforms;
use crate::light::{count_lights, update_lights, LightCounter};
use crate::material::DefaultTextures;
use crate::settings::{LightGlobals, RenderSettings};
use crate::textures::setup_default_textures;

pub struct DeferredRenderingPlugin;

impl Plugin for DeferredRenderingPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<RenderSettings>();
        app.init_resource::<LightGlobals>();
        app.init_resource::<LightCounter>();
        app.init_resource::<BlurKernelInfo>();

        app.add_plugins(ExtractComponentPlugin::<DeferredCamera>::default());
        app.add_plugins(ExtractResourcePlugin::<RenderSettings>::default());
        app.add_plugins(ExtractResourcePlugin::<LightGlobals>::default());
        app.add_plugins(ExtractResourcePlugin::<BlurKernelInfo>::default());
        app.add_plugins(ExtractResourcePlugin::<DefaultTextures>::default());

        app.add_systems(PreStartup, setup_default_textures);
        app.add_systems(Update, resolve_blur_kernel);
        app.add_systems(
            PostUpdate,
            (
                sync_drawable_transforms.after(TransformSystems::Propagate),
                update_lights,
                count_lights,
            ),
        );

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            warn!("RenderApp not found - deferred rendering disabled");
            return;
        };

        render_app
            .init_resource::<ExtractedDrawables>()
            .init_resource::<ExtractedLights>()
            .init_resource::<PreparedDrawables>()
            .init_resource::<SpotShadowMaps>()
            .init_resource::<GaussianKernelCache>();

        render_app.add_systems(ExtractSchedule, (extract_drawables, extract_lights));

        render_app.add_systems(
            Render,
            (
                init_quad_renderer.in_set(RenderSystems::Prepare),
                init_light_volume_meshes.in_set(RenderSystems::Prepare),
                init_deferred_mesh_layouts.in_set(RenderSystems::Prepare),
                init_gbuffer_pipelines
                    .in_set(RenderSystems::Prepare)
                    .after(init_deferred_mesh_layouts),
                init_shadow_pipeline
                    .in_set(RenderSystems::Prepare)
                    .after(init_deferred_mesh_layouts),
                init_forward_pipelines
                    .in_set(RenderSystems::Prepare)
                    .after(init_deferred_mesh_layouts),
                init_light_pipelines.in_set(RenderSystems::Prepare),
                init_blur_pipeline.in_set(RenderSystems::Prepare),
                init_edge_pipeline.in_set(RenderSystems::Prepare),
                init_composite_pipeline.in_set(RenderSystems::Prepare),
            ),
        );

        render_app.add_systems(
            Render,
            (
                prepare_deferred_targets.in_set(RenderSystems::PrepareResources),
                prepare_forward_targets.in_set(RenderSystems::PrepareResources),
                prepare_deferred_view_uniforms
                    .in_set(RenderSystems::PrepareResources)
                    .after(init_deferred_mesh_layouts),
                prepare_drawables
                    .in_set(RenderSystems::PrepareResources)
                    .after(init_deferred_mesh_layouts),
                prepare_spot_shadow_maps.in_set(RenderSystems::PrepareResources),
                prepare_light_draws
                    .in_set(RenderSystems::PrepareResources)
                    .after(init_light_pipelines)
                    .after(init_shadow_pipeline)
                    .after(prepare_deferred_targets)
                    .after(prepare_deferred_view_uniforms)
                    .after(prepare_spot_shadow_maps),
                prepare_blur_uniforms
                    .in_set(RenderSystems::PrepareResources)
                    .after(prepare_deferred_targets),
                prepare_composite_params
                    .in_set(RenderSystems::PrepareResources)
                    .after(prepare_deferred_targets),
                prepare_frame_plans
                    .in_set(RenderSystems::PrepareResources)
                    .after(prepare_light_draws)
                    .after(prepare_blur_uniforms),
            ),
        );

        render_app
            .add_render_graph_node::<ViewNodeRunner<GBufferPassNode>>(
                Core3d,
                DeferredLabel::GBufferPass,
            )
            .add_render_graph_node::<ViewNodeRunner<EdgePassNode>>(
                Core3d,
                DeferredLabel::EdgePass,
            )
            .add_render_graph_node::<ViewNodeRunner<LightAccumulationNode>>(
                Core3d,
                DeferredLabel::LightAccumulationPass,
            )
            .add_render_graph_node::<ViewNodeRunner<BlurPassNode>>(
                Core3d,
                DeferredLabel::BlurPass,
            )
            .add_render_graph_node::<ViewNodeRunner<ForwardScenePassNode>>(
                Core3d,
                DeferredLabel::ForwardScenePass,
            )
            .add_render_graph_node::<ViewNodeRunner<CompositePassNode>>(
                Core3d,
                DeferredLabel::CompositePass,
            )
            .add_render_graph_node::<ViewNodeRunner<ForwardEdgeDetectNode>>(
                Core3d,
                DeferredLabel::ForwardEdgeDetectPass,
            );

        render_app.add_render_graph_edges(
            Core3d,
            (
                Node3d::StartMainPass,
                DeferredLabel::GBufferPass,
                DeferredLabel::EdgePass,
                DeferredLabel::LightAccumulationPass,
                DeferredLabel::BlurPass,
                DeferredLabel::ForwardScenePass,
                Node3d::MainOpaquePass,
            ),
        );

        // Composite overwrites whatever the stock opaque pass cleared to, and
        // gizmos (physics overlay) land on top in the transparent pass
        render_app.add_render_graph_edges(
            Core3d,
            (
                Node3d::MainOpaquePass,
                DeferredLabel::CompositePass,
                DeferredLabel::ForwardEdgeDetectPass,
                Node3d::MainTransparentPass,
            ),
        );
    }
}
