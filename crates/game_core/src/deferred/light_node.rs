//! Shadow and light accumulation node.
//!
//! Walks the light steps of the frame plan in order. Shadow maps and light
//! draws interleave: a spot light renders its own map right before its
//! contribution is accumulated.

use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    mesh::{allocator::MeshAllocator, RenderMesh},
    render_asset::RenderAssets,
    render_graph::{NodeRunError, RenderGraphContext, ViewNode},
    render_resource::{
        LoadOp, Operations, PipelineCache, RenderPassColorAttachment,
        RenderPassDepthStencilAttachment, RenderPassDescriptor, StoreOp,
    },
    renderer::RenderContext,
};

use super::frame::{FramePass, ViewFramePlan};
use super::gbuffer::{draw_scene_mesh, PreparedDrawables};
use super::light_volume::LightVolumeMeshes;
use super::lighting::{LightPipelines, PreparedLightDraw, PreparedShadowPass, ViewLightDraws};
use super::quad::QuadRenderer;
use super::shadow::{ShadowPipeline, SpotShadowMaps};
use super::targets::ViewDeferredTargets;
use crate::light::LightVolume;

/// Render graph node for shadow maps and light accumulation.
#[derive(Default)]
pub struct LightAccumulationNode;

impl ViewNode for LightAccumulationNode {
    type ViewQuery = (
        &'static ExtractedCamera,
        &'static ViewDeferredTargets,
        &'static ViewLightDraws,
        &'static ViewFramePlan,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (camera, targets, light_draws, plan): bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        for step in plan.0.light_steps() {
            match step {
                FramePass::ClearLightTarget => clear_light_target(render_context, targets),
                FramePass::ShadowMap(index) => {
                    if let Some(shadow) = light_draws.draws.get(index).and_then(|d| d.shadow.as_ref()) {
                        render_shadow_map(render_context, world, shadow);
                    }
                }
                FramePass::DrawLight(index) => {
                    if let Some(draw) = light_draws.draws.get(index) {
                        draw_light(render_context, world, camera, targets, light_draws, draw);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Reset accumulation to transparent black and light depth to the far plane.
fn clear_light_target(render_context: &mut RenderContext, targets: &ViewDeferredTargets) {
    let _render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
        label: Some("light_clear_pass"),
        color_attachments: &[Some(RenderPassColorAttachment {
            view: &targets.light.view,
            resolve_target: None,
            ops: Operations {
                load: LoadOp::Clear(wgpu::Color::TRANSPARENT),
                store: StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
            view: &targets.light_depth.default_view,
            depth_ops: Some(Operations {
                load: LoadOp::Clear(0.0),
                store: StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}

/// Render scene moments from the light into its pooled map.
fn render_shadow_map<'w>(
    render_context: &mut RenderContext<'w>,
    world: &'w World,
    shadow: &'w PreparedShadowPass,
) {
    let pipeline_cache = world.resource::<PipelineCache>();
    let (Some(shadow_pipeline), Some(maps), Some(drawables)) = (
        world.get_resource::<ShadowPipeline>(),
        world.get_resource::<SpotShadowMaps>(),
        world.get_resource::<PreparedDrawables>(),
    ) else {
        return;
    };
    let Some(pipeline) = pipeline_cache.get_render_pipeline(shadow_pipeline.pipeline_id) else {
        return;
    };
    let Some(map) = maps.pool.get(&shadow.light) else {
        return;
    };
    let mesh_allocator = world.resource::<MeshAllocator>();
    let render_meshes = world.resource::<RenderAssets<RenderMesh>>();

    let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
        label: Some("spot_shadow_pass"),
        color_attachments: &[Some(RenderPassColorAttachment {
            view: &map.moments_view,
            resolve_target: None,
            ops: Operations {
                // Max moments: unoccluded
                load: LoadOp::Clear(wgpu::Color::WHITE),
                store: StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
            view: &map.depth_view,
            depth_ops: Some(Operations {
                load: LoadOp::Clear(1.0),
                store: StoreOp::Discard,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });

    render_pass.set_render_pipeline(pipeline);
    render_pass.set_bind_group(0, &shadow.view_bind_group, &[]);
    for drawable in &drawables.items {
        render_pass.set_bind_group(1, &drawable.transform_bind_group, &[]);
        draw_scene_mesh(&mut render_pass, mesh_allocator, render_meshes, drawable.mesh);
    }
}

/// Blend one light's contribution into the accumulation target.
fn draw_light<'w>(
    render_context: &mut RenderContext<'w>,
    world: &'w World,
    camera: &ExtractedCamera,
    targets: &ViewDeferredTargets,
    light_draws: &'w ViewLightDraws,
    draw: &'w PreparedLightDraw,
) {
    let pipeline_cache = world.resource::<PipelineCache>();
    let (Some(pipelines), Some(quad), Some(volumes), Some(gbuffer_bind_group)) = (
        world.get_resource::<LightPipelines>(),
        world.get_resource::<QuadRenderer>(),
        world.get_resource::<LightVolumeMeshes>(),
        light_draws.gbuffer_bind_group.as_ref(),
    ) else {
        return;
    };
    let Some(pipeline) = pipelines
        .get(draw.plan.key)
        .and_then(|id| pipeline_cache.get_render_pipeline(id))
    else {
        return;
    };

    let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
        label: Some("light_accumulation_pass"),
        color_attachments: &[Some(RenderPassColorAttachment {
            view: &targets.light.view,
            resolve_target: None,
            ops: Operations {
                load: LoadOp::Load,
                store: StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
            view: &targets.light_depth.default_view,
            depth_ops: Some(Operations {
                load: LoadOp::Load,
                store: StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });

    if let Some(viewport) = &camera.viewport {
        render_pass.set_camera_viewport(viewport);
    }

    render_pass.set_render_pipeline(pipeline);
    render_pass.set_bind_group(0, gbuffer_bind_group, &[]);
    render_pass.set_bind_group(1, &draw.light_bind_group, &[]);
    match draw.plan.volume {
        LightVolume::FullScreen => quad.draw(&mut render_pass),
        LightVolume::Sphere { .. } => volumes.sphere.draw(&mut render_pass),
        LightVolume::Cone { .. } => volumes.cone.draw(&mut render_pass),
    }
}
