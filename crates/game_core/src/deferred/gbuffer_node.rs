//! G-Buffer render graph node.
//!
//! One render pass over the three G-buffer targets:
//! 1. Clear quad writes the "nothing here" encoding to every target
//! 2. Every prepared drawable is rasterised on top
//!
//! The clear runs as a shader rather than a load-op clear so the depth
//! target gets its far-plane value in the same encoding the geometry uses.

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
use super::gbuffer::{draw_scene_mesh, GBufferPipelines, PreparedDrawables, ViewDeferredUniforms};
use super::quad::QuadRenderer;
use super::targets::ViewDeferredTargets;

/// Render graph node that fills the G-buffer.
#[derive(Default)]
pub struct GBufferPassNode;

impl ViewNode for GBufferPassNode {
    type ViewQuery = (
        &'static ExtractedCamera,
        &'static ViewDeferredTargets,
        &'static ViewDeferredUniforms,
        &'static ViewFramePlan,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (camera, targets, uniforms, plan): bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        if !plan.0.contains(FramePass::FillGBuffer) {
            return Ok(());
        }

        let pipeline_cache = world.resource::<PipelineCache>();
        let (Some(pipelines), Some(quad)) = (
            world.get_resource::<GBufferPipelines>(),
            world.get_resource::<QuadRenderer>(),
        ) else {
            return Ok(());
        };

        let quality = targets.layout.quality;
        let (Some(clear_pipeline), Some(geometry_pipeline)) = (
            pipeline_cache.get_render_pipeline(pipelines.clear.get(quality)),
            pipeline_cache.get_render_pipeline(pipelines.geometry.get(quality)),
        ) else {
            // Pipelines still compiling
            return Ok(());
        };

        // The clear quad covers every pixel, so the old contents never show
        let color_attachments: Vec<_> = targets
            .gbuffer()
            .into_iter()
            .map(|target| {
                Some(RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Load,
                        store: StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();

        let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("gbuffer_pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: &targets.geometry_depth.default_view,
                depth_ops: Some(Operations {
                    load: LoadOp::Clear(0.0), // Reverse-Z far plane
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

        render_pass.set_render_pipeline(clear_pipeline);
        quad.draw(&mut render_pass);

        let Some(drawables) = world.get_resource::<PreparedDrawables>() else {
            return Ok(());
        };
        let mesh_allocator = world.resource::<MeshAllocator>();
        let render_meshes = world.resource::<RenderAssets<RenderMesh>>();

        render_pass.set_render_pipeline(geometry_pipeline);
        render_pass.set_bind_group(0, &uniforms.bind_group, &[]);

        let mut drawn = 0;
        for drawable in &drawables.items {
            let Some(material) = &drawable.material_bind_group else {
                continue;
            };
            render_pass.set_bind_group(1, &drawable.transform_bind_group, &[]);
            render_pass.set_bind_group(2, material, &[]);
            if draw_scene_mesh(&mut render_pass, mesh_allocator, render_meshes, drawable.mesh) {
                drawn += 1;
            }
        }

        if drawn < drawables.items.len() {
            debug!("G-buffer drew {}/{} drawables", drawn, drawables.items.len());
        }

        Ok(())
    }
}
