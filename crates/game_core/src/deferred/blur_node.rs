//! Two-pass Gaussian blur over the light accumulation buffer.
//!
//! Horizontal: light -> blur scratch. Vertical: blur scratch -> light.

use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    render_graph::{NodeRunError, RenderGraphContext, ViewNode},
    render_resource::{
        BindGroupEntry, BindingResource, Buffer, LoadOp, Operations, PipelineCache,
        RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline, StoreOp, TextureView,
    },
    renderer::RenderContext,
};

use super::blur::{BlurPipeline, ViewBlurUniforms};
use super::frame::{FramePass, ViewFramePlan};
use super::quad::QuadRenderer;
use super::targets::ViewDeferredTargets;

/// Render graph node running both blur directions.
#[derive(Default)]
pub struct BlurPassNode;

impl ViewNode for BlurPassNode {
    type ViewQuery = (
        &'static ExtractedCamera,
        &'static ViewDeferredTargets,
        &'static ViewBlurUniforms,
        &'static ViewFramePlan,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (camera, targets, uniforms, plan): bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        if !plan.0.contains(FramePass::BlurHorizontal) {
            return Ok(());
        }
        let Some(scratch) = &targets.blur else {
            return Ok(());
        };

        let pipeline_cache = world.resource::<PipelineCache>();
        let (Some(blur_pipeline), Some(quad)) = (
            world.get_resource::<BlurPipeline>(),
            world.get_resource::<QuadRenderer>(),
        ) else {
            return Ok(());
        };
        let Some(pipeline) = pipeline_cache.get_render_pipeline(blur_pipeline.pipeline_id) else {
            return Ok(());
        };

        let passes = [
            (
                FramePass::BlurHorizontal,
                "blur_horizontal_pass",
                &targets.light.view,
                &scratch.view,
                &uniforms.horizontal,
            ),
            (
                FramePass::BlurVertical,
                "blur_vertical_pass",
                &scratch.view,
                &targets.light.view,
                &uniforms.vertical,
            ),
        ];

        for (pass, label, source, destination, kernel) in passes {
            if !plan.0.contains(pass) {
                continue;
            }
            blur_pass(
                render_context,
                BlurStep {
                    label,
                    source,
                    destination,
                    kernel,
                },
                blur_pipeline,
                pipeline,
                quad,
                camera,
            );
        }

        Ok(())
    }
}

struct BlurStep<'a> {
    label: &'static str,
    source: &'a TextureView,
    destination: &'a TextureView,
    kernel: &'a Buffer,
}

fn blur_pass<'w>(
    render_context: &mut RenderContext<'w>,
    step: BlurStep,
    blur_pipeline: &'w BlurPipeline,
    pipeline: &'w RenderPipeline,
    quad: &'w QuadRenderer,
    camera: &ExtractedCamera,
) {
    let bind_group = render_context.render_device().create_bind_group(
        "blur_bind_group",
        &blur_pipeline.layout,
        &[
            BindGroupEntry {
                binding: 0,
                resource: BindingResource::TextureView(step.source),
            },
            BindGroupEntry {
                binding: 1,
                resource: BindingResource::Sampler(&blur_pipeline.sampler),
            },
            BindGroupEntry {
                binding: 2,
                resource: step.kernel.as_entire_binding(),
            },
        ],
    );

    let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
        label: Some(step.label),
        color_attachments: &[Some(RenderPassColorAttachment {
            view: step.destination,
            resolve_target: None,
            ops: Operations {
                load: LoadOp::Clear(wgpu::Color::TRANSPARENT),
                store: StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });

    if let Some(viewport) = &camera.viewport {
        render_pass.set_camera_viewport(viewport);
    }

    render_pass.set_render_pipeline(pipeline);
    render_pass.set_bind_group(0, &bind_group, &[]);
    quad.draw(&mut render_pass);
}
