//! Edge pass for the toon technique.
//!
//! Runs a Sobel-style detector over the G-buffer normal and depth targets
//! and writes the edge strength into the edge target, which the compositor
//! uses to outline shapes. The same uniform drives the forward path's
//! post-process edge detector.

use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    render_graph::{NodeRunError, RenderGraphContext, ViewNode},
    render_resource::{
        BindGroupEntry, BindGroupLayout, BindingResource, BufferInitDescriptor, BufferUsages,
        CachedRenderPipelineId, ColorTargetState, ColorWrites, FilterMode, FragmentState, LoadOp,
        MultisampleState, Operations, PipelineCache, PrimitiveState, RenderPassColorAttachment,
        RenderPassDescriptor, RenderPipelineDescriptor, Sampler, SamplerDescriptor, StoreOp,
        VertexState,
    },
    renderer::{RenderContext, RenderDevice},
};
use bytemuck::{Pod, Zeroable};

use super::forward_targets::EdgeDetectSettings;
use super::frame::{FramePass, ViewFramePlan};
use super::gbuffer::{sampler_entry, texture_entry, uniform_layout_entry};
use super::quad::{QuadRenderer, QuadVertex};
use super::targets::{ViewDeferredTargets, EDGE_TARGET_FORMAT};

/// Edge detector parameters.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct EdgeUniform {
    /// XY = size of one texel in UV, Z = edge width, W = edge intensity
    pub texel_width_intensity: [f32; 4],
    /// Normal threshold, depth threshold, normal sensitivity, depth sensitivity
    pub thresholds: [f32; 4],
}

impl EdgeUniform {
    pub fn new(settings: &EdgeDetectSettings, size: UVec2) -> Self {
        let size = size.max(UVec2::ONE).as_vec2();
        Self {
            texel_width_intensity: [
                1.0 / size.x,
                1.0 / size.y,
                settings.edge_width,
                settings.edge_intensity,
            ],
            thresholds: [
                settings.normal_threshold,
                settings.depth_threshold,
                settings.normal_sensitivity,
                settings.depth_sensitivity,
            ],
        }
    }
}

/// Pipeline for the deferred edge pass.
#[derive(Resource)]
pub struct EdgePipeline {
    pub pipeline_id: CachedRenderPipelineId,
    /// Normal, depth, sampler, [`EdgeUniform`]
    pub layout: BindGroupLayout,
    pub sampler: Sampler,
}

pub fn init_edge_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    existing: Option<Res<EdgePipeline>>,
) {
    if existing.is_some() {
        return;
    }

    let layout = render_device.create_bind_group_layout(
        "deferred_edge_layout",
        &[texture_entry(0), texture_entry(1), sampler_entry(2), uniform_layout_entry(3)],
    );
    let sampler = render_device.create_sampler(&SamplerDescriptor {
        label: Some("deferred_edge_sampler"),
        mag_filter: FilterMode::Nearest,
        min_filter: FilterMode::Nearest,
        ..default()
    });

    let shader = asset_server.load("shaders/deferred_edge.wgsl");
    let pipeline_id = pipeline_cache.queue_render_pipeline(RenderPipelineDescriptor {
        label: Some("deferred_edge_pipeline".into()),
        layout: vec![layout.clone()],
        push_constant_ranges: vec![],
        vertex: VertexState {
            shader: shader.clone(),
            shader_defs: vec![],
            entry_point: Some("vs_main".into()),
            buffers: vec![QuadVertex::vertex_buffer_layout()],
        },
        primitive: PrimitiveState::default(),
        depth_stencil: None,
        multisample: MultisampleState::default(),
        fragment: Some(FragmentState {
            shader,
            shader_defs: vec![],
            entry_point: Some("fs_main".into()),
            targets: vec![Some(ColorTargetState {
                format: EDGE_TARGET_FORMAT,
                blend: None,
                write_mask: ColorWrites::ALL,
            })],
        }),
        zero_initialize_workgroup_memory: false,
    });

    commands.insert_resource(EdgePipeline {
        pipeline_id,
        layout,
        sampler,
    });
    info!("EdgePipeline initialized");
}

/// Render graph node that builds the toon edge buffer.
#[derive(Default)]
pub struct EdgePassNode;

impl ViewNode for EdgePassNode {
    type ViewQuery = (
        &'static ExtractedCamera,
        &'static ViewDeferredTargets,
        &'static ViewFramePlan,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (camera, targets, plan): bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        if !plan.0.contains(FramePass::MakeEdges) {
            return Ok(());
        }
        let Some(edge) = &targets.edge else {
            return Ok(());
        };

        let pipeline_cache = world.resource::<PipelineCache>();
        let (Some(edge_pipeline), Some(quad)) = (
            world.get_resource::<EdgePipeline>(),
            world.get_resource::<QuadRenderer>(),
        ) else {
            return Ok(());
        };
        let Some(pipeline) = pipeline_cache.get_render_pipeline(edge_pipeline.pipeline_id) else {
            return Ok(());
        };

        let uniform = EdgeUniform::new(&EdgeDetectSettings::default(), targets.layout.size);
        let buffer = render_context
            .render_device()
            .create_buffer_with_data(&BufferInitDescriptor {
                label: Some("deferred_edge_uniform"),
                contents: bytemuck::bytes_of(&uniform),
                usage: BufferUsages::UNIFORM,
            });
        let bind_group = render_context.render_device().create_bind_group(
            "deferred_edge_bind_group",
            &edge_pipeline.layout,
            &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&targets.normal.view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&targets.depth.view),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::Sampler(&edge_pipeline.sampler),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: buffer.as_entire_binding(),
                },
            ],
        );

        let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("deferred_edge_pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: &edge.view,
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

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_uniform_texel_size() {
        let uniform = EdgeUniform::new(&EdgeDetectSettings::default(), UVec2::new(800, 400));
        assert_eq!(uniform.texel_width_intensity, [1.0 / 800.0, 1.0 / 400.0, 1.0, 1.0]);
        assert_eq!(uniform.thresholds, [0.5, 0.1, 1.0, 10.0]);
    }

    #[test]
    fn test_edge_uniform_survives_empty_viewport() {
        let uniform = EdgeUniform::new(&EdgeDetectSettings::default(), UVec2::ZERO);
        assert!(uniform.texel_width_intensity.iter().all(|v| v.is_finite()));
    }
}
