//! Final composite of the deferred path.
//!
//! Combines diffuse, light accumulation and (toon) edges into the view
//! target. With the debug view on, the same pass shows the raw buffers in
//! four quadrants instead:
//!
//! ```text
//! +---------+---------+
//! | diffuse | normal  |
//! +---------+---------+
//! | depth   | light   |
//! +---------+---------+
//! ```

use bevy::image::BevyDefault;
use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    render_graph::{NodeRunError, RenderGraphContext, ViewNode},
    render_resource::{
        BindGroupEntry, BindGroupLayout, BindingResource, Buffer,
        CachedRenderPipelineId, ColorTargetState, ColorWrites, FilterMode, FragmentState, LoadOp,
        MultisampleState, Operations, PipelineCache, PrimitiveState, RenderPassColorAttachment,
        RenderPassDescriptor, RenderPipelineDescriptor, Sampler, SamplerDescriptor, StoreOp,
        TextureFormat, VertexState,
    },
    renderer::{RenderContext, RenderDevice, RenderQueue},
    view::ViewTarget,
};
use bytemuck::{Pod, Zeroable};

use super::frame::{FramePass, ViewFramePlan};
use super::gbuffer::{sampler_entry, texture_entry, uniform_layout_entry};
use super::quad::{QuadRenderer, QuadVertex};
use super::targets::ViewDeferredTargets;
use super::uniform_slots::UniformSlots;
use crate::settings::RenderSettings;

/// Composite switches.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct CompositeParams {
    /// X = toon shading, Y = debug quadrants, Z = edge buffer bound
    pub flags: [f32; 4],
}

impl CompositeParams {
    pub fn new(settings: &RenderSettings, has_edges: bool) -> Self {
        let flag = |on: bool| if on { 1.0 } else { 0.0 };
        Self {
            flags: [
                flag(settings.technique.is_toon() && has_edges),
                flag(settings.debug_gbuffer),
                flag(has_edges),
                0.0,
            ],
        }
    }
}

/// Pipeline for the combine pass.
#[derive(Resource)]
pub struct CompositePipeline {
    pub pipeline_id: CachedRenderPipelineId,
    /// Diffuse, normal, depth, light, edge, sampler, [`CompositeParams`]
    pub layout: BindGroupLayout,
    pub sampler: Sampler,
}

pub fn init_composite_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    existing: Option<Res<CompositePipeline>>,
) {
    if existing.is_some() {
        return;
    }

    let layout = render_device.create_bind_group_layout(
        "composite_layout",
        &[
            texture_entry(0),
            texture_entry(1),
            texture_entry(2),
            texture_entry(3),
            texture_entry(4),
            sampler_entry(5),
            uniform_layout_entry(6),
        ],
    );
    let sampler = render_device.create_sampler(&SamplerDescriptor {
        label: Some("composite_sampler"),
        mag_filter: FilterMode::Nearest,
        min_filter: FilterMode::Nearest,
        ..default()
    });

    let shader = asset_server.load("shaders/combine.wgsl");
    let pipeline_id = pipeline_cache.queue_render_pipeline(RenderPipelineDescriptor {
        label: Some("composite_pipeline".into()),
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
                format: TextureFormat::bevy_default(),
                blend: None,
                write_mask: ColorWrites::ALL,
            })],
        }),
        zero_initialize_workgroup_memory: false,
    });

    commands.insert_resource(CompositePipeline {
        pipeline_id,
        layout,
        sampler,
    });
    info!("CompositePipeline initialized");
}

/// Composite switches of one view, rewritten each frame.
#[derive(Component, Default)]
pub struct ViewCompositeParams {
    slots: UniformSlots,
    pub buffer: Option<Buffer>,
}

impl ViewCompositeParams {
    fn upload(&mut self, params: &CompositeParams, render_device: &RenderDevice, render_queue: &RenderQueue) {
        self.buffer = Some(self.slots.upload(
            0,
            "composite_params",
            bytemuck::bytes_of(params),
            render_device,
            render_queue,
        ));
    }
}

pub fn prepare_composite_params(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
    settings: Option<Res<RenderSettings>>,
    mut views: Query<(Entity, &ViewDeferredTargets, Option<&mut ViewCompositeParams>)>,
) {
    let Some(settings) = settings else {
        return;
    };

    for (entity, targets, view_params) in views.iter_mut() {
        let params = CompositeParams::new(&settings, targets.edge.is_some());
        match view_params {
            Some(mut view_params) => view_params.upload(&params, &render_device, &render_queue),
            None => {
                let mut view_params = ViewCompositeParams::default();
                view_params.upload(&params, &render_device, &render_queue);
                commands.entity(entity).insert(view_params);
            }
        }
    }
}

/// Render graph node writing the deferred result to the view target.
#[derive(Default)]
pub struct CompositePassNode;

impl ViewNode for CompositePassNode {
    type ViewQuery = (
        &'static ExtractedCamera,
        &'static ViewTarget,
        &'static ViewDeferredTargets,
        &'static ViewFramePlan,
        &'static ViewCompositeParams,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (camera, target, targets, plan, params): bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        if !plan.0.contains(FramePass::Composite) && !plan.0.contains(FramePass::DebugGBuffer) {
            return Ok(());
        }

        let pipeline_cache = world.resource::<PipelineCache>();
        let (Some(composite), Some(quad)) = (
            world.get_resource::<CompositePipeline>(),
            world.get_resource::<QuadRenderer>(),
        ) else {
            return Ok(());
        };
        let Some(pipeline) = pipeline_cache.get_render_pipeline(composite.pipeline_id) else {
            return Ok(());
        };

        let Some(buffer) = params.buffer.as_ref() else {
            return Ok(());
        };
        let edge_view = targets.edge.as_ref().map(|edge| &edge.view);

        let bind_group = render_context.render_device().create_bind_group(
            "composite_bind_group",
            &composite.layout,
            &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&targets.diffuse.view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&targets.normal.view),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(&targets.depth.view),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: BindingResource::TextureView(&targets.light.view),
                },
                BindGroupEntry {
                    binding: 4,
                    // Unread when the edge flag is off
                    resource: BindingResource::TextureView(
                        edge_view.unwrap_or(&targets.light.view),
                    ),
                },
                BindGroupEntry {
                    binding: 5,
                    resource: BindingResource::Sampler(&composite.sampler),
                },
                BindGroupEntry {
                    binding: 6,
                    resource: buffer.as_entire_binding(),
                },
            ],
        );

        let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("composite_pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: target.main_texture_view(),
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(wgpu::Color::BLACK),
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
