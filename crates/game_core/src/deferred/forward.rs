//! Forward fallback path.
//!
//! 1. Normal + depth of every drawable into the normal/depth target
//! 2. Toon-shaded scene color into the scene target
//! 3. Edge detect over both, written to the view target
//!
//! Both geometry passes share one depth buffer and clear it.

use bevy::image::BevyDefault;
use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    mesh::{allocator::MeshAllocator, RenderMesh},
    render_asset::RenderAssets,
    render_graph::{NodeRunError, RenderGraphContext, ViewNode},
    render_resource::{
        BindGroupEntry, BindGroupLayout, BindingResource, BufferInitDescriptor, BufferUsages,
        CachedRenderPipelineId, ColorTargetState, ColorWrites, CompareFunction, DepthStencilState,
        FilterMode, FragmentState, LoadOp, MultisampleState, Operations, PipelineCache,
        PrimitiveState, RenderPassColorAttachment, RenderPassDepthStencilAttachment,
        RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor, Sampler, SamplerDescriptor,
        StencilState, StoreOp, TextureFormat, TextureView, VertexState,
    },
    renderer::{RenderContext, RenderDevice},
    view::ViewTarget,
};

use super::edge_node::EdgeUniform;
use super::forward_targets::{
    EdgeDetectSettings, ViewForwardTargets, FORWARD_NORMAL_DEPTH_FORMAT, FORWARD_SCENE_FORMAT,
    NORMAL_DEPTH_CLEAR, SCENE_CLEAR,
};
use super::frame::{FramePass, ViewFramePlan};
use super::gbuffer::{
    draw_scene_mesh, sampler_entry, scene_vertex_layout, texture_entry, uniform_layout_entry,
    DeferredMeshLayouts, PreparedDrawables, ViewDeferredUniforms,
};
use super::quad::{QuadRenderer, QuadVertex};
use super::targets::DEFERRED_DEPTH_FORMAT;

/// Forward path pipelines.
#[derive(Resource)]
pub struct ForwardPipelines {
    pub normal_depth: CachedRenderPipelineId,
    pub scene: CachedRenderPipelineId,
    pub edge_detect: CachedRenderPipelineId,
    /// Scene color, normal/depth, sampler, [`EdgeUniform`]
    pub edge_layout: BindGroupLayout,
    pub edge_sampler: Sampler,
}

fn mesh_pipeline(
    label: &'static str,
    shader: Handle<Shader>,
    layout: Vec<BindGroupLayout>,
    format: TextureFormat,
) -> RenderPipelineDescriptor {
    RenderPipelineDescriptor {
        label: Some(label.into()),
        layout,
        push_constant_ranges: vec![],
        vertex: VertexState {
            shader: shader.clone(),
            shader_defs: vec![],
            entry_point: Some("vs_main".into()),
            buffers: vec![scene_vertex_layout()],
        },
        primitive: PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: Some(wgpu::Face::Back),
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: Some(DepthStencilState {
            format: DEFERRED_DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: CompareFunction::GreaterEqual, // Reverse-Z
            stencil: StencilState::default(),
            bias: Default::default(),
        }),
        multisample: MultisampleState::default(),
        fragment: Some(FragmentState {
            shader,
            shader_defs: vec![],
            entry_point: Some("fs_main".into()),
            targets: vec![Some(ColorTargetState {
                format,
                blend: None,
                write_mask: ColorWrites::ALL,
            })],
        }),
        zero_initialize_workgroup_memory: false,
    }
}

pub fn init_forward_pipelines(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    layouts: Option<Res<DeferredMeshLayouts>>,
    existing: Option<Res<ForwardPipelines>>,
) {
    if existing.is_some() {
        return;
    }
    let Some(layouts) = layouts else {
        return;
    };

    let normal_depth = pipeline_cache.queue_render_pipeline(mesh_pipeline(
        "forward_normal_depth_pipeline",
        asset_server.load("shaders/forward_normal_depth.wgsl"),
        vec![layouts.view_layout.clone(), layouts.mesh_layout.clone()],
        FORWARD_NORMAL_DEPTH_FORMAT,
    ));
    let scene = pipeline_cache.queue_render_pipeline(mesh_pipeline(
        "forward_toon_pipeline",
        asset_server.load("shaders/forward_toon.wgsl"),
        vec![
            layouts.view_layout.clone(),
            layouts.mesh_layout.clone(),
            layouts.material_layout.clone(),
        ],
        FORWARD_SCENE_FORMAT,
    ));

    let edge_layout = render_device.create_bind_group_layout(
        "forward_edge_layout",
        &[texture_entry(0), texture_entry(1), sampler_entry(2), uniform_layout_entry(3)],
    );
    let edge_sampler = render_device.create_sampler(&SamplerDescriptor {
        label: Some("forward_edge_sampler"),
        mag_filter: FilterMode::Linear,
        min_filter: FilterMode::Linear,
        ..default()
    });

    let edge_shader = asset_server.load("shaders/forward_edge_detect.wgsl");
    let edge_detect = pipeline_cache.queue_render_pipeline(RenderPipelineDescriptor {
        label: Some("forward_edge_detect_pipeline".into()),
        layout: vec![edge_layout.clone()],
        push_constant_ranges: vec![],
        vertex: VertexState {
            shader: edge_shader.clone(),
            shader_defs: vec![],
            entry_point: Some("vs_main".into()),
            buffers: vec![QuadVertex::vertex_buffer_layout()],
        },
        primitive: PrimitiveState::default(),
        depth_stencil: None,
        multisample: MultisampleState::default(),
        fragment: Some(FragmentState {
            shader: edge_shader,
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

    commands.insert_resource(ForwardPipelines {
        normal_depth,
        scene,
        edge_detect,
        edge_layout,
        edge_sampler,
    });
    info!("ForwardPipelines initialized");
}

/// Render graph node for the two forward geometry passes.
#[derive(Default)]
pub struct ForwardScenePassNode;

impl ViewNode for ForwardScenePassNode {
    type ViewQuery = (
        &'static ExtractedCamera,
        &'static ViewForwardTargets,
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
        let pipeline_cache = world.resource::<PipelineCache>();
        let (Some(pipelines), Some(drawables)) = (
            world.get_resource::<ForwardPipelines>(),
            world.get_resource::<PreparedDrawables>(),
        ) else {
            return Ok(());
        };

        let scene_passes = [
            (
                FramePass::ForwardNormalDepth,
                "forward_normal_depth_pass",
                pipelines.normal_depth,
                &targets.normal_depth.default_view,
                NORMAL_DEPTH_CLEAR,
                false,
            ),
            (
                FramePass::ForwardScene,
                "forward_scene_pass",
                pipelines.scene,
                &targets.scene.default_view,
                SCENE_CLEAR,
                true,
            ),
        ];

        for (pass, label, pipeline_id, color, clear, with_material) in scene_passes {
            if !plan.0.contains(pass) {
                continue;
            }
            let Some(pipeline) = pipeline_cache.get_render_pipeline(pipeline_id) else {
                continue;
            };
            forward_geometry_pass(
                render_context,
                world,
                ForwardGeometryPass {
                    label,
                    pipeline,
                    color,
                    clear,
                    with_material,
                },
                &targets.depth.default_view,
                camera,
                uniforms,
                drawables,
            );
        }

        Ok(())
    }
}

struct ForwardGeometryPass<'a> {
    label: &'static str,
    pipeline: &'a RenderPipeline,
    color: &'a TextureView,
    clear: wgpu::Color,
    /// Bind group 2 (material) is used by the scene pass only
    with_material: bool,
}

fn forward_geometry_pass<'w>(
    render_context: &mut RenderContext<'w>,
    world: &'w World,
    pass: ForwardGeometryPass<'w>,
    depth: &TextureView,
    camera: &ExtractedCamera,
    uniforms: &'w ViewDeferredUniforms,
    drawables: &'w PreparedDrawables,
) {
    let mesh_allocator = world.resource::<MeshAllocator>();
    let render_meshes = world.resource::<RenderAssets<RenderMesh>>();

    let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
        label: Some(pass.label),
        color_attachments: &[Some(RenderPassColorAttachment {
            view: pass.color,
            resolve_target: None,
            ops: Operations {
                load: LoadOp::Clear(pass.clear),
                store: StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
            view: depth,
            depth_ops: Some(Operations {
                load: LoadOp::Clear(0.0),
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

    render_pass.set_render_pipeline(pass.pipeline);
    render_pass.set_bind_group(0, &uniforms.bind_group, &[]);
    for drawable in &drawables.items {
        render_pass.set_bind_group(1, &drawable.transform_bind_group, &[]);
        if pass.with_material {
            let Some(material) = &drawable.material_bind_group else {
                continue;
            };
            render_pass.set_bind_group(2, material, &[]);
        }
        draw_scene_mesh(&mut render_pass, mesh_allocator, render_meshes, drawable.mesh);
    }
}

/// Render graph node writing the edge-detected forward image to the view
/// target.
#[derive(Default)]
pub struct ForwardEdgeDetectNode;

impl ViewNode for ForwardEdgeDetectNode {
    type ViewQuery = (
        &'static ExtractedCamera,
        &'static ViewTarget,
        &'static ViewForwardTargets,
        &'static ViewFramePlan,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (camera, target, targets, plan): bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        if !plan.0.contains(FramePass::ForwardEdgeDetect) {
            return Ok(());
        }

        let pipeline_cache = world.resource::<PipelineCache>();
        let (Some(pipelines), Some(quad)) = (
            world.get_resource::<ForwardPipelines>(),
            world.get_resource::<QuadRenderer>(),
        ) else {
            return Ok(());
        };
        let Some(pipeline) = pipeline_cache.get_render_pipeline(pipelines.edge_detect) else {
            return Ok(());
        };

        let uniform = EdgeUniform::new(&EdgeDetectSettings::default(), targets.size);
        let buffer = render_context
            .render_device()
            .create_buffer_with_data(&BufferInitDescriptor {
                label: Some("forward_edge_uniform"),
                contents: bytemuck::bytes_of(&uniform),
                usage: BufferUsages::UNIFORM,
            });
        let bind_group = render_context.render_device().create_bind_group(
            "forward_edge_bind_group",
            &pipelines.edge_layout,
            &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&targets.scene.default_view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&targets.normal_depth.default_view),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::Sampler(&pipelines.edge_sampler),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: buffer.as_entire_binding(),
                },
            ],
        );

        let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("forward_edge_detect_pass"),
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
