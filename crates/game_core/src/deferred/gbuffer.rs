//! G-Buffer fill: shared layouts, per-view and per-mesh uniforms, and the
//! clear and geometry pipelines.
//!
//! ## Encoding
//!
//! - diffuse: RGB = albedo, A = specular intensity
//! - normal: RGB = world normal * 0.5 + 0.5, A = 1 for lit surfaces
//! - depth: R = linear view depth / far clip
//!
//! The clear shader writes diffuse 0, normal (0.5, 0.5, 0.5, 0) and depth 1
//! so untouched pixels read as an unlit surface at the far plane.

use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    mesh::{allocator::MeshAllocator, RenderMesh, RenderMeshBufferInfo},
    render_asset::RenderAssets,
    render_phase::TrackedRenderPass,
    render_resource::{
        AddressMode, BindGroup, BindGroupEntry, Buffer, BindGroupLayout, BindGroupLayoutEntry,
        BindingResource, BindingType, BufferBindingType, BufferInitDescriptor, BufferUsages,
        CachedRenderPipelineId, ColorTargetState, ColorWrites, CompareFunction, DepthStencilState,
        FilterMode, FragmentState, MultisampleState, PipelineCache, PrimitiveState,
        RenderPipelineDescriptor, Sampler, SamplerBindingType, SamplerDescriptor, ShaderStages,
        StencilState, TextureSampleType, TextureView, TextureViewDimension, VertexState,
    },
    renderer::RenderDevice,
    texture::GpuImage,
    view::ExtractedView,
};
use bytemuck::{Pod, Zeroable};
use bevy_mesh::{VertexBufferLayout, VertexFormat};

use super::extract::ExtractedDrawables;
use super::quad::QuadVertex;
use super::targets::{gbuffer_formats, DeferredCamera, DEFERRED_DEPTH_FORMAT};
use crate::material::DefaultTextures;
use crate::settings::QualityTier;

/// Camera data shared by every deferred and forward pass.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct DeferredViewUniform {
    pub clip_from_world: [[f32; 4]; 4],
    pub world_from_clip: [[f32; 4]; 4],
    pub view_from_world: [[f32; 4]; 4],
    pub world_from_view: [[f32; 4]; 4],
    pub clip_from_view: [[f32; 4]; 4],
    pub view_from_clip: [[f32; 4]; 4],
    /// XYZ = eye position, W = far clip
    pub eye_far: [f32; 4],
    /// x, y, width, height in pixels
    pub viewport: [f32; 4],
}

impl DeferredViewUniform {
    pub fn new(world_from_view: Mat4, clip_from_view: Mat4, far_clip: f32, viewport: UVec2) -> Self {
        let view_from_world = world_from_view.inverse();
        let clip_from_world = clip_from_view * view_from_world;
        let eye = world_from_view.w_axis.truncate();
        Self {
            clip_from_world: clip_from_world.to_cols_array_2d(),
            world_from_clip: clip_from_world.inverse().to_cols_array_2d(),
            view_from_world: view_from_world.to_cols_array_2d(),
            world_from_view: world_from_view.to_cols_array_2d(),
            clip_from_view: clip_from_view.to_cols_array_2d(),
            view_from_clip: clip_from_view.inverse().to_cols_array_2d(),
            eye_far: [eye.x, eye.y, eye.z, far_clip],
            viewport: [0.0, 0.0, viewport.x as f32, viewport.y as f32],
        }
    }
}

/// Per-mesh transforms.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct MeshTransformUniform {
    pub world_from_local: [[f32; 4]; 4],
    /// Inverse transpose of `world_from_local`
    pub normal_from_local: [[f32; 4]; 4],
    /// X = 1 for lit surfaces
    pub params: [f32; 4],
}

impl MeshTransformUniform {
    pub fn new(world_from_local: Mat4, lit: bool) -> Self {
        Self {
            world_from_local: world_from_local.to_cols_array_2d(),
            normal_from_local: world_from_local.inverse().transpose().to_cols_array_2d(),
            params: [if lit { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0],
        }
    }
}

/// Vertex layout of every scene mesh: position, normal, UV.
pub fn scene_vertex_layout() -> VertexBufferLayout {
    VertexBufferLayout::from_vertex_formats(
        wgpu::VertexStepMode::Vertex,
        [
            VertexFormat::Float32x3, // Position
            VertexFormat::Float32x3, // Normal
            VertexFormat::Float32x2, // UV
        ],
    )
}

fn uniform_entry(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn texture_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: true },
            view_dimension: TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

pub(crate) fn sampler_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Sampler(SamplerBindingType::Filtering),
        count: None,
    }
}

pub(crate) fn uniform_layout_entry(binding: u32) -> BindGroupLayoutEntry {
    uniform_entry(binding, ShaderStages::VERTEX_FRAGMENT)
}

/// Bind group layouts shared by every pass that draws scene meshes.
#[derive(Resource)]
pub struct DeferredMeshLayouts {
    /// Group 0: [`DeferredViewUniform`]
    pub view_layout: BindGroupLayout,
    /// Group 1: [`MeshTransformUniform`]
    pub mesh_layout: BindGroupLayout,
    /// Group 2: diffuse, normal, specular, sampler
    pub material_layout: BindGroupLayout,
    pub material_sampler: Sampler,
}

pub fn init_deferred_mesh_layouts(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    existing: Option<Res<DeferredMeshLayouts>>,
) {
    if existing.is_some() {
        return;
    }

    let view_layout = render_device.create_bind_group_layout(
        "deferred_view_layout",
        &[uniform_entry(0, ShaderStages::VERTEX_FRAGMENT)],
    );
    let mesh_layout = render_device.create_bind_group_layout(
        "deferred_mesh_layout",
        &[uniform_entry(0, ShaderStages::VERTEX_FRAGMENT)],
    );
    let material_layout = render_device.create_bind_group_layout(
        "deferred_material_layout",
        &[texture_entry(0), texture_entry(1), texture_entry(2), sampler_entry(3)],
    );

    let material_sampler = render_device.create_sampler(&SamplerDescriptor {
        label: Some("deferred_material_sampler"),
        address_mode_u: AddressMode::Repeat,
        address_mode_v: AddressMode::Repeat,
        mag_filter: FilterMode::Linear,
        min_filter: FilterMode::Linear,
        mipmap_filter: FilterMode::Linear,
        ..default()
    });

    commands.insert_resource(DeferredMeshLayouts {
        view_layout,
        mesh_layout,
        material_layout,
        material_sampler,
    });
}

/// Pipeline ids specialised per G-buffer format set.
///
/// Low and Medium share formats, so only two variants exist.
#[derive(Debug, Clone, Copy)]
pub struct TierPipelines {
    pub high: CachedRenderPipelineId,
    pub compact: CachedRenderPipelineId,
}

impl TierPipelines {
    pub fn queue(
        pipeline_cache: &PipelineCache,
        descriptor: impl Fn(QualityTier) -> RenderPipelineDescriptor,
    ) -> Self {
        Self {
            high: pipeline_cache.queue_render_pipeline(descriptor(QualityTier::High)),
            compact: pipeline_cache.queue_render_pipeline(descriptor(QualityTier::Medium)),
        }
    }

    pub fn get(&self, quality: QualityTier) -> CachedRenderPipelineId {
        match quality {
            QualityTier::High => self.high,
            QualityTier::Medium | QualityTier::Low => self.compact,
        }
    }
}

fn gbuffer_targets(quality: QualityTier) -> Vec<Option<ColorTargetState>> {
    gbuffer_formats(quality)
        .into_iter()
        .map(|format| {
            Some(ColorTargetState {
                format,
                blend: None,
                write_mask: ColorWrites::ALL,
            })
        })
        .collect()
}

/// Clear and geometry pipelines for the G-buffer pass.
#[derive(Resource)]
pub struct GBufferPipelines {
    pub clear: TierPipelines,
    pub geometry: TierPipelines,
}

pub fn init_gbuffer_pipelines(
    mut commands: Commands,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    layouts: Option<Res<DeferredMeshLayouts>>,
    existing: Option<Res<GBufferPipelines>>,
) {
    if existing.is_some() {
        return;
    }
    let Some(layouts) = layouts else {
        return;
    };

    let clear_shader = asset_server.load("shaders/gbuffer_clear.wgsl");
    let clear = TierPipelines::queue(&pipeline_cache, |quality| RenderPipelineDescriptor {
        label: Some("gbuffer_clear_pipeline".into()),
        layout: vec![],
        push_constant_ranges: vec![],
        vertex: VertexState {
            shader: clear_shader.clone(),
            shader_defs: vec![],
            entry_point: Some("vs_main".into()),
            buffers: vec![QuadVertex::vertex_buffer_layout()],
        },
        primitive: PrimitiveState::default(),
        // Shares the pass with geometry, so it must accept the depth
        // attachment without touching it
        depth_stencil: Some(DepthStencilState {
            format: DEFERRED_DEPTH_FORMAT,
            depth_write_enabled: false,
            depth_compare: CompareFunction::Always,
            stencil: StencilState::default(),
            bias: Default::default(),
        }),
        multisample: MultisampleState::default(),
        fragment: Some(FragmentState {
            shader: clear_shader.clone(),
            shader_defs: vec![],
            entry_point: Some("fs_main".into()),
            targets: gbuffer_targets(quality),
        }),
        zero_initialize_workgroup_memory: false,
    });

    let geometry_shader = asset_server.load("shaders/gbuffer.wgsl");
    let geometry = TierPipelines::queue(&pipeline_cache, |quality| RenderPipelineDescriptor {
        label: Some("gbuffer_geometry_pipeline".into()),
        layout: vec![
            layouts.view_layout.clone(),
            layouts.mesh_layout.clone(),
            layouts.material_layout.clone(),
        ],
        push_constant_ranges: vec![],
        vertex: VertexState {
            shader: geometry_shader.clone(),
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
            shader: geometry_shader.clone(),
            shader_defs: vec![],
            entry_point: Some("fs_main".into()),
            targets: gbuffer_targets(quality),
        }),
        zero_initialize_workgroup_memory: false,
    });

    commands.insert_resource(GBufferPipelines { clear, geometry });
    info!("GBufferPipelines initialized");
}

/// View uniform bind group for a deferred camera.
#[derive(Component)]
pub struct ViewDeferredUniforms {
    pub bind_group: BindGroup,
    /// Also bound by the light and composite passes
    pub buffer: Buffer,
    pub eye: Vec3,
    pub uniform: DeferredViewUniform,
}

pub fn prepare_deferred_view_uniforms(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    layouts: Option<Res<DeferredMeshLayouts>>,
    cameras: Query<(Entity, &ExtractedCamera, &ExtractedView, &DeferredCamera)>,
) {
    let Some(layouts) = layouts else {
        return;
    };

    for (entity, camera, view, deferred) in cameras.iter() {
        let Some(viewport) = camera.physical_viewport_size else {
            continue;
        };

        let world_from_view = view.world_from_view.to_matrix();
        let uniform =
            DeferredViewUniform::new(world_from_view, view.clip_from_view, deferred.far_clip, viewport);

        let buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("deferred_view_uniform"),
            contents: bytemuck::bytes_of(&uniform),
            usage: BufferUsages::UNIFORM,
        });

        let bind_group = render_device.create_bind_group(
            Some("deferred_view_bind_group"),
            &layouts.view_layout,
            &[BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        );

        commands.entity(entity).insert(ViewDeferredUniforms {
            bind_group,
            buffer,
            eye: view.world_from_view.translation(),
            uniform,
        });
    }
}

/// A drawable with its GPU bindings for this frame.
pub struct PreparedDrawable {
    pub mesh: AssetId<Mesh>,
    pub transform_bind_group: BindGroup,
    /// None until the textures (or their fallbacks) are on the GPU.
    pub material_bind_group: Option<BindGroup>,
}

#[derive(Resource, Default)]
pub struct PreparedDrawables {
    pub items: Vec<PreparedDrawable>,
}

fn image_view<'a>(
    images: &'a RenderAssets<GpuImage>,
    id: AssetId<Image>,
    fallback: Option<AssetId<Image>>,
) -> Option<&'a TextureView> {
    images
        .get(id)
        .or_else(|| fallback.and_then(|f| images.get(f)))
        .map(|image| &image.texture_view)
}

pub fn prepare_drawables(
    render_device: Res<RenderDevice>,
    layouts: Option<Res<DeferredMeshLayouts>>,
    extracted: Res<ExtractedDrawables>,
    images: Res<RenderAssets<GpuImage>>,
    defaults: Option<Res<DefaultTextures>>,
    mut prepared: ResMut<PreparedDrawables>,
) {
    prepared.items.clear();
    let Some(layouts) = layouts else {
        return;
    };

    for drawable in &extracted.items {
        let uniform = MeshTransformUniform::new(drawable.world_from_local, drawable.lit);
        let buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("deferred_mesh_uniform"),
            contents: bytemuck::bytes_of(&uniform),
            usage: BufferUsages::UNIFORM,
        });
        let transform_bind_group = render_device.create_bind_group(
            Some("deferred_mesh_bind_group"),
            &layouts.mesh_layout,
            &[BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        );

        let diffuse = image_view(&images, drawable.diffuse, defaults.as_ref().map(|d| d.white.id()));
        let normal = image_view(
            &images,
            drawable.normal,
            defaults.as_ref().map(|d| d.null_normal.id()),
        );
        let specular = image_view(
            &images,
            drawable.specular,
            defaults.as_ref().map(|d| d.null_specular.id()),
        );

        let material_bind_group = match (diffuse, normal, specular) {
            (Some(diffuse), Some(normal), Some(specular)) => Some(render_device.create_bind_group(
                Some("deferred_material_bind_group"),
                &layouts.material_layout,
                &[
                    BindGroupEntry {
                        binding: 0,
                        resource: BindingResource::TextureView(diffuse),
                    },
                    BindGroupEntry {
                        binding: 1,
                        resource: BindingResource::TextureView(normal),
                    },
                    BindGroupEntry {
                        binding: 2,
                        resource: BindingResource::TextureView(specular),
                    },
                    BindGroupEntry {
                        binding: 3,
                        resource: BindingResource::Sampler(&layouts.material_sampler),
                    },
                ],
            )),
            _ => None,
        };

        prepared.items.push(PreparedDrawable {
            mesh: drawable.mesh,
            transform_bind_group,
            material_bind_group,
        });
    }

    if !prepared.items.is_empty() {
        debug!("Prepared {} drawables", prepared.items.len());
    }
}

/// Bind one scene mesh and issue its draw call.
///
/// Returns false when the mesh is not resident on the GPU yet.
pub fn draw_scene_mesh<'w>(
    render_pass: &mut TrackedRenderPass<'w>,
    mesh_allocator: &'w MeshAllocator,
    render_meshes: &'w RenderAssets<RenderMesh>,
    mesh: AssetId<Mesh>,
) -> bool {
    let Some(gpu_mesh) = render_meshes.get(mesh) else {
        return false;
    };
    let Some(vertex_slice) = mesh_allocator.mesh_vertex_slice(&mesh) else {
        return false;
    };

    render_pass.set_vertex_buffer(0, vertex_slice.buffer.slice(..));

    match &gpu_mesh.buffer_info {
        RenderMeshBufferInfo::Indexed {
            count,
            index_format,
        } => {
            let Some(index_slice) = mesh_allocator.mesh_index_slice(&mesh) else {
                return false;
            };
            render_pass.set_index_buffer(index_slice.buffer.slice(..), 0, *index_format);
            render_pass.draw_indexed(
                index_slice.range.start..(index_slice.range.start + count),
                vertex_slice.range.start as i32,
                0..1,
            );
        }
        RenderMeshBufferInfo::NonIndexed => {
            render_pass.draw(vertex_slice.range.clone(), 0..1);
        }
    }
    true
}
