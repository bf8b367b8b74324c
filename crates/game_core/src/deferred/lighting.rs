//! Light accumulation: per-light uniforms, pipelines and per-view draw lists.
//!
//! Every light kind shares `light.wgsl`; a shader def picks the variant:
//!
//! | Kind        | Def               | Geometry          | Cull                  |
//! |-------------|-------------------|-------------------|-----------------------|
//! | Directional | LIGHT_DIRECTIONAL | fullscreen quad   | none                  |
//! | Point       | LIGHT_POINT       | unit sphere       | front if camera inside |
//! | Spot        | LIGHT_SPOT        | unit cone         | front if camera inside |
//!
//! Contributions are alpha blended into the accumulation target. The light
//! depth attachment is tested (`GreaterEqual` against a cleared 0) but never
//! written.

use bevy::prelude::*;
use bevy::render::{
    render_asset::RenderAssets,
    render_resource::{
        AddressMode, BindGroup, BindGroupEntry, BindGroupLayout, BindingResource, BlendState,
        CachedRenderPipelineId, ColorTargetState, ColorWrites,
        CompareFunction, DepthStencilState, Extent3d, FilterMode, FragmentState, MultisampleState,
        PipelineCache, PrimitiveState, RenderPipelineDescriptor, Sampler, SamplerDescriptor,
        StencilState, Texture, TextureDescriptor, TextureDimension, TextureUsages, TextureView,
        TextureViewDescriptor, VertexState,
    },
    renderer::{RenderDevice, RenderQueue},
    texture::GpuImage,
};
use bytemuck::{Pod, Zeroable};
use rand::Rng;

use super::extract::ExtractedLights;
use super::gbuffer::{sampler_entry, texture_entry, uniform_layout_entry, ViewDeferredUniforms};
use super::light_volume::VolumeMesh;
use super::quad::QuadVertex;
use super::shadow::{shadow_view_for, ShadowPipeline, SpotShadowMaps, SHADOW_MOMENTS_FORMAT};
use super::targets::{ViewDeferredTargets, DEFERRED_DEPTH_FORMAT, LIGHT_TARGET_FORMAT};
use super::uniform_slots::UniformSlots;
use crate::light::{DeferredLight, LightKind, LightVolume, VolumeCull};
use crate::material::DefaultTextures;
use crate::settings::{LightGlobals, RenderSettings};

/// Light parameters as the light shader reads them.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    /// XYZ = position, W = radius (point) or max distance (spot)
    pub position_radius: [f32; 4],
    /// XYZ = direction of travel, W = cos(angle / 2) (spot)
    pub direction_cos: [f32; 4],
    /// RGB = linear color, A = intensity
    pub color_intensity: [f32; 4],
    /// X = decay rate, Y = 1 when shadowed, Z = shadow map size
    pub params: [f32; 4],
    /// Volume proxy transform
    pub world: [[f32; 4]; 4],
    pub light_view_proj: [[f32; 4]; 4],
}

impl GpuLight {
    pub fn from_light(light: &DeferredLight, volume: &LightVolume, shadow_map_size: Option<u32>) -> Self {
        let color = light.color.to_linear();
        let world = match volume {
            LightVolume::FullScreen => Mat4::IDENTITY,
            LightVolume::Sphere { world, .. } | LightVolume::Cone { world, .. } => *world,
        };
        let shadow = [
            if shadow_map_size.is_some() { 1.0 } else { 0.0 },
            shadow_map_size.unwrap_or(0) as f32,
        ];

        let (position, reach, direction, cos_half, intensity, decay, view_proj) = match &light.kind {
            LightKind::Directional(dir) => (
                Vec3::ZERO,
                0.0,
                dir.direction(),
                0.0,
                dir.intensity,
                0.0,
                Mat4::IDENTITY,
            ),
            LightKind::Point(point) => (
                point.position,
                point.radius(),
                Vec3::ZERO,
                0.0,
                point.intensity,
                0.0,
                Mat4::IDENTITY,
            ),
            LightKind::Spot(spot) => (
                spot.position(),
                spot.max_distance(),
                spot.direction(),
                spot.cos_half_angle(),
                spot.intensity,
                spot.decay_rate,
                spot.view_projection(),
            ),
        };

        Self {
            position_radius: [position.x, position.y, position.z, reach],
            direction_cos: [direction.x, direction.y, direction.z, cos_half],
            color_intensity: [color.red, color.green, color.blue, intensity],
            params: [decay, shadow[0], shadow[1], 0.0],
            world: world.to_cols_array_2d(),
            light_view_proj: view_proj.to_cols_array_2d(),
        }
    }
}

/// Pipeline variant for one light draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightPipelineKey {
    Directional,
    Point(VolumeCull),
    Spot(VolumeCull),
}

impl LightPipelineKey {
    pub const ALL: [LightPipelineKey; 5] = [
        LightPipelineKey::Directional,
        LightPipelineKey::Point(VolumeCull::Front),
        LightPipelineKey::Point(VolumeCull::Back),
        LightPipelineKey::Spot(VolumeCull::Front),
        LightPipelineKey::Spot(VolumeCull::Back),
    ];

    pub fn for_volume(volume: &LightVolume) -> Self {
        match volume {
            LightVolume::FullScreen => LightPipelineKey::Directional,
            LightVolume::Sphere { cull, .. } => LightPipelineKey::Point(*cull),
            LightVolume::Cone { cull, .. } => LightPipelineKey::Spot(*cull),
        }
    }

    pub fn shader_def(self) -> &'static str {
        match self {
            LightPipelineKey::Directional => "LIGHT_DIRECTIONAL",
            LightPipelineKey::Point(_) => "LIGHT_POINT",
            LightPipelineKey::Spot(_) => "LIGHT_SPOT",
        }
    }

    pub fn cull_mode(self) -> Option<wgpu::Face> {
        match self {
            LightPipelineKey::Directional => None,
            LightPipelineKey::Point(cull) | LightPipelineKey::Spot(cull) => Some(cull.face()),
        }
    }

    fn label(self) -> &'static str {
        match self {
            LightPipelineKey::Directional => "light_directional_pipeline",
            LightPipelineKey::Point(VolumeCull::Front) => "light_point_front_pipeline",
            LightPipelineKey::Point(VolumeCull::Back) => "light_point_back_pipeline",
            LightPipelineKey::Spot(VolumeCull::Front) => "light_spot_front_pipeline",
            LightPipelineKey::Spot(VolumeCull::Back) => "light_spot_back_pipeline",
        }
    }
}

/// Light accumulation pipelines and their shared bindings.
#[derive(Resource)]
pub struct LightPipelines {
    pipelines: Vec<(LightPipelineKey, CachedRenderPipelineId)>,
    /// Group 0: diffuse, normal, depth, sampler, view uniform
    pub gbuffer_layout: BindGroupLayout,
    /// Group 1: light uniform, shadow moments, shadow sampler, cookie, cookie sampler
    pub light_layout: BindGroupLayout,
    pub gbuffer_sampler: Sampler,
    pub shadow_sampler: Sampler,
    pub cookie_sampler: Sampler,
    /// Bound in place of a shadow map by unshadowed lights.
    #[allow(dead_code)]
    fallback_shadow: Texture,
    pub fallback_shadow_view: TextureView,
}

impl LightPipelines {
    pub fn get(&self, key: LightPipelineKey) -> Option<CachedRenderPipelineId> {
        self.pipelines
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, id)| *id)
    }
}

fn clamp_sampler(render_device: &RenderDevice, label: &'static str, filter: FilterMode) -> Sampler {
    render_device.create_sampler(&SamplerDescriptor {
        label: Some(label),
        address_mode_u: AddressMode::ClampToEdge,
        address_mode_v: AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        ..default()
    })
}

pub fn init_light_pipelines(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    existing: Option<Res<LightPipelines>>,
) {
    if existing.is_some() {
        return;
    }

    let gbuffer_layout = render_device.create_bind_group_layout(
        "light_gbuffer_layout",
        &[
            texture_entry(0),
            texture_entry(1),
            texture_entry(2),
            sampler_entry(3),
            uniform_layout_entry(4),
        ],
    );
    let light_layout = render_device.create_bind_group_layout(
        "light_params_layout",
        &[
            uniform_layout_entry(0),
            texture_entry(1),
            sampler_entry(2),
            texture_entry(3),
            sampler_entry(4),
        ],
    );

    let fallback_shadow = render_device.create_texture(&TextureDescriptor {
        label: Some("light_fallback_shadow"),
        size: Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: SHADOW_MOMENTS_FORMAT,
        usage: TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let fallback_shadow_view = fallback_shadow.create_view(&TextureViewDescriptor::default());

    let shader = asset_server.load("shaders/light.wgsl");
    let pipelines = LightPipelineKey::ALL
        .into_iter()
        .map(|key| {
            let buffers = match key {
                LightPipelineKey::Directional => QuadVertex::vertex_buffer_layout(),
                LightPipelineKey::Point(_) | LightPipelineKey::Spot(_) => {
                    VolumeMesh::vertex_buffer_layout()
                }
            };
            let id = pipeline_cache.queue_render_pipeline(RenderPipelineDescriptor {
                label: Some(key.label().into()),
                layout: vec![gbuffer_layout.clone(), light_layout.clone()],
                push_constant_ranges: vec![],
                vertex: VertexState {
                    shader: shader.clone(),
                    shader_defs: vec![key.shader_def().into()],
                    entry_point: Some("vs_main".into()),
                    buffers: vec![buffers],
                },
                primitive: PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: key.cull_mode(),
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: Some(DepthStencilState {
                    format: DEFERRED_DEPTH_FORMAT,
                    depth_write_enabled: false,
                    depth_compare: CompareFunction::GreaterEqual,
                    stencil: StencilState::default(),
                    bias: Default::default(),
                }),
                multisample: MultisampleState::default(),
                fragment: Some(FragmentState {
                    shader: shader.clone(),
                    shader_defs: vec![key.shader_def().into()],
                    entry_point: Some("fs_main".into()),
                    targets: vec![Some(ColorTargetState {
                        format: LIGHT_TARGET_FORMAT,
                        blend: Some(BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                        write_mask: ColorWrites::ALL,
                    })],
                }),
                zero_initialize_workgroup_memory: false,
            });
            (key, id)
        })
        .collect();

    commands.insert_resource(LightPipelines {
        pipelines,
        gbuffer_layout,
        light_layout,
        gbuffer_sampler: clamp_sampler(&render_device, "light_gbuffer_sampler", FilterMode::Nearest),
        shadow_sampler: clamp_sampler(&render_device, "light_shadow_sampler", FilterMode::Linear),
        cookie_sampler: clamp_sampler(&render_device, "light_cookie_sampler", FilterMode::Linear),
        fallback_shadow,
        fallback_shadow_view,
    });
    info!("LightPipelines initialized ({} variants)", LightPipelineKey::ALL.len());
}

/// What one light does this frame, before any GPU work.
#[derive(Debug, Clone, PartialEq)]
pub struct LightDrawPlan {
    pub key: LightPipelineKey,
    pub volume: LightVolume,
    /// Render the shadow map before the light.
    pub shadowed: bool,
    /// False when a flickering light rolled a skip.
    pub visible: bool,
}

/// Decide how `light` is drawn for a camera at `eye`.
pub fn plan_light_draw<R: Rng + ?Sized>(
    light: &DeferredLight,
    eye: Vec3,
    settings: &RenderSettings,
    globals: &LightGlobals,
    rng: &mut R,
) -> LightDrawPlan {
    let volume = light.volume(eye);
    LightDrawPlan {
        key: LightPipelineKey::for_volume(&volume),
        volume,
        shadowed: light.renders_shadow_map() && settings.light_shadows_enabled(light.cast_shadows),
        visible: light.should_draw(rng, globals.flicker_probability),
    }
}

/// Shadow pass inputs for one light.
pub struct PreparedShadowPass {
    /// Key into [`SpotShadowMaps`]
    pub light: Entity,
    pub view_bind_group: BindGroup,
}

/// Everything the light node needs to draw one light.
pub struct PreparedLightDraw {
    pub plan: LightDrawPlan,
    pub light_bind_group: BindGroup,
    pub shadow: Option<PreparedShadowPass>,
}

/// Per-light uniform buffers of one view, kept across frames.
#[derive(Component, Default)]
pub struct ViewLightBuffers {
    pub lights: UniformSlots,
    pub shadow_views: UniformSlots,
}

/// Per-view light draw list, in light order.
#[derive(Component, Default)]
pub struct ViewLightDraws {
    pub gbuffer_bind_group: Option<BindGroup>,
    pub draws: Vec<PreparedLightDraw>,
}

#[allow(clippy::too_many_arguments)]
pub fn prepare_light_draws(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
    pipelines: Option<Res<LightPipelines>>,
    shadow_pipeline: Option<Res<ShadowPipeline>>,
    settings: Option<Res<RenderSettings>>,
    globals: Option<Res<LightGlobals>>,
    lights: Res<ExtractedLights>,
    shadow_maps: Res<SpotShadowMaps>,
    images: Res<RenderAssets<GpuImage>>,
    defaults: Option<Res<DefaultTextures>>,
    mut views: Query<(
        Entity,
        &ViewDeferredTargets,
        &ViewDeferredUniforms,
        Option<&mut ViewLightBuffers>,
    )>,
) {
    let (Some(pipelines), Some(settings)) = (pipelines, settings) else {
        return;
    };
    let globals = globals.as_deref().cloned().unwrap_or_default();
    let cookie = defaults
        .as_ref()
        .and_then(|d| images.get(d.spot_cookie.id()))
        .map(|image| &image.texture_view);
    let mut rng = rand::thread_rng();

    for (entity, targets, uniforms, buffers) in views.iter_mut() {
        let mut view_draws = ViewLightDraws::default();
        // Prepared even with lights off: shadow maps still refresh
        let Some(cookie) = cookie else {
            commands.entity(entity).insert(view_draws);
            continue;
        };

        let mut created = None;
        let buffers = match buffers {
            Some(buffers) => buffers.into_inner(),
            None => created.insert(ViewLightBuffers::default()),
        };
        let mut shadowed = 0;

        let [diffuse, normal, depth] = targets.gbuffer();
        view_draws.gbuffer_bind_group = Some(render_device.create_bind_group(
            Some("light_gbuffer_bind_group"),
            &pipelines.gbuffer_layout,
            &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&diffuse.view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&normal.view),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(&depth.view),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: BindingResource::Sampler(&pipelines.gbuffer_sampler),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: uniforms.buffer.as_entire_binding(),
                },
            ],
        ));

        for (index, extracted) in lights.lights.iter().enumerate() {
            let plan = plan_light_draw(&extracted.light, uniforms.eye, &settings, &globals, &mut rng);

            let map = plan
                .shadowed
                .then(|| shadow_maps.pool.get(&extracted.id))
                .flatten();
            let uniform = GpuLight::from_light(&extracted.light, &plan.volume, map.map(|m| m.size));
            let buffer = buffers.lights.upload(
                index,
                "light_uniform",
                bytemuck::bytes_of(&uniform),
                &render_device,
                &render_queue,
            );
            let moments = map
                .map(|m| &m.moments_view)
                .unwrap_or(&pipelines.fallback_shadow_view);

            let light_bind_group = render_device.create_bind_group(
                Some("light_params_bind_group"),
                &pipelines.light_layout,
                &[
                    BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 1,
                        resource: BindingResource::TextureView(moments),
                    },
                    BindGroupEntry {
                        binding: 2,
                        resource: BindingResource::Sampler(&pipelines.shadow_sampler),
                    },
                    BindGroupEntry {
                        binding: 3,
                        resource: BindingResource::TextureView(cookie),
                    },
                    BindGroupEntry {
                        binding: 4,
                        resource: BindingResource::Sampler(&pipelines.cookie_sampler),
                    },
                ],
            );

            let shadow = match (map, shadow_pipeline.as_ref(), shadow_view_for(&extracted.light.kind)) {
                (Some(_), Some(shadow_pipeline), Some(shadow_view)) => {
                    let buffer = buffers.shadow_views.upload(
                        shadowed,
                        "shadow_view_uniform",
                        bytemuck::bytes_of(&shadow_view),
                        &render_device,
                        &render_queue,
                    );
                    shadowed += 1;
                    Some(PreparedShadowPass {
                        light: extracted.id,
                        view_bind_group: render_device.create_bind_group(
                            Some("shadow_view_bind_group"),
                            &shadow_pipeline.view_layout,
                            &[BindGroupEntry {
                                binding: 0,
                                resource: buffer.as_entire_binding(),
                            }],
                        ),
                    })
                }
                _ => None,
            };

            view_draws.draws.push(PreparedLightDraw {
                plan,
                light_bind_group,
                shadow,
            });
        }

        buffers.lights.truncate(lights.lights.len());
        buffers.shadow_views.truncate(shadowed);

        debug!(
            "Prepared {} light draws ({} shadowed)",
            view_draws.draws.len(),
            shadowed
        );
        let mut view = commands.entity(entity);
        view.insert(view_draws);
        if let Some(created) = created {
            view.insert(created);
        }
    }
}
