//! Separable Gaussian blur for the light accumulation buffer.
//!
//! The kernel length is not a Rust constant: it is read from the blur
//! shader's `sample_weights` array declaration, so swapping the shader for a
//! wider one only needs a new WGSL file.
//!
//! Taps exploit bilinear filtering: after the centre tap, each pair sits
//! halfway between two texels (`2i + 1.5`), so one fetch averages two texels.

use std::collections::HashMap;
use std::f32::consts::PI;

use bevy::prelude::*;
use bevy::render::{
    render_resource::{
        BindGroupLayout, BindGroupLayoutEntry, BindingType, Buffer, BufferBindingType,
        CachedRenderPipelineId, ColorTargetState, ColorWrites, FilterMode, FragmentState,
        MultisampleState, PipelineCache, PrimitiveState, RenderPipelineDescriptor, Sampler,
        SamplerBindingType, SamplerDescriptor, ShaderStages, TextureSampleType,
        TextureViewDimension, VertexState,
    },
    renderer::{RenderDevice, RenderQueue},
};
use bevy::shader::Source;

use super::quad::QuadVertex;
use super::targets::{ViewDeferredTargets, LIGHT_TARGET_FORMAT};
use super::uniform_slots::UniformSlots;
use crate::material::{MaterialError, MaterialResult};
use crate::settings::{RenderSettings, ShadowBlur};

/// Standard deviation of the blur curve.
pub const BLUR_THETA: f32 = 2.0;

/// Name of the weights array inside the blur shader.
pub const SAMPLE_WEIGHTS_PARAM: &str = "sample_weights";

/// Name of the offsets array inside the blur shader.
pub const SAMPLE_OFFSETS_PARAM: &str = "sample_offsets";

/// Evaluate the Gaussian curve at `n` texels from the centre.
pub fn compute_gaussian(n: f32) -> f32 {
    let theta = BLUR_THETA;
    (1.0 / (2.0 * PI * theta).sqrt()) * (-(n * n) / (2.0 * theta * theta)).exp()
}

/// Weights and texture-space offsets for one blur direction.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    pub weights: Vec<f32>,
    pub offsets: Vec<Vec2>,
}

impl GaussianKernel {
    /// Build a kernel of `sample_count` taps stepping by `texel_step`
    /// (`(1/width, 0)` for horizontal, `(0, 1/height)` for vertical).
    pub fn new(sample_count: usize, texel_step: Vec2) -> Self {
        let mut weights = vec![0.0; sample_count];
        let mut offsets = vec![Vec2::ZERO; sample_count];
        if sample_count == 0 {
            return Self { weights, offsets };
        }

        weights[0] = compute_gaussian(0.0);
        let mut total = weights[0];

        for i in 0..(sample_count - 1) / 2 {
            let weight = compute_gaussian((i + 1) as f32);
            weights[i * 2 + 1] = weight;
            weights[i * 2 + 2] = weight;
            total += weight * 2.0;

            let delta = texel_step * (i as f32 * 2.0 + 1.5);
            offsets[i * 2 + 1] = delta;
            offsets[i * 2 + 2] = -delta;
        }

        for weight in weights.iter_mut() {
            *weight /= total;
        }

        Self { weights, offsets }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Uniform bytes: `sample_weights` then `sample_offsets`, one vec4 per tap.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len() * 32);
        for weight in &self.weights {
            bytes.extend_from_slice(bytemuck::bytes_of(&[*weight, 0.0f32, 0.0, 0.0]));
        }
        for offset in &self.offsets {
            bytes.extend_from_slice(bytemuck::bytes_of(&[offset.x, offset.y, 0.0f32, 0.0]));
        }
        bytes
    }
}

/// Process-wide kernel cache.
///
/// Entries are keyed by tap count and step, so the horizontal and vertical
/// passes each keep their own offsets.
#[derive(Resource, Default)]
pub struct GaussianKernelCache {
    kernels: HashMap<(usize, u32, u32), GaussianKernel>,
}

impl GaussianKernelCache {
    fn key(sample_count: usize, texel_step: Vec2) -> (usize, u32, u32) {
        (sample_count, texel_step.x.to_bits(), texel_step.y.to_bits())
    }

    pub fn get_or_compute(&mut self, sample_count: usize, texel_step: Vec2) -> &GaussianKernel {
        self.kernels
            .entry(Self::key(sample_count, texel_step))
            .or_insert_with(|| GaussianKernel::new(sample_count, texel_step))
    }

    /// Keep only the kernels of `sample_count` taps at the given steps.
    ///
    /// Called once per frame with the steps still in use, so resizing a
    /// window does not leave a kernel behind for every size it passed.
    pub fn retain(&mut self, sample_count: usize, steps: &[Vec2]) {
        self.kernels.retain(|key, _| {
            steps
                .iter()
                .any(|step| *key == Self::key(sample_count, *step))
        });
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

/// Length of the `array<..., N>` declared for `field` in WGSL `source`.
pub fn declared_array_len(source: &str, field: &str) -> Option<usize> {
    let mut rest = source;
    while let Some(pos) = rest.find(field) {
        let after = &rest[pos + field.len()..];
        let decl = after.trim_start().strip_prefix(':').map(str::trim_start);
        if let Some(inner) = decl.and_then(|d| d.strip_prefix("array<")) {
            let mut depth = 1;
            let mut last_comma = None;
            for (i, c) in inner.char_indices() {
                match c {
                    '<' => depth += 1,
                    '>' => {
                        depth -= 1;
                        if depth == 0 {
                            let len = &inner[last_comma? + 1..i];
                            return len.trim().trim_end_matches('u').parse().ok();
                        }
                    }
                    ',' if depth == 1 => last_comma = Some(i),
                    _ => {}
                }
            }
            return None;
        }
        rest = after;
    }
    None
}

/// Read the tap count a blur shader declares.
pub fn shader_sample_count(shader_name: &str, source: &str) -> MaterialResult<usize> {
    let weights = declared_array_len(source, SAMPLE_WEIGHTS_PARAM).ok_or_else(|| {
        MaterialError::MissingParameter {
            shader: shader_name.to_string(),
            parameter: SAMPLE_WEIGHTS_PARAM.to_string(),
        }
    })?;
    let offsets = declared_array_len(source, SAMPLE_OFFSETS_PARAM).ok_or_else(|| {
        MaterialError::MissingParameter {
            shader: shader_name.to_string(),
            parameter: SAMPLE_OFFSETS_PARAM.to_string(),
        }
    })?;
    if weights != offsets {
        return Err(MaterialError::ParameterMismatch {
            shader: shader_name.to_string(),
            detail: format!("{} weights vs {} offsets", weights, offsets),
        });
    }
    Ok(weights)
}

/// Tap count of the active blur shader, resolved in the main world once the
/// shader asset has loaded and extracted every frame.
#[derive(Resource, Clone, Default, Debug, bevy::render::extract_resource::ExtractResource)]
pub struct BlurKernelInfo {
    pub sample_count: Option<usize>,
    shader: Option<Handle<Shader>>,
}

/// Load the blur shader and read its kernel size.
///
/// A shader without the expected arrays is an asset mismatch and stops the
/// app.
pub fn resolve_blur_kernel(
    settings: Res<RenderSettings>,
    asset_server: Res<AssetServer>,
    shaders: Res<Assets<Shader>>,
    mut info: ResMut<BlurKernelInfo>,
    mut app_exit: MessageWriter<AppExit>,
) {
    let Some(path) = settings.shadow_blur.shader_path() else {
        return;
    };
    if info.sample_count.is_some() {
        return;
    }

    let handle = info
        .shader
        .get_or_insert_with(|| asset_server.load(path))
        .clone();
    let Some(shader) = shaders.get(&handle) else {
        return;
    };

    let Source::Wgsl(source) = &shader.source else {
        error!("Blur shader {} is not WGSL", path);
        app_exit.write(AppExit::error());
        return;
    };

    match shader_sample_count(path, source) {
        Ok(count) => {
            info!("Blur kernel uses {} taps ({})", count, path);
            info.sample_count = Some(count);
        }
        Err(e) => {
            error!("{}", e);
            app_exit.write(AppExit::error());
        }
    }
}

/// Pipeline resources for the two blur passes.
#[derive(Resource)]
pub struct BlurPipeline {
    pub pipeline_id: CachedRenderPipelineId,
    pub layout: BindGroupLayout,
    pub sampler: Sampler,
}

/// Create the blur pipeline once the render device exists.
pub fn init_blur_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    existing: Option<Res<BlurPipeline>>,
) {
    if existing.is_some() {
        return;
    }

    let layout = render_device.create_bind_group_layout(
        "blur_bind_group_layout",
        &[
            // Source texture
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            // Bilinear sampler, required by the half-texel tap placement
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Sampler(SamplerBindingType::Filtering),
                count: None,
            },
            // Kernel
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    );

    let sampler = render_device.create_sampler(&SamplerDescriptor {
        label: Some("blur_sampler"),
        mag_filter: FilterMode::Linear,
        min_filter: FilterMode::Linear,
        ..default()
    });

    let shader = asset_server.load("shaders/gaussian_blur15.wgsl");

    let pipeline_id = pipeline_cache.queue_render_pipeline(RenderPipelineDescriptor {
        label: Some("gaussian_blur_pipeline".into()),
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
                format: LIGHT_TARGET_FORMAT,
                // Opaque: each pass fully replaces its target
                blend: None,
                write_mask: ColorWrites::ALL,
            })],
        }),
        zero_initialize_workgroup_memory: false,
    });

    commands.insert_resource(BlurPipeline {
        pipeline_id,
        layout,
        sampler,
    });

    info!("BlurPipeline initialized");
}

/// Texel steps of the horizontal and vertical passes for a `size` target.
pub fn blur_steps(size: UVec2) -> (Vec2, Vec2) {
    let size = size.max(UVec2::ONE).as_vec2();
    (Vec2::new(1.0 / size.x, 0.0), Vec2::new(0.0, 1.0 / size.y))
}

/// Kernel uniforms for the two blur passes of one view.
#[derive(Component)]
pub struct ViewBlurUniforms {
    pub horizontal: Buffer,
    pub vertical: Buffer,
}

/// Kernel buffers of one view, rewritten each frame instead of reallocated.
#[derive(Component, Default)]
pub struct ViewBlurBuffers(pub UniformSlots);

/// Upload the cached kernels for every view with a blur target.
///
/// Views without one, or frames before the shader's tap count is known,
/// lose their uniforms and the frame plan skips the blur.
pub fn prepare_blur_uniforms(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
    info: Option<Res<BlurKernelInfo>>,
    settings: Option<Res<RenderSettings>>,
    mut cache: ResMut<GaussianKernelCache>,
    mut views: Query<(Entity, &ViewDeferredTargets, Option<&mut ViewBlurBuffers>)>,
) {
    let sample_count = match (info, settings) {
        (Some(info), Some(settings)) if settings.shadow_blur != ShadowBlur::None => info.sample_count,
        _ => None,
    };
    let mut steps_in_use = Vec::new();

    for (entity, targets, buffers) in views.iter_mut() {
        let (Some(sample_count), Some(_)) = (sample_count, targets.blur.as_ref()) else {
            commands.entity(entity).remove::<ViewBlurUniforms>();
            continue;
        };

        let mut created = None;
        let slots = match buffers {
            Some(buffers) => &mut buffers.into_inner().0,
            None => &mut created.insert(ViewBlurBuffers::default()).0,
        };

        let (horizontal_step, vertical_step) = blur_steps(targets.layout.size);
        steps_in_use.extend([horizontal_step, vertical_step]);
        let mut upload = |index: usize, label: &'static str, step: Vec2| {
            let bytes = cache.get_or_compute(sample_count, step).to_bytes();
            slots.upload(index, label, &bytes, &render_device, &render_queue)
        };
        let horizontal = upload(0, "blur_horizontal_kernel", horizontal_step);
        let vertical = upload(1, "blur_vertical_kernel", vertical_step);

        let mut view = commands.entity(entity);
        view.insert(ViewBlurUniforms { horizontal, vertical });
        if let Some(created) = created {
            view.insert(created);
        }
    }

    cache.retain(sample_count.unwrap_or(0), &steps_in_use);
}
