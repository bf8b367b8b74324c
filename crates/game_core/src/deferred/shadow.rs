//! Per-light variance shadow maps for spot lights.
//!
//! Each shadow-casting spot light owns one map of `shadow_map_size²` texels
//! storing `(d, d²)` with `d = distance / max_distance`. Maps live in a pool
//! keyed by the main-world light entity; a light that stops casting shadows
//! (or despawns) gives its map back on the next prepare.
//!
//! The shadow camera is the spot light's own view/projection, a standard
//! (not reversed) depth range, so the depth attachment clears to 1 and
//! tests with `Less`.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

use bevy::prelude::*;
use bevy::render::{
    render_resource::{
        BindGroupLayout, CachedRenderPipelineId, ColorTargetState, ColorWrites, CompareFunction,
        DepthStencilState, Extent3d, FragmentState, MultisampleState, PipelineCache,
        PrimitiveState, RenderPipelineDescriptor, StencilState, Texture, TextureDescriptor,
        TextureDimension, TextureFormat, TextureUsages, TextureView, TextureViewDescriptor,
        VertexState,
    },
    renderer::RenderDevice,
};
use bytemuck::{Pod, Zeroable};

use super::extract::{ExtractedLight, ExtractedLights};
use super::gbuffer::{scene_vertex_layout, uniform_layout_entry, DeferredMeshLayouts};
use crate::light::{DeferredSpotLight, LightKind};
use crate::settings::RenderSettings;

/// Moment format: R = depth, G = depth².
pub const SHADOW_MOMENTS_FORMAT: TextureFormat = TextureFormat::Rg16Float;

/// Depth attachment of the shadow pass.
pub const SHADOW_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Owned resources keyed by light id.
///
/// A plain map with explicit acquire/release so ownership changes are
/// visible at the call site: dropping a value frees its GPU memory.
#[derive(Debug)]
pub struct ShadowMapPool<K, T> {
    maps: HashMap<K, T>,
}

impl<K, T> Default for ShadowMapPool<K, T> {
    fn default() -> Self {
        Self {
            maps: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Copy, T> ShadowMapPool<K, T> {
    /// Return the map for `key`, creating it when missing or when `stale`
    /// says the existing one no longer fits.
    pub fn acquire_with(
        &mut self,
        key: K,
        stale: impl FnOnce(&T) -> bool,
        create: impl FnOnce() -> T,
    ) -> &mut T {
        match self.maps.entry(key) {
            Entry::Occupied(mut entry) => {
                if stale(entry.get()) {
                    entry.insert(create());
                }
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(create()),
        }
    }

    pub fn get(&self, key: &K) -> Option<&T> {
        self.maps.get(key)
    }

    pub fn release(&mut self, key: &K) -> Option<T> {
        self.maps.remove(key)
    }

    /// Release every map whose key fails `keep`. Returns how many went.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) -> usize {
        let before = self.maps.len();
        self.maps.retain(|key, _| keep(key));
        before - self.maps.len()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.maps.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

/// GPU textures of one spot shadow map.
pub struct SpotShadowMap {
    #[allow(dead_code)]
    moments: Texture, // Kept alive to back the views
    pub moments_view: TextureView,
    #[allow(dead_code)]
    depth: Texture,
    pub depth_view: TextureView,
    pub size: u32,
}

impl SpotShadowMap {
    pub fn new(render_device: &RenderDevice, size: u32) -> Self {
        let extent = Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        };

        let moments = render_device.create_texture(&TextureDescriptor {
            label: Some("spot_shadow_moments"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: SHADOW_MOMENTS_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let depth = render_device.create_texture(&TextureDescriptor {
            label: Some("spot_shadow_depth"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: SHADOW_DEPTH_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        Self {
            moments_view: moments.create_view(&TextureViewDescriptor::default()),
            depth_view: depth.create_view(&TextureViewDescriptor::default()),
            moments,
            depth,
            size,
        }
    }
}

/// Render-world pool of spot shadow maps.
#[derive(Resource, Default)]
pub struct SpotShadowMaps {
    pub pool: ShadowMapPool<Entity, SpotShadowMap>,
}

/// Light camera data for the shadow pass.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct ShadowViewUniform {
    pub light_view_proj: [[f32; 4]; 4],
    /// XYZ = light position, W = max distance
    pub position_max_distance: [f32; 4],
}

impl ShadowViewUniform {
    pub fn from_spot(spot: &DeferredSpotLight) -> Self {
        let position = spot.position();
        Self {
            light_view_proj: spot.view_projection().to_cols_array_2d(),
            position_max_distance: [position.x, position.y, position.z, spot.max_distance()],
        }
    }
}

/// Bring `pool` in line with the lights that want a shadow map this frame.
///
/// Returns the number of maps released.
pub fn sync_shadow_maps<T>(
    pool: &mut ShadowMapPool<Entity, T>,
    lights: &[ExtractedLight],
    stale: impl Fn(&T) -> bool,
    mut create: impl FnMut(Entity) -> T,
) -> usize {
    for extracted in lights.iter().filter(|l| l.light.renders_shadow_map()) {
        pool.acquire_with(extracted.id, &stale, || create(extracted.id));
    }
    pool.retain(|id| {
        lights
            .iter()
            .any(|l| l.id == *id && l.light.renders_shadow_map())
    })
}

/// Allocate, resize and release spot shadow maps to match this frame's
/// lights.
pub fn prepare_spot_shadow_maps(
    render_device: Res<RenderDevice>,
    settings: Option<Res<RenderSettings>>,
    lights: Res<ExtractedLights>,
    mut maps: ResMut<SpotShadowMaps>,
) {
    let Some(settings) = settings else {
        return;
    };
    let size = settings.shadow_map_size.max(1);

    let released = sync_shadow_maps(
        &mut maps.pool,
        &lights.lights,
        |map| map.size != size,
        |id| {
            debug!("Allocating {}² shadow map for {:?}", size, id);
            SpotShadowMap::new(&render_device, size)
        },
    );
    if released > 0 {
        debug!("Released {} shadow map(s)", released);
    }
}

/// Variance shadow map pipeline.
#[derive(Resource)]
pub struct ShadowPipeline {
    pub pipeline_id: CachedRenderPipelineId,
    /// Group 0: [`ShadowViewUniform`]
    pub view_layout: BindGroupLayout,
}

pub fn init_shadow_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    layouts: Option<Res<DeferredMeshLayouts>>,
    existing: Option<Res<ShadowPipeline>>,
) {
    if existing.is_some() {
        return;
    }
    let Some(layouts) = layouts else {
        return;
    };

    let view_layout =
        render_device.create_bind_group_layout("shadow_view_layout", &[uniform_layout_entry(0)]);

    let shader = asset_server.load("shaders/shadow_vsm.wgsl");

    let pipeline_id = pipeline_cache.queue_render_pipeline(RenderPipelineDescriptor {
        label: Some("spot_shadow_pipeline".into()),
        layout: vec![view_layout.clone(), layouts.mesh_layout.clone()],
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
            format: SHADOW_DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: CompareFunction::Less,
            stencil: StencilState::default(),
            bias: Default::default(),
        }),
        multisample: MultisampleState::default(),
        fragment: Some(FragmentState {
            shader,
            shader_defs: vec![],
            entry_point: Some("fs_main".into()),
            targets: vec![Some(ColorTargetState {
                format: SHADOW_MOMENTS_FORMAT,
                blend: None,
                write_mask: ColorWrites::ALL,
            })],
        }),
        zero_initialize_workgroup_memory: false,
    });

    commands.insert_resource(ShadowPipeline {
        pipeline_id,
        view_layout,
    });
    info!("ShadowPipeline initialized");
}

/// Spot light data for a shadow pass, if the light is a spot.
pub fn shadow_view_for(kind: &LightKind) -> Option<ShadowViewUniform> {
    match kind {
        LightKind::Spot(spot) => Some(ShadowViewUniform::from_spot(spot)),
        LightKind::Directional(_) | LightKind::Point(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_acquire_creates_once() {
        let mut pool: ShadowMapPool<u32, u32> = ShadowMapPool::default();
        let mut created = 0;
        for _ in 0..3 {
            pool.acquire_with(
                7,
                |_| false,
                || {
                    created += 1;
                    1024
                },
            );
        }
        assert_eq!(created, 1);
        assert_eq!(pool.get(&7), Some(&1024));
    }

    #[test]
    fn test_stale_map_is_replaced() {
        let mut pool: ShadowMapPool<u32, u32> = ShadowMapPool::default();
        pool.acquire_with(1, |_| false, || 512);
        let size = *pool.acquire_with(1, |size| *size != 1024, || 1024);
        assert_eq!(size, 1024);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_release_drops_the_map() {
        let marker = Rc::new(());
        let mut pool: ShadowMapPool<u32, Rc<()>> = ShadowMapPool::default();
        pool.acquire_with(3, |_| false, || marker.clone());
        assert_eq!(Rc::strong_count(&marker), 2);

        assert!(pool.release(&3).is_some());
        assert_eq!(Rc::strong_count(&marker), 1, "released map must be dropped");
        assert!(pool.release(&3).is_none());
    }

    #[test]
    fn test_retain_releases_unwanted_keys() {
        let marker = Rc::new(());
        let mut pool: ShadowMapPool<u32, Rc<()>> = ShadowMapPool::default();
        for id in 0..4 {
            pool.acquire_with(id, |_| false, || marker.clone());
        }
        let released = pool.retain(|id| id % 2 == 0);
        assert_eq!(released, 2);
        assert!(pool.contains(&0) && pool.contains(&2));
        assert!(!pool.contains(&1) && !pool.contains(&3));
        assert_eq!(Rc::strong_count(&marker), 3);
    }

    #[test]
    fn test_disabling_cast_shadows_releases_map() {
        use crate::light::DeferredLight;

        let spot = DeferredSpotLight::new(Vec3::new(0.0, 10.0, 0.0), Vec3::NEG_Y, 40.0, 0.9, 1.0, 1.0);
        let id = Entity::from_raw_u32(42).unwrap();
        let mut lights = vec![ExtractedLight {
            id,
            light: DeferredLight::spot(spot, Color::WHITE),
        }];

        let marker = Rc::new(());
        let mut pool: ShadowMapPool<Entity, Rc<()>> = ShadowMapPool::default();
        let released = sync_shadow_maps(&mut pool, &lights, |_| false, |_| marker.clone());
        assert_eq!(released, 0);
        assert!(pool.contains(&id));

        lights[0].light.cast_shadows = false;
        let released = sync_shadow_maps(&mut pool, &lights, |_| false, |_| marker.clone());
        assert_eq!(released, 1);
        assert!(pool.is_empty());
        assert_eq!(Rc::strong_count(&marker), 1, "map must be dropped");
    }

    #[test]
    fn test_despawned_light_releases_map() {
        use crate::light::DeferredLight;

        let spot = DeferredSpotLight::new(Vec3::ZERO, Vec3::NEG_Y, 10.0, 0.5, 1.0, 1.0);
        let lights = vec![ExtractedLight {
            id: Entity::from_raw_u32(1).unwrap(),
            light: DeferredLight::spot(spot, Color::WHITE),
        }];
        let mut pool: ShadowMapPool<Entity, u32> = ShadowMapPool::default();
        sync_shadow_maps(&mut pool, &lights, |_| false, |_| 1);
        assert_eq!(sync_shadow_maps(&mut pool, &[], |_| false, |_| 1), 1);
    }

    #[test]
    fn test_shadow_view_only_for_spots() {
        use crate::light::{DeferredDirectionalLight, DeferredPointLight};

        let spot = DeferredSpotLight::new(Vec3::new(0.0, 10.0, 0.0), Vec3::NEG_Y, 40.0, 0.9, 1.0, 1.0);
        let uniform = shadow_view_for(&LightKind::Spot(spot.clone())).unwrap();
        assert_eq!(uniform.position_max_distance, [0.0, 10.0, 0.0, 40.0]);
        assert_eq!(
            Mat4::from_cols_array_2d(&uniform.light_view_proj),
            spot.view_projection()
        );

        assert!(shadow_view_for(&LightKind::Directional(DeferredDirectionalLight::new(Vec3::NEG_Y))).is_none());
        let point = DeferredPointLight::new(Vec3::ZERO, 2.0, 1.0).unwrap();
        assert!(shadow_view_for(&LightKind::Point(point)).is_none());
    }
}
