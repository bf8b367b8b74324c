//! Proxy geometry for point and spot lights.
//!
//! - Unit sphere centred on the origin, scaled by the point light radius.
//! - Unit cone with its apex at the origin opening down -Z, base radius 0.5
//!   at z = -1. The spot cone world matrix stretches it to the light reach.
//!
//! Both meshes are slightly inflated so the faceted proxy encloses the
//! analytic volume. Triangles wind counter-clockwise seen from outside.

use std::f32::consts::{PI, TAU};

use bevy::prelude::*;
use bevy::render::{
    render_phase::TrackedRenderPass,
    render_resource::{Buffer, BufferInitDescriptor, BufferUsages, IndexFormat},
    renderer::RenderDevice,
};
use bevy_mesh::{VertexBufferLayout, VertexFormat};

const SPHERE_RINGS: u32 = 12;
const SPHERE_SEGMENTS: u32 = 24;
const CONE_SEGMENTS: u32 = 32;

/// Base radius of the unit cone.
pub const CONE_BASE_RADIUS: f32 = 0.5;

/// CPU-side mesh data for a light volume.
#[derive(Debug, Clone, Default)]
pub struct VolumeMesh {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl VolumeMesh {
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).map(|tri| {
            [
                Vec3::from(self.positions[tri[0] as usize]),
                Vec3::from(self.positions[tri[1] as usize]),
                Vec3::from(self.positions[tri[2] as usize]),
            ]
        })
    }

    pub fn vertex_buffer_layout() -> VertexBufferLayout {
        VertexBufferLayout::from_vertex_formats(wgpu::VertexStepMode::Vertex, [VertexFormat::Float32x3])
    }
}

/// Latitude/longitude sphere with poles on +-Y.
pub fn unit_sphere() -> VolumeMesh {
    let inflate = 1.0 / (PI / SPHERE_RINGS.min(SPHERE_SEGMENTS) as f32).cos();
    let mut mesh = VolumeMesh::default();

    for ring in 0..=SPHERE_RINGS {
        let theta = PI * ring as f32 / SPHERE_RINGS as f32;
        for segment in 0..=SPHERE_SEGMENTS {
            let phi = TAU * segment as f32 / SPHERE_SEGMENTS as f32;
            mesh.positions.push([
                theta.sin() * phi.cos() * inflate,
                theta.cos() * inflate,
                theta.sin() * phi.sin() * inflate,
            ]);
        }
    }

    let row = SPHERE_SEGMENTS + 1;
    for ring in 0..SPHERE_RINGS {
        for segment in 0..SPHERE_SEGMENTS {
            let a = ring * row + segment;
            let b = a + 1;
            let c = a + row;
            let d = c + 1;
            // Pole rows collapse one triangle of each quad
            if ring != 0 {
                mesh.indices.extend_from_slice(&[a, b, c]);
            }
            if ring != SPHERE_RINGS - 1 {
                mesh.indices.extend_from_slice(&[b, d, c]);
            }
        }
    }

    mesh
}

/// Cone with its apex at the origin and a capped base at z = -1.
pub fn unit_cone() -> VolumeMesh {
    let radius = CONE_BASE_RADIUS / (PI / CONE_SEGMENTS as f32).cos();
    let mut mesh = VolumeMesh::default();

    mesh.positions.push([0.0, 0.0, 0.0]); // apex
    mesh.positions.push([0.0, 0.0, -1.0]); // base centre
    for segment in 0..CONE_SEGMENTS {
        let phi = TAU * segment as f32 / CONE_SEGMENTS as f32;
        mesh.positions.push([radius * phi.cos(), radius * phi.sin(), -1.0]);
    }

    for segment in 0..CONE_SEGMENTS {
        let current = 2 + segment;
        let next = 2 + (segment + 1) % CONE_SEGMENTS;
        mesh.indices.extend_from_slice(&[0, current, next]);
        mesh.indices.extend_from_slice(&[1, next, current]);
    }

    mesh
}

/// Uploaded light volume.
pub struct VolumeBuffers {
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub index_count: u32,
}

impl VolumeBuffers {
    fn upload(render_device: &RenderDevice, label: &str, mesh: &VolumeMesh) -> Self {
        let vertex_buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some(&format!("{}_vertices", label)),
            contents: bytemuck::cast_slice(&mesh.positions),
            usage: BufferUsages::VERTEX,
        });
        let index_buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some(&format!("{}_indices", label)),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: BufferUsages::INDEX,
        });
        Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
        }
    }

    pub fn draw<'w>(&'w self, render_pass: &mut TrackedRenderPass<'w>) {
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        render_pass.set_index_buffer(self.index_buffer.slice(..), 0, IndexFormat::Uint32);
        render_pass.draw_indexed(0..self.index_count, 0, 0..1);
    }
}

/// Sphere and cone buffers in the render world.
#[derive(Resource)]
pub struct LightVolumeMeshes {
    pub sphere: VolumeBuffers,
    pub cone: VolumeBuffers,
}

pub fn init_light_volume_meshes(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    existing: Option<Res<LightVolumeMeshes>>,
) {
    if existing.is_some() {
        return;
    }

    commands.insert_resource(LightVolumeMeshes {
        sphere: VolumeBuffers::upload(&render_device, "light_sphere", &unit_sphere()),
        cone: VolumeBuffers::upload(&render_device, "light_cone", &unit_cone()),
    });
    info!("Light volume meshes uploaded");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_outward(mesh: &VolumeMesh, interior: Vec3) {
        for [a, b, c] in mesh.triangles() {
            let normal = (b - a).cross(c - a);
            assert!(normal.length() > 1e-6, "degenerate triangle {:?}", [a, b, c]);
            let centroid = (a + b + c) / 3.0;
            assert!(
                normal.dot(centroid - interior) > 0.0,
                "triangle {:?} faces inward",
                [a, b, c]
            );
        }
    }

    #[test]
    fn test_sphere_winds_outward() {
        assert_outward(&unit_sphere(), Vec3::ZERO);
    }

    #[test]
    fn test_sphere_encloses_unit_radius() {
        let sphere = unit_sphere();
        for p in &sphere.positions {
            assert!(Vec3::from(*p).length() >= 1.0);
        }
        // Face centres are the closest points of the proxy
        for [a, b, c] in sphere.triangles() {
            assert!(((a + b + c) / 3.0).length() > 0.95);
        }
    }

    #[test]
    fn test_cone_winds_outward() {
        assert_outward(&unit_cone(), Vec3::new(0.0, 0.0, -0.75));
    }

    #[test]
    fn test_cone_shape() {
        let cone = unit_cone();
        assert_eq!(cone.positions[0], [0.0, 0.0, 0.0]);
        for p in &cone.positions[2..] {
            let p = Vec3::from(*p);
            assert_eq!(p.z, -1.0);
            assert!(p.truncate().length() >= CONE_BASE_RADIUS);
        }
    }

    #[test]
    fn test_spot_cone_reaches_light_extent() {
        use crate::light::DeferredSpotLight;

        let spot = DeferredSpotLight::new(Vec3::ZERO, Vec3::NEG_Z, 20.0, 0.8, 1.0, 1.0);
        let world = spot.cone_world_matrix();
        let base_centre = world.transform_point3(Vec3::new(0.0, 0.0, -1.0));
        assert!((base_centre - Vec3::new(0.0, 0.0, -20.0)).length() < 1e-3);

        let rim = world.transform_point3(Vec3::new(CONE_BASE_RADIUS, 0.0, -1.0));
        let expected = (0.8f32 / 2.0).tan() * 20.0;
        assert!(((rim - base_centre).length() - expected).abs() < 1e-3);
    }
}
