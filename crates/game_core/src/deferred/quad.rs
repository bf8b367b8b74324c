//! Screen-aligned quad shared by every fullscreen pass.
//!
//! Each fullscreen shader takes [`QuadVertex`] input (clip-space position +
//! UV) and the passes draw the same six vertices through [`QuadRenderer`].

use bevy::prelude::*;
use bevy::render::{
    render_phase::TrackedRenderPass,
    render_resource::{Buffer, BufferInitDescriptor, BufferUsages},
    renderer::RenderDevice,
};
use bytemuck::{Pod, Zeroable};
use bevy_mesh::{VertexBufferLayout, VertexFormat};

/// Vertex of the fullscreen quad.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    /// Clip-space XY, Z always 0
    pub position: [f32; 3],
    /// UV with (0, 0) at the top-left of the screen
    pub uv: [f32; 2],
}

impl QuadVertex {
    pub fn vertex_buffer_layout() -> VertexBufferLayout {
        VertexBufferLayout::from_vertex_formats(
            wgpu::VertexStepMode::Vertex,
            [
                VertexFormat::Float32x3, // Position
                VertexFormat::Float32x2, // UV
            ],
        )
    }
}

/// Two counter-clockwise triangles covering clip space.
pub fn quad_vertices() -> [QuadVertex; 6] {
    let top_left = QuadVertex {
        position: [-1.0, 1.0, 0.0],
        uv: [0.0, 0.0],
    };
    let top_right = QuadVertex {
        position: [1.0, 1.0, 0.0],
        uv: [1.0, 0.0],
    };
    let bottom_left = QuadVertex {
        position: [-1.0, -1.0, 0.0],
        uv: [0.0, 1.0],
    };
    let bottom_right = QuadVertex {
        position: [1.0, -1.0, 0.0],
        uv: [1.0, 1.0],
    };
    [
        bottom_left,
        bottom_right,
        top_right,
        bottom_left,
        top_right,
        top_left,
    ]
}

/// Quad vertex buffer living in the render world.
#[derive(Resource)]
pub struct QuadRenderer {
    pub vertex_buffer: Buffer,
    pub vertex_count: u32,
}

impl QuadRenderer {
    /// Draw the quad with whatever pipeline and bind groups are set.
    pub fn draw<'w>(&'w self, render_pass: &mut TrackedRenderPass<'w>) {
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        render_pass.draw(0..self.vertex_count, 0..1);
    }
}

/// Upload the quad once.
pub fn init_quad_renderer(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    existing: Option<Res<QuadRenderer>>,
) {
    if existing.is_some() {
        return;
    }

    let vertices = quad_vertices();
    let vertex_buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
        label: Some("fullscreen_quad_vertices"),
        contents: bytemuck::cast_slice(&vertices),
        usage: BufferUsages::VERTEX,
    });

    commands.insert_resource(QuadRenderer {
        vertex_buffer,
        vertex_count: vertices.len() as u32,
    });
}
