//! Collider wireframes drawn with gizmos.

use bevy::prelude::*;
use rapier3d::pipeline::{DebugRenderBackend, DebugRenderObject, DebugRenderPipeline};
use rapier3d::prelude as rapier;

use crate::PhysicsState;

/// Toggle for the collider overlay.
#[derive(Resource, Default, Debug, Clone, Copy)]
pub struct PhysicsDebugOverlay {
    pub enabled: bool,
}

/// Forwards Rapier debug lines to Bevy gizmos.
pub struct GizmoDebugBackend<'a, 'w, 's> {
    pub gizmos: &'a mut Gizmos<'w, 's>,
}

/// Rapier debug colors are HSLA with hue in degrees.
pub fn debug_color(color: [f32; 4]) -> Color {
    Color::hsla(color[0], color[1], color[2], color[3])
}

fn to_vec3(point: rapier::Point<f32>) -> Vec3 {
    Vec3::new(point.x, point.y, point.z)
}

impl DebugRenderBackend for GizmoDebugBackend<'_, '_, '_> {
    fn draw_line(
        &mut self,
        _object: DebugRenderObject,
        a: rapier::Point<f32>,
        b: rapier::Point<f32>,
        color: [f32; 4],
    ) {
        self.gizmos.line(to_vec3(a), to_vec3(b), debug_color(color));
    }
}

pub fn draw_physics_debug(
    physics: Res<PhysicsState>,
    mut pipeline: Local<Option<DebugRenderPipeline>>,
    mut gizmos: Gizmos,
) {
    let pipeline = pipeline.get_or_insert_with(DebugRenderPipeline::default);
    let mut backend = GizmoDebugBackend {
        gizmos: &mut gizmos,
    };
    pipeline.render(
        &mut backend,
        &physics.rigid_body_set,
        &physics.collider_set,
        &physics.impulse_joint_set,
        &physics.multibody_joint_set,
        &physics.narrow_phase,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct LineCollector {
        lines: Vec<(Vec3, Vec3)>,
    }

    impl DebugRenderBackend for LineCollector {
        fn draw_line(
            &mut self,
            _object: DebugRenderObject,
            a: rapier::Point<f32>,
            b: rapier::Point<f32>,
            _color: [f32; 4],
        ) {
            self.lines.push((to_vec3(a), to_vec3(b)));
        }
    }

    #[test]
    fn test_box_collider_emits_lines_at_body() {
        let mut physics = PhysicsState::new();
        physics.add_box_body(Vec3::splat(0.5), Vec3::new(0.0, -10.0, 0.0), false);

        let mut collector = LineCollector::default();
        DebugRenderPipeline::default().render(
            &mut collector,
            &physics.rigid_body_set,
            &physics.collider_set,
            &physics.impulse_joint_set,
            &physics.multibody_joint_set,
            &physics.narrow_phase,
        );

        assert!(collector.lines.len() >= 12, "box has at least 12 edges");
        assert!(
            collector
                .lines
                .iter()
                .any(|(a, b)| (a.y + 9.5).abs() < 1e-4 && (b.y + 9.5).abs() < 1e-4),
            "top face edges drawn at the body position"
        );
    }

    #[test]
    fn test_debug_color_is_hsla() {
        let color = debug_color([120.0, 1.0, 0.5, 1.0]).to_srgba();
        assert!(color.green > 0.99 && color.red < 0.01);
    }
}
