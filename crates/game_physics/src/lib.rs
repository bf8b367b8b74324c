//! Rigid-body physics for the game scene.
//!
//! A thin wrapper around Rapier: bodies are created from convex hulls (with a
//! box fallback) or boxes, stepped with the frame delta, and queried for
//! their world pose as a matrix.

use std::fmt;

use bevy::prelude::*;
use rapier::nalgebra::{Point3, Vector3};
use rapier3d::prelude as rapier;

mod debug;

pub use debug::{draw_physics_debug, GizmoDebugBackend, PhysicsDebugOverlay};

/// Half extent of the box used when a hull cannot be built.
pub const FALLBACK_HALF_EXTENT: f32 = 0.5;

/// Tolerance for the hull degeneracy test.
const DEGENERATE_EPSILON: f32 = 1e-6;

pub struct PhysicsPlugin;

impl Plugin for PhysicsPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PhysicsState>()
            .init_resource::<PhysicsDebugOverlay>()
            .add_systems(Update, step_physics)
            .add_systems(
                PostUpdate,
                draw_physics_debug.run_if(|overlay: Res<PhysicsDebugOverlay>| overlay.enabled),
            );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhysicsError {
    UnknownBody(rapier::RigidBodyHandle),
}

impl fmt::Display for PhysicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicsError::UnknownBody(handle) => write!(f, "unknown rigid body {:?}", handle),
        }
    }
}

impl std::error::Error for PhysicsError {}

pub type PhysicsResult<T> = Result<T, PhysicsError>;

/// Links a Bevy entity to a Rapier rigid body
#[derive(Component, Debug, Clone, Copy)]
pub struct PhysicsBody(pub rapier::RigidBodyHandle);

#[derive(Resource)]
pub struct PhysicsState {
    pub gravity: Vector3<f32>,
    pub integration_parameters: rapier::IntegrationParameters,
    pub physics_pipeline: rapier::PhysicsPipeline,
    pub island_manager: rapier::IslandManager,
    pub broad_phase: rapier::DefaultBroadPhase,
    pub narrow_phase: rapier::NarrowPhase,
    pub rigid_body_set: rapier::RigidBodySet,
    pub collider_set: rapier::ColliderSet,
    pub impulse_joint_set: rapier::ImpulseJointSet,
    pub multibody_joint_set: rapier::MultibodyJointSet,
    pub ccd_solver: rapier::CCDSolver,
}

impl PhysicsState {
    pub fn new() -> Self {
        Self {
            gravity: Vector3::new(0.0, -9.81, 0.0),
            integration_parameters: rapier::IntegrationParameters::default(),
            physics_pipeline: rapier::PhysicsPipeline::new(),
            island_manager: rapier::IslandManager::new(),
            broad_phase: rapier::DefaultBroadPhase::new(),
            narrow_phase: rapier::NarrowPhase::new(),
            rigid_body_set: rapier::RigidBodySet::new(),
            collider_set: rapier::ColliderSet::new(),
            impulse_joint_set: rapier::ImpulseJointSet::new(),
            multibody_joint_set: rapier::MultibodyJointSet::new(),
            ccd_solver: rapier::CCDSolver::new(),
        }
    }

    /// Body whose collider is the convex hull of `points` scaled by `scale`.
    ///
    /// Degenerate input (fewer than four affinely independent points) or a
    /// failed hull falls back to a unit box.
    pub fn add_convex_hull_body(
        &mut self,
        points: &[Vec3],
        scale: f32,
        position: Vec3,
        dynamic: bool,
    ) -> rapier::RigidBodyHandle {
        let scaled: Vec<Point3<f32>> = points
            .iter()
            .map(|p| Point3::new(p.x * scale, p.y * scale, p.z * scale))
            .collect();

        let collider = if affine_rank(points, scale) < 3 {
            None
        } else {
            rapier::ColliderBuilder::convex_hull(&scaled)
        };
        let collider = collider.unwrap_or_else(|| {
            warn!(
                "Convex hull failed for {} points, using box proxy",
                points.len()
            );
            rapier::ColliderBuilder::cuboid(
                FALLBACK_HALF_EXTENT,
                FALLBACK_HALF_EXTENT,
                FALLBACK_HALF_EXTENT,
            )
        });

        self.insert_body(body_builder(position, dynamic), collider)
    }

    pub fn add_box_body(
        &mut self,
        half_extents: Vec3,
        position: Vec3,
        dynamic: bool,
    ) -> rapier::RigidBodyHandle {
        let collider = rapier::ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z);
        self.insert_body(body_builder(position, dynamic), collider)
    }

    fn insert_body(
        &mut self,
        body: rapier::RigidBodyBuilder,
        collider: rapier::ColliderBuilder,
    ) -> rapier::RigidBodyHandle {
        let handle = self.rigid_body_set.insert(body);
        self.collider_set
            .insert_with_parent(collider, handle, &mut self.rigid_body_set);
        handle
    }

    pub fn remove_body(&mut self, handle: rapier::RigidBodyHandle) -> PhysicsResult<()> {
        self.rigid_body_set
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true,
            )
            .map(|_| ())
            .ok_or(PhysicsError::UnknownBody(handle))
    }

    /// Advance the simulation by `dt` seconds.
    pub fn step(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        self.integration_parameters.dt = dt;
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
    }

    /// World pose of a body as a rigid transform matrix.
    pub fn pose(&self, handle: rapier::RigidBodyHandle) -> PhysicsResult<Mat4> {
        let body = self
            .rigid_body_set
            .get(handle)
            .ok_or(PhysicsError::UnknownBody(handle))?;
        let pos = body.translation();
        let rot = body.rotation();
        Ok(Mat4::from_rotation_translation(
            Quat::from_xyzw(rot.i, rot.j, rot.k, rot.w),
            Vec3::new(pos.x, pos.y, pos.z),
        ))
    }
}

impl Default for PhysicsState {
    fn default() -> Self {
        Self::new()
    }
}

fn body_builder(position: Vec3, dynamic: bool) -> rapier::RigidBodyBuilder {
    let builder = if dynamic {
        rapier::RigidBodyBuilder::dynamic()
    } else {
        rapier::RigidBodyBuilder::fixed()
    };
    builder.translation(Vector3::new(position.x, position.y, position.z))
}

/// Dimension of the affine hull of the scaled points (0 to 3).
pub fn affine_rank(points: &[Vec3], scale: f32) -> usize {
    let Some(&origin) = points.first() else {
        return 0;
    };
    let eps = DEGENERATE_EPSILON * scale.abs().max(1.0);
    let offsets: Vec<Vec3> = points.iter().map(|p| (*p - origin) * scale).collect();

    let Some(axis) = offsets.iter().copied().find(|d| d.length() > eps) else {
        return 0;
    };
    let Some(normal) = offsets
        .iter()
        .map(|d| axis.cross(*d))
        .find(|n| n.length() > eps * axis.length())
    else {
        return 1;
    };
    let normal = normal.normalize();
    if offsets.iter().any(|d| normal.dot(*d).abs() > eps) {
        3
    } else {
        2
    }
}

fn step_physics(time: Res<Time>, mut physics: ResMut<PhysicsState>) {
    physics.step(time.delta_secs());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tetrahedron() -> Vec<Vec3> {
        vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z]
    }

    #[test]
    fn test_affine_rank() {
        assert_eq!(affine_rank(&[], 1.0), 0);
        assert_eq!(affine_rank(&[Vec3::ONE, Vec3::ONE], 1.0), 0);
        assert_eq!(affine_rank(&[Vec3::ZERO, Vec3::X, Vec3::X * 2.0], 1.0), 1);
        assert_eq!(affine_rank(&[Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::ONE.with_z(0.0)], 1.0), 2);
        assert_eq!(affine_rank(&tetrahedron(), 0.1), 3);
    }

    #[test]
    fn test_collinear_hull_falls_back_to_box() {
        let mut physics = PhysicsState::new();
        let points = [Vec3::ZERO, Vec3::X, Vec3::X * 2.0, Vec3::X * 3.0];
        let handle = physics.add_convex_hull_body(&points, 0.1, Vec3::ZERO, true);

        let body = &physics.rigid_body_set[handle];
        let collider = &physics.collider_set[body.colliders()[0]];
        let cuboid = collider.shape().as_cuboid().expect("box proxy collider");
        assert_eq!(cuboid.half_extents, Vector3::repeat(FALLBACK_HALF_EXTENT));
    }

    #[test]
    fn test_hull_body_uses_scaled_points() {
        let mut physics = PhysicsState::new();
        let handle = physics.add_convex_hull_body(&tetrahedron(), 0.1, Vec3::ZERO, true);

        let body = &physics.rigid_body_set[handle];
        let collider = &physics.collider_set[body.colliders()[0]];
        let hull = collider
            .shape()
            .as_convex_polyhedron()
            .expect("convex hull collider");
        let max = hull
            .points()
            .iter()
            .map(|p| p.coords.amax())
            .fold(0.0, f32::max);
        assert!((max - 0.1).abs() < 1e-5, "hull points scaled, got {}", max);
    }

    #[test]
    fn test_dynamic_body_falls_fixed_body_stays() {
        let mut physics = PhysicsState::new();
        let ground = physics.add_box_body(Vec3::new(10.0, 0.5, 10.0), Vec3::new(0.0, -10.0, 0.0), false);
        let ship = physics.add_box_body(Vec3::splat(0.5), Vec3::new(0.0, 5.0, 0.0), true);

        for _ in 0..30 {
            physics.step(1.0 / 60.0);
        }

        let ground_y = physics.pose(ground).unwrap().w_axis.y;
        let ship_y = physics.pose(ship).unwrap().w_axis.y;
        assert_eq!(ground_y, -10.0);
        assert!(ship_y < 5.0, "dynamic body should fall, y = {}", ship_y);
    }

    #[test]
    fn test_pose_of_removed_body_is_error() {
        let mut physics = PhysicsState::new();
        let handle = physics.add_box_body(Vec3::ONE, Vec3::ZERO, true);
        physics.remove_body(handle).unwrap();

        assert_eq!(physics.pose(handle), Err(PhysicsError::UnknownBody(handle)));
        assert!(physics.remove_body(handle).is_err());
    }

    #[test]
    fn test_zero_step_is_ignored() {
        let mut physics = PhysicsState::new();
        let ship = physics.add_box_body(Vec3::splat(0.5), Vec3::new(0.0, 5.0, 0.0), true);
        physics.step(0.0);
        assert_eq!(physics.pose(ship).unwrap().w_axis.y, 5.0);
    }
}
