//! Scene objects drawn by the deferred and forward paths.

use bevy::prelude::*;

/// Mesh rendered by the custom passes.
///
/// Kept separate from `Mesh3d` so the stock PBR pipeline never draws the
/// same geometry a second time. The mesh must carry position, normal and
/// UV attributes, and nothing else.
#[derive(Component, Clone, Debug)]
#[require(Transform, Visibility, Drawable)]
pub struct DeferredMesh(pub Handle<Mesh>);

/// World placement of a drawable.
///
/// The final matrix is `pose * scale * bone`: `pose` comes from physics
/// (or the entity transform), `bone` from the animation system when the
/// model is skinned.
#[derive(Component, Clone, Debug, PartialEq)]
pub struct Drawable {
    pub pose: Mat4,
    pub scale: f32,
    pub bone: Mat4,
    /// When false `pose` follows the entity's `GlobalTransform`.
    pub pose_from_physics: bool,
}

impl Default for Drawable {
    fn default() -> Self {
        Self {
            pose: Mat4::IDENTITY,
            scale: 1.0,
            bone: Mat4::IDENTITY,
            pose_from_physics: false,
        }
    }
}

impl Drawable {
    pub fn with_scale(scale: f32) -> Self {
        Self {
            scale,
            ..default()
        }
    }

    pub fn physics_driven(scale: f32) -> Self {
        Self {
            scale,
            pose_from_physics: true,
            ..default()
        }
    }

    pub fn world_matrix(&self) -> Mat4 {
        self.pose * Mat4::from_scale(Vec3::splat(self.scale)) * self.bone
    }
}

/// Copy entity transforms into drawables not driven by physics.
pub fn sync_drawable_transforms(mut drawables: Query<(&GlobalTransform, &mut Drawable)>) {
    for (transform, mut drawable) in drawables.iter_mut() {
        if drawable.pose_from_physics {
            continue;
        }
        let pose = transform.to_matrix();
        if drawable.pose != pose {
            drawable.pose = pose;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_matrix_order() {
        let drawable = Drawable {
            pose: Mat4::from_translation(Vec3::new(0.0, 10.0, 0.0)),
            scale: 0.1,
            bone: Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)),
            pose_from_physics: true,
        };
        // The bone offset is scaled, the pose translation is not
        let origin = drawable.world_matrix().transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(0.5, 10.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_default_is_identity() {
        assert_eq!(Drawable::default().world_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_transform_sync_skips_physics_bodies() {
        let mut app = App::new();
        app.add_systems(Update, sync_drawable_transforms);

        let moved = GlobalTransform::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let follower = app.world_mut().spawn((moved, Drawable::default())).id();
        let physics = app
            .world_mut()
            .spawn((moved, Drawable::physics_driven(1.0)))
            .id();
        app.update();

        let world = app.world();
        assert_eq!(
            world.get::<Drawable>(follower).map(|d| d.pose),
            Some(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)))
        );
        assert_eq!(world.get::<Drawable>(physics).map(|d| d.pose), Some(Mat4::IDENTITY));
    }
}
