//! Live light bookkeeping for diagnostics.

use bevy::prelude::*;

use super::DeferredLight;

/// Number of live [`DeferredLight`] entities.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightCounter {
    pub live: usize,
}

/// Refresh the counter from the world.
pub fn count_lights(mut counter: ResMut<LightCounter>, lights: Query<(), With<DeferredLight>>) {
    let live = lights.iter().count();
    if counter.live != live {
        counter.live = live;
    }
}

/// Despawn every light and reset the counter.
pub fn clear_lights(
    commands: &mut Commands,
    counter: &mut LightCounter,
    lights: impl IntoIterator<Item = Entity>,
) {
    for entity in lights {
        commands.entity(entity).despawn();
    }
    counter.live = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::{DeferredDirectionalLight, DeferredPointLight};
    use bevy::ecs::system::RunSystemOnce;

    fn spawn_lights(world: &mut World, n: usize) {
        for i in 0..n {
            let light = if i % 2 == 0 {
                DeferredLight::directional(DeferredDirectionalLight::new(Vec3::NEG_Y), Color::WHITE)
            } else {
                DeferredLight::point(
                    DeferredPointLight::new(Vec3::splat(i as f32), 5.0, 1.0).unwrap(),
                    Color::WHITE,
                )
            };
            world.spawn(light);
        }
    }

    #[test]
    fn test_counter_tracks_spawned_lights() {
        let mut app = App::new();
        app.init_resource::<LightCounter>();
        app.add_systems(Update, count_lights);

        spawn_lights(app.world_mut(), 7);
        app.update();
        assert_eq!(app.world().resource::<LightCounter>().live, 7);
    }

    #[test]
    fn test_clear_resets_counter_to_zero() {
        let mut app = App::new();
        app.init_resource::<LightCounter>();
        app.add_systems(Update, count_lights);

        spawn_lights(app.world_mut(), 5);
        app.update();

        app.world_mut()
            .run_system_once(
                |mut commands: Commands,
                 mut counter: ResMut<LightCounter>,
                 lights: Query<Entity, With<DeferredLight>>| {
                    clear_lights(&mut commands, &mut counter, lights.iter());
                },
            )
            .unwrap();
        assert_eq!(app.world().resource::<LightCounter>().live, 0);

        app.update();
        assert_eq!(app.world().resource::<LightCounter>().live, 0);
        let remaining = app
            .world_mut()
            .query::<&DeferredLight>()
            .iter(app.world())
            .count();
        assert_eq!(remaining, 0, "all light entities despawned");
    }
}
