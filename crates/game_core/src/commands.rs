//! Debug key toggles for the renderer.
//!
//! | Key | Command                    |
//! |-----|----------------------------|
//! | L   | toggle light drawing       |
//! | O   | toggle G-buffer debug view |
//! | N   | spawn directional light    |
//! | C   | clear all lights           |
//! | T   | toggle Realistic/Toon      |
//! | K   | toggle shadows             |
//! | M   | cycle blur type            |
//! | P   | toggle physics overlay     |

use bevy::prelude::*;

use crate::light::{clear_lights, random_directional_light, DeferredLight, LightCounter};
use crate::settings::RenderSettings;

/// Runtime toggle requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RendererCommand {
    ToggleLights,
    ToggleGBufferDebug,
    SpawnDirectionalLight,
    ClearLights,
    ToggleTechnique,
    ToggleShadows,
    CycleBlur,
    TogglePhysicsDebug,
}

/// Default key bindings.
pub const KEY_BINDINGS: [(KeyCode, RendererCommand); 8] = [
    (KeyCode::KeyL, RendererCommand::ToggleLights),
    (KeyCode::KeyO, RendererCommand::ToggleGBufferDebug),
    (KeyCode::KeyN, RendererCommand::SpawnDirectionalLight),
    (KeyCode::KeyC, RendererCommand::ClearLights),
    (KeyCode::KeyT, RendererCommand::ToggleTechnique),
    (KeyCode::KeyK, RendererCommand::ToggleShadows),
    (KeyCode::KeyM, RendererCommand::CycleBlur),
    (KeyCode::KeyP, RendererCommand::TogglePhysicsDebug),
];

impl RendererCommand {
    pub fn from_key(key: KeyCode) -> Option<Self> {
        KEY_BINDINGS
            .iter()
            .find(|(bound, _)| *bound == key)
            .map(|(_, command)| *command)
    }

    /// Apply a settings-only command. Returns false for commands that
    /// touch entities.
    pub fn apply_to_settings(self, settings: &mut RenderSettings) -> bool {
        match self {
            RendererCommand::ToggleLights => settings.toggle_lights(),
            RendererCommand::ToggleGBufferDebug => settings.toggle_gbuffer_debug(),
            RendererCommand::ToggleTechnique => settings.toggle_technique(),
            RendererCommand::ToggleShadows => settings.toggle_shadows(),
            RendererCommand::CycleBlur => settings.cycle_blur(),
            RendererCommand::TogglePhysicsDebug => settings.toggle_physics_debug(),
            RendererCommand::SpawnDirectionalLight | RendererCommand::ClearLights => return false,
        }
        true
    }
}

/// Poll bound keys and apply their commands.
pub fn apply_renderer_commands(
    mut commands: Commands,
    keyboard: Res<ButtonInput<KeyCode>>,
    mut settings: ResMut<RenderSettings>,
    mut counter: ResMut<LightCounter>,
    lights: Query<Entity, With<DeferredLight>>,
) {
    for key in keyboard.get_just_pressed() {
        let Some(command) = RendererCommand::from_key(*key) else {
            continue;
        };
        debug!("Renderer command {:?}", command);

        if command.apply_to_settings(&mut settings) {
            continue;
        }
        match command {
            RendererCommand::SpawnDirectionalLight => {
                let light = random_directional_light(&mut rand::thread_rng());
                commands.spawn(light);
                counter.live += 1;
            }
            RendererCommand::ClearLights => {
                clear_lights(&mut commands, &mut counter, lights.iter());
            }
            _ => {}
        }
    }
}

/// Plugin wiring the debug key bindings.
pub struct RendererCommandsPlugin;

impl Plugin for RendererCommandsPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<RenderSettings>()
            .init_resource::<LightCounter>()
            .add_systems(Update, apply_renderer_commands);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{RenderTechnique, ShadowBlur};

    fn app() -> App {
        let mut app = App::new();
        app.init_resource::<ButtonInput<KeyCode>>()
            .init_resource::<RenderSettings>()
            .init_resource::<LightCounter>()
            .add_systems(Update, apply_renderer_commands);
        app
    }

    fn press(app: &mut App, key: KeyCode) {
        let mut input = app.world_mut().resource_mut::<ButtonInput<KeyCode>>();
        input.release_all();
        input.clear();
        input.press(key);
        app.update();
    }

    #[test]
    fn test_every_binding_is_unique() {
        for (i, (key, command)) in KEY_BINDINGS.iter().enumerate() {
            assert_eq!(RendererCommand::from_key(*key), Some(*command));
            assert!(
                KEY_BINDINGS[i + 1..].iter().all(|(other, _)| other != key),
                "{:?} bound twice",
                key
            );
        }
        assert_eq!(RendererCommand::from_key(KeyCode::KeyZ), None);
    }

    #[test]
    fn test_only_debug_toggles_are_bound() {
        assert_eq!(KEY_BINDINGS.len(), 8);
        for key in [KeyCode::F12, KeyCode::Escape, KeyCode::Space] {
            assert_eq!(RendererCommand::from_key(key), None, "{:?} should be unbound", key);
        }
    }

    #[test]
    fn test_settings_toggles() {
        let mut settings = RenderSettings::default();
        assert!(RendererCommand::ToggleTechnique.apply_to_settings(&mut settings));
        assert_eq!(settings.technique, RenderTechnique::Realistic);
        assert!(RendererCommand::CycleBlur.apply_to_settings(&mut settings));
        assert_eq!(settings.shadow_blur, ShadowBlur::None);
        assert!(!RendererCommand::ClearLights.apply_to_settings(&mut settings));
    }

    #[test]
    fn test_spawn_then_clear_lights() {
        let mut app = app();
        for _ in 0..3 {
            press(&mut app, KeyCode::KeyN);
        }
        assert_eq!(app.world().resource::<LightCounter>().live, 3);
        let spawned: Vec<bool> = app
            .world_mut()
            .query::<&DeferredLight>()
            .iter(app.world())
            .map(|light| light.can_flicker)
            .collect();
        assert_eq!(spawned, vec![false; 3], "spawned directional lights never flicker");

        press(&mut app, KeyCode::KeyC);
        assert_eq!(app.world().resource::<LightCounter>().live, 0);
        let remaining = app
            .world_mut()
            .query::<&DeferredLight>()
            .iter(app.world())
            .count();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_light_key_toggles_drawing() {
        let mut app = app();
        press(&mut app, KeyCode::KeyL);
        assert!(!app.world().resource::<RenderSettings>().draw_lights);
        press(&mut app, KeyCode::KeyL);
        assert!(app.world().resource::<RenderSettings>().draw_lights);
    }
}
