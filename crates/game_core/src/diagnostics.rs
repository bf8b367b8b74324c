//! On-screen diagnostics: frame rate, live lights, scene triangles.
//!
//! ```text
//! FPS: 60
//! Lights: 42 (disabled)
//! Triangles: 12345
//! ```

use bevy::prelude::*;

use crate::drawable::DeferredMesh;
use crate::light::LightCounter;
use crate::settings::RenderSettings;

/// Frame counter refreshed once per interval.
#[derive(Resource, Debug, Clone)]
pub struct FrameRateCounter {
    pub interval_secs: f32,
    frames: u32,
    elapsed: f32,
    fps: u32,
}

impl Default for FrameRateCounter {
    fn default() -> Self {
        Self {
            interval_secs: 1.0,
            frames: 0,
            elapsed: 0.0,
            fps: 0,
        }
    }
}

impl FrameRateCounter {
    /// Count one frame of `delta_secs`. Returns true when the rate changed.
    pub fn tick(&mut self, delta_secs: f32) -> bool {
        self.frames += 1;
        self.elapsed += delta_secs;
        if self.elapsed < self.interval_secs {
            return false;
        }
        self.fps = (self.frames as f32 / self.elapsed).round() as u32;
        self.frames = 0;
        self.elapsed = 0.0;
        true
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }
}

/// Triangles submitted this frame, reset at the start of every frame.
#[derive(Resource, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TriangleCounter {
    pub triangles: usize,
}

/// Marker for the HUD text entity.
#[derive(Component)]
pub struct DiagnosticsHud;

/// HUD text for the given counters.
pub fn format_hud(fps: u32, lights: usize, lights_enabled: bool, triangles: usize) -> String {
    let disabled = if lights_enabled { "" } else { " (disabled)" };
    format!(
        "FPS: {}\nLights: {}{}\nTriangles: {}",
        fps, lights, disabled, triangles
    )
}

fn mesh_triangles(mesh: &Mesh) -> usize {
    mesh.indices()
        .map(|indices| indices.len() / 3)
        .unwrap_or_else(|| mesh.count_vertices() / 3)
}

pub fn reset_triangle_counter(mut counter: ResMut<TriangleCounter>) {
    counter.triangles = 0;
}

pub fn count_triangles(
    mut counter: ResMut<TriangleCounter>,
    meshes: Res<Assets<Mesh>>,
    drawables: Query<(&DeferredMesh, &InheritedVisibility)>,
) {
    for (mesh, visibility) in drawables.iter() {
        if !visibility.get() {
            continue;
        }
        if let Some(mesh) = meshes.get(&mesh.0) {
            counter.triangles += mesh_triangles(mesh);
        }
    }
}

pub fn tick_frame_rate(time: Res<Time>, mut counter: ResMut<FrameRateCounter>) {
    if counter.tick(time.delta_secs()) {
        debug!("FPS: {}", counter.fps());
    }
}

fn spawn_hud(mut commands: Commands) {
    commands.spawn((
        DiagnosticsHud,
        Text::new(format_hud(0, 0, true, 0)),
        TextFont {
            font_size: 16.0,
            ..default()
        },
        TextColor(Color::WHITE),
        Node {
            position_type: PositionType::Absolute,
            top: Val::Px(8.0),
            left: Val::Px(8.0),
            ..default()
        },
    ));
}

pub fn update_hud(
    frame_rate: Res<FrameRateCounter>,
    lights: Res<LightCounter>,
    triangles: Res<TriangleCounter>,
    settings: Res<RenderSettings>,
    mut hud: Query<&mut Text, With<DiagnosticsHud>>,
) {
    let text = format_hud(
        frame_rate.fps(),
        lights.live,
        settings.draw_lights,
        triangles.triangles,
    );
    for mut hud_text in hud.iter_mut() {
        if hud_text.0 != text {
            hud_text.0 = text.clone();
        }
    }
}

/// Plugin adding the frame rate / light / triangle overlay.
pub struct DiagnosticsHudPlugin;

impl Plugin for DiagnosticsHudPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<FrameRateCounter>()
            .init_resource::<TriangleCounter>()
            .add_systems(Startup, spawn_hud)
            .add_systems(First, reset_triangle_counter)
            .add_systems(
                Update,
                (tick_frame_rate, count_triangles, update_hud).chain(),
            );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_updates_once_per_second() {
        let mut counter = FrameRateCounter::default();
        for _ in 0..59 {
            assert!(!counter.tick(1.0 / 60.0));
        }
        assert!(counter.tick(1.0 / 60.0));
        assert_eq!(counter.fps(), 60);
        assert!(!counter.tick(1.0 / 60.0), "counter restarts after reporting");
    }

    #[test]
    fn test_hud_marks_disabled_lights() {
        assert_eq!(format_hud(30, 5, true, 100), "FPS: 30\nLights: 5\nTriangles: 100");
        assert_eq!(
            format_hud(30, 5, false, 100),
            "FPS: 30\nLights: 5 (disabled)\nTriangles: 100"
        );
    }

    #[test]
    fn test_triangles_reset_every_frame() {
        let mut app = App::new();
        app.add_plugins((MinimalPlugins, AssetPlugin::default()))
            .init_asset::<Mesh>()
            .init_resource::<TriangleCounter>()
            .add_systems(First, reset_triangle_counter)
            .add_systems(Update, count_triangles);

        let mesh = app
            .world_mut()
            .resource_mut::<Assets<Mesh>>()
            .add(Cuboid::default());
        app.world_mut()
            .spawn((DeferredMesh(mesh), InheritedVisibility::VISIBLE));

        app.update();
        assert_eq!(app.world().resource::<TriangleCounter>().triangles, 12);
        app.update();
        assert_eq!(
            app.world().resource::<TriangleCounter>().triangles,
            12,
            "count must not accumulate across frames"
        );
    }
}
