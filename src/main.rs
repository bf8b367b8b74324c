use std::f32::consts::FRAC_PI_4;
use std::path::Path;

use bevy::prelude::*;
use game_core::light::{random_directional_light, random_spot_light};
use game_core::material::{resolve_material_textures, ModelMetadata, TextureQuery};
use game_core::textures::{checker_image, to_bevy_image};
use game_core::{
    DeferredCamera, DeferredMaterial, DeferredMesh, DeferredRenderingPlugin, DefaultTextures,
    DiagnosticsHudPlugin, Drawable, FreeCamera, FreeCameraPlugin, RenderSettings,
    RendererCommandsPlugin,
};
use game_physics::{PhysicsBody, PhysicsDebugOverlay, PhysicsPlugin, PhysicsState};

/// Scene layout and camera parameters.
#[derive(Resource, Debug, Clone)]
struct SceneSettings {
    camera_start: Vec3,
    near: f32,
    far: f32,
    fov: f32,
    ship_count: usize,
    ship_scale: f32,
    spot_lights: usize,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            camera_start: Vec3::new(0.0, 5.0, 20.0),
            near: 0.1,
            far: 1000.0,
            fov: FRAC_PI_4,
            ship_count: 8,
            ship_scale: 0.1,
            spot_lights: 40,
        }
    }
}

fn main() {
    App::new()
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "Deferred Game".into(),
                ..default()
            }),
            ..default()
        }))
        .add_plugins(DeferredRenderingPlugin)
        .add_plugins(PhysicsPlugin)
        .add_plugins((
            FreeCameraPlugin,
            RendererCommandsPlugin,
            DiagnosticsHudPlugin,
        ))
        .init_resource::<SceneSettings>()
        .insert_resource(ClearColor(Color::BLACK))
        .add_systems(Startup, (setup_camera, setup_scene, setup_lights))
        .add_systems(PostUpdate, (sync_physics_poses, sync_physics_overlay))
        .run();
}

fn setup_camera(mut commands: Commands, scene: Res<SceneSettings>) {
    commands.spawn((
        Camera3d::default(),
        Projection::Perspective(PerspectiveProjection {
            fov: scene.fov,
            near: scene.near,
            far: scene.far,
            ..default()
        }),
        Msaa::Off,
        Transform::from_translation(scene.camera_start).looking_at(Vec3::ZERO, Vec3::Y),
        FreeCamera::looking_at(scene.camera_start, Vec3::ZERO),
        DeferredCamera {
            far_clip: scene.far,
        },
    ));
}

fn setup_scene(
    mut commands: Commands,
    scene: Res<SceneSettings>,
    asset_server: Res<AssetServer>,
    defaults: Res<DefaultTextures>,
    mut physics: ResMut<PhysicsState>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut images: ResMut<Assets<Image>>,
) {
    // Ground (fixed body)
    let ground_position = Vec3::new(0.0, -10.0, 0.0);
    let ground_half = Vec3::new(20.0, 0.5, 20.0);
    let ground_body = physics.add_box_body(ground_half, ground_position, false);
    let checker = images.add(to_bevy_image(
        checker_image(256, 8, [90, 90, 90, 255], [60, 60, 60, 255]),
        true,
    ));
    commands.spawn((
        DeferredMesh(meshes.add(Cuboid::from_size(ground_half * 2.0))),
        DeferredMaterial {
            diffuse: checker,
            normal: defaults.null_normal.clone(),
            specular: defaults.null_specular.clone(),
            lit: true,
        },
        Transform::from_translation(ground_position),
        PhysicsBody(ground_body),
    ));

    // Ships (dynamic hull bodies)
    let ship_mesh = Mesh::from(Cone::new(5.0, 20.0));
    let hull: Vec<Vec3> = ship_mesh
        .attribute(Mesh::ATTRIBUTE_POSITION)
        .and_then(|positions| positions.as_float3())
        .map(|positions| positions.iter().copied().map(Vec3::from).collect())
        .unwrap_or_default();
    let ship_handle = meshes.add(ship_mesh);
    let ship_material = ship_material(&asset_server, &defaults);

    for i in 0..scene.ship_count {
        let angle = i as f32 / scene.ship_count as f32 * std::f32::consts::TAU;
        let position = Vec3::new(angle.cos() * 6.0, 2.0 + i as f32 * 1.5, angle.sin() * 6.0);
        let body = physics.add_convex_hull_body(&hull, scene.ship_scale, position, true);
        commands.spawn((
            DeferredMesh(ship_handle.clone()),
            ship_material.clone(),
            Drawable::physics_driven(scene.ship_scale),
            Transform::from_translation(position),
            PhysicsBody(body),
        ));
    }
    info!("Scene ready: {} ships", scene.ship_count);
}

/// Ship textures resolved through the override / metadata / convention chain.
fn ship_material(asset_server: &AssetServer, defaults: &DefaultTextures) -> DeferredMaterial {
    let metadata = match ModelMetadata::load_for_model(Path::new("assets/models/ship.obj")) {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!("Ignoring ship metadata: {}", err);
            None
        }
    };
    let mut query = TextureQuery::new(Path::new("models"), "ship");
    query.metadata = metadata.as_ref();
    let textures = resolve_material_textures(&query, |path| Path::new("assets").join(path).exists());
    DeferredMaterial::from_resolved(asset_server, defaults, None, &textures)
}

fn setup_lights(mut commands: Commands, scene: Res<SceneSettings>) {
    let mut rng = rand::thread_rng();
    commands.spawn(random_directional_light(&mut rng));
    for i in 0..scene.spot_lights {
        commands.spawn(random_spot_light(&mut rng, i % 4 == 0));
    }
}

fn sync_physics_poses(
    physics: Res<PhysicsState>,
    mut bodies: Query<(&PhysicsBody, &mut Drawable)>,
) {
    for (body, mut drawable) in bodies.iter_mut() {
        if !drawable.pose_from_physics {
            continue;
        }
        match physics.pose(body.0) {
            Ok(pose) => drawable.pose = pose,
            Err(err) => warn_once!("{}", err),
        }
    }
}

fn sync_physics_overlay(settings: Res<RenderSettings>, mut overlay: ResMut<PhysicsDebugOverlay>) {
    if overlay.enabled != settings.physics_debug {
        overlay.enabled = settings.physics_debug;
    }
}
