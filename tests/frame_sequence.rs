//! Headless frame planning driven by the debug toggles.

use bevy::ecs::system::RunSystemOnce;
use bevy::prelude::*;
use game_core::deferred::{plan_light_draw, FramePass, FramePlan, PlannedLight};
use game_core::light::{count_lights, random_point_light, random_spot_light};
use game_core::{
    apply_renderer_commands, DeferredDirectionalLight, DeferredLight, DeferredSpotLight,
    LightCounter, LightGlobals, RenderSettings,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn headless_app() -> App {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins)
        .init_resource::<ButtonInput<KeyCode>>()
        .init_resource::<RenderSettings>()
        .init_resource::<LightGlobals>()
        .init_resource::<LightCounter>()
        .add_systems(Update, (apply_renderer_commands, count_lights).chain());
    app
}

fn press(app: &mut App, key: KeyCode) {
    {
        let mut input = app.world_mut().resource_mut::<ButtonInput<KeyCode>>();
        input.release_all();
        input.clear();
        input.press(key);
    }
    app.update();
}

/// Plan the frame the renderer would draw for the lights in `app`.
fn plan_frame(app: &mut App) -> FramePlan {
    app.world_mut()
        .run_system_once(
            |settings: Res<RenderSettings>,
             globals: Res<LightGlobals>,
             lights: Query<&DeferredLight>| {
                let mut rng = StdRng::seed_from_u64(3);
                let planned: Vec<PlannedLight> = lights
                    .iter()
                    .map(|light| {
                        let plan = plan_light_draw(light, Vec3::new(0.0, 5.0, 20.0), &settings, &globals, &mut rng);
                        PlannedLight {
                            shadow: plan.shadowed,
                            visible: plan.visible,
                        }
                    })
                    .collect();
                FramePlan::deferred(&settings, &planned, true)
            },
        )
        .unwrap()
}

fn shadow_passes(plan: &FramePlan) -> usize {
    plan.passes()
        .iter()
        .filter(|p| matches!(p, FramePass::ShadowMap(_)))
        .count()
}

#[test]
fn test_scene_lights_produce_interleaved_plan() {
    let mut app = headless_app();
    let mut rng = StdRng::seed_from_u64(9);
    for _ in 0..4 {
        app.world_mut().spawn(random_point_light(&mut rng, false));
    }
    let spot = DeferredSpotLight::new(Vec3::new(0.0, 10.0, 0.0), Vec3::NEG_Y, 50.0, 1.0, 1.0, 1.0);
    app.world_mut()
        .spawn(DeferredLight::spot(spot, Color::WHITE).with_shadows(true));
    app.update();
    assert_eq!(app.world().resource::<LightCounter>().live, 5);

    let plan = plan_frame(&mut app);
    assert_eq!(shadow_passes(&plan), 1, "only the shadowed spot renders a map");

    let clear = plan.position(FramePass::ClearLightTarget).unwrap();
    let first_draw = plan
        .passes()
        .iter()
        .position(|p| matches!(p, FramePass::DrawLight(_)))
        .unwrap();
    assert!(clear < first_draw, "clear precedes every light draw");
    assert!(plan.position(FramePass::FillGBuffer).unwrap() < clear);
    assert_eq!(plan.passes().last(), Some(&FramePass::Composite));
}

#[test]
fn test_shadow_toggle_removes_shadow_passes() {
    let mut app = headless_app();
    let mut rng = StdRng::seed_from_u64(17);
    for _ in 0..6 {
        app.world_mut()
            .spawn(random_spot_light(&mut rng, false).with_shadows(true));
    }
    app.update();
    assert_eq!(shadow_passes(&plan_frame(&mut app)), 6);

    press(&mut app, KeyCode::KeyK);
    assert!(!app.world().resource::<RenderSettings>().shadows);
    assert_eq!(shadow_passes(&plan_frame(&mut app)), 0);
}

#[test]
fn test_light_key_keeps_shadow_passes() {
    let mut app = headless_app();
    let mut rng = StdRng::seed_from_u64(23);
    for _ in 0..3 {
        app.world_mut()
            .spawn(random_spot_light(&mut rng, false).with_shadows(true));
    }
    app.update();

    press(&mut app, KeyCode::KeyL);
    assert!(!app.world().resource::<RenderSettings>().draw_lights);
    let plan = plan_frame(&mut app);
    assert_eq!(shadow_passes(&plan), 3, "shadow maps refresh with lights off");
    assert!(
        !plan.passes().iter().any(|p| matches!(p, FramePass::DrawLight(_))),
        "no light is accumulated with lights off"
    );
}

#[test]
fn test_clear_key_empties_the_light_list() {
    let mut app = headless_app();
    app.world_mut().spawn(DeferredLight::directional(
        DeferredDirectionalLight::new(Vec3::NEG_Y),
        Color::WHITE,
    ));
    press(&mut app, KeyCode::KeyN);
    press(&mut app, KeyCode::KeyN);
    assert_eq!(app.world().resource::<LightCounter>().live, 3);

    press(&mut app, KeyCode::KeyC);
    assert_eq!(app.world().resource::<LightCounter>().live, 0);

    let plan = plan_frame(&mut app);
    assert!(plan.contains(FramePass::ClearLightTarget));
    assert!(!plan
        .passes()
        .iter()
        .any(|p| matches!(p, FramePass::DrawLight(_))));
}

#[test]
fn test_debug_key_swaps_composite_for_quadrants() {
    let mut app = headless_app();
    press(&mut app, KeyCode::KeyO);
    let plan = plan_frame(&mut app);
    assert!(plan.contains(FramePass::DebugGBuffer));
    assert!(!plan.contains(FramePass::Composite));
}
