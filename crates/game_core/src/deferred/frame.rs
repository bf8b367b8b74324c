//! Per-frame pass sequence.
//!
//! The render graph has one node per phase, but which steps each node runs
//! depends on settings and on this frame's lights. [`FramePlan`] lists those
//! steps in execution order; nodes look up their own steps and skip the rest.
//!
//! Deferred:
//!
//! ```text
//! FillGBuffer -> [MakeEdges] -> ClearLightTarget
//!   -> for each light: [ShadowMap(i)] -> [DrawLight(i)]
//!   -> [BlurHorizontal -> BlurVertical] -> Composite | DebugGBuffer
//! ```
//!
//! Forward:
//!
//! ```text
//! ForwardNormalDepth -> ForwardScene -> ForwardEdgeDetect
//! ```

use bevy::prelude::*;

use super::blur::ViewBlurUniforms;
use super::lighting::ViewLightDraws;
use super::targets::{DeferredCamera, ViewDeferredTargets};
use crate::settings::{RenderMode, RenderSettings, ShadowBlur};

/// One step of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramePass {
    FillGBuffer,
    MakeEdges,
    ClearLightTarget,
    /// Shadow map of the light at this index in the draw list
    ShadowMap(usize),
    DrawLight(usize),
    BlurHorizontal,
    BlurVertical,
    Composite,
    DebugGBuffer,
    ForwardNormalDepth,
    ForwardScene,
    ForwardEdgeDetect,
}

/// Per-light input to the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlannedLight {
    /// Shadow map rendered this frame
    pub shadow: bool,
    /// Light contribution accumulated this frame
    pub visible: bool,
}

/// Ordered pass list for one view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FramePlan {
    passes: Vec<FramePass>,
}

impl FramePlan {
    /// Plan a deferred frame.
    ///
    /// `blur_ready` is false until the blur kernel has been uploaded.
    pub fn deferred(settings: &RenderSettings, lights: &[PlannedLight], blur_ready: bool) -> Self {
        let mut passes = vec![FramePass::FillGBuffer];
        if settings.technique.is_toon() {
            passes.push(FramePass::MakeEdges);
        }

        // The accumulation buffer is cleared even with lights off, so the
        // composite never reads last frame's light
        passes.push(FramePass::ClearLightTarget);
        for (index, light) in lights.iter().enumerate() {
            // Shadow maps refresh even when the light itself is not drawn
            // (flicker skip or lights toggled off)
            if light.shadow && settings.shadows {
                passes.push(FramePass::ShadowMap(index));
            }
            if light.visible && settings.draw_lights {
                passes.push(FramePass::DrawLight(index));
            }
        }

        if settings.shadow_blur != ShadowBlur::None && blur_ready {
            passes.push(FramePass::BlurHorizontal);
            passes.push(FramePass::BlurVertical);
        }

        passes.push(if settings.debug_gbuffer {
            FramePass::DebugGBuffer
        } else {
            FramePass::Composite
        });

        Self { passes }
    }

    /// Plan a forward frame.
    pub fn forward() -> Self {
        Self {
            passes: vec![
                FramePass::ForwardNormalDepth,
                FramePass::ForwardScene,
                FramePass::ForwardEdgeDetect,
            ],
        }
    }

    pub fn passes(&self) -> &[FramePass] {
        &self.passes
    }

    pub fn contains(&self, pass: FramePass) -> bool {
        self.passes.contains(&pass)
    }

    pub fn position(&self, pass: FramePass) -> Option<usize> {
        self.passes.iter().position(|p| *p == pass)
    }

    /// Shadow and light steps, in order.
    pub fn light_steps(&self) -> impl Iterator<Item = FramePass> + '_ {
        self.passes.iter().copied().filter(|pass| {
            matches!(
                pass,
                FramePass::ClearLightTarget | FramePass::ShadowMap(_) | FramePass::DrawLight(_)
            )
        })
    }
}

/// Frame plan attached to each camera in the render world.
#[derive(Component, Debug, Clone)]
pub struct ViewFramePlan(pub FramePlan);

/// Plan for one view, or `None` when a deferred view has no targets yet.
pub fn plan_view(
    settings: &RenderSettings,
    has_targets: bool,
    lights: &[PlannedLight],
    blur_ready: bool,
) -> Option<FramePlan> {
    match settings.mode {
        RenderMode::Forward => Some(FramePlan::forward()),
        RenderMode::Deferred if has_targets => Some(FramePlan::deferred(settings, lights, blur_ready)),
        RenderMode::Deferred => None,
    }
}

/// Build this frame's plan for every deferred camera.
///
/// Reads the mode once per frame; deferred views get their light list from
/// [`ViewLightDraws`]. A view that cannot be planned loses last frame's plan
/// so no node runs against stale steps.
pub fn prepare_frame_plans(
    mut commands: Commands,
    settings: Option<Res<RenderSettings>>,
    views: Query<
        (
            Entity,
            Has<ViewDeferredTargets>,
            Option<&ViewLightDraws>,
            Has<ViewBlurUniforms>,
        ),
        With<DeferredCamera>,
    >,
) {
    let Some(settings) = settings else {
        return;
    };

    for (entity, has_targets, light_draws, blur_ready) in views.iter() {
        let lights: Vec<PlannedLight> = light_draws
            .map(|draws| {
                draws
                    .draws
                    .iter()
                    .map(|draw| PlannedLight {
                        shadow: draw.shadow.is_some(),
                        visible: draw.plan.visible,
                    })
                    .collect()
            })
            .unwrap_or_default();

        match plan_view(&settings, has_targets, &lights, blur_ready) {
            Some(plan) => {
                debug!("Frame plan: {:?}", plan.passes());
                commands.entity(entity).insert(ViewFramePlan(plan));
            }
            None => {
                commands.entity(entity).remove::<ViewFramePlan>();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RenderTechnique;

    fn lit(shadow: bool) -> PlannedLight {
        PlannedLight {
            shadow,
            visible: true,
        }
    }

    #[test]
    fn test_clear_precedes_every_light_draw() {
        let plan = FramePlan::deferred(&RenderSettings::default(), &[lit(true), lit(false)], true);
        let clear = plan.position(FramePass::ClearLightTarget).unwrap();
        for pass in plan.passes() {
            if let FramePass::DrawLight(_) | FramePass::ShadowMap(_) = pass {
                assert!(plan.position(*pass).unwrap() > clear, "{:?} ran before the clear", pass);
            }
        }
    }

    #[test]
    fn test_deferred_phase_order() {
        let plan = FramePlan::deferred(&RenderSettings::default(), &[lit(true)], true);
        assert_eq!(
            plan.passes(),
            &[
                FramePass::FillGBuffer,
                FramePass::MakeEdges,
                FramePass::ClearLightTarget,
                FramePass::ShadowMap(0),
                FramePass::DrawLight(0),
                FramePass::BlurHorizontal,
                FramePass::BlurVertical,
                FramePass::Composite,
            ]
        );
    }

    #[test]
    fn test_shadows_interleave_with_lights() {
        let plan = FramePlan::deferred(&RenderSettings::default(), &[lit(true), lit(true)], false);
        let steps: Vec<_> = plan.light_steps().collect();
        assert_eq!(
            steps,
            vec![
                FramePass::ClearLightTarget,
                FramePass::ShadowMap(0),
                FramePass::DrawLight(0),
                FramePass::ShadowMap(1),
                FramePass::DrawLight(1),
            ]
        );
    }

    #[test]
    fn test_realistic_skips_edges() {
        let settings = RenderSettings {
            technique: RenderTechnique::Realistic,
            ..default()
        };
        let plan = FramePlan::deferred(&settings, &[], true);
        assert!(!plan.contains(FramePass::MakeEdges));
    }

    #[test]
    fn test_lights_off_still_clears() {
        let settings = RenderSettings {
            draw_lights: false,
            ..default()
        };
        let plan = FramePlan::deferred(&settings, &[lit(true)], true);
        assert!(plan.contains(FramePass::ClearLightTarget));
        assert!(!plan.contains(FramePass::DrawLight(0)));
    }

    #[test]
    fn test_lights_off_still_renders_shadow_maps() {
        let settings = RenderSettings {
            draw_lights: false,
            ..default()
        };
        let plan = FramePlan::deferred(&settings, &[lit(true), lit(false)], false);
        let steps: Vec<_> = plan.light_steps().collect();
        assert_eq!(
            steps,
            vec![FramePass::ClearLightTarget, FramePass::ShadowMap(0)],
            "only the shadow map of the shadowed light runs with lights off"
        );
    }

    #[test]
    fn test_global_shadow_switch() {
        let settings = RenderSettings {
            shadows: false,
            ..default()
        };
        let plan = FramePlan::deferred(&settings, &[lit(true)], true);
        assert!(!plan.contains(FramePass::ShadowMap(0)));
        assert!(plan.contains(FramePass::DrawLight(0)));
    }

    #[test]
    fn test_flickered_light_keeps_shadow_map() {
        let light = PlannedLight {
            shadow: true,
            visible: false,
        };
        let plan = FramePlan::deferred(&RenderSettings::default(), &[light], true);
        assert!(plan.contains(FramePass::ShadowMap(0)));
        assert!(!plan.contains(FramePass::DrawLight(0)));
    }

    #[test]
    fn test_blur_needs_kernel_and_setting() {
        let mut settings = RenderSettings::default();
        assert!(!FramePlan::deferred(&settings, &[], false).contains(FramePass::BlurHorizontal));
        settings.shadow_blur = ShadowBlur::None;
        assert!(!FramePlan::deferred(&settings, &[], true).contains(FramePass::BlurVertical));
    }

    #[test]
    fn test_debug_view_replaces_composite() {
        let settings = RenderSettings {
            debug_gbuffer: true,
            ..default()
        };
        let plan = FramePlan::deferred(&settings, &[], true);
        assert!(plan.contains(FramePass::DebugGBuffer));
        assert!(!plan.contains(FramePass::Composite));
    }

    #[test]
    fn test_deferred_view_without_targets_has_no_plan() {
        let settings = RenderSettings::default();
        assert_eq!(plan_view(&settings, false, &[lit(true)], true), None);
        assert!(plan_view(&settings, true, &[lit(true)], true).is_some());

        let forward = RenderSettings {
            mode: RenderMode::Forward,
            ..default()
        };
        assert_eq!(plan_view(&forward, false, &[], false), Some(FramePlan::forward()));
    }

    #[test]
    fn test_stale_plan_removed_when_targets_missing() {
        use bevy::ecs::system::RunSystemOnce;

        let mut app = App::new();
        app.init_resource::<RenderSettings>();
        let camera = app
            .world_mut()
            .spawn((DeferredCamera::default(), ViewFramePlan(FramePlan::forward())))
            .id();
        let other = app.world_mut().spawn_empty().id();

        app.world_mut()
            .run_system_once(prepare_frame_plans)
            .unwrap();
        assert!(
            app.world().get::<ViewFramePlan>(camera).is_none(),
            "deferred camera without targets keeps no plan"
        );

        app.world_mut().resource_mut::<RenderSettings>().mode = RenderMode::Forward;
        app.world_mut()
            .run_system_once(prepare_frame_plans)
            .unwrap();
        assert!(app.world().get::<ViewFramePlan>(camera).is_some());
        assert!(
            app.world().get::<ViewFramePlan>(other).is_none(),
            "only deferred cameras are planned"
        );
    }

    #[test]
    fn test_forward_order() {
        assert_eq!(
            FramePlan::forward().passes(),
            &[
                FramePass::ForwardNormalDepth,
                FramePass::ForwardScene,
                FramePass::ForwardEdgeDetect,
            ]
        );
    }
}
