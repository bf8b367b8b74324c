//! Extraction of drawables and lights into the render world.

use bevy::prelude::*;
use bevy::render::Extract;

use crate::drawable::{DeferredMesh, Drawable};
use crate::light::DeferredLight;
use crate::material::DeferredMaterial;

/// One drawable as the render world sees it.
#[derive(Debug, Clone)]
pub struct ExtractedDrawable {
    pub mesh: AssetId<Mesh>,
    pub world_from_local: Mat4,
    pub diffuse: AssetId<Image>,
    pub normal: AssetId<Image>,
    pub specular: AssetId<Image>,
    pub lit: bool,
}

/// All drawables extracted this frame, in query order.
#[derive(Resource, Default)]
pub struct ExtractedDrawables {
    pub items: Vec<ExtractedDrawable>,
}

/// One light plus the main-world entity that owns it.
#[derive(Debug, Clone)]
pub struct ExtractedLight {
    /// Main-world entity, stable across frames, keys the shadow map pool.
    pub id: Entity,
    pub light: DeferredLight,
}

/// All lights extracted this frame, in query order.
#[derive(Resource, Default)]
pub struct ExtractedLights {
    pub lights: Vec<ExtractedLight>,
}

pub fn extract_drawables(
    mut extracted: ResMut<ExtractedDrawables>,
    query: Extract<Query<(&DeferredMesh, &DeferredMaterial, &Drawable, &InheritedVisibility)>>,
) {
    extracted.items.clear();
    for (mesh, material, drawable, visibility) in query.iter() {
        if !visibility.get() {
            continue;
        }
        extracted.items.push(ExtractedDrawable {
            mesh: mesh.0.id(),
            world_from_local: drawable.world_matrix(),
            diffuse: material.diffuse.id(),
            normal: material.normal.id(),
            specular: material.specular.id(),
            lit: material.lit,
        });
    }
}

pub fn extract_lights(
    mut extracted: ResMut<ExtractedLights>,
    query: Extract<Query<(Entity, &DeferredLight)>>,
) {
    extracted.lights.clear();
    extracted.lights.extend(query.iter().map(|(id, light)| ExtractedLight {
        id,
        light: light.clone(),
    }));
}
