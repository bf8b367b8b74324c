//! Texture resolution for deferred materials.
//!
//! Normal and specular maps are looked up in a fixed order:
//!
//! 1. an explicit override path supplied by the caller,
//! 2. a key in the model's metadata sidecar (`<model>.meta.json`),
//! 3. the naming convention `{dir}/{mesh}_n.tga` / `{dir}/{mesh}_s.tga`,
//! 4. the built-in `null_normal.tga` / `null_specular.tga`.
//!
//! Whatever key the metadata used, the resolved textures are re-keyed to
//! `"NormalMap"` / `"SpecularMap"`, the names the G-buffer shader binds.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bevy::prelude::*;
use bevy::render::extract_resource::ExtractResource;
use serde::{Deserialize, Serialize};

/// Canonical shader key for normal maps.
pub const NORMAL_MAP_KEY: &str = "NormalMap";
/// Canonical shader key for specular maps.
pub const SPECULAR_MAP_KEY: &str = "SpecularMap";

/// Errors raised while building materials or binding shader parameters.
#[derive(Debug)]
pub enum MaterialError {
    /// A shader lacks a parameter the renderer binds by name
    MissingParameter { shader: String, parameter: String },
    /// A shader declares parameters that disagree with each other
    ParameterMismatch { shader: String, detail: String },
    /// File system error
    Io(std::io::Error),
    /// Metadata sidecar could not be parsed
    Json(serde_json::Error),
}

impl std::fmt::Display for MaterialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaterialError::MissingParameter { shader, parameter } => {
                write!(f, "Shader {} has no parameter named '{}'", shader, parameter)
            }
            MaterialError::ParameterMismatch { shader, detail } => {
                write!(f, "Shader {} parameters disagree: {}", shader, detail)
            }
            MaterialError::Io(e) => write!(f, "IO error: {}", e),
            MaterialError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for MaterialError {}

impl From<std::io::Error> for MaterialError {
    fn from(e: std::io::Error) -> Self {
        MaterialError::Io(e)
    }
}

impl From<serde_json::Error> for MaterialError {
    fn from(e: serde_json::Error) -> Self {
        MaterialError::Json(e)
    }
}

/// Result type for material operations.
pub type MaterialResult<T> = Result<T, MaterialError>;

/// Texture slots resolved for deferred materials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    Normal,
    Specular,
}

impl TextureSlot {
    /// Key the G-buffer shader binds this slot under.
    pub fn canonical_key(self) -> &'static str {
        match self {
            TextureSlot::Normal => NORMAL_MAP_KEY,
            TextureSlot::Specular => SPECULAR_MAP_KEY,
        }
    }

    /// Filename suffix of the naming convention.
    pub fn suffix(self) -> &'static str {
        match self {
            TextureSlot::Normal => "_n",
            TextureSlot::Specular => "_s",
        }
    }

    /// Built-in texture used when nothing else is found.
    pub fn default_texture(self) -> &'static str {
        match self {
            TextureSlot::Normal => "null_normal.tga",
            TextureSlot::Specular => "null_specular.tga",
        }
    }
}

/// Model metadata sidecar: texture keys and paths relative to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    #[serde(default)]
    pub textures: HashMap<String, String>,
}

impl ModelMetadata {
    /// Load a sidecar from disk.
    pub fn load(path: &Path) -> MaterialResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Load `<model>.meta.json` next to `model_path` if it exists.
    pub fn load_for_model(model_path: &Path) -> MaterialResult<Option<Self>> {
        let sidecar = model_path.with_extension("meta.json");
        if !sidecar.exists() {
            return Ok(None);
        }
        Self::load(&sidecar).map(Some)
    }
}

/// Where a resolved texture came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureSource {
    Override(PathBuf),
    Metadata(PathBuf),
    Convention(PathBuf),
    BuiltIn(&'static str),
}

impl TextureSource {
    /// Path to load, `None` for built-in textures.
    pub fn path(&self) -> Option<&Path> {
        match self {
            TextureSource::Override(p) | TextureSource::Metadata(p) | TextureSource::Convention(p) => {
                Some(p)
            }
            TextureSource::BuiltIn(_) => None,
        }
    }
}

/// Everything known about one mesh when resolving its textures.
#[derive(Debug, Clone)]
pub struct TextureQuery<'a> {
    /// Directory the model was loaded from.
    pub model_dir: &'a Path,
    pub mesh_name: &'a str,
    pub normal_override: Option<&'a Path>,
    pub specular_override: Option<&'a Path>,
    pub metadata: Option<&'a ModelMetadata>,
    /// Metadata key holding the normal map, defaults to `"NormalMap"`.
    pub normal_key: Option<&'a str>,
    /// Metadata key holding the specular map, defaults to `"SpecularMap"`.
    pub specular_key: Option<&'a str>,
}

impl<'a> TextureQuery<'a> {
    pub fn new(model_dir: &'a Path, mesh_name: &'a str) -> Self {
        Self {
            model_dir,
            mesh_name,
            normal_override: None,
            specular_override: None,
            metadata: None,
            normal_key: None,
            specular_key: None,
        }
    }
}

/// Resolve one texture slot. `exists` answers whether a convention path is
/// present on disk.
pub fn resolve_texture(
    query: &TextureQuery,
    slot: TextureSlot,
    exists: impl Fn(&Path) -> bool,
) -> TextureSource {
    let (override_path, key) = match slot {
        TextureSlot::Normal => (query.normal_override, query.normal_key),
        TextureSlot::Specular => (query.specular_override, query.specular_key),
    };

    if let Some(path) = override_path {
        return TextureSource::Override(path.to_path_buf());
    }

    let key = key.unwrap_or(slot.canonical_key());
    if let Some(relative) = query.metadata.and_then(|m| m.textures.get(key)) {
        return TextureSource::Metadata(query.model_dir.join(relative));
    }

    let convention = query
        .model_dir
        .join(format!("{}{}.tga", query.mesh_name, slot.suffix()));
    if exists(&convention) {
        return TextureSource::Convention(convention);
    }

    TextureSource::BuiltIn(slot.default_texture())
}

/// Resolve both slots, keyed by the canonical shader names.
pub fn resolve_material_textures(
    query: &TextureQuery,
    exists: impl Fn(&Path) -> bool,
) -> HashMap<&'static str, TextureSource> {
    let mut textures = HashMap::new();
    for slot in [TextureSlot::Normal, TextureSlot::Specular] {
        textures.insert(slot.canonical_key(), resolve_texture(query, slot, &exists));
    }
    textures
}

/// Built-in fallback images, generated at startup.
#[derive(Resource, Clone, ExtractResource)]
pub struct DefaultTextures {
    /// Flat tangent-space normal
    pub null_normal: Handle<Image>,
    /// No specular response
    pub null_specular: Handle<Image>,
    /// Plain white albedo
    pub white: Handle<Image>,
    /// Radial falloff modulating spot lights
    pub spot_cookie: Handle<Image>,
}

impl DefaultTextures {
    pub fn builtin(&self, name: &str) -> Handle<Image> {
        match name {
            "null_specular.tga" => self.null_specular.clone(),
            "null_normal.tga" => self.null_normal.clone(),
            _ => self.white.clone(),
        }
    }
}

/// Textures bound for one drawable in the G-buffer pass.
#[derive(Component, Clone, Debug)]
pub struct DeferredMaterial {
    pub diffuse: Handle<Image>,
    pub normal: Handle<Image>,
    pub specular: Handle<Image>,
    /// Unlit surfaces write zero specular and skip light accumulation.
    pub lit: bool,
}

impl DeferredMaterial {
    /// Load the resolved textures, falling back to built-ins.
    pub fn from_resolved(
        asset_server: &AssetServer,
        defaults: &DefaultTextures,
        diffuse: Option<Handle<Image>>,
        textures: &HashMap<&'static str, TextureSource>,
    ) -> Self {
        let load = |key: &str, slot: TextureSlot| match textures.get(key) {
            Some(TextureSource::BuiltIn(name)) => defaults.builtin(name),
            Some(source) => match source.path() {
                Some(path) => asset_server.load(path.to_path_buf()),
                None => defaults.builtin(slot.default_texture()),
            },
            None => defaults.builtin(slot.default_texture()),
        };

        Self {
            diffuse: diffuse.unwrap_or_else(|| defaults.white.clone()),
            normal: load(NORMAL_MAP_KEY, TextureSlot::Normal),
            specular: load(SPECULAR_MAP_KEY, TextureSlot::Specular),
            lit: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(entries: &[(&str, &str)]) -> ModelMetadata {
        ModelMetadata {
            textures: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_fallback_order() {
        let dir = Path::new("models/ship");
        let meta = metadata(&[("NormalMap", "ship_normal.tga")]);
        let override_path = PathBuf::from("custom/normal.tga");
        let everything_exists = |_: &Path| true;

        let full = TextureQuery {
            normal_override: Some(&override_path),
            metadata: Some(&meta),
            ..TextureQuery::new(dir, "hull")
        };
        assert_eq!(
            resolve_texture(&full, TextureSlot::Normal, everything_exists),
            TextureSource::Override(override_path.clone())
        );

        let no_override = TextureQuery {
            normal_override: None,
            ..full.clone()
        };
        assert_eq!(
            resolve_texture(&no_override, TextureSlot::Normal, everything_exists),
            TextureSource::Metadata(dir.join("ship_normal.tga"))
        );

        let no_metadata = TextureQuery {
            metadata: None,
            ..no_override.clone()
        };
        assert_eq!(
            resolve_texture(&no_metadata, TextureSlot::Normal, everything_exists),
            TextureSource::Convention(dir.join("hull_n.tga"))
        );

        assert_eq!(
            resolve_texture(&no_metadata, TextureSlot::Normal, |_: &Path| false),
            TextureSource::BuiltIn("null_normal.tga")
        );
    }

    #[test]
    fn test_custom_metadata_key_rekeyed_to_canonical() {
        let meta = metadata(&[("Bump0", "bump.tga"), ("Spec0", "spec.tga")]);
        let query = TextureQuery {
            metadata: Some(&meta),
            normal_key: Some("Bump0"),
            specular_key: Some("Spec0"),
            ..TextureQuery::new(Path::new("m"), "hull")
        };
        let textures = resolve_material_textures(&query, |_: &Path| false);
        assert_eq!(textures.len(), 2);
        assert_eq!(textures["NormalMap"], TextureSource::Metadata(PathBuf::from("m/bump.tga")));
        assert_eq!(textures["SpecularMap"], TextureSource::Metadata(PathBuf::from("m/spec.tga")));
    }

    #[test]
    fn test_convention_checks_real_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hull_s.tga"), b"tga").unwrap();

        let query = TextureQuery::new(dir.path(), "hull");
        let textures = resolve_material_textures(&query, |p: &Path| p.exists());
        assert_eq!(textures["NormalMap"], TextureSource::BuiltIn("null_normal.tga"));
        assert_eq!(
            textures["SpecularMap"],
            TextureSource::Convention(dir.path().join("hull_s.tga"))
        );
    }

    #[test]
    fn test_metadata_sidecar_roundtrip_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("ship.glb");
        assert!(ModelMetadata::load_for_model(&model).unwrap().is_none());

        std::fs::write(
            dir.path().join("ship.meta.json"),
            r#"{ "textures": { "NormalMap": "ship_n.png" } }"#,
        )
        .unwrap();
        let meta = ModelMetadata::load_for_model(&model).unwrap().unwrap();
        assert_eq!(meta.textures.get("NormalMap").map(String::as_str), Some("ship_n.png"));
    }

    #[test]
    fn test_bad_sidecar_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("bad.meta.json");
        std::fs::write(&sidecar, "not json").unwrap();
        assert!(matches!(ModelMetadata::load(&sidecar), Err(MaterialError::Json(_))));
    }
}
