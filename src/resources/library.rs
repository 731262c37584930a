//! Import entry points for meshes, textures and materials.

use std::path::{Path, PathBuf};

use super::cache::ResourceCache;
use super::handle::Handle;
use super::material::{Material, MaterialDescription};
use super::mesh::{Mesh, MeshDescription};
use super::texture::{Texture, TextureSource};
use crate::error::GraphicsResult;

/// The three resource caches an importer feeds.
///
/// Constructed explicitly and owned by the [`Engine`](crate::Engine); each
/// test can build a fresh one.
#[derive(Default)]
pub struct AssetLibrary {
    asset_root: Option<PathBuf>,
    meshes: ResourceCache<Mesh>,
    textures: ResourceCache<Texture>,
    materials: ResourceCache<Material>,
}

impl AssetLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative texture paths against `root`.
    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(root.into());
        self
    }

    pub fn asset_root(&self) -> Option<&Path> {
        self.asset_root.as_deref()
    }

    pub fn import_mesh(&mut self, desc: MeshDescription) -> GraphicsResult<Handle<Mesh>> {
        self.meshes.import(desc)
    }

    /// Import a texture. A missing or undecodable source is logged and
    /// yields the invalid handle.
    pub fn import_texture(&mut self, source: TextureSource) -> Handle<Texture> {
        let source = match source {
            TextureSource::File(path) => TextureSource::File(self.resolve(path)),
            pixels => pixels,
        };
        let label = match &source {
            TextureSource::File(path) => path.display().to_string(),
            TextureSource::Pixels(desc) => desc.name.clone(),
        };
        match self.textures.import(source) {
            Ok(handle) => handle,
            Err(err) => {
                log::warn!("texture '{}' not imported: {}", label, err);
                Handle::INVALID
            }
        }
    }

    /// Import a material, starting from the default (no textures) and
    /// filling each slot the description provides. Slots whose texture
    /// cannot be imported stay invalid.
    pub fn import_material(&mut self, desc: MaterialDescription) -> Handle<Material> {
        let mut material = Material::new(&desc.name);
        for (slot, source) in desc.textures {
            let texture = self.import_texture(source);
            if !texture.is_valid() {
                log::warn!("material '{}': {:?} slot left empty", desc.name, slot);
            }
            material.textures[slot.index()] = texture;
        }
        self.materials.insert(material)
    }

    pub fn default_mesh(&mut self) -> Handle<Mesh> {
        self.meshes.get_default()
    }

    pub fn default_texture(&mut self) -> Handle<Texture> {
        self.textures.get_default()
    }

    pub fn default_material(&mut self) -> Handle<Material> {
        self.materials.get_default()
    }

    pub fn mesh(&self, handle: Handle<Mesh>) -> Option<&Mesh> {
        self.meshes.get(handle)
    }

    pub fn texture(&self, handle: Handle<Texture>) -> Option<&Texture> {
        self.textures.get(handle)
    }

    pub fn material(&self, handle: Handle<Material>) -> Option<&Material> {
        self.materials.get(handle)
    }

    pub fn meshes(&self) -> &ResourceCache<Mesh> {
        &self.meshes
    }

    pub fn meshes_mut(&mut self) -> &mut ResourceCache<Mesh> {
        &mut self.meshes
    }

    pub fn textures(&self) -> &ResourceCache<Texture> {
        &self.textures
    }

    pub fn textures_mut(&mut self) -> &mut ResourceCache<Texture> {
        &mut self.textures
    }

    pub fn materials(&self) -> &ResourceCache<Material> {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut ResourceCache<Material> {
        &mut self.materials
    }

    fn resolve(&self, path: PathBuf) -> PathBuf {
        match &self.asset_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{TextureDescription, TextureSlot};
    use glam::Vec3;

    fn red_pixel() -> TextureDescription {
        TextureDescription {
            name: "red".to_string(),
            width: 1,
            height: 1,
            channels: 4,
            pixels: vec![255, 0, 0, 255],
        }
    }

    #[test]
    fn test_missing_texture_leaves_slot_invalid() {
        let mut library = AssetLibrary::new().with_asset_root("/nonexistent");
        let handle = library.import_material(
            MaterialDescription::new("brick")
                .with_texture(TextureSlot::Albedo, red_pixel())
                .with_texture(
                    TextureSlot::Normal,
                    TextureSource::File("brick_normal.png".into()),
                ),
        );

        let material = library.material(handle).unwrap();
        assert!(material.texture(TextureSlot::Albedo).is_some());
        assert_eq!(material.texture(TextureSlot::Normal), None);
        assert_eq!(library.textures().len(), 1);
    }

    #[test]
    fn test_default_material_is_stable() {
        let mut library = AssetLibrary::new();
        let first = library.default_material();
        let second = library.default_material();
        assert_eq!(first, second);
        assert_eq!(library.materials_mut().consume_pending_uploads(), vec![first]);
    }

    #[test]
    fn test_mesh_import_collapses_duplicates() {
        let mut library = AssetLibrary::new();
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        let a = library
            .import_mesh(MeshDescription::new("a", positions.clone(), vec![0, 1, 2]))
            .unwrap();
        let b = library
            .import_mesh(MeshDescription::new("b", positions, vec![0, 1, 2]))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(library.mesh(a).unwrap().name, "a");
    }
}
