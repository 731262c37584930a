//! Material definitions

use super::cache::CachedResource;
use super::handle::Handle;
use super::hash::ContentHasher;
use super::texture::{Texture, TextureSource};
use crate::error::GraphicsResult;

/// Texture slots of a material, in hashing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    Albedo,
    Normal,
    Metallic,
    Roughness,
    AmbientOcclusion,
}

impl TextureSlot {
    pub const COUNT: usize = 5;

    pub const ALL: [TextureSlot; Self::COUNT] = [
        TextureSlot::Albedo,
        TextureSlot::Normal,
        TextureSlot::Metallic,
        TextureSlot::Roughness,
        TextureSlot::AmbientOcclusion,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A material: a name and one texture per slot. An invalid handle means the
/// slot is not present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Material {
    pub name: String,
    pub textures: [Handle<Texture>; TextureSlot::COUNT],
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            textures: [Handle::INVALID; TextureSlot::COUNT],
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_texture(mut self, slot: TextureSlot, texture: Handle<Texture>) -> Self {
        self.textures[slot.index()] = texture;
        self
    }

    pub fn texture(&self, slot: TextureSlot) -> Option<Handle<Texture>> {
        let handle = self.textures[slot.index()];
        handle.is_valid().then_some(handle)
    }
}

/// Material as read by an importer: texture slots still refer to sources
/// that have to be imported.
#[derive(Debug, Clone, Default)]
pub struct MaterialDescription {
    pub name: String,
    pub textures: Vec<(TextureSlot, TextureSource)>,
}

impl MaterialDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            textures: Vec::new(),
        }
    }

    pub fn with_texture(mut self, slot: TextureSlot, source: impl Into<TextureSource>) -> Self {
        self.textures.push((slot, source.into()));
        self
    }
}

impl CachedResource for Material {
    /// Materials enter the cache with their textures already resolved.
    type Description = Material;
    const KIND: &'static str = "material";

    fn build(material: Material) -> GraphicsResult<Self> {
        Ok(material)
    }

    fn content_hash(&self) -> Handle<Self> {
        let mut hasher = ContentHasher::new();
        hasher.write_str(&self.name);
        for texture in &self.textures {
            hasher.write_handle(*texture);
        }
        hasher.finish_handle()
    }

    fn same_content(&self, other: &Self) -> bool {
        self == other
    }

    fn default_resource() -> Self {
        Material::default()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_order_changes_hash() {
        let texture = Handle::from_id(42);
        let albedo = Material::new("m").with_texture(TextureSlot::Albedo, texture);
        let normal = Material::new("m").with_texture(TextureSlot::Normal, texture);
        assert_ne!(albedo.content_hash(), normal.content_hash());
        assert_eq!(albedo.texture(TextureSlot::Albedo), Some(texture));
        assert_eq!(albedo.texture(TextureSlot::Normal), None);
    }

    #[test]
    fn test_name_is_part_of_identity() {
        assert_ne!(
            Material::new("a").content_hash(),
            Material::new("b").content_hash()
        );
        assert_eq!(
            Material::new("a").content_hash(),
            Material::new("a").content_hash()
        );
    }
}
