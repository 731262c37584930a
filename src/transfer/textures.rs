//! GPU residency for imported textures.

use std::collections::HashMap;
use std::sync::Arc;

use super::staging::StagingTransfer;
use crate::backend::{Extent2d, GraphicsBackend, TextureDescriptor, TextureFormat, TextureHandle};
use crate::error::GraphicsResult;
use crate::resources::{Handle, Texture};

/// A texture resident in device-local memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuTexture {
    pub handle: TextureHandle,
    pub extent: Extent2d,
    pub format: TextureFormat,
}

/// Owns the device textures created for imported textures.
pub struct TextureStore {
    backend: Arc<dyn GraphicsBackend>,
    textures: HashMap<Handle<Texture>, GpuTexture>,
    /// Textures whose upload failed; destroyed once the device is idle.
    orphans: Vec<TextureHandle>,
}

impl TextureStore {
    pub fn new(backend: Arc<dyn GraphicsBackend>) -> Self {
        Self {
            backend,
            textures: HashMap::new(),
            orphans: Vec::new(),
        }
    }

    /// Create an sRGB RGBA8 image for `texture` and upload its pixels.
    /// Uploading a handle that is already resident returns the existing image.
    pub fn upload(
        &mut self,
        transfer: &mut StagingTransfer,
        handle: Handle<Texture>,
        texture: &Texture,
    ) -> GraphicsResult<GpuTexture> {
        if let Some(resident) = self.textures.get(&handle) {
            return Ok(*resident);
        }

        let pixels = texture.to_rgba8()?;
        let format = TextureFormat::Rgba8UnormSrgb;
        let desc = TextureDescriptor::new_2d(texture.width, texture.height, format)
            .with_label(texture.name.clone());
        let image = self.backend.create_texture(&desc)?;

        if let Err(err) = transfer.upload_texture(image, desc.extent, &pixels) {
            self.orphans.push(image);
            return Err(err);
        }

        let resident = GpuTexture {
            handle: image,
            extent: desc.extent,
            format,
        };
        log::debug!(
            "texture '{}' resident as {}x{} image {}",
            texture.name,
            texture.width,
            texture.height,
            image.raw()
        );
        self.textures.insert(handle, resident);
        Ok(resident)
    }

    pub fn get(&self, handle: Handle<Texture>) -> Option<&GpuTexture> {
        self.textures.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

impl Drop for TextureStore {
    fn drop(&mut self) {
        if let Err(e) = self.backend.device_wait_idle() {
            log::error!("device wait idle failed while destroying textures: {}", e);
        }
        for texture in self.textures.values() {
            self.backend.destroy_texture(texture.handle);
        }
        for texture in self.orphans.drain(..) {
            self.backend.destroy_texture(texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::error::GraphicsError;
    use crate::resources::{CachedResource, TextureDescription};

    fn setup() -> (Arc<HeadlessBackend>, StagingTransfer, TextureStore) {
        let backend = Arc::new(HeadlessBackend::new(8, 8, 2).unwrap());
        let transfer = StagingTransfer::new(backend.clone()).unwrap();
        let store = TextureStore::new(backend.clone());
        (backend, transfer, store)
    }

    #[test]
    fn test_rgb_texture_is_expanded_on_upload() {
        let (backend, mut transfer, mut store) = setup();
        let texture = Texture::from_pixels(TextureDescription {
            name: "rgb".to_string(),
            width: 2,
            height: 1,
            channels: 3,
            pixels: vec![10, 20, 30, 40, 50, 60],
        })
        .unwrap();
        let handle = texture.content_hash();

        let resident = store.upload(&mut transfer, handle, &texture).unwrap();
        assert_eq!(resident.format, TextureFormat::Rgba8UnormSrgb);
        assert_eq!(
            backend.texture_data(resident.handle).unwrap(),
            vec![10, 20, 30, 255, 40, 50, 60, 255]
        );

        let again = store.upload(&mut transfer, handle, &texture).unwrap();
        assert_eq!(again, resident);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unsupported_channels_create_nothing() {
        let (backend, mut transfer, mut store) = setup();
        let texture = Texture::from_pixels(TextureDescription {
            name: "odd".to_string(),
            width: 1,
            height: 1,
            channels: 6,
            pixels: vec![0; 6],
        })
        .unwrap();
        let result = store.upload(&mut transfer, texture.content_hash(), &texture);
        assert!(matches!(result, Err(GraphicsError::UnsupportedFormat(_))));
        assert_eq!(backend.stats().live_textures, 0);
    }

    #[test]
    fn test_drop_destroys_textures() {
        let (backend, mut transfer, mut store) = setup();
        let texture = Texture::default_resource();
        store
            .upload(&mut transfer, texture.content_hash(), &texture)
            .unwrap();
        assert_eq!(backend.stats().live_textures, 1);
        drop(store);
        assert_eq!(backend.stats().live_textures, 0);
    }
}
