//! Texture loading and management

use std::path::{Path, PathBuf};

use image::DynamicImage;

use super::cache::CachedResource;
use super::handle::Handle;
use super::hash::ContentHasher;
use crate::error::{GraphicsError, GraphicsResult};

/// Decoded pixel data supplied directly by an importer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDescription {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub pixels: Vec<u8>,
}

/// Where a texture comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureSource {
    /// An image file, decoded on import
    File(PathBuf),
    /// Already decoded pixels
    Pixels(TextureDescription),
}

impl From<TextureDescription> for TextureSource {
    fn from(desc: TextureDescription) -> Self {
        TextureSource::Pixels(desc)
    }
}

/// Loaded texture data
#[derive(Debug, Clone)]
pub struct Texture {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub pixels: Vec<u8>,
}

impl Texture {
    /// Create a texture from decoded pixels.
    pub fn from_pixels(desc: TextureDescription) -> GraphicsResult<Self> {
        let TextureDescription {
            name,
            width,
            height,
            channels,
            pixels,
        } = desc;

        if width == 0 || height == 0 {
            return Err(GraphicsError::InvalidTexture {
                name,
                reason: format!("empty extent {}x{}", width, height),
            });
        }
        let expected = width as usize * height as usize * channels as usize;
        if channels == 0 || pixels.len() != expected {
            return Err(GraphicsError::InvalidTexture {
                name,
                reason: format!(
                    "{} bytes for {}x{} with {} channels",
                    pixels.len(),
                    width,
                    height,
                    channels
                ),
            });
        }

        Ok(Self {
            name,
            width,
            height,
            channels,
            pixels,
        })
    }

    /// Load texture from file
    pub fn from_file(path: impl AsRef<Path>) -> GraphicsResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(GraphicsError::AssetNotFound(path.to_path_buf()));
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path).map_err(|e| GraphicsError::AssetDecode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_image(img, name)
    }

    /// Load texture from encoded bytes
    pub fn from_bytes(bytes: &[u8], name: &str) -> GraphicsResult<Self> {
        let img = image::load_from_memory(bytes).map_err(|e| GraphicsError::AssetDecode {
            path: PathBuf::from(name),
            reason: e.to_string(),
        })?;
        Self::from_image(img, name.to_string())
    }

    /// Keep 8-bit grey, grey+alpha, RGB and RGBA images as they are; convert
    /// everything else to RGBA.
    fn from_image(img: DynamicImage, name: String) -> GraphicsResult<Self> {
        let (width, height) = (img.width(), img.height());
        let (channels, pixels) = match img {
            DynamicImage::ImageLuma8(buffer) => (1, buffer.into_raw()),
            DynamicImage::ImageLumaA8(buffer) => (2, buffer.into_raw()),
            DynamicImage::ImageRgb8(buffer) => (3, buffer.into_raw()),
            DynamicImage::ImageRgba8(buffer) => (4, buffer.into_raw()),
            other => (4, other.to_rgba8().into_raw()),
        };
        Self::from_pixels(TextureDescription {
            name,
            width,
            height,
            channels,
            pixels,
        })
    }

    /// Create a solid color texture
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            name: name.to_string(),
            width: 1,
            height: 1,
            channels: 4,
            pixels: color.to_vec(),
        }
    }

    /// Pixels expanded to four 8-bit channels.
    ///
    /// Grey is replicated into RGB with opaque alpha, grey+alpha keeps its
    /// alpha and RGB gains opaque alpha.
    pub fn to_rgba8(&self) -> GraphicsResult<Vec<u8>> {
        let rgba = match self.channels {
            4 => self.pixels.clone(),
            3 => self
                .pixels
                .chunks_exact(3)
                .flat_map(|p| [p[0], p[1], p[2], 255])
                .collect(),
            2 => self
                .pixels
                .chunks_exact(2)
                .flat_map(|p| [p[0], p[0], p[0], p[1]])
                .collect(),
            1 => self.pixels.iter().flat_map(|&g| [g, g, g, 255]).collect(),
            n => {
                return Err(GraphicsError::UnsupportedFormat(format!(
                    "texture '{}' has {} channels",
                    self.name, n
                )))
            }
        };
        Ok(rgba)
    }
}

impl CachedResource for Texture {
    type Description = TextureSource;
    const KIND: &'static str = "texture";

    fn build(source: TextureSource) -> GraphicsResult<Self> {
        match source {
            TextureSource::File(path) => Texture::from_file(path),
            TextureSource::Pixels(desc) => Texture::from_pixels(desc),
        }
    }

    fn content_hash(&self) -> Handle<Self> {
        let mut hasher = ContentHasher::new();
        hasher
            .write_u32(self.width)
            .write_u32(self.height)
            .write_u32(self.channels)
            .write_slice(&self.pixels);
        hasher.finish_handle()
    }

    fn same_content(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.channels == other.channels
            && self.pixels == other.pixels
    }

    fn default_resource() -> Self {
        Self::solid_color([255, 255, 255, 255], "default")
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixels(channels: u32, pixels: Vec<u8>) -> TextureDescription {
        TextureDescription {
            name: "t".to_string(),
            width: 1,
            height: 1,
            channels,
            pixels,
        }
    }

    #[test]
    fn test_rgba_expansion() {
        let rgb = Texture::from_pixels(pixels(3, vec![1, 2, 3])).unwrap();
        assert_eq!(rgb.to_rgba8().unwrap(), vec![1, 2, 3, 255]);

        let grey = Texture::from_pixels(pixels(1, vec![7])).unwrap();
        assert_eq!(grey.to_rgba8().unwrap(), vec![7, 7, 7, 255]);

        let grey_alpha = Texture::from_pixels(pixels(2, vec![7, 9])).unwrap();
        assert_eq!(grey_alpha.to_rgba8().unwrap(), vec![7, 7, 7, 9]);
    }

    #[test]
    fn test_unsupported_channel_count() {
        let texture = Texture::from_pixels(pixels(5, vec![0; 5])).unwrap();
        assert!(matches!(
            texture.to_rgba8(),
            Err(GraphicsError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_size_mismatch_rejected() {
        assert!(matches!(
            Texture::from_pixels(pixels(4, vec![0; 3])),
            Err(GraphicsError::InvalidTexture { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Texture::from_file("/definitely/not/here.png"),
            Err(GraphicsError::AssetNotFound(_))
        ));
    }

    #[test]
    fn test_hash_covers_dimensions() {
        let wide = Texture::from_pixels(TextureDescription {
            name: "a".to_string(),
            width: 2,
            height: 1,
            channels: 4,
            pixels: vec![0; 8],
        })
        .unwrap();
        let tall = Texture::from_pixels(TextureDescription {
            name: "a".to_string(),
            width: 1,
            height: 2,
            channels: 4,
            pixels: vec![0; 8],
        })
        .unwrap();
        assert_ne!(wide.content_hash(), tall.content_hash());
    }
}
