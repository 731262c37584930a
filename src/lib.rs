//! Geometry Engine - GPU geometry arena and frames-in-flight renderer core
//!
//! This crate manages the GPU side of a real-time renderer:
//! - **Resource caches**: meshes, textures and materials are imported into
//!   content-addressed caches; identical content always yields the same handle
//! - **Geometry arena**: unique meshes are packed into one pre-sized
//!   device-local buffer through a blocking staging transfer
//! - **Frame scheduling**: N frame slots with fences and semaphores let the CPU
//!   record frame N+1 while the GPU renders frame N
//!
//! Two backends implement [`backend::GraphicsBackend`]:
//! - **Headless**: host-memory device that executes copies and models deferred
//!   GPU completion (tests, tools, CI)
//! - **Vulkan**: Direct Vulkan API via ash (feature `vulkan-backend`)
//!
//! The library never installs a logger; it reports through the `log` facade.

pub mod backend;
pub mod engine;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod resources;
pub mod transfer;

use std::path::PathBuf;

pub use backend::{GraphicsBackend, HeadlessBackend};
#[cfg(feature = "vulkan-backend")]
pub use backend::vulkan::VulkanBackend;
pub use engine::{Engine, FrameOutcome, UploadSummary};
pub use error::{BackendError, BackendResult, GraphicsError, GraphicsResult};
pub use frame::{DrawCommand, FrameContext, FrameScheduler, FrameState};
pub use geometry::{ArenaConfig, GeometryArena, MeshAllocation};
pub use resources::{
    AssetLibrary, Handle, Material, MaterialDescription, Mesh, MeshDescription, Texture,
    TextureDescription, TextureSlot, TextureSource, Vertex,
};

/// Backend selection for the graphics engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// Host-memory backend - no GPU or window required
    #[default]
    Headless,
    /// Vulkan backend via ash - requires a window (native only)
    Vulkan,
}

/// Configuration for initializing the graphics engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Which backend to use
    pub backend: BackendType,
    /// Number of frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Geometry arena region sizes
    pub arena: ArenaConfig,
    /// Enable vsync
    pub vsync: bool,
    /// Enable Vulkan validation layers
    pub validation: bool,
    /// Initial surface width
    pub width: u32,
    /// Initial surface height
    pub height: u32,
    /// Number of swapchain images (headless backend only)
    pub swapchain_image_count: u32,
    /// Color the frame pass clears to
    pub clear_color: [f32; 4],
    /// Directory relative texture paths are resolved against
    pub asset_root: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Headless,
            frames_in_flight: 2,
            arena: ArenaConfig::default(),
            vsync: true,
            validation: cfg!(debug_assertions),
            width: 1280,
            height: 720,
            swapchain_image_count: 3,
            clear_color: [0.1, 0.1, 0.12, 1.0],
            asset_root: None,
        }
    }
}

impl EngineConfig {
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn with_arena(mut self, arena: ArenaConfig) -> Self {
        self.arena = arena;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_swapchain_image_count(mut self, count: u32) -> Self {
        self.swapchain_image_count = count;
        self
    }

    pub fn with_clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }

    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(root.into());
        self
    }

    /// Check the configuration before any GPU object is created.
    pub fn validate(&self) -> GraphicsResult<()> {
        if self.frames_in_flight == 0 {
            return Err(GraphicsError::InvalidConfig(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(GraphicsError::InvalidConfig(format!(
                "surface size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.backend == BackendType::Headless && self.swapchain_image_count == 0 {
            return Err(GraphicsError::InvalidConfig(
                "swapchain_image_count must be at least 1".to_string(),
            ));
        }
        self.arena.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.backend, BackendType::Headless);
        assert_eq!(config.frames_in_flight, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let zero_frames = EngineConfig::default().with_frames_in_flight(0);
        assert!(matches!(
            zero_frames.validate(),
            Err(GraphicsError::InvalidConfig(_))
        ));

        let zero_size = EngineConfig::default().with_size(0, 720);
        assert!(matches!(
            zero_size.validate(),
            Err(GraphicsError::InvalidConfig(_))
        ));

        let unaligned = EngineConfig::default().with_arena(ArenaConfig::new(1022, 1024));
        assert!(matches!(
            unaligned.validate(),
            Err(GraphicsError::InvalidConfig(_))
        ));
    }
}
