//! Backend abstraction layer
//!
//! Provides the [`GraphicsBackend`] trait and the types shared by its
//! implementations: the host-memory [`HeadlessBackend`] and, with the
//! `vulkan-backend` feature, the ash-based `VulkanBackend`.

pub mod headless;
pub mod traits;
pub mod types;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub use headless::HeadlessBackend;
pub use traits::*;
pub use types::*;
