//! Subsystem error types.
//!
//! [`BackendError`] describes failures reported by a [`GraphicsBackend`]
//! implementation; [`GraphicsError`] wraps those and adds the failures raised
//! by the resource caches, the geometry arena and the frame scheduler.
//!
//! Only a stale presentation surface is recoverable. Every other error is
//! meant to end the frame loop; see [`GraphicsError::is_fatal`].
//!
//! [`GraphicsBackend`]: crate::backend::GraphicsBackend

use std::path::PathBuf;

use thiserror::Error;

use crate::frame::FrameState;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Unknown {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u64 },
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),
    #[error("Command buffer {0} is still pending execution")]
    CommandBufferInUse(u64),
    #[error("Fence {0} will never be signaled")]
    FenceNeverSignaled(u64),
    #[error("Feature not supported: {0}")]
    FeatureNotSupported(String),
    #[error("Surface is out of date")]
    SurfaceOutOfDate,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
    #[error("Internal backend error: {0}")]
    Internal(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised by the geometry, resource and frame subsystems.
#[derive(Error, Debug)]
pub enum GraphicsError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid mesh '{name}': {reason}")]
    InvalidMesh { name: String, reason: String },

    #[error("invalid texture '{name}': {reason}")]
    InvalidTexture { name: String, reason: String },

    #[error("asset not found: {}", .0.display())]
    AssetNotFound(PathBuf),

    #[error("failed to decode '{}': {reason}", path.display())]
    AssetDecode { path: PathBuf, reason: String },

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error(
        "{region} region capacity exceeded: {requested} bytes requested at offset {offset}, limit {limit}"
    )]
    ArenaCapacityExceeded {
        region: &'static str,
        requested: u64,
        offset: u64,
        limit: u64,
    },

    #[error("mesh {0:#018x} has no arena allocation")]
    UnknownMesh(u64),

    #[error("invalid draw command: {0}")]
    InvalidDrawCommand(String),

    #[error("frame scheduler is {actual:?}, expected {expected:?}")]
    InvalidFrameState {
        expected: FrameState,
        actual: FrameState,
    },

    #[error("frame context for slot {given} does not match current slot {current}")]
    StaleFrameContext { given: usize, current: usize },

    #[error("presentation surface is out of date")]
    SurfaceOutOfDate,
}

pub type GraphicsResult<T> = Result<T, GraphicsError>;

impl GraphicsError {
    /// Whether the frame loop must stop after this error.
    ///
    /// A stale surface is the only transient condition: the caller recreates
    /// the swapchain and retries the frame.
    pub fn is_fatal(&self) -> bool {
        !self.is_surface_out_of_date()
    }

    /// Whether this error reports a stale presentation surface.
    pub fn is_surface_out_of_date(&self) -> bool {
        matches!(
            self,
            Self::SurfaceOutOfDate | Self::Backend(BackendError::SurfaceOutOfDate)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::ArenaCapacityExceeded {
            region: "vertex",
            requested: 64,
            offset: 960,
            limit: 1000,
        };
        assert_eq!(
            err.to_string(),
            "vertex region capacity exceeded: 64 bytes requested at offset 960, limit 1000"
        );

        let err: GraphicsError = BackendError::OutOfMemory.into();
        assert_eq!(err.to_string(), "Out of memory");
    }

    #[test]
    fn test_only_stale_surface_is_recoverable() {
        assert!(!GraphicsError::SurfaceOutOfDate.is_fatal());
        assert!(!GraphicsError::Backend(BackendError::SurfaceOutOfDate).is_fatal());
        assert!(GraphicsError::Backend(BackendError::DeviceLost).is_fatal());
        assert!(GraphicsError::UnknownMesh(7).is_fatal());
        assert!(GraphicsError::UnsupportedFormat("r5g6b5".into()).is_fatal());
    }
}
