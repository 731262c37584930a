//! CPU-to-GPU transfers.

mod staging;
mod textures;

pub use staging::{StagingRegion, StagingTransfer, TransferStats};
pub use textures::{GpuTexture, TextureStore};
