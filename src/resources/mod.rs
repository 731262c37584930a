//! Resource management
//!
//! Imports meshes, textures and materials into content-addressed caches.
//! Identical content always yields the same [`Handle`].

mod cache;
mod handle;
mod hash;
mod library;
mod material;
mod mesh;
mod texture;

pub use cache::*;
pub use handle::*;
pub use hash::*;
pub use library::*;
pub use material::*;
pub use mesh::*;
pub use texture::*;
