//! Geometry arena
//!
//! Meshes are packed back to back into one pre-sized device-local buffer and
//! drawn with element offsets into it.

mod arena;
mod region;

pub use arena::{ArenaBinding, ArenaConfig, ArenaStats, GeometryArena, MeshAllocation};
pub use region::{ArenaRegion, Reservation, REGION_ALIGNMENT};
