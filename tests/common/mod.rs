//! Common utilities for engine integration tests.
//!
//! Every test runs against the headless backend so the whole pipeline from
//! import to present can be inspected without a GPU.

#![allow(dead_code)]

use std::sync::Arc;

use geometry_engine::backend::headless::HeadlessStats;
use geometry_engine::{
    ArenaConfig, Engine, EngineConfig, GraphicsBackend, HeadlessBackend, MeshDescription,
};
use glam::Vec3;

/// Arena sized for a few hundred small meshes.
pub const TEST_VERTEX_CAPACITY: u64 = 64 * 1024;
pub const TEST_INDEX_CAPACITY: u64 = 16 * 1024;

pub const TEST_WIDTH: u32 = 320;
pub const TEST_HEIGHT: u32 = 240;

/// Route `log` output through the test harness.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Test Context
// ============================================================================

/// An engine together with the headless device it renders on.
pub struct TestContext {
    pub backend: Arc<HeadlessBackend>,
    pub engine: Engine,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_frames_in_flight(2)
    }

    pub fn with_frames_in_flight(frames_in_flight: usize) -> Self {
        Self::with_config(test_config().with_frames_in_flight(frames_in_flight))
    }

    pub fn with_arena(vertex_capacity_bytes: u64, index_capacity_bytes: u64) -> Self {
        Self::with_config(
            test_config().with_arena(ArenaConfig::new(vertex_capacity_bytes, index_capacity_bytes)),
        )
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_logger();
        let backend = Arc::new(
            HeadlessBackend::new(config.width, config.height, config.swapchain_image_count)
                .expect("headless backend"),
        );
        let engine = Engine::new(config, backend.clone() as Arc<dyn GraphicsBackend>)
            .expect("engine over headless backend");
        Self { backend, engine }
    }

    pub fn stats(&self) -> HeadlessStats {
        self.backend.stats()
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_size(TEST_WIDTH, TEST_HEIGHT)
        .with_arena(ArenaConfig::new(TEST_VERTEX_CAPACITY, TEST_INDEX_CAPACITY))
        .with_validation(false)
}

// ============================================================================
// Mesh Helpers
// ============================================================================

/// A single triangle: 3 vertices, 3 indices.
pub fn triangle(name: &str) -> MeshDescription {
    MeshDescription::new(
        name,
        vec![
            Vec3::new(0.0, 0.5, 0.0),
            Vec3::new(-0.5, -0.5, 0.0),
            Vec3::new(0.5, -0.5, 0.0),
        ],
        vec![0, 1, 2],
    )
}

/// A quad made of two triangles: 4 vertices, 6 indices.
pub fn quad(name: &str) -> MeshDescription {
    MeshDescription::new(
        name,
        vec![
            Vec3::new(-0.5, -0.5, 0.0),
            Vec3::new(0.5, -0.5, 0.0),
            Vec3::new(0.5, 0.5, 0.0),
            Vec3::new(-0.5, 0.5, 0.0),
        ],
        vec![0, 1, 2, 2, 3, 0],
    )
}

/// A triangle fan with `sides` outer vertices around a center vertex.
pub fn fan(name: &str, sides: u32) -> MeshDescription {
    let mut positions = vec![Vec3::ZERO];
    for i in 0..sides {
        let angle = i as f32 / sides as f32 * std::f32::consts::TAU;
        positions.push(Vec3::new(angle.cos(), angle.sin(), 0.0));
    }
    let indices = (0..sides)
        .flat_map(|i| [0, 1 + i, 1 + (i + 1) % sides])
        .collect();
    MeshDescription::new(name, positions, indices)
}
