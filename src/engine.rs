//! Main engine orchestrator
//!
//! [`Engine`] owns one backend and every subsystem built on it: the asset
//! library, the geometry arena, the texture store, the staging transfer and
//! the frame scheduler. It is the single writer of the arena; loaders that
//! import from several threads share it behind a `parking_lot::Mutex`.

use std::collections::HashSet;
use std::sync::Arc;

use crate::backend::{GraphicsBackend, HeadlessBackend, PipelineHandle, PresentStatus};
use crate::error::{GraphicsError, GraphicsResult};
use crate::frame::{DrawCommand, FrameScheduler};
use crate::geometry::{ArenaBinding, ArenaStats, GeometryArena, MeshAllocation};
use crate::resources::{
    AssetLibrary, Handle, Material, MaterialDescription, Mesh, MeshDescription, Texture,
    TextureSource,
};
use crate::transfer::{GpuTexture, StagingTransfer, TextureStore};
use crate::{BackendType, EngineConfig};

/// Number of resources made resident by one [`Engine::sync_uploads`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadSummary {
    pub meshes: usize,
    pub textures: usize,
    pub materials: usize,
}

impl UploadSummary {
    pub fn is_empty(&self) -> bool {
        self.meshes == 0 && self.textures == 0 && self.materials == 0
    }
}

/// Result of [`Engine::render_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame reached the presentation engine.
    Presented(PresentStatus),
    /// The surface was stale; the swapchain has been recreated and the
    /// caller should render again.
    SurfaceRecreated,
}

/// The main graphics engine
pub struct Engine {
    config: EngineConfig,
    library: AssetLibrary,
    scheduler: FrameScheduler,
    arena: GeometryArena,
    textures: TextureStore,
    transfer: StagingTransfer,
    resident_materials: HashSet<Handle<Material>>,
    surface_size: (u32, u32),
    backend: Arc<dyn GraphicsBackend>,
}

impl Engine {
    /// Create an engine over an already initialized backend.
    pub fn new(config: EngineConfig, backend: Arc<dyn GraphicsBackend>) -> GraphicsResult<Self> {
        config.validate()?;

        log::info!(
            "Creating engine on {} backend ({} frames in flight)",
            backend.name(),
            config.frames_in_flight
        );

        let transfer = StagingTransfer::new(backend.clone())?;
        let arena = GeometryArena::new(backend.clone(), config.arena)?;
        let textures = TextureStore::new(backend.clone());
        let scheduler =
            FrameScheduler::new(backend.clone(), config.frames_in_flight, config.clear_color)?;

        let mut library = AssetLibrary::new();
        if let Some(root) = &config.asset_root {
            library = library.with_asset_root(root.clone());
        }

        let extent = backend.swapchain_extent();
        Ok(Self {
            surface_size: (extent.width, extent.height),
            config,
            library,
            scheduler,
            arena,
            textures,
            transfer,
            resident_materials: HashSet::new(),
            backend,
        })
    }

    /// Create an engine on a [`HeadlessBackend`] sized from `config`.
    pub fn headless(config: EngineConfig) -> GraphicsResult<Self> {
        if config.backend != BackendType::Headless {
            return Err(GraphicsError::InvalidConfig(format!(
                "{:?} backend requires a window",
                config.backend
            )));
        }
        config.validate()?;
        let backend =
            HeadlessBackend::new(config.width, config.height, config.swapchain_image_count)?;
        Self::new(config, Arc::new(backend))
    }

    /// Create an engine presenting to `window` with the backend selected by
    /// `config.backend`.
    #[cfg(feature = "vulkan-backend")]
    pub fn with_window(
        config: EngineConfig,
        window: Arc<winit::window::Window>,
    ) -> GraphicsResult<Self> {
        config.validate()?;
        let backend: Arc<dyn GraphicsBackend> = match config.backend {
            BackendType::Vulkan => Arc::new(crate::backend::vulkan::VulkanBackend::new(
                window,
                config.vsync,
                config.validation,
            )?),
            BackendType::Headless => {
                let size = window.inner_size();
                Arc::new(HeadlessBackend::new(
                    size.width.max(1),
                    size.height.max(1),
                    config.swapchain_image_count,
                )?)
            }
        };
        Self::new(config, backend)
    }

    pub fn import_mesh(&mut self, desc: MeshDescription) -> GraphicsResult<Handle<Mesh>> {
        self.library.import_mesh(desc)
    }

    pub fn import_texture(&mut self, source: impl Into<TextureSource>) -> Handle<Texture> {
        self.library.import_texture(source.into())
    }

    pub fn import_material(&mut self, desc: MaterialDescription) -> Handle<Material> {
        self.library.import_material(desc)
    }

    pub fn default_material(&mut self) -> Handle<Material> {
        self.library.default_material()
    }

    pub fn library(&self) -> &AssetLibrary {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut AssetLibrary {
        &mut self.library
    }

    /// Make every resource imported since the previous call resident on the
    /// GPU. Returns once all copies have completed.
    ///
    /// A resource that fails to upload stays queued for the next call while
    /// the rest of the batch is still uploaded; the first failure is then
    /// returned.
    pub fn sync_uploads(&mut self) -> GraphicsResult<UploadSummary> {
        let mut summary = UploadSummary::default();
        let mut first_error = None;

        let mut failed_meshes = Vec::new();
        for handle in self.library.meshes_mut().consume_pending_uploads() {
            let Some(mesh) = self.library.mesh(handle) else {
                log::warn!("pending mesh {:?} no longer cached", handle);
                continue;
            };
            match self.arena.upload_mesh(&mut self.transfer, handle, mesh) {
                Ok(_) => summary.meshes += 1,
                Err(e) => {
                    log::error!("mesh '{}' not uploaded: {}", mesh.name, e);
                    failed_meshes.push(handle);
                    first_error.get_or_insert(e);
                }
            }
        }
        self.library.meshes_mut().requeue_pending(failed_meshes);

        let mut failed_textures = Vec::new();
        for handle in self.library.textures_mut().consume_pending_uploads() {
            let Some(texture) = self.library.texture(handle) else {
                log::warn!("pending texture {:?} no longer cached", handle);
                continue;
            };
            match self.textures.upload(&mut self.transfer, handle, texture) {
                Ok(_) => summary.textures += 1,
                Err(e) => {
                    log::error!("texture '{}' not uploaded: {}", texture.name, e);
                    failed_textures.push(handle);
                    first_error.get_or_insert(e);
                }
            }
        }
        self.library.textures_mut().requeue_pending(failed_textures);

        for handle in self.library.materials_mut().consume_pending_uploads() {
            if self.resident_materials.insert(handle) {
                summary.materials += 1;
            }
        }

        if !summary.is_empty() {
            log::debug!(
                "synced {} mesh(es), {} texture(s), {} material(s)",
                summary.meshes,
                summary.textures,
                summary.materials
            );
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Arena allocation of an uploaded mesh.
    pub fn allocation(&self, mesh: Handle<Mesh>) -> GraphicsResult<MeshAllocation> {
        self.arena.get_allocation(mesh)
    }

    pub fn gpu_texture(&self, texture: Handle<Texture>) -> Option<&GpuTexture> {
        self.textures.get(texture)
    }

    pub fn is_material_resident(&self, material: Handle<Material>) -> bool {
        self.resident_materials.contains(&material)
    }

    pub fn geometry_binding(&self) -> ArenaBinding {
        self.arena.binding()
    }

    /// Build the draw list for `meshes`: optional pipeline bind, arena bind,
    /// then one single-instance draw per mesh.
    pub fn draws_for(
        &self,
        meshes: &[Handle<Mesh>],
        pipeline: Option<PipelineHandle>,
    ) -> GraphicsResult<Vec<DrawCommand>> {
        let mut draws = Vec::with_capacity(meshes.len() + 2);
        if let Some(pipeline) = pipeline {
            draws.push(DrawCommand::BindPipeline(pipeline));
        }
        draws.push(DrawCommand::BindGeometry(self.arena.binding()));
        for &mesh in meshes {
            draws.push(DrawCommand::draw_mesh(self.arena.get_allocation(mesh)?));
        }
        Ok(draws)
    }

    /// Run one full frame: begin, record `draws`, submit and present.
    ///
    /// A stale surface at acquire or present recreates the swapchain at the
    /// last known surface size and reports [`FrameOutcome::SurfaceRecreated`].
    /// If `draws` are rejected the frame is presented cleared and the error
    /// is returned; the next call starts a fresh frame.
    pub fn render_frame(&mut self, draws: &[DrawCommand]) -> GraphicsResult<FrameOutcome> {
        let frame = match self.scheduler.begin_frame() {
            Ok(frame) => frame,
            Err(e) if e.is_surface_out_of_date() => {
                self.recreate_surface()?;
                return Ok(FrameOutcome::SurfaceRecreated);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.scheduler.record(&frame, draws) {
            if let Err(abort) = self.scheduler.abort_frame(&frame) {
                log::error!("frame {} could not be abandoned: {}", frame.frame_number, abort);
            }
            return Err(e);
        }
        let status = self.scheduler.submit_and_present(&frame)?;

        if status.needs_recreate() {
            self.recreate_surface()?;
            return Ok(FrameOutcome::SurfaceRecreated);
        }
        Ok(FrameOutcome::Presented(status))
    }

    /// Handle a surface resize. A zero-sized surface (minimized window) is
    /// ignored until a real size arrives.
    pub fn resize(&mut self, width: u32, height: u32) -> GraphicsResult<()> {
        if width == 0 || height == 0 {
            log::debug!("ignoring resize to {}x{}", width, height);
            return Ok(());
        }
        self.surface_size = (width, height);
        self.recreate_surface()
    }

    fn recreate_surface(&mut self) -> GraphicsResult<()> {
        let (width, height) = self.surface_size;
        self.scheduler.recreate_swapchain(width, height)
    }

    /// Block until the GPU has finished every submitted frame.
    pub fn wait_idle(&self) -> GraphicsResult<()> {
        self.scheduler.wait_idle()
    }

    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    pub fn frame_count(&self) -> u64 {
        self.scheduler.frame_count()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn GraphicsBackend> {
        &self.backend
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut FrameScheduler {
        &mut self.scheduler
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.backend.device_wait_idle() {
            log::error!("device wait idle failed during engine shutdown: {}", e);
        }
        log::info!("Engine shut down after {} frames", self.scheduler.frame_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ArenaConfig;

    fn engine() -> Engine {
        Engine::headless(
            EngineConfig::default()
                .with_size(64, 64)
                .with_arena(ArenaConfig::new(64 * 1024, 16 * 1024)),
        )
        .unwrap()
    }

    #[test]
    fn test_headless_rejects_vulkan_config() {
        let config = EngineConfig::default().with_backend(BackendType::Vulkan);
        assert!(matches!(
            Engine::headless(config),
            Err(GraphicsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sync_uploads_drains_once() {
        let mut engine = engine();
        let cube = engine.import_mesh(MeshDescription::cube()).unwrap();
        let quad = engine.import_mesh(MeshDescription::quad()).unwrap();
        let material = engine.default_material();

        let summary = engine.sync_uploads().unwrap();
        assert_eq!(
            summary,
            UploadSummary {
                meshes: 2,
                textures: 0,
                materials: 1
            }
        );
        assert!(engine.sync_uploads().unwrap().is_empty());

        assert_eq!(engine.allocation(cube).unwrap().vertex_offset, 0);
        assert_eq!(engine.allocation(quad).unwrap().vertex_offset, 24);
        assert!(engine.is_material_resident(material));
    }

    #[test]
    fn test_draws_for_unknown_mesh() {
        let mut engine = engine();
        let cube = engine.import_mesh(MeshDescription::cube()).unwrap();
        assert!(matches!(
            engine.draws_for(&[cube], None),
            Err(GraphicsError::UnknownMesh(_))
        ));

        engine.sync_uploads().unwrap();
        let draws = engine.draws_for(&[cube], None).unwrap();
        assert_eq!(draws.len(), 2);
        assert!(matches!(draws[0], DrawCommand::BindGeometry(_)));
    }

    #[test]
    fn test_render_frames() {
        let mut engine = engine();
        let cube = engine.import_mesh(MeshDescription::cube()).unwrap();
        engine.sync_uploads().unwrap();
        let draws = engine.draws_for(&[cube], None).unwrap();

        for _ in 0..4 {
            assert_eq!(
                engine.render_frame(&draws).unwrap(),
                FrameOutcome::Presented(PresentStatus::Optimal)
            );
        }
        assert_eq!(engine.frame_count(), 4);
    }

    #[test]
    fn test_zero_resize_ignored() {
        let mut engine = engine();
        engine.resize(0, 0).unwrap();
        assert_eq!(engine.backend().swapchain_extent().width, 64);
        engine.resize(128, 96).unwrap();
        assert_eq!(engine.backend().swapchain_extent().height, 96);
    }
}
