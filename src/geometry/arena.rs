//! Shared device-local vertex/index buffer.

use std::collections::HashMap;
use std::sync::Arc;

use super::region::{ArenaRegion, Reservation, REGION_ALIGNMENT};
use crate::backend::{BufferDescriptor, BufferHandle, BufferUsage, DrawIndexedArgs, GraphicsBackend};
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{Handle, Mesh, Vertex};
use crate::transfer::{StagingRegion, StagingTransfer};

const INDEX_SIZE: u64 = std::mem::size_of::<u32>() as u64;

/// Sizes of the two arena regions. Capacity is fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    pub vertex_capacity_bytes: u64,
    pub index_capacity_bytes: u64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            vertex_capacity_bytes: 64 * 1024 * 1024,
            index_capacity_bytes: 32 * 1024 * 1024,
        }
    }
}

impl ArenaConfig {
    pub fn new(vertex_capacity_bytes: u64, index_capacity_bytes: u64) -> Self {
        Self {
            vertex_capacity_bytes,
            index_capacity_bytes,
        }
    }

    pub fn validate(&self) -> GraphicsResult<()> {
        for (region, capacity) in [
            ("vertex", self.vertex_capacity_bytes),
            ("index", self.index_capacity_bytes),
        ] {
            if capacity == 0 || capacity % REGION_ALIGNMENT != 0 {
                return Err(GraphicsError::InvalidConfig(format!(
                    "{} capacity {} must be a non-zero multiple of {}",
                    region, capacity, REGION_ALIGNMENT
                )));
            }
            // Element offsets are 32-bit
            if capacity > u32::MAX as u64 {
                return Err(GraphicsError::InvalidConfig(format!(
                    "{} capacity {} exceeds 4 GiB",
                    region, capacity
                )));
            }
        }
        Ok(())
    }

    pub fn total_bytes(&self) -> u64 {
        self.vertex_capacity_bytes + self.index_capacity_bytes
    }
}

/// Where a mesh lives in the arena, in elements rather than bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshAllocation {
    /// First vertex, relative to the vertex region.
    pub vertex_offset: u32,
    pub vertex_count: u32,
    /// First index, relative to the index region.
    pub index_offset: u32,
    pub index_count: u32,
}

impl MeshAllocation {
    /// Indexed draw arguments for this mesh with the arena bound.
    pub fn draw_args(&self, instance_count: u32, first_instance: u32) -> DrawIndexedArgs {
        DrawIndexedArgs {
            index_count: self.index_count,
            instance_count,
            first_index: self.index_offset,
            vertex_offset: self.vertex_offset as i32,
            first_instance,
        }
    }
}

/// Buffer and byte offsets to bind before drawing arena meshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaBinding {
    pub buffer: BufferHandle,
    pub vertex_offset: u64,
    pub index_offset: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub vertex_bytes_used: u64,
    pub vertex_capacity: u64,
    pub index_bytes_used: u64,
    pub index_capacity: u64,
    pub mesh_count: usize,
}

/// Packs meshes into one device-local buffer.
///
/// Vertices fill `[0, index_begin)` and indices fill `[index_begin, end)`.
/// Each upload reserves space in both regions, copies through one staging
/// transfer and only then advances the cursors and publishes the mesh's
/// [`MeshAllocation`]. An allocation that can be looked up therefore always
/// refers to data that is already on the device.
///
/// Only one writer may upload at a time; callers that load from several
/// threads wrap the arena (or the owning engine) in a mutex.
pub struct GeometryArena {
    backend: Arc<dyn GraphicsBackend>,
    buffer: BufferHandle,
    vertex_region: ArenaRegion,
    index_region: ArenaRegion,
    allocations: HashMap<Handle<Mesh>, MeshAllocation>,
}

impl GeometryArena {
    pub fn new(backend: Arc<dyn GraphicsBackend>, config: ArenaConfig) -> GraphicsResult<Self> {
        config.validate()?;
        let buffer = backend.create_buffer(
            &BufferDescriptor::new(
                config.total_bytes(),
                BufferUsage::VERTEX | BufferUsage::INDEX | BufferUsage::COPY_DST,
            )
            .with_label("geometry arena"),
        )?;
        let index_begin = config.vertex_capacity_bytes;

        log::info!(
            "geometry arena: {} bytes of vertices, {} bytes of indices from offset {}",
            config.vertex_capacity_bytes,
            config.index_capacity_bytes,
            index_begin
        );

        Ok(Self {
            backend,
            buffer,
            vertex_region: ArenaRegion::new("vertex", 0, config.vertex_capacity_bytes),
            index_region: ArenaRegion::new("index", index_begin, config.index_capacity_bytes),
            allocations: HashMap::new(),
        })
    }

    /// Copy a mesh into the arena and record its allocation.
    ///
    /// Blocks until the copy has completed. Uploading a mesh that is already
    /// resident returns its existing allocation. Running out of space in
    /// either region is [`GraphicsError::ArenaCapacityExceeded`] and leaves
    /// the arena unchanged.
    pub fn upload_mesh(
        &mut self,
        transfer: &mut StagingTransfer,
        handle: Handle<Mesh>,
        mesh: &Mesh,
    ) -> GraphicsResult<MeshAllocation> {
        if let Some(allocation) = self.allocations.get(&handle) {
            return Ok(*allocation);
        }

        let vertex_bytes = mesh.vertex_bytes();
        let index_bytes = mesh.index_bytes();
        let vertices = self.vertex_region.reserve(vertex_bytes.len() as u64)?;
        let indices = self.index_region.reserve(index_bytes.len() as u64)?;

        transfer.upload_regions(
            self.buffer,
            &[
                StagingRegion {
                    dst_offset: vertices.offset,
                    data: vertex_bytes,
                },
                StagingRegion {
                    dst_offset: indices.offset,
                    data: index_bytes,
                },
            ],
        )?;

        let allocation = MeshAllocation {
            vertex_offset: element_offset(&self.vertex_region, vertices, Vertex::SIZE),
            vertex_count: mesh.vertex_count() as u32,
            index_offset: element_offset(&self.index_region, indices, INDEX_SIZE),
            index_count: mesh.index_count() as u32,
        };
        self.vertex_region.commit(vertices);
        self.index_region.commit(indices);
        self.allocations.insert(handle, allocation);

        log::trace!(
            "mesh '{}' packed at vertex {} (+{}), index {} (+{})",
            mesh.name,
            allocation.vertex_offset,
            allocation.vertex_count,
            allocation.index_offset,
            allocation.index_count
        );
        Ok(allocation)
    }

    /// Allocation of an uploaded mesh.
    pub fn get_allocation(&self, handle: Handle<Mesh>) -> GraphicsResult<MeshAllocation> {
        self.allocation(handle)
            .ok_or(GraphicsError::UnknownMesh(handle.id()))
    }

    pub fn allocation(&self, handle: Handle<Mesh>) -> Option<MeshAllocation> {
        self.allocations.get(&handle).copied()
    }

    pub fn contains(&self, handle: Handle<Mesh>) -> bool {
        self.allocations.contains_key(&handle)
    }

    pub fn binding(&self) -> ArenaBinding {
        ArenaBinding {
            buffer: self.buffer,
            vertex_offset: self.vertex_region.base(),
            index_offset: self.index_region.base(),
        }
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn vertex_region(&self) -> &ArenaRegion {
        &self.vertex_region
    }

    pub fn index_region(&self) -> &ArenaRegion {
        &self.index_region
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            vertex_bytes_used: self.vertex_region.used(),
            vertex_capacity: self.vertex_region.capacity(),
            index_bytes_used: self.index_region.used(),
            index_capacity: self.index_region.capacity(),
            mesh_count: self.allocations.len(),
        }
    }
}

impl Drop for GeometryArena {
    fn drop(&mut self) {
        if let Err(e) = self.backend.device_wait_idle() {
            log::error!("device wait idle failed while destroying geometry arena: {}", e);
        }
        self.backend.destroy_buffer(self.buffer);
    }
}

fn element_offset(region: &ArenaRegion, reservation: Reservation, element_size: u64) -> u32 {
    let relative = reservation.offset - region.base();
    debug_assert_eq!(relative % element_size, 0);
    (relative / element_size) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::resources::{CachedResource, MeshDescription};
    use glam::Vec3;

    fn setup(config: ArenaConfig) -> (Arc<HeadlessBackend>, StagingTransfer, GeometryArena) {
        let backend = Arc::new(HeadlessBackend::new(8, 8, 2).unwrap());
        let transfer = StagingTransfer::new(backend.clone()).unwrap();
        let arena = GeometryArena::new(backend.clone(), config).unwrap();
        (backend, transfer, arena)
    }

    fn mesh(vertices: usize, triangles: usize) -> Mesh {
        let positions = (0..vertices).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect();
        let indices = (0..triangles * 3).map(|i| (i % vertices) as u32).collect();
        Mesh::from_description(MeshDescription::new("test", positions, indices)).unwrap()
    }

    #[test]
    fn test_data_lands_at_recorded_offsets() {
        let (backend, mut transfer, mut arena) = setup(ArenaConfig::new(1024, 256));
        let first = mesh(3, 1);
        let second = mesh(4, 2);

        let a = arena
            .upload_mesh(&mut transfer, first.content_hash(), &first)
            .unwrap();
        let b = arena
            .upload_mesh(&mut transfer, second.content_hash(), &second)
            .unwrap();

        assert_eq!((a.vertex_offset, a.index_offset), (0, 0));
        assert_eq!((b.vertex_offset, b.index_offset), (3, 3));

        let binding = arena.binding();
        let stored_vertices = backend
            .read_buffer(binding.buffer, b.vertex_offset as u64 * Vertex::SIZE, 4 * Vertex::SIZE)
            .unwrap();
        assert_eq!(stored_vertices, second.vertex_bytes());
        let stored_indices = backend
            .read_buffer(binding.buffer, binding.index_offset + b.index_offset as u64 * 4, 24)
            .unwrap();
        assert_eq!(stored_indices, second.index_bytes());
    }

    #[test]
    fn test_reupload_returns_existing_allocation() {
        let (backend, mut transfer, mut arena) = setup(ArenaConfig::new(1024, 256));
        let m = mesh(3, 1);
        let first = arena.upload_mesh(&mut transfer, m.content_hash(), &m).unwrap();
        let again = arena.upload_mesh(&mut transfer, m.content_hash(), &m).unwrap();
        assert_eq!(first, again);
        assert_eq!(backend.submission_log().len(), 1);
        assert_eq!(arena.stats().vertex_bytes_used, 3 * Vertex::SIZE);
    }

    #[test]
    fn test_overflow_leaves_arena_unchanged() {
        // Room for exactly 4 vertices
        let (backend, mut transfer, mut arena) = setup(ArenaConfig::new(176, 64));
        let fits = mesh(3, 1);
        arena
            .upload_mesh(&mut transfer, fits.content_hash(), &fits)
            .unwrap();

        let too_big = mesh(2, 1);
        let err = arena
            .upload_mesh(&mut transfer, too_big.content_hash(), &too_big)
            .unwrap_err();
        assert!(matches!(
            err,
            GraphicsError::ArenaCapacityExceeded {
                region: "vertex",
                requested: 88,
                offset: 132,
                limit: 176
            }
        ));
        assert!(err.is_fatal());
        assert_eq!(arena.vertex_region().write_offset(), 132);
        assert_eq!(arena.index_region().used(), 12);
        assert!(!arena.contains(too_big.content_hash()));
        assert_eq!(backend.submission_log().len(), 1);
    }

    #[test]
    fn test_index_overflow() {
        let (_backend, mut transfer, mut arena) = setup(ArenaConfig::new(1024, 16));
        let m = mesh(3, 2);
        let err = arena
            .upload_mesh(&mut transfer, m.content_hash(), &m)
            .unwrap_err();
        assert!(matches!(
            err,
            GraphicsError::ArenaCapacityExceeded { region: "index", .. }
        ));
        assert_eq!(arena.vertex_region().used(), 0);
    }

    #[test]
    fn test_empty_mesh_takes_no_space() {
        let (_backend, mut transfer, mut arena) = setup(ArenaConfig::new(1024, 256));
        let empty = Mesh::default_resource();
        let allocation = arena
            .upload_mesh(&mut transfer, empty.content_hash(), &empty)
            .unwrap();
        assert_eq!(allocation.index_count, 0);
        assert_eq!(arena.stats().vertex_bytes_used, 0);
        assert_eq!(arena.stats().mesh_count, 1);
    }

    #[test]
    fn test_unknown_mesh() {
        let (_backend, _transfer, arena) = setup(ArenaConfig::default());
        assert!(matches!(
            arena.get_allocation(Handle::from_id(5)),
            Err(GraphicsError::UnknownMesh(5))
        ));
    }

    #[test]
    fn test_invalid_config() {
        assert!(ArenaConfig::new(0, 16).validate().is_err());
        assert!(ArenaConfig::new(18, 16).validate().is_err());
        assert!(ArenaConfig::new(44, 16).validate().is_ok());
    }

    #[test]
    fn test_drop_releases_buffer() {
        let (backend, transfer, arena) = setup(ArenaConfig::new(64, 64));
        drop(arena);
        drop(transfer);
        assert_eq!(backend.stats().live_buffers, 0);
    }
}
