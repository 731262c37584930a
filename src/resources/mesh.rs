//! Mesh data structures and generation

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use static_assertions::const_assert_eq;

use super::cache::CachedResource;
use super::handle::Handle;
use super::hash::ContentHasher;
use crate::error::{GraphicsError, GraphicsResult};

/// Vertex layout stored in the geometry arena.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
    pub normal: Vec3,
    pub texcoord: Vec2,
}

const_assert_eq!(std::mem::size_of::<Vertex>(), 44);
const_assert_eq!(std::mem::size_of::<Vertex>() % 4, 0);

impl Vertex {
    /// Stride in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Vertex>() as u64;
}

/// Source geometry as supplied by an importer.
///
/// Only positions and indices are required. Missing colors default to white,
/// missing texture coordinates to zero, and missing normals are generated.
#[derive(Debug, Clone, Default)]
pub struct MeshDescription {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub colors: Option<Vec<Vec3>>,
    pub normals: Option<Vec<Vec3>>,
    pub texcoords: Option<Vec<Vec2>>,
    pub indices: Vec<u32>,
}

impl MeshDescription {
    pub fn new(name: impl Into<String>, positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            positions,
            indices,
            ..Default::default()
        }
    }

    pub fn with_colors(mut self, colors: Vec<Vec3>) -> Self {
        self.colors = Some(colors);
        self
    }

    pub fn with_normals(mut self, normals: Vec<Vec3>) -> Self {
        self.normals = Some(normals);
        self
    }

    pub fn with_texcoords(mut self, texcoords: Vec<Vec2>) -> Self {
        self.texcoords = Some(texcoords);
        self
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];
        let corners = [
            (Vec2::new(-0.5, -0.5), Vec2::new(0.0, 1.0)),
            (Vec2::new(0.5, -0.5), Vec2::new(1.0, 1.0)),
            (Vec2::new(0.5, 0.5), Vec2::new(1.0, 0.0)),
            (Vec2::new(-0.5, 0.5), Vec2::new(0.0, 0.0)),
        ];

        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut texcoords = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);

        for (face, (normal, right, up)) in faces.into_iter().enumerate() {
            for (corner, uv) in corners {
                positions.push(normal * 0.5 + right * corner.x + up * corner.y);
                normals.push(normal);
                texcoords.push(uv);
            }
            // Two triangles per face
            let base = face as u32 * 4;
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new("cube", positions, indices)
            .with_normals(normals)
            .with_texcoords(texcoords)
    }

    /// Create a unit quad in the XY plane facing +Z
    pub fn quad() -> Self {
        let positions = vec![
            Vec3::new(-0.5, -0.5, 0.0),
            Vec3::new(0.5, -0.5, 0.0),
            Vec3::new(0.5, 0.5, 0.0),
            Vec3::new(-0.5, 0.5, 0.0),
        ];
        let texcoords = vec![
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 0.0),
        ];
        Self::new("quad", positions, vec![0, 1, 2, 0, 2, 3])
            .with_normals(vec![Vec3::Z; 4])
            .with_texcoords(texcoords)
    }

    fn validate(&self) -> GraphicsResult<()> {
        let invalid = |reason: String| GraphicsError::InvalidMesh {
            name: self.name.clone(),
            reason,
        };
        let vertex_count = self.positions.len();

        if self.indices.len() % 3 != 0 {
            return Err(invalid(format!(
                "{} indices do not form a triangle list",
                self.indices.len()
            )));
        }
        if let Some(index) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(invalid(format!(
                "index {} out of range for {} vertices",
                index, vertex_count
            )));
        }
        let attributes = [
            ("colors", self.colors.as_ref().map(Vec::len)),
            ("normals", self.normals.as_ref().map(Vec::len)),
            ("texcoords", self.texcoords.as_ref().map(Vec::len)),
        ];
        for (attribute, len) in attributes {
            if let Some(len) = len {
                if len != vertex_count {
                    return Err(invalid(format!(
                        "{} {} for {} positions",
                        len, attribute, vertex_count
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Area-weighted per-vertex normals. Vertices with no non-degenerate
/// adjacent triangle get +Y.
pub fn generate_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut accumulated = vec![Vec3::ZERO; positions.len()];
    for triangle in indices.chunks_exact(3) {
        let [a, b, c] = [
            triangle[0] as usize,
            triangle[1] as usize,
            triangle[2] as usize,
        ];
        // Cross product length is twice the triangle area
        let face = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        accumulated[a] += face;
        accumulated[b] += face;
        accumulated[c] += face;
    }
    accumulated
        .into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Y))
        .collect()
}

/// An imported mesh with vertex and index data
#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Build a mesh from a description, validating it and generating
    /// normals when the description has none.
    pub fn from_description(desc: MeshDescription) -> GraphicsResult<Self> {
        desc.validate()?;

        let MeshDescription {
            name,
            positions,
            colors,
            normals,
            texcoords,
            indices,
        } = desc;

        let normals = normals.unwrap_or_else(|| {
            log::trace!("generating normals for mesh '{}'", name);
            generate_normals(&positions, &indices)
        });

        let vertices = positions
            .iter()
            .enumerate()
            .map(|(i, &position)| Vertex {
                position,
                color: colors.as_ref().map(|c| c[i]).unwrap_or(Vec3::ONE),
                normal: normals[i],
                texcoord: texcoords.as_ref().map(|t| t[i]).unwrap_or(Vec2::ZERO),
            })
            .collect();

        Ok(Self {
            name,
            vertices,
            indices,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Get vertex data as bytes
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Get index data as bytes
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

impl CachedResource for Mesh {
    type Description = MeshDescription;
    const KIND: &'static str = "mesh";

    fn build(desc: MeshDescription) -> GraphicsResult<Self> {
        Mesh::from_description(desc)
    }

    /// Vertex and index content only; the display name is not part of the
    /// identity.
    fn content_hash(&self) -> Handle<Self> {
        let mut hasher = ContentHasher::new();
        hasher
            .write_slice(&self.vertices)
            .write_slice(&self.indices);
        hasher.finish_handle()
    }

    fn same_content(&self, other: &Self) -> bool {
        self.vertex_bytes() == other.vertex_bytes() && self.indices == other.indices
    }

    fn default_resource() -> Self {
        Self {
            name: "default".to_string(),
            vertices: Vec::new(),
            indices: Vec::new(),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> MeshDescription {
        MeshDescription::new(
            "triangle",
            vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            vec![0, 1, 2],
        )
    }

    #[test]
    fn test_generated_normals_face_the_winding() {
        let mesh = Mesh::from_description(triangle()).unwrap();
        for vertex in &mesh.vertices {
            assert_eq!(vertex.normal, Vec3::Z);
            assert_eq!(vertex.color, Vec3::ONE);
        }
    }

    #[test]
    fn test_degenerate_normals_fall_back_to_up() {
        let normals = generate_normals(&[Vec3::ZERO, Vec3::X, Vec3::X * 2.0, Vec3::Z], &[0, 1, 2]);
        assert_eq!(normals, vec![Vec3::Y; 4]);
    }

    #[test]
    fn test_validation() {
        let mut bad = triangle();
        bad.indices.push(0);
        assert!(matches!(
            Mesh::from_description(bad),
            Err(GraphicsError::InvalidMesh { .. })
        ));

        let mut bad = triangle();
        bad.indices[2] = 3;
        assert!(matches!(
            Mesh::from_description(bad),
            Err(GraphicsError::InvalidMesh { .. })
        ));

        let bad = triangle().with_texcoords(vec![Vec2::ZERO]);
        assert!(matches!(
            Mesh::from_description(bad),
            Err(GraphicsError::InvalidMesh { .. })
        ));
    }

    #[test]
    fn test_primitives() {
        let cube = Mesh::from_description(MeshDescription::cube()).unwrap();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
        assert_eq!(cube.vertex_bytes().len(), 24 * 44);

        let quad = Mesh::from_description(MeshDescription::quad()).unwrap();
        assert_eq!(quad.index_count(), 6);
    }

    #[test]
    fn test_hash_ignores_name() {
        let a = Mesh::from_description(triangle()).unwrap();
        let mut renamed = triangle();
        renamed.name = "other".to_string();
        let b = Mesh::from_description(renamed).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
    }
}
