//! Scene objects and the normalized mesh form they are built from

use std::path::Path;

use super::geometry::RenderingGeometry;
use super::math::{normalize_or_zero, Mat4, Vec2, Vec3, Vec3A};
use super::shader::{FragmentShader, RowBounds, VertexShader};
use super::types::{SourceVertex, TriangleIndices, Vertex};
use crate::error::{RasterError, Result};

/// Default number of triangles handed to one rasterization task.
pub const DEFAULT_TRIANGLES_PER_TASK: usize = 64;

/// Mesh in the normalized form the core consumes: one attribute set per
/// vertex and a flat, already triangulated index list.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Build from explicit arrays. Missing normals default to +Y and
    /// missing UVs to (0, 0); present attribute arrays must match the
    /// position count.
    pub fn from_arrays(
        positions: Vec<Vec3>,
        normals: Option<Vec<Vec3>>,
        uvs: Option<Vec<Vec2>>,
        indices: Vec<u32>,
    ) -> Result<Self> {
        let count = positions.len();
        let normals = normals.unwrap_or_else(|| vec![Vec3::Y; count]);
        let uvs = uvs.unwrap_or_else(|| vec![Vec2::ZERO; count]);

        let mesh = Self { positions, normals, uvs, indices };
        mesh.validate()?;
        Ok(mesh)
    }

    /// Load a Wavefront OBJ file, merging every object in it.
    ///
    /// Faces are triangulated on load; quads split along the 0-2 diagonal.
    pub fn load_obj<P: AsRef<Path>>(path: P, scale: f32) -> Result<Self> {
        let path = path.as_ref();
        let load_options = tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        };

        let (models, _materials) = tobj::load_obj(path, &load_options).map_err(|e| RasterError::Obj {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut mesh = MeshData::default();
        let mut clamped_uvs = 0usize;

        for model in &models {
            let m = &model.mesh;
            let offset = mesh.positions.len() as u32;
            let count = m.positions.len() / 3;
            let has_uvs = m.texcoords.len() >= count * 2;
            let has_normals = m.normals.len() >= count * 3;

            if !has_normals {
                log::warn!("Mesh '{}' has no normals, using +Y", model.name);
            }

            for i in 0..count {
                mesh.positions.push(
                    Vec3::new(m.positions[i * 3], m.positions[i * 3 + 1], m.positions[i * 3 + 2]) * scale,
                );
                mesh.normals.push(if has_normals {
                    Vec3::new(m.normals[i * 3], m.normals[i * 3 + 1], m.normals[i * 3 + 2]).normalize_or_zero()
                } else {
                    Vec3::Y
                });
                let uv = if has_uvs {
                    Vec2::new(m.texcoords[i * 2], m.texcoords[i * 2 + 1])
                } else {
                    Vec2::ZERO
                };
                if uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0 {
                    clamped_uvs += 1;
                }
                mesh.uvs.push(uv.clamp(Vec2::splat(0.001), Vec2::splat(0.999)));
            }

            mesh.indices.extend(m.indices.iter().map(|&i| i + offset));
        }

        if clamped_uvs > 0 {
            log::warn!("{}: {} texture coordinates outside [0, 1] clamped", path.display(), clamped_uvs);
        }

        mesh.validate()?;
        log::info!(
            "Loaded mesh {}: {} vertices, {} triangles",
            path.display(),
            mesh.vertex_count(),
            mesh.triangle_count()
        );
        Ok(mesh)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Uniformly scale positions.
    pub fn scaled(mut self, scale: f32) -> Self {
        for p in &mut self.positions {
            *p *= scale;
        }
        self
    }

    /// Apply a placement transform to positions and normals.
    pub fn transformed(mut self, transform: Mat4) -> Self {
        let normal_matrix = transform.inverse().transpose();
        for p in &mut self.positions {
            *p = transform.transform_point3(*p);
        }
        for n in &mut self.normals {
            *n = normal_matrix.transform_vector3(*n).normalize_or_zero();
        }
        self
    }

    /// Check that the mesh is non-empty, fully triangulated and in range.
    pub fn validate(&self) -> Result<()> {
        let count = self.positions.len();
        if count == 0 || self.indices.is_empty() {
            return Err(RasterError::InvalidMesh("mesh has no vertices or faces".into()));
        }
        if self.normals.len() != count || self.uvs.len() != count {
            return Err(RasterError::InvalidMesh(format!(
                "attribute count mismatch: {} positions, {} normals, {} uvs",
                count,
                self.normals.len(),
                self.uvs.len()
            )));
        }
        if self.indices.len() % 3 != 0 {
            return Err(RasterError::InvalidMesh(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= count) {
            return Err(RasterError::InvalidMesh(format!(
                "index {} out of range for {} vertices",
                bad, count
            )));
        }
        Ok(())
    }

    /// Create a unit cube (2x2x2, centered) with per-face normals and UVs
    pub fn cube() -> Self {
        let positions = [
            // Front face
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(-1.0, 1.0, 1.0),
            // Back face
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(-1.0, 1.0, -1.0),
            Vec3::new(1.0, 1.0, -1.0),
            // Top face
            Vec3::new(-1.0, 1.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(1.0, 1.0, -1.0),
            Vec3::new(-1.0, 1.0, -1.0),
            // Bottom face
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(-1.0, -1.0, 1.0),
            // Right face
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(1.0, 1.0, -1.0),
            Vec3::new(1.0, 1.0, 1.0),
            // Left face
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(-1.0, 1.0, 1.0),
            Vec3::new(-1.0, 1.0, -1.0),
        ];

        let face_normals = [Vec3::Z, Vec3::NEG_Z, Vec3::Y, Vec3::NEG_Y, Vec3::X, Vec3::NEG_X];
        let corner_uvs = [
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ];

        let mut mesh = MeshData::default();
        for (face, normal) in face_normals.iter().enumerate() {
            let base = face * 4;
            for i in 0..4 {
                mesh.positions.push(positions[base + i]);
                mesh.normals.push(*normal);
                mesh.uvs.push(corner_uvs[i]);
            }

            // Quad as two triangles sharing the 0-2 diagonal
            let b = base as u32;
            mesh.indices.extend_from_slice(&[b, b + 1, b + 2, b + 2, b, b + 3]);
        }
        mesh
    }
}

/// A renderable object: source mesh, per-frame vertices and the shader
/// pair that processes them.
pub struct SceneObject {
    source: Vec<SourceVertex>,
    vertices: Vec<Vertex>,
    triangles: Vec<TriangleIndices>,
    triangles_per_task: usize,
    bounds: Option<RowBounds>,
    vertex_shader: Option<Box<dyn VertexShader>>,
    fragment_shader: Option<Box<dyn FragmentShader>>,
}

impl SceneObject {
    pub fn new(mesh: MeshData) -> Result<Self> {
        Self::with_task_size(mesh, DEFAULT_TRIANGLES_PER_TASK)
    }

    /// `triangles_per_task` sets how many triangles one pool task draws.
    pub fn with_task_size(mesh: MeshData, triangles_per_task: usize) -> Result<Self> {
        mesh.validate()?;
        if triangles_per_task == 0 {
            return Err(RasterError::InvalidMesh("triangles_per_task must be at least 1".into()));
        }

        let source: Vec<SourceVertex> = mesh
            .positions
            .iter()
            .zip(&mesh.normals)
            .zip(&mesh.uvs)
            .map(|((&p, &n), &uv)| SourceVertex {
                position: Vec3A::from(p),
                normal: normalize_or_zero(Vec3A::from(n)),
                uv,
            })
            .collect();

        let triangles = mesh
            .indices
            .chunks_exact(3)
            .map(|t| TriangleIndices([t[0], t[1], t[2]]))
            .collect();

        Ok(Self {
            vertices: vec![Vertex::default(); source.len()],
            source,
            triangles,
            triangles_per_task,
            bounds: None,
            vertex_shader: None,
            fragment_shader: None,
        })
    }

    /// Attach the shader pair. Allowed exactly once per object.
    pub fn attach_shaders(
        &mut self,
        vertex_shader: Box<dyn VertexShader>,
        fragment_shader: Box<dyn FragmentShader>,
    ) -> Result<()> {
        if self.vertex_shader.is_some() || self.fragment_shader.is_some() {
            return Err(RasterError::ShadersAlreadyAttached);
        }
        self.vertex_shader = Some(vertex_shader);
        self.fragment_shader = Some(fragment_shader);
        Ok(())
    }

    /// Builder form of [`attach_shaders`](Self::attach_shaders).
    pub fn with_shaders(
        mut self,
        vertex_shader: Box<dyn VertexShader>,
        fragment_shader: Box<dyn FragmentShader>,
    ) -> Result<Self> {
        self.attach_shaders(vertex_shader, fragment_shader)?;
        Ok(self)
    }

    pub fn has_shaders(&self) -> bool {
        self.vertex_shader.is_some() && self.fragment_shader.is_some()
    }

    /// Re-run the vertex shader against the current camera.
    ///
    /// Without a vertex shader every vertex is left unprojectable, so the
    /// object draws nothing.
    pub fn update(&mut self, geometry: &RenderingGeometry) -> Option<RowBounds> {
        self.bounds = match self.vertex_shader.as_mut() {
            Some(vs) => vs.update(&self.source, geometry, &mut self.vertices),
            None => {
                self.vertices.fill(Vertex::default());
                None
            }
        };
        self.bounds
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn source(&self) -> &[SourceVertex] {
        &self.source
    }

    pub fn triangles(&self) -> &[TriangleIndices] {
        &self.triangles
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn triangles_per_task(&self) -> usize {
        self.triangles_per_task
    }

    /// Rows touched after the last [`update`](Self::update).
    pub fn bounds(&self) -> Option<RowBounds> {
        self.bounds
    }

    pub fn fragment_shader(&self) -> Option<&dyn FragmentShader> {
        self.fragment_shader.as_deref()
    }

    /// The three vertices of triangle `index`.
    #[inline]
    pub fn triangle(&self, index: usize) -> [&Vertex; 3] {
        let [a, b, c] = self.triangles[index].get();
        [&self.vertices[a], &self.vertices[b], &self.vertices[c]]
    }
}
