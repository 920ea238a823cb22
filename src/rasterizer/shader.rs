//! Vertex and fragment shader interfaces plus the bundled variants
//!
//! A vertex shader turns an object's source vertices into view/screen
//! vertices for the current camera. A fragment shader turns one
//! interpolated vertex into a color. Both are plain traits; whatever a
//! shader needs is passed in, never reached for.

use std::sync::Arc;

use super::geometry::RenderingGeometry;
use super::math::{pow_int, Vec3A};
use super::types::{Color, SourceVertex, TextureSampler, Vertex};

/// Inclusive range of screen rows an object's vertices touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBounds {
    pub lower: usize,
    pub upper: usize,
}

impl RowBounds {
    /// Clamp a `[min_y, max_y]` pixel-row span to the screen. `None` when
    /// the span misses every row.
    pub fn from_span(min_y: f32, max_y: f32, height: usize) -> Option<Self> {
        if !(min_y <= max_y) || height == 0 {
            return None;
        }
        let last = (height - 1) as f32;
        if max_y < 0.0 || min_y > last {
            return None;
        }
        Some(Self {
            lower: min_y.max(0.0) as usize,
            upper: max_y.min(last) as usize,
        })
    }

    pub fn rows(&self) -> usize {
        self.upper - self.lower + 1
    }

    pub fn contains(&self, row: usize) -> bool {
        (self.lower..=self.upper).contains(&row)
    }
}

/// Row bounds over every projectable vertex.
pub fn row_bounds(vertices: &[Vertex], height: usize) -> Option<RowBounds> {
    let (min_y, max_y) = vertices
        .iter()
        .filter(|v| v.is_projectable())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v.pixel.y), hi.max(v.pixel.y))
        });
    RowBounds::from_span(min_y, max_y, height)
}

/// Per-object vertex transform.
///
/// Must fully recompute `vertices` (same length as `source`) every time it
/// runs; the returned bounds cover the rows the object can touch.
pub trait VertexShader: Send + Sync {
    fn update(
        &mut self,
        source: &[SourceVertex],
        geometry: &RenderingGeometry,
        vertices: &mut [Vertex],
    ) -> Option<RowBounds>;
}

/// Applies the camera transform to every vertex.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardVertexShader;

impl VertexShader for StandardVertexShader {
    fn update(
        &mut self,
        source: &[SourceVertex],
        geometry: &RenderingGeometry,
        vertices: &mut [Vertex],
    ) -> Option<RowBounds> {
        debug_assert_eq!(source.len(), vertices.len());

        let mut min_y = f32::INFINITY;
        let mut max_y = f32::NEG_INFINITY;
        for (src, out) in source.iter().zip(vertices.iter_mut()) {
            *out = geometry.transform_geometry(src);
            if out.is_projectable() {
                min_y = min_y.min(out.pixel.y);
                max_y = max_y.max(out.pixel.y);
            }
        }
        RowBounds::from_span(min_y, max_y, geometry.height())
    }
}

/// Per-pixel color computation. Called concurrently from every worker.
pub trait FragmentShader: Send + Sync {
    fn shade(&self, fragment: &Vertex, geometry: &RenderingGeometry) -> Color;
}

/// Cosine of the angle between two vectors, clamped at zero.
#[inline]
fn cos_positive(a: Vec3A, b: Vec3A) -> f32 {
    let denom = (a.length_squared() * b.length_squared()).sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    (a.dot(b) / denom).max(0.0)
}

/// Textured ambient + diffuse + specular point-light shading.
pub struct PhongShader {
    texture: Arc<dyn TextureSampler>,
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub shininess: u32,
}

impl PhongShader {
    pub fn new(texture: Arc<dyn TextureSampler>) -> Self {
        Self {
            texture,
            ambient: 0.2,
            diffuse: 0.4,
            specular: 0.4,
            shininess: 50,
        }
    }

    /// Light intensity at a fragment, before texturing.
    pub fn intensity(&self, fragment: &Vertex, geometry: &RenderingGeometry) -> f32 {
        let light = geometry.light_pos() - fragment.position;
        let diff = cos_positive(fragment.normal, light);

        // Camera sits at the view-space origin
        let halfway = light - fragment.position;
        let spec = pow_int(cos_positive(fragment.normal, halfway), self.shininess);

        self.ambient + self.diffuse * diff + self.specular * spec
    }
}

impl FragmentShader for PhongShader {
    fn shade(&self, fragment: &Vertex, geometry: &RenderingGeometry) -> Color {
        let base = self.texture.get_point(fragment.uv.x, fragment.uv.y);
        base.shade(self.intensity(fragment, geometry))
    }
}

/// Texture lookup only (skyboxes, fullbright surfaces).
pub struct UnlitShader {
    texture: Arc<dyn TextureSampler>,
}

impl UnlitShader {
    pub fn new(texture: Arc<dyn TextureSampler>) -> Self {
        Self { texture }
    }
}

impl FragmentShader for UnlitShader {
    fn shade(&self, fragment: &Vertex, _geometry: &RenderingGeometry) -> Color {
        self.texture.get_point(fragment.uv.x, fragment.uv.y)
    }
}

/// Constant color.
#[derive(Debug, Clone, Copy)]
pub struct SolidShader(pub Color);

impl FragmentShader for SolidShader {
    fn shade(&self, _fragment: &Vertex, _geometry: &RenderingGeometry) -> Color {
        self.0
    }
}

/// Grayscale view depth: white at the near plane, black at the far plane.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthShader;

impl FragmentShader for DepthShader {
    fn shade(&self, fragment: &Vertex, geometry: &RenderingGeometry) -> Color {
        let distance = -fragment.position.z;
        let t = (distance - geometry.near()) / (geometry.far() - geometry.near());
        let v = ((1.0 - t.clamp(0.0, 1.0)) * 255.0) as u8;
        Color::new(v, v, v)
    }
}
