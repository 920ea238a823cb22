//! Core types for the rasterizer

use std::ops::{Add, Mul};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::math::{Vec2, Vec3A};
use crate::error::{RasterError, Result};

/// RGBA color (0-255 per channel), laid out in the byte order the
/// presentation layer uploads.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable,
)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };
    pub const RED: Color = Color { r: 255, g: 0, b: 0, a: 255 };
    pub const GREEN: Color = Color { r: 0, g: 255, b: 0, a: 255 };
    pub const BLUE: Color = Color { r: 0, g: 0, b: 255, a: 255 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn with_alpha(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Apply shading (multiply by intensity 0.0-1.0)
    pub fn shade(self, intensity: f32) -> Self {
        let i = intensity.clamp(0.0, 1.0);
        Self {
            r: (self.r as f32 * i) as u8,
            g: (self.g as f32 * i) as u8,
            b: (self.b as f32 * i) as u8,
            a: self.a,
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Per-vertex data the rasterizer interpolates.
///
/// `position` and `normal` are in view space (camera at the origin,
/// looking down -Z). `pixel` is the unclamped screen position; it is NaN
/// when the vertex could not be projected this frame.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: Vec3A,
    pub normal: Vec3A,
    pub uv: Vec2,
    pub pixel: Vec2,
}

impl Vertex {
    pub fn new(position: Vec3A, normal: Vec3A, uv: Vec2, pixel: Vec2) -> Self {
        Self { position, normal, uv, pixel }
    }

    /// Whether the vertex shader managed to place this vertex on screen.
    #[inline]
    pub fn is_projectable(&self) -> bool {
        self.pixel.is_finite()
    }
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            position: Vec3A::ZERO,
            normal: Vec3A::Y,
            uv: Vec2::ZERO,
            pixel: Vec2::NAN,
        }
    }
}

impl Add for Vertex {
    type Output = Vertex;
    #[inline]
    fn add(self, other: Vertex) -> Vertex {
        Vertex {
            position: self.position + other.position,
            normal: self.normal + other.normal,
            uv: self.uv + other.uv,
            pixel: self.pixel + other.pixel,
        }
    }
}

impl Mul<f32> for Vertex {
    type Output = Vertex;
    #[inline]
    fn mul(self, s: f32) -> Vertex {
        Vertex {
            position: self.position * s,
            normal: self.normal * s,
            uv: self.uv * s,
            pixel: self.pixel * s,
        }
    }
}

/// Source attributes of one mesh vertex, in object/world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceVertex {
    pub position: Vec3A,
    pub normal: Vec3A,
    pub uv: Vec2,
}

/// Three indices into the owning object's vertex array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleIndices(pub [u32; 3]);

impl TriangleIndices {
    #[inline]
    pub fn get(self) -> [usize; 3] {
        [self.0[0] as usize, self.0[1] as usize, self.0[2] as usize]
    }
}

/// Opaque texture lookup handed to fragment shaders.
pub trait TextureSampler: Send + Sync {
    /// Color at `u, v` in `[0, 1)`.
    fn get_point(&self, u: f32, v: f32) -> Color;
}

/// Simple texture (array of colors)
#[derive(Debug, Clone)]
pub struct Texture {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<Color>,
    pub name: String,
}

impl Texture {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![Color::WHITE; width * height],
            name: String::new(),
        }
    }

    /// Load texture from any image file the `image` crate can decode
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|e| RasterError::Image {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let texture = Self::from_image(img, name);
        log::info!("Loaded texture: {} ({}x{})", texture.name, texture.width, texture.height);
        Ok(texture)
    }

    /// Load texture from raw encoded bytes
    pub fn from_bytes(bytes: &[u8], name: String) -> Result<Self> {
        let img = image::load_from_memory(bytes).map_err(|e| RasterError::Image {
            path: name.clone().into(),
            message: e.to_string(),
        })?;
        Ok(Self::from_image(img, name))
    }

    fn from_image(img: image::DynamicImage, name: String) -> Self {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let pixels = rgba
            .pixels()
            .map(|p| Color::with_alpha(p[0], p[1], p[2], p[3]))
            .collect();

        Self {
            width: width as usize,
            height: height as usize,
            pixels,
            name,
        }
    }

    /// Create a checkerboard test texture
    pub fn checkerboard(width: usize, height: usize, color1: Color, color2: Color) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let checker = ((x / 4) + (y / 4)) % 2 == 0;
                pixels.push(if checker { color1 } else { color2 });
            }
        }
        Self { width, height, pixels, name: "checkerboard".to_string() }
    }

    /// Nearest-texel lookup with wrap-around
    pub fn sample(&self, u: f32, v: f32) -> Color {
        if self.pixels.is_empty() {
            return Color::BLACK;
        }
        let tx = ((u.rem_euclid(1.0) * self.width as f32) as usize).min(self.width - 1);
        let ty = ((v.rem_euclid(1.0) * self.height as f32) as usize).min(self.height - 1);
        self.pixels[ty * self.width + tx]
    }

    /// Get pixel at x,y coordinates
    pub fn get_pixel(&self, x: usize, y: usize) -> Color {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x]
        } else {
            Color::BLACK
        }
    }
}

impl TextureSampler for Texture {
    fn get_point(&self, u: f32, v: f32) -> Color {
        // Image rows run top to bottom, texture v runs bottom to top
        self.sample(u, 1.0 - v)
    }
}
