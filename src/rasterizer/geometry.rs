//! Camera pose, projection and the per-vertex transform
//!
//! View space is right-handed with the camera at the origin looking down
//! -Z, so everything visible has negative z and a larger z is closer.

use super::math::{normalize_or_zero, Mat3A, Mat4, Vec2, Vec3, Vec3A};
use super::types::{SourceVertex, Vertex};
use crate::error::{RasterError, Result};

/// Camera and light state for the current frame.
///
/// Mutated only between frames; every vertex shader reads it and the
/// rasterizer workers share it read-only.
#[derive(Debug, Clone)]
pub struct RenderingGeometry {
    width: usize,
    height: usize,
    near: f32,
    far: f32,
    fov: f32,
    aspect: f32,

    camera: Vec3,
    target: Vec3,
    up: Vec3,

    light_source: Vec3,
    light_view: Vec3A,

    view: Mat4,
    rotation: Mat3A,
    perspective: Mat4,
}

impl RenderingGeometry {
    /// `fov` is the vertical field of view in radians.
    pub fn new(width: usize, height: usize, near: f32, far: f32, fov: f32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RasterError::InvalidDimensions { width, height });
        }
        if !(near > 0.0 && far > near) || !far.is_finite() {
            return Err(RasterError::InvalidClipPlanes { near, far });
        }
        if !(fov > 0.0 && fov < std::f32::consts::PI) {
            return Err(RasterError::InvalidFieldOfView(fov));
        }

        let aspect = width as f32 / height as f32;
        // Flip Y so that +Y in view space lands on the top rows
        let perspective = Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
            * Mat4::perspective_rh_gl(fov, aspect, near, far);

        let mut geom = Self {
            width,
            height,
            near,
            far,
            fov,
            aspect,
            camera: Vec3::new(0.0, 0.0, 1.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            light_source: Vec3::ZERO,
            light_view: Vec3A::ZERO,
            view: Mat4::IDENTITY,
            rotation: Mat3A::IDENTITY,
            perspective,
        };
        geom.update_transform();
        Ok(geom)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn camera_pos(&self) -> Vec3 {
        self.camera
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    /// Light position in world space.
    pub fn light_source(&self) -> Vec3 {
        self.light_source
    }

    /// Light position in view space, as fragment shaders see it.
    pub fn light_pos(&self) -> Vec3A {
        self.light_view
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.perspective
    }

    pub fn set_light_pos(&mut self, pos: Vec3) {
        self.light_source = pos;
        self.update_transform();
    }

    /// Place the camera at `pos` looking at `target`.
    ///
    /// Degenerate poses (target on the camera, up parallel to the view
    /// direction) are ignored and the previous pose is kept.
    pub fn look_at(&mut self, pos: Vec3, target: Vec3, up: Vec3) {
        let forward = target - pos;
        if forward.length_squared() < f32::EPSILON || forward.cross(up).length_squared() < f32::EPSILON {
            log::warn!("Ignoring degenerate camera pose {:?} -> {:?}", pos, target);
            return;
        }
        self.camera = pos;
        self.target = target;
        self.up = up;
        self.update_transform();
    }

    /// Translate camera and target together along the camera's own
    /// right / up / back axes.
    pub fn move_cam(&mut self, dx: f32, dy: f32, dz: f32) {
        let delta = self.local_to_world(dx, dy, dz);
        self.camera += delta;
        self.target += delta;
        self.update_transform();
    }

    /// Move only the look-at target along the camera's own axes, turning
    /// the camera in place.
    pub fn move_at(&mut self, dx: f32, dy: f32, dz: f32) {
        let target = self.target + self.local_to_world(dx, dy, dz);
        self.look_at(self.camera, target, self.up);
    }

    fn local_to_world(&self, dx: f32, dy: f32, dz: f32) -> Vec3 {
        // Rows of the view rotation are the camera axes in world space
        let axes = self.rotation.transpose();
        Vec3::from(axes * Vec3A::new(dx, dy, dz))
    }

    fn update_transform(&mut self) {
        self.view = Mat4::look_at_rh(self.camera, self.target, self.up);
        self.rotation = Mat3A::from_mat4(self.view);
        self.light_view = Vec3A::from(self.view.transform_point3(self.light_source));
    }

    /// Source vertex to view space plus pixel position.
    ///
    /// Vertices on or in front of the near plane cannot be projected; they
    /// come back with a NaN pixel position and the rasterizer drops every
    /// triangle that uses them.
    #[inline]
    pub fn transform_geometry(&self, src: &SourceVertex) -> Vertex {
        let position = self.view.transform_point3a(src.position);
        let normal = normalize_or_zero(self.rotation * src.normal);

        let pixel = if position.z > -self.near {
            Vec2::NAN
        } else {
            let clip = self.perspective * position.extend(1.0);
            let ndc = Vec2::new(clip.x, clip.y) / clip.w;
            self.ndc_to_pixel(ndc)
        };

        Vertex::new(position, normal, src.uv, pixel)
    }

    /// `round(ndc * dim/2 + (dim/2 - 0.5))` per axis: pixel (0, 0) is the
    /// top-left sample.
    #[inline]
    pub fn ndc_to_pixel(&self, ndc: Vec2) -> Vec2 {
        let half = Vec2::new(self.width as f32, self.height as f32) * 0.5;
        (ndc * half + (half - 0.5)).round()
    }
}
