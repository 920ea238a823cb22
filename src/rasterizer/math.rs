//! Vector math for the rasterizer
//!
//! `Vec3A` is the workhorse: a 3D vector padded to 16 bytes so every
//! add/sub/scale/dot/cross runs on one SIMD lane. On top of glam this
//! module adds the barycentric pieces the triangle fill needs.

pub use glam::{Mat3A, Mat4, Vec2, Vec3, Vec3A, Vec4};

/// Barycentric components may dip this far below zero and still count
/// as inside, so shared edges don't leave cracks.
pub const BARYCENTRIC_EPSILON: f32 = -1e-4;

/// Triangles whose doubled screen area is below this are degenerate.
pub const DEGENERATE_EPSILON: f32 = 1e-6;

/// Triangle-invariant part of the barycentric computation.
///
/// Built once per triangle from the three pixel positions and the three
/// view-space depths, then queried per pixel.
#[derive(Debug, Clone, Copy)]
pub struct BarycentricSetup {
    origin: Vec2,
    /// B - A, pre-divided by the denominator
    ba: Vec2,
    /// C - A, pre-divided by the denominator
    ca: Vec2,
    /// (1/za, 1/zb, 1/zc) for perspective correction
    z_inv: Vec3A,
}

impl BarycentricSetup {
    /// Returns `None` for a degenerate (zero-area) triangle.
    ///
    /// Depths must be non-zero; the caller rejects vertices at or in front
    /// of the near plane before getting here.
    pub fn new(a: Vec2, b: Vec2, c: Vec2, depths: Vec3A) -> Option<Self> {
        let ba = b - a;
        let ca = c - a;
        let denom = ba.perp_dot(ca);
        if denom.abs() < DEGENERATE_EPSILON || !denom.is_finite() {
            return None;
        }

        Some(Self {
            origin: a,
            ba: ba / denom,
            ca: ca / denom,
            z_inv: depths.recip(),
        })
    }

    /// Screen-space barycentric coordinates of pixel `p`.
    #[inline]
    pub fn screen(&self, p: Vec2) -> Vec3A {
        let ap = self.origin - p;
        let b = self.ca.x * ap.y - ap.x * self.ca.y;
        let c = ap.x * self.ba.y - self.ba.x * ap.y;
        Vec3A::new(1.0 - b - c, b, c)
    }

    /// Perspective-corrected (view-space) barycentrics for a screen triple.
    #[inline]
    pub fn to_view(&self, screen: Vec3A) -> Vec3A {
        let weighted = screen * self.z_inv;
        weighted / weighted.element_sum()
    }
}

/// True when all three components clear the edge tolerance.
#[inline]
pub fn is_inside(bc: Vec3A) -> bool {
    bc.cmpge(Vec3A::splat(BARYCENTRIC_EPSILON)).all()
}

/// Divide screen-space weights by each vertex depth and renormalize.
pub fn perspective_correct(screen: Vec3A, z1: f32, z2: f32, z3: f32) -> Vec3A {
    let weighted = screen / Vec3A::new(z1, z2, z3);
    weighted / weighted.element_sum()
}

/// Integer power by repeated multiplication (powf is far slower per pixel).
#[inline]
pub fn pow_int(val: f32, p: u32) -> f32 {
    let mut result = 1.0;
    for _ in 0..p {
        result *= val;
    }
    result
}

/// Normalize, leaving zero-length vectors at zero instead of NaN.
#[inline]
pub fn normalize_or_zero(v: Vec3A) -> Vec3A {
    let len_sq = v.length_squared();
    if len_sq == 0.0 {
        return Vec3A::ZERO;
    }
    v / len_sq.sqrt()
}
