//! Triangle fill
//! Bounding-box scan with perspective-correct barycentrics, depth test and
//! fragment dispatch, writing through row-locked access to the screen buffer

use std::ops::AddAssign;

use super::geometry::RenderingGeometry;
use super::math::{is_inside, BarycentricSetup, Vec2, Vec3A};
use super::scene::SceneObject;
use super::screen_buffer::ScreenBuffer;
use super::shader::{FragmentShader, RowBounds};
use super::types::{Color, Vertex};
use crate::error::Result;

/// Per-call triangle counts, summed across tasks for frame logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RasterStats {
    /// Triangles that reached the scan stage
    pub drawn: usize,
    /// Triangles dropped as unprojectable or degenerate
    pub skipped: usize,
}

impl RasterStats {
    #[inline]
    fn record(&mut self, drawn: bool) {
        if drawn {
            self.drawn += 1;
        } else {
            self.skipped += 1;
        }
    }
}

impl AddAssign for RasterStats {
    fn add_assign(&mut self, other: Self) {
        self.drawn += other.drawn;
        self.skipped += other.skipped;
    }
}

/// Owns the screen buffer and fills triangles into it.
///
/// All drawing methods take `&self`, so any number of workers can share one
/// rasterizer during a frame; the row locks serialize writes per scanline.
///
/// Every triangle draws with a key built from the object sequence number and
/// its index in the object. At equal depth the lower key keeps the pixel, so
/// the frame matches drawing every triangle in order on one thread no matter
/// how the work was split.
pub struct Rasterizer {
    buffer: ScreenBuffer,
    object_seq: u32,
}

impl Rasterizer {
    pub fn new(width: usize, height: usize, background: Color) -> Result<Self> {
        Ok(Self { buffer: ScreenBuffer::new(width, height, background)?, object_seq: 0 })
    }

    pub fn width(&self) -> usize {
        self.buffer.width()
    }

    pub fn height(&self) -> usize {
        self.buffer.height()
    }

    pub fn buffer(&self) -> &ScreenBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut ScreenBuffer {
        &mut self.buffer
    }

    pub fn clear(&mut self) -> Result<()> {
        self.buffer.clear()?;
        self.object_seq = 0;
        Ok(())
    }

    /// Start the next object of the frame. Its triangles lose depth ties
    /// against everything drawn before.
    pub fn begin_object(&mut self) {
        self.object_seq = self.object_seq.wrapping_add(1);
    }

    fn draw_key(&self, triangle: usize) -> u64 {
        (u64::from(self.object_seq) << 32) | (triangle as u64 & u64::from(u32::MAX))
    }

    pub fn pixels(&mut self) -> &[Color] {
        self.buffer.pixels()
    }

    pub fn as_bytes(&mut self) -> &[u8] {
        self.buffer.as_bytes()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.buffer_size()
    }

    fn all_rows(&self) -> RowBounds {
        RowBounds { lower: 0, upper: self.buffer.height() - 1 }
    }

    /// Draw `count` triangles of `object` starting at `start`.
    ///
    /// The range is clamped to the object's triangle list. Objects without
    /// a fragment shader draw nothing.
    pub fn rasterize(
        &self,
        object: &SceneObject,
        geometry: &RenderingGeometry,
        start: usize,
        count: usize,
    ) -> RasterStats {
        let mut stats = RasterStats::default();
        let Some(shader) = object.fragment_shader() else {
            return stats;
        };

        let end = start.saturating_add(count).min(object.triangle_count());
        let rows = self.all_rows();
        for i in start..end {
            let [a, b, c] = object.triangle(i);
            stats.record(self.fill_triangle(a, b, c, shader, geometry, rows, self.draw_key(i)));
        }
        stats
    }

    /// Draw every triangle of `object`, touching only rows inside `rows`.
    pub fn rasterize_rows(
        &self,
        object: &SceneObject,
        geometry: &RenderingGeometry,
        rows: RowBounds,
    ) -> RasterStats {
        let mut stats = RasterStats::default();
        let Some(shader) = object.fragment_shader() else {
            return stats;
        };

        for i in 0..object.triangle_count() {
            let [a, b, c] = object.triangle(i);
            stats.record(self.fill_triangle(a, b, c, shader, geometry, rows, self.draw_key(i)));
        }
        stats
    }

    /// Fill one triangle, restricted to `rows`.
    ///
    /// Returns `false` when the triangle was dropped: a vertex sits at or in
    /// front of the near plane, or the screen-space area is zero. A triangle
    /// that simply misses the screen still counts as drawn. Depth ties are
    /// keyed as triangle 0 of the current object.
    pub fn rasterize_triangle(
        &self,
        a: &Vertex,
        b: &Vertex,
        c: &Vertex,
        shader: &dyn FragmentShader,
        geometry: &RenderingGeometry,
        rows: RowBounds,
    ) -> bool {
        self.fill_triangle(a, b, c, shader, geometry, rows, self.draw_key(0))
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_triangle(
        &self,
        a: &Vertex,
        b: &Vertex,
        c: &Vertex,
        shader: &dyn FragmentShader,
        geometry: &RenderingGeometry,
        rows: RowBounds,
        key: u64,
    ) -> bool {
        let near = geometry.near();
        let drawable = |v: &Vertex| v.is_projectable() && v.position.z <= -near;
        if !(drawable(a) && drawable(b) && drawable(c)) {
            return false;
        }

        let depths = Vec3A::new(a.position.z, b.position.z, c.position.z);
        let Some(setup) = BarycentricSetup::new(a.pixel, b.pixel, c.pixel, depths) else {
            return false;
        };

        // Bounding box, clamped to the screen and the allowed rows
        let min = a.pixel.min(b.pixel).min(c.pixel);
        let max = a.pixel.max(b.pixel).max(c.pixel);
        let last_x = (self.buffer.width() - 1) as f32;
        let last_y = rows.upper.min(self.buffer.height() - 1) as f32;
        let first_y = rows.lower as f32;
        if max.x < 0.0 || min.x > last_x || max.y < first_y || min.y > last_y {
            return true;
        }
        let x0 = min.x.max(0.0).floor() as usize;
        let x1 = max.x.min(last_x).ceil() as usize;
        let y0 = min.y.max(first_y).floor() as usize;
        let y1 = max.y.min(last_y).ceil() as usize;

        let mut accessor = self.buffer.accessor();
        for y in y0..=y1 {
            let py = y as f32;
            let covered = |x: usize| is_inside(setup.screen(Vec2::new(x as f32, py)));

            let Some(first) = (x0..=x1).find(|&x| covered(x)) else {
                continue;
            };

            accessor.lock_row(y);
            let Some(row) = accessor.row() else {
                continue;
            };

            for x in first..=x1 {
                let p = Vec2::new(x as f32, py);
                let bc = setup.screen(p);
                // Coverage is one contiguous run per scanline
                if !is_inside(bc) {
                    break;
                }

                let view = setup.to_view(bc);
                let z = view.dot(depths);
                let stored = row.depth[x];
                if z.is_nan() || z < stored || (z == stored && key >= row.keys[x]) {
                    continue;
                }
                row.depth[x] = z;
                row.keys[x] = key;

                let mut fragment = *a * view.x + *b * view.y + *c * view.z;
                fragment.pixel = p;
                row.colors[x] = shader.shade(&fragment, geometry);
            }

            accessor.release_row();
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rasterizer::math::Vec3;
    use crate::rasterizer::scene::MeshData;
    use crate::rasterizer::screen_buffer::FAR_DEPTH;
    use crate::rasterizer::shader::SolidShader;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BACKGROUND: Color = Color::new(10, 20, 30);

    fn geometry() -> RenderingGeometry {
        RenderingGeometry::new(200, 200, 0.1, 100.0, 1.0).unwrap()
    }

    fn rasterizer() -> Rasterizer {
        Rasterizer::new(200, 200, BACKGROUND).unwrap()
    }

    fn vertex(px: f32, py: f32, z: f32, uv: Vec2) -> Vertex {
        Vertex::new(Vec3A::new(0.0, 0.0, z), Vec3A::Z, uv, Vec2::new(px, py))
    }

    fn right_triangle(z: [f32; 3]) -> [Vertex; 3] {
        [
            vertex(10.0, 10.0, z[0], Vec2::new(0.0, 0.0)),
            vertex(100.0, 10.0, z[1], Vec2::new(1.0, 0.0)),
            vertex(10.0, 100.0, z[2], Vec2::new(0.0, 1.0)),
        ]
    }

    fn full(r: &Rasterizer) -> RowBounds {
        r.all_rows()
    }

    /// Encodes the interpolated u coordinate in the red channel.
    struct UvShader;

    impl FragmentShader for UvShader {
        fn shade(&self, fragment: &Vertex, _geometry: &RenderingGeometry) -> Color {
            Color::new((fragment.uv.x * 255.0) as u8, (fragment.uv.y * 255.0) as u8, 0)
        }
    }

    struct CountingShader(AtomicUsize);

    impl FragmentShader for CountingShader {
        fn shade(&self, _fragment: &Vertex, _geometry: &RenderingGeometry) -> Color {
            self.0.fetch_add(1, Ordering::Relaxed);
            Color::WHITE
        }
    }

    #[test]
    fn test_right_triangle_coverage() {
        let mut r = rasterizer();
        let geom = geometry();
        let [a, b, c] = right_triangle([-1.0; 3]);
        assert!(r.rasterize_triangle(&a, &b, &c, &SolidShader(Color::RED), &geom, full(&r)));

        let width = r.width();
        let pixels = r.pixels();
        let mut lit = 0;
        for y in 0..200 {
            for x in 0..200 {
                let expected = x >= 10 && y >= 10 && x + y <= 110;
                let actual = pixels[y * width + x] == Color::RED;
                assert_eq!(actual, expected, "pixel ({}, {})", x, y);
                lit += actual as usize;
            }
        }
        assert_eq!(lit, 4186);
    }

    #[test]
    fn test_written_depth_matches_view_z() {
        let mut r = rasterizer();
        let geom = geometry();
        let [a, b, c] = right_triangle([-2.0; 3]);
        r.rasterize_triangle(&a, &b, &c, &SolidShader(Color::RED), &geom, full(&r));

        let width = r.width();
        let depths = r.buffer_mut().depths();
        assert!((depths[40 * width + 40] + 2.0).abs() < 1e-5);
        assert_eq!(depths[5 * width + 5], FAR_DEPTH);
    }

    #[test]
    fn test_depth_test_is_idempotent() {
        let mut r = rasterizer();
        let geom = geometry();
        let shader = CountingShader(AtomicUsize::new(0));
        let [a, b, c] = right_triangle([-1.0, -3.0, -5.0]);

        r.rasterize_triangle(&a, &b, &c, &shader, &geom, full(&r));
        let first_calls = shader.0.load(Ordering::Relaxed);
        let first_pixels = r.pixels().to_vec();
        let first_depths = r.buffer_mut().depths().to_vec();
        assert_eq!(first_calls, 4186);

        r.rasterize_triangle(&a, &b, &c, &shader, &geom, full(&r));
        assert_eq!(shader.0.load(Ordering::Relaxed), first_calls);
        assert_eq!(r.pixels(), &first_pixels[..]);
        assert_eq!(r.buffer_mut().depths(), &first_depths[..]);
    }

    #[test]
    fn test_nearer_triangle_wins_in_any_order() {
        let geom = geometry();
        let near = right_triangle([-1.0; 3]);
        let far = right_triangle([-5.0; 3]);

        let near_shader = SolidShader(Color::GREEN);
        let far_shader = SolidShader(Color::BLUE);
        let orders: [[(&[Vertex; 3], &SolidShader); 2]; 2] = [
            [(&near, &near_shader), (&far, &far_shader)],
            [(&far, &far_shader), (&near, &near_shader)],
        ];

        for order in orders {
            let mut r = rasterizer();
            let rows = full(&r);
            for (tri, shader) in order {
                r.rasterize_triangle(&tri[0], &tri[1], &tri[2], shader, &geom, rows);
            }
            let width = r.width();
            assert_eq!(r.pixels()[40 * width + 40], Color::GREEN);
            assert!((r.buffer_mut().depths()[40 * width + 40] + 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_depth_tie_goes_to_lower_key() {
        let geom = geometry();
        let [a, b, c] = right_triangle([-1.0, -3.0, -5.0]);
        let green = SolidShader(Color::GREEN);
        let blue = SolidShader(Color::BLUE);

        for reversed in [false, true] {
            let mut r = rasterizer();
            let rows = full(&r);
            let mut draws = [(&green, 3u64), (&blue, 4u64)];
            if reversed {
                draws.reverse();
            }
            for (shader, key) in draws {
                r.fill_triangle(&a, &b, &c, shader, &geom, rows, key);
            }
            let width = r.width();
            assert!(r.pixels()[10 * width + 10..].iter().take(91).all(|&p| p == Color::GREEN));
            assert_eq!(r.pixels()[40 * width + 40], Color::GREEN, "reversed: {}", reversed);
        }
    }

    #[test]
    fn test_later_object_loses_depth_tie() {
        let mut r = rasterizer();
        let geom = geometry();
        let [a, b, c] = right_triangle([-2.0; 3]);
        let rows = full(&r);

        r.begin_object();
        r.rasterize_triangle(&a, &b, &c, &SolidShader(Color::GREEN), &geom, rows);
        r.begin_object();
        r.rasterize_triangle(&a, &b, &c, &SolidShader(Color::BLUE), &geom, rows);
        let width = r.width();
        assert_eq!(r.pixels()[40 * width + 40], Color::GREEN);

        // Sequence restarts with the frame
        r.clear().unwrap();
        r.begin_object();
        r.rasterize_triangle(&a, &b, &c, &SolidShader(Color::BLUE), &geom, rows);
        assert_eq!(r.pixels()[40 * width + 40], Color::BLUE);
    }

    #[test]
    fn test_perspective_correct_uv() {
        let mut r = rasterizer();
        let geom = geometry();
        let [a, b, c] = right_triangle([-1.0, -4.0, -9.0]);
        r.rasterize_triangle(&a, &b, &c, &UvShader, &geom, full(&r));

        let p = Vec2::new(40.0, 40.0);
        let setup =
            BarycentricSetup::new(a.pixel, b.pixel, c.pixel, Vec3A::new(-1.0, -4.0, -9.0)).unwrap();
        let naive = setup.screen(p);
        let correct = setup.to_view(naive);

        let width = r.width();
        let got = r.pixels()[40 * width + 40];
        assert_eq!(got.r, (correct.y * 255.0) as u8);
        assert!((got.r as i32 - (naive.y * 255.0) as i32).abs() > 10);
    }

    #[test]
    fn test_uniform_depth_uv_is_screen_linear() {
        let mut r = rasterizer();
        let geom = geometry();
        let [a, b, c] = right_triangle([-3.0; 3]);
        r.rasterize_triangle(&a, &b, &c, &UvShader, &geom, full(&r));

        // Screen-space weights at (40, 40) are a third each
        let width = r.width();
        let got = r.pixels()[40 * width + 40];
        assert!((got.r as i32 - 85).abs() <= 1);
        assert!((got.g as i32 - 85).abs() <= 1);
    }

    #[test]
    fn test_unprojectable_and_degenerate_triangles_skipped() {
        let mut r = rasterizer();
        let geom = geometry();
        let [a, b, mut c] = right_triangle([-1.0; 3]);
        let shader = SolidShader(Color::RED);

        let mut hidden = c;
        hidden.pixel = Vec2::NAN;
        assert!(!r.rasterize_triangle(&a, &b, &hidden, &shader, &geom, full(&r)));

        let mut at_eye = c;
        at_eye.position.z = 0.0;
        assert!(!r.rasterize_triangle(&a, &b, &at_eye, &shader, &geom, full(&r)));

        c.pixel = Vec2::new(55.0, 10.0);
        assert!(!r.rasterize_triangle(&a, &b, &c, &shader, &geom, full(&r)));

        assert!(r.pixels().iter().all(|&p| p == BACKGROUND));
    }

    #[test]
    fn test_offscreen_triangle_clamped() {
        let mut r = rasterizer();
        let geom = geometry();
        let a = vertex(-50.0, -50.0, -1.0, Vec2::ZERO);
        let b = vertex(250.0, -50.0, -1.0, Vec2::ZERO);
        let c = vertex(-50.0, 250.0, -1.0, Vec2::ZERO);
        assert!(r.rasterize_triangle(&a, &b, &c, &SolidShader(Color::RED), &geom, full(&r)));
        assert_eq!(r.pixels()[0], Color::RED);

        let mut r = rasterizer();
        let a = vertex(300.0, 10.0, -1.0, Vec2::ZERO);
        let b = vertex(400.0, 10.0, -1.0, Vec2::ZERO);
        let c = vertex(300.0, 90.0, -1.0, Vec2::ZERO);
        assert!(r.rasterize_triangle(&a, &b, &c, &SolidShader(Color::RED), &geom, full(&r)));
        assert!(r.pixels().iter().all(|&p| p == BACKGROUND));
    }

    #[test]
    fn test_row_band_clips_triangle() {
        let mut r = rasterizer();
        let geom = geometry();
        let [a, b, c] = right_triangle([-1.0; 3]);
        let band = RowBounds { lower: 20, upper: 29 };
        r.rasterize_triangle(&a, &b, &c, &SolidShader(Color::RED), &geom, band);

        let width = r.width();
        let pixels = r.pixels();
        for y in 0..200 {
            let lit = pixels[y * width + 15] == Color::RED;
            assert_eq!(lit, band.contains(y), "row {}", y);
        }
    }

    #[test]
    fn test_clear_then_nothing_leaves_background() {
        let mut r = rasterizer();
        let mut geom = geometry();
        geom.look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let object = SceneObject::new(MeshData::cube())
            .unwrap()
            .with_shaders(
                Box::new(crate::rasterizer::shader::StandardVertexShader),
                Box::new(SolidShader(Color::RED)),
            )
            .unwrap();

        r.clear().unwrap();
        let stats = r.rasterize(&object, &geom, 0, 0);
        assert_eq!(stats, RasterStats::default());
        assert!(r.pixels().iter().all(|&p| p == BACKGROUND));
        assert!(r.buffer_mut().depths().iter().all(|&z| z == FAR_DEPTH));
        assert!(!r.buffer().any_row_locked());
    }

    #[test]
    fn test_rasterize_object_range() {
        let mut r = rasterizer();
        let mut geom = geometry();
        geom.look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let mut object = SceneObject::new(MeshData::cube())
            .unwrap()
            .with_shaders(
                Box::new(crate::rasterizer::shader::StandardVertexShader),
                Box::new(SolidShader(Color::RED)),
            )
            .unwrap();
        object.update(&geom);

        // Past the end is clamped
        let stats = r.rasterize(&object, &geom, 10, 100);
        assert_eq!(stats.drawn + stats.skipped, 2);

        let stats = r.rasterize(&object, &geom, 0, object.triangle_count());
        assert_eq!(stats.drawn + stats.skipped, 12);
        // The front face covers the screen center
        let width = r.width();
        assert_eq!(r.pixels()[100 * width + 100], Color::RED);
    }
}
