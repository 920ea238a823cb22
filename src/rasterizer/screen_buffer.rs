//! Color + depth planes shared by the rasterizer workers
//!
//! Each scanline carries its own atomic lock flag. A worker takes a
//! [`RowAccessor`], locks the row it is about to fill, and gets exclusive
//! mutable access to that row's colors, depths and draw keys until it
//! releases the row or drops the accessor. Workers on different rows never
//! contend.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

use super::types::Color;
use crate::error::{RasterError, Result};

/// Depth of a pixel nothing has been drawn to. Larger depth is closer.
pub const FAR_DEPTH: f32 = f32::NEG_INFINITY;

/// Draw key of a pixel nothing has been drawn to. Lower keys win depth ties.
pub const NO_DRAW_KEY: u64 = u64::MAX;

/// Screen-sized color and depth planes with one lock per row.
pub struct ScreenBuffer {
    width: usize,
    height: usize,
    background: Color,
    colors: Box<[UnsafeCell<Color>]>,
    depth: Box<[UnsafeCell<f32>]>,
    keys: Box<[UnsafeCell<u64>]>,
    locks: Box<[AtomicBool]>,
}

// Safety: a row's cells are only reached through a RowAccessor that won
// that row's lock (acquire/release pairing on the flag), or through
// &mut self. No two threads ever alias the same row mutably.
unsafe impl Sync for ScreenBuffer {}

impl ScreenBuffer {
    pub fn new(width: usize, height: usize, background: Color) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RasterError::InvalidDimensions { width, height });
        }
        let count = width
            .checked_mul(height)
            .ok_or(RasterError::InvalidDimensions { width, height })?;

        Ok(Self {
            width,
            height,
            background,
            colors: (0..count).map(|_| UnsafeCell::new(background)).collect(),
            depth: (0..count).map(|_| UnsafeCell::new(FAR_DEPTH)).collect(),
            keys: (0..count).map(|_| UnsafeCell::new(NO_DRAW_KEY)).collect(),
            locks: (0..height).map(|_| AtomicBool::new(false)).collect(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn background(&self) -> Color {
        self.background
    }

    pub fn set_background(&mut self, color: Color) {
        self.background = color;
    }

    /// Handle for row-scoped access. Holds no row until one is locked.
    pub fn accessor(&self) -> RowAccessor<'_> {
        RowAccessor { buffer: self, row: None }
    }

    /// Reset every depth to [`FAR_DEPTH`] and every color to the background.
    ///
    /// Fails if a row lock is still held, which can only happen when an
    /// accessor was leaked instead of dropped.
    pub fn clear(&mut self) -> Result<()> {
        if let Some(row) = self.locks.iter().position(|l| l.load(Ordering::Acquire)) {
            return Err(RasterError::RowLocked(row));
        }

        let background = self.background;
        for c in self.colors.iter_mut() {
            *c.get_mut() = background;
        }
        for z in self.depth.iter_mut() {
            *z.get_mut() = FAR_DEPTH;
        }
        for k in self.keys.iter_mut() {
            *k.get_mut() = NO_DRAW_KEY;
        }
        Ok(())
    }

    /// Whether any row is currently locked.
    pub fn any_row_locked(&self) -> bool {
        self.locks.iter().any(|l| l.load(Ordering::Acquire))
    }

    /// Finished color plane, row-major, `width * height` entries.
    pub fn pixels(&mut self) -> &[Color] {
        // UnsafeCell<Color> has the same layout as Color
        unsafe { std::slice::from_raw_parts(self.colors.as_ptr() as *const Color, self.colors.len()) }
    }

    /// Finished depth plane, row-major.
    pub fn depths(&mut self) -> &[f32] {
        unsafe { std::slice::from_raw_parts(self.depth.as_ptr() as *const f32, self.depth.len()) }
    }

    /// Color plane as bytes in RGBA order.
    pub fn as_bytes(&mut self) -> &[u8] {
        bytemuck::cast_slice(self.pixels())
    }

    /// Size of the color plane in bytes.
    pub fn buffer_size(&self) -> usize {
        self.width * self.height * std::mem::size_of::<Color>()
    }

    fn row_range(&self, row: usize) -> std::ops::Range<usize> {
        row * self.width..(row + 1) * self.width
    }
}

/// Exclusive view of one locked row.
pub struct RowView<'a> {
    pub y: usize,
    pub colors: &'a mut [Color],
    pub depth: &'a mut [f32],
    /// Key of the triangle that owns each pixel, for breaking depth ties
    pub keys: &'a mut [u64],
}

/// Row-scoped handle into a [`ScreenBuffer`].
///
/// Holds at most one row at a time; the row is released on every exit
/// path when the accessor is dropped.
pub struct RowAccessor<'a> {
    buffer: &'a ScreenBuffer,
    row: Option<usize>,
}

impl<'a> RowAccessor<'a> {
    pub fn locked_row(&self) -> Option<usize> {
        self.row
    }

    /// Single compare-and-swap on the row's flag; succeeds whenever the row
    /// is free. Releases any row held before trying.
    ///
    /// Panics if `row` is outside the buffer.
    pub fn try_lock_row(&mut self, row: usize) -> bool {
        self.release_row();

        let flag = &self.buffer.locks[row];
        if flag
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.row = Some(row);
            true
        } else {
            false
        }
    }

    /// Spin (yielding) until the row is ours. No fairness.
    pub fn lock_row(&mut self, row: usize) {
        while !self.try_lock_row(row) {
            std::thread::yield_now();
        }
    }

    pub fn release_row(&mut self) {
        if let Some(row) = self.row.take() {
            self.buffer.locks[row].store(false, Ordering::Release);
        }
    }

    /// Colors and depths of the locked row, or `None` if no row is held.
    pub fn row(&mut self) -> Option<RowView<'_>> {
        let y = self.row?;
        let range = self.buffer.row_range(y);
        let len = range.len();

        // Safety: we hold row y's lock, and &mut self keeps this the only
        // live view produced by this accessor.
        unsafe {
            let colors = self.buffer.colors[range.clone()].as_ptr() as *mut Color;
            let depth = self.buffer.depth[range.clone()].as_ptr() as *mut f32;
            let keys = self.buffer.keys[range].as_ptr() as *mut u64;
            Some(RowView {
                y,
                colors: std::slice::from_raw_parts_mut(colors, len),
                depth: std::slice::from_raw_parts_mut(depth, len),
                keys: std::slice::from_raw_parts_mut(keys, len),
            })
        }
    }
}

impl Drop for RowAccessor<'_> {
    fn drop(&mut self) {
        self.release_row();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            ScreenBuffer::new(0, 10, Color::BLACK),
            Err(RasterError::InvalidDimensions { .. })
        ));
        assert!(ScreenBuffer::new(10, 0, Color::BLACK).is_err());
    }

    #[test]
    fn test_clear_resets_planes() {
        let mut buffer = ScreenBuffer::new(4, 3, Color::BLUE).unwrap();
        {
            let mut acc = buffer.accessor();
            acc.lock_row(1);
            let row = acc.row().unwrap();
            row.colors[2] = Color::RED;
            row.depth[2] = -1.0;
            row.keys[2] = 7;
        }
        assert_eq!(buffer.pixels()[4 + 2], Color::RED);

        buffer.clear().unwrap();
        assert!(buffer.pixels().iter().all(|&c| c == Color::BLUE));
        assert!(buffer.depths().iter().all(|&z| z == FAR_DEPTH));

        let mut acc = buffer.accessor();
        acc.lock_row(1);
        assert!(acc.row().unwrap().keys.iter().all(|&k| k == NO_DRAW_KEY));
    }

    #[test]
    fn test_row_lock_is_exclusive() {
        let buffer = ScreenBuffer::new(4, 4, Color::BLACK).unwrap();
        let mut first = buffer.accessor();
        let mut second = buffer.accessor();

        assert!(first.try_lock_row(2));
        assert!(!second.try_lock_row(2));
        assert!(second.try_lock_row(3));

        first.release_row();
        assert!(second.try_lock_row(2));
        // Locking a new row gave up row 3
        assert_eq!(second.locked_row(), Some(2));
        assert!(first.try_lock_row(3));
    }

    #[test]
    fn test_try_lock_on_free_row_always_succeeds() {
        let buffer = ScreenBuffer::new(4, 4, Color::BLACK).unwrap();
        let mut acc = buffer.accessor();
        for i in 0..10_000 {
            assert!(acc.try_lock_row(i % 4), "attempt {}", i);
            acc.release_row();
        }
    }

    #[test]
    fn test_buffer_is_send_and_sync() {
        fn shareable<T: Send + Sync>() {}
        shareable::<ScreenBuffer>();
    }

    #[test]
    fn test_drop_releases_row() {
        let buffer = ScreenBuffer::new(4, 4, Color::BLACK).unwrap();
        {
            let mut acc = buffer.accessor();
            acc.lock_row(0);
            assert!(buffer.any_row_locked());
        }
        assert!(!buffer.any_row_locked());
    }

    #[test]
    fn test_clear_fails_on_leaked_lock() {
        let mut buffer = ScreenBuffer::new(4, 4, Color::BLACK).unwrap();
        {
            let mut acc = buffer.accessor();
            acc.lock_row(3);
            std::mem::forget(acc);
        }
        assert!(matches!(buffer.clear(), Err(RasterError::RowLocked(3))));
    }

    #[test]
    fn test_row_without_lock_is_none() {
        let buffer = ScreenBuffer::new(4, 4, Color::BLACK).unwrap();
        let mut acc = buffer.accessor();
        assert!(acc.row().is_none());
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_row_panics() {
        let buffer = ScreenBuffer::new(4, 4, Color::BLACK).unwrap();
        buffer.accessor().lock_row(4);
    }

    #[test]
    fn test_concurrent_increments_on_one_row() {
        let buffer = Arc::new(ScreenBuffer::new(1, 1, Color::BLACK).unwrap());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let mut acc = buffer.accessor();
                        acc.lock_row(0);
                        let row = acc.row().unwrap();
                        row.depth[0] = if row.depth[0] == FAR_DEPTH { 1.0 } else { row.depth[0] + 1.0 };
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let mut buffer = Arc::try_unwrap(buffer).ok().unwrap();
        assert_eq!(buffer.depths()[0], 4000.0);
    }
}
