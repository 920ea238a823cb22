//! Frame driver: clear, vertex stage, parallel raster stage

use std::fs::File;
use std::io::BufWriter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use super::geometry::RenderingGeometry;
use super::math::Vec3;
use super::render::{RasterStats, Rasterizer};
use super::scene::SceneObject;
use super::shader::RowBounds;
use super::types::Color;
use crate::config::{Partition, RenderConfig};
use crate::error::{RasterError, Result};
use crate::pool::TaskPool;
use crate::telemetry::{FrameStats, FrameTimings, PerfLog};

/// Owns the scene, the camera, the screen and the worker pool.
///
/// Each [`update`](Self::update) renders one complete frame; the finished
/// pixels stay readable until the next update.
pub struct Pipeline {
    config: RenderConfig,
    geometry: RenderingGeometry,
    rasterizer: Rasterizer,
    pool: TaskPool,
    objects: Vec<SceneObject>,
    stats: FrameStats,
    perf_log: Option<PerfLog<BufWriter<File>>>,
    last_raster: RasterStats,
    frame: u64,
}

impl Pipeline {
    pub fn new(config: RenderConfig, objects: Vec<SceneObject>) -> Result<Self> {
        config.validate()?;
        if let Some(object) = objects.iter().position(|o| !o.has_shaders()) {
            return Err(RasterError::MissingShaders { object });
        }

        let mut geometry =
            RenderingGeometry::new(config.width, config.height, config.near, config.far, config.fov)?;
        geometry.look_at(config.camera_pos, config.camera_target, config.camera_up);
        geometry.set_light_pos(config.light_pos);

        let rasterizer = Rasterizer::new(config.width, config.height, config.background)?;
        let pool = TaskPool::new(config.threads)?;
        let perf_log = config.perf_log.as_ref().map(PerfLog::create).transpose()?;

        log::info!(
            "Pipeline ready: {}x{}, {} objects, {} triangles, {} workers, {:?} partition",
            config.width,
            config.height,
            objects.len(),
            objects.iter().map(SceneObject::triangle_count).sum::<usize>(),
            config.threads,
            config.partition
        );

        Ok(Self {
            config,
            geometry,
            rasterizer,
            pool,
            objects,
            stats: FrameStats::new(),
            perf_log,
            last_raster: RasterStats::default(),
            frame: 0,
        })
    }

    /// Render one frame.
    pub fn update(&mut self) -> Result<FrameTimings> {
        let start = Instant::now();
        self.rasterizer.clear()?;

        for object in &mut self.objects {
            object.update(&self.geometry);
        }
        let vertex = start.elapsed();

        let raster_start = Instant::now();
        let mut raster_stats = RasterStats::default();
        for object in &self.objects {
            let Some(bounds) = object.bounds() else {
                continue;
            };
            self.rasterizer.begin_object();
            raster_stats += draw_object(
                &self.pool,
                &self.rasterizer,
                &self.geometry,
                object,
                self.config.partition,
                self.config.rows_per_task,
                bounds,
            );
        }
        let raster = raster_start.elapsed();

        debug_assert!(!self.rasterizer.buffer().any_row_locked());

        let timings = FrameTimings { total: start.elapsed(), vertex, raster };
        log::debug!(
            "frame {}: {} ({} drawn, {} skipped)",
            self.frame,
            timings.to_tsv(),
            raster_stats.drawn,
            raster_stats.skipped
        );

        if let Some(perf_log) = self.perf_log.as_mut() {
            if let Err(e) = perf_log.record(&timings) {
                log::warn!("Disabling perf log after write failure: {}", e);
                self.perf_log = None;
            }
        }
        self.stats.push(&timings);
        self.last_raster = raster_stats;
        self.frame += 1;

        Ok(timings)
    }

    pub fn pixels(&mut self) -> &[Color] {
        self.rasterizer.pixels()
    }

    pub fn as_bytes(&mut self) -> &[u8] {
        self.rasterizer.as_bytes()
    }

    /// Color plane size in bytes.
    pub fn buffer_size(&self) -> usize {
        self.rasterizer.buffer_size()
    }

    /// Finished depth plane of the last frame.
    pub fn depths(&mut self) -> &[f32] {
        self.rasterizer.buffer_mut().depths()
    }

    pub fn width(&self) -> usize {
        self.rasterizer.width()
    }

    pub fn height(&self) -> usize {
        self.rasterizer.height()
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn geometry(&self) -> &RenderingGeometry {
        &self.geometry
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    pub fn last_raster_stats(&self) -> RasterStats {
        self.last_raster
    }

    pub fn frame_stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn move_cam(&mut self, dx: f32, dy: f32, dz: f32) {
        self.geometry.move_cam(dx, dy, dz);
    }

    pub fn move_at(&mut self, dx: f32, dy: f32, dz: f32) {
        self.geometry.move_at(dx, dy, dz);
    }

    pub fn look_at(&mut self, pos: Vec3, target: Vec3, up: Vec3) {
        self.geometry.look_at(pos, target, up);
    }

    pub fn set_light_pos(&mut self, pos: Vec3) {
        self.geometry.set_light_pos(pos);
    }

    pub fn set_background(&mut self, color: Color) {
        self.rasterizer.buffer_mut().set_background(color);
    }

    /// Flush the perf log, if one is open.
    pub fn flush_perf_log(&mut self) -> Result<()> {
        match self.perf_log.as_mut() {
            Some(log) => log.flush(),
            None => Ok(()),
        }
    }
}

/// Rasterize one object across the pool and wait for it.
fn draw_object(
    pool: &TaskPool,
    rasterizer: &Rasterizer,
    geometry: &RenderingGeometry,
    object: &SceneObject,
    partition: Partition,
    rows_per_task: usize,
    bounds: RowBounds,
) -> RasterStats {
    let drawn = AtomicUsize::new(0);
    let skipped = AtomicUsize::new(0);

    let collect = |stats: RasterStats| {
        drawn.fetch_add(stats.drawn, Ordering::Relaxed);
        skipped.fetch_add(stats.skipped, Ordering::Relaxed);
    };
    let collect = &collect;

    pool.scope(|s| {
        match partition {
            Partition::Triangles => {
                let step = object.triangles_per_task();
                for start in (0..object.triangle_count()).step_by(step) {
                    s.spawn(move || collect(rasterizer.rasterize(object, geometry, start, step)));
                }
            }
            Partition::Rows => {
                for lower in (bounds.lower..=bounds.upper).step_by(rows_per_task) {
                    let band = RowBounds {
                        lower,
                        upper: (lower + rows_per_task - 1).min(bounds.upper),
                    };
                    s.spawn(move || collect(rasterizer.rasterize_rows(object, geometry, band)));
                }
            }
        }
    });

    RasterStats {
        drawn: drawn.load(Ordering::Relaxed),
        skipped: skipped.load(Ordering::Relaxed),
    }
}
