//! Frame timing records and rolling averages

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Frames between two logged averages.
pub const STATS_WINDOW: u32 = 100;

/// Wall time of one frame and its two stages.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTimings {
    pub total: Duration,
    pub vertex: Duration,
    pub raster: Duration,
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl FrameTimings {
    /// `<total_ms>\t<vertex_ms>\t<raster_ms>`
    pub fn to_tsv(&self) -> String {
        format!("{:.3}\t{:.3}\t{:.3}", ms(self.total), ms(self.vertex), ms(self.raster))
    }
}

/// Writes one tab-separated timing line per frame to any sink.
pub struct PerfLog<W: Write> {
    sink: W,
}

impl PerfLog<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        log::info!("Writing frame timings to {}", path.as_ref().display());
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> PerfLog<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    pub fn record(&mut self, timings: &FrameTimings) -> Result<()> {
        writeln!(self.sink, "{}", timings.to_tsv())?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// Rolling sums over a window of frames.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    frames: u32,
    window: FrameTimings,
    last_average: Option<FrameTimings>,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a frame. Every [`STATS_WINDOW`] frames the window average is
    /// logged, stored and returned.
    pub fn push(&mut self, timings: &FrameTimings) -> Option<FrameTimings> {
        self.frames += 1;
        self.window.total += timings.total;
        self.window.vertex += timings.vertex;
        self.window.raster += timings.raster;

        if self.frames < STATS_WINDOW {
            return None;
        }

        let average = FrameTimings {
            total: self.window.total / self.frames,
            vertex: self.window.vertex / self.frames,
            raster: self.window.raster / self.frames,
        };
        log::info!(
            "avg over {} frames: total {:.2} ms ({:.1} fps), vertex {:.2} ms, raster {:.2} ms",
            self.frames,
            ms(average.total),
            1000.0 / ms(average.total).max(1e-6),
            ms(average.vertex),
            ms(average.raster)
        );

        self.frames = 0;
        self.window = FrameTimings::default();
        self.last_average = Some(average);
        Some(average)
    }

    pub fn last_average(&self) -> Option<FrameTimings> {
        self.last_average
    }
}
