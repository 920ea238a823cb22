//! Renderer configuration, stored as RON like the rest of the data files

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RasterError, Result};
use crate::pool::DEFAULT_THREADS;
use crate::rasterizer::{Color, Vec3, DEFAULT_TRIANGLES_PER_TASK};

/// How a frame's work for one object is cut into pool tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Partition {
    /// Contiguous triangle ranges; every task may touch any row.
    #[default]
    Triangles,
    /// Bands of screen rows; every task walks all triangles, clipped to
    /// its band.
    Rows,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: usize,
    pub height: usize,
    pub near: f32,
    pub far: f32,
    /// Vertical field of view in radians
    pub fov: f32,

    pub threads: usize,
    pub partition: Partition,
    pub rows_per_task: usize,
    pub triangles_per_task: usize,

    pub background: Color,
    pub camera_pos: Vec3,
    pub camera_target: Vec3,
    pub camera_up: Vec3,
    pub light_pos: Vec3,

    /// Per-frame timing records are appended here when set.
    pub perf_log: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            near: 0.1,
            far: 20.0,
            fov: 1.0,
            threads: DEFAULT_THREADS,
            partition: Partition::Triangles,
            rows_per_task: 16,
            triangles_per_task: DEFAULT_TRIANGLES_PER_TASK,
            background: Color::new(40, 40, 48),
            camera_pos: Vec3::new(0.0, 0.3, 10.0),
            camera_target: Vec3::new(0.0, 0.3, 0.0),
            camera_up: Vec3::Y,
            light_pos: Vec3::new(1.0, 1.0, 3.0),
            perf_log: None,
        }
    }
}

impl RenderConfig {
    /// Load from a RON file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config = Self::from_ron(&contents)?;
        log::info!("Loaded render config from {}", path.display());
        Ok(config)
    }

    pub fn from_ron(s: &str) -> Result<Self> {
        let config: RenderConfig = ron::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_ron(&self) -> Result<String> {
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .indentor("  ".to_string());
        Ok(ron::ser::to_string_pretty(self, pretty)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_ron()?)?;
        Ok(())
    }

    /// Reject settings the renderer cannot be built with.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RasterError::InvalidDimensions { width: self.width, height: self.height });
        }
        if !(self.near > 0.0 && self.far > self.near) || !self.far.is_finite() {
            return Err(RasterError::InvalidClipPlanes { near: self.near, far: self.far });
        }
        if !(self.fov > 0.0 && self.fov < std::f32::consts::PI) {
            return Err(RasterError::InvalidFieldOfView(self.fov));
        }
        if self.threads == 0 {
            return Err(RasterError::InvalidThreadCount);
        }
        if self.rows_per_task == 0 || self.triangles_per_task == 0 {
            return Err(RasterError::InvalidMesh("task sizes must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RenderConfig::default();
        config.validate().unwrap();
        assert_eq!(config.threads, 8);
        assert_eq!(config.partition, Partition::Triangles);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let config = RenderConfig::from_ron("(width: 320, height: 240, partition: Rows)").unwrap();
        assert_eq!((config.width, config.height), (320, 240));
        assert_eq!(config.partition, Partition::Rows);
        assert_eq!(config.near, RenderConfig::default().near);
    }

    #[test]
    fn test_vectors_and_colors_parse() {
        let config = RenderConfig::from_ron(
            "(camera_pos: (1.0, 2.0, 3.0), background: (r: 1, g: 2, b: 3, a: 255))",
        )
        .unwrap();
        assert_eq!(config.camera_pos, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(config.background, Color::new(1, 2, 3));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            RenderConfig::from_ron("(width: 0)"),
            Err(RasterError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            RenderConfig::from_ron("(near: 5.0, far: 1.0)"),
            Err(RasterError::InvalidClipPlanes { .. })
        ));
        assert!(matches!(RenderConfig::from_ron("(threads: 0)"), Err(RasterError::InvalidThreadCount)));
        assert!(matches!(RenderConfig::from_ron("(width: "), Err(RasterError::Config(_))));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.ron");

        let config = RenderConfig {
            width: 640,
            partition: Partition::Rows,
            perf_log: Some(PathBuf::from("perf.tsv")),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = RenderConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            RenderConfig::load(dir.path().join("nope.ron")),
            Err(RasterError::Io(_))
        ));
    }
}
