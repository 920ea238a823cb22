//! Error type shared by every fallible construction path

use std::path::PathBuf;

/// Errors that abort initialization or asset loading.
///
/// Degenerate geometry never shows up here: triangles and vertices that
/// cannot be drawn are skipped for the frame instead.
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    /// Screen or buffer with a zero dimension.
    #[error("invalid screen dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    /// Clip planes must satisfy 0 < near < far.
    #[error("invalid clip planes: near={near}, far={far}")]
    InvalidClipPlanes { near: f32, far: f32 },

    /// Vertical field of view must lie in (0, pi).
    #[error("invalid field of view: {0} rad")]
    InvalidFieldOfView(f32),

    /// The task pool needs at least one worker.
    #[error("task pool needs at least one worker thread")]
    InvalidThreadCount,

    /// Index list, attribute arrays or task sizing are inconsistent.
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    /// Shaders are attached exactly once per object.
    #[error("shaders already attached to this object")]
    ShadersAlreadyAttached,

    /// An object reached the pipeline without its shader pair.
    #[error("scene object {object} has no shaders attached")]
    MissingShaders { object: usize },

    /// A row lock was still held when the buffer was cleared.
    #[error("row {0} is still locked")]
    RowLocked(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Config(#[from] ron::error::SpannedError),

    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] ron::Error),

    #[error("image decode error for {path}: {message}")]
    Image { path: PathBuf, message: String },

    #[error("OBJ parse error for {path}: {message}")]
    Obj { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, RasterError>;
