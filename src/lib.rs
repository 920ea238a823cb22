//! softraster: multithreaded CPU software rasterizer
//!
//! Turns triangle meshes into a 2D pixel buffer without a GPU:
//! - Vertex shading on the driver thread
//! - Perspective-correct barycentric triangle fill
//! - Row-locked screen buffer shared by the rasterizer workers
//! - Small scoped task pool sized for many short, uniform tasks

pub mod config;
pub mod error;
pub mod pool;
pub mod rasterizer;
pub mod telemetry;

pub use config::{Partition, RenderConfig};
pub use error::{RasterError, Result};
pub use pool::TaskPool;
pub use rasterizer::*;
pub use telemetry::{FrameStats, FrameTimings, PerfLog};

/// Version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
