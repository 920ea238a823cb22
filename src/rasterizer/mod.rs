//! Multithreaded software rasterizer
//!
//! - View-space transform and perspective projection per vertex
//! - Perspective-correct barycentric interpolation
//! - Depth test against a row-locked color + depth buffer
//! - Triangle or row-band work split across a worker pool

mod geometry;
mod math;
mod pipeline;
mod render;
mod scene;
mod screen_buffer;
mod shader;
mod types;

pub use geometry::*;
pub use math::*;
pub use pipeline::*;
pub use render::*;
pub use scene::*;
pub use screen_buffer::*;
pub use shader::*;
pub use types::*;
