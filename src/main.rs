//! softraster viewer
//!
//! Renders a mesh with the CPU rasterizer and presents each finished frame
//! through a macroquad window:
//! - Arrow keys pan the camera, Z/X or the mouse wheel dolly it
//! - Left-drag turns the camera toward a new look-at point
//! - `--bench N` orbits the target for N frames before handing over

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use macroquad::prelude as mq;

use softraster::{
    Color, DepthShader, FragmentShader, MeshData, PhongShader, Pipeline, RenderConfig,
    SceneObject, StandardVertexShader, Texture, TextureSampler, UnlitShader, Vec3, VERSION,
};

/// Camera pan/dolly speed in world units per second
const MOVE_SPEED: f32 = 2.0;
/// Look-at shift per dragged pixel
const DRAG_SCALE: f32 = 0.01;
/// Dolly distance per wheel notch
const WHEEL_STEP: f32 = 0.25;
/// Elevation of the benchmark orbit, radians
const BENCH_ELEVATION: f32 = 0.4;

#[derive(Parser)]
#[command(name = "softraster-viewer")]
#[command(about = "Render a mesh with the CPU software rasterizer", long_about = None)]
#[command(version)]
struct Cli {
    /// Render settings (RON); built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// OBJ mesh to render; a textured cube when omitted
    #[arg(short, long)]
    mesh: Option<PathBuf>,

    /// Uniform scale applied to the mesh on load
    #[arg(long, default_value = "1.0")]
    scale: f32,

    /// Texture image for the mesh; a checkerboard when omitted
    #[arg(short, long)]
    texture: Option<PathBuf>,

    /// Shade by view depth instead of lighting
    #[arg(long)]
    depth: bool,

    /// OBJ mesh drawn unlit around the scene
    #[arg(long)]
    skybox: Option<PathBuf>,

    /// Texture image for the skybox mesh
    #[arg(long, requires = "skybox")]
    skybox_texture: Option<PathBuf>,

    /// Uniform scale applied to the skybox mesh
    #[arg(long, default_value = "10.0")]
    skybox_scale: f32,

    /// Worker thread count, overriding the config
    #[arg(long)]
    threads: Option<usize>,

    /// Render this many frames orbiting the target before interactive use
    #[arg(long, value_name = "FRAMES")]
    bench: Option<u32>,
}

fn window_conf() -> mq::Conf {
    mq::Conf {
        window_title: format!("softraster v{}", VERSION),
        window_width: 1280,
        window_height: 720,
        window_resizable: true,
        ..Default::default()
    }
}

fn load_config(cli: &Cli) -> softraster::Result<RenderConfig> {
    let mut config = match &cli.config {
        Some(path) => RenderConfig::load(path)?,
        None => RenderConfig::default(),
    };
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    config.validate()?;
    Ok(config)
}

fn build_scene(cli: &Cli, config: &RenderConfig) -> softraster::Result<Vec<SceneObject>> {
    let mesh = match &cli.mesh {
        Some(path) => MeshData::load_obj(path, cli.scale)?,
        None => MeshData::cube().scaled(cli.scale),
    };

    let fragment: Box<dyn FragmentShader> = if cli.depth {
        Box::new(DepthShader)
    } else {
        let texture: Arc<dyn TextureSampler> = match &cli.texture {
            Some(path) => Arc::new(Texture::from_file(path)?),
            None => Arc::new(Texture::checkerboard(
                64,
                64,
                Color::new(220, 220, 220),
                Color::new(90, 90, 120),
            )),
        };
        Box::new(PhongShader::new(texture))
    };

    let mut objects = vec![SceneObject::with_task_size(mesh, config.triangles_per_task)?
        .with_shaders(Box::new(StandardVertexShader), fragment)?];

    if let Some(path) = &cli.skybox {
        let texture = match &cli.skybox_texture {
            Some(tex) => Texture::from_file(tex)?,
            None => Texture::new(1, 1),
        };
        let sky = SceneObject::with_task_size(MeshData::load_obj(path, cli.skybox_scale)?, config.triangles_per_task)?
            .with_shaders(Box::new(StandardVertexShader), Box::new(UnlitShader::new(Arc::new(texture))))?;
        objects.push(sky);
    }

    Ok(objects)
}

/// Frame size as macroquad texture dimensions, if it fits.
fn texture_size(width: usize, height: usize) -> Option<(u16, u16)> {
    Some((u16::try_from(width).ok()?, u16::try_from(height).ok()?))
}

/// Camera position on the benchmark orbit for frame `i` of `frames`.
fn orbit_position(target: Vec3, radius: f32, i: u32, frames: u32) -> Vec3 {
    let phi = std::f32::consts::TAU * i as f32 / frames.max(1) as f32;
    let dir = Vec3::new(
        phi.sin() * BENCH_ELEVATION.cos(),
        BENCH_ELEVATION.sin(),
        phi.cos() * BENCH_ELEVATION.cos(),
    );
    target + dir * radius
}

fn handle_input(pipeline: &mut Pipeline, last_mouse: &mut Option<(f32, f32)>) {
    let step = MOVE_SPEED * mq::get_frame_time();

    let mut dx = 0.0;
    let mut dy = 0.0;
    let mut dz = 0.0;
    if mq::is_key_down(mq::KeyCode::Left) {
        dx -= step;
    }
    if mq::is_key_down(mq::KeyCode::Right) {
        dx += step;
    }
    if mq::is_key_down(mq::KeyCode::Up) {
        dy += step;
    }
    if mq::is_key_down(mq::KeyCode::Down) {
        dy -= step;
    }
    if mq::is_key_down(mq::KeyCode::Z) {
        dz -= step;
    }
    if mq::is_key_down(mq::KeyCode::X) {
        dz += step;
    }

    let wheel = mq::mouse_wheel().1;
    if wheel != 0.0 {
        dz -= wheel.signum() * WHEEL_STEP;
    }

    if dx != 0.0 || dy != 0.0 || dz != 0.0 {
        pipeline.move_cam(dx, dy, dz);
    }

    if mq::is_mouse_button_down(mq::MouseButton::Left) {
        let pos = mq::mouse_position();
        if let Some((lx, ly)) = *last_mouse {
            let (mx, my) = (pos.0 - lx, pos.1 - ly);
            if mx != 0.0 || my != 0.0 {
                pipeline.move_at(mx * DRAG_SCALE, -my * DRAG_SCALE, 0.0);
            }
        }
        *last_mouse = Some(pos);
    } else {
        *last_mouse = None;
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let Some((width, height)) = texture_size(config.width, config.height) else {
        log::error!(
            "Frame size {}x{} is too large for a display texture",
            config.width,
            config.height
        );
        process::exit(1);
    };

    let objects = match build_scene(&cli, &config) {
        Ok(objects) => objects,
        Err(e) => {
            log::error!("Failed to build scene: {}", e);
            process::exit(1);
        }
    };

    let mut pipeline = match Pipeline::new(config, objects) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            log::error!("Failed to start renderer: {}", e);
            process::exit(1);
        }
    };

    let texture = mq::Texture2D::from_rgba8(width, height, pipeline.as_bytes());
    texture.set_filter(mq::FilterMode::Nearest);

    let start_pos = pipeline.geometry().camera_pos();
    let target = pipeline.geometry().target();
    let up = pipeline.geometry().up();
    let radius = (start_pos - target).length();

    let bench_frames = cli.bench.unwrap_or(0);
    let mut bench_frame = 0u32;
    let mut bench_time = Duration::ZERO;
    let mut last_mouse = None;

    loop {
        if mq::is_key_pressed(mq::KeyCode::Escape) {
            break;
        }

        let benchmarking = bench_frame < bench_frames;
        if benchmarking {
            pipeline.look_at(orbit_position(target, radius, bench_frame, bench_frames), target, up);
        } else {
            handle_input(&mut pipeline, &mut last_mouse);
        }

        let timings = match pipeline.update() {
            Ok(timings) => timings,
            Err(e) => {
                log::error!("Frame failed: {}", e);
                break;
            }
        };

        if benchmarking {
            bench_time += timings.total;
            bench_frame += 1;
            if bench_frame == bench_frames {
                log::info!(
                    "Benchmark: {} frames, {:.2} ms average",
                    bench_frames,
                    bench_time.as_secs_f64() * 1000.0 / bench_frames as f64
                );
                pipeline.look_at(start_pos, target, up);
            }
        }

        texture.update_from_bytes(u32::from(width), u32::from(height), pipeline.as_bytes());

        mq::clear_background(mq::BLACK);
        mq::draw_texture_ex(
            &texture,
            0.0,
            0.0,
            mq::WHITE,
            mq::DrawTextureParams {
                dest_size: Some(mq::vec2(mq::screen_width(), mq::screen_height())),
                ..Default::default()
            },
        );

        let hud = format!(
            "{:.1} ms  (vertex {:.1}, raster {:.1})",
            timings.total.as_secs_f32() * 1000.0,
            timings.vertex.as_secs_f32() * 1000.0,
            timings.raster.as_secs_f32() * 1000.0
        );
        mq::draw_text(&hud, 10.0, 24.0, 20.0, mq::WHITE);

        mq::next_frame().await;
    }

    if let Err(e) = pipeline.flush_perf_log() {
        log::warn!("Could not flush perf log: {}", e);
    }
}
