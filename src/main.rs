// src/main.rs

//! Demo renderer: shows the camera on a quad until interrupted.

use camtex::config::CONFIG;
use camtex::display::DriverRegistry;
use camtex::gpu::shader::ShaderProgram;
use camtex::texture::TextureId;
use camtex::{create_capture_texture, Application, Engine, LoopControl};

use anyhow::{anyhow, Context, Result};
use glow::HasContext;
use log::{info, warn};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};

/// Two triangles, interleaved `x y z u v`.
#[rustfmt::skip]
const QUAD: [f32; 30] = [
    -0.5, -0.5, 0.0,  1.0, 1.0,
     0.5, -0.5, 0.0,  0.0, 1.0,
    -0.5,  0.5, 0.0,  1.0, 0.0,
    -0.5,  0.5, 0.0,  1.0, 0.0,
     0.5, -0.5, 0.0,  0.0, 1.0,
     0.5,  0.5, 0.0,  0.0, 0.0,
];
const FLOATS_PER_VERTEX: usize = 5;
const VERTEX_COUNT: i32 = (QUAD.len() / FLOATS_PER_VERTEX) as i32;
const STRIDE: i32 = (FLOATS_PER_VERTEX * std::mem::size_of::<f32>()) as i32;
const TEXCOORD_OFFSET: i32 = (3 * std::mem::size_of::<f32>()) as i32;

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_stop(_: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

/// Lets SIGINT/SIGTERM end the loop so cleanup still runs.
fn install_stop_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(request_stop),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic.
        unsafe { signal::sigaction(sig, &action) }
            .with_context(|| format!("Failed to install {} handler", sig))?;
    }
    Ok(())
}

/// GL objects owned by the demo, kept in the engine's application slot.
struct Scene {
    program: ShaderProgram,
    position: u32,
    texture_coordinate: u32,
    sampler: glow::NativeUniformLocation,
    quad: glow::NativeBuffer,
    camera: Option<TextureId>,
}

impl Scene {
    fn new(gl: &glow::Context) -> Result<Self> {
        let shaders = &CONFIG.shaders;
        let program = ShaderProgram::load(gl, &shaders.vertex, &shaders.fragment)
            .context("Failed to build the camera shader program")?;

        let locations = (|| -> Result<_> {
            Ok((
                program.attrib_location(gl, "position")?,
                program.attrib_location(gl, "texture_coordinate")?,
                program.uniform_location(gl, "texture")?,
            ))
        })();
        let (position, texture_coordinate, sampler) = match locations {
            Ok(locations) => locations,
            Err(e) => {
                program.delete(gl);
                return Err(e);
            }
        };

        let quad = match unsafe { upload_quad(gl) } {
            Ok(quad) => quad,
            Err(e) => {
                program.delete(gl);
                return Err(e);
            }
        };

        Ok(Self {
            program,
            position,
            texture_coordinate,
            sampler,
            quad,
            camera: None,
        })
    }

    fn delete(self, gl: &glow::Context) {
        unsafe { gl.delete_buffer(self.quad) };
        self.program.delete(gl);
    }
}

unsafe fn upload_quad(gl: &glow::Context) -> Result<glow::NativeBuffer> {
    let buffer = gl
        .create_buffer()
        .map_err(|e| anyhow!("create_buffer: {}", e))?;
    let bytes = core::slice::from_raw_parts(
        QUAD.as_ptr() as *const u8,
        QUAD.len() * core::mem::size_of::<f32>(),
    );
    gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
    gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytes, glow::STATIC_DRAW);
    gl.bind_buffer(glow::ARRAY_BUFFER, None);
    Ok(buffer)
}

struct CameraView {
    device: String,
    autoplay: bool,
}

impl Application for CameraView {
    fn init(&mut self, engine: &mut Engine) -> Result<()> {
        let gl = engine
            .gl()
            .ok_or_else(|| anyhow!("Display driver '{}' has no GL context", engine.driver_name()))?;
        let scene = Scene::new(gl)?;
        engine.set_app_data(scene);

        let camera = create_capture_texture(engine, &self.device)
            .with_context(|| format!("Failed to create camera texture from {}", self.device))?;
        if !self.autoplay {
            info!("Autoplay disabled; camera texture starts paused");
            engine.pause(camera);
        }
        if let Some(scene) = engine.app_data_mut::<Scene>() {
            scene.camera = Some(camera);
        }
        Ok(())
    }

    fn frame(&mut self, engine: &mut Engine) -> Result<LoopControl> {
        if STOP_REQUESTED.load(Ordering::SeqCst) {
            info!("Stop requested");
            return Ok(LoopControl::Stop);
        }
        let gl = engine.gl().ok_or_else(|| anyhow!("GL context went away"))?;
        let scene = engine
            .app_data::<Scene>()
            .ok_or_else(|| anyhow!("Scene missing from application data"))?;
        let [r, g, b, a] = CONFIG.render.clear_color;

        unsafe {
            gl.use_program(Some(scene.program.program));
            gl.clear_color(r, g, b, a);
            gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);

            gl.bind_buffer(glow::ARRAY_BUFFER, Some(scene.quad));
            gl.vertex_attrib_pointer_f32(scene.position, 3, glow::FLOAT, false, STRIDE, 0);
            gl.enable_vertex_attrib_array(scene.position);
            gl.vertex_attrib_pointer_f32(
                scene.texture_coordinate,
                2,
                glow::FLOAT,
                false,
                STRIDE,
                TEXCOORD_OFFSET,
            );
            gl.enable_vertex_attrib_array(scene.texture_coordinate);

            gl.active_texture(glow::TEXTURE0);
        }
        if let Some(camera) = scene.camera {
            engine.bind_texture(camera);
        }
        unsafe {
            gl.uniform_1_i32(Some(&scene.sampler), 0);
            gl.draw_arrays(glow::TRIANGLES, 0, VERTEX_COUNT);
        }
        Ok(LoopControl::Continue)
    }

    fn cleanup(&mut self, engine: &mut Engine) {
        let Some(scene) = engine.take_app_data::<Scene>() else {
            return;
        };
        engine.destroy_texture(scene.camera);
        match engine.gl() {
            Some(gl) => scene.delete(gl),
            None => warn!("No GL context left to delete scene objects"),
        }
    }
}

/// Main entry point for the `camtex` demo.
fn main() -> Result<()> {
    // Initialize the logger. Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting camtex...");

    let device = std::env::args()
        .nth(1)
        .unwrap_or_else(|| CONFIG.capture.device.clone());
    info!("Capture device: {}", device);

    install_stop_handlers()?;

    let registry = DriverRegistry::with_builtin_drivers();
    let engine = Engine::start(&registry).context("Engine startup failed")?;

    let mut app = CameraView {
        device,
        autoplay: CONFIG.capture.autoplay,
    };
    engine.run(&mut app)?;

    info!("camtex exited cleanly.");
    Ok(())
}
