// src/gpu/shader.rs
//! Shader file loading, compilation and program linking.
//!
//! The stage is taken from the last three characters of the path:
//! `.vs` for vertex shaders and `.fs` for fragment shaders.

use anyhow::{anyhow, bail, Context, Result};
use glow::HasContext;
use log::{debug, error, warn};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub const SUPPORTED_SUFFIXES: &'static str = ".vs - vertex shader, .fs - fragment shader";

    /// Derives the stage from the path's three-character suffix.
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path.to_string_lossy();
        if name.len() < 3 {
            bail!("Invalid shader path {:?}", path);
        }
        match name.get(name.len() - 3..) {
            Some(".vs") => Ok(ShaderStage::Vertex),
            Some(".fs") => Ok(ShaderStage::Fragment),
            _ => bail!(
                "Shader file {:?} has unknown extension. Currently supported are: {}",
                path,
                Self::SUPPORTED_SUFFIXES
            ),
        }
    }

    pub fn gl_enum(self) -> u32 {
        match self {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        }
    }
}

/// Reads a shader source file and determines its stage.
pub fn read_shader_source(path: &Path) -> Result<(ShaderStage, String)> {
    let stage = ShaderStage::from_path(path)?;
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to open shader file {}", path.display()))?;
    if source.is_empty() {
        bail!("Shader file {} appears to be empty", path.display());
    }
    Ok((stage, source))
}

fn surface_info_log(what: &str, log: &str) {
    let log = log.trim_end();
    if !log.is_empty() {
        warn!("{} info log:\n{}", what, log);
    }
}

/// Loads and compiles one shader. The shader is deleted again if compilation
/// fails.
pub fn load_shader(gl: &glow::Context, path: &Path) -> Result<glow::NativeShader> {
    let (stage, source) = read_shader_source(path)?;
    unsafe {
        // Clear previous errors.
        for _ in 0..64 {
            if gl.get_error() == glow::NO_ERROR {
                break;
            }
        }
        let shader = gl
            .create_shader(stage.gl_enum())
            .map_err(|e| anyhow!("glCreateShader failed: {}", e))?;
        gl.shader_source(shader, &source);
        gl.compile_shader(shader);
        surface_info_log(&format!("Shader {}", path.display()), &gl.get_shader_info_log(shader));
        if !gl.get_shader_compile_status(shader) {
            gl.delete_shader(shader);
            error!("Compiling shader {} failed", path.display());
            bail!("Compiling shader {} failed", path.display());
        }
        debug!("Compiled {:?} shader {}", stage, path.display());
        Ok(shader)
    }
}

/// Links the given shaders into a program.
pub fn create_program(gl: &glow::Context, shaders: &[glow::NativeShader]) -> Result<glow::NativeProgram> {
    unsafe {
        let program = gl
            .create_program()
            .map_err(|e| anyhow!("glCreateProgram failed: {}", e))?;
        for &shader in shaders {
            gl.attach_shader(program, shader);
        }
        gl.link_program(program);
        surface_info_log("Program", &gl.get_program_info_log(program));
        if !gl.get_program_link_status(program) {
            gl.delete_program(program);
            error!("Linking shader program failed");
            bail!("Linking shader program failed");
        }
        Ok(program)
    }
}

/// A linked vertex + fragment program and the shaders it was built from.
#[derive(Debug)]
pub struct ShaderProgram {
    pub vertex: glow::NativeShader,
    pub fragment: glow::NativeShader,
    pub program: glow::NativeProgram,
}

impl ShaderProgram {
    pub fn load(gl: &glow::Context, vertex_path: &Path, fragment_path: &Path) -> Result<Self> {
        let fragment = load_shader(gl, fragment_path).context("Loading fragment shader failed")?;
        let vertex = match load_shader(gl, vertex_path) {
            Ok(vertex) => vertex,
            Err(e) => {
                unsafe { gl.delete_shader(fragment) };
                return Err(e.context("Loading vertex shader failed"));
            }
        };
        match create_program(gl, &[vertex, fragment]) {
            Ok(program) => Ok(Self {
                vertex,
                fragment,
                program,
            }),
            Err(e) => {
                unsafe {
                    gl.delete_shader(vertex);
                    gl.delete_shader(fragment);
                }
                Err(e)
            }
        }
    }

    pub fn attrib_location(&self, gl: &glow::Context, name: &str) -> Result<u32> {
        unsafe { gl.get_attrib_location(self.program, name) }
            .ok_or_else(|| anyhow!("{} attribute not found in shader program", name))
    }

    pub fn uniform_location(&self, gl: &glow::Context, name: &str) -> Result<glow::NativeUniformLocation> {
        unsafe { gl.get_uniform_location(self.program, name) }
            .ok_or_else(|| anyhow!("{} uniform not found in shader program", name))
    }

    pub fn delete(self, gl: &glow::Context) {
        unsafe {
            gl.delete_program(self.program);
            gl.delete_shader(self.vertex);
            gl.delete_shader(self.fragment);
        }
    }
}
