// src/gpu/mod.rs
//! GPU seam: the handful of EGL/GLES operations the engine needs.
//!
//! The `Gpu` trait is the only way the rest of the crate touches the rendering
//! API. `EglGpu` implements it over EGL + GLES2; tests use `MockGpu`, which
//! tracks how many images and textures are alive so leak and unwind behaviour
//! can be asserted without a GPU.
//!
//! ## Handle lifetime
//! `ImageHandle` and `TextureHandle` are plain copyable ids. Whoever receives
//! one from `import_dmabuf` / `create_external_texture` owns it and must hand
//! it back to `destroy_image` / `delete_texture` exactly once.

pub mod egl;
pub mod shader;

#[cfg(test)]
pub mod mock;

pub use egl::{EglGpu, SurfaceTarget};

use anyhow::Result;
use std::fmt;
use std::os::fd::BorrowedFd;

/// GL target for textures sampled through an external image.
pub const GL_TEXTURE_EXTERNAL_OES: u32 = 0x8D65;

/// Imported external image (an `EGLImageKHR`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub usize);

/// GL texture object name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

/// A four-character pixel format code, little-endian packed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub u32);

impl FourCc {
    pub const fn from_bytes(code: [u8; 4]) -> Self {
        FourCc(u32::from_le_bytes(code))
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.to_bytes() {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// Parameters for importing a single-plane dmabuf as an external image.
///
/// Only single-plane, single-buffer imports are supported, so the plane
/// offset is always zero.
#[derive(Debug, Clone, Copy)]
pub struct DmaBufImport<'fd> {
    pub fd: BorrowedFd<'fd>,
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCc,
    /// Bytes per line of plane 0.
    pub stride: u32,
}

impl DmaBufImport<'_> {
    pub const PLANE_OFFSET: u32 = 0;
}

/// The rendering API operations used by the engine, its drivers and textures.
///
/// All methods run on the render-loop thread with the engine's context
/// current, except `make_current` itself.
pub trait Gpu {
    /// Makes the rendering context current on the drawing surface.
    fn make_current(&self) -> Result<()>;

    /// Presents the back buffer.
    fn swap_buffers(&self) -> Result<()>;

    fn set_viewport(&self, width: i32, height: i32);

    /// Imports a kernel-shareable buffer as an external image.
    fn import_dmabuf(&self, import: &DmaBufImport<'_>) -> Result<ImageHandle>;

    fn destroy_image(&self, image: ImageHandle);

    /// Allocates a texture bound to the sampler-external target with linear
    /// filtering.
    fn create_external_texture(&self) -> Result<TextureHandle>;

    /// Points `texture` at the storage of `image`.
    fn attach_image(&self, texture: TextureHandle, image: ImageHandle) -> Result<()>;

    /// Binds `texture` to the sampler-external target of the active unit.
    fn bind_external_texture(&self, texture: TextureHandle);

    fn delete_texture(&self, texture: TextureHandle);

    /// Raw GL access for application drawing. `None` when there is no real
    /// GL context behind this implementation.
    fn gl(&self) -> Option<&glow::Context> {
        None
    }

    /// Releases the rendering context, then the surface, then the display
    /// connection. Must be idempotent.
    fn release(&mut self);
}
