// src/texture/mod.rs
//! Shared-buffer textures: GL textures whose storage is an imported dmabuf.
//!
//! A `SharedTexture` pairs a GL texture with the external image it samples
//! from and, optionally, a `FrameSource` that knows how to pull new frame data
//! into that image. Textures live in a [`TextureRegistry`] owned by the engine.

pub mod registry;

#[cfg(test)]
mod tests;

pub use registry::{TextureId, TextureRegistry};

use crate::gpu::{DmaBufImport, FourCc, Gpu, ImageHandle, TextureHandle, GL_TEXTURE_EXTERNAL_OES};
use anyhow::{Context, Result};
use log::{debug, trace};

/// Outcome of a successful texture update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Nothing new arrived since the last update.
    Unchanged,
    /// The image now holds a newer frame.
    Refreshed,
}

impl FrameStatus {
    /// Numeric form: 0 for no new frame, 1 for a refreshed frame.
    pub fn code(self) -> i32 {
        match self {
            FrameStatus::Unchanged => 0,
            FrameStatus::Refreshed => 1,
        }
    }
}

/// Producer strategy attached to a shared texture.
pub trait FrameSource {
    /// Pulls new frame data into the texture's image. Must not block.
    fn update(&mut self) -> Result<FrameStatus>;

    /// Releases producer-owned resources. Runs once, before the texture's GPU
    /// objects are released.
    fn release(&mut self) {}
}

/// A GPU texture bound to an imported external buffer.
///
/// GPU objects are only freed by [`SharedTexture::release`]; dropping the
/// value leaks the texture and image. The engine owns every instance and
/// releases them on destroy and teardown.
pub struct SharedTexture {
    texture: TextureHandle,
    image: ImageHandle,
    width: u32,
    height: u32,
    fourcc: FourCc,
    source: Option<Box<dyn FrameSource>>,
    auto_update: bool,
    failure_streak: u32,
}

/// Destroys an external image on drop unless disarmed.
struct ImageGuard<'a> {
    gpu: &'a dyn Gpu,
    image: Option<ImageHandle>,
}

impl ImageGuard<'_> {
    fn disarm(&mut self) -> Option<ImageHandle> {
        self.image.take()
    }
}

impl Drop for ImageGuard<'_> {
    fn drop(&mut self) {
        if let Some(image) = self.image.take() {
            trace!("Unwinding external image {:?}", image);
            self.gpu.destroy_image(image);
        }
    }
}

/// Deletes a texture on drop unless disarmed.
struct TextureGuard<'a> {
    gpu: &'a dyn Gpu,
    texture: Option<TextureHandle>,
}

impl TextureGuard<'_> {
    fn disarm(&mut self) -> Option<TextureHandle> {
        self.texture.take()
    }
}

impl Drop for TextureGuard<'_> {
    fn drop(&mut self) {
        if let Some(texture) = self.texture.take() {
            trace!("Unwinding texture {:?}", texture);
            self.gpu.delete_texture(texture);
        }
    }
}

impl SharedTexture {
    /// Imports `import` as an external image and binds a new texture to it.
    ///
    /// On failure everything allocated so far is released in reverse order,
    /// and `source` is dropped. The result must be handed back through
    /// [`SharedTexture::release`].
    pub(crate) fn import(
        gpu: &dyn Gpu,
        import: &DmaBufImport<'_>,
        source: Option<Box<dyn FrameSource>>,
    ) -> Result<Self> {
        let image = gpu.import_dmabuf(import).context("Importing dmabuf as external image failed")?;
        let mut image_guard = ImageGuard {
            gpu,
            image: Some(image),
        };

        let texture = gpu
            .create_external_texture()
            .context("Allocating GL texture failed")?;
        let mut texture_guard = TextureGuard {
            gpu,
            texture: Some(texture),
        };

        gpu.attach_image(texture, image)
            .context("Creating gl texture from external image failed")?;

        let (Some(texture), Some(image)) = (texture_guard.disarm(), image_guard.disarm()) else {
            unreachable!("guards are only disarmed here");
        };
        debug!(
            "Created shared texture {:?} ({}x{} {}, stride {})",
            texture, import.width, import.height, import.fourcc, import.stride
        );
        Ok(Self {
            texture,
            image,
            width: import.width,
            height: import.height,
            fourcc: import.fourcc,
            source,
            auto_update: true,
            failure_streak: 0,
        })
    }

    /// Runs the attached source. A texture without one never changes.
    pub fn update(&mut self) -> Result<FrameStatus> {
        let Some(source) = self.source.as_mut() else {
            return Ok(FrameStatus::Unchanged);
        };
        match source.update() {
            Ok(status) => {
                self.failure_streak = 0;
                Ok(status)
            }
            Err(e) => {
                self.failure_streak = self.failure_streak.saturating_add(1);
                Err(e)
            }
        }
    }

    /// Releases the source, then the texture, then the image.
    pub fn release(mut self, gpu: &dyn Gpu) {
        if let Some(mut source) = self.source.take() {
            source.release();
        }
        gpu.delete_texture(self.texture);
        gpu.destroy_image(self.image);
        debug!("Released shared texture {:?}", self.texture);
    }

    pub fn play(&mut self) {
        self.auto_update = true;
    }

    pub fn pause(&mut self) {
        self.auto_update = false;
    }

    pub fn auto_update(&self) -> bool {
        self.auto_update
    }

    pub fn gl_texture(&self) -> TextureHandle {
        self.texture
    }

    /// The GL target to bind this texture to.
    pub fn gl_target(&self) -> u32 {
        GL_TEXTURE_EXTERNAL_OES
    }

    pub fn image(&self) -> ImageHandle {
        self.image
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn fourcc(&self) -> FourCc {
        self.fourcc
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Number of consecutive failed updates.
    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }
}

impl std::fmt::Debug for SharedTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTexture")
            .field("texture", &self.texture)
            .field("image", &self.image)
            .field("size", &(self.width, self.height))
            .field("fourcc", &self.fourcc)
            .field("has_source", &self.source.is_some())
            .field("auto_update", &self.auto_update)
            .finish()
    }
}
