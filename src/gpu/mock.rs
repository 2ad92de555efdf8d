// src/gpu/mock.rs
//! In-memory `Gpu` for tests: hands out ids, counts what is alive and can be
//! told to fail individual steps.

use super::{DmaBufImport, Gpu, ImageHandle, TextureHandle};
use anyhow::{bail, Result};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

/// Shared, ordered record of calls made across mocks.
pub type CallLog = Rc<RefCell<Vec<String>>>;

#[derive(Default)]
pub struct MockGpu {
    next_id: Cell<u32>,
    images: RefCell<HashSet<usize>>,
    textures: RefCell<HashSet<u32>>,
    bound: Cell<Option<u32>>,
    viewport: Cell<Option<(i32, i32)>>,
    last_stride: Cell<Option<u32>>,
    pub fail_import: Cell<bool>,
    pub fail_texture: Cell<bool>,
    pub fail_attach: Cell<bool>,
    pub fail_make_current: Cell<bool>,
    pub swaps: Cell<u32>,
    pub released: Cell<bool>,
    log: Option<CallLog>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log: Some(log),
            ..Self::default()
        }
    }

    fn record(&self, call: &str) {
        if let Some(log) = &self.log {
            log.borrow_mut().push(format!("gpu.{}", call));
        }
    }

    fn next(&self) -> u32 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    pub fn live_images(&self) -> usize {
        self.images.borrow().len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.borrow().len()
    }

    pub fn bound_texture(&self) -> Option<u32> {
        self.bound.get()
    }

    pub fn viewport(&self) -> Option<(i32, i32)> {
        self.viewport.get()
    }

    /// Stride of the most recent dmabuf import attempt.
    pub fn last_stride(&self) -> Option<u32> {
        self.last_stride.get()
    }
}

impl Gpu for MockGpu {
    fn make_current(&self) -> Result<()> {
        self.record("make_current");
        if self.fail_make_current.get() {
            bail!("mock make_current failure");
        }
        Ok(())
    }

    fn swap_buffers(&self) -> Result<()> {
        self.record("swap_buffers");
        self.swaps.set(self.swaps.get() + 1);
        Ok(())
    }

    fn set_viewport(&self, width: i32, height: i32) {
        self.viewport.set(Some((width, height)));
    }

    fn import_dmabuf(&self, import: &DmaBufImport<'_>) -> Result<ImageHandle> {
        self.last_stride.set(Some(import.stride));
        if self.fail_import.get() {
            bail!("mock import failure for {}x{}", import.width, import.height);
        }
        let id = self.next() as usize;
        self.images.borrow_mut().insert(id);
        Ok(ImageHandle(id))
    }

    fn destroy_image(&self, image: ImageHandle) {
        self.record("destroy_image");
        assert!(self.images.borrow_mut().remove(&image.0), "image {:?} destroyed twice", image);
    }

    fn create_external_texture(&self) -> Result<TextureHandle> {
        if self.fail_texture.get() {
            bail!("mock texture allocation failure");
        }
        let id = self.next();
        self.textures.borrow_mut().insert(id);
        Ok(TextureHandle(id))
    }

    fn attach_image(&self, texture: TextureHandle, image: ImageHandle) -> Result<()> {
        if self.fail_attach.get() {
            bail!("mock attach failure");
        }
        assert!(self.textures.borrow().contains(&texture.0));
        assert!(self.images.borrow().contains(&image.0));
        Ok(())
    }

    fn bind_external_texture(&self, texture: TextureHandle) {
        self.bound.set(Some(texture.0));
    }

    fn delete_texture(&self, texture: TextureHandle) {
        self.record("delete_texture");
        assert!(
            self.textures.borrow_mut().remove(&texture.0),
            "texture {:?} deleted twice",
            texture
        );
    }

    fn release(&mut self) {
        if !self.released.replace(true) {
            self.record("release");
        }
    }
}

/// Lets a test keep inspecting a `MockGpu` after handing it to the engine.
impl Gpu for Rc<MockGpu> {
    fn make_current(&self) -> Result<()> {
        (**self).make_current()
    }
    fn swap_buffers(&self) -> Result<()> {
        (**self).swap_buffers()
    }
    fn set_viewport(&self, width: i32, height: i32) {
        (**self).set_viewport(width, height)
    }
    fn import_dmabuf(&self, import: &DmaBufImport<'_>) -> Result<ImageHandle> {
        (**self).import_dmabuf(import)
    }
    fn destroy_image(&self, image: ImageHandle) {
        (**self).destroy_image(image)
    }
    fn create_external_texture(&self) -> Result<TextureHandle> {
        (**self).create_external_texture()
    }
    fn attach_image(&self, texture: TextureHandle, image: ImageHandle) -> Result<()> {
        (**self).attach_image(texture, image)
    }
    fn bind_external_texture(&self, texture: TextureHandle) {
        (**self).bind_external_texture(texture)
    }
    fn delete_texture(&self, texture: TextureHandle) {
        (**self).delete_texture(texture)
    }
    fn release(&mut self) {
        if !self.released.replace(true) {
            self.record("release");
        }
    }
}
