//! Offscreen display driver: an EGL pbuffer on the default display.

use crate::config::CONFIG;
use crate::display::driver::DisplayDriver;
use crate::gpu::{EglGpu, Gpu, SurfaceTarget};
use anyhow::{Context, Result};
use khronos_egl as egl;
use log::info;

pub struct HeadlessDriver {
    width_px: u32,
    height_px: u32,
    viewport_set: bool,
}

impl HeadlessDriver {
    pub const NAME: &'static str = "headless";

    pub fn new() -> Self {
        let window = &CONFIG.window;
        Self {
            width_px: window.width,
            height_px: window.height,
            viewport_set: false,
        }
    }
}

impl Default for HeadlessDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayDriver for HeadlessDriver {
    fn init(&mut self) -> Result<Box<dyn Gpu>> {
        info!(
            "HeadlessDriver: creating {}x{} pbuffer",
            self.width_px, self.height_px
        );
        // SAFETY: the default display needs no native connection.
        let gpu = unsafe {
            EglGpu::new(
                egl::DEFAULT_DISPLAY,
                SurfaceTarget::Pbuffer {
                    width: self.width_px,
                    height: self.height_px,
                },
            )
        }
        .context("Failed to create offscreen EGL session")?;
        Ok(Box::new(gpu))
    }

    fn before_frame(&mut self, gpu: &dyn Gpu) {
        // The pbuffer never resizes.
        if !self.viewport_set {
            gpu.set_viewport(self.width_px as i32, self.height_px as i32);
            self.viewport_set = true;
        }
    }
}
