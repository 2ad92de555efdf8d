// src/display/drivers/x11.rs
//! X11 display driver: one simple window with an EGL window surface on it.
//!
//! The X connection must outlive the EGL display created from it, so
//! `destroy()` only tears down the window; the connection is closed when the
//! driver is dropped, after the engine has released the GPU session.

use crate::config::CONFIG;
use crate::display::driver::DisplayDriver;
use crate::gpu::{EglGpu, Gpu, SurfaceTarget};
use anyhow::{anyhow, Context, Result};
use khronos_egl as egl;
use log::{debug, info, trace, warn};
use std::ffi::CString;
use std::ptr;
use x11::xlib;

/// An X server connection, closed on drop.
#[derive(Debug)]
struct ManagedDisplay {
    ptr: *mut xlib::Display,
}

impl ManagedDisplay {
    /// Opens the display named by `DISPLAY`.
    fn open() -> Result<Self> {
        let ptr = unsafe { xlib::XOpenDisplay(ptr::null()) };
        if ptr.is_null() {
            return Err(anyhow!(
                "Failed to open X display. Check DISPLAY environment variable or X server status."
            ));
        }
        debug!("X display opened: {:p}", ptr);
        Ok(Self { ptr })
    }

    #[inline]
    fn raw(&self) -> *mut xlib::Display {
        self.ptr
    }
}

impl Drop for ManagedDisplay {
    fn drop(&mut self) {
        info!("Closing X11 display connection: {:p}", self.ptr);
        unsafe {
            xlib::XCloseDisplay(self.ptr);
        }
    }
}

pub struct X11Driver {
    display: Option<ManagedDisplay>,
    window: xlib::Window,
    width_px: i32,
    height_px: i32,
}

impl X11Driver {
    pub const NAME: &'static str = "x11";

    pub fn new() -> Self {
        Self {
            display: None,
            window: 0,
            width_px: 0,
            height_px: 0,
        }
    }

    /// Creates, names and maps the window described by the window config.
    fn create_window(&self, display: &ManagedDisplay) -> Result<xlib::Window> {
        let config = &CONFIG.window;
        let title = CString::new(config.title.as_str()).context("Window title contains NUL")?;

        unsafe {
            let raw = display.raw();
            let screen = xlib::XDefaultScreen(raw);
            let root = xlib::XRootWindow(raw, screen);
            let window = xlib::XCreateSimpleWindow(
                raw,
                root,
                config.x,
                config.y,
                config.width,
                config.height,
                0,
                xlib::XBlackPixel(raw, screen),
                xlib::XBlackPixel(raw, screen),
            );
            if window == 0 {
                return Err(anyhow!("Failed to create X11 window"));
            }

            xlib::XSelectInput(raw, window, xlib::ExposureMask | xlib::KeyPressMask);
            xlib::XStoreName(raw, window, title.as_ptr());
            xlib::XMapWindow(raw, window);
            xlib::XFlush(raw);

            info!(
                "X11Driver: created window {} '{}' {}x{}+{}+{}",
                window, config.title, config.width, config.height, config.x, config.y
            );
            Ok(window)
        }
    }

    fn destroy_window(&mut self) {
        if self.window == 0 {
            return;
        }
        if let Some(display) = &self.display {
            unsafe {
                xlib::XDestroyWindow(display.raw(), self.window);
                xlib::XFlush(display.raw());
            }
            debug!("X11Driver: destroyed window {}", self.window);
        }
        self.window = 0;
    }

    /// Discards pending events. Input is not handled yet.
    fn drain_events(&mut self, display: *mut xlib::Display) {
        let mut drained = 0;
        unsafe {
            while xlib::XPending(display) > 0 {
                let mut event: xlib::XEvent = std::mem::zeroed();
                xlib::XNextEvent(display, &mut event);
                drained += 1;
            }
        }
        if drained > 0 {
            trace!("X11Driver: drained {} events", drained);
        }
    }
}

impl Default for X11Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayDriver for X11Driver {
    fn init(&mut self) -> Result<Box<dyn Gpu>> {
        let display = ManagedDisplay::open()?;
        let window = self.create_window(&display)?;
        self.window = window;
        let native_display = display.raw() as egl::NativeDisplayType;
        self.display = Some(display);

        // SAFETY: both the connection and the window stay alive until after
        // the engine releases the session (see module docs).
        let gpu = unsafe {
            EglGpu::new(native_display, SurfaceTarget::Window(window as egl::NativeWindowType))
        };
        match gpu {
            Ok(gpu) => Ok(Box::new(gpu)),
            Err(e) => {
                self.destroy_window();
                self.display = None;
                Err(e.context("Failed to create EGL session on X11 window"))
            }
        }
    }

    fn before_frame(&mut self, gpu: &dyn Gpu) {
        let Some(display) = self.display.as_ref().map(ManagedDisplay::raw) else {
            return;
        };
        if self.window == 0 {
            return;
        }
        self.drain_events(display);

        let mut attributes: xlib::XWindowAttributes = unsafe { std::mem::zeroed() };
        let status = unsafe { xlib::XGetWindowAttributes(display, self.window, &mut attributes) };
        if status == 0 {
            warn!("XGetWindowAttributes failed for window {}", self.window);
            return;
        }
        if (attributes.width, attributes.height) != (self.width_px, self.height_px) {
            debug!(
                "X11Driver: viewport {}x{} -> {}x{}",
                self.width_px, self.height_px, attributes.width, attributes.height
            );
            self.width_px = attributes.width;
            self.height_px = attributes.height;
        }
        gpu.set_viewport(self.width_px, self.height_px);
    }

    fn destroy(&mut self) {
        self.destroy_window();
    }
}

impl Drop for X11Driver {
    fn drop(&mut self) {
        self.destroy_window();
        // `display` closes the connection as it drops.
    }
}
