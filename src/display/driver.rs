// src/display/driver.rs
//! DisplayDriver trait - the windowing/context backend behind an engine.
//!
//! ## Lifecycle
//! 1. Factory - pure construction, no native resources.
//! 2. `init()` - create the native window (if any) and the EGL session on it.
//! 3. `before_frame` / `after_frame` - once per frame, context current.
//! 4. `destroy()` - release native resources created by `init`, called after
//!    every texture is gone and before the GPU session is released.
//! 5. `Drop` - anything that must outlive the GPU session (the X connection).
//!
//! Every hook except `init` has a no-op default.

use crate::gpu::Gpu;
use anyhow::{bail, Result};

pub trait DisplayDriver {
    /// Brings up the native surface and returns the GPU session drawing to it.
    fn init(&mut self) -> Result<Box<dyn Gpu>> {
        bail!("display driver has no init")
    }

    /// Refreshes per-frame environment such as the viewport.
    fn before_frame(&mut self, _gpu: &dyn Gpu) {}

    fn after_frame(&mut self, _gpu: &dyn Gpu) {}

    fn destroy(&mut self) {}
}

/// A named driver factory, as held by the registry.
pub struct DriverDescriptor {
    pub name: &'static str,
    factory: Box<dyn Fn() -> Box<dyn DisplayDriver>>,
}

impl DriverDescriptor {
    pub fn new(name: &'static str, factory: impl Fn() -> Box<dyn DisplayDriver> + 'static) -> Self {
        Self {
            name,
            factory: Box::new(factory),
        }
    }

    /// A fresh, uninitialised driver instance.
    pub fn instantiate(&self) -> Box<dyn DisplayDriver> {
        (self.factory)()
    }
}

impl std::fmt::Debug for DriverDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverDescriptor").field("name", &self.name).finish()
    }
}
