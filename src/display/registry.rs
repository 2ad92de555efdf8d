// src/display/registry.rs
//! Ordered list of display drivers and first-success selection.

use super::driver::{DisplayDriver, DriverDescriptor};
use super::drivers::{HeadlessDriver, X11Driver};
use crate::gpu::Gpu;
use anyhow::{bail, Result};
use log::{debug, info, warn};

/// The driver that won selection, with the GPU session it created.
pub struct SelectedDriver {
    pub name: &'static str,
    pub driver: Box<dyn DisplayDriver>,
    pub gpu: Box<dyn Gpu>,
}

#[derive(Debug, Default)]
pub struct DriverRegistry {
    descriptors: Vec<DriverDescriptor>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// X11 first, then the offscreen fallback.
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        registry.register(DriverDescriptor::new(X11Driver::NAME, || Box::new(X11Driver::new())));
        registry.register(DriverDescriptor::new(HeadlessDriver::NAME, || {
            Box::new(HeadlessDriver::new())
        }));
        registry
    }

    /// Appends a descriptor. Earlier registrations are tried first.
    pub fn register(&mut self, descriptor: DriverDescriptor) {
        debug!("Registered display driver '{}'", descriptor.name);
        self.descriptors.push(descriptor);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.descriptors.iter().map(|d| d.name).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Initialises drivers in registration order until one succeeds.
    ///
    /// A driver whose `init` fails is dropped before the next is tried.
    pub fn select(&self) -> Result<SelectedDriver> {
        if self.descriptors.is_empty() {
            bail!("no display drivers registered");
        }
        for descriptor in &self.descriptors {
            let mut driver = descriptor.instantiate();
            match driver.init() {
                Ok(gpu) => {
                    info!("Selected display driver '{}'", descriptor.name);
                    return Ok(SelectedDriver {
                        name: descriptor.name,
                        driver,
                        gpu,
                    });
                }
                Err(e) => warn!("Display driver '{}' failed to initialise: {:#}", descriptor.name, e),
            }
        }
        bail!(
            "failed to initialise any display driver (tried {})",
            self.names().join(", ")
        )
    }
}
