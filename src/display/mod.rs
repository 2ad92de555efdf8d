// src/display/mod.rs
//! Pluggable display backends.
//!
//! - DisplayDriver: native window + GPU session bring-up and per-frame hooks
//! - DriverRegistry: ordered driver list, first successful `init` wins

pub mod driver;
pub mod drivers;
pub mod registry;

#[cfg(test)]
pub mod mock;

pub use driver::{DisplayDriver, DriverDescriptor};
pub use drivers::{HeadlessDriver, X11Driver};
pub use registry::{DriverRegistry, SelectedDriver};
