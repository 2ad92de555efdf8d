// src/display/drivers/mod.rs
//! Concrete display drivers.

pub mod headless;
pub mod x11;

pub use headless::HeadlessDriver;
pub use x11::X11Driver;
