// src/lib.rs

//! Zero-copy camera textures: V4L2 capture buffers exported as dmabufs,
//! imported as EGL images and sampled through external GLES textures, hosted
//! by a pluggable display driver and a single-threaded render loop.

pub mod capture;
pub mod config;
pub mod display;
pub mod engine;
pub mod gpu;
pub mod texture;

pub use capture::{attach_capture_device, create_capture_texture};
pub use engine::{Application, Engine, EngineState, LoopControl};
