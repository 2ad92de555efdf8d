// src/capture/mod.rs
//! Video capture as a shared-texture producer.
//!
//! A capture device is negotiated for a single MMAP buffer, that buffer is
//! exported as a dmabuf and imported as the texture's external image. From
//! then on frames land in GPU-visible memory directly; the per-frame update
//! only cycles the buffer between the driver and us.
//!
//! Exactly one buffer (index 0) is used.

pub mod v4l2;

#[cfg(test)]
pub mod mock;

pub use v4l2::V4l2Device;

use crate::engine::Engine;
use crate::gpu::{DmaBufImport, FourCc};
use crate::texture::{FrameSource, FrameStatus, TextureId};
use anyhow::{anyhow, bail, Context, Result};
use bitflags::bitflags;
use log::{debug, info};
use std::fmt;
use std::os::fd::{AsFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::str::FromStr;

/// The only buffer slot ever requested from a device.
pub const BUFFER_INDEX: u32 = 0;

/// Bytes per pixel assumed when validating the reported stride.
const MIN_BYTES_PER_PIXEL: u32 = 2;

const FD_PREFIX: &str = "fd:";

bitflags! {
    /// Subset of `V4L2_CAP_*`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceCapabilities: u32 {
        const VIDEO_CAPTURE = 0x0000_0001;
        const STREAMING = 0x0400_0000;
        const DEVICE_CAPS = 0x8000_0000;
    }
}

bitflags! {
    /// Subset of `V4L2_BUF_FLAG_*`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferFlags: u32 {
        const MAPPED = 0x0000_0001;
        const QUEUED = 0x0000_0002;
        const DONE = 0x0000_0004;
        const ERROR = 0x0000_0040;
    }
}

/// How a capture device is named: a filesystem path or `fd:<n>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSpec {
    Path(PathBuf),
    Fd(RawFd),
}

impl FromStr for DeviceSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix(FD_PREFIX) {
            return match rest.trim().parse::<RawFd>() {
                Ok(fd) if fd >= 0 => Ok(DeviceSpec::Fd(fd)),
                _ => Err(anyhow!("Cannot parse fd '{}'", s)),
            };
        }
        if s.is_empty() {
            bail!("Empty capture device name");
        }
        Ok(DeviceSpec::Path(PathBuf::from(s)))
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Path(path) => write!(f, "{}", path.display()),
            DeviceSpec::Fd(fd) => write!(f, "{}{}", FD_PREFIX, fd),
        }
    }
}

/// Negotiated frame geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCc,
    pub bytes_per_line: u32,
    pub size_image: u32,
}

impl CaptureFormat {
    /// Raises stride and image size to their validated minimums.
    ///
    /// Some drivers report zero or short values; downstream import needs
    /// stride >= width * 2 and size >= stride * height.
    pub fn corrected(self) -> Self {
        let min_stride = self.width.saturating_mul(MIN_BYTES_PER_PIXEL);
        let bytes_per_line = self.bytes_per_line.max(min_stride);
        let min_size = bytes_per_line.saturating_mul(self.height);
        Self {
            bytes_per_line,
            size_image: self.size_image.max(min_size),
            ..self
        }
    }
}

/// The device operations the capture producer needs.
pub trait CaptureDevice {
    fn capabilities(&mut self) -> Result<DeviceCapabilities>;

    /// Resets cropping to the default rectangle. Best effort.
    fn reset_crop(&mut self);

    /// Current capture format as reported by the device.
    fn format(&mut self) -> Result<CaptureFormat>;

    /// Requests `count` MMAP buffers; returns how many were allocated.
    fn request_buffers(&mut self, count: u32) -> Result<u32>;

    /// Exports buffer `index` as a dmabuf descriptor.
    fn export_buffer(&mut self, index: u32) -> Result<OwnedFd>;

    fn stream_on(&mut self) -> Result<()>;

    fn query_buffer(&mut self, index: u32) -> Result<BufferFlags>;

    /// Takes a completed buffer back from the driver; returns its new flags.
    fn dequeue_buffer(&mut self, index: u32) -> Result<BufferFlags>;

    /// Hands an empty buffer to the driver for capture.
    fn queue_buffer(&mut self, index: u32) -> Result<()>;
}

/// Buffer-cycling frame source. Owns the device; the device handle keeps the
/// exported memory alive.
pub struct CaptureSource {
    device: Option<Box<dyn CaptureDevice>>,
}

impl CaptureSource {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self {
            device: Some(device),
        }
    }
}

impl FrameSource for CaptureSource {
    /// Polls the buffer's flags: dequeues it if complete, re-queues it if the
    /// driver doesn't hold it. A buffer that is neither is left for next time.
    fn update(&mut self) -> Result<FrameStatus> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| anyhow!("Capture device already closed"))?;

        let mut flags = device.query_buffer(BUFFER_INDEX)?;
        let mut status = FrameStatus::Unchanged;

        if flags.contains(BufferFlags::DONE) {
            flags = device.dequeue_buffer(BUFFER_INDEX)?;
            status = FrameStatus::Refreshed;
        }

        if !flags.contains(BufferFlags::QUEUED) {
            device.queue_buffer(BUFFER_INDEX)?;
        }

        Ok(status)
    }

    fn release(&mut self) {
        if self.device.take().is_some() {
            debug!("Capture device closed");
        }
    }
}

/// Opens `device` (a path or `fd:<n>`) and creates a texture fed by it.
pub fn create_capture_texture(engine: &mut Engine, device: &str) -> Result<TextureId> {
    let spec: DeviceSpec = device.parse()?;
    let device = V4l2Device::open(&spec).context("Failed to open v4l device")?;
    attach_capture_device(engine, Box::new(device))
}

/// Negotiates an already opened device and creates a texture fed by it.
///
/// On failure the device and any exported buffer are closed.
pub fn attach_capture_device(
    engine: &mut Engine,
    mut device: Box<dyn CaptureDevice>,
) -> Result<TextureId> {
    let (format, dmabuf) = prepare_device(device.as_mut()).context("Preparing capture device failed")?;

    device
        .stream_on()
        .context("Failed to start video capturing")?;

    let import = DmaBufImport {
        fd: dmabuf.as_fd(),
        width: format.width,
        height: format.height,
        fourcc: format.fourcc,
        stride: format.bytes_per_line,
    };
    let source = CaptureSource::new(device);
    let id = engine
        .create_shared_texture(&import, Some(Box::new(source)))
        .context("Failed to create texture from dma buffer")?;

    // The device handle keeps the buffer memory alive from here on.
    drop(dmabuf);

    info!(
        "Capture texture {:?}: {}x{} {} stride {}",
        id, format.width, format.height, format.fourcc, format.bytes_per_line
    );
    Ok(id)
}

/// Validates capabilities, negotiates geometry and exports buffer 0.
fn prepare_device(device: &mut dyn CaptureDevice) -> Result<(CaptureFormat, OwnedFd)> {
    let caps = device.capabilities()?;
    if !caps.contains(DeviceCapabilities::VIDEO_CAPTURE) {
        bail!("This is no video capture device");
    }
    if !caps.contains(DeviceCapabilities::STREAMING) {
        bail!("No streaming i/o support");
    }

    device.reset_crop();

    let reported = device.format()?;
    let format = reported.corrected();
    if format != reported {
        debug!("Corrected capture geometry {:?} -> {:?}", reported, format);
    }

    let allocated = device.request_buffers(1)?;
    if allocated == 0 {
        bail!("Device allocated no capture buffers");
    }

    let dmabuf = device.export_buffer(BUFFER_INDEX)?;
    Ok((format, dmabuf))
}
