// src/capture/mock.rs
//! Scriptable single-buffer capture device for tests.

use super::{BufferFlags, CaptureDevice, CaptureFormat, DeviceCapabilities};
use crate::gpu::FourCc;
use anyhow::{bail, Context, Result};
use std::cell::Cell;
use std::fs::File;
use std::os::fd::OwnedFd;
use std::rc::Rc;

/// Device operations a test can make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Capabilities,
    Format,
    RequestBuffers,
    ExportBuffer,
    StreamOn,
    QueryBuffer,
    DequeueBuffer,
    QueueBuffer,
}

/// Counters a test keeps after the device has been boxed away.
#[derive(Debug, Default)]
pub struct DeviceCounters {
    pub closed: Cell<bool>,
    pub streaming: Cell<bool>,
    pub queued: Cell<u32>,
    pub dequeued: Cell<u32>,
    /// Set to make the driver finish the buffer before the next query.
    pub complete_next: Cell<bool>,
}

pub struct MockCaptureDevice {
    pub caps: DeviceCapabilities,
    pub format: CaptureFormat,
    pub allocated: u32,
    pub fail_at: Option<Step>,
    /// Whether the driver holds the buffer.
    pub queued: bool,
    counters: Rc<DeviceCounters>,
}

impl MockCaptureDevice {
    pub fn new() -> (Self, Rc<DeviceCounters>) {
        let counters = Rc::new(DeviceCounters::default());
        let device = Self {
            caps: DeviceCapabilities::VIDEO_CAPTURE | DeviceCapabilities::STREAMING,
            format: CaptureFormat {
                width: 640,
                height: 480,
                fourcc: FourCc::from_bytes(*b"YUYV"),
                bytes_per_line: 1280,
                size_image: 1280 * 480,
            },
            allocated: 1,
            fail_at: None,
            queued: false,
            counters: counters.clone(),
        };
        (device, counters)
    }

    fn check(&self, step: Step) -> Result<()> {
        if self.fail_at == Some(step) {
            bail!("mock {:?} failure", step);
        }
        Ok(())
    }

    fn flags(&self) -> BufferFlags {
        let mut flags = BufferFlags::MAPPED;
        if self.queued {
            flags |= BufferFlags::QUEUED;
        }
        if self.queued && self.counters.complete_next.get() {
            flags = (flags - BufferFlags::QUEUED) | BufferFlags::DONE;
        }
        flags
    }
}

impl CaptureDevice for MockCaptureDevice {
    fn capabilities(&mut self) -> Result<DeviceCapabilities> {
        self.check(Step::Capabilities)?;
        Ok(self.caps)
    }

    fn reset_crop(&mut self) {}

    fn format(&mut self) -> Result<CaptureFormat> {
        self.check(Step::Format)?;
        Ok(self.format)
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        self.check(Step::RequestBuffers)?;
        Ok(self.allocated.min(count))
    }

    fn export_buffer(&mut self, _index: u32) -> Result<OwnedFd> {
        self.check(Step::ExportBuffer)?;
        let file = File::open("/dev/null").context("open /dev/null")?;
        Ok(OwnedFd::from(file))
    }

    fn stream_on(&mut self) -> Result<()> {
        self.check(Step::StreamOn)?;
        self.counters.streaming.set(true);
        Ok(())
    }

    fn query_buffer(&mut self, _index: u32) -> Result<BufferFlags> {
        self.check(Step::QueryBuffer)?;
        Ok(self.flags())
    }

    fn dequeue_buffer(&mut self, _index: u32) -> Result<BufferFlags> {
        self.check(Step::DequeueBuffer)?;
        if !self.flags().contains(BufferFlags::DONE) {
            bail!("mock dequeue with no completed buffer");
        }
        self.queued = false;
        self.counters.complete_next.set(false);
        self.counters.dequeued.set(self.counters.dequeued.get() + 1);
        Ok(self.flags())
    }

    fn queue_buffer(&mut self, _index: u32) -> Result<()> {
        self.check(Step::QueueBuffer)?;
        if self.queued {
            bail!("mock buffer queued twice");
        }
        self.queued = true;
        self.counters.queued.set(self.counters.queued.get() + 1);
        Ok(())
    }
}

impl Drop for MockCaptureDevice {
    fn drop(&mut self) {
        self.counters.closed.set(true);
    }
}
