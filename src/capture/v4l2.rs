// src/capture/v4l2.rs
//! Raw V4L2 bindings and the real capture device.
//!
//! Only the ioctls needed for single-buffer MMAP capture with dmabuf export
//! are bound. Struct layouts follow `linux/videodev2.h`.

#![allow(non_camel_case_types)]

use super::{BufferFlags, CaptureDevice, CaptureFormat, DeviceCapabilities, DeviceSpec};
use crate::gpu::FourCc;
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use nix::errno::Errno;
use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};

pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const V4L2_MEMORY_MMAP: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_fract {
    pub numerator: u32,
    pub denominator: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_cropcap {
    pub type_: u32,
    pub bounds: v4l2_rect,
    pub defrect: v4l2_rect,
    pub pixelaspect: v4l2_fract,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_crop {
    pub type_: u32,
    pub c: v4l2_rect,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_pix_format {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

/// The kernel union also holds `v4l2_window`, which contains pointers; the
/// pointer member reproduces its alignment.
#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_format_fmt {
    pub pix: v4l2_pix_format,
    pub raw_data: [u8; 200],
    _align: *mut c_void,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format_fmt,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_exportbuffer {
    pub type_: u32,
    pub index: u32,
    pub plane: u32,
    pub flags: u32,
    pub fd: i32,
    pub reserved: [u32; 11],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_buffer_m {
    pub offset: u32,
    pub userptr: libc::c_ulong,
    pub planes: *mut c_void,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: libc::timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer_m,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: i32,
}

impl v4l2_buffer {
    fn capture_mmap(index: u32) -> Self {
        // SAFETY: all-zero is a valid bit pattern for this plain C struct.
        let mut buf: Self = unsafe { std::mem::zeroed() };
        buf.index = index;
        buf.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = V4L2_MEMORY_MMAP;
        buf
    }
}

nix::ioctl_read!(vidioc_querycap, b'V', 0, v4l2_capability);
nix::ioctl_readwrite!(vidioc_g_fmt, b'V', 4, v4l2_format);
nix::ioctl_readwrite!(vidioc_reqbufs, b'V', 8, v4l2_requestbuffers);
nix::ioctl_readwrite!(vidioc_querybuf, b'V', 9, v4l2_buffer);
nix::ioctl_readwrite!(vidioc_qbuf, b'V', 15, v4l2_buffer);
nix::ioctl_readwrite!(vidioc_expbuf, b'V', 16, v4l2_exportbuffer);
nix::ioctl_readwrite!(vidioc_dqbuf, b'V', 17, v4l2_buffer);
nix::ioctl_write_ptr!(vidioc_streamon, b'V', 18, libc::c_int);
nix::ioctl_readwrite!(vidioc_cropcap, b'V', 58, v4l2_cropcap);
nix::ioctl_write_ptr!(vidioc_s_crop, b'V', 60, v4l2_crop);

/// A V4L2 capture device opened for non-blocking access.
#[derive(Debug)]
pub struct V4l2Device {
    file: File,
    name: String,
}

impl V4l2Device {
    /// Opens the device named by `spec`.
    ///
    /// An `fd:` spec takes ownership of the inherited descriptor: it is
    /// switched to non-blocking mode and closed when the device is dropped.
    pub fn open(spec: &DeviceSpec) -> Result<Self> {
        let name = spec.to_string();
        let file = match spec {
            DeviceSpec::Path(path) => OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(path)
                .with_context(|| format!("Cannot open '{}'", name))?,
            DeviceSpec::Fd(fd) => {
                // SAFETY: F_GETFD only reads descriptor flags; EBADF is reported, not UB.
                if unsafe { libc::fcntl(*fd, libc::F_GETFD) } == -1 {
                    return Err(std::io::Error::last_os_error())
                        .with_context(|| format!("Cannot identify '{}'", name));
                }
                // SAFETY: the descriptor is open and the caller hands it to us
                // via the fd: notation.
                let file = unsafe { File::from_raw_fd(*fd) };
                set_nonblocking(&file).with_context(|| format!("Cannot configure '{}'", name))?;
                file
            }
        };

        let metadata = file
            .metadata()
            .with_context(|| format!("Cannot identify '{}'", name))?;
        if !metadata.file_type().is_char_device() {
            bail!("{} isn't a device file", name);
        }
        debug!("Opened capture device {}", name);
        Ok(Self { file, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn fd(&self) -> libc::c_int {
        self.file.as_raw_fd()
    }
}

fn set_nonblocking(file: &File) -> std::io::Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: fcntl on a descriptor we own, with integer arguments only.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn c_string_field(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl CaptureDevice for V4l2Device {
    fn capabilities(&mut self) -> Result<DeviceCapabilities> {
        // SAFETY: v4l2_capability is plain data.
        let mut cap: v4l2_capability = unsafe { std::mem::zeroed() };
        match unsafe { vidioc_querycap(self.fd(), &mut cap) } {
            Ok(_) => {}
            Err(Errno::EINVAL) => bail!("{} isn't a V4L2 device", self.name),
            Err(e) => return Err(e).context("VIDIOC_QUERYCAP"),
        }
        info!(
            "Capture device {}: driver '{}', card '{}', bus '{}'",
            self.name,
            c_string_field(&cap.driver),
            c_string_field(&cap.card),
            c_string_field(&cap.bus_info)
        );
        Ok(DeviceCapabilities::from_bits_retain(cap.capabilities))
    }

    fn reset_crop(&mut self) {
        let mut cropcap = v4l2_cropcap {
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        if unsafe { vidioc_cropcap(self.fd(), &mut cropcap) }.is_err() {
            debug!("{}: cropping not supported", self.name);
            return;
        }
        let crop = v4l2_crop {
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            c: cropcap.defrect,
        };
        if let Err(e) = unsafe { vidioc_s_crop(self.fd(), &crop) } {
            // Many drivers refuse cropping; the default window is kept.
            debug!("{}: VIDIOC_S_CROP to default rect ignored: {}", self.name, e);
        }
    }

    fn format(&mut self) -> Result<CaptureFormat> {
        let mut fmt = v4l2_format {
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            fmt: v4l2_format_fmt { raw_data: [0; 200] },
        };
        unsafe { vidioc_g_fmt(self.fd(), &mut fmt) }.context("VIDIOC_G_FMT")?;
        // SAFETY: the kernel fills the `pix` member for VIDEO_CAPTURE formats.
        let pix = unsafe { fmt.fmt.pix };
        Ok(CaptureFormat {
            width: pix.width,
            height: pix.height,
            fourcc: FourCc(pix.pixelformat),
            bytes_per_line: pix.bytesperline,
            size_image: pix.sizeimage,
        })
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        let mut req = v4l2_requestbuffers {
            count,
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        match unsafe { vidioc_reqbufs(self.fd(), &mut req) } {
            Ok(_) => Ok(req.count),
            Err(Errno::EINVAL) => bail!("Video capturing or DMABUF streaming is not supported"),
            Err(e) => Err(e).context("VIDIOC_REQBUFS"),
        }
    }

    fn export_buffer(&mut self, index: u32) -> Result<OwnedFd> {
        let mut expbuf = v4l2_exportbuffer {
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            index,
            flags: libc::O_RDONLY as u32,
            ..Default::default()
        };
        unsafe { vidioc_expbuf(self.fd(), &mut expbuf) }.context("VIDIOC_EXPBUF")?;
        if expbuf.fd < 0 {
            return Err(anyhow!("VIDIOC_EXPBUF returned invalid fd {}", expbuf.fd));
        }
        // SAFETY: the kernel just created this descriptor for us.
        Ok(unsafe { OwnedFd::from_raw_fd(expbuf.fd) })
    }

    fn stream_on(&mut self) -> Result<()> {
        let kind = V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        unsafe { vidioc_streamon(self.fd(), &kind) }.context("VIDIOC_STREAMON")?;
        Ok(())
    }

    fn query_buffer(&mut self, index: u32) -> Result<BufferFlags> {
        let mut buf = v4l2_buffer::capture_mmap(index);
        unsafe { vidioc_querybuf(self.fd(), &mut buf) }.context("VIDIOC_QUERYBUF")?;
        Ok(BufferFlags::from_bits_retain(buf.flags))
    }

    fn dequeue_buffer(&mut self, index: u32) -> Result<BufferFlags> {
        let mut buf = v4l2_buffer::capture_mmap(index);
        unsafe { vidioc_dqbuf(self.fd(), &mut buf) }.context("VIDIOC_DQBUF")?;
        if buf.flags & BufferFlags::ERROR.bits() != 0 {
            warn!("{}: dequeued buffer {} is flagged as corrupted", self.name, buf.index);
        }
        Ok(BufferFlags::from_bits_retain(buf.flags))
    }

    fn queue_buffer(&mut self, index: u32) -> Result<()> {
        let mut buf = v4l2_buffer::capture_mmap(index);
        unsafe { vidioc_qbuf(self.fd(), &mut buf) }.context("VIDIOC_QBUF")?;
        Ok(())
    }
}
