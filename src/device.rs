use std::path::{Path, PathBuf};
use std::{io, mem, ptr};

use log::{debug, warn};

use crate::buffer;
use crate::capability::Capabilities;
use crate::format::Format;
use crate::memory::{Memory, Mmap};
use crate::traits::Capture;
use crate::v4l2;
use crate::v4l2::videodev::*;

/// A video4linux capture device node
///
/// Owns the file descriptor and the table of mapped buffer slots. The
/// descriptor is closed when the device is dropped; any slot still mapped
/// at that point is released first.
pub struct Device {
    slots: Vec<Option<Mmap>>,
    fd: std::os::raw::c_int,
    path: PathBuf,
}

impl Device {
    /// Opens the device node at `path` for streaming I/O
    ///
    /// # Arguments
    ///
    /// * `path` - Node path (e.g. "/dev/video0")
    ///
    /// # Example
    ///
    /// ```
    /// use v4l2_probe::Device;
    /// let dev = Device::with_path("/dev/video0");
    /// ```
    pub fn with_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let fd = v4l2::open(&path, libc::O_RDWR)?;

        Ok(Device {
            slots: Vec::new(),
            fd,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the node path the device was opened with
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Driver and card identification, for startup diagnostics
    pub fn query_caps(&self) -> io::Result<Capabilities> {
        unsafe {
            let mut v4l2_caps: v4l2_capability = mem::zeroed();
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_QUERYCAP,
                &mut v4l2_caps as *mut _ as *mut std::os::raw::c_void,
            )?;

            Ok(Capabilities::from(v4l2_caps))
        }
    }

    fn buf_desc(&self, index: u32) -> v4l2_buffer {
        let mut v4l2_buf: v4l2_buffer = unsafe { mem::zeroed() };
        v4l2_buf.type_ = buffer::Type::VideoCapture as u32;
        v4l2_buf.memory = Memory::Mmap as u32;
        v4l2_buf.index = index;
        v4l2_buf
    }

    fn slot_entry(&mut self, index: u32) -> io::Result<&mut Option<Mmap>> {
        self.slots.get_mut(index as usize).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("buffer slot {} was never requested", index),
            )
        })
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // Mappings of a still-open descriptor go first; Mmap's own drop
        // handles the munmap.
        self.slots.clear();
        if let Err(e) = v4l2::close(self.fd) {
            warn!("closing {} failed: {}", self.path.display(), e);
        }
    }
}

impl Capture for Device {
    fn set_format(&mut self, fmt: &Format) -> io::Result<Format> {
        unsafe {
            let mut v4l2_fmt: v4l2_format = mem::zeroed();
            v4l2_fmt.type_ = buffer::Type::VideoCapture as u32;
            v4l2_fmt.fmt.pix = (*fmt).into();
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_S_FMT,
                &mut v4l2_fmt as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        // The negotiated format is read back rather than trusted: drivers
        // are free to adjust geometry, pixelformat and sizes.
        unsafe {
            let mut v4l2_fmt: v4l2_format = mem::zeroed();
            v4l2_fmt.type_ = buffer::Type::VideoCapture as u32;
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_G_FMT,
                &mut v4l2_fmt as *mut _ as *mut std::os::raw::c_void,
            )?;

            Ok(Format::from(v4l2_fmt.fmt.pix))
        }
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut v4l2_reqbufs: v4l2_requestbuffers = unsafe { mem::zeroed() };
        v4l2_reqbufs.count = count;
        v4l2_reqbufs.type_ = buffer::Type::VideoCapture as u32;
        v4l2_reqbufs.memory = Memory::Mmap as u32;
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_REQBUFS,
                &mut v4l2_reqbufs as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        self.slots = (0..v4l2_reqbufs.count).map(|_| None).collect();
        Ok(v4l2_reqbufs.count)
    }

    fn map(&mut self, index: u32) -> io::Result<usize> {
        let mut v4l2_buf = self.buf_desc(index);
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_QUERYBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        let length = v4l2_buf.length as usize;
        let offset = unsafe { v4l2_buf.m.offset };
        let ptr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd,
                offset as libc::off_t,
            )?
        };

        *self.slot_entry(index)? = Some(Mmap::new(ptr, length));
        debug!("mapped buffer slot {} ({} bytes)", index, length);
        Ok(length)
    }

    fn unmap(&mut self, index: u32) -> io::Result<()> {
        match self.slot_entry(index)?.take() {
            Some(mapping) => mapping.unmap(),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("buffer slot {} is not mapped", index),
            )),
        }
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        let mut v4l2_buf = self.buf_desc(index);
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_QBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )
        }
    }

    fn dequeue(&mut self) -> io::Result<(u32, buffer::Metadata)> {
        let mut v4l2_buf = self.buf_desc(0);
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_DQBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        let meta = buffer::Metadata {
            bytesused: v4l2_buf.bytesused,
            sequence: v4l2_buf.sequence,
            flags: buffer::Flags::from(v4l2_buf.flags),
        };
        Ok((v4l2_buf.index, meta))
    }

    fn slot(&self, index: u32) -> Option<&[u8]> {
        self.slots
            .get(index as usize)?
            .as_ref()
            .map(Mmap::as_slice)
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut typ = buffer::Type::VideoCapture as std::os::raw::c_int;
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_STREAMON,
                &mut typ as *mut _ as *mut std::os::raw::c_void,
            )
        }
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut typ = buffer::Type::VideoCapture as std::os::raw::c_int;
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_STREAMOFF,
                &mut typ as *mut _ as *mut std::os::raw::c_void,
            )
        }
    }
}
