use std::io;

use crate::buffer::Metadata;
use crate::format::Format;

/// Control surface of a capture driver, one method per control operation.
///
/// [`Device`](crate::Device) implements this against the kernel interface;
/// the session tests substitute a scripted stand-in. Buffer slots are
/// identified by the index the driver assigned when they were requested.
pub trait Capture {
    /// Negotiate the streaming format, returning the format actually in
    /// effect.
    ///
    /// Drivers adjust requests on a best effort basis; the returned value
    /// is authoritative for all buffer-size computations.
    fn set_format(&mut self, fmt: &Format) -> io::Result<Format>;

    /// Ask the driver for `count` memory-mapped buffer slots.
    ///
    /// Returns the granted count, which may be less than requested.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// Map slot `index` into the process address space, returning the
    /// mapped length in bytes.
    fn map(&mut self, index: u32) -> io::Result<usize>;

    /// Unmap slot `index`.
    ///
    /// Every mapped slot must be unmapped exactly once; unmapping a slot
    /// that is not mapped is an error.
    fn unmap(&mut self, index: u32) -> io::Result<()>;

    /// Hand slot `index` to the driver for filling.
    ///
    /// Queueing transfers ownership: the slot contents must not be touched
    /// until the slot comes back out of [`Capture::dequeue`].
    fn queue(&mut self, index: u32) -> io::Result<()>;

    /// Block until the driver hands back a filled slot.
    ///
    /// Returns the slot index and the frame metadata, including the number
    /// of valid payload bytes.
    fn dequeue(&mut self) -> io::Result<(u32, Metadata)>;

    /// Read view of a mapped slot, or `None` if `index` is not mapped.
    ///
    /// The data is only valid between a dequeue and the matching re-queue
    /// of that slot.
    fn slot(&self, index: u32) -> Option<&[u8]>;

    /// Enable capture.
    fn stream_on(&mut self) -> io::Result<()>;

    /// Disable capture.
    fn stream_off(&mut self) -> io::Result<()>;
}
