use std::fmt;

use bitflags::bitflags;

/// Buffer type
///
/// Specific types of devices require buffers of corresponding types.
/// Only video capture is driven by this crate.
#[allow(clippy::unreadable_literal)]
#[repr(u32)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Type {
    VideoCapture = 1,
    VideoOutput = 2,
    VideoOverlay = 3,
}

bitflags! {
    /// Buffer state flags as reported by the driver
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct Flags: u32 {
        /// Buffer is mapped
        const MAPPED                = 0x00000001;
        /// Buffer is queued for processing
        const QUEUED                = 0x00000002;
        /// Buffer is ready
        const DONE                  = 0x00000004;
        /// Image is a keyframe (I-frame)
        const KEYFRAME              = 0x00000008;
        /// Image is a P-frame
        const PFRAME                = 0x00000010;
        /// Image is a B-frame
        const BFRAME                = 0x00000020;
        /// Buffer is ready, but the data contained within is corrupted
        const ERROR                 = 0x00000040;
        /// Timecode field is valid
        const TIMECODE              = 0x00000100;
        /// Buffer is prepared for queuing
        const PREPARED              = 0x00000400;
        /// Timestamp taken from a monotonic clock
        const TIMESTAMP_MONOTONIC   = 0x00002000;
        /// Timestamp copied from the output buffer
        const TIMESTAMP_COPY        = 0x00004000;
        /// Last buffer produced by the hardware
        const LAST                  = 0x00100000;
    }
}

impl From<u32> for Flags {
    fn from(flags: u32) -> Flags {
        Flags::from_bits_truncate(flags)
    }
}

impl From<Flags> for u32 {
    fn from(flags: Flags) -> Self {
        flags.bits()
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Descriptor of one dequeued frame
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    /// Number of payload bytes the driver wrote into the slot
    pub bytesused: u32,
    /// Frame counter as maintained by the driver
    pub sequence: u32,
    /// Buffer state flags
    pub flags: Flags,
}
