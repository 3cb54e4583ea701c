use std::convert::TryFrom;
use std::{fmt, mem};

use crate::fourcc::FourCC;
use crate::v4l2::videodev::v4l2_pix_format;

/// Represents how fields are interlaced (if they are)
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u32)]
pub enum FieldOrder {
    /// Driver picks progressive, top, bottom or interlaced
    Any = 0,
    /// Progressive, not interlaced
    Progressive = 1,
    /// Top, or odd, field
    Top = 2,
    /// Bottom, or even, field
    Bottom = 3,
    /// Both fields interlaced
    Interlaced = 4,
    /// Top field stored first, then bottom field
    SequentialTB = 5,
    /// Bottom field stored first, then top field
    SequentialBT = 6,
    /// One field at a time, alternating
    Alternate = 7,
    /// Both fields interlaced, starts with top
    InterlacedTB = 8,
    /// Both fields interlaced, starts with bottom
    InterlacedBT = 9,
}

impl fmt::Display for FieldOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Progressive => write!(f, "progressive"),
            Self::Top => write!(f, "top"),
            Self::Bottom => write!(f, "bottom"),
            Self::Interlaced => write!(f, "interlaced"),
            Self::SequentialTB => write!(f, "sequential, top then bottom"),
            Self::SequentialBT => write!(f, "sequential, bottom then top"),
            Self::Alternate => write!(f, "alternate between fields"),
            Self::InterlacedTB => write!(f, "interlaced, starting with top"),
            Self::InterlacedBT => write!(f, "interlaced, starting with bottom"),
        }
    }
}

impl TryFrom<u32> for FieldOrder {
    type Error = ();

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Any),
            1 => Ok(Self::Progressive),
            2 => Ok(Self::Top),
            3 => Ok(Self::Bottom),
            4 => Ok(Self::Interlaced),
            5 => Ok(Self::SequentialTB),
            6 => Ok(Self::SequentialBT),
            7 => Ok(Self::Alternate),
            8 => Ok(Self::InterlacedTB),
            9 => Ok(Self::InterlacedBT),
            _ => Err(()),
        }
    }
}

/// Streaming format (single-planar)
///
/// A format passed to the device is a request; drivers adjust it on a best
/// effort basis and the readback after negotiation is authoritative, in
/// particular for `stride` and `size`.
#[derive(Debug, Copy, Clone)]
pub struct Format {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixelformat code
    pub fourcc: FourCC,
    /// Field order for interlacing
    pub field_order: FieldOrder,

    /// Bytes per line
    pub stride: u32,
    /// Maximum number of bytes required to store an image
    pub size: u32,
}

impl Format {
    /// Returns a capture format request
    ///
    /// Stride and size are left for the driver to fill in.
    ///
    /// # Arguments
    ///
    /// * `width` - Width in pixels
    /// * `height` - Height in pixels
    /// * `fourcc` - Four character code (pixelformat)
    ///
    /// # Example
    ///
    /// ```
    /// use v4l2_probe::{Format, FourCC};
    /// let fmt = Format::new(1280, 720, FourCC::new(b"RGB3"));
    /// ```
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Format {
            width,
            height,
            fourcc,
            field_order: FieldOrder::Progressive,
            stride: 0,
            size: 0,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "width          : {}", self.width)?;
        writeln!(f, "height         : {}", self.height)?;
        writeln!(f, "fourcc         : {}", self.fourcc)?;
        writeln!(f, "field          : {}", self.field_order)?;
        writeln!(f, "stride         : {}", self.stride)?;
        writeln!(f, "size           : {}", self.size)?;
        Ok(())
    }
}

impl From<v4l2_pix_format> for Format {
    fn from(fmt: v4l2_pix_format) -> Self {
        Self {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.pixelformat),
            field_order: FieldOrder::try_from(fmt.field).unwrap_or(FieldOrder::Any),
            stride: fmt.bytesperline,
            size: fmt.sizeimage,
        }
    }
}

impl From<Format> for v4l2_pix_format {
    fn from(format: Format) -> Self {
        Self {
            width: format.width,
            height: format.height,
            pixelformat: format.fourcc.into(),
            field: format.field_order as u32,
            bytesperline: format.stride,
            sizeimage: format.size,
            ..unsafe { mem::zeroed() }
        }
    }
}
