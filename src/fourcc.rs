use std::{fmt, str};

/// Four character code representing a pixelformat
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct FourCC {
    repr: [u8; 4],
}

impl FourCC {
    /// Returns a pixelformat as four character code
    ///
    /// # Arguments
    ///
    /// * `repr` - Four characters as raw bytes
    ///
    /// # Example
    ///
    /// ```
    /// use v4l2_probe::FourCC;
    /// let fourcc = FourCC::new(b"RGB3");
    /// ```
    pub const fn new(repr: &[u8; 4]) -> FourCC {
        FourCC { repr: *repr }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(string) = str::from_utf8(&self.repr) {
            write!(f, "{}", string)?;
        }
        Ok(())
    }
}

impl From<u32> for FourCC {
    fn from(code: u32) -> Self {
        FourCC::new(&code.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(fourcc: FourCC) -> Self {
        u32::from_le_bytes(fourcc.repr)
    }
}
