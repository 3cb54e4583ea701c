//! Diagnostic driver for v4l2 capture devices.
//!
//! The crate walks one capture device through its full streaming
//! lifecycle: open, format negotiation, buffer-slot allocation and
//! mapping, queueing, streaming, a bounded dequeue/consume/re-queue loop,
//! and unconditional teardown. Random pauses can be injected before every
//! control operation to shake out timing-sensitive bugs in the driver
//! under test.
//!
//! [`Session`] holds the sequencing contract; it talks to the device
//! through the [`traits::Capture`] seam so the contract itself is
//! testable without hardware. [`Device`] is the real implementation on
//! top of the raw wrappers in [`v4l2`].

pub mod v4l2;

pub mod buffer;

mod capability;
pub use capability::Capabilities;

pub mod delay;

mod device;
pub use device::Device;

mod error;
pub use error::Error;

mod format;
pub use format::{FieldOrder, Format};

mod fourcc;
pub use fourcc::FourCC;

pub mod memory;

mod session;
pub use session::{Config, Session, Summary};

pub mod traits;
