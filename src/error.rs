use std::io;

use thiserror::Error;

/// Fatal capture session failures.
///
/// Each variant names the lifecycle step that failed and carries the
/// underlying OS error. Non-fatal conditions (re-queue, stream-off and
/// unmap failures) are logged by the session instead of surfacing here.
#[derive(Debug, Error)]
pub enum Error {
    /// The device node could not be opened.
    #[error("cannot open capture device: {0}")]
    DeviceUnavailable(#[source] io::Error),

    /// Format negotiation failed outright.
    #[error("device rejected the requested format: {0}")]
    FormatRejected(#[source] io::Error),

    /// The driver refused to allocate buffers, or granted zero slots.
    #[error("buffer allocation failed: {0}")]
    BufferAllocationFailed(#[source] io::Error),

    /// Mapping a granted slot into the process failed.
    #[error("mapping buffer slot {index} failed: {source}")]
    MappingFailed {
        index: u32,
        #[source]
        source: io::Error,
    },

    /// The initial hand-over of a mapped slot to the driver failed.
    #[error("queueing buffer slot {index} failed: {source}")]
    QueueFailed {
        index: u32,
        #[source]
        source: io::Error,
    },

    /// The driver refused to start streaming.
    #[error("failed to start streaming: {0}")]
    StreamStartFailed(#[source] io::Error),

    /// Waiting for a filled slot failed; `frames` were captured before.
    #[error("dequeue failed after {frames} captured frames: {source}")]
    DequeueFailed {
        frames: u32,
        #[source]
        source: io::Error,
    },

    /// Writing a captured payload to the output sink failed.
    #[error("output sink error: {0}")]
    Sink(#[source] io::Error),
}
