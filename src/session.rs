use std::io::{self, Write};
use std::thread;

use log::{debug, info, trace, warn};

use crate::delay::{Delay, NoDelay};
use crate::error::Error;
use crate::format::Format;
use crate::fourcc::FourCC;
use crate::traits::Capture;

/// Capture session configuration
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Requested frame geometry and pixel encoding
    pub format: Format,
    /// Number of driver buffer slots to ask for
    pub buffers: u32,
    /// Number of frames to capture
    pub frames: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            format: Format::new(1280, 720, FourCC::new(b"RGB3")),
            buffers: 4,
            frames: 1,
        }
    }
}

/// Result of a capture run that made it through clean teardown
#[derive(Debug, Clone, Copy)]
pub struct Summary {
    /// Frames captured and written to the sink
    pub frames: u32,
    /// Total payload bytes written
    pub bytes: u64,
    /// Format the device actually streamed
    pub format: Format,
    /// Buffer slots granted by the driver
    pub slots: u32,
}

/// Drives a capture device through its full streaming lifecycle.
///
/// The lifecycle is a linear sequence: negotiate the format, request
/// buffer slots, map every granted slot, queue them all, start streaming,
/// run the per-frame dequeue/consume/re-queue cycle, stop streaming,
/// unmap. There is no way back except through errors, which are terminal:
///
/// * before streaming starts, any failure aborts the session after
///   unwinding what was already acquired, in reverse order;
/// * once streaming, a dequeue or sink failure stops the loop but frames
///   already written to the sink are preserved;
/// * re-queue, stream-off and unmap failures are logged and do not stop
///   teardown.
///
/// Every mapped slot is unmapped exactly once on every exit path. The
/// device handle itself is released when the session (and with it the
/// device) is dropped.
pub struct Session<D> {
    dev: D,
    config: Config,
    delay: Box<dyn Delay>,
}

impl<D: Capture> Session<D> {
    /// Returns a session over `dev` with no fault-injection pauses
    pub fn new(dev: D, config: Config) -> Self {
        Self::with_delay(dev, config, Box::new(NoDelay))
    }

    /// Returns a session that pauses per `delay` before every driver
    /// control operation
    pub fn with_delay(dev: D, config: Config, delay: Box<dyn Delay>) -> Self {
        Session { dev, config, delay }
    }

    /// Runs the whole lifecycle, appending every captured payload to
    /// `sink` in capture order, without framing.
    pub fn capture<W: Write>(mut self, sink: &mut W) -> Result<Summary, Error> {
        self.pause("VIDIOC_S_FMT");
        let format = self
            .dev
            .set_format(&self.config.format)
            .map_err(Error::FormatRejected)?;
        if format.width != self.config.format.width
            || format.height != self.config.format.height
            || format.fourcc != self.config.format.fourcc
        {
            info!(
                "driver adjusted the format to {}x{} {}",
                format.width, format.height, format.fourcc
            );
        }

        self.pause("VIDIOC_REQBUFS");
        let granted = self
            .dev
            .request_buffers(self.config.buffers)
            .map_err(Error::BufferAllocationFailed)?;
        if granted == 0 {
            return Err(Error::BufferAllocationFailed(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "driver granted zero buffer slots",
            )));
        }
        if granted != self.config.buffers {
            info!(
                "requested {} buffer slots, driver granted {}",
                self.config.buffers, granted
            );
        }

        // A failure on slot i leaves i mapped slots behind; unwind exactly
        // those before reporting.
        for index in 0..granted {
            self.pause("VIDIOC_QUERYBUF");
            if let Err(source) = self.dev.map(index) {
                self.unmap_slots(index);
                return Err(Error::MappingFailed { index, source });
            }
        }

        let result = self.stream(granted, format, sink);
        self.unmap_slots(granted);
        result
    }

    /// Queue all slots, stream, capture, stop. Mappings outlive this and
    /// are released by the caller.
    fn stream<W: Write>(
        &mut self,
        granted: u32,
        format: Format,
        sink: &mut W,
    ) -> Result<Summary, Error> {
        for index in 0..granted {
            self.pause("VIDIOC_QBUF");
            self.dev
                .queue(index)
                .map_err(|source| Error::QueueFailed { index, source })?;
        }

        self.pause("VIDIOC_STREAMON");
        self.dev.stream_on().map_err(Error::StreamStartFailed)?;
        info!("streaming started");

        let result = self.capture_loop(sink).map(|bytes| Summary {
            frames: self.config.frames,
            bytes,
            format,
            slots: granted,
        });

        self.pause("VIDIOC_STREAMOFF");
        if let Err(e) = self.dev.stream_off() {
            warn!("stopping the stream failed: {}", e);
        }

        result
    }

    fn capture_loop<W: Write>(&mut self, sink: &mut W) -> Result<u64, Error> {
        let mut frames = 0;
        let mut bytes = 0u64;

        while frames < self.config.frames {
            self.pause("VIDIOC_DQBUF");
            let (index, meta) = self
                .dev
                .dequeue()
                .map_err(|source| Error::DequeueFailed { frames, source })?;

            let written = {
                let slot = self.dev.slot(index).ok_or_else(|| Error::DequeueFailed {
                    frames,
                    source: io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("driver returned unmapped buffer slot {}", index),
                    ),
                })?;
                let used = (meta.bytesused as usize).min(slot.len());
                sink.write_all(&slot[..used]).map_err(Error::Sink)?;
                used
            };
            frames += 1;
            bytes += written as u64;
            debug!(
                "frame {}/{}: {} bytes from slot {} (sequence {})",
                frames, self.config.frames, written, index, meta.sequence
            );

            // Hand the slot straight back. If this fails the driver keeps
            // ownership either way, so the loop carries on.
            self.pause("VIDIOC_QBUF");
            if let Err(e) = self.dev.queue(index) {
                warn!("re-queueing buffer slot {} failed: {}", index, e);
            }
        }

        Ok(bytes)
    }

    /// Unmaps slots `0..count`, logging failures and carrying on.
    fn unmap_slots(&mut self, count: u32) {
        for index in 0..count {
            if let Err(e) = self.dev.unmap(index) {
                warn!("unmapping buffer slot {} failed: {}", index, e);
            }
        }
    }

    fn pause(&mut self, op: &str) {
        let duration = self.delay.next();
        if !duration.is_zero() {
            trace!("pausing {:?} before {}", duration, op);
            thread::sleep(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::buffer::{Flags, Metadata};

    const SLOT_LEN: usize = 64;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        SetFormat,
        RequestBuffers(u32),
        Map(u32),
        Unmap(u32),
        Queue(u32),
        Dequeue(u32),
        StreamOn,
        StreamOff,
    }

    /// Scripted driver stand-in.
    ///
    /// Records every control operation and simulates the queue/dequeue
    /// ownership hand-over; reading a slot while the driver owns it
    /// panics, so every test doubles as an ownership-exclusivity check.
    /// Dequeued frames are filled with the frame ordinal and report
    /// `SLOT_LEN - ordinal % 3` valid bytes.
    #[derive(Default)]
    struct FakeDriver {
        log: Rc<RefCell<Vec<Op>>>,

        grant: Option<u32>,
        fail_format: bool,
        fail_request: bool,
        fail_map_at: Option<u32>,
        fail_queue_at: Option<u32>,
        fail_stream_on: bool,
        fail_stream_off: bool,
        fail_dequeue_at: Option<u32>,
        fail_requeue_at: Option<u32>,
        fail_unmap_at: Option<u32>,

        slots: Vec<Option<Vec<u8>>>,
        queued: Vec<u32>,
        streaming: bool,
        dequeues: u32,
        requeues: u32,
    }

    impl FakeDriver {
        fn new() -> Self {
            Self::default()
        }

        fn log_handle(&self) -> Rc<RefCell<Vec<Op>>> {
            Rc::clone(&self.log)
        }

        fn err() -> io::Error {
            io::Error::from_raw_os_error(libc::EIO)
        }
    }

    impl Capture for FakeDriver {
        fn set_format(&mut self, fmt: &Format) -> io::Result<Format> {
            self.log.borrow_mut().push(Op::SetFormat);
            if self.fail_format {
                return Err(Self::err());
            }
            Ok(*fmt)
        }

        fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
            self.log.borrow_mut().push(Op::RequestBuffers(count));
            if self.fail_request {
                return Err(Self::err());
            }
            let granted = self.grant.unwrap_or(count);
            self.slots = vec![None; granted as usize];
            Ok(granted)
        }

        fn map(&mut self, index: u32) -> io::Result<usize> {
            self.log.borrow_mut().push(Op::Map(index));
            if self.fail_map_at == Some(index) {
                return Err(Self::err());
            }
            self.slots[index as usize] = Some(vec![0; SLOT_LEN]);
            Ok(SLOT_LEN)
        }

        fn unmap(&mut self, index: u32) -> io::Result<()> {
            self.log.borrow_mut().push(Op::Unmap(index));
            if self.fail_unmap_at == Some(index) {
                return Err(Self::err());
            }
            match self.slots.get_mut(index as usize).and_then(Option::take) {
                Some(_) => Ok(()),
                None => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "unmap of a slot that is not mapped",
                )),
            }
        }

        fn queue(&mut self, index: u32) -> io::Result<()> {
            self.log.borrow_mut().push(Op::Queue(index));
            if self.streaming {
                self.requeues += 1;
                if self.fail_requeue_at == Some(self.requeues) {
                    return Err(Self::err());
                }
            } else if self.fail_queue_at == Some(index) {
                return Err(Self::err());
            }
            self.queued.push(index);
            Ok(())
        }

        fn dequeue(&mut self) -> io::Result<(u32, Metadata)> {
            if !self.streaming {
                return Err(io::Error::from_raw_os_error(libc::EINVAL));
            }
            self.dequeues += 1;
            if self.fail_dequeue_at == Some(self.dequeues) {
                return Err(Self::err());
            }
            if self.queued.is_empty() {
                return Err(io::Error::from_raw_os_error(libc::EAGAIN));
            }
            let index = self.queued.remove(0);
            let ordinal = self.dequeues;

            let slot = self.slots[index as usize].as_mut().unwrap();
            slot.fill(ordinal as u8);
            let bytesused = (SLOT_LEN - ordinal as usize % 3) as u32;

            self.log.borrow_mut().push(Op::Dequeue(index));
            Ok((
                index,
                Metadata {
                    bytesused,
                    sequence: ordinal - 1,
                    flags: Flags::empty(),
                },
            ))
        }

        fn slot(&self, index: u32) -> Option<&[u8]> {
            assert!(
                !self.queued.contains(&index),
                "slot {} read while driver-owned",
                index
            );
            self.slots.get(index as usize)?.as_deref()
        }

        fn stream_on(&mut self) -> io::Result<()> {
            self.log.borrow_mut().push(Op::StreamOn);
            if self.fail_stream_on {
                return Err(Self::err());
            }
            self.streaming = true;
            Ok(())
        }

        fn stream_off(&mut self) -> io::Result<()> {
            self.log.borrow_mut().push(Op::StreamOff);
            if self.fail_stream_off {
                return Err(Self::err());
            }
            self.streaming = false;
            Ok(())
        }
    }

    fn config(frames: u32) -> Config {
        Config {
            format: Format::new(640, 480, FourCC::new(b"YUYV")),
            buffers: 4,
            frames,
        }
    }

    /// Payload the fake driver produces for frames `1..=frames`.
    fn expected_payload(frames: u32) -> Vec<u8> {
        let mut out = Vec::new();
        for ordinal in 1..=frames {
            let used = SLOT_LEN - ordinal as usize % 3;
            out.extend(std::iter::repeat(ordinal as u8).take(used));
        }
        out
    }

    fn unmaps(log: &[Op]) -> Vec<u32> {
        log.iter()
            .filter_map(|op| match op {
                Op::Unmap(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    fn maps(log: &[Op]) -> Vec<u32> {
        log.iter()
            .filter_map(|op| match op {
                Op::Map(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn captures_the_requested_frames_and_concatenates_payloads() {
        let fake = FakeDriver::new();
        let log = fake.log_handle();
        let mut sink = Vec::new();

        let summary = Session::new(fake, config(6)).capture(&mut sink).unwrap();

        assert_eq!(summary.frames, 6);
        assert_eq!(summary.slots, 4);
        assert_eq!(summary.bytes, sink.len() as u64);
        assert_eq!(sink, expected_payload(6));

        let log = log.borrow();
        assert_eq!(maps(&log), vec![0, 1, 2, 3]);
        assert_eq!(unmaps(&log), vec![0, 1, 2, 3]);

        // a dequeued slot goes back under its own index, not a rotation
        for pair in log.windows(2) {
            if let Op::Dequeue(i) = &pair[0] {
                assert_eq!(pair[1], Op::Queue(*i));
            }
        }
    }

    #[test]
    fn maps_exactly_the_granted_slot_count() {
        let fake = FakeDriver {
            grant: Some(2),
            ..FakeDriver::new()
        };
        let log = fake.log_handle();
        let mut sink = Vec::new();

        let summary = Session::new(fake, config(3)).capture(&mut sink).unwrap();

        assert_eq!(summary.slots, 2);
        let log = log.borrow();
        assert_eq!(maps(&log), vec![0, 1]);
        assert_eq!(unmaps(&log), vec![0, 1]);
    }

    #[test]
    fn format_rejection_stops_before_any_buffer_request() {
        let fake = FakeDriver {
            fail_format: true,
            ..FakeDriver::new()
        };
        let log = fake.log_handle();
        let mut sink = Vec::new();

        let result = Session::new(fake, config(1)).capture(&mut sink);

        assert_matches!(result, Err(Error::FormatRejected(_)));
        let log = log.borrow();
        assert!(!log
            .iter()
            .any(|op| matches!(op, Op::RequestBuffers(_) | Op::Map(_) | Op::Unmap(_))));
        assert!(sink.is_empty());
    }

    #[test]
    fn zero_granted_slots_is_an_allocation_failure() {
        let fake = FakeDriver {
            grant: Some(0),
            ..FakeDriver::new()
        };
        let log = fake.log_handle();
        let mut sink = Vec::new();

        let result = Session::new(fake, config(1)).capture(&mut sink);

        assert_matches!(result, Err(Error::BufferAllocationFailed(_)));
        assert!(maps(&log.borrow()).is_empty());
    }

    #[test]
    fn mapping_failure_unwinds_only_the_already_mapped_slots() {
        let fake = FakeDriver {
            fail_map_at: Some(2),
            ..FakeDriver::new()
        };
        let log = fake.log_handle();
        let mut sink = Vec::new();

        let result = Session::new(fake, config(1)).capture(&mut sink);

        assert_matches!(result, Err(Error::MappingFailed { index: 2, .. }));
        let log = log.borrow();
        assert_eq!(maps(&log), vec![0, 1, 2]);
        assert_eq!(unmaps(&log), vec![0, 1]);
        assert!(!log.iter().any(|op| matches!(op, Op::Queue(_))));
    }

    #[test]
    fn initial_queue_failure_is_fatal_but_still_unmaps() {
        let fake = FakeDriver {
            fail_queue_at: Some(1),
            ..FakeDriver::new()
        };
        let log = fake.log_handle();
        let mut sink = Vec::new();

        let result = Session::new(fake, config(1)).capture(&mut sink);

        assert_matches!(result, Err(Error::QueueFailed { index: 1, .. }));
        let log = log.borrow();
        assert!(!log.iter().any(|op| matches!(op, Op::StreamOn)));
        assert_eq!(unmaps(&log), vec![0, 1, 2, 3]);
    }

    #[test]
    fn slots_are_queued_in_increasing_index_order_before_streaming() {
        let fake = FakeDriver::new();
        let log = fake.log_handle();
        let mut sink = Vec::new();

        Session::new(fake, config(1)).capture(&mut sink).unwrap();

        let log = log.borrow();
        let stream_on = log.iter().position(|op| *op == Op::StreamOn).unwrap();
        let initial_queues: Vec<u32> = log[..stream_on]
            .iter()
            .filter_map(|op| match op {
                Op::Queue(i) => Some(*i),
                _ => None,
            })
            .collect();
        assert_eq!(initial_queues, vec![0, 1, 2, 3]);
    }

    #[test]
    fn stream_start_failure_tears_down_without_stream_off() {
        let fake = FakeDriver {
            fail_stream_on: true,
            ..FakeDriver::new()
        };
        let log = fake.log_handle();
        let mut sink = Vec::new();

        let result = Session::new(fake, config(1)).capture(&mut sink);

        assert_matches!(result, Err(Error::StreamStartFailed(_)));
        let log = log.borrow();
        assert!(!log.iter().any(|op| matches!(op, Op::StreamOff)));
        assert_eq!(unmaps(&log), vec![0, 1, 2, 3]);
    }

    #[test]
    fn dequeue_failure_preserves_partial_output_and_tears_down() {
        let fake = FakeDriver {
            fail_dequeue_at: Some(3),
            ..FakeDriver::new()
        };
        let log = fake.log_handle();
        let mut sink = Vec::new();

        let result = Session::new(fake, config(5)).capture(&mut sink);

        assert_matches!(result, Err(Error::DequeueFailed { frames: 2, .. }));
        assert_eq!(sink, expected_payload(2));
        let log = log.borrow();
        assert!(log.iter().any(|op| matches!(op, Op::StreamOff)));
        assert_eq!(unmaps(&log), vec![0, 1, 2, 3]);
    }

    #[test]
    fn requeue_failure_does_not_stop_the_loop() {
        let fake = FakeDriver {
            fail_requeue_at: Some(2),
            ..FakeDriver::new()
        };
        let log = fake.log_handle();
        let mut sink = Vec::new();

        let summary = Session::new(fake, config(5)).capture(&mut sink).unwrap();

        assert_eq!(summary.frames, 5);
        assert_eq!(sink, expected_payload(5));
        assert_eq!(unmaps(&log.borrow()), vec![0, 1, 2, 3]);
    }

    #[test]
    fn unmap_failure_does_not_stop_teardown() {
        let fake = FakeDriver {
            fail_unmap_at: Some(1),
            ..FakeDriver::new()
        };
        let log = fake.log_handle();
        let mut sink = Vec::new();

        let summary = Session::new(fake, config(1)).capture(&mut sink).unwrap();

        assert_eq!(summary.frames, 1);
        assert_eq!(unmaps(&log.borrow()), vec![0, 1, 2, 3]);
    }

    #[test]
    fn stream_off_failure_is_not_fatal() {
        let fake = FakeDriver {
            fail_stream_off: true,
            ..FakeDriver::new()
        };
        let mut sink = Vec::new();

        let summary = Session::new(fake, config(2)).capture(&mut sink).unwrap();

        assert_eq!(summary.frames, 2);
        assert_eq!(sink, expected_payload(2));
    }

    struct CountingDelay(Rc<RefCell<u32>>);

    impl Delay for CountingDelay {
        fn next(&mut self) -> Duration {
            *self.0.borrow_mut() += 1;
            Duration::ZERO
        }
    }

    #[test]
    fn a_pause_precedes_every_control_operation() {
        let calls = Rc::new(RefCell::new(0));
        let fake = FakeDriver::new();
        let mut sink = Vec::new();

        Session::with_delay(
            fake,
            config(1),
            Box::new(CountingDelay(Rc::clone(&calls))),
        )
        .capture(&mut sink)
        .unwrap();

        // set_format + reqbufs + 4 maps + 4 queues + stream-on
        // + (dequeue + re-queue) + stream-off
        assert_eq!(*calls.borrow(), 14);
    }
}
