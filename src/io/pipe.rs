//! An in-process byte pipe wired to fiber wake-ups.
//!
//! The pipe is the runtime's own stream endpoint: writes append to a shared
//! buffer and wake the fiber blocked on the read end, closing delivers EOF.
//! Everything happens on the scheduler thread; no OS descriptors are
//! involved, which keeps stream-shaped tests fully deterministic.

use crate::runtime::scheduler;
use crate::types::FiberId;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use super::read::{ReadSource, WriteSink};

struct Shared {
    buffer: VecDeque<u8>,
    closed: bool,
    reader: Option<FiberId>,
}

impl Shared {
    fn wake_reader(&mut self) {
        if let Some(fiber) = self.reader.take() {
            scheduler::try_schedule_wake(fiber);
        }
    }
}

/// Creates a connected pipe.
#[must_use]
pub fn pipe() -> (PipeReader, PipeWriter) {
    let shared = Rc::new(RefCell::new(Shared {
        buffer: VecDeque::new(),
        closed: false,
        reader: None,
    }));
    (
        PipeReader {
            shared: shared.clone(),
        },
        PipeWriter { shared },
    )
}

/// The read end of a [`pipe`].
pub struct PipeReader {
    shared: Rc<RefCell<Shared>>,
}

impl PipeReader {
    /// Bytes currently buffered and readable without waiting.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.shared.borrow().buffer.len()
    }
}

impl ReadSource for PipeReader {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut shared = self.shared.borrow_mut();
        if shared.buffer.is_empty() {
            if shared.closed {
                return Ok(0);
            }
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let mut copied = 0;
        while copied < buf.len() {
            match shared.buffer.pop_front() {
                Some(byte) => {
                    buf[copied] = byte;
                    copied += 1;
                }
                None => break,
            }
        }
        Ok(copied)
    }

    fn register_reader(&mut self, fiber: FiberId) {
        self.shared.borrow_mut().reader = Some(fiber);
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.borrow();
        f.debug_struct("PipeReader")
            .field("buffered", &shared.buffer.len())
            .field("closed", &shared.closed)
            .finish()
    }
}

/// The write end of a [`pipe`]. Closes on drop.
pub struct PipeWriter {
    shared: Rc<RefCell<Shared>>,
}

impl PipeWriter {
    /// Appends `bytes` and wakes a blocked reader. Never suspends.
    pub fn write(&self, bytes: &[u8]) {
        let mut shared = self.shared.borrow_mut();
        if shared.closed {
            return;
        }
        shared.buffer.extend(bytes.iter().copied());
        shared.wake_reader();
    }

    /// Closes the pipe; the reader sees EOF once the buffer drains.
    pub fn close(&self) {
        let mut shared = self.shared.borrow_mut();
        if !shared.closed {
            shared.closed = true;
            shared.wake_reader();
        }
    }

    /// True once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.borrow().closed
    }
}

impl WriteSink for PipeWriter {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.shared.borrow().closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.write(buf);
        Ok(buf.len())
    }

    fn register_writer(&mut self, _fiber: FiberId) {
        // The buffer is unbounded; writes never block.
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter")
            .field("closed", &self.shared.borrow().closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_drains_written_bytes() {
        let (mut reader, writer) = pipe();
        writer.write(b"abc");

        let mut buf = [0_u8; 8];
        assert_eq!(reader.try_read(&mut buf).expect("read"), 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn empty_open_pipe_would_block() {
        let (mut reader, _writer) = pipe();
        let mut buf = [0_u8; 4];
        let err = reader.try_read(&mut buf).expect_err("would block");
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn close_delivers_eof_after_drain() {
        let (mut reader, writer) = pipe();
        writer.write(b"xy");
        writer.close();

        let mut buf = [0_u8; 1];
        assert_eq!(reader.try_read(&mut buf).expect("read"), 1);
        assert_eq!(reader.try_read(&mut buf).expect("read"), 1);
        assert_eq!(reader.try_read(&mut buf).expect("eof"), 0);
    }

    #[test]
    fn drop_closes_writer() {
        let (mut reader, writer) = pipe();
        drop(writer);

        let mut buf = [0_u8; 4];
        assert_eq!(reader.try_read(&mut buf).expect("eof"), 0);
    }

    #[test]
    fn write_after_close_is_dropped() {
        let (reader, writer) = pipe();
        writer.close();
        writer.write(b"late");
        assert_eq!(reader.buffered(), 0);
    }
}
