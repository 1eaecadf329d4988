//! Stream contracts and the ops layered on them.
//!
//! [`ReadSource`] and [`WriteSink`] are what an endpoint must provide:
//! non-blocking attempts plus a way to park the current fiber until the
//! endpoint wakes it. Every higher-level operation follows the same shape
//! (try, and on `WouldBlock` wait for readiness and try again), surfaces EOF
//! as `Ok(None)` rather than as an error, and honors signals delivered
//! during the wait, since the wait is a suspension point.

use crate::error::{Error, Result};
use crate::runtime::record::Resume;
use crate::runtime::scheduler;
use crate::types::FiberId;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Default chunk size for buffered reads.
const CHUNK: usize = 4096;

/// A byte source with non-blocking reads and fiber wake-up.
pub trait ReadSource {
    /// Attempts a read. `Ok(0)` is end-of-stream; `WouldBlock` means no
    /// bytes are available yet.
    ///
    /// # Errors
    ///
    /// `WouldBlock` and real I/O failures.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Records `fiber` to be woken when bytes (or EOF) arrive.
    fn register_reader(&mut self, fiber: FiberId);

    /// Suspends until the source wakes its registered reader.
    fn wait_readable(&mut self) -> WaitReadable<'_, Self> {
        WaitReadable {
            source: self,
            registered: false,
        }
    }

    /// Reads one chunk. `Ok(None)` is end-of-stream.
    ///
    /// # Errors
    ///
    /// I/O failures and signals delivered while waiting.
    #[allow(async_fn_in_trait)]
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<Option<usize>>
    where
        Self: Sized,
    {
        loop {
            match self.try_read(buf) {
                Ok(0) => return Ok(None),
                Ok(n) => return Ok(Some(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wait_readable().await?;
                }
                Err(e) => return Err(Error::io(e)),
            }
        }
    }

    /// Reads everything until end-of-stream.
    ///
    /// # Errors
    ///
    /// See [`read_chunk`](Self::read_chunk).
    #[allow(async_fn_in_trait)]
    async fn read_all(&mut self) -> Result<Vec<u8>>
    where
        Self: Sized,
    {
        let mut out = Vec::new();
        let mut buf = [0_u8; CHUNK];
        while let Some(n) = self.read_chunk(&mut buf).await? {
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    /// Feeds each received chunk to `handle` until end-of-stream.
    ///
    /// # Errors
    ///
    /// See [`read_chunk`](Self::read_chunk), plus errors from `handle`.
    #[allow(async_fn_in_trait)]
    async fn read_loop<F>(&mut self, mut handle: F) -> Result<()>
    where
        Self: Sized,
        F: FnMut(&[u8]) -> Result<()>,
    {
        let mut buf = [0_u8; CHUNK];
        while let Some(n) = self.read_chunk(&mut buf).await? {
            handle(&buf[..n])?;
        }
        Ok(())
    }

    /// Feeds each received chunk to a [`Feed`] target until end-of-stream.
    ///
    /// # Errors
    ///
    /// See [`read_chunk`](Self::read_chunk), plus errors from the target.
    #[allow(async_fn_in_trait)]
    async fn feed_loop<T>(&mut self, target: &mut T) -> Result<()>
    where
        Self: Sized,
        T: Feed + ?Sized,
    {
        let mut buf = [0_u8; CHUNK];
        while let Some(n) = self.read_chunk(&mut buf).await? {
            target.feed(&buf[..n])?;
        }
        Ok(())
    }
}

/// A byte sink with non-blocking writes and fiber wake-up.
pub trait WriteSink {
    /// Attempts a write, returning how many bytes were accepted.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when the sink is full, and real I/O failures.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Records `fiber` to be woken when the sink can accept bytes again.
    fn register_writer(&mut self, fiber: FiberId);

    /// Suspends until the sink wakes its registered writer.
    fn wait_writable(&mut self) -> WaitWritable<'_, Self> {
        WaitWritable {
            sink: self,
            registered: false,
        }
    }

    /// Writes all of `buf`, waiting out `WouldBlock` as needed.
    ///
    /// # Errors
    ///
    /// I/O failures and signals delivered while waiting.
    #[allow(async_fn_in_trait)]
    async fn write_all(&mut self, buf: &[u8]) -> Result<()>
    where
        Self: Sized,
    {
        let mut written = 0;
        while written < buf.len() {
            match self.try_write(&buf[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wait_writable().await?;
                }
                Err(e) => return Err(Error::io(e)),
            }
        }
        Ok(())
    }
}

/// The single-method capability consumed by
/// [`feed_loop`](ReadSource::feed_loop).
pub trait Feed {
    /// Consumes one chunk.
    ///
    /// # Errors
    ///
    /// Anything; errors stop the feeding loop.
    fn feed(&mut self, chunk: &[u8]) -> Result<()>;
}

impl<F: FnMut(&[u8]) -> Result<()>> Feed for F {
    fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        self(chunk)
    }
}

/// Future parking the current fiber until a source wakes its reader.
pub struct WaitReadable<'a, S: ?Sized> {
    source: &'a mut S,
    registered: bool,
}

impl<S: ReadSource + ?Sized> Future for WaitReadable<'_, S> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match scheduler::take_delivered() {
            Some(Resume::Signal(signal)) => return Poll::Ready(Err(Error::from(signal))),
            Some(Resume::Value(_)) if this.registered => return Poll::Ready(Ok(())),
            _ => {}
        }
        if !this.registered {
            this.source.register_reader(scheduler::current());
            this.registered = true;
        }
        scheduler::park_current(false);
        Poll::Pending
    }
}

/// Future parking the current fiber until a sink wakes its writer.
pub struct WaitWritable<'a, S: ?Sized> {
    sink: &'a mut S,
    registered: bool,
}

impl<S: WriteSink + ?Sized> Future for WaitWritable<'_, S> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match scheduler::take_delivered() {
            Some(Resume::Signal(signal)) => return Poll::Ready(Err(Error::from(signal))),
            Some(Resume::Value(_)) if this.registered => return Poll::Ready(Ok(())),
            _ => {}
        }
        if !this.registered {
            this.sink.register_writer(scheduler::current());
            this.registered = true;
        }
        scheduler::park_current(false);
        Poll::Pending
    }
}

/// Buffered reading with byte, character and line granularity.
#[derive(Debug)]
pub struct LineReader<S> {
    source: S,
    buffer: std::collections::VecDeque<u8>,
    eof: bool,
}

impl<S: ReadSource> LineReader<S> {
    /// Wraps a source.
    pub fn new(source: S) -> Self {
        Self {
            source,
            buffer: std::collections::VecDeque::new(),
            eof: false,
        }
    }

    /// Consumes the reader, returning the inner source.
    pub fn into_inner(self) -> S {
        self.source
    }

    /// Reads one byte. `Ok(None)` is end-of-stream.
    ///
    /// # Errors
    ///
    /// I/O failures and signals delivered while waiting.
    pub async fn getbyte(&mut self) -> Result<Option<u8>> {
        if self.buffer.is_empty() && !self.fill().await? {
            return Ok(None);
        }
        Ok(self.buffer.pop_front())
    }

    /// Reads one UTF-8 character. `Ok(None)` is end-of-stream.
    ///
    /// # Errors
    ///
    /// `Other` on invalid UTF-8, plus everything [`getbyte`](Self::getbyte)
    /// can fail with.
    pub async fn getc(&mut self) -> Result<Option<char>> {
        let Some(first) = self.getbyte().await? else {
            return Ok(None);
        };
        let width = utf8_width(first);
        let mut bytes = vec![first];
        while bytes.len() < width {
            match self.getbyte().await? {
                Some(byte) => bytes.push(byte),
                None => break,
            }
        }
        match std::str::from_utf8(&bytes) {
            Ok(s) => Ok(s.chars().next()),
            Err(_) => Err(Error::other("stream is not valid utf-8")),
        }
    }

    /// Reads one line, including its terminator. At end-of-stream a partial
    /// line is returned as-is; `Ok(None)` means nothing was left.
    ///
    /// # Errors
    ///
    /// See [`getbyte`](Self::getbyte).
    pub async fn gets(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if !self.fill().await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let rest: Vec<u8> = self.buffer.drain(..).collect();
                return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
            }
        }
    }

    /// Pulls one chunk into the buffer; false at end-of-stream.
    async fn fill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let mut chunk = [0_u8; CHUNK];
        match self.source.read_chunk(&mut chunk).await? {
            Some(n) => {
                self.buffer.extend(chunk[..n].iter().copied());
                Ok(true)
            }
            None => {
                self.eof = true;
                Ok(false)
            }
        }
    }
}

const fn utf8_width(first: u8) -> usize {
    match first {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}
