//! Error types and the signal-to-error bridge.
//!
//! Every suspension point returns `Result<_, Error>`; a signal delivered at
//! resume time becomes an [`Error`] carrying the original [`Signal`], so
//! cancellation scopes can recognize their own signal (by scope id) while
//! ordinary `?` propagation unwinds the fiber. Errors also accumulate the
//! spawn-trace composed when `join` re-raises a child failure.

use crate::types::{Payload, ScopeId, Signal};
use core::fmt;
use std::panic::Location;
use std::rc::Rc;

/// A specialized result type for runtime operations.
pub type Result<T> = core::result::Result<T, Error>;

/// The kind of a runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    /// A `MoveOn` signal unwound past its scope (or there was none).
    #[error("moved on")]
    MovedOn,
    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,
    /// The fiber was interrupted.
    #[error("interrupted")]
    Interrupted,
    /// The fiber was terminated by its supervisor or parent.
    #[error("terminated")]
    Terminated,
    /// The scheduler has no runnable fiber and no event source to wait on.
    #[error("scheduler starved: all fibers waiting with no pending event")]
    Starved,
    /// The API was used incorrectly.
    #[error("usage error")]
    Usage,
    /// A timer deadline exceeded the configured maximum.
    #[error("timer deadline beyond configured maximum")]
    TimerOverflow,
    /// An I/O operation failed.
    #[error("i/o error")]
    Io,
    /// Any other failure raised by fiber bodies.
    #[error("error")]
    Other,
}

/// One entry in a composed spawn trace.
#[derive(Debug, Clone, Copy)]
pub enum TraceFrame {
    /// A source location (error creation site or spawn site).
    Frame(&'static Location<'static>),
    /// The boundary between a fiber's own frames and its spawn chain.
    SpawnBoundary,
}

/// The crate-wide error type.
///
/// Not `Send`: errors may carry thread-local payloads and never cross
/// scheduler threads (failures are surfaced only through `join` and
/// supervision within one scheduler).
#[derive(Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    signal: Option<Signal>,
    trace: Vec<TraceFrame>,
    source: Option<Rc<dyn std::error::Error + 'static>>,
}

impl Error {
    /// Creates an error of the given kind, recording the creation site as
    /// the first trace frame.
    #[must_use]
    #[track_caller]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            signal: None,
            trace: vec![TraceFrame::Frame(Location::caller())],
            source: None,
        }
    }

    /// An [`ErrorKind::Other`] error with a message.
    #[must_use]
    #[track_caller]
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other).with_message(message)
    }

    /// An [`ErrorKind::Usage`] error with a message.
    #[must_use]
    #[track_caller]
    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage).with_message(message)
    }

    /// Wraps an I/O error.
    #[must_use]
    #[track_caller]
    pub fn io(source: std::io::Error) -> Self {
        let mut err = Self::new(ErrorKind::Io);
        err.message = Some(source.to_string());
        err.source = Some(Rc::new(source));
        err
    }

    /// Attaches a human-readable message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The error's kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The attached message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The signal that produced this error, if it is signal-borne.
    #[must_use]
    pub const fn signal(&self) -> Option<&Signal> {
        self.signal.as_ref()
    }

    /// True when this error is a delivered `Cancel`.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// True when this error is a delivered `MoveOn`.
    #[must_use]
    pub const fn is_moved_on(&self) -> bool {
        matches!(self.kind, ErrorKind::MovedOn)
    }

    /// True when this error is a delivered `Interrupt`.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self.kind, ErrorKind::Interrupted)
    }

    /// True when this error is a delivered `Terminate`.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self.kind, ErrorKind::Terminated)
    }

    /// If this error is a signal belonging to `scope`, returns the signal.
    ///
    /// Used by cancellation scopes to catch exactly their own signal.
    #[must_use]
    pub fn signal_for_scope(&self, scope: ScopeId) -> Option<&Signal> {
        self.signal
            .as_ref()
            .filter(|signal| signal.scope() == Some(scope))
    }

    /// The payload the fiber's result takes when this error reaches the
    /// fiber root uncaught (`MoveOn`/`Interrupt` signals only).
    #[must_use]
    pub fn root_value(&self) -> Option<Option<Payload>> {
        match self.kind {
            ErrorKind::MovedOn | ErrorKind::Interrupted => {
                Some(self.signal.as_ref().and_then(Signal::value))
            }
            _ => None,
        }
    }

    /// The composed spawn trace.
    #[must_use]
    pub fn trace(&self) -> &[TraceFrame] {
        &self.trace
    }

    /// Appends a spawn boundary followed by a chain of spawn sites.
    ///
    /// `join` calls this when re-raising a child failure: the child's own
    /// frames come first, then the boundary, then the child's spawn chain.
    pub fn push_spawn_chain(&mut self, chain: &[&'static Location<'static>]) {
        self.trace.push(TraceFrame::SpawnBoundary);
        self.trace
            .extend(chain.iter().map(|loc| TraceFrame::Frame(loc)));
    }

    /// Renders the composed trace, one frame per line, with boundary
    /// separators between fibers.
    #[must_use]
    pub fn render_trace(&self) -> String {
        let mut out = String::new();
        for frame in &self.trace {
            match frame {
                TraceFrame::Frame(loc) => {
                    out.push_str(&format!("  at {}:{}:{}\n", loc.file(), loc.line(), loc.column()));
                }
                TraceFrame::SpawnBoundary => out.push_str("  --- spawned from ---\n"),
            }
        }
        out
    }
}

impl From<Signal> for Error {
    #[track_caller]
    fn from(signal: Signal) -> Self {
        let kind = match &signal {
            Signal::MoveOn { .. } => ErrorKind::MovedOn,
            Signal::Cancel { .. } => ErrorKind::Cancelled,
            Signal::Interrupt { .. } => ErrorKind::Interrupted,
            Signal::Terminate => ErrorKind::Terminated,
        };
        let mut err = Self::new(kind);
        err.signal = Some(signal);
        err
    }
}

impl From<std::io::Error> for Error {
    #[track_caller]
    fn from(source: std::io::Error) -> Self {
        Self::io(source)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error({:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ", {message:?}")?;
        }
        if let Some(signal) = &self.signal {
            write!(f, ", signal={signal:?}")?;
        }
        write!(f, ")")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref()
    }
}
