//! Fiber results: type-erased payloads and the value-or-failure outcome.
//!
//! Fiber return values, scheduled values and mailbox messages all travel as
//! [`Payload`]s: cheap, thread-local, reference-counted `Any` values. The
//! absent payload (`None` at the `Option<Payload>` level) is the runtime's
//! nil.

use crate::error::Error;
use core::fmt;
use std::any::Any;
use std::rc::Rc;

/// A type-erased, thread-local value.
pub type Payload = Rc<dyn Any>;

/// Erases a concrete value into a [`Payload`].
#[must_use]
pub fn payload<T: 'static>(value: T) -> Payload {
    Rc::new(value)
}

/// Borrows a payload back as `T`, if that is what it holds.
#[must_use]
pub fn payload_as<T: 'static>(payload: &Payload) -> Option<&T> {
    payload.downcast_ref::<T>()
}

/// The recorded result of a dead fiber.
#[derive(Clone)]
pub enum Outcome {
    /// Normal completion, or an uncaught `MoveOn`/`Interrupt` whose payload
    /// became the result. `None` is nil.
    Value(Option<Payload>),
    /// Abnormal termination; awaiters re-raise this error.
    Failure(Error),
}

impl Outcome {
    /// A nil value outcome.
    #[must_use]
    pub const fn nil() -> Self {
        Self::Value(None)
    }

    /// True for the value variant.
    #[must_use]
    pub const fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// True for the failure variant.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// True for a nil value.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Value(None))
    }

    /// The payload of a value outcome.
    #[must_use]
    pub fn value(&self) -> Option<&Payload> {
        match self {
            Self::Value(v) => v.as_ref(),
            Self::Failure(_) => None,
        }
    }

    /// Borrows the value as `T`, if this is a value outcome holding one.
    #[must_use]
    pub fn value_as<T: 'static>(&self) -> Option<&T> {
        self.value().and_then(|p| p.downcast_ref::<T>())
    }

    /// The error of a failure outcome.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Value(_) => None,
            Self::Failure(e) => Some(e),
        }
    }

    /// Converts into a `Result`, cloning the error on failure.
    pub fn into_result(self) -> Result<Option<Payload>, Error> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Failure(e) => Err(e),
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(None) => write!(f, "Value(nil)"),
            Self::Value(Some(_)) => write!(f, "Value(..)"),
            Self::Failure(e) => write!(f, "Failure({e})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn payload_round_trip() {
        let p = payload(42_i32);
        assert_eq!(payload_as::<i32>(&p), Some(&42));
        assert_eq!(payload_as::<String>(&p), None);
    }

    #[test]
    fn value_outcome_accessors() {
        let out = Outcome::Value(Some(payload("done")));
        assert!(out.is_value());
        assert!(!out.is_nil());
        assert_eq!(out.value_as::<&str>(), Some(&"done"));
        assert!(out.error().is_none());
    }

    #[test]
    fn nil_outcome() {
        let out = Outcome::nil();
        assert!(out.is_nil());
        assert!(out.value().is_none());
    }

    #[test]
    fn failure_outcome_carries_error() {
        let out = Outcome::Failure(Error::new(ErrorKind::Cancelled));
        assert!(out.is_failure());
        assert_eq!(out.error().map(Error::kind), Some(ErrorKind::Cancelled));
        assert!(out.into_result().is_err());
    }
}
