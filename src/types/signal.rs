//! Unwind signals and their precedence lattice.
//!
//! A signal is a tagged reason for unwinding a fiber, delivered at the
//! fiber's next suspension point (never inside pure code). Signals form a
//! strict precedence order; when several would be delivered to one fiber,
//! only the strongest pending one survives.

use super::outcome::Payload;
use core::fmt;

/// Identifies one cancellation scope within the runtime.
///
/// Scope-originated signals carry the id of the scope that armed them, so a
/// scope catches exactly its own signal and nested scopes do not interfere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// A tagged unwind reason delivered to a fiber.
#[derive(Clone)]
pub enum Signal {
    /// Silent unwind up to the originating scope (or the fiber root when no
    /// scope is named), producing `value` there.
    MoveOn {
        /// The scope that armed the signal, if any.
        scope: Option<ScopeId>,
        /// The value the scope (or fiber) yields.
        value: Option<Payload>,
    },
    /// Unwind that surfaces as an error at the scope boundary; catchable by
    /// user code anywhere along the way.
    Cancel {
        /// The scope that armed the signal, if any.
        scope: Option<ScopeId>,
    },
    /// User-initiated abort; catchable, and its value becomes the fiber's
    /// result when it reaches the root uncaught.
    Interrupt {
        /// The value the fiber's result takes when uncaught.
        value: Option<Payload>,
    },
    /// Supervisor-requested shutdown; uncatchable, only destructors run.
    Terminate,
}

impl Signal {
    /// The precedence rank: `Terminate > Cancel > Interrupt > MoveOn`.
    #[must_use]
    pub const fn precedence(&self) -> u8 {
        match self {
            Self::MoveOn { .. } => 0,
            Self::Interrupt { .. } => 1,
            Self::Cancel { .. } => 2,
            Self::Terminate => 3,
        }
    }

    /// The scope this signal belongs to, when scope-originated.
    #[must_use]
    pub const fn scope(&self) -> Option<ScopeId> {
        match self {
            Self::MoveOn { scope, .. } | Self::Cancel { scope } => *scope,
            Self::Interrupt { .. } | Self::Terminate => None,
        }
    }

    /// The payload the fiber's result takes when the signal reaches the
    /// root uncaught (`MoveOn`/`Interrupt` only).
    #[must_use]
    pub fn value(&self) -> Option<Payload> {
        match self {
            Self::MoveOn { value, .. } | Self::Interrupt { value } => value.clone(),
            Self::Cancel { .. } | Self::Terminate => None,
        }
    }

    /// True for the terminate variant.
    #[must_use]
    pub const fn is_terminate(&self) -> bool {
        matches!(self, Self::Terminate)
    }

    /// Keeps the stronger of two pending signals.
    ///
    /// On equal precedence the incumbent wins, so a signal already pending
    /// is not displaced by an equal newcomer.
    #[must_use]
    pub fn strengthen(self, other: Self) -> Self {
        if other.precedence() > self.precedence() {
            other
        } else {
            self
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MoveOn { scope, value } => f
                .debug_struct("MoveOn")
                .field("scope", scope)
                .field("has_value", &value.is_some())
                .finish(),
            Self::Cancel { scope } => f.debug_struct("Cancel").field("scope", scope).finish(),
            Self::Interrupt { value } => f
                .debug_struct("Interrupt")
                .field("has_value", &value.is_some())
                .finish(),
            Self::Terminate => write!(f, "Terminate"),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MoveOn { .. } => write!(f, "move on"),
            Self::Cancel { .. } => write!(f, "cancel"),
            Self::Interrupt { .. } => write!(f, "interrupt"),
            Self::Terminate => write!(f, "terminate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn move_on() -> Signal {
        Signal::MoveOn {
            scope: None,
            value: None,
        }
    }

    fn cancel() -> Signal {
        Signal::Cancel { scope: None }
    }

    fn interrupt() -> Signal {
        Signal::Interrupt { value: None }
    }

    #[test]
    fn precedence_order() {
        assert!(move_on().precedence() < interrupt().precedence());
        assert!(interrupt().precedence() < cancel().precedence());
        assert!(cancel().precedence() < Signal::Terminate.precedence());
    }

    #[test]
    fn strengthen_keeps_stronger() {
        let kept = cancel().strengthen(move_on());
        assert_eq!(kept.precedence(), cancel().precedence());

        let kept = move_on().strengthen(Signal::Terminate);
        assert!(kept.is_terminate());
    }

    #[test]
    fn strengthen_prefers_incumbent_on_tie() {
        let incumbent = Signal::Cancel {
            scope: Some(ScopeId(1)),
        };
        let kept = incumbent.strengthen(Signal::Cancel {
            scope: Some(ScopeId(2)),
        });
        assert_eq!(kept.scope(), Some(ScopeId(1)));
    }

    #[test]
    fn scope_only_on_scoped_variants() {
        let scoped = Signal::MoveOn {
            scope: Some(ScopeId(9)),
            value: None,
        };
        assert_eq!(scoped.scope(), Some(ScopeId(9)));
        assert_eq!(interrupt().scope(), None);
        assert_eq!(Signal::Terminate.scope(), None);
    }
}
