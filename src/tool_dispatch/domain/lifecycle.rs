//! Lifecycle state of a tool execution handler.

use super::ToolDispatchDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one handler's backend resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerLifecycleState {
    /// The backend client has not been requested yet, or connecting failed.
    Uninitialized,
    /// The backend client is being connected.
    Initializing,
    /// The backend client is connected.
    Ready,
    /// All resources have been released. Terminal.
    Closed,
}

impl HandlerLifecycleState {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Closed => "closed",
        }
    }

    /// Returns whether operations are still accepted.
    #[must_use]
    pub const fn is_open(self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Returns whether transition to `target` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Uninitialized, Self::Initializing)
                | (Self::Initializing, Self::Ready | Self::Uninitialized)
                | (
                    Self::Uninitialized | Self::Initializing | Self::Ready,
                    Self::Closed
                )
        )
    }

    /// Returns `target` when the transition is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`ToolDispatchDomainError::InvalidLifecycleTransition`] when the
    /// transition is not allowed.
    pub fn transition_to(self, target: Self) -> Result<Self, ToolDispatchDomainError> {
        if self.can_transition_to(target) {
            return Ok(target);
        }

        Err(ToolDispatchDomainError::InvalidLifecycleTransition {
            from: self.as_str().to_owned(),
            to: target.as_str().to_owned(),
        })
    }
}

impl fmt::Display for HandlerLifecycleState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
