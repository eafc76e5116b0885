//! Exchange state machine.
//!
//! One exchange runs `Idle -> Sending -> AwaitingResponse -> Complete`.
//! Failures end in a terminal error state; there is no retry edge.

use std::fmt;

use crate::transport::HeciError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    #[default]
    Idle,
    Sending,
    AwaitingResponse,
    Complete,
    /// Ring full or pointers corrupt.
    Overflow,
    /// No response within the bound.
    TimedOut,
    /// Any other terminal error.
    Failed,
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeState::Idle => write!(f, "IDLE"),
            ExchangeState::Sending => write!(f, "SENDING"),
            ExchangeState::AwaitingResponse => write!(f, "AWAITING_RESPONSE"),
            ExchangeState::Complete => write!(f, "COMPLETE"),
            ExchangeState::Overflow => write!(f, "OVERFLOW"),
            ExchangeState::TimedOut => write!(f, "TIMED_OUT"),
            ExchangeState::Failed => write!(f, "FAILED"),
        }
    }
}

impl ExchangeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangeState::Complete
                | ExchangeState::Overflow
                | ExchangeState::TimedOut
                | ExchangeState::Failed
        )
    }

    pub fn is_error(&self) -> bool {
        self.is_terminal() && *self != ExchangeState::Complete
    }

    /// Terminal state reached when `err` aborts the exchange.
    pub fn for_error(err: &HeciError) -> Self {
        match err {
            HeciError::Overflow { .. } => ExchangeState::Overflow,
            HeciError::Timeout { .. } => ExchangeState::TimedOut,
            _ => ExchangeState::Failed,
        }
    }

    /// Whether `self -> next` is a legal edge.
    pub fn can_transition(&self, next: ExchangeState) -> bool {
        use ExchangeState::*;
        match (self, next) {
            (Idle, Sending) | (Idle, AwaitingResponse) => true,
            (Sending, AwaitingResponse) | (Sending, Complete) => true,
            (AwaitingResponse, Complete) => true,
            (Sending, Overflow) | (Sending, TimedOut) | (Sending, Failed) => true,
            (AwaitingResponse, Overflow)
            | (AwaitingResponse, TimedOut)
            | (AwaitingResponse, Failed) => true,
            (Idle, Failed) | (Idle, Overflow) => true,
            _ => false,
        }
    }
}

/// Tracks one exchange and validates its transitions.
#[derive(Debug, Default)]
pub struct Exchange {
    state: ExchangeState,
}

impl Exchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Move to `next`, returning the previous state.
    pub fn goto_state(&mut self, next: ExchangeState) -> ExchangeState {
        debug_assert!(
            self.state.can_transition(next),
            "illegal exchange transition {} -> {}",
            self.state,
            next
        );
        let from = self.state;
        self.state = next;
        from
    }
}
