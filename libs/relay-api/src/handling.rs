use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use crate::{HandlerError, Message};

/// Consumer-side lifecycle of one inbound message.
///
/// `Arrived → Handling → Handled → Consumed`, or `Handling → Failed`.
/// Transitions are one-way; `Consumed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlingState {
    Arrived,
    Handling,
    Handled,
    Consumed,
    Failed,
}

impl HandlingState {
    pub fn can_advance_to(self, next: HandlingState) -> bool {
        use HandlingState::*;
        matches!(
            (self, next),
            (Arrived, Handling) | (Handling, Handled) | (Handling, Failed) | (Handled, Consumed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, HandlingState::Consumed | HandlingState::Failed)
    }
}

impl std::fmt::Display for HandlingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlingState::Arrived => f.write_str("arrived"),
            HandlingState::Handling => f.write_str("handling"),
            HandlingState::Handled => f.write_str("handled"),
            HandlingState::Consumed => f.write_str("consumed"),
            HandlingState::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("message #{seq}: illegal transition {from} -> {to}")]
pub struct InvalidTransition {
    pub seq: u64,
    pub from: HandlingState,
    pub to: HandlingState,
}

/// One inbound message paired with the task handling it.
///
/// Owned by that task for its whole life and dropped once a terminal state
/// is reached.
#[derive(Debug)]
pub struct InFlightHandling {
    seq: u64,
    message: Message,
    started_at: Instant,
    simulated_delay: Duration,
    state: HandlingState,
}

impl InFlightHandling {
    /// Record the arrival of `message`, the `seq`-th one seen by the consumer.
    pub fn arrived(seq: u64, message: Message, simulated_delay: Duration) -> Self {
        Self {
            seq,
            message,
            started_at: Instant::now(),
            simulated_delay,
            state: HandlingState::Arrived,
        }
    }

    /// Move to `next`, returning the previous state.
    pub fn advance(&mut self, next: HandlingState) -> Result<HandlingState, InvalidTransition> {
        if !self.state.can_advance_to(next) {
            return Err(InvalidTransition {
                seq: self.seq,
                from: self.state,
                to: next,
            });
        }
        Ok(std::mem::replace(&mut self.state, next))
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn payload(&self) -> i64 {
        self.message.payload()
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn simulated_delay(&self) -> Duration {
        self.simulated_delay
    }

    pub fn state(&self) -> HandlingState {
        self.state
    }
}

/// The work applied to each inbound message.
pub trait MessageHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        handling: &'a InFlightHandling,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;
}

/// Picks the simulated handling delay of a message, in time units.
///
/// Injected into the consumer so tests can pin delays instead of relying on
/// an ambient random source.
pub trait DelayStrategy: Send {
    fn next_delay(&mut self, message: &Message) -> u32;
}

// Any `FnMut(&Message) -> u32` closure is a delay strategy.
impl<F: FnMut(&Message) -> u32 + Send> DelayStrategy for F {
    fn next_delay(&mut self, message: &Message) -> u32 {
        self(message)
    }
}

/// Side channel notified after every lifecycle transition, including the
/// initial `Arrived`.
pub trait LifecycleObserver: Send + Sync {
    fn on_transition(&self, handling: &InFlightHandling);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut h = InFlightHandling::arrived(1, Message::of(3), Duration::from_secs(2));
        assert_eq!(h.state(), HandlingState::Arrived);
        assert_eq!(h.advance(HandlingState::Handling), Ok(HandlingState::Arrived));
        assert_eq!(h.advance(HandlingState::Handled), Ok(HandlingState::Handling));
        assert_eq!(h.advance(HandlingState::Consumed), Ok(HandlingState::Handled));
        assert!(h.state().is_terminal());
    }

    #[test]
    fn rejects_skips_and_reprocessing() {
        let mut h = InFlightHandling::arrived(4, Message::of(0), Duration::ZERO);
        let err = h.advance(HandlingState::Handled).unwrap_err();
        assert_eq!(err.from, HandlingState::Arrived);
        assert_eq!(err.to, HandlingState::Handled);

        h.advance(HandlingState::Handling).unwrap();
        h.advance(HandlingState::Failed).unwrap();
        assert!(h.advance(HandlingState::Handled).is_err());
        assert!(h.advance(HandlingState::Consumed).is_err());
        assert_eq!(h.state(), HandlingState::Failed);
    }
}
