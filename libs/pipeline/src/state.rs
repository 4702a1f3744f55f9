use std::fmt;

use crate::PipelineError;

/// Lifecycle of the subscriber.
///
/// ```text
/// INIT ──► CONNECTED ──► SUBSCRIBED ──► DRAINING ──► CLOSED
///   │          │
///   └──────────┴──► FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriberState {
    #[default]
    Init,
    Connected,
    Subscribed,
    Draining,
    Closed,
    Failed,
}

impl SubscriberState {
    pub fn can_transition(self, to: SubscriberState) -> bool {
        use SubscriberState::*;
        matches!(
            (self, to),
            (Init, Connected)
                | (Init, Failed)
                | (Connected, Subscribed)
                | (Connected, Failed)
                | (Subscribed, Draining)
                | (Draining, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SubscriberState::Closed | SubscriberState::Failed)
    }

    pub fn transition(&mut self, to: SubscriberState) -> Result<(), PipelineError> {
        if !self.can_transition(to) {
            return Err(PipelineError::Transition { from: *self, to });
        }
        tracing::info!(from = %self, %to, "subscriber state");
        *self = to;
        Ok(())
    }
}

impl fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubscriberState::Init => "INIT",
            SubscriberState::Connected => "CONNECTED",
            SubscriberState::Subscribed => "SUBSCRIBED",
            SubscriberState::Draining => "DRAINING",
            SubscriberState::Closed => "CLOSED",
            SubscriberState::Failed => "FAILED",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut state = SubscriberState::default();
        for next in [
            SubscriberState::Connected,
            SubscriberState::Subscribed,
            SubscriberState::Draining,
            SubscriberState::Closed,
        ] {
            state.transition(next).unwrap();
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn failure_only_before_subscribed() {
        let mut state = SubscriberState::Connected;
        state.transition(SubscriberState::Failed).unwrap();

        let mut state = SubscriberState::Subscribed;
        let err = state.transition(SubscriberState::Failed).unwrap_err();
        assert_eq!(err.to_string(), "illegal state transition SUBSCRIBED -> FAILED");
        assert_eq!(state, SubscriberState::Subscribed);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut state = SubscriberState::Closed;
        assert!(state.transition(SubscriberState::Init).is_err());
        assert!(!SubscriberState::Failed.can_transition(SubscriberState::Connected));
    }
}
