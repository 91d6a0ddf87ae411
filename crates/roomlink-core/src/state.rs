//! Connection state machine.
//!
//! [`transition_for`] is the single table mapping a transport event, seen
//! in a given state, to the state change it causes.

use crate::events::{ConnectionQuality, ConnectionState, DisconnectReason};
use crate::transport::TransportEvent;

/// A state change produced by a transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub to: ConnectionState,
    pub reason: Option<DisconnectReason>,
    pub error: Option<String>,
}

impl Transition {
    fn to(state: ConnectionState) -> Self {
        Self {
            to: state,
            reason: None,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            to: ConnectionState::Failed,
            reason: None,
            error: Some(error),
        }
    }

    fn lost(message: String) -> Self {
        Self {
            to: ConnectionState::Disconnected,
            reason: Some(DisconnectReason::RemoteOrNetwork),
            error: Some(message),
        }
    }

    /// The transition ends the attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self.to, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

/// Map `event` observed in `current` to a transition, or `None` when the
/// event does not move the state machine.
pub fn transition_for(current: ConnectionState, event: &TransportEvent) -> Option<Transition> {
    use ConnectionState::*;

    match (current, event) {
        (Connecting, TransportEvent::SignalConnected) => Some(Transition::to(SignalConnected)),

        (Connecting | SignalConnected | Reconnecting, TransportEvent::Connected) => {
            Some(Transition::to(Connected))
        }

        (SignalConnected | Connected, TransportEvent::Reconnecting) => {
            Some(Transition::to(Reconnecting))
        }

        (Reconnecting, TransportEvent::Reconnected) => Some(Transition::to(Connected)),

        (Connecting, TransportEvent::Disconnected { reason }) => {
            Some(Transition::failed(format!("disconnected during handshake: {reason}")))
        }
        (Connecting | SignalConnected, TransportEvent::ConnectionError { message }) => {
            Some(Transition::failed(message.clone()))
        }

        // Reconnecting -> Disconnected also covers an exhausted reconnect budget.
        (SignalConnected | Connected | Reconnecting, TransportEvent::Disconnected { reason }) => {
            Some(Transition::lost(reason.clone()))
        }
        (Connected | Reconnecting, TransportEvent::ConnectionError { message }) => {
            Some(Transition::lost(message.clone()))
        }

        _ => None,
    }
}

/// Read-only view of the current session for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub attempt_id: u64,
    pub last_error: Option<String>,
    pub disconnect_reason: Option<DisconnectReason>,
    pub remote_participants: usize,
    pub local_quality: ConnectionQuality,
    pub reconnect_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    fn disconnected(reason: &str) -> TransportEvent {
        TransportEvent::Disconnected {
            reason: reason.to_string(),
        }
    }

    #[test]
    fn happy_path_sequence() {
        let t = transition_for(Connecting, &TransportEvent::SignalConnected).unwrap();
        assert_eq!(t.to, SignalConnected);
        let t = transition_for(SignalConnected, &TransportEvent::Connected).unwrap();
        assert_eq!(t.to, Connected);
        assert!(!t.is_terminal());
    }

    #[test]
    fn reconnect_cycle() {
        assert_eq!(
            transition_for(Connected, &TransportEvent::Reconnecting).unwrap().to,
            Reconnecting
        );
        assert_eq!(
            transition_for(Reconnecting, &TransportEvent::Reconnected).unwrap().to,
            Connected
        );
    }

    #[test]
    fn reconnect_exhaustion_is_remote_disconnect() {
        let t = transition_for(Reconnecting, &disconnected("JoinFailure")).unwrap();
        assert_eq!(t.to, Disconnected);
        assert_eq!(t.reason, Some(DisconnectReason::RemoteOrNetwork));
        assert_eq!(t.error.as_deref(), Some("JoinFailure"));
        assert!(t.is_terminal());
    }

    #[test]
    fn handshake_failures_mark_failed() {
        let t = transition_for(Connecting, &disconnected("SignalClose")).unwrap();
        assert_eq!(t.to, Failed);
        assert_eq!(t.reason, None);

        let t = transition_for(
            SignalConnected,
            &TransportEvent::ConnectionError {
                message: "ice failed".into(),
            },
        )
        .unwrap();
        assert_eq!(t.to, Failed);
        assert_eq!(t.error.as_deref(), Some("ice failed"));
    }

    #[test]
    fn connection_error_after_connect_disconnects() {
        let t = transition_for(
            Connected,
            &TransportEvent::ConnectionError {
                message: "peer connection closed".into(),
            },
        )
        .unwrap();
        assert_eq!(t.to, Disconnected);
        assert_eq!(t.reason, Some(DisconnectReason::RemoteOrNetwork));
    }

    #[test]
    fn duplicate_connected_is_ignored() {
        assert!(transition_for(Connected, &TransportEvent::Connected).is_none());
    }

    #[test]
    fn informational_events_do_not_transition() {
        let events = [
            TransportEvent::ConnectionStateChanged("connected".into()),
            TransportEvent::ParticipantConnected {
                identity: "bob".into(),
            },
            TransportEvent::ParticipantDisconnected {
                identity: "bob".into(),
            },
            TransportEvent::ConnectionQualityChanged {
                participant_identity: "bob".into(),
                quality: ConnectionQuality::Poor,
                is_local: false,
            },
        ];
        for state in [Connecting, SignalConnected, Connected, Reconnecting] {
            for event in &events {
                assert!(transition_for(state, event).is_none(), "{state:?} {event:?}");
            }
        }
    }

    #[test]
    fn nothing_moves_terminal_or_pre_dial_states() {
        let events = [
            TransportEvent::SignalConnected,
            TransportEvent::Connected,
            TransportEvent::Reconnecting,
            TransportEvent::Reconnected,
            disconnected("x"),
            TransportEvent::ConnectionError {
                message: "x".into(),
            },
        ];
        for state in [Idle, AcquiringPermission, FetchingToken, Disconnected, Failed] {
            for event in &events {
                assert!(transition_for(state, event).is_none(), "{state:?} {event:?}");
            }
        }
    }

    #[test]
    fn reconnected_without_reconnecting_is_ignored() {
        assert!(transition_for(Connected, &TransportEvent::Reconnected).is_none());
        assert!(transition_for(Connecting, &TransportEvent::Reconnecting).is_none());
    }
}
