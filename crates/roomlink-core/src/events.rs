use std::sync::{Arc, PoisonError, RwLock};

/// Events emitted by the core to native UI listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionStateChanged { state: ConnectionState, attempt_id: u64 },
    Disconnected { reason: DisconnectReason, message: Option<String> },
    ParticipantJoined(String), // participant identity
    ParticipantLeft(String),   // participant identity
    ConnectionQualityChanged { participant_identity: String, quality: ConnectionQuality },
    PublishStateChanged(PublishState),
    /// `Connecting` outlived the watchdog.
    WatchdogExpired { attempt_id: u64, waited_ms: u64 },
    /// Something the user should be told about.
    Alert { title: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    AcquiringPermission,
    FetchingToken,
    Connecting,
    SignalConnected,
    Connected,
    Reconnecting,
    Disconnected,
    Failed,
}

impl ConnectionState {
    /// An attempt is underway or a session is live.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Disconnected | Self::Failed)
    }

    /// The transport handshake has been acknowledged.
    pub fn is_established(self) -> bool {
        matches!(self, Self::SignalConnected | Self::Connected | Self::Reconnecting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The local user left; never alerted.
    UserInitiated,
    RemoteOrNetwork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Poor,
    Lost,
    #[default]
    Unknown,
}

/// Local track switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishState {
    pub microphone: bool,
    pub camera: bool,
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
