//! In-memory doubles for the transport and platform seams.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use crate::errors::SessionError;
use crate::events::{ConnectionState, SessionEvent, SessionEventListener};
use crate::permissions::{MediaRequest, PermissionGrant, PermissionProvider};
use crate::transport::{
    CameraFrame, DialOptions, Dialed, PcmFrame, Transport, TransportEvent, TransportSession,
};

/// Poll `condition` every 10ms, panicking after two seconds.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

/// Records every event for later assertions.
#[derive(Default)]
pub struct EventCapture {
    events: Mutex<Vec<SessionEvent>>,
}

impl EventCapture {
    pub fn take(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn any(&self, predicate: impl Fn(&SessionEvent) -> bool) -> bool {
        self.events.lock().unwrap().iter().any(predicate)
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::ConnectionStateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn alerts(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, SessionEvent::Alert { .. }))
            .count()
    }
}

impl SessionEventListener for EventCapture {
    fn on_event(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct FakeSession {
    mic: Mutex<Vec<bool>>,
    camera: Mutex<Vec<bool>>,
    publish_error: Mutex<Option<String>>,
    publish_gate: Mutex<Option<Arc<Notify>>>,
    audio_frames: Mutex<Vec<PcmFrame>>,
    video_frames: Mutex<Vec<CameraFrame>>,
    remote: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl FakeSession {
    pub fn mic_calls(&self) -> Vec<bool> {
        self.mic.lock().unwrap().clone()
    }

    pub fn camera_calls(&self) -> Vec<bool> {
        self.camera.lock().unwrap().clone()
    }

    /// Make every following publish call fail with `message`.
    pub fn fail_publish(&self, message: &str) {
        *self.publish_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn audio_frames(&self) -> Vec<PcmFrame> {
        self.audio_frames.lock().unwrap().clone()
    }

    pub fn video_frames(&self) -> Vec<CameraFrame> {
        self.video_frames.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Publish calls fail like a real room once it is closed.
    async fn publish(&self, calls: &Mutex<Vec<bool>>, enabled: bool) -> Result<(), SessionError> {
        let gate = self.publish_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.is_closed() {
            return Err(SessionError::Publish("room closed".into()));
        }
        if let Some(message) = self.publish_error.lock().unwrap().clone() {
            return Err(SessionError::Publish(message));
        }
        calls.lock().unwrap().push(enabled);
        Ok(())
    }
}

#[async_trait]
impl TransportSession for FakeSession {
    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.publish(&self.mic, enabled).await
    }

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.publish(&self.camera, enabled).await
    }

    async fn push_audio_frame(&self, frame: &PcmFrame) -> Result<(), SessionError> {
        self.audio_frames.lock().unwrap().push(frame.clone());
        Ok(())
    }

    async fn push_video_frame(&self, frame: &CameraFrame) -> Result<(), SessionError> {
        self.video_frames.lock().unwrap().push(frame.clone());
        Ok(())
    }

    fn remote_participants(&self) -> Vec<String> {
        self.remote.lock().unwrap().clone()
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted result of one dial.
pub enum DialOutcome {
    /// Succeed and queue these events on the session's stream.
    Succeed(Vec<TransportEvent>),
    Fail(String),
}

#[derive(Debug, Clone)]
pub struct DialRecord {
    pub address: String,
    pub token: String,
    pub options: DialOptions,
}

/// Transport whose dials follow a script. Unscripted dials succeed with
/// `SignalConnected` then `Connected`.
#[derive(Default)]
pub struct FakeTransport {
    outcomes: Mutex<VecDeque<DialOutcome>>,
    gate: Mutex<Option<Arc<Notify>>>,
    publish_gate: Mutex<Option<Arc<Notify>>>,
    dials: Mutex<Vec<DialRecord>>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    senders: Mutex<Vec<UnboundedSender<TransportEvent>>>,
    remote: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn script(&self, outcome: DialOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Hold every following dial until the returned gate is notified.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Hold publish calls on sessions dialed from now on until the returned
    /// gate is notified.
    pub fn hold_publish(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.publish_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Remote participants already present when a session is dialed.
    pub fn seed_remote(&self, identities: Vec<String>) {
        *self.remote.lock().unwrap() = identities;
    }

    pub fn dials(&self) -> Vec<DialRecord> {
        self.dials.lock().unwrap().clone()
    }

    /// Session created by the `index`th successful dial.
    pub fn session(&self, index: usize) -> Arc<FakeSession> {
        self.sessions.lock().unwrap()[index].clone()
    }

    /// Push an event on the `index`th session's stream.
    pub fn send(&self, index: usize, event: TransportEvent) {
        // The pump may already be gone after a teardown.
        let _ = self.senders.lock().unwrap()[index].send(event);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn dial(
        &self,
        address: &str,
        token: &str,
        options: &DialOptions,
    ) -> Result<Dialed, SessionError> {
        self.dials.lock().unwrap().push(DialRecord {
            address: address.to_string(),
            token: token.to_string(),
            options: options.clone(),
        });

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or_else(|| {
            DialOutcome::Succeed(vec![TransportEvent::SignalConnected, TransportEvent::Connected])
        });
        match outcome {
            DialOutcome::Fail(message) => Err(SessionError::Connect(message)),
            DialOutcome::Succeed(events) => {
                let (tx, rx) = unbounded_channel();
                for event in events {
                    let _ = tx.send(event);
                }
                let session = Arc::new(FakeSession::default());
                *session.remote.lock().unwrap() = self.remote.lock().unwrap().clone();
                *session.publish_gate.lock().unwrap() = self.publish_gate.lock().unwrap().clone();
                self.sessions.lock().unwrap().push(session.clone());
                self.senders.lock().unwrap().push(tx);
                Ok(Dialed {
                    session,
                    events: rx,
                })
            }
        }
    }
}

/// Permission provider answering every prompt with a fixed grant.
pub struct FakePermissions {
    grant: PermissionGrant,
    requests: Mutex<Vec<MediaRequest>>,
}

impl FakePermissions {
    pub fn granting(grant: PermissionGrant) -> Self {
        Self {
            grant,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<MediaRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PermissionProvider for FakePermissions {
    async fn request(&self, request: MediaRequest) -> PermissionGrant {
        self.requests.lock().unwrap().push(request);
        self.grant
    }
}
