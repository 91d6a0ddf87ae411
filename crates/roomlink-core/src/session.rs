use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::auth::{JoinCredential, TokenClient};
use crate::config::{PermissionPolicy, SessionConfig, WatchdogPolicy};
use crate::controls::{MediaPublisher, SharedSession};
use crate::errors::SessionError;
use crate::events::{
    ConnectionState, DisconnectReason, EventEmitter, PublishState, SessionEvent,
    SessionEventListener,
};
use crate::participants::{ParticipantRoster, RemoteParticipant};
use crate::permissions::{MediaRequest, PermissionGrant, PermissionProvider};
use crate::state::{SessionSnapshot, transition_for};
use crate::transport::{DialOptions, Dialed, Transport, TransportEvent, TransportSession};
use crate::validation::validate_identifiers;

/// What the user asked for when tapping "join".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIntent {
    pub room_name: String,
    pub participant_name: String,
    pub metadata: Option<String>,
    pub publish: PublishState,
}

impl SessionIntent {
    /// Microphone on, camera off.
    pub fn new(room_name: impl Into<String>, participant_name: impl Into<String>) -> Self {
        Self {
            room_name: room_name.into(),
            participant_name: participant_name.into(),
            metadata: None,
            publish: PublishState {
                microphone: true,
                camera: false,
            },
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn with_publish(mut self, microphone: bool, camera: bool) -> Self {
        self.publish = PublishState { microphone, camera };
        self
    }
}

struct Lifecycle {
    snapshot: SessionSnapshot,
    roster: ParticipantRoster,
    credential: Option<JoinCredential>,
    pump: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

struct Inner {
    config: SessionConfig,
    token_client: TokenClient,
    transport: Arc<dyn Transport>,
    permissions: Arc<dyn PermissionProvider>,
    emitter: EventEmitter,
    session: SharedSession,
    publisher: MediaPublisher,
    /// Id of the newest attempt. Only changed with `lifecycle` held.
    attempt: AtomicU64,
    in_flight: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

/// Owns at most one media session and drives it through its lifecycle.
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        permissions: Arc<dyn PermissionProvider>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let token_client = TokenClient::new(&config)?;
        let emitter = EventEmitter::new();
        let session: SharedSession = Arc::new(Mutex::new(None));
        let publisher = MediaPublisher::new(session.clone(), emitter.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                token_client,
                transport,
                permissions,
                emitter,
                session,
                publisher,
                attempt: AtomicU64::new(0),
                in_flight: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle {
                    snapshot: SessionSnapshot::default(),
                    roster: ParticipantRoster::new(),
                    credential: None,
                    pump: None,
                    watchdog: None,
                }),
            }),
        })
    }

    /// Register a listener for session events.
    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.inner.emitter.add_listener(listener);
    }

    /// Local media controls bound to this manager's session.
    pub fn controls(&self) -> MediaPublisher {
        self.inner.publisher.clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lifecycle.lock().await.snapshot.state
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.lifecycle.lock().await.snapshot.clone()
    }

    pub async fn participants(&self) -> Vec<RemoteParticipant> {
        self.inner.lifecycle.lock().await.roster.participants().to_vec()
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Run one connect attempt: validate, acquire permissions, fetch a
    /// token, dial.
    ///
    /// Returns once the transport accepted the dial; later progress arrives
    /// as `ConnectionStateChanged` events.
    pub async fn connect(&self, intent: SessionIntent) -> Result<(), SessionError> {
        let inner = &self.inner;
        if inner
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("connect rejected: an attempt is already in flight");
            return Err(SessionError::AlreadyConnecting);
        }

        let room = intent.room_name.trim();
        let participant = intent.participant_name.trim();
        if let Err(e) = validate_identifiers(room, participant) {
            return Err(inner.reject(e).await);
        }

        let attempt = inner.begin_attempt().await;
        tracing::info!("attempt {attempt}: joining room={room} as {participant}");

        inner.enter(attempt, ConnectionState::AcquiringPermission).await?;
        let initial = match inner.acquire_permissions(intent.publish).await {
            Ok(initial) => initial,
            Err(e) => return Err(inner.fail(attempt, e).await),
        };
        inner.publisher.reset(initial).await;

        inner.enter(attempt, ConnectionState::FetchingToken).await?;
        let credential = match inner
            .token_client
            .fetch_token(room, participant, intent.metadata.as_deref())
            .await
        {
            Ok(credential) => credential,
            Err(e) => return Err(inner.fail(attempt, e).await),
        };

        inner.enter_connecting(attempt).await?;
        let dialed = match inner.dial_with_retry(attempt, &credential).await {
            Ok(dialed) => dialed,
            Err(e) => return Err(inner.fail(attempt, e).await),
        };

        let session = inner.install(attempt, credential, dialed).await?;
        inner.apply_initial_publish(attempt, &session, initial).await;
        inner.finish(attempt).await
    }

    /// Leave the room. Safe to call in any state; a `Failed` attempt is
    /// settled as `Disconnected`.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    /// Apply a transport event tagged with the attempt that produced it.
    ///
    /// Events from any attempt but the newest are dropped.
    pub async fn handle_transport_event(&self, attempt_id: u64, event: TransportEvent) {
        self.inner.dispatch(attempt_id, event).await;
    }
}

impl Inner {
    fn is_current(&self, attempt: u64) -> bool {
        self.attempt.load(Ordering::SeqCst) == attempt
    }

    fn emit_state(&self, state: ConnectionState, attempt_id: u64) {
        self.emitter
            .emit(SessionEvent::ConnectionStateChanged { state, attempt_id });
    }

    fn alert(&self, title: &str, message: String) {
        self.emitter.emit(SessionEvent::Alert {
            title: title.to_string(),
            message,
        });
    }

    /// Error returned to an attempt that is no longer the newest. If the
    /// watchdog failed it, report that instead of a plain supersession.
    fn abandoned(lc: &Lifecycle, attempt: u64) -> SessionError {
        if lc.snapshot.attempt_id == attempt && lc.snapshot.state == ConnectionState::Failed {
            SessionError::Connect(lc.snapshot.last_error.clone().unwrap_or_default())
        } else {
            SessionError::Cancelled(attempt)
        }
    }

    /// Refuse an intent before it becomes an attempt. A live session is
    /// left untouched; otherwise the refusal is recorded as a failed attempt.
    async fn reject(&self, error: SessionError) -> SessionError {
        if self.session.lock().await.is_some() {
            self.in_flight.store(false, Ordering::SeqCst);
            tracing::warn!("connect rejected, keeping the current session: {error}");
            return error;
        }
        let attempt = self.begin_attempt().await;
        self.fail(attempt, error).await
    }

    /// Start a new attempt, tearing down whatever the previous one left.
    async fn begin_attempt(&self) -> u64 {
        let mut lc = self.lifecycle.lock().await;
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.release(&mut lc).await;
        lc.snapshot = SessionSnapshot {
            attempt_id: attempt,
            ..Default::default()
        };
        drop(lc);

        if let Some(session) = previous {
            tracing::info!("attempt {attempt}: closing session of superseded attempt");
            if let Err(e) = session.close().await {
                tracing::warn!("error closing superseded session: {e}");
            }
        }
        attempt
    }

    async fn enter(&self, attempt: u64, state: ConnectionState) -> Result<(), SessionError> {
        let mut lc = self.lifecycle.lock().await;
        if !self.is_current(attempt) {
            return Err(Self::abandoned(&lc, attempt));
        }
        lc.snapshot.state = state;
        drop(lc);
        self.emit_state(state, attempt);
        Ok(())
    }

    async fn enter_connecting(self: &Arc<Self>, attempt: u64) -> Result<(), SessionError> {
        let mut lc = self.lifecycle.lock().await;
        if !self.is_current(attempt) {
            return Err(Self::abandoned(&lc, attempt));
        }
        lc.snapshot.state = ConnectionState::Connecting;
        lc.watchdog = Some(self.arm_watchdog(attempt));
        drop(lc);
        self.emit_state(ConnectionState::Connecting, attempt);
        Ok(())
    }

    /// Mark the attempt `Failed` and hand back the error for the caller.
    async fn fail(&self, attempt: u64, error: SessionError) -> SessionError {
        let mut lc = self.lifecycle.lock().await;
        if !self.is_current(attempt) {
            tracing::debug!("attempt {attempt} ended after being superseded: {error}");
            return Self::abandoned(&lc, attempt);
        }
        if let Some(watchdog) = lc.watchdog.take() {
            watchdog.abort();
        }
        lc.snapshot.state = ConnectionState::Failed;
        lc.snapshot.last_error = Some(error.to_string());
        self.in_flight.store(false, Ordering::SeqCst);
        drop(lc);

        tracing::warn!("attempt {attempt} failed: {error}");
        self.emit_state(ConnectionState::Failed, attempt);
        if error.is_user_visible() {
            self.alert(error.title(), error.to_string());
        }
        error
    }

    /// Prompt for the devices the intent wants and apply the permission
    /// policy. Returns the publish state to seed the session with.
    async fn acquire_permissions(&self, wanted: PublishState) -> Result<PublishState, SessionError> {
        let request = MediaRequest {
            microphone: wanted.microphone,
            camera: wanted.camera,
        };
        let grant = if request.microphone || request.camera {
            self.permissions.request(request).await
        } else {
            PermissionGrant::ALL
        };

        let denied = grant.denied(request);
        if !denied.is_empty() {
            let what = denied.join(" and ");
            match self.config.permission_policy {
                PermissionPolicy::RequireMedia => {
                    return Err(SessionError::Permission(format!("{what} access denied")));
                }
                PermissionPolicy::ContinueWithoutMedia => {
                    tracing::warn!("{what} access denied, joining without it");
                }
            }
        }

        Ok(PublishState {
            microphone: wanted.microphone && grant.microphone,
            camera: wanted.camera && grant.camera,
        })
    }

    fn arm_watchdog(self: &Arc<Self>, attempt: u64) -> JoinHandle<()> {
        let inner = self.clone();
        let timeout = self.config.watchdog_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            inner.watchdog_fired(attempt, timeout).await;
        })
    }

    async fn watchdog_fired(&self, attempt: u64, waited: Duration) {
        let mut lc = self.lifecycle.lock().await;
        if !self.is_current(attempt) || lc.snapshot.state != ConnectionState::Connecting {
            return;
        }
        // This task is the watchdog; drop its handle rather than abort it.
        lc.watchdog.take();
        let waited_ms = waited.as_millis() as u64;

        match self.config.watchdog_policy {
            WatchdogPolicy::Diagnostic => {
                drop(lc);
                tracing::warn!(
                    "attempt {attempt}: still connecting after {waited_ms}ms, transport keeps retrying"
                );
                self.emitter.emit(SessionEvent::WatchdogExpired {
                    attempt_id: attempt,
                    waited_ms,
                });
            }
            WatchdogPolicy::Authoritative => {
                let message = format!("no connection after {waited_ms}ms");
                // Retire the attempt so a dial still in progress is discarded.
                self.attempt.fetch_add(1, Ordering::SeqCst);
                let session = self.release(&mut lc).await;
                lc.snapshot.state = ConnectionState::Failed;
                lc.snapshot.last_error = Some(message.clone());
                self.in_flight.store(false, Ordering::SeqCst);
                drop(lc);

                tracing::warn!("attempt {attempt}: {message}, giving up");
                self.emitter.emit(SessionEvent::WatchdogExpired {
                    attempt_id: attempt,
                    waited_ms,
                });
                self.emit_state(ConnectionState::Failed, attempt);
                self.alert("Connection Error", message);
                if let Some(session) = session {
                    if let Err(e) = session.close().await {
                        tracing::warn!("error closing timed out session: {e}");
                    }
                }
            }
        }
    }

    /// Dial, retrying failures on the configured delay schedule.
    async fn dial_with_retry(
        &self,
        attempt: u64,
        credential: &JoinCredential,
    ) -> Result<Dialed, SessionError> {
        let options = DialOptions::from_config(&self.config);
        let mut delays = self.config.retry_delays();
        let mut tries = 0u32;

        loop {
            tries += 1;
            tracing::info!("attempt {attempt}: dialing {} (try {tries})", credential.server_url);
            let error = match self
                .transport
                .dial(&credential.server_url, &credential.token, &options)
                .await
            {
                Ok(dialed) => return Ok(dialed),
                Err(e) => e,
            };

            if !self.is_current(attempt) {
                return Err(SessionError::Cancelled(attempt));
            }
            let Some(delay) = delays.next() else {
                let detail = match error {
                    SessionError::Connect(msg) => msg,
                    other => other.to_string(),
                };
                return Err(SessionError::Connect(format!(
                    "{detail} (gave up after {tries} tries)"
                )));
            };
            tracing::warn!("attempt {attempt}: dial failed: {error}; retrying in {delay:?}");
            tokio::time::sleep(delay).await;
            if !self.is_current(attempt) {
                return Err(SessionError::Cancelled(attempt));
            }
        }
    }

    /// Take ownership of a freshly dialed session and start pumping its
    /// events, unless the attempt was superseded meanwhile.
    async fn install(
        self: &Arc<Self>,
        attempt: u64,
        credential: JoinCredential,
        dialed: Dialed,
    ) -> Result<Arc<dyn TransportSession>, SessionError> {
        let Dialed { session, events } = dialed;
        let mut lc = self.lifecycle.lock().await;
        if !self.is_current(attempt) {
            let error = Self::abandoned(&lc, attempt);
            drop(lc);
            tracing::info!("attempt {attempt}: dial finished after supersession, closing it");
            if let Err(e) = session.close().await {
                tracing::warn!("error closing superseded session: {e}");
            }
            return Err(error);
        }

        *self.session.lock().await = Some(session.clone());
        lc.credential = Some(credential);
        let joined: Vec<String> = session
            .remote_participants()
            .into_iter()
            .filter(|identity| lc.roster.add(identity))
            .collect();
        lc.snapshot.remote_participants = lc.roster.len();
        lc.pump = Some(self.spawn_pump(attempt, events));
        drop(lc);

        for identity in joined {
            self.emitter.emit(SessionEvent::ParticipantJoined(identity));
        }
        Ok(session)
    }

    async fn apply_initial_publish(
        &self,
        attempt: u64,
        session: &Arc<dyn TransportSession>,
        initial: PublishState,
    ) {
        let mut applied = initial;
        if initial.microphone {
            if let Err(e) = session.set_microphone_enabled(true).await {
                applied.microphone = false;
                self.media_failed(attempt, "microphone", e);
            }
        }
        if initial.camera {
            if let Err(e) = session.set_camera_enabled(true).await {
                applied.camera = false;
                self.media_failed(attempt, "camera", e);
            }
        }
        if applied != initial && self.is_current(attempt) {
            self.publisher.reset(applied).await;
        }
    }

    fn media_failed(&self, attempt: u64, device: &str, error: SessionError) {
        if !self.is_current(attempt) {
            tracing::debug!("attempt {attempt}: {device} publish ended after leaving: {error}");
            return;
        }
        tracing::warn!("could not enable {device} on join: {error}");
        self.alert("Media Error", error.to_string());
    }

    /// Release the in-flight guard, unless the attempt was left meanwhile.
    async fn finish(&self, attempt: u64) -> Result<(), SessionError> {
        let lc = self.lifecycle.lock().await;
        if !self.is_current(attempt) {
            return Err(Self::abandoned(&lc, attempt));
        }
        self.in_flight.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn spawn_pump(
        self: &Arc<Self>,
        attempt: u64,
        mut events: UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let inner = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !inner.dispatch(attempt, event).await {
                    break;
                }
            }
            tracing::debug!("event pump for attempt {attempt} ended");
        })
    }

    /// Apply one transport event. Returns false once the attempt is over.
    async fn dispatch(&self, attempt: u64, event: TransportEvent) -> bool {
        let mut lc = self.lifecycle.lock().await;
        if !self.is_current(attempt) {
            tracing::debug!("discarding event from stale attempt {attempt}: {event:?}");
            return false;
        }

        let mut notices = Vec::new();
        match &event {
            TransportEvent::ParticipantConnected { identity } => {
                if lc.roster.add(identity) {
                    notices.push(SessionEvent::ParticipantJoined(identity.clone()));
                }
            }
            TransportEvent::ParticipantDisconnected { identity } => {
                if lc.roster.remove(identity) {
                    notices.push(SessionEvent::ParticipantLeft(identity.clone()));
                }
            }
            TransportEvent::ConnectionQualityChanged {
                participant_identity,
                quality,
                is_local,
            } => {
                if *is_local {
                    lc.roster.set_local_quality(*quality);
                } else {
                    lc.roster.set_quality(participant_identity, *quality);
                }
                notices.push(SessionEvent::ConnectionQualityChanged {
                    participant_identity: participant_identity.clone(),
                    quality: *quality,
                });
            }
            TransportEvent::ConnectionStateChanged(link) => {
                tracing::debug!("attempt {attempt}: transport link state {link}");
            }
            _ => {}
        }
        lc.snapshot.remote_participants = lc.roster.len();
        lc.snapshot.local_quality = lc.roster.local_quality();

        let current = lc.snapshot.state;
        let Some(transition) = transition_for(current, &event) else {
            drop(lc);
            for notice in notices {
                self.emitter.emit(notice);
            }
            return true;
        };

        tracing::info!("attempt {attempt}: {current:?} -> {:?}", transition.to);
        lc.snapshot.state = transition.to;
        match transition.to {
            ConnectionState::Reconnecting => lc.snapshot.reconnect_attempts += 1,
            ConnectionState::Connected => lc.snapshot.reconnect_attempts = 0,
            _ => {}
        }
        if transition.to.is_established() {
            if let Some(watchdog) = lc.watchdog.take() {
                watchdog.abort();
            }
        }

        let terminal = transition.is_terminal();
        let mut closing = None;
        if terminal {
            lc.snapshot.last_error = transition.error.clone();
            lc.snapshot.disconnect_reason = transition.reason;
            // Running inside the pump: let it end by returning false.
            lc.pump.take();
            closing = self.release(&mut lc).await;
            lc.snapshot.remote_participants = 0;
            self.in_flight.store(false, Ordering::SeqCst);
        }
        drop(lc);

        for notice in notices {
            self.emitter.emit(notice);
        }
        self.emit_state(transition.to, attempt);
        if terminal {
            let message = transition.error.unwrap_or_else(|| "connection lost".into());
            if let Some(reason) = transition.reason {
                self.emitter.emit(SessionEvent::Disconnected {
                    reason,
                    message: Some(message.clone()),
                });
            }
            let title = match transition.to {
                ConnectionState::Failed => "Connection Error",
                _ => "Disconnected",
            };
            self.alert(title, message);
        }
        if let Some(session) = closing {
            if let Err(e) = session.close().await {
                tracing::debug!("closing dropped session: {e}");
            }
        }
        !terminal
    }

    /// Detach the transport session and stop every task bound to it.
    async fn release(&self, lc: &mut Lifecycle) -> Option<Arc<dyn TransportSession>> {
        if let Some(watchdog) = lc.watchdog.take() {
            watchdog.abort();
        }
        if let Some(pump) = lc.pump.take() {
            pump.abort();
        }
        lc.credential = None;
        lc.roster.clear();
        self.session.lock().await.take()
    }

    async fn disconnect(&self) {
        let mut lc = self.lifecycle.lock().await;
        let has_session = self.session.lock().await.is_some();
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        // A failed attempt still has to settle as `Disconnected`.
        let state = lc.snapshot.state;
        let settled = !state.is_active() && state != ConnectionState::Failed;
        if !has_session && !in_flight && settled {
            tracing::debug!("disconnect: nothing to do in {:?}", state);
            return;
        }

        // Anything still pending for the current attempt is now stale.
        self.attempt.fetch_add(1, Ordering::SeqCst);
        let session = self.release(&mut lc).await;
        lc.snapshot.state = ConnectionState::Disconnected;
        lc.snapshot.disconnect_reason = Some(DisconnectReason::UserInitiated);
        lc.snapshot.last_error = None;
        lc.snapshot.remote_participants = 0;
        lc.snapshot.reconnect_attempts = 0;
        let attempt_id = lc.snapshot.attempt_id;
        self.in_flight.store(false, Ordering::SeqCst);
        drop(lc);

        if let Some(session) = session {
            if let Err(e) = session.close().await {
                tracing::warn!("error closing session: {e}");
            }
        }
        tracing::info!("attempt {attempt_id}: disconnected by user");
        self.emit_state(ConnectionState::Disconnected, attempt_id);
        self.emitter.emit(SessionEvent::Disconnected {
            reason: DisconnectReason::UserInitiated,
            message: None,
        });
    }
}
