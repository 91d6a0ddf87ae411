//! UniFFI bindings for roomlink-core.
//!
//! Provides a RoomlinkClient object that wraps the SessionManager and its
//! media controls into a single FFI-safe interface.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use roomlink_core::{
    self, CameraFrame as CoreCameraFrame, ConnectionQuality as CoreConnectionQuality, ConnectionState as CoreConnectionState,
    DisconnectReason as CoreDisconnectReason, EndpointResolver, LiveKitTransport, MediaPublisher,
    MediaRequest, PcmFrame, PermissionGrant, PermissionProvider, PublishState as CorePublishState,
    RemoteParticipant as CoreRemoteParticipant, SessionConfig, SessionEvent as CoreSessionEvent,
    SessionIntent, SessionManager, SessionSnapshot as CoreSessionSnapshot,
};

uniffi::include_scaffolding!("roomlink");

// ── Android WebRTC initialization ────────────────────────────────────
//
// Must be called from Kotlin AFTER System.loadLibrary, before connect().
// webrtc::InitAndroid needs a valid JNI class loader context, which is
// NOT available inside JNI_OnLoad.

#[cfg(target_os = "android")]
#[unsafe(no_mangle)]
pub extern "C" fn Java_world_ozzu_roomlink_RoomlinkApplication_nativeInitWebrtc(
    env: *mut std::ffi::c_void,
    _class: *mut std::ffi::c_void,
) {
    let env = match unsafe { jni::JNIEnv::from_raw(env as *mut jni::sys::JNIEnv) } {
        Ok(env) => env,
        Err(e) => {
            roomlink_log(&format!("ROOMLINK FFI: nativeInitWebrtc invalid JNIEnv: {e}"));
            return;
        }
    };
    let jvm = match env.get_java_vm() {
        Ok(jvm) => jvm,
        Err(e) => {
            roomlink_log(&format!("ROOMLINK FFI: nativeInitWebrtc no JavaVM: {e}"));
            return;
        }
    };

    libwebrtc::android::initialize_android(&jvm);

    // Prevent Drop from calling DestroyJavaVM
    std::mem::forget(jvm);
    roomlink_log("ROOMLINK FFI: WebRTC initialized");
}

// ── Platform log helper ──────────────────────────────────────────────

/// Write a message to logcat on Android, syslog on iOS, or stderr elsewhere.
fn roomlink_log(msg: &str) {
    #[cfg(target_os = "android")]
    {
        use std::ffi::CString;
        unsafe extern "C" {
            fn __android_log_write(prio: i32, tag: *const std::ffi::c_char, text: *const std::ffi::c_char) -> i32;
        }
        let tag = c"ROOMLINK_FFI";
        let Ok(text) = CString::new(msg.replace('\0', " ")) else {
            return;
        };
        unsafe { __android_log_write(4 /* INFO */, tag.as_ptr(), text.as_ptr()); }
    }
    #[cfg(target_os = "ios")]
    {
        use std::ffi::CString;
        unsafe extern "C" {
            fn syslog(priority: i32, message: *const std::ffi::c_char, ...);
        }
        let Ok(text) = CString::new(msg.replace('\0', " ")) else {
            return;
        };
        unsafe { syslog(6 /* LOG_INFO */, text.as_ptr()); }
    }
    #[cfg(not(any(target_os = "android", target_os = "ios")))]
    eprintln!("{msg}");
}

// ── Namespace functions ──────────────────────────────────────────────

/// Initialize tracing/logging. Call once from the host before using RoomlinkClient.
/// On Android, stderr goes to logcat for debuggable builds.
fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("roomlink_core=debug,roomlink_ffi=debug"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .init();
    });
}

fn validate_room_name(name: String) -> bool {
    roomlink_core::validate_room_name(&name)
}

fn validate_participant_name(name: String) -> bool {
    roomlink_core::validate_participant_name(&name)
}

fn generate_random_identity() -> String {
    roomlink_core::generate_random_identity()
}

/// Resolve a server address with the default configuration.
fn resolve_signaling_address(raw: Option<String>) -> String {
    EndpointResolver::from_config(&SessionConfig::default()).resolve(raw.as_deref())
}

// ── FFI-safe type conversions ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
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

impl From<CoreConnectionState> for ConnectionState {
    fn from(s: CoreConnectionState) -> Self {
        match s {
            CoreConnectionState::Idle => Self::Idle,
            CoreConnectionState::AcquiringPermission => Self::AcquiringPermission,
            CoreConnectionState::FetchingToken => Self::FetchingToken,
            CoreConnectionState::Connecting => Self::Connecting,
            CoreConnectionState::SignalConnected => Self::SignalConnected,
            CoreConnectionState::Connected => Self::Connected,
            CoreConnectionState::Reconnecting => Self::Reconnecting,
            CoreConnectionState::Disconnected => Self::Disconnected,
            CoreConnectionState::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    UserInitiated,
    RemoteOrNetwork,
}

impl From<CoreDisconnectReason> for DisconnectReason {
    fn from(r: CoreDisconnectReason) -> Self {
        match r {
            CoreDisconnectReason::UserInitiated => Self::UserInitiated,
            CoreDisconnectReason::RemoteOrNetwork => Self::RemoteOrNetwork,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Poor,
    Lost,
    Unknown,
}

impl From<CoreConnectionQuality> for ConnectionQuality {
    fn from(q: CoreConnectionQuality) -> Self {
        match q {
            CoreConnectionQuality::Excellent => Self::Excellent,
            CoreConnectionQuality::Good => Self::Good,
            CoreConnectionQuality::Poor => Self::Poor,
            CoreConnectionQuality::Lost => Self::Lost,
            CoreConnectionQuality::Unknown => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishState {
    pub microphone: bool,
    pub camera: bool,
}

impl From<CorePublishState> for PublishState {
    fn from(p: CorePublishState) -> Self {
        Self {
            microphone: p.microphone,
            camera: p.camera,
        }
    }
}

/// I420 frame handed over by the host camera pipeline.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
    pub rotation_degrees: u32,
    pub timestamp_us: i64,
}

impl From<CameraFrame> for CoreCameraFrame {
    fn from(f: CameraFrame) -> Self {
        Self {
            width: f.width,
            height: f.height,
            y: f.y,
            u: f.u,
            v: f.v,
            rotation_degrees: f.rotation_degrees,
            timestamp_us: f.timestamp_us,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub identity: String,
    pub connection_quality: ConnectionQuality,
}

impl From<CoreRemoteParticipant> for ParticipantInfo {
    fn from(p: CoreRemoteParticipant) -> Self {
        Self {
            identity: p.identity,
            connection_quality: p.connection_quality.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub attempt_id: u64,
    pub last_error: Option<String>,
    pub disconnect_reason: Option<DisconnectReason>,
    pub remote_participants: u32,
    pub local_quality: ConnectionQuality,
    pub reconnect_attempts: u32,
}

impl From<CoreSessionSnapshot> for SessionSnapshot {
    fn from(s: CoreSessionSnapshot) -> Self {
        Self {
            state: s.state.into(),
            attempt_id: s.attempt_id,
            last_error: s.last_error,
            disconnect_reason: s.disconnect_reason.map(Into::into),
            remote_participants: u32::try_from(s.remote_participants).unwrap_or(u32::MAX),
            local_quality: s.local_quality.into(),
            reconnect_attempts: s.reconnect_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionResult {
    pub microphone: bool,
    pub camera: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionStateChanged { state: ConnectionState, attempt_id: u64 },
    Disconnected { reason: DisconnectReason, message: Option<String> },
    ParticipantJoined { identity: String },
    ParticipantLeft { identity: String },
    ConnectionQualityChanged { participant_identity: String, quality: ConnectionQuality },
    PublishStateChanged { publish: PublishState },
    WatchdogExpired { attempt_id: u64, waited_ms: u64 },
    Alert { title: String, message: String },
}

impl From<CoreSessionEvent> for SessionEvent {
    fn from(e: CoreSessionEvent) -> Self {
        match e {
            CoreSessionEvent::ConnectionStateChanged { state, attempt_id } => {
                Self::ConnectionStateChanged { state: state.into(), attempt_id }
            }
            CoreSessionEvent::Disconnected { reason, message } => {
                Self::Disconnected { reason: reason.into(), message }
            }
            CoreSessionEvent::ParticipantJoined(identity) => Self::ParticipantJoined { identity },
            CoreSessionEvent::ParticipantLeft(identity) => Self::ParticipantLeft { identity },
            CoreSessionEvent::ConnectionQualityChanged { participant_identity, quality } => {
                Self::ConnectionQualityChanged { participant_identity, quality: quality.into() }
            }
            CoreSessionEvent::PublishStateChanged(p) => Self::PublishStateChanged { publish: p.into() },
            CoreSessionEvent::WatchdogExpired { attempt_id, waited_ms } => {
                Self::WatchdogExpired { attempt_id, waited_ms }
            }
            CoreSessionEvent::Alert { title, message } => Self::Alert { title, message },
        }
    }
}

// ── Error conversion ──────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RoomlinkError {
    #[error("Validation error: {msg}")]
    Validation { msg: String },
    #[error("Permission error: {msg}")]
    Permission { msg: String },
    #[error("Token error: {msg}")]
    TokenFetch { msg: String },
    #[error("Connection error: {msg}")]
    Connect { msg: String },
    #[error("Publish error: {msg}")]
    Publish { msg: String },
    #[error("Already connecting: {msg}")]
    AlreadyConnecting { msg: String },
    #[error("Cancelled: {msg}")]
    Cancelled { msg: String },
    #[error("Config error: {msg}")]
    Config { msg: String },
}

impl From<roomlink_core::SessionError> for RoomlinkError {
    fn from(e: roomlink_core::SessionError) -> Self {
        use roomlink_core::SessionError as E;

        tracing::error!("SessionError: {e}");
        let msg = e.to_string();
        match e {
            E::Validation(_) => Self::Validation { msg },
            E::Permission(_) => Self::Permission { msg },
            E::TokenFetch { .. } => Self::TokenFetch { msg },
            E::Connect(_) => Self::Connect { msg },
            E::Publish(_) => Self::Publish { msg },
            E::AlreadyConnecting => Self::AlreadyConnecting { msg },
            E::Cancelled(_) => Self::Cancelled { msg },
            E::Config(_) => Self::Config { msg },
        }
    }
}

// ── Callback interfaces ───────────────────────────────────────────────

pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Implemented by the host to show the OS permission prompt.
/// Called off the async runtime; may block until the user answers.
pub trait PermissionHandler: Send + Sync {
    fn request_permissions(&self, microphone: bool, camera: bool) -> PermissionResult;
}

// ── Bridges: FFI callbacks → core traits ──────────────────────────────

struct BridgeListener {
    ffi_listener: Arc<dyn SessionEventListener>,
}

impl roomlink_core::SessionEventListener for BridgeListener {
    fn on_event(&self, event: CoreSessionEvent) {
        self.ffi_listener.on_event(event.into());
    }
}

/// Routes permission prompts to the host handler, granting everything until
/// one is installed.
#[derive(Default)]
struct PermissionBridge {
    handler: StdMutex<Option<Arc<dyn PermissionHandler>>>,
}

impl PermissionBridge {
    fn set_handler(&self, handler: Arc<dyn PermissionHandler>) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }
}

#[async_trait]
impl PermissionProvider for PermissionBridge {
    async fn request(&self, request: MediaRequest) -> PermissionGrant {
        let handler = self.handler.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(handler) = handler else {
            return PermissionGrant::ALL;
        };

        let answer = tokio::task::spawn_blocking(move || {
            handler.request_permissions(request.microphone, request.camera)
        })
        .await;
        match answer {
            Ok(result) => PermissionGrant {
                microphone: result.microphone,
                camera: result.camera,
            },
            Err(e) => {
                tracing::error!("permission handler failed: {e}");
                PermissionGrant {
                    microphone: false,
                    camera: false,
                }
            }
        }
    }
}

// ── RoomlinkClient: main FFI object ───────────────────────────────────

pub struct RoomlinkClient {
    manager: SessionManager,
    controls: MediaPublisher,
    permissions: Arc<PermissionBridge>,
    rt: tokio::runtime::Runtime,
}

impl RoomlinkClient {
    pub fn new(config_json: Option<String>) -> Result<Self, RoomlinkError> {
        roomlink_log("ROOMLINK FFI: RoomlinkClient::new() called");
        let config = match config_json {
            Some(json) => SessionConfig::from_json(&json)?,
            None => SessionConfig::default(),
        };
        let rt = tokio::runtime::Runtime::new().map_err(|e| RoomlinkError::Config {
            msg: format!("failed to create tokio runtime: {e}"),
        })?;

        let permissions = Arc::new(PermissionBridge::default());
        let manager = SessionManager::new(
            config,
            Arc::new(LiveKitTransport::new()),
            permissions.clone(),
        )?;
        let controls = manager.controls();

        Ok(Self {
            manager,
            controls,
            permissions,
            rt,
        })
    }

    /// Join `room_name`. A missing participant name gets a random identity.
    pub fn connect(
        &self,
        room_name: String,
        participant_name: Option<String>,
        metadata: Option<String>,
        microphone: bool,
        camera: bool,
    ) -> Result<(), RoomlinkError> {
        let participant = participant_name.unwrap_or_else(roomlink_core::generate_random_identity);
        roomlink_log(&format!("ROOMLINK FFI: connect() room={room_name} participant={participant}"));

        let mut intent = SessionIntent::new(room_name, participant).with_publish(microphone, camera);
        if let Some(metadata) = metadata {
            intent = intent.with_metadata(metadata);
        }

        // Wrap in catch_unwind to prevent panics from crossing FFI boundary (UB → SIGSEGV).
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.rt
                .block_on(self.manager.connect(intent))
                .map_err(RoomlinkError::from)
        }));

        match result {
            Ok(res) => res,
            Err(panic_info) => {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                roomlink_log(&format!("ROOMLINK FFI: connect() PANIC caught: {msg}"));
                Err(RoomlinkError::Connect { msg: format!("panic in connect: {msg}") })
            }
        }
    }

    pub fn disconnect(&self) {
        self.rt.block_on(self.manager.disconnect());
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.rt.block_on(self.manager.connection_state()).into()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.rt.block_on(self.manager.snapshot()).into()
    }

    pub fn participants(&self) -> Vec<ParticipantInfo> {
        self.rt
            .block_on(self.manager.participants())
            .into_iter()
            .map(ParticipantInfo::from)
            .collect()
    }

    pub fn set_microphone_enabled(&self, enabled: bool) -> Result<(), RoomlinkError> {
        self.rt
            .block_on(self.controls.set_microphone_enabled(enabled))
            .map_err(RoomlinkError::from)
    }

    pub fn set_camera_enabled(&self, enabled: bool) -> Result<(), RoomlinkError> {
        self.rt
            .block_on(self.controls.set_camera_enabled(enabled))
            .map_err(RoomlinkError::from)
    }

    /// Called from the host audio capture thread with interleaved PCM.
    pub fn push_audio_frame(
        &self,
        samples: Vec<i16>,
        sample_rate: u32,
        channels: u32,
    ) -> Result<(), RoomlinkError> {
        let frame = PcmFrame {
            samples,
            sample_rate,
            channels,
        };
        self.rt
            .block_on(self.controls.push_audio_frame(&frame))
            .map_err(RoomlinkError::from)
    }

    /// Called from the host camera pipeline once per captured frame.
    pub fn push_video_frame(&self, frame: CameraFrame) -> Result<(), RoomlinkError> {
        let frame = CoreCameraFrame::from(frame);
        self.rt
            .block_on(self.controls.push_video_frame(&frame))
            .map_err(RoomlinkError::from)
    }

    pub fn is_microphone_enabled(&self) -> bool {
        self.rt.block_on(self.controls.is_microphone_enabled())
    }

    pub fn is_camera_enabled(&self) -> bool {
        self.rt.block_on(self.controls.is_camera_enabled())
    }

    pub fn add_listener(&self, listener: Box<dyn SessionEventListener>) {
        let bridge = Arc::new(BridgeListener {
            ffi_listener: Arc::from(listener),
        });
        self.manager.add_listener(bridge);
    }

    pub fn set_permission_handler(&self, handler: Box<dyn PermissionHandler>) {
        self.permissions.set_handler(Arc::from(handler));
    }
}
