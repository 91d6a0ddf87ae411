//! Roomlink core: joins a LiveKit room through an authenticated token
//! service and keeps one media session alive.
//!
//! Pure Rust crate with no platform dependencies.
//! Consumed by native UI shells via UniFFI bindings.

pub mod auth;
pub mod config;
pub mod controls;
pub mod endpoint;
pub mod errors;
pub mod events;
pub mod livekit_transport;
pub mod participants;
pub mod permissions;
pub mod session;
pub mod state;
pub mod transport;
pub mod validation;

#[cfg(test)]
mod testing;

pub use auth::{JoinCredential, TokenClient};
pub use config::{IceServer, PermissionPolicy, SessionConfig, WatchdogPolicy};
pub use controls::MediaPublisher;
pub use endpoint::EndpointResolver;
pub use errors::{SessionError, SessionErrorKind};
pub use events::{
    ConnectionQuality, ConnectionState, DisconnectReason, EventEmitter, PublishState,
    SessionEvent, SessionEventListener,
};
pub use livekit_transport::LiveKitTransport;
pub use participants::RemoteParticipant;
pub use permissions::{GrantAll, MediaRequest, PermissionGrant, PermissionProvider};
pub use session::{SessionIntent, SessionManager};
pub use state::SessionSnapshot;
pub use transport::{CameraFrame, DialOptions, PcmFrame, Transport, TransportEvent, TransportSession};
pub use validation::{generate_random_identity, validate_participant_name, validate_room_name};
