//! Seam between the lifecycle manager and the media transport.
//!
//! The manager only ever talks to these traits; `livekit_transport`
//! provides the production implementation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::{IceServer, SessionConfig};
use crate::errors::SessionError;
use crate::events::ConnectionQuality;

/// Raw events emitted by a transport session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    SignalConnected,
    Connected,
    Disconnected { reason: String },
    Reconnecting,
    Reconnected,
    /// Low-level link state as reported by the transport, informational.
    ConnectionStateChanged(String),
    ConnectionQualityChanged { participant_identity: String, quality: ConnectionQuality, is_local: bool },
    ParticipantConnected { identity: String },
    ParticipantDisconnected { identity: String },
    ConnectionError { message: String },
}

/// Options handed to every dial.
#[derive(Debug, Clone, PartialEq)]
pub struct DialOptions {
    pub auto_subscribe: bool,
    pub ice_servers: Vec<IceServer>,
}

impl DialOptions {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            auto_subscribe: config.auto_subscribe,
            ice_servers: config.ice_servers.clone(),
        }
    }
}

/// Interleaved signed 16-bit PCM captured by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u32,
}

impl PcmFrame {
    pub fn samples_per_channel(&self) -> u32 {
        (self.samples.len() / self.channels.max(1) as usize) as u32
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.channels == 0 || self.sample_rate == 0 {
            return Err(invalid_frame("audio format must be non-zero"));
        }
        if self.samples.is_empty() || self.samples.len() % self.channels as usize != 0 {
            return Err(invalid_frame("audio samples do not fill every channel"));
        }
        Ok(())
    }
}

/// One I420 camera frame with tightly packed planes.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
    /// Clockwise rotation to apply on display: 0, 90, 180 or 270.
    pub rotation_degrees: u32,
    pub timestamp_us: i64,
}

impl CameraFrame {
    /// Width and height of the U and V planes.
    pub fn chroma_size(&self) -> (u32, u32) {
        (self.width.div_ceil(2), self.height.div_ceil(2))
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.width == 0 || self.height == 0 {
            return Err(invalid_frame("video dimensions must be non-zero"));
        }
        let luma = self.width as usize * self.height as usize;
        let (cw, ch) = self.chroma_size();
        let chroma = cw as usize * ch as usize;
        if self.y.len() != luma || self.u.len() != chroma || self.v.len() != chroma {
            return Err(invalid_frame("video planes do not match the dimensions"));
        }
        if !matches!(self.rotation_degrees, 0 | 90 | 180 | 270) {
            return Err(invalid_frame("rotation must be a multiple of 90"));
        }
        Ok(())
    }
}

fn invalid_frame(reason: &str) -> SessionError {
    SessionError::Publish(format!("invalid frame: {reason}"))
}

/// A live connection to the media server.
#[async_trait]
pub trait TransportSession: Send + Sync {
    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), SessionError>;
    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), SessionError>;
    /// Feed captured audio into the published microphone track.
    async fn push_audio_frame(&self, frame: &PcmFrame) -> Result<(), SessionError>;
    /// Feed a captured frame into the published camera track.
    async fn push_video_frame(&self, frame: &CameraFrame) -> Result<(), SessionError>;
    fn remote_participants(&self) -> Vec<String>;
    async fn close(&self) -> Result<(), SessionError>;
}

/// A dialed session together with its event stream.
pub struct Dialed {
    pub session: Arc<dyn TransportSession>,
    pub events: UnboundedReceiver<TransportEvent>,
}

/// Something that can dial a media server.
///
/// One call is one dial; retries are driven by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dial(&self, address: &str, token: &str, options: &DialOptions) -> Result<Dialed, SessionError>;
}
