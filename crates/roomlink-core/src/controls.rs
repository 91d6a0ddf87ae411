use std::sync::Arc;

use tokio::sync::Mutex;

use crate::errors::SessionError;
use crate::events::{EventEmitter, PublishState, SessionEvent};
use crate::transport::{CameraFrame, PcmFrame, TransportSession};

/// Slot holding the live transport session, shared between the lifecycle
/// manager (sole writer) and the media publisher.
pub type SharedSession = Arc<Mutex<Option<Arc<dyn TransportSession>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalTrack {
    Microphone,
    Camera,
}

/// Controls for local media (microphone, camera).
///
/// Every toggle is delegated to the live transport session. The flags only
/// change after the transport accepted the change.
#[derive(Clone)]
pub struct MediaPublisher {
    session: SharedSession,
    emitter: EventEmitter,
    state: Arc<Mutex<PublishState>>,
}

impl MediaPublisher {
    pub fn new(session: SharedSession, emitter: EventEmitter) -> Self {
        Self {
            session,
            emitter,
            state: Arc::new(Mutex::new(PublishState::default())),
        }
    }

    pub async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.set_enabled(LocalTrack::Microphone, enabled).await
    }

    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.set_enabled(LocalTrack::Camera, enabled).await
    }

    pub async fn is_microphone_enabled(&self) -> bool {
        self.state.lock().await.microphone
    }

    pub async fn is_camera_enabled(&self) -> bool {
        self.state.lock().await.camera
    }

    pub async fn publish_state(&self) -> PublishState {
        *self.state.lock().await
    }

    /// Feed captured microphone audio. Frames arriving while the microphone
    /// is off are dropped.
    pub async fn push_audio_frame(&self, frame: &PcmFrame) -> Result<(), SessionError> {
        frame.validate()?;
        let session = self.live_session().await?;
        if !self.state.lock().await.microphone {
            return Ok(());
        }
        session.push_audio_frame(frame).await
    }

    /// Feed a captured camera frame. Frames arriving while the camera is off
    /// are dropped.
    pub async fn push_video_frame(&self, frame: &CameraFrame) -> Result<(), SessionError> {
        frame.validate()?;
        let session = self.live_session().await?;
        if !self.state.lock().await.camera {
            return Ok(());
        }
        session.push_video_frame(frame).await
    }

    /// Seed the flags for a new session without touching the transport.
    pub(crate) async fn reset(&self, initial: PublishState) {
        *self.state.lock().await = initial;
        self.emitter.emit(SessionEvent::PublishStateChanged(initial));
    }

    async fn live_session(&self) -> Result<Arc<dyn TransportSession>, SessionError> {
        self.session
            .lock()
            .await
            .clone()
            .ok_or_else(|| SessionError::Publish("not connected".into()))
    }

    async fn set_enabled(&self, track: LocalTrack, enabled: bool) -> Result<(), SessionError> {
        let session = self.live_session().await?;

        let result = match track {
            LocalTrack::Microphone => session.set_microphone_enabled(enabled).await,
            LocalTrack::Camera => session.set_camera_enabled(enabled).await,
        };
        if let Err(e) = result {
            tracing::warn!("{track:?} enable={enabled} failed: {e}");
            return Err(match e {
                SessionError::Publish(msg) => SessionError::Publish(msg),
                other => SessionError::Publish(other.to_string()),
            });
        }

        let snapshot = {
            let mut state = self.state.lock().await;
            match track {
                LocalTrack::Microphone => state.microphone = enabled,
                LocalTrack::Camera => state.camera = enabled,
            }
            *state
        };
        tracing::info!("{track:?} enabled: {enabled}");
        self.emitter.emit(SessionEvent::PublishStateChanged(snapshot));
        Ok(())
    }
}
