//! [`Transport`] backed by the LiveKit Rust SDK.

use std::sync::Arc;

use async_trait::async_trait;
use livekit::options::TrackPublishOptions;
use livekit::participant::ConnectionQuality as LkConnectionQuality;
use livekit::prelude::*;
use livekit::track::TrackSource as LkTrackSource;
use livekit::webrtc::audio_frame::AudioFrame;
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::prelude::*;
use livekit::webrtc::video_source::native::NativeVideoSource;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::errors::SessionError;
use crate::events::ConnectionQuality;
use crate::transport::{
    CameraFrame, DialOptions, Dialed, PcmFrame, Transport, TransportEvent, TransportSession,
};

const AUDIO_SAMPLE_RATE: u32 = 48_000;
const AUDIO_CHANNELS: u32 = 1;
const AUDIO_QUEUE_SIZE_MS: u32 = 100;

const VIDEO_WIDTH: u32 = 1280;
const VIDEO_HEIGHT: u32 = 720;

/// Dials LiveKit rooms.
#[derive(Debug, Default, Clone)]
pub struct LiveKitTransport;

impl LiveKitTransport {
    pub fn new() -> Self {
        Self
    }

    fn room_options(options: &DialOptions) -> RoomOptions {
        let mut room_options = RoomOptions::default();
        room_options.auto_subscribe = options.auto_subscribe;
        // Retries are scheduled by the session manager.
        room_options.join_retries = 0;
        room_options.rtc_config.ice_servers = options
            .ice_servers
            .iter()
            .map(|server| IceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                password: server.credential.clone().unwrap_or_default(),
            })
            .collect();
        room_options
    }
}

#[async_trait]
impl Transport for LiveKitTransport {
    async fn dial(
        &self,
        address: &str,
        token: &str,
        options: &DialOptions,
    ) -> Result<Dialed, SessionError> {
        let (room, room_events) = Room::connect(address, token, Self::room_options(options))
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        tracing::info!("joined LiveKit room {}", room.name());

        let (tx, rx) = unbounded_channel();
        // `Room::connect` only resolves once the join handshake completed.
        let _ = tx.send(TransportEvent::SignalConnected);
        let _ = tx.send(TransportEvent::Connected);
        tokio::spawn(forward_events(room_events, tx));

        Ok(Dialed {
            session: Arc::new(LiveKitSession::new(Arc::new(room))),
            events: rx,
        })
    }
}

async fn forward_events(
    mut room_events: UnboundedReceiver<RoomEvent>,
    tx: UnboundedSender<TransportEvent>,
) {
    while let Some(event) = room_events.recv().await {
        let mapped = match event {
            RoomEvent::Connected { .. } => TransportEvent::Connected,
            RoomEvent::Reconnecting => TransportEvent::Reconnecting,
            RoomEvent::Reconnected => TransportEvent::Reconnected,
            RoomEvent::Disconnected { reason } => TransportEvent::Disconnected {
                reason: format!("{reason:?}"),
            },
            RoomEvent::ConnectionStateChanged(state) => {
                TransportEvent::ConnectionStateChanged(format!("{state:?}"))
            }
            RoomEvent::ParticipantConnected(participant) => TransportEvent::ParticipantConnected {
                identity: participant.identity().to_string(),
            },
            RoomEvent::ParticipantDisconnected(participant) => {
                TransportEvent::ParticipantDisconnected {
                    identity: participant.identity().to_string(),
                }
            }
            RoomEvent::ConnectionQualityChanged { quality, participant } => {
                TransportEvent::ConnectionQualityChanged {
                    participant_identity: participant.identity().to_string(),
                    quality: map_quality(quality),
                    is_local: matches!(participant, Participant::Local(_)),
                }
            }
            _ => continue,
        };
        if tx.send(mapped).is_err() {
            // Session manager dropped the receiver.
            break;
        }
    }
    tracing::debug!("LiveKit event stream closed");
}

fn map_quality(quality: LkConnectionQuality) -> ConnectionQuality {
    match quality {
        LkConnectionQuality::Excellent => ConnectionQuality::Excellent,
        LkConnectionQuality::Good => ConnectionQuality::Good,
        LkConnectionQuality::Poor => ConnectionQuality::Poor,
        LkConnectionQuality::Lost => ConnectionQuality::Lost,
    }
}

/// A joined LiveKit room.
///
/// Local tracks are published on first enable and muted or unmuted after
/// that. Host capture pipelines push frames into their native sources.
pub struct LiveKitSession {
    room: Arc<Room>,
    audio_source: Mutex<Option<NativeAudioSource>>,
    video_source: Mutex<Option<NativeVideoSource>>,
}

impl LiveKitSession {
    fn new(room: Arc<Room>) -> Self {
        Self {
            room,
            audio_source: Mutex::new(None),
            video_source: Mutex::new(None),
        }
    }

    /// Mute or unmute an existing publication. Returns false when nothing
    /// is published for `source` yet.
    fn toggle_publication(&self, source: LkTrackSource, enabled: bool) -> bool {
        let local = self.room.local_participant();
        for (_, publication) in local.track_publications() {
            if publication.source() == source {
                if enabled {
                    publication.unmute();
                } else {
                    publication.mute();
                }
                return true;
            }
        }
        false
    }

    async fn publish_microphone(&self) -> Result<(), SessionError> {
        let source = NativeAudioSource::new(
            AudioSourceOptions {
                echo_cancellation: true,
                noise_suppression: true,
                auto_gain_control: true,
            },
            AUDIO_SAMPLE_RATE,
            AUDIO_CHANNELS,
            AUDIO_QUEUE_SIZE_MS,
        );
        let track =
            LocalAudioTrack::create_audio_track("microphone", RtcAudioSource::Native(source.clone()));

        self.room
            .local_participant()
            .publish_track(
                LocalTrack::Audio(track),
                TrackPublishOptions {
                    source: LkTrackSource::Microphone,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SessionError::Publish(format!("publish audio: {e}")))?;

        *self.audio_source.lock().await = Some(source);
        tracing::info!("microphone track published");
        Ok(())
    }

    async fn publish_camera(&self) -> Result<(), SessionError> {
        let source = NativeVideoSource::new(
            VideoResolution {
                width: VIDEO_WIDTH,
                height: VIDEO_HEIGHT,
            },
            false,
        );
        let track =
            LocalVideoTrack::create_video_track("camera", RtcVideoSource::Native(source.clone()));

        self.room
            .local_participant()
            .publish_track(
                LocalTrack::Video(track),
                TrackPublishOptions {
                    source: LkTrackSource::Camera,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SessionError::Publish(format!("publish video: {e}")))?;

        *self.video_source.lock().await = Some(source);
        tracing::info!("camera track published");
        Ok(())
    }
}

#[async_trait]
impl TransportSession for LiveKitSession {
    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        if self.toggle_publication(LkTrackSource::Microphone, enabled) || !enabled {
            return Ok(());
        }
        self.publish_microphone().await
    }

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        if self.toggle_publication(LkTrackSource::Camera, enabled) || !enabled {
            return Ok(());
        }
        self.publish_camera().await
    }

    async fn push_audio_frame(&self, frame: &PcmFrame) -> Result<(), SessionError> {
        let source = self
            .audio_source
            .lock()
            .await
            .clone()
            .ok_or_else(|| SessionError::Publish("microphone track not published".into()))?;
        let audio = AudioFrame {
            data: frame.samples.as_slice().into(),
            sample_rate: frame.sample_rate,
            num_channels: frame.channels,
            samples_per_channel: frame.samples_per_channel(),
        };
        source
            .capture_frame(&audio)
            .await
            .map_err(|e| SessionError::Publish(format!("capture audio: {e}")))
    }

    async fn push_video_frame(&self, frame: &CameraFrame) -> Result<(), SessionError> {
        let source = self
            .video_source
            .lock()
            .await
            .clone()
            .ok_or_else(|| SessionError::Publish("camera track not published".into()))?;

        let mut buffer = I420Buffer::new(frame.width, frame.height);
        let (stride_y, stride_u, stride_v) = buffer.strides();
        let (chroma_width, _) = frame.chroma_size();
        let (y, u, v) = buffer.data_mut();
        copy_plane(&frame.y, frame.width as usize, y, stride_y as usize);
        copy_plane(&frame.u, chroma_width as usize, u, stride_u as usize);
        copy_plane(&frame.v, chroma_width as usize, v, stride_v as usize);

        source.capture_frame(&VideoFrame {
            rotation: map_rotation(frame.rotation_degrees),
            timestamp_us: frame.timestamp_us,
            buffer,
        });
        Ok(())
    }

    fn remote_participants(&self) -> Vec<String> {
        self.room
            .remote_participants()
            .values()
            .map(|p| p.identity().to_string())
            .collect()
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.room
            .close()
            .await
            .map_err(|e| SessionError::Connect(format!("close room: {e}")))
    }
}

/// Copy a tightly packed plane into a destination whose rows are
/// `dst_stride` bytes apart.
fn copy_plane(src: &[u8], width: usize, dst: &mut [u8], dst_stride: usize) {
    for (row, line) in src.chunks_exact(width).enumerate() {
        let start = row * dst_stride;
        dst[start..start + width].copy_from_slice(line);
    }
}

fn map_rotation(degrees: u32) -> VideoRotation {
    match degrees {
        90 => VideoRotation::VideoRotation90,
        180 => VideoRotation::VideoRotation180,
        270 => VideoRotation::VideoRotation270,
        _ => VideoRotation::VideoRotation0,
    }
}
