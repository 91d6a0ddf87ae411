use std::fmt;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::endpoint::EndpointResolver;
use crate::errors::SessionError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    room_name: &'a str,
    participant_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a str>,
}

/// Body returned by `POST /livekit/token`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    room_name: Option<String>,
    #[serde(default)]
    participant_name: Option<String>,
    #[serde(default)]
    livekit_url: Option<String>,
}

/// Signed token plus the address to dial with it.
///
/// Scoped to one room, identity and expiry; never reused across sessions.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinCredential {
    pub token: String,
    /// Resolved signaling address.
    pub server_url: String,
    pub room_name: String,
    pub participant_name: String,
}

impl fmt::Debug for JoinCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinCredential")
            .field("token", &"<redacted>")
            .field("server_url", &self.server_url)
            .field("room_name", &self.room_name)
            .field("participant_name", &self.participant_name)
            .finish()
    }
}

/// Exchanges (room, participant) for a join credential.
///
/// One POST per call and no retries; the caller owns retry policy.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    endpoint: String,
    resolver: EndpointResolver,
}

impl TokenClient {
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SessionError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            endpoint: config.token_endpoint(),
            resolver: EndpointResolver::from_config(config),
        })
    }

    pub async fn fetch_token(
        &self,
        room: &str,
        participant: &str,
        metadata: Option<&str>,
    ) -> Result<JoinCredential, SessionError> {
        let room = room.trim();
        let participant = participant.trim();
        if room.is_empty() {
            return Err(SessionError::Validation("room name is required".into()));
        }
        if participant.is_empty() {
            return Err(SessionError::Validation("participant name is required".into()));
        }

        tracing::info!("requesting token for room={room} participant={participant}");

        let body = TokenRequest {
            room_name: room,
            participant_name: participant,
            metadata,
        };
        let resp = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::TokenFetch {
                status: None,
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let reason = if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text
            };
            tracing::warn!("token endpoint returned {status}: {reason}");
            return Err(SessionError::TokenFetch {
                status: Some(status.as_u16()),
                reason,
            });
        }

        let data: TokenResponse = resp.json().await.map_err(|e| SessionError::TokenFetch {
            status: None,
            reason: format!("invalid token response: {e}"),
        })?;

        let token = data
            .token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SessionError::TokenFetch {
                status: None,
                reason: "empty token".into(),
            })?;

        if data.livekit_url.is_none() {
            tracing::debug!("token response has no livekitUrl, using default signaling address");
        }
        let server_url = self.resolver.resolve(data.livekit_url.as_deref());
        tracing::info!("token received, signaling address {server_url}");

        Ok(JoinCredential {
            token,
            server_url,
            room_name: data.room_name.unwrap_or_else(|| room.to_string()),
            participant_name: data
                .participant_name
                .unwrap_or_else(|| participant.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> TokenClient {
        let config = SessionConfig {
            base_url: server.uri(),
            default_signaling_address: "wss://fallback.example.com".into(),
            ..Default::default()
        };
        TokenClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn resolves_returned_livekit_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/livekit/token"))
            .and(header("accept", "application/json"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({
                "roomName": "room-1",
                "participantName": "alice"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "abc",
                "roomName": "room-1",
                "participantName": "alice",
                "livekitUrl": "wss://host/"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cred = client_for(&server)
            .fetch_token("room-1", "alice", None)
            .await
            .unwrap();
        assert_eq!(cred.token, "abc");
        assert_eq!(cred.server_url, "wss://host/rtc");
        assert_eq!(cred.room_name, "room-1");
    }

    #[tokio::test]
    async fn trims_inputs_and_forwards_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/livekit/token"))
            .and(body_json(serde_json::json!({
                "roomName": "room-1",
                "participantName": "alice",
                "metadata": "{\"role\":\"guest\"}"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cred = client_for(&server)
            .fetch_token("  room-1 ", " alice\n", Some("{\"role\":\"guest\"}"))
            .await
            .unwrap();
        assert_eq!(cred.participant_name, "alice");
    }

    #[tokio::test]
    async fn missing_livekit_url_uses_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "abc",
                "roomName": "r",
                "participantName": "p"
            })))
            .mount(&server)
            .await;

        let cred = client_for(&server).fetch_token("r", "p", None).await.unwrap();
        assert_eq!(cred.server_url, "wss://fallback.example.com/rtc");
    }

    #[tokio::test]
    async fn non_success_status_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_token("room", "alice", None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::TokenFetch {
                status: Some(401),
                reason: "invalid api key".into()
            }
        );
        assert!(err.to_string().contains("invalid api key"));
    }

    #[tokio::test]
    async fn empty_body_falls_back_to_status_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_token("room", "alice", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::TokenFetch { status: Some(503), ref reason } if reason == "Service Unavailable"
        ));
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "",
                "livekitUrl": "wss://host"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_token("room", "alice", None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::TokenFetch {
                status: None,
                reason: "empty token".into()
            }
        );
    }

    #[tokio::test]
    async fn malformed_body_is_token_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_token("room", "alice", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::TokenFetch { status: None, .. }));
    }

    #[tokio::test]
    async fn blank_identifiers_never_reach_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.fetch_token("   ", "alice", None).await,
            Err(SessionError::Validation(_))
        ));
        assert!(matches!(
            client.fetch_token("room", "", None).await,
            Err(SessionError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_token_fetch_error() {
        let config = SessionConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..Default::default()
        };
        let err = TokenClient::new(&config)
            .unwrap()
            .fetch_token("room", "alice", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::TokenFetch { status: None, .. }));
    }

    #[test]
    fn debug_output_hides_token() {
        let cred = JoinCredential {
            token: "secret-jwt".into(),
            server_url: "wss://host/rtc".into(),
            room_name: "r".into(),
            participant_name: "p".into(),
        };
        let dbg = format!("{cred:?}");
        assert!(!dbg.contains("secret-jwt"));
        assert!(dbg.contains("wss://host/rtc"));
    }
}
