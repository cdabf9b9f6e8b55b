use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::room::admission::JoinIntent;
use crate::room::state::{RoomId, SessionId, ROOM_CAPACITY};

pub const DEFAULT_ADMISSION_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// One ICE server entry handed to every peer connection. TURN entries carry
/// credentials; STUN entries do not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        urls: Vec<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls,
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// Public STUN servers used when nothing else is configured.
pub fn default_ice_servers() -> Vec<IceServer> {
    [
        "stun:stun.l.google.com:19302",
        "stun:stun1.l.google.com:19302",
        "stun:stun2.l.google.com:19302",
        "stun:stun3.l.google.com:19302",
        "stun:stun4.l.google.com:19302",
        "stun:global.stun.twilio.com:3478",
    ]
    .into_iter()
    .map(IceServer::stun)
    .collect()
}

/// The STUN pool followed by any relay (TURN) servers.
pub fn merge_ice_servers(stun: Vec<IceServer>, turn: Vec<IceServer>) -> Vec<IceServer> {
    let mut servers = stun;
    servers.extend(turn);
    servers
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub max_participants: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            max_participants: ROOM_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub room: RoomId,
    pub name: String,
    pub session_id: SessionId,
    pub intent: Option<JoinIntent>,
    pub admission_timeout: Duration,
    pub negotiation_timeout: Duration,
    pub ice_servers: Vec<IceServer>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            room: RoomId::new("test-room"),
            name: "Guest".to_string(),
            session_id: generate_session_id(),
            intent: None,
            admission_timeout: DEFAULT_ADMISSION_TIMEOUT,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            ice_servers: default_ice_servers(),
        }
    }
}

/// Random token identifying this participant's intent to be in a room
/// across reconnects.
pub fn generate_session_id() -> SessionId {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    SessionId::new(token.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_random_tokens() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_eq!(a.as_str().len(), 12);
        assert_ne!(a, b);
    }

    #[test]
    fn turn_servers_follow_the_stun_pool() {
        let turn = IceServer::turn(
            vec!["turn:relay.example.org:443?transport=tcp".into()],
            "ana",
            "secret",
        );
        let servers = merge_ice_servers(default_ice_servers(), vec![turn.clone()]);
        assert_eq!(servers.len(), 7);
        assert!(servers[..6].iter().all(|s| s.username.is_none() && s.urls.len() == 1));
        assert_eq!(servers.last(), Some(&turn));
    }

    #[test]
    fn ice_server_reads_the_browser_shape() {
        let server: IceServer = serde_json::from_str(
            r#"{"urls":["turn:a.example.org:80"],"username":"u","credential":"c"}"#,
        )
        .unwrap();
        assert_eq!(server.credential.as_deref(), Some("c"));
        let stun: IceServer = serde_json::from_str(r#"{"urls":["stun:b.example.org"]}"#).unwrap();
        assert_eq!(stun, IceServer::stun("stun:b.example.org"));
    }

    #[test]
    fn defaults_match_room_capacity() {
        assert_eq!(ServerConfig::default().max_participants, 10);
        assert_eq!(ClientConfig::default().admission_timeout, Duration::from_secs(15));
    }
}
