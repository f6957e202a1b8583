//! JSON-modeled payloads for the voice / DAVE control channel.
//!
//! Field names and shapes are fixed by the external protocol and must
//! round-trip exactly; do not rename fields here without a protocol bump.
//!
//! MLS payloads (`MlsExternalSender`, `MlsProposals`, ...) are opaque byte
//! blobs from this layer's point of view: they are correlated with a
//! transition id and handed to the external MLS engine untouched.

use serde::{Deserialize, Serialize};

/// Server greeting carrying the heartbeat cadence in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: f64,
}

/// Voice session parameters, including the advertised encryption modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ready {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    pub modes: Vec<String>,
}

/// Negotiated session: chosen mode, symmetric key, DAVE protocol version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub mode: String,
    pub secret_key: Vec<u8>,
    pub dave_protocol_version: u16,
}

/// Announces an upcoming protocol version and epoch id.
/// Epoch id 1 signals creation of a brand-new MLS group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareEpoch {
    pub protocol_version: u16,
    pub epoch: u64,
}

/// Announces a pending key transition. Transition id 0 is informational
/// only and is applied immediately, without an execute message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareTransition {
    pub protocol_version: u16,
    pub transition_id: u16,
}

/// Commits a previously prepared, non-zero transition id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteTransition {
    pub transition_id: u16,
}

/// Opaque MLS external-sender announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlsExternalSender {
    pub payload: Vec<u8>,
}

/// Opaque MLS proposals blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlsProposals {
    pub payload: Vec<u8>,
}

/// MLS welcome for a membership change; carries the transition id the
/// membership change implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlsWelcome {
    pub transition_id: u16,
    pub payload: Vec<u8>,
}

/// Commit announcement with its explicit transition id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlsAnnounceCommitTransition {
    pub transition_id: u16,
    pub payload: Vec<u8>,
}

/// Users that joined the voice channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientsConnected {
    pub user_ids: Vec<u64>,
}

/// A user that left the voice channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDisconnected {
    pub user_id: u64,
}

/// Heartbeat echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub nonce: u64,
}

/// Every signaling payload this subsystem consumes, tagged for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "snake_case")]
pub enum GatewayMessage {
    Hello(Hello),
    Ready(Ready),
    SessionDescription(SessionDescription),
    PrepareEpoch(PrepareEpoch),
    PrepareTransition(PrepareTransition),
    ExecuteTransition(ExecuteTransition),
    MlsExternalSender(MlsExternalSender),
    MlsProposals(MlsProposals),
    MlsWelcome(MlsWelcome),
    MlsAnnounceCommitTransition(MlsAnnounceCommitTransition),
    ClientsConnected(ClientsConnected),
    ClientDisconnected(ClientDisconnected),
    HeartbeatAck(HeartbeatAck),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &GatewayMessage) -> GatewayMessage {
        let json = serde_json::to_string(msg).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn session_description_field_names() {
        let msg = SessionDescription {
            mode: "aead_aes256_gcm_rtpsize".into(),
            secret_key: vec![1, 2, 3],
            dave_protocol_version: 1,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("mode").is_some());
        assert!(json.get("secret_key").is_some());
        assert!(json.get("dave_protocol_version").is_some());
    }

    #[test]
    fn ready_roundtrip() {
        let msg = GatewayMessage::Ready(Ready {
            ssrc: 1234,
            ip: "203.0.113.9".into(),
            port: 50_004,
            modes: vec![
                "aead_aes256_gcm_rtpsize".into(),
                "aead_xchacha20_poly1305_rtpsize".into(),
            ],
        });
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn transition_messages_roundtrip() {
        for msg in [
            GatewayMessage::PrepareEpoch(PrepareEpoch {
                protocol_version: 1,
                epoch: 1,
            }),
            GatewayMessage::PrepareTransition(PrepareTransition {
                protocol_version: 1,
                transition_id: 7,
            }),
            GatewayMessage::ExecuteTransition(ExecuteTransition { transition_id: 7 }),
            GatewayMessage::MlsWelcome(MlsWelcome {
                transition_id: 9,
                payload: vec![0xDE, 0xAD],
            }),
        ] {
            assert_eq!(roundtrip(&msg), msg);
        }
    }

    #[test]
    fn roster_and_heartbeat_roundtrip() {
        let connected = GatewayMessage::ClientsConnected(ClientsConnected {
            user_ids: vec![1, 2, 3],
        });
        assert_eq!(roundtrip(&connected), connected);

        let ack = GatewayMessage::HeartbeatAck(HeartbeatAck { nonce: 0xFEED });
        assert_eq!(roundtrip(&ack), ack);
    }

    #[test]
    fn hello_parses_external_shape() {
        let msg: Hello = serde_json::from_str(r#"{"heartbeat_interval":13750.0}"#).unwrap();
        assert_eq!(msg.heartbeat_interval, 13750.0);
    }
}
