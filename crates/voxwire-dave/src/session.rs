//! The epoch/transition state machine for one voice session.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use voxwire_protocol::gateway::{
    ClientDisconnected, ClientsConnected, ExecuteTransition, GatewayMessage, HeartbeatAck,
    MlsAnnounceCommitTransition, MlsExternalSender, MlsProposals, MlsWelcome, PrepareEpoch,
    PrepareTransition, SessionDescription,
};

use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::DaveError;
use crate::{IMMEDIATE_TRANSITION, NEW_GROUP_EPOCH};

/// The external MLS group-key core. All methods receive opaque bytes; the
/// session never inspects them.
pub trait MlsEngine {
    /// A brand-new group is being formed (epoch id 1).
    fn create_group(&mut self, epoch: u64) -> anyhow::Result<()>;
    /// The server announced the external sender allowed to inject proposals.
    fn set_external_sender(&mut self, payload: &[u8]) -> anyhow::Result<()>;
    fn process_proposals(&mut self, payload: &[u8]) -> anyhow::Result<()>;
    fn process_welcome(&mut self, payload: &[u8]) -> anyhow::Result<()>;
    fn process_commit(&mut self, payload: &[u8]) -> anyhow::Result<()>;
    /// A prepared transition was committed: ratchet to its key generation.
    fn apply_transition(&mut self, transition_id: u16) -> anyhow::Result<()>;
}

/// Where the session stands in the prepare/execute cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    EpochPrepared {
        protocol_version: u16,
        epoch: u64,
    },
    TransitionPrepared {
        protocol_version: u16,
        transition_id: u16,
    },
    TransitionExecuted {
        transition_id: u16,
    },
}

#[derive(Debug, Clone, Copy)]
struct PendingTransition {
    protocol_version: u16,
}

/// Correlates signaling messages for one voice session and drives the MLS
/// engine. Single-threaded: the owning connection task calls in.
pub struct DaveSession<E> {
    engine: E,
    state: SessionState,
    /// Transitions observed as prepared, keyed by transition id. Arrival
    /// order of prepare/welcome/commit/execute is not trusted.
    pending: HashMap<u16, PendingTransition>,
    members: HashSet<u64>,
    protocol_version: u16,
}

impl<E: MlsEngine> DaveSession<E> {
    pub fn new(protocol_version: u16, engine: E) -> Self {
        Self {
            engine,
            state: SessionState::Uninitialized,
            pending: HashMap::new(),
            members: HashSet::new(),
            protocol_version,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    /// Users currently in the voice channel, as reported by the gateway.
    pub fn members(&self) -> &HashSet<u64> {
        &self.members
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Route one signaling message. `Hello` and `Ready` belong to the
    /// transport layer and pass through untouched.
    pub fn handle_message(&mut self, msg: &GatewayMessage) -> Result<(), DaveError> {
        match msg {
            GatewayMessage::Hello(_) | GatewayMessage::Ready(_) => Ok(()),
            GatewayMessage::SessionDescription(desc) => {
                self.session_description(desc);
                Ok(())
            }
            GatewayMessage::PrepareEpoch(msg) => self.prepare_epoch(msg),
            GatewayMessage::PrepareTransition(msg) => self.prepare_transition(msg),
            GatewayMessage::ExecuteTransition(msg) => self.execute_transition(msg),
            GatewayMessage::MlsExternalSender(msg) => self.external_sender(msg),
            GatewayMessage::MlsProposals(msg) => self.proposals(msg),
            GatewayMessage::MlsWelcome(msg) => self.welcome(msg),
            GatewayMessage::MlsAnnounceCommitTransition(msg) => self.commit(msg),
            GatewayMessage::ClientsConnected(msg) => {
                self.clients_connected(msg);
                Ok(())
            }
            GatewayMessage::ClientDisconnected(msg) => {
                self.client_disconnected(msg);
                Ok(())
            }
            GatewayMessage::HeartbeatAck(msg) => {
                self.heartbeat_ack(msg);
                Ok(())
            }
        }
    }

    /// Decode a binary MLS envelope and route it like its JSON-shaped twin.
    pub fn handle_envelope(&mut self, bytes: &[u8]) -> Result<(), DaveError> {
        let envelope = Envelope::from_bytes(bytes)?;
        match envelope.kind {
            EnvelopeKind::ExternalSender => self.external_sender(&MlsExternalSender {
                payload: envelope.payload,
            }),
            EnvelopeKind::Proposals => self.proposals(&MlsProposals {
                payload: envelope.payload,
            }),
            EnvelopeKind::Welcome => self.welcome(&MlsWelcome {
                transition_id: envelope.transition_id,
                payload: envelope.payload,
            }),
            EnvelopeKind::CommitTransition => self.commit(&MlsAnnounceCommitTransition {
                transition_id: envelope.transition_id,
                payload: envelope.payload,
            }),
        }
    }

    fn session_description(&mut self, desc: &SessionDescription) {
        self.protocol_version = desc.dave_protocol_version;
        info!(
            dave_protocol_version = desc.dave_protocol_version,
            mode = %desc.mode,
            "voice session described"
        );
    }

    pub fn prepare_epoch(&mut self, msg: &PrepareEpoch) -> Result<(), DaveError> {
        if msg.epoch == NEW_GROUP_EPOCH {
            self.engine
                .create_group(msg.epoch)
                .map_err(|e| DaveError::engine("prepare epoch", e))?;
        }
        self.protocol_version = msg.protocol_version;
        self.state = SessionState::EpochPrepared {
            protocol_version: msg.protocol_version,
            epoch: msg.epoch,
        };
        info!(
            epoch = msg.epoch,
            protocol_version = msg.protocol_version,
            "epoch prepared"
        );
        Ok(())
    }

    pub fn prepare_transition(&mut self, msg: &PrepareTransition) -> Result<(), DaveError> {
        if msg.transition_id == IMMEDIATE_TRANSITION {
            // Informational: no execute will follow, apply right away.
            self.engine
                .apply_transition(IMMEDIATE_TRANSITION)
                .map_err(|e| DaveError::engine("immediate transition", e))?;
            self.protocol_version = msg.protocol_version;
            self.state = SessionState::TransitionExecuted {
                transition_id: IMMEDIATE_TRANSITION,
            };
            debug!("applied immediate transition");
            return Ok(());
        }

        self.pending.insert(
            msg.transition_id,
            PendingTransition {
                protocol_version: msg.protocol_version,
            },
        );
        self.state = SessionState::TransitionPrepared {
            protocol_version: msg.protocol_version,
            transition_id: msg.transition_id,
        };
        debug!(transition_id = msg.transition_id, "transition prepared");
        Ok(())
    }

    pub fn execute_transition(&mut self, msg: &ExecuteTransition) -> Result<(), DaveError> {
        if msg.transition_id == IMMEDIATE_TRANSITION {
            warn!("server sent execute for transition 0");
            return Err(DaveError::ExecuteImmediateTransition);
        }
        let Some(pending) = self.pending.remove(&msg.transition_id) else {
            warn!(
                transition_id = msg.transition_id,
                "execute without matching prepare"
            );
            return Err(DaveError::ExecuteWithoutPrepare {
                transition_id: msg.transition_id,
            });
        };
        self.engine
            .apply_transition(msg.transition_id)
            .map_err(|e| DaveError::engine("execute transition", e))?;
        self.protocol_version = pending.protocol_version;
        self.state = SessionState::TransitionExecuted {
            transition_id: msg.transition_id,
        };
        info!(transition_id = msg.transition_id, "transition executed");
        Ok(())
    }

    pub fn external_sender(&mut self, msg: &MlsExternalSender) -> Result<(), DaveError> {
        self.engine
            .set_external_sender(&msg.payload)
            .map_err(|e| DaveError::engine("external sender", e))
    }

    pub fn proposals(&mut self, msg: &MlsProposals) -> Result<(), DaveError> {
        self.engine
            .process_proposals(&msg.payload)
            .map_err(|e| DaveError::engine("proposals", e))
    }

    /// A welcome implies a prepared transition for the membership change it
    /// causes, whether or not the prepare was seen first.
    pub fn welcome(&mut self, msg: &MlsWelcome) -> Result<(), DaveError> {
        self.engine
            .process_welcome(&msg.payload)
            .map_err(|e| DaveError::engine("welcome", e))?;
        self.register_implied_transition(msg.transition_id);
        Ok(())
    }

    /// A commit announcement carries the transition id it will execute as.
    pub fn commit(&mut self, msg: &MlsAnnounceCommitTransition) -> Result<(), DaveError> {
        self.engine
            .process_commit(&msg.payload)
            .map_err(|e| DaveError::engine("commit", e))?;
        self.register_implied_transition(msg.transition_id);
        Ok(())
    }

    fn register_implied_transition(&mut self, transition_id: u16) {
        if transition_id == IMMEDIATE_TRANSITION {
            return;
        }
        let protocol_version = self.protocol_version;
        self.pending
            .entry(transition_id)
            .or_insert(PendingTransition { protocol_version });
        self.state = SessionState::TransitionPrepared {
            protocol_version,
            transition_id,
        };
    }

    pub fn clients_connected(&mut self, msg: &ClientsConnected) {
        self.members.extend(msg.user_ids.iter().copied());
        debug!(joined = msg.user_ids.len(), total = self.members.len(), "clients connected");
    }

    pub fn client_disconnected(&mut self, msg: &ClientDisconnected) {
        self.members.remove(&msg.user_id);
        debug!(user_id = msg.user_id, total = self.members.len(), "client disconnected");
    }

    /// Stateless: hand the nonce back for round-trip measurement.
    pub fn heartbeat_ack(&self, msg: &HeartbeatAck) -> u64 {
        msg.nonce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every engine call so tests can assert ordering.
    #[derive(Default)]
    struct MockEngine {
        created_groups: Vec<u64>,
        external_senders: Vec<Vec<u8>>,
        proposals: Vec<Vec<u8>>,
        welcomes: Vec<Vec<u8>>,
        commits: Vec<Vec<u8>>,
        applied: Vec<u16>,
        fail_next: bool,
    }

    impl MlsEngine for MockEngine {
        fn create_group(&mut self, epoch: u64) -> anyhow::Result<()> {
            self.created_groups.push(epoch);
            Ok(())
        }

        fn set_external_sender(&mut self, payload: &[u8]) -> anyhow::Result<()> {
            self.external_senders.push(payload.to_vec());
            Ok(())
        }

        fn process_proposals(&mut self, payload: &[u8]) -> anyhow::Result<()> {
            self.proposals.push(payload.to_vec());
            Ok(())
        }

        fn process_welcome(&mut self, payload: &[u8]) -> anyhow::Result<()> {
            if self.fail_next {
                anyhow::bail!("engine rejected welcome");
            }
            self.welcomes.push(payload.to_vec());
            Ok(())
        }

        fn process_commit(&mut self, payload: &[u8]) -> anyhow::Result<()> {
            self.commits.push(payload.to_vec());
            Ok(())
        }

        fn apply_transition(&mut self, transition_id: u16) -> anyhow::Result<()> {
            self.applied.push(transition_id);
            Ok(())
        }
    }

    fn session() -> DaveSession<MockEngine> {
        DaveSession::new(1, MockEngine::default())
    }

    #[test]
    fn prepare_then_execute_reaches_executed() {
        let mut s = session();
        s.prepare_transition(&PrepareTransition {
            protocol_version: 1,
            transition_id: 7,
        })
        .unwrap();
        assert_eq!(
            s.state(),
            SessionState::TransitionPrepared {
                protocol_version: 1,
                transition_id: 7
            }
        );

        s.execute_transition(&ExecuteTransition { transition_id: 7 })
            .unwrap();
        assert_eq!(s.state(), SessionState::TransitionExecuted { transition_id: 7 });
        assert_eq!(s.engine().applied, vec![7]);
    }

    #[test]
    fn execute_without_prepare_is_a_protocol_violation() {
        let mut s = session();
        let err = s
            .execute_transition(&ExecuteTransition { transition_id: 7 })
            .unwrap_err();
        assert!(matches!(
            err,
            DaveError::ExecuteWithoutPrepare { transition_id: 7 }
        ));
        assert_eq!(s.state(), SessionState::Uninitialized);
        assert!(s.engine().applied.is_empty());
    }

    #[test]
    fn executing_the_same_transition_twice_fails() {
        let mut s = session();
        s.prepare_transition(&PrepareTransition {
            protocol_version: 1,
            transition_id: 3,
        })
        .unwrap();
        s.execute_transition(&ExecuteTransition { transition_id: 3 })
            .unwrap();
        assert!(s
            .execute_transition(&ExecuteTransition { transition_id: 3 })
            .is_err());
    }

    #[test]
    fn transition_zero_applies_immediately() {
        let mut s = session();
        s.prepare_transition(&PrepareTransition {
            protocol_version: 2,
            transition_id: 0,
        })
        .unwrap();
        assert_eq!(s.state(), SessionState::TransitionExecuted { transition_id: 0 });
        assert_eq!(s.engine().applied, vec![0]);
        assert_eq!(s.protocol_version(), 2);
        // And nothing was left pending to execute.
        assert!(s
            .execute_transition(&ExecuteTransition { transition_id: 0 })
            .is_err());
    }

    #[test]
    fn epoch_one_creates_a_new_group() {
        let mut s = session();
        s.prepare_epoch(&PrepareEpoch {
            protocol_version: 1,
            epoch: 1,
        })
        .unwrap();
        assert_eq!(s.engine().created_groups, vec![1]);
        assert_eq!(
            s.state(),
            SessionState::EpochPrepared {
                protocol_version: 1,
                epoch: 1
            }
        );

        // A later epoch does not re-create the group.
        s.prepare_epoch(&PrepareEpoch {
            protocol_version: 1,
            epoch: 2,
        })
        .unwrap();
        assert_eq!(s.engine().created_groups, vec![1]);
    }

    #[test]
    fn welcome_implies_a_prepared_transition() {
        let mut s = session();
        // No prepare seen yet; the welcome registers the transition itself.
        s.welcome(&MlsWelcome {
            transition_id: 9,
            payload: vec![1, 2, 3],
        })
        .unwrap();
        assert_eq!(s.engine().welcomes, vec![vec![1, 2, 3]]);

        s.execute_transition(&ExecuteTransition { transition_id: 9 })
            .unwrap();
        assert_eq!(s.state(), SessionState::TransitionExecuted { transition_id: 9 });
    }

    #[test]
    fn commit_before_prepare_is_tolerated() {
        let mut s = session();
        s.commit(&MlsAnnounceCommitTransition {
            transition_id: 4,
            payload: vec![0xC0],
        })
        .unwrap();
        s.prepare_transition(&PrepareTransition {
            protocol_version: 1,
            transition_id: 4,
        })
        .unwrap();
        s.execute_transition(&ExecuteTransition { transition_id: 4 })
            .unwrap();
        assert_eq!(s.engine().commits, vec![vec![0xC0]]);
        assert_eq!(s.engine().applied, vec![4]);
    }

    #[test]
    fn engine_failure_does_not_register_the_transition() {
        let mut s = session();
        s.engine.fail_next = true;
        assert!(s
            .welcome(&MlsWelcome {
                transition_id: 5,
                payload: vec![9],
            })
            .is_err());
        assert!(s
            .execute_transition(&ExecuteTransition { transition_id: 5 })
            .is_err());
    }

    #[test]
    fn roster_tracks_connects_and_disconnects() {
        let mut s = session();
        s.clients_connected(&ClientsConnected {
            user_ids: vec![10, 20, 30],
        });
        assert_eq!(s.members().len(), 3);
        s.client_disconnected(&ClientDisconnected { user_id: 20 });
        assert_eq!(s.members().len(), 2);
        assert!(!s.members().contains(&20));
        // Disconnect of an unknown user is a no-op.
        s.client_disconnected(&ClientDisconnected { user_id: 99 });
        assert_eq!(s.members().len(), 2);
    }

    #[test]
    fn heartbeat_ack_is_stateless() {
        let s = session();
        assert_eq!(s.heartbeat_ack(&HeartbeatAck { nonce: 0xFEED }), 0xFEED);
        assert_eq!(s.state(), SessionState::Uninitialized);
    }

    #[test]
    fn dispatch_routes_gateway_messages() {
        let mut s = session();
        s.handle_message(&GatewayMessage::PrepareTransition(PrepareTransition {
            protocol_version: 1,
            transition_id: 11,
        }))
        .unwrap();
        s.handle_message(&GatewayMessage::ExecuteTransition(ExecuteTransition {
            transition_id: 11,
        }))
        .unwrap();
        assert_eq!(s.state(), SessionState::TransitionExecuted { transition_id: 11 });
    }

    #[test]
    fn binary_envelopes_route_like_json_messages() {
        let mut s = session();
        let bytes = Envelope {
            kind: EnvelopeKind::Welcome,
            transition_id: 6,
            payload: vec![0xAB, 0xCD],
        }
        .to_bytes();
        s.handle_envelope(&bytes).unwrap();
        assert_eq!(s.engine().welcomes, vec![vec![0xAB, 0xCD]]);
        s.execute_transition(&ExecuteTransition { transition_id: 6 })
            .unwrap();
        assert_eq!(s.state(), SessionState::TransitionExecuted { transition_id: 6 });
    }

    #[test]
    fn session_description_updates_protocol_version() {
        let mut s = session();
        s.handle_message(&GatewayMessage::SessionDescription(SessionDescription {
            mode: "aead_aes256_gcm_rtpsize".into(),
            secret_key: vec![0; 32],
            dave_protocol_version: 2,
        }))
        .unwrap();
        assert_eq!(s.protocol_version(), 2);
    }
}
