pub mod ack_tracker;
pub mod prediction;
pub mod reconciler;

pub use self::ack_tracker::{AckEvent, AckTracker, AckTrackerOptions};
pub use self::prediction::{apply_diff, PredictedWorld};
pub use self::reconciler::{ReconcileReport, Reconciler, ReconcilerOptions, ResyncRequired};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::engine::Command;
use crate::error::ClientError;
use crate::protocol::{cmd_message, parse_envelope, resync_message, Envelope, MessageType};
use crate::types::StatePayload;

#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    State(ReconcileReport),
    ResyncQueued(ResyncRequired),
    Acked {
        reply_to: String,
        tick: u64,
    },
    Rejected {
        reply_to: Option<String>,
        code: String,
        message: String,
    },
    Action {
        player_id: String,
        action: String,
        text: String,
    },
    Pong {
        rtt_ms: i64,
    },
}

#[derive(Deserialize)]
struct StateBody {
    state: StatePayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AckBody {
    reply_to: String,
    tick: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(default)]
    reply_to: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionBody {
    player_id: String,
    action: String,
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PongBody {
    client_timestamp: i64,
}

pub struct ClientSession {
    reconciler: Reconciler,
    acks: AckTracker,
    last_sequence: Option<u64>,
    outbox: Vec<Envelope>,
}

impl ClientSession {
    pub fn new(player_id: &str) -> Self {
        Self {
            reconciler: Reconciler::new(player_id, ReconcilerOptions::default()),
            acks: AckTracker::new(AckTrackerOptions::default()),
            last_sequence: None,
            outbox: Vec::new(),
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn subscribe(&self) -> watch::Receiver<PredictedWorld> {
        self.reconciler.subscribe()
    }

    pub fn issue(&mut self, command: Command, now_ms: u64) -> Envelope {
        let envelope = cmd_message(&command);
        self.reconciler.issue(&envelope.message_id, command);
        self.acks.track(envelope.clone(), now_ms);
        envelope
    }

    pub fn advance_tick(&mut self) {
        self.reconciler.advance();
    }

    pub fn poll(&mut self, now_ms: u64) -> Vec<Envelope> {
        let mut out = std::mem::take(&mut self.outbox);
        for event in self.acks.poll(now_ms) {
            match event {
                AckEvent::Resend(envelope) => out.push(envelope),
                AckEvent::Failed { message_id } => {
                    warn!(%message_id, "command never acknowledged; dropping prediction");
                    self.reconciler.reject(&message_id);
                }
            }
        }
        out
    }

    pub fn handle_text(&mut self, raw: &str, now_ms: u64) -> Result<Option<ServerEvent>, ClientError> {
        let envelope = parse_envelope(raw).ok_or(ClientError::Malformed)?;
        let message_type = envelope.message_type;
        match message_type {
            MessageType::State => {
                if let Some(sequence) = envelope.sequence_number {
                    if self.last_sequence.is_some_and(|last| sequence < last) {
                        debug!(sequence, "dropping out-of-order state");
                        return Ok(None);
                    }
                    self.last_sequence = Some(sequence);
                }
                let body: StateBody = decode(message_type, envelope.payload)?;
                match self.reconciler.on_state(body.state) {
                    Ok(report) => Ok(Some(ServerEvent::State(report))),
                    Err(reason) => {
                        debug!(%reason, "requesting resync");
                        self.outbox.push(resync_message());
                        Ok(Some(ServerEvent::ResyncQueued(reason)))
                    }
                }
            }
            MessageType::CmdAck => {
                let body: AckBody = decode(message_type, envelope.payload)?;
                self.acks.acknowledge(&body.reply_to);
                self.reconciler.acknowledge(&body.reply_to);
                Ok(Some(ServerEvent::Acked {
                    reply_to: body.reply_to,
                    tick: body.tick,
                }))
            }
            MessageType::Error => {
                let body: ErrorBody = decode(message_type, envelope.payload)?;
                if let Some(reply_to) = body.reply_to.as_deref() {
                    self.acks.acknowledge(reply_to);
                    self.reconciler.reject(reply_to);
                }
                Ok(Some(ServerEvent::Rejected {
                    reply_to: body.reply_to,
                    code: body.code,
                    message: body.message,
                }))
            }
            MessageType::Action => {
                let body: ActionBody = decode(message_type, envelope.payload)?;
                Ok(Some(ServerEvent::Action {
                    player_id: body.player_id,
                    action: body.action,
                    text: body.text,
                }))
            }
            MessageType::Pong => {
                let body: PongBody = decode(message_type, envelope.payload)?;
                let now = i64::try_from(now_ms).unwrap_or(i64::MAX);
                Ok(Some(ServerEvent::Pong {
                    rtt_ms: now.saturating_sub(body.client_timestamp),
                }))
            }
            other => Err(ClientError::UnexpectedType(other.as_str())),
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(
    message_type: MessageType,
    payload: Value,
) -> Result<T, ClientError> {
    serde_json::from_value(payload).map_err(|source| ClientError::Payload {
        message_type: message_type.as_str(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleSet;
    use crate::engine::GameEngine;
    use crate::error::CommandError;
    use crate::protocol::{cmd_ack_message, error_message, pong_message, state_message};
    use crate::types::StartPlayer;

    fn engine() -> GameEngine {
        let players = ["p1", "p2"]
            .iter()
            .map(|id| StartPlayer {
                id: id.to_string(),
                name: id.to_string(),
                connected: true,
            })
            .collect();
        GameEngine::new(players, RuleSet::default(), 9)
    }

    #[test]
    fn server_state_drives_the_prediction() {
        let mut engine = engine();
        let mut session = ClientSession::new("p1");
        let first = state_message(1, &engine.build_state_payload(true)).to_text();
        let event = session.handle_text(&first, 0).expect("state decodes");
        assert!(matches!(event, Some(ServerEvent::State(_))));
        assert!(session.reconciler().authoritative().is_some());

        engine.step();
        let second = state_message(2, &engine.build_state_payload(false)).to_text();
        session.handle_text(&second, 0).expect("diff decodes");
        assert_eq!(session.reconciler().predicted().tick, 1);

        // replayed older frame is ignored
        assert_eq!(session.handle_text(&first, 0).expect("decodes"), None);
    }

    #[test]
    fn diff_without_baseline_queues_resync() {
        let mut engine = engine();
        engine.build_state_payload(true);
        engine.step();
        let diff = state_message(2, &engine.build_state_payload(false)).to_text();

        let mut session = ClientSession::new("p1");
        let event = session.handle_text(&diff, 0).expect("decodes");
        assert!(matches!(event, Some(ServerEvent::ResyncQueued(_))));
        let out = session.poll(0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message_type, MessageType::Resync);
    }

    #[test]
    fn ack_and_error_settle_outstanding_commands() {
        let mut session = ClientSession::new("p1");
        let first = session.issue(Command::AdvanceTech, 0);
        let second = session.issue(Command::AdvanceTech, 0);
        assert_eq!(session.reconciler().pending_len(), 2);

        let ack = cmd_ack_message(&first.message_id, 3).to_text();
        let event = session.handle_text(&ack, 10).expect("ack decodes");
        assert_eq!(
            event,
            Some(ServerEvent::Acked {
                reply_to: first.message_id.clone(),
                tick: 3
            })
        );

        let refusal = CommandError::rule("insufficient resources");
        let error = error_message(&refusal, Some(&second.message_id)).to_text();
        let event = session.handle_text(&error, 10).expect("error decodes");
        assert!(matches!(event, Some(ServerEvent::Rejected { code, .. }) if code == "rule_violation"));
        assert_eq!(session.reconciler().pending_len(), 0);
        assert!(session.poll(10_000).is_empty());
    }

    #[test]
    fn unanswered_command_is_resent_with_the_same_id() {
        let mut session = ClientSession::new("p1");
        let sent = session.issue(Command::AdvanceTech, 0);
        let resent = session.poll(ACK_WAIT_MS);
        assert_eq!(resent, vec![sent]);
        assert!(session.poll(ACK_WAIT_MS * 3).is_empty());
        assert_eq!(session.reconciler().pending_len(), 0);
    }

    const ACK_WAIT_MS: u64 = crate::constants::ACK_TIMEOUT_MS;

    #[test]
    fn pong_reports_round_trip() {
        let mut session = ClientSession::new("p1");
        let pong = pong_message("msg_1", 1_000).to_text();
        assert_eq!(
            session.handle_text(&pong, 1_040).expect("pong decodes"),
            Some(ServerEvent::Pong { rtt_ms: 40 })
        );
    }

    #[test]
    fn client_message_types_are_refused() {
        let mut session = ClientSession::new("p1");
        let cmd = cmd_message(&Command::AdvanceTech).to_text();
        assert!(matches!(
            session.handle_text(&cmd, 0),
            Err(ClientError::UnexpectedType("cmd"))
        ));
        assert!(matches!(
            session.handle_text("not json", 0),
            Err(ClientError::Malformed)
        ));
    }
}
