use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::engine::Command;
use crate::error::CommandError;
use crate::types::{StatePayload, TileType, UnitType};

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Cmd,
    Ping,
    Resync,
    State,
    Action,
    Error,
    Pong,
    CmdAck,
}

impl MessageType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cmd" => Some(Self::Cmd),
            "ping" => Some(Self::Ping),
            "resync" => Some(Self::Resync),
            "state" => Some(Self::State),
            "action" => Some(Self::Action),
            "error" => Some(Self::Error),
            "pong" => Some(Self::Pong),
            "cmdAck" => Some(Self::CmdAck),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cmd => "cmd",
            Self::Ping => "ping",
            Self::Resync => "resync",
            Self::State => "state",
            Self::Action => "action",
            Self::Error => "error",
            Self::Pong => "pong",
            Self::CmdAck => "cmdAck",
        }
    }

    pub fn is_client_to_server(self) -> bool {
        matches!(self, Self::Cmd | Self::Ping | Self::Resync)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub timestamp: i64,
    pub payload: Value,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_ack: Option<bool>,
}

impl Envelope {
    pub fn new(message_type: MessageType, payload: Value) -> Self {
        Self {
            message_type,
            timestamp: Utc::now().timestamp_millis(),
            payload,
            message_id: make_message_id(),
            sequence_number: None,
            priority: None,
            requires_ack: None,
        }
    }

    pub fn with_sequence(mut self, sequence_number: u64) -> Self {
        self.sequence_number = Some(sequence_number);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn requiring_ack(mut self) -> Self {
        self.requires_ack = Some(true);
        self
    }

    pub fn to_text(&self) -> String {
        match serde_json::to_string(self) {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, message_type = self.message_type.as_str(), "failed to encode envelope");
                String::from("{}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ClientRequest {
    Cmd {
        message_id: String,
        command: Command,
    },
    Ping {
        message_id: String,
        timestamp: i64,
    },
    Resync {
        message_id: String,
    },
}

impl ClientRequest {
    pub fn message_id(&self) -> &str {
        match self {
            Self::Cmd { message_id, .. }
            | Self::Ping { message_id, .. }
            | Self::Resync { message_id } => message_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InboundError {
    pub reply_to: Option<String>,
    pub error: CommandError,
}

impl InboundError {
    fn new(reply_to: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            reply_to: reply_to.map(str::to_string),
            error: CommandError::validation(message),
        }
    }
}

/// Reads the envelope fields. A missing timestamp falls back to the receive time.
pub fn parse_envelope(raw: &str) -> Option<Envelope> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = MessageType::parse(object.get("type")?.as_str()?)?;
    let message_id = object.get("messageId")?.as_str()?.to_string();
    let timestamp = match object.get("timestamp") {
        None => Utc::now().timestamp_millis(),
        Some(value) => parse_timestamp(value)?,
    };
    let sequence_number = match object.get("sequenceNumber") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_u64()?),
    };
    let priority = match object.get("priority") {
        None | Some(Value::Null) => None,
        Some(value) => Some(Priority::parse(value.as_str()?)?),
    };
    let requires_ack = match object.get("requiresAck") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_bool()?),
    };
    Some(Envelope {
        message_type,
        timestamp,
        payload: object.get("payload").cloned().unwrap_or(Value::Null),
        message_id,
        sequence_number,
        priority,
        requires_ack,
    })
}

fn parse_timestamp(value: &Value) -> Option<i64> {
    if let Some(number) = value.as_i64() {
        return Some(number);
    }
    let number = value.as_f64()?;
    if !number.is_finite() || number < 0.0 || number > i64::MAX as f64 {
        return None;
    }
    Some(number.floor() as i64)
}

pub fn parse_client_message(raw: &str) -> Result<ClientRequest, InboundError> {
    let envelope =
        parse_envelope(raw).ok_or_else(|| InboundError::new(None, "malformed envelope"))?;
    let reply_to = Some(envelope.message_id.as_str());
    match envelope.message_type {
        MessageType::Cmd => {
            let command = decode_command(&envelope.payload).map_err(|error| InboundError {
                reply_to: reply_to.map(str::to_string),
                error,
            })?;
            Ok(ClientRequest::Cmd {
                message_id: envelope.message_id,
                command,
            })
        }
        MessageType::Ping => Ok(ClientRequest::Ping {
            message_id: envelope.message_id,
            timestamp: envelope.timestamp,
        }),
        MessageType::Resync => Ok(ClientRequest::Resync {
            message_id: envelope.message_id,
        }),
        other => Err(InboundError::new(
            reply_to,
            format!("{} is not accepted from clients", other.as_str()),
        )),
    }
}

pub fn decode_command(payload: &Value) -> Result<Command, CommandError> {
    let object = payload
        .as_object()
        .ok_or_else(|| CommandError::validation("cmd payload must be an object"))?;
    let action = object
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::validation("missing action"))?;
    let empty = Map::new();
    let params = match object.get("params").or_else(|| object.get("parameters")) {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(params)) => params,
        Some(_) => return Err(CommandError::validation("params must be an object")),
    };

    match action {
        "placeTile" => {
            let raw = str_param(params, "tileType")?;
            let tile_type = TileType::parse(raw)
                .ok_or_else(|| CommandError::validation(format!("unknown tile type {raw}")))?;
            Ok(Command::PlaceTile {
                x: int_param(params, "x")?,
                y: int_param(params, "y")?,
                tile_type,
            })
        }
        "moveUnit" => Ok(Command::MoveUnit {
            unit_id: str_param(params, "unitId")?.to_string(),
            x: int_param(params, "x")?,
            y: int_param(params, "y")?,
        }),
        "trainUnit" => {
            let raw = str_param(params, "unitType")?;
            let unit_type = UnitType::parse(raw)
                .ok_or_else(|| CommandError::validation(format!("unknown unit type {raw}")))?;
            Ok(Command::TrainUnit {
                unit_type,
                x: int_param(params, "x")?,
                y: int_param(params, "y")?,
            })
        }
        "placeWorker" => Ok(Command::PlaceWorker {
            x: int_param(params, "x")?,
            y: int_param(params, "y")?,
            worker_id: optional_str_param(params, "workerId")?,
        }),
        "recallWorker" => Ok(Command::RecallWorker {
            worker_id: str_param(params, "workerId")?.to_string(),
        }),
        "raid" => Ok(Command::Raid {
            unit_id: str_param(params, "unitId")?.to_string(),
            x: int_param(params, "x")?,
            y: int_param(params, "y")?,
        }),
        "advanceTech" => Ok(Command::AdvanceTech),
        other => Err(CommandError::validation(format!("unknown action {other}"))),
    }
}

fn int_param(params: &Map<String, Value>, key: &str) -> Result<i32, CommandError> {
    let value = params
        .get(key)
        .ok_or_else(|| CommandError::validation(format!("missing {key}")))?;
    value
        .as_i64()
        .and_then(|number| i32::try_from(number).ok())
        .ok_or_else(|| CommandError::validation(format!("{key} must be an integer")))
}

fn str_param<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a str, CommandError> {
    params
        .get(key)
        .ok_or_else(|| CommandError::validation(format!("missing {key}")))?
        .as_str()
        .ok_or_else(|| CommandError::validation(format!("{key} must be a string")))
}

fn optional_str_param(
    params: &Map<String, Value>,
    key: &str,
) -> Result<Option<String>, CommandError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(CommandError::validation(format!("{key} must be a string"))),
    }
}

pub fn command_payload(command: &Command) -> Value {
    let params = match command {
        Command::PlaceTile { x, y, tile_type } => {
            json!({ "x": x, "y": y, "tileType": tile_type.as_str() })
        }
        Command::MoveUnit { unit_id, x, y } => json!({ "unitId": unit_id, "x": x, "y": y }),
        Command::TrainUnit { unit_type, x, y } => {
            json!({ "unitType": unit_type.as_str(), "x": x, "y": y })
        }
        Command::PlaceWorker { x, y, worker_id } => {
            json!({ "x": x, "y": y, "workerId": worker_id })
        }
        Command::RecallWorker { worker_id } => json!({ "workerId": worker_id }),
        Command::Raid { unit_id, x, y } => json!({ "unitId": unit_id, "x": x, "y": y }),
        Command::AdvanceTech => json!({}),
    };
    json!({ "action": command.action_name(), "params": params })
}

pub fn cmd_message(command: &Command) -> Envelope {
    Envelope::new(MessageType::Cmd, command_payload(command)).requiring_ack()
}

pub fn ping_message() -> Envelope {
    Envelope::new(MessageType::Ping, Value::Null)
}

pub fn resync_message() -> Envelope {
    Envelope::new(MessageType::Resync, Value::Null).with_priority(Priority::High)
}

pub fn state_message(sequence_number: u64, state: &StatePayload) -> Envelope {
    Envelope::new(
        MessageType::State,
        json!({
            "tick": state.tick(),
            "state": state,
        }),
    )
    .with_sequence(sequence_number)
}

pub fn action_message(player_id: &str, action: &str, text: &str) -> Envelope {
    Envelope::new(
        MessageType::Action,
        json!({
            "playerId": player_id,
            "action": action,
            "text": text,
        }),
    )
    .with_priority(Priority::Low)
}

pub fn error_message(error: &CommandError, reply_to: Option<&str>) -> Envelope {
    Envelope::new(
        MessageType::Error,
        json!({
            "code": error.code(),
            "message": error.to_string(),
            "replyTo": reply_to,
        }),
    )
    .with_priority(Priority::High)
}

pub fn pong_message(reply_to: &str, client_timestamp: i64) -> Envelope {
    Envelope::new(
        MessageType::Pong,
        json!({
            "replyTo": reply_to,
            "clientTimestamp": client_timestamp,
        }),
    )
}

pub fn cmd_ack_message(reply_to: &str, tick: u64) -> Envelope {
    Envelope::new(
        MessageType::CmdAck,
        json!({
            "replyTo": reply_to,
            "tick": tick,
        }),
    )
}

fn make_message_id() -> String {
    let seq = NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed);
    format!("msg_{seq}")
}
