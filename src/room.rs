use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::RuleSet;
use crate::constants::{COMMAND_REPLY_CACHE_LEN, FULL_SNAPSHOT_INTERVAL_TICKS, TICK_MS};
use crate::engine::{Command, GameEngine};
use crate::error::CommandError;
use crate::protocol::{self, ClientRequest, Envelope};
use crate::rate_limiter::{RateLimiter, RateLimiterOptions};
use crate::types::{StartPlayer, StatePayload};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_REPLACED: u16 = 4000;
pub const CLOSE_REJECTED: u16 = 4001;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomPhase {
    Lobby,
    Countdown { starts_at: u64 },
    Running,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoomInfo {
    pub phase: RoomPhase,
    pub seated: usize,
    pub connected: usize,
    pub seats_freed: usize,
}

#[derive(Debug)]
pub enum RoomMessage {
    Join {
        player_id: String,
        name: String,
        connection_id: u64,
        tx: mpsc::Sender<OutboundMessage>,
    },
    Leave {
        player_id: String,
        connection_id: u64,
    },
    Request {
        player_id: String,
        connection_id: u64,
        request: ClientRequest,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomStatus {
    Open,
    Closed,
}

struct Connection {
    id: u64,
    tx: mpsc::Sender<OutboundMessage>,
}

struct Seat {
    player_id: String,
    name: String,
    connection: Option<Connection>,
}

#[derive(Default)]
struct ReplyCache {
    order: VecDeque<String>,
    replies: HashMap<String, Envelope>,
}

impl ReplyCache {
    fn get(&self, message_id: &str) -> Option<&Envelope> {
        self.replies.get(message_id)
    }

    fn insert(&mut self, message_id: &str, reply: Envelope) {
        if self.replies.insert(message_id.to_string(), reply).is_none() {
            self.order.push_back(message_id.to_string());
        }
        while self.order.len() > COMMAND_REPLY_CACHE_LEN {
            if let Some(oldest) = self.order.pop_front() {
                self.replies.remove(&oldest);
            }
        }
    }
}

/// One match. All mutation happens on the task that owns it, between ticks.
pub struct Room {
    id: String,
    rules: RuleSet,
    seed: u64,
    phase: RoomPhase,
    clock: u64,
    seats: Vec<Seat>,
    engine: Option<GameEngine>,
    rate_limiter: RateLimiter,
    replies: HashMap<String, ReplyCache>,
    sequence: u64,
    empty_since: Option<u64>,
    seats_freed: usize,
    info_tx: watch::Sender<RoomInfo>,
}

impl Room {
    pub fn new(id: impl Into<String>, rules: RuleSet, seed: u64) -> (Self, watch::Receiver<RoomInfo>) {
        let (info_tx, info_rx) = watch::channel(RoomInfo {
            phase: RoomPhase::Lobby,
            seated: 0,
            connected: 0,
            seats_freed: 0,
        });
        let rate_limiter = RateLimiter::new(RateLimiterOptions::from_rules(&rules));
        let room = Self {
            id: id.into(),
            rules,
            seed,
            phase: RoomPhase::Lobby,
            clock: 0,
            seats: Vec::new(),
            engine: None,
            rate_limiter,
            replies: HashMap::new(),
            sequence: 0,
            empty_since: None,
            seats_freed: 0,
            info_tx,
        };
        (room, info_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    pub fn engine(&self) -> Option<&GameEngine> {
        self.engine.as_ref()
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Fixed-rate loop. A late tick still counts as exactly one logical tick.
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<RoomMessage>) {
        info!(room_id = %self.id, "room created");
        let mut interval = tokio::time::interval(Duration::from_millis(TICK_MS));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let mut inbox_closed = false;
            loop {
                match inbox.try_recv() {
                    Ok(message) => self.handle_message(message),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        inbox_closed = true;
                        break;
                    }
                }
            }
            if inbox_closed || self.tick() == RoomStatus::Closed {
                break;
            }
        }

        inbox.close();
        self.phase = RoomPhase::Finished;
        self.publish_info();
        info!(room_id = %self.id, ticks = self.clock, "room torn down");
    }

    pub fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                player_id,
                name,
                connection_id,
                tx,
            } => self.join(
                player_id,
                name,
                Connection {
                    id: connection_id,
                    tx,
                },
            ),
            RoomMessage::Leave {
                player_id,
                connection_id,
            } => {
                if self.is_current_connection(&player_id, connection_id) {
                    self.detach_player(&player_id);
                }
            }
            RoomMessage::Request {
                player_id,
                connection_id,
                request,
            } => {
                if self.is_current_connection(&player_id, connection_id) {
                    self.handle_request(&player_id, request);
                } else {
                    debug!(room_id = %self.id, player_id, "request from stale connection ignored");
                }
            }
        }
        self.publish_info();
    }

    pub fn tick(&mut self) -> RoomStatus {
        self.clock += 1;
        match self.phase {
            RoomPhase::Lobby => {
                if self.connected_count() >= self.rules.min_players {
                    let starts_at = self.clock + self.rules.start_countdown_ticks;
                    self.phase = RoomPhase::Countdown { starts_at };
                    info!(room_id = %self.id, starts_at, "countdown started");
                    let notice = protocol::action_message(
                        "server",
                        "countdown",
                        &format!(
                            "game starts in {} ticks",
                            self.rules.start_countdown_ticks
                        ),
                    );
                    self.broadcast(&notice, QueuePolicy::DropOnFull, None);
                }
            }
            RoomPhase::Countdown { starts_at } => {
                if self.connected_count() < self.rules.min_players {
                    self.phase = RoomPhase::Lobby;
                    info!(room_id = %self.id, "countdown cancelled");
                } else if self.clock >= starts_at {
                    self.start_game();
                }
            }
            RoomPhase::Running => self.run_game_tick(),
            RoomPhase::Finished => return RoomStatus::Closed,
        }

        let status = if self.phase == RoomPhase::Finished {
            RoomStatus::Closed
        } else {
            self.check_empty()
        };
        self.publish_info();
        status
    }

    fn join(&mut self, player_id: String, name: String, connection: Connection) {
        if let Some(index) = self.seat_index(&player_id) {
            if let Some(previous) = self.seats[index].connection.replace(connection) {
                let _ = previous.tx.try_send(OutboundMessage::Close {
                    code: CLOSE_REPLACED,
                    reason: "replaced by a new connection".to_string(),
                });
            }
            if let Some(engine) = self.engine.as_mut() {
                engine.set_player_connected(&player_id, true);
            }
            info!(room_id = %self.id, player_id, "player reconnected");
            self.send_full_state(&player_id);
            return;
        }

        let accepting = matches!(self.phase, RoomPhase::Lobby | RoomPhase::Countdown { .. });
        if !accepting || self.seats.len() >= self.rules.max_players {
            let reason = if accepting {
                "room is full"
            } else {
                "game already started"
            };
            let error = CommandError::rule(reason);
            let _ = connection.tx.try_send(OutboundMessage::Text(
                protocol::error_message(&error, None).to_text(),
            ));
            let _ = connection.tx.try_send(OutboundMessage::Close {
                code: CLOSE_REJECTED,
                reason: reason.to_string(),
            });
            info!(room_id = %self.id, player_id, reason, "join rejected");
            return;
        }

        let notice = protocol::action_message(&player_id, "join", &format!("{name} joined"));
        self.seats.push(Seat {
            player_id: player_id.clone(),
            name,
            connection: Some(connection),
        });
        info!(room_id = %self.id, player_id, seated = self.seats.len(), "player joined");
        self.broadcast(&notice, QueuePolicy::DropOnFull, Some(&player_id));
    }

    fn detach_player(&mut self, player_id: &str) {
        let Some(index) = self.seat_index(player_id) else {
            return;
        };
        self.seats[index].connection = None;
        match self.phase {
            RoomPhase::Lobby | RoomPhase::Countdown { .. } => {
                self.seats.remove(index);
                self.replies.remove(player_id);
                self.seats_freed += 1;
            }
            RoomPhase::Running | RoomPhase::Finished => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.set_player_connected(player_id, false);
                }
            }
        }
        info!(room_id = %self.id, player_id, "player left");
    }

    fn handle_request(&mut self, player_id: &str, request: ClientRequest) {
        match request {
            ClientRequest::Ping {
                message_id,
                timestamp,
            } => {
                let pong = protocol::pong_message(&message_id, timestamp);
                self.send_to(player_id, &pong, QueuePolicy::DisconnectOnFull);
            }
            ClientRequest::Resync { .. } => {
                debug!(room_id = %self.id, player_id, "resync served");
                self.send_full_state(player_id);
            }
            ClientRequest::Cmd {
                message_id,
                command,
            } => self.handle_command(player_id, &message_id, &command),
        }
    }

    fn handle_command(&mut self, player_id: &str, message_id: &str, command: &Command) {
        let cached = self
            .replies
            .get(player_id)
            .and_then(|cache| cache.get(message_id))
            .cloned();
        if let Some(reply) = cached {
            debug!(room_id = %self.id, player_id, message_id, "duplicate command answered from cache");
            self.send_to(player_id, &reply, QueuePolicy::DisconnectOnFull);
            return;
        }

        match self.execute(player_id, command) {
            Ok((tick, summary)) => {
                let ack = protocol::cmd_ack_message(message_id, tick);
                self.remember_reply(player_id, message_id, &ack);
                self.send_to(player_id, &ack, QueuePolicy::DisconnectOnFull);
                let notice = protocol::action_message(player_id, command.action_name(), &summary);
                self.broadcast(&notice, QueuePolicy::DropOnFull, Some(player_id));
            }
            Err(error) => {
                debug!(
                    room_id = %self.id,
                    player_id,
                    action = command.action_name(),
                    code = error.code(),
                    %error,
                    "command rejected"
                );
                let reply = protocol::error_message(&error, Some(message_id));
                self.remember_reply(player_id, message_id, &reply);
                self.send_to(player_id, &reply, QueuePolicy::DisconnectOnFull);
            }
        }
    }

    fn remember_reply(&mut self, player_id: &str, message_id: &str, reply: &Envelope) {
        self.replies
            .entry(player_id.to_string())
            .or_default()
            .insert(message_id, reply.clone());
    }

    fn execute(&mut self, player_id: &str, command: &Command) -> Result<(u64, String), CommandError> {
        let Some(engine) = self.engine.as_mut() else {
            return Err(CommandError::rule("the game has not started"));
        };
        self.rate_limiter.check(player_id, engine.tick())?;
        let delta = engine.apply_command(player_id, command)?;
        Ok((engine.tick(), delta.summary))
    }

    fn start_game(&mut self) {
        let players: Vec<StartPlayer> = self
            .seats
            .iter()
            .map(|seat| StartPlayer {
                id: seat.player_id.clone(),
                name: seat.name.clone(),
                connected: seat.connection.is_some(),
            })
            .collect();
        self.engine = Some(GameEngine::new(players, self.rules.clone(), self.seed));
        self.phase = RoomPhase::Running;
        info!(room_id = %self.id, players = self.seats.len(), seed = self.seed, "room started");
        self.broadcast_state(true);
    }

    fn run_game_tick(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        engine.step();
        let full = engine.tick() % FULL_SNAPSHOT_INTERVAL_TICKS == 0;
        self.rate_limiter.prune(engine.tick());
        self.broadcast_state(full);

        let ended = self
            .engine
            .as_ref()
            .map(GameEngine::is_ended)
            .unwrap_or(false);
        if ended {
            self.finish();
        }
    }

    fn broadcast_state(&mut self, full: bool) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let payload = engine.build_state_payload(full);
        self.sequence += 1;
        let envelope = protocol::state_message(self.sequence, &payload);
        self.broadcast(&envelope, QueuePolicy::DropOnFull, None);
    }

    /// Sends a full snapshot outside the broadcast stream. The diff baseline is untouched.
    fn send_full_state(&mut self, player_id: &str) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let payload = StatePayload::Full {
            snapshot: engine.build_snapshot(false),
        };
        let envelope = protocol::state_message(self.sequence, &payload);
        self.send_to(player_id, &envelope, QueuePolicy::DisconnectOnFull);
    }

    fn finish(&mut self) {
        let winner = self
            .engine
            .as_ref()
            .and_then(|engine| engine.winner().map(str::to_string));
        info!(
            room_id = %self.id,
            winner = winner.as_deref().unwrap_or("draw"),
            "game over"
        );
        for seat in &mut self.seats {
            if let Some(connection) = seat.connection.take() {
                let _ = connection.tx.try_send(OutboundMessage::Close {
                    code: CLOSE_NORMAL,
                    reason: "game over".to_string(),
                });
            }
        }
        self.phase = RoomPhase::Finished;
    }

    fn check_empty(&mut self) -> RoomStatus {
        if self.connected_count() > 0 {
            self.empty_since = None;
            return RoomStatus::Open;
        }
        let since = *self.empty_since.get_or_insert(self.clock);
        if self.clock - since >= self.rules.empty_room_grace_ticks {
            info!(room_id = %self.id, "room empty past grace period");
            self.phase = RoomPhase::Finished;
            return RoomStatus::Closed;
        }
        RoomStatus::Open
    }

    fn send_to(&mut self, player_id: &str, envelope: &Envelope, policy: QueuePolicy) {
        let failed = match self
            .seat_index(player_id)
            .and_then(|index| self.seats[index].connection.as_ref())
        {
            Some(connection) => connection
                .tx
                .try_send(OutboundMessage::Text(envelope.to_text()))
                .is_err(),
            None => false,
        };
        if failed {
            self.on_send_failure(player_id, envelope, policy);
        }
    }

    fn broadcast(&mut self, envelope: &Envelope, policy: QueuePolicy, except: Option<&str>) {
        let text = envelope.to_text();
        let mut failed = Vec::new();
        for seat in &self.seats {
            if except == Some(seat.player_id.as_str()) {
                continue;
            }
            let Some(connection) = seat.connection.as_ref() else {
                continue;
            };
            if connection
                .tx
                .try_send(OutboundMessage::Text(text.clone()))
                .is_err()
            {
                failed.push(seat.player_id.clone());
            }
        }
        for player_id in failed {
            self.on_send_failure(&player_id, envelope, policy);
        }
    }

    fn on_send_failure(&mut self, player_id: &str, envelope: &Envelope, policy: QueuePolicy) {
        match policy {
            QueuePolicy::DropOnFull => warn!(
                room_id = %self.id,
                player_id,
                message_type = envelope.message_type.as_str(),
                "outbound queue full, message dropped"
            ),
            QueuePolicy::DisconnectOnFull => {
                warn!(room_id = %self.id, player_id, "outbound queue full, disconnecting");
                self.detach_player(player_id);
            }
        }
    }

    fn seat_index(&self, player_id: &str) -> Option<usize> {
        self.seats
            .iter()
            .position(|seat| seat.player_id == player_id)
    }

    fn is_current_connection(&self, player_id: &str, connection_id: u64) -> bool {
        self.seat_index(player_id)
            .and_then(|index| self.seats[index].connection.as_ref())
            .map(|connection| connection.id == connection_id)
            .unwrap_or(false)
    }

    fn connected_count(&self) -> usize {
        self.seats
            .iter()
            .filter(|seat| seat.connection.is_some())
            .count()
    }

    fn publish_info(&self) {
        let next = RoomInfo {
            phase: self.phase,
            seated: self.seats.len(),
            connected: self.connected_count(),
            seats_freed: self.seats_freed,
        };
        self.info_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub room_id: String,
    pub player_id: String,
}

struct RoomHandle {
    inbox: mpsc::UnboundedSender<RoomMessage>,
    info: watch::Receiver<RoomInfo>,
    assigned: usize,
}

#[derive(Clone)]
pub struct RoomRegistry {
    rules: RuleSet,
    rooms: Arc<Mutex<HashMap<String, RoomHandle>>>,
}

impl RoomRegistry {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn assign(&self) -> Assignment {
        let mut rooms = self.rooms.lock().await;
        rooms.retain(|_, handle| !handle.inbox.is_closed());

        let max_players = self.rules.max_players;
        let joinable = rooms
            .iter()
            .filter(|(_, handle)| {
                let info = *handle.info.borrow();
                info.phase == RoomPhase::Lobby
                    && handle.assigned.saturating_sub(info.seats_freed) < max_players
            })
            .map(|(room_id, _)| room_id.clone())
            .min();
        let room_id = match joinable {
            Some(room_id) => room_id,
            None => {
                let room_id = make_id("room");
                let handle = self.spawn_room(&room_id);
                rooms.insert(room_id.clone(), handle);
                room_id
            }
        };
        if let Some(handle) = rooms.get_mut(&room_id) {
            handle.assigned += 1;
        }
        let player_id = make_id("player");
        info!(room_id, player_id, "seat assigned");
        Assignment { room_id, player_id }
    }

    pub async fn inbox(&self, room_id: &str) -> Option<mpsc::UnboundedSender<RoomMessage>> {
        let mut rooms = self.rooms.lock().await;
        let closed = rooms.get(room_id)?.inbox.is_closed();
        if closed {
            rooms.remove(room_id);
            return None;
        }
        rooms.get(room_id).map(|handle| handle.inbox.clone())
    }

    fn spawn_room(&self, room_id: &str) -> RoomHandle {
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let (room, info) = Room::new(room_id, self.rules.clone(), rand::random());
        let registry = self.clone();
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            room.run(inbox_rx).await;
            registry.rooms.lock().await.remove(&room_id);
        });
        RoomHandle {
            inbox,
            info,
            assigned: 0,
        }
    }
}

pub fn next_connection_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}
