use std::collections::VecDeque;

use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use super::prediction::{apply_diff, PredictedWorld};
use crate::constants::{RECONCILE_HISTORY_LEN, SNAP_THRESHOLD_CELLS, TICK_SECONDS};
use crate::engine::Command;
use crate::types::{Snapshot, StatePayload, UnitView};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconcilerOptions {
    pub history_len: usize,
    pub snap_threshold: f32,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            history_len: RECONCILE_HISTORY_LEN,
            snap_threshold: SNAP_THRESHOLD_CELLS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ResyncRequired {
    #[error("state for tick {tick} is older than the retained window (oldest {oldest})")]
    OutsideWindow { tick: u64, oldest: u64 },
    #[error("diff built on tick {base_tick} but local authoritative state is at {local:?}")]
    BaselineMismatch { base_tick: u64, local: Option<u64> },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub tick: u64,
    pub stale: bool,
    pub mispredicted: bool,
    pub snapped: usize,
    pub nudged: usize,
    pub replayed: usize,
}

#[derive(Clone, Debug)]
struct PendingCommand {
    message_id: String,
    issued_tick: u64,
    command: Command,
}

/// Client-side prediction with rollback against authoritative state.
pub struct Reconciler {
    options: ReconcilerOptions,
    player_id: String,
    authoritative: Option<Snapshot>,
    predicted: PredictedWorld,
    history: VecDeque<PredictedWorld>,
    pending: Vec<PendingCommand>,
    publisher: watch::Sender<PredictedWorld>,
}

impl Reconciler {
    pub fn new(player_id: &str, options: ReconcilerOptions) -> Self {
        let predicted = PredictedWorld::empty(player_id);
        let (publisher, _) = watch::channel(predicted.clone());
        Self {
            options,
            player_id: player_id.to_string(),
            authoritative: None,
            predicted,
            history: VecDeque::new(),
            pending: Vec::new(),
            publisher,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PredictedWorld> {
        self.publisher.subscribe()
    }

    pub fn predicted(&self) -> &PredictedWorld {
        &self.predicted
    }

    pub fn authoritative(&self) -> Option<&Snapshot> {
        self.authoritative.as_ref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn issue(&mut self, message_id: &str, command: Command) {
        self.predicted.apply_command(&command);
        self.pending.push(PendingCommand {
            message_id: message_id.to_string(),
            issued_tick: self.predicted.tick,
            command,
        });
        self.publish();
    }

    pub fn advance(&mut self) {
        self.predicted.advance();
        self.history.push_back(self.predicted.clone());
        while self.history.len() > self.options.history_len {
            self.history.pop_front();
        }
        self.publish();
    }

    pub fn acknowledge(&mut self, message_id: &str) -> bool {
        let before = self.pending.len();
        self.pending
            .retain(|pending| pending.message_id != message_id);
        self.pending.len() != before
    }

    pub fn reject(&mut self, message_id: &str) -> bool {
        if !self.acknowledge(message_id) {
            return false;
        }
        if self.authoritative.is_some() {
            let target = self.predicted.tick;
            let corrected = self.resimulate(target);
            self.predicted = corrected;
            self.history.clear();
            self.history.push_back(self.predicted.clone());
        }
        self.publish();
        true
    }

    pub fn on_state(&mut self, payload: StatePayload) -> Result<ReconcileReport, ResyncRequired> {
        let tick = payload.tick();
        let local_tick = self.predicted.tick;
        let window = self.options.history_len as u64;
        let outside_window = self.authoritative.is_some() && tick + window < local_tick;
        let applied_tick = self.authoritative.as_ref().map(|snapshot| snapshot.tick);

        match payload {
            StatePayload::Full { snapshot } => {
                if applied_tick.is_some_and(|applied| snapshot.tick < applied) {
                    return Ok(stale(tick));
                }
                self.authoritative = Some(snapshot);
            }
            StatePayload::Diff { diff } => {
                let Some(current) = self.authoritative.as_mut() else {
                    return Err(ResyncRequired::BaselineMismatch {
                        base_tick: diff.base_tick,
                        local: None,
                    });
                };
                if diff.tick <= current.tick {
                    return Ok(stale(tick));
                }
                if outside_window {
                    return Err(ResyncRequired::OutsideWindow {
                        tick,
                        oldest: local_tick - window,
                    });
                }
                if diff.base_tick != current.tick {
                    return Err(ResyncRequired::BaselineMismatch {
                        base_tick: diff.base_tick,
                        local: Some(current.tick),
                    });
                }
                apply_diff(current, &diff);
            }
        }

        let mispredicted = self.history_disagrees(tick);
        let target = if outside_window {
            tick
        } else {
            local_tick.max(tick)
        };
        let corrected = self.resimulate(target);
        let replayed = self.pending.len();

        let mut report = ReconcileReport {
            tick,
            mispredicted,
            replayed,
            ..ReconcileReport::default()
        };
        if outside_window {
            debug!(tick, local_tick, "full state outside window; resetting prediction");
            report.snapped = corrected.units.len();
            self.predicted = corrected;
        } else {
            let (snapped, nudged) = self.blend(corrected);
            report.snapped = snapped;
            report.nudged = nudged;
        }
        if mispredicted {
            debug!(
                tick,
                snapped = report.snapped,
                nudged = report.nudged,
                "prediction diverged from server"
            );
        }

        self.history.clear();
        self.history.push_back(self.predicted.clone());
        self.publish();
        Ok(report)
    }

    fn history_disagrees(&self, tick: u64) -> bool {
        let Some(authoritative) = self.authoritative.as_ref() else {
            return false;
        };
        let Some(guess) = self.history.iter().find(|world| world.tick == tick) else {
            return false;
        };
        authoritative.units.iter().any(|unit| {
            guess
                .units
                .get(&unit.id)
                .map(|guessed| distance(guessed, unit) > f32::EPSILON)
                .unwrap_or(true)
        })
    }

    fn resimulate(&self, target: u64) -> PredictedWorld {
        let mut world = match self.authoritative.as_ref() {
            Some(snapshot) => PredictedWorld::from_snapshot(snapshot, &self.player_id),
            None => PredictedWorld::empty(&self.player_id),
        };
        let mut replay = self.pending.iter().peekable();
        loop {
            while let Some(pending) = replay.next_if(|pending| pending.issued_tick <= world.tick) {
                world.apply_command(&pending.command);
            }
            if world.tick >= target {
                break;
            }
            world.advance();
        }
        for pending in replay {
            world.apply_command(&pending.command);
        }
        world
    }

    fn blend(&mut self, mut corrected: PredictedWorld) -> (usize, usize) {
        let mut snapped = 0;
        let mut nudged = 0;
        for (id, target) in corrected.units.iter_mut() {
            let Some(current) = self.predicted.units.get(id) else {
                continue;
            };
            let error = distance(current, target);
            if error <= f32::EPSILON {
                continue;
            }
            if error > self.options.snap_threshold {
                snapped += 1;
                continue;
            }
            let max_step = target.speed.max(current.speed) * TICK_SECONDS;
            let step = error.min(max_step);
            target.x = current.x + (target.x - current.x) * step / error;
            target.y = current.y + (target.y - current.y) * step / error;
            nudged += 1;
        }
        self.predicted = corrected;
        (snapped, nudged)
    }

    fn publish(&self) {
        self.publisher.send_replace(self.predicted.clone());
    }
}

fn stale(tick: u64) -> ReconcileReport {
    ReconcileReport {
        tick,
        stale: true,
        ..ReconcileReport::default()
    }
}

fn distance(a: &UnitView, b: &UnitView) -> f32 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}
