use std::collections::BTreeMap;

use super::*;

use crate::types::{
    PlayerView, Snapshot, StateDiff, StatePayload, TileState, TurnView, UnitView, WorkerState,
};

#[derive(Clone, Debug, Default)]
pub(super) struct Baseline {
    tick: u64,
    players: BTreeMap<String, PlayerView>,
    tiles: BTreeMap<Coord, TileState>,
    units: BTreeMap<String, UnitView>,
    workers: BTreeMap<String, WorkerState>,
    turn: Option<TurnView>,
}

impl GameEngine {
    pub fn build_snapshot(&mut self, include_events: bool) -> Snapshot {
        let events = if include_events {
            std::mem::take(&mut self.events)
        } else {
            Vec::new()
        };
        Snapshot {
            tick: self.state.tick,
            width: self.state.width,
            height: self.state.height,
            players: self.state.players.iter().map(|p| p.view.clone()).collect(),
            tiles: self.state.tiles.values().cloned().collect(),
            units: self.state.units.values().map(|u| u.view.clone()).collect(),
            workers: self.state.workers.values().cloned().collect(),
            turn: self.state.turn.clone(),
            winner: self.state.winner.clone(),
            ended: self.state.ended,
            events,
        }
    }

    /// Payload for the next `state` broadcast: a full snapshot when `full` is set or no
    /// baseline exists yet, otherwise only what changed since the previous broadcast.
    pub fn build_state_payload(&mut self, full: bool) -> StatePayload {
        let diff = match (&self.baseline, full) {
            (Some(baseline), false) => Some(self.diff_against(baseline)),
            _ => None,
        };
        let payload = match diff {
            Some(diff) => StatePayload::Diff { diff },
            None => StatePayload::Full {
                snapshot: self.build_snapshot(false),
            },
        };
        let events = std::mem::take(&mut self.events);
        self.baseline = Some(self.capture_baseline());
        match payload {
            StatePayload::Full { mut snapshot } => {
                snapshot.events = events;
                StatePayload::Full { snapshot }
            }
            StatePayload::Diff { mut diff } => {
                diff.events = events;
                StatePayload::Diff { diff }
            }
        }
    }

    fn capture_baseline(&self) -> Baseline {
        Baseline {
            tick: self.state.tick,
            players: self
                .state
                .players
                .iter()
                .map(|p| (p.view.id.clone(), p.view.clone()))
                .collect(),
            tiles: self.state.tiles.clone(),
            units: self
                .state
                .units
                .iter()
                .map(|(id, unit)| (id.clone(), unit.view.clone()))
                .collect(),
            workers: self.state.workers.clone(),
            turn: self.state.turn.clone(),
        }
    }

    fn diff_against(&self, baseline: &Baseline) -> StateDiff {
        StateDiff {
            tick: self.state.tick,
            base_tick: baseline.tick,
            players: self
                .state
                .players
                .iter()
                .filter(|p| baseline.players.get(&p.view.id) != Some(&p.view))
                .map(|p| p.view.clone())
                .collect(),
            tiles: self
                .state
                .tiles
                .iter()
                .filter(|(coord, tile)| baseline.tiles.get(coord) != Some(tile))
                .map(|(_, tile)| tile.clone())
                .collect(),
            units: self
                .state
                .units
                .iter()
                .filter(|(id, unit)| baseline.units.get(*id) != Some(&unit.view))
                .map(|(_, unit)| unit.view.clone())
                .collect(),
            removed_units: baseline
                .units
                .keys()
                .filter(|id| !self.state.units.contains_key(*id))
                .cloned()
                .collect(),
            workers: self
                .state
                .workers
                .iter()
                .filter(|(id, worker)| baseline.workers.get(*id) != Some(worker))
                .map(|(_, worker)| worker.clone())
                .collect(),
            turn: if self.state.turn != baseline.turn {
                self.state.turn.clone()
            } else {
                None
            },
            winner: self.state.winner.clone(),
            ended: self.state.ended,
            events: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{add_unit, bare_state, engine, players};
    use super::*;
    use crate::types::UnitType;

    #[test]
    fn first_payload_is_full_then_diffs_carry_changes_only() {
        let mut engine = GameEngine::new(players(2), RuleSet::default(), 21);
        let first = engine.build_state_payload(false);
        match first {
            StatePayload::Full { snapshot } => {
                assert_eq!(snapshot.players.len(), 2);
                assert!(!snapshot.tiles.is_empty());
                assert!(snapshot
                    .events
                    .iter()
                    .any(|event| matches!(event, GameEvent::TurnChanged { .. })));
            }
            StatePayload::Diff { .. } => panic!("expected a full snapshot first"),
        }

        engine.step();
        match engine.build_state_payload(false) {
            StatePayload::Diff { diff } => {
                assert_eq!(diff.base_tick, 0);
                assert_eq!(diff.tick, 1);
                assert!(diff.tiles.is_empty());
                assert!(diff.units.is_empty());
                assert!(diff.turn.is_none());
                assert!(diff.events.is_empty());
            }
            StatePayload::Full { .. } => panic!("expected a diff"),
        }
    }

    #[test]
    fn purged_units_are_listed_as_removed() {
        let mut state = bare_state(8, 8, 2);
        let unit = add_unit(&mut state, "p1", UnitType::Infantry, Coord::new(1, 1));
        let mut engine = engine(state);
        engine.build_state_payload(true);

        engine.kill_unit(&unit, None);
        match engine.build_state_payload(false) {
            StatePayload::Diff { diff } => {
                assert_eq!(diff.units.len(), 1);
                assert_eq!(diff.units[0].status, UnitStatus::Dead);
            }
            StatePayload::Full { .. } => panic!("expected a diff"),
        }

        for _ in 0..engine.rules.dead_unit_linger_ticks {
            engine.step();
        }
        match engine.build_state_payload(false) {
            StatePayload::Diff { diff } => assert_eq!(diff.removed_units, vec![unit]),
            StatePayload::Full { .. } => panic!("expected a diff"),
        }
    }

    #[test]
    fn snapshot_without_events_keeps_them_pending() {
        let mut engine = GameEngine::new(players(2), RuleSet::default(), 5);
        let pending = engine.pending_events().len();
        assert!(pending > 0);
        let snapshot = engine.build_snapshot(false);
        assert!(snapshot.events.is_empty());
        assert_eq!(engine.pending_events().len(), pending);
    }
}
