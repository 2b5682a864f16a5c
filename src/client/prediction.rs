use std::collections::{BTreeMap, HashSet};

use crate::constants::{tech_advance_cost, tile_stats, unit_stats, TICK_SECONDS};
use crate::engine::pathfinding::{self, Terrain};
use crate::engine::{walk_path, Command};
use crate::types::{
    Coord, PlayerId, Resources, Snapshot, StateDiff, TechLevel, UnitStatus, UnitView,
};

#[derive(Clone, Debug, PartialEq)]
pub struct PredictedWorld {
    pub tick: u64,
    pub player_id: PlayerId,
    pub width: i32,
    pub height: i32,
    pub units: BTreeMap<String, UnitView>,
    pub resources: Option<Resources>,
    pub tech_level: TechLevel,
    weights: BTreeMap<Coord, u32>,
}

impl Terrain for PredictedWorld {
    fn in_bounds(&self, cell: Coord) -> bool {
        cell.x >= 0 && cell.y >= 0 && cell.x < self.width && cell.y < self.height
    }

    fn terrain_cost(&self, cell: Coord) -> u32 {
        self.weights.get(&cell).copied().unwrap_or(1)
    }
}

impl PredictedWorld {
    pub fn empty(player_id: &str) -> Self {
        Self {
            tick: 0,
            player_id: player_id.to_string(),
            width: 0,
            height: 0,
            units: BTreeMap::new(),
            resources: None,
            tech_level: TechLevel::Manor,
            weights: BTreeMap::new(),
        }
    }

    pub fn from_snapshot(snapshot: &Snapshot, player_id: &str) -> Self {
        let me = snapshot.players.iter().find(|player| player.id == player_id);
        Self {
            tick: snapshot.tick,
            player_id: player_id.to_string(),
            width: snapshot.width,
            height: snapshot.height,
            units: snapshot
                .units
                .iter()
                .map(|unit| (unit.id.clone(), unit.clone()))
                .collect(),
            resources: me.map(|player| player.resources),
            tech_level: me
                .map(|player| player.tech_level)
                .unwrap_or(TechLevel::Manor),
            weights: snapshot
                .tiles
                .iter()
                .filter_map(|tile| {
                    let cost = tile_stats(tile.tile_type).terrain_cost;
                    (cost != 1).then(|| (tile.coord(), cost))
                })
                .collect(),
        }
    }

    pub fn apply_command(&mut self, command: &Command) -> bool {
        match command {
            Command::MoveUnit { unit_id, x, y } => self.predict_move(unit_id, Coord::new(*x, *y)),
            Command::TrainUnit { unit_type, .. } => {
                let cost = unit_stats(*unit_type).cost;
                self.resources
                    .as_mut()
                    .map(|resources| resources.try_spend(cost))
                    .unwrap_or(false)
            }
            Command::AdvanceTech => {
                let Some(next) = self.tech_level.next() else {
                    return false;
                };
                let Some(cost) = tech_advance_cost(next) else {
                    return false;
                };
                let spent = self
                    .resources
                    .as_mut()
                    .map(|resources| resources.try_spend(cost))
                    .unwrap_or(false);
                if spent {
                    self.tech_level = next;
                }
                spent
            }
            Command::PlaceTile { .. }
            | Command::PlaceWorker { .. }
            | Command::RecallWorker { .. }
            | Command::Raid { .. } => false,
        }
    }

    fn predict_move(&mut self, unit_id: &str, goal: Coord) -> bool {
        let Some(unit) = self.units.get(unit_id) else {
            return false;
        };
        if unit.owner != self.player_id || !unit.is_alive() {
            return false;
        }
        let blocked: HashSet<Coord> = self
            .units
            .values()
            .filter(|other| other.is_alive() && other.id != unit_id)
            .map(UnitView::cell)
            .collect();
        let path = pathfinding::find_path(&*self, unit.cell(), goal, &blocked);
        let Some(unit) = self.units.get_mut(unit_id) else {
            return false;
        };
        match path {
            Some(path) => {
                unit.status = if path.is_empty() {
                    UnitStatus::Idle
                } else {
                    UnitStatus::Moving
                };
                unit.path = path;
            }
            None => {
                unit.path.clear();
                unit.status = UnitStatus::Idle;
            }
        }
        true
    }

    pub fn advance(&mut self) {
        self.tick += 1;
        let ids: Vec<String> = self
            .units
            .values()
            .filter(|unit| unit.is_alive() && !unit.path.is_empty())
            .map(|unit| unit.id.clone())
            .collect();
        for id in ids {
            let Some(unit) = self.units.get(&id) else {
                continue;
            };
            let mut path = unit.path.clone();
            let budget = unit.speed * TICK_SECONDS;
            let (x, y) = walk_path(&*self, (unit.x, unit.y), &mut path, budget);
            let Some(unit) = self.units.get_mut(&id) else {
                continue;
            };
            unit.x = x;
            unit.y = y;
            unit.path = path;
            if unit.path.is_empty() {
                let cell = unit.cell();
                unit.x = cell.x as f32;
                unit.y = cell.y as f32;
                unit.status = UnitStatus::Idle;
            }
        }
    }
}

pub fn apply_diff(snapshot: &mut Snapshot, diff: &StateDiff) {
    snapshot.tick = diff.tick;
    for player in &diff.players {
        match snapshot.players.iter_mut().find(|p| p.id == player.id) {
            Some(existing) => *existing = player.clone(),
            None => snapshot.players.push(player.clone()),
        }
    }
    for tile in &diff.tiles {
        match snapshot
            .tiles
            .iter_mut()
            .find(|t| t.x == tile.x && t.y == tile.y)
        {
            Some(existing) => *existing = tile.clone(),
            None => snapshot.tiles.push(tile.clone()),
        }
    }
    snapshot
        .units
        .retain(|unit| !diff.removed_units.contains(&unit.id));
    for unit in &diff.units {
        match snapshot.units.iter_mut().find(|u| u.id == unit.id) {
            Some(existing) => *existing = unit.clone(),
            None => snapshot.units.push(unit.clone()),
        }
    }
    for worker in &diff.workers {
        match snapshot.workers.iter_mut().find(|w| w.id == worker.id) {
            Some(existing) => *existing = worker.clone(),
            None => snapshot.workers.push(worker.clone()),
        }
    }
    if diff.turn.is_some() {
        snapshot.turn = diff.turn.clone();
    }
    if diff.ended {
        snapshot.turn = None;
    }
    snapshot.winner = diff.winner.clone();
    snapshot.ended = diff.ended;
    snapshot.events = diff.events.clone();
}
