use std::collections::{BTreeSet, HashSet, VecDeque};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::config::RuleSet;
use crate::constants::SPATIAL_BUCKET_SIZE;
use crate::types::{Coord, GameEvent, PlayerId, StartPlayer, UnitStatus, WorkerStatus};
use crate::world::{generate_world, GameState};

mod combat_system;
mod command_system;
mod conquest_system;
mod movement_system;
pub mod pathfinding;
mod resource_system;
mod snapshot;
pub mod spatial_index;
mod training_system;
mod turn_system;
mod utils;

pub use self::command_system::{Command, StateDelta};
pub use self::movement_system::walk_path;
pub use self::resource_system::{component_yield, connected_components, Component};
pub use self::spatial_index::SpatialIndex;

#[derive(Clone, Debug)]
pub struct GameEngine {
    pub rules: RuleSet,
    state: GameState,
    spatial: SpatialIndex,
    rng: StdRng,
    events: Vec<GameEvent>,
    dirty_cells: BTreeSet<Coord>,
    baseline: Option<snapshot::Baseline>,
}

impl GameEngine {
    pub fn new(start_players: Vec<StartPlayer>, rules: RuleSet, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let state = generate_world(&start_players, &rules, &mut rng);
        let mut engine = Self::assemble(state, rules, rng);
        engine.start_turns();
        info!(
            players = start_players.len(),
            seed, "game engine started"
        );
        engine
    }

    pub fn from_state(state: GameState, rules: RuleSet, seed: u64) -> Self {
        Self::assemble(state, rules, StdRng::seed_from_u64(seed))
    }

    fn assemble(state: GameState, rules: RuleSet, rng: StdRng) -> Self {
        let mut spatial = SpatialIndex::new(SPATIAL_BUCKET_SIZE);
        for unit in state.units.values().filter(|unit| unit.view.is_alive()) {
            spatial.insert(&unit.view.id, unit.view.cell());
        }
        Self {
            rules,
            state,
            spatial,
            rng,
            events: Vec::new(),
            dirty_cells: BTreeSet::new(),
            baseline: None,
        }
    }

    pub fn tick(&self) -> u64 {
        self.state.tick
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }

    pub fn is_ended(&self) -> bool {
        self.state.ended
    }

    pub fn winner(&self) -> Option<&str> {
        self.state.winner.as_deref()
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.state.player(player_id).is_some()
    }

    pub fn pending_events(&self) -> &[GameEvent] {
        &self.events
    }

    pub fn step(&mut self) {
        if self.state.ended {
            return;
        }
        self.state.tick += 1;

        self.advance_timers();
        self.update_movement();
        self.resolve_combat();
        if self
            .state
            .tick
            .is_multiple_of(self.rules.aggregation_interval_ticks.max(1))
        {
            self.aggregate_resources();
        }
        self.update_turn();
        self.purge_dead_units();
        self.check_victory();
    }

    pub fn set_player_connected(&mut self, player_id: &str, connected: bool) -> bool {
        let Some(player) = self.state.player_mut(player_id) else {
            return false;
        };
        if player.view.connected == connected {
            return true;
        }
        player.view.connected = connected;
        self.events.push(GameEvent::PlayerConnection {
            player_id: player_id.to_string(),
            connected,
        });
        true
    }

    pub fn find_path(&self, start: Coord, goal: Coord, ignore_units: bool) -> Option<Vec<Coord>> {
        let blocked = if ignore_units {
            HashSet::new()
        } else {
            self.occupied_cells(None)
        };
        pathfinding::find_path(&self.state, start, goal, &blocked).map(Vec::from)
    }

    fn occupied_cells(&self, except_unit: Option<&str>) -> HashSet<Coord> {
        self.state
            .units
            .values()
            .filter(|unit| unit.view.is_alive() && Some(unit.view.id.as_str()) != except_unit)
            .map(|unit| unit.view.cell())
            .collect()
    }

    fn plan_path(&self, unit_id: &str, goal: Coord) -> Option<VecDeque<Coord>> {
        let unit = self.state.units.get(unit_id)?;
        let blocked = self.occupied_cells(Some(unit_id));
        let path = pathfinding::find_path(&self.state, unit.view.cell(), goal, &blocked);
        if path.is_none() {
            debug!(unit_id, x = goal.x, y = goal.y, "path not found");
        }
        path
    }

    pub fn check_invariants(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for player in &self.state.players {
            let res = &player.view.resources;
            for (name, value) in [("gold", res.gold), ("food", res.food), ("faith", res.faith)] {
                if value < 0 || value > res.cap {
                    problems.push(format!(
                        "player {} {name}={value} outside 0..={}",
                        player.view.id, res.cap
                    ));
                }
            }
        }

        let living: BTreeSet<String> = self
            .state
            .units
            .values()
            .filter(|unit| unit.view.is_alive())
            .map(|unit| unit.view.id.clone())
            .collect();
        if living != self.spatial.ids() {
            problems.push(format!(
                "spatial index holds {} ids but {} units are alive",
                self.spatial.len(),
                living.len()
            ));
        }
        for unit in self.state.units.values() {
            if unit.view.is_alive() && self.spatial.cell_of(&unit.view.id) != Some(unit.view.cell()) {
                problems.push(format!("unit {} indexed at a stale cell", unit.view.id));
            }
            if !self.state.in_bounds(unit.view.cell()) {
                problems.push(format!("unit {} is off the grid", unit.view.id));
            }
        }

        for worker in self.state.workers.values() {
            match (worker.status, worker.tile) {
                (WorkerStatus::Deployed, Some(tile)) => {
                    if !self.state.is_owned_by(tile, &worker.owner) {
                        problems.push(format!(
                            "worker {} deployed on tile {} not owned by {}",
                            worker.id, tile, worker.owner
                        ));
                    }
                }
                (WorkerStatus::Deployed, None) => {
                    problems.push(format!("worker {} deployed without a tile", worker.id));
                }
                (_, Some(tile)) => {
                    problems.push(format!("worker {} not deployed but holds {}", worker.id, tile));
                }
                _ => {}
            }
        }

        for tile in self.state.tiles.values() {
            if tile.workers.len() > tile.worker_capacity {
                problems.push(format!("tile {} over worker capacity", tile.coord()));
            }
        }
        problems
    }

    fn living_units_of(&self, player_id: &str) -> Vec<String> {
        self.state
            .units
            .values()
            .filter(|unit| unit.view.owner == player_id && unit.view.status != UnitStatus::Dead)
            .map(|unit| unit.view.id.clone())
            .collect()
    }

    fn player_name(&self, player_id: &str) -> String {
        self.state
            .player(player_id)
            .map(|player| player.view.name.clone())
            .unwrap_or_else(|| player_id.to_string())
    }

    fn remaining_players(&self) -> Vec<PlayerId> {
        self.state.active_player_ids()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::RuleSet;
    use crate::constants::{tile_stats, unit_stats};
    use crate::types::{Coord, StartPlayer, TileType, UnitStatus, UnitType, UnitView};
    use crate::world::{GameState, UnitInternal};

    use super::GameEngine;

    pub fn players(count: usize) -> Vec<StartPlayer> {
        (0..count)
            .map(|idx| StartPlayer {
                id: format!("p{}", idx + 1),
                name: format!("P{}", idx + 1),
                connected: true,
            })
            .collect()
    }

    pub fn bare_state(width: i32, height: i32, count: usize) -> GameState {
        let rules = RuleSet::default();
        let mut state = GameState::empty(width, height);
        for start in players(count) {
            state.add_player(&start, &rules);
        }
        state
    }

    pub fn add_unit(state: &mut GameState, owner: &str, unit_type: UnitType, at: Coord) -> String {
        let stats = unit_stats(unit_type);
        let id = state.next_id("unit");
        state.units.insert(
            id.clone(),
            UnitInternal {
                view: UnitView {
                    id: id.clone(),
                    unit_type,
                    owner: owner.to_string(),
                    hp: stats.max_hp,
                    max_hp: stats.max_hp,
                    attack: stats.attack,
                    defense: stats.defense,
                    speed: stats.speed,
                    range: stats.range,
                    x: at.x as f32,
                    y: at.y as f32,
                    path: Default::default(),
                    status: UnitStatus::Idle,
                },
                last_attack_tick: None,
                died_at_tick: None,
                retry_goal: None,
            },
        );
        id
    }

    pub fn add_tile(state: &mut GameState, at: Coord, tile_type: TileType, owner: Option<&str>) {
        state.insert_tile(at, tile_type, owner.map(str::to_string));
        if tile_type == TileType::Capital {
            if let Some(owner) = owner {
                if let Some(player) = state.player_mut(owner) {
                    player.capital = Some(at);
                    player.view.capital_hp = tile_stats(TileType::Capital).max_hp;
                }
            }
        }
    }

    pub fn engine(state: GameState) -> GameEngine {
        GameEngine::from_state(state, RuleSet::default(), 11)
    }
}
