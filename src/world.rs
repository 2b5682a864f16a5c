use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::Rng;

use crate::config::RuleSet;
use crate::constants::{
    tile_stats, CAPITAL_EXCLUSION_DISTANCE, CAPITAL_POSITIONS, GRID_HEIGHT, GRID_WIDTH,
    NEUTRAL_CITY_POSITIONS, SCATTERED_PER_TYPE,
};
use crate::types::{
    Coord, PlayerId, PlayerView, Resources, StartPlayer, TechLevel, TileState, TileType, TurnView,
    UnitType, UnitView, WorkerState, WorkerStatus,
};

const SCATTER_ATTEMPTS_PER_TILE: usize = 200;

#[derive(Clone, Debug)]
pub struct PlayerInternal {
    pub view: PlayerView,
    pub capital: Option<Coord>,
}

#[derive(Clone, Debug)]
pub struct UnitInternal {
    pub view: UnitView,
    pub last_attack_tick: Option<u64>,
    pub died_at_tick: Option<u64>,
    pub retry_goal: Option<Coord>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTraining {
    pub id: String,
    pub owner: PlayerId,
    pub unit_type: UnitType,
    pub at: Coord,
    pub ready_at_tick: u64,
}

#[derive(Clone, Debug)]
pub struct GameState {
    pub width: i32,
    pub height: i32,
    pub tick: u64,
    pub tiles: BTreeMap<Coord, TileState>,
    pub units: BTreeMap<String, UnitInternal>,
    pub workers: BTreeMap<String, WorkerState>,
    pub players: Vec<PlayerInternal>,
    pub training: Vec<PendingTraining>,
    pub turn: Option<TurnView>,
    pub winner: Option<PlayerId>,
    pub ended: bool,
    next_id: u64,
}

impl GameState {
    pub fn empty(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            tick: 0,
            tiles: BTreeMap::new(),
            units: BTreeMap::new(),
            workers: BTreeMap::new(),
            players: Vec::new(),
            training: Vec::new(),
            turn: None,
            winner: None,
            ended: false,
            next_id: 1,
        }
    }

    pub fn in_bounds(&self, coord: Coord) -> bool {
        coord.x >= 0 && coord.y >= 0 && coord.x < self.width && coord.y < self.height
    }

    pub fn terrain_cost(&self, coord: Coord) -> u32 {
        self.tiles
            .get(&coord)
            .map(|tile| tile_stats(tile.tile_type).terrain_cost)
            .unwrap_or(1)
    }

    pub fn next_id(&mut self, prefix: &str) -> String {
        let id = format!("{prefix}_{}", self.next_id);
        self.next_id += 1;
        id
    }

    pub fn player(&self, player_id: &str) -> Option<&PlayerInternal> {
        self.players.iter().find(|player| player.view.id == player_id)
    }

    pub fn player_mut(&mut self, player_id: &str) -> Option<&mut PlayerInternal> {
        self.players
            .iter_mut()
            .find(|player| player.view.id == player_id)
    }

    pub fn player_index(&self, player_id: &str) -> Option<usize> {
        self.players
            .iter()
            .position(|player| player.view.id == player_id)
    }

    pub fn active_player_ids(&self) -> Vec<PlayerId> {
        self.players
            .iter()
            .filter(|player| !player.view.eliminated)
            .map(|player| player.view.id.clone())
            .collect()
    }

    pub fn is_owned_by(&self, coord: Coord, player_id: &str) -> bool {
        self.tiles
            .get(&coord)
            .and_then(|tile| tile.owner.as_deref())
            .map(|owner| owner == player_id)
            .unwrap_or(false)
    }

    pub fn living_unit_at(&self, coord: Coord) -> Option<&UnitInternal> {
        self.units
            .values()
            .find(|unit| unit.view.is_alive() && unit.view.cell() == coord)
    }

    pub fn insert_tile(&mut self, coord: Coord, tile_type: TileType, owner: Option<PlayerId>) {
        self.tiles.insert(coord, new_tile(coord, tile_type, owner));
    }

    pub fn add_player(&mut self, start: &StartPlayer, rules: &RuleSet) {
        self.players.push(PlayerInternal {
            view: PlayerView {
                id: start.id.clone(),
                name: start.name.clone(),
                connected: start.connected,
                resources: Resources::new(rules.starting_resources, rules.resource_cap),
                capital_hp: 0,
                tech_level: TechLevel::Manor,
                eliminated: false,
            },
            capital: None,
        });
        for _ in 0..rules.workers_per_player {
            let id = self.next_id("worker");
            self.workers.insert(
                id.clone(),
                WorkerState {
                    id,
                    owner: start.id.clone(),
                    status: WorkerStatus::Idle,
                    tile: None,
                    cooldown_until_tick: None,
                },
            );
        }
    }

    pub fn place_capital(&mut self, player_id: &str, at: Coord) {
        self.insert_tile(at, TileType::Capital, Some(player_id.to_string()));
        for dy in -1..=1 {
            for dx in -1..=1 {
                let cell = Coord::new(at.x + dx, at.y + dy);
                if cell != at && self.in_bounds(cell) {
                    self.insert_tile(cell, TileType::Field, Some(player_id.to_string()));
                }
            }
        }
        let capital_hp = tile_stats(TileType::Capital).max_hp;
        if let Some(player) = self.player_mut(player_id) {
            player.capital = Some(at);
            player.view.capital_hp = capital_hp;
        }
    }
}

pub fn new_tile(coord: Coord, tile_type: TileType, owner: Option<PlayerId>) -> TileState {
    let stats = tile_stats(tile_type);
    TileState {
        x: coord.x,
        y: coord.y,
        tile_type,
        owner,
        hp: stats.max_hp,
        max_hp: stats.max_hp,
        base_yield: stats.base_yield,
        capturable: stats.capturable,
        worker_capacity: stats.worker_capacity,
        workers: Vec::new(),
    }
}

pub fn generate_world(start_players: &[StartPlayer], rules: &RuleSet, rng: &mut StdRng) -> GameState {
    let mut state = GameState::empty(GRID_WIDTH, GRID_HEIGHT);
    for (index, start) in start_players.iter().take(CAPITAL_POSITIONS.len()).enumerate() {
        state.add_player(start, rules);
        let (x, y) = CAPITAL_POSITIONS[index];
        state.place_capital(&start.id, Coord::new(x, y));
    }

    for (x, y) in NEUTRAL_CITY_POSITIONS {
        state.insert_tile(Coord::new(x, y), TileType::City, None);
    }

    for tile_type in [
        TileType::Mine,
        TileType::Orchard,
        TileType::Monastery,
        TileType::Marsh,
    ] {
        for _ in 0..SCATTERED_PER_TYPE {
            if let Some(cell) = pick_scatter_cell(&state, rng) {
                state.insert_tile(cell, tile_type, None);
            }
        }
    }
    state
}

fn pick_scatter_cell(state: &GameState, rng: &mut StdRng) -> Option<Coord> {
    for _ in 0..SCATTER_ATTEMPTS_PER_TILE {
        let cell = Coord::new(
            rng.random_range(1..state.width - 1),
            rng.random_range(1..state.height - 1),
        );
        if state.tiles.contains_key(&cell) {
            continue;
        }
        let near_capital = CAPITAL_POSITIONS
            .iter()
            .any(|&(x, y)| cell.manhattan(Coord::new(x, y)) <= CAPITAL_EXCLUSION_DISTANCE);
        if !near_capital {
            return Some(cell);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn start_players(count: usize) -> Vec<StartPlayer> {
        (0..count)
            .map(|idx| StartPlayer {
                id: format!("p{}", idx + 1),
                name: format!("P{}", idx + 1),
                connected: true,
            })
            .collect()
    }

    #[test]
    fn each_player_gets_capital_ring_and_workers() {
        let rules = RuleSet::default();
        let mut rng = StdRng::seed_from_u64(7);
        let state = generate_world(&start_players(3), &rules, &mut rng);

        assert_eq!(state.players.len(), 3);
        for (index, player) in state.players.iter().enumerate() {
            let (x, y) = CAPITAL_POSITIONS[index];
            let capital = Coord::new(x, y);
            assert_eq!(player.capital, Some(capital));
            let tile = state.tiles.get(&capital).expect("capital tile");
            assert_eq!(tile.tile_type, TileType::Capital);
            assert_eq!(tile.owner.as_deref(), Some(player.view.id.as_str()));
            let owned_fields = state
                .tiles
                .values()
                .filter(|tile| {
                    tile.tile_type == TileType::Field
                        && tile.owner.as_deref() == Some(player.view.id.as_str())
                })
                .count();
            assert_eq!(owned_fields, 8);
            let workers = state
                .workers
                .values()
                .filter(|worker| worker.owner == player.view.id)
                .count();
            assert_eq!(workers, rules.workers_per_player);
        }
    }

    #[test]
    fn scattered_tiles_avoid_capitals() {
        let rules = RuleSet::default();
        let mut rng = StdRng::seed_from_u64(99);
        let state = generate_world(&start_players(4), &rules, &mut rng);

        let scattered: Vec<&TileState> = state
            .tiles
            .values()
            .filter(|tile| {
                matches!(
                    tile.tile_type,
                    TileType::Mine | TileType::Orchard | TileType::Monastery | TileType::Marsh
                )
            })
            .collect();
        assert_eq!(scattered.len(), 4 * SCATTERED_PER_TYPE);
        for tile in scattered {
            assert!(tile.owner.is_none());
            for (x, y) in CAPITAL_POSITIONS {
                assert!(tile.coord().manhattan(Coord::new(x, y)) > CAPITAL_EXCLUSION_DISTANCE);
            }
        }
    }

    #[test]
    fn same_seed_builds_same_map() {
        let rules = RuleSet::default();
        let a = generate_world(&start_players(2), &rules, &mut StdRng::seed_from_u64(5));
        let b = generate_world(&start_players(2), &rules, &mut StdRng::seed_from_u64(5));
        assert_eq!(a.tiles, b.tiles);
    }

    #[test]
    fn marsh_costs_double() {
        let mut state = GameState::empty(5, 5);
        state.insert_tile(Coord::new(2, 2), TileType::Marsh, None);
        assert_eq!(state.terrain_cost(Coord::new(2, 2)), 2);
        assert_eq!(state.terrain_cost(Coord::new(1, 2)), 1);
    }
}
