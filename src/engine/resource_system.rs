use std::collections::{HashSet, VecDeque};

use super::*;

use crate::constants::worker_bonus;
use crate::types::{ResourceBundle, TileType};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Component {
    pub tile_type: TileType,
    pub tiles: Vec<Coord>,
}

/// Flood-fills `owner`'s tiles into components. Each tile lands in exactly one component.
pub fn connected_components(state: &GameState, owner: &str) -> Vec<Component> {
    let mut visited: HashSet<Coord> = HashSet::new();
    let mut components = Vec::new();

    for (coord, tile) in &state.tiles {
        if tile.owner.as_deref() != Some(owner) || visited.contains(coord) {
            continue;
        }
        let tile_type = tile.tile_type;
        let mut members = Vec::new();
        let mut queue = VecDeque::from([*coord]);
        visited.insert(*coord);

        while let Some(current) = queue.pop_front() {
            members.push(current);
            for next in current.neighbors4() {
                if visited.contains(&next) {
                    continue;
                }
                let same = state
                    .tiles
                    .get(&next)
                    .map(|other| other.owner.as_deref() == Some(owner) && other.tile_type == tile_type)
                    .unwrap_or(false);
                if same {
                    visited.insert(next);
                    queue.push_back(next);
                }
            }
        }
        members.sort();
        components.push(Component {
            tile_type,
            tiles: members,
        });
    }
    components
}

pub fn component_yield(state: &GameState, component: &Component) -> ResourceBundle {
    let bonus = worker_bonus(component.tile_type);
    component
        .tiles
        .iter()
        .filter_map(|coord| state.tiles.get(coord))
        .fold(ResourceBundle::ZERO, |total, tile| {
            let staffed = tile.workers.len().min(tile.worker_capacity) as i32;
            total.plus(tile.base_yield).plus(ResourceBundle::new(
                bonus.gold * staffed,
                bonus.food * staffed,
                bonus.faith * staffed,
            ))
        })
}

impl GameEngine {
    pub(super) fn aggregate_resources(&mut self) {
        let player_ids = self.remaining_players();
        for player_id in player_ids {
            let gained = connected_components(&self.state, &player_id)
                .iter()
                .fold(ResourceBundle::ZERO, |total, component| {
                    total.plus(component_yield(&self.state, component))
                });
            if gained.is_zero() {
                continue;
            }
            let Some(player) = self.state.player_mut(&player_id) else {
                continue;
            };
            let dropped = player.view.resources.add_clamped(gained);
            self.events.push(GameEvent::ResourcesGenerated {
                player_id: player_id.clone(),
                gained,
            });
            if !dropped.is_zero() {
                self.events.push(GameEvent::ResourceOverflow {
                    player_id,
                    dropped,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{add_tile, bare_state, engine};
    use super::*;
    use crate::types::WorkerStatus;

    fn staff(state: &mut GameState, owner: &str, at: Coord) {
        let worker_id = state
            .workers
            .values()
            .find(|worker| worker.owner == owner && worker.status == WorkerStatus::Idle)
            .map(|worker| worker.id.clone())
            .expect("idle worker");
        let worker = state.workers.get_mut(&worker_id).expect("worker");
        worker.status = WorkerStatus::Deployed;
        worker.tile = Some(at);
        state
            .tiles
            .get_mut(&at)
            .expect("tile")
            .workers
            .push(worker_id);
    }

    #[test]
    fn three_connected_cities_with_one_worker() {
        let mut state = bare_state(10, 10, 1);
        for x in 2..5 {
            add_tile(&mut state, Coord::new(x, 3), TileType::City, Some("p1"));
        }
        staff(&mut state, "p1", Coord::new(3, 3));

        let components = connected_components(&state, "p1");
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].tiles.len(), 3);

        let base = crate::constants::tile_stats(TileType::City).base_yield;
        let bonus = worker_bonus(TileType::City);
        assert_eq!(
            component_yield(&state, &components[0]),
            ResourceBundle::new(base.gold * 3 + bonus.gold, base.food * 3, base.faith * 3)
        );
    }

    #[test]
    fn type_and_owner_split_components() {
        let mut state = bare_state(10, 10, 2);
        add_tile(&mut state, Coord::new(1, 1), TileType::City, Some("p1"));
        add_tile(&mut state, Coord::new(2, 1), TileType::Field, Some("p1"));
        add_tile(&mut state, Coord::new(3, 1), TileType::City, Some("p2"));
        add_tile(&mut state, Coord::new(1, 2), TileType::City, Some("p1"));
        add_tile(&mut state, Coord::new(2, 2), TileType::City, Some("p1"));
        // diagonal does not connect
        add_tile(&mut state, Coord::new(3, 3), TileType::City, Some("p1"));

        let mut sizes: Vec<(TileType, usize)> = connected_components(&state, "p1")
            .into_iter()
            .map(|component| (component.tile_type, component.tiles.len()))
            .collect();
        sizes.sort();
        assert_eq!(
            sizes,
            vec![
                (TileType::Field, 1),
                (TileType::City, 1),
                (TileType::City, 3)
            ]
        );
        let total: usize = sizes.iter().map(|(_, size)| size).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn aggregation_clamps_to_cap_and_reports_overflow() {
        let mut state = bare_state(10, 10, 1);
        add_tile(&mut state, Coord::new(1, 1), TileType::Mine, Some("p1"));
        if let Some(player) = state.player_mut("p1") {
            player.view.resources.gold = 498;
        }
        let mut engine = engine(state);
        engine.aggregate_resources();

        let resources = engine.state().player("p1").expect("player").view.resources;
        assert_eq!(resources.gold, 500);
        assert!(engine.pending_events().iter().any(|event| matches!(
            event,
            GameEvent::ResourceOverflow { dropped, .. } if dropped.gold == 2
        )));

        for _ in 0..5 {
            engine.aggregate_resources();
        }
        let resources = engine.state().player("p1").expect("player").view.resources;
        assert!(resources.gold <= resources.cap);
        assert!(resources.gold >= 0 && resources.food >= 0 && resources.faith >= 0);
    }

    #[test]
    fn aggregation_runs_on_interval() {
        let mut state = bare_state(10, 10, 1);
        add_tile(&mut state, Coord::new(1, 1), TileType::Orchard, Some("p1"));
        let mut engine = engine(state);
        let start_food = engine.state().player("p1").expect("player").view.resources.food;

        for _ in 0..engine.rules.aggregation_interval_ticks - 1 {
            engine.step();
        }
        assert_eq!(
            engine.state().player("p1").expect("player").view.resources.food,
            start_food
        );
        engine.step();
        assert_eq!(
            engine.state().player("p1").expect("player").view.resources.food,
            start_food + 4
        );
    }
}
