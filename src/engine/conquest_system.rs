use super::*;

use crate::types::{ResourceBundle, TileType, WorkerStatus};

impl GameEngine {
    pub(super) fn on_tile_destroyed(&mut self, at: Coord, attacker_owner: &str) {
        let Some(tile) = self.state.tiles.get(&at) else {
            return;
        };
        let Some(previous_owner) = tile.owner.clone() else {
            return;
        };
        if tile.tile_type == TileType::Capital {
            self.eliminate_player(&previous_owner, Some(attacker_owner));
            return;
        }
        let restore_hp = tile.capturable;
        self.neutralize_tile(at, restore_hp);
    }

    pub(super) fn neutralize_tile(&mut self, at: Coord, restore_hp: bool) {
        let Some(tile) = self.state.tiles.get_mut(&at) else {
            return;
        };
        let Some(previous_owner) = tile.owner.take() else {
            return;
        };
        if restore_hp {
            tile.hp = tile.max_hp;
        }
        let workers = tile.workers.clone();
        for worker_id in workers {
            self.send_worker_to_cooldown(&worker_id);
        }
        self.mark_dirty(at);
        self.events.push(GameEvent::TileNeutralized {
            x: at.x,
            y: at.y,
            previous_owner,
        });
    }

    pub(super) fn capture_tile(&mut self, at: Coord, new_owner: &str) {
        let Some(tile) = self.state.tiles.get_mut(&at) else {
            return;
        };
        tile.owner = Some(new_owner.to_string());
        tile.hp = tile.max_hp;
        self.mark_dirty(at);
        self.events.push(GameEvent::TileCaptured {
            x: at.x,
            y: at.y,
            owner: new_owner.to_string(),
        });
    }

    pub(super) fn steal_resources(&mut self, raider: &str, victim: &str) -> ResourceBundle {
        let percent = self.rules.raid_percent;
        let Some(victim_player) = self.state.player_mut(victim) else {
            return ResourceBundle::ZERO;
        };
        let share = victim_player.view.resources.bundle().percent(percent);
        let stolen = victim_player.view.resources.take(share);
        let Some(raider_player) = self.state.player_mut(raider) else {
            return stolen;
        };
        let dropped = raider_player.view.resources.add_clamped(stolen);
        self.events.push(GameEvent::Raided {
            raider: raider.to_string(),
            victim: victim.to_string(),
            stolen,
        });
        if !dropped.is_zero() {
            self.events.push(GameEvent::ResourceOverflow {
                player_id: raider.to_string(),
                dropped,
            });
        }
        stolen
    }

    pub(super) fn eliminate_player(&mut self, player_id: &str, by: Option<&str>) {
        let Some(player) = self.state.player_mut(player_id) else {
            return;
        };
        if player.view.eliminated {
            return;
        }
        player.view.eliminated = true;
        player.view.capital_hp = 0;

        for unit_id in self.living_units_of(player_id) {
            self.kill_unit(&unit_id, None);
        }
        for worker in self.state.workers.values_mut() {
            if worker.owner == player_id {
                worker.status = WorkerStatus::Idle;
                worker.tile = None;
                worker.cooldown_until_tick = None;
            }
        }
        let owned: Vec<Coord> = self
            .state
            .tiles
            .values()
            .filter(|tile| tile.owner.as_deref() == Some(player_id))
            .map(|tile| tile.coord())
            .collect();
        for at in owned {
            if let Some(tile) = self.state.tiles.get_mut(&at) {
                tile.owner = None;
                tile.workers.clear();
            }
            self.mark_dirty(at);
        }
        self.state.training.retain(|order| order.owner != player_id);

        info!(player_id, by = by.unwrap_or("none"), "player eliminated");
        self.events.push(GameEvent::PlayerEliminated {
            player_id: player_id.to_string(),
        });

        let holds_turn = self
            .state
            .turn
            .as_ref()
            .map(|turn| turn.player_id == player_id)
            .unwrap_or(false);
        if holds_turn {
            self.advance_turn();
        }
        self.check_victory();
    }

    pub(super) fn check_victory(&mut self) {
        if self.state.ended || self.state.players.len() < 2 {
            return;
        }
        let remaining = self.remaining_players();
        if remaining.len() > 1 {
            return;
        }
        let winner = remaining.into_iter().next();
        self.state.ended = true;
        self.state.winner = winner.clone();
        self.state.turn = None;
        info!(winner = winner.as_deref().unwrap_or("draw"), tick = self.state.tick, "game over");
        self.events.push(GameEvent::GameOver { winner });
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{add_tile, add_unit, bare_state, engine};
    use super::*;
    use crate::types::UnitType;

    #[test]
    fn capturable_tile_goes_neutral_and_evicts_workers() {
        let mut state = bare_state(10, 10, 2);
        add_tile(&mut state, Coord::new(3, 3), TileType::City, Some("p2"));
        let worker_id = state
            .workers
            .values()
            .find(|worker| worker.owner == "p2")
            .map(|worker| worker.id.clone())
            .expect("worker");
        if let Some(worker) = state.workers.get_mut(&worker_id) {
            worker.status = WorkerStatus::Deployed;
            worker.tile = Some(Coord::new(3, 3));
        }
        if let Some(tile) = state.tiles.get_mut(&Coord::new(3, 3)) {
            tile.workers.push(worker_id.clone());
            tile.hp = 10;
        }
        add_unit(&mut state, "p1", UnitType::Infantry, Coord::new(3, 2));
        let mut engine = engine(state);

        engine.step();

        let tile = &engine.state().tiles[&Coord::new(3, 3)];
        assert!(tile.owner.is_none());
        assert_eq!(tile.hp, tile.max_hp);
        assert!(tile.workers.is_empty());
        let worker = &engine.state().workers[&worker_id];
        assert_eq!(worker.status, WorkerStatus::Cooldown);
        assert!(worker.tile.is_none());
        assert!(engine.check_invariants().is_empty());
    }

    #[test]
    fn capital_loss_eliminates_and_declares_winner() {
        let mut state = bare_state(12, 12, 2);
        add_tile(&mut state, Coord::new(1, 1), TileType::Capital, Some("p1"));
        add_tile(&mut state, Coord::new(8, 8), TileType::Capital, Some("p2"));
        add_tile(&mut state, Coord::new(8, 9), TileType::Field, Some("p2"));
        let doomed = add_unit(&mut state, "p2", UnitType::Archer, Coord::new(10, 10));
        if let Some(tile) = state.tiles.get_mut(&Coord::new(8, 8)) {
            tile.hp = 20;
        }
        add_unit(&mut state, "p1", UnitType::Siege, Coord::new(8, 6));
        let mut engine = engine(state);

        engine.step();

        let loser = engine.state().player("p2").expect("p2");
        assert!(loser.view.eliminated);
        assert_eq!(loser.view.capital_hp, 0);
        assert!(engine.state().tiles[&Coord::new(8, 9)].owner.is_none());
        assert_eq!(engine.state().units[&doomed].view.status, UnitStatus::Dead);
        assert!(engine.is_ended());
        assert_eq!(engine.winner(), Some("p1"));
        assert!(engine
            .pending_events()
            .iter()
            .any(|event| matches!(event, GameEvent::GameOver { winner: Some(w) } if w == "p1")));
    }

    #[test]
    fn raid_share_is_floored_and_capped() {
        let mut state = bare_state(5, 5, 2);
        if let Some(player) = state.player_mut("p2") {
            player.view.resources.gold = 99;
            player.view.resources.food = 250;
            player.view.resources.faith = 5;
        }
        if let Some(player) = state.player_mut("p1") {
            player.view.resources.food = 490;
        }
        let mut engine = engine(state);
        let stolen = engine.steal_resources("p1", "p2");
        assert_eq!(stolen, ResourceBundle::new(9, 25, 0));
        let victim = engine.state().player("p2").expect("p2").view.resources;
        assert_eq!((victim.gold, victim.food, victim.faith), (90, 225, 5));
        let raider = engine.state().player("p1").expect("p1").view.resources;
        assert_eq!(raider.food, 500);
    }
}
