use super::*;

use crate::constants::unit_stats;
use crate::types::{UnitType, UnitView, WorkerStatus};
use crate::world::UnitInternal;

impl GameEngine {
    pub(super) fn advance_timers(&mut self) {
        let now = self.state.tick;

        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.state.training)
            .into_iter()
            .partition(|order| order.ready_at_tick <= now);
        self.state.training = pending;
        for order in due {
            let still_owned = self.state.is_owned_by(order.at, &order.owner);
            let active = self
                .state
                .player(&order.owner)
                .map(|player| !player.view.eliminated)
                .unwrap_or(false);
            if !still_owned || !active {
                debug!(training_id = %order.id, owner = %order.owner, "training dropped, site lost");
                continue;
            }
            let unit_id = self.spawn_unit(&order.owner, order.unit_type, order.at);
            self.events.push(GameEvent::UnitTrained {
                unit_id,
                unit_type: order.unit_type,
                owner: order.owner,
                x: order.at.x,
                y: order.at.y,
            });
        }

        let ready: Vec<String> = self
            .state
            .workers
            .values()
            .filter(|worker| {
                worker.status == WorkerStatus::Cooldown
                    && worker
                        .cooldown_until_tick
                        .map(|until| until <= now)
                        .unwrap_or(true)
            })
            .map(|worker| worker.id.clone())
            .collect();
        for worker_id in ready {
            let Some(worker) = self.state.workers.get_mut(&worker_id) else {
                continue;
            };
            worker.status = WorkerStatus::Idle;
            worker.cooldown_until_tick = None;
            let owner = worker.owner.clone();
            self.events.push(GameEvent::WorkerReady { worker_id, owner });
        }
    }

    pub(super) fn spawn_unit(
        &mut self,
        owner: &str,
        unit_type: UnitType,
        at: Coord,
    ) -> String {
        let stats = unit_stats(unit_type);
        let id = self.state.next_id("unit");
        self.state.units.insert(
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
                    path: VecDeque::new(),
                    status: UnitStatus::Idle,
                },
                last_attack_tick: None,
                died_at_tick: None,
                retry_goal: None,
            },
        );
        self.spatial.insert(&id, at);
        id
    }

    pub(super) fn send_worker_to_cooldown(&mut self, worker_id: &str) -> Option<u64> {
        let ready_at = self.state.tick + self.rules.worker_cooldown_ticks;
        let worker = self.state.workers.get_mut(worker_id)?;
        if worker.status != WorkerStatus::Deployed {
            return None;
        }
        let tile = worker.tile.take();
        worker.status = WorkerStatus::Cooldown;
        worker.cooldown_until_tick = Some(ready_at);
        let owner = worker.owner.clone();
        if let Some(tile) = tile.and_then(|at| self.state.tiles.get_mut(&at)) {
            tile.workers.retain(|id| id != worker_id);
        }
        self.events.push(GameEvent::WorkerRecalled {
            worker_id: worker_id.to_string(),
            owner,
            ready_at_tick: ready_at,
        });
        Some(ready_at)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{add_tile, bare_state, engine};
    use super::*;
    use crate::types::TileType;
    use crate::world::PendingTraining;

    #[test]
    fn trained_unit_appears_only_when_timer_elapses() {
        let mut state = bare_state(10, 10, 1);
        add_tile(&mut state, Coord::new(4, 4), TileType::Barracks, Some("p1"));
        state.training.push(PendingTraining {
            id: "train_x".to_string(),
            owner: "p1".to_string(),
            unit_type: UnitType::Archer,
            at: Coord::new(4, 4),
            ready_at_tick: 3,
        });
        let mut engine = engine(state);

        engine.step();
        engine.step();
        assert!(engine.state().units.is_empty());
        engine.step();
        assert_eq!(engine.state().units.len(), 1);
        let unit = engine.state().units.values().next().expect("unit");
        assert_eq!(unit.view.unit_type, UnitType::Archer);
        assert_eq!(unit.view.cell(), Coord::new(4, 4));
        assert!(engine.spatial().contains(&unit.view.id));
        assert!(engine.state().training.is_empty());
    }

    #[test]
    fn training_on_lost_site_is_dropped() {
        let mut state = bare_state(10, 10, 2);
        add_tile(&mut state, Coord::new(4, 4), TileType::City, Some("p2"));
        state.training.push(PendingTraining {
            id: "train_x".to_string(),
            owner: "p1".to_string(),
            unit_type: UnitType::Infantry,
            at: Coord::new(4, 4),
            ready_at_tick: 1,
        });
        let mut engine = engine(state);
        engine.step();
        assert!(engine.state().units.is_empty());
        assert!(engine.state().training.is_empty());
    }
}
