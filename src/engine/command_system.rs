use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

use super::*;

use crate::constants::{tech_advance_cost, tile_stats, unit_stats};
use crate::error::CommandError;
use crate::types::{TechLevel, TileState, TileType, UnitType, WorkerStatus};
use crate::world::{new_tile, PendingTraining};

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    PlaceTile {
        x: i32,
        y: i32,
        tile_type: TileType,
    },
    MoveUnit {
        unit_id: String,
        x: i32,
        y: i32,
    },
    TrainUnit {
        unit_type: UnitType,
        x: i32,
        y: i32,
    },
    PlaceWorker {
        x: i32,
        y: i32,
        worker_id: Option<String>,
    },
    RecallWorker {
        worker_id: String,
    },
    Raid {
        unit_id: String,
        x: i32,
        y: i32,
    },
    AdvanceTech,
}

impl Command {
    pub fn action_name(&self) -> &'static str {
        match self {
            Self::PlaceTile { .. } => "placeTile",
            Self::MoveUnit { .. } => "moveUnit",
            Self::TrainUnit { .. } => "trainUnit",
            Self::PlaceWorker { .. } => "placeWorker",
            Self::RecallWorker { .. } => "recallWorker",
            Self::Raid { .. } => "raid",
            Self::AdvanceTech => "advanceTech",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StateDelta {
    pub events: Vec<GameEvent>,
    pub summary: String,
}

impl GameEngine {
    /// Validates and applies one command. Either the whole effect lands or the state is untouched.
    pub fn apply_command(
        &mut self,
        player_id: &str,
        command: &Command,
    ) -> Result<StateDelta, CommandError> {
        let events_before = self.events.len();
        match self.guarded(command.action_name(), |engine| {
            engine.execute_command(player_id, command)
        }) {
            Ok(summary) => Ok(StateDelta {
                events: self.events[events_before..].to_vec(),
                summary,
            }),
            Err(err) => {
                debug!(player_id, action = command.action_name(), code = err.code(), %err, "command rejected");
                Err(err)
            }
        }
    }

    fn guarded<T>(
        &mut self,
        label: &str,
        apply: impl FnOnce(&mut Self) -> Result<T, CommandError>,
    ) -> Result<T, CommandError> {
        let state_backup = self.state.clone();
        let spatial_backup = self.spatial.clone();
        let dirty_backup = self.dirty_cells.clone();
        let rng_backup = self.rng.clone();
        let events_before = self.events.len();

        match catch_unwind(AssertUnwindSafe(|| apply(self))) {
            Ok(result) => result,
            Err(_) => {
                self.state = state_backup;
                self.spatial = spatial_backup;
                self.dirty_cells = dirty_backup;
                self.rng = rng_backup;
                self.events.truncate(events_before);
                warn!(action = label, "command panicked, state restored");
                Err(CommandError::Internal(format!("{label} could not be processed")))
            }
        }
    }

    fn execute_command(&mut self, player_id: &str, command: &Command) -> Result<String, CommandError> {
        if self.state.ended {
            return Err(CommandError::rule("the game is over"));
        }
        let player = self
            .state
            .player(player_id)
            .ok_or_else(|| CommandError::not_found(format!("player {player_id}")))?;
        if player.view.eliminated {
            return Err(CommandError::rule("eliminated players cannot act"));
        }

        match command {
            Command::PlaceTile { x, y, tile_type } => {
                self.place_tile(player_id, Coord::new(*x, *y), *tile_type)
            }
            Command::MoveUnit { unit_id, x, y } => {
                self.move_unit(player_id, unit_id, Coord::new(*x, *y))
            }
            Command::TrainUnit { unit_type, x, y } => {
                self.train_unit(player_id, *unit_type, Coord::new(*x, *y))
            }
            Command::PlaceWorker { x, y, worker_id } => {
                self.place_worker(player_id, Coord::new(*x, *y), worker_id.as_deref())
            }
            Command::RecallWorker { worker_id } => self.recall_worker(player_id, worker_id),
            Command::Raid { unit_id, x, y } => self.raid(player_id, unit_id, Coord::new(*x, *y)),
            Command::AdvanceTech => self.advance_tech(player_id),
        }
    }

    fn require_in_bounds(&self, at: Coord) -> Result<(), CommandError> {
        if self.state.in_bounds(at) {
            Ok(())
        } else {
            Err(CommandError::rule(format!("{at} is outside the map")))
        }
    }

    fn require_owned_unit(&self, player_id: &str, unit_id: &str) -> Result<Coord, CommandError> {
        let unit = self
            .state
            .units
            .get(unit_id)
            .ok_or_else(|| CommandError::not_found(format!("unit {unit_id}")))?;
        if unit.view.owner != player_id {
            return Err(CommandError::rule(format!("unit {unit_id} belongs to another player")));
        }
        if !unit.view.is_alive() {
            return Err(CommandError::rule(format!("unit {unit_id} is dead")));
        }
        Ok(unit.view.cell())
    }

    fn require_owned_tile(&self, player_id: &str, at: Coord) -> Result<&TileState, CommandError> {
        self.require_in_bounds(at)?;
        let tile = self
            .state
            .tiles
            .get(&at)
            .ok_or_else(|| CommandError::not_found(format!("tile {at}")))?;
        if tile.owner.as_deref() != Some(player_id) {
            return Err(CommandError::rule(format!("tile {at} is not yours")));
        }
        Ok(tile)
    }

    fn place_tile(&mut self, player_id: &str, at: Coord, tile_type: TileType) -> Result<String, CommandError> {
        let turn = self
            .state
            .turn
            .as_ref()
            .ok_or_else(|| CommandError::rule("no placement turn is open"))?;
        if turn.player_id != player_id {
            return Err(CommandError::rule("it is not your placement turn"));
        }
        if !turn.offers.contains(&tile_type) {
            return Err(CommandError::rule(format!(
                "{} is not among the offered tiles",
                tile_type.as_str()
            )));
        }
        self.require_in_bounds(at)?;
        if self.state.tiles.contains_key(&at) {
            return Err(CommandError::rule(format!("{at} is already occupied")));
        }
        let touches_territory = at
            .neighbors4()
            .iter()
            .any(|cell| self.state.is_owned_by(*cell, player_id));
        if !touches_territory {
            return Err(CommandError::rule(format!("{at} is not adjacent to your territory")));
        }

        self.state
            .tiles
            .insert(at, new_tile(at, tile_type, Some(player_id.to_string())));
        self.mark_dirty(at);
        self.events.push(GameEvent::TilePlaced {
            x: at.x,
            y: at.y,
            tile_type,
            owner: player_id.to_string(),
        });
        self.advance_turn();
        Ok(format!(
            "{} placed a {} at {at}",
            self.player_name(player_id),
            tile_type.as_str()
        ))
    }

    fn move_unit(&mut self, player_id: &str, unit_id: &str, goal: Coord) -> Result<String, CommandError> {
        self.require_owned_unit(player_id, unit_id)?;
        self.require_in_bounds(goal)?;

        let planned = self.plan_path(unit_id, goal);
        let Some(unit) = self.state.units.get_mut(unit_id) else {
            return Err(CommandError::not_found(format!("unit {unit_id}")));
        };
        match planned {
            None => {
                unit.view.path.clear();
                unit.view.status = UnitStatus::Idle;
                unit.retry_goal = Some(goal);
                self.events.push(GameEvent::PathNotFound {
                    unit_id: unit_id.to_string(),
                    x: goal.x,
                    y: goal.y,
                });
                Ok(format!(
                    "{} could not find a route to {goal}",
                    self.player_name(player_id)
                ))
            }
            Some(path) => {
                let path_len = path.len();
                unit.view.status = if path.is_empty() {
                    UnitStatus::Idle
                } else {
                    UnitStatus::Moving
                };
                unit.view.path = path;
                unit.retry_goal = None;
                self.events.push(GameEvent::UnitMoveOrdered {
                    unit_id: unit_id.to_string(),
                    x: goal.x,
                    y: goal.y,
                    path_len,
                });
                Ok(format!("{} moved a unit toward {goal}", self.player_name(player_id)))
            }
        }
    }

    fn train_unit(&mut self, player_id: &str, unit_type: UnitType, at: Coord) -> Result<String, CommandError> {
        let tile = self.require_owned_tile(player_id, at)?;
        if !tile_stats(tile.tile_type).can_train {
            return Err(CommandError::rule(format!(
                "a {} cannot train units",
                tile.tile_type.as_str()
            )));
        }
        let stats = unit_stats(unit_type);
        let player = self
            .state
            .player(player_id)
            .ok_or_else(|| CommandError::not_found(format!("player {player_id}")))?;
        if player.view.tech_level < stats.required_tech {
            return Err(CommandError::rule(format!(
                "{} requires a higher tech level",
                unit_type.as_str()
            )));
        }
        let pending = self
            .state
            .training
            .iter()
            .filter(|order| order.owner == player_id)
            .count();
        if pending >= self.rules.max_pending_training {
            return Err(CommandError::rule("too many units in training"));
        }
        if !player.view.resources.covers(stats.cost) {
            return Err(CommandError::rule("insufficient resources"));
        }

        let ready_at_tick = self.state.tick + stats.training_ticks;
        let Some(player) = self.state.player_mut(player_id) else {
            return Err(CommandError::not_found(format!("player {player_id}")));
        };
        if !player.view.resources.try_spend(stats.cost) {
            return Err(CommandError::rule("insufficient resources"));
        }
        let training_id = self.state.next_id("train");
        self.state.training.push(PendingTraining {
            id: training_id.clone(),
            owner: player_id.to_string(),
            unit_type,
            at,
            ready_at_tick,
        });
        self.events.push(GameEvent::UnitTrainingStarted {
            training_id,
            unit_type,
            owner: player_id.to_string(),
            x: at.x,
            y: at.y,
            ready_at_tick,
        });
        Ok(format!(
            "{} started training a {}",
            self.player_name(player_id),
            unit_type.as_str()
        ))
    }

    fn place_worker(
        &mut self,
        player_id: &str,
        at: Coord,
        worker_id: Option<&str>,
    ) -> Result<String, CommandError> {
        let tile = self.require_owned_tile(player_id, at)?;
        if tile.workers.len() >= tile.worker_capacity {
            return Err(CommandError::rule(format!("tile {at} has no free worker slot")));
        }
        let worker_id = match worker_id {
            Some(id) => {
                let worker = self
                    .state
                    .workers
                    .get(id)
                    .ok_or_else(|| CommandError::not_found(format!("worker {id}")))?;
                if worker.owner != player_id {
                    return Err(CommandError::rule(format!("worker {id} belongs to another player")));
                }
                if worker.status != WorkerStatus::Idle {
                    return Err(CommandError::rule(format!("worker {id} is not idle")));
                }
                id.to_string()
            }
            None => self
                .state
                .workers
                .values()
                .find(|worker| worker.owner == player_id && worker.status == WorkerStatus::Idle)
                .map(|worker| worker.id.clone())
                .ok_or_else(|| CommandError::rule("no idle worker available"))?,
        };

        let Some(worker) = self.state.workers.get_mut(&worker_id) else {
            return Err(CommandError::not_found(format!("worker {worker_id}")));
        };
        worker.status = WorkerStatus::Deployed;
        worker.tile = Some(at);
        worker.cooldown_until_tick = None;
        if let Some(tile) = self.state.tiles.get_mut(&at) {
            tile.workers.push(worker_id.clone());
        }
        self.events.push(GameEvent::WorkerDeployed {
            worker_id,
            owner: player_id.to_string(),
            x: at.x,
            y: at.y,
        });
        Ok(format!("{} deployed a worker at {at}", self.player_name(player_id)))
    }

    fn recall_worker(&mut self, player_id: &str, worker_id: &str) -> Result<String, CommandError> {
        let worker = self
            .state
            .workers
            .get(worker_id)
            .ok_or_else(|| CommandError::not_found(format!("worker {worker_id}")))?;
        if worker.owner != player_id {
            return Err(CommandError::rule(format!("worker {worker_id} belongs to another player")));
        }
        if worker.status != WorkerStatus::Deployed {
            return Err(CommandError::rule(format!("worker {worker_id} is not deployed")));
        }
        self.send_worker_to_cooldown(worker_id)
            .ok_or_else(|| CommandError::Internal(format!("worker {worker_id} changed state")))?;
        Ok(format!("{} recalled a worker", self.player_name(player_id)))
    }

    fn raid(&mut self, player_id: &str, unit_id: &str, at: Coord) -> Result<String, CommandError> {
        let from = self.require_owned_unit(player_id, unit_id)?;
        self.require_in_bounds(at)?;
        let tile = self
            .state
            .tiles
            .get(&at)
            .ok_or_else(|| CommandError::not_found(format!("tile {at}")))?;
        let Some(unit) = self.state.units.get(unit_id) else {
            return Err(CommandError::not_found(format!("unit {unit_id}")));
        };
        if from.manhattan(at) > unit.view.range {
            return Err(CommandError::rule(format!("{at} is out of range")));
        }
        let cooling_down = unit
            .last_attack_tick
            .map(|last| self.state.tick.saturating_sub(last) < self.rules.attack_cooldown_ticks)
            .unwrap_or(false);
        if cooling_down {
            return Err(CommandError::rule(format!("unit {unit_id} is still recovering")));
        }
        let owner = tile.owner.clone();
        let capturable = tile.capturable;
        match owner.as_deref() {
            Some(owner) if owner == player_id => {
                Err(CommandError::rule("cannot raid your own tile"))
            }
            Some(victim) => {
                let victim = victim.to_string();
                self.mark_raider(unit_id);
                let stolen = self.steal_resources(player_id, &victim);
                Ok(format!(
                    "{} raided {} for {} gold, {} food, {} faith",
                    self.player_name(player_id),
                    self.player_name(&victim),
                    stolen.gold,
                    stolen.food,
                    stolen.faith
                ))
            }
            None if capturable => {
                self.mark_raider(unit_id);
                self.capture_tile(at, player_id);
                Ok(format!("{} captured the tile at {at}", self.player_name(player_id)))
            }
            None => Err(CommandError::rule(format!("tile {at} cannot be captured"))),
        }
    }

    fn mark_raider(&mut self, unit_id: &str) {
        let now = self.state.tick;
        if let Some(unit) = self.state.units.get_mut(unit_id) {
            unit.last_attack_tick = Some(now);
        }
    }

    fn advance_tech(&mut self, player_id: &str) -> Result<String, CommandError> {
        let player = self
            .state
            .player(player_id)
            .ok_or_else(|| CommandError::not_found(format!("player {player_id}")))?;
        let next = player
            .view
            .tech_level
            .next()
            .ok_or_else(|| CommandError::rule("already at the highest tech level"))?;
        let cost = tech_advance_cost(next).unwrap_or_default();
        if !player.view.resources.covers(cost) {
            return Err(CommandError::rule("insufficient resources"));
        }

        let Some(player) = self.state.player_mut(player_id) else {
            return Err(CommandError::not_found(format!("player {player_id}")));
        };
        if !player.view.resources.try_spend(cost) {
            return Err(CommandError::rule("insufficient resources"));
        }
        player.view.tech_level = next;
        self.events.push(GameEvent::TechAdvanced {
            player_id: player_id.to_string(),
            level: next,
        });
        let label = match next {
            TechLevel::Manor => "manor",
            TechLevel::Duchy => "duchy",
            TechLevel::Kingdom => "kingdom",
        };
        Ok(format!("{} advanced to {label}", self.player_name(player_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{add_tile, add_unit, bare_state, engine};
    use super::*;
    use crate::types::ResourceBundle;

    fn resources(engine: &GameEngine, player_id: &str) -> ResourceBundle {
        engine
            .state()
            .player(player_id)
            .expect("player")
            .view
            .resources
            .bundle()
    }

    fn set_resources(engine: &mut GameEngine, player_id: &str, bundle: ResourceBundle) {
        let player = engine.state.player_mut(player_id).expect("player");
        player.view.resources.gold = bundle.gold;
        player.view.resources.food = bundle.food;
        player.view.resources.faith = bundle.faith;
    }

    fn with_barracks() -> GameEngine {
        let mut state = bare_state(12, 12, 2);
        add_tile(&mut state, Coord::new(2, 2), TileType::Barracks, Some("p1"));
        engine(state)
    }

    #[test]
    fn train_unit_deducts_cost_and_schedules_completion() {
        let mut engine = with_barracks();
        let before = resources(&engine, "p1");
        let delta = engine
            .apply_command(
                "p1",
                &Command::TrainUnit {
                    unit_type: UnitType::Infantry,
                    x: 2,
                    y: 2,
                },
            )
            .expect("training accepted");

        let cost = unit_stats(UnitType::Infantry).cost;
        assert_eq!(
            resources(&engine, "p1"),
            ResourceBundle::new(before.gold - cost.gold, before.food - cost.food, before.faith)
        );
        assert!(matches!(
            delta.events.as_slice(),
            [GameEvent::UnitTrainingStarted { ready_at_tick, .. }] if *ready_at_tick == 100
        ));
        assert!(engine.state().units.is_empty());

        for _ in 0..99 {
            engine.step();
        }
        assert!(engine.state().units.is_empty());
        engine.step();
        assert_eq!(engine.state().units.len(), 1);
    }

    #[test]
    fn insufficient_resources_leave_pool_untouched() {
        let mut engine = with_barracks();
        set_resources(&mut engine, "p1", ResourceBundle::new(200, 10, 0));
        let err = engine
            .apply_command(
                "p1",
                &Command::TrainUnit {
                    unit_type: UnitType::Infantry,
                    x: 2,
                    y: 2,
                },
            )
            .expect_err("food is short");
        assert_eq!(err.code(), "rule_violation");
        assert_eq!(resources(&engine, "p1"), ResourceBundle::new(200, 10, 0));
        assert!(engine.state().training.is_empty());
    }

    #[test]
    fn knight_requires_duchy() {
        let mut engine = with_barracks();
        set_resources(&mut engine, "p1", ResourceBundle::new(500, 500, 500));
        let train_knight = Command::TrainUnit {
            unit_type: UnitType::Knight,
            x: 2,
            y: 2,
        };
        assert!(engine.apply_command("p1", &train_knight).is_err());
        engine
            .apply_command("p1", &Command::AdvanceTech)
            .expect("advance to duchy");
        assert_eq!(
            resources(&engine, "p1"),
            ResourceBundle::new(300, 400, 400)
        );
        assert!(engine.apply_command("p1", &train_knight).is_ok());
    }

    #[test]
    fn ownership_and_lookup_errors_are_typed() {
        let mut engine = with_barracks();
        let unit = add_unit(&mut engine.state, "p2", UnitType::Infantry, Coord::new(5, 5));
        engine.spatial.insert(&unit, Coord::new(5, 5));

        let err = engine
            .apply_command("p1", &Command::MoveUnit { unit_id: unit, x: 6, y: 5 })
            .expect_err("foreign unit");
        assert_eq!(err.code(), "rule_violation");

        let err = engine
            .apply_command(
                "p1",
                &Command::MoveUnit {
                    unit_id: "unit_404".to_string(),
                    x: 6,
                    y: 5,
                },
            )
            .expect_err("unknown unit");
        assert_eq!(err.code(), "not_found");

        let err = engine
            .apply_command(
                "p2",
                &Command::TrainUnit {
                    unit_type: UnitType::Infantry,
                    x: 2,
                    y: 2,
                },
            )
            .expect_err("foreign barracks");
        assert_eq!(err.code(), "rule_violation");
    }

    #[test]
    fn move_order_sets_path_and_unreachable_goal_holds() {
        let mut engine = with_barracks();
        let unit = add_unit(&mut engine.state, "p1", UnitType::Infantry, Coord::new(5, 5));
        engine.spatial.insert(&unit, Coord::new(5, 5));

        engine
            .apply_command("p1", &Command::MoveUnit { unit_id: unit.clone(), x: 8, y: 5 })
            .expect("move accepted");
        let view = &engine.state().units[&unit].view;
        assert_eq!(view.status, UnitStatus::Moving);
        assert_eq!(view.path.len(), 3);

        let blocker = add_unit(&mut engine.state, "p2", UnitType::Infantry, Coord::new(10, 10));
        engine.spatial.insert(&blocker, Coord::new(10, 10));
        let delta = engine
            .apply_command("p1", &Command::MoveUnit { unit_id: unit.clone(), x: 10, y: 10 })
            .expect("no path is not an error");
        assert!(matches!(delta.events.as_slice(), [GameEvent::PathNotFound { .. }]));
        let view = &engine.state().units[&unit].view;
        assert_eq!(view.status, UnitStatus::Idle);
        assert!(view.path.is_empty());
    }

    #[test]
    fn worker_cycle_runs_through_cooldown() {
        let mut state = bare_state(12, 12, 2);
        add_tile(&mut state, Coord::new(3, 3), TileType::Field, Some("p1"));
        let mut engine = engine(state);

        let delta = engine
            .apply_command("p1", &Command::PlaceWorker { x: 3, y: 3, worker_id: None })
            .expect("deploy");
        let worker_id = match delta.events.as_slice() {
            [GameEvent::WorkerDeployed { worker_id, .. }] => worker_id.clone(),
            other => panic!("unexpected events {other:?}"),
        };
        let full = engine
            .apply_command("p1", &Command::PlaceWorker { x: 3, y: 3, worker_id: None })
            .expect_err("field holds one worker");
        assert_eq!(full.code(), "rule_violation");

        engine
            .apply_command("p1", &Command::RecallWorker { worker_id: worker_id.clone() })
            .expect("recall");
        assert_eq!(engine.state().workers[&worker_id].status, WorkerStatus::Cooldown);
        let again = engine
            .apply_command(
                "p1",
                &Command::PlaceWorker {
                    x: 3,
                    y: 3,
                    worker_id: Some(worker_id.clone()),
                },
            )
            .expect_err("cooling worker cannot deploy");
        assert_eq!(again.code(), "rule_violation");

        for _ in 0..engine.rules.worker_cooldown_ticks - 1 {
            engine.step();
        }
        assert_eq!(engine.state().workers[&worker_id].status, WorkerStatus::Cooldown);
        engine.step();
        assert_eq!(engine.state().workers[&worker_id].status, WorkerStatus::Idle);
    }

    #[test]
    fn place_tile_requires_turn_offer_and_adjacency() {
        let mut state = bare_state(12, 12, 2);
        add_tile(&mut state, Coord::new(3, 3), TileType::Capital, Some("p1"));
        let mut engine = engine(state);
        engine.start_turns();
        let offered = engine.state().turn.as_ref().expect("turn").offers[0];

        let far = engine
            .apply_command("p1", &Command::PlaceTile { x: 9, y: 9, tile_type: offered })
            .expect_err("not adjacent");
        assert_eq!(far.code(), "rule_violation");
        let wrong_turn = engine
            .apply_command("p2", &Command::PlaceTile { x: 3, y: 4, tile_type: offered })
            .expect_err("not p2's turn");
        assert_eq!(wrong_turn.code(), "rule_violation");

        engine
            .apply_command("p1", &Command::PlaceTile { x: 3, y: 4, tile_type: offered })
            .expect("placement");
        assert_eq!(engine.state().tiles[&Coord::new(3, 4)].owner.as_deref(), Some("p1"));
        assert_eq!(
            engine.state().turn.as_ref().map(|turn| turn.player_id.as_str()),
            Some("p2")
        );
    }

    #[test]
    fn raid_steals_share_of_owner_pool() {
        let mut state = bare_state(12, 12, 2);
        add_tile(&mut state, Coord::new(5, 6), TileType::Mine, Some("p2"));
        add_tile(&mut state, Coord::new(4, 5), TileType::City, None);
        let raider = add_unit(&mut state, "p1", UnitType::Infantry, Coord::new(5, 5));
        let mut engine = engine(state);
        set_resources(&mut engine, "p2", ResourceBundle::new(200, 100, 50));

        engine
            .apply_command("p1", &Command::Raid { unit_id: raider.clone(), x: 5, y: 6 })
            .expect("raid");
        assert_eq!(resources(&engine, "p2"), ResourceBundle::new(180, 90, 45));
        assert_eq!(resources(&engine, "p1"), ResourceBundle::new(120, 110, 5));

        let cooling = engine
            .apply_command("p1", &Command::Raid { unit_id: raider, x: 4, y: 5 })
            .expect_err("unit needs to recover");
        assert_eq!(cooling.code(), "rule_violation");
        assert!(engine.state().tiles[&Coord::new(4, 5)].owner.is_none());
    }

    #[test]
    fn raid_captures_neutral_capturable_tile_only() {
        let mut state = bare_state(12, 12, 2);
        add_tile(&mut state, Coord::new(4, 5), TileType::City, None);
        add_tile(&mut state, Coord::new(6, 5), TileType::Marsh, None);
        let raider = add_unit(&mut state, "p1", UnitType::Infantry, Coord::new(5, 5));
        let mut engine = engine(state);

        let marsh = engine
            .apply_command("p1", &Command::Raid { unit_id: raider.clone(), x: 6, y: 5 })
            .expect_err("marsh is not capturable");
        assert_eq!(marsh.code(), "rule_violation");

        let delta = engine
            .apply_command("p1", &Command::Raid { unit_id: raider, x: 4, y: 5 })
            .expect("capture");
        assert!(matches!(delta.events.as_slice(), [GameEvent::TileCaptured { .. }]));
        assert_eq!(engine.state().tiles[&Coord::new(4, 5)].owner.as_deref(), Some("p1"));
    }

    #[test]
    fn panic_inside_guard_restores_state() {
        let mut engine = with_barracks();
        let before = resources(&engine, "p1");
        let tiles_before = engine.state().tiles.len();

        let result: Result<(), CommandError> = engine.guarded("test", |engine| {
            if let Some(player) = engine.state.player_mut("p1") {
                player.view.resources.gold = 0;
            }
            engine.state.tiles.clear();
            engine.events.push(GameEvent::GameOver { winner: None });
            panic!("boom");
        });

        assert_eq!(result.expect_err("panic converted").code(), "internal_error");
        assert_eq!(resources(&engine, "p1"), before);
        assert_eq!(engine.state().tiles.len(), tiles_before);
        assert!(engine.pending_events().is_empty());
    }
}
