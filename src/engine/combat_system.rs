use super::utils::{beats, scaled_damage};
use super::*;

use crate::constants::tile_stats;
use crate::types::{TileType, UnitType};

enum Target {
    Unit(String),
    Tile(Coord),
}

impl GameEngine {
    pub(super) fn resolve_combat(&mut self) {
        let now = self.state.tick;
        let cooldown = self.rules.attack_cooldown_ticks;
        let ids: Vec<String> = self.state.units.keys().cloned().collect();

        for id in ids {
            let Some(unit) = self.state.units.get(&id) else {
                continue;
            };
            if !unit.view.is_alive()
                || !matches!(unit.view.status, UnitStatus::Idle | UnitStatus::Attacking)
            {
                continue;
            }
            let ready = unit
                .last_attack_tick
                .map(|last| now.saturating_sub(last) >= cooldown)
                .unwrap_or(true);

            let Some(target) = self.pick_target(&id) else {
                if let Some(unit) = self.state.units.get_mut(&id) {
                    unit.view.status = UnitStatus::Idle;
                }
                continue;
            };
            if let Some(unit) = self.state.units.get_mut(&id) {
                unit.view.status = UnitStatus::Attacking;
                if ready {
                    unit.last_attack_tick = Some(now);
                }
            }
            if !ready {
                continue;
            }
            match target {
                Target::Unit(target_id) => self.attack_unit(&id, &target_id),
                Target::Tile(coord) => self.attack_tile(&id, coord),
            }
        }
    }

    fn pick_target(&self, unit_id: &str) -> Option<Target> {
        let unit = self.state.units.get(unit_id)?;
        let cell = unit.view.cell();
        let range = unit.view.range;

        let nearest_unit = self
            .spatial
            .query_radius(cell, range)
            .into_iter()
            .filter_map(|other_id| self.state.units.get(&other_id))
            .filter(|other| other.view.owner != unit.view.owner && other.view.is_alive())
            .map(|other| (other.view.cell().manhattan(cell), other.view.id.clone()))
            .min();
        if let Some((_, target_id)) = nearest_unit {
            return Some(Target::Unit(target_id));
        }

        let mut best: Option<(i32, Coord)> = None;
        for dy in -range..=range {
            for dx in -range..=range {
                let at = Coord::new(cell.x + dx, cell.y + dy);
                let distance = at.manhattan(cell);
                if distance > range {
                    continue;
                }
                let Some(tile) = self.state.tiles.get(&at) else {
                    continue;
                };
                let enemy_owned = tile
                    .owner
                    .as_deref()
                    .map(|owner| owner != unit.view.owner)
                    .unwrap_or(false);
                if !enemy_owned || tile.hp <= 0 {
                    continue;
                }
                if best.map(|current| (distance, at) < current).unwrap_or(true) {
                    best = Some((distance, at));
                }
            }
        }
        best.map(|(_, at)| Target::Tile(at))
    }

    /// Incoming-damage divisor for a unit standing near a friendly watchtower.
    /// Evaluated at every hit.
    pub(super) fn aura_divisor(&self, defender_id: &str) -> f32 {
        let Some(defender) = self.state.units.get(defender_id) else {
            return 1.0;
        };
        let cell = defender.view.cell();
        let radius = self.rules.watchtower_aura_radius;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let at = Coord::new(cell.x + dx, cell.y + dy);
                if at.manhattan(cell) > radius {
                    continue;
                }
                let covered = self
                    .state
                    .tiles
                    .get(&at)
                    .map(|tile| {
                        tile.tile_type == TileType::Watchtower
                            && tile.hp > 0
                            && tile.owner.as_deref() == Some(defender.view.owner.as_str())
                    })
                    .unwrap_or(false);
                if covered {
                    return self.rules.watchtower_defense_divisor;
                }
            }
        }
        1.0
    }

    fn attack_unit(&mut self, attacker_id: &str, target_id: &str) {
        let Some(attacker) = self.state.units.get(attacker_id) else {
            return;
        };
        let Some(target) = self.state.units.get(target_id) else {
            return;
        };
        let multiplier = if beats(attacker.view.unit_type, target.view.unit_type) {
            self.rules.counter_multiplier
        } else {
            1.0
        };
        let damage = scaled_damage(
            attacker.view.attack,
            multiplier,
            self.aura_divisor(target_id),
        );

        let Some(target) = self.state.units.get_mut(target_id) else {
            return;
        };
        target.view.hp -= damage;
        let target_hp = target.view.hp;
        self.events.push(GameEvent::UnitAttacked {
            attacker_id: attacker_id.to_string(),
            target_id: target_id.to_string(),
            damage,
            target_hp,
        });
        if target_hp <= 0 {
            self.kill_unit(target_id, Some(attacker_id));
        }
    }

    fn attack_tile(&mut self, attacker_id: &str, at: Coord) {
        let Some(attacker) = self.state.units.get(attacker_id) else {
            return;
        };
        let attacker_owner = attacker.view.owner.clone();
        let Some(tile) = self.state.tiles.get(&at) else {
            return;
        };
        let multiplier = if attacker.view.unit_type == UnitType::Siege
            && tile_stats(tile.tile_type).building
        {
            self.rules.siege_building_multiplier
        } else {
            1.0
        };
        let damage = scaled_damage(attacker.view.attack, multiplier, 1.0);

        let Some(tile) = self.state.tiles.get_mut(&at) else {
            return;
        };
        tile.hp = (tile.hp - damage).max(0);
        let tile_hp = tile.hp;
        let is_capital = tile.tile_type == TileType::Capital;
        let owner = tile.owner.clone();
        self.events.push(GameEvent::TileAttacked {
            attacker_id: attacker_id.to_string(),
            x: at.x,
            y: at.y,
            damage,
            tile_hp,
        });
        if is_capital {
            if let Some(player) = owner.as_deref().and_then(|id| self.state.player_mut(id)) {
                player.view.capital_hp = tile_hp;
            }
        }
        if tile_hp <= 0 {
            self.on_tile_destroyed(at, &attacker_owner);
        }
    }

    pub(super) fn kill_unit(&mut self, unit_id: &str, killer_id: Option<&str>) {
        let now = self.state.tick;
        let Some(unit) = self.state.units.get_mut(unit_id) else {
            return;
        };
        if unit.view.status == UnitStatus::Dead {
            return;
        }
        unit.view.status = UnitStatus::Dead;
        unit.view.hp = unit.view.hp.min(0);
        unit.view.path.clear();
        unit.retry_goal = None;
        unit.died_at_tick = Some(now);
        self.spatial.remove(unit_id);
        self.events.push(GameEvent::UnitDied {
            unit_id: unit_id.to_string(),
            killer_id: killer_id.map(str::to_string),
        });
    }

    pub(super) fn purge_dead_units(&mut self) {
        let now = self.state.tick;
        let linger = self.rules.dead_unit_linger_ticks;
        self.state.units.retain(|_, unit| {
            unit.died_at_tick
                .map(|died| now.saturating_sub(died) < linger)
                .unwrap_or(true)
        });
    }
}
