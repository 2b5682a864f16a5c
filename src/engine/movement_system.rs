use super::*;

use crate::constants::TICK_SECONDS;

use super::pathfinding::Terrain;

/// Moves from `from` along `path` spending `budget`; entering a cell costs distance times its
/// terrain weight. Reached waypoints are popped.
pub fn walk_path<T: Terrain + ?Sized>(
    terrain: &T,
    from: (f32, f32),
    path: &mut VecDeque<Coord>,
    mut budget: f32,
) -> (f32, f32) {
    let (mut x, mut y) = from;
    while budget > f32::EPSILON {
        let Some(next) = path.front().copied() else {
            break;
        };
        let (tx, ty) = (next.x as f32, next.y as f32);
        let distance = ((tx - x).powi(2) + (ty - y).powi(2)).sqrt();
        let needed = distance * terrain.terrain_cost(next) as f32;
        if needed <= budget {
            x = tx;
            y = ty;
            budget -= needed;
            path.pop_front();
        } else {
            let fraction = budget / needed;
            x += (tx - x) * fraction;
            y += (ty - y) * fraction;
            budget = 0.0;
        }
    }
    (x, y)
}

impl GameEngine {
    pub(super) fn update_movement(&mut self) {
        self.invalidate_dirty_paths();

        let ids: Vec<String> = self
            .state
            .units
            .values()
            .filter(|unit| unit.view.is_alive() && !unit.view.path.is_empty())
            .map(|unit| unit.view.id.clone())
            .collect();
        for id in ids {
            self.advance_unit(&id);
        }
    }

    fn advance_unit(&mut self, unit_id: &str) {
        let Some(unit) = self.state.units.get(unit_id) else {
            return;
        };
        let budget = unit.view.speed * TICK_SECONDS;
        let mut path = unit.view.path.clone();
        let (x, y) = walk_path(&self.state, (unit.view.x, unit.view.y), &mut path, budget);

        let arrived = path.is_empty();
        let Some(unit) = self.state.units.get_mut(unit_id) else {
            return;
        };
        unit.view.x = x;
        unit.view.y = y;
        unit.view.path = path;
        let cell = unit.view.cell();
        if arrived {
            unit.view.status = UnitStatus::Idle;
            unit.view.x = cell.x as f32;
            unit.view.y = cell.y as f32;
        }
        self.spatial.update(unit_id, cell);
        if arrived {
            self.events.push(GameEvent::UnitArrived {
                unit_id: unit_id.to_string(),
                x: cell.x,
                y: cell.y,
            });
        }
    }

    fn invalidate_dirty_paths(&mut self) {
        if self.dirty_cells.is_empty() {
            return;
        }
        let dirty = std::mem::take(&mut self.dirty_cells);
        let affected: Vec<(String, Coord)> = self
            .state
            .units
            .values()
            .filter(|unit| unit.view.is_alive())
            .filter_map(|unit| {
                if unit.view.path.iter().any(|cell| dirty.contains(cell)) {
                    unit.view.path.back().map(|goal| (unit.view.id.clone(), *goal))
                } else if unit.view.path.is_empty() {
                    // a move that found no route is retried whenever terrain changes
                    unit.retry_goal.map(|goal| (unit.view.id.clone(), goal))
                } else {
                    None
                }
            })
            .collect();

        for (unit_id, goal) in affected {
            let replanned = self.plan_path(&unit_id, goal);
            let Some(unit) = self.state.units.get_mut(&unit_id) else {
                continue;
            };
            let ok = replanned.is_some();
            match replanned {
                Some(path) if !path.is_empty() => {
                    unit.view.path = path;
                    unit.view.status = UnitStatus::Moving;
                    unit.retry_goal = None;
                }
                Some(_) => {
                    unit.view.path.clear();
                    unit.view.status = UnitStatus::Idle;
                    unit.retry_goal = None;
                }
                None => {
                    unit.view.path.clear();
                    unit.view.status = UnitStatus::Idle;
                    unit.retry_goal = Some(goal);
                }
            }
            self.events.push(GameEvent::PathInvalidated {
                unit_id,
                replanned: ok,
            });
        }
    }

    pub(super) fn mark_dirty(&mut self, cell: Coord) {
        self.dirty_cells.insert(cell);
    }
}
