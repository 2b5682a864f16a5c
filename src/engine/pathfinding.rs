use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use crate::types::Coord;
use crate::world::GameState;

pub trait Terrain {
    fn in_bounds(&self, cell: Coord) -> bool;
    fn terrain_cost(&self, cell: Coord) -> u32;
}

impl Terrain for GameState {
    fn in_bounds(&self, cell: Coord) -> bool {
        GameState::in_bounds(self, cell)
    }

    fn terrain_cost(&self, cell: Coord) -> u32 {
        GameState::terrain_cost(self, cell)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct OpenEntry {
    f_score: u32,
    seq: u64,
    cell: Coord,
}

impl Ord for OpenEntry {
    // Min-heap on f, FIFO among equal f.
    fn cmp(&self, other: &Self) -> Ordering {
        Reverse((self.f_score, self.seq)).cmp(&Reverse((other.f_score, other.seq)))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A* over the grid with terrain weights. The returned path excludes `start`
/// and ends at `goal`; `None` means no path exists.
pub fn find_path<T: Terrain + ?Sized>(
    state: &T,
    start: Coord,
    goal: Coord,
    blocked: &HashSet<Coord>,
) -> Option<VecDeque<Coord>> {
    if !state.in_bounds(start) || !state.in_bounds(goal) || blocked.contains(&goal) {
        return None;
    }
    if start == goal {
        return Some(VecDeque::new());
    }

    let mut open = BinaryHeap::new();
    let mut g_score: HashMap<Coord, u32> = HashMap::new();
    let mut came_from: HashMap<Coord, Coord> = HashMap::new();
    let mut closed: HashSet<Coord> = HashSet::new();
    let mut seq = 0u64;

    g_score.insert(start, 0);
    open.push(OpenEntry {
        f_score: heuristic(start, goal),
        seq,
        cell: start,
    });

    while let Some(OpenEntry { cell, .. }) = open.pop() {
        if cell == goal {
            return Some(reconstruct(&came_from, start, goal));
        }
        if !closed.insert(cell) {
            continue;
        }
        let current_g = g_score.get(&cell).copied().unwrap_or(u32::MAX);

        for next in cell.neighbors4() {
            if !state.in_bounds(next) || closed.contains(&next) || blocked.contains(&next) {
                continue;
            }
            let tentative = current_g.saturating_add(state.terrain_cost(next));
            if tentative >= g_score.get(&next).copied().unwrap_or(u32::MAX) {
                continue;
            }
            g_score.insert(next, tentative);
            came_from.insert(next, cell);
            seq += 1;
            open.push(OpenEntry {
                f_score: tentative.saturating_add(heuristic(next, goal)),
                seq,
                cell: next,
            });
        }
    }
    None
}

pub fn path_cost<T: Terrain + ?Sized>(state: &T, path: &VecDeque<Coord>) -> u32 {
    path.iter().map(|cell| state.terrain_cost(*cell)).sum()
}

fn heuristic(from: Coord, to: Coord) -> u32 {
    from.manhattan(to).unsigned_abs()
}

fn reconstruct(came_from: &HashMap<Coord, Coord>, start: Coord, goal: Coord) -> VecDeque<Coord> {
    let mut path = VecDeque::new();
    let mut current = goal;
    while current != start {
        path.push_front(current);
        match came_from.get(&current) {
            Some(prev) => current = *prev,
            None => break,
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TileType;

    fn corridor(marsh_at: Option<Coord>) -> GameState {
        let mut state = GameState::empty(6, 1);
        if let Some(cell) = marsh_at {
            state.insert_tile(cell, TileType::Marsh, None);
        }
        state
    }

    #[test]
    fn marsh_cell_makes_straight_path_cost_more() {
        let plain = corridor(None);
        let marshy = corridor(Some(Coord::new(3, 0)));
        let start = Coord::new(0, 0);
        let goal = Coord::new(5, 0);

        let plain_path = find_path(&plain, start, goal, &HashSet::new()).expect("plain path");
        let marsh_path = find_path(&marshy, start, goal, &HashSet::new()).expect("marsh path");

        assert_eq!(plain_path.len(), 5);
        assert_eq!(marsh_path.len(), 5);
        assert_eq!(path_cost(&plain, &plain_path), 5);
        assert_eq!(path_cost(&marshy, &marsh_path), 6);
        assert!(path_cost(&marshy, &marsh_path) > path_cost(&plain, &plain_path));
    }

    #[test]
    fn detours_around_marsh_when_cheaper() {
        let mut state = GameState::empty(5, 3);
        for x in 1..4 {
            state.insert_tile(Coord::new(x, 1), TileType::Marsh, None);
        }
        let path = find_path(&state, Coord::new(0, 1), Coord::new(4, 1), &HashSet::new())
            .expect("path");
        // Through the marsh row: 2+2+2+1 = 7. Around it: 6 plain steps.
        assert_eq!(path_cost(&state, &path), 6);
        assert!(path.iter().all(|cell| cell.y != 1 || cell.x == 4));
    }

    #[test]
    fn blocked_goal_or_walled_off_goal_is_not_found() {
        let state = GameState::empty(5, 5);
        let mut blocked = HashSet::new();
        blocked.insert(Coord::new(4, 4));
        assert!(find_path(&state, Coord::new(0, 0), Coord::new(4, 4), &blocked).is_none());

        let wall: HashSet<Coord> = (0..5).map(|y| Coord::new(2, y)).collect();
        assert!(find_path(&state, Coord::new(0, 0), Coord::new(4, 0), &wall).is_none());
    }

    #[test]
    fn out_of_bounds_goal_is_not_found_and_same_cell_is_empty() {
        let state = GameState::empty(3, 3);
        assert!(find_path(&state, Coord::new(0, 0), Coord::new(3, 0), &HashSet::new()).is_none());
        let path = find_path(&state, Coord::new(1, 1), Coord::new(1, 1), &HashSet::new())
            .expect("trivial path");
        assert!(path.is_empty());
    }

    #[test]
    fn equal_cost_ties_resolve_deterministically() {
        let state = GameState::empty(4, 4);
        let first = find_path(&state, Coord::new(0, 0), Coord::new(3, 3), &HashSet::new());
        let second = find_path(&state, Coord::new(0, 0), Coord::new(3, 3), &HashSet::new());
        assert_eq!(first, second);
        assert_eq!(first.map(|path| path.len()), Some(6));
    }
}
