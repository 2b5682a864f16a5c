use std::collections::{BTreeSet, HashMap};

use crate::types::Coord;

#[derive(Clone, Debug)]
pub struct SpatialIndex {
    bucket_size: i32,
    buckets: HashMap<(i32, i32), BTreeSet<String>>,
    cells: HashMap<String, Coord>,
}

impl SpatialIndex {
    pub fn new(bucket_size: i32) -> Self {
        Self {
            bucket_size: bucket_size.max(1),
            buckets: HashMap::new(),
            cells: HashMap::new(),
        }
    }

    fn bucket_of(&self, cell: Coord) -> (i32, i32) {
        (
            cell.x.div_euclid(self.bucket_size),
            cell.y.div_euclid(self.bucket_size),
        )
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, unit_id: &str) -> bool {
        self.cells.contains_key(unit_id)
    }

    pub fn cell_of(&self, unit_id: &str) -> Option<Coord> {
        self.cells.get(unit_id).copied()
    }

    pub fn ids(&self) -> BTreeSet<String> {
        self.cells.keys().cloned().collect()
    }

    pub fn insert(&mut self, unit_id: &str, cell: Coord) {
        self.remove(unit_id);
        let bucket = self.bucket_of(cell);
        self.buckets
            .entry(bucket)
            .or_default()
            .insert(unit_id.to_string());
        self.cells.insert(unit_id.to_string(), cell);
    }

    pub fn update(&mut self, unit_id: &str, cell: Coord) -> bool {
        if self.cells.get(unit_id) == Some(&cell) {
            return false;
        }
        self.insert(unit_id, cell);
        true
    }

    pub fn remove(&mut self, unit_id: &str) -> bool {
        let Some(cell) = self.cells.remove(unit_id) else {
            return false;
        };
        let bucket = self.bucket_of(cell);
        if let Some(ids) = self.buckets.get_mut(&bucket) {
            ids.remove(unit_id);
            if ids.is_empty() {
                self.buckets.remove(&bucket);
            }
        }
        true
    }

    pub fn query_radius(&self, center: Coord, radius: i32) -> Vec<String> {
        let radius = radius.max(0);
        let (min_bx, min_by) = self.bucket_of(Coord::new(center.x - radius, center.y - radius));
        let (max_bx, max_by) = self.bucket_of(Coord::new(center.x + radius, center.y + radius));
        let mut found = BTreeSet::new();
        for by in min_by..=max_by {
            for bx in min_bx..=max_bx {
                let Some(ids) = self.buckets.get(&(bx, by)) else {
                    continue;
                };
                for id in ids {
                    let in_range = self
                        .cells
                        .get(id)
                        .map(|cell| cell.manhattan(center) <= radius)
                        .unwrap_or(false);
                    if in_range {
                        found.insert(id.clone());
                    }
                }
            }
        }
        found.into_iter().collect()
    }
}
