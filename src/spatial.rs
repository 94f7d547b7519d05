//! Spatial partitioning for efficient neighbor queries.
//!
//! Uniform cells keyed by integer coordinates; entries carry entity ids
//! rather than pointers, so callers resolve hits through the room's
//! entity tables. Cell membership is updated in place when an entity
//! moves, and min edges are inclusive while max edges are exclusive
//! (`floor` bucketing gives both for free).

use std::collections::HashMap;

/// Default cell size in world units.
pub const CELL_SIZE: f32 = 128.0;

/// What kind of body an entry refers to. Used by callers to filter
/// query results without resolving ids first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Player,
    Enemy,
    Troop,
    Chest,
    Npc,
    Hazard,
}

/// Entry in a spatial cell.
#[derive(Debug, Clone)]
pub struct SpatialEntry {
    pub id: String,
    pub kind: BodyKind,
    pub x: f32,
    pub y: f32,
}

/// Grid-based spatial index. All operations are total.
#[derive(Debug)]
pub struct SpatialGrid {
    pub cell_size: f32,
    cells: HashMap<(i32, i32), Vec<SpatialEntry>>,
    /// Reverse lookup: id to current cell.
    id_cells: HashMap<String, (i32, i32)>,
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(CELL_SIZE)
    }
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
            id_cells: HashMap::new(),
        }
    }

    #[inline]
    pub fn world_to_cell(&self, x: f32, y: f32) -> (i32, i32) {
        (
            (x / self.cell_size).floor() as i32,
            (y / self.cell_size).floor() as i32,
        )
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.id_cells.clear();
    }

    /// Insert an entity, or reposition it if already present.
    pub fn insert(&mut self, id: &str, kind: BodyKind, x: f32, y: f32) {
        let cell = self.world_to_cell(x, y);

        if let Some(&old_cell) = self.id_cells.get(id) {
            if old_cell == cell {
                // Same cell: update coordinates in place.
                if let Some(entries) = self.cells.get_mut(&cell) {
                    if let Some(e) = entries.iter_mut().find(|e| e.id == id) {
                        e.x = x;
                        e.y = y;
                        return;
                    }
                }
            } else if let Some(entries) = self.cells.get_mut(&old_cell) {
                entries.retain(|e| e.id != id);
            }
        }

        self.cells.entry(cell).or_default().push(SpatialEntry {
            id: id.to_string(),
            kind,
            x,
            y,
        });
        self.id_cells.insert(id.to_string(), cell);
    }

    /// Update an entity's position after a move. No-op if the id was
    /// never inserted.
    pub fn update(&mut self, id: &str, kind: BodyKind, x: f32, y: f32) {
        if self.id_cells.contains_key(id) {
            self.insert(id, kind, x, y);
        }
    }

    pub fn remove(&mut self, id: &str) {
        if let Some(cell) = self.id_cells.remove(id) {
            if let Some(entries) = self.cells.get_mut(&cell) {
                entries.retain(|e| e.id != id);
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.id_cells.contains_key(id)
    }

    /// All entries within `radius` of a point, closest first. Distance
    /// ties break by id so iteration order is reproducible.
    pub fn query_circle(&self, x: f32, y: f32, radius: f32) -> Vec<SpatialEntry> {
        let radius_sq = radius * radius;
        let reach = (radius / self.cell_size).ceil() as i32 + 1;
        let center = self.world_to_cell(x, y);

        let mut results = Vec::new();
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                let cell = (center.0 + dx, center.1 + dy);
                if let Some(entries) = self.cells.get(&cell) {
                    for entry in entries {
                        let dist_sq = (entry.x - x).powi(2) + (entry.y - y).powi(2);
                        if dist_sq <= radius_sq {
                            results.push(entry.clone());
                        }
                    }
                }
            }
        }

        results.sort_by(|a, b| {
            let da = (a.x - x).powi(2) + (a.y - y).powi(2);
            let db = (b.x - x).powi(2) + (b.y - y).powi(2);
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results
    }

    /// All entries inside `[min_x, max_x) x [min_y, max_y)`.
    pub fn query_aabb(&self, min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Vec<SpatialEntry> {
        let lo = self.world_to_cell(min_x, min_y);
        let hi = self.world_to_cell(max_x, max_y);

        let mut results = Vec::new();
        for cx in lo.0..=hi.0 {
            for cy in lo.1..=hi.1 {
                if let Some(entries) = self.cells.get(&(cx, cy)) {
                    for entry in entries {
                        if entry.x >= min_x && entry.x < max_x && entry.y >= min_y && entry.y < max_y
                        {
                            results.push(entry.clone());
                        }
                    }
                }
            }
        }
        results.sort_by(|a, b| a.id.cmp(&b.id));
        results
    }

    /// Circle query restricted to one body kind.
    pub fn query_circle_kind(
        &self,
        x: f32,
        y: f32,
        radius: f32,
        kind: BodyKind,
    ) -> Vec<SpatialEntry> {
        let mut results = self.query_circle(x, y, radius);
        results.retain(|e| e.kind == kind);
        results
    }

    /// Nearest entry of a given kind, if any lies within `max_radius`.
    pub fn nearest_of_kind(
        &self,
        x: f32,
        y: f32,
        max_radius: f32,
        kind: BodyKind,
    ) -> Option<SpatialEntry> {
        self.query_circle_kind(x, y, max_radius, kind)
            .into_iter()
            .next()
    }

    pub fn total_count(&self) -> usize {
        self.id_cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_query() {
        let mut grid = SpatialGrid::new(128.0);
        grid.insert("e1", BodyKind::Enemy, 10.0, 10.0);
        grid.insert("e2", BodyKind::Enemy, 100.0, 10.0);
        grid.insert("p1", BodyKind::Player, 900.0, 900.0);

        let near = grid.query_circle(10.0, 10.0, 150.0);
        assert_eq!(near.len(), 2);
        assert_eq!(near[0].id, "e1"); // closest first

        let near = grid.query_circle(900.0, 900.0, 50.0);
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].kind, BodyKind::Player);
    }

    #[test]
    fn test_move_updates_cell_membership() {
        let mut grid = SpatialGrid::new(128.0);
        grid.insert("e1", BodyKind::Enemy, 10.0, 10.0);
        grid.update("e1", BodyKind::Enemy, 1000.0, 1000.0);

        assert!(grid.query_circle(10.0, 10.0, 100.0).is_empty());
        assert_eq!(grid.query_circle(1000.0, 1000.0, 10.0).len(), 1);
        assert_eq!(grid.total_count(), 1);
    }

    #[test]
    fn test_update_ignores_unknown_id() {
        let mut grid = SpatialGrid::new(128.0);
        grid.update("ghost", BodyKind::Enemy, 5.0, 5.0);
        assert_eq!(grid.total_count(), 0);
    }

    #[test]
    fn test_remove() {
        let mut grid = SpatialGrid::new(128.0);
        grid.insert("e1", BodyKind::Enemy, 10.0, 10.0);
        grid.remove("e1");
        assert!(!grid.contains("e1"));
        assert!(grid.query_circle(10.0, 10.0, 50.0).is_empty());
    }

    #[test]
    fn test_aabb_edges_min_inclusive_max_exclusive() {
        let mut grid = SpatialGrid::new(128.0);
        grid.insert("on_min", BodyKind::Enemy, 0.0, 0.0);
        grid.insert("on_max", BodyKind::Enemy, 256.0, 0.0);
        grid.insert("inside", BodyKind::Enemy, 128.0, 64.0);

        let hits = grid.query_aabb(0.0, 0.0, 256.0, 128.0);
        let ids: Vec<_> = hits.iter().map(|e| e.id.as_str()).collect();
        assert!(ids.contains(&"on_min"));
        assert!(ids.contains(&"inside"));
        assert!(!ids.contains(&"on_max"));
    }

    #[test]
    fn test_kind_filter() {
        let mut grid = SpatialGrid::new(128.0);
        grid.insert("e1", BodyKind::Enemy, 0.0, 0.0);
        grid.insert("t1", BodyKind::Troop, 20.0, 0.0);
        grid.insert("t2", BodyKind::Troop, 40.0, 0.0);

        let troops = grid.query_circle_kind(0.0, 0.0, 100.0, BodyKind::Troop);
        assert_eq!(troops.len(), 2);
        assert_eq!(troops[0].id, "t1"); // nearest troop

        let nearest = grid.nearest_of_kind(0.0, 0.0, 100.0, BodyKind::Enemy).unwrap();
        assert_eq!(nearest.id, "e1");
    }
}
