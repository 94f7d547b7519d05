//! Static world geometry and collision resolution.
//!
//! The environment owns the room's obstacle set: axis-aligned boxes,
//! oriented boxes (trench walls, shields, sandbag lines) and the outer
//! boundary. Movement goes through `resolve_circle_move`, which slides
//! along walls and guarantees a penetration-free result pose when the
//! input pose was penetration-free.
//!
//! Oriented boxes carry a tag and an optional owner id so breakable
//! hazards and placed abilities can remove exactly their boxes on
//! expiry. Troop line-of-sight and wall-contact tests use a filtered
//! view that ignores sandbag boxes: a breakable sandbag must not count
//! as a permanent wall.

use serde::{Deserialize, Serialize};

/// Axis-aligned box, min edges inclusive, max edges exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Aabb {
    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn from_center(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(x - w / 2.0, y - h / 2.0, x + w / 2.0, y + h / 2.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    pub fn intersects_circle(&self, x: f32, y: f32, r: f32) -> bool {
        let cx = x.clamp(self.min_x, self.max_x);
        let cy = y.clamp(self.min_y, self.max_y);
        let dx = x - cx;
        let dy = y - cy;
        dx * dx + dy * dy < r * r
    }

    /// Segment test via the slab method.
    pub fn intersects_segment(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> bool {
        let dx = x2 - x1;
        let dy = y2 - y1;
        let mut t_min = 0.0f32;
        let mut t_max = 1.0f32;

        for (start, delta, lo, hi) in [
            (x1, dx, self.min_x, self.max_x),
            (y1, dy, self.min_y, self.max_y),
        ] {
            if delta.abs() < 1e-6 {
                if start < lo || start > hi {
                    return false;
                }
            } else {
                let inv = 1.0 / delta;
                let mut t0 = (lo - start) * inv;
                let mut t1 = (hi - start) * inv;
                if t0 > t1 {
                    std::mem::swap(&mut t0, &mut t1);
                }
                t_min = t_min.max(t0);
                t_max = t_max.min(t1);
                if t_min > t_max {
                    return false;
                }
            }
        }
        true
    }
}

/// What an oriented box belongs to. `Sandbag` boxes are skipped by the
/// troop-facing filtered view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoxTag {
    Wall,
    Trench,
    Sandbag,
    Shield,
    Ability,
}

/// Rotated rectangle centered at (x, y).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrientedBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub angle: f32,
    pub tag: BoxTag,
    /// Back-reference to the hazard or ability that registered this box.
    pub owner: Option<String>,
}

impl OrientedBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32, angle: f32, tag: BoxTag) -> Self {
        Self {
            x,
            y,
            w,
            h,
            angle,
            tag,
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// World point into box-local coordinates.
    #[inline]
    fn to_local(&self, x: f32, y: f32) -> (f32, f32) {
        let dx = x - self.x;
        let dy = y - self.y;
        let (sin, cos) = (-self.angle).sin_cos();
        (dx * cos - dy * sin, dx * sin + dy * cos)
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        let (lx, ly) = self.to_local(x, y);
        lx.abs() <= self.w / 2.0 && ly.abs() <= self.h / 2.0
    }

    pub fn intersects_circle(&self, x: f32, y: f32, r: f32) -> bool {
        let (lx, ly) = self.to_local(x, y);
        let hw = self.w / 2.0;
        let hh = self.h / 2.0;
        let cx = lx.clamp(-hw, hw);
        let cy = ly.clamp(-hh, hh);
        let dx = lx - cx;
        let dy = ly - cy;
        dx * dx + dy * dy < r * r
    }

    pub fn intersects_segment(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> bool {
        let (lx1, ly1) = self.to_local(x1, y1);
        let (lx2, ly2) = self.to_local(x2, y2);
        let hw = self.w / 2.0;
        let hh = self.h / 2.0;
        Aabb::new(-hw, -hh, hw, hh).intersects_segment(lx1, ly1, lx2, ly2)
    }
}

/// Which geometry a query considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeomFilter {
    /// Everything solid.
    #[default]
    All,
    /// Skip sandbag-tagged oriented boxes (troop LOS / wall-contact).
    IgnoreSandbags,
}

impl GeomFilter {
    #[inline]
    fn admits(self, tag: BoxTag) -> bool {
        !(self == GeomFilter::IgnoreSandbags && tag == BoxTag::Sandbag)
    }
}

/// Result of a resolved circle move.
#[derive(Debug, Clone, Copy)]
pub struct MoveResult {
    pub x: f32,
    pub y: f32,
    /// Whether any wall was contacted during the move.
    pub collided: bool,
}

/// Maximum distance covered by one sub-step of the mover.
const SUBSTEP_LEN: f32 = 12.0;
/// Maximum sub-steps per resolved move.
const MAX_SUBSTEPS: usize = 8;

/// Static world geometry for one room.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    pub obstacles: Vec<Aabb>,
    pub oriented_boxes: Vec<OrientedBox>,
    pub boundary: Option<Aabb>,
    /// Circle kept clear of initial enemy population: (x, y, r).
    pub spawn_safe: Option<(f32, f32, f32)>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boundary(half_extent: f32) -> Self {
        Self {
            boundary: Some(Aabb::new(
                -half_extent,
                -half_extent,
                half_extent,
                half_extent,
            )),
            ..Self::default()
        }
    }

    pub fn add_obstacle(&mut self, aabb: Aabb) {
        self.obstacles.push(aabb);
    }

    /// Register an oriented box and return its index.
    pub fn add_oriented_box(&mut self, obb: OrientedBox) -> usize {
        self.oriented_boxes.push(obb);
        self.oriented_boxes.len() - 1
    }

    /// Remove the oriented box at `index`. Indices of later boxes shift
    /// down by one; callers that mirror indices must renormalize.
    pub fn remove_oriented_box(&mut self, index: usize) -> Option<OrientedBox> {
        if index < self.oriented_boxes.len() {
            Some(self.oriented_boxes.remove(index))
        } else {
            None
        }
    }

    /// Remove every oriented box owned by `owner`. Returns how many
    /// were removed.
    pub fn remove_boxes_owned_by(&mut self, owner: &str) -> usize {
        let before = self.oriented_boxes.len();
        self.oriented_boxes
            .retain(|b| b.owner.as_deref() != Some(owner));
        before - self.oriented_boxes.len()
    }

    /// Delete obstacles intersecting the listed gap areas. Used to
    /// carve doorways before defensive walls go in.
    pub fn clear_gap_areas(&mut self, gaps: &[Aabb]) {
        self.obstacles
            .retain(|o| !gaps.iter().any(|g| g.intersects(o)));
    }

    pub fn is_inside_bounds(&self, x: f32, y: f32, r: f32) -> bool {
        match &self.boundary {
            Some(b) => {
                x - r >= b.min_x && x + r <= b.max_x && y - r >= b.min_y && y + r <= b.max_y
            }
            None => true,
        }
    }

    pub fn circle_hits_any(&self, x: f32, y: f32, r: f32) -> bool {
        self.circle_hits_any_filtered(x, y, r, GeomFilter::All)
    }

    pub fn circle_hits_any_filtered(&self, x: f32, y: f32, r: f32, filter: GeomFilter) -> bool {
        if !self.is_inside_bounds(x, y, r) {
            return true;
        }
        if self.obstacles.iter().any(|o| o.intersects_circle(x, y, r)) {
            return true;
        }
        self.oriented_boxes
            .iter()
            .any(|b| filter.admits(b.tag) && b.intersects_circle(x, y, r))
    }

    pub fn line_hits_any(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> bool {
        self.line_hits_any_filtered(x1, y1, x2, y2, GeomFilter::All)
    }

    pub fn line_hits_any_filtered(
        &self,
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        filter: GeomFilter,
    ) -> bool {
        if self
            .obstacles
            .iter()
            .any(|o| o.intersects_segment(x1, y1, x2, y2))
        {
            return true;
        }
        self.oriented_boxes
            .iter()
            .any(|b| filter.admits(b.tag) && b.intersects_segment(x1, y1, x2, y2))
    }

    /// Integrate one displacement with slide-along-wall resolution.
    ///
    /// If the input pose is penetration-free, the returned pose is too:
    /// blocked axes are dropped rather than pushed through.
    pub fn resolve_circle_move(&self, x: f32, y: f32, r: f32, dx: f32, dy: f32) -> MoveResult {
        self.resolve_circle_move_filtered(x, y, r, dx, dy, GeomFilter::All)
    }

    pub fn resolve_circle_move_filtered(
        &self,
        x: f32,
        y: f32,
        r: f32,
        dx: f32,
        dy: f32,
        filter: GeomFilter,
    ) -> MoveResult {
        let nx = x + dx;
        let ny = y + dy;
        if !self.circle_hits_any_filtered(nx, ny, r, filter) {
            return MoveResult {
                x: nx,
                y: ny,
                collided: false,
            };
        }
        // Slide: keep whichever axis stays clear.
        if dx.abs() > 1e-6 && !self.circle_hits_any_filtered(nx, y, r, filter) {
            return MoveResult {
                x: nx,
                y,
                collided: true,
            };
        }
        if dy.abs() > 1e-6 && !self.circle_hits_any_filtered(x, ny, r, filter) {
            return MoveResult {
                x,
                y: ny,
                collided: true,
            };
        }
        MoveResult {
            x,
            y,
            collided: true,
        }
    }

    /// Resolve a displacement in sub-steps so fast movers cannot tunnel
    /// and slides never pop more than one sub-step of distance.
    pub fn move_circle(&self, x: f32, y: f32, r: f32, dx: f32, dy: f32) -> MoveResult {
        self.move_circle_filtered(x, y, r, dx, dy, GeomFilter::All)
    }

    pub fn move_circle_filtered(
        &self,
        x: f32,
        y: f32,
        r: f32,
        dx: f32,
        dy: f32,
        filter: GeomFilter,
    ) -> MoveResult {
        let len = (dx * dx + dy * dy).sqrt();
        if len < 1e-6 {
            return MoveResult {
                x,
                y,
                collided: false,
            };
        }
        let steps = ((len / SUBSTEP_LEN).ceil() as usize).clamp(1, MAX_SUBSTEPS);
        let sx = dx / steps as f32;
        let sy = dy / steps as f32;

        let mut cx = x;
        let mut cy = y;
        let mut collided = false;
        for _ in 0..steps {
            let step = self.resolve_circle_move_filtered(cx, cy, r, sx, sy, filter);
            collided |= step.collided;
            let moved = (step.x - cx).abs() + (step.y - cy).abs();
            cx = step.x;
            cy = step.y;
            if step.collided && moved < 1e-4 {
                break; // fully blocked, no point burning the remaining steps
            }
        }
        MoveResult {
            x: cx,
            y: cy,
            collided,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walled_env() -> Environment {
        let mut env = Environment::with_boundary(1000.0);
        env.add_obstacle(Aabb::new(100.0, -50.0, 120.0, 50.0));
        env
    }

    #[test]
    fn test_circle_vs_aabb() {
        let env = walled_env();
        assert!(env.circle_hits_any(95.0, 0.0, 10.0));
        assert!(!env.circle_hits_any(80.0, 0.0, 10.0));
    }

    #[test]
    fn test_line_vs_aabb() {
        let env = walled_env();
        assert!(env.line_hits_any(0.0, 0.0, 200.0, 0.0));
        assert!(!env.line_hits_any(0.0, 100.0, 200.0, 100.0));
    }

    #[test]
    fn test_oriented_box_rotated() {
        let mut env = Environment::new();
        // 200x20 box rotated 90 degrees: occupies x in [-10,10], y in [-100,100]
        env.add_oriented_box(OrientedBox::new(
            0.0,
            0.0,
            200.0,
            20.0,
            std::f32::consts::FRAC_PI_2,
            BoxTag::Wall,
        ));
        assert!(env.circle_hits_any(0.0, 80.0, 5.0));
        assert!(!env.circle_hits_any(40.0, 0.0, 5.0));
        assert!(env.line_hits_any(-50.0, 50.0, 50.0, 50.0));
        assert!(!env.line_hits_any(20.0, -120.0, 60.0, -120.0));
    }

    #[test]
    fn test_sandbag_filter() {
        let mut env = Environment::new();
        env.add_oriented_box(OrientedBox::new(0.0, 0.0, 60.0, 20.0, 0.0, BoxTag::Sandbag));
        assert!(env.circle_hits_any(0.0, 0.0, 10.0));
        assert!(!env.circle_hits_any_filtered(0.0, 0.0, 10.0, GeomFilter::IgnoreSandbags));
        assert!(env.line_hits_any(-50.0, 0.0, 50.0, 0.0));
        assert!(!env.line_hits_any_filtered(-50.0, 0.0, 50.0, 0.0, GeomFilter::IgnoreSandbags));
    }

    #[test]
    fn test_resolve_slides_along_wall() {
        let env = walled_env();
        // Moving diagonally into the wall from the left: x is blocked,
        // y keeps sliding.
        let res = env.resolve_circle_move(85.0, 0.0, 10.0, 20.0, 15.0);
        assert!(res.collided);
        assert!((res.x - 85.0).abs() < 1e-3);
        assert!((res.y - 15.0).abs() < 1e-3);
    }

    #[test]
    fn test_resolve_is_penetration_free() {
        let env = walled_env();
        let res = env.move_circle(60.0, 0.0, 10.0, 200.0, 0.0);
        assert!(res.collided);
        assert!(!env.circle_hits_any(res.x, res.y, 10.0));
    }

    #[test]
    fn test_boundary_blocks() {
        let env = Environment::with_boundary(100.0);
        assert!(!env.is_inside_bounds(95.0, 0.0, 10.0));
        let res = env.move_circle(80.0, 0.0, 10.0, 50.0, 0.0);
        assert!(res.collided);
        assert!(res.x + 10.0 <= 100.0 + 1e-3);
    }

    #[test]
    fn test_clear_gap_areas_carves_doorway() {
        let mut env = Environment::new();
        env.add_obstacle(Aabb::new(0.0, 0.0, 40.0, 40.0));
        env.add_obstacle(Aabb::new(0.0, 100.0, 40.0, 140.0));
        env.clear_gap_areas(&[Aabb::new(-10.0, -10.0, 50.0, 50.0)]);
        assert_eq!(env.obstacles.len(), 1);
        assert_eq!(env.obstacles[0].min_y, 100.0);
    }

    #[test]
    fn test_owned_box_removal() {
        let mut env = Environment::new();
        env.add_oriented_box(
            OrientedBox::new(0.0, 0.0, 10.0, 10.0, 0.0, BoxTag::Ability).with_owner("ability_1"),
        );
        env.add_oriented_box(OrientedBox::new(50.0, 0.0, 10.0, 10.0, 0.0, BoxTag::Wall));
        assert_eq!(env.remove_boxes_owned_by("ability_1"), 1);
        assert_eq!(env.oriented_boxes.len(), 1);
        assert_eq!(env.oriented_boxes[0].tag, BoxTag::Wall);
    }
}
