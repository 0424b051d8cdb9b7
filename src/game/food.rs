use std::collections::{BTreeMap, HashMap};
use std::f64::consts::TAU;
use std::fmt;

use rand::Rng;
use serde::Serialize;

use crate::config::GameConfig;
use crate::game::physics::{Arena, Point};
use crate::game::spatial::{CellKey, SpatialHash};

const COLORS: [&str; 10] = [
    "#FF6384", "#36A2EB", "#FFCE56", "#4BC0C0", "#9966FF",
    "#FF9F40", "#E7E9ED", "#7CB342", "#F06292", "#4DD0E1",
];

/// Value of each piece laid down once the anchors of a dead body run out.
const LEFTOVER_PIECE_VALUE: u64 = 1;
/// Randomisation band around the even share of a death piece.
const PIECE_JITTER: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FoodId(pub u64);

impl fmt::Display for FoodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Food {
    pub id: FoodId,
    pub pos: Point,
    pub value: u32,
    // Presentation only.
    pub color: &'static str,
    pub big: bool,
    pub phase: f64,
    pub born_tick: u64,
}

/// Cosmetic overrides for [`FoodRegistry::spawn_at`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FoodStyle {
    pub color: Option<&'static str>,
    pub phase: Option<f64>,
}

pub struct FoodRegistry {
    arena: Arena,
    big_food_value: u32,
    foods: BTreeMap<FoodId, Food>,
    cells: HashMap<FoodId, CellKey>,
    index: SpatialHash<FoodId>,
    next_id: u64,
    tick: u64,
}

impl FoodRegistry {
    pub fn new(cfg: &GameConfig) -> Self {
        FoodRegistry {
            arena: Arena::from_config(cfg),
            big_food_value: cfg.big_food_value,
            foods: BTreeMap::new(),
            cells: HashMap::new(),
            index: SpatialHash::new(cfg.cell_size),
            next_id: 1,
            tick: 0,
        }
    }

    pub fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    pub fn len(&self) -> usize {
        self.foods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.foods.is_empty()
    }

    pub fn get(&self, id: FoodId) -> Option<&Food> {
        self.foods.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Food> {
        self.foods.values()
    }

    pub fn total_value(&self) -> u64 {
        self.foods.values().map(|f| f.value as u64).sum()
    }

    pub fn spawn_random<R: Rng>(&mut self, rng: &mut R) -> FoodId {
        let p = self.arena.random_point(rng);
        self.spawn_at(p.x, p.y, 1, FoodStyle::default(), rng)
    }

    /// Places food at (x, y), pulled back inside the arena if needed.
    pub fn spawn_at<R: Rng>(
        &mut self,
        x: f64,
        y: f64,
        value: u32,
        style: FoodStyle,
        rng: &mut R,
    ) -> FoodId {
        let pos = self.arena.project(Point::new(x, y), 0.0);
        let id = FoodId(self.next_id);
        self.next_id += 1;

        let food = Food {
            id,
            pos,
            value,
            color: style
                .color
                .unwrap_or_else(|| COLORS[rng.gen_range(0..COLORS.len())]),
            big: value >= self.big_food_value,
            phase: style.phase.unwrap_or_else(|| rng.gen_range(0.0..TAU)),
            born_tick: self.tick,
        };
        let key = self.index.insert(id, pos.x, pos.y);
        self.cells.insert(id, key);
        self.foods.insert(id, food);
        id
    }

    pub fn consume(&mut self, id: FoodId) -> Option<Food> {
        let food = self.foods.remove(&id)?;
        if let Some(key) = self.cells.remove(&id) {
            self.index.remove(id, key);
        }
        Some(food)
    }

    /// Broad-phase candidates around (x, y) in id order. May contain food
    /// farther than `r`.
    pub fn query(&self, x: f64, y: f64, r: f64) -> Vec<FoodId> {
        let mut ids: Vec<FoodId> = self.index.query_circle(x, y, r).into_iter().collect();
        ids.sort_unstable();
        ids
    }

    /// Turns a dead body into food worth exactly `total`.
    ///
    /// The body path (oldest first) is resampled every `anchor_spacing`
    /// units. Pieces of roughly `chunk_value` are laid from the head end
    /// backwards; whatever is left when the anchors run out is laid in
    /// single-value pieces cycling over the anchors. An empty path falls
    /// back to `fallback` as the only anchor.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_remains<R: Rng>(
        &mut self,
        path: &[Point],
        fallback: Point,
        total: u64,
        chunk_value: u32,
        anchor_spacing: f64,
        jitter: f64,
        rng: &mut R,
    ) -> Vec<FoodId> {
        let mut spawned = Vec::new();
        if total == 0 {
            return spawned;
        }
        let mut anchors = resample(path, anchor_spacing);
        if anchors.is_empty() {
            anchors.push(fallback);
        }

        let pieces = total.div_ceil(chunk_value.max(1) as u64) as usize;
        let stride = (anchors.len() / pieces).max(1);
        let mut remaining = total;
        let mut pieces_left = pieces;
        let mut cursor = Some(anchors.len() - 1);

        while let Some(i) = cursor {
            if remaining == 0 || pieces_left == 0 {
                break;
            }
            let share = remaining as f64 / pieces_left as f64;
            let scaled = share * rng.gen_range(1.0 - PIECE_JITTER..=1.0 + PIECE_JITTER);
            let value = piece_value(scaled, remaining);
            spawned.push(self.spawn_piece(anchors[i], value, jitter, rng));
            remaining -= u64::from(value);
            pieces_left -= 1;
            cursor = i.checked_sub(stride);
        }

        let mut i = 0usize;
        while remaining > 0 {
            let anchor = anchors[anchors.len() - 1 - i % anchors.len()];
            let value = piece_value(LEFTOVER_PIECE_VALUE as f64, remaining);
            spawned.push(self.spawn_piece(anchor, value, jitter, rng));
            remaining -= u64::from(value);
            i += 1;
        }
        spawned
    }

    fn spawn_piece<R: Rng>(&mut self, anchor: Point, value: u32, jitter: f64, rng: &mut R) -> FoodId {
        let (dx, dy) = if jitter > 0.0 {
            let a = rng.gen_range(0.0..TAU);
            let d = rng.gen_range(0.0..jitter);
            (a.cos() * d, a.sin() * d)
        } else {
            (0.0, 0.0)
        };
        self.spawn_at(anchor.x + dx, anchor.y + dy, value, FoodStyle::default(), rng)
    }
}

/// Rounds a piece's share to a value in `[1, remaining]` that a single
/// food item can hold. What is subtracted is exactly what gets spawned.
fn piece_value(share: f64, remaining: u64) -> u32 {
    let cap = remaining.min(u64::from(u32::MAX));
    let value = (share.round() as u64).clamp(1, cap);
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Evenly spaced points along a polyline, starting at its first point.
pub fn resample(path: &[Point], spacing: f64) -> Vec<Point> {
    let Some(&first) = path.first() else {
        return Vec::new();
    };
    let mut out = vec![first];
    if spacing <= 0.0 {
        return out;
    }
    let mut since_last = 0.0;
    for w in path.windows(2) {
        let (a, b) = (w[0], w[1]);
        let seg = a.distance(b);
        if seg <= 0.0 {
            continue;
        }
        let mut along = spacing - since_last;
        while along <= seg {
            out.push(a.lerp(b, along / seg));
            along += spacing;
        }
        since_last = seg - (along - spacing);
    }
    out
}
