use std::f64::consts::{PI, TAU};

use rand::Rng;
use serde::Serialize;

use crate::config::GameConfig;

const HEAD_GROWTH_CAP: f64 = 12.0;
const HEAD_GROWTH_SCALE: f64 = 0.3;
const BODY_GROWTH_CAP: f64 = 10.0;
const BODY_GROWTH_SCALE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn dist2(&self, other: Point) -> f64 {
        dist2(self.x, self.y, other.x, other.y)
    }

    pub fn distance(&self, other: Point) -> f64 {
        self.dist2(other).sqrt()
    }

    /// Point `t` of the way from `self` to `other`.
    pub fn lerp(&self, other: Point, t: f64) -> Point {
        Point {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }
}

pub fn dist2(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    let dx = x2 - x1;
    let dy = y2 - y1;
    dx * dx + dy * dy
}

/// Circular play field.
#[derive(Debug, Clone, Copy)]
pub struct Arena {
    pub center: Point,
    pub radius: f64,
}

impl Arena {
    pub fn from_config(cfg: &GameConfig) -> Self {
        Arena {
            center: Point::new(cfg.width / 2.0, cfg.height / 2.0),
            radius: cfg.width.min(cfg.height) / 2.0,
        }
    }

    /// Radially clamps `p` onto the circle of radius `radius - margin`.
    /// Points already inside are returned unchanged.
    pub fn project(&self, p: Point, margin: f64) -> Point {
        let limit = (self.radius - margin).max(0.0);
        let dx = p.x - self.center.x;
        let dy = p.y - self.center.y;
        let d = (dx * dx + dy * dy).sqrt();
        if d <= limit || d == 0.0 {
            return p;
        }
        let scale = limit / d;
        Point::new(self.center.x + dx * scale, self.center.y + dy * scale)
    }

    pub fn contains(&self, p: Point) -> bool {
        p.dist2(self.center) <= self.radius * self.radius
    }

    /// Uniformly distributed point inside the arena disc.
    pub fn random_point<R: Rng>(&self, rng: &mut R) -> Point {
        let r = self.radius * rng.gen::<f64>().sqrt();
        let theta = rng.gen_range(0.0..TAU);
        Point::new(
            self.center.x + r * theta.cos(),
            self.center.y + r * theta.sin(),
        )
    }
}

/// Wraps an angle into (-PI, PI].
pub fn normalize_angle(a: f64) -> f64 {
    let mut a = a % TAU;
    if a <= -PI {
        a += TAU;
    } else if a > PI {
        a -= TAU;
    }
    a
}

/// Rotates `angle` toward `target` along the shorter arc by at most `max_step`.
pub fn turn_toward(angle: f64, target: f64, max_step: f64) -> f64 {
    let max_step = max_step.max(0.0);
    let diff = normalize_angle(target - angle);
    normalize_angle(angle + diff.clamp(-max_step, max_step))
}

/// Speed multiplier in (min_speed_factor, 1]; shrinks as length grows past base.
pub fn speed_factor(length: f64, cfg: &GameConfig) -> f64 {
    let growth = (length - cfg.base_length).max(0.0);
    let falloff = (1.0 / (1.0 + growth / cfg.speed_soft_cap)).powf(cfg.speed_exponent);
    cfg.min_speed_factor + (1.0 - cfg.min_speed_factor) * falloff
}

pub fn speed_for(length: f64, boosting: bool, cfg: &GameConfig) -> f64 {
    let speed = cfg.base_speed * speed_factor(length, cfg);
    if boosting {
        speed * cfg.boost_multiplier
    } else {
        speed
    }
}

pub fn head_radius(length: f64, cfg: &GameConfig) -> f64 {
    cfg.head_radius + (length.max(0.0).sqrt() * HEAD_GROWTH_SCALE).min(HEAD_GROWTH_CAP)
}

pub fn body_radius(length: f64, cfg: &GameConfig) -> f64 {
    cfg.body_radius + (length.max(0.0).sqrt() * BODY_GROWTH_SCALE).min(BODY_GROWTH_CAP)
}
