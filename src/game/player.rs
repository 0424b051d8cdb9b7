use std::collections::VecDeque;
use std::fmt;
use std::sync::Weak;
use std::time::Instant;

use serde::Serialize;
use tracing::trace;

use crate::config::GameConfig;
use crate::game::outbound::Connection;
use crate::game::physics::{self, Arena, Point};
use crate::game::spatial::CellKey;
use crate::protocol::messages::ServerMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Steering request; absent fields leave the current setting alone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerInput {
    pub angle: Option<f64>,
    pub boost: Option<bool>,
}

/// Trailing polyline, oldest point first. `length` is the summed length of
/// its segments; `carry` is the distance the head has travelled since the
/// newest point was recorded.
#[derive(Debug, Clone, Default)]
pub struct Tail {
    points: VecDeque<Point>,
    length: f64,
    carry: f64,
}

impl Tail {
    pub fn new(head: Point) -> Self {
        let mut points = VecDeque::new();
        points.push_back(head);
        Tail {
            points,
            length: 0.0,
            carry: 0.0,
        }
    }

    pub fn points(&self) -> &VecDeque<Point> {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn carry(&self) -> f64 {
        self.carry
    }

    pub fn oldest(&self) -> Option<Point> {
        self.points.front().copied()
    }

    fn push(&mut self, p: Point) {
        if let Some(last) = self.points.back() {
            self.length += last.distance(p);
        }
        self.points.push_back(p);
    }

    /// Records the head's move from `from` to `to`, laying a point every
    /// `spacing` units of travel and keeping the remainder in `carry`.
    pub fn record(&mut self, from: Point, to: Point, spacing: f64) {
        if self.points.is_empty() {
            self.points.push_back(from);
            self.carry = 0.0;
        }
        let d = from.distance(to);
        if d <= 0.0 {
            return;
        }
        let mut along = spacing - self.carry;
        while along <= d {
            self.push(from.lerp(to, along / d));
            along += spacing;
        }
        self.carry = d - (along - spacing);
    }

    /// Drops length from the oldest end until `length <= target`, cutting the
    /// last segment partway so the result lands on the target exactly.
    pub fn trim(&mut self, target: f64, max_points: usize) {
        while self.length > target && self.points.len() >= 2 {
            let excess = self.length - target;
            let seg = self.points[0].distance(self.points[1]);
            if seg <= excess {
                self.points.pop_front();
                self.length -= seg;
            } else {
                self.points[0] = self.points[0].lerp(self.points[1], excess / seg);
                self.length = target;
                break;
            }
        }
        while self.points.len() > max_points.max(1) {
            if let Some(old) = self.points.pop_front() {
                if let Some(next) = self.points.front() {
                    self.length -= old.distance(*next);
                }
            }
        }
        if self.length < 0.0 || self.points.len() < 2 {
            self.length = 0.0;
        }
    }

    /// Empties the tail and hands back its points, oldest first.
    pub fn take_points(&mut self) -> Vec<Point> {
        self.length = 0.0;
        self.carry = 0.0;
        self.points.drain(..).collect()
    }

    /// True when a circle at `head` of radius `head_r` touches any
    /// `stride`-th point treated as a circle of radius `body_r`.
    pub fn touches(&self, head: Point, head_r: f64, body_r: f64, stride: usize) -> bool {
        let reach = head_r + body_r;
        let reach2 = reach * reach;
        self.points
            .iter()
            .step_by(stride.max(1))
            .any(|p| p.dist2(head) <= reach2)
    }
}

pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub skin: String,

    pub pos: Point,
    pub angle: f64,
    pub target_angle: f64,
    pub speed: f64,
    pub length: f64,
    pub radius: f64,
    pub tail: Tail,

    pub alive: bool,
    pub boosting: bool,

    pub balance: f64,
    pub current_bet: f64,
    pub cashed_out: bool,

    pub last_input_at: Option<Instant>,
    pub last_drop_at: Option<Instant>,
    pub(crate) cell: Option<CellKey>,
    connection: Option<Weak<dyn Connection>>,
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pos", &self.pos)
            .field("length", &self.length)
            .field("alive", &self.alive)
            .field("balance", &self.balance)
            .field("current_bet", &self.current_bet)
            .field("cashed_out", &self.cashed_out)
            .finish_non_exhaustive()
    }
}

impl Player {
    pub fn new(
        id: PlayerId,
        name: String,
        skin: String,
        pos: Point,
        angle: f64,
        cfg: &GameConfig,
        connection: Option<Weak<dyn Connection>>,
    ) -> Self {
        Player {
            id,
            name,
            skin,
            pos,
            angle,
            target_angle: angle,
            speed: cfg.base_speed,
            length: cfg.base_length,
            radius: physics::head_radius(cfg.base_length, cfg),
            tail: Tail::new(pos),
            alive: true,
            boosting: false,
            balance: cfg.starting_balance,
            current_bet: 0.0,
            cashed_out: false,
            last_input_at: None,
            last_drop_at: None,
            cell: None,
            connection,
        }
    }

    /// Puts the body back to spawn defaults at `pos`. Economy is untouched.
    pub fn reset_body(&mut self, pos: Point, angle: f64, cfg: &GameConfig) {
        self.pos = pos;
        self.angle = angle;
        self.target_angle = angle;
        self.speed = cfg.base_speed;
        self.length = cfg.base_length;
        self.radius = physics::head_radius(cfg.base_length, cfg);
        self.tail = Tail::new(pos);
        self.boosting = false;
        self.last_drop_at = None;
    }

    pub fn score(&self) -> u64 {
        self.length.max(0.0).floor() as u64
    }

    pub fn target_tail_length(&self, cfg: &GameConfig) -> f64 {
        (2.0 * cfg.tail_spacing).max(self.length)
    }

    /// One movement step: steer, move, lay tail, trim, pay boost cost.
    pub fn advance(&mut self, dt: f64, arena: &Arena, cfg: &GameConfig) {
        self.angle = physics::turn_toward(self.angle, self.target_angle, cfg.max_turn_rate * dt);
        self.speed = physics::speed_for(self.length, self.boosting, cfg);

        let from = self.pos;
        let moved = Point::new(
            from.x + self.angle.cos() * self.speed * dt,
            from.y + self.angle.sin() * self.speed * dt,
        );
        self.pos = arena.project(moved, self.radius);

        self.tail.record(from, self.pos, cfg.tail_spacing);
        self.tail.trim(self.target_tail_length(cfg), cfg.max_tail_points);

        if self.boosting {
            self.length -= cfg.boost_drain * dt;
            if self.length <= cfg.min_length {
                self.length = cfg.min_length;
                self.boosting = false;
                trace!(player = %self.id, "boost ran out");
            }
        }
        self.length = self.length.max(cfg.min_length);
        self.radius = physics::head_radius(self.length, cfg);
    }

    pub fn connection_open(&self) -> bool {
        self.connection
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|c| c.is_open())
    }

    /// Best-effort push to the client; a gone or failing connection is ignored.
    pub fn notify(&self, msg: ServerMessage) {
        let Some(conn) = self.connection.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        if !conn.is_open() {
            return;
        }
        if let Err(e) = conn.send(msg) {
            trace!(player = %self.id, error = %e, "dropped notification");
        }
    }

    pub fn notify_balance(&self) {
        self.notify(ServerMessage::Balance {
            balance: self.balance,
            current_bet: self.current_bet,
            total: self.balance + self.current_bet,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn cfg() -> GameConfig {
        GameConfig::default()
    }

    fn player_at(x: f64, y: f64) -> Player {
        Player::new(PlayerId(1), "a".into(), "s".into(), Point::new(x, y), 0.0, &cfg(), None)
    }

    #[test]
    fn record_lays_points_at_exact_spacing() {
        let mut tail = Tail::new(Point::new(0.0, 0.0));
        tail.record(Point::new(0.0, 0.0), Point::new(4.0, 0.0), 6.0);
        assert_eq!(tail.len(), 1);
        assert!((tail.carry() - 4.0).abs() < 1e-12);

        tail.record(Point::new(4.0, 0.0), Point::new(17.0, 0.0), 6.0);
        let xs: Vec<f64> = tail.points().iter().map(|p| p.x).collect();
        assert_eq!(xs.len(), 3);
        assert!((xs[1] - 6.0).abs() < 1e-9);
        assert!((xs[2] - 12.0).abs() < 1e-9);
        assert!((tail.carry() - 5.0).abs() < 1e-9);
        assert!((tail.length() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn spacing_survives_jittery_steps() {
        let mut tail = Tail::new(Point::new(0.0, 0.0));
        let steps = [0.3, 5.9, 0.01, 11.7, 2.2, 6.0, 0.0, 9.99];
        let mut x = 0.0;
        for s in steps {
            tail.record(Point::new(x, 0.0), Point::new(x + s, 0.0), 6.0);
            x += s;
        }
        let pts: Vec<Point> = tail.points().iter().copied().collect();
        for w in pts.windows(2) {
            assert!((w[0].distance(w[1]) - 6.0).abs() < 1e-9);
        }
        let covered = (pts.len() - 1) as f64 * 6.0;
        assert!((covered + tail.carry() - x).abs() < 1e-9);
    }

    #[test]
    fn trim_interpolates_oldest_segment() {
        let mut tail = Tail::new(Point::new(0.0, 0.0));
        tail.record(Point::new(0.0, 0.0), Point::new(30.0, 0.0), 6.0);
        assert!((tail.length() - 30.0).abs() < 1e-9);
        tail.trim(20.0, 1200);
        assert!((tail.length() - 20.0).abs() < 1e-12);
        assert!((tail.oldest().unwrap().x - 10.0).abs() < 1e-9);
    }

    #[test]
    fn trim_enforces_point_ceiling() {
        let mut tail = Tail::new(Point::new(0.0, 0.0));
        tail.record(Point::new(0.0, 0.0), Point::new(600.0, 0.0), 6.0);
        tail.trim(10_000.0, 10);
        assert_eq!(tail.len(), 10);
        assert!((tail.length() - 54.0).abs() < 1e-9);
    }

    #[test]
    fn touches_samples_with_stride() {
        let mut tail = Tail::new(Point::new(0.0, 0.0));
        tail.record(Point::new(0.0, 0.0), Point::new(60.0, 0.0), 6.0);
        // Points at x = 0, 6, 12, ... ; stride 3 samples 0, 18, 36, 54.
        assert!(tail.touches(Point::new(18.0, 5.0), 1.0, 5.0, 3));
        assert!(!tail.touches(Point::new(6.0, 5.0), 1.0, 1.0, 3));
        assert!(tail.touches(Point::new(6.0, 1.0), 1.0, 1.0, 1));
    }

    #[test]
    fn tail_tracks_target_length_while_moving() {
        let cfg = cfg();
        let arena = Arena::from_config(&cfg);
        let mut p = player_at(arena.center.x, arena.center.y);
        for i in 0..400 {
            if i == 100 {
                p.length += 35.0;
            }
            if i % 50 == 0 {
                p.target_angle += FRAC_PI_2;
            }
            p.advance(1.0 / 30.0, &arena, &cfg);
            let target = p.target_tail_length(&cfg);
            assert!(p.tail.length() <= target + 1e-6);
        }
        let target = p.target_tail_length(&cfg);
        assert!((p.tail.length() - target).abs() <= cfg.tail_spacing);
    }

    #[test]
    fn boost_drains_to_floor_and_switches_off() {
        let cfg = cfg();
        let arena = Arena::from_config(&cfg);
        let mut p = player_at(arena.center.x, arena.center.y);
        p.length = cfg.min_length + 0.5;
        p.boosting = true;
        p.advance(1.0, &arena, &cfg);
        assert_eq!(p.length, cfg.min_length);
        assert!(!p.boosting);
    }

    #[test]
    fn head_is_kept_inside_arena() {
        let cfg = cfg();
        let arena = Arena::from_config(&cfg);
        let mut p = player_at(arena.center.x + arena.radius - 1.0, arena.center.y);
        for _ in 0..60 {
            p.advance(1.0 / 30.0, &arena, &cfg);
        }
        let d = p.pos.distance(arena.center);
        assert!(d <= arena.radius - p.radius + 1e-6);
    }
}
