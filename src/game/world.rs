use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::sync::Weak;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::game::food::{FoodRegistry, FoodStyle};
use crate::game::outbound::{Connection, KillLog, KillReason, KillRecord};
use crate::game::physics::{self, Arena, Point};
use crate::game::player::{Player, PlayerId, PlayerInput};
use crate::game::spatial::SpatialHash;
use crate::game::wager::{self, BetError, BetReceipt, CashOutReceipt};
use crate::protocol::messages::{FoodState, LeaderboardEntry, PlayerState, ServerMessage};

/// Food dropped while boosting is placed at the oldest tail point once the
/// tail has more than this many points; before that, at the head.
const BOOST_DROP_MIN_TAIL: usize = 3;
/// Death pieces land within this fraction of the scatter radius of their anchor.
const DEATH_JITTER_FRACTION: f64 = 0.1;

/// What one viewer can see.
#[derive(Debug, Clone, Default)]
pub struct Aoi {
    pub players: Vec<PlayerState>,
    pub foods: Vec<FoodState>,
}

pub struct World {
    config: GameConfig,
    arena: Arena,
    players: BTreeMap<PlayerId, Player>,
    retired: BTreeMap<PlayerId, Player>,
    food: FoodRegistry,
    player_index: SpatialHash<PlayerId>,
    next_player_id: u64,
    tick_id: u64,
    match_id: String,
    rng: StdRng,
    kill_log: Box<dyn KillLog>,
}

impl World {
    pub fn new(config: GameConfig, kill_log: Box<dyn KillLog>) -> Self {
        Self::with_rng(config, kill_log, StdRng::from_entropy())
    }

    pub fn with_rng(config: GameConfig, kill_log: Box<dyn KillLog>, rng: StdRng) -> Self {
        let mut world = World {
            arena: Arena::from_config(&config),
            players: BTreeMap::new(),
            retired: BTreeMap::new(),
            food: FoodRegistry::new(&config),
            player_index: SpatialHash::new(config.cell_size),
            next_player_id: 1,
            tick_id: 0,
            match_id: Uuid::new_v4().to_string(),
            rng,
            kill_log,
            config,
        };
        for _ in 0..world.config.initial_food {
            world.food.spawn_random(&mut world.rng);
        }
        world
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    pub fn food(&self) -> &FoodRegistry {
        &self.food
    }

    /// Live (not cashed-out) player.
    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn is_cashed_out(&self, id: PlayerId) -> bool {
        self.retired.contains_key(&id)
    }

    // ── Lifecycle ──

    pub fn add_player(
        &mut self,
        connection: Option<Weak<dyn Connection>>,
        name: String,
        skin: String,
    ) -> PlayerId {
        let id = PlayerId(self.next_player_id);
        self.next_player_id += 1;

        let pos = self.arena.random_point(&mut self.rng);
        let angle = physics::normalize_angle(self.rng.gen_range(0.0..TAU));
        let mut player = Player::new(id, name, skin, pos, angle, &self.config, connection);
        player.cell = Some(self.player_index.insert(id, pos.x, pos.y));
        info!(player = %id, name = %player.name, "player joined");
        self.players.insert(id, player);
        id
    }

    /// Drops the player outright. Any open stake is forfeited.
    pub fn remove_player(&mut self, id: PlayerId) {
        if let Some(player) = self.players.remove(&id) {
            if let Some(key) = player.cell {
                self.player_index.remove(id, key);
            }
            if player.current_bet > 0.0 {
                info!(player = %id, stake = player.current_bet, "stake forfeited on disconnect");
            }
            info!(player = %id, "player left");
        }
        self.retired.remove(&id);
    }

    pub fn respawn(&mut self, id: PlayerId) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        if player.alive || player.cashed_out {
            return;
        }
        let pos = self.arena.random_point(&mut self.rng);
        let angle = physics::normalize_angle(self.rng.gen_range(0.0..TAU));
        player.reset_body(pos, angle, &self.config);
        if let Some(key) = player.cell.take() {
            self.player_index.remove(id, key);
        }
        player.cell = Some(self.player_index.insert(id, pos.x, pos.y));
        player.alive = true;
        debug!(player = %id, "respawned");
    }

    pub fn place_bet(&mut self, id: PlayerId, amount: f64) -> Option<Result<BetReceipt, BetError>> {
        if self.retired.contains_key(&id) {
            return Some(Err(BetError::Cashout));
        }
        let player = self.players.get_mut(&id)?;
        let result = wager::place_bet(player, amount);
        match &result {
            Ok(r) => {
                debug!(player = %id, stake = r.current_bet, balance = r.balance, "bet placed");
                player.notify_balance();
            }
            Err(e) => debug!(player = %id, amount, error = e.code(), "bet rejected"),
        }
        Some(result)
    }

    /// Banks the stake and takes the player out of play for good.
    pub fn cash_out(&mut self, id: PlayerId) -> Option<Result<CashOutReceipt, BetError>> {
        if self.retired.contains_key(&id) {
            return Some(Err(BetError::Cashout));
        }
        let mut player = self.players.remove(&id)?;
        let receipt = match wager::cash_out(&mut player) {
            Ok(r) => r,
            Err(e) => {
                self.players.insert(id, player);
                return Some(Err(e));
            }
        };
        player.alive = false;
        player.boosting = false;
        player.tail.take_points();
        if let Some(key) = player.cell.take() {
            self.player_index.remove(id, key);
        }
        player.notify(ServerMessage::CashoutConfirmed {
            balance: receipt.balance,
            total: receipt.total,
        });
        info!(player = %id, balance = receipt.balance, "cashed out");
        self.retired.insert(id, player);
        Some(Ok(receipt))
    }

    pub fn handle_input(&mut self, id: PlayerId, input: PlayerInput) {
        self.handle_input_at(id, input, Instant::now());
    }

    pub fn handle_input_at(&mut self, id: PlayerId, input: PlayerInput, now: Instant) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        if !player.alive || player.cashed_out {
            return;
        }
        // A frame with nothing usable in it does not count against the rate limit.
        let angle = input.angle.filter(|a| a.is_finite());
        if angle.is_none() && input.boost.is_none() {
            return;
        }
        let min_gap = Duration::from_millis(self.config.min_input_interval_ms);
        if let Some(last) = player.last_input_at {
            if now.saturating_duration_since(last) < min_gap {
                return;
            }
        }
        player.last_input_at = Some(now);

        if let Some(angle) = angle {
            player.target_angle = physics::normalize_angle(angle);
        }
        match input.boost {
            Some(true) if player.length > self.config.min_length + self.config.boost_margin => {
                player.boosting = true;
            }
            Some(false) => player.boosting = false,
            _ => {}
        }
    }

    // ── Simulation ──

    pub fn tick(&mut self, dt: f64) {
        self.tick_at(dt, Instant::now());
    }

    /// Runs one step. Phase order matters: positions must settle before the
    /// index is rebuilt, and pickups and collisions read the rebuilt index.
    pub fn tick_at(&mut self, dt: f64, now: Instant) {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.tick_id += 1;
        self.food.set_tick(self.tick_id);

        if self.food.len() < self.config.target_food
            && self.rng.gen::<f64>() < self.config.food_spawn_chance
        {
            self.food.spawn_random(&mut self.rng);
        }
        self.step_movement(dt, now);
        self.rebuild_spatial();
        self.step_food_pickup();
        self.step_collisions();
    }

    fn step_movement(&mut self, dt: f64, now: Instant) {
        let drop_every = Duration::from_millis(self.config.boost_drop_interval_ms);
        for player in self.players.values_mut() {
            if !player.alive {
                continue;
            }
            player.advance(dt, &self.arena, &self.config);

            if player.boosting {
                let due = player
                    .last_drop_at
                    .map_or(true, |t| now.saturating_duration_since(t) >= drop_every);
                if due {
                    player.last_drop_at = Some(now);
                    let at = match player.tail.oldest() {
                        Some(p) if player.tail.len() > BOOST_DROP_MIN_TAIL => p,
                        _ => player.pos,
                    };
                    self.food
                        .spawn_at(at.x, at.y, 1, FoodStyle::default(), &mut self.rng);
                }
            }
        }
    }

    fn rebuild_spatial(&mut self) {
        self.player_index.clear();
        for player in self.players.values_mut() {
            player.cell = if player.alive {
                Some(self.player_index.insert(player.id, player.pos.x, player.pos.y))
            } else {
                None
            };
        }
    }

    fn step_food_pickup(&mut self) {
        let r = self.config.food_pickup_radius;
        for player in self.players.values_mut() {
            if !player.alive {
                continue;
            }
            let mut grew = false;
            for fid in self.food.query(player.pos.x, player.pos.y, r) {
                let in_reach = self
                    .food
                    .get(fid)
                    .is_some_and(|f| f.pos.dist2(player.pos) <= r * r);
                if !in_reach {
                    continue;
                }
                if let Some(food) = self.food.consume(fid) {
                    player.length += food.value as f64;
                    grew = true;
                    if self.food.len() < self.config.target_food {
                        self.food.spawn_random(&mut self.rng);
                    }
                }
            }
            if grew {
                player.radius = physics::head_radius(player.length, &self.config);
            }
        }
    }

    fn step_collisions(&mut self) {
        let stride = self.config.segment_sample_stride;
        let ids: Vec<PlayerId> = self.players.keys().copied().collect();
        for id in ids {
            let (head, head_r) = match self.players.get(&id) {
                Some(p) if p.alive => (p.pos, p.radius),
                _ => continue,
            };
            let mut nearby: Vec<PlayerId> = self
                .player_index
                .query_circle(head.x, head.y, self.config.collision_query_radius)
                .into_iter()
                .filter(|other| *other != id)
                .collect();
            nearby.sort_unstable();

            let killer = nearby.into_iter().find(|other| match self.players.get(other) {
                Some(o) if o.alive => {
                    let body_r = physics::body_radius(o.length, &self.config);
                    o.tail.touches(head, head_r, body_r, stride)
                }
                _ => false,
            });
            if let Some(killer) = killer {
                self.kill(id, Some(killer));
            }
        }
    }

    /// Resolves a death: settles the stake, turns the body into food worth
    /// floor(length), logs it and tells the parties. No-op if already dead.
    pub fn kill(&mut self, victim_id: PlayerId, killer_id: Option<PlayerId>) {
        let killer_id = killer_id.filter(|k| *k != victim_id);
        let Some(victim) = self.players.get_mut(&victim_id) else {
            return;
        };
        if !victim.alive {
            return;
        }
        victim.alive = false;
        victim.boosting = false;
        let remains = victim.tail.take_points();

        let bounty = wager::forfeit_stake(victim);
        if let Some(key) = victim.cell.take() {
            self.player_index.remove(victim_id, key);
        }
        let victim_pos = victim.pos;
        let victim_score = victim.score();

        let killer = killer_id.and_then(|k| self.players.get_mut(&k));
        let (killer_name, killer_length) = match killer {
            Some(k) => {
                wager::award_bounty(k, bounty);
                (k.name.clone(), Some(k.score()))
            }
            None => (String::new(), None),
        };

        self.food.spawn_remains(
            &remains,
            victim_pos,
            victim_score,
            self.config.food_chunk_value,
            self.config.tail_spacing,
            self.config.death_scatter_radius * DEATH_JITTER_FRACTION,
            &mut self.rng,
        );

        let record = KillRecord {
            match_id: self.match_id.clone(),
            tick: self.tick_id,
            timestamp: Utc::now(),
            killer_id: killer_id.map(|k| k.0),
            victim_id: victim_id.0,
            x: victim_pos.x,
            y: victim_pos.y,
            victim_length: victim_score,
            killer_length,
            reason: KillReason::HeadVsBody,
            bounty,
        };
        if let Err(e) = self.kill_log.log(&record) {
            warn!(error = %e, victim = %victim_id, "kill log failed");
        }
        debug!(victim = %victim_id, killer = ?killer_id, bounty, score = victim_score, "kill");

        if let Some(victim) = self.players.get(&victim_id) {
            victim.notify(ServerMessage::Death {
                killer_name,
                your_score: victim_score,
            });
            victim.notify_balance();
        }
        if let Some(killer) = killer_id.and_then(|k| self.players.get(&k)) {
            killer.notify_balance();
        }
    }

    // ── Read-only views ──

    /// Players and food within the view radius of `id`.
    pub fn aoi_for(&self, id: PlayerId) -> Option<Aoi> {
        let viewer = self.players.get(&id)?;
        let r = self.config.view_radius;
        let (px, py) = (viewer.pos.x, viewer.pos.y);

        let mut ids: Vec<PlayerId> = self.player_index.query_circle(px, py, r).into_iter().collect();
        ids.sort_unstable();
        let players = ids
            .into_iter()
            .filter_map(|pid| self.players.get(&pid))
            .filter(|o| physics::dist2(px, py, o.pos.x, o.pos.y) <= r * r)
            .map(player_state)
            .collect();

        let foods = self
            .food
            .query(px, py, r)
            .into_iter()
            .filter_map(|fid| self.food.get(fid))
            .filter(|f| physics::dist2(px, py, f.pos.x, f.pos.y) <= r * r)
            .map(|f| FoodState {
                id: f.id.0,
                x: f.pos.x,
                y: f.pos.y,
                value: f.value,
                color: f.color,
                big: f.big,
                phase: f.phase,
            })
            .collect();

        Some(Aoi { players, foods })
    }

    pub fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = self
            .players
            .values()
            .filter(|p| p.alive)
            .map(|p| LeaderboardEntry {
                name: p.name.clone(),
                length: p.score(),
            })
            .collect();
        entries.sort_by(|a, b| b.length.cmp(&a.length));
        entries.truncate(limit);
        entries
    }
}

fn player_state(p: &Player) -> PlayerState {
    PlayerState {
        id: p.id.0,
        name: p.name.clone(),
        skin: p.skin.clone(),
        x: p.pos.x,
        y: p.pos.y,
        angle: p.angle,
        length: p.score(),
        radius: p.radius,
        alive: p.alive,
        boosting: p.boosting,
        path: p.tail.points().iter().copied().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::outbound::{OutboundError, TracingKillLog};
    use crate::game::player::Tail;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<ServerMessage>>,
    }

    impl Connection for Recorder {
        fn is_open(&self) -> bool {
            true
        }
        fn send(&self, msg: ServerMessage) -> Result<(), OutboundError> {
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedKillLog(Arc<Mutex<Vec<KillRecord>>>);

    impl KillLog for SharedKillLog {
        fn log(&self, record: &KillRecord) -> Result<(), OutboundError> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct BrokenKillLog;

    impl KillLog for BrokenKillLog {
        fn log(&self, _: &KillRecord) -> Result<(), OutboundError> {
            Err(OutboundError::Unavailable("down".into()))
        }
    }

    fn quiet_config() -> GameConfig {
        GameConfig {
            initial_food: 0,
            food_spawn_chance: 0.0,
            ..GameConfig::default()
        }
    }

    fn world() -> World {
        World::with_rng(quiet_config(), Box::new(TracingKillLog), StdRng::seed_from_u64(7))
    }

    fn connect(world: &mut World) -> (PlayerId, Arc<Recorder>) {
        let rec = Arc::new(Recorder::default());
        let weak: Weak<dyn Connection> = Arc::downgrade(&rec) as Weak<Recorder>;
        let id = world.add_player(Some(weak), "p".into(), "s".into());
        (id, rec)
    }

    fn place(world: &mut World, id: PlayerId, at: Point, angle: f64) {
        let p = world.players.get_mut(&id).unwrap();
        p.pos = at;
        p.angle = angle;
        p.target_angle = angle;
        p.tail = Tail::new(at);
        world.rebuild_spatial();
    }

    /// Lays a straight body of `len` units ending at `head`, heading along +x.
    fn lay_body(world: &mut World, id: PlayerId, head: Point, len: f64) {
        let spacing = world.config.tail_spacing;
        let p = world.players.get_mut(&id).unwrap();
        p.length = len;
        let start = Point::new(head.x - len, head.y);
        p.tail = Tail::new(start);
        p.tail.record(start, head, spacing);
        p.pos = head;
        p.angle = 0.0;
        p.target_angle = 0.0;
        world.rebuild_spatial();
    }

    #[test]
    fn add_player_registers_and_indexes() {
        let mut w = world();
        let id = w.add_player(None, "a".into(), "s".into());
        let p = w.player(id).unwrap();
        assert!(p.alive);
        assert_eq!(p.balance, 1000.0);
        assert_eq!(p.current_bet, 0.0);
        assert_eq!(p.tail.len(), 1);
        assert!(w.arena.contains(p.pos));
        assert!(w
            .player_index
            .query_circle(p.pos.x, p.pos.y, 1.0)
            .contains(&id));
    }

    #[test]
    fn ids_are_not_reused_after_removal() {
        let mut w = world();
        let a = w.add_player(None, "a".into(), "s".into());
        w.remove_player(a);
        let b = w.add_player(None, "b".into(), "s".into());
        assert!(b > a);
        assert!(w.player(a).is_none());
        let c = w.arena.center;
        let everyone = w.player_index.query_circle(c.x, c.y, w.arena.radius * 2.0);
        assert!(!everyone.contains(&a));
        assert!(everyone.contains(&b));
    }

    #[test]
    fn betting_transitions() {
        let mut w = world();
        let (id, rec) = connect(&mut w);
        let r = w.place_bet(id, 500.0).unwrap().unwrap();
        assert_eq!((r.balance, r.current_bet, r.total), (500.0, 500.0, 1000.0));
        assert_eq!(w.place_bet(id, 100.0), Some(Err(BetError::BetExists)));
        assert!(rec
            .sent
            .lock()
            .unwrap()
            .contains(&ServerMessage::Balance { balance: 500.0, current_bet: 500.0, total: 1000.0 }));

        let (other, _) = connect(&mut w);
        assert_eq!(w.place_bet(other, 0.0), Some(Err(BetError::InvalidAmount)));
        assert_eq!(w.place_bet(PlayerId(999), 10.0), None);
    }

    #[test]
    fn cash_out_banks_stake_and_leaves_the_world() {
        let mut w = world();
        let (id, rec) = connect(&mut w);
        let (watcher, _) = connect(&mut w);
        let c = w.arena.center;
        place(&mut w, watcher, c, 0.0);
        place(&mut w, id, Point::new(c.x + 50.0, c.y), 0.0);
        w.place_bet(id, 500.0).unwrap().unwrap();

        let r = w.cash_out(id).unwrap().unwrap();
        assert_eq!((r.balance, r.total), (1000.0, 1000.0));
        assert!(w.player(id).is_none());
        assert!(w.is_cashed_out(id));
        assert!(rec
            .sent
            .lock()
            .unwrap()
            .contains(&ServerMessage::CashoutConfirmed { balance: 1000.0, total: 1000.0 }));

        w.tick(1.0 / 30.0);
        let aoi = w.aoi_for(watcher).unwrap();
        assert!(aoi.players.iter().all(|p| p.id != id.0));
        assert!(w.players().all(|p| p.id != id));

        assert_eq!(w.cash_out(id), Some(Err(BetError::Cashout)));
        assert_eq!(w.place_bet(id, 10.0), Some(Err(BetError::Cashout)));
        w.respawn(id);
        assert!(w.player(id).is_none());

        w.remove_player(id);
        assert!(!w.is_cashed_out(id));
        assert_eq!(w.cash_out(id), None);
    }

    #[test]
    fn respawn_gating() {
        let mut w = world();
        let id = w.add_player(None, "a".into(), "s".into());
        let before = w.player(id).unwrap().pos;
        w.respawn(id);
        assert_eq!(w.player(id).unwrap().pos, before);

        w.players.get_mut(&id).unwrap().length = 80.0;
        w.kill(id, None);
        assert!(!w.player(id).unwrap().alive);
        w.respawn(id);
        let p = w.player(id).unwrap();
        assert!(p.alive);
        assert_eq!(p.length, w.config.base_length);
        assert_eq!(p.tail.len(), 1);
        assert_eq!(p.tail.points()[0], p.pos);
        assert!(w.player_index.query_circle(p.pos.x, p.pos.y, 1.0).contains(&id));
    }

    #[test]
    fn input_is_rate_limited_and_validated() {
        let mut w = world();
        let id = w.add_player(None, "a".into(), "s".into());
        let t0 = Instant::now();
        w.handle_input_at(id, PlayerInput { angle: Some(4.0), boost: None }, t0);
        let expected = physics::normalize_angle(4.0);
        assert!((w.player(id).unwrap().target_angle - expected).abs() < 1e-12);

        w.handle_input_at(id, PlayerInput { angle: Some(1.0), boost: None }, t0 + Duration::from_millis(2));
        assert!((w.player(id).unwrap().target_angle - expected).abs() < 1e-12);

        w.handle_input_at(id, PlayerInput { angle: Some(f64::NAN), boost: None }, t0 + Duration::from_millis(50));
        assert!((w.player(id).unwrap().target_angle - expected).abs() < 1e-12);

        w.handle_input_at(id, PlayerInput { angle: Some(1.0), boost: None }, t0 + Duration::from_millis(100));
        assert!((w.player(id).unwrap().target_angle - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unusable_input_does_not_spend_rate_limit() {
        let mut w = world();
        let id = w.add_player(None, "a".into(), "s".into());
        let t0 = Instant::now();
        w.handle_input_at(id, PlayerInput { angle: Some(0.5), boost: None }, t0);
        let junk = PlayerInput { angle: Some(f64::INFINITY), boost: None };
        w.handle_input_at(id, junk, t0 + Duration::from_millis(20));
        // 5 ms after the junk frame but 25 ms after the last real one.
        w.handle_input_at(id, PlayerInput { angle: Some(1.5), boost: None }, t0 + Duration::from_millis(25));
        assert!((w.player(id).unwrap().target_angle - 1.5).abs() < 1e-12);
    }

    #[test]
    fn boost_needs_margin_above_minimum() {
        let mut w = world();
        let id = w.add_player(None, "a".into(), "s".into());
        let t0 = Instant::now();
        w.players.get_mut(&id).unwrap().length = w.config.min_length + 1.0;
        w.handle_input_at(id, PlayerInput { angle: None, boost: Some(true) }, t0);
        assert!(!w.player(id).unwrap().boosting);

        w.players.get_mut(&id).unwrap().length = 40.0;
        w.handle_input_at(id, PlayerInput { angle: None, boost: Some(true) }, t0 + Duration::from_secs(1));
        assert!(w.player(id).unwrap().boosting);

        w.kill(id, None);
        let before = w.player(id).unwrap().target_angle;
        w.handle_input_at(id, PlayerInput { angle: Some(2.0), boost: None }, t0 + Duration::from_secs(2));
        assert_eq!(w.player(id).unwrap().target_angle, before);
    }

    #[test]
    fn boosting_drops_food_on_interval() {
        let mut w = world();
        let id = w.add_player(None, "a".into(), "s".into());
        // A long body puts the drop point at the tail end, out of pickup reach.
        let c = w.arena.center;
        lay_body(&mut w, id, c, 60.0);
        w.players.get_mut(&id).unwrap().boosting = true;
        let t0 = Instant::now();
        w.tick_at(1.0 / 30.0, t0);
        assert_eq!(w.food.len(), 1);
        w.tick_at(1.0 / 30.0, t0 + Duration::from_millis(33));
        assert_eq!(w.food.len(), 1);
        w.tick_at(1.0 / 30.0, t0 + Duration::from_millis(150));
        assert_eq!(w.food.len(), 2);
        assert!(w.player(id).unwrap().length < 60.0);
    }

    #[test]
    fn pickup_grows_player_once_per_food() {
        let mut w = world();
        let a = w.add_player(None, "a".into(), "s".into());
        let b = w.add_player(None, "b".into(), "s".into());
        let c = w.arena.center;
        place(&mut w, a, c, 0.0);
        place(&mut w, b, Point::new(c.x + 2.0, c.y + 200.0), 0.0);
        let speed = physics::speed_for(w.config.base_length, false, &w.config);
        let dt = 1.0 / 30.0;
        let ahead = Point::new(c.x + speed * dt, c.y);
        let fid = w.food.spawn_at(ahead.x, ahead.y, 4, FoodStyle::default(), &mut w.rng);
        w.tick_at(dt, Instant::now());
        assert!(w.food.get(fid).is_none());
        assert_eq!(w.player(a).unwrap().length, w.config.base_length + 4.0);
        assert_eq!(w.player(b).unwrap().length, w.config.base_length);
        // Below target, the eaten item is replaced.
        assert_eq!(w.food.len(), 1);
    }

    #[test]
    fn pickup_at_target_population_spawns_no_replacement() {
        let cfg = GameConfig {
            target_food: 1,
            ..quiet_config()
        };
        let mut w = World::with_rng(cfg, Box::new(TracingKillLog), StdRng::seed_from_u64(7));
        let a = w.add_player(None, "a".into(), "s".into());
        let c = w.arena.center;
        place(&mut w, a, c, 0.0);
        let speed = physics::speed_for(w.config.base_length, false, &w.config);
        let dt = 1.0 / 30.0;
        let eaten = w.food.spawn_at(c.x + speed * dt, c.y, 2, FoodStyle::default(), &mut w.rng);
        let far = w.food.spawn_at(c.x - 1000.0, c.y, 2, FoodStyle::default(), &mut w.rng);
        w.tick_at(dt, Instant::now());
        assert!(w.food.get(eaten).is_none());
        assert!(w.food.get(far).is_some());
        assert_eq!(w.food.len(), 1);
    }

    #[test]
    fn kill_with_bounty() {
        let log = SharedKillLog::default();
        let mut w = World::with_rng(quiet_config(), Box::new(log.clone()), StdRng::seed_from_u64(3));
        let (a, rec_a) = connect(&mut w);
        let (b, rec_b) = connect(&mut w);
        let c = w.arena.center;
        lay_body(&mut w, a, c, 60.5);
        place(&mut w, b, Point::new(c.x - 300.0, c.y - 300.0), 0.0);
        w.place_bet(a, 200.0).unwrap().unwrap();
        w.place_bet(b, 100.0).unwrap().unwrap();
        let path: Vec<Point> = w.player(a).unwrap().tail.points().iter().copied().collect();
        let food_before = w.food.total_value();

        w.kill(a, Some(b));

        let pa = w.player(a).unwrap();
        let pb = w.player(b).unwrap();
        assert!(!pa.alive);
        assert_eq!(pa.current_bet, 0.0);
        assert_eq!(pa.balance, 800.0);
        assert_eq!(pb.current_bet, 300.0);
        assert!(pa.tail.is_empty());
        assert_eq!(w.food.total_value() - food_before, 60);
        for f in w.food.iter() {
            let near = path.iter().map(|q| q.distance(f.pos)).fold(f64::INFINITY, f64::min);
            assert!(near <= w.config.death_scatter_radius);
        }
        assert!(!w.player_index.query_circle(c.x, c.y, 10.0).contains(&a));

        let sent = rec_a.sent.lock().unwrap();
        assert!(sent.iter().any(|m| matches!(m, ServerMessage::Death { your_score: 60, killer_name } if killer_name == "p")));
        assert!(rec_b
            .sent
            .lock()
            .unwrap()
            .contains(&ServerMessage::Balance { balance: 900.0, current_bet: 300.0, total: 1200.0 }));

        let records = log.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].killer_id, Some(b.0));
        assert_eq!(records[0].victim_id, a.0);
        assert_eq!(records[0].bounty, 200.0);
        assert_eq!(records[0].victim_length, 60);
        assert_eq!(records[0].reason, KillReason::HeadVsBody);
    }

    #[test]
    fn kill_is_idempotent() {
        let mut w = world();
        let a = w.add_player(None, "a".into(), "s".into());
        w.kill(a, None);
        let food = w.food.total_value();
        w.kill(a, None);
        assert_eq!(w.food.total_value(), food);
        assert_eq!(food, w.config.base_length as u64);
    }

    #[test]
    fn broken_kill_log_does_not_stop_the_tick() {
        let mut w = World::with_rng(quiet_config(), Box::new(BrokenKillLog), StdRng::seed_from_u64(1));
        let a = w.add_player(None, "a".into(), "s".into());
        w.kill(a, None);
        assert!(!w.player(a).unwrap().alive);
        w.tick(0.05);
    }

    #[test]
    fn head_into_body_kills_the_mover() {
        let mut w = world();
        let body = w.add_player(None, "body".into(), "s".into());
        let head = w.add_player(None, "head".into(), "s".into());
        let c = w.arena.center;
        lay_body(&mut w, body, c, 120.0);
        // Head sits right on the body's midsection, pointing down the y axis.
        place(&mut w, head, Point::new(c.x - 60.0, c.y - 4.0), std::f64::consts::FRAC_PI_2);
        w.place_bet(head, 250.0).unwrap().unwrap();

        w.tick_at(1.0 / 30.0, Instant::now());

        assert!(!w.player(head).unwrap().alive);
        assert!(w.player(body).unwrap().alive);
        assert_eq!(w.player(body).unwrap().current_bet, 250.0);
        assert_eq!(w.player(head).unwrap().current_bet, 0.0);
    }

    #[test]
    fn dead_players_are_skipped_by_tick() {
        let mut w = world();
        let a = w.add_player(None, "a".into(), "s".into());
        w.kill(a, None);
        let pos = w.player(a).unwrap().pos;
        for _ in 0..10 {
            w.tick(1.0 / 30.0);
        }
        assert_eq!(w.player(a).unwrap().pos, pos);
        assert!(w.player(a).unwrap().cell.is_none());
    }

    #[test]
    fn aoi_filters_by_exact_distance() {
        let mut w = world();
        let viewer = w.add_player(None, "v".into(), "s".into());
        let near = w.add_player(None, "n".into(), "s".into());
        let far = w.add_player(None, "f".into(), "s".into());
        let c = w.arena.center;
        let r = w.config.view_radius;
        place(&mut w, viewer, c, 0.0);
        place(&mut w, near, Point::new(c.x + r - 1.0, c.y), 0.0);
        place(&mut w, far, Point::new(c.x + r * 0.8, c.y + r * 0.8), 0.0);
        let inside = w.food.spawn_at(c.x, c.y + 100.0, 1, FoodStyle::default(), &mut w.rng);
        let outside = w.food.spawn_at(c.x - r - 5.0, c.y, 1, FoodStyle::default(), &mut w.rng);

        let aoi = w.aoi_for(viewer).unwrap();
        let ids: Vec<u64> = aoi.players.iter().map(|p| p.id).collect();
        assert!(ids.contains(&viewer.0));
        assert!(ids.contains(&near.0));
        assert!(!ids.contains(&far.0));
        let fids: Vec<u64> = aoi.foods.iter().map(|f| f.id).collect();
        assert!(fids.contains(&inside.0));
        assert!(!fids.contains(&outside.0));
        assert!(w.aoi_for(PlayerId(12345)).is_none());
    }

    #[test]
    fn ambient_food_replenishes_toward_target() {
        let cfg = GameConfig {
            initial_food: 0,
            target_food: 5,
            food_spawn_chance: 1.0,
            ..GameConfig::default()
        };
        let mut w = World::with_rng(cfg, Box::new(TracingKillLog), StdRng::seed_from_u64(2));
        for _ in 0..20 {
            w.tick(0.01);
        }
        assert_eq!(w.food.len(), 5);
    }

    #[test]
    fn leaderboard_orders_living_players() {
        let mut w = world();
        let a = w.add_player(None, "a".into(), "s".into());
        let b = w.add_player(None, "b".into(), "s".into());
        let dead = w.add_player(None, "d".into(), "s".into());
        w.players.get_mut(&a).unwrap().length = 30.0;
        w.players.get_mut(&b).unwrap().length = 90.0;
        w.players.get_mut(&dead).unwrap().length = 500.0;
        w.kill(dead, None);
        let board = w.leaderboard(10);
        let names: Vec<&str> = board.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
