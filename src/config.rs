use thiserror::Error;
use tracing::warn;

// Arena
pub const ARENA_WIDTH: f64 = 4000.0;
pub const ARENA_HEIGHT: f64 = 4000.0;
pub const CELL_SIZE: f64 = 128.0;

// Food
pub const INITIAL_FOOD: usize = 800;
pub const TARGET_FOOD: usize = 1200;
pub const FOOD_SPAWN_CHANCE: f64 = 0.5; // per tick, while below target
pub const FOOD_PICKUP_RADIUS: f64 = 18.0;
pub const DEATH_SCATTER_RADIUS: f64 = 80.0;
pub const FOOD_CHUNK_VALUE: u32 = 3;
pub const BIG_FOOD_VALUE: u32 = 3;

// Snake
pub const HEAD_RADIUS: f64 = 8.0;
pub const BODY_RADIUS: f64 = 6.0;
pub const BASE_LENGTH: f64 = 20.0;
pub const MIN_LENGTH: f64 = 10.0;
pub const BASE_SPEED: f64 = 160.0; // units per second at base length
pub const MIN_SPEED_FACTOR: f64 = 0.55;
pub const SPEED_SOFT_CAP: f64 = 200.0;
pub const SPEED_EXPONENT: f64 = 0.6;
pub const BOOST_MULTIPLIER: f64 = 1.7;
pub const BOOST_DRAIN: f64 = 3.0; // length per second
pub const BOOST_DROP_INTERVAL_MS: u64 = 120;
pub const BOOST_MARGIN: f64 = 2.0;

// Tail
pub const TAIL_SPACING: f64 = 6.0;
pub const MAX_TAIL_POINTS: usize = 1200;
pub const COLLISION_QUERY_RADIUS: f64 = 300.0;
pub const SEGMENT_SAMPLE_STRIDE: usize = 3;

// Visibility
pub const VIEW_RADIUS: f64 = 900.0;

// Gameplay
pub const TICK_RATE: u64 = 30;
pub const SNAPSHOT_RATE: u64 = 12;
pub const MAX_TURN_RATE: f64 = 5.4; // radians per second
pub const MIN_INPUT_INTERVAL_MS: u64 = 10;
pub const STARTING_BALANCE: f64 = 1000.0;

// Server
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_KILLS_DB_PATH: &str = "data/kills.db";
pub const DEFAULT_MAX_MSGS_PER_SEC: u32 = 60;
pub const DEFAULT_JOIN_THROTTLE_MS: u64 = 2000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10_000;

/// Rates above this would round the tick or snapshot period down to 0 ms.
pub const MAX_RATE_HZ: u64 = 1000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Simulation tunables. Fixed at construction; the world never mutates it.
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub width: f64,
    pub height: f64,
    pub cell_size: f64,

    pub initial_food: usize,
    pub target_food: usize,
    pub food_spawn_chance: f64,
    pub food_pickup_radius: f64,
    pub death_scatter_radius: f64,
    pub food_chunk_value: u32,
    pub big_food_value: u32,

    pub head_radius: f64,
    pub body_radius: f64,
    pub base_length: f64,
    pub min_length: f64,
    pub base_speed: f64,
    pub min_speed_factor: f64,
    pub speed_soft_cap: f64,
    pub speed_exponent: f64,
    pub boost_multiplier: f64,
    pub boost_drain: f64,
    pub boost_drop_interval_ms: u64,
    pub boost_margin: f64,

    pub tail_spacing: f64,
    pub max_tail_points: usize,
    pub collision_query_radius: f64,
    pub segment_sample_stride: usize,

    pub view_radius: f64,
    pub tick_rate: u64,
    pub snapshot_rate: u64,
    pub max_turn_rate: f64,
    pub min_input_interval_ms: u64,
    pub starting_balance: f64,
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            width: ARENA_WIDTH,
            height: ARENA_HEIGHT,
            cell_size: CELL_SIZE,
            initial_food: INITIAL_FOOD,
            target_food: TARGET_FOOD,
            food_spawn_chance: FOOD_SPAWN_CHANCE,
            food_pickup_radius: FOOD_PICKUP_RADIUS,
            death_scatter_radius: DEATH_SCATTER_RADIUS,
            food_chunk_value: FOOD_CHUNK_VALUE,
            big_food_value: BIG_FOOD_VALUE,
            head_radius: HEAD_RADIUS,
            body_radius: BODY_RADIUS,
            base_length: BASE_LENGTH,
            min_length: MIN_LENGTH,
            base_speed: BASE_SPEED,
            min_speed_factor: MIN_SPEED_FACTOR,
            speed_soft_cap: SPEED_SOFT_CAP,
            speed_exponent: SPEED_EXPONENT,
            boost_multiplier: BOOST_MULTIPLIER,
            boost_drain: BOOST_DRAIN,
            boost_drop_interval_ms: BOOST_DROP_INTERVAL_MS,
            boost_margin: BOOST_MARGIN,
            tail_spacing: TAIL_SPACING,
            max_tail_points: MAX_TAIL_POINTS,
            collision_query_radius: COLLISION_QUERY_RADIUS,
            segment_sample_stride: SEGMENT_SAMPLE_STRIDE,
            view_radius: VIEW_RADIUS,
            tick_rate: TICK_RATE,
            snapshot_rate: SNAPSHOT_RATE,
            max_turn_rate: MAX_TURN_RATE,
            min_input_interval_ms: MIN_INPUT_INTERVAL_MS,
            starting_balance: STARTING_BALANCE,
        }
    }
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(ConfigError::Invalid("arena dimensions must be positive"));
        }
        if !(self.cell_size > 0.0) {
            return Err(ConfigError::Invalid("cell_size must be positive"));
        }
        if !(self.tail_spacing > 0.0) {
            return Err(ConfigError::Invalid("tail_spacing must be positive"));
        }
        if self.segment_sample_stride == 0 {
            return Err(ConfigError::Invalid("segment_sample_stride must be at least 1"));
        }
        if self.food_chunk_value == 0 {
            return Err(ConfigError::Invalid("food_chunk_value must be at least 1"));
        }
        if self.max_tail_points < 2 {
            return Err(ConfigError::Invalid("max_tail_points must be at least 2"));
        }
        if self.tick_rate == 0 || self.snapshot_rate == 0 {
            return Err(ConfigError::Invalid("tick and snapshot rates must be positive"));
        }
        if self.tick_rate > MAX_RATE_HZ || self.snapshot_rate > MAX_RATE_HZ {
            return Err(ConfigError::Invalid("tick and snapshot rates must not exceed 1000"));
        }
        if self.min_length > self.base_length {
            return Err(ConfigError::Invalid("min_length must not exceed base_length"));
        }
        if !(0.0..=1.0).contains(&self.min_speed_factor) {
            return Err(ConfigError::Invalid("min_speed_factor must lie in [0, 1]"));
        }
        if self.starting_balance < 0.0 || !self.starting_balance.is_finite() {
            return Err(ConfigError::Invalid("starting_balance must be a non-negative number"));
        }
        Ok(())
    }

    pub fn tick_interval_ms(&self) -> u64 {
        1000 / self.tick_rate
    }

    pub fn snapshot_interval_ms(&self) -> u64 {
        1000 / self.snapshot_rate
    }
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub kills_db_path: String,
    pub max_msgs_per_sec: u32,
    pub join_throttle_ms: u64,
    /// 0 disables the ping/pong liveness check.
    pub heartbeat_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            kills_db_path: DEFAULT_KILLS_DB_PATH.to_string(),
            max_msgs_per_sec: DEFAULT_MAX_MSGS_PER_SEC,
            join_throttle_ms: DEFAULT_JOIN_THROTTLE_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = ServerConfig::default();
        ServerConfig {
            port: env_or("PORT", defaults.port),
            kills_db_path: std::env::var("KILLS_DB_PATH").unwrap_or(defaults.kills_db_path),
            max_msgs_per_sec: env_or("MAX_MSGS_PER_SEC", defaults.max_msgs_per_sec),
            join_throttle_ms: env_or("JOIN_THROTTLE_MS", defaults.join_throttle_ms),
            heartbeat_interval_ms: env_or("HEARTBEAT_INTERVAL_MS", defaults.heartbeat_interval_ms),
        }
    }
}

fn env_or<T: std::str::FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, fallback = %default, "unparsable env value");
            default
        }),
        Err(_) => default,
    }
}
