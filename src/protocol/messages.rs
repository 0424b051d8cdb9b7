use serde::{Deserialize, Deserializer, Serialize};

use crate::game::physics::Point;
use crate::game::wager::BetError;

// ── Client → Server ──

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        #[serde(default)]
        name: String,
        #[serde(default)]
        skin: String,
    },
    Input {
        #[serde(default)]
        angle: Option<f64>,
        #[serde(default)]
        boost: Option<bool>,
    },
    Ping {
        #[serde(default)]
        t: Option<f64>,
    },
    SetBet {
        /// Anything that is not a finite number arrives as NaN so the bet is
        /// rejected with `invalid_amount` rather than dropped.
        #[serde(default = "unusable_amount", deserialize_with = "lenient_amount")]
        amount: f64,
    },
    Respawn,
    CashoutRequest,
}

fn unusable_amount() -> f64 {
    f64::NAN
}

fn lenient_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(raw.as_f64().filter(|a| a.is_finite()).unwrap_or(f64::NAN))
}

// ── Server → Client ──

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        id: u64,
        width: f64,
        height: f64,
    },
    Snapshot {
        tick: u64,
        you: YouState,
        players: Vec<PlayerState>,
        foods: Vec<FoodState>,
        leaderboard: Vec<LeaderboardEntry>,
    },
    Death {
        killer_name: String,
        your_score: u64,
    },
    Balance {
        balance: f64,
        current_bet: f64,
        total: f64,
    },
    CashoutConfirmed {
        balance: f64,
        total: f64,
    },
    Pong {
        t: Option<f64>,
    },
    Error {
        code: BetError,
    },
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct YouState {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub length: u64,
    pub alive: bool,
    pub balance: f64,
    pub current_bet: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PlayerState {
    pub id: u64,
    pub name: String,
    pub skin: String,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub length: u64,
    pub radius: f64,
    pub alive: bool,
    pub boosting: bool,
    pub path: Vec<Point>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct FoodState {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub value: u32,
    pub color: &'static str,
    pub big: bool,
    pub phase: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub name: String,
    pub length: u64,
}
