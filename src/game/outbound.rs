//! Collaborators the world pushes to but never owns: client connections and
//! the kill log. Every call is fire-and-forget; the world swallows failures.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::protocol::messages::ServerMessage;

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("connection closed")]
    Closed,
    #[error("kill log unavailable: {0}")]
    Unavailable(String),
}

/// Send capability for one client. The transport owns the socket; players
/// only hold a `Weak` to this.
pub trait Connection: Send + Sync {
    fn is_open(&self) -> bool;
    fn send(&self, msg: ServerMessage) -> Result<(), OutboundError>;
}

pub trait KillLog: Send {
    fn log(&self, record: &KillRecord) -> Result<(), OutboundError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KillReason {
    HeadVsBody,
}

impl KillReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            KillReason::HeadVsBody => "head_vs_body",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KillRecord {
    pub match_id: String,
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub killer_id: Option<u64>,
    pub victim_id: u64,
    pub x: f64,
    pub y: f64,
    pub victim_length: u64,
    pub killer_length: Option<u64>,
    pub reason: KillReason,
    pub bounty: f64,
}

/// Writes kills to the tracing output only.
#[derive(Debug, Default)]
pub struct TracingKillLog;

impl KillLog for TracingKillLog {
    fn log(&self, record: &KillRecord) -> Result<(), OutboundError> {
        info!(
            match_id = %record.match_id,
            tick = record.tick,
            killer = ?record.killer_id,
            victim = record.victim_id,
            victim_length = record.victim_length,
            bounty = record.bounty,
            reason = record.reason.as_str(),
            "kill"
        );
        Ok(())
    }
}
