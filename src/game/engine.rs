//! Single-owner actor around the [`World`]. Every mutation, the fixed-rate
//! tick and the snapshot broadcast run on one task, so no command ever lands
//! in the middle of a tick.

use std::sync::Weak;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::game::outbound::Connection;
use crate::game::player::{PlayerId, PlayerInput};
use crate::game::wager::{BetError, BetReceipt, CashOutReceipt};
use crate::game::world::World;
use crate::protocol::messages::{LeaderboardEntry, ServerMessage, YouState};

/// Longest step a single tick may integrate after a stall.
const MAX_DT: f64 = 0.25;
const LEADERBOARD_SIZE: usize = 10;

pub enum Command {
    Join {
        connection: Weak<dyn Connection>,
        name: String,
        skin: String,
        reply: oneshot::Sender<PlayerId>,
    },
    Leave {
        id: PlayerId,
    },
    Input {
        id: PlayerId,
        input: PlayerInput,
    },
    PlaceBet {
        id: PlayerId,
        amount: f64,
        reply: oneshot::Sender<Option<Result<BetReceipt, BetError>>>,
    },
    CashOut {
        id: PlayerId,
        reply: oneshot::Sender<Option<Result<CashOutReceipt, BetError>>>,
    },
    Respawn {
        id: PlayerId,
    },
}

/// Cloneable front door to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl EngineHandle {
    pub async fn join(
        &self,
        connection: Weak<dyn Connection>,
        name: String,
        skin: String,
    ) -> Option<PlayerId> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Join {
                connection,
                name,
                skin,
                reply,
            })
            .ok()?;
        rx.await.ok()
    }

    pub fn leave(&self, id: PlayerId) {
        let _ = self.tx.send(Command::Leave { id });
    }

    pub fn input(&self, id: PlayerId, input: PlayerInput) {
        let _ = self.tx.send(Command::Input { id, input });
    }

    pub fn respawn(&self, id: PlayerId) {
        let _ = self.tx.send(Command::Respawn { id });
    }

    /// `None` when the player is unknown or the engine is gone.
    pub async fn place_bet(&self, id: PlayerId, amount: f64) -> Option<Result<BetReceipt, BetError>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::PlaceBet { id, amount, reply }).ok()?;
        rx.await.ok().flatten()
    }

    pub async fn cash_out(&self, id: PlayerId) -> Result<CashOutReceipt, BetError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::CashOut { id, reply })
            .map_err(|_| BetError::CashoutFailed)?;
        rx.await
            .ok()
            .flatten()
            .unwrap_or(Err(BetError::CashoutFailed))
    }
}

/// Starts the engine task. It stops once every handle is dropped.
pub fn spawn(world: World) -> EngineHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(world, rx));
    EngineHandle { tx }
}

async fn run(mut world: World, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut tick_interval = interval(Duration::from_millis(world.config().tick_interval_ms()));
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut snapshot_interval =
        interval(Duration::from_millis(world.config().snapshot_interval_ms()));
    snapshot_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();

    info!(match_id = %world.match_id(), "engine started");
    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(cmd) => apply(&mut world, cmd),
                None => break,
            },
            _ = tick_interval.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last_tick).as_secs_f64().min(MAX_DT);
                last_tick = now;
                world.tick_at(dt, now);
            }
            _ = snapshot_interval.tick() => broadcast_snapshots(&world),
        }
    }
    info!(match_id = %world.match_id(), ticks = world.tick_id(), "engine stopped");
}

fn apply(world: &mut World, cmd: Command) {
    match cmd {
        Command::Join {
            connection,
            name,
            skin,
            reply,
        } => {
            let id = world.add_player(Some(connection), name, skin);
            if reply.send(id).is_err() {
                debug!(player = %id, "joiner went away before welcome");
                world.remove_player(id);
            }
        }
        Command::Leave { id } => world.remove_player(id),
        Command::Input { id, input } => world.handle_input(id, input),
        Command::PlaceBet { id, amount, reply } => {
            let _ = reply.send(world.place_bet(id, amount));
        }
        Command::CashOut { id, reply } => {
            let _ = reply.send(world.cash_out(id));
        }
        Command::Respawn { id } => world.respawn(id),
    }
}

/// Per-viewer snapshot of the last completed tick.
pub fn build_snapshot(
    world: &World,
    id: PlayerId,
    leaderboard: &[LeaderboardEntry],
) -> Option<ServerMessage> {
    let player = world.player(id)?;
    let aoi = world.aoi_for(id)?;
    Some(ServerMessage::Snapshot {
        tick: world.tick_id(),
        you: YouState {
            id: player.id.0,
            x: player.pos.x,
            y: player.pos.y,
            angle: player.angle,
            length: player.score(),
            alive: player.alive,
            balance: player.balance,
            current_bet: player.current_bet,
        },
        players: aoi.players,
        foods: aoi.foods,
        leaderboard: leaderboard.to_vec(),
    })
}

fn broadcast_snapshots(world: &World) {
    let leaderboard = world.leaderboard(LEADERBOARD_SIZE);
    for player in world.players() {
        if !player.connection_open() {
            continue;
        }
        if let Some(snapshot) = build_snapshot(world, player.id, &leaderboard) {
            player.notify(snapshot);
        }
    }
}
