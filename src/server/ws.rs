use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, warn};

use crate::config::{GameConfig, ServerConfig};
use crate::game::engine::EngineHandle;
use crate::game::outbound::{Connection, OutboundError};
use crate::game::player::{PlayerId, PlayerInput};
use crate::protocol::messages::{ClientMessage, ServerMessage};

const MAX_NAME_CHARS: usize = 20;
const MAX_SKIN_CHARS: usize = 32;

#[derive(Clone)]
pub struct WsState {
    pub engine: EngineHandle,
    pub game: Arc<GameConfig>,
    pub server: Arc<ServerConfig>,
}

/// Outgoing half of one socket, as seen by the engine.
pub struct ClientConnection {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl Connection for ClientConnection {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send(&self, msg: ServerMessage) -> Result<(), OutboundError> {
        self.tx.send(msg).map_err(|_| OutboundError::Closed)
    }
}

/// Fixed one-second window message counter.
struct RateWindow {
    started: Instant,
    count: u32,
    limit: u32,
}

impl RateWindow {
    fn new(limit: u32) -> Self {
        RateWindow {
            started: Instant::now(),
            count: 0,
            limit,
        }
    }

    fn allow(&mut self, now: Instant) -> bool {
        if now.duration_since(self.started) > Duration::from_secs(1) {
            self.started = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.limit
    }
}

/// Minimum spacing between joins on one socket. The handshake join counts.
struct JoinGate {
    last: Instant,
    throttle: Duration,
}

impl JoinGate {
    fn new(throttle: Duration, joined_at: Instant) -> Self {
        JoinGate {
            last: joined_at,
            throttle,
        }
    }

    fn admit(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) < self.throttle {
            return false;
        }
        self.last = now;
        true
    }
}

/// Tracks whether the peer said anything since the last ping went out.
struct Heartbeat {
    answered: bool,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Heartbeat { answered: true }
    }
}

impl Heartbeat {
    fn heard(&mut self) {
        self.answered = true;
    }

    /// True if another ping should go out; false if the last one went unanswered.
    fn ping_due(&mut self) -> bool {
        std::mem::replace(&mut self.answered, false)
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    // Wait for the Join message first
    let (name, skin) = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Join { name, skin }) => break (name, skin),
                Ok(ClientMessage::Ping { t }) => {
                    if let Ok(json) = serde_json::to_string(&ServerMessage::Pong { t }) {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            return;
                        }
                    }
                }
                _ => continue,
            },
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => continue,
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let connection: Arc<dyn Connection> = Arc::new(ClientConnection { tx });
    let Some(id) = rejoin(&state, &connection, None, &name, &skin).await else {
        warn!("engine unavailable, dropping connection");
        return;
    };

    // Task: forward game messages and control frames to the websocket
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Message>();
    let mut forward_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => match serde_json::to_string(&msg) {
                        Ok(json) => Message::Text(json.into()),
                        Err(e) => {
                            warn!(error = %e, "failed to encode message");
                            continue;
                        }
                    },
                    None => break,
                },
                control = control_rx.recv() => match control {
                    Some(frame) => frame,
                    None => break,
                },
            };
            if sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Main loop: receive input from client
    let mut window = RateWindow::new(state.server.max_msgs_per_sec);
    let mut gate = JoinGate::new(Duration::from_millis(state.server.join_throttle_ms), Instant::now());
    let mut heartbeat = Heartbeat::default();
    let heartbeat_every = Duration::from_millis(state.server.heartbeat_interval_ms.max(1));
    let heartbeat_enabled = state.server.heartbeat_interval_ms > 0;
    let mut ping_timer = time::interval_at(time::Instant::now() + heartbeat_every, heartbeat_every);
    let mut current = id;
    loop {
        let frame = tokio::select! {
            _ = &mut forward_task => break,
            _ = ping_timer.tick(), if heartbeat_enabled => {
                if !heartbeat.ping_due() {
                    debug!(player = %current, "peer missed heartbeat");
                    break;
                }
                if control_tx.send(Message::Ping(Default::default())).is_err() {
                    break;
                }
                continue;
            }
            frame = receiver.next() => frame,
        };
        let text = match frame {
            Some(Ok(Message::Text(text))) => {
                heartbeat.heard();
                text
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => {
                heartbeat.heard();
                continue;
            }
        };
        let now = Instant::now();
        if !window.allow(now) {
            continue;
        }
        let Ok(msg) = serde_json::from_str::<ClientMessage>(&text) else {
            continue;
        };
        match msg {
            ClientMessage::Join { name, skin } => {
                if !gate.admit(now) {
                    continue;
                }
                match rejoin(&state, &connection, Some(current), &name, &skin).await {
                    Some(next) => current = next,
                    None => break,
                }
            }
            other => dispatch(&state.engine, &connection, current, other).await,
        }
    }

    forward_task.abort();
    state.engine.leave(current);
    debug!(player = %current, "socket closed");
}

/// Puts a fresh player on this socket, retiring `previous` first, and
/// welcomes it. `None` once the engine is gone.
async fn rejoin(
    state: &WsState,
    connection: &Arc<dyn Connection>,
    previous: Option<PlayerId>,
    name: &str,
    skin: &str,
) -> Option<PlayerId> {
    if let Some(old) = previous {
        state.engine.leave(old);
    }
    let id = state
        .engine
        .join(Arc::downgrade(connection), display_name(name), clean_skin(skin))
        .await?;
    let _ = connection.send(ServerMessage::Welcome {
        id: id.0,
        width: state.game.width,
        height: state.game.height,
    });
    Some(id)
}

async fn dispatch(engine: &EngineHandle, conn: &Arc<dyn Connection>, id: PlayerId, msg: ClientMessage) {
    match msg {
        ClientMessage::Input { angle, boost } => engine.input(id, PlayerInput { angle, boost }),
        ClientMessage::Ping { t } => {
            let _ = conn.send(ServerMessage::Pong { t });
        }
        ClientMessage::SetBet { amount } => {
            if let Some(Err(code)) = engine.place_bet(id, amount).await {
                let _ = conn.send(ServerMessage::Error { code });
            }
        }
        ClientMessage::Respawn => engine.respawn(id),
        ClientMessage::CashoutRequest => {
            if let Err(code) = engine.cash_out(id).await {
                let _ = conn.send(ServerMessage::Error { code });
            }
        }
        ClientMessage::Join { .. } => {}
    }
}

fn display_name(raw: &str) -> String {
    let name = raw.trim();
    if name.is_empty() {
        "Unnamed".to_string()
    } else {
        name.chars().take(MAX_NAME_CHARS).collect()
    }
}

fn clean_skin(raw: &str) -> String {
    let skin: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_SKIN_CHARS)
        .collect();
    if skin.is_empty() {
        "default".to_string()
    } else {
        skin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::engine;
    use crate::game::outbound::TracingKillLog;
    use crate::game::world::World;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_state() -> WsState {
        let game = GameConfig {
            initial_food: 0,
            food_spawn_chance: 0.0,
            ..GameConfig::default()
        };
        let world = World::with_rng(game.clone(), Box::new(TracingKillLog), StdRng::seed_from_u64(9));
        WsState {
            engine: engine::spawn(world),
            game: Arc::new(game),
            server: Arc::new(ServerConfig::default()),
        }
    }

    fn welcomed_ids(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<u64> {
        let mut ids = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ServerMessage::Welcome { id, .. } = msg {
                ids.push(id);
            }
        }
        ids
    }

    #[test]
    fn join_gate_ignores_joins_inside_throttle() {
        let t0 = Instant::now();
        let mut gate = JoinGate::new(Duration::from_millis(2000), t0);
        assert!(!gate.admit(t0 + Duration::from_millis(500)));
        assert!(!gate.admit(t0 + Duration::from_millis(1999)));
        assert!(gate.admit(t0 + Duration::from_millis(2000)));
        // The admitted join restarts the throttle.
        assert!(!gate.admit(t0 + Duration::from_millis(3000)));
        assert!(gate.admit(t0 + Duration::from_millis(4500)));
    }

    #[test]
    fn heartbeat_drops_silent_peer() {
        let mut hb = Heartbeat::default();
        assert!(hb.ping_due());
        hb.heard();
        assert!(hb.ping_due());
        // Nothing heard since that ping.
        assert!(!hb.ping_due());
    }

    #[tokio::test]
    async fn rejoin_replaces_the_sockets_player() {
        let state = test_state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection: Arc<dyn Connection> = Arc::new(ClientConnection { tx });

        let first = rejoin(&state, &connection, None, "alice", "neon").await.unwrap();
        let second = rejoin(&state, &connection, Some(first), "alice", "neon").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(welcomed_ids(&mut rx), vec![first.0, second.0]);

        assert_eq!(state.engine.place_bet(first, 10.0).await, None);
        assert!(matches!(state.engine.place_bet(second, 10.0).await, Some(Ok(_))));
    }

    #[tokio::test]
    async fn malformed_bet_gets_invalid_amount_reply() {
        let state = test_state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection: Arc<dyn Connection> = Arc::new(ClientConnection { tx });
        let id = rejoin(&state, &connection, None, "bob", "").await.unwrap();

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"set_bet","amount":"500"}"#).unwrap();
        dispatch(&state.engine, &connection, id, msg).await;

        let mut codes = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ServerMessage::Error { code } = msg {
                codes.push(code);
            }
        }
        assert_eq!(codes, vec![crate::game::wager::BetError::InvalidAmount]);
    }

    #[test]
    fn rate_window_resets_each_second() {
        let mut w = RateWindow::new(2);
        let t0 = Instant::now();
        assert!(w.allow(t0));
        assert!(w.allow(t0));
        assert!(!w.allow(t0));
        assert!(w.allow(t0 + Duration::from_millis(1500)));
    }

    #[test]
    fn names_and_skins_are_sanitised() {
        assert_eq!(display_name("   "), "Unnamed");
        assert_eq!(display_name(&"x".repeat(50)).len(), MAX_NAME_CHARS);
        assert_eq!(clean_skin(""), "default");
        assert_eq!(clean_skin("neon<script>"), "neonscript");
    }

    #[test]
    fn connection_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = ClientConnection { tx };
        assert!(conn.is_open());
        drop(rx);
        assert!(!conn.is_open());
        assert!(conn.send(ServerMessage::Pong { t: None }).is_err());
    }
}
