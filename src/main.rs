use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use axum::{routing::get, Router};
use tracing::info;
use tracing_subscriber::EnvFilter;

use snakepit::config::{GameConfig, ServerConfig};
use snakepit::db::{Database, SqliteKillLog};
use snakepit::game::engine;
use snakepit::game::world::World;
use snakepit::server::{http, ws};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = ServerConfig::from_env();
    let game = GameConfig::default();
    game.validate()?;

    // Ensure data directory exists
    if let Some(dir) = Path::new(&server.kills_db_path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }

    let db = Arc::new(Database::open(&server.kills_db_path)?);
    let kill_log = SqliteKillLog::spawn(db.clone())?;
    info!(path = %server.kills_db_path, "kill log ready");

    let world = World::new(game.clone(), Box::new(kill_log));
    info!(
        width = game.width,
        height = game.height,
        tick_rate = game.tick_rate,
        food = world.food().len(),
        "world created"
    );
    let engine = engine::spawn(world);

    let ws_state = ws::WsState {
        engine,
        game: Arc::new(game),
        server: Arc::new(server.clone()),
    };

    let app = Router::new()
        .route("/ws", get(ws::ws_handler).with_state(ws_state))
        .merge(http::api_routes(db));

    let addr = format!("0.0.0.0:{}", server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
