use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::db::Database;

pub type SharedDb = Arc<Database>;

const DEFAULT_KILLS_LIMIT: u32 = 50;
const MAX_KILLS_LIMIT: u32 = 500;

#[derive(Deserialize)]
pub struct KillsQuery {
    pub limit: Option<u32>,
}

pub fn api_routes(db: SharedDb) -> Router {
    Router::new()
        .route("/api/kills", get(recent_kills))
        .with_state(db)
}

async fn recent_kills(
    State(db): State<SharedDb>,
    Query(query): Query<KillsQuery>,
) -> impl IntoResponse {
    let limit = clamp_limit(query.limit);
    let result = tokio::task::spawn_blocking(move || db.recent_kills(limit)).await;
    match result {
        Ok(Ok(kills)) => Json(kills).into_response(),
        Ok(Err(e)) => {
            warn!(error = %e, "failed to read kills");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read kills").into_response()
        }
        Err(e) => {
            warn!(error = %e, "kills query task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read kills").into_response()
        }
    }
}

fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_KILLS_LIMIT).clamp(1, MAX_KILLS_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_caps() {
        assert_eq!(clamp_limit(None), DEFAULT_KILLS_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(7)), 7);
        assert_eq!(clamp_limit(Some(10_000)), MAX_KILLS_LIMIT);
    }
}
