use std::sync::Arc;

use log::warn;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{ApiError, SessionResponse, StatusResponse};
use crate::device::StatusCache;
use crate::session_management::LifecycleState;
use crate::storage::SessionStore;

fn error_reply(status: StatusCode, message: impl Into<String>) -> reply::Response {
    reply::with_status(
        reply::json(&ApiError {
            message: message.into(),
        }),
        status,
    )
    .into_response()
}

/// GET /
pub fn dashboard_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end().and(warp::get()).and_then(|| async move {
        let html = r#"<html><head><title>Nightshift</title></head>
                <body><h1>Nightshift is running</h1>
                <p>See /status, /sessions/todo and /history for JSON.</p></body></html>"#;
        Ok::<_, Rejection>(reply::html(html))
    })
}

/// GET /status
pub fn status_route(
    store: Arc<dyn SessionStore>,
    status: StatusCache,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let store = store.clone();
            let status = status.clone();
            async move {
                let running = match store.list(LifecycleState::Running) {
                    Ok(list) => list.into_iter().map(SessionResponse::from).collect(),
                    Err(e) => {
                        warn!("Status route could not list Running: {}", e);
                        Vec::new()
                    }
                };
                let body = StatusResponse {
                    device: status.latest().as_ref().clone(),
                    running,
                };
                Ok::<_, Rejection>(reply::json(&body).into_response())
            }
        })
}

/// GET /sessions/:bucket
pub fn list_sessions_route(
    store: Arc<dyn SessionStore>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("sessions" / String)
        .and(warp::get())
        .and_then(move |bucket: String| {
            let store = store.clone();
            async move {
                let bucket = match bucket.parse::<LifecycleState>() {
                    Ok(b) => b,
                    Err(message) => {
                        return Ok::<_, Rejection>(error_reply(StatusCode::BAD_REQUEST, message))
                    }
                };
                match store.list(bucket) {
                    Ok(list) => {
                        let body: Vec<SessionResponse> =
                            list.into_iter().map(SessionResponse::from).collect();
                        Ok::<_, Rejection>(reply::json(&body).into_response())
                    }
                    Err(e) => {
                        warn!("Failed to list {}: {}", bucket, e);
                        Ok::<_, Rejection>(error_reply(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Failed to load sessions",
                        ))
                    }
                }
            }
        })
}

/// GET /history
pub fn history_route(
    store: Arc<dyn SessionStore>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("history")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let store = store.clone();
            async move {
                match store.read_history() {
                    Ok(records) => Ok::<_, Rejection>(reply::json(&records).into_response()),
                    Err(e) => {
                        warn!("Failed to read history: {}", e);
                        Ok::<_, Rejection>(error_reply(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Failed to load history",
                        ))
                    }
                }
            }
        })
}

/// GET /history/stats
pub fn history_stats_route(
    store: Arc<dyn SessionStore>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("history" / "stats")
        .and(warp::get())
        .and_then(move || {
            let store = store.clone();
            async move {
                match store.history_stats() {
                    Ok(stats) => Ok::<_, Rejection>(reply::json(&stats).into_response()),
                    Err(e) => {
                        warn!("Failed to compute history stats: {}", e);
                        Ok::<_, Rejection>(error_reply(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Failed to load history",
                        ))
                    }
                }
            }
        })
}
