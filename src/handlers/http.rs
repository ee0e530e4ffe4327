use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use crate::handlers::models::SharedServerList;
use crate::peers::HEALTH_SECRET_HEADER;
use crate::state::server_info::ServerInfo;
use crate::state::server_state::ServerState;
use crate::tick::unix_now;

/// App state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub state: Arc<ServerState>,
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/getInfo", get(get_info))
        .route("/api/healthcheck", get(healthcheck))
        .route("/api/shareServerList", post(share_server_list))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Thin HTTP handler: current ServerInfo
pub async fn get_info(State(app_state): State<AppState>) -> Json<ServerInfo> {
    Json(app_state.state.server_info().await)
}

/// Thin HTTP handler: 200 only for a caller holding our health secret
pub async fn healthcheck(State(app_state): State<AppState>, headers: HeaderMap) -> StatusCode {
    let presented = headers.get(HEALTH_SECRET_HEADER).and_then(|v| v.to_str().ok());
    if presented == Some(app_state.state.peers.health_secret()) {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    }
}

/// Thin HTTP handler: merge a peer's server list
pub async fn share_server_list(State(app_state): State<AppState>, body: Bytes) -> StatusCode {
    let urls: SharedServerList = match serde_json::from_slice(&body) {
        Ok(urls) => urls,
        Err(e) => {
            log::debug!("Rejected shared server list: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };
    app_state.state.peers.handle_incoming_servers(urls, unix_now());
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use crate::peers::directory::PeerDirectory;
    use crate::utils::config::Config;

    fn app() -> (Router, Arc<ServerState>) {
        let (tx, _rx) = mpsc::channel(4);
        let config = Arc::new(Config::default());
        let peers = Arc::new(PeerDirectory::new(config.clone()));
        peers.set_operational(true);
        let state = Arc::new(ServerState::new(tx, ServerInfo::from_config(&config, "1"), peers));
        (router(AppState { state: state.clone() }), state)
    }

    #[tokio::test]
    async fn test_get_info() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/api/getInfo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let info: ServerInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info.name, "my-server");
    }

    #[tokio::test]
    async fn test_healthcheck_secret() {
        let (app, state) = app();
        let secret = state.peers.health_secret().to_string();

        let ok = app
            .clone()
            .oneshot(
                Request::get("/api/healthcheck")
                    .header(HEALTH_SECRET_HEADER, secret)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let wrong = app
            .clone()
            .oneshot(
                Request::get("/api/healthcheck")
                    .header(HEALTH_SECRET_HEADER, "guess")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::FORBIDDEN);

        let missing = app
            .oneshot(Request::get("/api/healthcheck").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_share_server_list() {
        let (app, state) = app();
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/shareServerList")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"["https://a.example","https://b.example"]"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.peers.queued_for_update().len(), 2);

        let bad = app
            .oneshot(Request::post("/api/shareServerList").body(Body::from("{nope")).unwrap())
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }
}
