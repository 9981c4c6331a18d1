use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use corral_api::middleware::require_auth;
use corral_api::{AppState, AppStateInner, conversations};
use corral_gateway::connection;
use corral_gateway::registry::RoomRegistry;
use corral_types::api::Claims;

#[derive(Clone)]
struct GatewayState {
    registry: RoomRegistry,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corral=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("CORRAL_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("CORRAL_DB_PATH").unwrap_or_else(|_| "corral.db".into());
    let host = std::env::var("CORRAL_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("CORRAL_PORT")
        .unwrap_or_else(|_| "4000".into())
        .parse()?;

    // Durable conversation store
    let store = corral_store::Store::open(&PathBuf::from(&db_path))?;

    // Room registry: one instance for the process lifetime, rebuilt
    // from zero on restart. Clients rejoin their rooms on reconnect.
    let registry = RoomRegistry::new();

    let app_state: AppState = Arc::new(AppStateInner {
        store,
        jwt_secret: jwt_secret.clone(),
    });
    let gateway_state = GatewayState {
        registry,
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new().route("/health", get(health));

    let protected_routes = Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route(
            "/conversations/{other_user_id}",
            get(conversations::get_or_create),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            post(conversations::append_message),
        )
        .route(
            "/conversations/{conversation_id}/read",
            patch(conversations::mark_read),
        )
        .route(
            "/conversations/{conversation_id}/archive",
            patch(conversations::archive),
        )
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Corral messaging server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct GatewayAuth {
    token: String,
}

/// Authenticate at the HTTP upgrade layer, then hand the socket to the
/// gateway connection loop with the proven identity.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(auth): Query<GatewayAuth>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let token_data = decode::<Claims>(
        &auth.token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let user_id = token_data.claims.sub;
    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, state.registry, user_id)))
}
