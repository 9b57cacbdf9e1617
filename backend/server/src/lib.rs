//! Documentation of a weekly canteen voting platform.
//!
//! Every participant holds at most one active order, picked from the current menu with per-item
//! options and free-text notes. Admins watch live tallies, close the vote when the order goes out
//! and reset the cycle for the next week.
//!
//!
//!
//! # General Infrastructure
//! - User goes to VPS public endpoint running the reverse proxy
//! - Reverse proxy authenticates the user and stamps `x-participant-id` and `x-participant-role`
//! - Reverse proxy forwards into this server, which trusts those two headers
//! - This server talks to Redis over the internal network
//!
//!
//!
//! # Request Flow
//!
//! - [`capability`] classifies the caller and rejects what its tier may not do
//! - [`admission`] gates every vote mutation on the global open/closed switch
//! - [`ledger`] commits the vote and its tally change as one transaction
//! - [`broadcast`] tells every connected session something changed, only after the commit
//! - Sessions re-read menu, tallies and their own vote, never trusting the event payload
//!
//!
//!
//! # Notes
//!
//! ## Optimistic Transactions
//! Switching a vote touches two tallies and one record. Run as separate statements, two participants
//! swapping between the same two items at once can leave a tally off by one for good. Instead each
//! operation reads what it needs with versions attached and commits all writes in one step that
//! fails if any of those versions moved. Conflicts are retried a bounded number of times before the
//! caller sees `409`.
//!
//! ## Redis vs Memory
//! Redis is the production store. The in-memory store implements the same contract and backs the
//! tests and local runs. With Redis, the server also relays events other processes publish, so a
//! menu load from the CLI reaches connected sessions.
//!
//!
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
//!
//! Run locally with the in-memory store.
//! ```sh
//! RUST_LOG=info cargo run --bin canteen
//! ```
//!
//! Run against Redis.
//! ```sh
//! CANTEEN_STORE=redis REDIS_URL=redis://127.0.0.1:6379 cargo run --bin canteen
//! ```
//!
//! Load a menu.
//! ```sh
//! REDIS_URL=redis://127.0.0.1:6379 cargo run --bin menu-loader -- menu.json
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header::CONTENT_TYPE},
    routing::{delete, get, post, put},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod admission;
pub mod broadcast;
pub mod capability;
pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod favorites;
pub mod ledger;
pub mod memory;
pub mod model;
pub mod roster;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;

use routes::*;
use state::State;

pub async fn start_server() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await?;

    info!("Starting server...");

    let app = app(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down...");

    Ok(())
}

pub fn app(state: Arc<State>) -> Router {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(PARTICIPANT_HEADER),
            HeaderName::from_static(ROLE_HEADER),
        ])
        .max_age(Duration::from_secs(60 * 60));

    if let Some(origin) = &state.config.cors_origin {
        match HeaderValue::from_str(origin) {
            Ok(origin) => cors = cors.allow_origin(origin),
            Err(e) => warn!("Ignoring invalid CORS_ORIGIN {origin}: {e}"),
        }
    }

    Router::new()
        .route("/api/me", get(me_handler))
        .route("/api/menu", get(menu_handler))
        .route("/api/tally", get(tally_handler))
        .route("/api/status", get(status_handler))
        .route("/api/vote", post(vote_handler).delete(cancel_handler))
        .route(
            "/api/favorites",
            get(favorites_handler).post(favorite_toggle_handler),
        )
        .route("/api/events", get(events_handler))
        .route("/api/participants", get(participants_handler))
        .route("/api/credentials/rotate", post(rotate_credentials_handler))
        .route("/api/admin/orders", get(orders_handler))
        .route("/api/admin/items", post(add_item_handler))
        .route(
            "/api/admin/items/{id}",
            put(edit_item_handler).delete(remove_item_handler),
        )
        .route("/api/admin/items/{id}/active", post(item_active_handler))
        .route("/api/admin/admission", post(admission_handler))
        .route("/api/admin/reset", post(reset_handler))
        .route("/api/admin/clear", post(clear_menu_handler))
        .route("/api/admin/participants", post(provision_handler))
        .route(
            "/api/admin/participants/{id}",
            delete(remove_participant_handler),
        )
        .route("/api/admin/participants/{id}/role", post(role_handler))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
