//! Storefront API Library
//!
//! Checkout and order backend: converts carts into hosted checkout sessions,
//! and idempotently materializes orders from the gateway's asynchronous
//! payment-confirmation callbacks.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use std::sync::Arc;

use axum::{routing::get, Router};
use sea_orm::DatabaseConnection;
use tower_http::trace::TraceLayer;

use handlers::AppServices;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: AppServices,
}

/// Assembles the HTTP surface over the shared application state.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1/checkout", handlers::checkout::checkout_routes())
        .nest(
            "/api/v1/payments",
            handlers::payment_webhooks::webhook_routes(),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
