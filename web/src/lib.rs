//! Axum HTTP surface for the voucher allocation ledger.
//!
//! This crate exposes the allocation approval workflow, the redemption
//! ledger and the two-phase QR flow over HTTP. Handlers stay thin: they
//! parse the request, call one service method from `voucher-core`, and map
//! domain errors onto status codes through [`AppError`].
//!
//! # Surface
//!
//! ```text
//! /health, /health/ready          liveness and readiness probes
//! /api/allocations ...            allocation CRUD + approval transitions
//! /api/events/:id/allocations     event-scoped listing
//! /api/allocations/:id/redeem     direct ledger writes and reads
//! /api/redemptions/intents ...    two-phase QR workflow
//! ```
//!
//! Every request carries a correlation ID (client-provided or generated)
//! that is attached to the request's tracing span and echoed on the
//! response.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

// Re-export key types for convenience
pub use config::Config;
pub use error::AppError;
pub use middleware::{correlation_id_layer, CorrelationIdExt, CORRELATION_ID_HEADER};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the complete Axum router.
///
/// Health checks live at the root; everything else is nested under `/api`.
/// The router carries trace, CORS and correlation-id layers.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Allocation CRUD
        .route("/allocations", post(handlers::allocations::create_allocation))
        .route(
            "/allocations/:id",
            get(handlers::allocations::get_allocation)
                .put(handlers::allocations::update_allocation)
                .delete(handlers::allocations::delete_allocation),
        )
        .route(
            "/events/:event_id/allocations",
            get(handlers::allocations::list_allocations),
        )
        // Approval state machine
        .route(
            "/allocations/:id/submit",
            post(handlers::allocations::submit_allocation),
        )
        .route(
            "/allocations/:id/resubmit",
            post(handlers::allocations::resubmit_allocation),
        )
        .route(
            "/allocations/:id/approve",
            post(handlers::allocations::approve_allocation),
        )
        .route(
            "/allocations/:id/reject",
            post(handlers::allocations::reject_allocation),
        )
        .route(
            "/allocations/:id/cancel",
            post(handlers::allocations::cancel_submission),
        )
        // Direct ledger operations
        .route("/allocations/:id/redeem", post(handlers::redemptions::redeem))
        .route(
            "/allocations/:id/reassign",
            post(handlers::redemptions::reassign),
        )
        .route("/allocations/:id/balance", get(handlers::redemptions::balance))
        .route("/allocations/:id/entries", get(handlers::redemptions::history))
        // Two-phase QR workflow
        .route(
            "/redemptions/intents",
            post(handlers::intents::initiate_intent),
        )
        .route(
            "/redemptions/intents/:token",
            get(handlers::intents::scan_intent),
        )
        .route(
            "/redemptions/intents/:token/confirm",
            post(handlers::intents::confirm_intent),
        )
        .route(
            "/redemptions/intents/:token/cancel",
            post(handlers::intents::cancel_intent),
        )
        .route(
            "/redemptions/intents/:token/expire",
            post(handlers::intents::expire_intent),
        );

    Router::new()
        // Health checks (no /api prefix)
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        // API routes under /api prefix
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
