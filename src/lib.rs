//! Receives Stripe webhook deliveries, verifies their signature and logs
//! subscription lifecycle changes.

pub mod config;
pub mod events;
pub mod handlers;
pub mod webhook;

use axum::{routing::post, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::webhook::WebhookVerifier;

pub use events::{dispatch, Dispatch, Event, FieldError, SubscriptionAction, SubscriptionChange};
pub use webhook::SignatureError;

pub const WEBHOOK_PATH: &str = "/stripe";

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Config,
    pub verifier: WebhookVerifier,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let verifier = WebhookVerifier::new(&config.stripe_secret, config.signature_tolerance_secs);
        Self { config, verifier }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(handlers::stripe_webhook))
        .with_state(Arc::new(state))
        .layer(TraceLayer::new_for_http())
}
