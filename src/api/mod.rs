//! HTTP surface of the locator.
//!
//! Clients resolve names, read usage reports and poke group refreshes over
//! plain HTTP. Peers never use this; they speak the binary sync protocol
//! on the locator port.
mod base;
mod handlers;

use std::sync::Arc;

use axum::{routing, Router};

use crate::locator::Locator;

pub fn api(locator: Arc<Locator>) -> Router {
    Router::new()
        .route("/", routing::get(base::root))
        .route("/health", routing::get(base::health))
        .route("/about", routing::get(base::about))
        .route("/v1/services/{name}", routing::get(handlers::resolve))
        .route("/v1/reports", routing::get(handlers::reports))
        .route("/v1/groups/{name}/refresh", routing::post(handlers::refresh))
        .with_state(locator)
}
