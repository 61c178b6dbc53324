use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::error::LocatorError;
use crate::locator::Locator;
use crate::service::{ServiceCounters, ServiceInfo};

pub async fn resolve(
    Path(name): Path<String>,
    State(locator): State<Arc<Locator>>,
) -> Result<Json<ServiceInfo>, LocatorError> {
    locator.resolve(&name).await.map(Json)
}

pub async fn reports(
    State(locator): State<Arc<Locator>>,
) -> Json<BTreeMap<String, ServiceCounters>> {
    Json(locator.reports())
}

pub async fn refresh(
    Path(name): Path<String>,
    State(locator): State<Arc<Locator>>,
) -> Result<StatusCode, LocatorError> {
    locator.refresh(&name).await.map(|_| StatusCode::NO_CONTENT)
}
