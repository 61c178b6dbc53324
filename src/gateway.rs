//! Gateway plugin seam.
//!
//! A gateway owns connectivity to remote services. The locator tells it
//! which remote services exist and asks it to resolve names that have no
//! local match; everything else about how clients reach remote nodes is
//! the gateway's business.
use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{LocatorError, Result};
use crate::service::ServiceInfo;

/// Pluggable consumer of remote catalog changes.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// A remote service became known (or its metadata changed).
    async fn consume(&self, uuid: &str, name: &str, info: &ServiceInfo);

    /// A remote service was withdrawn.
    async fn cleanup(&self, uuid: &str, name: &str);

    /// Resolve a name that did not match any local service.
    async fn resolve(&self, name: &str) -> Result<ServiceInfo>;
}

/// Built-in gateway that hands clients the remote node's own endpoints.
///
/// Keeps every consumed ServiceInfo keyed by service and advertising node;
/// resolve picks the candidate from the lowest uuid so repeated queries are
/// stable while the membership is.
#[derive(Debug, Default)]
pub struct DirectGateway {
    remotes: DashMap<String, BTreeMap<String, ServiceInfo>>,
}

impl DirectGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct remote service names currently known.
    pub fn known_services(&self) -> usize {
        self.remotes.len()
    }
}

#[async_trait]
impl Gateway for DirectGateway {
    async fn consume(&self, uuid: &str, name: &str, info: &ServiceInfo) {
        debug!(node = uuid, service = name, "consuming remote service");

        self.remotes
            .entry(name.to_string())
            .or_default()
            .insert(uuid.to_string(), info.clone());
    }

    async fn cleanup(&self, uuid: &str, name: &str) {
        debug!(node = uuid, service = name, "cleaning up remote service");

        if let Some(mut candidates) = self.remotes.get_mut(name) {
            candidates.remove(uuid);

            if candidates.is_empty() {
                drop(candidates);
                self.remotes.remove_if(name, |_, c| c.is_empty());
            }
        }
    }

    async fn resolve(&self, name: &str) -> Result<ServiceInfo> {
        self.remotes
            .get(name)
            .and_then(|candidates| candidates.values().next().cloned())
            .ok_or_else(|| LocatorError::Unavailable(name.to_string()))
    }
}
