//! Local service model.
//!
//! The locator does not run services itself. It records handles to actors
//! started elsewhere and relays their connection metadata to peers. The
//! metadata is opaque to the locator: it is compared for equality and
//! serialized verbatim, never interpreted.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A network endpoint a service can be reached on.
pub type Endpoint = (String, u16);

/// Connection metadata for one service: where to reach it and how to talk
/// to it (protocol version plus the message catalog).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub endpoints: Vec<Endpoint>,
    pub version: u32,
    pub methods: BTreeMap<u32, String>,
}

impl ServiceInfo {
    pub fn new(endpoints: Vec<Endpoint>, version: u32, methods: BTreeMap<u32, String>) -> Self {
        Self {
            endpoints,
            version,
            methods,
        }
    }
}

/// A node's advertised services, keyed by name. BTreeMap keeps the map in
/// lexicographic order, which diff computation relies on.
pub type Catalog = BTreeMap<String, ServiceInfo>;

/// Usage snapshot of one local service, as returned by `reports`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCounters {
    /// Number of open channels.
    pub channels: u64,
    /// Consumed footprint per endpoint, keyed as "host:port".
    pub usage: BTreeMap<String, u64>,
}

/// Handle to a locally-hosted service actor.
///
/// Intentionally minimal. The actor runtime owns scheduling and I/O; the
/// locator only needs to start, stop and describe the service.
pub trait ServiceHandle: Send {
    /// Start the actor on the given endpoints.
    fn run(&mut self, endpoints: &[Endpoint]) -> Result<()>;

    /// Stop the actor. Idempotent.
    fn terminate(&mut self);

    /// The endpoints the actor is currently bound to.
    fn endpoints(&self) -> Vec<Endpoint>;

    /// Live connection metadata for this service.
    fn metadata(&self) -> ServiceInfo;

    /// Usage counters for this service.
    fn counters(&self) -> ServiceCounters;
}
