//! Waypost: a per-node service locator.
//!
//! Each node runs one locator. Services attach to it under symbolic names;
//! peers on the same network find each other through UDP multicast
//! announces and mirror each other's catalogs over a TCP sync stream.
//! Clients ask the locator to resolve a name and get back connection
//! metadata for a local service, a remote one via the gateway, or a member
//! of a weighted routing group.
pub mod api;
pub mod cli;
pub mod error;
pub mod gateway;
pub mod locator;
pub mod service;
pub mod settings;
pub mod storage;
pub mod wire;

pub use error::{LocatorError, Result};
pub use locator::Locator;
pub use service::{Catalog, ServiceHandle, ServiceInfo};
