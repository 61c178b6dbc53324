//! Routing state: who advertises what, and how groups load-balance over it.
//!
//! The router keeps a dual index over remote catalogs (service -> advertising
//! nodes, node -> full catalog) plus the set of locally-hosted names and the
//! routing group registry. Everything sits behind one mutex: operations are
//! short and `select_service` is O(1) on the common pass-through path, so a
//! coarse lock is enough.
use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use super::group::GroupIndex;
use crate::error::{LocatorError, Result};
use crate::service::{Catalog, ServiceInfo};
use crate::storage::GroupMapping;

/// Symmetric difference between two catalog snapshots of one node, in
/// lexicographic name order. A changed ServiceInfo appears in both lists,
/// so downstream consumers observe it as a withdrawal plus a re-advertisement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteDiff {
    pub added: Vec<(String, ServiceInfo)>,
    pub removed: Vec<(String, ServiceInfo)>,
}

impl RemoteDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct Router {
    inner: Mutex<RouterInner>,
}

struct RouterInner {
    // Service name -> uuids of the remote nodes advertising it.
    by_service: BTreeMap<String, BTreeSet<String>>,

    // Inverse index: uuid -> that node's full catalog. Kept in lockstep
    // with by_service; a node with an empty catalog is not a node.
    by_peer: BTreeMap<String, Catalog>,

    // Names hosted by this node.
    locals: BTreeSet<String>,

    groups: GroupRegistry,

    rng: StdRng,
}

#[derive(Default)]
struct GroupRegistry {
    indices: BTreeMap<String, GroupIndex>,

    // Inverse index: service -> {group -> position in that group's vectors},
    // so availability flips touch only the affected groups.
    members: BTreeMap<String, BTreeMap<String, usize>>,
}

impl GroupRegistry {
    fn insert(&mut self, name: &str, mapping: &GroupMapping, active: &BTreeSet<String>) {
        self.remove(name);

        let mut index = GroupIndex::new(mapping);
        let services: Vec<String> = index.services().to_vec();

        for (position, service) in services.iter().enumerate() {
            self.members
                .entry(service.clone())
                .or_default()
                .insert(name.to_string(), position);

            if active.contains(service) {
                index.add(position);
            }
        }

        self.indices.insert(name.to_string(), index);
    }

    fn remove(&mut self, name: &str) {
        let Some(index) = self.indices.remove(name) else {
            return;
        };

        for service in index.services() {
            let mut now_empty = false;

            if let Some(groups) = self.members.get_mut(service) {
                groups.remove(name);
                now_empty = groups.is_empty();
            }

            if now_empty {
                self.members.remove(service);
            }
        }
    }

    fn service_up(&mut self, service: &str) {
        if let Some(groups) = self.members.get(service) {
            for (group, position) in groups {
                if let Some(index) = self.indices.get_mut(group) {
                    index.add(*position);
                }
            }
        }
    }

    fn service_down(&mut self, service: &str) {
        if let Some(groups) = self.members.get(service) {
            for (group, position) in groups {
                if let Some(index) = self.indices.get_mut(group) {
                    index.remove(*position);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.indices.clear();
        self.members.clear();
    }
}

impl RouterInner {
    fn available(&self, name: &str) -> bool {
        self.locals.contains(name) || self.by_service.contains_key(name)
    }

    fn add(&mut self, uuid: &str, name: &str, info: ServiceInfo) {
        let was_available = self.available(name);

        self.by_service
            .entry(name.to_string())
            .or_default()
            .insert(uuid.to_string());
        self.by_peer
            .entry(uuid.to_string())
            .or_default()
            .insert(name.to_string(), info);

        if !was_available {
            self.groups.service_up(name);
        }
    }

    // Drop one (uuid, name) edge from the service index and flip affected
    // groups if the name just vanished globally.
    fn retract(&mut self, uuid: &str, name: &str) {
        let mut removed = false;
        let mut now_empty = false;

        if let Some(uuids) = self.by_service.get_mut(name) {
            removed = uuids.remove(uuid);
            now_empty = uuids.is_empty();
        }

        if now_empty {
            self.by_service.remove(name);
        }

        if removed && !self.available(name) {
            self.groups.service_down(name);
        }
    }

    fn remove(&mut self, uuid: &str, name: &str) {
        let mut now_empty = false;

        if let Some(catalog) = self.by_peer.get_mut(uuid) {
            catalog.remove(name);
            now_empty = catalog.is_empty();
        }

        if now_empty {
            self.by_peer.remove(uuid);
        }

        self.retract(uuid, name);
    }
}

impl Router {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic router for tests: group selection draws come from the
    /// seeded generator.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            inner: Mutex::new(RouterInner {
                by_service: BTreeMap::new(),
                by_peer: BTreeMap::new(),
                locals: BTreeSet::new(),
                groups: GroupRegistry::default(),
                rng,
            }),
        }
    }

    /// Advertise a locally-hosted service.
    pub fn add_local(&self, name: &str) {
        let mut inner = self.inner.lock();

        let was_available = inner.available(name);

        if inner.locals.insert(name.to_string()) && !was_available {
            inner.groups.service_up(name);
        }
    }

    /// Retract a locally-hosted service.
    pub fn remove_local(&self, name: &str) {
        let mut inner = self.inner.lock();

        if inner.locals.remove(name) && !inner.available(name) {
            inner.groups.service_down(name);
        }
    }

    /// Replace the recorded catalog of a remote node, returning what changed.
    pub fn update_remote(&self, uuid: &str, catalog: Catalog) -> RemoteDiff {
        let mut inner = self.inner.lock();

        let old = inner.by_peer.get(uuid).cloned().unwrap_or_default();

        let mut removed = Vec::new();
        for (name, info) in &old {
            if catalog.get(name) != Some(info) {
                removed.push((name.clone(), info.clone()));
            }
        }

        let mut added = Vec::new();
        for (name, info) in &catalog {
            if old.get(name) != Some(info) {
                added.push((name.clone(), info.clone()));
            }
        }

        for (name, _) in &removed {
            inner.remove(uuid, name);
        }

        for (name, info) in &added {
            inner.add(uuid, name, info.clone());
        }

        debug!(
            node = uuid,
            added = added.len(),
            removed = removed.len(),
            "remote catalog updated"
        );

        RemoteDiff { added, removed }
    }

    /// Forget a remote node entirely, returning its last known catalog.
    pub fn remove_remote(&self, uuid: &str) -> Catalog {
        let mut inner = self.inner.lock();

        let catalog = inner.by_peer.remove(uuid).unwrap_or_default();

        for name in catalog.keys() {
            inner.retract(uuid, name);
        }

        catalog
    }

    /// Whether any node, local or remote, advertises this name.
    pub fn has(&self, name: &str) -> bool {
        self.inner.lock().available(name)
    }

    /// Install or replace a routing group.
    pub fn add_group(&self, name: &str, mapping: &GroupMapping) {
        let mut inner = self.inner.lock();

        let active: BTreeSet<String> = mapping
            .keys()
            .filter(|service| inner.available(service))
            .cloned()
            .collect();

        inner.groups.insert(name, mapping, &active);

        info!(group = name, members = mapping.len(), "routing group updated");
    }

    /// Drop a routing group. Unknown names are a no-op.
    pub fn remove_group(&self, name: &str) {
        let mut inner = self.inner.lock();

        inner.groups.remove(name);

        info!(group = name, "routing group removed");
    }

    /// Drop every routing group, keeping service state intact.
    pub fn clear_groups(&self) {
        self.inner.lock().groups.clear();
    }

    /// Map a requested name to a concrete service name. Group names run the
    /// weighted draw; anything else passes through verbatim.
    pub fn select_service(&self, name: &str) -> Result<String> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        match inner.groups.indices.get(name) {
            Some(index) => index
                .select(&mut inner.rng)
                .map(str::to_string)
                .ok_or_else(|| LocatorError::NoGroupCandidate(name.to_string())),
            None => Ok(name.to_string()),
        }
    }

    /// Uuids of every known remote node.
    pub fn peers(&self) -> Vec<String> {
        self.inner.lock().by_peer.keys().cloned().collect()
    }

    /// Last recorded catalog of one remote node.
    pub fn peer_catalog(&self, uuid: &str) -> Option<Catalog> {
        self.inner.lock().by_peer.get(uuid).cloned()
    }

    /// Uuids of the remote nodes advertising one service name.
    pub fn advertisers(&self, name: &str) -> Vec<String> {
        self.inner
            .lock()
            .by_service
            .get(name)
            .map(|uuids| uuids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Active weights of one group, paired with their sum.
    pub fn group_weights(&self, name: &str) -> Option<(Vec<u32>, u64)> {
        let inner = self.inner.lock();

        inner
            .groups
            .indices
            .get(name)
            .map(|index| (index.used_weights().to_vec(), index.sum()))
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
