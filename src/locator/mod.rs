//! The locator: local service table, discovery plane and routing glue.
use std::collections::BTreeMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub mod announce;
pub mod group;
pub mod peer;
pub mod router;
pub mod sync;

pub use group::GroupIndex;
pub use peer::{PeerKey, PeerTable};
pub use router::{RemoteDiff, Router};
pub use sync::Synchronizer;

use crate::error::{LocatorError, Result};
use crate::gateway::Gateway;
use crate::service::{Catalog, ServiceCounters, ServiceHandle, ServiceInfo};
use crate::settings::Settings;
use crate::storage::GroupStorage;
use crate::wire::{read_frame, write_frame, Announcement, LocatorRequest, SyncMessage};
use peer::SessionContext;

/// Per-node service locator.
///
/// Owns the table of locally-hosted services, the free-port pool, the
/// router and the synchronizer, and drives the discovery plane once
/// `connect` is called. All client-facing operations are safe to call from
/// any task; the two internal locks are never held across I/O.
pub struct Locator {
    settings: Settings,
    services: Arc<Mutex<ServiceTable>>,
    router: Arc<Router>,
    synchronizer: Arc<Synchronizer>,
    storage: Arc<dyn GroupStorage>,
    gateway: RwLock<Option<Arc<dyn Gateway>>>,
    peers: PeerTable,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    sync_addr: Mutex<Option<SocketAddr>>,
}

struct ServiceTable {
    // Insertion order is kept so reports stay deterministic.
    services: Vec<(String, Box<dyn ServiceHandle>)>,
    ports: Vec<u16>,
}

impl Locator {
    pub fn new(
        settings: Settings,
        storage: Arc<dyn GroupStorage>,
        gateway: Option<Arc<dyn Gateway>>,
    ) -> Self {
        info!(uuid = %settings.uuid, "this node's id");

        let mut ports = Vec::new();

        if let Some((min, max)) = settings.ports {
            info!(
                count = max.saturating_sub(min),
                min, max, "locator ports available"
            );

            // Stacked top-down so the lowest port is allocated first.
            for port in (min..max).rev() {
                ports.push(port);
            }
        }

        Self {
            settings,
            services: Arc::new(Mutex::new(ServiceTable {
                services: Vec::new(),
                ports,
            })),
            router: Arc::new(Router::new()),
            synchronizer: Arc::new(Synchronizer::new()),
            storage,
            gateway: RwLock::new(gateway),
            peers: peer::new_peer_table(),
            tasks: Mutex::new(Vec::new()),
            sync_addr: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn uuid(&self) -> &str {
        &self.settings.uuid
    }

    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    /// Number of remote locators with a live session.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Where the sync server actually listens, once connected.
    pub fn sync_addr(&self) -> Option<SocketAddr> {
        *self.sync_addr.lock()
    }

    /// Load every routing group from storage. A failing backend resets the
    /// group state so the node starts predictable rather than half-loaded.
    pub async fn load_groups(&self) {
        match self.try_load_groups().await {
            Ok(0) => info!("there are no routing groups to load"),
            Ok(count) => info!(count, "routing groups loaded"),
            Err(e) => {
                self.router.clear_groups();
                info!(error = %e, "unable to read groups from storage");
            }
        }
    }

    async fn try_load_groups(&self) -> Result<usize> {
        let names = self.storage.list_groups().await?;

        for name in &names {
            let mapping = self.storage.load_group(name).await?;
            self.router.add_group(name, &mapping);
        }

        Ok(names.len())
    }

    /// Publish a service under `name`: allocate a port, start the actor,
    /// record the handle, then let the router and every subscribed peer know.
    pub fn attach(&self, name: &str, mut service: Box<dyn ServiceHandle>) -> Result<()> {
        {
            let mut table = self.services.lock();

            if table.services.iter().any(|(taken, _)| taken == name) {
                return Err(LocatorError::DuplicateService(name.to_string()));
            }

            let port = if self.settings.ports.is_some() {
                // A popped port stays out of the pool even if run() fails:
                // a port that would not bind is not worth recycling.
                table.ports.pop().ok_or(LocatorError::NoPortsLeft)?
            } else {
                0
            };

            let endpoints = vec![(self.settings.endpoint.to_string(), port)];
            service.run(&endpoints)?;

            let published = service
                .endpoints()
                .first()
                .map(|(_, port)| *port)
                .unwrap_or(port);
            info!(service = name, port = published, "service published");

            table.services.push((name.to_string(), service));
        }

        self.router.add_local(name);
        self.push_catalog();

        Ok(())
    }

    /// Withdraw a service, returning the handle to the caller for disposal.
    /// The port it occupied goes back into the pool.
    pub fn detach(&self, name: &str) -> Result<Box<dyn ServiceHandle>> {
        let service = {
            let mut table = self.services.lock();

            let position = table
                .services
                .iter()
                .position(|(taken, _)| taken == name)
                .ok_or_else(|| LocatorError::ServiceNotFound(name.to_string()))?;

            let (_, mut service) = table.services.remove(position);

            let endpoints = service.endpoints();
            service.terminate();

            if self.settings.ports.is_some() {
                if let Some((_, port)) = endpoints.first() {
                    table.ports.push(*port);
                }
            }

            info!(
                service = name,
                port = endpoints.first().map(|(_, port)| *port),
                "service withdrawn"
            );

            service
        };

        self.router.remove_local(name);
        self.push_catalog();

        Ok(service)
    }

    fn push_catalog(&self) {
        if let Err(e) = self.synchronizer.update(&self.dump()) {
            warn!(error = %e, "unable to push a catalog update");
        }
    }

    /// Snapshot of the local catalog, as relayed to subscribers.
    pub fn dump(&self) -> Catalog {
        dump_table(&self.services)
    }

    /// Resolve a name to connection metadata: group draw first, then the
    /// local table, then the gateway.
    pub async fn resolve(&self, name: &str) -> Result<ServiceInfo> {
        let target = self.router.select_service(name)?;

        {
            let table = self.services.lock();

            if let Some((_, service)) = table.services.iter().find(|(taken, _)| *taken == target)
            {
                debug!(service = name, "providing service using the local node");
                return Ok(service.metadata());
            }
        }

        let gateway = self.gateway.read().clone();

        match gateway {
            Some(gateway) => gateway.resolve(&target).await,
            None => Err(LocatorError::Unavailable(target)),
        }
    }

    /// Usage snapshot of every local service, in attach order by name.
    pub fn reports(&self) -> BTreeMap<String, ServiceCounters> {
        let table = self.services.lock();

        table
            .services
            .iter()
            .map(|(name, service)| (name.clone(), service.counters()))
            .collect()
    }

    /// Re-read one group from storage. Absence deletes the group; a failing
    /// backend is reported to the caller.
    pub async fn refresh(&self, name: &str) -> Result<()> {
        match self.storage.load_group(name).await {
            Ok(mapping) => {
                self.router.add_group(name, &mapping);
                Ok(())
            }
            Err(LocatorError::GroupNotFound(_)) => {
                info!(group = name, "group is gone from storage, removing");
                self.router.remove_group(name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn session_context(&self) -> Option<SessionContext> {
        let gateway = self.gateway.read().clone()?;

        Some(SessionContext {
            router: self.router.clone(),
            gateway,
            peers: self.peers.clone(),
        })
    }

    /// Feed one announce into the discovery plane, exactly as the multicast
    /// listener would. A no-op unless gateway mode is active.
    pub async fn handle_announce(&self, announcement: Announcement) {
        match self.session_context() {
            Some(ctx) => {
                announce::handle_announce(announcement, &self.settings.uuid, &ctx).await
            }
            None => debug!("announce ignored: gateway mode is not active"),
        }
    }

    /// Run one heartbeat expiry pass. Returns the number of evicted peers.
    pub async fn sweep_peers(&self) -> usize {
        match self.session_context() {
            Some(ctx) => announce::sweep_peers(&ctx, self.settings.heartbeat_ttl()).await,
            None => 0,
        }
    }

    /// Bring up the discovery plane: the sync server and announcer, plus
    /// the announce listener and heartbeat sweep in gateway mode.
    pub async fn connect(&self) -> Result<()> {
        let Some(group) = self.settings.multicast_group else {
            return Err(LocatorError::Transport(
                "no multicast group configured".to_string(),
            ));
        };

        let mut tasks = Vec::new();

        // The sync server comes up first so announces always point at a
        // live port.
        let listener = TcpListener::bind(self.settings.sync_bind()).await?;
        let sync_addr = listener.local_addr()?;
        *self.sync_addr.lock() = Some(sync_addr);

        tasks.push(tokio::spawn(serve_sync(
            listener,
            self.synchronizer.clone(),
            self.services.clone(),
        )));

        if let Some(ctx) = self.session_context() {
            let uuid = self.settings.uuid.clone();
            let announce_port = self.settings.locator_port;

            let listener_ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) =
                    announce::listener_loop(group, announce_port, uuid, listener_ctx).await
                {
                    error!(error = %e, "announce listener failed");
                }
            }));

            tasks.push(tokio::spawn(announce::expiry_loop(
                ctx,
                self.settings.heartbeat_ttl(),
            )));
        }

        let announcement = Announcement {
            uuid: self.settings.uuid.clone(),
            hostname: self.settings.hostname.clone(),
            port: sync_addr.port(),
        };

        let dest = SocketAddrV4::new(group, self.settings.locator_port);
        let period = self.settings.announce_interval();

        tasks.push(tokio::spawn(async move {
            if let Err(e) = announce::announce_loop(announcement, dest, period).await {
                error!(error = %e, "announcer failed");
            }
        }));

        self.tasks.lock().extend(tasks);

        Ok(())
    }

    /// Deterministic teardown: choke subscribers, stop the background
    /// tasks, drop the gateway, then kill every peer session.
    pub fn disconnect(&self) {
        self.synchronizer.shutdown();

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        *self.sync_addr.lock() = None;

        *self.gateway.write() = None;

        let keys: Vec<PeerKey> = self.peers.iter().map(|entry| entry.key().clone()).collect();

        for key in keys {
            if let Some((_, record)) = self.peers.remove(&key) {
                record.task.abort();
            }
        }
    }
}

impl Drop for Locator {
    fn drop(&mut self) {
        let mut table = self.services.lock();

        if table.services.is_empty() {
            return;
        }

        warn!(count = table.services.len(), "disposing of orphan services");

        for (_, service) in table.services.iter_mut() {
            service.terminate();
        }

        table.services.clear();
    }
}

fn dump_table(services: &Mutex<ServiceTable>) -> Catalog {
    let table = services.lock();

    table
        .services
        .iter()
        .map(|(name, service)| (name.clone(), service.metadata()))
        .collect()
}

async fn serve_sync(
    listener: TcpListener,
    synchronizer: Arc<Synchronizer>,
    services: Arc<Mutex<ServiceTable>>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "sync accept failed");
                continue;
            }
        };

        debug!(%addr, "synchronize subscriber connected");

        tokio::spawn(handle_subscriber(
            stream,
            synchronizer.clone(),
            services.clone(),
        ));
    }
}

async fn handle_subscriber(
    mut stream: TcpStream,
    synchronizer: Arc<Synchronizer>,
    services: Arc<Mutex<ServiceTable>>,
) {
    match read_frame::<_, LocatorRequest>(&mut stream).await {
        Ok(LocatorRequest::Synchronize) => {}
        Err(e) => {
            warn!(error = %e, "dropping subscriber with a bad opening frame");
            return;
        }
    }

    let mut updates = match synchronizer.subscribe(&dump_table(&services)) {
        Ok(updates) => updates,
        Err(e) => {
            warn!(error = %e, "unable to build the initial snapshot");
            return;
        }
    };

    while let Some(message) = updates.recv().await {
        let terminal = matches!(message, SyncMessage::Choke | SyncMessage::Error(_));

        // A failed write means the subscriber is gone; the synchronizer
        // prunes this upstream on its next push.
        if write_frame(&mut stream, &message).await.is_err() {
            break;
        }

        if terminal {
            break;
        }
    }
}
