//! Waypost application settings
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_LOCATOR: u16 = 10054;
pub const DEFAULT_PORT_LOCATOR: &str = "10054";
pub const STANDARD_PORT_API: u16 = 10080;
pub const DEFAULT_PORT_API: &str = "10080";

pub const DEFAULT_MULTICAST_GROUP: &str = "239.255.10.54";
pub const DEFAULT_ANNOUNCE_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_HEARTBEAT_TTL_SECS: u64 = 60;

#[derive(Clone, Debug)]
pub struct Settings {
    // This node's stable identity
    pub uuid: String,

    // Hostname peers resolve to reach this node
    pub hostname: String,

    // Bind address for the sync server and for published services
    pub endpoint: IpAddr,

    // TCP port of the sync server; also the UDP announce port
    pub locator_port: u16,

    // HTTP API listen port
    pub api_port: u16,

    // Multicast group for discovery; None runs the node standalone
    pub multicast_group: Option<Ipv4Addr>,

    // Optional [min, max) port range services are published on
    pub ports: Option<(u16, u16)>,

    // Whether this node consumes remote catalogs
    pub gateway: bool,

    // Seconds between multicast announces
    pub announce_interval_secs: u64,

    // Seconds of announce silence before a peer is evicted
    pub heartbeat_ttl_secs: u64,
}

impl Settings {
    /// Destination endpoint for outgoing announces.
    pub fn multicast_endpoint(&self) -> Option<SocketAddrV4> {
        self.multicast_group
            .map(|group| SocketAddrV4::new(group, self.locator_port))
    }

    /// Bind address of the TCP sync server.
    pub fn sync_bind(&self) -> SocketAddr {
        SocketAddr::new(self.endpoint, self.locator_port)
    }

    /// Bind address of the HTTP API.
    pub fn api_bind(&self) -> SocketAddr {
        SocketAddr::new(self.endpoint, self.api_port)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        let hostname = hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());

        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            hostname,
            endpoint: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            locator_port: STANDARD_PORT_LOCATOR,
            api_port: STANDARD_PORT_API,
            multicast_group: Some(DEFAULT_MULTICAST_GROUP.parse().expect("default group")),
            ports: None,
            gateway: false,
            announce_interval_secs: DEFAULT_ANNOUNCE_INTERVAL_SECS,
            heartbeat_ttl_secs: DEFAULT_HEARTBEAT_TTL_SECS,
        }
    }
}
