//! CLI for this application
//!
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::settings::{self, Settings};

#[derive(Clone, Debug, clap::Parser)]
pub struct Cli {
    #[clap(
        long,
        env("WAYPOST_UUID"),
        help = "Stable node identity; a v4 uuid is generated when omitted"
    )]
    pub uuid: Option<String>,

    #[clap(
        long,
        env("WAYPOST_HOSTNAME"),
        help = "Hostname peers resolve to reach this node; system hostname when omitted"
    )]
    pub hostname: Option<String>,

    #[clap(
        long,
        default_value = "0.0.0.0",
        env("WAYPOST_ENDPOINT"),
        help = "IP address to bind on"
    )]
    pub endpoint: IpAddr,

    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_LOCATOR,
        env("WAYPOST_LOCATOR_PORT"),
        help = "TCP port of the sync server; also the UDP announce port"
    )]
    pub locator_port: u16,

    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_API,
        env("WAYPOST_API_PORT"),
        help = "Port to bind the Waypost HTTP API server to"
    )]
    pub api_port: u16,

    #[clap(
        long,
        default_value = settings::DEFAULT_MULTICAST_GROUP,
        env("WAYPOST_MULTICAST_GROUP"),
        help = "Multicast group used for peer discovery"
    )]
    pub multicast_group: Ipv4Addr,

    #[clap(
        long,
        env("WAYPOST_STANDALONE"),
        help = "Run without discovery: no announces, no peers"
    )]
    pub standalone: bool,

    #[clap(
        long,
        env("WAYPOST_GATEWAY"),
        help = "Consume remote catalogs and resolve misses through the gateway"
    )]
    pub gateway: bool,

    #[clap(
        long,
        env("WAYPOST_PORTS_MIN"),
        help = "Lower bound (inclusive) of the port range services are published on"
    )]
    pub ports_min: Option<u16>,

    #[clap(
        long,
        env("WAYPOST_PORTS_MAX"),
        help = "Upper bound (exclusive) of the port range services are published on"
    )]
    pub ports_max: Option<u16>,

    #[clap(
        long,
        default_value = "5",
        env("WAYPOST_ANNOUNCE_INTERVAL_SECS"),
        help = "Seconds between multicast announces"
    )]
    pub announce_interval_secs: u64,

    #[clap(
        long,
        default_value = "60",
        env("WAYPOST_HEARTBEAT_TTL_SECS"),
        help = "Seconds of announce silence before a peer is evicted"
    )]
    pub heartbeat_ttl_secs: u64,

    #[clap(
        long,
        env("WAYPOST_GROUPS_FILE"),
        help = "JSON file holding routing groups as {group: {service: weight}}"
    )]
    pub groups_file: Option<PathBuf>,
}

impl Cli {
    pub fn into_settings(self) -> Settings {
        let uuid = self
            .uuid
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let hostname = self.hostname.unwrap_or_else(|| {
            hostname::get()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "localhost".to_string())
        });

        let ports = match (self.ports_min, self.ports_max) {
            (Some(min), Some(max)) if min < max => Some((min, max)),
            _ => None,
        };

        Settings {
            uuid,
            hostname,
            endpoint: self.endpoint,
            locator_port: self.locator_port,
            api_port: self.api_port,
            multicast_group: (!self.standalone).then_some(self.multicast_group),
            ports,
            gateway: self.gateway,
            announce_interval_secs: self.announce_interval_secs,
            heartbeat_ttl_secs: self.heartbeat_ttl_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults_become_settings() {
        let cli = Cli::parse_from(["waypost"]);
        let settings = cli.into_settings();

        assert_eq!(settings.locator_port, 10054);
        assert!(settings.multicast_group.is_some());
        assert!(settings.ports.is_none());
        assert!(!settings.gateway);
        assert!(!settings.uuid.is_empty());
    }

    #[test]
    fn test_standalone_disables_discovery() {
        let cli = Cli::parse_from(["waypost", "--standalone"]);
        let settings = cli.into_settings();

        assert!(settings.multicast_group.is_none());
    }

    #[test]
    fn test_port_range_requires_both_bounds() {
        let cli = Cli::parse_from(["waypost", "--ports-min", "9000"]);
        assert!(cli.into_settings().ports.is_none());

        let cli = Cli::parse_from(["waypost", "--ports-min", "9000", "--ports-max", "9002"]);
        assert_eq!(cli.into_settings().ports, Some((9000, 9002)));

        // An empty or inverted range is ignored.
        let cli = Cli::parse_from(["waypost", "--ports-min", "9002", "--ports-max", "9000"]);
        assert!(cli.into_settings().ports.is_none());
    }
}
