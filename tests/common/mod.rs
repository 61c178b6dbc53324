//! Shared helpers for integration tests.
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use waypost::error::Result;
use waypost::gateway::{DirectGateway, Gateway};
use waypost::service::{Endpoint, ServiceCounters, ServiceHandle, ServiceInfo};
use waypost::settings::Settings;

/// Service handle that just remembers where it was started.
pub struct StaticService {
    version: u32,
    endpoints: Vec<Endpoint>,
}

impl StaticService {
    pub fn boxed(version: u32) -> Box<dyn ServiceHandle> {
        Box::new(Self {
            version,
            endpoints: Vec::new(),
        })
    }
}

impl ServiceHandle for StaticService {
    fn run(&mut self, endpoints: &[Endpoint]) -> Result<()> {
        self.endpoints = endpoints.to_vec();
        Ok(())
    }

    fn terminate(&mut self) {}

    fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.clone()
    }

    fn metadata(&self) -> ServiceInfo {
        ServiceInfo::new(self.endpoints.clone(), self.version, BTreeMap::new())
    }

    fn counters(&self) -> ServiceCounters {
        ServiceCounters {
            channels: 1,
            usage: BTreeMap::new(),
        }
    }
}

/// DirectGateway wrapper that records every notification in arrival order.
#[derive(Default)]
pub struct RecordingGateway {
    inner: DirectGateway,
    events: Mutex<Vec<String>>,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn consume(&self, uuid: &str, name: &str, info: &ServiceInfo) {
        self.events.lock().push(format!("consume {} {}", uuid, name));
        self.inner.consume(uuid, name, info).await;
    }

    async fn cleanup(&self, uuid: &str, name: &str) {
        self.events.lock().push(format!("cleanup {} {}", uuid, name));
        self.inner.cleanup(uuid, name).await;
    }

    async fn resolve(&self, name: &str) -> Result<ServiceInfo> {
        self.inner.resolve(name).await
    }
}

/// Loopback settings with ephemeral ports, suitable for in-process nodes.
pub fn node_settings(uuid: &str) -> Settings {
    Settings {
        uuid: uuid.to_string(),
        hostname: "127.0.0.1".to_string(),
        endpoint: IpAddr::V4(Ipv4Addr::LOCALHOST),
        locator_port: 0,
        api_port: 0,
        multicast_group: Some("239.255.77.54".parse().unwrap()),
        ports: None,
        gateway: false,
        announce_interval_secs: 1,
        heartbeat_ttl_secs: 60,
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached within two seconds");
}
