//! Client side of the synchronize stream: one session per remote node.
//!
//! A session owns its TCP connection for its whole life. It subscribes,
//! then turns every inbound snapshot into a router diff and the matching
//! gateway notifications, in arrival order. Whoever removes the peer's
//! table entry (the session itself on stream end, or the expiry sweep on
//! heartbeat timeout) performs the router purge, so it happens exactly
//! once and never from inside the inbound handler.
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::router::Router;
use crate::error::{LocatorError, Result};
use crate::gateway::Gateway;
use crate::wire::{decode_catalog, read_frame, write_frame, Announcement, LocatorRequest, SyncMessage};

/// Identity and transport coordinates of one remote locator. The uuid is
/// the authoritative identity; hostname and port only say where to connect.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerKey {
    pub uuid: String,
    pub hostname: String,
    pub port: u16,
}

impl From<Announcement> for PeerKey {
    fn from(announcement: Announcement) -> Self {
        Self {
            uuid: announcement.uuid,
            hostname: announcement.hostname,
            port: announcement.port,
        }
    }
}

/// Table entry for a live peer session.
pub struct PeerRecord {
    /// When the last multicast announce for this key arrived. Liveness is
    /// tracked on announces, not on sync chunks.
    pub last_seen: Instant,
    pub(crate) task: JoinHandle<()>,
}

/// The peer table, shared between the announce listener, the expiry sweep
/// and the session tasks.
pub type PeerTable = Arc<DashMap<PeerKey, PeerRecord>>;

pub fn new_peer_table() -> PeerTable {
    Arc::new(DashMap::new())
}

/// Everything a session needs to apply inbound catalog traffic.
#[derive(Clone)]
pub struct SessionContext {
    pub router: Arc<Router>,
    pub gateway: Arc<dyn Gateway>,
    pub peers: PeerTable,
}

/// Resolve the peer's hostname and connect to the first reachable endpoint.
pub(crate) async fn connect_peer(key: &PeerKey) -> Result<TcpStream> {
    let endpoints = lookup_host((key.hostname.as_str(), key.port))
        .await
        .map_err(|e| {
            LocatorError::Unreachable(format!("{}: resolving {}: {}", key.uuid, key.hostname, e))
        })?;

    for endpoint in endpoints {
        match TcpStream::connect(endpoint).await {
            Ok(stream) => {
                debug!(node = %key.uuid, %endpoint, "connected to node");
                return Ok(stream);
            }
            Err(e) => {
                warn!(node = %key.uuid, %endpoint, error = %e, "endpoint connect failed");
            }
        }
    }

    Err(LocatorError::Unreachable(key.uuid.clone()))
}

/// Drive one session to completion, then purge the peer if this task still
/// owns its table entry.
pub(crate) async fn run_session(key: PeerKey, mut stream: TcpStream, ctx: SessionContext) {
    match session_loop(&mut stream, &key, &ctx).await {
        Ok(()) => info!(node = %key.uuid, "node has been shut down"),
        Err(e) => warn!(node = %key.uuid, error = %e, "node has unexpectedly disconnected"),
    }

    // Erasure is deferred until the read loop has fully unwound. The
    // removal also decides who purges: the expiry sweep skips peers whose
    // entry is already gone.
    if ctx.peers.remove(&key).is_some() {
        purge_peer(&ctx, &key.uuid).await;
    }
}

async fn session_loop<S>(stream: &mut S, key: &PeerKey, ctx: &SessionContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_frame(stream, &LocatorRequest::Synchronize).await?;

    loop {
        match read_frame::<_, SyncMessage>(stream).await? {
            SyncMessage::Chunk(payload) => {
                // A snapshot that does not decode means the peer speaks a
                // different protocol; the session is over.
                let catalog = decode_catalog(&payload).map_err(|e| {
                    LocatorError::Protocol(format!("undecodable catalog chunk: {}", e))
                })?;

                let diff = ctx.router.update_remote(&key.uuid, catalog);

                for (name, _) in &diff.removed {
                    ctx.gateway.cleanup(&key.uuid, name).await;
                }

                for (name, info) in &diff.added {
                    ctx.gateway.consume(&key.uuid, name, info).await;
                }
            }

            SyncMessage::Error(reason) => {
                debug!(node = %key.uuid, reason = %reason, "node signalled an error");
                return Ok(());
            }

            SyncMessage::Choke => return Ok(()),
        }
    }
}

/// Forget everything a node advertised and tell the gateway about each name.
pub(crate) async fn purge_peer(ctx: &SessionContext, uuid: &str) {
    let dropped = ctx.router.remove_remote(uuid);

    for name in dropped.keys() {
        ctx.gateway.cleanup(uuid, name).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceInfo;
    use crate::wire::encode_catalog;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// Gateway that records every notification in order.
    #[derive(Default)]
    struct RecordingGateway {
        events: Mutex<Vec<String>>,
    }

    impl RecordingGateway {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    #[async_trait]
    impl Gateway for RecordingGateway {
        async fn consume(&self, uuid: &str, name: &str, _info: &ServiceInfo) {
            self.events.lock().push(format!("consume {} {}", uuid, name));
        }

        async fn cleanup(&self, uuid: &str, name: &str) {
            self.events.lock().push(format!("cleanup {} {}", uuid, name));
        }

        async fn resolve(&self, name: &str) -> Result<ServiceInfo> {
            Err(LocatorError::Unavailable(name.to_string()))
        }
    }

    fn test_context() -> (SessionContext, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::default());
        let ctx = SessionContext {
            router: Arc::new(Router::with_seed(1)),
            gateway: gateway.clone(),
            peers: new_peer_table(),
        };
        (ctx, gateway)
    }

    fn key() -> PeerKey {
        PeerKey {
            uuid: "node-a".to_string(),
            hostname: "127.0.0.1".to_string(),
            port: 10054,
        }
    }

    fn catalog(names: &[&str]) -> crate::service::Catalog {
        names
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    ServiceInfo::new(vec![("127.0.0.1".to_string(), 1)], 1, BTreeMap::new()),
                )
            })
            .collect()
    }

    async fn send_chunk(
        stream: &mut (impl AsyncRead + AsyncWrite + Unpin),
        names: &[&str],
    ) {
        let mut payload = Vec::new();
        encode_catalog(&catalog(names), &mut payload).unwrap();
        write_frame(stream, &SyncMessage::Chunk(payload)).await.unwrap();
    }

    #[tokio::test]
    async fn test_session_applies_chunks_in_order() {
        let (ctx, gateway) = test_context();
        let (mut local, mut remote) = tokio::io::duplex(4096);

        let driver = {
            let ctx = ctx.clone();
            tokio::spawn(async move { session_loop(&mut local, &key(), &ctx).await })
        };

        let request: LocatorRequest = read_frame(&mut remote).await.unwrap();
        assert_eq!(request, LocatorRequest::Synchronize);

        send_chunk(&mut remote, &["x", "y"]).await;
        send_chunk(&mut remote, &["y", "z"]).await;
        write_frame(&mut remote, &SyncMessage::Choke).await.unwrap();

        driver.await.unwrap().unwrap();

        // Diff of the second chunk: x withdrawn, z advertised, y untouched.
        assert_eq!(
            gateway.events(),
            [
                "consume node-a x",
                "consume node-a y",
                "cleanup node-a x",
                "consume node-a z",
            ]
        );
        assert!(ctx.router.has("z"));
        assert!(!ctx.router.has("x"));
    }

    #[tokio::test]
    async fn test_error_message_ends_the_session_cleanly() {
        let (ctx, _) = test_context();
        let (mut local, mut remote) = tokio::io::duplex(4096);

        let driver = tokio::spawn(async move { session_loop(&mut local, &key(), &ctx).await });

        let _: LocatorRequest = read_frame(&mut remote).await.unwrap();
        write_frame(&mut remote, &SyncMessage::Error("going down".to_string()))
            .await
            .unwrap();

        driver.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_undecodable_chunk_is_a_protocol_violation() {
        let (ctx, _) = test_context();
        let (mut local, mut remote) = tokio::io::duplex(4096);

        let driver = tokio::spawn(async move { session_loop(&mut local, &key(), &ctx).await });

        let _: LocatorRequest = read_frame(&mut remote).await.unwrap();
        write_frame(&mut remote, &SyncMessage::Chunk(vec![0xde, 0xad]))
            .await
            .unwrap();

        let result = driver.await.unwrap();
        assert!(matches!(result, Err(LocatorError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_purge_notifies_gateway_per_name() {
        let (ctx, gateway) = test_context();

        ctx.router.update_remote("node-a", catalog(&["x", "y"]));
        purge_peer(&ctx, "node-a").await;

        assert_eq!(gateway.events(), ["cleanup node-a x", "cleanup node-a y"]);
        assert!(ctx.router.peers().is_empty());
    }

    #[tokio::test]
    async fn test_connect_peer_unreachable() {
        // Port 1 on loopback is almost certainly closed.
        let key = PeerKey {
            uuid: "node-a".to_string(),
            hostname: "127.0.0.1".to_string(),
            port: 1,
        };

        let result = connect_peer(&key).await;
        assert!(matches!(result, Err(LocatorError::Unreachable(_))));
    }
}
