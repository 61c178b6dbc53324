//! Multicast announce plane.
//!
//! The announcer broadcasts this node's identity triple on the configured
//! multicast group every few seconds over a connected UDP socket. The
//! listener joins the same group, turns first sightings into peer sessions
//! and later sightings into heartbeat resets; a companion sweep evicts
//! peers whose announces stopped arriving. Liveness rides on announces
//! only; sync chunks do not count.
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket as StdUdpSocket};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use super::peer::{connect_peer, purge_peer, run_session, PeerKey, PeerRecord, SessionContext};
use crate::error::Result;
use crate::wire::{Announcement, MAX_ANNOUNCE_SIZE};

/// Create the UDP socket announces are sent from. Connected to the group
/// endpoint so each tick is a plain `send`; loopback is disabled since the
/// listener filters self-announces anyway. The multicast TTL is left at
/// the IP default.
fn make_announce_socket(dest: SocketAddrV4) -> Result<StdUdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_multicast_loop_v4(false)?;
    socket.connect(&dest.into())?;

    Ok(socket.into())
}

/// Create the UDP socket the listener reads from: bound to the announce
/// port on all interfaces and joined to the multicast group.
fn make_listener_socket(group: Ipv4Addr, port: u16) -> Result<StdUdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&bind_addr.into())?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;

    Ok(socket.into())
}

/// Broadcast the identity triple on a fixed interval.
///
/// Runs until the task is aborted. Send failures are logged and the next
/// tick retries.
pub async fn announce_loop(
    announcement: Announcement,
    dest: SocketAddrV4,
    period: Duration,
) -> Result<()> {
    let socket = make_announce_socket(dest)?;
    let payload = announcement.encode()?;

    let mut interval = tokio::time::interval(period);

    info!(group = %dest, node = %announcement.uuid, "announcing the node");

    loop {
        interval.tick().await;

        match socket.send(&payload) {
            Ok(sent) if sent == payload.len() => trace!(bytes = sent, "announce sent"),
            Ok(sent) => warn!(
                sent,
                expected = payload.len(),
                "unable to announce the node: short write"
            ),
            Err(e) => warn!(error = %e, "unable to announce the node"),
        }
    }
}

/// Receive announces and keep the peer table in step with them.
///
/// Runs until the task is aborted.
pub async fn listener_loop(
    group: Ipv4Addr,
    port: u16,
    local_uuid: String,
    ctx: SessionContext,
) -> Result<()> {
    let socket = UdpSocket::from_std(make_listener_socket(group, port)?)?;

    info!(%group, port, "joined multicast group");

    let mut buf = [0u8; MAX_ANNOUNCE_SIZE];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "unable to receive an announce");
                continue;
            }
        };

        match Announcement::decode(&buf[..len]) {
            Ok(announcement) => handle_announce(announcement, &local_uuid, &ctx).await,
            Err(e) => warn!(%from, error = %e, "unable to decode an announce"),
        }
    }
}

/// Apply one announce: refresh a known peer's heartbeat or open a session
/// to an unknown one. Announces for one key are handled strictly in
/// sequence by the single listener task.
pub async fn handle_announce(announcement: Announcement, local_uuid: &str, ctx: &SessionContext) {
    if announcement.uuid == local_uuid {
        trace!("ignoring own announcement");
        return;
    }

    let key = PeerKey::from(announcement);

    if let Some(mut record) = ctx.peers.get_mut(&key) {
        debug!(node = %key.uuid, "resetting the heartbeat timeout");
        record.last_seen = Instant::now();
        return;
    }

    info!(node = %key.uuid, host = %key.hostname, port = key.port, "discovered node");

    // Only a connected peer enters the table; a failed connect leaves the
    // key unknown so the next announce retries from scratch.
    match connect_peer(&key).await {
        Ok(stream) => {
            let task = tokio::spawn(run_session(key.clone(), stream, ctx.clone()));

            ctx.peers.insert(
                key,
                PeerRecord {
                    last_seen: Instant::now(),
                    task,
                },
            );
        }
        Err(e) => {
            warn!(node = %key.uuid, error = %e, "will retry on the next announce");
        }
    }
}

/// One expiry pass: evict every peer whose last announce is older than the
/// heartbeat TTL. Returns how many sessions were torn down.
pub async fn sweep_peers(ctx: &SessionContext, ttl: Duration) -> usize {
    let candidates: Vec<PeerKey> = ctx
        .peers
        .iter()
        .filter(|entry| entry.last_seen.elapsed() >= ttl)
        .map(|entry| entry.key().clone())
        .collect();

    let mut evicted = 0;

    for key in candidates {
        // Re-check under the removal so a reset that raced the scan wins.
        let Some((key, record)) = ctx
            .peers
            .remove_if(&key, |_, record| record.last_seen.elapsed() >= ttl)
        else {
            continue;
        };

        warn!(node = %key.uuid, "node has timed out");

        record.task.abort();
        purge_peer(ctx, &key.uuid).await;
        evicted += 1;
    }

    evicted
}

/// Periodically run the expiry pass.
///
/// Runs until the task is aborted.
pub async fn expiry_loop(ctx: SessionContext, ttl: Duration) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        interval.tick().await;

        let evicted = sweep_peers(&ctx, ttl).await;
        if evicted > 0 {
            debug!(evicted, "expired peer sessions");
        }
    }
}
