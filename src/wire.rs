//! Wire formats for the discovery plane.
//!
//! Two codecs are in play. Multicast announces and catalog snapshots use
//! MessagePack, so any locator implementation can read them. The TCP
//! synchronization stream wraps snapshots in a small binary envelope with
//! length-prefixed framing; the chunk payload inside the envelope is the
//! MessagePack catalog, serialized once by the sender and relayed verbatim.
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::service::Catalog;

/// Announce datagrams never exceed this size; the listener reads into a
/// buffer of exactly this length.
pub const MAX_ANNOUNCE_SIZE: usize = 1024;

/// Upper bound on a single sync frame. Catalogs are tens to hundreds of
/// entries, so anything past this is a corrupt or hostile stream.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Identity triple broadcast on the multicast group: who this node is and
/// where its locator listens.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Announcement {
    pub uuid: String,
    pub hostname: String,
    pub port: u16,
}

impl Announcement {
    /// Serialize as one MessagePack datagram (a three-element array).
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Decode a received datagram.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

/// First frame sent by a subscriber after connecting to a peer locator.
#[derive(Clone, Debug, Decode, Encode, PartialEq, Eq)]
pub enum LocatorRequest {
    Synchronize,
}

/// Messages streamed from a locator to its synchronization subscribers.
#[derive(Clone, Debug, Decode, Encode, PartialEq, Eq)]
pub enum SyncMessage {
    /// One full catalog snapshot, MessagePack-encoded. Receivers diff
    /// against their previous view.
    Chunk(Vec<u8>),

    /// The sender hit an unrecoverable condition; the stream is over.
    Error(String),

    /// Orderly shutdown of the stream.
    Choke,
}

/// Serialize a catalog snapshot into `buffer`, reusing its allocation.
pub fn encode_catalog(catalog: &Catalog, buffer: &mut Vec<u8>) -> Result<()> {
    buffer.clear();
    rmp_serde::encode::write(buffer, catalog)?;
    Ok(())
}

/// Decode a chunk payload back into a catalog.
pub fn decode_catalog(payload: &[u8]) -> Result<Catalog> {
    Ok(rmp_serde::from_slice(payload)?)
}

fn frame_config() -> impl bincode::config::Config {
    bincode::config::standard().with_big_endian()
}

/// Write one length-prefixed frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Encode,
{
    let body = bincode::encode_to_vec(message, frame_config())?;

    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

/// Read one length-prefixed frame.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: Decode<()>,
{
    let len = reader.read_u32().await?;

    if len > MAX_FRAME_SIZE {
        return Err(crate::error::LocatorError::Protocol(format!(
            "frame of {} bytes exceeds the {} byte limit",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    let (message, _) = bincode::decode_from_slice(&body, frame_config())?;
    Ok(message)
}
