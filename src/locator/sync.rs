//! Server side of the synchronize stream.
//!
//! Every subscriber gets the full local catalog as one chunk immediately,
//! then a fresh snapshot after every attach/detach. Snapshots rather than
//! deltas keep this side stateless per subscriber; receivers compute their
//! own diffs. The MessagePack payload is serialized once per push into a
//! reused buffer and fanned out to all upstreams.
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;
use crate::service::Catalog;
use crate::wire::{encode_catalog, SyncMessage};

pub struct Synchronizer {
    inner: Mutex<SyncInner>,
}

struct SyncInner {
    upstreams: Vec<mpsc::UnboundedSender<SyncMessage>>,
    buffer: Vec<u8>,
}

impl SyncInner {
    fn chunk(&mut self, snapshot: &Catalog) -> Result<SyncMessage> {
        encode_catalog(snapshot, &mut self.buffer)?;
        Ok(SyncMessage::Chunk(self.buffer.clone()))
    }
}

impl Synchronizer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SyncInner {
                upstreams: Vec::new(),
                buffer: Vec::new(),
            }),
        }
    }

    /// Register a new upstream. The current snapshot is queued before the
    /// upstream becomes eligible for updates, so a subscriber never observes
    /// a gap between subscribing and the first chunk.
    pub fn subscribe(&self, snapshot: &Catalog) -> Result<mpsc::UnboundedReceiver<SyncMessage>> {
        let mut inner = self.inner.lock();

        let chunk = inner.chunk(snapshot)?;
        let (tx, rx) = mpsc::unbounded_channel();

        // The receiver end is alive right here, so this cannot fail.
        let _ = tx.send(chunk);
        inner.upstreams.push(tx);

        debug!(upstreams = inner.upstreams.len(), "synchronize subscriber added");

        Ok(rx)
    }

    /// Push a fresh snapshot to every live upstream. Upstreams whose
    /// connection task has gone away are dropped silently.
    pub fn update(&self, snapshot: &Catalog) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.upstreams.is_empty() {
            return Ok(());
        }

        let chunk = inner.chunk(snapshot)?;
        inner
            .upstreams
            .retain(|upstream| upstream.send(chunk.clone()).is_ok());

        debug!(upstreams = inner.upstreams.len(), "catalog snapshot pushed");

        Ok(())
    }

    /// Send a terminal choke to every upstream and forget them all.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();

        for upstream in inner.upstreams.drain(..) {
            let _ = upstream.send(SyncMessage::Choke);
        }
    }

    pub fn upstream_count(&self) -> usize {
        self.inner.lock().upstreams.len()
    }
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new()
    }
}
