//! In-process Bluetooth central
//!
//! Plays the die side of the transfer protocol so the scheduler can run
//! without a radio. Used by the daemon's simulation mode and by tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use pixels_core::PixelId;
use pixels_dataset::{dataset_hash, DataSetView};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::link::{AdapterState, Central, DieLink, LinkError};
use crate::messages::{Message, TransferAckResult, TransferKind};

/// Behaviour of one simulated die
#[derive(Debug, Clone)]
pub struct DieOptions {
    /// Bytes available for a single payload
    pub memory: usize,
    pub max_message_size: usize,
    /// Drop the link after acknowledging this many chunks of the next transfer
    pub drop_after_chunks: Option<usize>,
    /// Time the die takes to store one bulk data chunk
    pub chunk_delay: Duration,
}

impl Default for DieOptions {
    fn default() -> Self {
        Self {
            memory: 1024 * 1024,
            max_message_size: 512,
            drop_after_chunks: None,
            chunk_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct PendingTransfer {
    kind: TransferKind,
    size: usize,
    buffer: Vec<u8>,
    chunks: usize,
}

#[derive(Debug, Default)]
struct SimDie {
    options: DieOptions,
    failing_connects: u32,
    always_fail: bool,
    stored: HashMap<TransferKind, (u32, Vec<u8>)>,
    pending: Option<PendingTransfer>,
}

#[derive(Debug, Default)]
struct Shared {
    dice: HashMap<PixelId, SimDie>,
    connect_log: Vec<PixelId>,
    active: usize,
    max_active: usize,
}

#[derive(Clone)]
pub struct SimulatedCentral {
    adapter: Arc<watch::Sender<AdapterState>>,
    shared: Arc<Mutex<Shared>>,
    connect_delay: Duration,
}

impl Default for SimulatedCentral {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCentral {
    pub fn new() -> Self {
        let (adapter, _) = watch::channel(AdapterState::PoweredOn);
        Self {
            adapter: Arc::new(adapter),
            shared: Arc::new(Mutex::new(Shared::default())),
            connect_delay: Duration::ZERO,
        }
    }

    /// Time each connection attempt takes
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock_shared(&self.shared)
    }

    pub fn add_die(&self, pixel: PixelId, options: DieOptions) {
        self.lock().dice.insert(
            pixel,
            SimDie {
                options,
                ..SimDie::default()
            },
        );
    }

    pub fn set_adapter(&self, state: AdapterState) {
        info!(state = ?state, "Simulated adapter state");
        self.adapter.send_replace(state);
    }

    pub fn fail_next_connects(&self, pixel: PixelId, count: u32) {
        if let Some(die) = self.lock().dice.get_mut(&pixel) {
            die.failing_connects = count;
        }
    }

    pub fn always_fail(&self, pixel: PixelId, fail: bool) {
        if let Some(die) = self.lock().dice.get_mut(&pixel) {
            die.always_fail = fail;
        }
    }

    pub fn drop_link_after(&self, pixel: PixelId, chunks: usize) {
        if let Some(die) = self.lock().dice.get_mut(&pixel) {
            die.options.drop_after_chunks = Some(chunks);
        }
    }

    /// Dice in the order connections were established
    pub fn connect_order(&self) -> Vec<PixelId> {
        self.lock().connect_log.clone()
    }

    pub fn active_links(&self) -> usize {
        self.lock().active
    }

    /// Highest number of links open at the same time
    pub fn max_concurrent(&self) -> usize {
        self.lock().max_active
    }

    pub fn stored_hash(&self, pixel: PixelId, kind: TransferKind) -> Option<u32> {
        self.lock()
            .dice
            .get(&pixel)
            .and_then(|die| die.stored.get(&kind))
            .map(|(hash, _)| *hash)
    }

    pub fn stored_payload(&self, pixel: PixelId, kind: TransferKind) -> Option<Vec<u8>> {
        self.lock()
            .dice
            .get(&pixel)
            .and_then(|die| die.stored.get(&kind))
            .map(|(_, bytes)| bytes.clone())
    }
}

fn lock_shared(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Central for SimulatedCentral {
    fn adapter_state(&self) -> watch::Receiver<AdapterState> {
        self.adapter.subscribe()
    }

    async fn connect(&self, pixel: PixelId) -> Result<Box<dyn DieLink>, LinkError> {
        if !self.adapter.borrow().is_ready() {
            return Err(LinkError::AdapterUnavailable);
        }
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let mut shared = self.lock();
        let die = shared
            .dice
            .get_mut(&pixel)
            .ok_or_else(|| LinkError::ConnectionFailed(format!("{} not in range", pixel)))?;
        if die.always_fail {
            return Err(LinkError::ConnectionFailed("no response".to_string()));
        }
        if die.failing_connects > 0 {
            die.failing_connects -= 1;
            return Err(LinkError::ConnectionFailed("no response".to_string()));
        }
        die.pending = None;
        let max_message_size = die.options.max_message_size;
        let chunk_delay = die.options.chunk_delay;

        shared.connect_log.push(pixel);
        shared.active += 1;
        shared.max_active = shared.max_active.max(shared.active);
        debug!(pixel = %pixel, active = shared.active, "Simulated link open");

        Ok(Box::new(SimLink {
            pixel,
            shared: self.shared.clone(),
            max_message_size,
            chunk_delay,
            open: true,
        }))
    }
}

struct SimLink {
    pixel: PixelId,
    shared: Arc<Mutex<Shared>>,
    max_message_size: usize,
    chunk_delay: Duration,
    open: bool,
}

impl SimLink {
    fn close(&mut self, shared: &mut Shared) {
        if self.open {
            self.open = false;
            shared.active = shared.active.saturating_sub(1);
            debug!(pixel = %self.pixel, "Simulated link closed");
        }
    }

    fn respond(&mut self, message: Message) -> Result<Message, LinkError> {
        let shared_arc = self.shared.clone();
        let mut shared = lock_shared(&shared_arc);
        let die = shared.dice.get_mut(&self.pixel).ok_or(LinkError::Disconnected)?;

        match message {
            Message::TransferPayload { kind, size, hash } => {
                let size = size as usize;
                if die.stored.get(&kind).is_some_and(|(stored, _)| *stored == hash) {
                    return Ok(Message::TransferAck(TransferAckResult::UpToDate));
                }
                if size > die.options.memory {
                    return Ok(Message::TransferAck(TransferAckResult::NoMemory));
                }
                die.pending = Some(PendingTransfer {
                    kind,
                    size,
                    buffer: vec![0; size],
                    chunks: 0,
                });
                Ok(Message::TransferAck(TransferAckResult::Download))
            }
            Message::BulkSetup { size } => match &die.pending {
                Some(pending) if pending.size == size as usize => Ok(Message::BulkSetupAck),
                _ => Ok(Message::CommitAck { ok: false }),
            },
            Message::BulkData { offset, data } => {
                let drop_after = die.options.drop_after_chunks;
                let Some(pending) = die.pending.as_mut() else {
                    return Ok(Message::CommitAck { ok: false });
                };
                if drop_after == Some(pending.chunks) {
                    die.options.drop_after_chunks = None;
                    die.pending = None;
                    self.close(&mut shared);
                    return Err(LinkError::Disconnected);
                }
                let start = offset as usize;
                let end = start + data.len();
                if end > pending.size {
                    return Ok(Message::CommitAck { ok: false });
                }
                pending.buffer[start..end].copy_from_slice(&data);
                pending.chunks += 1;
                Ok(Message::BulkDataAck { offset })
            }
            Message::Commit { hash } => {
                let Some(pending) = die.pending.take() else {
                    return Ok(Message::CommitAck { ok: false });
                };
                let valid = dataset_hash(&pending.buffer) == hash
                    && (pending.kind != TransferKind::DataSet
                        || DataSetView::parse(&pending.buffer).is_ok());
                if valid {
                    die.stored.insert(pending.kind, (hash, pending.buffer));
                }
                Ok(Message::CommitAck { ok: valid })
            }
            other => Err(LinkError::ConnectionFailed(format!(
                "die cannot handle {}",
                other.name()
            ))),
        }
    }
}

#[async_trait]
impl DieLink for SimLink {
    fn pixel_id(&self) -> PixelId {
        self.pixel
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    async fn request(&mut self, message: &[u8]) -> Result<Vec<u8>, LinkError> {
        if !self.open {
            return Err(LinkError::Disconnected);
        }
        let message =
            Message::decode(message).map_err(|e| LinkError::ConnectionFailed(e.to_string()))?;
        if matches!(message, Message::BulkData { .. }) && !self.chunk_delay.is_zero() {
            tokio::time::sleep(self.chunk_delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.respond(message).map(|reply| reply.encode())
    }

    async fn disconnect(&mut self) {
        let shared = self.shared.clone();
        self.close(&mut lock_shared(&shared));
    }
}

impl Drop for SimLink {
    fn drop(&mut self) {
        let shared = self.shared.clone();
        self.close(&mut lock_shared(&shared));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIE: PixelId = PixelId(0x42);

    #[tokio::test]
    async fn test_connect_failures_and_adapter() {
        let central = SimulatedCentral::new();
        central.add_die(DIE, DieOptions::default());
        central.fail_next_connects(DIE, 1);

        assert!(matches!(
            central.connect(DIE).await,
            Err(LinkError::ConnectionFailed(_))
        ));
        assert!(central.connect(DIE).await.is_ok());
        assert!(matches!(
            central.connect(PixelId(7)).await,
            Err(LinkError::ConnectionFailed(_))
        ));

        central.set_adapter(AdapterState::PoweredOff);
        assert_eq!(
            central.connect(DIE).await.err(),
            Some(LinkError::AdapterUnavailable)
        );
        assert_eq!(central.connect_order(), vec![DIE]);
    }

    #[tokio::test]
    async fn test_link_accounting() {
        let central = SimulatedCentral::new();
        central.add_die(DIE, DieOptions::default());
        let mut first = central.connect(DIE).await.unwrap();
        let second = central.connect(DIE).await.unwrap();
        assert_eq!(central.active_links(), 2);

        first.disconnect().await;
        first.disconnect().await;
        assert_eq!(central.active_links(), 1);
        assert_eq!(first.request(&Message::BulkSetupAck.encode()).await, Err(LinkError::Disconnected));

        drop(second);
        assert_eq!(central.active_links(), 0);
        assert_eq!(central.max_concurrent(), 2);
    }

    #[tokio::test]
    async fn test_commit_checks_hash() {
        let central = SimulatedCentral::new();
        central.add_die(DIE, DieOptions::default());
        let mut link = central.connect(DIE).await.unwrap();

        let bytes = vec![3u8; 10];
        let announce = Message::TransferPayload {
            kind: TransferKind::Firmware,
            size: 10,
            hash: dataset_hash(&bytes),
        };
        link.request(&announce.encode()).await.unwrap();
        link.request(&Message::BulkSetup { size: 10 }.encode()).await.unwrap();
        link.request(&Message::BulkData { offset: 0, data: bytes }.encode())
            .await
            .unwrap();
        let reply = link.request(&Message::Commit { hash: 1 }.encode()).await.unwrap();
        assert_eq!(Message::decode(&reply), Ok(Message::CommitAck { ok: false }));
        assert_eq!(central.stored_hash(DIE, TransferKind::Firmware), None);
    }
}
