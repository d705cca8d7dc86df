//! Transfer orchestrator
//!
//! Sequence for one payload: announce (kind, size, hash), bulk setup,
//! acknowledged chunks, commit. A dropped link never resumes from an
//! offset; it surfaces as [`TransferError::Incomplete`] and the caller
//! starts over on a new session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pixels_core::DfuFilesInfo;
use pixels_dataset::dataset_hash;
use thiserror::Error;
use tracing::{debug, trace};

use crate::link::{DieLink, LinkError};
use crate::messages::{Message, MessageError, TransferAckResult, TransferKind, BULK_DATA_OVERHEAD};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    #[error("transfer interrupted after {sent} of {total} bytes: {reason}")]
    Incomplete {
        sent: usize,
        total: usize,
        reason: LinkError,
    },
    #[error("die has no room for {size} bytes")]
    NoMemory { size: usize },
    #[error("die rejected the committed payload")]
    Rejected,
    #[error("expected {expected} reply, got {got}")]
    UnexpectedReply {
        expected: &'static str,
        got: &'static str,
    },
    #[error("bad reply: {0}")]
    Message(#[from] MessageError),
    #[error("payload of {0} bytes is too large to announce")]
    TooLarge(usize),
}

impl TransferError {
    /// Whether a fresh session may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Incomplete { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Transferred,
    /// The die already held a payload with this hash
    AlreadyUpToDate,
}

#[derive(Debug, Clone, Copy)]
pub struct Payload<'a> {
    pub kind: TransferKind,
    pub bytes: &'a [u8],
    pub hash: u32,
}

impl<'a> Payload<'a> {
    pub fn new(kind: TransferKind, bytes: &'a [u8]) -> Self {
        Self {
            kind,
            bytes,
            hash: dataset_hash(bytes),
        }
    }
}

/// Firmware images loaded for a DFU
#[derive(Debug, Clone, PartialEq)]
pub struct FirmwareImage {
    pub firmware: Arc<Vec<u8>>,
    pub bootloader: Option<Arc<Vec<u8>>>,
    pub timestamp: DateTime<Utc>,
}

impl FirmwareImage {
    pub async fn load(info: &DfuFilesInfo) -> std::io::Result<Self> {
        let firmware = tokio::fs::read(&info.firmware_path).await?;
        let bootloader = match &info.bootloader_path {
            Some(path) => Some(Arc::new(tokio::fs::read(path).await?)),
            None => None,
        };
        Ok(Self {
            firmware: Arc::new(firmware),
            bootloader,
            timestamp: info.timestamp,
        })
    }

    /// Payloads in the order they are written
    pub fn payloads(&self) -> Vec<Payload<'_>> {
        let mut payloads = Vec::with_capacity(2);
        if let Some(bootloader) = &self.bootloader {
            payloads.push(Payload::new(TransferKind::Bootloader, bootloader));
        }
        payloads.push(Payload::new(TransferKind::Firmware, &self.firmware));
        payloads
    }

    pub fn total_size(&self) -> usize {
        self.firmware.len() + self.bootloader.as_ref().map_or(0, |b| b.len())
    }
}

/// Percentage reporter that only fires when the value increases
pub struct Progress<F: FnMut(u8)> {
    last: Option<u8>,
    report: F,
}

impl<F: FnMut(u8)> Progress<F> {
    pub fn new(report: F) -> Self {
        Self { last: None, report }
    }

    pub fn update(&mut self, done: usize, total: usize) {
        let percent = if total == 0 {
            100
        } else {
            ((done.min(total) * 100) / total) as u8
        };
        if self.last.map_or(true, |last| percent > last) {
            self.last = Some(percent);
            (self.report)(percent);
        }
    }
}

async fn exchange(
    link: &mut dyn DieLink,
    message: Message,
    sent: usize,
    total: usize,
) -> Result<Message, TransferError> {
    trace!(pixel = %link.pixel_id(), message = message.name(), "Sending");
    let reply = link
        .request(&message.encode())
        .await
        .map_err(|reason| TransferError::Incomplete {
            sent,
            total,
            reason,
        })?;
    Ok(Message::decode(&reply)?)
}

/// Write one payload over an open link
pub async fn transfer<F>(
    link: &mut dyn DieLink,
    payload: Payload<'_>,
    chunk_size: usize,
    mut progress: F,
) -> Result<TransferOutcome, TransferError>
where
    F: FnMut(u8),
{
    let total = payload.bytes.len();
    let size = u32::try_from(total).map_err(|_| TransferError::TooLarge(total))?;
    let chunk_size = chunk_size
        .min(link.max_message_size().saturating_sub(BULK_DATA_OVERHEAD))
        .clamp(1, u16::MAX as usize);
    let mut report = Progress::new(&mut progress);

    let announce = Message::TransferPayload {
        kind: payload.kind,
        size,
        hash: payload.hash,
    };
    match exchange(link, announce, 0, total).await? {
        Message::TransferAck(TransferAckResult::Download) => {}
        Message::TransferAck(TransferAckResult::UpToDate) => {
            debug!(pixel = %link.pixel_id(), kind = ?payload.kind, "Die already up to date");
            report.update(total, total);
            return Ok(TransferOutcome::AlreadyUpToDate);
        }
        Message::TransferAck(TransferAckResult::NoMemory) => {
            return Err(TransferError::NoMemory { size: total });
        }
        other => {
            return Err(TransferError::UnexpectedReply {
                expected: "TransferAck",
                got: other.name(),
            })
        }
    }

    match exchange(link, Message::BulkSetup { size }, 0, total).await? {
        Message::BulkSetupAck => {}
        other => {
            return Err(TransferError::UnexpectedReply {
                expected: "BulkSetupAck",
                got: other.name(),
            })
        }
    }

    report.update(0, total);
    let mut sent = 0;
    for chunk in payload.bytes.chunks(chunk_size) {
        let offset = sent as u32;
        let message = Message::BulkData {
            offset,
            data: chunk.to_vec(),
        };
        match exchange(link, message, sent, total).await? {
            Message::BulkDataAck { offset: acked } if acked == offset => {}
            other => {
                return Err(TransferError::UnexpectedReply {
                    expected: "BulkDataAck",
                    got: other.name(),
                })
            }
        }
        sent += chunk.len();
        report.update(sent, total);
    }

    match exchange(link, Message::Commit { hash: payload.hash }, sent, total).await? {
        Message::CommitAck { ok: true } => {}
        Message::CommitAck { ok: false } => return Err(TransferError::Rejected),
        other => {
            return Err(TransferError::UnexpectedReply {
                expected: "CommitAck",
                got: other.name(),
            })
        }
    }
    debug!(pixel = %link.pixel_id(), kind = ?payload.kind, size = total, "Transfer complete");
    Ok(TransferOutcome::Transferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Central;
    use crate::sim::{DieOptions, SimulatedCentral};
    use pixels_core::PixelId;

    const DIE: PixelId = PixelId(0x1234);

    #[test]
    fn test_progress_only_increases() {
        let mut seen = Vec::new();
        let mut progress = Progress::new(|p| seen.push(p));
        for done in [0, 0, 1, 50, 50, 99, 100] {
            progress.update(done, 100);
        }
        drop(progress);
        assert_eq!(seen, vec![0, 1, 50, 99, 100]);
    }

    #[tokio::test]
    async fn test_chunked_transfer() {
        let central = SimulatedCentral::new();
        central.add_die(DIE, DieOptions::default());
        let mut link = central.connect(DIE).await.unwrap();

        let bytes: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        let mut seen = Vec::new();
        let outcome = transfer(
            link.as_mut(),
            Payload::new(TransferKind::Firmware, &bytes),
            100,
            |p| seen.push(p),
        )
        .await
        .unwrap();

        assert_eq!(outcome, TransferOutcome::Transferred);
        assert_eq!(seen, vec![0, 40, 80, 100]);
        assert_eq!(central.stored_payload(DIE, TransferKind::Firmware), Some(bytes));
    }

    #[tokio::test]
    async fn test_up_to_date_and_no_memory() {
        let central = SimulatedCentral::new();
        central.add_die(
            DIE,
            DieOptions {
                memory: 64,
                ..DieOptions::default()
            },
        );
        let mut link = central.connect(DIE).await.unwrap();

        let small = vec![7u8; 32];
        let payload = Payload::new(TransferKind::Firmware, &small);
        assert_eq!(
            transfer(link.as_mut(), payload, 20, |_| {}).await,
            Ok(TransferOutcome::Transferred)
        );
        assert_eq!(
            transfer(link.as_mut(), payload, 20, |_| {}).await,
            Ok(TransferOutcome::AlreadyUpToDate)
        );

        let big = vec![0u8; 65];
        let err = transfer(link.as_mut(), Payload::new(TransferKind::Firmware, &big), 20, |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::NoMemory { size: 65 });
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_dropped_link_is_incomplete() {
        let central = SimulatedCentral::new();
        central.add_die(
            DIE,
            DieOptions {
                drop_after_chunks: Some(2),
                ..DieOptions::default()
            },
        );
        let mut link = central.connect(DIE).await.unwrap();

        let bytes = vec![1u8; 300];
        let err = transfer(link.as_mut(), Payload::new(TransferKind::Bootloader, &bytes), 100, |_| {})
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::Incomplete {
                sent: 200,
                total: 300,
                reason: LinkError::Disconnected
            }
        );
        assert!(err.is_retryable());
    }
}
