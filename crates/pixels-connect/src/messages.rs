//! Wire messages of the bulk transfer protocol
//!
//! Every message starts with a one byte type, followed by little-endian
//! fields.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const TYPE_TRANSFER_PAYLOAD: u8 = 0x01;
const TYPE_TRANSFER_ACK: u8 = 0x02;
const TYPE_BULK_SETUP: u8 = 0x03;
const TYPE_BULK_SETUP_ACK: u8 = 0x04;
const TYPE_BULK_DATA: u8 = 0x05;
const TYPE_BULK_DATA_ACK: u8 = 0x06;
const TYPE_COMMIT: u8 = 0x07;
const TYPE_COMMIT_ACK: u8 = 0x08;

/// Bytes of framing around the data of a [`Message::BulkData`]
pub const BULK_DATA_OVERHEAD: usize = 7;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("empty message")]
    Empty,
    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),
    #[error("message type {kind:#04x} needs {expected} bytes, got {actual}")]
    Truncated {
        kind: u8,
        expected: usize,
        actual: usize,
    },
    #[error("invalid {field} value {value}")]
    InvalidValue { field: &'static str, value: u8 },
}

/// What a transfer carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    DataSet,
    Firmware,
    Bootloader,
}

impl TransferKind {
    fn code(self) -> u8 {
        match self {
            TransferKind::DataSet => 1,
            TransferKind::Firmware => 2,
            TransferKind::Bootloader => 3,
        }
    }

    fn from_code(code: u8) -> Result<Self, MessageError> {
        match code {
            1 => Ok(TransferKind::DataSet),
            2 => Ok(TransferKind::Firmware),
            3 => Ok(TransferKind::Bootloader),
            value => Err(MessageError::InvalidValue {
                field: "transfer kind",
                value,
            }),
        }
    }
}

/// Die's answer to a transfer announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferAckResult {
    Download,
    UpToDate,
    NoMemory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    TransferPayload {
        kind: TransferKind,
        size: u32,
        hash: u32,
    },
    TransferAck(TransferAckResult),
    BulkSetup {
        size: u32,
    },
    BulkSetupAck,
    BulkData {
        offset: u32,
        data: Vec<u8>,
    },
    BulkDataAck {
        offset: u32,
    },
    Commit {
        hash: u32,
    },
    CommitAck {
        ok: bool,
    },
}

fn need(bytes: &[u8], expected: usize) -> Result<(), MessageError> {
    if bytes.len() < expected {
        return Err(MessageError::Truncated {
            kind: bytes[0],
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::TransferPayload { .. } => "TransferPayload",
            Message::TransferAck(_) => "TransferAck",
            Message::BulkSetup { .. } => "BulkSetup",
            Message::BulkSetupAck => "BulkSetupAck",
            Message::BulkData { .. } => "BulkData",
            Message::BulkDataAck { .. } => "BulkDataAck",
            Message::Commit { .. } => "Commit",
            Message::CommitAck { .. } => "CommitAck",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        match self {
            Message::TransferPayload { kind, size, hash } => {
                out.push(TYPE_TRANSFER_PAYLOAD);
                out.push(kind.code());
                out.extend_from_slice(&size.to_le_bytes());
                out.extend_from_slice(&hash.to_le_bytes());
            }
            Message::TransferAck(result) => {
                out.push(TYPE_TRANSFER_ACK);
                out.push(match result {
                    TransferAckResult::Download => 0,
                    TransferAckResult::UpToDate => 1,
                    TransferAckResult::NoMemory => 2,
                });
            }
            Message::BulkSetup { size } => {
                out.push(TYPE_BULK_SETUP);
                out.extend_from_slice(&size.to_le_bytes());
            }
            Message::BulkSetupAck => out.push(TYPE_BULK_SETUP_ACK),
            Message::BulkData { offset, data } => {
                out.push(TYPE_BULK_DATA);
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(&(data.len() as u16).to_le_bytes());
                out.extend_from_slice(data);
            }
            Message::BulkDataAck { offset } => {
                out.push(TYPE_BULK_DATA_ACK);
                out.extend_from_slice(&offset.to_le_bytes());
            }
            Message::Commit { hash } => {
                out.push(TYPE_COMMIT);
                out.extend_from_slice(&hash.to_le_bytes());
            }
            Message::CommitAck { ok } => {
                out.push(TYPE_COMMIT_ACK);
                out.push(*ok as u8);
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        let kind = *bytes.first().ok_or(MessageError::Empty)?;
        match kind {
            TYPE_TRANSFER_PAYLOAD => {
                need(bytes, 10)?;
                Ok(Message::TransferPayload {
                    kind: TransferKind::from_code(bytes[1])?,
                    size: u32_at(bytes, 2),
                    hash: u32_at(bytes, 6),
                })
            }
            TYPE_TRANSFER_ACK => {
                need(bytes, 2)?;
                let result = match bytes[1] {
                    0 => TransferAckResult::Download,
                    1 => TransferAckResult::UpToDate,
                    2 => TransferAckResult::NoMemory,
                    value => {
                        return Err(MessageError::InvalidValue {
                            field: "transfer ack",
                            value,
                        })
                    }
                };
                Ok(Message::TransferAck(result))
            }
            TYPE_BULK_SETUP => {
                need(bytes, 5)?;
                Ok(Message::BulkSetup {
                    size: u32_at(bytes, 1),
                })
            }
            TYPE_BULK_SETUP_ACK => Ok(Message::BulkSetupAck),
            TYPE_BULK_DATA => {
                need(bytes, BULK_DATA_OVERHEAD)?;
                let len = u16_at(bytes, 5) as usize;
                need(bytes, BULK_DATA_OVERHEAD + len)?;
                Ok(Message::BulkData {
                    offset: u32_at(bytes, 1),
                    data: bytes[BULK_DATA_OVERHEAD..BULK_DATA_OVERHEAD + len].to_vec(),
                })
            }
            TYPE_BULK_DATA_ACK => {
                need(bytes, 5)?;
                Ok(Message::BulkDataAck {
                    offset: u32_at(bytes, 1),
                })
            }
            TYPE_COMMIT => {
                need(bytes, 5)?;
                Ok(Message::Commit {
                    hash: u32_at(bytes, 1),
                })
            }
            TYPE_COMMIT_ACK => {
                need(bytes, 2)?;
                Ok(Message::CommitAck { ok: bytes[1] != 0 })
            }
            other => Err(MessageError::UnknownType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_payload_bytes() {
        let msg = Message::TransferPayload {
            kind: TransferKind::DataSet,
            size: 300,
            hash: 0xdead_beef,
        };
        let bytes = msg.encode();
        assert_eq!(bytes, vec![0x01, 1, 0x2c, 0x01, 0, 0, 0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(Message::decode(&bytes), Ok(msg));
    }

    #[test]
    fn test_bulk_data_framing() {
        let msg = Message::BulkData {
            offset: 200,
            data: vec![1, 2, 3],
        };
        let bytes = msg.encode();
        assert_eq!(bytes.len(), BULK_DATA_OVERHEAD + 3);
        assert_eq!(Message::decode(&bytes), Ok(msg));
        assert!(matches!(
            Message::decode(&bytes[..8]),
            Err(MessageError::Truncated { kind: 0x05, .. })
        ));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(Message::decode(&[]), Err(MessageError::Empty));
        assert_eq!(Message::decode(&[0x42]), Err(MessageError::UnknownType(0x42)));
        assert!(matches!(
            Message::decode(&[TYPE_TRANSFER_ACK, 9]),
            Err(MessageError::InvalidValue { .. })
        ));
        assert_eq!(
            Message::decode(&Message::TransferAck(TransferAckResult::NoMemory).encode()),
            Ok(Message::TransferAck(TransferAckResult::NoMemory))
        );
    }
}
