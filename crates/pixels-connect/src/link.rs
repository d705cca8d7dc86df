//! Transport seam between the scheduler and a Bluetooth stack

use async_trait::async_trait;
use pixels_core::PixelId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

/// Radio state as reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    Unavailable,
}

impl AdapterState {
    pub fn is_ready(&self) -> bool {
        matches!(self, AdapterState::PoweredOn)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("peripheral disconnected")]
    Disconnected,
    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,
}

/// Bluetooth central able to open links to dice
#[async_trait]
pub trait Central: Send + Sync + 'static {
    /// Watch channel following the adapter state
    fn adapter_state(&self) -> watch::Receiver<AdapterState>;

    async fn connect(&self, pixel: PixelId) -> Result<Box<dyn DieLink>, LinkError>;
}

/// Open GATT session with one die
#[async_trait]
pub trait DieLink: Send {
    fn pixel_id(&self) -> PixelId;

    /// Largest message the write characteristic accepts
    fn max_message_size(&self) -> usize;

    /// Write a message and wait for the die's notification in reply
    async fn request(&mut self, message: &[u8]) -> Result<Vec<u8>, LinkError>;

    async fn disconnect(&mut self);
}
