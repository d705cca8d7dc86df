//! Pixels Connect - talk to paired dice
//!
//! - `link`: the transport traits a Bluetooth stack implements
//! - `messages`: bulk transfer wire messages
//! - `transfer`: announce, chunk and commit one payload
//! - `queue`: two-level connect queue
//! - `scheduler`: connection slots, retries and per-die jobs
//! - `sim`: an in-process central for simulation and tests

pub mod link;
pub mod messages;
pub mod queue;
pub mod scheduler;
pub mod sim;
pub mod transfer;

pub use link::{AdapterState, Central, DieLink, LinkError};
pub use messages::{Message, MessageError, TransferAckResult, TransferKind};
pub use queue::{ConnectQueue, Enqueued, Priority, QueueSnapshot};
pub use scheduler::{
    FirmwareResult, PeripheralState, PeripheralStatus, ProgramResult, Scheduler, SchedulerConfig,
    SchedulerError, SchedulerEvent, SchedulerSnapshot,
};
pub use sim::{DieOptions, SimulatedCentral};
pub use transfer::{transfer, FirmwareImage, Payload, TransferError, TransferOutcome};
