//! Connection scheduler
//!
//! Owns every paired peripheral's connection state. Requests land in a
//! two-level queue; a dispatcher pops entries while a connection slot is
//! free and the adapter is powered, and runs one session per die:
//! connect, write pending jobs, disconnect.
//!
//! All state lives behind a single async mutex. Sessions take the lock only
//! between radio operations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pixels_core::{dfu_availability, DfuAvailability, PairedPeripheral, PixelId};
use pixels_dataset::CompiledDataSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::link::{AdapterState, Central, DieLink, LinkError};
use crate::messages::TransferKind;
use crate::queue::{ConnectQueue, Priority, QueueSnapshot};
use crate::transfer::{transfer, FirmwareImage, Payload, TransferError, TransferOutcome};

fn default_max_connections() -> usize {
    2
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_chunk_size() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Simultaneous sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Failed attempts tolerated before manual retry is required
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Upper bound on bulk data per message
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl SchedulerConfig {
    /// Delay before the next attempt, `base * 2^(attempt-1)` capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PeripheralState {
    Idle,
    Queued { priority: Priority },
    Connecting,
    Connected,
    Transferring { kind: TransferKind },
    /// Waiting out a backoff, or given up when `gave_up` is set
    Failed { attempts: u32, gave_up: bool },
}

impl PeripheralState {
    pub fn is_persistent_failure(&self) -> bool {
        matches!(self, PeripheralState::Failed { gave_up: true, .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeripheralStatus {
    pub peripheral: PairedPeripheral,
    #[serde(flatten)]
    pub state: PeripheralState,
    pub attempts: u32,
    pub pending_profile: Option<Uuid>,
    pub pending_firmware: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub adapter: AdapterState,
    pub dfu_active: bool,
    pub queue: QueueSnapshot,
    pub peripherals: Vec<PeripheralStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProgramResult {
    /// Stored hash matches; nothing to send
    UpToDate,
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FirmwareResult {
    Skipped { availability: DfuAvailability },
    Queued,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    StateChanged {
        pixel: PixelId,
        state: PeripheralState,
    },
    AdapterChanged {
        state: AdapterState,
    },
    Connected {
        pixel: PixelId,
    },
    Disconnected {
        pixel: PixelId,
    },
    ConnectFailed {
        pixel: PixelId,
        attempts: u32,
        retry_in_ms: u64,
        error: String,
    },
    PersistentFailure {
        pixel: PixelId,
        attempts: u32,
        error: String,
    },
    TransferProgress {
        pixel: PixelId,
        kind: TransferKind,
        progress: u8,
    },
    TransferIncomplete {
        pixel: PixelId,
        kind: TransferKind,
        attempts: u32,
        error: String,
    },
    TransferFailed {
        pixel: PixelId,
        kind: TransferKind,
        error: String,
    },
    ProfileUpToDate {
        pixel: PixelId,
        profile: Uuid,
        hash: u32,
    },
    ProfileProgrammed {
        pixel: PixelId,
        profile: Uuid,
        hash: u32,
    },
    FirmwareSkipped {
        pixel: PixelId,
        availability: DfuAvailability,
    },
    FirmwareUpdated {
        pixel: PixelId,
        timestamp: DateTime<Utc>,
    },
    /// Pairing metadata changed and should be persisted
    PeripheralUpdated {
        peripheral: PairedPeripheral,
    },
    Registered {
        peripheral: PairedPeripheral,
    },
    Unregistered {
        pixel: PixelId,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("peripheral {0} is not registered")]
    NotRegistered(PixelId),
    #[error("peripheral {0} is in a session")]
    InFlight(PixelId),
    #[error("peripheral {0} gave up after repeated failures; retry it first")]
    PersistentFailure(PixelId),
}

#[derive(Debug, Clone)]
struct ProfileJob {
    dataset: Arc<CompiledDataSet>,
    seq: u64,
}

#[derive(Debug, Clone)]
struct FirmwareJob {
    image: Arc<FirmwareImage>,
    seq: u64,
}

#[derive(Debug)]
struct Entry {
    peripheral: PairedPeripheral,
    state: PeripheralState,
    attempts: u32,
    profile_job: Option<ProfileJob>,
    firmware_job: Option<FirmwareJob>,
    in_flight: bool,
    /// Unregistered while in flight; dropped when the session ends
    removed: bool,
    /// Priority asked for by requests that arrived during a session
    requeue_after: Option<Priority>,
    /// Bumped to invalidate a pending backoff timer
    backoff_epoch: u64,
    /// Holds the DFU slot for the current session
    dfu_reserved: bool,
}

impl Entry {
    fn new(peripheral: PairedPeripheral) -> Self {
        Self {
            peripheral,
            state: PeripheralState::Idle,
            attempts: 0,
            profile_job: None,
            firmware_job: None,
            in_flight: false,
            removed: false,
            requeue_after: None,
            backoff_epoch: 0,
            dfu_reserved: false,
        }
    }

    fn has_jobs(&self) -> bool {
        self.profile_job.is_some() || self.firmware_job.is_some()
    }

    fn status(&self) -> PeripheralStatus {
        PeripheralStatus {
            peripheral: self.peripheral.clone(),
            state: self.state.clone(),
            attempts: self.attempts,
            pending_profile: self.profile_job.as_ref().map(|job| job.dataset.profile),
            pending_firmware: self.firmware_job.is_some(),
        }
    }
}

struct SchedulerState {
    entries: HashMap<PixelId, Entry>,
    queue: ConnectQueue,
    adapter: AdapterState,
    /// Set while a session is writing firmware
    dfu_active: bool,
    next_seq: u64,
}

impl SchedulerState {
    fn entry_mut(&mut self, pixel: PixelId) -> Result<&mut Entry, SchedulerError> {
        self.entries
            .get_mut(&pixel)
            .ok_or(SchedulerError::NotRegistered(pixel))
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Queue a peripheral, or record the request if it is in a session.
    /// A peripheral waiting out its retry delay is only promoted by a high
    /// priority request; the backoff timer queues it otherwise.
    fn schedule(&mut self, pixel: PixelId, priority: Priority, events: &mut Vec<SchedulerEvent>) {
        let Some(entry) = self.entries.get(&pixel) else {
            return;
        };
        let backing_off = matches!(entry.state, PeripheralState::Failed { gave_up: false, .. });
        if backing_off && priority == Priority::Low && !entry.in_flight {
            return;
        }
        self.enqueue(pixel, priority, events);
    }

    fn enqueue(&mut self, pixel: PixelId, priority: Priority, events: &mut Vec<SchedulerEvent>) {
        let Some(entry) = self.entries.get_mut(&pixel) else {
            return;
        };
        if entry.in_flight {
            entry.requeue_after = entry.requeue_after.max(Some(priority));
            return;
        }
        self.queue.enqueue(pixel, priority);
        let state = PeripheralState::Queued {
            priority: self.queue.priority_of(pixel).unwrap_or(priority),
        };
        if entry.state != state {
            entry.state = state.clone();
            events.push(SchedulerEvent::StateChanged { pixel, state });
        }
    }

    fn take_next(&mut self) -> Option<(PixelId, Priority)> {
        if !self.adapter.is_ready() {
            return None;
        }
        let dfu_active = self.dfu_active;
        let entries = &self.entries;
        let (pixel, priority) = self.queue.pop_next_where(|pixel| {
            entries.get(&pixel).is_some_and(|entry| {
                // firmware-only work waits for the running DFU
                !(dfu_active && entry.profile_job.is_none() && entry.firmware_job.is_some())
            })
        })?;
        if let Some(entry) = self.entries.get_mut(&pixel) {
            if entry.firmware_job.is_some() && !self.dfu_active {
                self.dfu_active = true;
                entry.dfu_reserved = true;
            }
        }
        Some((pixel, priority))
    }

    /// Give back the DFU slot if this peripheral's session held it
    fn release_dfu(&mut self, pixel: PixelId) {
        if let Some(entry) = self.entries.get_mut(&pixel) {
            if entry.dfu_reserved {
                entry.dfu_reserved = false;
                self.dfu_active = false;
            }
        }
    }
}

struct Inner {
    state: Mutex<SchedulerState>,
    slots: Arc<Semaphore>,
    wake: Notify,
    events: broadcast::Sender<SchedulerEvent>,
    central: Arc<dyn Central>,
    config: SchedulerConfig,
}

impl Inner {
    fn emit(&self, event: SchedulerEvent) {
        let _ = self.events.send(event);
    }

    fn emit_all(&self, events: Vec<SchedulerEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

/// Result of one session's job runs, applied when it ends
#[derive(Default)]
struct SessionReport {
    profile: Option<(u64, Uuid, u32, TransferOutcome)>,
    firmware: Option<(u64, DateTime<Utc>)>,
    error: Option<(TransferKind, TransferError)>,
}

pub struct Scheduler {
    inner: Arc<Inner>,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Start the dispatcher and the adapter watcher. Must be called from
    /// within a tokio runtime.
    pub fn start(
        central: Arc<dyn Central>,
        config: SchedulerConfig,
        pairings: impl IntoIterator<Item = PairedPeripheral>,
    ) -> Self {
        let adapter_rx = central.adapter_state();
        let adapter = *adapter_rx.borrow();
        let entries = pairings
            .into_iter()
            .map(|p| (p.pixel_id, Entry::new(p)))
            .collect();
        let (events, _) = broadcast::channel(100);

        let inner = Arc::new(Inner {
            state: Mutex::new(SchedulerState {
                entries,
                queue: ConnectQueue::new(),
                adapter,
                dfu_active: false,
                next_seq: 0,
            }),
            slots: Arc::new(Semaphore::new(config.max_connections.max(1))),
            wake: Notify::new(),
            events,
            central,
            config,
        });

        info!(
            max_connections = inner.config.max_connections,
            adapter = ?adapter,
            "Connection scheduler started"
        );

        let tasks = vec![
            tokio::spawn(dispatch_loop(inner.clone())),
            tokio::spawn(watch_adapter(inner.clone(), adapter_rx)),
        ];
        Self { inner, tasks }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Add a paired peripheral or replace its stored record
    pub async fn register(&self, peripheral: PairedPeripheral) {
        let mut st = self.inner.state.lock().await;
        let pixel = peripheral.pixel_id;
        match st.entries.get_mut(&pixel) {
            Some(entry) => {
                entry.peripheral = peripheral.clone();
                entry.removed = false;
            }
            None => {
                st.entries.insert(pixel, Entry::new(peripheral.clone()));
            }
        }
        info!(pixel = %pixel, "Peripheral registered");
        self.inner.emit(SchedulerEvent::Registered { peripheral });
    }

    /// Forget a peripheral. A peripheral in a session is dropped when the
    /// session ends.
    pub async fn unregister(&self, pixel: PixelId) -> Result<PairedPeripheral, SchedulerError> {
        let mut st = self.inner.state.lock().await;
        let entry = st.entry_mut(pixel)?;
        if entry.in_flight {
            entry.removed = true;
            entry.profile_job = None;
            entry.firmware_job = None;
            return Ok(entry.peripheral.clone());
        }
        st.queue.remove(pixel);
        let entry = st
            .entries
            .remove(&pixel)
            .ok_or(SchedulerError::NotRegistered(pixel))?;
        info!(pixel = %pixel, "Peripheral unregistered");
        self.inner.emit(SchedulerEvent::Unregistered { pixel });
        Ok(entry.peripheral)
    }

    pub async fn request_connect(
        &self,
        pixel: PixelId,
        priority: Priority,
    ) -> Result<PeripheralState, SchedulerError> {
        let mut events = Vec::new();
        let state = {
            let mut st = self.inner.state.lock().await;
            let entry = st.entry_mut(pixel)?;
            if entry.state.is_persistent_failure() {
                return Err(SchedulerError::PersistentFailure(pixel));
            }
            if !entry.in_flight {
                st.schedule(pixel, priority, &mut events);
            }
            st.entry_mut(pixel)?.state.clone()
        };
        debug!(pixel = %pixel, priority = ?priority, "Connect requested");
        self.inner.emit_all(events);
        self.inner.wake.notify_one();
        Ok(state)
    }

    /// Queue a DataSet write unless the die already holds it
    pub async fn program_profile(
        &self,
        pixel: PixelId,
        dataset: Arc<CompiledDataSet>,
        priority: Priority,
    ) -> Result<ProgramResult, SchedulerError> {
        let mut events = Vec::new();
        let result = {
            let mut st = self.inner.state.lock().await;
            let seq = st.next_seq();
            let entry = st.entry_mut(pixel)?;
            if entry.state.is_persistent_failure() {
                return Err(SchedulerError::PersistentFailure(pixel));
            }
            if !entry.in_flight && entry.peripheral.is_up_to_date(dataset.hash) {
                entry.profile_job = None;
                if entry.peripheral.profile_uuid != Some(dataset.profile) {
                    entry.peripheral.profile_uuid = Some(dataset.profile);
                    events.push(SchedulerEvent::PeripheralUpdated {
                        peripheral: entry.peripheral.clone(),
                    });
                }
                events.push(SchedulerEvent::ProfileUpToDate {
                    pixel,
                    profile: dataset.profile,
                    hash: dataset.hash,
                });
                ProgramResult::UpToDate
            } else {
                entry.profile_job = Some(ProfileJob { dataset, seq });
                st.schedule(pixel, priority, &mut events);
                ProgramResult::Queued
            }
        };
        self.inner.emit_all(events);
        self.inner.wake.notify_one();
        Ok(result)
    }

    /// Queue a firmware update when the die runs an outdated build, or
    /// unconditionally with `force`
    pub async fn update_firmware(
        &self,
        pixel: PixelId,
        image: Arc<FirmwareImage>,
        force: bool,
        priority: Priority,
    ) -> Result<FirmwareResult, SchedulerError> {
        let mut events = Vec::new();
        let result = {
            let mut st = self.inner.state.lock().await;
            let seq = st.next_seq();
            let entry = st.entry_mut(pixel)?;
            if entry.state.is_persistent_failure() {
                return Err(SchedulerError::PersistentFailure(pixel));
            }
            let availability =
                dfu_availability(entry.peripheral.firmware_timestamp, Some(image.timestamp));
            if !force && availability != DfuAvailability::Outdated {
                events.push(SchedulerEvent::FirmwareSkipped {
                    pixel,
                    availability,
                });
                FirmwareResult::Skipped { availability }
            } else {
                entry.firmware_job = Some(FirmwareJob { image, seq });
                st.schedule(pixel, priority, &mut events);
                FirmwareResult::Queued
            }
        };
        self.inner.emit_all(events);
        self.inner.wake.notify_one();
        Ok(result)
    }

    /// Drop a queued request and its pending jobs. Sessions in progress
    /// cannot be cancelled.
    pub async fn cancel(&self, pixel: PixelId) -> Result<(), SchedulerError> {
        let mut st = self.inner.state.lock().await;
        let entry = st.entry_mut(pixel)?;
        if entry.in_flight {
            return Err(SchedulerError::InFlight(pixel));
        }
        let waiting = matches!(
            entry.state,
            PeripheralState::Queued { .. } | PeripheralState::Failed { gave_up: false, .. }
        );
        entry.profile_job = None;
        entry.firmware_job = None;
        if waiting {
            entry.backoff_epoch += 1;
            entry.state = PeripheralState::Idle;
            st.queue.remove(pixel);
            debug!(pixel = %pixel, "Request cancelled");
            self.inner.emit(SchedulerEvent::StateChanged {
                pixel,
                state: PeripheralState::Idle,
            });
        }
        Ok(())
    }

    /// Clear the failure count and queue at high priority
    pub async fn retry(&self, pixel: PixelId) -> Result<(), SchedulerError> {
        let mut events = Vec::new();
        {
            let mut st = self.inner.state.lock().await;
            let entry = st.entry_mut(pixel)?;
            if entry.in_flight {
                return Err(SchedulerError::InFlight(pixel));
            }
            entry.attempts = 0;
            entry.backoff_epoch += 1;
            entry.state = PeripheralState::Idle;
            st.schedule(pixel, Priority::High, &mut events);
        }
        info!(pixel = %pixel, "Manual retry");
        self.inner.emit_all(events);
        self.inner.wake.notify_one();
        Ok(())
    }

    pub async fn snapshot(&self) -> SchedulerSnapshot {
        let st = self.inner.state.lock().await;
        let mut peripherals: Vec<PeripheralStatus> =
            st.entries.values().map(Entry::status).collect();
        peripherals.sort_by_key(|status| status.peripheral.pixel_id);
        SchedulerSnapshot {
            adapter: st.adapter,
            dfu_active: st.dfu_active,
            queue: st.queue.snapshot(),
            peripherals,
        }
    }

    pub async fn peripheral(&self, pixel: PixelId) -> Option<PeripheralStatus> {
        let st = self.inner.state.lock().await;
        st.entries.get(&pixel).map(Entry::status)
    }

    pub async fn queue(&self) -> QueueSnapshot {
        self.inner.state.lock().await.queue.snapshot()
    }

    /// Pairing records with their latest hashes and firmware timestamps
    pub async fn pairings(&self) -> Vec<PairedPeripheral> {
        let st = self.inner.state.lock().await;
        let mut pairings: Vec<PairedPeripheral> = st
            .entries
            .values()
            .filter(|entry| !entry.removed)
            .map(|entry| entry.peripheral.clone())
            .collect();
        pairings.sort_by_key(|p| p.pixel_id);
        pairings
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn watch_adapter(inner: Arc<Inner>, mut rx: watch::Receiver<AdapterState>) {
    while rx.changed().await.is_ok() {
        let state = *rx.borrow_and_update();
        let changed = {
            let mut st = inner.state.lock().await;
            let changed = st.adapter != state;
            st.adapter = state;
            changed
        };
        if state.is_ready() {
            inner.wake.notify_one();
        }
        if !changed {
            continue;
        }
        if state.is_ready() {
            info!("Bluetooth adapter ready, resuming dispatch");
        } else {
            warn!(state = ?state, "Bluetooth adapter not ready, pausing dispatch");
        }
        inner.emit(SchedulerEvent::AdapterChanged { state });
    }
}

async fn dispatch_loop(inner: Arc<Inner>) {
    loop {
        let Ok(permit) = inner.slots.clone().acquire_owned().await else {
            break;
        };
        loop {
            let next = {
                let mut st = inner.state.lock().await;
                st.take_next().and_then(|(pixel, priority)| {
                    let entry = st.entries.get_mut(&pixel)?;
                    entry.in_flight = true;
                    entry.requeue_after = None;
                    entry.state = PeripheralState::Connecting;
                    Some((pixel, priority))
                })
            };
            match next {
                Some((pixel, priority)) => {
                    inner.emit(SchedulerEvent::StateChanged {
                        pixel,
                        state: PeripheralState::Connecting,
                    });
                    tokio::spawn(run_session(inner.clone(), pixel, priority, permit));
                    break;
                }
                None => inner.wake.notified().await,
            }
        }
    }
}

async fn adapter_lost(rx: &mut watch::Receiver<AdapterState>) {
    let _ = rx.wait_for(|state| !state.is_ready()).await;
}

async fn run_session(
    inner: Arc<Inner>,
    pixel: PixelId,
    priority: Priority,
    _permit: OwnedSemaphorePermit,
) {
    let mut adapter_rx = inner.central.adapter_state();
    let connected = tokio::select! {
        result = inner.central.connect(pixel) => result,
        _ = adapter_lost(&mut adapter_rx) => Err(LinkError::AdapterUnavailable),
    };

    let mut link = match connected {
        Ok(link) => link,
        Err(LinkError::AdapterUnavailable) => {
            requeue_without_attempt(&inner, pixel, priority).await;
            return;
        }
        Err(e) => {
            connect_failed(&inner, pixel, e).await;
            return;
        }
    };

    {
        let mut st = inner.state.lock().await;
        if let Some(entry) = st.entries.get_mut(&pixel) {
            entry.state = PeripheralState::Connected;
        }
    }
    info!(pixel = %pixel, "Connected");
    inner.emit(SchedulerEvent::Connected { pixel });
    inner.emit(SchedulerEvent::StateChanged {
        pixel,
        state: PeripheralState::Connected,
    });

    let report = run_jobs(&inner, link.as_mut()).await;
    link.disconnect().await;
    finish_session(&inner, pixel, report).await;
}

/// Adapter went away before the link was up; the attempt does not count
async fn requeue_without_attempt(inner: &Inner, pixel: PixelId, priority: Priority) {
    let mut events = Vec::new();
    {
        let mut st = inner.state.lock().await;
        st.release_dfu(pixel);
        let Some(entry) = st.entries.get_mut(&pixel) else {
            return;
        };
        entry.in_flight = false;
        if entry.removed {
            st.entries.remove(&pixel);
            events.push(SchedulerEvent::Unregistered { pixel });
        } else {
            let priority = entry.requeue_after.take().map_or(priority, |p| p.max(priority));
            entry.state = PeripheralState::Idle;
            st.enqueue(pixel, priority, &mut events);
        }
    }
    debug!(pixel = %pixel, "Connect interrupted by adapter, re-queued");
    inner.emit_all(events);
}

async fn connect_failed(inner: &Arc<Inner>, pixel: PixelId, error: LinkError) {
    let mut events = Vec::new();
    let mut backoff = None;
    {
        let mut st = inner.state.lock().await;
        st.release_dfu(pixel);
        let Some(entry) = st.entries.get_mut(&pixel) else {
            return;
        };
        entry.in_flight = false;
        entry.requeue_after = None;
        if entry.removed {
            st.entries.remove(&pixel);
            events.push(SchedulerEvent::Unregistered { pixel });
        } else {
            entry.attempts += 1;
            let attempts = entry.attempts;
            if attempts > inner.config.max_retries {
                warn!(pixel = %pixel, attempts, error = %error, "Giving up on peripheral");
                entry.state = PeripheralState::Failed {
                    attempts,
                    gave_up: true,
                };
                events.push(SchedulerEvent::PersistentFailure {
                    pixel,
                    attempts,
                    error: error.to_string(),
                });
            } else {
                let delay = inner.config.backoff(attempts);
                warn!(
                    pixel = %pixel,
                    attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "Connect failed"
                );
                entry.state = PeripheralState::Failed {
                    attempts,
                    gave_up: false,
                };
                entry.backoff_epoch += 1;
                backoff = Some((delay, entry.backoff_epoch));
                events.push(SchedulerEvent::ConnectFailed {
                    pixel,
                    attempts,
                    retry_in_ms: delay.as_millis() as u64,
                    error: error.to_string(),
                });
            }
            events.push(SchedulerEvent::StateChanged {
                pixel,
                state: entry.state.clone(),
            });
        }
    }
    inner.emit_all(events);
    // the DFU slot may have been freed
    inner.wake.notify_one();

    if let Some((delay, epoch)) = backoff {
        let inner = inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            requeue_after_backoff(&inner, pixel, epoch).await;
        });
    }
}

async fn requeue_after_backoff(inner: &Inner, pixel: PixelId, epoch: u64) {
    let mut events = Vec::new();
    {
        let mut st = inner.state.lock().await;
        let Some(entry) = st.entries.get_mut(&pixel) else {
            return;
        };
        let waiting = matches!(entry.state, PeripheralState::Failed { gave_up: false, .. });
        if !waiting || entry.in_flight || entry.backoff_epoch != epoch {
            return;
        }
        st.enqueue(pixel, Priority::Low, &mut events);
    }
    inner.emit_all(events);
    inner.wake.notify_one();
}

async fn set_transferring(inner: &Inner, pixel: PixelId, kind: TransferKind) {
    {
        let mut st = inner.state.lock().await;
        if let Some(entry) = st.entries.get_mut(&pixel) {
            entry.state = PeripheralState::Transferring { kind };
        }
    }
    inner.emit(SchedulerEvent::StateChanged {
        pixel,
        state: PeripheralState::Transferring { kind },
    });
}

async fn send_payload(
    inner: &Inner,
    link: &mut dyn DieLink,
    payload: Payload<'_>,
) -> Result<TransferOutcome, TransferError> {
    let pixel = link.pixel_id();
    set_transferring(inner, pixel, payload.kind).await;
    let events = inner.events.clone();
    let kind = payload.kind;
    transfer(link, payload, inner.config.chunk_size, move |progress| {
        let _ = events.send(SchedulerEvent::TransferProgress {
            pixel,
            kind,
            progress,
        });
    })
    .await
}

async fn run_jobs(inner: &Inner, link: &mut dyn DieLink) -> SessionReport {
    let pixel = link.pixel_id();
    let mut report = SessionReport::default();

    let (profile_job, firmware_job) = {
        let st = inner.state.lock().await;
        let Some(entry) = st.entries.get(&pixel) else {
            return report;
        };
        let firmware_job = if entry.dfu_reserved {
            entry.firmware_job.clone()
        } else {
            if entry.firmware_job.is_some() {
                debug!(pixel = %pixel, "Another DFU is running, firmware deferred");
            }
            None
        };
        (entry.profile_job.clone(), firmware_job)
    };

    if let Some(job) = profile_job {
        let dataset = &job.dataset;
        let payload = Payload {
            kind: TransferKind::DataSet,
            bytes: &dataset.bytes,
            hash: dataset.hash,
        };
        match send_payload(inner, link, payload).await {
            Ok(outcome) => report.profile = Some((job.seq, dataset.profile, dataset.hash, outcome)),
            Err(e) => {
                report.error = Some((TransferKind::DataSet, e));
                return report;
            }
        }
    }

    if let Some(job) = firmware_job {
        for payload in job.image.payloads() {
            let kind = payload.kind;
            if let Err(e) = send_payload(inner, link, payload).await {
                report.error = Some((kind, e));
                return report;
            }
        }
        report.firmware = Some((job.seq, job.image.timestamp));
    }
    report
}

/// Apply a session's results and pick the peripheral's next state in one
/// critical section
async fn finish_session(inner: &Inner, pixel: PixelId, report: SessionReport) {
    let mut events = Vec::new();
    {
        let mut st = inner.state.lock().await;
        st.release_dfu(pixel);
        apply_report(&mut st, pixel, report, inner.config.max_retries, &mut events);
    }
    events.push(SchedulerEvent::Disconnected { pixel });
    debug!(pixel = %pixel, "Session ended");
    inner.emit_all(events);
    inner.wake.notify_one();
}

fn apply_report(
    st: &mut SchedulerState,
    pixel: PixelId,
    report: SessionReport,
    max_retries: u32,
    events: &mut Vec<SchedulerEvent>,
) {
    let Some(entry) = st.entries.get_mut(&pixel) else {
        return;
    };
    entry.in_flight = false;
    let mut updated = false;

    if let Some((seq, profile, hash, outcome)) = report.profile {
        entry.peripheral.profile_hash = Some(hash);
        entry.peripheral.profile_uuid = Some(profile);
        if entry.profile_job.as_ref().is_some_and(|job| job.seq == seq) {
            entry.profile_job = None;
        }
        updated = true;
        info!(pixel = %pixel, profile = %profile, hash, "Profile programmed");
        events.push(match outcome {
            TransferOutcome::Transferred => SchedulerEvent::ProfileProgrammed {
                pixel,
                profile,
                hash,
            },
            TransferOutcome::AlreadyUpToDate => SchedulerEvent::ProfileUpToDate {
                pixel,
                profile,
                hash,
            },
        });
    }

    if let Some((seq, timestamp)) = report.firmware {
        entry.peripheral.firmware_timestamp = Some(timestamp);
        if entry.firmware_job.as_ref().is_some_and(|job| job.seq == seq) {
            entry.firmware_job = None;
        }
        updated = true;
        info!(pixel = %pixel, timestamp = %timestamp, "Firmware updated");
        events.push(SchedulerEvent::FirmwareUpdated { pixel, timestamp });
    }

    let mut next = None;
    match report.error {
        None => entry.attempts = 0,
        Some((kind, e)) if e.is_retryable() => {
            entry.attempts += 1;
            let attempts = entry.attempts;
            warn!(pixel = %pixel, kind = ?kind, attempts, error = %e, "Transfer incomplete");
            events.push(SchedulerEvent::TransferIncomplete {
                pixel,
                kind,
                attempts,
                error: e.to_string(),
            });
            if attempts > max_retries {
                entry.state = PeripheralState::Failed {
                    attempts,
                    gave_up: true,
                };
                events.push(SchedulerEvent::PersistentFailure {
                    pixel,
                    attempts,
                    error: e.to_string(),
                });
            } else {
                next = Some(Priority::High);
            }
        }
        Some((kind, e)) => {
            warn!(pixel = %pixel, kind = ?kind, error = %e, "Transfer failed");
            match kind {
                TransferKind::DataSet => entry.profile_job = None,
                TransferKind::Firmware | TransferKind::Bootloader => entry.firmware_job = None,
            }
            entry.attempts = 0;
            events.push(SchedulerEvent::TransferFailed {
                pixel,
                kind,
                error: e.to_string(),
            });
        }
    }

    if updated {
        events.push(SchedulerEvent::PeripheralUpdated {
            peripheral: entry.peripheral.clone(),
        });
    }

    if entry.removed {
        st.entries.remove(&pixel);
        info!(pixel = %pixel, "Peripheral unregistered");
        events.push(SchedulerEvent::Unregistered { pixel });
        return;
    }
    if entry.state.is_persistent_failure() {
        events.push(SchedulerEvent::StateChanged {
            pixel,
            state: entry.state.clone(),
        });
        return;
    }

    let requested = entry.requeue_after.take();
    if entry.has_jobs() || requested.is_some() {
        next = next.max(Some(requested.unwrap_or(Priority::Low)));
    }
    entry.state = PeripheralState::Idle;
    match next {
        Some(priority) => st.schedule(pixel, priority, events),
        None => events.push(SchedulerEvent::StateChanged {
            pixel,
            state: PeripheralState::Idle,
        }),
    }
}
