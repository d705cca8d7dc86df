//! Application state management

use anyhow::Result;
use pixels_connect::{FirmwareImage, Scheduler, SchedulerEvent, SimulatedCentral};
use pixels_core::{Library, LibraryEvent, PairingStore, StoreError};
use pixels_dataset::{CompileError, CompiledDataSet, DataSetCache};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Editable profiles, animations and patterns
    pub library: Arc<RwLock<Library>>,
    /// Compiled DataSets, invalidated by library edits
    pub cache: Arc<Mutex<DataSetCache>>,
    pub scheduler: Arc<Scheduler>,
    /// Radio the scheduler talks through
    pub central: SimulatedCentral,
    /// Loaded DFU images, when configured
    pub firmware: Option<Arc<FirmwareImage>>,
    pub config: Config,
}

impl AppState {
    /// Create new application state
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let library = Library::load_or_create(&config.library.path)?;
        let pairings = PairingStore::load_or_create(&config.pairing.path)?;
        info!(
            profiles = library.profiles().count(),
            animations = library.animations().count(),
            paired = pairings.len(),
            "Library and pairings loaded"
        );

        let central = SimulatedCentral::new()
            .with_connect_delay(Duration::from_millis(config.simulation.connect_delay_ms));
        if config.simulation.include_pairings {
            for peripheral in pairings.iter() {
                central.add_die(peripheral.pixel_id, Default::default());
            }
        }
        for die in &config.simulation.dice {
            let pixel = die.pixel()?;
            central.add_die(pixel, die.options());
            if die.failing_connects > 0 {
                central.fail_next_connects(pixel, die.failing_connects);
            }
        }

        let firmware = match &config.firmware {
            Some(info) => {
                let image = FirmwareImage::load(info).await?;
                info!(
                    timestamp = %image.timestamp,
                    size = image.total_size(),
                    "Firmware images loaded"
                );
                Some(Arc::new(image))
            }
            None => None,
        };

        let scheduler = Arc::new(Scheduler::start(
            Arc::new(central.clone()),
            config.scheduler.clone(),
            pairings.iter().cloned(),
        ));

        let library_events = library.subscribe();
        let scheduler_events = scheduler.subscribe();

        let state = Arc::new(Self {
            library: Arc::new(RwLock::new(library)),
            cache: Arc::new(Mutex::new(DataSetCache::new())),
            scheduler,
            central,
            firmware,
            config,
        });

        tokio::spawn(invalidate_cache(state.cache.clone(), library_events));
        tokio::spawn(persist_pairings(state.clone(), scheduler_events));

        Ok(state)
    }

    /// Compile a profile, reusing the cached DataSet when its inputs are
    /// unchanged
    pub async fn compile(&self, profile: &Uuid) -> Result<Arc<CompiledDataSet>, CompileError> {
        let library = self.library.read().await;
        let mut cache = self.cache.lock().await;
        cache.get_or_compile(profile, &library, &self.config.compiler)
    }

    pub async fn save_pairings(&self) -> Result<(), StoreError> {
        let mut store = PairingStore::new();
        for peripheral in self.scheduler.pairings().await {
            store.upsert(peripheral);
        }
        store.save(&self.config.pairing.path)?;
        debug!(paired = store.len(), "Pairings saved");
        Ok(())
    }

    pub async fn save_library(&self) -> Result<(), StoreError> {
        self.library.read().await.save(&self.config.library.path)
    }
}

/// Drop compiled DataSets whose inputs were edited
async fn invalidate_cache(
    cache: Arc<Mutex<DataSetCache>>,
    mut events: broadcast::Receiver<LibraryEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                debug!(kind = %event.kind(), uuid = %event.uuid(), "Library changed");
                cache.lock().await.apply_event(&event);
            }
            Err(RecvError::Lagged(skipped)) => {
                // missed edits could touch any entry
                warn!(skipped, "Library events lagged, clearing DataSet cache");
                cache.lock().await.clear();
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Persist pairing metadata as the scheduler updates it
async fn persist_pairings(state: Arc<AppState>, mut events: broadcast::Receiver<SchedulerEvent>) {
    loop {
        let persist = match events.recv().await {
            Ok(event) => matches!(
                event,
                SchedulerEvent::PeripheralUpdated { .. }
                    | SchedulerEvent::Registered { .. }
                    | SchedulerEvent::Unregistered { .. }
            ),
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Scheduler events lagged, saving all pairings");
                true
            }
            Err(RecvError::Closed) => break,
        };
        if persist {
            if let Err(e) = state.save_pairings().await {
                warn!(error = %e, "Failed to save pairings");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixels_core::{DieType, PairedPeripheral, PixelId};

    async fn wait_for_pairing(path: &std::path::Path, pixel: PixelId) -> PairingStore {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Ok(store) = PairingStore::load_or_create(path) {
                    if store.get(pixel).is_some() {
                        return store;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_pairings_saved_after_event_burst() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.library.path = dir.path().join("library.json");
        config.pairing.path = dir.path().join("pairings.json");
        config.simulation.include_pairings = false;
        let state = AppState::new(config).await.unwrap();

        // more events than the channel holds
        for id in 0..400u32 {
            let pixel = PixelId(0x1000 + id);
            state
                .scheduler
                .register(PairedPeripheral::new(format!("sys-{}", id), pixel, DieType::D6))
                .await;
        }
        let late = PixelId(0x0badf00d);
        state
            .scheduler
            .register(PairedPeripheral::new("sys-late", late, DieType::D20))
            .await;

        let stored = wait_for_pairing(&state.config.pairing.path, late).await;
        assert_eq!(stored.len(), 401);
    }
}
