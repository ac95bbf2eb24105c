//! BLE scanning functionality.
//!
//! Provides the scanner for discovering TappyBLE readers.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::ble::advertising::{Advertisement, AdvertisementFilter};
use crate::ble::peripheral::BtleplugPeripheral;
use crate::error::{Error, Result};

/// Event emitted when a Tappy is discovered or its advertisement updates.
#[derive(Debug, Clone)]
pub struct TappyDiscoveryEvent {
    /// The BLE peripheral identifier.
    pub identifier: String,
    /// The peripheral handle.
    pub peripheral: Peripheral,
    /// The advertisement that matched the filter.
    pub advertisement: Advertisement,
}

/// The background task reading adapter events.
#[derive(Default)]
struct ScanTask {
    handle: RwLock<Option<JoinHandle<()>>>,
}

impl ScanTask {
    fn start(&self, handle: JoinHandle<()>) {
        if let Some(stale) = self.handle.write().replace(handle) {
            stale.abort();
        }
    }

    fn is_running(&self) -> bool {
        self.handle
            .read()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Abort the task and wait until it has been dropped.
    async fn stop(&self) {
        let handle = self.handle.write().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    fn abort(&self) {
        if let Some(handle) = self.handle.write().take() {
            handle.abort();
        }
    }
}

/// BLE scanner for discovering TappyBLE readers.
pub struct TappyScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Which advertisements count as a Tappy.
    filter: AdvertisementFilter,
    /// Whether scanning is currently active.
    is_scanning: Arc<RwLock<bool>>,
    /// Discovered readers, by identifier.
    discovered: Arc<RwLock<HashMap<String, TappyDiscoveryEvent>>>,
    /// Channel for discovery events.
    event_tx: broadcast::Sender<TappyDiscoveryEvent>,
    /// The scanning task.
    scan_task: ScanTask,
}

impl TappyScanner {
    /// Create a scanner on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if there is no usable adapter.
    pub async fn new() -> Result<Self> {
        Self::with_filter(AdvertisementFilter::default()).await
    }

    /// Create a scanner on the first Bluetooth adapter with a custom filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if there is no usable adapter.
    pub async fn with_filter(filter: AdvertisementFilter) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter, filter))
    }

    /// Create a scanner with a specific adapter and filter.
    pub fn with_adapter(adapter: Adapter, filter: AdvertisementFilter) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            adapter,
            filter,
            is_scanning: Arc::new(RwLock::new(false)),
            discovered: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            scan_task: ScanTask::default(),
        }
    }

    /// Start scanning for readers.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning cannot be started.
    pub async fn start_scanning(&self) -> Result<()> {
        if *self.is_scanning.read() {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        info!(
            "Starting BLE scan for devices named *{}*",
            self.filter.marker()
        );

        // Subscribe before scanning so early results are not lost
        let mut events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        *self.is_scanning.write() = true;

        let adapter = self.adapter.clone();
        let filter = self.filter.clone();
        let discovered = self.discovered.clone();
        let event_tx = self.event_tx.clone();

        // Runs until stop_scanning aborts it
        self.scan_task.start(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                Self::handle_event(event, &adapter, &filter, &discovered, &event_tx).await;
            }

            error!("Adapter event stream ended");
        }));

        Ok(())
    }

    /// Stop scanning.
    ///
    /// The event task is always stopped, even if the adapter then fails to
    /// stop the radio scan.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !*self.is_scanning.read() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");

        *self.is_scanning.write() = false;
        self.scan_task.stop().await;

        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// Get every reader seen so far.
    pub fn discovered(&self) -> HashMap<String, TappyDiscoveryEvent> {
        self.discovered.read().clone()
    }

    /// Subscribe to discovery events.
    pub fn subscribe(&self) -> broadcast::Receiver<TappyDiscoveryEvent> {
        self.event_tx.subscribe()
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Get the advertisement filter.
    pub fn filter(&self) -> &AdvertisementFilter {
        &self.filter
    }

    /// Wrap a discovered reader for use with a [`Communicator`].
    ///
    /// [`Communicator`]: crate::Communicator
    pub fn peripheral(&self, event: &TappyDiscoveryEvent) -> BtleplugPeripheral {
        BtleplugPeripheral::new(self.adapter.clone(), event.peripheral.clone())
    }

    /// Handle a BLE central event.
    async fn handle_event(
        event: CentralEvent,
        adapter: &Adapter,
        filter: &AdvertisementFilter,
        discovered: &RwLock<HashMap<String, TappyDiscoveryEvent>>,
        event_tx: &broadcast::Sender<TappyDiscoveryEvent>,
    ) {
        match event {
            CentralEvent::DeviceDiscovered(id) => {
                trace!("Device discovered: {:?}", id);
                Self::process_peripheral(adapter, id, filter, discovered, event_tx).await;
            }
            CentralEvent::DeviceUpdated(id) => {
                trace!("Device updated: {:?}", id);
                Self::process_peripheral(adapter, id, filter, discovered, event_tx).await;
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
            }
            _ => {}
        }
    }

    /// Publish a peripheral if its advertisement passes the filter.
    async fn process_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
        filter: &AdvertisementFilter,
        discovered: &RwLock<HashMap<String, TappyDiscoveryEvent>>,
        event_tx: &broadcast::Sender<TappyDiscoveryEvent>,
    ) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        let advertisement = Advertisement::from(&properties);
        if !filter.matches(&advertisement) {
            return;
        }

        let identifier = id.to_string();
        let is_new = !discovered.read().contains_key(&identifier);
        if is_new {
            info!(
                "Found Tappy {:?} ({}), rssi {:?}",
                advertisement.local_name, identifier, advertisement.rssi
            );
        }

        let event = TappyDiscoveryEvent {
            identifier: identifier.clone(),
            peripheral,
            advertisement,
        };

        discovered.write().insert(identifier, event.clone());

        let _ = event_tx.send(event);
    }
}

impl Drop for TappyScanner {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
        self.scan_task.abort();
    }
}

impl std::fmt::Debug for TappyScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TappyScanner")
            .field("filter", &self.filter)
            .field("is_scanning", &self.is_scanning())
            .field("task_running", &self.scan_task.is_running())
            .field("discovered", &self.discovered.read().len())
            .finish()
    }
}
