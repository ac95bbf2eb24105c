//! Scriptable in-memory peripheral for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use tappy_ble::ble::uuids::{
    NOTIFY_CHARACTERISTIC_UUID, SERIAL_SERVICE_UUID, WRITE_CHARACTERISTIC_UUID,
};
use tappy_ble::{
    BlePeripheral, CharacteristicRef, DisconnectStream, Error, NotificationEvent,
    NotificationStream, Result, WriteMode,
};

// ----------------------------------------------------------------------------
// Call Counters
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct CallCounts {
    pub connect: AtomicUsize,
    pub disconnect: AtomicUsize,
    pub discover: AtomicUsize,
    pub subscribe: AtomicUsize,
    pub write: AtomicUsize,
}

impl CallCounts {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Operations a test can make hang forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stall {
    Connect,
    Discover,
    Disconnect,
}

// ----------------------------------------------------------------------------
// Fake Peripheral
// ----------------------------------------------------------------------------

/// A peripheral that records writes and lets the test drive its events.
pub struct FakePeripheral {
    pub calls: CallCounts,
    characteristics: Mutex<Vec<CharacteristicRef>>,
    writes: Mutex<Vec<Vec<u8>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_write_at: Mutex<Option<usize>>,
    connect_gate: Mutex<Option<Arc<Notify>>>,
    write_gate: Mutex<Option<(usize, Arc<Notify>)>>,
    stalled: Mutex<HashSet<Stall>>,
    notify_tx: Mutex<Option<mpsc::UnboundedSender<NotificationEvent>>>,
    disconnect_tx: Mutex<Option<mpsc::UnboundedSender<()>>>,
}

impl Default for FakePeripheral {
    fn default() -> Self {
        Self {
            calls: CallCounts::default(),
            characteristics: Mutex::new(serial_characteristics()),
            writes: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fail_write_at: Mutex::new(None),
            connect_gate: Mutex::new(None),
            write_gate: Mutex::new(None),
            stalled: Mutex::new(HashSet::new()),
            notify_tx: Mutex::new(None),
            disconnect_tx: Mutex::new(None),
        }
    }
}

pub fn serial_characteristics() -> Vec<CharacteristicRef> {
    vec![
        CharacteristicRef::new(NOTIFY_CHARACTERISTIC_UUID, SERIAL_SERVICE_UUID),
        CharacteristicRef::new(WRITE_CHARACTERISTIC_UUID, SERIAL_SERVICE_UUID),
    ]
}

impl FakePeripheral {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the write attempt with this zero-based index.
    pub fn fail_write_at(&self, attempt: usize) {
        *self.fail_write_at.lock() = Some(attempt);
    }

    /// Make `connect` wait until the returned gate is notified.
    pub fn gate_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.connect_gate.lock() = Some(gate.clone());
        gate
    }

    /// Make the write attempt with this zero-based index wait until the
    /// returned gate is notified.
    pub fn gate_write_at(&self, attempt: usize) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.write_gate.lock() = Some((attempt, gate.clone()));
        gate
    }

    /// Make an operation never complete.
    pub fn stall(&self, operation: Stall) {
        self.stalled.lock().insert(operation);
    }

    async fn stall_if(&self, operation: Stall) {
        let stalled = self.stalled.lock().contains(&operation);
        if stalled {
            futures::future::pending::<()>().await;
        }
    }

    pub fn write_attempts(&self) -> usize {
        self.calls.write.load(Ordering::SeqCst)
    }

    pub fn set_characteristics(&self, characteristics: Vec<CharacteristicRef>) {
        *self.characteristics.lock() = characteristics;
    }

    /// Payloads of every successful write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    pub fn written_bytes(&self) -> Vec<u8> {
        self.writes.lock().concat()
    }

    /// Most writes ever outstanding at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Deliver a notification as if the peripheral had sent it.
    pub fn notify(&self, characteristic: Uuid, data: &[u8]) {
        if let Some(tx) = self.notify_tx.lock().as_ref() {
            let _ = tx.unbounded_send(NotificationEvent {
                characteristic_uuid: characteristic,
                data: data.to_vec(),
            });
        }
    }

    /// Drop the link from the peripheral side.
    pub fn drop_link(&self) {
        if let Some(tx) = self.disconnect_tx.lock().as_ref() {
            let _ = tx.unbounded_send(());
        }
    }
}

#[async_trait]
impl BlePeripheral for FakePeripheral {
    fn id(&self) -> String {
        "fake-tappy".to_string()
    }

    async fn connect(&self) -> Result<()> {
        self.calls.connect.fetch_add(1, Ordering::SeqCst);

        self.stall_if(Stall::Connect).await;

        let gate = self.connect_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.calls.disconnect.fetch_add(1, Ordering::SeqCst);
        self.stall_if(Stall::Disconnect).await;
        Ok(())
    }

    async fn discover(
        &self,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<Vec<CharacteristicRef>> {
        self.calls.discover.fetch_add(1, Ordering::SeqCst);
        self.stall_if(Stall::Discover).await;

        Ok(self
            .characteristics
            .lock()
            .iter()
            .filter(|c| c.service_uuid == service && characteristics.contains(&c.uuid))
            .copied()
            .collect())
    }

    async fn subscribe(&self, _characteristic: &CharacteristicRef) -> Result<()> {
        self.calls.subscribe.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write(
        &self,
        characteristic: &CharacteristicRef,
        data: &[u8],
        _mode: WriteMode,
    ) -> Result<()> {
        assert_eq!(characteristic.uuid, WRITE_CHARACTERISTIC_UUID);

        let attempt = self.calls.write.fetch_add(1, Ordering::SeqCst);
        let outstanding = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(outstanding, Ordering::SeqCst);

        // Give concurrent senders a chance to run while this write is out
        tokio::task::yield_now().await;

        let gate = match self.write_gate.lock().as_ref() {
            Some((gated, gate)) if *gated == attempt => Some(gate.clone()),
            _ => None,
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if *self.fail_write_at.lock() == Some(attempt) {
            return Err(Error::Internal("write rejected".to_string()));
        }

        self.writes.lock().push(data.to_vec());
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let (tx, rx) = mpsc::unbounded();
        *self.notify_tx.lock() = Some(tx);
        Ok(Box::pin(rx))
    }

    async fn disconnections(&self) -> Result<DisconnectStream> {
        let (tx, rx) = mpsc::unbounded();
        *self.disconnect_tx.lock() = Some(tx);
        Ok(Box::pin(rx))
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Poll `condition` until it holds, failing the test after one second.
pub async fn eventually(condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;

    assert!(waited.is_ok(), "condition not reached within one second");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
