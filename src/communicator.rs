//! The Tappy session.
//!
//! A [`Communicator`] owns one session with one peripheral: it connects,
//! discovers the serial characteristics, subscribes to notifications, sends
//! outbound data in chunks and tears everything down on disconnect.

use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::characteristics::{CharacteristicPair, CharacteristicRef};
use crate::ble::connection::{
    ConnectOutcome, ConnectionEvent, ConnectionMachine, ConnectionState, DisconnectAction,
};
use crate::ble::peripheral::{
    BlePeripheral, BtleplugPeripheral, DisconnectStream, NotificationStream,
};
use crate::ble::uuids::{
    NOTIFY_CHARACTERISTIC_UUID, SERIAL_SERVICE_UUID, WRITE_CHARACTERISTIC_UUID,
};
use crate::callbacks::{CallbackHandle, CallbackSlots};
use crate::config::CommunicatorConfig;
use crate::error::{Error, Result};
use crate::transfer::SendQueue;

/// Completion slot for a disconnect requested while connecting.
type DisconnectWaiter = oneshot::Sender<Result<()>>;

/// Mutable session state, guarded by one lock.
struct Session {
    machine: ConnectionMachine,
    queue: SendQueue,
    disconnect_waiter: Option<DisconnectWaiter>,
    data_listener: Option<JoinHandle<()>>,
    disconnect_listener: Option<JoinHandle<()>>,
}

impl Session {
    fn take_listeners(&mut self) -> [Option<JoinHandle<()>>; 2] {
        [self.data_listener.take(), self.disconnect_listener.take()]
    }
}

/// State shared between the communicator and its listener tasks.
struct Shared<P> {
    peripheral: Arc<P>,
    identifier: String,
    config: CommunicatorConfig,
    session: Mutex<Session>,
    callbacks: Arc<CallbackSlots>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

enum DrainStep {
    Next(Bytes),
    Done,
    SessionEnded,
    Failed(Error),
}

/// Runs a closure if dropped before being disarmed.
///
/// Holds the cleanup for futures that may be cancelled mid-operation.
struct CancelGuard<F: FnOnce()> {
    on_cancel: Option<F>,
}

impl<F: FnOnce()> CancelGuard<F> {
    fn new(on_cancel: F) -> Self {
        Self {
            on_cancel: Some(on_cancel),
        }
    }

    fn disarm(mut self) {
        self.on_cancel = None;
    }
}

impl<F: FnOnce()> Drop for CancelGuard<F> {
    fn drop(&mut self) {
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

/// Run `operation`, failing with [`Error::Timeout`] if it outlives `deadline`.
async fn with_deadline<T, F>(phase: &'static str, deadline: Option<Duration>, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline, operation)
            .await
            .map_err(|_| {
                warn!("{} did not complete within {:?}", phase, deadline);
                Error::Timeout { phase }
            })?,
        None => operation.await,
    }
}

impl<P: BlePeripheral + 'static> Shared<P> {
    /// Publish a state change. Called with the session lock held so events
    /// go out in transition order.
    fn emit(&self, state: ConnectionState) {
        let _ = self.event_tx.send(ConnectionEvent {
            identifier: self.identifier.clone(),
            state,
        });
    }

    /// Connect, discover, and subscribe.
    async fn establish(&self) -> Result<(CharacteristicPair, Option<DisconnectStream>)> {
        let timeouts = self.config.timeouts;

        with_deadline("connect", timeouts.connect, self.peripheral.connect())
            .await
            .map_err(|e| Error::ConnectionFailed {
                reason: "Failed to connect".to_string(),
                source: Some(Box::new(e)),
            })?;

        debug!("Radio link to {} is up, discovering services", self.identifier);

        let wanted = [NOTIFY_CHARACTERISTIC_UUID, WRITE_CHARACTERISTIC_UUID];
        let discovery = with_deadline(
            "discovery",
            timeouts.discovery,
            self.peripheral.discover(SERIAL_SERVICE_UUID, &wanted),
        )
        .await;

        let discovered = match discovery {
            Ok(discovered) => discovered,
            Err(e) => {
                self.abandon_link().await;
                return Err(Error::DiscoveryFailed {
                    reason: e.to_string(),
                    source: Some(Box::new(e)),
                });
            }
        };

        let pair = match CharacteristicPair::resolve(&discovered) {
            Ok(pair) => pair,
            Err(e) => {
                self.abandon_link().await;
                return Err(e);
            }
        };

        // Listen before subscribing so the first notification is not missed
        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| Error::SubscribeFailed {
                source: Box::new(e),
            })?;
        let listener = self.spawn_data_listener(notifications, pair.notify.uuid);
        if let Some(stale) = self.session.lock().data_listener.replace(listener) {
            stale.abort();
        }

        with_deadline(
            "subscribe",
            timeouts.subscribe,
            self.peripheral.subscribe(&pair.notify),
        )
        .await
        .map_err(|e| Error::SubscribeFailed {
            source: Box::new(e),
        })?;

        let disconnections = match self.peripheral.disconnections().await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(
                    "Cannot watch {} for disconnects, they will go unnoticed: {}",
                    self.identifier, e
                );
                None
            }
        };

        Ok((pair, disconnections))
    }

    /// Drop the radio link after a failed discovery.
    async fn abandon_link(&self) {
        let result = with_deadline(
            "disconnect",
            self.config.timeouts.disconnect,
            self.peripheral.disconnect(),
        )
        .await;

        if let Err(e) = result {
            debug!("Disconnect after failed discovery also failed: {}", e);
        }
    }

    fn spawn_data_listener(
        &self,
        mut notifications: NotificationStream,
        notify_uuid: Uuid,
    ) -> JoinHandle<()> {
        let callbacks = self.callbacks.clone();

        tokio::spawn(async move {
            debug!("Notification listener started");

            while let Some(event) = notifications.next().await {
                if event.characteristic_uuid != notify_uuid {
                    trace!(
                        "Ignoring notification from {}",
                        event.characteristic_uuid
                    );
                    continue;
                }

                trace!(
                    "Notification received: {} bytes, data: {:02X?}",
                    event.data.len(),
                    &event.data[..std::cmp::min(event.data.len(), 20)]
                );

                callbacks.dispatch_data(&event.data);
            }

            debug!("Notification listener stopped");
        })
    }

    fn spawn_disconnect_listener(self: &Arc<Self>, mut disconnections: DisconnectStream) -> JoinHandle<()> {
        let shared = Arc::downgrade(self);

        tokio::spawn(async move {
            if disconnections.next().await.is_none() {
                debug!("Disconnect event stream ended");
                return;
            }

            let Some(shared) = shared.upgrade() else {
                return;
            };

            // A requested disconnect removes this listener first; if it is
            // already gone the teardown is someone else's to report.
            let detached = shared.session.lock().disconnect_listener.take();
            if detached.is_none() {
                return;
            }

            warn!("Tappy {} disconnected", shared.identifier);
            shared.callbacks.dispatch_error(&Error::Disconnected);

            if let Err(e) = shared.teardown().await {
                error!("Teardown after disconnect failed: {}", e);
            }
        })
    }

    /// Enter `Connected`; returns whether a deferred disconnect must run now.
    fn complete_connect(
        self: &Arc<Self>,
        pair: CharacteristicPair,
        disconnections: Option<DisconnectStream>,
    ) -> bool {
        let mut session = self.session.lock();
        let pending = session.machine.complete_connect(pair);

        // No listener when the session is about to be torn down on request:
        // that disconnect must not be reported as an error.
        if let (false, Some(stream)) = (pending, disconnections) {
            let listener = self.spawn_disconnect_listener(stream);
            if let Some(stale) = session.disconnect_listener.replace(listener) {
                stale.abort();
            }
        }

        self.emit(ConnectionState::Connected);
        pending
    }

    /// Return from `Connecting` to `Idle` after a failed or cancelled connect.
    fn fail_connect(&self) {
        let waiter = {
            let mut session = self.session.lock();
            if session.machine.state() != ConnectionState::Connecting {
                return;
            }

            if session.machine.fail_connect() {
                debug!("Connect failed, nothing left to disconnect");
            }
            for listener in session.take_listeners().into_iter().flatten() {
                listener.abort();
            }
            self.emit(ConnectionState::Idle);
            session.disconnect_waiter.take()
        };

        if let Some(waiter) = waiter {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Tear the session down.
    ///
    /// If a deferred disconnect is waiting, it receives the outcome and this
    /// returns `Ok(())`.
    async fn teardown(&self) -> Result<()> {
        let listeners = {
            let mut session = self.session.lock();
            if !session.machine.begin_teardown()? {
                return Ok(());
            }
            self.emit(ConnectionState::Disconnecting);
            session.take_listeners()
        };

        for listener in listeners.into_iter().flatten() {
            listener.abort();
        }

        let guard = CancelGuard::new(|| {
            if let Some(waiter) = self.finish_teardown() {
                let _ = waiter.send(Err(Error::Internal(
                    "disconnect interrupted".to_string(),
                )));
            }
        });

        let result = with_deadline(
            "disconnect",
            self.config.timeouts.disconnect,
            self.peripheral.disconnect(),
        )
        .await
        .map_err(|e| Error::DisconnectFailed {
            source: Box::new(e),
        });

        guard.disarm();

        match &result {
            Ok(()) => info!("Disconnected from Tappy {}", self.identifier),
            Err(e) => error!("Failed to disconnect from Tappy {}: {}", self.identifier, e),
        }

        match self.finish_teardown() {
            Some(waiter) => {
                let _ = waiter.send(result);
                Ok(())
            }
            None => result,
        }
    }

    /// Clear the session in one step and return to `Idle`.
    fn finish_teardown(&self) -> Option<DisconnectWaiter> {
        let mut session = self.session.lock();
        session.machine.finish_teardown();

        let unsent = session.queue.len();
        session.queue.reset();
        if unsent > 0 {
            debug!("Dropped {} unsent bytes on disconnect", unsent);
        }

        self.emit(ConnectionState::Idle);
        session.disconnect_waiter.take()
    }

    /// Write chunks one at a time until the queue is empty.
    async fn drain(&self, first: Bytes, target: CharacteristicRef, generation: u64) {
        let guard = CancelGuard::new(|| {
            let mut session = self.session.lock();
            if session.machine.is_session_live(generation) {
                let discarded = session.queue.fail_write();
                warn!("Transfer cancelled, {} queued bytes discarded", discarded);
            }
        });

        let mut chunk = first;
        let failure = loop {
            trace!("Writing {} byte chunk: {:02X?}", chunk.len(), &chunk[..]);

            let result = with_deadline(
                "write",
                self.config.timeouts.write,
                self.peripheral
                    .write(&target, &chunk, self.config.write_mode),
            )
            .await;

            let step = {
                let mut session = self.session.lock();
                if !session.machine.is_session_live(generation) {
                    DrainStep::SessionEnded
                } else {
                    match result {
                        Ok(()) => match session.queue.complete_write() {
                            Some(next) => DrainStep::Next(next),
                            None => DrainStep::Done,
                        },
                        Err(e) => DrainStep::Failed(Error::WriteFailed {
                            discarded: session.queue.fail_write(),
                            source: Box::new(e),
                        }),
                    }
                }
            };

            match step {
                DrainStep::Next(next) => chunk = next,
                DrainStep::Done => {
                    trace!("Send queue drained");
                    break None;
                }
                DrainStep::SessionEnded => {
                    debug!("Session ended during transfer, stopping");
                    break None;
                }
                DrainStep::Failed(e) => break Some(e),
            }
        };

        guard.disarm();

        if let Some(e) = failure {
            error!("Transfer to Tappy {} failed: {}", self.identifier, e);
            self.callbacks.dispatch_error(&e);
        }
    }
}

impl<P> Drop for Shared<P> {
    fn drop(&mut self) {
        for listener in self.session.get_mut().take_listeners().into_iter().flatten() {
            listener.abort();
        }
    }
}

/// Byte-stream session with a single TappyBLE reader.
///
/// Outbound data is split into chunks of at most
/// [`packet_size`](CommunicatorConfig::packet_size) bytes and written one
/// chunk at a time; inbound notifications are handed to the data callback as
/// they arrive.
pub struct Communicator<P = BtleplugPeripheral> {
    shared: Arc<Shared<P>>,
    callback_counter: AtomicU64,
}

impl<P: BlePeripheral + 'static> Communicator<P> {
    /// Create a communicator with the default configuration.
    pub fn new(peripheral: Arc<P>) -> Self {
        Self::build(peripheral, CommunicatorConfig::default())
    }

    /// Create a communicator with a custom chunk size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `packet_size` is zero.
    pub fn with_packet_size(peripheral: Arc<P>, packet_size: usize) -> Result<Self> {
        Self::with_config(
            peripheral,
            CommunicatorConfig::new().with_packet_size(packet_size),
        )
    }

    /// Create a communicator with a full configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the configuration is invalid.
    pub fn with_config(peripheral: Arc<P>, config: CommunicatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(peripheral, config))
    }

    fn build(peripheral: Arc<P>, config: CommunicatorConfig) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        let identifier = peripheral.id();
        let queue = SendQueue::new(config.packet_size);

        Self {
            shared: Arc::new(Shared {
                peripheral,
                identifier,
                config,
                session: Mutex::new(Session {
                    machine: ConnectionMachine::new(),
                    queue,
                    disconnect_waiter: None,
                    data_listener: None,
                    disconnect_listener: None,
                }),
                callbacks: Arc::new(CallbackSlots::default()),
                event_tx,
            }),
            callback_counter: AtomicU64::new(0),
        }
    }

    // === Configuration ===

    /// Get the peripheral this session talks to.
    pub fn peripheral(&self) -> &Arc<P> {
        &self.shared.peripheral
    }

    /// Get the configuration.
    pub fn config(&self) -> &CommunicatorConfig {
        &self.shared.config
    }

    /// Get the chunk size.
    pub fn packet_size(&self) -> usize {
        self.shared.config.packet_size
    }

    // === Callbacks ===

    /// Set the callback receiving inbound data. Replaces any previous one.
    pub fn set_data_callback<F>(&self, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.shared.callbacks.set_data(Arc::new(callback));
    }

    /// Set the callback receiving transfer errors and unexpected disconnects.
    /// Replaces any previous one.
    pub fn set_error_callback<F>(&self, callback: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.shared.callbacks.set_error(Arc::new(callback));
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Register a callback for connection state changes.
    pub fn on_state_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.shared.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event.state),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("State callback lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    // === Connection ===

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.session.lock().machine.state()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Connect, discover the serial characteristics and subscribe.
    ///
    /// Does nothing if a connect is already running or the session is
    /// already connected; the returned [`ConnectOutcome`] says which. If
    /// [`disconnect`](Self::disconnect) was called while connecting, the
    /// session is torn down right after it is established.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionFailed`], [`Error::DiscoveryFailed`],
    /// [`Error::CharacteristicNotFound`] or [`Error::SubscribeFailed`]; the
    /// state is back to `Idle` in every case. After a subscribe failure the
    /// radio link stays up and can be dropped through
    /// [`peripheral`](Self::peripheral).
    pub async fn connect(&self) -> Result<ConnectOutcome> {
        let shared = &self.shared;

        {
            let mut session = shared.session.lock();
            if let Some(outcome) = session.machine.begin_connect() {
                debug!("Ignoring connect to {}: {:?}", shared.identifier, outcome);
                return Ok(outcome);
            }
            shared.emit(ConnectionState::Connecting);
        }

        info!("Connecting to Tappy {}", shared.identifier);

        let guard = CancelGuard::new(|| shared.fail_connect());

        let (pair, disconnections) = match shared.establish().await {
            Ok(established) => established,
            Err(e) => {
                warn!("Failed to connect to Tappy {}: {}", shared.identifier, e);
                return Err(e);
            }
        };

        guard.disarm();

        let pending_disconnect = shared.complete_connect(pair, disconnections);
        info!("Connected to Tappy {}", shared.identifier);

        if pending_disconnect {
            debug!("Disconnect requested while connecting, tearing down");
            if let Err(e) = shared.teardown().await {
                warn!("Deferred disconnect failed: {}", e);
            }
        }

        Ok(ConnectOutcome::Established)
    }

    /// Disconnect from the Tappy.
    ///
    /// Safe to call in any state. While connecting, the request is held
    /// until the connect finishes and this call resolves once the resulting
    /// teardown is done (or immediately with `Ok(())` if the connect fails).
    ///
    /// # Errors
    ///
    /// [`Error::DisconnectFailed`] if the peripheral reported an error. The
    /// session is cleared regardless.
    pub async fn disconnect(&self) -> Result<()> {
        let shared = &self.shared;

        let deferred = {
            let mut session = shared.session.lock();

            // Requested disconnects are not reported through the error callback
            if let Some(listener) = session.disconnect_listener.take() {
                listener.abort();
            }

            match session.machine.request_disconnect() {
                DisconnectAction::Teardown => None,
                DisconnectAction::Defer => {
                    let (tx, rx) = oneshot::channel();
                    if session.disconnect_waiter.replace(tx).is_some() {
                        debug!("Superseding an earlier deferred disconnect");
                    }
                    Some(rx)
                }
                DisconnectAction::Nothing => {
                    debug!("Nothing to disconnect from {}", shared.identifier);
                    return Ok(());
                }
            }
        };

        info!("Disconnecting from Tappy {}", shared.identifier);

        match deferred {
            None => shared.teardown().await,
            Some(rx) => {
                debug!("Connect in progress, disconnect deferred");
                // A superseded request resolves as soon as its sender is dropped
                rx.await.unwrap_or(Ok(()))
            }
        }
    }

    // === Transfer ===

    /// Queue `data` for sending.
    ///
    /// The bytes are copied onto the outbound queue. If no transfer is
    /// running, this call drives one and returns once the queue is empty;
    /// otherwise it returns right away and the running transfer picks the
    /// bytes up in order.
    ///
    /// A failed write discards everything still queued and is reported once
    /// through the error callback, not through this return value.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] if there is no connected session; nothing is
    /// queued in that case.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let shared = &self.shared;

        let (first, target, generation) = {
            let mut session = shared.session.lock();
            let target = session
                .machine
                .write_characteristic()
                .ok_or(Error::NotConnected)?;

            session.queue.push(data);
            match session.queue.begin_drain() {
                Some(chunk) => (chunk, target, session.machine.generation()),
                None => {
                    trace!("Queued {} bytes behind the running transfer", data.len());
                    return Ok(());
                }
            }
        };

        shared.drain(first, target, generation).await;
        Ok(())
    }

    /// Does nothing.
    ///
    /// The BLE transport has no way to confirm delivery of queued data, so
    /// flushing is not implemented. It exists for parity with other Tappy
    /// transports.
    pub fn flush(&self) {
        debug!("flush is not supported by the BLE transport");
    }

    /// Check if a transfer is running.
    pub fn is_sending(&self) -> bool {
        self.shared.session.lock().queue.is_sending()
    }

    /// Number of queued bytes not yet handed to the peripheral.
    pub fn queued_bytes(&self) -> usize {
        self.shared.session.lock().queue.len()
    }
}

impl<P> std::fmt::Debug for Communicator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.shared.session.lock();
        f.debug_struct("Communicator")
            .field("identifier", &self.shared.identifier)
            .field("state", &session.machine.state())
            .field("disconnect_pending", &session.machine.is_disconnect_pending())
            .field("packet_size", &self.shared.config.packet_size)
            .field("queued_bytes", &session.queue.len())
            .finish()
    }
}
