//! Connection state machine.
//!
//! Tracks where a session is in its lifecycle and which characteristics it
//! may use. All transitions are synchronous; the [`Communicator`] performs
//! the BLE operations between them and holds this machine behind a lock.
//!
//! [`Communicator`]: crate::Communicator

use tracing::debug;

use crate::ble::characteristics::{CharacteristicPair, CharacteristicRef};
use crate::error::{Error, Result};

/// Connection state for a Tappy session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Not connected; the initial and final state.
    #[default]
    Idle,
    /// Connecting, discovering and subscribing.
    Connecting,
    /// Subscribed to the notify characteristic and ready to send.
    Connected,
    /// Waiting for the peripheral to acknowledge a disconnect.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// The identifier of the peripheral.
    pub identifier: String,
    /// The new connection state.
    pub state: ConnectionState,
}

/// Result of a `connect` call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// This call established the connection.
    Established,
    /// Already connected, or the previous session is still tearing down;
    /// nothing was done.
    AlreadyConnected,
    /// Another call is connecting; nothing was done.
    InProgress,
}

/// What a disconnect request should do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    /// Run the teardown immediately.
    Teardown,
    /// Wait for the in-flight connect to finish, then tear down.
    Defer,
    /// Nothing to disconnect.
    Nothing,
}

/// Lifecycle of one session.
#[derive(Debug, Default)]
pub struct ConnectionMachine {
    state: ConnectionState,
    pending_disconnect: bool,
    characteristics: Option<CharacteristicPair>,
    generation: u64,
}

impl ConnectionMachine {
    /// Create a machine in the `Idle` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Check if a disconnect is waiting for the connect to finish.
    pub fn is_disconnect_pending(&self) -> bool {
        self.pending_disconnect
    }

    /// Counter bumped every time a session ends.
    ///
    /// Work started in one session compares its generation before
    /// continuing so it never touches the next one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Characteristics of the current session, if connected.
    pub fn characteristics(&self) -> Option<CharacteristicPair> {
        self.characteristics.filter(|_| self.state.is_connected())
    }

    /// Characteristic outbound data goes to, if connected.
    pub fn write_characteristic(&self) -> Option<CharacteristicRef> {
        self.characteristics().map(|pair| pair.write)
    }

    /// Check if `generation` is still the live, connected session.
    pub fn is_session_live(&self, generation: u64) -> bool {
        self.state.is_connected() && self.generation == generation
    }

    /// Try to enter `Connecting`.
    ///
    /// Returns `None` when the caller should go on and connect, or the
    /// no-op outcome when a connect is already running or done.
    pub fn begin_connect(&mut self) -> Option<ConnectOutcome> {
        match self.state {
            ConnectionState::Connecting => Some(ConnectOutcome::InProgress),
            ConnectionState::Connected | ConnectionState::Disconnecting => {
                Some(ConnectOutcome::AlreadyConnected)
            }
            ConnectionState::Idle => {
                self.transition(ConnectionState::Connecting);
                None
            }
        }
    }

    /// Abandon a connect attempt and return to `Idle`.
    ///
    /// Returns whether a disconnect had been requested meanwhile; the
    /// request is consumed since there is nothing left to disconnect.
    pub fn fail_connect(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }

        self.characteristics = None;
        self.transition(ConnectionState::Idle);
        std::mem::take(&mut self.pending_disconnect)
    }

    /// Enter `Connected` with the discovered characteristics.
    ///
    /// Returns whether a disconnect was requested while connecting, in
    /// which case the caller must tear the session down right away.
    pub fn complete_connect(&mut self, characteristics: CharacteristicPair) -> bool {
        self.characteristics = Some(characteristics);
        self.transition(ConnectionState::Connected);
        self.pending_disconnect
    }

    /// Record a disconnect request.
    pub fn request_disconnect(&mut self) -> DisconnectAction {
        match self.state {
            ConnectionState::Connecting => {
                self.pending_disconnect = true;
                DisconnectAction::Defer
            }
            ConnectionState::Connected => DisconnectAction::Teardown,
            ConnectionState::Idle | ConnectionState::Disconnecting => DisconnectAction::Nothing,
        }
    }

    /// Enter `Disconnecting`.
    ///
    /// Returns `Ok(false)` when there is no connected session to tear down.
    ///
    /// # Errors
    ///
    /// [`Error::StillConnecting`] if a connect is still in flight.
    pub fn begin_teardown(&mut self) -> Result<bool> {
        match self.state {
            ConnectionState::Connecting => Err(Error::StillConnecting),
            ConnectionState::Connected => {
                self.transition(ConnectionState::Disconnecting);
                Ok(true)
            }
            ConnectionState::Idle | ConnectionState::Disconnecting => Ok(false),
        }
    }

    /// Finish a teardown: clear the session and return to `Idle`.
    pub fn finish_teardown(&mut self) {
        self.pending_disconnect = false;
        self.characteristics = None;
        self.generation = self.generation.wrapping_add(1);
        self.transition(ConnectionState::Idle);
    }

    fn transition(&mut self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut self.state, new_state);
        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{
        NOTIFY_CHARACTERISTIC_UUID, SERIAL_SERVICE_UUID, WRITE_CHARACTERISTIC_UUID,
    };

    fn pair() -> CharacteristicPair {
        CharacteristicPair {
            write: CharacteristicRef::new(WRITE_CHARACTERISTIC_UUID, SERIAL_SERVICE_UUID),
            notify: CharacteristicRef::new(NOTIFY_CHARACTERISTIC_UUID, SERIAL_SERVICE_UUID),
        }
    }

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Idle.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());

        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(ConnectionState::Disconnecting.is_transitioning());
        assert!(!ConnectionState::Connected.is_transitioning());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "Connected");
        assert_eq!(format!("{}", ConnectionState::Idle), "Idle");
    }

    #[test]
    fn test_connect_is_guarded() {
        let mut machine = ConnectionMachine::new();
        assert_eq!(machine.begin_connect(), None);
        assert_eq!(machine.begin_connect(), Some(ConnectOutcome::InProgress));

        machine.complete_connect(pair());
        assert_eq!(machine.begin_connect(), Some(ConnectOutcome::AlreadyConnected));
        assert!(machine.is_connected());
    }

    #[test]
    fn test_failed_connect_returns_to_idle() {
        let mut machine = ConnectionMachine::new();
        machine.begin_connect();
        assert_eq!(machine.request_disconnect(), DisconnectAction::Defer);

        assert!(machine.fail_connect());
        assert_eq!(machine.state(), ConnectionState::Idle);
        assert!(!machine.is_disconnect_pending());
        assert!(machine.write_characteristic().is_none());
    }

    #[test]
    fn test_disconnect_requested_while_connecting() {
        let mut machine = ConnectionMachine::new();
        machine.begin_connect();
        assert_eq!(machine.request_disconnect(), DisconnectAction::Defer);
        assert!(machine.is_disconnect_pending());

        // Connect finishing reports the deferred request
        assert!(machine.complete_connect(pair()));
    }

    #[test]
    fn test_teardown_while_connecting_is_an_error() {
        let mut machine = ConnectionMachine::new();
        machine.begin_connect();
        assert!(matches!(
            machine.begin_teardown(),
            Err(Error::StillConnecting)
        ));
        assert_eq!(machine.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_teardown_clears_session() {
        let mut machine = ConnectionMachine::new();
        machine.begin_connect();
        machine.complete_connect(pair());
        let generation = machine.generation();
        assert!(machine.is_session_live(generation));
        assert_eq!(
            machine.write_characteristic().map(|c| c.uuid),
            Some(WRITE_CHARACTERISTIC_UUID)
        );

        assert_eq!(machine.request_disconnect(), DisconnectAction::Teardown);
        assert!(machine.begin_teardown().unwrap());
        // Characteristics are unusable as soon as the teardown starts
        assert!(machine.write_characteristic().is_none());
        assert_eq!(machine.request_disconnect(), DisconnectAction::Nothing);
        assert!(!machine.begin_teardown().unwrap());

        machine.finish_teardown();
        assert_eq!(machine.state(), ConnectionState::Idle);
        assert!(machine.characteristics().is_none());
        assert!(!machine.is_session_live(generation));
        assert_ne!(machine.generation(), generation);
    }

    #[test]
    fn test_idle_disconnect_is_a_no_op() {
        let mut machine = ConnectionMachine::new();
        assert_eq!(machine.request_disconnect(), DisconnectAction::Nothing);
        assert!(!machine.is_disconnect_pending());
        assert!(!machine.begin_teardown().unwrap());
    }
}
