//! Shared guidance connection status
//!
//! Used by the state machine and by both WASM and native WebSocket clients.

/// Connection status shown to the user
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Handshake in progress (first attempt or reconnect)
    #[default]
    Connecting,
    /// Socket open and init frame sent
    Connected,
    /// Socket closed, reconnect scheduled
    Disconnected,
    /// Socket is fine but the simulator did not answer the last locate request
    SimulatorUnavailable,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// Transport is up, whether or not the simulator is answering
    pub fn is_transport_up(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connected | ConnectionStatus::SimulatorUnavailable
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::SimulatorUnavailable => "simulator_unavailable",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
