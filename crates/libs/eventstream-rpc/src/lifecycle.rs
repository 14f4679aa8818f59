use crate::error::{RpcError, RpcStatus, TransportError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    ConnectingToSocket,
    WaitingForConnectAck,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::ConnectingToSocket => "connecting_to_socket",
            Self::WaitingForConnectAck => "waiting_for_connect_ack",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionMethod {
    Connect,
    SendPing,
    SendPingResponse,
    ActivateStream,
    SendStreamMessage,
}

impl ConnectionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::SendPing => "send_ping",
            Self::SendPingResponse => "send_ping_response",
            Self::ActivateStream => "activate_stream",
            Self::SendStreamMessage => "send_stream_message",
        }
    }

    fn illegal_status(self) -> RpcStatus {
        match self {
            Self::Connect => RpcStatus::ConnectionAlreadyEstablished,
            Self::ActivateStream => RpcStatus::NullParameter,
            Self::SendPing | Self::SendPingResponse | Self::SendStreamMessage => {
                RpcStatus::ConnectionClosed
            }
        }
    }
}

/// Connection state machine.
///
/// `epoch` increases on every `connect` so callbacks belonging to an
/// earlier link can recognise themselves as stale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lifecycle {
    state: ConnectionState,
    epoch: u64,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self { state: ConnectionState::Disconnected, epoch: 0 }
    }
}

impl Lifecycle {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn ensure_method_legal(&self, method: ConnectionMethod) -> Result<(), RpcError> {
        if legal_states_for_method(method).contains(&self.state) {
            return Ok(());
        }
        log::debug!(
            "lifecycle: {} not legal while {}",
            method.as_str(),
            self.state.as_str()
        );
        Err(RpcError::new(method.illegal_status()))
    }

    /// Starts a new link and returns its epoch.
    pub fn mark_connecting(&mut self) -> Result<u64, RpcError> {
        self.ensure_method_legal(ConnectionMethod::Connect)?;
        self.state = ConnectionState::ConnectingToSocket;
        self.epoch += 1;
        Ok(self.epoch)
    }

    pub fn mark_waiting_for_connect_ack(&mut self) -> Result<(), RpcError> {
        self.transition(ConnectionState::ConnectingToSocket, ConnectionState::WaitingForConnectAck)
    }

    pub fn mark_connected(&mut self) -> Result<(), RpcError> {
        self.transition(ConnectionState::WaitingForConnectAck, ConnectionState::Connected)
    }

    /// Returns `false` when there was nothing to close.
    pub fn mark_disconnecting(&mut self) -> bool {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Disconnecting => false,
            _ => {
                self.state = ConnectionState::Disconnecting;
                true
            }
        }
    }

    pub fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Undo a `mark_connecting` whose setup never started.
    pub fn revert_connecting(&mut self) {
        if self.state == ConnectionState::ConnectingToSocket {
            self.state = ConnectionState::Disconnected;
        }
    }

    fn transition(&mut self, from: ConnectionState, to: ConnectionState) -> Result<(), RpcError> {
        if self.state != from {
            log::debug!(
                "lifecycle: cannot move to {} from {}",
                to.as_str(),
                self.state.as_str()
            );
            return Err(TransportError::invalid_state(self.state.as_str()).into());
        }
        self.state = to;
        Ok(())
    }
}

fn legal_states_for_method(method: ConnectionMethod) -> &'static [ConnectionState] {
    use ConnectionState as S;
    match method {
        ConnectionMethod::Connect => &[S::Disconnected],
        ConnectionMethod::SendPing
        | ConnectionMethod::SendPingResponse
        | ConnectionMethod::ActivateStream
        | ConnectionMethod::SendStreamMessage => &[S::Connected],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_every_state() {
        let mut lifecycle = Lifecycle::default();
        assert_eq!(lifecycle.mark_connecting(), Ok(1));
        lifecycle.mark_waiting_for_connect_ack().expect("waiting");
        lifecycle.mark_connected().expect("connected");
        assert!(lifecycle.ensure_method_legal(ConnectionMethod::ActivateStream).is_ok());
        assert!(lifecycle.mark_disconnecting());
        assert!(!lifecycle.mark_disconnecting());
        lifecycle.mark_disconnected();
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
        assert_eq!(lifecycle.mark_connecting(), Ok(2));
    }

    #[test]
    fn connect_outside_disconnected_leaves_state_alone() {
        let mut lifecycle = Lifecycle::default();
        lifecycle.mark_connecting().expect("connecting");
        for _ in 0..2 {
            let before = lifecycle.clone();
            assert_eq!(
                lifecycle.mark_connecting(),
                Err(RpcError::new(RpcStatus::ConnectionAlreadyEstablished))
            );
            assert_eq!(lifecycle, before);
            let _ = lifecycle.mark_waiting_for_connect_ack();
        }
    }

    #[test]
    fn sends_require_connected() {
        let lifecycle = Lifecycle::default();
        assert_eq!(
            lifecycle.ensure_method_legal(ConnectionMethod::ActivateStream),
            Err(RpcError::new(RpcStatus::NullParameter))
        );
        assert_eq!(
            lifecycle.ensure_method_legal(ConnectionMethod::SendPing),
            Err(RpcError::new(RpcStatus::ConnectionClosed))
        );
        assert_eq!(
            lifecycle.ensure_method_legal(ConnectionMethod::Connect),
            Ok(())
        );
    }

    #[test]
    fn connack_before_socket_setup_is_rejected() {
        let mut lifecycle = Lifecycle::default();
        lifecycle.mark_connecting().expect("connecting");
        let err = lifecycle.mark_connected().expect_err("not waiting");
        assert_eq!(err.status(), RpcStatus::Transport);
        assert_eq!(err.transport_code(), TransportError::INVALID_STATE);
        assert_eq!(lifecycle.state(), ConnectionState::ConnectingToSocket);
    }

    #[derive(Clone, Copy, Debug)]
    enum ModelOp {
        Connect,
        SocketUp,
        ConnAck,
        Close,
        Shutdown,
    }

    fn rank(state: ConnectionState) -> u8 {
        match state {
            ConnectionState::Disconnected => 0,
            ConnectionState::ConnectingToSocket => 1,
            ConnectionState::WaitingForConnectAck => 2,
            ConnectionState::Connected => 3,
            ConnectionState::Disconnecting => 4,
        }
    }

    #[test]
    fn transitions_only_move_forward_until_disconnected() {
        let ops = [
            ModelOp::Connect,
            ModelOp::ConnAck,
            ModelOp::SocketUp,
            ModelOp::Connect,
            ModelOp::ConnAck,
            ModelOp::SocketUp,
            ModelOp::Close,
            ModelOp::ConnAck,
            ModelOp::Connect,
            ModelOp::Shutdown,
            ModelOp::Connect,
            ModelOp::Close,
            ModelOp::Shutdown,
        ];
        let mut lifecycle = Lifecycle::default();
        for op in ops {
            let before = lifecycle.state();
            match op {
                ModelOp::Connect => {
                    let _ = lifecycle.mark_connecting();
                }
                ModelOp::SocketUp => {
                    let _ = lifecycle.mark_waiting_for_connect_ack();
                }
                ModelOp::ConnAck => {
                    let _ = lifecycle.mark_connected();
                }
                ModelOp::Close => {
                    lifecycle.mark_disconnecting();
                }
                ModelOp::Shutdown => lifecycle.mark_disconnected(),
            }
            let after = lifecycle.state();
            assert!(
                after == ConnectionState::Disconnected || rank(after) >= rank(before),
                "{op:?} moved {before:?} -> {after:?}"
            );
        }
    }
}
