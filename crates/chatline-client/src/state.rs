//! Connection state machine.
//!
//! [`SessionState::apply`] is a pure transition function: it updates the
//! observable state and returns the single [`Action`] the driver must carry
//! out. No I/O or timers happen here.
//!
//! ```text
//! Closed ──connect──▶ Connecting ──opened──▶ Open ──clean close──▶ Closed
//!                         ▲                   │
//!                         │            error / abnormal close
//!                   timer fired               ▼
//!                         └──────────── Reconnecting ──bound hit──▶ Error
//! ```

use std::time::Duration;

use chatline_core::{ConversationId, ServerEnvelope};
use serde_json::Value;

use crate::policy::ReconnectPolicy;

/// Close codes treated as an intentional, clean close.
const CLEAN_CLOSE_CODES: [u16; 2] = [1000, 1001];

/// Observable connection status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected and not trying to be.
    #[default]
    Closed,
    /// Handshake in progress.
    Connecting,
    /// Connected; frames flow.
    Open,
    /// Waiting for the next reconnection attempt.
    Reconnecting,
    /// Reconnection bound exhausted. Only an explicit retry leaves this state.
    Error,
}

/// Inputs to the state machine.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    /// User asked for a fresh connection (`connect` or `retry`).
    Connect,
    /// Handshake finished.
    Opened,
    /// A parsed server envelope arrived.
    Message(ServerEnvelope),
    /// Connect failed, or the transport reported an error.
    Failed,
    /// The socket closed; `None` when no close frame was received.
    Closed {
        /// Close code from the peer's close frame.
        code: Option<u16>,
    },
    /// The pending reconnect delay elapsed.
    ReconnectTimerFired,
    /// Follow a different conversation.
    SetConversation(ConversationId),
    /// Close and stay closed.
    Shutdown,
}

/// Work the driver must perform after a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do.
    None,
    /// Open a new connection, dropping any current one.
    Connect,
    /// Send a `subscribe` frame on the open connection.
    SendSubscribe(ConversationId),
    /// Arm the reconnect timer.
    ScheduleReconnect(Duration),
    /// Stop reconnecting; status is now `Error`.
    GiveUp,
    /// Close the connection and cancel any pending timer.
    Disconnect,
}

/// Everything an observer can see about the connection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    /// Current status.
    pub status: ConnectionStatus,
    /// Whether the server acknowledged the current conversation.
    pub is_subscribed: bool,
    /// Failures since the last successful open.
    pub error_count: u32,
    /// Reconnection attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// Conversation to follow.
    pub conversation_id: Option<ConversationId>,
    /// Most recent envelope received.
    pub last_message: Option<ServerEnvelope>,
    /// Opaque description sent with each subscribe frame.
    pub client_info: Option<Value>,
}

impl SessionState {
    /// Initial state following `conversation_id`.
    pub fn new(conversation_id: Option<ConversationId>) -> Self {
        Self {
            conversation_id,
            ..Self::default()
        }
    }

    /// Whether the state is terminal until user action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ConnectionStatus::Closed | ConnectionStatus::Error
        )
    }

    /// Apply `event` and return the action to perform.
    pub fn apply(&mut self, event: ConnectionEvent, policy: &ReconnectPolicy) -> Action {
        match event {
            ConnectionEvent::Connect => match self.status {
                ConnectionStatus::Connecting | ConnectionStatus::Open => Action::None,
                ConnectionStatus::Closed
                | ConnectionStatus::Reconnecting
                | ConnectionStatus::Error => self.start_fresh(),
            },
            ConnectionEvent::Opened => {
                self.status = ConnectionStatus::Open;
                self.error_count = 0;
                self.reconnect_attempts = 0;
                self.is_subscribed = false;
                self.conversation_id
                    .clone()
                    .map_or(Action::None, Action::SendSubscribe)
            }
            ConnectionEvent::Message(envelope) => {
                if let ServerEnvelope::Subscribed { conversation_id } = &envelope {
                    if self.conversation_id.as_ref() == Some(conversation_id) {
                        self.is_subscribed = true;
                    }
                }
                self.last_message = Some(envelope);
                Action::None
            }
            ConnectionEvent::Failed => {
                if self.is_terminal() {
                    return Action::None;
                }
                self.error_count = self.error_count.saturating_add(1);
                self.status = ConnectionStatus::Error;
                self.abnormal_close(policy)
            }
            ConnectionEvent::Closed { code } => {
                if self.is_terminal() {
                    return Action::None;
                }
                self.is_subscribed = false;
                if code.is_some_and(|c| CLEAN_CLOSE_CODES.contains(&c)) {
                    self.status = ConnectionStatus::Closed;
                    Action::None
                } else {
                    self.abnormal_close(policy)
                }
            }
            ConnectionEvent::ReconnectTimerFired => {
                if self.status == ConnectionStatus::Reconnecting {
                    self.status = ConnectionStatus::Connecting;
                    Action::Connect
                } else {
                    Action::None
                }
            }
            ConnectionEvent::SetConversation(conversation_id) => {
                self.conversation_id = Some(conversation_id.clone());
                self.is_subscribed = false;
                match self.status {
                    ConnectionStatus::Open => Action::SendSubscribe(conversation_id),
                    ConnectionStatus::Closed | ConnectionStatus::Error => self.start_fresh(),
                    ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => Action::None,
                }
            }
            ConnectionEvent::Shutdown => {
                self.status = ConnectionStatus::Closed;
                self.is_subscribed = false;
                Action::Disconnect
            }
        }
    }

    fn start_fresh(&mut self) -> Action {
        self.status = ConnectionStatus::Connecting;
        self.error_count = 0;
        self.reconnect_attempts = 0;
        self.is_subscribed = false;
        self.last_message = None;
        Action::Connect
    }

    fn abnormal_close(&mut self, policy: &ReconnectPolicy) -> Action {
        self.is_subscribed = false;
        let attempt = self.reconnect_attempts.saturating_add(1);
        if policy.allows(attempt) {
            self.reconnect_attempts = attempt;
            self.last_message = None;
            self.status = ConnectionStatus::Reconnecting;
            Action::ScheduleReconnect(policy.delay_for(attempt))
        } else {
            self.status = ConnectionStatus::Error;
            Action::GiveUp
        }
    }
}
