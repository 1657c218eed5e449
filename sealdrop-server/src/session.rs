//! Session management.

use sealdrop_protocol::ClientId;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next request.
    AwaitingHeader,
    /// A decoded request is being handled.
    Dispatching,
    /// Handling a checksum outcome, including the inline resend after an
    /// invalid checksum.
    CrcCheck,
    /// The connection is finished.
    Terminated,
}

/// Per-connection state. Lives only as long as the connection.
#[derive(Debug)]
pub struct Session {
    /// Unique session ID, for log correlation.
    pub id: String,

    /// Remote address.
    pub remote_addr: SocketAddr,

    state: SessionState,

    /// Identifier confirmed by the most recent successful request.
    client_id: Option<ClientId>,

    request_count: u64,

    created_at: Instant,
}

impl Session {
    /// Creates a new session.
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            remote_addr,
            state: SessionState::AwaitingHeader,
            client_id: None,
            request_count: 0,
            created_at: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        tracing::trace!(
            "[{}] session {:?} -> {:?}",
            self.remote_addr,
            self.state,
            state
        );
        self.state = state;
    }

    /// Marks a request as successfully handled for `client_id`.
    pub fn confirm(&mut self, client_id: ClientId) {
        self.client_id = Some(client_id);
        self.request_count += 1;
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    /// Number of successfully handled requests.
    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// Returns the session age.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
