//! Connection state of a [`BridgeClient`](crate::client::BridgeClient).
//!
//! ```text
//! Disconnected ──connect()──▶ Reconnecting ──handshake ok──▶ Connected
//!      ▲                          │  ▲                          │
//!      │      attempts exhausted  │  └──── retry after backoff  │
//!      └──────────────────────────┘                             │
//!      └──── disconnect() / destroy() / connection lost ────────┘
//! ```

use std::fmt;

use crate::client::scheduler::ScheduledTask;
use crate::protocol::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Reconnecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Connected => "connected",
        })
    }
}

/// What a failed poll means for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollFailure {
    /// The poll belonged to a session that is no longer current.
    Stale,
    /// Counted; `n` consecutive failures so far.
    Counted(u32),
    /// Threshold reached.
    Escalate,
}

#[derive(Debug, Default)]
pub(crate) struct ClientState {
    pub(crate) phase: ConnectionState,
    pub(crate) session_id: Option<SessionId>,
    pub(crate) fail_count: u32,
    pub(crate) attempts: u32,
    poll: Option<ScheduledTask>,
    retry: Option<ScheduledTask>,
}

impl ClientState {
    /// Enter `Reconnecting`. False if a connection is already up or being
    /// set up; a connected client keeps its session.
    pub(crate) fn begin_connect(&mut self) -> bool {
        if self.phase != ConnectionState::Disconnected {
            return false;
        }
        self.phase = ConnectionState::Reconnecting;
        true
    }

    pub(crate) fn is_current(&self, session_id: SessionId) -> bool {
        self.phase == ConnectionState::Connected && self.session_id == Some(session_id)
    }

    pub(crate) fn connected(&mut self, session_id: SessionId, poll: ScheduledTask) {
        if let Some(previous) = self.poll.replace(poll) {
            previous.cancel();
        }
        self.retry = None;
        self.phase = ConnectionState::Connected;
        self.session_id = Some(session_id);
        self.fail_count = 0;
        self.attempts = 0;
    }

    /// Remember the pending retry so teardown can cancel it.
    pub(crate) fn retry_scheduled(&mut self, task: ScheduledTask) {
        if let Some(previous) = self.retry.replace(task) {
            previous.cancel();
        }
    }

    /// A poll for `session_id` succeeded.
    pub(crate) fn poll_succeeded(&mut self, session_id: SessionId) -> bool {
        if !self.is_current(session_id) {
            return false;
        }
        self.fail_count = 0;
        true
    }

    pub(crate) fn poll_failed(&mut self, session_id: SessionId, threshold: u32) -> PollFailure {
        if !self.is_current(session_id) {
            return PollFailure::Stale;
        }
        self.fail_count += 1;
        if self.fail_count >= threshold {
            PollFailure::Escalate
        } else {
            PollFailure::Counted(self.fail_count)
        }
    }

    /// Give up on connecting; the next `connect` starts from scratch.
    pub(crate) fn give_up(&mut self) {
        self.phase = ConnectionState::Disconnected;
        self.attempts = 0;
        self.retry = None;
    }

    /// Stop every timer and forget the session. Returns the session that was active.
    pub(crate) fn teardown(&mut self) -> Option<SessionId> {
        if let Some(poll) = self.poll.take() {
            poll.cancel();
        }
        if let Some(retry) = self.retry.take() {
            retry.cancel();
        }
        self.phase = ConnectionState::Disconnected;
        self.fail_count = 0;
        self.attempts = 0;
        self.session_id.take()
    }
}
