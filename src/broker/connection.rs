//! Connection manager — tracks the single attached worker across reconnects.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::dispatch::DispatchedJob;

/// How the attached worker receives its jobs.
#[derive(Debug)]
pub enum ConnectionMode {
    /// Persistent channel (WebSocket); jobs are pushed through this sender
    /// into the socket task.
    Push(mpsc::Sender<DispatchedJob>),
    /// Stateless HTTP pull; jobs are handed out on `/poll`.
    Poll,
}

/// The currently attached worker channel.
#[derive(Debug)]
pub struct WorkerConnection {
    /// Generation token. A reply carrying an older token belongs to a
    /// superseded channel and must not touch current state.
    pub token: u64,
    pub mode: ConnectionMode,
    /// Last inbound activity (poll, ping, reply).
    pub last_seen: Instant,
}

/// Exactly one logical worker exists; attachment is a generation counter so a
/// reply from an old channel can never be mistaken for one on the new channel.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    current: Option<WorkerConnection>,
    next_token: u64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new worker channel, superseding any prior one.
    /// Returns the new token and the replaced connection, if any.
    pub fn attach(&mut self, mode: ConnectionMode, now: Instant) -> (u64, Option<WorkerConnection>) {
        self.next_token += 1;
        let token = self.next_token;
        let replaced = self.current.replace(WorkerConnection {
            token,
            mode,
            last_seen: now,
        });
        (token, replaced)
    }

    /// Whether a worker is currently attached.
    pub fn is_ready(&self) -> bool {
        self.current.is_some()
    }

    /// Whether `token` names the active connection.
    pub fn is_current(&self, token: u64) -> bool {
        self.current.as_ref().is_some_and(|c| c.token == token)
    }

    pub fn current(&self) -> Option<&WorkerConnection> {
        self.current.as_ref()
    }

    /// Record inbound activity on the active connection.
    /// Returns false for a stale token.
    pub fn heartbeat(&mut self, token: u64, now: Instant) -> bool {
        match self.current.as_mut() {
            Some(c) if c.token == token => {
                c.last_seen = now;
                true
            }
            _ => false,
        }
    }

    /// Drop the active connection if `token` still names it.
    pub fn detach(&mut self, token: u64) -> Option<WorkerConnection> {
        if self.is_current(token) {
            self.current.take()
        } else {
            None
        }
    }

    /// Whether the active connection has gone quiet past the liveness window.
    pub fn is_stale(&self, now: Instant, window: Duration) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| now.duration_since(c.last_seen) > window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_replaces_previous_connection() {
        let now = Instant::now();
        let mut manager = ConnectionManager::new();

        let (first, replaced) = manager.attach(ConnectionMode::Poll, now);
        assert!(replaced.is_none());
        assert!(manager.is_current(first));

        let (second, replaced) = manager.attach(ConnectionMode::Poll, now);
        assert_eq!(replaced.unwrap().token, first);
        assert!(manager.is_current(second));
        assert!(!manager.is_current(first));
    }

    #[test]
    fn tokens_are_monotonic() {
        let now = Instant::now();
        let mut manager = ConnectionManager::new();
        let (a, _) = manager.attach(ConnectionMode::Poll, now);
        let (b, _) = manager.attach(ConnectionMode::Poll, now);
        assert!(b > a);
    }

    #[test]
    fn heartbeat_rejects_stale_token() {
        let now = Instant::now();
        let mut manager = ConnectionManager::new();
        let (old, _) = manager.attach(ConnectionMode::Poll, now);
        let (new, _) = manager.attach(ConnectionMode::Poll, now);

        assert!(!manager.heartbeat(old, now));
        assert!(manager.heartbeat(new, now));
    }

    #[test]
    fn staleness_tracks_last_seen() {
        let now = Instant::now();
        let window = Duration::from_secs(10);
        let mut manager = ConnectionManager::new();
        let (token, _) = manager.attach(ConnectionMode::Poll, now);

        assert!(!manager.is_stale(now + Duration::from_secs(5), window));
        assert!(manager.is_stale(now + Duration::from_secs(11), window));

        manager.heartbeat(token, now + Duration::from_secs(8));
        assert!(!manager.is_stale(now + Duration::from_secs(11), window));
    }

    #[test]
    fn detach_ignores_stale_token() {
        let now = Instant::now();
        let mut manager = ConnectionManager::new();
        let (old, _) = manager.attach(ConnectionMode::Poll, now);
        let (_new, _) = manager.attach(ConnectionMode::Poll, now);

        assert!(manager.detach(old).is_none());
        assert!(manager.is_ready());
    }
}
