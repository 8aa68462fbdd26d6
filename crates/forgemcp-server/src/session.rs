//! Session lifecycle and SSE client fan-out.
//!
//! Sessions are created by `initialize`, touched by every later request,
//! and reaped by a periodic task once idle past the TTL plus a grace
//! period that protects in-flight long requests. SSE clients hang off a
//! session key (or `"anonymous"`); dead peers are dropped the moment an
//! enqueue fails.

use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

use forgemcp_security::bytes_to_hex;

use crate::error::{ServerError, ServerResult};

/// Hard cap on concurrently tracked sessions.
pub const MAX_SESSIONS: usize = 10_000;
/// Idle lifetime of a session.
pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);
/// Slack past the TTL before the reaper may collect a session.
pub const SESSION_GRACE: Duration = Duration::from_secs(60);
/// How often the reaper runs.
pub const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Session bucket keyed by `Mcp-Session-Id`.
#[derive(Debug, Clone)]
pub struct Session {
    /// 128-bit lowercase-hex id
    pub id: String,
    /// Creation time
    pub created_at: Instant,
    /// Last time any request referenced the session
    pub last_activity: Instant,
}

/// Session store limits; constants by default, overridable for tests.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum tracked sessions
    pub max_sessions: usize,
    /// Idle TTL
    pub ttl: Duration,
    /// Reap grace past the TTL
    pub grace: Duration,
    /// Reaper interval
    pub cleanup_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: MAX_SESSIONS,
            ttl: SESSION_TTL,
            grace: SESSION_GRACE,
            cleanup_interval: SESSION_CLEANUP_INTERVAL,
        }
    }
}

/// In-process session storage.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    config: SessionConfig,
}

impl SessionStore {
    /// Create a store.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Create a session, reaping expired ones first if the table is full.
    /// Fails with [`ServerError::SessionExhaustion`] when still at the cap.
    pub fn create(&self) -> ServerResult<String> {
        if self.len() >= self.config.max_sessions {
            self.reap_expired();
            if self.len() >= self.config.max_sessions {
                return Err(ServerError::SessionExhaustion);
            }
        }

        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        let id = bytes_to_hex(&bytes);

        let now = Instant::now();
        self.sessions.write().insert(
            id.clone(),
            Session {
                id: id.clone(),
                created_at: now,
                last_activity: now,
            },
        );
        debug!(session_id = %id, "Session created");
        Ok(id)
    }

    /// Update `last_activity`; returns whether the session exists.
    pub fn touch(&self, id: &str) -> bool {
        match self.sessions.write().get_mut(id) {
            Some(session) => {
                session.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Whether the session exists.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Remove a session explicitly (DELETE /mcp).
    pub fn remove(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every session idle past TTL + grace; returns the removed ids.
    pub fn reap_expired(&self) -> Vec<String> {
        let deadline = self.config.ttl + self.config.grace;
        let mut sessions = self.sessions.write();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.last_activity.elapsed() > deadline)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        expired
    }

    /// The configured limits.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

/// One frame queued to an SSE client: `id: <N>\ndata: <json>\n\n`.
#[derive(Debug, Clone)]
pub struct SseEvent {
    /// Monotonic event id
    pub id: u64,
    /// JSON payload
    pub data: String,
}

#[derive(Debug)]
struct SseClient {
    client_id: u64,
    sender: mpsc::Sender<SseEvent>,
    created_at: Instant,
    last_event_id: u64,
}

/// Per-session SSE client lists with monotonic event ids.
#[derive(Debug, Default)]
pub struct SseRegistry {
    clients: Mutex<HashMap<String, Vec<SseClient>>>,
    next_event_id: AtomicU64,
    next_client_id: AtomicU64,
}

/// Session key used for clients that connected without a session.
pub const ANONYMOUS_SESSION: &str = "anonymous";

impl SseRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under a session key. Returns the client id used
    /// for removal on disconnect.
    pub fn register(&self, session_key: &str, sender: mpsc::Sender<SseEvent>) -> u64 {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        self.clients
            .lock()
            .entry(session_key.to_string())
            .or_default()
            .push(SseClient {
                client_id,
                sender,
                created_at: Instant::now(),
                last_event_id: 0,
            });
        client_id
    }

    /// Remove one client (peer disconnect). Drops the session bucket when
    /// it empties.
    pub fn remove(&self, session_key: &str, client_id: u64) {
        let mut clients = self.clients.lock();
        if let Some(list) = clients.get_mut(session_key) {
            list.retain(|c| c.client_id != client_id);
            if list.is_empty() {
                clients.remove(session_key);
            }
        }
    }

    /// Deliver a message to every client of a session. Clients whose sink
    /// refuses the frame are reaped immediately; iteration runs in reverse
    /// so removal does not shift pending indices. Returns the number of
    /// clients that accepted the frame.
    pub fn send_to_session(&self, session_key: &str, data: &str) -> usize {
        let event_id = self.next_event_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut clients = self.clients.lock();
        let Some(list) = clients.get_mut(session_key) else {
            return 0;
        };

        let mut delivered = 0;
        for idx in (0..list.len()).rev() {
            let event = SseEvent {
                id: event_id,
                data: data.to_string(),
            };
            match list[idx].sender.try_send(event) {
                Ok(()) => {
                    list[idx].last_event_id = event_id;
                    delivered += 1;
                }
                Err(_) => {
                    // Zombie: the peer is gone or hopelessly backed up.
                    list.remove(idx);
                }
            }
        }
        if list.is_empty() {
            clients.remove(session_key);
        }
        delivered
    }

    /// Close every client for one session (session reaped or deleted).
    pub fn close_session(&self, session_key: &str) {
        if let Some(list) = self.clients.lock().remove(session_key) {
            debug!(
                session = %session_key,
                clients = list.len(),
                "Closing SSE clients for session"
            );
            // Dropping the senders ends the streams.
            drop(list);
        }
    }

    /// Close every client (shutdown).
    pub fn close_all(&self) {
        self.clients.lock().clear();
    }

    /// Total connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.lock().values().map(Vec::len).sum()
    }

    /// Seconds the oldest client of a session has been connected, if any.
    pub fn oldest_client_age(&self, session_key: &str) -> Option<Duration> {
        self.clients
            .lock()
            .get(session_key)?
            .iter()
            .map(|c| c.created_at.elapsed())
            .max()
    }
}
