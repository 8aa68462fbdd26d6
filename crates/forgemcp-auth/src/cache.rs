//! Bounded, TTL-capped token verification cache.
//!
//! Verifying a JWT on every call means a JWKS round-trip and a signature
//! check on the hot path; the cache is what makes per-call auth feasible.
//! Entries are keyed by the SHA-256 of the token — the raw token is never
//! stored — and evicted FIFO by insertion order once the cache is full.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::types::AuthInfo;

/// Maximum number of cached verifications.
pub const MAX_SIZE: usize = 1000;

/// Upper bound on any entry's lifetime, regardless of token expiry.
pub const DEFAULT_TTL: Duration = Duration::from_millis(300_000);

#[derive(Debug)]
struct CacheEntry {
    info: AuthInfo,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    // Insertion order for FIFO eviction
    order: VecDeque<String>,
}

/// Token verification cache.
#[derive(Debug)]
pub struct TokenCache {
    inner: Mutex<CacheInner>,
    max_size: usize,
    default_ttl: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(MAX_SIZE, DEFAULT_TTL)
    }
}

impl TokenCache {
    /// Create a cache with explicit bounds.
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_size,
            default_ttl,
        }
    }

    /// SHA-256 of the token, lowercase hex. The cache key; the raw token
    /// never touches the map.
    fn key(token: &str) -> String {
        let digest = Sha256::digest(token.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Look up a non-expired entry for the token. Expired entries are
    /// removed on the way out.
    pub fn get(&self, token: &str) -> Option<AuthInfo> {
        let key = Self::key(token);
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Some(entry.info.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(&key);
            inner.order.retain(|k| k != &key);
        }
        None
    }

    /// Insert a verification result.
    ///
    /// The entry TTL is the smaller of the token's remaining lifetime and
    /// [`DEFAULT_TTL`]; entries with no positive lifetime are not cached.
    /// When full, the oldest insertion is evicted first.
    pub fn insert(&self, token: &str, info: AuthInfo) {
        let ttl = match info.expires_at {
            Some(exp) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                if exp <= now {
                    return;
                }
                Duration::from_secs(exp - now).min(self.default_ttl)
            }
            None => self.default_ttl,
        };
        if ttl.is_zero() {
            return;
        }

        let key = Self::key(token);
        let mut inner = self.inner.lock();
        // Size check and eviction happen under the same lock as insertion
        while inner.entries.len() >= self.max_size {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
        if inner.entries.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        }
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                info,
                expires_at: Instant::now() + ttl,
            },
        );
        inner.order.push_back(key);
    }

    /// Number of live entries (expired entries may still be counted until
    /// touched).
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}
