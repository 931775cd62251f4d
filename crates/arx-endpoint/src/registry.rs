//! Session registry — concurrent session tables.
//!
//! Two maps share the same records: by packed client key and by numeric
//! session id. Creation is serialized on a registry-wide lock so one key
//! never yields two records; id lookups stay lock-free. Records live for
//! the process lifetime.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;

use arx_core::crypto::{ClientPublicKey, PACKED_CLIENT_KEY_LEN};

use crate::session::Session;

/// A session record shared between both maps and in-flight requests.
/// The mutex serializes every request touching the record.
pub type SharedSession = Arc<Mutex<Session>>;

pub struct SessionRegistry {
    by_key: DashMap<[u8; PACKED_CLIENT_KEY_LEN], SharedSession>,
    by_id: DashMap<i64, SharedSession>,
    create_lock: Mutex<()>,
    /// Seeded from epoch seconds plus a random offset so ids rarely
    /// collide across restarts. A handle, not a security token.
    next_id: AtomicI64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let offset: i64 = rand::thread_rng().gen_range(0..0x7FFF_FFFF);
        Self {
            by_key: DashMap::new(),
            by_id: DashMap::new(),
            create_lock: Mutex::new(()),
            next_id: AtomicI64::new(epoch_secs + offset),
        }
    }

    /// Locate the record for `key`, creating it on first sight.
    pub async fn get_or_create(&self, key: &ClientPublicKey) -> SharedSession {
        let packed = key.packed();
        if let Some(existing) = self.by_key.get(&packed) {
            return existing.value().clone();
        }

        let _guard = self.create_lock.lock().await;
        if let Some(existing) = self.by_key.get(&packed) {
            return existing.value().clone();
        }

        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let session = Arc::new(Mutex::new(Session::new(key.clone(), session_id)));
        self.by_key.insert(packed, session.clone());
        self.by_id.insert(session_id, session.clone());
        tracing::info!(
            session_id,
            client = hex::encode(&packed[..8]),
            "session created"
        );
        session
    }

    /// Lock-free lookup by session id.
    pub fn get_by_id(&self, session_id: i64) -> Option<SharedSession> {
        self.by_id.get(&session_id).map(|entry| entry.value().clone())
    }

    /// Clear the session key for `key`, forcing the client back through
    /// `get_token`. No-op for unknown keys.
    pub async fn change_key_for(&self, key: &ClientPublicKey) {
        let session = self.by_key.get(&key.packed()).map(|entry| entry.value().clone());
        if let Some(session) = session {
            session.lock().await.drop_key();
            tracing::info!(client = hex::encode(&key.packed()[..8]), "session key cleared");
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
