//! Persistent settings store.
//!
//! Holds the four named KV entries — `local_key_pair`, `shared_key`,
//! `shared_key_pending`, `user_preferences` — behind a thread-safe facade
//! that serializes writes through a mutex-guarded SQLite connection while
//! serving reads from an in-memory `RwLock` snapshot, so readers never
//! block on disk I/O.

use std::path::Path;
use std::sync::{Mutex, RwLock};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as JsonValue;

use crate::crypto::{LocalKeyPair, SharedSecret, SHARED_SECRET_LEN};
use crate::db::DatabaseError;

/// In-memory snapshot of persisted settings, cheap to clone for lock-free
/// reads (secret material is reference-counted, not copied).
#[derive(Clone)]
pub struct SettingsSnapshot {
    pub local_private_key: Option<[u8; 32]>,
    pub shared_key: Option<[u8; SHARED_SECRET_LEN]>,
    pub shared_key_pending: bool,
    pub user_preferences: JsonValue,
}

impl SettingsSnapshot {
    pub fn local_key_pair(&self) -> Option<LocalKeyPair> {
        self.local_private_key.and_then(|bytes| LocalKeyPair::from_private_bytes(&bytes).ok())
    }

    pub fn shared_secret(&self) -> Option<SharedSecret> {
        self.shared_key.map(SharedSecret)
    }
}

pub struct SettingsStore {
    conn: Mutex<Connection>,
    cache: RwLock<SettingsSnapshot>,
}

impl SettingsStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = crate::db::open_database(path)?;
        let cache = load_snapshot(&conn)?;
        Ok(Self { conn: Mutex::new(conn), cache: RwLock::new(cache) })
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = crate::db::open_memory_database()?;
        let cache = load_snapshot(&conn)?;
        Ok(Self { conn: Mutex::new(conn), cache: RwLock::new(cache) })
    }

    /// Lock-free read of the current settings.
    pub fn read(&self) -> SettingsSnapshot {
        self.cache.read().expect("settings cache lock poisoned").clone()
    }

    /// Generate a local key pair if none is persisted yet, returning it.
    pub fn local_key_pair_or_generate(&self) -> LocalKeyPair {
        if let Some(kp) = self.read().local_key_pair() {
            return kp;
        }
        let kp = crate::crypto::generate_ecdh_keypair();
        let bytes = kp.private_key_bytes();
        self.write(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES ('local_key_pair', ?1)",
                params![bytes.to_vec()],
            )?;
            Ok(())
        })
        .expect("persisting a freshly generated key pair cannot fail under normal disk I/O");
        {
            let mut cache = self.cache.write().expect("settings cache lock poisoned");
            cache.local_private_key = Some(bytes);
        }
        kp
    }

    /// Store a freshly-derived pending shared key.
    pub fn set_pending_shared_key(&self, key: &SharedSecret) -> Result<(), DatabaseError> {
        self.write(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES ('shared_key', ?1)",
                params![key.0.to_vec()],
            )?;
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES ('shared_key_pending', ?1)",
                params![vec![1u8]],
            )?;
            Ok(())
        })?;
        let mut cache = self.cache.write().expect("settings cache lock poisoned");
        cache.shared_key = Some(key.0);
        cache.shared_key_pending = true;
        Ok(())
    }

    /// Mark the persisted shared key authorized.
    pub fn confirm_shared_key(&self) -> Result<(), DatabaseError> {
        self.write(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES ('shared_key_pending', ?1)",
                params![vec![0u8]],
            )?;
            Ok(())
        })?;
        self.cache.write().expect("settings cache lock poisoned").shared_key_pending = false;
        Ok(())
    }

    /// Clear the shared key entirely:
    /// USER_CONFIRMATION_TIMEOUT clears the pending key immediately).
    pub fn clear_shared_key(&self) -> Result<(), DatabaseError> {
        self.write(|conn| {
            conn.execute("DELETE FROM settings WHERE key IN ('shared_key', 'shared_key_pending')", [])?;
            Ok(())
        })?;
        let mut cache = self.cache.write().expect("settings cache lock poisoned");
        cache.shared_key = None;
        cache.shared_key_pending = false;
        Ok(())
    }

    pub fn set_user_preferences(&self, value: JsonValue) -> Result<(), DatabaseError> {
        let bytes = serde_json::to_vec(&value).expect("JsonValue always serializes");
        self.write(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES ('user_preferences', ?1)",
                params![bytes],
            )?;
            Ok(())
        })?;
        self.cache.write().expect("settings cache lock poisoned").user_preferences = value;
        Ok(())
    }

    fn write<F>(&self, f: F) -> Result<(), DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<(), DatabaseError>,
    {
        let conn = self.conn.lock().expect("settings connection lock poisoned");
        f(&conn)
    }
}

fn load_snapshot(conn: &Connection) -> Result<SettingsSnapshot, DatabaseError> {
    let local_private_key = get_blob(conn, "local_key_pair")?
        .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok());
    let shared_key = get_blob(conn, "shared_key")?
        .and_then(|bytes| <[u8; SHARED_SECRET_LEN]>::try_from(bytes).ok());
    let shared_key_pending =
        get_blob(conn, "shared_key_pending")?.map(|b| b.first() == Some(&1)).unwrap_or(false);
    let user_preferences = get_blob(conn, "user_preferences")?
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_else(|| JsonValue::Object(Default::default()));

    Ok(SettingsSnapshot { local_private_key, shared_key, shared_key_pending, user_preferences })
}

fn get_blob(conn: &Connection, key: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
    conn.query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
        .optional()
        .map_err(DatabaseError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_has_no_shared_key() {
        let store = SettingsStore::open_in_memory().unwrap();
        let snap = store.read();
        assert!(snap.shared_key.is_none());
        assert!(!snap.shared_key_pending);
    }

    #[test]
    fn local_key_pair_is_generated_once_and_persisted() {
        let store = SettingsStore::open_in_memory().unwrap();
        let a = store.local_key_pair_or_generate();
        let b = store.local_key_pair_or_generate();
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn pending_then_confirm_clears_pending_flag() {
        let store = SettingsStore::open_in_memory().unwrap();
        let key = SharedSecret([9u8; SHARED_SECRET_LEN]);
        store.set_pending_shared_key(&key).unwrap();
        assert!(store.read().shared_key_pending);

        store.confirm_shared_key().unwrap();
        let snap = store.read();
        assert!(!snap.shared_key_pending);
        assert_eq!(snap.shared_key, Some([9u8; SHARED_SECRET_LEN]));
    }

    #[test]
    fn clear_shared_key_removes_both_entries() {
        let store = SettingsStore::open_in_memory().unwrap();
        store.set_pending_shared_key(&SharedSecret([1u8; SHARED_SECRET_LEN])).unwrap();
        store.clear_shared_key().unwrap();
        let snap = store.read();
        assert!(snap.shared_key.is_none());
        assert!(!snap.shared_key_pending);
    }

    #[test]
    fn user_preferences_round_trip() {
        let store = SettingsStore::open_in_memory().unwrap();
        let prefs = serde_json::json!({"capture_quality": "high"});
        store.set_user_preferences(prefs.clone()).unwrap();
        assert_eq!(store.read().user_preferences, prefs);
    }
}
