//! Key registry implementations
//!
//! The registry answers "which keys are authoritative now" and applies
//! rotation atomically: a `SetKeys` alert deactivates every active key and
//! activates the five replacement keys in one transaction. Readers see
//! either the old set or the new set, never a mix.

use async_trait::async_trait;
use beacon_model::{KeyRegistry, KeyRegistryError, PubKey, KEY_SET_SIZE};
use redb::{Database, ReadableTable, TableDefinition};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// public_key (33 bytes) -> entry (active u8, created_at u64 LE,
/// deactivated_at u64 LE; zero means still active)
const PUBLIC_KEYS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("public_keys");

const ENTRY_LEN: usize = 17;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn validate_point(key: &PubKey) -> Result<(), KeyRegistryError> {
    k256::PublicKey::from_sec1_bytes(key.as_bytes())
        .map(|_| ())
        .map_err(|_| KeyRegistryError::InvalidKeyFormat)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyEntry {
    active: bool,
    created_at: u64,
    deactivated_at: u64,
}

impl KeyEntry {
    fn encode(&self) -> [u8; ENTRY_LEN] {
        let mut out = [0u8; ENTRY_LEN];
        out[0] = self.active as u8;
        out[1..9].copy_from_slice(&self.created_at.to_le_bytes());
        out[9..17].copy_from_slice(&self.deactivated_at.to_le_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, KeyRegistryError> {
        if bytes.len() != ENTRY_LEN {
            return Err(KeyRegistryError::Backend("corrupt key entry".into()));
        }
        Ok(Self {
            active: bytes[0] != 0,
            created_at: u64::from_le_bytes(bytes[1..9].try_into().expect("8 bytes")),
            deactivated_at: u64::from_le_bytes(bytes[9..17].try_into().expect("8 bytes")),
        })
    }
}

/// In-memory key registry, used by tests and the sync integration harness.
pub struct MemoryKeyRegistry {
    threshold: usize,
    inner: RwLock<Vec<(PubKey, KeyEntry)>>,
}

impl MemoryKeyRegistry {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            inner: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl KeyRegistry for MemoryKeyRegistry {
    async fn active_keys(&self) -> Result<Vec<PubKey>, KeyRegistryError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| KeyRegistryError::Backend("lock poisoned".into()))?;
        let mut keys: Vec<PubKey> = inner
            .iter()
            .filter(|(_, e)| e.active)
            .map(|(k, _)| *k)
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn threshold(&self) -> usize {
        self.threshold
    }

    async fn rotate(&self, new_keys: &[PubKey; KEY_SET_SIZE]) -> Result<(), KeyRegistryError> {
        for key in new_keys {
            validate_point(key)?;
        }
        let mut inner = self
            .inner
            .write()
            .map_err(|_| KeyRegistryError::Backend("lock poisoned".into()))?;
        if !inner.iter().any(|(_, e)| e.active) {
            return Err(KeyRegistryError::NotBootstrapped);
        }
        let now = now_secs();
        for (_, entry) in inner.iter_mut().filter(|(_, e)| e.active) {
            entry.active = false;
            entry.deactivated_at = now;
        }
        for key in new_keys {
            match inner.iter_mut().find(|(k, _)| k == key) {
                Some((_, entry)) => {
                    entry.active = true;
                    entry.deactivated_at = 0;
                }
                None => inner.push((
                    *key,
                    KeyEntry {
                        active: true,
                        created_at: now,
                        deactivated_at: 0,
                    },
                )),
            }
        }
        Ok(())
    }

    async fn bootstrap(&self, keys: &[PubKey]) -> Result<(), KeyRegistryError> {
        for key in keys {
            validate_point(key)?;
        }
        let mut inner = self
            .inner
            .write()
            .map_err(|_| KeyRegistryError::Backend("lock poisoned".into()))?;
        if !inner.is_empty() {
            return Err(KeyRegistryError::AlreadyBootstrapped);
        }
        let now = now_secs();
        inner.extend(keys.iter().map(|k| {
            (
                *k,
                KeyEntry {
                    active: true,
                    created_at: now,
                    deactivated_at: 0,
                },
            )
        }));
        Ok(())
    }
}

/// Durable key registry backed by the `public_keys` redb table.
pub struct RedbKeyRegistry {
    db: Arc<Database>,
    threshold: usize,
}

impl RedbKeyRegistry {
    pub fn new(db: Arc<Database>, threshold: usize) -> Result<Self, KeyRegistryError> {
        let txn = db.begin_write().map_err(backend)?;
        {
            let _ = txn.open_table(PUBLIC_KEYS_TABLE).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(Self { db, threshold })
    }

    /// True if no key rows exist yet (first start).
    pub fn is_empty(&self) -> Result<bool, KeyRegistryError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(PUBLIC_KEYS_TABLE).map_err(backend)?;
        let is_empty = table.iter().map_err(backend)?.next().is_none();
        Ok(is_empty)
    }
}

fn backend(err: impl std::fmt::Display) -> KeyRegistryError {
    KeyRegistryError::Backend(err.to_string())
}

#[async_trait]
impl KeyRegistry for RedbKeyRegistry {
    async fn active_keys(&self) -> Result<Vec<PubKey>, KeyRegistryError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(PUBLIC_KEYS_TABLE).map_err(backend)?;
        let mut keys = Vec::new();
        // Table iteration is ascending by key bytes, which is the stable
        // ordering active_keys promises.
        for row in table.iter().map_err(backend)? {
            let (key, value) = row.map_err(backend)?;
            let entry = KeyEntry::decode(value.value())?;
            if entry.active {
                let pubkey = PubKey::try_from(key.value())
                    .map_err(|_| KeyRegistryError::Backend("corrupt key row".into()))?;
                keys.push(pubkey);
            }
        }
        Ok(keys)
    }

    fn threshold(&self) -> usize {
        self.threshold
    }

    async fn rotate(&self, new_keys: &[PubKey; KEY_SET_SIZE]) -> Result<(), KeyRegistryError> {
        for key in new_keys {
            validate_point(key)?;
        }
        let now = now_secs();
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(PUBLIC_KEYS_TABLE).map_err(backend)?;

            let mut existing: Vec<(Vec<u8>, KeyEntry)> = Vec::new();
            for row in table.iter().map_err(backend)? {
                let (key, value) = row.map_err(backend)?;
                existing.push((key.value().to_vec(), KeyEntry::decode(value.value())?));
            }
            if !existing.iter().any(|(_, e)| e.active) {
                return Err(KeyRegistryError::NotBootstrapped);
            }

            for (key, entry) in existing.iter_mut().filter(|(_, e)| e.active) {
                entry.active = false;
                entry.deactivated_at = now;
                table
                    .insert(key.as_slice(), entry.encode().as_slice())
                    .map_err(backend)?;
            }
            for key in new_keys {
                let created_at = existing
                    .iter()
                    .find(|(k, _)| k.as_slice() == key.as_ref())
                    .map(|(_, e)| e.created_at)
                    .unwrap_or(now);
                let entry = KeyEntry {
                    active: true,
                    created_at,
                    deactivated_at: 0,
                };
                table
                    .insert(key.as_bytes().as_slice(), entry.encode().as_slice())
                    .map_err(backend)?;
            }
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }

    async fn bootstrap(&self, keys: &[PubKey]) -> Result<(), KeyRegistryError> {
        for key in keys {
            validate_point(key)?;
        }
        let now = now_secs();
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(PUBLIC_KEYS_TABLE).map_err(backend)?;
            let occupied = table.iter().map_err(backend)?.next().is_some();
            if occupied {
                return Err(KeyRegistryError::AlreadyBootstrapped);
            }
            let entry = KeyEntry {
                active: true,
                created_at: now,
                deactivated_at: 0,
            };
            for key in keys {
                table
                    .insert(key.as_bytes().as_slice(), entry.encode().as_slice())
                    .map_err(backend)?;
            }
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }
}
