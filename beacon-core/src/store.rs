//! Alert store implementations
//!
//! The store is an append-mostly log keyed by sequence number. The value
//! kept on disk is the processed flag followed by the raw envelope bytes;
//! every derived field (type, hash, parsed view) is recomputed from the
//! raw form, which stays authoritative.

use async_trait::async_trait;
use beacon_model::{AlertRecord, AlertStore, StoreError, HEADER_LEN};
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// sequence_number -> (processed u8 || raw envelope bytes)
const ALERTS_TABLE: TableDefinition<u32, &[u8]> = TableDefinition::new("alert_messages");

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn encode_record(record: &AlertRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + record.raw.len());
    out.push(record.processed as u8);
    out.extend_from_slice(&record.raw);
    out
}

fn decode_record(value: &[u8]) -> Result<AlertRecord, StoreError> {
    if value.len() < 1 + HEADER_LEN {
        return Err(StoreError::Backend("corrupt alert record".into()));
    }
    Ok(AlertRecord::from_raw(value[1..].to_vec(), value[0] != 0))
}

/// In-memory alert store, used by tests and the sync integration harness.
#[derive(Default)]
pub struct MemoryAlertStore {
    inner: RwLock<BTreeMap<u32, AlertRecord>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn get(&self, sequence_number: u32) -> Result<Option<AlertRecord>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        Ok(inner.get(&sequence_number).cloned())
    }

    async fn latest(&self) -> Result<Option<AlertRecord>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        Ok(inner.values().next_back().cloned())
    }

    async fn insert_if_absent(&self, record: AlertRecord) -> Result<AlertRecord, StoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        match inner.get(&record.sequence_number) {
            Some(existing) if existing.raw == record.raw => Ok(existing.clone()),
            Some(_) => Err(StoreError::Conflict(record.sequence_number)),
            None => {
                inner.insert(record.sequence_number, record.clone());
                Ok(record)
            }
        }
    }

    async fn unprocessed(&self) -> Result<Vec<AlertRecord>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        Ok(inner.values().filter(|r| !r.processed).cloned().collect())
    }

    async fn mark_processed(&self, sequence_number: u32) -> Result<(), StoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".into()))?;
        let record = inner
            .get_mut(&sequence_number)
            .ok_or(StoreError::NotFound(sequence_number))?;
        record.processed = true;
        Ok(())
    }
}

/// Durable alert store backed by the `alert_messages` redb table.
pub struct RedbAlertStore {
    db: Arc<Database>,
}

impl RedbAlertStore {
    pub fn new(db: Arc<Database>) -> Result<Self, StoreError> {
        let txn = db.begin_write().map_err(backend)?;
        {
            let _ = txn.open_table(ALERTS_TABLE).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(Self { db })
    }
}

#[async_trait]
impl AlertStore for RedbAlertStore {
    async fn get(&self, sequence_number: u32) -> Result<Option<AlertRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(ALERTS_TABLE).map_err(backend)?;
        match table.get(sequence_number).map_err(backend)? {
            Some(value) => Ok(Some(decode_record(value.value())?)),
            None => Ok(None),
        }
    }

    async fn latest(&self) -> Result<Option<AlertRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(ALERTS_TABLE).map_err(backend)?;
        let result = match table.last().map_err(backend)? {
            Some((_, value)) => Some(decode_record(value.value())?),
            None => None,
        };
        Ok(result)
    }

    async fn insert_if_absent(&self, record: AlertRecord) -> Result<AlertRecord, StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        let stored = {
            let mut table = txn.open_table(ALERTS_TABLE).map_err(backend)?;
            let existing = table
                .get(record.sequence_number)
                .map_err(backend)?
                .map(|value| decode_record(value.value()))
                .transpose()?;
            match existing {
                Some(existing) if existing.raw == record.raw => existing,
                Some(_) => return Err(StoreError::Conflict(record.sequence_number)),
                None => {
                    table
                        .insert(record.sequence_number, encode_record(&record).as_slice())
                        .map_err(backend)?;
                    record
                }
            }
        };
        txn.commit().map_err(backend)?;
        Ok(stored)
    }

    async fn unprocessed(&self) -> Result<Vec<AlertRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(ALERTS_TABLE).map_err(backend)?;
        let mut records = Vec::new();
        for row in table.iter().map_err(backend)? {
            let (_, value) = row.map_err(backend)?;
            let record = decode_record(value.value())?;
            if !record.processed {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn mark_processed(&self, sequence_number: u32) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(ALERTS_TABLE).map_err(backend)?;
            let mut record = match table.get(sequence_number).map_err(backend)? {
                Some(value) => decode_record(value.value())?,
                None => return Err(StoreError::NotFound(sequence_number)),
            };
            record.processed = true;
            table
                .insert(sequence_number, encode_record(&record).as_slice())
                .map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_model::{Alert, Payload};

    fn record(seq: u32, message: &[u8]) -> AlertRecord {
        let mut alert = Alert::unsigned(
            seq,
            1_700_000_000,
            Payload::Informational { message: message.to_vec() },
        );
        alert.signatures = vec![vec![0u8; 65]; 3];
        AlertRecord::new(&alert)
    }

    async fn exercise_store(store: &dyn AlertStore) {
        assert!(store.latest().await.unwrap().is_none());
        assert!(store.get(1).await.unwrap().is_none());

        let first = store.insert_if_absent(record(1, b"one")).await.unwrap();
        store.insert_if_absent(record(2, b"two")).await.unwrap();
        store.insert_if_absent(record(3, b"three")).await.unwrap();

        // Re-inserting identical bytes is a no-op returning the stored row.
        let again = store.insert_if_absent(record(1, b"one")).await.unwrap();
        assert_eq!(again, first);

        // Same sequence, different bytes.
        assert!(matches!(
            store.insert_if_absent(record(1, b"not one")).await,
            Err(StoreError::Conflict(1))
        ));

        assert_eq!(store.latest().await.unwrap().unwrap().sequence_number, 3);
        assert_eq!(store.get(2).await.unwrap().unwrap().raw, record(2, b"two").raw);

        assert_eq!(store.unprocessed().await.unwrap().len(), 3);
        store.mark_processed(1).await.unwrap();
        store.mark_processed(2).await.unwrap();

        let pending: Vec<u32> = store
            .unprocessed()
            .await
            .unwrap()
            .iter()
            .map(|r| r.sequence_number)
            .collect();
        assert_eq!(pending, vec![3]);

        assert!(matches!(
            store.mark_processed(99).await,
            Err(StoreError::NotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise_store(&MemoryAlertStore::new()).await;
    }

    #[tokio::test]
    async fn test_redb_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::create(dir.path().join("alerts.redb")).unwrap());
        exercise_store(&RedbAlertStore::new(db).unwrap()).await;
    }

    #[tokio::test]
    async fn test_redb_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.redb");
        {
            let db = Arc::new(Database::create(&path).unwrap());
            let store = RedbAlertStore::new(db).unwrap();
            store.insert_if_absent(record(1, b"one")).await.unwrap();
            store.mark_processed(1).await.unwrap();
        }
        let db = Arc::new(Database::create(&path).unwrap());
        let store = RedbAlertStore::new(db).unwrap();
        let stored = store.get(1).await.unwrap().unwrap();
        assert!(stored.processed);
        assert_eq!(stored.raw, record(1, b"one").raw);
    }
}
