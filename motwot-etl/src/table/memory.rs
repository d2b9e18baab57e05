use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use crate::error::EtlResult;
use crate::table::{AuthoritativeTable, BulkLoad, MergeTransaction};
use crate::types::{ChangeRecord, RegistrationKey};

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<RegistrationKey, ChangeRecord>,
}

/// In-memory authoritative table.
///
/// Used by tests and for dry runs. Merge transactions and bulk loads hold the table lock until
/// they end and collect their rows separately, swapping them in on commit or finish.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table holding `records`, later records replacing earlier ones with the same key.
    pub fn with_rows(records: impl IntoIterator<Item = ChangeRecord>) -> Self {
        let rows = records
            .into_iter()
            .map(|record| (record.key().clone(), record))
            .collect();

        Self {
            inner: Arc::new(Mutex::new(Inner { rows })),
        }
    }

    /// Returns a copy of every row, ordered by key.
    pub async fn rows(&self) -> Vec<ChangeRecord> {
        let inner = self.inner.lock().await;
        inner.rows.values().cloned().collect()
    }

    pub async fn get(&self, key: &RegistrationKey) -> Option<ChangeRecord> {
        let inner = self.inner.lock().await;
        inner.rows.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl AuthoritativeTable for MemoryTable {
    type Transaction = MemoryMergeTransaction;
    type Load = MemoryBulkLoad;

    fn name() -> &'static str {
        "memory"
    }

    async fn begin_replace(&self) -> EtlResult<MemoryBulkLoad> {
        let guard = self.inner.clone().lock_owned().await;

        Ok(MemoryBulkLoad {
            guard,
            rows: BTreeMap::new(),
        })
    }

    async fn begin_merge(&self) -> EtlResult<MemoryMergeTransaction> {
        let guard = self.inner.clone().lock_owned().await;
        let working = guard.rows.clone();

        Ok(MemoryMergeTransaction { guard, working })
    }
}

/// Merge transaction of a [`MemoryTable`].
#[derive(Debug)]
pub struct MemoryMergeTransaction {
    guard: OwnedMutexGuard<Inner>,
    working: BTreeMap<RegistrationKey, ChangeRecord>,
}

impl MergeTransaction for MemoryMergeTransaction {
    async fn matched_keys(
        &mut self,
        keys: &[RegistrationKey],
    ) -> EtlResult<HashSet<RegistrationKey>> {
        Ok(keys
            .iter()
            .filter(|key| self.guard.rows.contains_key(*key))
            .cloned()
            .collect())
    }

    async fn upsert(&mut self, record: ChangeRecord) -> EtlResult<()> {
        self.working.insert(record.key().clone(), record);
        Ok(())
    }

    async fn delete(&mut self, key: RegistrationKey) -> EtlResult<()> {
        self.working.remove(&key);
        Ok(())
    }

    async fn commit(mut self) -> EtlResult<()> {
        info!(rows = self.working.len(), "committing memory table merge");

        std::mem::swap(&mut self.guard.rows, &mut self.working);
        Ok(())
    }

    async fn rollback(self) -> EtlResult<()> {
        info!("rolling back memory table merge");
        Ok(())
    }
}

/// Bulk load of a [`MemoryTable`].
#[derive(Debug)]
pub struct MemoryBulkLoad {
    guard: OwnedMutexGuard<Inner>,
    rows: BTreeMap<RegistrationKey, ChangeRecord>,
}

impl BulkLoad for MemoryBulkLoad {
    async fn append(&mut self, records: Vec<ChangeRecord>) -> EtlResult<()> {
        for record in records {
            self.rows.insert(record.key().clone(), record);
        }

        Ok(())
    }

    async fn finish(mut self) -> EtlResult<u64> {
        info!(rows = self.rows.len(), "replacing memory table content");

        std::mem::swap(&mut self.guard.rows, &mut self.rows);
        Ok(self.guard.rows.len() as u64)
    }

    async fn abort(self) -> EtlResult<()> {
        Ok(())
    }
}
