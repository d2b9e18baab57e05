#![allow(dead_code)]

use chrono::NaiveDate;
use flate2::Compression;
use flate2::write::GzEncoder;
use motwot_etl::error::{ErrorKind, EtlResult};
use motwot_etl::etl_error;
use motwot_etl::source::UpstreamSource;
use motwot_etl::table::memory::{MemoryBulkLoad, MemoryMergeTransaction, MemoryTable};
use motwot_etl::table::{AuthoritativeTable, MergeTransaction};
use motwot_etl::types::{ChangeRecord, RegistrationKey};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use zip::write::SimpleFileOptions;

pub fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

pub fn key(registration: &str) -> RegistrationKey {
    RegistrationKey::parse(registration).unwrap()
}

/// Upstream line for a vehicle without test history.
pub fn vehicle(registration: &str, modification: &str, make: Option<&str>) -> Value {
    json!({
        "registration": registration,
        "make": make,
        "modification": modification,
        "motTests": []
    })
}

pub fn ndjson(records: &[Value]) -> String {
    records
        .iter()
        .map(|record| record.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// Writes a zip archive named `name` into `dir` whose members are gzip-compressed `contents`.
pub fn write_archive(dir: &Path, name: &str, members: &[(&str, String)]) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);

    let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
    for (member, contents) in members {
        writer
            .start_file(*member, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&gzip(contents)).unwrap();
    }
    writer.finish().unwrap();

    path
}

/// Writes a delta archive holding `records` in a single member.
pub fn write_delta(dir: &Path, name: &str, records: &[Value]) -> PathBuf {
    write_archive(dir, name, &[("delta-part-1.json.gz", ndjson(records))])
}

/// Names of the entries of `dir`, sorted.
pub fn entries(dir: &Path) -> Vec<String> {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = read_dir
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Source that always fails as if the upstream service were down.
#[derive(Debug, Clone, Default)]
pub struct UnreachableSource;

impl UpstreamSource for UnreachableSource {
    fn name() -> &'static str {
        "unreachable"
    }

    async fn latest_delta(&self) -> EtlResult<Option<PathBuf>> {
        Err(etl_error!(
            ErrorKind::AuthenticationError,
            "Token request was rejected"
        ))
    }

    async fn bulk_archives(&self) -> EtlResult<Vec<PathBuf>> {
        Err(etl_error!(
            ErrorKind::AuthenticationError,
            "Token request was rejected"
        ))
    }
}

/// Wraps a [`MemoryTable`] and fails the n-th row operation of every merge transaction.
#[derive(Debug, Clone)]
pub struct FaultInjectingTable {
    inner: MemoryTable,
    fail_on_operation: usize,
    rollbacks: Arc<AtomicUsize>,
}

impl FaultInjectingTable {
    /// Fails the operation with the given 1-based position.
    pub fn wrap(inner: MemoryTable, fail_on_operation: usize) -> Self {
        Self {
            inner,
            fail_on_operation,
            rollbacks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn inner(&self) -> &MemoryTable {
        &self.inner
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

impl AuthoritativeTable for FaultInjectingTable {
    type Transaction = FaultInjectingTransaction;
    type Load = MemoryBulkLoad;

    fn name() -> &'static str {
        "fault_injecting"
    }

    async fn begin_replace(&self) -> EtlResult<MemoryBulkLoad> {
        self.inner.begin_replace().await
    }

    async fn begin_merge(&self) -> EtlResult<FaultInjectingTransaction> {
        Ok(FaultInjectingTransaction {
            inner: self.inner.begin_merge().await?,
            operations: 0,
            fail_on_operation: self.fail_on_operation,
            rollbacks: self.rollbacks.clone(),
        })
    }
}

#[derive(Debug)]
pub struct FaultInjectingTransaction {
    inner: MemoryMergeTransaction,
    operations: usize,
    fail_on_operation: usize,
    rollbacks: Arc<AtomicUsize>,
}

impl FaultInjectingTransaction {
    fn next_operation(&mut self) -> EtlResult<()> {
        self.operations += 1;
        if self.operations == self.fail_on_operation {
            return Err(etl_error!(
                ErrorKind::DestinationQueryFailed,
                "Injected table failure",
                format!("operation {}", self.operations)
            ));
        }

        Ok(())
    }
}

impl MergeTransaction for FaultInjectingTransaction {
    async fn matched_keys(
        &mut self,
        keys: &[RegistrationKey],
    ) -> EtlResult<HashSet<RegistrationKey>> {
        self.inner.matched_keys(keys).await
    }

    async fn upsert(&mut self, record: ChangeRecord) -> EtlResult<()> {
        self.next_operation()?;
        self.inner.upsert(record).await
    }

    async fn delete(&mut self, key: RegistrationKey) -> EtlResult<()> {
        self.next_operation()?;
        self.inner.delete(key).await
    }

    async fn commit(self) -> EtlResult<()> {
        self.inner.commit().await
    }

    async fn rollback(self) -> EtlResult<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback().await
    }
}
