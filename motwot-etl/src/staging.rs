//! Staged batches.
//!
//! Normalized records are written to a newline-delimited JSON artifact before anything touches
//! the authoritative table. An artifact is written to a temporary file next to its final path
//! and renamed into place once complete, so it either exists in full or not at all.

use chrono::NaiveDate;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::types::ChangeRecord;

/// Extension of staged artifacts.
const ARTIFACT_EXTENSION: &str = "ndjson";

/// What a staged batch was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchKind {
    /// A daily delta extract, merged into the table.
    Delta,
    /// A full snapshot, loaded into an empty table.
    Bulk,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Delta => "delta",
            BatchKind::Bulk => "bulk",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes staged batches into a directory.
#[derive(Debug, Clone)]
pub struct StagingWriter {
    dir: PathBuf,
    buffer_bytes: usize,
}

impl StagingWriter {
    /// Buffer size used unless configured otherwise.
    pub const DEFAULT_BUFFER_BYTES: usize = 1024 * 1024;

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            buffer_bytes: Self::DEFAULT_BUFFER_BYTES,
        }
    }

    pub fn with_buffer_bytes(mut self, buffer_bytes: usize) -> Self {
        self.buffer_bytes = buffer_bytes.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the artifact for a run, which is `{kind}_{run_date}.ndjson`.
    pub fn artifact_path(&self, kind: BatchKind, run_date: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "{kind}_{}.{ARTIFACT_EXTENSION}",
            run_date.format("%Y-%m-%d")
        ))
    }

    /// Starts writing the artifact of a run.
    ///
    /// An artifact left by an earlier attempt of the same run is replaced once the new one is
    /// finished.
    pub fn begin(&self, kind: BatchKind, run_date: NaiveDate) -> EtlResult<BatchWriter> {
        fs::create_dir_all(&self.dir).map_err(staging_error)?;
        let file = NamedTempFile::new_in(&self.dir).map_err(staging_error)?;

        Ok(BatchWriter {
            out: BufWriter::with_capacity(self.buffer_bytes, file),
            path: self.artifact_path(kind, run_date),
            kind,
            run_date,
            record_count: 0,
        })
    }

    /// Stages every record of `records` in order.
    ///
    /// The first error in `records` aborts staging and is returned unchanged. Nothing is left
    /// in the staging directory in that case.
    pub fn write<I>(
        &self,
        kind: BatchKind,
        run_date: NaiveDate,
        records: I,
    ) -> EtlResult<StagedBatch>
    where
        I: IntoIterator<Item = EtlResult<ChangeRecord>>,
    {
        let mut writer = self.begin(kind, run_date)?;
        for record in records {
            writer.append(&record?)?;
        }

        writer.finish()
    }
}

/// An artifact being written.
///
/// Dropping the writer without calling [`BatchWriter::finish`] discards everything appended.
pub struct BatchWriter {
    out: BufWriter<NamedTempFile>,
    path: PathBuf,
    kind: BatchKind,
    run_date: NaiveDate,
    record_count: u64,
}

impl BatchWriter {
    /// Appends one record as a single JSON line.
    pub fn append(&mut self, record: &ChangeRecord) -> EtlResult<()> {
        serde_json::to_writer(&mut self.out, record).map_err(|err| {
            EtlError::from(err).into_stage(ErrorKind::StagingFailed, "Record could not be staged")
        })?;
        self.out.write_all(b"\n").map_err(staging_error)?;
        self.record_count += 1;

        Ok(())
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Flushes the artifact to disk and moves it to its final path.
    pub fn finish(self) -> EtlResult<StagedBatch> {
        let file = self
            .out
            .into_inner()
            .map_err(|err| staging_error(err.into_error()))?;
        file.as_file().sync_all().map_err(staging_error)?;
        file.persist(&self.path).map_err(|err| staging_error(err.error))?;

        info!(
            path = %self.path.display(),
            kind = %self.kind,
            records = self.record_count,
            "staged batch written"
        );

        Ok(StagedBatch {
            path: self.path,
            kind: self.kind,
            run_date: self.run_date,
            record_count: self.record_count,
        })
    }
}

/// Handle to a complete staged artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBatch {
    path: PathBuf,
    kind: BatchKind,
    run_date: NaiveDate,
    record_count: u64,
}

impl StagedBatch {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn run_date(&self) -> NaiveDate {
        self.run_date
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Re-reads the staged records in the order they were written.
    pub fn records(&self) -> EtlResult<StagedRecords> {
        let file = File::open(&self.path).map_err(staging_error)?;

        Ok(StagedRecords {
            lines: BufReader::new(file).lines(),
        })
    }

    /// Reads every staged record into memory.
    pub fn read_all(&self) -> EtlResult<Vec<ChangeRecord>> {
        self.records()?.collect()
    }

    /// Removes the artifact.
    pub fn discard(self) -> EtlResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "staged batch discarded");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(staging_error(err)),
        }
    }
}

/// Records of a staged artifact.
pub struct StagedRecords {
    lines: io::Lines<BufReader<File>>,
}

impl Iterator for StagedRecords {
    type Item = EtlResult<ChangeRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(staging_error(err))),
            };
            if line.is_empty() {
                continue;
            }

            return Some(serde_json::from_str(&line).map_err(EtlError::from));
        }
    }
}

#[track_caller]
fn staging_error(err: io::Error) -> EtlError {
    etl_error!(
        ErrorKind::StagingFailed,
        "Staged batch could not be written or read",
        err.to_string(),
        source: err
    )
}
