//! Reading upstream archives.
//!
//! An upstream archive is a zip file whose members are gzip-compressed files of
//! newline-delimited JSON objects, one vehicle per line. [`ArchiveDecoder`] exposes the lines of
//! every `*.json.gz` member, in member name order, as a lazy single-pass sequence of
//! [`RawRecord`]s.

use chrono::{Days, NaiveDate};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Seek};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

use crate::bail;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::types::RawRecord;

/// Suffix of archive members that carry records.
const RECORD_MEMBER_SUFFIX: &str = ".json.gz";

type MemberLines = std::io::Lines<BufReader<GzDecoder<Cursor<Vec<u8>>>>>;

/// Decoder over a single upstream archive.
pub struct ArchiveDecoder<R> {
    archive: ZipArchive<R>,
    members: Vec<String>,
}

impl ArchiveDecoder<BufReader<File>> {
    /// Opens the archive stored at `path`.
    pub fn open(path: impl AsRef<Path>) -> EtlResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            etl_error!(
                ErrorKind::DecodeError,
                "Archive could not be opened",
                format!("{}: {err}", path.display()),
                source: err
            )
        })?;

        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read + Seek> ArchiveDecoder<R> {
    /// Reads the archive directory from `reader`.
    ///
    /// Fails with [`ErrorKind::DecodeError`] when the reader does not hold a zip archive or the
    /// archive has no record members.
    pub fn from_reader(reader: R) -> EtlResult<Self> {
        let archive = ZipArchive::new(reader)?;

        let mut members: Vec<String> = archive
            .file_names()
            .filter(|name| name.ends_with(RECORD_MEMBER_SUFFIX))
            .map(str::to_owned)
            .collect();
        members.sort();

        if members.is_empty() {
            bail!(
                ErrorKind::DecodeError,
                "Archive has no record members",
                format!("expected at least one '*{RECORD_MEMBER_SUFFIX}' member")
            );
        }

        debug!(members = members.len(), "opened upstream archive");

        Ok(Self { archive, members })
    }

    /// Names of the members that will be decoded, in decoding order.
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Turns the decoder into a sequence of records.
    pub fn records(self) -> ArchiveRecords<R> {
        ArchiveRecords {
            archive: self.archive,
            pending: self.members.into_iter().rev().collect(),
            current: None,
            yielded: 0,
            finished: false,
        }
    }
}

/// Lazy sequence of the records of one archive.
///
/// Yields an error and then ends as soon as a member cannot be read, a line is not a JSON
/// object, or the archive turns out to contain no records at all.
pub struct ArchiveRecords<R> {
    archive: ZipArchive<R>,
    /// Remaining member names, last to visit first.
    pending: Vec<String>,
    current: Option<(String, usize, MemberLines)>,
    yielded: u64,
    finished: bool,
}

impl<R: Read + Seek> ArchiveRecords<R> {
    fn open_member(&mut self, name: &str) -> EtlResult<MemberLines> {
        let mut member = self.archive.by_name(name)?;
        let mut compressed = Vec::with_capacity(member.size() as usize);
        member.read_to_end(&mut compressed).map_err(|err| {
            etl_error!(
                ErrorKind::DecodeError,
                "Archive member could not be read",
                format!("{name}: {err}"),
                source: err
            )
        })?;

        Ok(BufReader::new(GzDecoder::new(Cursor::new(compressed))).lines())
    }

    fn next_record(&mut self) -> EtlResult<Option<RawRecord>> {
        loop {
            if let Some((name, line_number, lines)) = self.current.as_mut() {
                match lines.next() {
                    Some(Ok(line)) => {
                        *line_number += 1;
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        return parse_line(line)
                            .map(Some)
                            .map_err(|err| with_position(err, name, *line_number));
                    }
                    Some(Err(err)) => {
                        bail!(
                            ErrorKind::DecodeError,
                            "Archive member is not valid gzip-compressed text",
                            format!("{name}: {err}"),
                            source: err
                        );
                    }
                    None => {
                        self.current = None;
                    }
                }
            }

            let Some(name) = self.pending.pop() else {
                return Ok(None);
            };
            let lines = self.open_member(&name)?;
            self.current = Some((name, 0, lines));
        }
    }
}

impl<R: Read + Seek> Iterator for ArchiveRecords<R> {
    type Item = EtlResult<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.next_record() {
            Ok(Some(record)) => {
                self.yielded += 1;
                Some(Ok(record))
            }
            Ok(None) => {
                self.finished = true;
                if self.yielded == 0 {
                    return Some(Err(etl_error!(
                        ErrorKind::DecodeError,
                        "Archive contains no records"
                    )));
                }

                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

fn parse_line(line: &str) -> EtlResult<RawRecord> {
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(serde_json::Value::Object(record)) => Ok(record),
        Ok(_) => Err(etl_error!(
            ErrorKind::DecodeError,
            "Record line is not a JSON object"
        )),
        Err(err) => Err(EtlError::from(err).into_stage(
            ErrorKind::DecodeError,
            "Record line is not valid JSON",
        )),
    }
}

fn with_position(err: EtlError, member: &str, line_number: usize) -> EtlError {
    etl_error!(
        ErrorKind::DecodeError,
        "Archive member contains an invalid record",
        format!(
            "{member}, line {line_number}: {}",
            err.detail().unwrap_or(err.description())
        ),
        source: err
    )
}

/// Returns the day an archive's records describe.
///
/// Archive names end in the download date, as in `delta-light-vehicle_02-02-2026.zip`, and the
/// extract published on a given day covers the day before. Names without a trailing
/// `DD-MM-YYYY` date yield [`None`].
pub fn source_date_from_archive_name(path: impl AsRef<Path>) -> Option<NaiveDate> {
    let stem = path.as_ref().file_stem()?.to_str()?;
    let suffix = stem.get(stem.len().checked_sub(10)?..)?;
    let download_date = NaiveDate::parse_from_str(suffix, "%d-%m-%Y").ok()?;

    download_date.checked_sub_days(Days::new(1))
}
