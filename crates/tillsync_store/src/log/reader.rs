//! Sequential log reader used for replay, inspection and compaction.

use super::record::{
    compute_crc32, LogRecord, LogRecordType, CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION,
};
use crate::error::{StoreError, StoreResult};
use tillsync_storage::StorageBackend;

/// Iterator over `(offset, record)` pairs of a log.
///
/// A record whose header or body runs past the end of the log is a torn
/// write from an interrupted append and ends iteration cleanly. Bad magic,
/// an unknown version or type, a checksum mismatch or an undecodable body
/// yields an error, after which the iterator is exhausted.
pub struct LogReader<'a> {
    backend: &'a dyn StorageBackend,
    total_size: u64,
    offset: u64,
    finished: bool,
}

impl<'a> LogReader<'a> {
    /// Creates a reader starting at the beginning of `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn new(backend: &'a dyn StorageBackend) -> StoreResult<Self> {
        Self::starting_at(backend, 0)
    }

    /// Creates a reader starting at `offset`, which must be a frame start.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn starting_at(backend: &'a dyn StorageBackend, offset: u64) -> StoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            total_size,
            backend,
            offset: offset.min(total_size),
            finished: false,
        })
    }

    /// Offset just past the last record returned successfully.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_next(&mut self) -> StoreResult<Option<(u64, LogRecord)>> {
        let start = self.offset;
        let remaining = self.total_size - start;
        if remaining < HEADER_SIZE as u64 {
            return Ok(None);
        }

        let header = self.backend.read_at(start, HEADER_SIZE)?;
        if header[0..4] != LOG_MAGIC {
            return Err(StoreError::corruption(start, "invalid magic"));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != LOG_VERSION {
            return Err(StoreError::corruption(
                start,
                format!("unsupported record version {version}"),
            ));
        }

        let record_type = LogRecordType::from_byte(header[6]).ok_or_else(|| {
            StoreError::corruption(start, format!("unknown record type {}", header[6]))
        })?;

        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let framed_len = (HEADER_SIZE + len + CRC_SIZE) as u64;
        if remaining < framed_len {
            return Ok(None);
        }

        let rest = self.backend.read_at(start + HEADER_SIZE as u64, len + CRC_SIZE)?;
        let (body, crc_bytes) = rest.split_at(len);

        let mut covered = header;
        covered.extend_from_slice(body);
        let actual = compute_crc32(&covered);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if actual != expected {
            return Err(StoreError::ChecksumMismatch {
                offset: start,
                expected,
                actual,
            });
        }

        let record = LogRecord::decode_body(record_type, body).map_err(|e| {
            StoreError::corruption(start, format!("undecodable {record_type:?} body: {e}"))
        })?;

        self.offset = start + framed_len;
        Ok(Some((start, record)))
    }
}

impl Iterator for LogReader<'_> {
    type Item = StoreResult<(u64, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Everything recoverable from a log.
#[derive(Debug)]
pub struct LogScan {
    /// Intact records in log order, with their offsets.
    pub records: Vec<(u64, LogRecord)>,
    /// Length of the intact prefix of the log.
    pub valid_len: u64,
    /// Total log size, including any damaged bytes.
    pub total_len: u64,
    /// The first error that interrupted the scan, if any.
    pub damage: Option<StoreError>,
    /// Intact records found past the damage.
    pub recovered: usize,
    /// Bytes that could not be read as records.
    pub skipped_bytes: u64,
}

impl LogScan {
    /// Returns true if the whole log was read.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.valid_len == self.total_len
    }

    /// Returns true if the only problem is a partial frame at the very end,
    /// as left by an interrupted append. Such a tail can be cut off safely.
    #[must_use]
    pub fn is_torn_tail(&self) -> bool {
        !self.is_clean() && self.damage.is_none()
    }
}

/// Reads every intact record from `backend`.
///
/// When a record cannot be read, the scan searches forward for the next
/// frame that decodes and carries on from there, so one damaged record does
/// not hide the records written after it. A partial frame at the end of the
/// log with nothing readable behind it is a torn append, not damage.
///
/// # Errors
///
/// Returns an error only if the backend itself cannot be read; damaged
/// records are reported through [`LogScan::damage`].
pub fn scan_log(backend: &dyn StorageBackend) -> StoreResult<LogScan> {
    let total_len = backend.size()?;
    let mut records = Vec::new();
    let mut damage = None;
    let mut valid_len = None;
    let mut recovered = 0;
    let mut skipped_bytes = 0;
    let mut start = 0;

    loop {
        let mut reader = LogReader::starting_at(backend, start)?;
        for item in reader.by_ref() {
            match item {
                Ok(entry) => {
                    if valid_len.is_some() {
                        recovered += 1;
                    }
                    records.push(entry);
                }
                Err(StoreError::Storage(e)) => return Err(StoreError::Storage(e)),
                Err(e) => {
                    damage.get_or_insert(e);
                }
            }
        }

        let stop = reader.offset();
        valid_len.get_or_insert(stop);
        if stop >= total_len {
            break;
        }

        match find_next_frame(backend, stop + 1, total_len)? {
            Some(next) => {
                skipped_bytes += next - stop;
                damage.get_or_insert_with(|| StoreError::corruption(stop, "unreadable record"));
                start = next;
            }
            None => {
                if damage.is_some() {
                    skipped_bytes += total_len - stop;
                }
                break;
            }
        }
    }

    Ok(LogScan {
        records,
        valid_len: valid_len.unwrap_or(0),
        total_len,
        damage,
        recovered,
        skipped_bytes,
    })
}

/// Offset of the first frame at or after `from` that reads back intact.
fn find_next_frame(
    backend: &dyn StorageBackend,
    from: u64,
    total_len: u64,
) -> StoreResult<Option<u64>> {
    if from >= total_len {
        return Ok(None);
    }
    let len = usize::try_from(total_len - from)
        .map_err(|_| StoreError::corruption(from, "log too large to search"))?;
    let rest = backend.read_at(from, len)?;

    for (pos, window) in rest.windows(LOG_MAGIC.len()).enumerate() {
        if window != LOG_MAGIC {
            continue;
        }
        let candidate = from + pos as u64;
        if matches!(LogReader::starting_at(backend, candidate)?.next(), Some(Ok(_))) {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}
