//! Log record types and framing.

use crate::error::{StoreError, StoreResult};
use crate::types::{EntityType, StoredEntity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Magic bytes opening every record.
pub const LOG_MAGIC: [u8; 4] = *b"TSLG";

/// Current record format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub const HEADER_SIZE: usize = 11;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 4;

/// Type byte of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// Upsert of a full entity.
    Put = 1,
    /// Removal of one entity.
    Remove = 2,
    /// Removal of every entity of one type.
    ClearType = 3,
    /// Removal of every entity.
    ClearAll = 4,
    /// Store-level metadata.
    Meta = 5,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Remove),
            3 => Some(Self::ClearType),
            4 => Some(Self::ClearAll),
            5 => Some(Self::Meta),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Store-level metadata persisted alongside entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaEntry {
    /// A sync pass for `entity_type` completed at `at`.
    LastSync {
        /// Entity type synced.
        entity_type: EntityType,
        /// Completion time.
        at: DateTime<Utc>,
    },
    /// The legacy queue was drained at `at`.
    LegacyMigrated {
        /// Migration time.
        at: DateTime<Utc>,
    },
}

#[derive(Serialize, Deserialize)]
struct RemoveBody {
    entity_type: EntityType,
    id: String,
}

/// One mutation of the store.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    /// Insert or replace an entity.
    Put(StoredEntity),
    /// Remove one entity.
    Remove {
        /// Entity type.
        entity_type: EntityType,
        /// Entity id.
        id: String,
    },
    /// Remove every entity of a type.
    ClearType(EntityType),
    /// Remove every entity.
    ClearAll,
    /// Record metadata.
    Meta(MetaEntry),
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Put(_) => LogRecordType::Put,
            Self::Remove { .. } => LogRecordType::Remove,
            Self::ClearType(_) => LogRecordType::ClearType,
            Self::ClearAll => LogRecordType::ClearAll,
            Self::Meta(_) => LogRecordType::Meta,
        }
    }

    /// Encodes the record body as CBOR.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Codec`] if serialization fails.
    pub fn encode_body(&self) -> StoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        let written = match self {
            Self::Put(entity) => ciborium::into_writer(entity, &mut buf),
            Self::Remove { entity_type, id } => ciborium::into_writer(
                &RemoveBody {
                    entity_type: *entity_type,
                    id: id.clone(),
                },
                &mut buf,
            ),
            Self::ClearType(entity_type) => ciborium::into_writer(entity_type, &mut buf),
            Self::ClearAll => return Ok(buf),
            Self::Meta(entry) => ciborium::into_writer(entry, &mut buf),
        };
        written.map_err(StoreError::codec)?;
        Ok(buf)
    }

    /// Decodes a record body of the given type.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Codec`] if the body is not valid CBOR for the type.
    pub fn decode_body(record_type: LogRecordType, body: &[u8]) -> StoreResult<Self> {
        let record = match record_type {
            LogRecordType::Put => Self::Put(decode(body)?),
            LogRecordType::Remove => {
                let RemoveBody { entity_type, id } = decode(body)?;
                Self::Remove { entity_type, id }
            }
            LogRecordType::ClearType => Self::ClearType(decode(body)?),
            LogRecordType::ClearAll => {
                if !body.is_empty() {
                    return Err(StoreError::Codec("ClearAll record carries a body".into()));
                }
                Self::ClearAll
            }
            LogRecordType::Meta => Self::Meta(decode(body)?),
        };
        Ok(record)
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> StoreResult<T> {
    ciborium::from_reader(body).map_err(StoreError::codec)
}

/// Frames a record: header, CBOR body, CRC32.
///
/// # Errors
///
/// Returns an error if the body cannot be encoded or exceeds `u32::MAX` bytes.
pub fn encode_record(record: &LogRecord) -> StoreResult<Vec<u8>> {
    let body = record.encode_body()?;
    let len = u32::try_from(body.len())
        .map_err(|_| StoreError::Codec(format!("record body too large: {} bytes", body.len())))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
    data.extend_from_slice(&LOG_MAGIC);
    data.extend_from_slice(&LOG_VERSION.to_le_bytes());
    data.push(record.record_type().as_byte());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&body);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// CRC32 (IEEE polynomial).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[index];
    }
    !crc
}
