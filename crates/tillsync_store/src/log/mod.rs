//! Framed record log.
//!
//! Every store mutation is appended as one record:
//!
//! ```text
//! | magic "TSLG" (4) | version (2) | type (1) | length (4) | CBOR body | crc32 (4) |
//! ```
//!
//! Integers are little-endian; the CRC covers everything before it.

mod reader;
mod record;

pub use reader::{scan_log, LogReader, LogScan};
pub use record::{
    compute_crc32, encode_record, LogRecord, LogRecordType, MetaEntry, CRC_SIZE, HEADER_SIZE,
    LOG_MAGIC, LOG_VERSION,
};
