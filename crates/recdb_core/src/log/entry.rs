//! Log entries and their on-disk frame.

use super::{LogError, LogResult};
use crate::record::StoredRecord;
use crate::types::{Key, TableName};
use serde::{Deserialize, Serialize};

/// Magic bytes opening every frame.
pub const LOG_MAGIC: [u8; 4] = *b"RLOG";

/// Current frame format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
pub(crate) const HEADER_SIZE: usize = 10;

pub(crate) const CRC_SIZE: usize = 4;

/// One mutation inside a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogOp {
    /// Insert or replace the record at `key`.
    Put {
        /// Record key.
        key: Key,
        /// Full stored record.
        record: StoredRecord,
    },
    /// Remove the record at `key`, if any.
    Delete {
        /// Record key.
        key: Key,
    },
    /// Remove every record of the table.
    Clear,
}

/// A unit of the commit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogEntry {
    /// Schema version now in effect.
    SchemaVersion {
        /// The version number.
        version: u32,
    },
    /// A table was created.
    CreateTable {
        /// Table name.
        name: TableName,
        /// Record field holding the key.
        key_path: String,
        /// Whether keys are generated on insert.
        auto_increment: bool,
    },
    /// A secondary index was created.
    CreateIndex {
        /// Owning table.
        table: TableName,
        /// Index name.
        name: String,
        /// Indexed record field.
        field: String,
        /// Whether values must be unique.
        unique: bool,
    },
    /// A committed scope.
    Commit {
        /// Target table.
        table: TableName,
        /// Key generator position after the commit.
        next_id: u64,
        /// Mutations in application order.
        ops: Vec<LogOp>,
    },
}

/// Outcome of decoding one frame from a buffer.
#[derive(Debug, PartialEq)]
pub enum Frame {
    /// A whole frame and its encoded length.
    Entry(LogEntry, usize),
    /// The buffer ends mid-frame.
    Torn,
}

/// Serializes an entry into a checksummed frame.
///
/// # Errors
///
/// Returns [`LogError::Encode`] if CBOR encoding fails or the body does not
/// fit in the length field.
pub fn encode_frame(entry: &LogEntry) -> LogResult<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::into_writer(entry, &mut body).map_err(|e| LogError::Encode(e.to_string()))?;
    let len = u32::try_from(body.len())
        .map_err(|_| LogError::Encode(format!("entry of {} bytes too large", body.len())))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
    data.extend_from_slice(&LOG_MAGIC);
    data.extend_from_slice(&LOG_VERSION.to_le_bytes());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&body);
    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Decodes the frame at the start of `buf`, which sits at `offset` in the log.
///
/// # Errors
///
/// Returns [`LogError::Corruption`] for bad magic, an unknown version, a CRC
/// mismatch or an undecodable body.
pub fn decode_frame(buf: &[u8], offset: u64) -> LogResult<Frame> {
    if buf.len() < HEADER_SIZE {
        return Ok(Frame::Torn);
    }
    if buf[0..4] != LOG_MAGIC {
        return Err(LogError::corruption(offset, "bad frame magic"));
    }
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version != LOG_VERSION {
        return Err(LogError::corruption(
            offset,
            format!("unsupported frame version {version}"),
        ));
    }
    let len = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]) as usize;
    let total = HEADER_SIZE + len + CRC_SIZE;
    if buf.len() < total {
        return Ok(Frame::Torn);
    }

    let crc_at = HEADER_SIZE + len;
    let stored = u32::from_le_bytes([
        buf[crc_at],
        buf[crc_at + 1],
        buf[crc_at + 2],
        buf[crc_at + 3],
    ]);
    let computed = compute_crc32(&buf[..crc_at]);
    if stored != computed {
        return Err(LogError::corruption(
            offset,
            format!("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"),
        ));
    }

    let entry: LogEntry = ciborium::from_reader(&buf[HEADER_SIZE..crc_at])
        .map_err(|e| LogError::corruption(offset, format!("undecodable entry: {e}")))?;
    Ok(Frame::Entry(entry, total))
}

/// CRC-32 (IEEE) of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
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
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::normalize;
    use crate::record::Record;

    fn commit() -> LogEntry {
        let key = Key::new(3).unwrap();
        let mut stored = normalize(Record::new().with("name", "Unfiled").with("date", 12));
        stored.record.set("id", 3);
        LogEntry::Commit {
            table: TableName::Tree,
            next_id: 4,
            ops: vec![LogOp::Clear, LogOp::Put { key, record: stored }, LogOp::Delete { key }],
        }
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn frame_decodes_to_same_entry() {
        let entry = commit();
        let frame = encode_frame(&entry).unwrap();
        assert_eq!(&frame[..4], b"RLOG");
        assert_eq!(
            decode_frame(&frame, 0).unwrap(),
            Frame::Entry(entry, frame.len())
        );
    }

    #[test]
    fn short_buffers_are_torn() {
        let frame = encode_frame(&LogEntry::SchemaVersion { version: 2 }).unwrap();
        assert_eq!(decode_frame(&frame[..5], 0).unwrap(), Frame::Torn);
        assert_eq!(
            decode_frame(&frame[..frame.len() - 1], 0).unwrap(),
            Frame::Torn
        );
    }

    #[test]
    fn flipped_byte_is_corruption() {
        let mut frame = encode_frame(&commit()).unwrap();
        let mid = frame.len() / 2;
        frame[mid] ^= 0xFF;
        assert!(matches!(
            decode_frame(&frame, 40),
            Err(LogError::Corruption { offset: 40, .. })
        ));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut frame = encode_frame(&commit()).unwrap();
        frame[0] = b'X';
        assert!(matches!(
            decode_frame(&frame, 0),
            Err(LogError::Corruption { .. })
        ));
    }
}
