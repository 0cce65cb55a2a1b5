//! Log entry type and its on-disk framing.

use crate::error::{LogError, LogResult};
use twophase_protocol::{now_millis, TransactionId, TransactionState};

/// Magic bytes identifying a log record.
pub const LOG_MAGIC: [u8; 4] = *b"2PCL";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + state (1) + length (4) + header crc (4)
pub(crate) const HEADER_SIZE: usize = 15;

/// Bytes covered by the header checksum.
const HEADER_FIELDS: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// One recorded state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Transaction the entry belongs to.
    pub transaction_id: TransactionId,
    /// State the transaction entered.
    pub state: TransactionState,
    /// Append time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Opaque caller data (the coordinator stores the participant list on
    /// the `INITIAL` entry).
    pub payload: Vec<u8>,
}

/// Fields decoded from a record header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordHeader {
    pub state: TransactionState,
    pub payload_len: usize,
}

impl RecordHeader {
    pub(crate) fn record_len(&self) -> usize {
        HEADER_SIZE + self.payload_len + CRC_SIZE
    }
}

impl LogEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(
        transaction_id: impl Into<TransactionId>,
        state: TransactionState,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            state,
            timestamp: now_millis(),
            payload: payload.into(),
        }
    }

    /// Encodes the full framed record.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::EntryTooLarge`] if the id exceeds `u16::MAX` bytes
    /// or the payload exceeds `u32::MAX` bytes.
    pub fn encode(&self) -> LogResult<Vec<u8>> {
        let body = self.encode_payload()?;
        let len = u32::try_from(body.len())
            .map_err(|_| LogError::too_large("record body exceeds u32::MAX bytes"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(self.state.as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        let header_crc = crc32fast::hash(&data);
        data.extend_from_slice(&header_crc.to_le_bytes());
        data.extend_from_slice(&body);

        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }

    fn encode_payload(&self) -> LogResult<Vec<u8>> {
        let id = self.transaction_id.as_str().as_bytes();
        let id_len = u16::try_from(id.len())
            .map_err(|_| LogError::too_large("transaction id exceeds u16::MAX bytes"))?;
        let data_len = u32::try_from(self.payload.len())
            .map_err(|_| LogError::too_large("payload exceeds u32::MAX bytes"))?;

        let mut buf = Vec::with_capacity(8 + 2 + id.len() + 4 + self.payload.len());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&id_len.to_le_bytes());
        buf.extend_from_slice(id);
        buf.extend_from_slice(&data_len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Validates and decodes a record header.
    ///
    /// The length field is only trusted once the header checksum matches,
    /// so a damaged length is never mistaken for a torn write.
    pub(crate) fn decode_header(header: &[u8], offset: u64) -> LogResult<RecordHeader> {
        if header.len() < HEADER_SIZE {
            return Err(LogError::corruption(format!(
                "short header at offset {offset}"
            )));
        }
        if header[0..4] != LOG_MAGIC {
            return Err(LogError::corruption(format!(
                "invalid magic at offset {offset}"
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version == 0 || version > LOG_VERSION {
            return Err(LogError::corruption(format!(
                "unsupported version {version} at offset {offset}"
            )));
        }
        let stored = u32::from_le_bytes([header[11], header[12], header[13], header[14]]);
        let computed = crc32fast::hash(&header[..HEADER_FIELDS]);
        if stored != computed {
            return Err(LogError::ChecksumMismatch {
                offset,
                expected: stored,
                actual: computed,
            });
        }
        let state = TransactionState::from_byte(header[6])?;
        let payload_len =
            u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        Ok(RecordHeader { state, payload_len })
    }

    /// Verifies the checksum of a complete framed record and decodes it.
    pub(crate) fn decode_record(record: &[u8], offset: u64) -> LogResult<Self> {
        let header = Self::decode_header(record, offset)?;
        if record.len() != header.record_len() {
            return Err(LogError::corruption(format!(
                "record length mismatch at offset {offset}"
            )));
        }

        let crc_start = HEADER_SIZE + header.payload_len;
        let stored = u32::from_le_bytes([
            record[crc_start],
            record[crc_start + 1],
            record[crc_start + 2],
            record[crc_start + 3],
        ]);
        let computed = crc32fast::hash(&record[..crc_start]);
        if stored != computed {
            return Err(LogError::ChecksumMismatch {
                offset,
                expected: stored,
                actual: computed,
            });
        }

        Self::decode_payload(header.state, &record[HEADER_SIZE..crc_start], offset)
    }

    fn decode_payload(state: TransactionState, body: &[u8], offset: u64) -> LogResult<Self> {
        let mut cursor = 0usize;

        let read_bytes = |cursor: &mut usize, n: usize| -> LogResult<Vec<u8>> {
            if *cursor + n > body.len() {
                return Err(LogError::corruption(format!(
                    "unexpected end of record body at offset {offset}"
                )));
            }
            let bytes = body[*cursor..*cursor + n].to_vec();
            *cursor += n;
            Ok(bytes)
        };

        let read_array = |cursor: &mut usize, n: usize| -> LogResult<[u8; 8]> {
            let bytes = read_bytes(cursor, n)?;
            let mut out = [0u8; 8];
            out[..n].copy_from_slice(&bytes);
            Ok(out)
        };

        let timestamp = u64::from_le_bytes(read_array(&mut cursor, 8)?);
        let id_len = u64::from_le_bytes(read_array(&mut cursor, 2)?) as usize;
        let id = String::from_utf8(read_bytes(&mut cursor, id_len)?)
            .map_err(|_| LogError::corruption(format!("non-UTF-8 id at offset {offset}")))?;
        let data_len = u64::from_le_bytes(read_array(&mut cursor, 4)?) as usize;
        let payload = read_bytes(&mut cursor, data_len)?;

        if cursor != body.len() {
            return Err(LogError::corruption(format!(
                "trailing bytes in record at offset {offset}: expected {cursor}, got {}",
                body.len()
            )));
        }

        Ok(Self {
            transaction_id: TransactionId::new(id),
            state,
            timestamp,
            payload,
        })
    }
}
