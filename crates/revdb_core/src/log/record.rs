//! Revision log record types and framing.

use crate::attachment::Attachments;
use crate::checkpoint::ReplicationDirection;
use crate::crypto::CryptoManager;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexDefinition;
use crate::revision::{RevisionId, Sequence};
use crate::value::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Magic bytes at the start of every frame.
pub const LOG_MAGIC: [u8; 4] = *b"RVLG";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Set on the type byte of frames whose payload is encrypted.
pub const ENCRYPTED_FLAG: u8 = 0x80;

/// magic (4) + version (2) + type (1), authenticated with sealed payloads
pub(crate) const AAD_SIZE: usize = 7;

/// Type byte of a log frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// Opens a write group.
    Begin = 1,
    /// One stored revision.
    Revision = 2,
    /// Closes a write group.
    Commit = 3,
    /// A secondary index was defined.
    IndexDefined = 4,
    /// A secondary index was dropped.
    IndexDropped = 5,
    /// A replication checkpoint moved.
    Checkpoint = 6,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Revision),
            3 => Some(Self::Commit),
            4 => Some(Self::IndexDefined),
            5 => Some(Self::IndexDropped),
            6 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A revision as it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRecord {
    /// Owning document.
    pub doc_id: String,
    /// The revision's id.
    pub rev_id: RevisionId,
    /// Parent revision, `None` for roots.
    pub parent: Option<RevisionId>,
    /// Document body.
    pub body: Value,
    /// Tombstone flag.
    pub deleted: bool,
    /// Local sequence assigned at commit.
    pub sequence: Sequence,
    /// Attachments stored with this revision.
    #[serde(default, skip_serializing_if = "Attachments::is_empty")]
    pub attachments: Attachments,
}

/// A persisted replication checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Stable replication id.
    pub replication_id: String,
    /// Which way the replication runs.
    pub direction: ReplicationDirection,
    /// Last source sequence fully applied.
    pub sequence: Sequence,
}

/// One entry in a datastore's revision log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    /// Opens a group of revisions that commit together.
    Begin {
        /// Group number, unique within the log.
        batch: u64,
    },
    /// A stored revision. Only valid inside a group.
    Revision(RevisionRecord),
    /// Closes the group opened by the matching `Begin`.
    Commit {
        /// Group number.
        batch: u64,
    },
    /// A secondary index was defined.
    IndexDefined(IndexDefinition),
    /// A secondary index was dropped.
    IndexDropped {
        /// Index name.
        name: String,
    },
    /// A replication checkpoint moved forward.
    Checkpoint(CheckpointRecord),
}

impl LogRecord {
    /// Returns the frame type for this record.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Begin { .. } => LogRecordType::Begin,
            Self::Revision(_) => LogRecordType::Revision,
            Self::Commit { .. } => LogRecordType::Commit,
            Self::IndexDefined(_) => LogRecordType::IndexDefined,
            Self::IndexDropped { .. } => LogRecordType::IndexDropped,
            Self::Checkpoint(_) => LogRecordType::Checkpoint,
        }
    }

    /// Encodes the record's payload as CBOR.
    ///
    /// # Errors
    ///
    /// Returns a codec error if serialization fails.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        match self {
            Self::Begin { batch } | Self::Commit { batch } => to_cbor(batch),
            Self::Revision(rev) => to_cbor(rev),
            Self::IndexDefined(def) => to_cbor(def),
            Self::IndexDropped { name } => to_cbor(name),
            Self::Checkpoint(cp) => to_cbor(cp),
        }
    }

    /// Decodes a payload of the given type.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the payload does not match the type.
    pub fn decode_payload(record_type: LogRecordType, payload: &[u8]) -> CoreResult<Self> {
        Ok(match record_type {
            LogRecordType::Begin => Self::Begin {
                batch: from_cbor(payload)?,
            },
            LogRecordType::Revision => Self::Revision(from_cbor(payload)?),
            LogRecordType::Commit => Self::Commit {
                batch: from_cbor(payload)?,
            },
            LogRecordType::IndexDefined => Self::IndexDefined(from_cbor(payload)?),
            LogRecordType::IndexDropped => Self::IndexDropped {
                name: from_cbor(payload)?,
            },
            LogRecordType::Checkpoint => Self::Checkpoint(from_cbor(payload)?),
        })
    }

    /// Encodes the record as a complete frame: header, payload and CRC.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or exceeds 4 GiB.
    pub fn encode_frame(&self) -> CoreResult<Vec<u8>> {
        self.encode_frame_with(None)
    }

    /// Encodes the record as a frame, sealing the payload when `crypto` is
    /// given. The CRC covers the frame as written.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or encrypted, or
    /// exceeds 4 GiB.
    pub fn encode_frame_with(&self, crypto: Option<&CryptoManager>) -> CoreResult<Vec<u8>> {
        let mut type_byte = self.record_type().as_byte();
        if crypto.is_some() {
            type_byte |= ENCRYPTED_FLAG;
        }

        let mut frame = Vec::with_capacity(HEADER_SIZE + CRC_SIZE + 64);
        frame.extend_from_slice(&LOG_MAGIC);
        frame.extend_from_slice(&LOG_VERSION.to_le_bytes());
        frame.push(type_byte);

        let payload = self.encode_payload()?;
        let payload = match crypto {
            Some(crypto) => crypto.encrypt_with_aad(&payload, &frame[..AAD_SIZE])?,
            None => payload,
        };
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::codec("log record payload too large"))?;

        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);

        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}

fn to_cbor<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 == 0 { c >> 1 } else { 0xEDB8_8320 ^ (c >> 1) };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
};

/// Computes the IEEE CRC32 of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    !data.iter().fold(u32::MAX, |crc, &byte| {
        CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8)
    })
}
