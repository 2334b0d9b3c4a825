//! Append-only revision log.
//!
//! Every change to a datastore is appended to its log before it becomes
//! visible, and opening a datastore replays the log to rebuild the
//! revision trees, index definitions and checkpoints.
//!
//! ## Frame Format
//!
//! ```text
//! | magic "RVLG" (4) | version (2) | type (1) | length (4) | CBOR payload (N) | crc32 (4) |
//! ```
//!
//! In an encrypted datastore the high bit of the type byte is set and the
//! payload is `nonce || AES-256-GCM(CBOR) || tag`, with the first seven
//! header bytes as associated data. The CRC still covers the bytes on disk,
//! so torn writes are told apart from a wrong key.
//!
//! ## Groups
//!
//! Revisions are always written between a `Begin` and a `Commit` frame
//! carrying the same batch number, and the whole group goes to the backend
//! in a single append. On replay a group without its `Commit` is dropped,
//! so a save, a conflict resolution or a replication batch is either fully
//! visible after a crash or not at all.
//!
//! ## Recovery Policy
//!
//! - a truncated frame at the end of the log is a torn write and is cut off
//! - a CRC mismatch in the last frame is treated the same way
//! - an uncommitted group at the end of the log is cut off
//! - a bad magic, unknown type, CRC mismatch or undecodable payload anywhere
//!   else is [`CoreError::LogCorruption`] and the open fails
//! - a sealed frame without a key, a plain frame with a key, or a sealed
//!   frame that does not open is [`CoreError::Encryption`]

mod record;

pub use record::{
    compute_crc32, CheckpointRecord, LogRecord, LogRecordType, RevisionRecord, ENCRYPTED_FLAG,
    LOG_MAGIC, LOG_VERSION,
};

use crate::crypto::{CryptoManager, EncryptionKey};
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use record::{AAD_SIZE, CRC_SIZE, HEADER_SIZE};
use revdb_storage::StorageBackend;
use std::borrow::Cow;

/// Outcome of replaying a log.
#[derive(Debug, Default)]
pub struct Replay {
    /// Committed records in log order, without group markers.
    pub records: Vec<LogRecord>,
    /// Highest batch number seen, committed or not.
    pub last_batch: u64,
    /// Number of groups dropped because they never committed.
    pub discarded_groups: usize,
    /// Bytes cut from the end of the log.
    pub truncated_bytes: u64,
}

/// Writes and replays one datastore's revision log.
pub struct RevisionLog {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_commit: bool,
    crypto: Option<CryptoManager>,
}

impl RevisionLog {
    /// Creates a log over `backend`.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_commit,
            crypto: None,
        }
    }

    /// Seals frames with `key`, or writes them in the clear for `None`.
    #[must_use]
    pub fn with_key(mut self, key: Option<&EncryptionKey>) -> Self {
        self.crypto = key.map(CryptoManager::new);
        self
    }

    /// Returns true if frames are sealed.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.crypto.is_some()
    }

    /// Appends records as one write.
    ///
    /// If the write fails the log is cut back to its previous length so a
    /// half-written group never sits in front of later frames.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the backend write fails.
    pub fn append(&self, records: &[LogRecord]) -> CoreResult<u64> {
        let mut data = Vec::new();
        for record in records {
            data.extend_from_slice(&record.encode_frame_with(self.crypto.as_ref())?);
        }

        let mut backend = self.backend.lock();
        let before = backend.size()?;
        let written = backend.append(&data).and_then(|offset| {
            backend.flush()?;
            if self.sync_on_commit {
                backend.sync()?;
            }
            Ok(offset)
        });

        match written {
            Ok(offset) => Ok(offset),
            Err(err) => {
                if backend.size().map_or(true, |size| size > before) {
                    if let Err(undo) = backend.truncate(before) {
                        tracing::warn!(error = %undo, "failed to roll back partial log append");
                    }
                }
                Err(err.into())
            }
        }
    }

    /// Returns the log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Reads the whole log, returns its committed records and cuts off any
    /// torn or uncommitted tail.
    ///
    /// # Errors
    ///
    /// Returns `LogCorruption` for damage before the tail, or an I/O error.
    pub fn replay(&self) -> CoreResult<Replay> {
        let mut backend = self.backend.lock();
        let data = backend.read_to_end(0)?;
        let size = data.len();

        let mut replay = Replay::default();
        let mut pending: Option<(u64, Vec<LogRecord>)> = None;
        let mut committed_end = 0usize;
        let mut offset = 0usize;

        while offset < size {
            let Some((record, frame_len)) = read_frame(&data, offset, self.crypto.as_ref())? else {
                break;
            };
            offset += frame_len;

            match record {
                LogRecord::Begin { batch } => {
                    if pending.take().is_some() {
                        replay.discarded_groups += 1;
                    }
                    replay.last_batch = replay.last_batch.max(batch);
                    pending = Some((batch, Vec::new()));
                }
                LogRecord::Commit { batch } => match pending.take() {
                    Some((open, records)) if open == batch => {
                        replay.records.extend(records);
                        committed_end = offset;
                    }
                    _ => {
                        return Err(CoreError::log_corruption(format!(
                            "commit of batch {batch} without matching begin at offset {}",
                            offset - frame_len
                        )));
                    }
                },
                LogRecord::Revision(rev) => match pending.as_mut() {
                    Some((_, records)) => records.push(LogRecord::Revision(rev)),
                    None => {
                        return Err(CoreError::log_corruption(format!(
                            "revision record outside a group at offset {}",
                            offset - frame_len
                        )));
                    }
                },
                other => match pending.as_mut() {
                    Some((_, records)) => records.push(other),
                    None => {
                        replay.records.push(other);
                        committed_end = offset;
                    }
                },
            }
        }

        if pending.is_some() {
            replay.discarded_groups += 1;
        }

        if committed_end < size {
            replay.truncated_bytes = (size - committed_end) as u64;
            tracing::warn!(
                offset = committed_end,
                bytes = replay.truncated_bytes,
                "cutting torn or uncommitted tail from revision log"
            );
            backend.truncate(committed_end as u64)?;
        }

        Ok(replay)
    }
}

impl std::fmt::Debug for RevisionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionLog")
            .field("sync_on_commit", &self.sync_on_commit)
            .field("encrypted", &self.is_encrypted())
            .finish_non_exhaustive()
    }
}

/// Parses the frame at `offset`.
///
/// Returns `Ok(None)` when the rest of the log is a torn write.
fn read_frame(
    data: &[u8],
    offset: usize,
    crypto: Option<&CryptoManager>,
) -> CoreResult<Option<(LogRecord, usize)>> {
    let rest = &data[offset..];
    if rest.len() < HEADER_SIZE {
        return Ok(None);
    }

    if rest[0..4] != LOG_MAGIC {
        return Err(CoreError::log_corruption(format!(
            "invalid magic at offset {offset}"
        )));
    }

    let version = u16::from_le_bytes([rest[4], rest[5]]);
    if version > LOG_VERSION {
        return Err(CoreError::log_corruption(format!(
            "unsupported version {version} at offset {offset}"
        )));
    }

    let sealed = rest[6] & ENCRYPTED_FLAG != 0;
    let type_byte = rest[6] & !ENCRYPTED_FLAG;
    let record_type = LogRecordType::from_byte(type_byte).ok_or_else(|| {
        CoreError::log_corruption(format!("unknown record type {type_byte} at offset {offset}"))
    })?;

    let payload_len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;
    let frame_len = HEADER_SIZE + payload_len + CRC_SIZE;
    if rest.len() < frame_len {
        return Ok(None);
    }

    let body_end = HEADER_SIZE + payload_len;
    let stored = u32::from_le_bytes([
        rest[body_end],
        rest[body_end + 1],
        rest[body_end + 2],
        rest[body_end + 3],
    ]);
    let computed = compute_crc32(&rest[..body_end]);
    if stored != computed {
        if rest.len() == frame_len {
            return Ok(None);
        }
        return Err(CoreError::log_corruption(format!(
            "checksum mismatch at offset {offset}: expected {stored:08x}, got {computed:08x}"
        )));
    }

    let payload = &rest[HEADER_SIZE..body_end];
    let payload = match (sealed, crypto) {
        (false, None) => Cow::Borrowed(payload),
        (true, Some(crypto)) => {
            let opened = crypto
                .decrypt_with_aad(payload, &rest[..AAD_SIZE])
                .map_err(|e| match e {
                    CoreError::Encryption { message } => {
                        CoreError::encryption(format!("{message} (frame at offset {offset})"))
                    }
                    other => other,
                })?;
            Cow::Owned(opened)
        }
        (true, None) => {
            return Err(CoreError::encryption(
                "datastore is encrypted; a key is required",
            ));
        }
        (false, Some(_)) => {
            return Err(CoreError::encryption(
                "datastore is not encrypted but a key was given",
            ));
        }
    };

    let record = LogRecord::decode_payload(record_type, &payload)
        .map_err(|e| CoreError::log_corruption(format!("at offset {offset}: {e}")))?;
    Ok(Some((record, frame_len)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use revdb_storage::InMemoryBackend;

    fn rev_record(doc: &str, rev: &str, seq: u64) -> LogRecord {
        LogRecord::Revision(RevisionRecord {
            doc_id: doc.into(),
            rev_id: rev.parse().unwrap(),
            parent: None,
            body: Value::object(),
            deleted: false,
            sequence: seq,
            attachments: Default::default(),
        })
    }

    fn group(batch: u64, records: Vec<LogRecord>) -> Vec<LogRecord> {
        let mut all = vec![LogRecord::Begin { batch }];
        all.extend(records);
        all.push(LogRecord::Commit { batch });
        all
    }

    fn log_over(backend: &InMemoryBackend) -> RevisionLog {
        RevisionLog::new(Box::new(backend.share()), false)
    }

    #[test]
    fn replay_returns_committed_records() {
        let backend = InMemoryBackend::new();
        let log = log_over(&backend);
        log.append(&group(1, vec![rev_record("a", "1-a", 1)])).unwrap();
        log.append(&[LogRecord::IndexDropped { name: "i".into() }])
            .unwrap();
        log.append(&group(2, vec![rev_record("b", "1-b", 2)])).unwrap();

        let replay = log_over(&backend).replay().unwrap();
        assert_eq!(replay.records.len(), 3);
        assert_eq!(replay.last_batch, 2);
        assert_eq!(replay.discarded_groups, 0);
        assert_eq!(replay.truncated_bytes, 0);
    }

    #[test]
    fn uncommitted_tail_is_discarded_and_cut() {
        let backend = InMemoryBackend::new();
        let log = log_over(&backend);
        log.append(&group(1, vec![rev_record("a", "1-a", 1)])).unwrap();
        let committed = log.size().unwrap();
        log.append(&[LogRecord::Begin { batch: 2 }, rev_record("b", "1-b", 2)])
            .unwrap();

        let replay = log_over(&backend).replay().unwrap();
        assert_eq!(replay.records.len(), 1);
        assert_eq!(replay.discarded_groups, 1);
        assert_eq!(backend.data().len() as u64, committed);
    }

    #[test]
    fn torn_frame_is_cut() {
        let backend = InMemoryBackend::new();
        let log = log_over(&backend);
        log.append(&group(1, vec![rev_record("a", "1-a", 1)])).unwrap();
        let committed = backend.data().len();

        let frame = LogRecord::Begin { batch: 2 }.encode_frame().unwrap();
        let mut torn = backend.share();
        torn.append(&frame[..frame.len() - 3]).unwrap();

        let replay = log_over(&backend).replay().unwrap();
        assert_eq!(replay.records.len(), 1);
        assert_eq!(replay.truncated_bytes, (frame.len() - 3) as u64);
        assert_eq!(backend.data().len(), committed);
    }

    #[test]
    fn checksum_error_mid_log_is_corruption() {
        let backend = InMemoryBackend::new();
        let log = log_over(&backend);
        log.append(&group(1, vec![rev_record("a", "1-a", 1)])).unwrap();
        log.append(&group(2, vec![rev_record("b", "1-b", 2)])).unwrap();

        let mut bytes = backend.data();
        bytes[HEADER_SIZE + 1] ^= 0xFF;
        let damaged = InMemoryBackend::with_data(bytes);

        let err = RevisionLog::new(Box::new(damaged), false)
            .replay()
            .unwrap_err();
        assert!(matches!(err, CoreError::LogCorruption { .. }));
    }

    #[test]
    fn checksum_error_in_last_frame_is_torn() {
        let backend = InMemoryBackend::new();
        let log = log_over(&backend);
        log.append(&group(1, vec![rev_record("a", "1-a", 1)])).unwrap();

        let mut bytes = backend.data();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let damaged = InMemoryBackend::with_data(bytes);

        let replay = RevisionLog::new(Box::new(damaged), false).replay().unwrap();
        assert!(replay.records.is_empty());
        assert_eq!(replay.discarded_groups, 1);
    }

    #[test]
    fn bad_magic_is_corruption() {
        let backend = InMemoryBackend::with_data(b"NOPE-not-a-log-at-all".to_vec());
        let err = RevisionLog::new(Box::new(backend), false)
            .replay()
            .unwrap_err();
        assert!(matches!(err, CoreError::LogCorruption { .. }));
    }

    #[test]
    fn failed_append_leaves_log_unchanged() {
        let backend = InMemoryBackend::new();
        let log = log_over(&backend);
        log.append(&group(1, vec![rev_record("a", "1-a", 1)])).unwrap();
        let before = backend.data();

        backend.fail_next_appends(1);
        let err = log.append(&group(2, vec![rev_record("b", "1-b", 2)]));
        assert!(err.unwrap_err().is_transient());
        assert_eq!(backend.data(), before);
    }

    #[test]
    fn encrypted_log_needs_the_same_key() {
        let backend = InMemoryBackend::new();
        let key = EncryptionKey::generate();
        let log = log_over(&backend).with_key(Some(&key));
        assert!(log.is_encrypted());
        log.append(&group(1, vec![rev_record("secret-doc", "1-a", 1)]))
            .unwrap();
        assert!(!backend.data().windows(10).any(|w| w == b"secret-doc"));

        let replay = log_over(&backend).with_key(Some(&key)).replay().unwrap();
        assert_eq!(replay.records.len(), 1);

        let err = log_over(&backend).replay().unwrap_err();
        assert!(matches!(err, CoreError::Encryption { .. }));
        let wrong = EncryptionKey::generate();
        let err = log_over(&backend).with_key(Some(&wrong)).replay().unwrap_err();
        assert!(matches!(err, CoreError::Encryption { .. }));
        assert_eq!(backend.data().len() as u64, log.size().unwrap());
    }

    #[test]
    fn plain_log_rejects_a_key() {
        let backend = InMemoryBackend::new();
        log_over(&backend)
            .append(&group(1, vec![rev_record("a", "1-a", 1)]))
            .unwrap();
        let err = log_over(&backend)
            .with_key(Some(&EncryptionKey::generate()))
            .replay()
            .unwrap_err();
        assert!(matches!(err, CoreError::Encryption { .. }));
    }
}
