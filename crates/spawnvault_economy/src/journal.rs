//! # Batched Audit Journal
//!
//! **Group commit for committed economy operations**
//!
//! Every committed sale (and withdrawal, resize, inconsistency) can be
//! appended here for later audit. Appends never touch the disk:
//!
//! ```text
//!   region executor 1 ──┐
//!   region executor 2 ──┼──> [bounded queue] ──> [writer thread] ──> file
//!   region executor N ──┘     (append only)        (single writer)
//! ```
//!
//! The writer drains up to `max_batch_size` records, writes them in one go
//! and fsyncs once per batch.
//!
//! ## Frame format
//!
//! ```text
//! [lsn:8][kind:1][len:4][crc32:4][payload:len]   (little endian)
//! ```
//!
//! The CRC covers the payload only. [`read_journal`] stops at the first
//! torn or corrupt frame. [`AuditJournal::open`] cuts such a tail off
//! before appending, so records written after a crash stay readable.

use parking_lot::{Condvar, Mutex};
use spawnvault_shared::{ActorId, SpawnerId};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{EconomyError, EconomyResult};
use crate::fixed_point::FixedPoint;
use crate::item::ItemStack;

const FRAME_HEADER: usize = 8 + 1 + 4 + 4;

/// Configuration for the journal writer.
#[derive(Clone, Debug)]
pub struct JournalConfig {
    /// Maximum records per batch.
    pub max_batch_size: usize,
    /// Maximum time a record waits before its batch is written (ms).
    pub max_batch_delay_ms: u64,
    /// Queue capacity. Appends beyond it fail (backpressure).
    pub queue_capacity: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_batch_delay_ms: 10,
            queue_capacity: 10_000,
        }
    }
}

/// Kind of journaled operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Inventory sold for currency.
    Sale = 1,
    /// Items withdrawn by an actor.
    Withdrawal = 2,
    /// Stack size changed.
    Resize = 3,
    /// Paid but the quoted items could not be removed.
    Inconsistency = 4,
    /// Internal flush marker, carries no payload.
    Marker = 255,
}

impl RecordKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Sale),
            2 => Some(Self::Withdrawal),
            3 => Some(Self::Resize),
            4 => Some(Self::Inconsistency),
            255 => Some(Self::Marker),
            _ => None,
        }
    }
}

/// Payload of a sale-like record.
///
/// Items are recorded by signature fingerprint to keep frames small.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TradeRecord {
    /// Spawner the items came from.
    pub spawner: SpawnerId,
    /// Actor that triggered the operation.
    pub actor: ActorId,
    /// Currency moved (zero for withdrawals).
    pub total: FixedPoint,
    /// `(fingerprint, amount)` pairs.
    pub items: Vec<(u128, u64)>,
}

impl TradeRecord {
    /// Builds a record from concrete stacks.
    #[must_use]
    pub fn from_stacks(spawner: SpawnerId, actor: ActorId, total: FixedPoint, stacks: &[ItemStack]) -> Self {
        Self {
            spawner,
            actor,
            total,
            items: stacks
                .iter()
                .map(|s| (s.signature.fingerprint(), s.amount))
                .collect(),
        }
    }

    /// Total item count in the record.
    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.items.iter().map(|(_, amount)| amount).sum()
    }

    fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(28 + self.items.len() * 24);
        payload.extend_from_slice(&self.spawner.0.to_le_bytes());
        payload.extend_from_slice(&self.actor.0.to_le_bytes());
        payload.extend_from_slice(&self.total.raw().to_le_bytes());
        payload.extend_from_slice(&(self.items.len() as u32).to_le_bytes());
        for (fingerprint, amount) in &self.items {
            payload.extend_from_slice(&fingerprint.to_le_bytes());
            payload.extend_from_slice(&amount.to_le_bytes());
        }
        payload
    }

    /// Decodes a sale-like payload.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Journal` on a truncated payload.
    pub fn decode(payload: &[u8]) -> EconomyResult<Self> {
        let mut cursor = Cursor(payload);
        let spawner = SpawnerId(cursor.u64()?);
        let actor = ActorId(cursor.u64()?);
        let total = FixedPoint::from_raw(cursor.u64()?);
        let count = cursor.u32()? as usize;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push((cursor.u128()?, cursor.u64()?));
        }
        Ok(Self {
            spawner,
            actor,
            total,
            items,
        })
    }
}

struct Cursor<'a>(&'a [u8]);

impl Cursor<'_> {
    fn take<const N: usize>(&mut self) -> EconomyResult<[u8; N]> {
        if self.0.len() < N {
            return Err(EconomyError::Journal("truncated payload".to_string()));
        }
        let (head, tail) = self.0.split_at(N);
        self.0 = tail;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    fn u32(&mut self) -> EconomyResult<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> EconomyResult<u64> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    fn u128(&mut self) -> EconomyResult<u128> {
        self.take::<16>().map(u128::from_le_bytes)
    }
}

/// A frame read back from disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalFrame {
    /// Log sequence number.
    pub lsn: u64,
    /// Record kind.
    pub kind: RecordKind,
    /// Raw payload.
    pub payload: Vec<u8>,
}

struct PendingRecord {
    lsn: u64,
    kind: RecordKind,
    payload: Vec<u8>,
    completion: Arc<CompletionSignal>,
}

struct CompletionSignal {
    done: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl CompletionSignal {
    fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
        }
    }

    fn signal(&self) {
        let _guard = self.mutex.lock();
        self.done.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.mutex.lock();
        while !self.done.load(Ordering::Acquire) {
            if self.condvar.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.done.load(Ordering::Acquire)
    }
}

/// Handle to track when an appended record is durable.
pub struct JournalHandle {
    completion: Arc<CompletionSignal>,
    /// LSN assigned to the record.
    pub lsn: u64,
}

impl JournalHandle {
    /// Waits until the record is written. Returns true if it was.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.completion.wait_timeout(timeout)
    }

    /// Returns true if already written.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completion.done.load(Ordering::Acquire)
    }
}

/// Writer statistics.
#[derive(Clone, Debug, Default)]
pub struct JournalStats {
    /// Records written.
    pub total_records: u64,
    /// Batches written.
    pub total_batches: u64,
    /// Bytes written.
    pub total_bytes: u64,
    /// Write errors encountered.
    pub write_errors: u64,
}

struct QueueState {
    records: VecDeque<PendingRecord>,
    // Assigned under the queue lock so queue order is LSN order.
    next_lsn: u64,
}

struct Queue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    capacity: usize,
}

impl Queue {
    /// Enqueues a record and returns its LSN, or `None` when full.
    fn push(&self, kind: RecordKind, payload: Vec<u8>, completion: Arc<CompletionSignal>) -> Option<u64> {
        let mut state = self.state.lock();
        if state.records.len() >= self.capacity {
            return None;
        }
        let lsn = state.next_lsn;
        state.next_lsn += 1;
        state.records.push_back(PendingRecord {
            lsn,
            kind,
            payload,
            completion,
        });
        self.not_empty.notify_one();
        Some(lsn)
    }

    fn drain(&self, max_count: usize, timeout: Duration) -> Vec<PendingRecord> {
        let mut state = self.state.lock();
        if state.records.is_empty() {
            self.not_empty.wait_for(&mut state, timeout);
        }
        let count = state.records.len().min(max_count);
        state.records.drain(..count).collect()
    }
}

/// Append-only audit journal with a background writer.
pub struct AuditJournal {
    queue: Arc<Queue>,
    writer: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<Mutex<JournalStats>>,
}

impl AuditJournal {
    /// Opens (or creates) a journal file and starts the writer thread.
    ///
    /// New records continue the LSN sequence found in an existing file.
    /// A torn or corrupt tail left by a crash is truncated first.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Journal` if the file cannot be opened or
    /// its tail cannot be truncated.
    pub fn open(path: impl AsRef<Path>, config: JournalConfig) -> EconomyResult<Self> {
        let path = path.as_ref();
        let next_lsn = if path.exists() {
            recover_tail(path)?
        } else {
            0
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| EconomyError::Journal(format!("failed to open {}: {e}", path.display())))?;

        let queue = Arc::new(Queue {
            state: Mutex::new(QueueState {
                records: VecDeque::with_capacity(config.queue_capacity.min(4096)),
                next_lsn,
            }),
            not_empty: Condvar::new(),
            capacity: config.queue_capacity.max(1),
        });
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(JournalStats::default()));

        let writer = {
            let queue = Arc::clone(&queue);
            let shutdown = Arc::clone(&shutdown);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name("spawnvault-journal".to_string())
                .spawn(move || Self::writer_loop(file, &queue, &shutdown, &stats, &config))
                .map_err(|e| EconomyError::Journal(format!("failed to start writer: {e}")))?
        };

        Ok(Self {
            queue,
            writer: Some(writer),
            shutdown,
            stats,
        })
    }

    fn writer_loop(
        file: File,
        queue: &Queue,
        shutdown: &AtomicBool,
        stats: &Mutex<JournalStats>,
        config: &JournalConfig,
    ) {
        let mut writer = BufWriter::with_capacity(64 * 1024, file);
        let delay = Duration::from_millis(config.max_batch_delay_ms.max(1));

        loop {
            let batch = queue.drain(config.max_batch_size.max(1), delay);
            if batch.is_empty() {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                continue;
            }

            let mut bytes = 0u64;
            let mut result = Ok(());
            for record in &batch {
                if result.is_ok() {
                    result = write_frame(&mut writer, record);
                    bytes += (FRAME_HEADER + record.payload.len()) as u64;
                }
            }
            let result = result
                .and_then(|()| writer.flush())
                .and_then(|()| writer.get_ref().sync_data());

            {
                let mut s = stats.lock();
                s.total_batches += 1;
                match &result {
                    Ok(()) => {
                        s.total_records += batch.len() as u64;
                        s.total_bytes += bytes;
                    }
                    Err(err) => {
                        s.write_errors += 1;
                        tracing::warn!("audit journal write failed: {err}");
                    }
                }
            }

            if result.is_ok() {
                for record in &batch {
                    record.completion.signal();
                }
            }
        }

        let _ = writer.flush();
    }

    /// Appends a raw record.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Journal` when the queue is full.
    pub fn append(&self, kind: RecordKind, payload: Vec<u8>) -> EconomyResult<JournalHandle> {
        let completion = Arc::new(CompletionSignal::new());
        let lsn = self
            .queue
            .push(kind, payload, Arc::clone(&completion))
            .ok_or_else(|| EconomyError::Journal("queue full (backpressure)".to_string()))?;

        Ok(JournalHandle { completion, lsn })
    }

    /// Appends a sale-like record.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Journal` when the queue is full.
    pub fn record(&self, kind: RecordKind, record: &TradeRecord) -> EconomyResult<JournalHandle> {
        self.append(kind, record.encode())
    }

    /// Waits until everything appended so far is written.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::Journal` on backpressure or timeout.
    pub fn flush(&self, timeout: Duration) -> EconomyResult<()> {
        let handle = self.append(RecordKind::Marker, Vec::new())?;
        if handle.wait_timeout(timeout) {
            Ok(())
        } else {
            Err(EconomyError::Journal("flush timed out".to_string()))
        }
    }

    /// Returns current statistics.
    #[must_use]
    pub fn stats(&self) -> JournalStats {
        self.stats.lock().clone()
    }
}

impl Drop for AuditJournal {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        {
            let _state = self.queue.state.lock();
            self.queue.not_empty.notify_all();
        }
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for AuditJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditJournal")
            .field("next_lsn", &self.queue.state.lock().next_lsn)
            .finish_non_exhaustive()
    }
}

fn write_frame(writer: &mut impl Write, record: &PendingRecord) -> std::io::Result<()> {
    writer.write_all(&record.lsn.to_le_bytes())?;
    writer.write_all(&[record.kind as u8])?;
    writer.write_all(&(record.payload.len() as u32).to_le_bytes())?;
    writer.write_all(&crc32fast::hash(&record.payload).to_le_bytes())?;
    writer.write_all(&record.payload)
}

/// Reads every intact frame from a journal file.
///
/// Reading stops silently at a torn tail or at the first CRC mismatch.
///
/// # Errors
///
/// Returns `EconomyError::Journal` if the file cannot be read.
pub fn read_journal(path: impl AsRef<Path>) -> EconomyResult<Vec<JournalFrame>> {
    let path = path.as_ref();
    let bytes = read_bytes(path)?;
    Ok(scan_frames(&bytes, path)?.0)
}

/// Truncates everything after the last intact frame and returns the next LSN.
fn recover_tail(path: &Path) -> EconomyResult<u64> {
    let bytes = read_bytes(path)?;
    let (frames, valid_len) = scan_frames(&bytes, path)?;

    if valid_len < bytes.len() {
        tracing::warn!(
            "journal {}: dropping {} bytes of torn tail",
            path.display(),
            bytes.len() - valid_len
        );
        OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|file| {
                file.set_len(valid_len as u64)?;
                file.sync_all()
            })
            .map_err(|e| EconomyError::Journal(format!("failed to truncate {}: {e}", path.display())))?;
    }

    Ok(frames.last().map_or(0, |frame| frame.lsn + 1))
}

fn read_bytes(path: &Path) -> EconomyResult<Vec<u8>> {
    let mut bytes = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut bytes))
        .map_err(|e| EconomyError::Journal(format!("failed to read {}: {e}", path.display())))?;
    Ok(bytes)
}

/// Intact frames plus the byte length they cover.
fn scan_frames(bytes: &[u8], path: &Path) -> EconomyResult<(Vec<JournalFrame>, usize)> {
    let mut frames = Vec::new();
    let mut rest = bytes;
    while rest.len() >= FRAME_HEADER {
        let mut header = Cursor(&rest[..FRAME_HEADER]);
        let lsn = header.u64()?;
        let kind_byte = header.take::<1>()?[0];
        let len = header.u32()? as usize;
        let crc = header.u32()?;

        let body = &rest[FRAME_HEADER..];
        if body.len() < len {
            break;
        }
        let payload = &body[..len];
        let Some(kind) = RecordKind::from_u8(kind_byte) else {
            tracing::warn!("journal {}: unknown record kind {kind_byte} at lsn {lsn}", path.display());
            break;
        };
        if crc32fast::hash(payload) != crc {
            tracing::warn!("journal {}: checksum mismatch at lsn {lsn}", path.display());
            break;
        }

        frames.push(JournalFrame {
            lsn,
            kind,
            payload: payload.to_vec(),
        });
        rest = &body[len..];
    }
    Ok((frames, bytes.len() - rest.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemSignature;
    use std::path::PathBuf;

    fn temp_journal_path(tag: &str) -> PathBuf {
        let id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("spawnvault_journal_{tag}_{id}.log"))
    }

    fn sale(spawner: u64) -> TradeRecord {
        TradeRecord::from_stacks(
            SpawnerId(spawner),
            ActorId(7),
            FixedPoint::from_whole(250),
            &[ItemStack::new(ItemSignature::of("bone"), 100)],
        )
    }

    #[test]
    fn test_append_and_read_back() {
        let path = temp_journal_path("basic");
        {
            let journal = AuditJournal::open(&path, JournalConfig::default()).unwrap();
            let handle = journal.record(RecordKind::Sale, &sale(1)).unwrap();
            assert!(handle.wait_timeout(Duration::from_secs(5)));
            journal.flush(Duration::from_secs(5)).unwrap();
        }

        let frames = read_journal(&path).unwrap();
        assert_eq!(frames[0].kind, RecordKind::Sale);
        let decoded = TradeRecord::decode(&frames[0].payload).unwrap();
        assert_eq!(decoded, sale(1));
        assert_eq!(decoded.item_count(), 100);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_reopen_continues_lsn() {
        let path = temp_journal_path("reopen");
        {
            let journal = AuditJournal::open(&path, JournalConfig::default()).unwrap();
            journal.record(RecordKind::Sale, &sale(1)).unwrap();
            journal.flush(Duration::from_secs(5)).unwrap();
        }
        {
            let journal = AuditJournal::open(&path, JournalConfig::default()).unwrap();
            let handle = journal.record(RecordKind::Withdrawal, &sale(2)).unwrap();
            assert_eq!(handle.lsn, 2);
            journal.flush(Duration::from_secs(5)).unwrap();
        }

        let lsns: Vec<_> = read_journal(&path).unwrap().iter().map(|f| f.lsn).collect();
        assert_eq!(lsns, vec![0, 1, 2, 3]);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_corrupt_tail_is_ignored() {
        let path = temp_journal_path("corrupt");
        {
            let journal = AuditJournal::open(&path, JournalConfig::default()).unwrap();
            journal.record(RecordKind::Sale, &sale(1)).unwrap();
            journal.record(RecordKind::Sale, &sale(2)).unwrap();
            journal.flush(Duration::from_secs(5)).unwrap();
        }

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        bytes.extend_from_slice(&[1, 2, 3]);
        std::fs::write(&path, &bytes).unwrap();

        let frames = read_journal(&path).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(TradeRecord::decode(&frames[1].payload).unwrap().spawner, SpawnerId(2));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_reopen_truncates_torn_tail() {
        let path = temp_journal_path("torn");
        {
            let journal = AuditJournal::open(&path, JournalConfig::default()).unwrap();
            journal.record(RecordKind::Sale, &sale(1)).unwrap();
            journal.flush(Duration::from_secs(5)).unwrap();
        }
        let intact = std::fs::metadata(&path).unwrap().len();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0xAB; 10]);
        std::fs::write(&path, &bytes).unwrap();

        {
            let journal = AuditJournal::open(&path, JournalConfig::default()).unwrap();
            assert_eq!(std::fs::metadata(&path).unwrap().len(), intact);
            let handle = journal.record(RecordKind::Sale, &sale(2)).unwrap();
            assert_eq!(handle.lsn, 2);
            journal.flush(Duration::from_secs(5)).unwrap();
        }

        let spawners: Vec<_> = read_journal(&path)
            .unwrap()
            .iter()
            .filter(|f| f.kind == RecordKind::Sale)
            .map(|f| TradeRecord::decode(&f.payload).unwrap().spawner)
            .collect();
        assert_eq!(spawners, vec![SpawnerId(1), SpawnerId(2)]);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_concurrent_appends_stay_in_lsn_order() {
        let path = temp_journal_path("order");
        {
            let journal = Arc::new(AuditJournal::open(&path, JournalConfig::default()).unwrap());
            let writers: Vec<_> = (0..8)
                .map(|t| {
                    let journal = Arc::clone(&journal);
                    thread::spawn(move || {
                        for i in 0..100 {
                            journal.record(RecordKind::Sale, &sale(t * 1_000 + i)).unwrap();
                        }
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }
            journal.flush(Duration::from_secs(5)).unwrap();
        }

        let lsns: Vec<_> = read_journal(&path).unwrap().iter().map(|f| f.lsn).collect();
        assert_eq!(lsns.len(), 801);
        assert!(lsns.windows(2).all(|pair| pair[1] == pair[0] + 1));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_backpressure() {
        let path = temp_journal_path("full");
        let config = JournalConfig {
            max_batch_size: 1,
            max_batch_delay_ms: 1_000,
            queue_capacity: 1,
        };
        let journal = AuditJournal::open(&path, config).unwrap();

        let results: Vec<_> = (0..64)
            .map(|i| journal.record(RecordKind::Sale, &sale(i)).is_ok())
            .collect();
        assert!(results[0]);

        journal.flush(Duration::from_secs(5)).ok();
        drop(journal);
        std::fs::remove_file(&path).ok();
    }
}
