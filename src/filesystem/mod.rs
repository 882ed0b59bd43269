//! L2: the append-only, file-backed log cache.
//!
//! Records are framed by the codec in `crate::codec` and appended to
//! numbered files (`tlv<########>.fsc`) under a single writable file at a
//! time. A dedicated worker thread drains a bounded queue of `put` tasks so
//! callers never block on disk I/O for writes; `get`/`remove` are
//! synchronous and go straight to the file, guarded by the same lock the
//! worker uses for appends (see §5 of the design notes: a single mutex
//! serializes all append *and* read paths against each other).

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender, TrySendError};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::codec;
use crate::error::{Error, Result};

fn file_name(number: u32) -> String {
    format!("tlv{number:08}.fsc")
}

/// Parse a `tlv<########>.fsc` file name back into its number.
fn parse_file_number(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("tlv")?.strip_suffix(".fsc")?;
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    file: u32,
    /// Byte offset of the key bytes within `file`.
    offset: u64,
    /// Combined byte length of key + value.
    size: u64,
}

struct LogFile {
    number: u32,
    path: PathBuf,
    file: File,
    size: u64,
}

struct Inner {
    files: BTreeMap<u32, LogFile>,
}

impl Inner {
    fn writable_number(&self) -> Option<u32> {
        self.files.keys().next_back().copied()
    }
}

enum Task {
    Put {
        key: String,
        value: Bytes,
    },
    Flush {
        entries: Vec<(String, Bytes)>,
        completion: Box<dyn FnOnce() + Send>,
    },
}

/// The append-only L2 store.
pub struct FilesystemCache {
    fs_dir: PathBuf,
    fs_max: u64,
    fs_files: u64,
    fs_file_max: u64,
    index: DashMap<String, IndexEntry>,
    inner: Mutex<Inner>,
    queue_tx: Sender<Task>,
    discard_rx: Receiver<Task>,
    /// `true` once `stop`/`shutdown` has been called; normal `put`
    /// submissions are refused from that point on.
    accepting: AtomicBool,
    /// `true` while Stopping: overflow policy flips from caller-blocking to
    /// discard-oldest so the flush-drain cannot itself block on a full queue.
    discard_on_full: AtomicBool,
    interrupted: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    done: (Mutex<bool>, Condvar),
}

const QUEUE_CAPACITY: usize = 100;

impl FilesystemCache {
    /// Replay `fs_dir` and spin up the persistence worker.
    pub fn start(fs_dir: PathBuf, fs_max: u64, fs_files: u64) -> Result<Arc<Self>> {
        let fs_file_max = fs_max / fs_files;
        let index = DashMap::new();
        let files = Self::replay(&fs_dir, fs_max, &index)?;

        let (tx, rx) = crossbeam::channel::bounded(QUEUE_CAPACITY);
        let cache = Arc::new(Self {
            fs_dir,
            fs_max,
            fs_files,
            fs_file_max,
            index,
            inner: Mutex::new(Inner { files }),
            queue_tx: tx,
            discard_rx: rx.clone(),
            accepting: AtomicBool::new(true),
            discard_on_full: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            worker: Mutex::new(None),
            done: (Mutex::new(false), Condvar::new()),
        });

        let worker_cache = Arc::clone(&cache);
        let handle = std::thread::Builder::new()
            .name("l2-persistence".into())
            .spawn(move || worker_cache.run_worker(rx))
            .expect("failed to spawn l2 persistence worker");
        *cache.worker.lock() = Some(handle);

        Ok(cache)
    }

    fn file_path(&self, number: u32) -> PathBuf {
        self.fs_dir.join(file_name(number))
    }

    /// Replay: enumerate candidate files, accept newest-first up to
    /// `fs_max` bytes, replay the accepted set in ascending order, and
    /// delete whatever was rejected.
    fn replay(
        fs_dir: &Path,
        fs_max: u64,
        index: &DashMap<String, IndexEntry>,
    ) -> Result<BTreeMap<u32, LogFile>> {
        let mut candidates: Vec<(u32, PathBuf, u64)> = Vec::new();
        for entry in std::fs::read_dir(fs_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(number) = parse_file_number(name) else {
                continue;
            };
            let size = entry.metadata()?.len();
            candidates.push((number, entry.path(), size));
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0)); // descending by number

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        let mut total: u64 = 0;
        for (number, path, size) in candidates {
            if total + size <= fs_max {
                total += size;
                accepted.push((number, path));
            } else {
                rejected.push(path);
            }
        }
        for path in rejected {
            let _ = std::fs::remove_file(path);
        }
        accepted.sort_by_key(|(number, _)| *number); // ascending for replay

        let mut replay_failed = false;
        for (number, path) in &accepted {
            if let Err(e) = Self::replay_one_file(*number, path, index) {
                tracing::warn!(file = %path.display(), error = %e, "L2 replay failed for file, purging index");
                replay_failed = true;
                break;
            }
        }
        if replay_failed {
            // Pessimistic: a failure anywhere invalidates everything
            // accumulated so far, since a lost tombstone could otherwise
            // resurrect a removed key.
            index.clear();
        }

        let mut files = BTreeMap::new();
        let writable_number = accepted.last().map(|(n, _)| *n).unwrap_or(1);
        for (number, path) in &accepted {
            let read_write = *number == writable_number;
            let file = OpenOptions::new()
                .read(true)
                .write(read_write)
                .append(read_write)
                .open(path)?;
            let size = file.metadata()?.len();
            files.insert(
                *number,
                LogFile {
                    number: *number,
                    path: path.clone(),
                    file,
                    size,
                },
            );
        }
        if files.is_empty() {
            let path = fs_dir.join(file_name(1));
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .append(true)
                .open(&path)?;
            files.insert(
                1,
                LogFile {
                    number: 1,
                    path,
                    file,
                    size: 0,
                },
            );
        }
        Ok(files)
    }

    fn replay_one_file(
        number: u32,
        path: &Path,
        index: &DashMap<String, IndexEntry>,
    ) -> Result<()> {
        let bytes = std::fs::read(path)?;
        let mut pos: usize = 0;
        let len = bytes.len();
        while pos + 8 <= len {
            let header = codec::decode_header(&bytes[pos..pos + 8])?;
            let key_start = pos + 8;
            let key_end = key_start + header.key_len as usize;
            let value_end = key_end + header.value_len as usize;
            if value_end > len {
                // Trailing partial record; stop replaying this file.
                break;
            }
            let key = codec::decode_key(&bytes[key_start..key_end])?;
            if header.is_tombstone() {
                index.remove(&key);
            } else {
                index.insert(
                    key,
                    IndexEntry {
                        file: number,
                        offset: key_start as u64,
                        size: (header.key_len + header.value_len) as u64,
                    },
                );
            }
            pos = value_end;
        }
        Ok(())
    }

    fn run_worker(self: Arc<Self>, rx: Receiver<Task>) {
        loop {
            if self.interrupted.load(Ordering::Acquire) {
                break;
            }
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(Task::Put { key, value }) => {
                    if let Err(e) = self.append_put(&key, &value) {
                        tracing::warn!(key = %key, error = %e, "L2 put failed, task dropped");
                    }
                }
                Ok(Task::Flush {
                    entries,
                    completion,
                }) => {
                    for (key, value) in entries {
                        if let Err(e) = self.append_put(&key, &value) {
                            tracing::warn!(key = %key, error = %e, "L2 flush entry skipped");
                        }
                    }
                    self.close_all_handles();
                    completion();
                    break;
                }
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        self.close_all_handles();
        *self.done.0.lock() = true;
        self.done.1.notify_all();
    }

    fn close_all_handles(&self) {
        self.inner.lock().files.clear();
    }

    fn enqueue(&self, mut task: Task) {
        if self.discard_on_full.load(Ordering::Acquire) {
            for _ in 0..QUEUE_CAPACITY + 1 {
                match self.queue_tx.try_send(task) {
                    Ok(()) => return,
                    Err(TrySendError::Full(t)) => {
                        let _ = self.discard_rx.try_recv();
                        task = t;
                    }
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
        } else {
            let _ = self.queue_tx.send(task);
        }
    }

    /// Enqueue a `put`. Non-serializable values are the host's concern
    /// (this crate only ever receives already-serialized `Bytes`); a record
    /// that's too big for a single file is logged and dropped by the
    /// worker rather than surfaced here, matching the data-plane-failures
    /// policy in the error design.
    pub fn put(&self, key: String, value: Bytes) {
        if !self.accepting.load(Ordering::Acquire) {
            return;
        }
        self.enqueue(Task::Put { key, value });
    }

    /// Synchronous read straight from the index and the target file.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let entry = *self.index.get(key)?;
        let inner = self.inner.lock();
        let log_file = inner.files.get(&entry.file)?;
        let mut handle = log_file.file.try_clone().ok()?;
        handle.seek(SeekFrom::Start(entry.offset)).ok()?;
        let mut buf = vec![0u8; entry.size as usize];
        handle.read_exact(&mut buf).ok()?;
        let key_len = key.as_bytes().len();
        if key_len as u64 > entry.size {
            return None;
        }
        Some(Bytes::copy_from_slice(&buf[key_len..]))
    }

    /// Synchronous remove: append a tombstone, then drop from the index. A
    /// remove for a non-indexed key is a no-op (no tombstone is written).
    ///
    /// The index entry is held back until the tombstone append actually
    /// succeeds and is restored on failure, so a disk error or an
    /// oversized key can't make a key vanish from this session's index
    /// without a durable tombstone backing it up — otherwise replay after
    /// restart would find the old, non-tombstone record and resurrect a
    /// key that looked removed.
    pub fn remove(&self, key: &str) -> Result<()> {
        let Some((_, entry)) = self.index.remove(key) else {
            return Ok(());
        };

        let result = (|| -> Result<()> {
            let tombstone = codec::encode(key, None, self.fs_file_max as usize)?;
            let mut inner = self.inner.lock();
            self.ensure_capacity_for(&mut inner, tombstone.len())?;
            self.append_bytes(&mut inner, &tombstone)?;
            Ok(())
        })();

        if let Err(ref e) = result {
            tracing::warn!(key = %key, error = %e, "L2 tombstone append failed, restoring index entry");
            self.index.insert(key.to_string(), entry);
        }
        result
    }

    fn append_put(&self, key: &str, value: &Bytes) -> Result<()> {
        let encoded = codec::encode(key, Some(value), self.fs_file_max as usize)?;
        let mut inner = self.inner.lock();
        self.ensure_capacity_for(&mut inner, encoded.len())?;
        let (number, offset) = self.append_bytes(&mut inner, &encoded)?;
        self.index.insert(
            key.to_string(),
            IndexEntry {
                file: number,
                offset: offset + 8,
                size: (encoded.len() - 8) as u64,
            },
        );
        Ok(())
    }

    fn ensure_capacity_for(&self, inner: &mut Inner, record_len: usize) -> Result<()> {
        let needs_new_file = match inner.writable_number() {
            Some(n) => inner.files[&n].size + record_len as u64 > self.fs_file_max,
            None => true,
        };
        if needs_new_file {
            self.rotate(inner)?;
        }
        Ok(())
    }

    /// Retire oldest files until the retention bound holds, then open a
    /// fresh writable file numbered one past the current highest.
    fn rotate(&self, inner: &mut Inner) -> Result<()> {
        loop {
            let total: u64 = inner.files.values().map(|f| f.size).sum();
            let count = inner.files.len() as u64;
            if total + self.fs_file_max <= self.fs_max && count < self.fs_files {
                break;
            }
            let oldest = match inner.files.keys().next().copied() {
                Some(n) => n,
                None => break,
            };
            let highest = inner.writable_number().unwrap_or(oldest);
            if oldest == highest {
                // Never retire the file we are about to write to.
                break;
            }
            if let Some(victim) = inner.files.remove(&oldest) {
                drop(victim.file);
                let _ = std::fs::remove_file(&victim.path);
                self.index.retain(|_, v| v.file != oldest);
            }
        }

        let next_number = inner.writable_number().map(|n| n + 1).unwrap_or(1);
        let path = self.file_path(next_number);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .append(true)
            .open(&path)?;
        inner.files.insert(
            next_number,
            LogFile {
                number: next_number,
                path,
                file,
                size: 0,
            },
        );
        Ok(())
    }

    fn append_bytes(&self, inner: &mut Inner, data: &[u8]) -> Result<(u32, u64)> {
        let number = inner.writable_number().ok_or_else(|| {
            Error::Io(std::io::Error::other("no writable L2 file"))
        })?;
        let log_file = inner.files.get_mut(&number).unwrap();
        let offset = log_file.size;
        log_file.file.write_all(data)?;
        log_file.file.flush()?;
        log_file.size += data.len() as u64;
        Ok((number, offset))
    }

    /// Submit the final flush task (a best-effort append of `entries`),
    /// switch the overflow policy to discard-oldest so the drain can't
    /// block on a full queue, and refuse any further normal `put`
    /// submissions from this point on.
    pub fn stop(&self, entries: Vec<(String, Bytes)>, on_stopped: impl FnOnce() + Send + 'static) {
        self.discard_on_full.store(true, Ordering::Release);
        self.accepting.store(false, Ordering::Release);
        self.enqueue(Task::Flush {
            entries,
            completion: Box::new(on_stopped),
        });
    }

    /// Interrupt the worker and wait up to `timeout` for it to finish; no
    /// flush is attempted. Returns whether it finished in time.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.accepting.store(false, Ordering::Release);
        self.interrupted.store(true, Ordering::Release);
        let mut done = self.done.0.lock();
        if !*done {
            self.done.1.wait_for(&mut done, timeout);
        }
        *done
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Debug snapshot: `key -> "file/offset/size"`.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.index
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    format!("{}/{}/{}", e.value().file, e.value().offset, e.value().size),
                )
            })
            .collect()
    }

    pub fn describe(&self) -> String {
        format!(
            "FilesystemCache(dir={}, fsMax={}, fsFiles={}, indexed={})",
            self.fs_dir.display(),
            self.fs_max,
            self.fs_files,
            self.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_until(mut f: impl FnMut() -> bool, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        f()
    }

    #[test]
    fn put_then_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::start(dir.path().to_path_buf(), 10_000, 10).unwrap();
        cache.put("k".into(), Bytes::from_static(b"v"));
        assert!(wait_until(|| cache.get("k").is_some(), Duration::from_secs(2)));
        assert_eq!(cache.get("k"), Some(Bytes::from_static(b"v")));
    }

    #[test]
    fn remove_then_get_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::start(dir.path().to_path_buf(), 10_000, 10).unwrap();
        cache.put("k".into(), Bytes::from_static(b"v"));
        assert!(wait_until(|| cache.get("k").is_some(), Duration::from_secs(2)));
        cache.remove("k").unwrap();
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn remove_of_unindexed_key_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::start(dir.path().to_path_buf(), 10_000, 10).unwrap();
        cache.remove("never-there").unwrap();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn replay_restores_value_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = FilesystemCache::start(dir.path().to_path_buf(), 10_000, 2).unwrap();
            cache.put("k".into(), Bytes::from_static(b"v"));
            assert!(wait_until(|| cache.get("k").is_some(), Duration::from_secs(2)));
            cache.shutdown(Duration::from_secs(2));
        }
        let cache = FilesystemCache::start(dir.path().to_path_buf(), 10_000, 2).unwrap();
        assert_eq!(cache.get("k"), Some(Bytes::from_static(b"v")));
    }

    #[test]
    fn replay_honors_tombstone_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = FilesystemCache::start(dir.path().to_path_buf(), 10_000, 2).unwrap();
            cache.put("k".into(), Bytes::from_static(b"v"));
            assert!(wait_until(|| cache.get("k").is_some(), Duration::from_secs(2)));
            cache.remove("k").unwrap();
            cache.shutdown(Duration::from_secs(2));
        }
        let cache = FilesystemCache::start(dir.path().to_path_buf(), 10_000, 2).unwrap();
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn rotation_keeps_total_size_within_bound() {
        let dir = tempfile::tempdir().unwrap();
        // fsMax=2000, fsFiles=10 -> fsFileMax=200
        let cache = FilesystemCache::start(dir.path().to_path_buf(), 2_000, 10).unwrap();
        for i in 0..30 {
            let value = vec![0u8; 50];
            cache.put(format!("key-{i:03}"), Bytes::from(value));
        }
        assert!(wait_until(
            || cache.get("key-029").is_some(),
            Duration::from_secs(5)
        ));
        let total: u64 = dir
            .path()
            .read_dir()
            .unwrap()
            .map(|e| e.unwrap().metadata().unwrap().len())
            .sum();
        assert!(total <= 2_000, "total size {total} exceeded fsMax");
    }

    #[test]
    fn shutdown_returns_true_when_worker_finishes_quickly() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::start(dir.path().to_path_buf(), 10_000, 10).unwrap();
        assert!(cache.shutdown(Duration::from_secs(2)));
    }

    #[test]
    fn file_naming_pattern() {
        assert_eq!(file_name(1), "tlv00000001.fsc");
        assert_eq!(parse_file_number("tlv00000001.fsc"), Some(1));
        assert_eq!(parse_file_number("notalogfile.txt"), None);
    }
}
