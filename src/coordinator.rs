//! The coordinator: owns L1 and L2, routes operations under a small state
//! machine, and wires L1 evictions into L2 via a late-bound sink.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::filesystem::FilesystemCache;
use crate::memory::fifo::FifoCache;
use crate::memory::lfu::LfuCache;
use crate::memory::lru::LruCache;
use crate::memory::{EvictionSink, MemoryCache};
use crate::settings::{EvictionStrategy, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Starting,
    Working,
    Stopping,
    Stopped,
}

/// Forwards L1 evictions into L2. Built before L1 (which needs a sink at
/// construction time) and before L2 exists; the `OnceLock` is filled in once
/// `start()` brings L2 up, breaking the construction cycle between the
/// coordinator and its own sink.
struct LateBoundSink {
    l2: OnceLock<Arc<FilesystemCache>>,
}

impl EvictionSink for LateBoundSink {
    fn on_evict(&self, key: String, value: Bytes) {
        if let Some(l2) = self.l2.get() {
            l2.put(key, value);
        }
    }
}

/// Owns L1 and L2 and routes `put`/`get`/`remove` through them under a
/// `Created -> Starting -> Working -> Stopping -> Stopped` state machine.
/// Operations other than `start`/`stop`/`shutdown` are silent no-ops outside
/// `Working`.
pub struct Coordinator {
    settings: Settings,
    state: Arc<Mutex<State>>,
    l1: Arc<dyn MemoryCache>,
    sink: Arc<LateBoundSink>,
    l2: Mutex<Option<Arc<FilesystemCache>>>,
}

impl Coordinator {
    /// Build a coordinator from already-validated settings. `settings`
    /// having been constructed via [`Settings::new`]/[`Settings::from_yaml`]
    /// is what actually raises `ConfigError`; by the time it reaches here
    /// validation has already happened.
    pub fn create(settings: Settings) -> Self {
        let sink = Arc::new(LateBoundSink {
            l2: OnceLock::new(),
        });
        let mem_max = settings.mem_max() as usize;
        let l1: Arc<dyn MemoryCache> = match settings.strategy() {
            EvictionStrategy::Fifo => Arc::new(FifoCache::new(mem_max, sink.clone())),
            EvictionStrategy::Lru => Arc::new(LruCache::new(mem_max, sink.clone())),
            EvictionStrategy::Lfu => Arc::new(LfuCache::new(mem_max, sink.clone())),
        };
        Self {
            settings,
            state: Arc::new(Mutex::new(State::Created)),
            l1,
            sink,
            l2: Mutex::new(None),
        }
    }

    /// `Created -> Starting -> Working`, or `Starting -> Stopped` if L2
    /// replay fails fatally.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != State::Created {
                return Err(Error::LifecycleError(format!(
                    "start() called from {:?}",
                    *state
                )));
            }
            *state = State::Starting;
        }

        match FilesystemCache::start(
            self.settings.fs_dir().to_path_buf(),
            self.settings.fs_max(),
            self.settings.fs_files(),
        ) {
            Ok(l2) => {
                let _ = self.sink.l2.set(Arc::clone(&l2));
                *self.l2.lock() = Some(l2);
                *self.state.lock() = State::Working;
                tracing::info!("coordinator started");
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = State::Stopped;
                tracing::error!(error = %e, "L2 replay failed, coordinator stays Stopped");
                Err(Error::StartError(e.to_string()))
            }
        }
    }

    fn is_working(&self) -> bool {
        *self.state.lock() == State::Working
    }

    fn l2_handle(&self) -> Option<Arc<FilesystemCache>> {
        self.l2.lock().clone()
    }

    /// `L1.put(k,v)`, then `L2.remove(k)` to invalidate any shadow copy so a
    /// subsequent `get` can't observe a stale L2 value.
    pub fn put(&self, key: String, value: Bytes) {
        if !self.is_working() {
            return;
        }
        self.l1.put(key.clone(), value);
        if let Some(l2) = self.l2_handle() {
            // Failure is already logged inside `remove`; nothing further to do here.
            let _ = l2.remove(&key);
        }
    }

    /// `L1.get(k)`, falling back to `L2.get(k)` on miss.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        if !self.is_working() {
            return None;
        }
        if let Some(v) = self.l1.get(key) {
            return Some(v);
        }
        self.l2_handle().and_then(|l2| l2.get(key))
    }

    /// Remove from both tiers.
    pub fn remove(&self, key: &str) {
        if !self.is_working() {
            return;
        }
        self.l1.remove(key);
        if let Some(l2) = self.l2_handle() {
            // Failure is already logged inside `remove`; nothing further to do here.
            let _ = l2.remove(key);
        }
    }

    pub fn state(&self) -> State {
        *self.state.lock()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn describe(&self) -> String {
        format!(
            "Coordinator(state={:?}, l1={}, l2={})",
            self.state(),
            self.l1.describe(),
            self.l2_handle()
                .map(|l2| l2.describe())
                .unwrap_or_else(|| "FilesystemCache(not started)".to_string())
        )
    }

    /// Empty outside `Working`.
    pub fn mem_snapshot(&self) -> HashMap<String, String> {
        if self.is_working() {
            self.l1.snapshot()
        } else {
            HashMap::new()
        }
    }

    /// Empty outside `Working`.
    pub fn fs_snapshot(&self) -> HashMap<String, String> {
        if self.is_working() {
            self.l2_handle().map(|l2| l2.snapshot()).unwrap_or_default()
        } else {
            HashMap::new()
        }
    }

    /// `Working -> Stopping`, flush remaining L1 contents to L2, then
    /// `Stopping -> Stopped`. `on_stopped` runs on the L2 worker thread once
    /// the drain completes; there is no timeout.
    pub fn stop(&self, on_stopped: impl FnOnce() + Send + 'static) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != State::Working {
                return Err(Error::LifecycleError(format!(
                    "stop() called from {:?}",
                    *state
                )));
            }
            *state = State::Stopping;
        }

        let entries: Vec<(String, Bytes)> = self.l1.live_contents().into_iter().collect();
        match self.l2_handle() {
            Some(l2) => {
                let state_handle = Arc::clone(&self.state);
                l2.stop(entries, move || {
                    *state_handle.lock() = State::Stopped;
                    on_stopped();
                });
            }
            None => {
                *self.state.lock() = State::Stopped;
                on_stopped();
            }
        }
        Ok(())
    }

    /// Interrupt the L2 worker and wait up to `timeout`. Always leaves the
    /// coordinator in `Stopped`, regardless of whether the worker actually
    /// finished within `timeout`. Returns whether it did.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        {
            let mut state = self.state.lock();
            match *state {
                State::Stopped => return true,
                State::Working => *state = State::Stopping,
                _ => {}
            }
        }
        let completed = match self.l2_handle() {
            Some(l2) => l2.shutdown(timeout),
            None => true,
        };
        *self.state.lock() = State::Stopped;
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &std::path::Path, strategy: EvictionStrategy) -> Settings {
        Settings::new(strategy, 5, 10_000, 10, dir).unwrap()
    }

    #[test]
    fn lifecycle_rejects_operations_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let c = Coordinator::create(settings(dir.path(), EvictionStrategy::Fifo));
        c.put("k".into(), Bytes::from_static(b"v"));
        assert_eq!(c.get("k"), None);
        assert_eq!(c.state(), State::Created);
    }

    #[test]
    fn scenario_put_then_get_roundtrips_in_working_state() {
        let dir = tempfile::tempdir().unwrap();
        let c = Coordinator::create(settings(dir.path(), EvictionStrategy::Lru));
        c.start().unwrap();
        c.put("k".into(), Bytes::from_static(b"v"));
        assert_eq!(c.get("k"), Some(Bytes::from_static(b"v")));
    }

    #[test]
    fn remove_then_get_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let c = Coordinator::create(settings(dir.path(), EvictionStrategy::Lru));
        c.start().unwrap();
        c.put("k".into(), Bytes::from_static(b"v"));
        c.remove("k");
        assert_eq!(c.get("k"), None);
    }

    #[test]
    fn put_invalidates_l2_shadow() {
        let dir = tempfile::tempdir().unwrap();
        let c = Coordinator::create(settings(dir.path(), EvictionStrategy::Fifo));
        c.start().unwrap();
        c.put("k".into(), Bytes::from_static(b"v1"));
        c.put("k".into(), Bytes::from_static(b"v2"));
        assert_eq!(c.get("k"), Some(Bytes::from_static(b"v2")));
    }

    #[test]
    fn double_start_is_a_lifecycle_error() {
        let dir = tempfile::tempdir().unwrap();
        let c = Coordinator::create(settings(dir.path(), EvictionStrategy::Fifo));
        c.start().unwrap();
        assert!(matches!(c.start(), Err(Error::LifecycleError(_))));
    }

    #[test]
    fn stop_outside_working_is_a_lifecycle_error() {
        let dir = tempfile::tempdir().unwrap();
        let c = Coordinator::create(settings(dir.path(), EvictionStrategy::Fifo));
        assert!(matches!(c.stop(|| {}), Err(Error::LifecycleError(_))));
    }

    #[test]
    fn stop_flushes_l1_to_l2_and_reaches_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let c = Coordinator::create(settings(dir.path(), EvictionStrategy::Fifo));
        c.start().unwrap();
        c.put("k".into(), Bytes::from_static(b"v"));

        let (tx, rx) = std::sync::mpsc::channel();
        c.stop(move || {
            let _ = tx.send(());
        })
        .unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(c.state(), State::Stopped);
    }

    #[test]
    fn shutdown_on_idle_coordinator_completes_quickly() {
        let dir = tempfile::tempdir().unwrap();
        let c = Coordinator::create(settings(dir.path(), EvictionStrategy::Fifo));
        c.start().unwrap();
        assert!(c.shutdown(Duration::from_secs(2)));
        assert_eq!(c.state(), State::Stopped);
    }

    #[test]
    fn snapshots_are_empty_outside_working() {
        let dir = tempfile::tempdir().unwrap();
        let c = Coordinator::create(settings(dir.path(), EvictionStrategy::Fifo));
        assert!(c.mem_snapshot().is_empty());
        assert!(c.fs_snapshot().is_empty());
    }
}
