//! Cache configuration.
//!
//! `Settings` is immutable once built: both [`Settings::new`] and
//! [`Settings::from_yaml`] funnel through the same validating constructor so
//! there is exactly one place the range checks and the `fsMax/fsFiles >= 100`
//! cross-check live.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Eviction strategy for the L1 memory cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvictionStrategy {
    Fifo,
    Lru,
    Lfu,
}

impl std::fmt::Display for EvictionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EvictionStrategy::Fifo => "FIFO",
            EvictionStrategy::Lru => "LRU",
            EvictionStrategy::Lfu => "LFU",
        };
        write!(f, "{name}")
    }
}

/// Raw, unvalidated configuration as it would be deserialized from a file.
///
/// Kept separate from [`Settings`] so a malformed file produces a
/// `ConfigError` pointing at the actual violated constraint rather than a
/// deserialization error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsFile {
    pub strategy: EvictionStrategy,
    pub memory_cache_max_size: u64,
    pub fs_cache_max_size: u64,
    pub fs_cache_files_count: u64,
    pub fs_cache_dir_path: PathBuf,
}

/// Validated, immutable cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    strategy: EvictionStrategy,
    mem_max: u64,
    fs_max: u64,
    fs_files: u64,
    fs_dir: PathBuf,
}

const MEM_MAX_RANGE: std::ops::RangeInclusive<u64> = 5..=1_000_000;
const FS_MAX_RANGE: std::ops::RangeInclusive<u64> = 100..=1_000_000;
const FS_FILES_RANGE: std::ops::RangeInclusive<u64> = 2..=1_000;
const FS_FILE_MIN: u64 = 100;

impl Settings {
    /// Build and validate settings. This is the single entry point every
    /// other constructor (file loading, CLI parsing) funnels through.
    pub fn new(
        strategy: EvictionStrategy,
        mem_max: u64,
        fs_max: u64,
        fs_files: u64,
        fs_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        if !MEM_MAX_RANGE.contains(&mem_max) {
            return Err(Error::ConfigError(format!(
                "memoryCacheMaxSize {mem_max} out of range {MEM_MAX_RANGE:?}"
            )));
        }
        if !FS_MAX_RANGE.contains(&fs_max) {
            return Err(Error::ConfigError(format!(
                "fsCacheMaxSize {fs_max} out of range {FS_MAX_RANGE:?}"
            )));
        }
        if !FS_FILES_RANGE.contains(&fs_files) {
            return Err(Error::ConfigError(format!(
                "fsCacheFilesCount {fs_files} out of range {FS_FILES_RANGE:?}"
            )));
        }
        if fs_max / fs_files < FS_FILE_MIN {
            return Err(Error::ConfigError(format!(
                "fsCacheMaxSize / fsCacheFilesCount must be >= {FS_FILE_MIN}, got {}",
                fs_max / fs_files
            )));
        }

        let fs_dir = fs_dir.into();
        if !fs_dir.is_dir() {
            return Err(Error::ConfigError(format!(
                "fsCacheDirPath {} is not an existing directory",
                fs_dir.display()
            )));
        }

        Ok(Self {
            strategy,
            mem_max,
            fs_max,
            fs_files,
            fs_dir,
        })
    }

    /// Load and validate settings from a YAML file.
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let file: SettingsFile = serde_yaml::from_str(&text)
            .map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))?;
        Self::new(
            file.strategy,
            file.memory_cache_max_size,
            file.fs_cache_max_size,
            file.fs_cache_files_count,
            file.fs_cache_dir_path,
        )
    }

    pub fn strategy(&self) -> EvictionStrategy {
        self.strategy
    }

    pub fn mem_max(&self) -> u64 {
        self.mem_max
    }

    pub fn fs_max(&self) -> u64 {
        self.fs_max
    }

    pub fn fs_files(&self) -> u64 {
        self.fs_files
    }

    pub fn fs_dir(&self) -> &Path {
        &self.fs_dir
    }

    /// `fsFileMax := fsMax / fsFiles`, the per-file byte ceiling.
    pub fn fs_file_max(&self) -> u64 {
        self.fs_max / self.fs_files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn valid_settings() {
        let dir = tmp_dir();
        let s = Settings::new(EvictionStrategy::Lfu, 100, 10_000, 10, dir.path()).unwrap();
        assert_eq!(s.fs_file_max(), 1_000);
        assert_eq!(s.strategy(), EvictionStrategy::Lfu);
    }

    #[test]
    fn rejects_mem_max_out_of_range() {
        let dir = tmp_dir();
        assert!(Settings::new(EvictionStrategy::Fifo, 1, 10_000, 10, dir.path()).is_err());
        assert!(Settings::new(EvictionStrategy::Fifo, 2_000_000, 10_000, 10, dir.path()).is_err());
    }

    #[test]
    fn rejects_fs_max_fs_files_cross_check() {
        let dir = tmp_dir();
        // 100 / 2 = 50 < 100
        assert!(Settings::new(EvictionStrategy::Fifo, 100, 100, 2, dir.path()).is_err());
    }

    #[test]
    fn rejects_missing_dir() {
        let err = Settings::new(
            EvictionStrategy::Fifo,
            100,
            10_000,
            10,
            "/no/such/directory/hopefully",
        );
        assert!(err.is_err());
    }

    #[test]
    fn loads_from_yaml() {
        let dir = tmp_dir();
        // Keys are camelCase, matching spec.md §6's literal config contract
        // (inherited from the Java property names).
        let yaml = format!(
            "strategy: LFU\nmemoryCacheMaxSize: 50\nfsCacheMaxSize: 5000\nfsCacheFilesCount: 5\nfsCacheDirPath: {:?}\n",
            dir.path()
        );
        let file = dir.path().join("settings.yaml");
        std::fs::write(&file, yaml).unwrap();
        let s = Settings::from_yaml(&file).unwrap();
        assert_eq!(s.mem_max(), 50);
        assert_eq!(s.fs_files(), 5);
    }
}
