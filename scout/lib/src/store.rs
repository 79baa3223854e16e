//! Registry persistence.
//!
//! The registry is stored as a single schema-versioned JSON document with
//! file locking for safe concurrent access. Writes go to a temporary file in
//! the same directory and are then renamed over the target, so readers never
//! see a half-written registry. The summary of the latest discovery run is
//! kept in a sibling `<registry>.last-run` file under the same lock.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::report::RunReport;
use crate::seed::seed_registry;
use crate::types::Registry;

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Default registry file, relative to the user cache directory.
const DEFAULT_REGISTRY_FILE: &str = "scout/registry.json";

/// Storage backend for the registry.
pub trait RegistryStore: Send + Sync {
    /// Loads the persisted registry. `Ok(None)` means nothing was stored yet.
    ///
    /// ## Errors
    ///
    /// Returns an error if reading or parsing fails, or if the stored schema
    /// version is not [`SCHEMA_VERSION`].
    fn load(&self) -> Result<Option<Registry>, StoreError>;

    /// Replaces the persisted registry.
    ///
    /// ## Errors
    ///
    /// Returns an error if writing fails.
    fn save(&self, registry: &Registry) -> Result<(), StoreError>;

    /// Loads the summary of the most recent discovery run, if one was kept.
    ///
    /// ## Errors
    ///
    /// Returns an error if reading or parsing fails.
    fn load_last_run(&self) -> Result<Option<RunReport>, StoreError> {
        Ok(None)
    }

    /// Records the summary of a discovery run. Stores that keep no history
    /// ignore it.
    ///
    /// ## Errors
    ///
    /// Returns an error if writing fails.
    fn save_last_run(&self, _run: &RunReport) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct PersistedRef<'a> {
    schema_version: u32,
    registry: &'a Registry,
}

#[derive(Deserialize)]
struct Persisted {
    schema_version: u32,
    registry: Registry,
}

#[derive(Deserialize)]
struct VersionOnly {
    schema_version: u32,
}

#[derive(Serialize)]
struct LastRunRef<'a> {
    schema_version: u32,
    run: &'a RunReport,
}

#[derive(Deserialize)]
struct LastRun {
    run: RunReport,
}

/// JSON file registry storage.
///
/// ## Examples
///
/// ```no_run
/// use chrono::Utc;
/// use scout_lib::{seed_registry, JsonRegistryStore, RegistryStore};
///
/// let store = JsonRegistryStore::new("/tmp/scout-registry.json".into());
/// store.save(&seed_registry(Utc::now())).unwrap();
/// assert!(store.load().unwrap().is_some());
/// ```
#[derive(Debug, Clone)]
pub struct JsonRegistryStore {
    path: PathBuf,
}

impl JsonRegistryStore {
    /// Creates a store at the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default location: `<cache dir>/scout/registry.json`, falling back to
    /// the working directory when no cache directory is known.
    pub fn default_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_REGISTRY_FILE)
    }

    /// Path of the registry file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sidecar(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn lock_path(&self) -> PathBuf {
        self.sidecar(".lock")
    }

    /// Where the last run summary is kept, next to the registry file.
    pub fn last_run_path(&self) -> PathBuf {
        self.sidecar(".last-run")
    }

    /// Reads `path` under the shared lock. `Ok(None)` when it does not exist.
    fn read_locked(&self, path: &Path) -> Result<Option<String>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let lock = self.open_lock()?;
        lock.lock_shared().map_err(|_| StoreError::Lock)?;
        let read = std::fs::read_to_string(path);
        lock.unlock().map_err(|_| StoreError::Lock)?;
        match read {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces `path` with `value` as pretty JSON under the exclusive lock.
    fn write_locked<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let lock = self.open_lock()?;
        lock.lock_exclusive().map_err(|_| StoreError::Lock)?;

        let result = (|| -> Result<(), StoreError> {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let mut temp = NamedTempFile::new_in(dir)?;
            {
                let mut writer = BufWriter::new(temp.as_file_mut());
                serde_json::to_writer_pretty(&mut writer, value)?;
                writer.write_all(b"\n")?;
                writer.flush()?;
            }
            temp.as_file().sync_all()?;
            temp.persist(path).map_err(|e| StoreError::Io(e.error))?;
            Ok(())
        })();

        lock.unlock().map_err(|_| StoreError::Lock)?;
        result
    }

    fn open_lock(&self) -> Result<File, StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?)
    }
}

impl RegistryStore for JsonRegistryStore {
    fn load(&self) -> Result<Option<Registry>, StoreError> {
        let Some(contents) = self.read_locked(&self.path)? else {
            return Ok(None);
        };

        // Check the version before the full shape so a future layout is
        // reported as a mismatch rather than a parse failure.
        let VersionOnly { schema_version } = serde_json::from_str(&contents)?;
        if schema_version != SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                found: schema_version,
                expected: SCHEMA_VERSION,
            });
        }

        let persisted: Persisted = serde_json::from_str(&contents)?;
        debug_assert_eq!(persisted.schema_version, SCHEMA_VERSION);
        Ok(Some(persisted.registry))
    }

    fn save(&self, registry: &Registry) -> Result<(), StoreError> {
        self.write_locked(
            &self.path,
            &PersistedRef {
                schema_version: SCHEMA_VERSION,
                registry,
            },
        )
    }

    fn load_last_run(&self) -> Result<Option<RunReport>, StoreError> {
        let Some(contents) = self.read_locked(&self.last_run_path())? else {
            return Ok(None);
        };
        let VersionOnly { schema_version } = serde_json::from_str(&contents)?;
        if schema_version != SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                found: schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        let LastRun { run } = serde_json::from_str(&contents)?;
        Ok(Some(run))
    }

    fn save_last_run(&self, run: &RunReport) -> Result<(), StoreError> {
        self.write_locked(
            &self.last_run_path(),
            &LastRunRef {
                schema_version: SCHEMA_VERSION,
                run,
            },
        )
    }
}

/// Why the engine started from the seed registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SeedReason {
    /// No registry file existed.
    Missing,
    /// The file could not be read or parsed. It will be overwritten.
    Unreadable {
        /// What went wrong.
        message: String,
    },
    /// The file uses another schema version. Writes are refused until reset.
    SchemaMismatch {
        /// Version found on disk.
        found: u32,
        /// Version this build understands.
        expected: u32,
    },
}

/// Where the in-memory registry came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "origin")]
pub enum RegistryOrigin {
    /// Loaded from the store.
    Persisted,
    /// Built from the seed list.
    Seeded(SeedReason),
}

impl RegistryOrigin {
    /// Returns `true` when writes must be refused.
    pub fn is_fail_closed(&self) -> bool {
        matches!(self, RegistryOrigin::Seeded(SeedReason::SchemaMismatch { .. }))
    }
}

/// Loads the persisted registry, falling back to the seed list.
///
/// Never fails: every load problem becomes a [`RegistryOrigin::Seeded`]
/// reason the caller can act on.
pub fn load_or_seed<S: RegistryStore + ?Sized>(
    store: &S,
    now: DateTime<Utc>,
) -> (Registry, RegistryOrigin) {
    match store.load() {
        Ok(Some(registry)) => {
            info!(entries = registry.len(), "loaded registry");
            (registry, RegistryOrigin::Persisted)
        }
        Ok(None) => {
            info!("no registry yet, starting from seed list");
            (seed_registry(now), RegistryOrigin::Seeded(SeedReason::Missing))
        }
        Err(StoreError::SchemaMismatch { found, expected }) => {
            warn!(found, expected, "registry schema mismatch, refusing writes until reset");
            (
                seed_registry(now),
                RegistryOrigin::Seeded(SeedReason::SchemaMismatch { found, expected }),
            )
        }
        Err(e) => {
            warn!(error = %e, "registry unreadable, starting from seed list");
            (
                seed_registry(now),
                RegistryOrigin::Seeded(SeedReason::Unreadable {
                    message: e.to_string(),
                }),
            )
        }
    }
}
