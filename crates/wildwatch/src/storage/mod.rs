//! Storage layer for wildwatch.
//!
//! This module is the persistence adapter: the whole observation collection
//! is serialized as one JSON blob and kept under a fixed key in a `SQLite`
//! key-value table. Every mutation rewrites the blob.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::observation::{now_millis, CreateObservation, Observation, UpdateObservation};

/// Default key of the slot holding the observation collection.
pub const DEFAULT_SLOT_KEY: &str = "wildwatch_observations";

/// Format version written into every blob.
pub const BLOB_VERSION: u32 = 1;

#[derive(Serialize)]
struct BlobOut<'a> {
    version: u32,
    observations: &'a [Observation],
}

/// Accepted on-disk layouts: the versioned envelope, or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum BlobIn {
    Versioned {
        version: u32,
        observations: Vec<Observation>,
    },
    Legacy(Vec<Observation>),
}

/// Persistence adapter for observations.
///
/// Reads are lenient: [`Storage::list`] degrades to an empty collection when
/// the slot is missing, unreadable or corrupt. Writes are strict and always
/// surface failures. Mutations load the collection strictly so that an
/// unreadable blob is never overwritten.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Slot holding the collection.
    key: String,
    /// Database connection.
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            key: DEFAULT_SLOT_KEY.to_string(),
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory storage instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            key: DEFAULT_SLOT_KEY.to_string(),
            conn: Mutex::new(conn),
        })
    }

    /// Use a different slot key for the collection.
    #[must_use]
    pub fn with_slot_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the slot key holding the collection.
    #[must_use]
    pub fn slot_key(&self) -> &str {
        &self.key
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_blob(&self) -> Result<Option<String>> {
        self.conn()
            .query_row(
                "SELECT value FROM slots WHERE key = ?1",
                [&self.key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Error::StorageRead)
    }

    fn decode(&self, blob: &str) -> Result<Vec<Observation>> {
        let corrupt = |message: String| Error::CorruptBlob {
            key: self.key.clone(),
            message,
        };
        match serde_json::from_str::<BlobIn>(blob).map_err(|e| corrupt(e.to_string()))? {
            BlobIn::Versioned {
                version,
                observations,
            } if version <= BLOB_VERSION => Ok(observations),
            BlobIn::Versioned { version, .. } => Err(corrupt(format!(
                "unsupported blob version {version} (expected at most {BLOB_VERSION})"
            ))),
            BlobIn::Legacy(observations) => Ok(observations),
        }
    }

    /// Load the collection, surfacing read and decode failures.
    fn load(&self) -> Result<Vec<Observation>> {
        match self.read_blob()? {
            Some(blob) => self.decode(&blob),
            None => Ok(Vec::new()),
        }
    }

    /// All stored observations, newest first.
    ///
    /// Returns an empty list if nothing has been stored yet, or if the stored
    /// blob cannot be read or parsed. Such failures are logged, not returned.
    #[must_use]
    pub fn list(&self) -> Vec<Observation> {
        match self.load() {
            Ok(observations) => observations,
            Err(e) => {
                warn!("Ignoring unreadable observations: {e}");
                Vec::new()
            }
        }
    }

    /// Overwrite the stored collection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageWrite`] if the write fails.
    pub fn save(&self, all: &[Observation]) -> Result<()> {
        let blob = serde_json::to_string(&BlobOut {
            version: BLOB_VERSION,
            observations: all,
        })?;

        self.conn()
            .execute(
                r"
                INSERT INTO slots (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                ",
                params![self.key, blob],
            )
            .map_err(Error::StorageWrite)?;

        debug!("Saved {} observations under {}", all.len(), self.key);
        Ok(())
    }

    /// Get an observation by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no observation has this id.
    pub fn get(&self, id: &str) -> Result<Observation> {
        self.list()
            .into_iter()
            .find(|obs| obs.id == id)
            .ok_or_else(|| Error::not_found(id))
    }

    /// Create and persist a new observation.
    ///
    /// The record is prepended so the collection stays newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails, the collection cannot be loaded,
    /// or the write fails.
    pub fn create(&self, input: CreateObservation) -> Result<Observation> {
        input.validate()?;
        let mut all = self.load()?;

        let observation = Observation::from_create(input, now_millis());
        all.insert(0, observation.clone());
        self.save(&all)?;

        debug!("Created observation {}", observation.id);
        Ok(observation)
    }

    /// Merge fields into an existing observation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no observation has this id, or an error
    /// if validation, loading or writing fails.
    pub fn update(&self, id: &str, update: UpdateObservation) -> Result<Observation> {
        update.validate()?;
        let mut all = self.load()?;

        let observation = all
            .iter_mut()
            .find(|obs| obs.id == id)
            .ok_or_else(|| Error::not_found(id))?;
        observation.apply(update, now_millis());
        let updated = observation.clone();

        self.save(&all)?;
        debug!("Updated observation {id}");
        Ok(updated)
    }

    /// Delete an observation.
    ///
    /// Deleting a missing id is an error, not a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no observation has this id, or an error
    /// if loading or writing fails.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut all = self.load()?;
        let before = all.len();
        all.retain(|obs| obs.id != id);

        if all.len() == before {
            return Err(Error::not_found(id));
        }

        self.save(&all)?;
        debug!("Deleted observation {id}");
        Ok(())
    }

    /// Observations within `radius_km` of a point.
    ///
    /// Uses the flat-degree approximation of
    /// [`Observation::approx_distance_km`]; accuracy degrades with distance
    /// and latitude.
    #[must_use]
    pub fn nearby(&self, latitude: f64, longitude: f64, radius_km: f64) -> Vec<Observation> {
        self.list()
            .into_iter()
            .filter(|obs| obs.is_within(latitude, longitude, radius_km))
            .collect()
    }

    /// Remove the stored collection entirely.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageWrite`] if the delete fails.
    pub fn clear(&self) -> Result<()> {
        self.conn()
            .execute("DELETE FROM slots WHERE key = ?1", [&self.key])
            .map_err(Error::StorageWrite)?;
        info!("Cleared all observations under {}", self.key);
        Ok(())
    }

    /// Number of stored observations.
    #[must_use]
    pub fn count(&self) -> usize {
        self.list().len()
    }

    /// Get storage statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot cannot be read or the database file
    /// cannot be inspected.
    pub fn stats(&self) -> Result<StorageStats> {
        let blob = self.read_blob()?;
        let blob_bytes = blob.as_ref().map_or(0, String::len);
        let observations = blob
            .as_deref()
            .and_then(|b| self.decode(b).ok())
            .map_or(0, |all| all.len());

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path)?.len()
        };

        Ok(StorageStats {
            observations,
            blob_bytes,
            db_size_bytes,
        })
    }

    /// Make the connection read-only so writes fail.
    #[cfg(test)]
    pub(crate) fn fail_writes(&self) {
        self.conn()
            .execute_batch("PRAGMA query_only = ON;")
            .expect("failed to set query_only");
    }

    /// Store a raw blob, bypassing serialization.
    #[cfg(test)]
    pub(crate) fn put_raw(&self, blob: &str) {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO slots (key, value) VALUES (?1, ?2)",
                params![self.key, blob],
            )
            .expect("failed to write raw blob");
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of decodable observations in the slot.
    pub observations: usize,
    /// Size of the serialized blob in bytes.
    pub blob_bytes: usize,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn fox() -> CreateObservation {
        CreateObservation::new("Renard roux", 45.5, -73.6)
    }

    #[test]
    fn test_list_empty_when_nothing_stored() {
        let storage = create_test_storage();
        assert!(storage.list().is_empty());
        assert_eq!(storage.count(), 0);
    }

    #[test]
    fn test_create_scenario() {
        let storage = create_test_storage();
        let obs = storage.create(fox()).unwrap();

        assert!(!obs.id.is_empty());
        assert_eq!(obs.species, "Renard roux");
        assert_eq!(obs.created_at, obs.updated_at);
        #[allow(clippy::cast_precision_loss)]
        let created = obs.created_at as f64;
        assert!((obs.timestamp - created).abs() < f64::EPSILON);

        assert_eq!(storage.list(), vec![obs]);
    }

    #[test]
    fn test_create_prepends() {
        let storage = create_test_storage();
        let first = storage.create(fox()).unwrap();
        let second = storage
            .create(CreateObservation::new("Orignal", 46.0, -72.0))
            .unwrap();

        let ids: Vec<_> = storage.list().into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn test_create_rejects_blank_species() {
        let storage = create_test_storage();
        let err = storage
            .create(CreateObservation::new("", 0.0, 0.0))
            .unwrap_err();
        assert!(err.is_validation());
        assert!(storage.list().is_empty());
    }

    #[test]
    fn test_update_scenario() {
        let storage = create_test_storage();
        let original = storage.create(fox()).unwrap();

        let updated = storage
            .update(&original.id, UpdateObservation::species("Renard argenté"))
            .unwrap();

        assert_eq!(updated.species, "Renard argenté");
        assert_eq!(updated.id, original.id);
        assert_eq!(updated.created_at, original.created_at);
        assert!((updated.latitude - original.latitude).abs() < f64::EPSILON);
        assert!((updated.longitude - original.longitude).abs() < f64::EPSILON);
        assert!(updated.updated_at > original.updated_at);
        assert_eq!(storage.get(&original.id).unwrap(), updated);
    }

    #[test]
    fn test_update_same_payload_twice() {
        let storage = create_test_storage();
        let original = storage.create(fox()).unwrap();
        let patch = UpdateObservation {
            species: Some("Renard argenté".to_string()),
            description: Some("Near the creek".to_string()),
            ..UpdateObservation::default()
        };

        let first = storage.update(&original.id, patch.clone()).unwrap();
        let second = storage.update(&original.id, patch).unwrap();

        assert!(second.updated_at > first.updated_at);
        let mut normalized = second.clone();
        normalized.updated_at = first.updated_at;
        assert_eq!(normalized, first);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let storage = create_test_storage();
        let err = storage
            .update("xyz", UpdateObservation::species("Loup"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_delete_removes_exactly_one() {
        let storage = create_test_storage();
        let a = storage.create(fox()).unwrap();
        let b = storage.create(fox()).unwrap();
        let c = storage.create(fox()).unwrap();

        storage.delete(&b.id).unwrap();

        let remaining = storage.list();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|o| o.id != b.id));
        assert_eq!(remaining[0].id, c.id);
        assert_eq!(remaining[1].id, a.id);
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let storage = create_test_storage();
        storage.create(fox()).unwrap();

        let err = storage.delete("xyz").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(storage.count(), 1);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let storage = create_test_storage();
        assert!(storage.get("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_nearby_uses_flat_degrees() {
        let storage = create_test_storage();
        let close = storage.create(fox()).unwrap();
        storage
            .create(CreateObservation::new("Caribou", 55.0, -70.0))
            .unwrap();

        let found = storage.nearby(45.55, -73.6, 10.0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, close.id);

        assert!(storage.nearby(0.0, 0.0, 10.0).is_empty());
        assert_eq!(storage.nearby(50.0, -72.0, 2_000.0).len(), 2);
    }

    #[test]
    fn test_corrupt_blob_reads_as_empty() {
        let storage = create_test_storage();
        storage.put_raw("{not json");

        assert!(storage.list().is_empty());
        assert!(storage.get("anything").unwrap_err().is_not_found());
    }

    #[test]
    fn test_corrupt_blob_is_not_overwritten() {
        let storage = create_test_storage();
        storage.put_raw("{not json");

        let err = storage.create(fox()).unwrap_err();
        assert!(matches!(err, Error::CorruptBlob { .. }));
        assert_eq!(storage.stats().unwrap().blob_bytes, "{not json".len());
    }

    #[test]
    fn test_legacy_array_blob_is_read() {
        let storage = create_test_storage();
        storage.put_raw(
            r#"[{"id":"1717000000000k3j9x2a1b","species":"Castor","latitude":45.5,
                "longitude":-73.6,"timestamp":1717000000000,
                "createdAt":1717000000000,"updatedAt":1717000000000}]"#,
        );

        let all = storage.list();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].species, "Castor");

        storage.create(fox()).unwrap();
        assert_eq!(storage.count(), 2);
    }

    #[test]
    fn test_newer_blob_version_is_rejected() {
        let storage = create_test_storage();
        storage.put_raw(r#"{"version":99,"observations":[]}"#);

        assert!(storage.list().is_empty());
        assert!(matches!(
            storage.create(fox()).unwrap_err(),
            Error::CorruptBlob { .. }
        ));
    }

    #[test]
    fn test_saved_blob_is_versioned() {
        let storage = create_test_storage();
        storage.create(fox()).unwrap();

        let blob = storage.read_blob().unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(value["version"], BLOB_VERSION);
        assert_eq!(value["observations"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_write_failure_is_surfaced() {
        let storage = create_test_storage();
        let existing = storage.create(fox()).unwrap();
        storage.fail_writes();

        assert!(matches!(
            storage.create(fox()).unwrap_err(),
            Error::StorageWrite(_)
        ));
        assert!(matches!(
            storage.delete(&existing.id).unwrap_err(),
            Error::StorageWrite(_)
        ));
        assert!(matches!(storage.clear().unwrap_err(), Error::StorageWrite(_)));
        assert_eq!(storage.list(), vec![existing]);
    }

    #[test]
    fn test_read_failure_degrades_to_empty() {
        let storage = create_test_storage();
        storage.create(fox()).unwrap();
        storage.conn().execute_batch("DROP TABLE slots;").unwrap();

        assert!(storage.list().is_empty());
        assert!(matches!(
            storage.create(fox()).unwrap_err(),
            Error::StorageRead(_)
        ));
    }

    #[test]
    fn test_clear() {
        let storage = create_test_storage();
        storage.create(fox()).unwrap();
        storage.create(fox()).unwrap();

        storage.clear().unwrap();
        assert_eq!(storage.count(), 0);
    }

    #[test]
    fn test_slot_keys_are_independent() {
        let storage = create_test_storage();
        storage.create(fox()).unwrap();

        let other = Storage::open_in_memory().unwrap().with_slot_key("other");
        assert_eq!(other.slot_key(), "other");
        assert!(other.list().is_empty());
    }

    #[test]
    fn test_stats() {
        let storage = create_test_storage();
        assert_eq!(
            storage.stats().unwrap(),
            StorageStats {
                observations: 0,
                blob_bytes: 0,
                db_size_bytes: 0,
            }
        );

        storage.create(fox()).unwrap();
        let stats = storage.stats().unwrap();
        assert_eq!(stats.observations, 1);
        assert!(stats.blob_bytes > 0);
    }

    #[test]
    fn test_path() {
        let storage = create_test_storage();
        assert_eq!(storage.path().to_string_lossy(), ":memory:");
    }

    #[test]
    fn test_open_file_based_survives_reopen() {
        let temp_dir = std::env::temp_dir();
        let db_path = temp_dir.join(format!("wildwatch_test_{}.db", std::process::id()));

        let created = {
            let storage = Storage::open(&db_path).unwrap();
            assert_eq!(storage.path(), db_path);
            storage.create(fox()).unwrap()
        };

        let reopened = Storage::open(&db_path).unwrap();
        assert_eq!(reopened.list(), vec![created]);
        assert!(reopened.stats().unwrap().db_size_bytes > 0);

        drop(reopened);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[test]
    fn test_stats_reports_missing_database_file() {
        let db_path = std::env::temp_dir().join(format!(
            "wildwatch_test_unlinked_{}.db",
            std::process::id()
        ));
        let storage = Storage::open(&db_path).unwrap();
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));

        assert!(matches!(storage.stats(), Err(Error::Io(_))));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp_dir = std::env::temp_dir();
        let root = temp_dir.join(format!("wildwatch_test_dirs_{}", std::process::id()));
        let nested_path = root.join("nested/observations.db");
        let _ = std::fs::remove_dir_all(&root);

        let storage = Storage::open(&nested_path).unwrap();
        assert!(nested_path.exists());

        drop(storage);
        let _ = std::fs::remove_dir_all(&root);
    }
}
