//! Composition root.
//!
//! [`App`] owns the single store instance of the process and the storage it
//! was hydrated from. Everything else receives them from here.

use std::sync::Arc;

use tracing::info;

use crate::binding::ObservationsBinding;
use crate::config::Config;
use crate::error::Result;
use crate::repository::ObservationRepository;
use crate::storage::Storage;
use crate::store::ObservationStore;

/// Wired-up application services.
#[derive(Debug)]
pub struct App {
    config: Config,
    storage: Arc<Storage>,
    store: Arc<ObservationStore>,
}

impl App {
    /// Open storage at the configured path and hydrate the store from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn init(config: Config) -> Result<Self> {
        let storage = Storage::open(config.database_path())?;
        Ok(Self::assemble(config, storage))
    }

    /// Same as [`App::init`] but backed by an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn in_memory(config: Config) -> Result<Self> {
        let storage = Storage::open_in_memory()?;
        Ok(Self::assemble(config, storage))
    }

    fn assemble(config: Config, storage: Storage) -> Self {
        let storage = Arc::new(storage.with_slot_key(config.storage.slot_key.clone()));
        let store = Arc::new(ObservationStore::with_policy(config.store.missing_record));

        let observations = storage.list();
        info!(
            "Loaded {} observations from {}",
            observations.len(),
            storage.path().display()
        );
        store.replace_all(observations);

        Self {
            config,
            storage,
            store,
        }
    }

    /// The loaded configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The persistence adapter.
    #[must_use]
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// The process-wide store.
    #[must_use]
    pub fn store(&self) -> &Arc<ObservationStore> {
        &self.store
    }

    /// Mount a binding that writes through storage.
    #[must_use]
    pub fn binding(&self) -> ObservationsBinding {
        let repository: Arc<dyn ObservationRepository> = self.storage.clone();
        ObservationsBinding::mount(Arc::clone(&self.store))
            .with_repository(repository)
            .with_latency(self.config.simulated_latency())
    }
}
