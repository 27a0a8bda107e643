//! Reactive binding over the observation store.
//!
//! An [`ObservationsBinding`] is what a screen holds: a derived copy of the
//! store's list that is replaced on every store notification, plus
//! `is_loading`/`error` flags maintained around each mutation. All writes go
//! through the store's API, optionally after a durable repository accepted
//! them.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::observation::{
    now_millis, CreateObservation, Observation, UpdateObservation,
};
use crate::repository::ObservationRepository;
use crate::store::{ObservationStore, Subscription};

/// Snapshot of what a bound view renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingState {
    /// Observations as of the last store notification, newest first.
    pub observations: Vec<Observation>,
    /// Whether a mutation is in flight.
    pub is_loading: bool,
    /// Message of the last failed operation, cleared when the next starts.
    pub error: Option<String>,
}

/// A mounted view of an [`ObservationStore`].
///
/// Dropping the binding (or calling [`ObservationsBinding::unmount`])
/// unsubscribes it. An in-flight mutation is not cancelled by unmounting.
pub struct ObservationsBinding {
    store: Arc<ObservationStore>,
    repository: Option<Arc<dyn ObservationRepository>>,
    latency: Duration,
    state: Arc<Mutex<BindingState>>,
    _subscription: Subscription,
}

impl ObservationsBinding {
    /// Mount a binding on a store: take its snapshot, then subscribe.
    #[must_use]
    pub fn mount(store: Arc<ObservationStore>) -> Self {
        let state = Arc::new(Mutex::new(BindingState {
            observations: store.list(),
            ..BindingState::default()
        }));

        let target = Arc::clone(&state);
        let subscription = store.subscribe(move |observations| {
            let mut state = target.lock().unwrap_or_else(PoisonError::into_inner);
            state.observations = observations.to_vec();
        });

        Self {
            store,
            repository: None,
            latency: Duration::ZERO,
            state,
            _subscription: subscription,
        }
    }

    /// Write through a durable repository before updating the store.
    #[must_use]
    pub fn with_repository(mut self, repository: Arc<dyn ObservationRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Delay every mutation by `latency` before it runs.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Unsubscribe from the store.
    pub fn unmount(self) {
        debug!("Unmounting observations binding");
    }

    fn lock(&self) -> MutexGuard<'_, BindingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the whole view state.
    #[must_use]
    pub fn state(&self) -> BindingState {
        self.lock().clone()
    }

    /// Current observations, newest first.
    #[must_use]
    pub fn observations(&self) -> Vec<Observation> {
        self.lock().observations.clone()
    }

    /// Whether a mutation is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.lock().is_loading
    }

    /// Message of the last failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Observation with this id in the current view.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<Observation> {
        self.lock().observations.iter().find(|o| o.id == id).cloned()
    }

    /// Run `operation` with loading/error bookkeeping.
    async fn track<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        {
            let mut state = self.lock();
            state.is_loading = true;
            state.error = None;
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let result = operation.await;

        let mut state = self.lock();
        state.is_loading = false;
        if let Err(e) = &result {
            warn!("Observation operation failed: {e}");
            state.error = Some(e.to_string());
        }
        result
    }

    /// Create an observation and add it to the store.
    ///
    /// # Errors
    ///
    /// Returns the validation, repository or store failure; its message is
    /// also kept in [`ObservationsBinding::error`].
    pub async fn create(&self, input: CreateObservation) -> Result<Observation> {
        self.track(async {
            input.validate()?;
            let observation = match &self.repository {
                Some(repository) => repository.create(input).await?,
                None => Observation::from_create(input, now_millis()),
            };
            self.store.add(observation.clone())?;
            Ok(observation)
        })
        .await
    }

    /// Merge fields into an observation and return the merged record.
    ///
    /// An update always needs an existing record to merge into, so an
    /// unknown id is [`Error::NotFound`] whatever the store's
    /// [`MissingRecordPolicy`](crate::store::MissingRecordPolicy) says.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown, or the validation,
    /// repository or store failure.
    pub async fn update(&self, id: &str, update: UpdateObservation) -> Result<Observation> {
        self.track(async {
            update.validate()?;
            match &self.repository {
                Some(repository) => {
                    let observation = repository.update(id, update).await?;
                    let mirrored = observation.clone();
                    self.mirror(&**repository, id, move |store| store.update(mirrored))
                        .await;
                    Ok(observation)
                }
                None => {
                    let mut current = self.store.get(id).ok_or_else(|| Error::not_found(id))?;
                    current.apply(update, now_millis());
                    self.store.update(current.clone())?;
                    Ok(current)
                }
            }
        })
        .await
    }

    /// Save an edited copy of an observation, matched by id.
    ///
    /// Only the editable fields of `observation` are taken; id, location and
    /// `created_at` keep their stored values and `updated_at` is refreshed.
    ///
    /// # Errors
    ///
    /// Same as [`ObservationsBinding::update`].
    pub async fn replace(&self, observation: Observation) -> Result<Observation> {
        self.update(&observation.id, UpdateObservation::from(&observation))
            .await
    }

    /// Delete an observation.
    ///
    /// Without a repository a missing id follows the store's policy. With
    /// one, the repository decides.
    ///
    /// # Errors
    ///
    /// Returns the repository or store failure.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.track(async {
            match &self.repository {
                Some(repository) => {
                    repository.delete(id).await?;
                    self.mirror(&**repository, id, |store| store.delete(id))
                        .await;
                }
                None => self.store.delete(id)?,
            }
            debug!("Store after delete: {:?}", self.store.stats());
            Ok(())
        })
        .await
    }

    /// Apply a write the repository already committed to the store.
    ///
    /// If the store does not hold `id` it is reloaded from the repository
    /// instead. The durable write stands either way, so nothing is returned.
    async fn mirror<F>(&self, repository: &dyn ObservationRepository, id: &str, apply: F)
    where
        F: FnOnce(&ObservationStore) -> Result<()>,
    {
        if self.store.get(id).is_some() {
            match apply(&self.store) {
                Ok(()) => return,
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!("Could not apply {} write for {id} to store: {e}", repository.name());
                }
            }
        }

        debug!("Store does not hold {id}; reloading from {}", repository.name());
        match repository.list().await {
            Ok(observations) => self.store.replace_all(observations),
            Err(e) => warn!("Store may be stale after {} write: {e}", repository.name()),
        }
    }

    /// Re-read the store's current list into the view.
    pub fn reload(&self) {
        let observations = self.store.list();
        self.lock().observations = observations;
    }

    /// Reload the store from the repository.
    ///
    /// Without a repository this only re-reads the store.
    ///
    /// # Errors
    ///
    /// Returns the repository failure.
    pub async fn refetch(&self) -> Result<()> {
        let Some(repository) = &self.repository else {
            self.reload();
            return Ok(());
        };
        self.track(async {
            let observations = repository.list().await?;
            self.store.replace_all(observations);
            Ok(())
        })
        .await
    }

    /// Observations within `radius_km` of a point.
    ///
    /// Uses the repository when there is one, otherwise filters the store
    /// with the same flat-degree approximation.
    ///
    /// # Errors
    ///
    /// Returns the repository failure.
    pub async fn nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<Vec<Observation>> {
        match &self.repository {
            Some(repository) => repository.nearby(latitude, longitude, radius_km).await,
            None => Ok(self
                .store
                .list()
                .into_iter()
                .filter(|o| o.is_within(latitude, longitude, radius_km))
                .collect()),
        }
    }
}

impl fmt::Debug for ObservationsBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationsBinding")
            .field("repository", &self.repository.as_ref().map(|r| r.name()))
            .field("latency", &self.latency)
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}
