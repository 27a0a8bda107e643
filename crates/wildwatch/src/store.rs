//! In-process observation store.
//!
//! [`ObservationStore`] holds the authoritative list for the running process
//! and notifies subscribers after every mutation. It is constructed by the
//! composition root and shared through an `Arc`.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::observation::{MapPin, Observation};

/// What the store does when an update or delete names a missing id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingRecordPolicy {
    /// Fail with [`Error::NotFound`], matching the persistence adapter.
    #[default]
    Error,
    /// Log and carry on without notifying anyone.
    Ignore,
}

type Listener = Arc<dyn Fn(&[Observation]) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

/// Handle returned by [`ObservationStore::subscribe`].
///
/// The callback stays registered until [`Subscription::unsubscribe`] is
/// called or the handle is dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove the callback from the store.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Diagnostic counters for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of observations held.
    pub observations: usize,
    /// Number of live subscribers.
    pub subscribers: usize,
}

/// The authoritative in-memory observation list.
///
/// Mutations prepend/replace/remove in place and then deliver a fresh
/// snapshot to every subscriber, in subscription order, before returning.
/// Mutations are serialized together with their delivery, so subscribers
/// see snapshots in mutation order even when several threads write. The
/// list lock is released while subscribers run: a subscriber may read the
/// store but must not mutate it. A panicking subscriber is logged and
/// skipped.
pub struct ObservationStore {
    observations: Mutex<Vec<Observation>>,
    delivery: Mutex<()>,
    registry: Arc<Mutex<Registry>>,
    policy: MissingRecordPolicy,
}

impl ObservationStore {
    /// Create an empty store with the default [`MissingRecordPolicy`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(MissingRecordPolicy::default())
    }

    /// Create an empty store with the given policy.
    #[must_use]
    pub fn with_policy(policy: MissingRecordPolicy) -> Self {
        Self {
            observations: Mutex::new(Vec::new()),
            delivery: Mutex::new(()),
            registry: Arc::new(Mutex::new(Registry::default())),
            policy,
        }
    }

    /// Policy applied to updates and deletes of missing ids.
    #[must_use]
    pub fn policy(&self) -> MissingRecordPolicy {
        self.policy
    }

    fn observations(&self) -> MutexGuard<'_, Vec<Observation>> {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an observation at the front of the list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if an observation with the same id is
    /// already held.
    pub fn add(&self, observation: Observation) -> Result<()> {
        let _delivery = self.delivery();
        let snapshot = {
            let mut observations = self.observations();
            if observations.iter().any(|o| o.id == observation.id) {
                return Err(Error::DuplicateId { id: observation.id });
            }
            debug!("Adding observation {}", observation.id);
            observations.insert(0, observation);
            observations.clone()
        };
        self.notify(&snapshot);
        Ok(())
    }

    /// Replace the observation with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is missing and the policy is
    /// [`MissingRecordPolicy::Error`].
    pub fn update(&self, observation: Observation) -> Result<()> {
        let _delivery = self.delivery();
        let snapshot = {
            let mut observations = self.observations();
            match observations.iter_mut().find(|o| o.id == observation.id) {
                Some(slot) => {
                    debug!("Updating observation {}", observation.id);
                    *slot = observation;
                    observations.clone()
                }
                None => return self.missing(&observation.id, "update"),
            }
        };
        self.notify(&snapshot);
        Ok(())
    }

    /// Remove the observation with this id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is missing and the policy is
    /// [`MissingRecordPolicy::Error`].
    pub fn delete(&self, id: &str) -> Result<()> {
        let _delivery = self.delivery();
        let snapshot = {
            let mut observations = self.observations();
            let before = observations.len();
            observations.retain(|o| o.id != id);
            if observations.len() == before {
                return self.missing(id, "delete");
            }
            debug!("Deleted observation {id}");
            observations.clone()
        };
        self.notify(&snapshot);
        Ok(())
    }

    fn missing(&self, id: &str, operation: &str) -> Result<()> {
        match self.policy {
            MissingRecordPolicy::Error => Err(Error::not_found(id)),
            MissingRecordPolicy::Ignore => {
                warn!("Ignoring {operation} of missing observation {id}");
                Ok(())
            }
        }
    }

    /// Replace the whole list, e.g. after loading from storage.
    pub fn replace_all(&self, observations: Vec<Observation>) {
        let _delivery = self.delivery();
        let snapshot = {
            let mut current = self.observations();
            *current = observations;
            current.clone()
        };
        debug!("Replaced store contents with {} observations", snapshot.len());
        self.notify(&snapshot);
    }

    /// Copy of the current list, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<Observation> {
        self.observations().clone()
    }

    /// Copy of a single observation.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Observation> {
        self.observations().iter().find(|o| o.id == id).cloned()
    }

    /// Number of observations held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observations().len()
    }

    /// Whether the store holds no observations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations().is_empty()
    }

    /// Map pins for every observation.
    #[must_use]
    pub fn pins(&self) -> Vec<MapPin> {
        self.observations().iter().map(Observation::pin).collect()
    }

    /// Register a callback invoked with the full list after every mutation.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[Observation]) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((id, Arc::new(listener)));
        debug!("Subscriber {id} registered");

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Counts for diagnostics.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            observations: self.len(),
            subscribers: self.registry().listeners.len(),
        }
    }

    fn notify(&self, snapshot: &[Observation]) {
        let listeners: Vec<(u64, Listener)> = self.registry().listeners.clone();

        for (id, listener) in listeners {
            let delivery = snapshot.to_vec();
            if catch_unwind(AssertUnwindSafe(|| listener(&delivery))).is_err() {
                warn!("Subscriber {id} panicked while handling a store update");
            }
        }
    }
}

impl Default for ObservationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObservationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("ObservationStore")
            .field("observations", &stats.observations)
            .field("subscribers", &stats.subscribers)
            .field("policy", &self.policy)
            .finish()
    }
}
