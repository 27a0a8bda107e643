//! Data-access abstraction.
//!
//! Both the local [`Storage`] and the remote [`crate::api::ApiClient`]
//! implement [`ObservationRepository`], so the binding layer can write
//! through either one.

use async_trait::async_trait;

use crate::error::Result;
use crate::observation::{CreateObservation, Observation, UpdateObservation};
use crate::storage::Storage;

/// Durable source of observations.
#[async_trait]
pub trait ObservationRepository: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// All observations, newest first.
    async fn list(&self) -> Result<Vec<Observation>>;

    /// A single observation.
    async fn get(&self, id: &str) -> Result<Observation>;

    /// Create a new observation and return the stored record.
    async fn create(&self, input: CreateObservation) -> Result<Observation>;

    /// Merge fields into an existing observation and return the result.
    async fn update(&self, id: &str, update: UpdateObservation) -> Result<Observation>;

    /// Remove an observation.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Observations within `radius_km` of a point.
    async fn nearby(&self, latitude: f64, longitude: f64, radius_km: f64)
        -> Result<Vec<Observation>>;
}

#[async_trait]
impl ObservationRepository for Storage {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn list(&self) -> Result<Vec<Observation>> {
        Ok(Storage::list(self))
    }

    async fn get(&self, id: &str) -> Result<Observation> {
        Storage::get(self, id)
    }

    async fn create(&self, input: CreateObservation) -> Result<Observation> {
        Storage::create(self, input)
    }

    async fn update(&self, id: &str, update: UpdateObservation) -> Result<Observation> {
        Storage::update(self, id, update)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        Storage::delete(self, id)
    }

    async fn nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<Vec<Observation>> {
        Ok(Storage::nearby(self, latitude, longitude, radius_km))
    }
}
