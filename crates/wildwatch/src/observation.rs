//! Core observation types for wildwatch.
//!
//! This module defines the observation record, the payloads callers use to
//! create and update it, and the small amount of geometry the crate needs.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Kilometres per degree used by the flat-degree distance approximation.
pub const KM_PER_DEGREE: f64 = 111.0;

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate a fresh observation id (random 128-bit UUID).
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Weather conditions noted alongside an observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    /// Air temperature in degrees Celsius.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Free-form conditions ("overcast", "light rain", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<String>,
}

/// A recorded sighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Opaque unique identifier, immutable once assigned.
    pub id: String,

    /// Human-readable species label.
    pub species: String,

    /// Optional free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Latitude in degrees.
    pub latitude: f64,

    /// Longitude in degrees.
    pub longitude: f64,

    /// Location accuracy in meters, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,

    /// Attached photo URIs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photos: Option<Vec<String>>,

    /// Weather at the time of the sighting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<Weather>,

    /// Effective date of the sighting, epoch milliseconds.
    pub timestamp: f64,

    /// When the record was first persisted, epoch milliseconds.
    pub created_at: i64,

    /// When the record was last mutated, epoch milliseconds.
    pub updated_at: i64,
}

impl Observation {
    /// Build a new record from a create payload.
    ///
    /// Assigns a fresh id and stamps `created_at`/`updated_at` with `now`.
    /// The effective `timestamp` defaults to `now` unless the payload sets it.
    #[must_use]
    pub fn from_create(input: CreateObservation, now: i64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let timestamp = input.timestamp.unwrap_or(now as f64);
        Self {
            id: generate_id(),
            species: input.species,
            description: input.description,
            latitude: input.latitude,
            longitude: input.longitude,
            accuracy: input.accuracy,
            photos: input.photos,
            weather: input.weather,
            timestamp,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge an update payload into this record and refresh `updated_at`.
    ///
    /// Fields left as `None` in the payload are untouched. Location and
    /// record-keeping timestamps are never changed.
    pub fn apply(&mut self, update: UpdateObservation, now: i64) {
        if let Some(species) = update.species {
            self.species = species;
        }
        if let Some(description) = update.description {
            self.description = Some(description);
        }
        if let Some(photos) = update.photos {
            self.photos = Some(photos);
        }
        if let Some(weather) = update.weather {
            self.weather = Some(weather);
        }
        if let Some(timestamp) = update.timestamp {
            self.timestamp = timestamp;
        }
        self.touch(now);
    }

    /// Refresh `updated_at`.
    ///
    /// The value strictly increases even when the clock has not advanced
    /// since the previous mutation, and saturates at `i64::MAX`.
    pub fn touch(&mut self, now: i64) {
        self.updated_at = now.max(self.updated_at.saturating_add(1));
    }

    /// Distance to a point using the flat-degree approximation.
    ///
    /// Latitude and longitude deltas are treated as planar and scaled by
    /// [`KM_PER_DEGREE`]. This is not geodesic: longitude degrees shrink
    /// toward the poles and the result overestimates east-west distance
    /// away from the equator.
    #[must_use]
    pub fn approx_distance_km(&self, latitude: f64, longitude: f64) -> f64 {
        let d_lat = (self.latitude - latitude).abs();
        let d_lon = (self.longitude - longitude).abs();
        d_lat.hypot(d_lon) * KM_PER_DEGREE
    }

    /// Whether this observation lies within `radius_km` of a point.
    #[must_use]
    pub fn is_within(&self, latitude: f64, longitude: f64, radius_km: f64) -> bool {
        self.approx_distance_km(latitude, longitude) <= radius_km
    }

    /// Map-facing projection of this record.
    #[must_use]
    pub fn pin(&self) -> MapPin {
        MapPin {
            id: self.id.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Fields a caller supplies to create an observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateObservation {
    /// Species label; must not be blank.
    pub species: String,
    /// Optional free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Location accuracy in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Attached photo URIs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photos: Option<Vec<String>>,
    /// Weather at the time of the sighting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<Weather>,
    /// Effective date; defaults to the creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl CreateObservation {
    /// Create a payload for a species at a coordinate.
    #[must_use]
    pub fn new(species: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            species: species.into(),
            latitude,
            longitude,
            ..Self::default()
        }
    }

    /// Check required fields and coordinate ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        validate_species(&self.species)?;
        validate_coordinates(self.latitude, self.longitude)?;
        if let Some(accuracy) = self.accuracy {
            if !accuracy.is_finite() || accuracy < 0.0 {
                return Err(Error::validation(
                    "accuracy",
                    format!("must be a non-negative number of meters, got {accuracy}"),
                ));
            }
        }
        if let Some(timestamp) = self.timestamp {
            validate_timestamp(timestamp)?;
        }
        Ok(())
    }
}

/// Fields a caller may change on an existing observation.
///
/// `None` leaves the corresponding field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateObservation {
    /// New species label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Replacement photo list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photos: Option<Vec<String>>,
    /// Replacement weather.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<Weather>,
    /// New effective date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl UpdateObservation {
    /// Payload that only renames the species.
    #[must_use]
    pub fn species(species: impl Into<String>) -> Self {
        Self {
            species: Some(species.into()),
            ..Self::default()
        }
    }

    /// Check the fields that are present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if let Some(species) = &self.species {
            validate_species(species)?;
        }
        if let Some(timestamp) = self.timestamp {
            validate_timestamp(timestamp)?;
        }
        Ok(())
    }
}

impl From<&Observation> for UpdateObservation {
    /// Every editable field of `observation`, as a full replacement.
    fn from(observation: &Observation) -> Self {
        Self {
            species: Some(observation.species.clone()),
            description: observation.description.clone(),
            photos: observation.photos.clone(),
            weather: observation.weather.clone(),
            timestamp: Some(observation.timestamp),
        }
    }
}

/// Pin handed to a map surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPin {
    /// Observation id.
    pub id: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

fn validate_species(species: &str) -> Result<()> {
    if species.trim().is_empty() {
        return Err(Error::validation("species", "must not be empty"));
    }
    Ok(())
}

fn validate_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(Error::validation(
            "latitude",
            format!("must be between -90 and 90, got {latitude}"),
        ));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(Error::validation(
            "longitude",
            format!("must be between -180 and 180, got {longitude}"),
        ));
    }
    Ok(())
}

fn validate_timestamp(timestamp: f64) -> Result<()> {
    if !timestamp.is_finite() {
        return Err(Error::validation("timestamp", "must be a finite number"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fox() -> CreateObservation {
        CreateObservation::new("Renard roux", 45.5, -73.6)
    }

    #[test]
    fn test_from_create_stamps_times() {
        let obs = Observation::from_create(fox(), 1_700_000_000_000);

        assert!(!obs.id.is_empty());
        assert_eq!(obs.species, "Renard roux");
        assert_eq!(obs.created_at, 1_700_000_000_000);
        assert_eq!(obs.updated_at, obs.created_at);
        assert!((obs.timestamp - 1_700_000_000_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_create_keeps_explicit_timestamp() {
        let mut input = fox();
        input.timestamp = Some(1_600_000_000_000.0);
        let obs = Observation::from_create(input, 1_700_000_000_000);

        assert!((obs.timestamp - 1_600_000_000_000.0).abs() < f64::EPSILON);
        assert_eq!(obs.created_at, 1_700_000_000_000);
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = Observation::from_create(fox(), 1);
        let b = Observation::from_create(fox(), 1);
        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn test_apply_merges_fields() {
        let mut obs = Observation::from_create(fox(), 1_000);
        let before = obs.clone();

        obs.apply(UpdateObservation::species("Renard argenté"), 2_000);

        assert_eq!(obs.species, "Renard argenté");
        assert_eq!(obs.id, before.id);
        assert_eq!(obs.created_at, before.created_at);
        assert_eq!(obs.updated_at, 2_000);
        assert!((obs.latitude - before.latitude).abs() < f64::EPSILON);
        assert!((obs.longitude - before.longitude).abs() < f64::EPSILON);
    }

    #[test]
    fn test_touch_is_strictly_increasing() {
        let mut obs = Observation::from_create(fox(), 5_000);
        obs.touch(5_000);
        assert_eq!(obs.updated_at, 5_001);
        obs.touch(4_000);
        assert_eq!(obs.updated_at, 5_002);
        obs.touch(9_000);
        assert_eq!(obs.updated_at, 9_000);
    }

    #[test]
    fn test_touch_saturates_on_stored_max() {
        let mut obs = Observation::from_create(fox(), 5_000);
        obs.updated_at = i64::MAX;
        obs.touch(6_000);
        assert_eq!(obs.updated_at, i64::MAX);
    }

    #[test]
    fn test_validate_rejects_blank_species() {
        let err = CreateObservation::new("   ", 0.0, 0.0).validate().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("species"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_coordinates() {
        assert!(CreateObservation::new("Lynx", 91.0, 0.0).validate().is_err());
        assert!(CreateObservation::new("Lynx", 0.0, -181.0)
            .validate()
            .is_err());
        assert!(CreateObservation::new("Lynx", f64::NAN, 0.0)
            .validate()
            .is_err());
        assert!(CreateObservation::new("Lynx", -90.0, 180.0).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_accuracy() {
        let mut input = fox();
        input.accuracy = Some(-1.0);
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_update_validate() {
        assert!(UpdateObservation::default().validate().is_ok());
        assert!(UpdateObservation::species("").validate().is_err());
    }

    #[test]
    fn test_update_from_observation_round_trips_fields() {
        let mut obs = Observation::from_create(fox(), 1_000);
        obs.description = Some("Au bord du lac".to_string());
        let mut copy = obs.clone();
        copy.species = "Autre".to_string();
        copy.description = None;

        copy.apply(UpdateObservation::from(&obs), 2_000);

        assert_eq!(copy.species, obs.species);
        assert_eq!(copy.description, obs.description);
        assert_eq!(copy.updated_at, 2_000);
    }

    #[test]
    fn test_approx_distance_is_flat_degrees() {
        let obs = Observation::from_create(CreateObservation::new("Heron", 0.0, 0.0), 1);
        let d = obs.approx_distance_km(0.3, 0.4);
        assert!((d - 0.5 * KM_PER_DEGREE).abs() < 1e-9);
        assert!(obs.is_within(0.3, 0.4, 55.5));
        assert!(!obs.is_within(0.3, 0.4, 55.4));
    }

    #[test]
    fn test_serde_uses_camel_case() {
        let obs = Observation::from_create(fox(), 42);
        let json = serde_json::to_string(&obs).unwrap();
        assert!(json.contains("\"createdAt\":42"));
        assert!(json.contains("\"updatedAt\":42"));
        assert!(!json.contains("description"));
    }

    #[test]
    fn test_deserialize_legacy_record() {
        let json = r#"{
            "id": "1717000000000abc123xyz",
            "species": "Castor",
            "latitude": 45.5,
            "longitude": -73.6,
            "photos": ["file:///photo.jpg"],
            "timestamp": 1717000000000,
            "createdAt": 1717000000000,
            "updatedAt": 1717000000000
        }"#;
        let obs: Observation = serde_json::from_str(json).unwrap();
        assert_eq!(obs.id, "1717000000000abc123xyz");
        assert_eq!(obs.photos.as_deref(), Some(&["file:///photo.jpg".to_string()][..]));
        assert!(obs.weather.is_none());
    }

    #[test]
    fn test_pin_projection() {
        let obs = Observation::from_create(fox(), 1);
        let pin = obs.pin();
        assert_eq!(pin.id, obs.id);
        assert!((pin.latitude - 45.5).abs() < f64::EPSILON);
    }
}
