//! `wildwatch` - local-first logging of wildlife observations
//!
//! This library provides the observation model, the persistence adapter that
//! keeps the collection on disk, the in-process store with change
//! notification, and the binding layer that views mount on top of it.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod api;
pub mod app;
pub mod binding;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod observation;
pub mod repository;
pub mod storage;
pub mod store;

pub use app::App;
pub use binding::{BindingState, ObservationsBinding};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use observation::{CreateObservation, MapPin, Observation, UpdateObservation, Weather};
pub use repository::ObservationRepository;
pub use storage::{Storage, StorageStats};
pub use store::{MissingRecordPolicy, ObservationStore, StoreStats, Subscription};
