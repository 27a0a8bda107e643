//! CLI command definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Subcommand};

use crate::observation::{CreateObservation, UpdateObservation};

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Show command arguments.
#[derive(Debug, Args)]
pub struct ShowCommand {
    /// Observation id
    pub id: String,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Add command arguments.
#[derive(Debug, Args)]
pub struct AddCommand {
    /// Species name
    #[arg(short, long)]
    pub species: String,

    /// Latitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    /// Longitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    /// Free-text description
    #[arg(short, long)]
    pub description: Option<String>,

    /// Location accuracy in meters
    #[arg(long)]
    pub accuracy: Option<f64>,

    /// Photo URI to attach
    #[arg(long)]
    pub photo: Option<String>,

    /// Date of the sighting (YYYY-MM-DD); defaults to now
    #[arg(long, value_parser = parse_date)]
    pub date: Option<f64>,
}

impl From<AddCommand> for CreateObservation {
    fn from(cmd: AddCommand) -> Self {
        Self {
            species: cmd.species,
            description: cmd.description,
            latitude: cmd.lat,
            longitude: cmd.lon,
            accuracy: cmd.accuracy,
            photos: cmd.photo.map(|p| vec![p]),
            weather: None,
            timestamp: cmd.date,
        }
    }
}

/// Update command arguments.
#[derive(Debug, Args)]
pub struct UpdateCommand {
    /// Observation id
    pub id: String,

    /// New species name
    #[arg(short, long)]
    pub species: Option<String>,

    /// New description
    #[arg(short, long)]
    pub description: Option<String>,

    /// Replace the photo
    #[arg(long)]
    pub photo: Option<String>,

    /// New date of the sighting (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub date: Option<f64>,
}

impl UpdateCommand {
    /// The changes requested on the command line.
    #[must_use]
    pub fn changes(&self) -> UpdateObservation {
        UpdateObservation {
            species: self.species.clone(),
            description: self.description.clone(),
            photos: self.photo.clone().map(|p| vec![p]),
            weather: None,
            timestamp: self.date,
        }
    }
}

/// Delete command arguments.
#[derive(Debug, Args)]
pub struct DeleteCommand {
    /// Observation id
    pub id: String,
}

/// Nearby command arguments.
#[derive(Debug, Args)]
pub struct NearbyCommand {
    /// Latitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    /// Longitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    /// Radius in kilometres; defaults to the configured radius
    #[arg(short, long)]
    pub radius: Option<f64>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Parse a `YYYY-MM-DD` date into epoch milliseconds at UTC midnight.
///
/// # Errors
///
/// Returns a message if the date is malformed.
#[allow(clippy::cast_precision_loss)]
pub fn parse_date(value: &str) -> Result<f64, String> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD: {e}"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| format!("invalid date: {value}"))?;
    Ok(midnight.and_utc().timestamp_millis() as f64)
}
