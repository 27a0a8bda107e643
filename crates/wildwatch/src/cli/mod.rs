//! Command-line interface for wildwatch.
//!
//! This module provides the CLI structure for the `wildwatch` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AddCommand, ConfigCommand, DeleteCommand, ListCommand, NearbyCommand, ShowCommand,
    UpdateCommand, parse_date,
};

use crate::logging::Verbosity;

/// wildwatch - Log wildlife sightings on your device
///
/// Records observations (species, date, location, photo) in a local
/// database and lists, edits or searches them.
#[derive(Debug, Parser)]
#[command(name = "wildwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List observations, newest first
    List(ListCommand),

    /// Show a single observation
    Show(ShowCommand),

    /// Record a new observation
    Add(AddCommand),

    /// Edit an observation
    Update(UpdateCommand),

    /// Delete an observation
    Delete(DeleteCommand),

    /// List observations near a point
    Nearby(NearbyCommand),

    /// Print map pins as JSON
    Pins,

    /// Show store and storage statistics
    Stats {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Delete every observation
    Clear {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}
