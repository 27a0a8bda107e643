//! `wildwatch` - CLI for the wildwatch observation log
//!
//! The binary is the composition root: it loads configuration, opens the
//! database, hydrates the store and mounts a binding for each command.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::{bail, Context};
use chrono::DateTime;
use clap::Parser;

use wildwatch::cli::{Cli, Command, ConfigCommand};
use wildwatch::{init_logging, App, Config, CreateObservation, Observation};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
        command => {
            let app = App::init(config).context("could not open the observation database")?;
            run(&app, command).await
        }
    }
}

async fn run(app: &App, command: Command) -> anyhow::Result<()> {
    let binding = app.binding();

    match command {
        Command::List(cmd) => {
            let observations = binding.observations();
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&observations)?);
            } else if observations.is_empty() {
                println!("No observations yet.");
            } else {
                observations.iter().for_each(print_line);
            }
        }
        Command::Show(cmd) => {
            let Some(observation) = binding.find(&cmd.id) else {
                bail!("observation {} not found", cmd.id);
            };
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&observation)?);
            } else {
                print_detail(&observation);
            }
        }
        Command::Add(cmd) => {
            let observation = binding
                .create(CreateObservation::from(cmd))
                .await
                .context("could not record the observation")?;
            println!("Recorded {}", observation.id);
        }
        Command::Update(cmd) => {
            let observation = binding
                .update(&cmd.id, cmd.changes())
                .await
                .with_context(|| format!("could not update observation {}", cmd.id))?;
            print_detail(&observation);
        }
        Command::Delete(cmd) => {
            binding
                .delete(&cmd.id)
                .await
                .with_context(|| format!("could not delete observation {}", cmd.id))?;
            println!("Deleted {}", cmd.id);
        }
        Command::Nearby(cmd) => {
            let radius = cmd.radius.unwrap_or(app.config().nearby.default_radius_km);
            let found = binding.nearby(cmd.lat, cmd.lon, radius).await?;
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&found)?);
            } else {
                println!(
                    "{} observation(s) within {radius} km (flat-degree approximation)",
                    found.len()
                );
                found.iter().for_each(print_line);
            }
        }
        Command::Pins => {
            println!("{}", serde_json::to_string_pretty(&app.store().pins())?);
        }
        Command::Stats { json } => {
            let store = app.store().stats();
            let storage = app.storage().stats()?;
            if json {
                let stats = serde_json::json!({
                    "observations": store.observations,
                    "subscribers": store.subscribers,
                    "blob_bytes": storage.blob_bytes,
                    "db_size_bytes": storage.db_size_bytes,
                    "database_path": app.storage().path(),
                });
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("wildwatch stats");
                println!("---------------");
                println!("Observations:  {}", store.observations);
                println!("Subscribers:   {}", store.subscribers);
                println!("Blob size:     {} bytes", storage.blob_bytes);
                println!("Database:      {}", app.storage().path().display());
                println!("Database size: {} bytes", storage.db_size_bytes);
            }
        }
        Command::Clear { yes } => {
            if !yes {
                println!("This will delete every observation.");
                println!("Use --yes to confirm.");
                return Ok(());
            }
            app.storage().clear()?;
            app.store().replace_all(Vec::new());
            println!("All observations deleted.");
        }
        Command::Config(_) => unreachable!("handled before the database is opened"),
    }

    binding.unmount();
    Ok(())
}

fn format_date(timestamp: f64) -> String {
    #[allow(clippy::cast_possible_truncation)]
    let millis = timestamp as i64;
    DateTime::from_timestamp_millis(millis).map_or_else(
        || "unknown date".to_string(),
        |dt| dt.format("%Y-%m-%d").to_string(),
    )
}

fn print_line(observation: &Observation) {
    println!(
        "{}  {}  {:<24}  ({:.5}, {:.5})",
        observation.id,
        format_date(observation.timestamp),
        observation.species,
        observation.latitude,
        observation.longitude
    );
}

fn print_detail(observation: &Observation) {
    println!("Id:          {}", observation.id);
    println!("Species:     {}", observation.species);
    println!("Date:        {}", format_date(observation.timestamp));
    println!(
        "Location:    {:.5}, {:.5}",
        observation.latitude, observation.longitude
    );
    if let Some(accuracy) = observation.accuracy {
        println!("Accuracy:    {accuracy:.0} m");
    }
    if let Some(description) = &observation.description {
        println!("Description: {description}");
    }
    for photo in observation.photos.iter().flatten() {
        println!("Photo:       {photo}");
    }
    if let Some(weather) = &observation.weather {
        if let Some(temperature) = weather.temperature {
            println!("Temperature: {temperature:.1} °C");
        }
        if let Some(conditions) = &weather.conditions {
            println!("Conditions:  {conditions}");
        }
    }
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Slot key:           {}", config.storage.slot_key);
                println!();
                println!("[Store]");
                println!("  Missing record:     {:?}", config.store.missing_record);
                println!();
                println!("[Binding]");
                println!(
                    "  Simulated latency:  {} ms",
                    config.binding.simulated_latency_ms
                );
                println!();
                println!("[Api]");
                println!(
                    "  Base URL:           {}",
                    config.api.base_url.as_deref().unwrap_or("(disabled)")
                );
                println!("  Timeout (s):        {}", config.api.timeout_secs);
                println!();
                println!("[Nearby]");
                println!("  Default radius:     {} km", config.nearby.default_radius_km);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
