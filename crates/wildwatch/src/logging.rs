//! Tracing setup for the `wildwatch` binary.
//!
//! Events are written to stderr so that `--json` output on stdout stays
//! parseable. `RUST_LOG`, when set, replaces the filter built from the
//! command-line flags.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How much the CLI logs, chosen with `-q` and `-v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only, from every crate.
    Quiet,
    /// Lifecycle events such as opening the database.
    #[default]
    Normal,
    /// Every store and storage mutation.
    Verbose,
    /// Everything, HTTP and SQLite internals included.
    Trace,
}

impl Verbosity {
    /// Derive verbosity from `-q` and the number of `-v` flags.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    ///
    /// Dependencies stay at `warn` below [`Verbosity::Trace`].
    #[must_use]
    pub fn directives(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "warn,wildwatch=info",
            Self::Verbose => "warn,wildwatch=debug",
            Self::Trace => "trace",
        }
    }

    fn shows_targets(self) -> bool {
        matches!(self, Self::Verbose | Self::Trace)
    }
}

/// Install the global subscriber.
///
/// Call once from `main`. Later calls leave the first subscriber in place.
///
/// ```no_run
/// use wildwatch::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::from_flags(false, 1));
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directives()));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity.shows_targets());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
}
