//! Tracing subscriber setup for the CLI.
//!
//! `RUST_LOG` wins when set; otherwise the filter is `cropdeck=info`, or
//! `cropdeck=debug` with `--verbose`. Events go to stderr so stdout stays
//! clean for reports and JSON.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "cropdeck=debug"
    } else {
        "cropdeck=info"
    }
}

/// Install the global subscriber. Fails if one is already installed or the
/// filter does not parse.
pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(verbose)))?;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(verbose)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()?;
    Ok(())
}
