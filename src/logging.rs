//! Logging setup for the command-line entry point.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset, by `-v` count.
pub fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "scribepool=info",
        1 => "scribepool=debug",
        _ => "scribepool=trace",
    }
}

/// Install a stderr subscriber. `RUST_LOG` wins over `verbosity`.
pub fn init_logging(verbosity: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_by_verbosity() {
        assert_eq!(default_filter(0), "scribepool=info");
        assert_eq!(default_filter(1), "scribepool=debug");
        assert_eq!(default_filter(2), "scribepool=trace");
        assert_eq!(default_filter(9), "scribepool=trace");
    }

    #[test]
    fn test_default_filters_parse() {
        for verbosity in 0..3 {
            assert!(EnvFilter::try_new(default_filter(verbosity)).is_ok());
        }
    }
}
