//! Global tracing setup for hosts embedding the pipeline.
//!
//! The library only emits events; installing a subscriber is left to the
//! host, which may call [`init_tracing`] once at startup.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{DomeError, DomeResult};

static INITIALISED: OnceLock<()> = OnceLock::new();

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info";

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// A second call fails with [`DomeError::Telemetry`].
pub fn init_tracing() -> DomeResult<()> {
    INITIALISED
        .set(())
        .map_err(|_| DomeError::Telemetry("tracing has already been initialised".to_string()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stdout().is_terminal());

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| DomeError::Telemetry(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_rejected() {
        // the first call may lose to another test binary's subscriber; the
        // second always hits the guard
        let _ = init_tracing();
        assert!(matches!(init_tracing(), Err(DomeError::Telemetry(_))));
    }
}
