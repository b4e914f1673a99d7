//! Tracing subscriber bootstrap for applications embedding h5chunk.
//!
//! Library code only emits `tracing` events; installing a subscriber is
//! left to the application, typically through [`LoggingConfig::init`].

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::error::{Error, Result};

/// Environment variable overriding the default filter directive.
pub const LOG_ENV_VAR: &str = "H5CHUNK_LOG";

/// Configuration for h5chunk logging.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive (in the sense of
    /// [`tracing_subscriber::filter::EnvFilter`]). Overridden by
    /// `H5CHUNK_LOG` when set.
    pub default_filter: String,
    /// Emit ANSI colors.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_filter: "warn".to_string(),
            ansi: false,
        }
    }
}

impl LoggingConfig {
    /// Install a global fmt subscriber. Fails if one is already installed.
    pub fn init(self) -> Result<()> {
        let env_filter = create_env_filter(&self.default_filter);
        if env_filter.max_level_hint() == Some(LevelFilter::OFF) {
            return Ok(());
        }
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(self.ansi)
            .with_target(true)
            .with_filter(env_filter);
        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| Error::Logging(e.to_string()))
    }
}

fn create_env_filter(filter: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(filter))
}
