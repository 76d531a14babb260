//! `tracing-subscriber` installation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use crate::errors::StepflowError;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "stepflow=info";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, multi-line output.
    #[default]
    Pretty,
    /// Human-readable, one line per event.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = StepflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(StepflowError::Config(format!("unknown log format '{other}'"))),
        }
    }
}

/// Installs a global fmt subscriber filtered by `RUST_LOG`, falling back
/// to [`DEFAULT_FILTER`].
///
/// # Errors
///
/// Returns an error if the filter is invalid or a global subscriber is
/// already installed.
pub fn init_tracing(format: LogFormat) -> Result<(), StepflowError> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => EnvFilter::try_new(directives),
        Err(_) => EnvFilter::try_new(DEFAULT_FILTER),
    }
    .map_err(|e| StepflowError::Config(format!("invalid log filter: {e}")))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let installed = match format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    installed.map_err(|e| StepflowError::Config(format!("could not install tracing subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::default().to_string(), "pretty");
    }

    #[test]
    fn test_second_install_is_an_error() {
        // Whichever call comes first may win; the second one must not panic.
        let _ = init_tracing(LogFormat::Compact);
        assert!(init_tracing(LogFormat::Json).is_err());
    }
}
