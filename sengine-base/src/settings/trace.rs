use eyre::Result;
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    prelude::*,
};

/// Logging level. A "higher level" means more will be logged.
#[derive(Default, Debug, Clone, Copy, serde::Deserialize, PartialOrd, Ord, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    /// Off
    Off = 0,
    /// Error
    Error = 1,
    /// Warn
    Warn = 2,
    /// Debug
    Debug = 3,
    /// Trace
    Trace = 5,
    /// Trace + additional logs from dependencies
    DependencyTrace = 6,
    /// Info
    #[serde(other)]
    #[default]
    Info = 4,
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Off => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace | Level::DependencyTrace => LevelFilter::TRACE,
            Level::Info => LevelFilter::INFO,
        }
    }
}

impl std::str::FromStr for Level {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "off" => Self::Off,
            "error" => Self::Error,
            "warn" => Self::Warn,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            "dependencytrace" => Self::DependencyTrace,
            _ => Self::Info,
        })
    }
}

/// Log output encoding.
#[derive(Default, Debug, Clone, Copy, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Style {
    /// Single-line human-oriented output.
    #[default]
    Compact,
    /// Multi-line human-oriented output.
    Pretty,
    /// Newline-delimited JSON for log shippers.
    Json,
}

/// Configuration for the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    pub(crate) fmt: Style,
    #[serde(default)]
    pub(crate) level: Level,
}

impl TracingConfig {
    /// Build one from the parsed env values.
    pub fn new(level: Level, fmt: Style) -> Self {
        Self { fmt, level }
    }

    /// Attempt to instantiate and register a tracing subscriber from
    /// settings. Errors if a global subscriber is already set.
    pub fn start_tracing(&self) -> Result<()> {
        let mut target_layer = Targets::new().with_default(self.level);

        if self.level < Level::DependencyTrace {
            // Reduce log noise from libraries we can reasonably assume are
            // working correctly.
            target_layer = target_layer
                .with_target("hyper", Level::Info)
                .with_target("reqwest", Level::Info)
                .with_target("lapin", Level::Info)
                .with_target("tokio", Level::Debug);
        }

        if self.level < Level::Trace {
            // only show sqlx query logs at trace level
            target_layer = target_layer.with_target("sqlx::query", Level::Warn);
        }

        let registry = tracing_subscriber::registry().with(target_layer);
        match self.fmt {
            Style::Compact => registry
                .with(tracing_subscriber::fmt::layer().compact())
                .try_init()?,
            Style::Pretty => registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()?,
            Style::Json => registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_levels_default_to_info() {
        assert_eq!("nonsense".parse::<Level>().unwrap(), Level::Info);
        assert_eq!("warn".parse::<Level>().unwrap(), Level::Warn);
    }
}
