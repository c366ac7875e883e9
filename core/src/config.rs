//! Configuration for Zflow
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. Config file (`zodel.toml` in the working directory, or the path given by
//!    `--config` / `ZODEL_CONFIG_PATH`)
//! 3. Environment variables, `ZODEL_<SECTION>__<KEY>`, for example
//!    `ZODEL_EXECUTOR__PARALLEL_DELIMITER`
//!
//! A `.env` file is loaded first when present.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub parser: ParserConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Executor behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Joins Parallel branch outputs, in declaration order
    pub parallel_delimiter: String,

    /// Heading of the side-context section when a backend folds the extra
    /// input into a single user message. Empty means no heading.
    pub side_context_label: String,

    /// Capacity of the outward event channel
    pub event_buffer: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallel_delimiter: "\n".to_string(),
            side_context_label: "Context".to_string(),
            event_buffer: 64,
        }
    }
}

/// Parser limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Upper bound for `[-> ...]*N` loop expansion
    pub max_loop_repetitions: usize,

    /// How deeply loops may nest inside one another
    pub max_loop_depth: usize,

    /// Upper bound on the number of stages after loop expansion
    pub max_stages: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_loop_repetitions: 32,
            max_loop_depth: 8,
            max_stages: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default search locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, reading `path` instead of the default config file
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        // Missing .env is the common case
        let _ = dotenvy::dotenv();

        let path = path
            .map(str::to_string)
            .or_else(|| std::env::var("ZODEL_CONFIG_PATH").ok());

        let file = match &path {
            Some(path) => config::File::with_name(path),
            None => config::File::with_name("zodel").required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("ZODEL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| match &path {
                Some(path) => format!("Failed to load configuration from {}", path),
                None => "Failed to load configuration".to_string(),
            })?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Parse configuration from TOML text (no file or environment lookup)
    pub fn from_toml(text: &str) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .context("Failed to parse configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }
}
