//! Configuration for DSF sessions.
//!
//! A `dsf.toml` file has four optional sections:
//!
//! ```toml
//! [executor]
//! thread_name = "dsf-executor"
//! shutdown_policy = "run-pending"   # or "discard-pending"
//!
//! [query]
//! default_timeout_ms = 30000        # 0 waits forever
//!
//! [cache]
//! buffered_dispatches = 0
//!
//! [logging]
//! level = "info"                    # or any `EnvFilter` directive string
//! json = false
//! stderr = true
//! file = "/tmp/dsf.log"
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use dsf_concurrent::{ExecutorConfig, ShutdownPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DsfConfig {
    #[serde(default)]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DsfConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks that deserialization alone cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "executor.thread_name",
                message: "must not be empty".to_owned(),
            });
        }

        let directives = LoggingConfig::level_directives(&self.logging.level);
        if let Err(err) = EnvFilter::try_new(&directives) {
            return Err(ConfigError::Invalid {
                field: "logging.level",
                message: err.to_string(),
            });
        }

        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            thread_name: self.executor.thread_name.clone(),
            shutdown_policy: self.executor.shutdown_policy.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorSettings {
    /// Name of the executor worker thread.
    #[serde(default = "ExecutorSettings::default_thread_name")]
    pub thread_name: String,

    /// What happens to queued tasks when the executor shuts down.
    #[serde(default)]
    pub shutdown_policy: ShutdownPolicySetting,
}

impl ExecutorSettings {
    fn default_thread_name() -> String {
        "dsf-executor".to_owned()
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            thread_name: Self::default_thread_name(),
            shutdown_policy: ShutdownPolicySetting::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShutdownPolicySetting {
    #[default]
    RunPending,
    DiscardPending,
}

impl From<ShutdownPolicySetting> for ShutdownPolicy {
    fn from(value: ShutdownPolicySetting) -> Self {
        match value {
            ShutdownPolicySetting::RunPending => ShutdownPolicy::RunPending,
            ShutdownPolicySetting::DiscardPending => ShutdownPolicy::DiscardPending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    /// Timeout applied to blocking queries that do not pass their own.
    /// `0` waits forever.
    #[serde(default = "QueryConfig::default_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl QueryConfig {
    fn default_timeout_ms() -> u64 {
        30_000
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_ms > 0).then(|| Duration::from_millis(self.default_timeout_ms))
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: Self::default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Executor turns each command reply is delayed by before it reaches the
    /// cache.
    #[serde(default)]
    pub buffered_dispatches: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Level for the `dsf` targets, or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Mirror logs to stderr.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to the given file path.
    ///
    /// If the file cannot be opened, file logging is disabled while other sinks
    /// remain active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    /// Expands `level` into `EnvFilter` directives.
    ///
    /// A bare level (`debug`, `Warning`, ...) applies to the `dsf` targets
    /// while other crates stay at `warn` or quieter. Anything else is taken as
    /// a directive string and used verbatim.
    pub(crate) fn level_directives(level: &str) -> String {
        let trimmed = level.trim();
        let bare = if trimmed.is_empty() {
            Some(LevelFilter::INFO)
        } else if trimmed.eq_ignore_ascii_case("warning") {
            Some(LevelFilter::WARN)
        } else {
            trimmed.parse::<LevelFilter>().ok()
        };

        match bare {
            Some(dsf_level) => {
                let others = dsf_level.min(LevelFilter::WARN);
                format!("{others},{DSF_TARGET}={dsf_level}").to_ascii_lowercase()
            }
            None => trimmed.to_owned(),
        }
    }

    /// The effective filter: `level`, with `RUST_LOG` directives layered on
    /// top when the variable is set. An unparsable `RUST_LOG` is ignored.
    pub fn env_filter(&self) -> EnvFilter {
        let directives = Self::level_directives(&self.level);
        let configured = || {
            EnvFilter::try_new(&directives).unwrap_or_else(|_| {
                EnvFilter::default().add_directive(LevelFilter::INFO.into())
            })
        };

        match std::env::var("RUST_LOG") {
            Ok(env) if !env.trim().is_empty() => {
                EnvFilter::try_new(format!("{directives},{}", env.trim()))
                    .unwrap_or_else(|_| configured())
            }
            _ => configured(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

/// Prefix shared by every `dsf.*` log target.
const DSF_TARGET: &str = "dsf";

static TRACING_INIT: Once = Once::new();

/// Installs the global `tracing` subscriber described by `config`.
///
/// Safe to call multiple times; only the first call installs a subscriber.
/// Returns `true` if this call installed it.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let mut installed = false;
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let mut make_writer = BoxMakeWriter::new(std::io::sink);
        if config.stderr {
            // `cargo test` only captures output written through the stdlib's
            // print macros; `TestWriter` goes through them in debug builds.
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(
                    make_writer.and(tracing_subscriber::fmt::writer::TestWriter::with_stderr),
                );
            } else {
                make_writer = BoxMakeWriter::new(make_writer.and(std::io::stderr));
            }
        }

        let file = config.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        let file_failed = config.file.is_some() && file.is_none();
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(Arc::new(file)));
        }

        let registry = tracing_subscriber::registry().with(filter);
        let result = if config.json {
            tracing::subscriber::set_global_default(
                registry.with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(make_writer)
                        .with_ansi(false),
                ),
            )
        } else {
            tracing::subscriber::set_global_default(
                registry.with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(make_writer)
                        .with_ansi(false),
                ),
            )
        };

        installed = result.is_ok();
        if installed && file_failed {
            if let Some(path) = config.file.as_ref() {
                tracing::warn!(
                    target: "dsf.config",
                    path = %path.display(),
                    "failed to open log file; file logging disabled"
                );
            }
        }
    });
    installed
}
