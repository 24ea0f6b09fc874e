use std::io;
use std::str::FromStr;

use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset. Startup retries log at debug
/// under `service::sequencer`, so they stay hidden by default.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,tower_http=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "compact" | "text" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}

impl LogFormat {
    /// Read `LOG_FORMAT`; unset or unknown values fall back to compact.
    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT").ok().and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global tracing subscriber, writing to stdout.
/// A second call is a no-op.
pub fn init_logging(format: LogFormat) {
    let builder = fmt().with_env_filter(env_filter()).with_target(false).with_writer(io::stdout);
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
