//! Process-wide log subscriber.
//!
//! Logs always go to stderr: stdout belongs to the per-sample progress lines
//! the CLI prints. The filter comes from `RUST_LOG` when set, otherwise from
//! the configured level (e.g. `"info"` or `"gt_harness=debug,warn"`).

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Output shape of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines with level and target.
    Human,
    /// One JSON object per line, carrying the current span's fields
    /// (`trace_id`, `label`, `sample_id`).
    Json,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            LogFormat::Json
        } else {
            LogFormat::Human
        }
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber.
///
/// Returns `false` when one was already installed, in which case the existing
/// subscriber is kept; repeated calls (e.g. across tests) are harmless.
pub fn init(service_name: &str, default_level: &str, format: LogFormat) -> bool {
    let (human, json) = match format {
        LogFormat::Human => (
            Some(fmt::layer().with_writer(std::io::stderr).with_target(true)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(false),
            ),
        ),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(human)
        .with(json)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(service = service_name, ?format, "logging initialised");
    }
    installed
}
