//! Tracing bootstrap for hosts that do not install their own subscriber.
//!
//! The engines only emit through the `tracing` facade. Conditions the
//! runtime treats as critical are logged at `ERROR` with a `critical = true`
//! field so they can be filtered separately.

#[cfg(feature = "tracing-basic")]
use tracing_subscriber::{fmt, EnvFilter};

/// Output format for [`init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install a global subscriber. `filter` uses `RUST_LOG` syntax and is
/// overridden by the `RUST_LOG` environment variable when set.
///
/// Returns `false` if a subscriber was already installed.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing(filter: &str, format: LogFormat) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let result = match format {
        LogFormat::Pretty => fmt().with_env_filter(env_filter).try_init(),
        LogFormat::Json => fmt().json().with_env_filter(env_filter).try_init(),
    };

    result.is_ok()
}

/// Without the `tracing-basic` feature the host owns the subscriber.
#[cfg(not(feature = "tracing-basic"))]
pub fn init_tracing(_filter: &str, _format: LogFormat) -> bool {
    false
}
