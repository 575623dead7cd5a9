//! Tracing setup shared by cistep binaries.
//!
//! Logs always go to stderr so command output on stdout stays parseable.
//! `RUST_LOG` overrides the level passed by the caller.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Filter from `RUST_LOG`, or `level` when unset or unparseable.
fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

fn output_layer(json: bool) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    if json {
        layer.json().with_current_span(true).boxed()
    } else {
        layer.boxed()
    }
}

/// Install the global subscriber: plain text, or one JSON object per line
/// when `json` is set. Only the first call in a process has any effect.
pub fn init_tracing(json: bool, level: Level) {
    let installed = tracing_subscriber::registry()
        .with(output_layer(json))
        .with(env_filter(level))
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(json, %level, "tracing initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::DEBUG);
        init_tracing(true, Level::INFO);
        tracing::info!("still logging");
    }
}
