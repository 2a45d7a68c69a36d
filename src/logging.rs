//! Tracing subscriber bootstrap for binaries embedding the engine.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install a global `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_logging() -> bool {
    init_logging_with("info")
}

/// Like [`init_logging`] with an explicit fallback directive.
pub fn init_logging_with(default_directive: &str) -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let _ = init_logging_with("debug");
        assert!(!init_logging());
    }
}
