//! Diagnostics for people debugging recipe-runner itself.
//!
//! Two kinds of output exist and they never mix:
//!
//! - `tracing` events go to stderr, filtered by `RUST_LOG` (default `warn`).
//!   Nothing is persisted.
//! - The run log (`io/run_log`) is what a recipe run produces under
//!   `.recipe-logs/`. It is always written and ignores `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the stderr subscriber. Safe to call more than once.
///
/// ```bash
/// RUST_LOG=recipe_runner=debug recipe-runner run feature-development claude
/// ```
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(filter_from(std::env::var("RUST_LOG").ok().as_deref()))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
}

fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_or_blank_falls_back_to_warn() {
        assert_eq!(filter_from(None).to_string(), DEFAULT_DIRECTIVE);
        assert_eq!(filter_from(Some("  ")).to_string(), DEFAULT_DIRECTIVE);
    }

    #[test]
    fn explicit_directives_are_kept() {
        assert_eq!(
            filter_from(Some("recipe_runner=debug")).to_string(),
            "recipe_runner=debug"
        );
    }
}
