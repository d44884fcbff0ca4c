//! Logging setup for the CLI.
//!
//! `RUST_LOG` wins when it is set and parses; otherwise `--verbose` picks
//! between `debug` and `info`.

use tracing_subscriber::EnvFilter;

/// Level used when `RUST_LOG` is unset or invalid.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Build the filter from `RUST_LOG`-style directives.
pub fn filter(directives: Option<&str>, verbose: bool) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive(verbose)))
}

/// Install the global fmt subscriber.
pub fn init(verbose: bool) {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(filter(directives.as_deref(), verbose))
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn test_rust_log_overrides_verbose_flag() {
        assert_eq!(filter(Some("warn"), true).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(filter(Some("trace"), false).max_level_hint(), Some(LevelFilter::TRACE));
        assert_eq!(
            filter(Some("spkg_compose=trace,warn"), false).max_level_hint(),
            Some(LevelFilter::TRACE)
        );
    }

    #[test]
    fn test_default_level_without_rust_log() {
        assert_eq!(filter(None, false).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(filter(None, true).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(filter(Some("  "), true).max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
