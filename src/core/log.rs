use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, filter::Targets, fmt, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// Our own crate and request traces at the chosen level, everything else at warn.
fn app_targets(verbose: bool) -> Targets {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    Targets::new()
        .with_target("xrates", level)
        .with_target("tower_http", level)
        .with_default(LevelFilter::WARN)
}

/// Installs the global subscriber. When `RUST_LOG` is set it replaces the
/// default filter entirely and `verbose` has no effect.
pub fn init_logging(verbose: bool) {
    let registry = tracing_subscriber::registry().with(fmt::layer().compact());
    match EnvFilter::try_from_default_env() {
        Ok(env_filter) => registry.with(env_filter).init(),
        Err(_) => registry.with(app_targets(verbose)).init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_app_targets() {
        let quiet = app_targets(false);
        assert!(quiet.would_enable("xrates::refresh", &Level::INFO));
        assert!(!quiet.would_enable("xrates::refresh", &Level::DEBUG));
        assert!(!quiet.would_enable("reqwest", &Level::INFO));
        assert!(quiet.would_enable("reqwest", &Level::WARN));

        let verbose = app_targets(true);
        assert!(verbose.would_enable("xrates", &Level::DEBUG));
        assert!(verbose.would_enable("tower_http::trace", &Level::DEBUG));
        assert!(!verbose.would_enable("xrates", &Level::TRACE));
    }
}
