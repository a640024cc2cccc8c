//! Tracing bootstrap for the smoke binary.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,channel_smoke=debug,channel_ws=debug";

/// Initialize the global tracing subscriber.
///
/// Filter precedence:
/// 1) `RUST_LOG`
/// 2) `CHANNEL_SMOKE_LOG`
/// 3) `CHANNEL_LOG`
/// 4) built-in default
pub fn init() {
    let env_filter = filter_from_env();
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    for key in ["CHANNEL_SMOKE_LOG", "CHANNEL_LOG"] {
        if let Some(filter) = filter_from_var(env::var(key).ok()) {
            return filter;
        }
    }

    EnvFilter::new(DEFAULT_FILTER)
}

fn filter_from_var(value: Option<String>) -> Option<EnvFilter> {
    value
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_or_invalid_values_fall_through() {
        assert!(filter_from_var(None).is_none());
        assert!(filter_from_var(Some("   ".to_owned())).is_none());
        assert!(filter_from_var(Some("channel_ws=loudest".to_owned())).is_none());
    }

    #[test]
    fn accepts_directive_lists() {
        let filter = filter_from_var(Some("warn,channel_ws=trace".to_owned()))
            .expect("filter should parse");
        assert!(filter.to_string().contains("channel_ws=trace"));
    }

    #[test]
    fn default_filter_parses() {
        EnvFilter::try_new(DEFAULT_FILTER).expect("default filter should parse");
    }
}
