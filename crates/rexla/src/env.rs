//! Process-wide settings read once from the environment.

use std::env;
use std::sync::OnceLock;

static REXLA_PLATFORM: OnceLock<Option<String>> = OnceLock::new();
static REXLA_STRICT_LAYOUTS: OnceLock<bool> = OnceLock::new();

pub const DEFAULT_PLATFORM: &str = "host";

pub fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Parses a comma-separated list of device ordinals, skipping blank and
/// malformed entries.
pub fn parse_ordinal_list(value: &str) -> Vec<usize> {
    value
        .split(',')
        .filter_map(|entry| entry.trim().parse::<usize>().ok())
        .collect()
}

/// Reads a non-empty environment variable.
pub fn var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

/// Platform name selected by `REXLA_PLATFORM`, falling back to `host`.
pub fn default_platform_name() -> &'static str {
    REXLA_PLATFORM
        .get_or_init(|| var("REXLA_PLATFORM"))
        .as_deref()
        .unwrap_or(DEFAULT_PLATFORM)
}

/// When set, `LocalClient::compile` requires every argument layout to carry
/// an explicit layout.
pub fn strict_layouts() -> bool {
    *REXLA_STRICT_LAYOUTS.get_or_init(|| var("REXLA_STRICT_LAYOUTS").is_some_and(|v| parse_bool(&v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bools() {
        assert!(parse_bool(" Yes "));
        assert!(parse_bool("1"));
        assert!(!parse_bool("off"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn ordinal_lists() {
        assert_eq!(parse_ordinal_list("1, 3,x,,7"), vec![1, 3, 7]);
        assert!(parse_ordinal_list("").is_empty());
    }
}
