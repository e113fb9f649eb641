use std::sync::OnceLock;

use rexla::env::{parse_ordinal_list, var};

static HOST_ENV_CONFIG: OnceLock<HostPlatformConfig> = OnceLock::new();

/// Device topology of a host platform instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatformConfig {
    pub device_count: usize,
    /// In-range ordinals the platform refuses to run on.
    pub unsupported_devices: Vec<usize>,
    /// Per-device cap on live bytes.
    pub memory_limit_bytes: Option<usize>,
}

impl Default for HostPlatformConfig {
    fn default() -> Self {
        Self {
            device_count: 1,
            unsupported_devices: Vec::new(),
            memory_limit_bytes: None,
        }
    }
}

impl HostPlatformConfig {
    /// Reads `REXLA_HOST_DEVICE_COUNT`, `REXLA_HOST_UNSUPPORTED_DEVICES` and
    /// `REXLA_HOST_MEMORY_LIMIT` once per process.
    pub fn from_env() -> Self {
        HOST_ENV_CONFIG
            .get_or_init(|| {
                let mut config = HostPlatformConfig::default();
                if let Some(value) = var("REXLA_HOST_DEVICE_COUNT") {
                    match value.parse::<usize>() {
                        Ok(count) if count > 0 => config.device_count = count,
                        _ => tracing::warn!(%value, "ignoring invalid REXLA_HOST_DEVICE_COUNT"),
                    }
                }
                if let Some(value) = var("REXLA_HOST_UNSUPPORTED_DEVICES") {
                    config.unsupported_devices = parse_ordinal_list(&value);
                }
                if let Some(value) = var("REXLA_HOST_MEMORY_LIMIT") {
                    match value.parse::<usize>() {
                        Ok(limit) => config.memory_limit_bytes = Some(limit),
                        Err(_) => tracing::warn!(%value, "ignoring invalid REXLA_HOST_MEMORY_LIMIT"),
                    }
                }
                config
            })
            .clone()
    }

    pub fn with_device_count(mut self, count: usize) -> Self {
        self.device_count = count;
        self
    }

    pub fn with_unsupported_devices(mut self, ordinals: impl Into<Vec<usize>>) -> Self {
        self.unsupported_devices = ordinals.into();
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit_bytes = Some(bytes);
        self
    }

    pub fn is_supported(&self, ordinal: usize) -> bool {
        ordinal < self.device_count && !self.unsupported_devices.contains(&ordinal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_devices_are_excluded() {
        let config = HostPlatformConfig::default()
            .with_device_count(3)
            .with_unsupported_devices([1]);
        assert!(config.is_supported(0));
        assert!(!config.is_supported(1));
        assert!(config.is_supported(2));
        assert!(!config.is_supported(3));
    }
}
