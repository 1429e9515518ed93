//! Registry configuration

use std::path::PathBuf;

/// Endpoint registry configuration options
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Lowest port the linear allocation scan considers
    pub first_port: u16,

    /// Directory of the local store (None = per-user runtime directory)
    pub store_dir: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            first_port: 1,
            store_dir: None,
        }
    }
}

impl RegistryConfig {
    /// Set the first port of the allocation scan
    pub fn first_port(mut self, port: u16) -> Self {
        self.first_port = port.max(1);
        self
    }

    /// Keep the local store in `dir`
    pub fn store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();

        assert_eq!(config.first_port, 1);
        assert!(config.store_dir.is_none());
    }

    #[test]
    fn test_builder_first_port_floor() {
        assert_eq!(RegistryConfig::default().first_port(0).first_port, 1);
        assert_eq!(RegistryConfig::default().first_port(20000).first_port, 20000);
    }

    #[test]
    fn test_builder_store_dir() {
        let config = RegistryConfig::default().store_dir("/tmp/endpoints");

        assert_eq!(config.store_dir, Some(PathBuf::from("/tmp/endpoints")));
    }
}
