//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::AppConfig;
use crate::config::validation::{join_errors, validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[rate_limit]\nupstream_limit = 10\nsafety_margin = 0.5\n\n[cache]\nmax_entries = 16"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.rate_limit.effective_limit(), 5);
        assert_eq!(config.cache.max_entries, 16);
    }

    #[test]
    fn test_validation_errors_are_joined() {
        let err = parse_config("[cache]\nmax_entries = 0\nkey_prefix = \"a:b\"").unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("Validation failed: "));
        assert!(text.contains("cache.max_entries"));
        assert!(text.contains("cache.key_prefix"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/registry-guard.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
