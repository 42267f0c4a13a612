//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MIMECONV_CONFIG` (environment variable)
//! 2. `~/.config/mimeconv/config.toml` (Linux/macOS)
//!    `%APPDATA%\mimeconv\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MimeError, Result};
use crate::tnef::decoder::DEFAULT_MAX_ATTRIBUTE_LEN;
use crate::visitor::DEFAULT_MAX_DEPTH;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    /// Which converter passes run, and how deep they descend.
    pub converters: ConvertersConfig,
    /// Document text extraction.
    pub documents: DocumentsConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override cache directory for logs and the decode cache.
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertersConfig {
    /// Expand TNEF (`winmail.dat`) attachments.
    pub tnef: bool,
    /// Split uuencoded blocks out of text bodies.
    pub uuencode: bool,
    /// Nesting depth at which traversal stops.
    pub max_depth: usize,
    /// Add a `text/calendar` part for TNEF meeting requests.
    pub tnef_to_icalendar: bool,
    /// Largest single TNEF attribute accepted, in bytes.
    pub tnef_max_attribute_len: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    /// Extract text when a document is created instead of on first access.
    pub instant_parsing: bool,
    /// Maximum preview fragment length in characters.
    pub fragment_length: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Decode cache root (default: `<cache_dir>/decode`). Wiped on start.
    pub root: Option<PathBuf>,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            cache_dir: None,
        }
    }
}

impl Default for ConvertersConfig {
    fn default() -> Self {
        Self {
            tnef: true,
            uuencode: true,
            max_depth: DEFAULT_MAX_DEPTH,
            tnef_to_icalendar: true,
            tnef_max_attribute_len: DEFAULT_MAX_ATTRIBUTE_LEN,
        }
    }
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            instant_parsing: true,
            fragment_length: 150,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match load_config_from(&path) {
                Ok(cfg) => {
                    tracing::info!(path = %path.display(), "Loaded config");
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to load config, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Load and validate one configuration file.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| MimeError::io(path, e))?;
    let cfg: Config =
        toml::from_str(&contents).map_err(|e| MimeError::Config(e.to_string()))?;
    if cfg.converters.max_depth == 0 {
        return Err(MimeError::Config(
            "converters.max_depth must be at least 1".into(),
        ));
    }
    Ok(cfg)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MIMECONV_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mimeconv").join("config.toml"))
}

/// Return the cache directory for logs and decode artifacts.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mimeconv")
}

/// Return the decode cache root.
pub fn decode_cache_root(config: &Config) -> PathBuf {
    config
        .cache
        .root
        .clone()
        .unwrap_or_else(|| cache_dir(config).join("decode"))
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mimeconv.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert!(cfg.converters.tnef);
        assert!(cfg.converters.uuencode);
        assert_eq!(cfg.converters.max_depth, 100);
        assert!(cfg.documents.instant_parsing);
        assert_eq!(cfg.documents.fragment_length, 150);
        assert_eq!(cfg.general.log_level, "warn");
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.converters.max_depth, cfg.converters.max_depth);
        assert_eq!(
            parsed.documents.fragment_length,
            cfg.documents.fragment_length
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[converters]
tnef = false
max_depth = 20

[documents]
instant_parsing = false
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert!(!cfg.converters.tnef);
        assert_eq!(cfg.converters.max_depth, 20);
        assert!(!cfg.documents.instant_parsing);
        // Other fields use defaults
        assert!(cfg.converters.uuencode);
        assert_eq!(cfg.documents.fragment_length, 150);
    }

    #[test]
    fn test_load_config_from_rejects_zero_depth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[converters]\nmax_depth = 0\n").unwrap();
        assert!(matches!(
            load_config_from(&path),
            Err(MimeError::Config(_))
        ));
    }

    #[test]
    fn test_decode_cache_root_default_and_override() {
        let mut cfg = Config::default();
        cfg.general.cache_dir = Some(PathBuf::from("/tmp/mc"));
        assert_eq!(decode_cache_root(&cfg), PathBuf::from("/tmp/mc/decode"));
        cfg.cache.root = Some(PathBuf::from("/var/decode"));
        assert_eq!(decode_cache_root(&cfg), PathBuf::from("/var/decode"));
    }
}
