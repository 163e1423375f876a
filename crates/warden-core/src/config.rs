//! Kernel configuration.
//!
//! A single JSON file with three sections; a missing file yields safe
//! defaults (safe mode on, canonical keyword list). The authentication token
//! lives in a sibling file, not here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::policy::DEFAULT_BLOCKED_KEYWORDS;

/// Paths probed for `config.json`, in order.
pub const CONFIG_SEARCH_PATHS: &[&str] = &["config.json", "../../config.json"];

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Versioning and logging.
    pub system: SystemConfig,
    /// Bind address for the gateway plane.
    pub network: NetworkConfig,
    /// Policy inputs.
    pub security: SecurityConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            system: SystemConfig::default(),
            network: NetworkConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

/// System section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Reported version string.
    pub version: String,
    /// Deployment environment label.
    pub environment: String,
    /// Default log level when `--log-level` is not given.
    pub log_level: String,
    /// Default log file when `--log-file` is not given. Empty means stdout.
    pub log_file: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            version: "3.0.0".to_string(),
            environment: "development".to_string(),
            log_level: "info".to_string(),
            log_file: String::new(),
        }
    }
}

/// Network section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host the gateway plane binds.
    pub kernel_host: String,
    /// Port the gateway plane binds. Overridden by `--ghost-port`.
    pub kernel_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            kernel_host: "127.0.0.1".to_string(),
            kernel_port: 5005,
        }
    }
}

/// Security section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Gates the keyword sweep.
    pub safe_mode: bool,
    /// Blocked-keyword list; the canonical defaults when absent.
    pub blocked_keywords: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            safe_mode: true,
            blocked_keywords: DEFAULT_BLOCKED_KEYWORDS
                .iter()
                .map(|k| (*k).to_string())
                .collect(),
        }
    }
}

/// Configuration load failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file existed but could not be read.
    #[error("failed to read config at {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file existed but was not valid JSON for this schema.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

impl KernelConfig {
    /// Loads configuration from an explicit path.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed. A malformed config is a
    /// boot error, not something to silently default away.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Probes the search paths and loads the first config found; absent
    /// files yield the defaults.
    ///
    /// # Errors
    ///
    /// Fails only when a file is present but malformed.
    pub fn discover() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for candidate in CONFIG_SEARCH_PATHS {
            let path = Path::new(candidate);
            if path.exists() {
                return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
            }
        }
        Ok((Self::default(), None))
    }

    /// The policy inputs derived from the security section.
    #[must_use]
    pub fn policy(&self) -> crate::policy::PolicyConfig {
        crate::policy::PolicyConfig {
            safe_mode: self.security.safe_mode,
            blocked_keywords: self.security.blocked_keywords.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_safe() {
        let config = KernelConfig::default();
        assert!(config.security.safe_mode);
        assert!(config
            .security
            .blocked_keywords
            .iter()
            .any(|k| k == "rm -rf"));
        assert_eq!(config.network.kernel_port, 5005);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let parsed: KernelConfig =
            serde_json::from_str(r#"{"network": {"kernel_port": 6000}}"#).unwrap();
        assert_eq!(parsed.network.kernel_port, 6000);
        assert_eq!(parsed.network.kernel_host, "127.0.0.1");
        assert!(parsed.security.safe_mode);
    }

    #[test]
    fn policy_reflects_security_section() {
        let mut config = KernelConfig::default();
        config.security.safe_mode = false;
        config.security.blocked_keywords = vec!["frobnicate".to_string()];
        let policy = config.policy();
        assert!(!policy.safe_mode);
        assert_eq!(policy.blocked_keywords, vec!["frobnicate".to_string()]);
    }
}
