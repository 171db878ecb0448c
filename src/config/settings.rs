//! Loopback Konfiguration
//!
//! Wird aus einer JSON-Datei geladen (optional), CLI-Flags überschreiben
//! einzelne Werte. Fehlt die Datei, gelten die Standardwerte.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use webrtc::ice_transport::ice_server::RTCIceServer;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Öffentlicher Google STUN Server
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Standard Log-Filter, RUST_LOG hat Vorrang
pub const DEFAULT_LOG_FILTER: &str = "loopback=info,loopback_lib=info,webrtc=warn";

const CONFIG_FILE_NAME: &str = "config.json";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid ICE server URL: {0}")]
    InvalidIceUrl(String),

    #[error("TURN server {0} requires username and credential")]
    MissingTurnCredentials(String),
}

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// Ein ICE Server (STUN oder TURN)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for url in &self.urls {
            let scheme = url.split(':').next().unwrap_or_default();
            match scheme {
                "stun" | "stuns" => {}
                "turn" | "turns" => {
                    if self.username.is_none() || self.credential.is_none() {
                        return Err(ConfigError::MissingTurnCredentials(url.clone()));
                    }
                }
                _ => return Err(ConfigError::InvalidIceUrl(url.clone())),
            }
            if url.len() <= scheme.len() + 1 {
                return Err(ConfigError::InvalidIceUrl(url.clone()));
            }
        }
        Ok(())
    }
}

impl From<IceServerConfig> for RTCIceServer {
    fn from(server: IceServerConfig) -> Self {
        RTCIceServer {
            urls: server.urls,
            username: server.username.unwrap_or_default(),
            credential: server.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Standard STUN Konfiguration (ein öffentlicher Server, kein TURN)
pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig::stun(DEFAULT_STUN_SERVER)]
}

// ============================================================================
// FAILURE REPORTING
// ============================================================================

/// Wie Verbindungs- und Negotiation-Fehler gemeldet werden
///
/// Capture-Fehler lösen unabhängig davon immer einen Alert aus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReporting {
    /// Loggen und Alert anzeigen
    #[default]
    Alert,
    /// Nur loggen
    LogOnly,
}

// ============================================================================
// LOOPBACK CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    pub ice_servers: Vec<IceServerConfig>,
    pub failure_reporting: FailureReporting,
    pub log_filter: String,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            failure_reporting: FailureReporting::default(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl LoopbackConfig {
    /// Lädt die Konfiguration
    ///
    /// Mit explizitem Pfad muss die Datei existieren. Ohne Pfad wird
    /// `<config_dir>/loopback/config.json` gelesen, falls vorhanden.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!("Loading config from {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Ermittelt den Standardpfad der Konfigurationsdatei
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "loopback", "loopback")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ice_servers.iter().try_for_each(IceServerConfig::validate)
    }

    /// Ersetzt die ICE Server durch die übergebenen STUN URLs
    pub fn with_stun_servers(mut self, urls: Vec<String>) -> Self {
        if !urls.is_empty() {
            self.ice_servers = urls.into_iter().map(IceServerConfig::stun).collect();
        }
        self
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_single_stun_server() {
        let config = LoopbackConfig::default();

        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls, vec![DEFAULT_STUN_SERVER]);
        assert!(config.ice_servers[0].username.is_none());
        assert_eq!(config.failure_reporting, FailureReporting::Alert);
        assert_eq!(FailureReporting::default(), FailureReporting::Alert);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "failure_reporting": "log_only" }}"#).unwrap();

        let config = LoopbackConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.failure_reporting, FailureReporting::LogOnly);
        assert_eq!(config.ice_servers, default_ice_servers());
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = LoopbackConfig::load(Some(&dir.path().join("missing.json")));

        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_invalid_json_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let result = LoopbackConfig::load(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_turn_requires_credentials() {
        let config = LoopbackConfig {
            ice_servers: vec![IceServerConfig {
                urls: vec!["turn:turn.example.org:3478".to_string()],
                username: None,
                credential: None,
            }],
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingTurnCredentials(_))
        ));
    }

    #[test]
    fn test_invalid_ice_scheme_rejected() {
        let config = LoopbackConfig::default().with_stun_servers(vec!["http://x".to_string()]);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidIceUrl(_))));

        let config = LoopbackConfig::default().with_stun_servers(vec!["stun:".to_string()]);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidIceUrl(_))));
    }

    #[test]
    fn test_ice_server_conversion() {
        let server: RTCIceServer = IceServerConfig {
            urls: vec!["turn:turn.example.org".to_string()],
            username: Some("user".to_string()),
            credential: Some("secret".to_string()),
        }
        .into();

        assert_eq!(server.username, "user");
        assert_eq!(server.credential, "secret");
    }
}
