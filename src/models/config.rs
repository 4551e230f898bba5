//! Configuration models for mpdkit.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns at runtime via config file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The Spotify Web API caps audio-features requests at 100 ids.
pub const AUDIO_FEATURES_BATCH_LIMIT: usize = 100;

/// Top-level configuration for mpdkit.
///
/// I^R resolved: All configurable parameters are explicit. Every section
/// has full defaults, so an empty config file is valid for everything
/// except credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Spotify Web API configuration
    #[serde(default)]
    pub spotify: SpotifyConfig,

    /// Slice extraction settings
    #[serde(default)]
    pub extract: ExtractConfig,

    /// Audio-feature enrichment settings
    #[serde(default)]
    pub enrich: EnrichConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Spotify Web API configuration.
///
/// B_i: Credentials may come from the config file or the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyConfig {
    /// Client id (can also be set via env var; supports ${VAR} expansion)
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret (can also be set via env var; supports ${VAR} expansion)
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Environment variable name for the client id
    #[serde(default = "default_client_id_env")]
    pub client_id_env: String,

    /// Environment variable name for the client secret
    #[serde(default = "default_client_secret_env")]
    pub client_secret_env: String,

    /// Base URL for the Spotify Web API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Token endpoint for the client-credentials flow
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries on failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_client_id_env() -> String {
    "SPOTIFY_CLIENT_ID".to_string()
}

fn default_client_secret_env() -> String {
    "SPOTIFY_CLIENT_SECRET".to_string()
}

fn default_api_base_url() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_auth_url() -> String {
    "https://accounts.spotify.com/api/token".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            client_id_env: default_client_id_env(),
            client_secret_env: default_client_secret_env(),
            api_base_url: default_api_base_url(),
            auth_url: default_auth_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// Slice extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Directory containing `mpd.slice.*.json` files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Cap on slice files to process (None = all files)
    #[serde(default)]
    pub max_slices: Option<usize>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/raw")
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_slices: None,
        }
    }
}

/// Audio-feature enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Track URIs per audio-features request (clamped to the API's 100-id limit)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent batch requests in flight
    #[serde(default = "default_fetchers")]
    pub fetchers: usize,

    /// Delay between waves of batches, in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Save the checkpoint every N waves
    #[serde(default = "default_save_every")]
    pub save_every: usize,
}

fn default_batch_size() -> usize {
    AUDIO_FEATURES_BATCH_LIMIT
}

fn default_fetchers() -> usize {
    4
}

fn default_delay_ms() -> u64 {
    100
}

fn default_save_every() -> usize {
    10
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            fetchers: default_fetchers(),
            delay_ms: default_delay_ms(),
            save_every: default_save_every(),
        }
    }
}

impl EnrichConfig {
    /// Batch size clamped to the API limit.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.min(AUDIO_FEATURES_BATCH_LIMIT)
    }
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Interim output directory
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Checkpoint directory for resume support
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Whether to write a `.failed` list of tracks that could not be fetched
    #[serde(default = "default_true")]
    pub write_failed: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/interim")
}

fn default_true() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            checkpoint_dir: None,
            write_failed: default_true(),
        }
    }
}

/// Resolved Spotify credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Load from a TOML file if it exists, otherwise fall back to defaults.
    ///
    /// Subcommands that never touch the API (count, extract) work without
    /// a config file.
    pub fn load_or_default(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve Spotify credentials from config or environment.
    ///
    /// B_i(credentials available) → Result
    pub fn resolve_credentials(&self) -> Result<Credentials, ConfigError> {
        let client_id = match &self.spotify.client_id {
            Some(id) => expand_env_vars(id),
            None => std::env::var(&self.spotify.client_id_env).map_err(|_| {
                ConfigError::MissingCredential {
                    field: "client_id".to_string(),
                    env_var: self.spotify.client_id_env.clone(),
                }
            })?,
        };

        let client_secret = match &self.spotify.client_secret {
            Some(secret) => expand_env_vars(secret),
            None => std::env::var(&self.spotify.client_secret_env).map_err(|_| {
                ConfigError::MissingCredential {
                    field: "client_secret".to_string(),
                    env_var: self.spotify.client_secret_env.clone(),
                }
            })?,
        };

        if client_id.is_empty() || client_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "client id and client secret must be non-empty".to_string(),
            ));
        }

        Ok(Credentials {
            client_id,
            client_secret,
        })
    }

    /// Validate parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enrich.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "enrich.batch_size must be at least 1".to_string(),
            ));
        }
        if self.enrich.fetchers == 0 {
            return Err(ConfigError::Invalid(
                "enrich.fetchers must be at least 1".to_string(),
            ));
        }
        if self.enrich.save_every == 0 {
            return Err(ConfigError::Invalid(
                "enrich.save_every must be at least 1".to_string(),
            ));
        }
        if self.spotify.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "spotify.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error
/// - I^B materialized: Missing required values
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing Spotify {field}: set {env_var} env var or {field} in [spotify]")]
    MissingCredential { field: String, env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.spotify.api_base_url, "https://api.spotify.com/v1");
        assert_eq!(config.spotify.auth_url, "https://accounts.spotify.com/api/token");
        assert_eq!(config.enrich.batch_size, 100);
        assert_eq!(config.enrich.fetchers, 4);
        assert_eq!(config.extract.data_dir, PathBuf::from("data/raw"));
        assert_eq!(config.output.dir, PathBuf::from("data/interim"));
        assert!(config.output.write_failed);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_section_overrides() {
        let config: Config = toml::from_str(
            r#"
            [enrich]
            batch_size = 250
            delay_ms = 0

            [extract]
            data_dir = "fixtures/mpd"
            max_slices = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.enrich.batch_size, 250);
        // Clamped to the API's 100-id limit
        assert_eq!(config.enrich.effective_batch_size(), 100);
        assert_eq!(config.enrich.delay_ms, 0);
        assert_eq!(config.extract.max_slices, Some(5));
        assert_eq!(config.extract.data_dir, PathBuf::from("fixtures/mpd"));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config: Config = toml::from_str("[enrich]\nbatch_size = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("MPDKIT_TEST_VAR", "resolved");
        assert_eq!(expand_env_vars("${MPDKIT_TEST_VAR}"), "resolved");
        assert_eq!(expand_env_vars("pre-${MPDKIT_TEST_VAR}-post"), "pre-resolved-post");
        assert_eq!(expand_env_vars("${MPDKIT_UNSET_VAR}"), "${MPDKIT_UNSET_VAR}");
    }

    #[test]
    fn test_resolve_credentials_from_env() {
        std::env::set_var("MPDKIT_TEST_ID", "id-123");
        std::env::set_var("MPDKIT_TEST_SECRET", "secret-456");

        let config: Config = toml::from_str(
            r#"
            [spotify]
            client_id_env = "MPDKIT_TEST_ID"
            client_secret_env = "MPDKIT_TEST_SECRET"
            "#,
        )
        .unwrap();

        let creds = config.resolve_credentials().unwrap();
        assert_eq!(creds.client_id, "id-123");
        assert_eq!(creds.client_secret, "secret-456");
    }

    #[test]
    fn test_resolve_credentials_missing() {
        let config: Config = toml::from_str(
            r#"
            [spotify]
            client_id_env = "MPDKIT_DEFINITELY_UNSET_ID"
            client_secret_env = "MPDKIT_DEFINITELY_UNSET_SECRET"
            "#,
        )
        .unwrap();

        let err = config.resolve_credentials().unwrap_err();
        assert!(err.to_string().contains("MPDKIT_DEFINITELY_UNSET_ID"));
    }
}
