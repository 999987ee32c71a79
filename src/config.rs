use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::schedule::RefreshInterval;

pub const DEFAULT_URL_ENV: &str = "KIOSK_BACKEND_URL";
pub const DEFAULT_ANON_KEY_ENV: &str = "KIOSK_ANON_KEY";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Hosted backend connection settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_env: Option<String>,
    #[serde(default)]
    pub anon_key: Option<String>,
    #[serde(default)]
    pub anon_key_env: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl BackendConfig {
    /// Resolve the backend URL from config or environment
    pub fn resolve_url(&self) -> Result<String> {
        let env_var = self.url_env.as_deref().unwrap_or(DEFAULT_URL_ENV);
        resolve(&self.url, env_var).ok_or_else(|| {
            anyhow!(
                "No backend URL configured. Set backend.url in .kiosk/config.toml, pass --url, or export {}",
                env_var
            )
        })
    }

    /// Resolve the anonymous API key from config or environment
    pub fn resolve_anon_key(&self) -> Result<String> {
        let env_var = self.anon_key_env.as_deref().unwrap_or(DEFAULT_ANON_KEY_ENV);
        resolve(&self.anon_key, env_var).ok_or_else(|| {
            anyhow!(
                "No anon key configured. Set backend.anon_key, pass --anon-key, or export {}",
                env_var
            )
        })
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
    }
}

// Direct value takes priority over the environment
fn resolve(direct: &Option<String>, env_var: &str) -> Option<String> {
    if let Some(value) = direct {
        if !value.trim().is_empty() {
            return Some(value.clone());
        }
    }
    std::env::var(env_var)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Where local state (session, last venue, activity log) is kept
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StateConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub activity_log: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RefreshConfig {
    /// Default auto-refresh interval for `watch`: off, 30, 60 or 300
    #[serde(default)]
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MachineConfig {
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Venue to use when no machine session is present
    #[serde(default)]
    pub venue: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub machine: MachineConfig,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.kiosk/config.local.toml) > project (.kiosk/config.toml) > user (~/.kiosk/config.toml)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".kiosk").join("config.toml");
            if user_config.exists() {
                config.merge(Self::load_from(&user_config)?);
            }
        }

        let project_config = Path::new(".kiosk").join("config.toml");
        if project_config.exists() {
            config.merge(Self::load_from(&project_config)?);
        }

        // Machine-specific overrides, should be gitignored
        let local_config = Path::new(".kiosk").join("config.local.toml");
        if local_config.exists() {
            config.merge(Self::load_from(&local_config)?);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Invalid config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Merge another config into this one (other takes priority for every field it sets)
    pub fn merge(&mut self, other: Config) {
        merge_opt(&mut self.backend.url, other.backend.url);
        merge_opt(&mut self.backend.url_env, other.backend.url_env);
        merge_opt(&mut self.backend.anon_key, other.backend.anon_key);
        merge_opt(&mut self.backend.anon_key_env, other.backend.anon_key_env);
        merge_opt(&mut self.backend.timeout_ms, other.backend.timeout_ms);

        merge_opt(&mut self.state.dir, other.state.dir);
        merge_opt(&mut self.state.activity_log, other.state.activity_log);

        merge_opt(&mut self.refresh.interval, other.refresh.interval);

        merge_opt(&mut self.machine.user_agent, other.machine.user_agent);
        merge_opt(&mut self.machine.venue, other.machine.venue);
    }

    /// State directory, `~/.kiosk` unless configured
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state.dir {
            return dir.clone();
        }
        dirs::home_dir()
            .map(|home| home.join(".kiosk"))
            .unwrap_or_else(|| PathBuf::from(".kiosk"))
    }

    pub fn activity_log_enabled(&self) -> bool {
        self.state.activity_log.unwrap_or(true)
    }

    /// Configured watch interval; invalid values are reported by `validate`
    pub fn refresh_interval(&self) -> RefreshInterval {
        self.refresh
            .interval
            .as_deref()
            .and_then(RefreshInterval::from_str)
            .unwrap_or(RefreshInterval::Secs30)
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Some(url) = &self.backend.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(ValidationError {
                    field: "backend.url".to_string(),
                    message: format!("Expected an http(s) URL, got '{}'", url),
                });
            }
        }

        if self.backend.timeout_ms == Some(0) {
            errors.push(ValidationError {
                field: "backend.timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if let Some(interval) = &self.refresh.interval {
            if RefreshInterval::from_str(interval).is_none() {
                errors.push(ValidationError {
                    field: "refresh.interval".to_string(),
                    message: format!("Invalid interval '{}', expected off, 30, 60 or 300", interval),
                });
            }
        }

        if let Some(venue) = &self.machine.venue {
            if venue.trim().is_empty() {
                errors.push(ValidationError {
                    field: "machine.venue".to_string(),
                    message: "Must not be empty".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn merge_opt<T>(target: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        *target = other;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
[backend]
url = "https://example.supabase.co"
anon_key = "anon"
timeout_ms = 5000

[state]
dir = "/var/lib/kiosk"
activity_log = false

[refresh]
interval = "60"

[machine]
venue = "venue-1"
"#,
        )
        .unwrap();
        assert_eq!(config.backend.resolve_url().unwrap(), "https://example.supabase.co");
        assert_eq!(config.backend.resolve_anon_key().unwrap(), "anon");
        assert_eq!(config.backend.timeout_ms(), 5000);
        assert_eq!(config.state_dir(), PathBuf::from("/var/lib/kiosk"));
        assert!(!config.activity_log_enabled());
        assert_eq!(config.refresh_interval(), RefreshInterval::Secs60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend.timeout_ms(), 30_000);
        assert!(config.activity_log_enabled());
        assert_eq!(config.refresh_interval(), RefreshInterval::Secs30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_fallback() {
        let backend = BackendConfig {
            url_env: Some("KIOSK_TEST_URL_ENV_FALLBACK".to_string()),
            anon_key_env: Some("KIOSK_TEST_KEY_ENV_UNSET".to_string()),
            ..Default::default()
        };
        std::env::set_var("KIOSK_TEST_URL_ENV_FALLBACK", "http://localhost:54321");
        assert_eq!(backend.resolve_url().unwrap(), "http://localhost:54321");

        let err = backend.resolve_anon_key().unwrap_err();
        assert!(err.to_string().contains("KIOSK_TEST_KEY_ENV_UNSET"));
    }

    #[test]
    fn test_merge_overrides_only_set_fields() {
        let mut base: Config = toml::from_str(
            r#"
[backend]
url = "https://base.example"
anon_key = "base-key"
"#,
        )
        .unwrap();
        let local: Config = toml::from_str(
            r#"
[backend]
anon_key = "local-key"

[refresh]
interval = "off"
"#,
        )
        .unwrap();
        base.merge(local);
        assert_eq!(base.backend.url.as_deref(), Some("https://base.example"));
        assert_eq!(base.backend.anon_key.as_deref(), Some("local-key"));
        assert_eq!(base.refresh_interval(), RefreshInterval::Off);
    }

    #[test]
    fn test_validate_reports_all_errors() {
        let mut config = Config::default();
        config.backend.url = Some("example.com".to_string());
        config.backend.timeout_ms = Some(0);
        config.refresh.interval = Some("45".to_string());
        config.machine.venue = Some(" ".to_string());

        let errors = config.validate().unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["backend.url", "backend.timeout_ms", "refresh.interval", "machine.venue"]
        );
        assert!(errors[2].message.contains("off, 30, 60 or 300"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[machine]\nuser_agent = \"kiosk-test\"\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.machine.user_agent.as_deref(), Some("kiosk-test"));

        std::fs::write(&path, "[machine\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid config"));
    }
}
