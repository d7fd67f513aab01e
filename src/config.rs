//! Configuration loading
//!
//! YAML, read once at process start. Anything ambiguous fails closed with
//! `EgressError::Config`; there is no fallback to a permissive default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EgressError, Result};
use crate::policy::{AllowlistEntry, PolicyStore, SanitizationPolicy, SecurityMode};

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "A3S_EGRESS_CONFIG";

/// Config file used when neither a flag nor the env var is given
pub const DEFAULT_CONFIG_PATH: &str = "./configs/config.yaml";

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgressConfig {
    /// Required; a file without it is rejected
    pub security: Option<SecurityConfig>,

    #[serde(default)]
    pub audit_log: AuditLogConfig,
}

/// `security:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// `offline` or `egress` (case-insensitive)
    pub mode: String,

    #[serde(default)]
    pub egress: EgressSection,
}

/// `security.egress:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgressSection {
    #[serde(default)]
    pub allowlist_domains: Vec<String>,

    /// Strip quote and special characters from outbound query text
    #[serde(default = "default_sanitize_queries")]
    pub sanitize_queries: bool,

    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,

    /// Transport timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// `audit_log:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogConfig {
    #[serde(default = "default_audit_file")]
    pub file: PathBuf,
}

fn default_sanitize_queries() -> bool {
    true
}

fn default_max_query_length() -> usize {
    crate::policy::DEFAULT_MAX_QUERY_LENGTH
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_audit_file() -> PathBuf {
    PathBuf::from("./audit.log")
}

impl Default for EgressSection {
    fn default() -> Self {
        Self {
            allowlist_domains: Vec::new(),
            sanitize_queries: default_sanitize_queries(),
            max_query_length: default_max_query_length(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            file: default_audit_file(),
        }
    }
}

/// Resolve the config path: explicit flag, then `A3S_EGRESS_CONFIG`, then
/// `./configs/config.yaml`
pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    std::env::var_os(CONFIG_ENV_VAR)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

impl EgressConfig {
    /// Read and parse the file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EgressError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_yaml(&content)?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parse configuration text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: EgressConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    fn security(&self) -> Result<&SecurityConfig> {
        self.security
            .as_ref()
            .ok_or_else(|| EgressError::Config("Missing required 'security' section".to_string()))
    }

    /// Validate into the immutable policy
    pub fn policy(&self) -> Result<PolicyStore> {
        let security = self.security()?;
        let mode: SecurityMode = security.mode.parse()?;
        let egress = &security.egress;

        let entries = egress
            .allowlist_domains
            .iter()
            .map(|d| AllowlistEntry::parse(d))
            .collect::<Result<Vec<_>>>()?;
        let sanitization = SanitizationPolicy::new(egress.max_query_length, egress.sanitize_queries)?;

        let policy = PolicyStore::new(mode, entries, sanitization)?;
        tracing::info!(
            mode = %policy.mode(),
            allowlist = policy.allowlist().count(),
            max_query_length = sanitization.max_query_length,
            "Security policy loaded"
        );
        Ok(policy)
    }

    /// Transport timeout; zero is rejected
    pub fn timeout(&self) -> Result<Duration> {
        let secs = self.security()?.egress.timeout_secs;
        if secs == 0 {
            return Err(EgressError::Config(
                "security.egress.timeout_secs must be a positive integer".to_string(),
            ));
        }
        Ok(Duration::from_secs(secs))
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_log.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_minimal() {
        let config = EgressConfig::from_yaml("security:\n  mode: offline\n").unwrap();
        let policy = config.policy().unwrap();
        assert_eq!(policy.mode(), SecurityMode::Offline);
        assert_eq!(config.audit_path(), Path::new("./audit.log"));
        assert_eq!(config.timeout().unwrap(), Duration::from_secs(10));
        assert_eq!(policy.sanitization(), &SanitizationPolicy::default());
    }

    #[test]
    fn test_egress_full() {
        let yaml = r#"
security:
  mode: " Egress "
  egress:
    allowlist_domains: ["arxiv.org", "*.wikipedia.org"]
    sanitize_queries: false
    max_query_length: 40
    timeout_secs: 3
audit_log:
  file: /var/log/a3s/audit.log
"#;
        let config = EgressConfig::from_yaml(yaml).unwrap();
        let policy = config.policy().unwrap();
        assert_eq!(policy.mode(), SecurityMode::Egress);
        assert!(policy.is_allowed("en.wikipedia.org"));
        assert!(!policy.is_allowed("evil.example"));
        assert_eq!(policy.sanitization().max_query_length, 40);
        assert!(!policy.sanitization().strip_quote_characters);
        assert_eq!(config.timeout().unwrap(), Duration::from_secs(3));
        assert_eq!(config.audit_path(), Path::new("/var/log/a3s/audit.log"));
    }

    #[test]
    fn test_fail_closed_cases() {
        let cases = [
            "audit_log:\n  file: x.log\n",
            "security:\n  mode: permissive\n",
            "security:\n  mode: egress\n",
            "security:\n  mode: egress\n  egress:\n    allowlist_domains: []\n",
            "security:\n  mode: egress\n  egress:\n    allowlist_domains: [\"http://a.org/\"]\n",
            "security:\n  mode: offline\n  egress:\n    max_query_length: 0\n",
        ];
        for yaml in cases {
            let err = EgressConfig::from_yaml(yaml)
                .and_then(|c| c.policy())
                .unwrap_err();
            assert!(err.is_fatal(), "{yaml}: {err}");
        }
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = EgressConfig::from_yaml(
            "security:\n  mode: offline\n  egress:\n    timeout_secs: 0\n",
        )
        .unwrap();
        assert!(matches!(config.timeout(), Err(EgressError::Config(_))));
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = EgressConfig::from_yaml("security: [unclosed").unwrap_err();
        assert!(matches!(err, EgressError::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EgressConfig::load(dir.path().join("nope.yaml")).unwrap_err();
        assert!(err.to_string().contains("nope.yaml"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "security:\n  mode: offline\n").unwrap();
        let config = EgressConfig::load(&path).unwrap();
        assert_eq!(config.policy().unwrap().mode(), SecurityMode::Offline);
    }

    #[test]
    fn test_resolve_path_precedence() {
        let explicit = Path::new("/tmp/explicit.yaml");
        assert_eq!(resolve_path(Some(explicit)), explicit);

        std::env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.yaml");
        assert_eq!(resolve_path(None), PathBuf::from("/tmp/from-env.yaml"));
        std::env::remove_var(CONFIG_ENV_VAR);
        assert_eq!(resolve_path(None), PathBuf::from(DEFAULT_CONFIG_PATH));
    }
}
