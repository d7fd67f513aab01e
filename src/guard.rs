//! Process-start wiring
//!
//! `EgressGuard` turns a loaded configuration into the policy, audit sink,
//! transport and mediator that the rest of the process shares. It is built
//! once; collaborators receive clones of the mediator.

use std::path::Path;
use std::sync::Arc;

use crate::audit::{AuditSink, FileAuditSink};
use crate::config::{self, EgressConfig};
use crate::error::Result;
use crate::mediator::NetworkMediator;
use crate::policy::PolicyStore;
use crate::selftest::{SelfTestHarness, SelfTestReport};
use crate::transport::HttpTransport;

/// Loaded security context for one process
pub struct EgressGuard {
    policy: Arc<PolicyStore>,
    audit: Arc<FileAuditSink>,
    mediator: NetworkMediator,
}

impl EgressGuard {
    /// Resolve the config path, load it and wire everything up
    pub fn init(explicit_config: Option<&Path>) -> Result<Self> {
        let path = config::resolve_path(explicit_config);
        let config = EgressConfig::load(&path)?;
        Self::from_config(&config)
    }

    pub fn from_config(config: &EgressConfig) -> Result<Self> {
        let policy = Arc::new(config.policy()?);
        let timeout = config.timeout()?;
        let audit = Arc::new(FileAuditSink::open(config.audit_path())?);
        let transport = Arc::new(HttpTransport::new(timeout)?);
        let mediator = NetworkMediator::new(Arc::clone(&policy), audit.clone(), transport);

        tracing::info!(
            mode = %policy.mode(),
            audit_log = %audit.path().display(),
            timeout_secs = timeout.as_secs(),
            "Egress guard initialised"
        );

        Ok(Self {
            policy,
            audit,
            mediator,
        })
    }

    pub fn policy(&self) -> &PolicyStore {
        &self.policy
    }

    /// The mediator to hand to every collaborator
    pub fn mediator(&self) -> &NetworkMediator {
        &self.mediator
    }

    pub fn audit(&self) -> Arc<dyn AuditSink> {
        self.audit.clone()
    }

    pub fn audit_path(&self) -> &Path {
        self.audit.path()
    }

    /// Run the security self-test against the deployed policy
    pub async fn self_test(&self) -> Result<SelfTestReport> {
        SelfTestHarness::run_all(&self.policy, &self.mediator, self.mediator.sanitizer()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SecurityMode;

    fn config_in(dir: &tempfile::TempDir, security: &str) -> EgressConfig {
        let yaml = format!(
            "{}\naudit_log:\n  file: {}\n",
            security,
            dir.path().join("audit.log").display()
        );
        EgressConfig::from_yaml(&yaml).unwrap()
    }

    #[tokio::test]
    async fn test_offline_guard_self_test_writes_audit_log() {
        let dir = tempfile::tempdir().unwrap();
        let guard = EgressGuard::from_config(&config_in(&dir, "security:\n  mode: offline")).unwrap();
        assert_eq!(guard.policy().mode(), SecurityMode::Offline);

        let report = guard.self_test().await.unwrap();
        assert!(report.all_passed(), "{:?}", report.results);

        let events = guard.audit().read_recent(100).unwrap();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.name() == "self_test_result"));
    }

    #[test]
    fn test_init_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            format!(
                "security:\n  mode: egress\n  egress:\n    allowlist_domains: [arxiv.org]\naudit_log:\n  file: {}\n",
                dir.path().join("logs/audit.log").display()
            ),
        )
        .unwrap();

        let guard = EgressGuard::init(Some(&path)).unwrap();
        assert!(guard.policy().is_allowed("export.arxiv.org"));
        assert!(guard.audit_path().ends_with("logs/audit.log"));
    }

    #[test]
    fn test_init_missing_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = EgressGuard::init(Some(&dir.path().join("missing.yaml")))
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }
}
