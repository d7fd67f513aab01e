//! Security policy: mode, domain allowlist, and sanitization limits
//!
//! A `PolicyStore` is built once at process start and is read-only for the
//! lifetime of the process. Changing policy requires a restart.

use crate::error::{EgressError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Default maximum length of sanitized query text
pub const DEFAULT_MAX_QUERY_LENGTH: usize = 100;

/// Process-wide security posture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Deny all outbound network access
    Offline,
    /// Allow outbound access to allowlisted domains only
    Egress,
}

impl SecurityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Egress => "egress",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityMode {
    type Err = EgressError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "offline" => Ok(Self::Offline),
            "egress" => Ok(Self::Egress),
            other => Err(EgressError::Config(format!(
                "Invalid security mode: '{}' (expected 'offline' or 'egress')",
                other
            ))),
        }
    }
}

/// A permitted domain: matches the host itself and any subdomain of it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct AllowlistEntry(String);

impl AllowlistEntry {
    /// Parse and normalise a domain pattern
    ///
    /// Accepts `example.org`, `.example.org` and `*.example.org`; all three
    /// mean "example.org and its subdomains".
    pub fn parse(raw: &str) -> Result<Self> {
        let mut domain = raw.trim().to_ascii_lowercase();
        if let Some(rest) = domain.strip_prefix("*.") {
            domain = rest.to_string();
        }
        let domain = domain.trim_start_matches('.').trim_end_matches('.');

        if domain.is_empty() {
            return Err(EgressError::Config(format!(
                "Invalid allowlist entry '{}': empty domain",
                raw
            )));
        }
        if domain
            .chars()
            .any(|c| c == '/' || c == ':' || c == '*' || c.is_whitespace())
        {
            return Err(EgressError::Config(format!(
                "Invalid allowlist entry '{}': expected a bare domain name",
                raw
            )));
        }
        Ok(Self(domain.to_string()))
    }

    /// The normalised domain
    pub fn domain(&self) -> &str {
        &self.0
    }

    /// Exact host match or subdomain match (`a.b.example.org` for `example.org`)
    ///
    /// `host` must already be normalised by [`normalize_host`].
    pub fn matches(&self, host: &str) -> bool {
        host == self.0
            || (host.len() > self.0.len()
                && host.ends_with(self.0.as_str())
                && host.as_bytes()[host.len() - self.0.len() - 1] == b'.')
    }
}

impl fmt::Display for AllowlistEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase a host and drop a trailing root dot
pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Rules governing `QuerySanitizer`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizationPolicy {
    /// Maximum sanitized length in characters (always > 0)
    pub max_query_length: usize,
    /// Remove all quotation-mark characters
    pub strip_quote_characters: bool,
    /// Remove characters outside the alphanumeric/space/basic-punctuation set
    pub strip_special_characters: bool,
}

impl SanitizationPolicy {
    /// Build a policy, rejecting a zero length limit
    pub fn new(max_query_length: usize, strip: bool) -> Result<Self> {
        if max_query_length == 0 {
            return Err(EgressError::Config(
                "security.egress.max_query_length must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            max_query_length,
            strip_quote_characters: strip,
            strip_special_characters: strip,
        })
    }
}

impl Default for SanitizationPolicy {
    fn default() -> Self {
        Self {
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
            strip_quote_characters: true,
            strip_special_characters: true,
        }
    }
}

/// Immutable, loaded-once security configuration
#[derive(Debug, Clone)]
pub struct PolicyStore {
    mode: SecurityMode,
    allowlist: BTreeSet<AllowlistEntry>,
    sanitization: SanitizationPolicy,
}

impl PolicyStore {
    /// Build a policy, failing closed on an ambiguous configuration
    ///
    /// Egress mode with an empty allowlist is rejected rather than treated
    /// as allow-all.
    pub fn new(
        mode: SecurityMode,
        allowlist: impl IntoIterator<Item = AllowlistEntry>,
        sanitization: SanitizationPolicy,
    ) -> Result<Self> {
        let allowlist: BTreeSet<AllowlistEntry> = allowlist.into_iter().collect();

        if mode == SecurityMode::Egress && allowlist.is_empty() {
            return Err(EgressError::Config(
                "security.mode=egress requires a non-empty security.egress.allowlist_domains"
                    .to_string(),
            ));
        }
        if sanitization.max_query_length == 0 {
            return Err(EgressError::Config(
                "security.egress.max_query_length must be a positive integer".to_string(),
            ));
        }
        if mode == SecurityMode::Offline && !allowlist.is_empty() {
            tracing::info!(
                entries = allowlist.len(),
                "Offline mode: allowlist is loaded but inactive"
            );
        }

        Ok(Self {
            mode,
            allowlist,
            sanitization,
        })
    }

    /// Offline policy with default sanitization
    pub fn offline() -> Self {
        Self {
            mode: SecurityMode::Offline,
            allowlist: BTreeSet::new(),
            sanitization: SanitizationPolicy::default(),
        }
    }

    /// Egress policy from raw domain strings with default sanitization
    pub fn egress<I, S>(domains: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = domains
            .into_iter()
            .map(|d| AllowlistEntry::parse(d.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(SecurityMode::Egress, entries, SanitizationPolicy::default())
    }

    /// Whether an outbound request to `host` is permitted
    ///
    /// Always false in offline mode.
    pub fn is_allowed(&self, host: &str) -> bool {
        match self.mode {
            SecurityMode::Offline => false,
            SecurityMode::Egress => {
                let host = normalize_host(host);
                !host.is_empty() && self.allowlist.iter().any(|entry| entry.matches(&host))
            }
        }
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    pub fn allowlist(&self) -> impl Iterator<Item = &AllowlistEntry> {
        self.allowlist.iter()
    }

    pub fn sanitization(&self) -> &SanitizationPolicy {
        &self.sanitization
    }
}
