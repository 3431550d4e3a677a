use std::collections::BTreeSet;

use anyhow::bail;
use serde::Deserialize;

use crate::documents::DocumentKind;
use crate::sandbox::external::normalize_domain;
use crate::sandbox::{ContextOverrides, FetchSettings};

/// Trigger configuration applied to every harness built by the binary.
///
/// Every section is optional; an empty file yields the built-in defaults.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    pub limits: LimitsConfig,
    pub network: NetworkConfig,
    pub documents: DocumentsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_documents_per_run: Option<usize>,
    pub rate_limit_per_domain: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Added to the built-in allowlist
    pub allowed_domains: Vec<String>,
    #[serde(flatten)]
    pub fetch: FetchSettings,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DocumentsConfig {
    /// `None` keeps every supported kind
    pub allowed_types: Option<BTreeSet<DocumentKind>>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used when RUST_LOG is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "skill_harness=info".to_string(),
        }
    }
}

impl HarnessConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses TOML after expanding environment variables like ${SKILL_DOMAINS}.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let expanded = shellexpand::env(content)?;
        let config: HarnessConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for domain in &self.network.allowed_domains {
            if normalize_domain(domain).is_none() {
                bail!("invalid entry in network.allowed_domains: '{domain}'");
            }
        }
        if self.network.fetch.max_text_chars == 0 {
            bail!("network.max_text_chars must be greater than zero");
        }
        Ok(())
    }

    /// Context overrides for harness construction.
    pub fn overrides(&self) -> ContextOverrides {
        ContextOverrides {
            max_documents_per_run: self.limits.max_documents_per_run,
            rate_limit_per_domain: self.limits.rate_limit_per_domain,
            allowed_external_domains: self.network.allowed_domains.clone(),
            allowed_document_types: self.documents.allowed_types.clone(),
        }
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        self.network.fetch.clone()
    }
}
