//! Runtime configuration.
//!
//! [`Config::from_env`] reads `MIRROR__*` variables (after loading a `.env`
//! file when present). Each component receives only the sub-struct it needs.

use crate::error::{MirrorError, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub csaf_base_url: String,
    pub log_to_file: bool,
    pub log_dir: String,
    pub updateinfo: UpdateInfoConfig,
    pub rebrand: RebrandConfig,
    pub normalizer: NormalizerConfig,
    pub workflow: WorkflowConfig,
}

/// Settings rendered into every updateinfo document.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateInfoConfig {
    /// Value of the `from` attribute on each `<update>`.
    pub managing_editor: String,
    /// Holder named in the `<rights>` element.
    pub company_name: String,
    /// Base URL of the public advisory pages, used for `self` references.
    pub ui_url: String,
}

/// How upstream text and identifiers are rewritten for local publication.
#[derive(Debug, Clone, Deserialize)]
pub struct RebrandConfig {
    /// Vendor name replaced by the supported product's vendor.
    pub upstream_vendor: String,
    /// Prefix stripped from upstream advisory names before the product code is prepended.
    pub upstream_prefix: String,
    /// Product names replaced by the supported product's name, longest first.
    pub upstream_product_names: Vec<String>,
    /// Prefix for ticket links; the ticket id is appended.
    pub ticket_url_prefix: String,
}

/// Which parts of an upstream document describe the products we mirror.
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizerConfig {
    /// Vendor name used in upstream titles ("<vendor> Security Advisory: ...").
    pub vendor_name: String,
    /// Name of the `product_family` branch to extract affected products from.
    pub product_family: String,
    /// Architecture to product name. Architectures absent here are skipped.
    pub arch_names: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    pub poll_timeout: Duration,
    pub match_timeout: Duration,
    pub max_retries: u32,
    pub retry_min_backoff: Duration,
    pub retry_max_backoff: Duration,
    pub match_concurrency: usize,
    pub workers_per_queue: usize,
}

impl Default for UpdateInfoConfig {
    fn default() -> Self {
        Self {
            managing_editor: "releng@example.org".to_string(),
            company_name: "Example Project".to_string(),
            ui_url: "https://errata.example.org".to_string(),
        }
    }
}

impl Default for RebrandConfig {
    fn default() -> Self {
        Self {
            upstream_vendor: "Red Hat".to_string(),
            upstream_prefix: "RH".to_string(),
            upstream_product_names: vec![
                "Red Hat Enterprise Linux".to_string(),
                "RHEL".to_string(),
            ],
            ticket_url_prefix: "https://bugzilla.redhat.com/show_bug.cgi?id=".to_string(),
        }
    }
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        let arch_names = [
            ("aarch64", "Red Hat Enterprise Linux for ARM 64"),
            ("x86_64", "Red Hat Enterprise Linux for x86_64"),
            ("s390x", "Red Hat Enterprise Linux for IBM z Systems"),
            ("ppc64le", "Red Hat Enterprise Linux for Power, little endian"),
        ]
        .into_iter()
        .map(|(arch, name)| (arch.to_string(), name.to_string()))
        .collect();

        Self {
            vendor_name: "Red Hat".to_string(),
            product_family: "Red Hat Enterprise Linux".to_string(),
            arch_names,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(3600),
            match_timeout: Duration::from_secs(43200),
            max_retries: 3,
            retry_min_backoff: Duration::from_secs(1),
            retry_max_backoff: Duration::from_secs(60),
            match_concurrency: 4,
            workers_per_queue: 1,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://advisory-mirror.db?mode=rwc".to_string(),
            csaf_base_url: "https://security.access.redhat.com/data/csaf/v2/advisories/"
                .to_string(),
            log_to_file: false,
            log_dir: "logs".to_string(),
            updateinfo: UpdateInfoConfig::default(),
            rebrand: RebrandConfig::default(),
            normalizer: NormalizerConfig::default(),
            workflow: WorkflowConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let workflow = WorkflowConfig {
            poll_timeout: parse_var(&lookup, "MIRROR__POLL_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.workflow.poll_timeout),
            match_timeout: parse_var(&lookup, "MIRROR__MATCH_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.workflow.match_timeout),
            max_retries: parse_var(&lookup, "MIRROR__MAX_RETRIES")?
                .unwrap_or(defaults.workflow.max_retries),
            match_concurrency: parse_var(&lookup, "MIRROR__MATCH_CONCURRENCY")?
                .unwrap_or(defaults.workflow.match_concurrency),
            workers_per_queue: parse_var(&lookup, "MIRROR__WORKERS_PER_QUEUE")?
                .unwrap_or(defaults.workflow.workers_per_queue),
            ..defaults.workflow
        };
        if workflow.match_concurrency == 0 || workflow.workers_per_queue == 0 {
            return Err(MirrorError::config(
                "MIRROR__MATCH_CONCURRENCY and MIRROR__WORKERS_PER_QUEUE must be at least 1",
            ));
        }

        let updateinfo = UpdateInfoConfig {
            managing_editor: lookup("MIRROR__MANAGING_EDITOR")
                .unwrap_or(defaults.updateinfo.managing_editor),
            company_name: lookup("MIRROR__COMPANY_NAME")
                .unwrap_or(defaults.updateinfo.company_name),
            ui_url: lookup("MIRROR__UI_URL").unwrap_or(defaults.updateinfo.ui_url),
        };

        Ok(Self {
            database_url: lookup("MIRROR__DATABASE_URL").unwrap_or(defaults.database_url),
            csaf_base_url: lookup("MIRROR__CSAF_BASE_URL").unwrap_or(defaults.csaf_base_url),
            log_to_file: parse_var(&lookup, "MIRROR__LOG_TO_FILE")?
                .unwrap_or(defaults.log_to_file),
            log_dir: lookup("MIRROR__LOG_DIR").unwrap_or(defaults.log_dir),
            updateinfo,
            rebrand: defaults.rebrand,
            normalizer: defaults.normalizer,
            workflow,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| MirrorError::config(format!("{key}={raw:?}: {e}"))),
    }
}
