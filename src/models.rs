//! Core data models for mirrored advisories.
//!
//! Upstream advisories ([`UpstreamAdvisory`]) are the normalized vendor
//! records. Local advisories ([`LocalAdvisory`]) are what this distribution
//! publishes. Mirrors, blocks and overrides are operator-managed catalog rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classification of an advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AdvisoryKind {
    Security,
    #[serde(rename = "Bug Fix")]
    BugFix,
    Enhancement,
}

impl AdvisoryKind {
    /// Name as stored in the catalog.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "Security",
            Self::BugFix => "Bug Fix",
            Self::Enhancement => "Enhancement",
        }
    }

    /// Value of the updateinfo `type` attribute.
    pub fn updateinfo_type(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::BugFix => "bugfix",
            Self::Enhancement => "enhancement",
        }
    }

    /// Kind implied by an advisory name prefix such as `RHSA` or `RLBA`.
    ///
    /// Only the two-letter suffix matters, so any vendor prefix works.
    pub fn from_name_prefix(prefix: &str) -> Option<Self> {
        if prefix.ends_with("SA") {
            Some(Self::Security)
        } else if prefix.ends_with("BA") {
            Some(Self::BugFix)
        } else if prefix.ends_with("EA") {
            Some(Self::Enhancement)
        } else {
            None
        }
    }
}

impl fmt::Display for AdvisoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdvisoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Security" => Ok(Self::Security),
            "Bug Fix" => Ok(Self::BugFix),
            "Enhancement" => Ok(Self::Enhancement),
            other => Err(format!("unknown advisory kind: {other}")),
        }
    }
}

/// A normalized vendor advisory.
///
/// Child collections are kept sorted and de-duplicated by their natural keys
/// (see [`UpstreamAdvisory::canonicalize`]) so that two values describing the
/// same advisory compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamAdvisory {
    /// Externally assigned identity, e.g. `RHSA-2024:1234`.
    pub name: String,
    pub issued_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub synopsis: String,
    pub description: String,
    pub topic: String,
    pub kind: AdvisoryKind,
    pub severity: String,
    pub affected_products: Vec<AffectedProduct>,
    /// Package NEVRAs (`name-epoch:version-release.arch`).
    pub packages: Vec<String>,
    pub cves: Vec<Cve>,
    pub bugzilla_tickets: Vec<BugzillaTicket>,
}

impl UpstreamAdvisory {
    /// Sort and de-duplicate every child collection by natural key.
    pub fn canonicalize(&mut self) {
        self.affected_products.sort();
        self.affected_products.dedup();
        self.packages.sort();
        self.packages.dedup();
        self.cves.sort();
        self.cves.dedup_by(|a, b| a.cve == b.cve);
        self.bugzilla_tickets.sort();
        self.bugzilla_tickets.dedup_by(|a, b| a.bug_id == b.bug_id);
    }
}

/// One (variant, name, version, arch) tuple an upstream advisory applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AffectedProduct {
    pub variant: String,
    pub name: String,
    pub major_version: i32,
    pub minor_version: Option<i32>,
    pub arch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cve {
    pub cve: String,
    pub cvss3_scoring_vector: Option<String>,
    pub cvss3_base_score: Option<String>,
    pub cwe: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BugzillaTicket {
    pub bug_id: String,
    pub description: String,
}

/// A persisted upstream advisory and its row id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamRecord {
    pub id: i64,
    pub advisory: UpstreamAdvisory,
}

/// A distribution maintained locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedProduct {
    pub id: i64,
    pub name: String,
    pub variant: String,
    pub vendor: String,
    /// Advisory name prefix, e.g. `RL` turns `RHSA-...` into `RLSA-...`.
    pub code: Option<String>,
    pub eol_at: Option<DateTime<Utc>>,
}

/// A mapping rule from upstream products to one supported product stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    pub id: i64,
    pub supported_product_id: i64,
    pub name: String,
    pub match_variant: String,
    pub match_major_version: i32,
    /// `None` matches any minor version, including none at all.
    pub match_minor_version: Option<i32>,
    pub match_arch: String,
    pub active: bool,
    pub repositories: Vec<RepositorySource>,
}

/// Package repositories a mirror publishes into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySource {
    pub id: i64,
    pub mirror_id: i64,
    pub production: bool,
    pub arch: String,
    /// URL of `repodata/repomd.xml` for binary packages.
    pub url: String,
    pub debug_url: Option<String>,
    pub source_url: Option<String>,
    pub repo_name: String,
}

impl RepositorySource {
    /// Every non-empty metadata URL of this repository, binary first.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str())
            .chain(self.debug_url.as_deref())
            .chain(self.source_url.as_deref())
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: i64,
    pub mirror_id: i64,
    pub upstream_advisory_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Override {
    pub id: i64,
    pub mirror_id: i64,
    pub upstream_advisory_id: i64,
    pub created_at: DateTime<Utc>,
}

/// The advisory published by this distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalAdvisory {
    pub name: String,
    pub synopsis: String,
    pub description: String,
    pub topic: String,
    pub kind: AdvisoryKind,
    pub severity: String,
    /// Set at creation and preserved by later upserts.
    pub published_at: DateTime<Utc>,
    /// Moves only when the content changes.
    pub updated_at: DateTime<Utc>,
    /// `None` for hand-authored advisories.
    pub upstream_advisory_id: Option<i64>,
    pub affected_products: Vec<LocalAffectedProduct>,
    pub packages: Vec<LocalPackage>,
    pub cves: Vec<Cve>,
    pub fixes: Vec<Fix>,
}

impl LocalAdvisory {
    /// Sort and de-duplicate every child collection by natural key.
    ///
    /// Later entries win when two share a key, so callers can append newer
    /// rows after older ones before canonicalizing.
    pub fn canonicalize(&mut self) {
        keep_last_by_key(&mut self.affected_products, LocalAffectedProduct::key);
        keep_last_by_key(&mut self.packages, LocalPackage::key);
        keep_last_by_key(&mut self.cves, |c| c.cve.clone());
        keep_last_by_key(&mut self.fixes, |f| f.ticket_id.clone());
    }

    /// Union `incoming` into `self`.
    ///
    /// Header text comes from `incoming`, timestamps stay with `self`, and
    /// children sharing a natural key take the incoming row.
    pub fn merged_with(mut self, incoming: LocalAdvisory) -> LocalAdvisory {
        self.affected_products.extend(incoming.affected_products);
        self.packages.extend(incoming.packages);
        self.cves.extend(incoming.cves);
        self.fixes.extend(incoming.fixes);

        let mut merged = LocalAdvisory {
            name: incoming.name,
            synopsis: incoming.synopsis,
            description: incoming.description,
            kind: incoming.kind,
            severity: incoming.severity,
            upstream_advisory_id: incoming.upstream_advisory_id,
            ..self
        };
        merged.canonicalize();
        merged.topic = merged.derived_topic();
        merged
    }

    /// Summary line listing the package names and product majors covered.
    pub fn derived_topic(&self) -> String {
        let packages: std::collections::BTreeSet<&str> = self
            .packages
            .iter()
            .map(|p| p.package_name.as_str())
            .collect();
        let products: std::collections::BTreeSet<String> = self
            .affected_products
            .iter()
            .map(|p| format!("{} {}", p.variant, p.major_version))
            .collect();
        format!(
            "An update is available for {}.\nThis update affects {}.\nA Common Vulnerability Scoring System (CVSS) base score, which gives a detailed severity rating, is available for each vulnerability from the CVE list",
            packages.into_iter().collect::<Vec<_>>().join(", "),
            products.into_iter().collect::<Vec<_>>().join(", ")
        )
    }

    /// Equality ignoring timestamps.
    pub fn same_content(&self, other: &Self) -> bool {
        self.name == other.name
            && self.synopsis == other.synopsis
            && self.description == other.description
            && self.topic == other.topic
            && self.kind == other.kind
            && self.severity == other.severity
            && self.upstream_advisory_id == other.upstream_advisory_id
            && self.affected_products == other.affected_products
            && self.packages == other.packages
            && self.cves == other.cves
            && self.fixes == other.fixes
    }
}

fn keep_last_by_key<T, K: Ord>(items: &mut Vec<T>, key: impl Fn(&T) -> K) {
    let mut keyed: std::collections::BTreeMap<K, T> = std::collections::BTreeMap::new();
    for item in items.drain(..) {
        keyed.insert(key(&item), item);
    }
    items.extend(keyed.into_values());
}

/// One package file of a local advisory, as found in one mirror repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalPackage {
    /// `name-epoch:version-release.arch.rpm`
    pub nevra: String,
    pub checksum: String,
    pub checksum_type: String,
    pub module_context: Option<String>,
    pub module_name: Option<String>,
    pub module_stream: Option<String>,
    pub module_version: Option<String>,
    pub repo_name: String,
    /// Source package name the binary was built from.
    pub package_name: String,
    pub mirror_id: i64,
    pub supported_product_id: i64,
    /// Name of the mirror the package was found in.
    pub product_name: String,
}

impl LocalPackage {
    /// Natural key within an advisory.
    pub fn key(&self) -> (String, String, i64) {
        (self.nevra.clone(), self.repo_name.clone(), self.mirror_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fix {
    pub ticket_id: String,
    pub source: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAffectedProduct {
    /// Supported product name.
    pub variant: String,
    /// Mirror name.
    pub name: String,
    pub major_version: i32,
    pub minor_version: Option<i32>,
    pub arch: String,
    pub supported_product_id: i64,
    /// Published through an operator override rather than predicate matching.
    pub overridden: bool,
}

impl LocalAffectedProduct {
    pub fn key(&self) -> (String, String, i32, Option<i32>, String) {
        (
            self.variant.clone(),
            self.name.clone(),
            self.major_version,
            self.minor_version,
            self.arch.clone(),
        )
    }
}

/// What an idempotent upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Lifecycle state of a persisted workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    /// Left `running` by a process that died; superseded by a new run.
    Abandoned,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: i64,
    pub workflow: String,
    pub status: RunStatus,
    /// JSON-encoded request, replayed by crash recovery.
    pub request: String,
    pub output: Option<String>,
    pub error: Option<String>,
    pub attempts: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
