//! Upstream record normalization.
//!
//! Converts CSAF v2 advisory documents into [`UpstreamAdvisory`] values.
//! Normalization is pure: the same payload always yields the same advisory,
//! with every child collection sorted and de-duplicated.

use crate::config::NormalizerConfig;
use crate::error::NormalizeError;
use crate::models::{AdvisoryKind, AffectedProduct, BugzillaTicket, Cve, UpstreamAdvisory};
use crate::sources::FeedRecord;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// Only product ids with one of these suffixes are RPMs; the rest are
/// container images and other artifacts.
const RPM_ARCH_SUFFIXES: &[&str] = &[
    ".aarch64", ".i386", ".i686", ".noarch", ".ppc", ".ppc64", ".ppc64le", ".s390", ".s390x",
    ".src", ".x86_64",
];

const BUGZILLA_SYSTEM: &str = "Red Hat Bugzilla ID";

static BZ_REFERENCE: Lazy<Result<Regex, regex_lite::Error>> =
    Lazy::new(|| Regex::new(r"BZ#([0-9]+)"));

#[derive(Debug, Deserialize)]
struct CsafDocument {
    document: DocumentMeta,
    #[serde(default)]
    product_tree: Option<ProductTree>,
    #[serde(default)]
    vulnerabilities: Vec<Vulnerability>,
}

#[derive(Debug, Deserialize)]
struct DocumentMeta {
    #[serde(default)]
    title: String,
    tracking: Tracking,
    #[serde(default)]
    notes: Vec<Note>,
    #[serde(default)]
    aggregate_severity: Option<AggregateSeverity>,
}

#[derive(Debug, Deserialize)]
struct Tracking {
    #[serde(default)]
    id: String,
    #[serde(default)]
    initial_release_date: String,
    #[serde(default)]
    current_release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Note {
    #[serde(default)]
    category: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AggregateSeverity {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct ProductTree {
    #[serde(default)]
    branches: Vec<Branch>,
}

#[derive(Debug, Default, Deserialize)]
struct Branch {
    #[serde(default)]
    category: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    branches: Vec<Branch>,
    #[serde(default)]
    product: Option<BranchProduct>,
}

#[derive(Debug, Default, Deserialize)]
struct BranchProduct {
    #[serde(default)]
    name: String,
    #[serde(default)]
    product_identification_helper: Option<IdentificationHelper>,
}

#[derive(Debug, Default, Deserialize)]
struct IdentificationHelper {
    #[serde(default)]
    cpe: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Vulnerability {
    #[serde(default)]
    cve: Option<String>,
    #[serde(default)]
    cwe: Option<CweRef>,
    #[serde(default)]
    scores: Vec<Score>,
    #[serde(default)]
    ids: Vec<VulnerabilityId>,
    #[serde(default)]
    product_status: ProductStatus,
}

#[derive(Debug, Deserialize)]
struct CweRef {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Score {
    #[serde(default)]
    cvss_v3: Option<CvssV3>,
}

#[derive(Debug, Deserialize)]
struct CvssV3 {
    #[serde(rename = "vectorString", default)]
    vector_string: Option<String>,
    #[serde(rename = "baseScore", default)]
    base_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct VulnerabilityId {
    #[serde(default)]
    system_name: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct ProductStatus {
    #[serde(default)]
    fixed: Vec<String>,
}

/// Converts raw feed records into canonical upstream advisories.
#[derive(Debug, Clone)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn normalize(&self, record: &FeedRecord) -> Result<UpstreamAdvisory, NormalizeError> {
        let document: CsafDocument = serde_json::from_str(&record.payload)?;
        self.normalize_document(document)
    }

    fn normalize_document(&self, csaf: CsafDocument) -> Result<UpstreamAdvisory, NormalizeError> {
        if csaf.vulnerabilities.is_empty() {
            return Err(NormalizeError::NoVulnerabilities);
        }

        let meta = csaf.document;
        let name = meta.tracking.id.trim().to_string();
        if name.is_empty() {
            return Err(NormalizeError::MissingField("document.tracking.id"));
        }
        if meta.tracking.initial_release_date.is_empty() {
            return Err(NormalizeError::MissingField(
                "document.tracking.initial_release_date",
            ));
        }

        let issued_at = parse_timestamp(&meta.tracking.initial_release_date)?;
        let modified_at = match meta.tracking.current_release_date.as_deref() {
            Some(raw) if !raw.is_empty() => parse_timestamp(raw)?,
            _ => issued_at,
        };

        let prefix = name.split('-').next().unwrap_or_default();
        let kind = AdvisoryKind::from_name_prefix(prefix)
            .ok_or_else(|| NormalizeError::UnknownKind(name.clone()))?;

        let severity = meta
            .aggregate_severity
            .map(|s| s.text)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "None".to_string());

        let mut synopsis = meta.title;
        for label in ["Security", "Bug Fix", "Enhancement"] {
            let upstream = format!("{} {label} Advisory: ", self.config.vendor_name);
            synopsis = synopsis.replace(&upstream, &format!("{severity}: "));
        }

        let mut description = String::new();
        let mut topic = String::new();
        for note in meta.notes {
            match note.category.as_str() {
                "general" => description = note.text,
                "summary" => topic = note.text,
                _ => {}
            }
        }

        let mut packages = BTreeSet::new();
        let mut cves = Vec::new();
        let mut ticket_ids = BTreeSet::new();
        for vulnerability in &csaf.vulnerabilities {
            for product_id in &vulnerability.product_status.fixed {
                if RPM_ARCH_SUFFIXES.iter().any(|s| product_id.ends_with(s)) {
                    packages.insert(package_from_product_id(product_id));
                }
            }

            if let Some(cve) = vulnerability.cve.as_deref().filter(|c| !c.is_empty()) {
                let cvss = vulnerability.scores.first().and_then(|s| s.cvss_v3.as_ref());
                cves.push(Cve {
                    cve: cve.to_string(),
                    cvss3_scoring_vector: cvss.and_then(|c| c.vector_string.clone()),
                    cvss3_base_score: cvss.and_then(|c| c.base_score).map(|s| format!("{s:.1}")),
                    cwe: vulnerability.cwe.as_ref().and_then(|c| c.id.clone()),
                });
            }

            for id in &vulnerability.ids {
                if id.system_name == BUGZILLA_SYSTEM && !id.text.is_empty() {
                    ticket_ids.insert(id.text.clone());
                }
            }
        }

        if packages.is_empty() {
            return Err(NormalizeError::NoFixedPackages);
        }

        let ticket_descriptions = ticket_descriptions(&description);
        let bugzilla_tickets = ticket_ids
            .into_iter()
            .map(|bug_id| BugzillaTicket {
                description: ticket_descriptions.get(&bug_id).cloned().unwrap_or_default(),
                bug_id,
            })
            .collect();

        let affected_products = csaf
            .product_tree
            .map(|tree| self.affected_products(&tree))
            .unwrap_or_default();

        let mut advisory = UpstreamAdvisory {
            name,
            issued_at,
            modified_at,
            synopsis,
            description,
            topic,
            kind,
            severity,
            affected_products,
            packages: packages.into_iter().collect(),
            cves,
            bugzilla_tickets,
        };
        advisory.canonicalize();
        Ok(advisory)
    }

    fn affected_products(&self, tree: &ProductTree) -> Vec<AffectedProduct> {
        let mut products = BTreeSet::new();

        for vendor_branch in &tree.branches {
            let Some(family) = vendor_branch.branches.iter().find(|b| {
                b.category == "product_family" && b.name == self.config.product_family
            }) else {
                continue;
            };

            let Some((major, minor)) = family
                .branches
                .iter()
                .find(|b| b.category == "product_name")
                .and_then(|b| b.product.as_ref())
                .filter(|p| !p.name.is_empty())
                .and_then(|p| p.product_identification_helper.as_ref())
                .and_then(|h| h.cpe.as_deref())
                .and_then(version_from_cpe)
            else {
                continue;
            };

            let mut arches: BTreeSet<&str> = vendor_branch
                .branches
                .iter()
                .filter(|b| b.category == "architecture" && !b.name.is_empty())
                .map(|b| b.name.as_str())
                .collect();
            if arches.contains("noarch") {
                arches = self.config.arch_names.keys().map(String::as_str).collect();
            }

            for arch in arches {
                let Some(name) = self.config.arch_names.get(arch) else {
                    tracing::debug!("No product name for arch '{}', skipping", arch);
                    continue;
                };
                products.insert(AffectedProduct {
                    variant: family.name.clone(),
                    name: name.clone(),
                    major_version: major,
                    minor_version: minor,
                    arch: arch.to_string(),
                });
            }
        }

        products.into_iter().collect()
    }
}

/// Product ids look like `AppStream-9.4.0.Z.EUS:rsync-0:3.2.3-19.el9_4.1.aarch64`;
/// the package is everything after the product prefix.
fn package_from_product_id(product_id: &str) -> String {
    let parts: Vec<&str> = product_id.split(':').collect();
    if parts.len() >= 3 {
        parts[parts.len() - 2..].join(":")
    } else {
        parts.last().copied().unwrap_or(product_id).to_string()
    }
}

/// `cpe:/o:redhat:enterprise_linux:9.4::baseos` yields `(9, Some(4))`.
fn version_from_cpe(cpe: &str) -> Option<(i32, Option<i32>)> {
    let version = cpe.split(':').nth(4).filter(|v| !v.is_empty())?;
    let (major, minor) = match version.split_once('.') {
        Some((major, minor)) => (major.parse().ok()?, Some(minor.parse().ok()?)),
        None => (version.parse().ok()?, None),
    };
    (major > 0).then_some((major, minor))
}

/// Lines such as `* kernel: fix leak (BZ#2001234)` describe the ticket they cite.
fn ticket_descriptions(description: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let Ok(regex) = &*BZ_REFERENCE else {
        return map;
    };
    for line in description.lines() {
        let Some(caps) = regex.captures(line) else {
            continue;
        };
        let Some(id) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        let text = line
            .trim()
            .trim_start_matches("* ")
            .trim_start_matches("- ")
            .replace(&format!("(BZ#{id})"), "");
        map.insert(id.to_string(), text.trim().to_string());
    }
    map
}

/// Parse the timestamp formats seen in feed documents and indexes.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, NormalizeError> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let standardized = standardize_offset(raw);
    for format in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H%M%S%z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(parsed) = DateTime::parse_from_str(&standardized, format) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), format) {
            return Ok(parsed.and_utc());
        }
    }

    Err(NormalizeError::InvalidTimestamp(raw.to_string()))
}

/// `+00:00` becomes `+0000`.
fn standardize_offset(raw: &str) -> String {
    match raw.rsplit_once('+') {
        Some((base, offset)) => format!("{base}+{}", offset.replace(':', "")),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::csaf_document;
    use chrono::TimeZone;

    fn record(payload: String) -> FeedRecord {
        FeedRecord {
            id: "2024/rhsa-2024_1234.json".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            payload,
        }
    }

    fn normalizer() -> Normalizer {
        Normalizer::new(NormalizerConfig::default())
    }

    #[test]
    fn test_normalize_full_document() {
        let doc = csaf_document("RHSA-2024:1234", "9.4", &["x86_64", "aarch64"]);
        let advisory = normalizer().normalize(&record(doc.to_string())).unwrap();

        assert_eq!(advisory.name, "RHSA-2024:1234");
        assert_eq!(advisory.kind, AdvisoryKind::Security);
        assert_eq!(advisory.severity, "Important");
        assert_eq!(advisory.synopsis, "Important: bash security update");
        assert_eq!(advisory.topic, "An update for bash is now available.");
        assert_eq!(
            advisory.issued_at,
            Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(
            advisory.packages,
            vec![
                "bash-0:5.1.8-9.el9_4.src".to_string(),
                "bash-0:5.1.8-9.el9_4.x86_64".to_string(),
            ]
        );
        assert_eq!(advisory.cves.len(), 1);
        assert_eq!(advisory.cves[0].cvss3_base_score.as_deref(), Some("7.5"));
        assert_eq!(advisory.cves[0].cwe.as_deref(), Some("CWE-787"));
        assert_eq!(advisory.bugzilla_tickets.len(), 1);
        assert_eq!(advisory.bugzilla_tickets[0].bug_id, "2001234");
        assert_eq!(advisory.bugzilla_tickets[0].description, "bash: heap overflow in globbing");

        let arches: Vec<&str> = advisory
            .affected_products
            .iter()
            .map(|p| p.arch.as_str())
            .collect();
        assert_eq!(arches, vec!["aarch64", "x86_64"]);
        assert!(advisory
            .affected_products
            .iter()
            .all(|p| p.major_version == 9 && p.minor_version == Some(4)));
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let doc = csaf_document("RHSA-2024:1234", "9", &["noarch"]).to_string();
        let first = normalizer().normalize(&record(doc.clone())).unwrap();
        let second = normalizer().normalize(&record(doc)).unwrap();
        assert_eq!(first, second);
        // noarch expands to every configured arch, no minor version in the CPE
        assert_eq!(first.affected_products.len(), 4);
        assert!(first.affected_products.iter().all(|p| p.minor_version.is_none()));
    }

    #[test]
    fn test_unknown_arch_is_skipped() {
        let doc = csaf_document("RHBA-2024:0002", "9.2", &["riscv64", "s390x"]);
        let advisory = normalizer().normalize(&record(doc.to_string())).unwrap();
        assert_eq!(advisory.kind, AdvisoryKind::BugFix);
        assert_eq!(advisory.affected_products.len(), 1);
        assert_eq!(advisory.affected_products[0].arch, "s390x");
    }

    #[test]
    fn test_record_errors() {
        let n = normalizer();
        assert!(matches!(
            n.normalize(&record("not json".to_string())),
            Err(NormalizeError::Malformed(_))
        ));

        let mut doc = csaf_document("RHSA-2024:1234", "9.4", &["x86_64"]);
        doc["vulnerabilities"] = serde_json::json!([]);
        assert!(matches!(
            n.normalize(&record(doc.to_string())),
            Err(NormalizeError::NoVulnerabilities)
        ));

        let mut doc = csaf_document("RHSA-2024:1234", "9.4", &["x86_64"]);
        doc["vulnerabilities"][0]["product_status"]["fixed"] =
            serde_json::json!(["AppStream-9.4.0.Z:ubi9/bash:latest"]);
        assert!(matches!(
            n.normalize(&record(doc.to_string())),
            Err(NormalizeError::NoFixedPackages)
        ));

        let doc = csaf_document("CVE-2024-1234", "9.4", &["x86_64"]);
        assert!(matches!(
            n.normalize(&record(doc.to_string())),
            Err(NormalizeError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 4, 17, 12, 8, 56).unwrap();
        for raw in [
            "2025-04-17T12:08:56+00:00",
            "2025-04-17T12:08:56Z",
            "2025-04-17T12:08:56+0000",
            "2025-04-17T120856+0000",
            "2025-04-17 12:08:56+0000",
        ] {
            assert_eq!(parse_timestamp(raw).unwrap(), expected, "{raw}");
        }
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_version_from_cpe() {
        assert_eq!(
            version_from_cpe("cpe:/o:redhat:enterprise_linux:9.4::baseos"),
            Some((9, Some(4)))
        );
        assert_eq!(
            version_from_cpe("cpe:/a:redhat:enterprise_linux:8::appstream"),
            Some((8, None))
        );
        assert_eq!(version_from_cpe("cpe:/a:redhat:enterprise_linux"), None);
    }
}
