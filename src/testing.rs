//! Fixtures shared by unit tests.

use crate::error::{MirrorError, Result};
use crate::models::{
    AdvisoryKind, AffectedProduct, BugzillaTicket, Cve, Fix, LocalAdvisory, LocalAffectedProduct,
    LocalPackage, Mirror, RepositorySource, SupportedProduct, UpstreamAdvisory,
};
use crate::repomd::{RepoPackage, RepositoryIndex, RepositoryMetadata};
use crate::sources::{FeedRecord, UpstreamSource};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) const VARIANT: &str = "Red Hat Enterprise Linux";

fn issued() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap()
}

/// A CSAF document fixing bash on the given arches of `version` (`9` or `9.4`).
pub(crate) fn csaf_document(name: &str, version: &str, arches: &[&str]) -> Value {
    let mut vendor_branches = vec![json!({
        "category": "product_family",
        "name": VARIANT,
        "branches": [{
            "category": "product_name",
            "name": format!("Red Hat Enterprise Linux BaseOS (v. {version})"),
            "product": {
                "name": format!("Red Hat Enterprise Linux BaseOS (v. {version})"),
                "product_id": "BaseOS",
                "product_identification_helper": {
                    "cpe": format!("cpe:/o:redhat:enterprise_linux:{version}::baseos")
                }
            }
        }]
    })];
    for arch in arches {
        vendor_branches.push(json!({
            "category": "architecture",
            "name": arch,
            "branches": []
        }));
    }

    json!({
        "document": {
            "title": "Red Hat Security Advisory: bash security update",
            "aggregate_severity": { "text": "Important" },
            "notes": [
                {
                    "category": "summary",
                    "text": "An update for bash is now available."
                },
                {
                    "category": "general",
                    "text": "The bash packages provide the GNU Bourne Again shell.\n\nSecurity Fix(es):\n\n* bash: heap overflow in globbing (BZ#2001234)"
                }
            ],
            "tracking": {
                "id": name,
                "initial_release_date": "2024-02-01T10:00:00+00:00",
                "current_release_date": "2024-02-01T10:00:00+00:00"
            }
        },
        "product_tree": {
            "branches": [{
                "category": "vendor",
                "name": "Red Hat",
                "branches": vendor_branches
            }]
        },
        "vulnerabilities": [{
            "cve": "CVE-2024-1234",
            "cwe": { "id": "CWE-787", "name": "Out-of-bounds Write" },
            "ids": [{ "system_name": "Red Hat Bugzilla ID", "text": "2001234" }],
            "product_status": {
                "fixed": [
                    "AppStream-9.4.0.Z.EUS:bash-0:5.1.8-9.el9_4.x86_64",
                    "AppStream-9.4.0.Z.EUS:bash-0:5.1.8-9.el9_4.src",
                    "AppStream-9.4.0.Z:ubi9/bash:latest"
                ]
            },
            "scores": [{
                "cvss_v3": {
                    "vectorString": "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:N/I:N/A:H",
                    "baseScore": 7.5
                }
            }]
        }]
    })
}

/// A normalized bash advisory affecting (variant, major, minor, arch) tuples.
pub(crate) fn upstream_advisory(
    name: &str,
    products: &[(&str, i32, Option<i32>, &str)],
) -> UpstreamAdvisory {
    UpstreamAdvisory {
        name: name.to_string(),
        issued_at: issued(),
        modified_at: issued(),
        synopsis: "Important: bash security update".to_string(),
        description: format!(
            "An update for bash is now available for Red Hat Enterprise Linux 9 ({name}).\n\n* bash: heap overflow in globbing (BZ#2001234)"
        ),
        topic: "An update for bash is now available.".to_string(),
        kind: AdvisoryKind::Security,
        severity: "Important".to_string(),
        affected_products: products
            .iter()
            .map(|(variant, major, minor, arch)| AffectedProduct {
                variant: variant.to_string(),
                name: format!("Red Hat Enterprise Linux for {arch}"),
                major_version: *major,
                minor_version: *minor,
                arch: arch.to_string(),
            })
            .collect(),
        packages: vec![
            "bash-0:5.1.8-9.el9_4.src".to_string(),
            "bash-0:5.1.8-9.el9_4.x86_64".to_string(),
        ],
        cves: vec![cve()],
        bugzilla_tickets: vec![BugzillaTicket {
            bug_id: "2001234".to_string(),
            description: "bash: heap overflow in globbing".to_string(),
        }],
    }
}

fn cve() -> Cve {
    Cve {
        cve: "CVE-2024-1234".to_string(),
        cvss3_scoring_vector: Some("CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:N/I:N/A:H".to_string()),
        cvss3_base_score: Some("7.5".to_string()),
        cwe: Some("CWE-787".to_string()),
    }
}

pub(crate) fn supported_product_fixture(name: &str, code: Option<&str>) -> SupportedProduct {
    SupportedProduct {
        id: 0,
        name: name.to_string(),
        variant: name.to_string(),
        vendor: "Rocky Enterprise Software Foundation".to_string(),
        code: code.map(str::to_string),
        eol_at: None,
    }
}

/// An active mirror with one BaseOS repository of its own arch.
pub(crate) fn mirror_fixture(
    supported_product_id: i64,
    name: &str,
    minor: Option<i32>,
    arch: &str,
) -> Mirror {
    Mirror {
        id: 0,
        supported_product_id,
        name: name.to_string(),
        match_variant: VARIANT.to_string(),
        match_major_version: 9,
        match_minor_version: minor,
        match_arch: arch.to_string(),
        active: true,
        repositories: vec![RepositorySource {
            id: 0,
            mirror_id: 0,
            production: true,
            arch: arch.to_string(),
            url: format!("https://dl.example.org/9/BaseOS/{arch}/os/repodata/repomd.xml"),
            debug_url: None,
            source_url: Some(
                "https://dl.example.org/9/BaseOS/source/tree/repodata/repomd.xml".to_string(),
            ),
            repo_name: "BaseOS".to_string(),
        }],
    }
}

/// An x86_64 package row `name-0:5.1.8-9.el9_4.x86_64.rpm`.
pub(crate) fn local_package(name: &str, mirror_id: i64, repo: &str) -> LocalPackage {
    LocalPackage {
        nevra: format!("{name}-0:5.1.8-9.el9_4.x86_64.rpm"),
        checksum: format!("{name}-checksum"),
        checksum_type: "sha256".to_string(),
        module_context: None,
        module_name: None,
        module_stream: None,
        module_version: None,
        repo_name: repo.to_string(),
        package_name: name.to_string(),
        mirror_id,
        supported_product_id: 1,
        product_name: "Rocky Linux 9 x86_64".to_string(),
    }
}

pub(crate) fn local_advisory(name: &str, packages: Vec<LocalPackage>) -> LocalAdvisory {
    LocalAdvisory {
        name: name.to_string(),
        synopsis: "Important: bash security update".to_string(),
        description: "An update for bash is now available for Rocky Linux 9.".to_string(),
        topic: "An update is available for bash.".to_string(),
        kind: AdvisoryKind::Security,
        severity: "Important".to_string(),
        published_at: issued(),
        updated_at: issued(),
        upstream_advisory_id: None,
        affected_products: vec![LocalAffectedProduct {
            variant: "Rocky Linux".to_string(),
            name: "Rocky Linux 9 x86_64".to_string(),
            major_version: 9,
            minor_version: None,
            arch: "x86_64".to_string(),
            supported_product_id: 1,
            overridden: false,
        }],
        packages,
        cves: vec![cve()],
        fixes: vec![Fix {
            ticket_id: "2001234".to_string(),
            source: "https://bugzilla.redhat.com/show_bug.cgi?id=2001234".to_string(),
            description: "bash: heap overflow in globbing".to_string(),
        }],
    }
}

pub(crate) const PRIMARY_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="3">
<package type="rpm">
  <name>bash</name>
  <arch>x86_64</arch>
  <version epoch="0" ver="5.1.8" rel="9.el9_4"/>
  <checksum type="sha256" pkgid="YES">aaaa1111</checksum>
  <summary>The GNU Bourne Again shell</summary>
  <location href="Packages/b/bash-5.1.8-9.el9_4.x86_64.rpm"/>
  <format>
    <rpm:license>GPLv3+</rpm:license>
    <rpm:sourcerpm>bash-5.1.8-9.el9_4.src.rpm</rpm:sourcerpm>
    <rpm:provides>
      <rpm:entry name="bash" flags="EQ" epoch="0" ver="5.1.8" rel="9.el9_4"/>
    </rpm:provides>
  </format>
</package>
<package type="rpm">
  <name>bash</name>
  <arch>src</arch>
  <version epoch="0" ver="5.1.8" rel="9.el9_4"/>
  <checksum type="sha256" pkgid="YES">bbbb2222</checksum>
  <summary>The GNU Bourne Again shell</summary>
  <location href="Packages/b/bash-5.1.8-9.el9_4.src.rpm"/>
  <format>
    <rpm:license>GPLv3+</rpm:license>
    <rpm:sourcerpm/>
  </format>
</package>
<package type="rpm">
  <name>nodejs</name>
  <arch>x86_64</arch>
  <version epoch="1" ver="18.19.0" rel="1.module+el9.4.0+21000+abcdef12"/>
  <checksum type="sha256" pkgid="YES">cccc3333</checksum>
  <summary>JavaScript runtime</summary>
  <location href="Packages/n/nodejs-18.19.0-1.module+el9.4.0+21000+abcdef12.x86_64.rpm"/>
  <format>
    <rpm:license>MIT</rpm:license>
    <rpm:sourcerpm>nodejs-18.19.0-1.module+el9.4.0+21000+abcdef12.src.rpm</rpm:sourcerpm>
  </format>
</package>
</metadata>
"#;

pub(crate) fn modules_yaml() -> String {
    r#"---
document: modulemd
version: 2
data:
  name: nodejs
  stream: 18
  version: 9040020240101000000
  context: rhel9
  arch: x86_64
  summary: Javascript runtime
  artifacts:
    rpms:
    - nodejs-1:18.19.0-1.module+el9.4.0+21000+abcdef12.x86_64
...
---
document: modulemd-defaults
version: 1
data:
  module: nodejs
  stream: 18
  profiles:
    18: [common]
...
"#
    .to_string()
}

pub(crate) fn repomd_xml(primary_href: &str, modules_href: Option<&str>) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
  <revision>1706781600</revision>
  <data type="primary">
    <checksum type="sha256">0123</checksum>
    <location href="{primary_href}"/>
    <timestamp>1706781600</timestamp>
  </data>
"#
    );
    if let Some(href) = modules_href {
        xml.push_str(&format!(
            r#"  <data type="modules">
    <checksum type="sha256">4567</checksum>
    <location href="{href}"/>
  </data>
"#
        ));
    }
    xml.push_str("</repomd>\n");
    xml
}

/// Serves a fixed set of records, honoring `since`.
pub(crate) struct StaticSource {
    records: Vec<FeedRecord>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub(crate) fn new(records: Vec<FeedRecord>) -> Self {
        Self {
            records,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamSource for StaticSource {
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Vec<FeedRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut records: Vec<FeedRecord> = self
            .records
            .iter()
            .filter(|r| since.is_none_or(|since| r.timestamp >= since))
            .cloned()
            .collect();
        records.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));
        Ok(records)
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Every repository carries bash for its own arch plus the source package.
pub(crate) struct StaticRepositoryMetadata {
    failing: Vec<String>,
}

impl StaticRepositoryMetadata {
    pub(crate) fn bash() -> Self {
        Self {
            failing: Vec::new(),
        }
    }

    /// Repositories of `arch` fail to load.
    pub(crate) fn failing(mut self, arch: &str) -> Self {
        self.failing.push(arch.to_string());
        self
    }
}

fn bash_package(arch: &str, source_rpm: &str) -> RepoPackage {
    RepoPackage {
        name: "bash".to_string(),
        epoch: "0".to_string(),
        version: "5.1.8".to_string(),
        release: "9.el9_4".to_string(),
        arch: arch.to_string(),
        checksum: format!("{arch}-checksum"),
        checksum_type: "sha256".to_string(),
        source_rpm: source_rpm.to_string(),
    }
}

#[async_trait]
impl RepositoryMetadata for StaticRepositoryMetadata {
    async fn load(&self, source: &RepositorySource) -> Result<RepositoryIndex> {
        if self.failing.contains(&source.arch) {
            return Err(MirrorError::source_fetch("repomd", "connection refused"));
        }
        Ok(RepositoryIndex {
            packages: vec![
                bash_package(&source.arch, "bash-5.1.8-9.el9_4.src.rpm"),
                bash_package("src", ""),
            ],
            modules: Default::default(),
        })
    }
}
