//! End-to-end runs against a mocked CSAF feed and mocked repositories.

use advisory_mirror::config::Config;
use advisory_mirror::manager::{MatchRequest, MirrorManager};
use advisory_mirror::models::{Mirror, RepositorySource, SupportedProduct};
use advisory_mirror::store::{
    CatalogRepository, LocalRepository, RepositoryTarget, UpstreamRepository,
};
use advisory_mirror::workflow::{WorkflowReport, WorkflowRequest, WorkflowRunner};
use advisory_mirror::{MirrorError, updateinfo};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRIMARY_X86_64: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="1">
<package type="rpm">
  <name>bash</name>
  <arch>x86_64</arch>
  <version epoch="0" ver="5.1.8" rel="9.el9_4"/>
  <checksum type="sha256" pkgid="YES">aaaa1111</checksum>
  <format>
    <rpm:sourcerpm>bash-5.1.8-9.el9_4.src.rpm</rpm:sourcerpm>
  </format>
</package>
</metadata>
"#;

const PRIMARY_SOURCE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="1">
<package type="rpm">
  <name>bash</name>
  <arch>src</arch>
  <version epoch="0" ver="5.1.8" rel="9.el9_4"/>
  <checksum type="sha256" pkgid="YES">bbbb2222</checksum>
  <format>
    <rpm:sourcerpm/>
  </format>
</package>
</metadata>
"#;

fn repomd() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <data type="primary">
    <location href="repodata/primary.xml"/>
  </data>
</repomd>
"#
    .to_string()
}

/// A bash errata for RHEL `version` on x86_64.
fn csaf(name: &str, version: &str) -> Value {
    let stream = version.replace('.', "");
    json!({
        "document": {
            "title": "Red Hat Security Advisory: bash security update",
            "aggregate_severity": { "text": "Important" },
            "notes": [
                { "category": "summary", "text": "An update for bash is now available for Red Hat Enterprise Linux 9." },
                { "category": "general", "text": "Security Fix(es):\n\n* bash: heap overflow in globbing (BZ#2001234)" }
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
                "branches": [
                    {
                        "category": "product_family",
                        "name": "Red Hat Enterprise Linux",
                        "branches": [{
                            "category": "product_name",
                            "name": format!("Red Hat Enterprise Linux BaseOS (v. {version})"),
                            "product": {
                                "name": format!("Red Hat Enterprise Linux BaseOS (v. {version})"),
                                "product_id": format!("BaseOS-{stream}"),
                                "product_identification_helper": {
                                    "cpe": format!("cpe:/o:redhat:enterprise_linux:{version}::baseos")
                                }
                            }
                        }]
                    },
                    { "category": "architecture", "name": "x86_64", "branches": [] }
                ]
            }]
        },
        "vulnerabilities": [{
            "cve": "CVE-2024-1234",
            "ids": [{ "system_name": "Red Hat Bugzilla ID", "text": "2001234" }],
            "product_status": {
                "fixed": [
                    format!("BaseOS-{stream}:bash-0:5.1.8-9.el9_4.x86_64"),
                    format!("BaseOS-{stream}:bash-0:5.1.8-9.el9_4.src")
                ]
            }
        }]
    })
}

struct Harness {
    server: MockServer,
    manager: MirrorManager,
    config: Config,
    _db: TempDir,
}

async fn mount(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_feed(server: &MockServer, documents: &[(&str, &str)]) {
    let mut changes = String::new();
    for (name, version) in documents {
        let file = format!("2024/{}.json", name.to_lowercase().replace(':', "_"));
        changes.push_str(&format!("\"{file}\",\"2024-02-01T10:00:00+00:00\"\n"));
        mount(server, &format!("/csaf/{file}"), csaf(name, version).to_string()).await;
    }
    mount(server, "/csaf/changes.csv", changes).await;
    mount(server, "/csaf/releases.csv", String::new()).await;
    mount(server, "/csaf/deletions.csv", String::new()).await;
}

async fn mount_repositories(server: &MockServer) {
    for (tree, primary) in [("x86_64/os", PRIMARY_X86_64), ("source/tree", PRIMARY_SOURCE)] {
        mount(server, &format!("/9/BaseOS/{tree}/repodata/repomd.xml"), repomd()).await;
        mount(
            server,
            &format!("/9/BaseOS/{tree}/repodata/primary.xml"),
            primary.to_string(),
        )
        .await;
    }
}

async fn harness(documents: &[(&str, &str)]) -> Harness {
    let server = MockServer::start().await;
    mount_feed(&server, documents).await;
    mount_repositories(&server).await;

    let db = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.database_url = format!("sqlite://{}?mode=rwc", db.path().join("mirror.db").display());
    config.csaf_base_url = format!("{}/csaf/", server.uri());
    config.workflow.max_retries = 0;

    let manager = MirrorManager::from_config(&config).await.unwrap();
    Harness {
        server,
        manager,
        config,
        _db: db,
    }
}

impl Harness {
    async fn product(&self) -> SupportedProduct {
        self.manager
            .store()
            .create_supported_product(&SupportedProduct {
                id: 0,
                name: "Rocky Linux".to_string(),
                variant: "Rocky Linux".to_string(),
                vendor: "Rocky Enterprise Software Foundation".to_string(),
                code: Some("RL".to_string()),
                eol_at: None,
            })
            .await
            .unwrap()
    }

    async fn mirror(&self, product: &SupportedProduct, name: &str, minor: Option<i32>) -> Mirror {
        let base = format!("{}/9/BaseOS", self.server.uri());
        self.manager
            .store()
            .create_mirror(&Mirror {
                id: 0,
                supported_product_id: product.id,
                name: name.to_string(),
                match_variant: "Red Hat Enterprise Linux".to_string(),
                match_major_version: 9,
                match_minor_version: minor,
                match_arch: "x86_64".to_string(),
                active: true,
                repositories: vec![RepositorySource {
                    id: 0,
                    mirror_id: 0,
                    production: true,
                    arch: "x86_64".to_string(),
                    url: format!("{base}/x86_64/os/repodata/repomd.xml"),
                    debug_url: None,
                    source_url: Some(format!("{base}/source/tree/repodata/repomd.xml")),
                    repo_name: "BaseOS".to_string(),
                }],
            })
            .await
            .unwrap()
    }

    async fn upstream_id(&self, name: &str) -> i64 {
        self.manager
            .store()
            .get_upstream_advisory(name)
            .await
            .unwrap()
            .unwrap()
            .id
    }
}

fn read_updateinfo(out: &Path, mirror: &Mirror) -> String {
    let target = RepositoryTarget {
        mirror_name: mirror.name.clone(),
        repo_name: "BaseOS".to_string(),
        mirror_id: mirror.id,
        arch: mirror.match_arch.clone(),
    };
    std::fs::read_to_string(updateinfo::output_path(out, &target)).unwrap()
}

#[tokio::test]
async fn test_poll_match_emit_is_idempotent() {
    let h = harness(&[("RHSA-2024:0001", "9.4")]).await;
    let product = h.product().await;
    let mirror = h.mirror(&product, "Rocky Linux 9 x86_64", None).await;

    let poll = h.manager.poll_upstream().await.unwrap();
    assert_eq!(poll.created, 1);
    let matched = h.manager.match_mirrors(&MatchRequest::default()).await.unwrap();
    assert_eq!(matched.created, 1);

    let out = tempfile::tempdir().unwrap();
    let emitted = h.manager.emit_updateinfo(out.path()).await.unwrap();
    assert_eq!(emitted.written, 1);
    let first = read_updateinfo(out.path(), &mirror);
    assert!(first.contains("<id>RLSA-2024:0001</id>"));
    assert!(first.contains("<filename>bash-5.1.8-9.el9_4.x86_64.rpm</filename>"));
    assert!(first.contains("CVE-2024-1234"));

    let again = h.manager.poll_upstream().await.unwrap();
    assert_eq!(again.unchanged, 1);
    let rematched = h.manager.match_mirrors(&MatchRequest::default()).await.unwrap();
    assert_eq!(rematched.created, 0);
    assert_eq!(rematched.unchanged, 1);
    let reemitted = h.manager.emit_updateinfo(out.path()).await.unwrap();
    assert_eq!(reemitted.written, 0);
    assert_eq!(read_updateinfo(out.path(), &mirror), first);
}

#[tokio::test]
async fn test_minor_version_wildcard_and_pin() {
    let h = harness(&[("RHSA-2024:0001", "9.4"), ("RHSA-2024:0002", "9.2")]).await;
    let product = h.product().await;
    let any = h.mirror(&product, "Rocky Linux 9 x86_64", None).await;
    let pinned = h.mirror(&product, "Rocky Linux 9.4 x86_64", Some(4)).await;

    h.manager.poll_upstream().await.unwrap();
    h.manager.match_mirrors(&MatchRequest::default()).await.unwrap();

    let store = h.manager.store();
    let current = store.get_local_advisory("RLSA-2024:0001").await.unwrap().unwrap();
    let mirrors: Vec<i64> = current.packages.iter().map(|p| p.mirror_id).collect();
    assert!(mirrors.contains(&any.id));
    assert!(mirrors.contains(&pinned.id));

    let older = store.get_local_advisory("RLSA-2024:0002").await.unwrap().unwrap();
    assert!(older.packages.iter().all(|p| p.mirror_id == any.id));
    assert_eq!(older.affected_products.len(), 1);
}

#[tokio::test]
async fn test_block_and_override() {
    let h = harness(&[("RHSA-2024:0001", "9.4"), ("RHSA-2024:0002", "9.2")]).await;
    let product = h.product().await;
    let pinned = h.mirror(&product, "Rocky Linux 9.4 x86_64", Some(4)).await;
    h.manager.poll_upstream().await.unwrap();

    let store = h.manager.store();
    let current = h.upstream_id("RHSA-2024:0001").await;
    let older = h.upstream_id("RHSA-2024:0002").await;
    store.add_block(pinned.id, current).await.unwrap();
    store.add_override(pinned.id, older).await.unwrap();

    let report = h.manager.match_mirrors(&MatchRequest::default()).await.unwrap();
    assert_eq!(report.blocked, 1);
    assert_eq!(report.overridden, 1);

    assert!(store.get_local_advisory("RLSA-2024:0001").await.unwrap().is_none());
    let forced = store.get_local_advisory("RLSA-2024:0002").await.unwrap().unwrap();
    assert!(forced.affected_products.iter().all(|p| p.overridden));

    let out = tempfile::tempdir().unwrap();
    h.manager.emit_updateinfo(out.path()).await.unwrap();
    let xml = read_updateinfo(out.path(), &pinned);
    assert!(xml.contains("through an override"));
    assert!(!xml.contains("RLSA-2024:0001"));
}

#[tokio::test]
async fn test_failed_fetch_leaves_cursor_for_the_next_run() {
    let h = harness(&[]).await;
    let product = h.product().await;
    h.mirror(&product, "Rocky Linux 9 x86_64", None).await;

    h.server.reset().await;
    mount(
        &h.server,
        "/csaf/changes.csv",
        "\"2024/rhsa-2024_0001.json\",\"2024-02-01T10:00:00+00:00\"\n".to_string(),
    )
    .await;
    mount(&h.server, "/csaf/releases.csv", String::new()).await;
    mount(&h.server, "/csaf/deletions.csv", String::new()).await;
    Mock::given(method("GET"))
        .and(path("/csaf/2024/rhsa-2024_0001.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&h.server)
        .await;

    let manager = Arc::new(MirrorManager::from_config(&h.config).await.unwrap());
    let runner = WorkflowRunner::new(Arc::clone(&manager), h.config.workflow.clone());
    let err = runner.run(WorkflowRequest::PollUpstreamAdvisories).await.unwrap_err();
    assert!(matches!(err, MirrorError::SourceFetch { .. }));
    assert_eq!(manager.store().get_cursor().await.unwrap(), None);

    h.server.reset().await;
    mount_feed(&h.server, &[("RHSA-2024:0001", "9.4")]).await;
    mount_repositories(&h.server).await;

    let outcome = runner.run(WorkflowRequest::PollUpstreamAdvisories).await.unwrap();
    let WorkflowReport::Poll(poll) = outcome.report else {
        panic!("expected a poll report");
    };
    assert_eq!(poll.created, 1);
    assert!(manager.store().get_cursor().await.unwrap().is_some());

    let outcome = runner
        .run(WorkflowRequest::MatchMirrors(MatchRequest::default()))
        .await
        .unwrap();
    let WorkflowReport::Match(matched) = outcome.report else {
        panic!("expected a match report");
    };
    assert_eq!(matched.created, 1);
    assert_eq!(manager.store().count_local_advisories().await.unwrap(), 1);
}
