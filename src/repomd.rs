//! Package repository metadata of a mirror.
//!
//! A repository source points at `repodata/repomd.xml`. From there the
//! `primary` data file lists every package with its checksum and source RPM,
//! and the optional `modules` file (multi-document YAML) maps modular
//! artifacts to their module coordinates.

use crate::error::{MirrorError, Result};
use crate::models::RepositorySource;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info};
use xz2::read::XzDecoder;

const SOURCE_NAME: &str = "repomd";

/// One `<package>` entry of `primary.xml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoPackage {
    pub name: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub checksum: String,
    pub checksum_type: String,
    /// Empty for source packages.
    pub source_rpm: String,
}

impl RepoPackage {
    /// `name-epoch:version-release.arch`, the key used by `modules.yaml`.
    pub fn nevra(&self) -> String {
        format!(
            "{}-{}:{}-{}.{}",
            self.name, self.epoch, self.version, self.release, self.arch
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCoordinates {
    pub name: String,
    pub stream: String,
    pub version: String,
    pub context: String,
}

/// Packages and module artifacts of one repository, across its binary,
/// debug and source metadata.
#[derive(Debug, Clone, Default)]
pub struct RepositoryIndex {
    pub packages: Vec<RepoPackage>,
    /// Keyed by artifact NEVRA without `.rpm`.
    pub modules: HashMap<String, ModuleCoordinates>,
}

impl RepositoryIndex {
    pub fn merge(&mut self, other: RepositoryIndex) {
        self.packages.extend(other.packages);
        self.modules.extend(other.modules);
    }
}

#[async_trait]
pub trait RepositoryMetadata: Send + Sync {
    async fn load(&self, source: &RepositorySource) -> Result<RepositoryIndex>;
}

/// Loads repository metadata over HTTP with retries.
pub struct HttpRepositoryMetadata {
    client: ClientWithMiddleware,
}

impl HttpRepositoryMetadata {
    pub fn new(max_retries: u32) -> Result<Self> {
        let base_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { client })
    }

    async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(MirrorError::source_fetch(
                SOURCE_NAME,
                format!("{url}: HTTP {}", response.status()),
            ));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn load_url(&self, repomd_url: &str) -> Result<RepositoryIndex> {
        let repomd_url = Url::parse(repomd_url)
            .map_err(|e| MirrorError::config(format!("invalid repository URL {repomd_url}: {e}")))?;
        info!("Fetching {}", repomd_url);

        let repomd = decode_text(&self.get_bytes(&repomd_url).await?)?;
        let locations = parse_repomd(&repomd)?;

        let mut index = RepositoryIndex::default();
        let Some(primary_href) = locations.get("primary") else {
            return Err(MirrorError::xml(format!(
                "{repomd_url}: no primary data listed"
            )));
        };
        let primary_url = data_url(&repomd_url, primary_href)?;
        let primary = decompress(primary_href, self.get_bytes(&primary_url).await?)?;
        index.packages = parse_primary(&primary)?;
        debug!("{} packages in {}", index.packages.len(), primary_url);

        if let Some(modules_href) = locations.get("modules") {
            let modules_url = data_url(&repomd_url, modules_href)?;
            let modules = decompress(modules_href, self.get_bytes(&modules_url).await?)?;
            index.modules = parse_modules(&modules)?;
            info!("Found {} modular artifacts", index.modules.len());
        }

        Ok(index)
    }
}

#[async_trait]
impl RepositoryMetadata for HttpRepositoryMetadata {
    async fn load(&self, source: &RepositorySource) -> Result<RepositoryIndex> {
        let mut index = RepositoryIndex::default();
        for url in source.urls() {
            index.merge(self.load_url(url).await?);
        }
        Ok(index)
    }
}

/// Data hrefs are relative to the repository root, one level above `repodata/`.
fn data_url(repomd_url: &Url, href: &str) -> Result<Url> {
    repomd_url
        .join(&format!("../{href}"))
        .map_err(|e| MirrorError::config(format!("invalid data href {href}: {e}")))
}

fn decode_text(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| MirrorError::compression(e.to_string()))
}

fn decompress(href: &str, bytes: Vec<u8>) -> Result<String> {
    if href.ends_with(".gz") {
        let mut decoder = GzDecoder::new(bytes.as_slice());
        let mut text = String::new();
        decoder.read_to_string(&mut text)?;
        Ok(text)
    } else if href.ends_with(".zst") {
        let decoded = zstd::stream::decode_all(bytes.as_slice())?;
        decode_text(&decoded)
    } else if href.ends_with(".xz") {
        let mut decoder = XzDecoder::new(bytes.as_slice());
        let mut text = String::new();
        decoder.read_to_string(&mut text)?;
        Ok(text)
    } else if href.ends_with(".bz2") {
        Err(MirrorError::compression(format!(
            "{href}: unsupported compression"
        )))
    } else {
        decode_text(&bytes)
    }
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(MirrorError::xml)?;
        if attr.key.local_name().as_ref() == key {
            return Ok(Some(attr.unescape_value().map_err(MirrorError::xml)?.into_owned()));
        }
    }
    Ok(None)
}

/// Map of data type (`primary`, `modules`, ...) to location href.
pub fn parse_repomd(xml: &str) -> Result<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut locations = HashMap::new();
    let mut current_type: Option<String> = None;
    loop {
        match reader.read_event().map_err(MirrorError::xml)? {
            Event::Start(e) if e.local_name().as_ref() == b"data" => {
                current_type = attribute(&e, b"type")?;
            }
            Event::End(e) if e.local_name().as_ref() == b"data" => current_type = None,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"location" => {
                if let (Some(data_type), Some(href)) = (&current_type, attribute(&e, b"href")?) {
                    locations.insert(data_type.clone(), href);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(locations)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PrimaryField {
    Name,
    Arch,
    Checksum,
    SourceRpm,
}

pub fn parse_primary(xml: &str) -> Result<Vec<RepoPackage>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut packages = Vec::new();
    let mut current: Option<RepoPackage> = None;
    let mut field: Option<PrimaryField> = None;
    loop {
        match reader.read_event().map_err(MirrorError::xml)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"package" => current = Some(RepoPackage::default()),
                b"name" if current.is_some() => field = Some(PrimaryField::Name),
                b"arch" if current.is_some() => field = Some(PrimaryField::Arch),
                b"checksum" => {
                    if let Some(package) = current.as_mut() {
                        package.checksum_type = attribute(&e, b"type")?.unwrap_or_default();
                        field = Some(PrimaryField::Checksum);
                    }
                }
                b"sourcerpm" if current.is_some() => field = Some(PrimaryField::SourceRpm),
                b"version" => read_version(&e, current.as_mut())?,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"version" => {
                read_version(&e, current.as_mut())?;
            }
            Event::Text(text) => {
                if let (Some(package), Some(target)) = (current.as_mut(), field) {
                    let value = text.unescape().map_err(MirrorError::xml)?.into_owned();
                    match target {
                        PrimaryField::Name => package.name = value,
                        PrimaryField::Arch => package.arch = value,
                        PrimaryField::Checksum => package.checksum = value,
                        PrimaryField::SourceRpm => package.source_rpm = value,
                    }
                }
            }
            Event::End(e) => {
                field = None;
                if e.local_name().as_ref() == b"package" {
                    if let Some(package) = current.take() {
                        packages.push(package);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(packages)
}

fn read_version(element: &BytesStart<'_>, package: Option<&mut RepoPackage>) -> Result<()> {
    if let Some(package) = package {
        package.epoch = attribute(element, b"epoch")?.unwrap_or_else(|| "0".to_string());
        package.version = attribute(element, b"ver")?.unwrap_or_default();
        package.release = attribute(element, b"rel")?.unwrap_or_default();
    }
    Ok(())
}

#[derive(Deserialize)]
struct ModuleDocument {
    document: Option<String>,
    data: Option<ModuleData>,
}

#[derive(Deserialize)]
struct ModuleData {
    name: Option<serde_yaml::Value>,
    stream: Option<serde_yaml::Value>,
    version: Option<serde_yaml::Value>,
    context: Option<serde_yaml::Value>,
    artifacts: Option<ModuleArtifacts>,
}

#[derive(Deserialize)]
struct ModuleArtifacts {
    #[serde(default)]
    rpms: Vec<String>,
}

/// Streams and versions are sometimes bare YAML numbers.
fn yaml_scalar(value: Option<serde_yaml::Value>) -> String {
    match value {
        Some(serde_yaml::Value::String(s)) => s,
        Some(serde_yaml::Value::Number(n)) => n.to_string(),
        Some(serde_yaml::Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

pub fn parse_modules(yaml: &str) -> Result<HashMap<String, ModuleCoordinates>> {
    let mut modules = HashMap::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        // defaults and obsoletes documents have other shapes
        let Ok(document) = ModuleDocument::deserialize(document) else {
            continue;
        };
        if document.document.as_deref() != Some("modulemd") {
            continue;
        }
        let Some(data) = document.data else {
            continue;
        };
        let Some(artifacts) = data.artifacts else {
            continue;
        };
        let coordinates = ModuleCoordinates {
            name: yaml_scalar(data.name),
            stream: yaml_scalar(data.stream),
            version: yaml_scalar(data.version),
            context: yaml_scalar(data.context),
        };
        for nevra in artifacts.rpms {
            modules.insert(nevra, coordinates.clone());
        }
    }
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{PRIMARY_XML, modules_yaml, repomd_xml};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use xz2::write::XzEncoder;

    #[test]
    fn test_parse_repomd_locations() {
        let locations = parse_repomd(&repomd_xml(
            "repodata/abc-primary.xml.gz",
            Some("repodata/def-modules.yaml"),
        ))
        .unwrap();
        assert_eq!(locations["primary"], "repodata/abc-primary.xml.gz");
        assert_eq!(locations["modules"], "repodata/def-modules.yaml");
    }

    #[test]
    fn test_parse_primary_packages() {
        let packages = parse_primary(PRIMARY_XML).unwrap();
        assert_eq!(packages.len(), 3);

        let bash = &packages[0];
        assert_eq!(bash.name, "bash");
        assert_eq!(bash.epoch, "0");
        assert_eq!(bash.version, "5.1.8");
        assert_eq!(bash.release, "9.el9_4");
        assert_eq!(bash.arch, "x86_64");
        assert_eq!(bash.checksum_type, "sha256");
        assert_eq!(bash.checksum, "aaaa1111");
        assert_eq!(bash.source_rpm, "bash-5.1.8-9.el9_4.src.rpm");

        assert_eq!(packages[1].arch, "src");
        assert!(packages[1].source_rpm.is_empty());
    }

    #[test]
    fn test_parse_modules_skips_other_documents() {
        let modules = parse_modules(&modules_yaml()).unwrap();
        assert_eq!(modules.len(), 1);
        let coordinates = &modules["nodejs-1:18.19.0-1.module+el9.4.0+21000+abcdef12.x86_64"];
        assert_eq!(coordinates.name, "nodejs");
        assert_eq!(coordinates.stream, "18");
        assert_eq!(coordinates.version, "9040020240101000000");
        assert_eq!(coordinates.context, "rhel9");
    }

    #[test]
    fn test_data_url_is_relative_to_repository_root() {
        let base = Url::parse("https://dl.example.org/9/BaseOS/x86_64/os/repodata/repomd.xml")
            .unwrap();
        assert_eq!(
            data_url(&base, "repodata/abc-primary.xml.gz").unwrap().as_str(),
            "https://dl.example.org/9/BaseOS/x86_64/os/repodata/abc-primary.xml.gz"
        );
    }

    #[test]
    fn test_xz_payload_is_decoded() {
        let mut encoder = XzEncoder::new(Vec::new(), 6);
        encoder.write_all(PRIMARY_XML.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let text = decompress("repodata/abc-primary.xml.xz", compressed).unwrap();
        assert_eq!(text, PRIMARY_XML);
        assert!(!parse_primary(&text).unwrap().is_empty());
    }

    #[test]
    fn test_bzip2_is_rejected() {
        let err = decompress("repodata/abc-primary.xml.bz2", vec![]).unwrap_err();
        assert!(matches!(err, MirrorError::Compression(_)));
    }

    #[tokio::test]
    async fn test_load_over_http_with_gzip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/BaseOS/os/repodata/repomd.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(repomd_xml(
                "repodata/abc-primary.xml.gz",
                Some("repodata/def-modules.yaml.zst"),
            )))
            .mount(&server)
            .await;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(PRIMARY_XML.as_bytes()).unwrap();
        Mock::given(method("GET"))
            .and(path("/BaseOS/os/repodata/abc-primary.xml.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(encoder.finish().unwrap()))
            .mount(&server)
            .await;

        let modules = zstd::stream::encode_all(modules_yaml().as_bytes(), 3).unwrap();
        Mock::given(method("GET"))
            .and(path("/BaseOS/os/repodata/def-modules.yaml.zst"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(modules))
            .mount(&server)
            .await;

        let source = RepositorySource {
            id: 1,
            mirror_id: 1,
            production: true,
            arch: "x86_64".to_string(),
            url: format!("{}/BaseOS/os/repodata/repomd.xml", server.uri()),
            debug_url: None,
            source_url: Some(String::new()),
            repo_name: "BaseOS".to_string(),
        };
        let index = HttpRepositoryMetadata::new(0)
            .unwrap()
            .load(&source)
            .await
            .unwrap();
        assert_eq!(index.packages.len(), 3);
        assert_eq!(index.modules.len(), 1);
    }
}
