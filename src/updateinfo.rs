//! `updateinfo.xml` rendering for one published repository.
//!
//! Output depends only on stored data: updates are ordered by advisory name,
//! packages by NEVRA and collections by name, so unchanged data renders to
//! byte-identical documents.

use crate::config::UpdateInfoConfig;
use crate::error::{MirrorError, Result};
use crate::models::{LocalAdvisory, LocalAffectedProduct, LocalPackage};
use crate::nevra::Nevra;
use crate::store::RepositoryTarget;
use chrono::{DateTime, Datelike, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const CVE_URL: &str = "https://cve.mitre.org/cgi-bin/cvename.cgi?name=";
const SKIPPED_SUFFIXES: [&str; 4] = [
    "-debuginfo",
    "-debugsource",
    "-debuginfo-common",
    "-debugsource-common",
];

/// Where the document of `target` is written below `out_dir`.
pub fn output_path(out_dir: &Path, target: &RepositoryTarget) -> PathBuf {
    out_dir
        .join(&target.mirror_name)
        .join(&target.repo_name)
        .join("updateinfo.xml")
}

/// Lowercase ASCII words joined by `-`.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[derive(Debug)]
struct Collection<'a> {
    module: Option<&'a LocalPackage>,
    packages: Vec<RenderedPackage>,
}

#[derive(Debug)]
struct RenderedPackage {
    nevra: Nevra,
    src: String,
    checksum: String,
    checksum_type: String,
}

/// Grouping key tying binaries to their source RPM.
fn source_key(package: &LocalPackage) -> String {
    match (&package.module_name, &package.module_stream) {
        (Some(module), Some(stream)) => format!("{module}:{}:{stream}", package.package_name),
        _ => package.package_name.clone(),
    }
}

fn arch_allowed(arch: &str, target_arch: &str) -> bool {
    arch == target_arch || arch == "noarch" || (arch == "x86_64" && target_arch == "i686")
}

/// Collections of one advisory in `target`, empty ones dropped.
fn collections<'a>(
    target: &RepositoryTarget,
    packages: &[&'a LocalPackage],
) -> BTreeMap<String, Collection<'a>> {
    let mut sources: HashMap<String, String> = HashMap::new();
    for package in packages {
        if let Ok(nevra) = package.nevra.parse::<Nevra>() {
            if nevra.is_source() && nevra.name == package.package_name {
                sources
                    .entry(source_key(package))
                    .or_insert_with(|| nevra.filename());
            }
        }
    }

    let default_short = slugify(&format!("{}-{}-rpms", target.mirror_name, target.repo_name));
    let modular = packages.iter().any(|p| p.module_name.is_some());

    let mut collections: BTreeMap<String, Collection<'a>> = BTreeMap::new();
    for package in packages {
        let short = match &package.module_name {
            Some(module) => format!("{default_short}__{module}"),
            None if modular => continue,
            None => default_short.clone(),
        };
        let collection = collections.entry(short).or_insert_with(|| Collection {
            module: package.module_name.is_some().then_some(*package),
            packages: Vec::new(),
        });

        let Ok(nevra) = package.nevra.parse::<Nevra>() else {
            debug!("Unparsable package {}", package.nevra);
            continue;
        };
        if nevra.is_source()
            || !arch_allowed(&nevra.arch, &target.arch)
            || SKIPPED_SUFFIXES.iter().any(|s| nevra.name.ends_with(s))
        {
            continue;
        }
        let Some(src) = sources.get(&source_key(package)) else {
            continue;
        };
        collection.packages.push(RenderedPackage {
            nevra,
            src: src.clone(),
            checksum: package.checksum.clone(),
            checksum_type: package.checksum_type.clone(),
        });
    }

    collections.retain(|_, c| !c.packages.is_empty());
    collections
}

/// The affected-product row describing `target`'s mirror.
fn release_row<'a>(
    advisory: &'a LocalAdvisory,
    target: &RepositoryTarget,
) -> Option<&'a LocalAffectedProduct> {
    advisory
        .affected_products
        .iter()
        .find(|p| p.name == target.mirror_name)
        .or_else(|| advisory.affected_products.first())
}

struct XmlWriter {
    writer: Writer<Vec<u8>>,
}

impl XmlWriter {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<()> {
        self.writer.write_event(event).map_err(MirrorError::xml)
    }

    fn start(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        let start = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.event(Event::Start(start))
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn empty(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        let start = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.event(Event::Empty(start))
    }

    fn text(&mut self, name: &str, attributes: &[(&str, &str)], text: &str) -> Result<()> {
        if text.is_empty() {
            return self.empty(name, attributes);
        }
        self.start(name, attributes)?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner()).map_err(MirrorError::xml)
    }
}

fn format_time(timestamp: DateTime<Utc>) -> String {
    timestamp.format(TIME_FORMAT).to_string()
}

/// Render the updateinfo document of `target` from its advisories.
///
/// Advisories may carry packages of other repositories; only the rows of
/// `target` are rendered and an advisory left without packages is omitted.
pub fn render(
    target: &RepositoryTarget,
    advisories: &[LocalAdvisory],
    config: &UpdateInfoConfig,
) -> Result<String> {
    let mut sorted: Vec<&LocalAdvisory> = advisories.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut xml = XmlWriter::new();
    xml.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    xml.start("updates", &[])?;

    for advisory in sorted {
        let mut packages: Vec<&LocalPackage> = advisory
            .packages
            .iter()
            .filter(|p| p.mirror_id == target.mirror_id && p.repo_name == target.repo_name)
            .collect();
        packages.sort_by(|a, b| a.nevra.cmp(&b.nevra));

        let collections = collections(target, &packages);
        if collections.is_empty() {
            debug!("{} has no packages for {}", advisory.name, target.repo_name);
            continue;
        }
        write_update(&mut xml, target, advisory, &collections, config)?;
    }

    xml.end("updates")?;
    let mut document = xml.finish()?;
    document.push('\n');
    Ok(document)
}

fn write_update(
    xml: &mut XmlWriter,
    target: &RepositoryTarget,
    advisory: &LocalAdvisory,
    collections: &BTreeMap<String, Collection<'_>>,
    config: &UpdateInfoConfig,
) -> Result<()> {
    xml.start(
        "update",
        &[
            ("from", config.managing_editor.as_str()),
            ("status", "final"),
            ("type", advisory.kind.updateinfo_type()),
            ("version", "2"),
        ],
    )?;
    xml.text("id", &[], &advisory.name)?;
    xml.text("title", &[], &advisory.synopsis)?;
    xml.empty("issued", &[("date", &format_time(advisory.published_at))])?;
    xml.empty("updated", &[("date", &format_time(advisory.updated_at))])?;
    xml.text(
        "rights",
        &[],
        &format!(
            "Copyright {} {}",
            advisory.published_at.year(),
            config.company_name
        ),
    )?;

    let row = release_row(advisory, target);
    let release = row
        .map(|p| match p.minor_version {
            Some(minor) => format!("{} {}.{}", p.variant, p.major_version, minor),
            None => format!("{} {}", p.variant, p.major_version),
        })
        .unwrap_or_default();
    xml.text("release", &[], &release)?;
    xml.text("pushcount", &[], "1")?;
    xml.text("severity", &[], &advisory.severity)?;
    xml.text("summary", &[], &advisory.topic)?;

    let mut description = advisory.description.clone();
    if row.is_some_and(|p| p.overridden && p.name == target.mirror_name) {
        description.push_str(&format!(
            "\n\nThis advisory is published for {} through an override.",
            target.mirror_name
        ));
    }
    xml.text("description", &[], &description)?;
    xml.text("solution", &[], "")?;

    xml.start("references", &[])?;
    for cve in &advisory.cves {
        let href = format!("{CVE_URL}{}", cve.cve);
        xml.empty(
            "reference",
            &[
                ("href", href.as_str()),
                ("id", cve.cve.as_str()),
                ("type", "cve"),
                ("title", cve.cve.as_str()),
            ],
        )?;
    }
    for fix in &advisory.fixes {
        xml.empty(
            "reference",
            &[
                ("href", fix.source.as_str()),
                ("id", fix.ticket_id.as_str()),
                ("type", "bugzilla"),
                ("title", fix.description.as_str()),
            ],
        )?;
    }
    let self_href = format!("{}/{}", config.ui_url.trim_end_matches('/'), advisory.name);
    xml.empty(
        "reference",
        &[
            ("href", self_href.as_str()),
            ("id", advisory.name.as_str()),
            ("type", "self"),
            ("title", advisory.name.as_str()),
        ],
    )?;
    xml.end("references")?;

    xml.start("pkglist", &[])?;
    for (short, collection) in collections {
        write_collection(xml, target, short, collection)?;
    }
    xml.end("pkglist")?;
    xml.end("update")
}

fn write_collection(
    xml: &mut XmlWriter,
    target: &RepositoryTarget,
    short: &str,
    collection: &Collection<'_>,
) -> Result<()> {
    xml.start("collection", &[("short", short)])?;
    xml.text("name", &[], short)?;

    if let Some(module) = collection.module {
        xml.empty(
            "module",
            &[
                ("name", module.module_name.as_deref().unwrap_or_default()),
                ("stream", module.module_stream.as_deref().unwrap_or_default()),
                ("version", module.module_version.as_deref().unwrap_or_default()),
                ("context", module.module_context.as_deref().unwrap_or_default()),
                ("arch", target.arch.as_str()),
            ],
        )?;
    }

    for package in &collection.packages {
        let epoch = package.nevra.epoch_or_zero().to_string();
        xml.start(
            "package",
            &[
                ("name", package.nevra.name.as_str()),
                ("arch", package.nevra.arch.as_str()),
                ("epoch", epoch.as_str()),
                ("version", package.nevra.version.as_str()),
                ("release", package.nevra.release.as_str()),
                ("src", package.src.as_str()),
            ],
        )?;
        xml.text("filename", &[], &package.nevra.filename())?;
        xml.text("sum", &[("type", package.checksum_type.as_str())], &package.checksum)?;
        xml.end("package")?;
    }

    xml.end("collection")
}
