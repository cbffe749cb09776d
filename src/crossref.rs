//! Cross-reference of upstream advisory packages against a mirror's repositories.
//!
//! Rebuilt packages keep name, version and release but usually differ in dist
//! tag, so both sides are compared on their cleaned NVRA. When no exact key
//! exists, the first repository package with the same name and arch whose
//! cleaned NVR extends the advisory's one is taken instead (rebuild suffixes
//! such as `.1` or `.rocky.0.1`).

use crate::error::Result;
use crate::models::{LocalPackage, Mirror};
use crate::nevra::{Nevra, cleaned_nvra, is_modular_release};
use crate::repomd::{ModuleCoordinates, RepoPackage, RepositoryIndex, RepositoryMetadata};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct IndexedPackage {
    package: RepoPackage,
    repo_name: String,
}

/// All packages of one mirror's repositories, keyed for matching.
#[derive(Debug, Default)]
pub struct MirrorPackageIndex {
    by_cleaned: HashMap<String, Vec<IndexedPackage>>,
    /// (modular, name) to cleaned keys, in repository order.
    by_name: HashMap<(bool, String), Vec<String>>,
    modules: HashMap<String, ModuleCoordinates>,
}

impl MirrorPackageIndex {
    pub fn new(repositories: Vec<(String, RepositoryIndex)>) -> Self {
        let mut index = Self::default();
        for (repo_name, repository) in repositories {
            index.modules.extend(repository.modules);
            for package in repository.packages {
                let cleaned = cleaned_nvra(
                    &package.name,
                    &package.version,
                    &package.release,
                    &package.arch,
                );
                let name_key = (is_modular_release(&package.release), package.name.clone());
                let names = index.by_name.entry(name_key).or_default();
                if !names.contains(&cleaned) {
                    names.push(cleaned.clone());
                }
                index
                    .by_cleaned
                    .entry(cleaned)
                    .or_default()
                    .push(IndexedPackage {
                        package,
                        repo_name: repo_name.clone(),
                    });
            }
        }
        index
    }

    pub fn is_empty(&self) -> bool {
        self.by_cleaned.is_empty()
    }

    fn lookup(&self, nevra: &Nevra) -> Option<&[IndexedPackage]> {
        let cleaned = nevra.cleaned();
        if let Some(found) = self.by_cleaned.get(&cleaned) {
            return Some(found);
        }

        let (nvr, arch) = cleaned.rsplit_once('.')?;
        let alias = self
            .by_name
            .get(&(nevra.is_modular(), nevra.name.clone()))?
            .iter()
            .find(|candidate| {
                candidate
                    .rsplit_once('.')
                    .is_some_and(|(c_nvr, c_arch)| c_arch == arch && c_nvr.starts_with(nvr))
            })?;
        debug!("Aliased {} to {}", cleaned, alias);
        self.by_cleaned.get(alias).map(Vec::as_slice)
    }

    /// Local package rows for the upstream `packages` found in this mirror.
    pub fn resolve(&self, mirror: &Mirror, packages: &[String]) -> Vec<LocalPackage> {
        let acceptable = acceptable_arches(&mirror.match_arch);

        let mut wanted: BTreeSet<Nevra> = BTreeSet::new();
        for raw in packages {
            match raw.parse::<Nevra>() {
                Ok(nevra) if acceptable.contains(&nevra.arch.as_str()) => {
                    wanted.insert(nevra);
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping upstream package: {}", e),
            }
        }

        let mut resolved = Vec::new();
        for nevra in &wanted {
            let Some(found) = self.lookup(nevra) else {
                continue;
            };
            for indexed in found {
                resolved.push(self.local_package(mirror, indexed));
            }
        }
        resolved
    }

    fn local_package(&self, mirror: &Mirror, indexed: &IndexedPackage) -> LocalPackage {
        let package = &indexed.package;
        let package_name = if package.arch == "src" {
            package.name.clone()
        } else {
            match package.source_rpm.parse::<Nevra>() {
                Ok(source) => source.name,
                Err(_) => package.name.clone(),
            }
        };

        let module = is_modular_release(&package.release)
            .then(|| self.modules.get(&package.nevra()))
            .flatten();

        LocalPackage {
            nevra: format!("{}.rpm", package.nevra()),
            checksum: package.checksum.clone(),
            checksum_type: package.checksum_type.clone(),
            module_context: module.map(|m| m.context.clone()),
            module_name: module.map(|m| m.name.clone()),
            module_stream: module.map(|m| m.stream.clone()),
            module_version: module.map(|m| m.version.clone()),
            repo_name: indexed.repo_name.clone(),
            package_name,
            mirror_id: mirror.id,
            supported_product_id: mirror.supported_product_id,
            product_name: mirror.name.clone(),
        }
    }
}

/// Architectures an advisory package may have to be published for `arch`.
pub fn acceptable_arches(arch: &str) -> Vec<&str> {
    let mut arches = vec![arch, "src", "noarch"];
    if arch == "x86_64" {
        arches.push("i686");
    }
    arches
}

/// Load every repository of `mirror` built for the mirror's own arch.
pub async fn load_mirror_index(
    loader: &dyn RepositoryMetadata,
    mirror: &Mirror,
) -> Result<MirrorPackageIndex> {
    let mut repositories = Vec::new();
    for source in mirror
        .repositories
        .iter()
        .filter(|r| r.arch == mirror.match_arch)
    {
        let index = loader.load(source).await?;
        debug!(
            "Repository {} of {}: {} packages",
            source.repo_name,
            mirror.name,
            index.packages.len()
        );
        repositories.push((source.repo_name.clone(), index));
    }
    Ok(MirrorPackageIndex::new(repositories))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repomd::parse_primary;
    use crate::testing::{PRIMARY_XML, mirror_fixture, modules_yaml};

    fn index() -> MirrorPackageIndex {
        let repository = RepositoryIndex {
            packages: parse_primary(PRIMARY_XML).unwrap(),
            modules: crate::repomd::parse_modules(&modules_yaml()).unwrap(),
        };
        MirrorPackageIndex::new(vec![("BaseOS".to_string(), repository)])
    }

    #[test]
    fn test_exact_match_with_source_package() {
        let mirror = mirror_fixture(3, "Rocky Linux 9 x86_64", None, "x86_64");
        let packages = index().resolve(
            &mirror,
            &[
                "bash-0:5.1.8-9.el9_4.x86_64".to_string(),
                "bash-0:5.1.8-9.el9_4.src".to_string(),
                "bash-0:5.1.8-9.el9_4.aarch64".to_string(),
            ],
        );
        let nevras: Vec<&str> = packages.iter().map(|p| p.nevra.as_str()).collect();
        assert_eq!(
            nevras,
            vec!["bash-0:5.1.8-9.el9_4.src.rpm", "bash-0:5.1.8-9.el9_4.x86_64.rpm"]
        );
        assert!(packages.iter().all(|p| p.package_name == "bash"));
        assert!(packages.iter().all(|p| p.repo_name == "BaseOS"));
        assert_eq!(packages[1].checksum, "aaaa1111");
        assert_eq!(packages[1].product_name, "Rocky Linux 9 x86_64");
        assert_eq!(packages[1].supported_product_id, 3);
    }

    #[test]
    fn test_prefix_alias_for_rebuild_suffix() {
        let mut repository = RepositoryIndex::default();
        repository.packages.push(RepoPackage {
            name: "rsync".to_string(),
            epoch: "0".to_string(),
            version: "3.2.3".to_string(),
            release: "19.el9_4.1.rocky.0.2".to_string(),
            arch: "x86_64".to_string(),
            checksum: "dddd".to_string(),
            checksum_type: "sha256".to_string(),
            source_rpm: "rsync-3.2.3-19.el9_4.1.rocky.0.2.src.rpm".to_string(),
        });
        let index = MirrorPackageIndex::new(vec![("BaseOS".to_string(), repository)]);

        let mirror = mirror_fixture(1, "Rocky Linux 9 x86_64", None, "x86_64");
        let packages = index.resolve(&mirror, &["rsync-0:3.2.3-19.el9_4.1.x86_64".to_string()]);
        assert_eq!(packages.len(), 1);
        assert_eq!(
            packages[0].nevra,
            "rsync-0:3.2.3-19.el9_4.1.rocky.0.2.x86_64.rpm"
        );

        // arch has to agree even for aliases
        assert!(index
            .resolve(&mirror, &["rsync-0:3.2.3-19.el9_4.1.i686".to_string()])
            .is_empty());
    }

    #[test]
    fn test_modular_package_gets_module_coordinates() {
        let mirror = mirror_fixture(1, "Rocky Linux 9 x86_64", None, "x86_64");
        let packages = index().resolve(
            &mirror,
            &["nodejs-1:18.19.0-1.module+el9.4.0+21000+abcdef12.x86_64".to_string()],
        );
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].module_name.as_deref(), Some("nodejs"));
        assert_eq!(packages[0].module_stream.as_deref(), Some("18"));
        assert_eq!(packages[0].module_context.as_deref(), Some("rhel9"));
        assert_eq!(packages[0].package_name, "nodejs");
    }

    #[test]
    fn test_modular_and_plain_builds_never_alias() {
        let mirror = mirror_fixture(1, "Rocky Linux 9 x86_64", None, "x86_64");
        assert!(index()
            .resolve(&mirror, &["nodejs-1:18.19.0-1.el9.x86_64".to_string()])
            .is_empty());
    }

    #[test]
    fn test_acceptable_arches() {
        assert_eq!(acceptable_arches("x86_64"), vec!["x86_64", "src", "noarch", "i686"]);
        assert_eq!(acceptable_arches("aarch64"), vec!["aarch64", "src", "noarch"]);
    }
}
