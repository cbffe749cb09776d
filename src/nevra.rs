//! RPM package identifiers.
//!
//! A NEVRA is `name-[epoch:]version-release.arch`, optionally followed by
//! `.rpm`. Matching between upstream advisories and rebuilt repositories uses
//! a "cleaned" NVRA with the distribution tag removed, since rebuilds keep
//! name, version and release but may differ in dist tag or module suffix.

use crate::error::{MirrorError, Result};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::fmt;
use std::str::FromStr;

static DIST_TAG: Lazy<std::result::Result<Regex, regex_lite::Error>> =
    Lazy::new(|| Regex::new(r"\.el\d+(?:_\d+)?"));
static MODULE_SUFFIX: Lazy<std::result::Result<Regex, regex_lite::Error>> =
    Lazy::new(|| Regex::new(r"\.module.+$"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nevra {
    pub name: String,
    pub epoch: Option<u32>,
    pub version: String,
    pub release: String,
    pub arch: String,
}

impl Nevra {
    pub fn epoch_or_zero(&self) -> u32 {
        self.epoch.unwrap_or(0)
    }

    /// `name-version-release.arch.rpm`, the file name inside a repository.
    pub fn filename(&self) -> String {
        format!("{}-{}-{}.{}.rpm", self.name, self.version, self.release, self.arch)
    }

    pub fn is_source(&self) -> bool {
        self.arch == "src"
    }

    pub fn is_modular(&self) -> bool {
        is_modular_release(&self.release)
    }

    pub fn cleaned(&self) -> String {
        cleaned_nvra(&self.name, &self.version, &self.release, &self.arch)
    }
}

impl FromStr for Nevra {
    type Err = MirrorError;

    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.strip_suffix(".rpm").unwrap_or(raw);
        let (rest, arch) = trimmed
            .rsplit_once('.')
            .ok_or_else(|| MirrorError::invalid_nevra(raw, "missing architecture"))?;
        let (nvr, release) = rest
            .rsplit_once('-')
            .ok_or_else(|| MirrorError::invalid_nevra(raw, "missing release"))?;
        let (name, epoch_version) = nvr
            .rsplit_once('-')
            .ok_or_else(|| MirrorError::invalid_nevra(raw, "missing version"))?;

        let (epoch, version) = match epoch_version.split_once(':') {
            Some((epoch, version)) => {
                let epoch = epoch
                    .parse::<u32>()
                    .map_err(|_| MirrorError::invalid_nevra(raw, "epoch is not a number"))?;
                (Some(epoch), version)
            }
            None => (None, epoch_version),
        };

        if [name, version, release, arch].iter().any(|part| part.is_empty()) {
            return Err(MirrorError::invalid_nevra(raw, "empty component"));
        }

        Ok(Self {
            name: name.to_string(),
            epoch,
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
        })
    }
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.epoch {
            Some(epoch) => write!(
                f,
                "{}-{}:{}-{}.{}",
                self.name, epoch, self.version, self.release, self.arch
            ),
            None => write!(f, "{}-{}-{}.{}", self.name, self.version, self.release, self.arch),
        }
    }
}

pub fn is_modular_release(release: &str) -> bool {
    release.contains(".module+")
}

/// Match key for a package: dist tag and module suffix stripped, with a
/// `module.` prefix for modular builds so they never collide with
/// non-modular builds of the same NVR.
pub fn cleaned_nvra(name: &str, version: &str, release: &str, arch: &str) -> String {
    let mut clean_release = release.to_string();
    if let Ok(regex) = &*DIST_TAG {
        clean_release = regex.replace_all(&clean_release, "").into_owned();
    }
    if let Ok(regex) = &*MODULE_SUFFIX {
        clean_release = regex.replace_all(&clean_release, "").into_owned();
    }
    let cleaned = format!("{name}-{version}-{clean_release}.{arch}");
    if is_modular_release(release) {
        format!("module.{cleaned}")
    } else {
        cleaned
    }
}
