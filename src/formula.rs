//! Package descriptors ("formulae") read from the catalog.
//!
//! A formula is a static TOML record. It is parsed once and never mutated;
//! everything downstream borrows it.
//!
//! ```toml
//! name = "git-curl-openssl"
//! desc = "Distributed revision control system"
//! url = "https://mirrors.edge.kernel.org/pub/software/scm/git/git-2.35.3.tar.xz"
//! sha256 = "15e9db4f..."
//! license = "GPL-2.0-only"
//! head = "https://github.com/git/git.git"
//! depends_on = ["curl", "gettext", "openssl@1.1", "pcre2"]
//!
//! [[resource]]
//! name = "man"
//! url = "https://mirrors.edge.kernel.org/pub/software/scm/git/git-manpages-2.35.3.tar.xz"
//! sha256 = "a78c7ee0..."
//! ```

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::version::version_from_url;
use crate::stage::hash::{Checksum, ChecksumError};

/// Name under which the primary source archive is staged.
pub const SOURCE_RESOURCE: &str = "source";

#[derive(Error, Debug)]
pub enum FormulaError {
    #[error("cannot read formula {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid formula: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot determine version of '{name}' from {url}; set `version` explicitly")]
    MissingVersion { name: String, url: String },

    #[error("invalid checksum for '{name}': {source}")]
    Checksum {
        name: String,
        #[source]
        source: ChecksumError,
    },

    #[error("duplicate resource '{0}'")]
    DuplicateResource(String),

    #[error("resource name '{0}' is reserved")]
    ReservedResource(String),

    #[error("formula name must not be empty")]
    EmptyName,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FormulaToml {
    name: String,
    version: Option<String>,
    desc: Option<String>,
    homepage: Option<String>,
    url: String,
    #[serde(alias = "sha256")]
    checksum: String,
    license: Option<String>,
    head: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default, rename = "resource")]
    resources: Vec<ResourceToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceToml {
    name: String,
    url: String,
    #[serde(alias = "sha256")]
    checksum: String,
}

/// A secondary artifact fetched alongside the package source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    name: String,
    url: String,
    checksum: Checksum,
}

impl Resource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, checksum: Checksum) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            checksum,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// File name of the download, taken from the URL.
    pub fn filename(&self) -> String {
        self.url
            .rsplit('/')
            .next()
            .and_then(|s| s.split('?').next())
            .filter(|s| !s.is_empty())
            .unwrap_or("download")
            .to_string()
    }
}

/// Immutable package descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    name: String,
    version: String,
    desc: Option<String>,
    homepage: Option<String>,
    license: Option<String>,
    source: Resource,
    head: Option<String>,
    dependencies: Vec<String>,
    resources: Vec<Resource>,
}

impl Formula {
    /// Parse a formula from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, FormulaError> {
        let raw: FormulaToml = toml::from_str(content)?;
        Self::from_raw(raw)
    }

    /// Read and parse a formula file.
    pub fn from_file(path: &Path) -> Result<Self, FormulaError> {
        let content = std::fs::read_to_string(path).map_err(|source| FormulaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    fn from_raw(raw: FormulaToml) -> Result<Self, FormulaError> {
        if raw.name.trim().is_empty() {
            return Err(FormulaError::EmptyName);
        }

        let version = match raw.version {
            Some(v) => v,
            None => version_from_url(&raw.url).ok_or_else(|| FormulaError::MissingVersion {
                name: raw.name.clone(),
                url: raw.url.clone(),
            })?,
        };

        let source_checksum = parse_checksum(&raw.name, &raw.checksum)?;
        let source = Resource::new(SOURCE_RESOURCE, raw.url, source_checksum);

        let mut seen = HashSet::new();
        let mut resources = Vec::with_capacity(raw.resources.len());
        for r in raw.resources {
            if r.name == SOURCE_RESOURCE {
                return Err(FormulaError::ReservedResource(r.name));
            }
            if !seen.insert(r.name.clone()) {
                return Err(FormulaError::DuplicateResource(r.name));
            }
            let checksum = parse_checksum(&r.name, &r.checksum)?;
            resources.push(Resource::new(r.name, r.url, checksum));
        }

        Ok(Self {
            name: raw.name,
            version,
            desc: raw.desc,
            homepage: raw.homepage,
            license: raw.license,
            source,
            head: raw.head,
            dependencies: raw.depends_on,
            resources,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn desc(&self) -> Option<&str> {
        self.desc.as_deref()
    }

    pub fn homepage(&self) -> Option<&str> {
        self.homepage.as_deref()
    }

    pub fn license(&self) -> Option<&str> {
        self.license.as_deref()
    }

    /// The primary source archive, staged under [`SOURCE_RESOURCE`].
    pub fn source(&self) -> &Resource {
        &self.source
    }

    pub fn head(&self) -> Option<&str> {
        self.head.as_deref()
    }

    /// Direct dependency names, in declared order.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Look up a secondary resource by name.
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }
}

fn parse_checksum(name: &str, value: &str) -> Result<Checksum, FormulaError> {
    Checksum::parse(value).map_err(|source| FormulaError::Checksum {
        name: name.to_string(),
        source,
    })
}
