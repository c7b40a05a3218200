//! Resource staging
//!
//! Each resource moves through fetched → verified → staged. Fetching writes
//! into the download cache, staging extracts into the run's work tree; neither
//! touches the install prefix. Both are memoized per run by resource name, so
//! asking twice costs nothing.
//!
//! The installer calls [`Stager::prefetch`] for every resource the plan
//! references before the first step runs; extraction then happens lazily when
//! a step's working directory names the resource.

pub mod extract;
pub mod fetch;
pub mod hash;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::output;
use crate::formula::Resource;

pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use hash::{Checksum, HashAlgorithm};

/// Downloaded content did not match the declared checksum.
#[derive(Error, Debug)]
#[error("{algorithm} mismatch for '{resource}' ({url})\n  expected: {expected}\n  got:      {actual}")]
pub struct IntegrityError {
    pub resource: String,
    pub url: String,
    pub algorithm: &'static str,
    pub expected: String,
    pub actual: String,
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("cannot stage '{resource}': {source}")]
    Extract {
        resource: String,
        #[source]
        source: extract::ExtractError,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StageError + '_ {
    move |source| StageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Fetches, verifies and extracts resources for one install run.
pub struct Stager {
    fetcher: Box<dyn Fetcher>,
    cache_dir: PathBuf,
    work_dir: PathBuf,
    fetched: HashMap<String, PathBuf>,
    staged: HashMap<String, PathBuf>,
}

impl Stager {
    pub fn new(
        fetcher: Box<dyn Fetcher>,
        cache_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            cache_dir: cache_dir.into(),
            work_dir: work_dir.into(),
            fetched: HashMap::new(),
            staged: HashMap::new(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Where `name` is (or would be) extracted inside the work tree.
    pub fn stage_dir(&self, name: &str) -> PathBuf {
        self.work_dir.join("resources").join(sanitize(name))
    }

    /// Path of the verified download for `resource` in the cache.
    pub fn cache_path(&self, resource: &Resource) -> PathBuf {
        let hex = resource.checksum().hex();
        let short = &hex[..hex.len().min(12)];
        self.cache_dir.join(format!("{}--{}", short, resource.filename()))
    }

    pub fn is_fetched(&self, name: &str) -> bool {
        self.fetched.contains_key(name)
    }

    pub fn is_staged(&self, name: &str) -> bool {
        self.staged.contains_key(name)
    }

    /// Fetch and verify every resource, stopping at the first failure.
    pub fn prefetch<'r>(
        &mut self,
        resources: impl IntoIterator<Item = &'r Resource>,
    ) -> Result<(), StageError> {
        for resource in resources {
            self.fetch(resource)?;
        }
        Ok(())
    }

    /// Download `resource` into the cache (unless a verified copy is already
    /// there) and check its checksum. Returns the cached archive path.
    pub fn fetch(&mut self, resource: &Resource) -> Result<PathBuf, StageError> {
        if let Some(path) = self.fetched.get(resource.name()) {
            return Ok(path.clone());
        }

        std::fs::create_dir_all(&self.cache_dir).map_err(io_err(&self.cache_dir))?;
        let cached = self.cache_path(resource);

        if cached.is_file() {
            match resource.checksum().matches_file(&cached).map_err(io_err(&cached))? {
                Ok(()) => {
                    output::detail(&format!("using cached {}", resource.filename()));
                    self.fetched.insert(resource.name().to_string(), cached.clone());
                    return Ok(cached);
                }
                Err(_) => {
                    output::warning(&format!(
                        "cached {} is corrupt, downloading again",
                        cached.display()
                    ));
                    std::fs::remove_file(&cached).map_err(io_err(&cached))?;
                }
            }
        }

        output::sub_action(&format!("fetch {}", resource.name()));
        let partial = cached.with_file_name(format!("{}.incomplete", resource.filename()));

        if let Err(e) = self.fetcher.fetch(resource.url(), &partial) {
            let _ = std::fs::remove_file(&partial);
            return Err(e.into());
        }

        let verdict = resource
            .checksum()
            .matches_file(&partial)
            .map_err(io_err(&partial))?;
        if let Err(actual) = verdict {
            let _ = std::fs::remove_file(&partial);
            return Err(IntegrityError {
                resource: resource.name().to_string(),
                url: resource.url().to_string(),
                algorithm: resource.checksum().algorithm().name(),
                expected: resource.checksum().hex().to_string(),
                actual,
            }
            .into());
        }

        std::fs::rename(&partial, &cached).map_err(io_err(&cached))?;
        self.fetched.insert(resource.name().to_string(), cached.clone());
        Ok(cached)
    }

    /// Extract `resource` into the work tree, fetching it first if needed.
    ///
    /// Returns the directory holding its content; a single wrapping
    /// top-level directory is descended into.
    pub fn stage(&mut self, resource: &Resource) -> Result<PathBuf, StageError> {
        if let Some(path) = self.staged.get(resource.name()) {
            return Ok(path.clone());
        }

        let archive = self.fetch(resource)?;
        let dir = self.stage_dir(resource.name());
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(io_err(&dir))?;
        }
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let filename = resource.filename();
        if extract::detect_format(&filename).is_some() {
            let pb = output::spinner(&format!("extracting {}", filename));
            if let Err(source) = extract::extract(&archive, &filename, &dir) {
                output::progress_fail(pb, "extraction failed");
                return Err(StageError::Extract {
                    resource: resource.name().to_string(),
                    source,
                });
            }
            output::progress_done(pb);
        } else {
            let dest = dir.join(&filename);
            std::fs::copy(&archive, &dest).map_err(io_err(&dest))?;
        }

        let root = extract::single_top_dir(&dir)
            .map_err(io_err(&dir))?
            .unwrap_or(dir);
        output::detail(&format!("staged {} in {}", resource.name(), root.display()));
        self.staged.insert(resource.name().to_string(), root.clone());
        Ok(root)
    }
}

/// Turn a resource name into a directory name (`Net::SMTP::SSL` → `Net-SMTP-SSL`).
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@') {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('-').to_string()
}
