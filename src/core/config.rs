//! Installer configuration
//!
//! Values come from three layers, later ones winning:
//! built-in XDG defaults, an optional `config.toml`, then explicit overrides
//! (CLI flags, which clap already backs with `KEGFORGE_*` environment variables).
//!
//! ```toml
//! cellar = "/opt/kegs/Cellar"
//! cache = "/var/cache/kegforge"
//! jobs = 8
//! http_timeout_secs = 120
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;
const MIN_HTTP_TIMEOUT_SECS: u64 = 5;
const MAX_HTTP_TIMEOUT_SECS: u64 = 600;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    cellar: Option<PathBuf>,
    opt: Option<PathBuf>,
    cache: Option<PathBuf>,
    build_dir: Option<PathBuf>,
    jobs: Option<usize>,
    http_timeout_secs: Option<u64>,
}

/// Resolved installer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root under which kegs live (`<cellar>/<name>/<version>`)
    pub cellar: PathBuf,
    /// Directory of `<name>` links to installed dependency prefixes
    pub opt: PathBuf,
    /// Download cache
    pub cache: PathBuf,
    /// Parent directory for per-run build trees
    pub build_dir: PathBuf,
    /// Parallel make jobs (None = CPU count)
    pub jobs: Option<usize>,
    pub http_timeout: Duration,
}

/// Explicit overrides, typically from the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cellar: Option<PathBuf>,
    pub opt: Option<PathBuf>,
    pub cache: Option<PathBuf>,
    pub build_dir: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub http_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("kegforge");
        let cache = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("kegforge");

        Self {
            cellar: data.join("Cellar"),
            opt: data.join("opt"),
            cache,
            build_dir: std::env::temp_dir(),
            jobs: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Default location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("kegforge").join("config.toml"))
    }

    /// Load configuration: defaults, then `path` (or the default config file
    /// if it exists), then `overrides`.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => Some(read_toml(p)?),
            None => match Self::default_path() {
                Some(p) if p.is_file() => Some(read_toml(&p)?),
                _ => None,
            },
        };

        let mut config = Self::default();
        if let Some(file) = file {
            config.apply(file);
        }
        config.apply(ConfigToml {
            cellar: overrides.cellar,
            opt: overrides.opt,
            cache: overrides.cache,
            build_dir: overrides.build_dir,
            jobs: overrides.jobs,
            http_timeout_secs: overrides.http_timeout_secs,
        });
        Ok(config)
    }

    fn apply(&mut self, layer: ConfigToml) {
        if let Some(cellar) = layer.cellar {
            self.cellar = cellar;
        }
        if let Some(opt) = layer.opt {
            self.opt = opt;
        }
        if let Some(cache) = layer.cache {
            self.cache = cache;
        }
        if let Some(build_dir) = layer.build_dir {
            self.build_dir = build_dir;
        }
        if let Some(jobs) = layer.jobs.filter(|j| *j > 0) {
            self.jobs = Some(jobs);
        }
        if let Some(secs) = layer.http_timeout_secs {
            self.http_timeout =
                Duration::from_secs(secs.clamp(MIN_HTTP_TIMEOUT_SECS, MAX_HTTP_TIMEOUT_SECS));
        }
    }
}

fn read_toml(path: &Path) -> Result<ConfigToml, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
