//! Install receipts.
//!
//! Every successful install writes `INSTALL_RECEIPT.json` into the keg. It is
//! what `test`, `info` and `uninstall` read back: which formula and version,
//! which steps ran or were skipped, and the files that ended up in the keg.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::layout::{Layout, RECEIPT_FILE};

#[derive(Error, Debug)]
pub enum ReceiptError {
    #[error("no receipt at {}", .0.display())]
    NotInstalled(PathBuf),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed receipt {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("receipt at {} is for {found}, not {expected}", path.display())]
    Mismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedStep {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub name: String,
    pub version: String,
    /// Source URL, or the head repository for `--head` builds.
    pub source: String,
    pub head: bool,
    pub os: String,
    pub os_version: Option<String>,
    pub features: BTreeMap<String, bool>,
    pub steps: Vec<String>,
    pub skipped: Vec<SkippedStep>,
    pub warnings: Vec<String>,
    pub files: Vec<PathBuf>,
    /// Seconds since the Unix epoch.
    pub installed_at: u64,
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Receipt {
    pub fn write(&self, layout: &Layout) -> Result<PathBuf, ReceiptError> {
        let path = layout.receipt();
        let json = serde_json::to_string_pretty(self).map_err(|source| ReceiptError::Json {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, json + "\n").map_err(|source| ReceiptError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn read(prefix: &Path) -> Result<Self, ReceiptError> {
        let path = prefix.join(RECEIPT_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReceiptError::NotInstalled(path));
            }
            Err(source) => return Err(ReceiptError::Io { path, source }),
        };
        serde_json::from_str(&content).map_err(|source| ReceiptError::Json { path, source })
    }
}

/// Installed versions of `name` under `cellar`, newest install first.
pub fn installed(cellar: &Path, name: &str) -> Result<Vec<(Layout, Receipt)>, ReceiptError> {
    let rack = Layout::rack(cellar, name);
    let entries = match std::fs::read_dir(&rack) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(ReceiptError::Io { path: rack, source }),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ReceiptError::Io {
            path: rack.clone(),
            source,
        })?;
        if !entry.path().is_dir() {
            continue;
        }
        let version = entry.file_name().to_string_lossy().to_string();
        let layout = Layout::new(cellar, name, &version);
        match Receipt::read(&layout.prefix) {
            Ok(receipt) => found.push((layout, receipt)),
            Err(ReceiptError::NotInstalled(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    found.sort_by(|a, b| {
        b.1.installed_at
            .cmp(&a.1.installed_at)
            .then_with(|| b.1.version.cmp(&a.1.version))
    });
    Ok(found)
}

/// Remove the keg at `layout` after checking its receipt names `name`.
///
/// The rack directory goes too once no versions are left.
pub fn uninstall(layout: &Layout, name: &str) -> Result<Receipt, ReceiptError> {
    let receipt = Receipt::read(&layout.prefix)?;
    if receipt.name != name {
        return Err(ReceiptError::Mismatch {
            path: layout.receipt(),
            expected: name.to_string(),
            found: receipt.name,
        });
    }

    std::fs::remove_dir_all(&layout.prefix).map_err(|source| ReceiptError::Io {
        path: layout.prefix.clone(),
        source,
    })?;
    if let Some(rack) = layout.prefix.parent() {
        // Only succeeds when empty.
        let _ = std::fs::remove_dir(rack);
    }
    Ok(receipt)
}
