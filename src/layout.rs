//! Installed layout of a keg.
//!
//! A keg lives at `<cellar>/<name>/<version>`; every install destination a
//! recipe uses is derived from that prefix here.

use std::path::{Path, PathBuf};

pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub name: String,
    pub prefix: PathBuf,
}

impl Layout {
    pub fn new(cellar: &Path, name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            prefix: cellar.join(name).join(version),
        }
    }

    /// The directory holding every installed version of `name`.
    pub fn rack(cellar: &Path, name: &str) -> PathBuf {
        cellar.join(name)
    }

    pub fn bin(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    pub fn libexec(&self) -> PathBuf {
        self.prefix.join("libexec")
    }

    pub fn git_core(&self) -> PathBuf {
        self.libexec().join("git-core")
    }

    pub fn share(&self) -> PathBuf {
        self.prefix.join("share")
    }

    pub fn man(&self) -> PathBuf {
        self.share().join("man")
    }

    pub fn doc(&self) -> PathBuf {
        self.share().join("doc")
    }

    pub fn perl5(&self) -> PathBuf {
        self.share().join("perl5")
    }

    pub fn elisp(&self) -> PathBuf {
        self.share().join("emacs").join("site-lisp").join(&self.name)
    }

    pub fn zsh_completion(&self) -> PathBuf {
        self.share().join("zsh").join("site-functions")
    }

    pub fn etc(&self) -> PathBuf {
        self.prefix.join("etc")
    }

    pub fn bash_completion(&self) -> PathBuf {
        self.etc().join("bash_completion.d")
    }

    pub fn receipt(&self) -> PathBuf {
        self.prefix.join(RECEIPT_FILE)
    }

    /// Every regular file and symlink under the prefix, relative, sorted.
    /// The receipt itself is not listed.
    pub fn files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        if !self.prefix.exists() {
            return Ok(files);
        }
        for entry in walkdir::WalkDir::new(&self.prefix).follow_links(false) {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.prefix)
                && rel != Path::new(RECEIPT_FILE)
            {
                files.push(rel.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}
