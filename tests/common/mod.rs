//! Common test utilities: an offline fetcher, a fake `make` and a sandboxed
//! cellar/cache/build tree per test.

#![allow(dead_code)]

mod fixtures;

pub use fixtures::*;

use kegforge::core::version::OsVersion;
use kegforge::recipes::GitRecipe;
use kegforge::stage::{FetchError, Fetcher};
use kegforge::{
    Config, Formula, HostSnapshot, InstallOptions, InstallOutcome, Installer, Layout, Os,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tempfile::TempDir;

/// Serves fixture archives from memory and records every request.
#[derive(Clone, Default)]
pub struct MemoryFetcher {
    bodies: Rc<HashMap<String, Vec<u8>>>,
    calls: Rc<RefCell<Vec<String>>>,
}

impl MemoryFetcher {
    pub fn with_fixtures() -> Self {
        let bodies = HashMap::from([
            (SOURCE_URL.to_string(), source_archive()),
            (MAN_URL.to_string(), man_archive()),
            (HTML_URL.to_string(), html_archive()),
            (SMTP_URL.to_string(), smtp_archive()),
        ]);
        Self {
            bodies: Rc::new(bodies),
            calls: Rc::default(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        self.calls.borrow_mut().push(url.to_string());
        let body = self
            .bodies
            .get(url)
            .ok_or_else(|| FetchError::new(url, "HTTP status 404"))?;
        std::fs::write(dest, body).map_err(|e| FetchError::new(url, e.to_string()))?;
        Ok(body.len() as u64)
    }
}

/// A sandboxed install environment.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: Config,
    pub fakebin: PathBuf,
    pub make_log: PathBuf,
    pub fetcher: MemoryFetcher,
    pub formula: Formula,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// Fake `make` exits 2 when `"<cwd>|<args>"` matches this shell `case`
    /// pattern (escape the separator as `\|`).
    pub fn failing_when(pattern: &str) -> Self {
        Self::build(None, Some(pattern))
    }

    /// The declared checksum of `resource` will not match its archive.
    pub fn tampered(resource: &str) -> Self {
        Self::build(Some(resource), None)
    }

    fn build(tamper: Option<&str>, fail_when: Option<&str>) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let fakebin = root.join("fakebin");
        std::fs::create_dir_all(&fakebin).unwrap();
        let make_log = root.join("make.log");

        let fake_git = root.join("fake-git");
        write_executable(&fake_git, FAKE_GIT);
        write_executable(&fakebin.join("make"), &fake_make(&make_log, &fake_git, fail_when));

        let config = Config {
            cellar: root.join("Cellar"),
            opt: root.join("opt"),
            cache: root.join("cache"),
            build_dir: root.join("build"),
            jobs: Some(2),
            http_timeout: Duration::from_secs(30),
        };
        std::fs::create_dir_all(&config.build_dir).unwrap();

        Self {
            config,
            fakebin,
            make_log,
            fetcher: MemoryFetcher::with_fixtures(),
            formula: Formula::from_toml(&formula_toml(tamper)).unwrap(),
            dir,
        }
    }

    pub fn recipe(&self) -> GitRecipe {
        GitRecipe::with_formula(self.formula.clone())
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.config.cellar, "git-curl-openssl", "2.35.3")
    }

    fn search_path(&self) -> Vec<PathBuf> {
        vec![
            self.fakebin.clone(),
            PathBuf::from("/usr/bin"),
            PathBuf::from("/bin"),
        ]
    }

    /// macOS Mojave with perl, python, MakeMaker and every dependency.
    pub fn full_snapshot(&self) -> HostSnapshot {
        HostSnapshot::new(Os::MacOs)
            .with_os_version(OsVersion::new(10, 14))
            .with_cpu_count(2)
            .with_search_path(self.search_path())
            .with_tool("make", self.fakebin.join("make"))
            .with_tool("perl", "/usr/bin/perl")
            .with_tool("python", "/usr/bin/python3")
            .with_tool_output("perl", "This is perl 5, version 30, subversion 3 (v5.30.3)")
            .with_check("perl-makemaker", true)
            .with_dependency("curl", self.config.opt.join("curl"))
            .with_dependency("gettext", self.config.opt.join("gettext"))
            .with_dependency("openssl@1.1", self.config.opt.join("openssl@1.1"))
            .with_dependency("pcre2", self.config.opt.join("pcre2"))
            .with_developer_dir("/Library/Developer/CommandLineTools")
    }

    /// Linux without perl or python.
    pub fn minimal_snapshot(&self) -> HostSnapshot {
        HostSnapshot::new(Os::Linux)
            .with_os_version(OsVersion::new(22, 4))
            .with_cpu_count(2)
            .with_search_path(self.search_path())
            .with_tool("make", self.fakebin.join("make"))
    }

    pub fn install(
        &self,
        snapshot: &HostSnapshot,
        options: InstallOptions,
    ) -> kegforge::Result<InstallOutcome> {
        let recipe = self.recipe();
        Installer::new(&recipe, &self.config, Box::new(self.fetcher.clone()))
            .options(options)
            .install(snapshot)
    }

    /// `(relative cwd, args)` for every fake make call, in order.
    pub fn make_calls(&self) -> Vec<(String, String)> {
        let Ok(log) = std::fs::read_to_string(&self.make_log) else {
            return Vec::new();
        };
        log.lines()
            .map(|line| {
                let (cwd, args) = line.split_once('|').unwrap();
                let rel = cwd
                    .split_once("git-2.35.3")
                    .map(|(_, rest)| rest.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| cwd.to_string());
                (rel, args.to_string())
            })
            .collect()
    }
}

fn fake_make(log: &Path, fake_git: &Path, fail_when: Option<&str>) -> String {
    let fail = match fail_when {
        Some(pattern) => format!("case \"$(pwd)|$*\" in\n  {}) exit 2 ;;\nesac\n", pattern),
        None => String::new(),
    };
    format!(
        r#"#!/bin/sh
echo "$(pwd)|$*" >> '{log}'
{fail}if [ "$1" = install ]; then
  for arg in "$@"; do
    case "$arg" in prefix=*) prefix="${{arg#prefix=}}" ;; esac
  done
  mkdir -p "$prefix/bin" "$prefix/libexec/git-core" "$prefix/share/git-core/templates" "$prefix/share/perl5/Git"
  cp '{git}' "$prefix/bin/git"
  chmod 755 "$prefix/bin/git"
  : > "$prefix/libexec/git-core/git-imap-send"
  : > "$prefix/share/perl5/Git.pm"
fi
exit 0
"#,
        log = log.display(),
        git = fake_git.display(),
        fail = fail,
    )
}

pub fn write_executable(path: &Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

#[cfg(unix)]
pub fn mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    path.metadata().unwrap().permissions().mode() & 0o777
}
