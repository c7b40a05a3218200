//! Host inspection.
//!
//! Everything a recipe wants to know about the machine goes through
//! [`HostProbe`]. The installer asks once, freezes the answers into a
//! [`HostSnapshot`], and every later stage (environment composition, step
//! planning) reads the snapshot only. Tests build snapshots by hand.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::core::version::OsVersion;
use crate::formula::Formula;

/// Tools every build needs looked up.
const BASE_TOOLS: &[&str] = &["cc", "make"];

/// Where the Command Line Tools keep their SDKs.
const CLT_SDK_DIR: &str = "/Library/Developer/CommandLineTools/SDKs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    MacOs,
    Other,
}

impl Os {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => Self::Linux,
            "macos" => Self::MacOs,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::MacOs => "macos",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for Os {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only questions about the host.
pub trait HostProbe {
    fn os(&self) -> Os;
    fn os_version(&self) -> Option<OsVersion>;
    /// Locate an executable on the search path.
    fn which(&self, tool: &str) -> Option<PathBuf>;
    /// Captured output of a successful invocation.
    fn tool_output(&self, program: &Path, args: &[String]) -> Option<String>;
    /// Whether an invocation exits zero. Output is discarded.
    fn succeeds(&self, program: &Path, args: &[String]) -> bool;
    /// Install prefix of an already installed dependency.
    fn dependency_prefix(&self, name: &str) -> Option<PathBuf>;
    /// Active developer directory (macOS).
    fn developer_dir(&self) -> Option<PathBuf>;
    /// SDK shipped by the command line tools for `version` (macOS).
    fn sdk_path(&self, version: &OsVersion) -> Option<PathBuf>;
    fn search_path(&self) -> Vec<PathBuf>;
    fn cpu_count(&self) -> usize;
}

/// [`HostProbe`] backed by the live machine.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    opt: PathBuf,
    path: Vec<PathBuf>,
}

impl SystemProbe {
    /// `opt` is the directory holding `<dependency>` links to installed kegs.
    pub fn new(opt: impl Into<PathBuf>) -> Self {
        let path = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self {
            opt: opt.into(),
            path,
        }
    }

    pub fn with_search_path(mut self, path: Vec<PathBuf>) -> Self {
        self.path = path;
        self
    }
}

impl HostProbe for SystemProbe {
    fn os(&self) -> Os {
        Os::current()
    }

    fn os_version(&self) -> Option<OsVersion> {
        match self.os() {
            Os::MacOs => {
                let out = self.tool_output(Path::new("sw_vers"), &["-productVersion".to_string()])?;
                OsVersion::parse(&out)
            }
            _ => std::fs::read_to_string("/etc/os-release")
                .ok()
                .and_then(|content| os_release_version(&content))
                .or_else(kernel_release),
        }
    }

    fn which(&self, tool: &str) -> Option<PathBuf> {
        if tool.contains('/') {
            let p = PathBuf::from(tool);
            return is_executable(&p).then_some(p);
        }
        self.path
            .iter()
            .map(|dir| dir.join(tool))
            .find(|candidate| is_executable(candidate))
    }

    fn tool_output(&self, program: &Path, args: &[String]) -> Option<String> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Some(String::from_utf8_lossy(&text).trim().to_string())
    }

    fn succeeds(&self, program: &Path, args: &[String]) -> bool {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn dependency_prefix(&self, name: &str) -> Option<PathBuf> {
        let prefix = self.opt.join(name);
        prefix.is_dir().then_some(prefix)
    }

    fn developer_dir(&self) -> Option<PathBuf> {
        if self.os() != Os::MacOs {
            return None;
        }
        self.tool_output(Path::new("xcode-select"), &["-p".to_string()])
            .map(PathBuf::from)
            .filter(|p| p.is_dir())
    }

    fn sdk_path(&self, version: &OsVersion) -> Option<PathBuf> {
        if self.os() != Os::MacOs {
            return None;
        }
        let sdks = Path::new(CLT_SDK_DIR);
        [
            format!("MacOSX{}.{}.sdk", version.major(), version.minor()),
            format!("MacOSX{}.sdk", version.major()),
            "MacOSX.sdk".to_string(),
        ]
        .into_iter()
        .map(|name| sdks.join(name))
        .find(|p| p.is_dir())
    }

    fn search_path(&self) -> Vec<PathBuf> {
        self.path.clone()
    }

    fn cpu_count(&self) -> usize {
        num_cpus::get()
    }
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

fn os_release_version(content: &str) -> Option<OsVersion> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("VERSION_ID="))
        .map(|v| v.trim_matches('"'))
        .and_then(OsVersion::parse)
}

fn kernel_release() -> Option<OsVersion> {
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .ok()
        .and_then(|v| OsVersion::parse(v.trim()))
}

/// A command whose success is recorded under `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCheck {
    pub key: String,
    pub tool: String,
    pub args: Vec<String>,
}

/// What a recipe wants captured beyond the basics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeSet {
    pub tools: Vec<String>,
    /// `(tool, args)` whose output is recorded verbatim.
    pub versions: Vec<(String, Vec<String>)>,
    pub checks: Vec<ProbeCheck>,
}

impl ProbeSet {
    pub fn tool(mut self, name: &str) -> Self {
        self.tools.push(name.to_string());
        self
    }

    pub fn version(mut self, tool: &str, args: &[&str]) -> Self {
        self.versions
            .push((tool.to_string(), args.iter().map(|a| a.to_string()).collect()));
        self
    }

    pub fn check(mut self, key: &str, tool: &str, args: &[&str]) -> Self {
        self.checks.push(ProbeCheck {
            key: key.to_string(),
            tool: tool.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        self
    }
}

/// Frozen answers from a [`HostProbe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostSnapshot {
    pub os: Os,
    pub os_version: Option<OsVersion>,
    pub cpu_count: usize,
    pub search_path: Vec<PathBuf>,
    pub tools: BTreeMap<String, PathBuf>,
    pub tool_versions: BTreeMap<String, String>,
    pub checks: BTreeMap<String, bool>,
    pub dependencies: BTreeMap<String, PathBuf>,
    pub developer_dir: Option<PathBuf>,
    pub sdk_path: Option<PathBuf>,
}

impl HostSnapshot {
    /// An empty snapshot for `os`; fill it with the `with_*` methods.
    pub fn new(os: Os) -> Self {
        Self {
            os,
            os_version: None,
            cpu_count: 1,
            search_path: Vec::new(),
            tools: BTreeMap::new(),
            tool_versions: BTreeMap::new(),
            checks: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            developer_dir: None,
            sdk_path: None,
        }
    }

    /// Ask `probe` everything `formula` and `probes` need.
    pub fn capture(probe: &dyn HostProbe, formula: &Formula, probes: &ProbeSet) -> Self {
        let os = probe.os();
        let os_version = probe.os_version();

        let mut snapshot = Self::new(os);
        snapshot.os_version = os_version.clone();
        snapshot.cpu_count = probe.cpu_count().max(1);
        snapshot.search_path = probe.search_path();

        for tool in BASE_TOOLS
            .iter()
            .copied()
            .chain(probes.tools.iter().map(String::as_str))
        {
            if let Some(path) = probe.which(tool) {
                snapshot.tools.insert(tool.to_string(), path);
            }
        }

        for (tool, args) in &probes.versions {
            if let Some(path) = snapshot.tools.get(tool)
                && let Some(out) = probe.tool_output(path, args)
            {
                snapshot.tool_versions.insert(tool.clone(), out);
            }
        }

        for check in &probes.checks {
            let passed = snapshot
                .tools
                .get(&check.tool)
                .is_some_and(|path| probe.succeeds(path, &check.args));
            snapshot.checks.insert(check.key.clone(), passed);
        }

        for dep in formula.dependencies() {
            if let Some(prefix) = probe.dependency_prefix(dep) {
                snapshot.dependencies.insert(dep.clone(), prefix);
            }
        }

        if os == Os::MacOs {
            snapshot.developer_dir = probe.developer_dir();
            snapshot.sdk_path = os_version.as_ref().and_then(|v| probe.sdk_path(v));
        }

        snapshot
    }

    pub fn with_os_version(mut self, version: OsVersion) -> Self {
        self.os_version = Some(version);
        self
    }

    pub fn with_cpu_count(mut self, n: usize) -> Self {
        self.cpu_count = n.max(1);
        self
    }

    pub fn with_search_path(mut self, path: Vec<PathBuf>) -> Self {
        self.search_path = path;
        self
    }

    pub fn with_tool(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.tools.insert(name.to_string(), path.into());
        self
    }

    pub fn with_tool_output(mut self, name: &str, output: &str) -> Self {
        self.tool_versions.insert(name.to_string(), output.to_string());
        self
    }

    pub fn with_check(mut self, key: &str, passed: bool) -> Self {
        self.checks.insert(key.to_string(), passed);
        self
    }

    pub fn with_dependency(mut self, name: &str, prefix: impl Into<PathBuf>) -> Self {
        self.dependencies.insert(name.to_string(), prefix.into());
        self
    }

    pub fn with_developer_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.developer_dir = Some(dir.into());
        self
    }

    pub fn with_sdk_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sdk_path = Some(dir.into());
        self
    }

    pub fn tool(&self, name: &str) -> Option<&Path> {
        self.tools.get(name).map(PathBuf::as_path)
    }

    pub fn tool_version(&self, name: &str) -> Option<&str> {
        self.tool_versions.get(name).map(String::as_str)
    }

    /// Recorded result of a check; unknown checks count as failed.
    pub fn check(&self, key: &str) -> bool {
        self.checks.get(key).copied().unwrap_or(false)
    }

    pub fn dependency(&self, name: &str) -> Option<&Path> {
        self.dependencies.get(name).map(PathBuf::as_path)
    }
}
