//! Build environment composition.
//!
//! [`compose`] turns a formula plus a frozen [`HostSnapshot`] into the exact
//! variable set every build subprocess receives. The result is immutable and
//! depends on nothing but its inputs: same snapshot, same environment, byte
//! for byte.

use std::collections::BTreeMap;
use std::path::Path;

use crate::formula::Formula;
use crate::host::HostSnapshot;
use crate::recipes::Recipe;

const DEFAULT_CFLAGS: &str = "-O2 -pipe";

/// Composed build environment plus feature switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnv {
    vars: BTreeMap<String, String>,
    features: BTreeMap<String, bool>,
}

impl BuildEnv {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Whether a feature switch is on. Unknown features are off.
    pub fn feature(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }

    pub fn features(&self) -> &BTreeMap<String, bool> {
        &self.features
    }

    /// `KEY=value` lines in key order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.vars {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }
}

/// Mutable staging area for a [`BuildEnv`].
#[derive(Debug, Default)]
pub struct EnvBuilder {
    vars: BTreeMap<String, String>,
    features: BTreeMap<String, bool>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    pub fn unset(&mut self, key: &str) -> &mut Self {
        self.vars.remove(key);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Append a space separated flag (`CPPFLAGS`, `LDFLAGS`).
    pub fn append_flag(&mut self, key: &str, flag: impl AsRef<str>) -> &mut Self {
        let flag = flag.as_ref();
        self.vars
            .entry(key.to_string())
            .and_modify(|v| {
                if !v.is_empty() {
                    v.push(' ');
                }
                v.push_str(flag);
            })
            .or_insert_with(|| flag.to_string());
        self
    }

    /// Append a colon separated path entry, skipping duplicates.
    pub fn append_path(&mut self, key: &str, entry: &Path) -> &mut Self {
        let entry = entry.display().to_string();
        let current = self.vars.entry(key.to_string()).or_default();
        if !current.split(':').any(|e| e == entry) {
            if !current.is_empty() {
                current.push(':');
            }
            current.push_str(&entry);
        }
        self
    }

    pub fn feature(&mut self, name: &str, enabled: bool) -> &mut Self {
        self.features.insert(name.to_string(), enabled);
        self
    }

    pub fn build(self) -> BuildEnv {
        BuildEnv {
            vars: self.vars,
            features: self.features,
        }
    }
}

/// Compose the build environment for `formula` on the host described by
/// `snapshot`, then let `recipe` add its own variables and switches.
pub fn compose(formula: &Formula, recipe: &dyn Recipe, snapshot: &HostSnapshot) -> BuildEnv {
    let mut env = EnvBuilder::new();

    for dep in formula.dependencies() {
        let Some(prefix) = snapshot.dependency(dep) else {
            continue;
        };
        env.append_flag("CPPFLAGS", format!("-I{}", prefix.join("include").display()));
        env.append_flag("LDFLAGS", format!("-L{}", prefix.join("lib").display()));
        env.append_path("PKG_CONFIG_PATH", &prefix.join("lib").join("pkgconfig"));
        env.append_path("PATH", &prefix.join("bin"));
    }
    for dir in &snapshot.search_path {
        env.append_path("PATH", dir);
    }

    let cc = snapshot
        .tool("cc")
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "cc".to_string());
    env.set("CC", cc);
    env.set("CFLAGS", DEFAULT_CFLAGS);
    env.set("MAKEFLAGS", format!("-j{}", snapshot.cpu_count.max(1)));

    recipe.environment(&mut env, snapshot);
    env.build()
}
