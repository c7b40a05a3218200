//! Git, built against curl, OpenSSL 1.1, gettext and PCRE2.
//!
//! Besides `make install` this installs the contrib credential helpers,
//! subtree, shell completions, the emacs mode, prebuilt man and html
//! documentation, and the `Net::SMTP::SSL` Perl module that `send-email`
//! needs.

use std::path::{Path, PathBuf};

use crate::core::version::{OsVersion, extract_major_minor};
use crate::env::{BuildEnv, EnvBuilder};
use crate::formula::{Formula, FormulaError};
use crate::host::{HostSnapshot, Os, ProbeSet};
use crate::plan::{Candidate, Condition, EntryKind, Step, WorkDir};
use crate::verify::{Check, SmokeTest};

use super::{Recipe, StepContext};

pub const NAME: &str = "git-curl-openssl";

const FORMULA: &str = include_str!("../../formulae/git-curl-openssl.toml");

const CLT_DIR: &str = "/Library/Developer/CommandLineTools";
const XCODE_DIR: &str = "/Applications/Xcode.app/Contents/Developer";

const MAKEMAKER_CHECK: &str = "perl-makemaker";

const GITCONFIG: &str = "[credential]\n\thelper = osxkeychain\n";

pub struct GitRecipe {
    formula: Formula,
}

impl GitRecipe {
    /// The recipe with its bundled formula.
    pub fn new() -> Result<Self, FormulaError> {
        Ok(Self::with_formula(Formula::from_toml(FORMULA)?))
    }

    /// The recipe applied to another formula (mirrors, pinned versions).
    pub fn with_formula(formula: Formula) -> Self {
        Self { formula }
    }
}

/// `CC`, `CFLAGS` and `LDFLAGS` passed explicitly to contrib makefiles.
fn toolchain_args(env: &BuildEnv) -> Vec<String> {
    ["CC", "CFLAGS", "LDFLAGS"]
        .iter()
        .map(|key| format!("{}={}", key, env.get(key).unwrap_or_default()))
        .collect()
}

/// `<dir>/Library/Perl/<version>/darwin-thread-multi-2level` for each
/// distinct developer directory, colon separated.
fn perllib_extra(developer_dir: Option<&Path>, perl_version: &str) -> String {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for dir in developer_dir
        .into_iter()
        .map(Path::to_path_buf)
        .chain([PathBuf::from(CLT_DIR), PathBuf::from(XCODE_DIR)])
    {
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs.iter()
        .map(|d| {
            format!(
                "{}/Library/Perl/{}/darwin-thread-multi-2level",
                d.display(),
                perl_version
            )
        })
        .collect::<Vec<_>>()
        .join(":")
}

impl Recipe for GitRecipe {
    fn formula(&self) -> &Formula {
        &self.formula
    }

    fn probes(&self) -> ProbeSet {
        ProbeSet::default()
            .tool("perl")
            .tool("python")
            .version("perl", &["--version"])
            .check(MAKEMAKER_CHECK, "perl", &["-e", "use ExtUtils::MakeMaker"])
    }

    fn environment(&self, env: &mut EnvBuilder, snapshot: &HostSnapshot) {
        for key in [
            "NO_FINK",
            "NO_DARWIN_PORTS",
            "NO_R_TO_GCC_LINKER",
            "INSTALL_SYMLINKS",
            "V",
        ] {
            env.set(key, "1");
        }

        match snapshot.tool("python") {
            Some(python) => {
                env.set("PYTHON_PATH", python.display().to_string());
                env.feature("python", true);
            }
            None => {
                env.set("NO_PYTHON", "1");
                env.feature("python", false);
            }
        }

        match snapshot.tool("perl") {
            Some(perl) => {
                env.set("PERL_PATH", perl.display().to_string());
                env.feature("perl", true);
            }
            None => {
                env.set("NO_PERL", "1");
                env.feature("perl", false);
            }
        }

        if let Some(pcre2) = snapshot.dependency("pcre2") {
            env.set("USE_LIBPCRE2", "1");
            env.set("LIBPCREDIR", pcre2.display().to_string());
        }

        if let Some(version) = snapshot
            .tool_version("perl")
            .and_then(|out| extract_major_minor(out, 'v'))
        {
            env.set(
                "PERLLIB_EXTRA",
                perllib_extra(snapshot.developer_dir.as_deref(), &version),
            );
        }

        if !snapshot.check(MAKEMAKER_CHECK) {
            env.set("NO_PERL_MAKEMAKER", "1");
        }

        // Pin the CLT SDK on Mojave, where Xcode and CLT headers drift apart.
        let mojave = OsVersion::macos("mojave");
        if snapshot.os == Os::MacOs
            && let (Some(version), Some(mojave)) = (&snapshot.os_version, &mojave)
            && version.same_release(mojave)
            && let Some(sdk) = &snapshot.sdk_path
        {
            env.set("SDKROOT", sdk.display().to_string());
        }
    }

    fn candidates(&self, ctx: &StepContext<'_>) -> Vec<Candidate> {
        let layout = ctx.layout;
        let env = ctx.env;
        let git_core = layout.git_core();
        let docs = layout.doc().join("git-doc");

        let mut make_install = vec![
            "install".to_string(),
            format!("prefix={}", layout.prefix.display()),
            format!("sysconfdir={}", layout.etc().display()),
        ];
        make_install.extend(toolchain_args(env));
        make_install.push("NO_APPLE_COMMON_CRYPTO=1".to_string());
        if let Some(openssl) = ctx.snapshot.dependency("openssl@1.1") {
            make_install.push(format!("OPENSSLDIR={}", openssl.display()));
        }

        let perl = || Condition::feature("perl");
        let macos = || Condition::Os(Os::MacOs);
        let yosemite = OsVersion::macos("yosemite").unwrap_or_else(|| OsVersion::new(10, 10));

        vec![
            Candidate::primary(
                Step::new("make-install", WorkDir::source()).run("make", make_install),
            ),
            Candidate::augment(
                Step::new(
                    "osxkeychain",
                    WorkDir::source_subdir("contrib/credential/osxkeychain"),
                )
                .run("make", toolchain_args(env))
                .install("git-credential-osxkeychain", &git_core),
            )
            .when(macos()),
            Candidate::augment(
                Step::new(
                    "osxkeychain-clean",
                    WorkDir::source_subdir("contrib/credential/osxkeychain"),
                )
                .run("make", ["clean"])
                .best_effort(),
            )
            .when(macos()),
            Candidate::augment(
                Step::new("diff-highlight", WorkDir::source_subdir("contrib/diff-highlight"))
                    .run("make", Vec::<String>::new()),
            )
            .when(perl()),
            Candidate::augment(
                Step::new(
                    "credential-netrc",
                    WorkDir::source_subdir("contrib/credential/netrc"),
                )
                .run("make", ["test"])
                .install("git-credential-netrc", &git_core),
            )
            .when(perl()),
            Candidate::augment(
                Step::new("subtree", WorkDir::source_subdir("contrib/subtree"))
                    .run("make", toolchain_args(env))
                    .install("git-subtree", &git_core),
            ),
            // Completions live inside contrib, so they go before contrib moves.
            Candidate::augment(
                Step::new("completions", WorkDir::source())
                    .install("contrib/completion/git-completion.bash", &layout.bash_completion())
                    .install("contrib/completion/git-prompt.sh", &layout.bash_completion())
                    .install_as(
                        "contrib/completion/git-completion.zsh",
                        &layout.zsh_completion(),
                        "_git",
                    )
                    .copy(
                        &layout.bash_completion().join("git-completion.bash"),
                        &layout.zsh_completion(),
                    ),
            ),
            Candidate::augment(
                Step::new("elisp", WorkDir::source())
                    .install_glob("contrib/emacs/*.el", &layout.elisp()),
            ),
            Candidate::augment(
                Step::new("contrib", WorkDir::source())
                    .install("contrib", &layout.share().join("git-core")),
            ),
            Candidate::augment(
                Step::new("manpages", WorkDir::resource("man")).install_glob("*", &layout.man()),
            ),
            Candidate::augment(
                Step::new("html-docs", WorkDir::resource("html")).install_glob("*", &docs),
            ),
            Candidate::augment(
                Step::new("doc-permissions", WorkDir::source())
                    .chmod(&docs, &["**/*.html", "**/*.txt"], 0o644, EntryKind::Files)
                    .chmod(&docs, &["RelNotes", "howto", "technical"], 0o755, EntryKind::Dirs),
            ),
            // Keeps imap-send from hooking into the system OpenSSL.
            Candidate::augment(
                Step::new("remove-imap-send", WorkDir::source())
                    .remove(&git_core.join("git-imap-send")),
            )
            .when(Condition::OsAtLeast(Os::MacOs, yosemite)),
            Candidate::augment(
                Step::new("perl-smtp-ssl", WorkDir::resource("Net::SMTP::SSL"))
                    .install("lib/Net", &layout.perl5()),
            )
            .when(perl()),
            // Only perllocal.pod ends up here, when building against system Perl.
            Candidate::augment(
                Step::new("purge-library-perl", WorkDir::source())
                    .remove_tree(&layout.prefix.join("Library").join("Perl"))
                    .best_effort(),
            ),
            Candidate::augment(
                Step::new("gitconfig", WorkDir::source())
                    .write("gitconfig", GITCONFIG)
                    .install("gitconfig", &layout.etc()),
            )
            .when(macos()),
        ]
    }

    fn smoke_test(&self) -> SmokeTest {
        SmokeTest::default()
            .env("GIT_AUTHOR_NAME", "kegforge")
            .env("GIT_AUTHOR_EMAIL", "kegforge@example.com")
            .env("GIT_COMMITTER_NAME", "kegforge")
            .env("GIT_COMMITTER_EMAIL", "kegforge@example.com")
            .check(Check::run("git", &["init"]))
            .check(Check::touch(&["haunted", "house"]))
            .check(Check::run("git", &["add", "haunted", "house"]))
            .check(Check::run("git", &["commit", "-a", "-m", "Initial Commit"]))
            .check(Check::output_equals("git", &["ls-files"], "haunted\nhouse"))
            .check(Check::touch(&["foo", "bar"]))
            .check(Check::run("git", &["add", "foo", "bar"]))
            .check(Check::run("git", &["commit", "-a", "-m", "Second Commit"]))
            .check(Check::output_contains(
                "git",
                &[
                    "send-email",
                    "--to=dev@null.com",
                    "--smtp-server=smtp.gmail.com",
                    "--smtp-encryption=tls",
                    "--confirm=never",
                    "HEAD^",
                ],
                "Authentication Required",
                255,
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::compose;
    use crate::layout::Layout;
    use crate::plan::{Action, plan};

    const PERL_VERSION: &str =
        "This is perl 5, version 30, subversion 3 (v5.30.3) built for darwin-thread-multi-2level";

    fn recipe() -> GitRecipe {
        GitRecipe::new().unwrap()
    }

    fn full_mac() -> HostSnapshot {
        HostSnapshot::new(Os::MacOs)
            .with_os_version(OsVersion::new(10, 14))
            .with_cpu_count(4)
            .with_search_path(vec![PathBuf::from("/usr/bin")])
            .with_tool("cc", "/usr/bin/clang")
            .with_tool("perl", "/usr/bin/perl")
            .with_tool("python", "/usr/bin/python")
            .with_tool_output("perl", PERL_VERSION)
            .with_check(MAKEMAKER_CHECK, true)
            .with_dependency("pcre2", "/opt/pcre2")
            .with_dependency("openssl@1.1", "/opt/openssl@1.1")
            .with_developer_dir("/Applications/Xcode.app/Contents/Developer")
            .with_sdk_path("/Library/Developer/CommandLineTools/SDKs/MacOSX10.14.sdk")
    }

    fn bare_linux() -> HostSnapshot {
        HostSnapshot::new(Os::Linux).with_os_version(OsVersion::new(22, 4))
    }

    fn planned(snapshot: &HostSnapshot) -> crate::plan::Plan {
        let r = recipe();
        let env = compose(r.formula(), &r, snapshot);
        let layout = Layout::new(Path::new("/cellar"), NAME, r.formula().version());
        let ctx = StepContext {
            formula: r.formula(),
            env: &env,
            snapshot,
            layout: &layout,
        };
        plan(r.formula(), r.candidates(&ctx), &env, snapshot).unwrap()
    }

    #[test]
    fn test_bundled_formula() {
        let f = recipe().formula().clone();
        assert_eq!(f.version(), "2.35.3");
        assert_eq!(f.dependencies(), ["curl", "gettext", "openssl@1.1", "pcre2"]);
        assert!(f.resource("html").is_some());
        assert!(f.resource("man").is_some());
        assert!(f.resource("Net::SMTP::SSL").is_some());
    }

    #[test]
    fn test_environment_with_everything() {
        let r = recipe();
        let env = compose(r.formula(), &r, &full_mac());

        for key in ["NO_FINK", "NO_DARWIN_PORTS", "NO_R_TO_GCC_LINKER", "INSTALL_SYMLINKS", "V"] {
            assert_eq!(env.get(key), Some("1"), "{key}");
        }
        assert_eq!(env.get("PERL_PATH"), Some("/usr/bin/perl"));
        assert_eq!(env.get("PYTHON_PATH"), Some("/usr/bin/python"));
        assert_eq!(env.get("USE_LIBPCRE2"), Some("1"));
        assert_eq!(env.get("LIBPCREDIR"), Some("/opt/pcre2"));
        assert_eq!(
            env.get("PERLLIB_EXTRA"),
            Some(
                "/Applications/Xcode.app/Contents/Developer/Library/Perl/5.30/darwin-thread-multi-2level:\
/Library/Developer/CommandLineTools/Library/Perl/5.30/darwin-thread-multi-2level"
            )
        );
        assert_eq!(env.get("NO_PERL_MAKEMAKER"), None);
        assert_eq!(
            env.get("SDKROOT"),
            Some("/Library/Developer/CommandLineTools/SDKs/MacOSX10.14.sdk")
        );
        assert!(env.feature("perl"));
        assert!(env.feature("python"));
    }

    #[test]
    fn test_environment_degrades_without_tools() {
        let r = recipe();
        let env = compose(r.formula(), &r, &bare_linux());

        assert_eq!(env.get("NO_PERL"), Some("1"));
        assert_eq!(env.get("NO_PYTHON"), Some("1"));
        assert_eq!(env.get("NO_PERL_MAKEMAKER"), Some("1"));
        assert_eq!(env.get("PERL_PATH"), None);
        assert_eq!(env.get("USE_LIBPCRE2"), None);
        assert_eq!(env.get("PERLLIB_EXTRA"), None);
        assert_eq!(env.get("SDKROOT"), None);
        assert!(!env.feature("perl"));
    }

    #[test]
    fn test_unparsable_perl_version_drops_only_perllib() {
        let r = recipe();
        let snap = full_mac().with_tool_output("perl", "perl, who knows");
        let env = compose(r.formula(), &r, &snap);
        assert_eq!(env.get("PERLLIB_EXTRA"), None);
        assert_eq!(env.get("PERL_PATH"), Some("/usr/bin/perl"));
    }

    #[test]
    fn test_sdkroot_only_on_mojave() {
        let r = recipe();
        let catalina = full_mac().with_os_version(OsVersion::new(10, 15));
        assert_eq!(compose(r.formula(), &r, &catalina).get("SDKROOT"), None);

        let mut no_sdk = full_mac();
        no_sdk.sdk_path = None;
        assert_eq!(compose(r.formula(), &r, &no_sdk).get("SDKROOT"), None);
    }

    #[test]
    fn test_perllib_extra_dedups_developer_dir() {
        assert_eq!(
            perllib_extra(Some(Path::new(CLT_DIR)), "5.18"),
            "/Library/Developer/CommandLineTools/Library/Perl/5.18/darwin-thread-multi-2level:\
/Applications/Xcode.app/Contents/Developer/Library/Perl/5.18/darwin-thread-multi-2level"
        );
    }

    #[test]
    fn test_full_plan_order() {
        assert_eq!(
            planned(&full_mac()).ids(),
            [
                "make-install",
                "osxkeychain",
                "osxkeychain-clean",
                "diff-highlight",
                "credential-netrc",
                "subtree",
                "completions",
                "elisp",
                "contrib",
                "manpages",
                "html-docs",
                "doc-permissions",
                "remove-imap-send",
                "perl-smtp-ssl",
                "purge-library-perl",
                "gitconfig",
            ]
        );
    }

    #[test]
    fn test_bare_linux_plan() {
        let p = planned(&bare_linux());
        assert_eq!(
            p.ids(),
            [
                "make-install",
                "subtree",
                "completions",
                "elisp",
                "contrib",
                "manpages",
                "html-docs",
                "doc-permissions",
                "purge-library-perl",
            ]
        );
        assert_eq!(p.resources(), ["man", "html"]);
        let skipped: Vec<&str> = p.skipped.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            skipped,
            [
                "osxkeychain",
                "osxkeychain-clean",
                "diff-highlight",
                "credential-netrc",
                "remove-imap-send",
                "perl-smtp-ssl",
                "gitconfig",
            ]
        );
    }

    #[test]
    fn test_make_install_arguments() {
        let p = planned(&full_mac());
        let Action::Run(inv) = &p.step("make-install").unwrap().actions[0] else {
            panic!("make-install should run make");
        };
        assert_eq!(inv.program, "make");
        assert_eq!(
            inv.args,
            [
                "install",
                "prefix=/cellar/git-curl-openssl/2.35.3",
                "sysconfdir=/cellar/git-curl-openssl/2.35.3/etc",
                "CC=/usr/bin/clang",
                "CFLAGS=-O2 -pipe",
                "LDFLAGS=-L/opt/openssl@1.1/lib -L/opt/pcre2/lib",
                "NO_APPLE_COMMON_CRYPTO=1",
                "OPENSSLDIR=/opt/openssl@1.1",
            ]
        );
    }

    #[test]
    fn test_old_macos_keeps_imap_send() {
        let p = planned(&full_mac().with_os_version(OsVersion::new(10, 9)));
        assert!(p.step("remove-imap-send").is_none());
        assert_eq!(p.skipped.len(), 1);
    }

    #[test]
    fn test_smoke_test_shape() {
        let t = recipe().smoke_test();
        assert_eq!(t.checks.len(), 9);
        assert_eq!(
            t.checks[4],
            Check::output_equals("git", &["ls-files"], "haunted\nhouse")
        );
        assert!(matches!(
            &t.checks[8],
            Check::OutputContains { status: 255, needle, .. } if needle == "Authentication Required"
        ));
        assert!(t.env.contains_key("GIT_COMMITTER_EMAIL"));
    }
}
