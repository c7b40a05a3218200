//! End-to-end install tests against in-memory archives and a fake `make`.

#![cfg(unix)]

mod common;

use common::*;
use kegforge::executor::ActionError;
use kegforge::receipt::{self, Receipt};
use kegforge::stage::{FetchError, Fetcher, StageError};
use kegforge::{Error, InstallOptions, Installer};

fn count(calls: &[String], url: &str) -> usize {
    calls.iter().filter(|c| c.as_str() == url).count()
}

// =============================================================================
// Full host
// =============================================================================

#[test]
fn test_full_install_layout() {
    let t = TestEnv::new();
    let outcome = t.install(&t.full_snapshot(), InstallOptions::default()).unwrap();
    let layout = t.layout();
    let p = &layout.prefix;

    assert_eq!(outcome.layout, layout);
    assert_eq!(outcome.report.completed.len(), 16);
    assert!(outcome.report.warnings.is_empty());

    assert!(p.join("bin/git").is_file());
    for helper in ["git-credential-osxkeychain", "git-credential-netrc", "git-subtree"] {
        assert!(layout.git_core().join(helper).is_file(), "{helper}");
    }
    assert!(!layout.git_core().join("git-imap-send").exists());

    assert!(p.join("etc/bash_completion.d/git-completion.bash").is_file());
    assert!(p.join("etc/bash_completion.d/git-prompt.sh").is_file());
    assert!(p.join("share/zsh/site-functions/_git").is_file());
    assert!(p.join("share/zsh/site-functions/git-completion.bash").is_file());
    assert!(p.join("share/emacs/site-lisp/git-curl-openssl/git.el").is_file());
    assert!(p.join("share/emacs/site-lisp/git-curl-openssl/git-blame.el").is_file());
    assert!(p.join("share/git-core/contrib/README").is_file());
    assert!(p.join("share/git-core/templates").is_dir());

    assert!(p.join("share/man/man1/git.1").is_file());
    assert!(p.join("share/man/man7/gitcli.7").is_file());
    assert!(p.join("share/perl5/Git.pm").is_file());
    assert!(p.join("share/perl5/Net/SMTP/SSL.pm").is_file());
    assert!(!p.join("Library/Perl").exists());

    assert_eq!(
        std::fs::read_to_string(p.join("etc/gitconfig")).unwrap(),
        "[credential]\n\thelper = osxkeychain\n"
    );
}

#[test]
fn test_full_install_doc_permissions() {
    let t = TestEnv::new();
    t.install(&t.full_snapshot(), InstallOptions::default()).unwrap();
    let docs = t.layout().doc().join("git-doc");

    assert_eq!(mode(&docs.join("git.html")), 0o644);
    assert_eq!(mode(&docs.join("RelNotes/2.35.3.txt")), 0o644);
    for dir in ["RelNotes", "howto", "technical"] {
        assert_eq!(mode(&docs.join(dir)), 0o755, "{dir}");
    }
}

#[test]
fn test_full_install_make_invocations() {
    let t = TestEnv::new();
    t.install(&t.full_snapshot(), InstallOptions::default()).unwrap();
    let calls = t.make_calls();
    let prefix = t.layout().prefix;

    let dirs: Vec<&str> = calls.iter().map(|(cwd, _)| cwd.as_str()).collect();
    assert_eq!(
        dirs,
        [
            "",
            "contrib/credential/osxkeychain",
            "contrib/credential/osxkeychain",
            "contrib/diff-highlight",
            "contrib/credential/netrc",
            "contrib/subtree",
        ]
    );

    let install = &calls[0].1;
    assert!(install.starts_with(&format!("install prefix={}", prefix.display())));
    assert!(install.contains(&format!("sysconfdir={}/etc", prefix.display())));
    assert!(install.contains("CFLAGS=-O2 -pipe"));
    assert!(install.contains("NO_APPLE_COMMON_CRYPTO=1"));
    assert!(install.contains("OPENSSLDIR="));
    assert_eq!(calls[2].1, "clean");
    assert_eq!(calls[4].1, "test");
}

#[test]
fn test_full_install_receipt() {
    let t = TestEnv::new();
    let outcome = t.install(&t.full_snapshot(), InstallOptions::default()).unwrap();
    let written = outcome.receipt.unwrap();
    let read = Receipt::read(&t.layout().prefix).unwrap();

    assert_eq!(read, written);
    assert_eq!(read.name, "git-curl-openssl");
    assert_eq!(read.version, "2.35.3");
    assert_eq!(read.source, SOURCE_URL);
    assert!(!read.head);
    assert_eq!(read.os, "macos");
    assert_eq!(read.os_version.as_deref(), Some("10.14"));
    assert_eq!(read.steps.len(), 16);
    assert!(read.skipped.is_empty());
    assert_eq!(read.features.get("perl"), Some(&true));
    assert!(read.files.iter().any(|f| f.ends_with("bin/git")));
    assert!(!read.files.iter().any(|f| f.ends_with("INSTALL_RECEIPT.json")));
}

#[test]
fn test_build_tree_removed_after_install() {
    let t = TestEnv::new();
    t.install(&t.full_snapshot(), InstallOptions::default()).unwrap();
    assert_eq!(std::fs::read_dir(&t.config.build_dir).unwrap().count(), 0);
}

#[test]
fn test_keep_build_leaves_tree() {
    let t = TestEnv::new();
    let options = InstallOptions {
        keep_build: true,
        ..Default::default()
    };
    t.install(&t.full_snapshot(), options).unwrap();
    assert_eq!(std::fs::read_dir(&t.config.build_dir).unwrap().count(), 1);
}

// =============================================================================
// Degraded host
// =============================================================================

#[test]
fn test_host_without_perl_skips_perl_steps() {
    let t = TestEnv::new();
    let outcome = t.install(&t.minimal_snapshot(), InstallOptions::default()).unwrap();
    let receipt = outcome.receipt.unwrap();
    let p = t.layout().prefix;

    assert_eq!(
        receipt.steps,
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
    let skipped: Vec<&str> = receipt.skipped.iter().map(|s| s.id.as_str()).collect();
    assert!(skipped.contains(&"perl-smtp-ssl"));
    assert!(skipped.contains(&"diff-highlight"));
    assert!(skipped.contains(&"osxkeychain"));
    assert_eq!(receipt.features.get("perl"), Some(&false));

    assert!(!p.join("share/perl5/Net").exists());
    assert!(!p.join("etc/gitconfig").exists());
    // imap-send is only removed on macOS.
    assert!(t.layout().git_core().join("git-imap-send").exists());

    assert_eq!(count(&t.fetcher.calls(), SMTP_URL), 0);
}

// =============================================================================
// Integrity
// =============================================================================

#[test]
fn test_checksum_mismatch_aborts_before_any_step() {
    let t = TestEnv::tampered("man");
    let err = t
        .install(&t.full_snapshot(), InstallOptions::default())
        .unwrap_err();

    match err {
        Error::Stage(StageError::Integrity(e)) => {
            assert_eq!(e.resource, "man");
            assert_eq!(e.url, MAN_URL);
            assert_eq!(e.algorithm, "sha256");
            assert_ne!(e.expected, e.actual);
        }
        other => panic!("expected an integrity error, got {other}"),
    }
    assert!(!t.layout().prefix.exists());
    assert!(t.make_calls().is_empty());
}

#[test]
fn test_mismatched_download_is_not_cached() {
    let t = TestEnv::tampered("man");
    let _ = t.install(&t.full_snapshot(), InstallOptions::default());
    let _ = t.install(&t.full_snapshot(), InstallOptions::default());

    assert_eq!(count(&t.fetcher.calls(), MAN_URL), 2);
}

// =============================================================================
// Step failures
// =============================================================================

#[test]
fn test_required_step_failure_stops_install() {
    let t = TestEnv::failing_when(r"*/contrib/subtree\|*");
    let err = t
        .install(&t.full_snapshot(), InstallOptions::default())
        .unwrap_err();

    let Error::Step { failure } = &err else {
        panic!("expected a step failure, got {err}");
    };
    assert_eq!(failure.step, "subtree");
    assert_eq!(
        failure.completed,
        [
            "make-install",
            "osxkeychain",
            "osxkeychain-clean",
            "diff-highlight",
            "credential-netrc",
        ]
    );
    assert!(matches!(
        failure.cause,
        ActionError::CommandFailed { code: Some(2), .. }
    ));
    assert!(err.to_string().contains("completed steps: make-install"));

    let layout = t.layout();
    assert!(layout.prefix.join("bin/git").exists());
    assert!(!layout.bash_completion().exists());
    assert!(!layout.receipt().exists());
}

#[test]
fn test_best_effort_failure_is_a_warning() {
    let t = TestEnv::failing_when(r"*/osxkeychain\|clean");
    let outcome = t.install(&t.full_snapshot(), InstallOptions::default()).unwrap();

    assert_eq!(outcome.report.warnings.len(), 1);
    assert_eq!(outcome.report.warnings[0].step, "osxkeychain-clean");
    assert_eq!(outcome.report.completed.len(), 15);

    let receipt = outcome.receipt.unwrap();
    assert!(!receipt.steps.contains(&"osxkeychain-clean".to_string()));
    assert_eq!(receipt.warnings.len(), 1);
    assert!(t.layout().prefix.join("etc/gitconfig").exists());
}

#[test]
fn test_incomplete_keg_is_replaced() {
    let t = TestEnv::failing_when(r"*/contrib/subtree\|*");
    t.install(&t.full_snapshot(), InstallOptions::default())
        .unwrap_err();
    assert!(t.layout().prefix.exists());

    // Put back a make that always succeeds.
    let fake_git = t.dir.path().join("fake-git");
    let ok = format!(
        "#!/bin/sh\nif [ \"$1\" = install ]; then\n  for a in \"$@\"; do case \"$a\" in prefix=*) p=\"${{a#prefix=}}\" ;; esac; done\n  mkdir -p \"$p/bin\" \"$p/libexec/git-core\"\n  cp '{}' \"$p/bin/git\"\n  : > \"$p/libexec/git-core/git-imap-send\"\nfi\n",
        fake_git.display()
    );
    write_executable(&t.fakebin.join("make"), &ok);

    let outcome = t.install(&t.full_snapshot(), InstallOptions::default()).unwrap();
    assert_eq!(outcome.report.completed.len(), 16);
    assert!(t.layout().receipt().exists());
}

// =============================================================================
// Cache, reinstall, dry run
// =============================================================================

#[test]
fn test_each_archive_fetched_once() {
    let t = TestEnv::new();
    t.install(&t.full_snapshot(), InstallOptions::default()).unwrap();

    let calls = t.fetcher.calls();
    assert_eq!(calls.len(), 4);
    for url in [SOURCE_URL, MAN_URL, HTML_URL, SMTP_URL] {
        assert_eq!(count(&calls, url), 1, "{url}");
    }
}

#[test]
fn test_cache_reused_across_runs() {
    let t = TestEnv::new();
    t.install(&t.full_snapshot(), InstallOptions::default()).unwrap();
    receipt::uninstall(&t.layout(), "git-curl-openssl").unwrap();
    assert!(!t.layout().prefix.exists());

    t.install(&t.full_snapshot(), InstallOptions::default()).unwrap();
    assert_eq!(t.fetcher.calls().len(), 4);
    assert!(t.layout().receipt().exists());
}

#[test]
fn test_second_install_is_refused() {
    let t = TestEnv::new();
    t.install(&t.full_snapshot(), InstallOptions::default()).unwrap();

    let err = t
        .install(&t.full_snapshot(), InstallOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyInstalled { ref version, .. } if version == "2.35.3"));
}

/// Finishes a competing install of the same keg during the first download.
struct RacingFetcher {
    inner: MemoryFetcher,
    prefix: std::path::PathBuf,
}

impl Fetcher for RacingFetcher {
    fn fetch(&self, url: &str, dest: &std::path::Path) -> Result<u64, FetchError> {
        if !self.prefix.exists() {
            std::fs::create_dir_all(self.prefix.join("bin")).unwrap();
            std::fs::write(self.prefix.join("bin/git"), "other").unwrap();
            std::fs::write(self.prefix.join("INSTALL_RECEIPT.json"), "{}").unwrap();
        }
        self.inner.fetch(url, dest)
    }
}

#[test]
fn test_keg_finished_by_another_run_is_kept() {
    let t = TestEnv::new();
    let layout = t.layout();
    let fetcher = RacingFetcher {
        inner: t.fetcher.clone(),
        prefix: layout.prefix.clone(),
    };

    let recipe = t.recipe();
    let err = Installer::new(&recipe, &t.config, Box::new(fetcher))
        .install(&t.full_snapshot())
        .unwrap_err();

    assert!(matches!(err, Error::AlreadyInstalled { .. }));
    assert_eq!(std::fs::read_to_string(layout.prefix.join("bin/git")).unwrap(), "other");
    assert!(layout.receipt().exists());
    assert!(t.make_calls().is_empty());
}

#[test]
fn test_dry_run_fetches_and_writes_nothing() {
    let t = TestEnv::new();
    let options = InstallOptions {
        dry_run: true,
        ..Default::default()
    };
    let outcome = t.install(&t.full_snapshot(), options).unwrap();

    assert_eq!(outcome.report.completed.len(), 16);
    assert!(outcome.receipt.is_none());
    assert!(t.fetcher.calls().is_empty());
    assert!(t.make_calls().is_empty());
    assert!(!t.layout().prefix.exists());
}

#[test]
fn test_installed_and_uninstall() {
    let t = TestEnv::new();
    assert!(receipt::installed(&t.config.cellar, "git-curl-openssl").unwrap().is_empty());

    t.install(&t.full_snapshot(), InstallOptions::default()).unwrap();
    let kegs = receipt::installed(&t.config.cellar, "git-curl-openssl").unwrap();
    assert_eq!(kegs.len(), 1);
    assert_eq!(kegs[0].1.version, "2.35.3");

    let removed = receipt::uninstall(&kegs[0].0, "git-curl-openssl").unwrap();
    assert_eq!(removed.version, "2.35.3");
    assert!(!t.config.cellar.join("git-curl-openssl").exists());
}
