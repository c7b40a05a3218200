//! Test fixtures - in-memory archives and a formula pointing at them.

#![allow(dead_code)]

use kegforge::stage::Checksum;

pub const BASE_URL: &str = "https://fixtures.test";
pub const SOURCE_URL: &str = "https://fixtures.test/git-2.35.3.tar.gz";
pub const MAN_URL: &str = "https://fixtures.test/git-manpages-2.35.3.tar.gz";
pub const HTML_URL: &str = "https://fixtures.test/git-htmldocs-2.35.3.tar.gz";
pub const SMTP_URL: &str = "https://fixtures.test/Net-SMTP-SSL-1.04.tar.gz";

/// Build a gzipped tarball from `(path, contents)` pairs.
pub fn tar_gz(entries: &[(&str, &str)]) -> Vec<u8> {
    tar_gz_with_mode(entries, 0o644)
}

pub fn tar_gz_with_mode(entries: &[(&str, &str)], mode: u32) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        builder.append_data(&mut header, path, data.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// A git source tree with just the files the install steps move around.
pub fn source_archive() -> Vec<u8> {
    tar_gz(&[
        ("git-2.35.3/Makefile", "all:\n"),
        ("git-2.35.3/contrib/README", "contrib\n"),
        (
            "git-2.35.3/contrib/credential/osxkeychain/git-credential-osxkeychain",
            "osxkeychain\n",
        ),
        ("git-2.35.3/contrib/credential/netrc/git-credential-netrc", "netrc\n"),
        ("git-2.35.3/contrib/diff-highlight/diff-highlight.perl", "perl\n"),
        ("git-2.35.3/contrib/subtree/git-subtree", "subtree\n"),
        ("git-2.35.3/contrib/completion/git-completion.bash", "# bash\n"),
        ("git-2.35.3/contrib/completion/git-prompt.sh", "# prompt\n"),
        ("git-2.35.3/contrib/completion/git-completion.zsh", "# zsh\n"),
        ("git-2.35.3/contrib/emacs/git.el", ";; git\n"),
        ("git-2.35.3/contrib/emacs/git-blame.el", ";; blame\n"),
    ])
}

/// Man pages ship without a wrapping directory.
pub fn man_archive() -> Vec<u8> {
    tar_gz(&[
        ("man1/git.1", ".TH GIT 1\n"),
        ("man5/gitattributes.5", ".TH GITATTRIBUTES 5\n"),
        ("man7/gitcli.7", ".TH GITCLI 7\n"),
    ])
}

/// Shipped owner-only so the permission fixup has something to do.
pub fn html_archive() -> Vec<u8> {
    tar_gz_with_mode(&[
        ("git.html", "<html></html>\n"),
        ("git.txt", "git\n"),
        ("RelNotes/2.35.3.txt", "notes\n"),
        ("howto/maintain-git.txt", "howto\n"),
        ("technical/api-index.txt", "api\n"),
    ], 0o600)
}

pub fn smtp_archive() -> Vec<u8> {
    tar_gz(&[
        ("Net-SMTP-SSL-1.04/Makefile.PL", "use ExtUtils::MakeMaker;\n"),
        (
            "Net-SMTP-SSL-1.04/lib/Net/SMTP/SSL.pm",
            "package Net::SMTP::SSL;\n1;\n",
        ),
    ])
}

fn sha(bytes: &[u8]) -> String {
    Checksum::sha256_of(bytes).hex().to_string()
}

/// Formula TOML for the fixture archives; `tamper` names a resource whose
/// declared checksum will not match.
pub fn formula_toml(tamper: Option<&str>) -> String {
    let declared = |name: &str, bytes: Vec<u8>| {
        if tamper == Some(name) {
            sha(b"not the archive")
        } else {
            sha(&bytes)
        }
    };

    format!(
        r#"
name = "git-curl-openssl"
desc = "Distributed revision control system"
homepage = "https://git-scm.com"
url = "{SOURCE_URL}"
sha256 = "{source}"
license = "GPL-2.0-only"
head = "https://github.com/git/git.git"
depends_on = ["curl", "gettext", "openssl@1.1", "pcre2"]

[[resource]]
name = "html"
url = "{HTML_URL}"
sha256 = "{html}"

[[resource]]
name = "man"
url = "{MAN_URL}"
sha256 = "{man}"

[[resource]]
name = "Net::SMTP::SSL"
url = "{SMTP_URL}"
sha256 = "{smtp}"
"#,
        source = declared("source", source_archive()),
        html = declared("html", html_archive()),
        man = declared("man", man_archive()),
        smtp = declared("Net::SMTP::SSL", smtp_archive()),
    )
}

/// A stand-in `git` that fakes just enough of init/add/commit/ls-files for
/// the smoke test, and fails send-email the way an unauthenticated SMTP
/// server does.
pub const FAKE_GIT: &str = r#"#!/bin/sh
case "$1" in
  init) mkdir -p .git && : > .git/index ;;
  add) shift; for f in "$@"; do echo "$f" >> .git/index; done ;;
  commit) test -s .git/index && test -n "$GIT_AUTHOR_EMAIL" ;;
  ls-files) sort -u .git/index ;;
  send-email)
    echo "Unable to initialize SMTP properly. Check config and use --smtp-debug." >&2
    echo "5.7.0 Authentication Required" >&2
    exit 255 ;;
  *) exit 1 ;;
esac
"#;
