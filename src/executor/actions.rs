//! Filesystem actions: install, copy, chmod, write, remove.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::core::output;
use crate::env::BuildEnv;
use crate::plan::{Action, EntryKind};

use super::context::Context;
use super::error::ActionError;
use super::util;

/// Carry out `action` with relative paths resolved against `cwd`.
pub fn apply(
    ctx: &Context,
    cwd: &Path,
    env: &BuildEnv,
    action: &Action,
) -> Result<(), ActionError> {
    if let Action::Run(inv) = action {
        return util::run(ctx, cwd, env, inv);
    }

    if ctx.verbose || ctx.dry_run {
        output::command(ctx.dry_run, &action.to_string());
    }
    if ctx.dry_run {
        return Ok(());
    }

    match action {
        Action::Run(_) => Ok(()),
        Action::Install {
            src,
            dest_dir,
            rename,
        } => install(&cwd.join(src), dest_dir, rename.as_deref()),
        Action::InstallGlob { pattern, dest_dir } => {
            let full = format!("{}/{}", glob::Pattern::escape(&cwd.display().to_string()), pattern);
            for entry in matches(&full)? {
                install(&entry, dest_dir, None)?;
            }
            Ok(())
        }
        Action::Copy { src, dest_dir } => copy_into(src, dest_dir),
        Action::Chmod {
            patterns,
            mode,
            kind,
        } => {
            for pattern in patterns {
                for entry in matches(pattern)? {
                    let Ok(meta) = entry.symlink_metadata() else {
                        continue;
                    };
                    let wanted = match kind {
                        EntryKind::Files => meta.is_file(),
                        EntryKind::Dirs => meta.is_dir(),
                    };
                    if wanted {
                        set_mode(&entry, *mode)?;
                    }
                }
            }
            Ok(())
        }
        Action::Write { path, contents } => {
            let path = cwd.join(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(ActionError::io(parent))?;
            }
            std::fs::write(&path, contents).map_err(ActionError::io(&path))
        }
        Action::Remove { path } => std::fs::remove_file(path).map_err(ActionError::io(path)),
        Action::RemoveTree { path } => match path.symlink_metadata() {
            Err(_) => Ok(()),
            Ok(meta) if meta.is_dir() => {
                std::fs::remove_dir_all(path).map_err(ActionError::io(path))
            }
            Ok(_) => std::fs::remove_file(path).map_err(ActionError::io(path)),
        },
    }
}

/// Sorted paths matching an absolute glob. No match is not an error.
fn matches(pattern: &str) -> Result<Vec<PathBuf>, ActionError> {
    let paths = glob::glob(pattern).map_err(|source| ActionError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;
    let mut found: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
    found.sort();
    Ok(found)
}

/// Move `src` into `dest_dir` (as `rename` if given).
///
/// An existing directory at the destination is merged into; an existing
/// file is replaced.
pub fn install(src: &Path, dest_dir: &Path, rename: Option<&str>) -> Result<(), ActionError> {
    if src.symlink_metadata().is_err() {
        return Err(ActionError::Missing(src.to_path_buf()));
    }
    let name = match rename {
        Some(name) => PathBuf::from(name),
        None => src
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| ActionError::Missing(src.to_path_buf()))?,
    };
    std::fs::create_dir_all(dest_dir).map_err(ActionError::io(dest_dir))?;
    move_entry(src, &dest_dir.join(name))
}

fn move_entry(src: &Path, dest: &Path) -> Result<(), ActionError> {
    let src_is_dir = src.symlink_metadata().map(|m| m.is_dir()).unwrap_or(false);

    if let Ok(existing) = dest.symlink_metadata() {
        if existing.is_dir() && src_is_dir {
            for entry in std::fs::read_dir(src).map_err(ActionError::io(src))? {
                let entry = entry.map_err(ActionError::io(src))?;
                move_entry(&entry.path(), &dest.join(entry.file_name()))?;
            }
            return std::fs::remove_dir(src).map_err(ActionError::io(src));
        }
        if existing.is_dir() {
            std::fs::remove_dir_all(dest).map_err(ActionError::io(dest))?;
        } else {
            std::fs::remove_file(dest).map_err(ActionError::io(dest))?;
        }
    }

    if std::fs::rename(src, dest).is_ok() {
        return Ok(());
    }

    // Different filesystem: copy, then drop the original.
    copy_tree(src, dest)?;
    if src_is_dir {
        std::fs::remove_dir_all(src).map_err(ActionError::io(src))
    } else {
        std::fs::remove_file(src).map_err(ActionError::io(src))
    }
}

fn copy_into(src: &Path, dest_dir: &Path) -> Result<(), ActionError> {
    if !src.exists() {
        return Err(ActionError::Missing(src.to_path_buf()));
    }
    let name = src
        .file_name()
        .ok_or_else(|| ActionError::Missing(src.to_path_buf()))?;
    std::fs::create_dir_all(dest_dir).map_err(ActionError::io(dest_dir))?;
    copy_tree(src, &dest_dir.join(name))
}

/// Recursively copy `src` to `dest`, keeping symlinks as symlinks.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<(), ActionError> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| ActionError::Io {
            path: e.path().unwrap_or(src).to_path_buf(),
            source: e.into(),
        })?;
        let rel = entry.path().strip_prefix(src).unwrap_or(Path::new(""));
        let target = if rel.as_os_str().is_empty() {
            dest.to_path_buf()
        } else {
            dest.join(rel)
        };
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(ActionError::io(&target))?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path()).map_err(ActionError::io(entry.path()))?;
            symlink(&link, &target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(ActionError::io(parent))?;
            }
            std::fs::copy(entry.path(), &target).map_err(ActionError::io(&target))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> Result<(), ActionError> {
    let _ = std::fs::remove_file(target);
    std::os::unix::fs::symlink(link, target).map_err(ActionError::io(target))
}

#[cfg(not(unix))]
fn symlink(link: &Path, target: &Path) -> Result<(), ActionError> {
    std::fs::copy(link, target)
        .map(|_| ())
        .map_err(ActionError::io(target))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), ActionError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(ActionError::io(path))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), ActionError> {
    Ok(())
}
