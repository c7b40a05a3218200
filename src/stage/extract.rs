//! Native archive extraction
//!
//! Supports tar.gz, tar.xz, tar.bz2, tar.zst, plain tar and zip without
//! shelling out. Entries that would land outside the destination (absolute
//! paths, `..`, links escaping the tree, writes through existing symlinks)
//! are rejected.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("cannot detect archive format of {}", .0.display())]
    UnknownFormat(PathBuf),

    #[error("unsafe archive entry in {}: {reason}", archive.display())]
    Unsafe { archive: PathBuf, reason: String },

    #[error("cannot read {}: {source}", archive.display())]
    Read {
        archive: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read zip {}: {source}", archive.display())]
    Zip {
        archive: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

/// Archive formats understood by [`extract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    TarGz,
    TarXz,
    TarBz2,
    TarZst,
    Tar,
    Zip,
}

/// Detect archive format from a file name.
pub fn detect_format(name: &str) -> Option<Format> {
    let name = name.to_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(Format::TarGz)
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        Some(Format::TarXz)
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
        Some(Format::TarBz2)
    } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
        Some(Format::TarZst)
    } else if name.ends_with(".zip") {
        Some(Format::Zip)
    } else if name.ends_with(".tar") {
        Some(Format::Tar)
    } else {
        None
    }
}

/// Extract `archive` into `dest`, detecting the format from `name`
/// (the archive on disk may carry a cache-specific file name).
pub fn extract(archive: &Path, name: &str, dest: &Path) -> Result<(), ExtractError> {
    let format = detect_format(name).ok_or_else(|| ExtractError::UnknownFormat(archive.into()))?;
    extract_with_format(archive, format, dest)
}

pub fn extract_with_format(
    archive: &Path,
    format: Format,
    dest: &Path,
) -> Result<(), ExtractError> {
    let read_err = |source| ExtractError::Read {
        archive: archive.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dest).map_err(read_err)?;
    let file = File::open(archive).map_err(read_err)?;
    let reader = BufReader::new(file);

    match format {
        Format::TarGz => extract_tar(archive, flate2::read::GzDecoder::new(reader), dest),
        Format::TarXz => extract_tar(archive, xz2::read::XzDecoder::new(reader), dest),
        Format::TarBz2 => extract_tar(archive, bzip2::read::BzDecoder::new(reader), dest),
        Format::TarZst => {
            let decoder = zstd::stream::read::Decoder::new(reader).map_err(read_err)?;
            extract_tar(archive, decoder, dest)
        }
        Format::Tar => extract_tar(archive, reader, dest),
        Format::Zip => extract_zip(archive, dest),
    }
}

/// If `dir` contains exactly one entry and it is a directory, return it.
///
/// Source tarballs conventionally wrap everything in `<name>-<version>/`;
/// staging hands out that inner directory.
pub fn single_top_dir(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?;
    let first = match entries.next() {
        Some(entry) => entry?,
        None => return Ok(None),
    };
    if entries.next().is_some() {
        return Ok(None);
    }
    let path = first.path();
    if first.file_type()?.is_dir() {
        Ok(Some(path))
    } else {
        Ok(None)
    }
}

fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut has_root = false;

    for c in path.components() {
        match c {
            Component::Prefix(p) => {
                out.clear();
                out.push(p.as_os_str());
                has_root = true;
            }
            Component::RootDir => {
                out.push(Component::RootDir.as_os_str());
                has_root = true;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = out
                    .components()
                    .next_back()
                    .is_some_and(|last| matches!(last, Component::Normal(_)));
                if popped {
                    out.pop();
                } else if !has_root {
                    out.push("..");
                }
            }
            Component::Normal(seg) => out.push(seg),
        }
    }

    out
}

fn unsafe_entry(archive: &Path, reason: String) -> ExtractError {
    ExtractError::Unsafe {
        archive: archive.to_path_buf(),
        reason,
    }
}

fn ensure_no_symlink_components(
    archive: &Path,
    dest: &Path,
    full_path: &Path,
) -> Result<(), ExtractError> {
    let rel = full_path.strip_prefix(dest).map_err(|_| {
        unsafe_entry(archive, format!("path outside destination: {}", full_path.display()))
    })?;

    let mut cur = dest.to_path_buf();
    for comp in rel.components() {
        cur.push(comp);
        if let Ok(md) = std::fs::symlink_metadata(&cur)
            && md.file_type().is_symlink()
        {
            return Err(unsafe_entry(
                archive,
                format!("symlink in path component: {}", cur.display()),
            ));
        }
    }

    Ok(())
}

fn ensure_link_target_within_dest(
    archive: &Path,
    dest: &Path,
    link_parent: &Path,
    link_name: &Path,
) -> Result<(), ExtractError> {
    if link_name.is_absolute()
        || link_name
            .components()
            .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
    {
        return Err(unsafe_entry(
            archive,
            format!("absolute link target: {}", link_name.display()),
        ));
    }

    let candidate = normalize_lexical(&link_parent.join(link_name));
    if candidate.strip_prefix(normalize_lexical(dest)).is_err() {
        return Err(unsafe_entry(
            archive,
            format!(
                "link escapes destination: {} -> {}",
                link_parent.display(),
                link_name.display()
            ),
        ));
    }

    Ok(())
}

fn extract_tar<R: Read>(archive: &Path, reader: R, dest: &Path) -> Result<(), ExtractError> {
    let read_err = |source| ExtractError::Read {
        archive: archive.to_path_buf(),
        source,
    };

    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);

    for entry in tar.entries().map_err(read_err)? {
        let mut entry = entry.map_err(read_err)?;
        let path = entry.path().map_err(read_err)?.into_owned();

        if path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
            return Err(unsafe_entry(archive, format!("unsafe path: {}", path.display())));
        }
        if path.as_os_str().is_empty() || path == Path::new(".") {
            continue;
        }

        let full_path = dest.join(&path);
        ensure_no_symlink_components(archive, dest, &full_path)?;

        let entry_type = entry.header().entry_type();
        let is_link = entry_type == tar::EntryType::Symlink || entry_type == tar::EntryType::Link;
        let link_name = if is_link {
            match entry.link_name().map_err(read_err)? {
                Some(link_name) => Some(link_name.into_owned()),
                None => {
                    return Err(unsafe_entry(
                        archive,
                        format!("link without target: {}", path.display()),
                    ));
                }
            }
        } else {
            None
        };

        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).map_err(read_err)?;
        }

        match link_name {
            // Hard link names are relative to the archive root.
            Some(target) if entry_type == tar::EntryType::Link => {
                ensure_link_target_within_dest(archive, dest, dest, &target)?;
                let target = dest.join(&target);
                ensure_no_symlink_components(archive, dest, &target)?;
                if std::fs::symlink_metadata(&full_path).is_ok() {
                    std::fs::remove_file(&full_path).map_err(read_err)?;
                }
                std::fs::hard_link(&target, &full_path).map_err(read_err)?;
            }
            Some(target) => {
                let link_parent = full_path.parent().unwrap_or(dest);
                ensure_link_target_within_dest(archive, dest, link_parent, &target)?;
                entry.unpack(&full_path).map_err(read_err)?;
            }
            None => {
                entry.unpack(&full_path).map_err(read_err)?;
            }
        }
    }

    Ok(())
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<(), ExtractError> {
    let read_err = |source| ExtractError::Read {
        archive: archive.to_path_buf(),
        source,
    };
    let zip_err = |source| ExtractError::Zip {
        archive: archive.to_path_buf(),
        source,
    };

    let file = File::open(archive).map_err(read_err)?;
    let mut zip = zip::ZipArchive::new(file).map_err(zip_err)?;

    for i in 0..zip.len() {
        let mut file = zip.by_index(i).map_err(zip_err)?;
        let outpath = match file.enclosed_name() {
            Some(path) => dest.join(path),
            None => {
                return Err(unsafe_entry(archive, format!("unsafe path: {}", file.name())));
            }
        };

        if file.is_dir() {
            std::fs::create_dir_all(&outpath).map_err(read_err)?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent).map_err(read_err)?;
        }
        let mut outfile = File::create(&outpath).map_err(read_err)?;
        std::io::copy(&mut file, &mut outfile).map_err(read_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))
                    .map_err(read_err)?;
            }
        }
    }

    Ok(())
}
