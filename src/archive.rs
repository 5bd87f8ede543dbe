//! In-place extraction of downloaded archives.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use zip::ZipArchive;

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    Tar,
}

impl ArchiveKind {
    pub fn detect(filename: &str) -> Option<ArchiveKind> {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if lower.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else {
            None
        }
    }
}

/// Extracts `archive_path` into `destination` and deletes the archive.
/// Runs on the blocking pool.
pub async fn extract_in_place(archive_path: &Path, destination: &Path) -> Result<usize, FetchError> {
    let archive_path = archive_path.to_path_buf();
    let destination = destination.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let count = extract(&archive_path, &destination)?;
        std::fs::remove_file(&archive_path)
            .map_err(|e| FetchError::Archive(format!("cannot remove {}: {}", archive_path.display(), e)))?;
        Ok(count)
    })
    .await
    .map_err(|e| FetchError::Archive(e.to_string()))?
}

/// Returns the number of files written.
pub fn extract(archive_path: &Path, destination: &Path) -> Result<usize, FetchError> {
    let file_name = archive_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| FetchError::Archive("invalid archive file name".to_string()))?;
    let kind = ArchiveKind::detect(file_name)
        .ok_or_else(|| FetchError::Archive(format!("unsupported archive format: {}", file_name)))?;

    std::fs::create_dir_all(destination).map_err(archive_err)?;
    let file = File::open(archive_path).map_err(archive_err)?;
    match kind {
        ArchiveKind::Zip => extract_zip(file, destination),
        ArchiveKind::TarGz => extract_tar(Archive::new(GzDecoder::new(file)), destination),
        ArchiveKind::Tar => extract_tar(Archive::new(file), destination),
    }
}

fn extract_zip(file: File, destination: &Path) -> Result<usize, FetchError> {
    let mut archive = ZipArchive::new(file).map_err(|e| FetchError::Archive(e.to_string()))?;
    let mut written = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| FetchError::Archive(e.to_string()))?;
        let outpath = match entry.enclosed_name() {
            Some(path) => destination.join(path),
            None => continue,
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath).map_err(archive_err)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent).map_err(archive_err)?;
        }
        let mut outfile = File::create(&outpath).map_err(archive_err)?;
        io::copy(&mut entry, &mut outfile).map_err(archive_err)?;
        written += 1;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))
                    .map_err(archive_err)?;
            }
        }
    }
    Ok(written)
}

fn extract_tar<R: io::Read>(mut archive: Archive<R>, destination: &Path) -> Result<usize, FetchError> {
    let mut written = 0;
    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let path: PathBuf = entry.path().map_err(archive_err)?.into_owned();
        if !is_safe_relative_path(&path) {
            continue;
        }
        let is_file = entry.header().entry_type().is_file();
        // unpack_in refuses paths escaping `destination`
        if entry.unpack_in(destination).map_err(archive_err)? && is_file {
            written += 1;
        }
    }
    Ok(written)
}

fn is_safe_relative_path(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn archive_err(err: io::Error) -> FetchError {
    FetchError::Archive(err.to_string())
}
