//! Gzip-compressed tar archives of exported job state
//!
//! Members are stored flat, under their base names. Extraction refuses any
//! member whose path would land outside the target directory and skips
//! everything that is not a regular file.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, info, warn};

use crate::error::{ArchiveError, Result};
use crate::utils::fs::{ensure_dir_exists, file_name};

/// Pack files into `<archive_path>`
///
/// Files that do not exist are skipped with a warning.
///
/// # Arguments
/// * `archive_path` - Archive to create (overwritten if present)
/// * `files` - Files to add
///
/// # Returns
/// * `Result<usize>` - Number of members written
pub fn create_archive(archive_path: &Path, files: &[PathBuf]) -> Result<usize> {
    let encoder = GzEncoder::new(File::create(archive_path)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut added = 0;

    for file in files {
        if !file.is_file() {
            warn!("File {} not found, skipping", file.display());
            continue;
        }
        builder.append_path_with_name(file, file_name(file))?;
        info!("Added {} to archive {}", file.display(), archive_path.display());
        added += 1;
    }

    builder.into_inner()?.finish()?;
    info!("Archive {} created with {} members", archive_path.display(), added);
    Ok(added)
}

/// Unpack an archive into `target`
///
/// # Arguments
/// * `archive_path` - Archive to read
/// * `target` - Directory to extract into, created if missing
///
/// # Returns
/// * `Result<Vec<PathBuf>>` - Extracted files
pub fn extract_archive(archive_path: &Path, target: &Path) -> Result<Vec<PathBuf>> {
    if !archive_path.is_file() {
        return Err(ArchiveError::NotFound(archive_path.display().to_string()).into());
    }
    ensure_dir_exists(target)?;

    let mut archive = tar::Archive::new(GzDecoder::new(File::open(archive_path)?));
    let mut extracted = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let member = entry.path()?.into_owned();
        let relative = safe_member_path(&member)?;

        if !entry.header().entry_type().is_file() {
            debug!("Skipping non-file member {}", member.display());
            continue;
        }

        let destination = target.join(relative);
        if let Some(parent) = destination.parent() {
            ensure_dir_exists(parent)?;
        }
        entry.unpack(&destination)?;
        debug!("Extracted {}", destination.display());
        extracted.push(destination);
    }

    if extracted.is_empty() {
        return Err(ArchiveError::Empty(archive_path.display().to_string()).into());
    }
    info!(
        "Extracted {} files from {} into {}",
        extracted.len(),
        archive_path.display(),
        target.display()
    );
    Ok(extracted)
}

/// Validate a member path, returning it relative to the extraction root
fn safe_member_path(member: &Path) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in member.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::PathTraversal(member.display().to_string()).into());
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(ArchiveError::PathTraversal(member.display().to_string()).into());
    }
    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobStateError;
    use std::io::Write;

    #[test]
    fn test_round_trip_flattens_names() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        let a = nested.join("job_config.json");
        let b = dir.path().join("job_snapshot_docs.ndjson");
        std::fs::write(&a, "{\"job_id\":\"job\"}").unwrap();
        std::fs::write(&b, "").unwrap();

        let archive = dir.path().join("job_state.tar.gz");
        let missing = dir.path().join("absent.ndjson");
        let added = create_archive(&archive, &[a, b, missing]).unwrap();
        assert_eq!(added, 2);

        let out = dir.path().join("extracted_job");
        let mut files = extract_archive(&archive, &out).unwrap();
        files.sort();
        assert_eq!(
            files,
            vec![out.join("job_config.json"), out.join("job_snapshot_docs.ndjson")]
        );
        assert_eq!(
            std::fs::read_to_string(out.join("job_config.json")).unwrap(),
            "{\"job_id\":\"job\"}"
        );
    }

    #[test]
    fn test_safe_member_path() {
        assert_eq!(
            safe_member_path(Path::new("./a.json")).unwrap(),
            PathBuf::from("a.json")
        );
        assert!(safe_member_path(Path::new("../evil")).is_err());
        assert!(safe_member_path(Path::new("/etc/passwd")).is_err());
        assert!(safe_member_path(Path::new("a/../../b")).is_err());
    }

    #[test]
    fn test_rejects_traversal_member() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.tar.gz");
        {
            let encoder = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let data = b"owned";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            // bypass the builder's own path checks
            let name = b"../escape.txt";
            header.as_old_mut().name[..name.len()].copy_from_slice(name);
            header.set_cksum();
            builder.append(&header, &data[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap().flush().unwrap();
        }

        let out = dir.path().join("out");
        let err = extract_archive(&archive, &out).unwrap_err();
        assert!(matches!(
            err,
            JobStateError::Archive(ArchiveError::PathTraversal(_))
        ));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn test_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_archive(&dir.path().join("nope.tar.gz"), dir.path()).unwrap_err();
        assert!(matches!(err, JobStateError::Archive(ArchiveError::NotFound(_))));
    }
}
