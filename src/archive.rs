//! Extraction of a single named file from a vendor tar.gz archive.
//!
//! The vendor wraps the database in a gzip-compressed tar together with
//! license and readme files, usually under a dated subdirectory. The archive
//! is untrusted input: declared entry sizes are checked against the caller's
//! limit before any allocation, and the bytes actually read must match the
//! declared size exactly.

use std::io::Read;

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;

/// Archive extraction failures. Permanent for the given archive bytes.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to read tar.gz archive: {0}")]
    Malformed(std::io::Error),

    #[error("archive entry {name} declares {declared} bytes (limit {limit})")]
    EntryTooLarge {
        name: String,
        declared: u64,
        limit: u64,
    },

    #[error("archive entry {name} declared {declared} bytes but contained {actual}")]
    SizeMismatch {
        name: String,
        declared: u64,
        actual: u64,
    },

    #[error("file {0} not found in archive")]
    NotFound(String),
}

/// Extracts the entry whose base filename equals `wanted` from a tar.gz
/// byte stream, enforcing `max_size` on the declared entry size.
///
/// Entries are walked in order; directories are skipped and the entry may
/// sit anywhere in the directory tree (the vendor nests the database under
/// a dated directory).
pub fn extract_file_from_tar_gz(
    tar_gz_bytes: &[u8],
    wanted: &str,
    max_size: u64,
) -> Result<Vec<u8>, ArchiveError> {
    log::debug!("Extracting {} from {} byte archive", wanted, tar_gz_bytes.len());

    let mut archive = Archive::new(GzDecoder::new(tar_gz_bytes));
    let entries = archive.entries().map_err(ArchiveError::Malformed)?;

    for entry in entries {
        let mut entry = entry.map_err(ArchiveError::Malformed)?;
        if entry.header().entry_type().is_dir() {
            continue;
        }

        let path = entry.path().map_err(ArchiveError::Malformed)?;
        let matches = path
            .file_name()
            .map(|name| name.to_str() == Some(wanted))
            .unwrap_or(false);
        if !matches {
            continue;
        }

        // Size check precedes allocation: the declared size of a hostile
        // entry must never drive a buffer reservation.
        let declared = entry.header().size().map_err(ArchiveError::Malformed)?;
        if declared > max_size {
            return Err(ArchiveError::EntryTooLarge {
                name: wanted.to_string(),
                declared,
                limit: max_size,
            });
        }

        let mut bytes = Vec::with_capacity(declared as usize);
        let actual = entry
            .by_ref()
            .take(declared)
            .read_to_end(&mut bytes)
            .map_err(ArchiveError::Malformed)? as u64;
        if actual != declared {
            return Err(ArchiveError::SizeMismatch {
                name: wanted.to_string(),
                declared,
                actual,
            });
        }

        log::info!("Extracted {} from archive ({} bytes)", wanted, bytes.len());
        return Ok(bytes);
    }

    Err(ArchiveError::NotFound(wanted.to_string()))
}
