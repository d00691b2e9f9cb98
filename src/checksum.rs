use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("SHA-256 mismatch for {path}: expected {expected}, got {actual}")]
    Mismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

fn map_io(path: &Path, e: std::io::Error) -> ChecksumError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        ChecksumError::PermissionDenied(path.to_path_buf())
    } else {
        ChecksumError::Io(e)
    }
}

/// Hex encoded SHA-256 of a file, read in chunks so multi-gigabyte tiles
/// are never held in memory.
pub fn sha256_file(path: &Path) -> Result<String, ChecksumError> {
    info!("Checksumming {}", path.display());

    let mut file = File::open(path).map_err(|e| map_io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(ChecksumError::Io)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let sha256 = format!("{:x}", hasher.finalize());
    debug!("Checksum of {} is {}", path.display(), sha256);
    Ok(sha256)
}

/// Compare a file against the SHA-256 published for it (case-insensitive).
pub fn verify_file(path: &Path, expected: &str) -> Result<(), ChecksumError> {
    let actual = sha256_file(path)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(ChecksumError::Mismatch {
            path: path.to_path_buf(),
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        });
    }
    Ok(())
}
