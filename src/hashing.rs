use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::cli::VerifyMode;
use crate::error::FetchError;

pub async fn calculate_hash(filepath: &Path) -> std::io::Result<String> {
    let mut file = File::open(filepath).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Applies `mode` to a finished download at `filepath`. A mismatching file is
/// removed so a rerun fetches it again.
pub async fn verify_file(
    filepath: &Path,
    expected: Option<&str>,
    mode: VerifyMode,
) -> Result<Option<String>, FetchError> {
    let expected = match (mode, expected) {
        (VerifyMode::Off, _) => return Ok(None),
        (VerifyMode::Auto, None) => return Ok(None),
        (VerifyMode::On, None) => {
            return Err(FetchError::Integrity(format!(
                "no hash available for {}",
                filepath.display()
            )))
        }
        (_, Some(expected)) => expected,
    };

    let computed = calculate_hash(filepath).await?;
    if !expected.eq_ignore_ascii_case(&computed) {
        let _ = tokio::fs::remove_file(filepath).await;
        return Err(FetchError::Integrity(format!(
            "hash mismatch for {}: expected {}, got {}",
            filepath.display(),
            expected,
            computed
        )));
    }
    Ok(Some(computed))
}
