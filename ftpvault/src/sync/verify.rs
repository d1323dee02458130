use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

const HASH_BUFFER: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Match,
    Mismatch,
    /// The sink has no object, or reports no hash for it.
    Absent,
}

/// Lowercase hex SHA-256 of a local file, read in fixed-size chunks.
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn verify(local: &str, reported: Option<&str>) -> Verdict {
    match reported {
        None => Verdict::Absent,
        Some(remote) if remote.eq_ignore_ascii_case(local) => Verdict::Match,
        Some(_) => Verdict::Mismatch,
    }
}
