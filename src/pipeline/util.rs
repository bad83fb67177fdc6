use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

/// Return the current Unix epoch in seconds.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Leading characters of a digest for human-facing output.
pub fn short_digest(checksum: &str) -> &str {
    checksum.get(..12).unwrap_or(checksum)
}
