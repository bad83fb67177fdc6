use crate::error::PipelineError;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

fn hash_failure(path: &Path, err: std::io::Error) -> PipelineError {
    PipelineError::HashFailure {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

/// Hex SHA-256 of the file's full content, read in fixed-size chunks.
///
/// Any read error is returned; an empty digest is never produced.
pub fn file_sha256(path: &Path) -> Result<String, PipelineError> {
    let mut file = File::open(path).map_err(|err| hash_failure(path, err))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(hash_failure(path, err)),
        };
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn digest_depends_only_on_content() {
        let tmp = tempdir().expect("tempdir");
        let a = tmp.path().join("a.csv");
        let b = tmp.path().join("renamed.txt");
        fs::write(&a, "x").expect("write a");
        fs::write(&b, "x").expect("write b");

        let first = file_sha256(&a).expect("hash a");
        assert_eq!(first, file_sha256(&a).expect("hash a again"));
        assert_eq!(first, file_sha256(&b).expect("hash b"));
        assert_eq!(
            first,
            "2d711642b726b04401627ca9fbac32f5c8530fb1903cc4db02258717921a4881"
        );
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn single_byte_change_changes_digest() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("survey.csv");
        fs::write(&path, "id,value\n1,10\n").expect("write");
        let before = file_sha256(&path).expect("hash");
        fs::write(&path, "id,value\n1,11\n").expect("rewrite");
        assert_ne!(before, file_sha256(&path).expect("hash"));
    }

    #[test]
    fn large_file_spanning_chunks_hashes_like_in_memory_digest() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("big.bin");
        let bytes: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &bytes).expect("write");

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let want = format!("{:x}", hasher.finalize());
        assert_eq!(file_sha256(&path).expect("hash"), want);
    }

    #[test]
    fn missing_file_is_a_hash_failure() {
        let tmp = tempdir().expect("tempdir");
        let err = file_sha256(&tmp.path().join("gone.csv")).expect_err("missing");
        assert!(matches!(err, PipelineError::HashFailure { .. }));
        assert!(err.to_string().starts_with("could not checksum"));
    }
}
