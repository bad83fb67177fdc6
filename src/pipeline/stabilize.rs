use crate::error::PipelineError;
use crate::pipeline::config::StabilizeConfig;
use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Poll `probe` until two consecutive reads agree, sleeping `interval`
/// between reads. Gives up after `max_attempts` reads.
fn wait_until_stable<F>(
    mut probe: F,
    interval: Duration,
    max_attempts: u32,
) -> Result<Option<u64>, io::Error>
where
    F: FnMut() -> io::Result<u64>,
{
    let mut last = None;
    for attempt in 1..=max_attempts {
        let size = probe()?;
        if last == Some(size) {
            return Ok(Some(size));
        }
        last = Some(size);
        if attempt < max_attempts {
            thread::sleep(interval);
        }
    }
    Ok(None)
}

/// `NotFound` and non-regular files mean the source is gone; anything else
/// keeps the I/O reason.
fn poll_failure(path: &Path, err: io::Error) -> PipelineError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::InvalidInput => {
            PipelineError::SourceMissing(path.display().to_string())
        }
        _ => PipelineError::SourceUnreadable {
            path: path.display().to_string(),
            reason: err.to_string(),
        },
    }
}

/// Wait for a download in progress to finish writing. Returns the settled size.
pub fn stabilize(path: &Path, cfg: &StabilizeConfig) -> Result<u64, PipelineError> {
    let probe = || {
        let meta = fs::metadata(path)?;
        if !meta.is_file() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
        }
        Ok(meta.len())
    };

    match wait_until_stable(
        probe,
        Duration::from_millis(cfg.poll_interval_ms),
        cfg.max_attempts,
    ) {
        Ok(Some(size)) => Ok(size),
        Ok(None) => Err(PipelineError::SourceUnstable {
            path: path.display().to_string(),
            attempts: cfg.max_attempts,
        }),
        Err(err) => Err(poll_failure(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scripted(sizes: Vec<u64>) -> impl FnMut() -> io::Result<u64> {
        let mut iter = sizes.into_iter();
        move || {
            iter.next()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "script exhausted"))
        }
    }

    #[test]
    fn settles_once_two_reads_agree() {
        let got = wait_until_stable(scripted(vec![10, 20, 20]), Duration::ZERO, 5).expect("probe");
        assert_eq!(got, Some(20));
    }

    #[test]
    fn gives_up_after_bounded_attempts() {
        let got =
            wait_until_stable(scripted(vec![1, 2, 3, 4, 5]), Duration::ZERO, 4).expect("probe");
        assert_eq!(got, None);
    }

    #[test]
    fn probe_error_propagates() {
        assert!(wait_until_stable(scripted(vec![1]), Duration::ZERO, 3).is_err());
    }

    #[test]
    fn finished_file_is_stable() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("done.csv");
        fs::write(&path, "a,b\n1,2\n").expect("write");
        let cfg = StabilizeConfig {
            poll_interval_ms: 1,
            max_attempts: 3,
        };
        assert_eq!(stabilize(&path, &cfg).expect("stable"), 8);
    }

    #[test]
    fn vanished_file_is_source_missing() {
        let tmp = tempdir().expect("tempdir");
        let cfg = StabilizeConfig {
            poll_interval_ms: 1,
            max_attempts: 3,
        };
        let err = stabilize(&tmp.path().join("gone.csv"), &cfg).expect_err("missing");
        assert!(matches!(err, PipelineError::SourceMissing(_)));
    }

    #[test]
    fn other_poll_errors_keep_their_reason() {
        let path = Path::new("/inbox/locked.csv");
        let err = poll_failure(
            path,
            io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
        );
        let PipelineError::SourceUnreadable { reason, .. } = &err else {
            panic!("expected unreadable, got {err:?}");
        };
        assert_eq!(reason, "permission denied");
        assert_eq!(err.code().as_str(), "E009_SOURCE_UNREADABLE");
        assert!(!err.is_batch_fatal());

        let gone = poll_failure(path, io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(gone, PipelineError::SourceMissing(_)));
    }
}
