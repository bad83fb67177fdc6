use crate::error::PipelineError;
use crate::pipeline::audit;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::hasher::file_sha256;
use crate::pipeline::ledger::{Action, Ledger, ManifestRow, Stage, manifest_timestamp};
use crate::pipeline::paths::audit_log_path;
use crate::pipeline::util::short_digest;
use anyhow::{Result, bail};
use chrono::Local;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// A derived (clean-stage) file that a downstream step has already written
/// into the project.
#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub project: String,
    pub path: PathBuf,
    pub derived_from: String,
    pub code_commit: String,
    pub source: String,
    pub notes: String,
}

/// Append a `stage=clean, action=saved` row.
///
/// `derived_from` must name a checksum already present in the ledger; the
/// check runs under the writer lock so it sees every completed append.
pub fn record_derived(cfg: &PipelineConfig, request: &RecordRequest) -> Result<ManifestRow> {
    let ledger = Ledger::open(
        &cfg.projects_base,
        &request.project,
        Duration::from_millis(cfg.ledger.lock_timeout_ms),
    )?;

    let path = fs::canonicalize(&request.path)
        .map_err(|_| PipelineError::SourceMissing(request.path.display().to_string()))?;
    if !path.is_file() {
        return Err(PipelineError::SourceMissing(path.display().to_string()).into());
    }
    let project_dir = fs::canonicalize(ledger.project_dir()).unwrap_or_default();
    if !path.starts_with(&project_dir) || project_dir.as_os_str().is_empty() {
        bail!(
            "{} is not inside project {} ({})",
            path.display(),
            request.project,
            ledger.project_dir().display()
        );
    }

    let size_bytes = fs::metadata(&path)?.len();
    let checksum = file_sha256(&path)?;
    let derived_from = request.derived_from.trim().to_string();
    let path_str = path.display().to_string();

    let mut guard = ledger.lock()?;
    let rows = guard.read_all()?;
    if !derived_from.is_empty() && !rows.iter().any(|row| row.checksum == derived_from) {
        bail!(
            "derived_from {} does not match any checksum in {}",
            derived_from,
            ledger.manifest_path().display()
        );
    }
    if rows
        .iter()
        .any(|row| row.path == path_str && row.action != Action::DuplicateSkipped)
    {
        bail!("{path_str} is already recorded in the manifest");
    }

    let row = ManifestRow {
        project: request.project.clone(),
        stage: Stage::Clean,
        path: path_str,
        timestamp: manifest_timestamp(&Local::now()),
        original_name: path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size_bytes,
        checksum,
        source: request.source.clone(),
        notes: request.notes.trim().to_string(),
        action: Action::Saved,
        derived_from,
        code_commit: request.code_commit.trim().to_string(),
    };
    guard.append(&row)?;
    drop(guard);

    let message = format!("{} sha256={}", row.path, short_digest(&row.checksum));
    if let Err(err) = audit::append_event(&audit_log_path(&cfg.projects_base), "record", "saved", &message) {
        eprintln!("datapipe audit warning: {err:#}");
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, PipelineConfig, Ledger) {
        let tmp = tempdir().expect("tempdir");
        let base = tmp.path().join("projects");
        fs::create_dir_all(base.join("demo/data/clean")).expect("mkdir");
        let cfg = PipelineConfig {
            projects_base: base.clone(),
            ..PipelineConfig::default()
        };
        let ledger = Ledger::open(&base, "demo", Duration::from_secs(1)).expect("open ledger");
        ledger
            .append(&ManifestRow {
                project: "demo".into(),
                stage: Stage::Raw,
                path: base.join("demo/data/raw/raw.csv").display().to_string(),
                timestamp: "2024-01-01T00:00:00.000000".into(),
                original_name: "raw.csv".into(),
                size_bytes: 1,
                checksum: "rawdigest".into(),
                source: "manual".into(),
                notes: String::new(),
                action: Action::Ingested,
                derived_from: String::new(),
                code_commit: String::new(),
            })
            .expect("seed raw row");
        (tmp, cfg, ledger)
    }

    fn request(cfg: &PipelineConfig, derived_from: &str) -> RecordRequest {
        RecordRequest {
            project: "demo".into(),
            path: cfg.projects_base.join("demo/data/clean/clean.csv"),
            derived_from: derived_from.into(),
            code_commit: "abc1234".into(),
            source: "clean_survey.R".into(),
            notes: String::new(),
        }
    }

    #[test]
    fn saved_row_links_back_to_raw_checksum() {
        let (_tmp, cfg, ledger) = setup();
        fs::write(cfg.projects_base.join("demo/data/clean/clean.csv"), "y").expect("write");

        let row = record_derived(&cfg, &request(&cfg, "rawdigest")).expect("record");
        assert_eq!(row.stage, Stage::Clean);
        assert_eq!(row.action, Action::Saved);
        assert_eq!(row.derived_from, "rawdigest");
        assert_eq!(row.code_commit, "abc1234");

        let rows = ledger.read_all().expect("read");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], row);
    }

    #[test]
    fn unknown_parent_checksum_is_rejected() {
        let (_tmp, cfg, ledger) = setup();
        fs::write(cfg.projects_base.join("demo/data/clean/clean.csv"), "y").expect("write");

        let err = record_derived(&cfg, &request(&cfg, "nope")).expect_err("dangling parent");
        assert!(err.to_string().contains("does not match any checksum"));
        assert_eq!(ledger.read_all().expect("read").len(), 1);
    }

    #[test]
    fn same_path_cannot_be_recorded_twice() {
        let (_tmp, cfg, _ledger) = setup();
        fs::write(cfg.projects_base.join("demo/data/clean/clean.csv"), "y").expect("write");
        record_derived(&cfg, &request(&cfg, "rawdigest")).expect("first");
        let err = record_derived(&cfg, &request(&cfg, "rawdigest")).expect_err("second");
        assert!(err.to_string().contains("already recorded"));
    }

    #[test]
    fn files_outside_the_project_are_rejected() {
        let (tmp, cfg, _ledger) = setup();
        let outside = tmp.path().join("elsewhere.csv");
        fs::write(&outside, "z").expect("write");
        let mut req = request(&cfg, "rawdigest");
        req.path = outside;
        let err = record_derived(&cfg, &req).expect_err("outside");
        assert!(err.to_string().contains("is not inside project"));
    }

    #[test]
    fn parent_directory_as_project_is_config_invalid() {
        let (tmp, cfg, _ledger) = setup();
        let sibling = tmp.path().join("x.csv");
        fs::write(&sibling, "z").expect("write");
        let mut req = request(&cfg, "");
        req.project = "..".into();
        req.path = sibling;

        let err = record_derived(&cfg, &req).expect_err("escaping project");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ConfigInvalid(_))
        ));
        assert!(!tmp.path().join("catalog").exists());
    }
}
