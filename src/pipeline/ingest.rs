use crate::error::PipelineError;
use crate::pipeline::audit;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::hasher::file_sha256;
use crate::pipeline::ledger::{Action, Ledger, LedgerGuard, ManifestRow, Stage, manifest_timestamp};
use crate::pipeline::naming::{canonical_name, resolve_collision};
use crate::pipeline::paths::audit_log_path;
use crate::pipeline::stabilize::stabilize;
use crate::pipeline::util::short_digest;
use crate::pipeline::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-file progress. `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    Discovered,
    Stabilizing,
    Hashing,
    DedupCheck,
    Skipped,
    Naming,
    Moving,
    Recorded,
    Done,
    Failed,
}

impl IngestState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Stabilizing => "stabilizing",
            Self::Hashing => "hashing",
            Self::DedupCheck => "dedup_check",
            Self::Skipped => "skipped",
            Self::Naming => "naming",
            Self::Moving => "moving",
            Self::Recorded => "recorded",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub source: PathBuf,
    pub project: String,
    pub subdir: String,
    pub source_label: String,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    Ingested {
        row: ManifestRow,
    },
    Duplicate {
        row: ManifestRow,
        source: String,
    },
    Failed {
        source: String,
        project: String,
        failed_at: IngestState,
        code: &'static str,
        message: String,
    },
}

impl FileOutcome {
    /// One human-readable line for CLI output.
    pub fn describe(&self) -> String {
        match self {
            Self::Ingested { row } => format!(
                "ingested {} -> {} sha256={}",
                row.original_name,
                row.path,
                short_digest(&row.checksum)
            ),
            Self::Duplicate { row, source } => format!(
                "duplicate_skipped {source} (same content as {}) sha256={}",
                row.path,
                short_digest(&row.checksum)
            ),
            Self::Failed {
                source,
                failed_at,
                code,
                message,
                ..
            } => format!("failed {source} at={failed_at} code={code}: {message}"),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Why a batch stopped early. Files before `position` keep their outcomes.
#[derive(Debug, Clone, Serialize)]
pub struct BatchAbort {
    pub position: usize,
    pub total: usize,
    pub source: String,
    pub code: Option<&'static str>,
    pub message: String,
}

impl BatchAbort {
    pub fn describe(&self) -> String {
        let mut line = format!(
            "batch aborted at file {} of {} ({})",
            self.position, self.total, self.source
        );
        if let Some(code) = self.code {
            line.push_str(&format!(" code={code}"));
        }
        line.push_str(&format!(": {}", self.message));
        line
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub ingested: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub outcomes: Vec<FileOutcome>,
    pub aborted: Option<BatchAbort>,
}

impl BatchSummary {
    fn push(&mut self, outcome: FileOutcome) {
        match &outcome {
            FileOutcome::Ingested { .. } => self.ingested += 1,
            FileOutcome::Duplicate { .. } => self.duplicates += 1,
            FileOutcome::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn summary_line(&self) -> String {
        format!(
            "summary ingested={} duplicates={} failed={}",
            self.ingested, self.duplicates, self.failed
        )
    }
}

fn move_failure(from: &Path, to: &Path, reason: impl fmt::Display) -> PipelineError {
    PipelineError::MoveFailure {
        from: from.display().to_string(),
        to: to.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Rename when possible; across filesystems copy, verify the digest, then
/// delete the source.
fn move_file(from: &Path, to: &Path, checksum: &str) -> Result<(), PipelineError> {
    match fs::rename(from, to) {
        Ok(_) => Ok(()),
        Err(rename_err)
            if matches!(
                rename_err.kind(),
                ErrorKind::CrossesDevices | ErrorKind::PermissionDenied
            ) =>
        {
            fs::copy(from, to).map_err(|err| move_failure(from, to, err))?;
            let copied = match file_sha256(to) {
                Ok(digest) => digest,
                Err(err) => {
                    let _ = fs::remove_file(to);
                    return Err(move_failure(from, to, err));
                }
            };
            if copied != checksum {
                let _ = fs::remove_file(to);
                return Err(move_failure(from, to, "copied content does not match source digest"));
            }
            fs::remove_file(from).map_err(|err| move_failure(from, to, err))?;
            Ok(())
        }
        Err(rename_err) => Err(move_failure(from, to, rename_err)),
    }
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Drives files through stabilize -> hash -> dedup -> name -> move -> record.
pub struct Ingestor<'a> {
    cfg: &'a PipelineConfig,
    clock: fn() -> DateTime<Local>,
}

impl<'a> Ingestor<'a> {
    pub fn new(cfg: &'a PipelineConfig) -> Self {
        Self {
            cfg,
            clock: Local::now,
        }
    }

    pub fn with_clock(cfg: &'a PipelineConfig, clock: fn() -> DateTime<Local>) -> Self {
        Self { cfg, clock }
    }

    fn ledger(&self, project: &str) -> Result<Ledger, PipelineError> {
        Ledger::open(
            &self.cfg.projects_base,
            project,
            Duration::from_millis(self.cfg.ledger.lock_timeout_ms),
        )
    }

    /// Process files in order. Per-file failures are collected; a failure
    /// of a shared resource (ledger lock, manifest I/O) stops the batch and
    /// is recorded in `aborted` next to the outcomes gathered so far.
    pub fn ingest_batch(&self, requests: &[IngestRequest]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for (index, request) in requests.iter().enumerate() {
            match self.ingest_file(request) {
                Ok(outcome) => summary.push(outcome),
                Err(err) => {
                    let abort = BatchAbort {
                        position: index + 1,
                        total: requests.len(),
                        source: request.source.display().to_string(),
                        code: err.downcast_ref::<PipelineError>().map(|e| e.code().as_str()),
                        message: format!("{err:#}"),
                    };
                    let log = audit_log_path(&self.cfg.projects_base);
                    if let Err(audit_err) =
                        audit::append_event(&log, "ingest", "aborted", &abort.describe())
                    {
                        eprintln!("datapipe audit warning: {audit_err:#}");
                    }
                    summary.aborted = Some(abort);
                    break;
                }
            }
        }
        summary
    }

    pub fn ingest_file(&self, request: &IngestRequest) -> Result<FileOutcome> {
        let mut state = IngestState::Discovered;
        let outcome = match self.run(request, &mut state) {
            Ok(outcome) => outcome,
            Err(err) => {
                let Some(per_file) = err
                    .downcast_ref::<PipelineError>()
                    .filter(|e| !e.is_batch_fatal())
                else {
                    return Err(err);
                };
                let source = request.source.display().to_string();
                let code = per_file.code().as_str();
                let message = per_file.to_string();
                warn::emit(WarnEvent {
                    code,
                    stage: state.as_str(),
                    project: &request.project,
                    file: &source,
                    reason: "file-failed",
                    err: &message,
                });
                FileOutcome::Failed {
                    source,
                    project: request.project.clone(),
                    failed_at: state,
                    code,
                    message,
                }
            }
        };
        self.audit(&outcome);
        Ok(outcome)
    }

    fn audit(&self, outcome: &FileOutcome) {
        let status = match outcome {
            FileOutcome::Ingested { .. } => Action::Ingested.as_str(),
            FileOutcome::Duplicate { .. } => Action::DuplicateSkipped.as_str(),
            FileOutcome::Failed { .. } => IngestState::Failed.as_str(),
        };
        let log = audit_log_path(&self.cfg.projects_base);
        if let Err(err) = audit::append_event(&log, "ingest", status, &outcome.describe()) {
            eprintln!("datapipe audit warning: {err:#}");
        }
    }

    fn run(&self, request: &IngestRequest, state: &mut IngestState) -> Result<FileOutcome> {
        let source = request.source.as_path();
        if !source.is_file() {
            return Err(PipelineError::SourceMissing(source.display().to_string()).into());
        }
        let source_abs = absolute(source);
        if source_abs.starts_with(absolute(&self.cfg.projects_base)) {
            return Err(PipelineError::SourceRejected(source_abs.display().to_string()).into());
        }
        let original_name = file_name_of(&source_abs);

        *state = IngestState::Stabilizing;
        let size_bytes = stabilize(&source_abs, &self.cfg.stabilize)?;

        *state = IngestState::Hashing;
        let checksum = file_sha256(&source_abs)?;

        *state = IngestState::DedupCheck;
        let ledger = self.ledger(&request.project)?;
        let mut guard = ledger.lock()?;
        if let Some(existing) = guard.query_by_checksum(&checksum, Stage::Raw)? {
            *state = IngestState::Skipped;
            let row = self.duplicate_row(request, &source_abs, &existing, size_bytes);
            guard.append(&row)?;
            *state = IngestState::Done;
            return Ok(FileOutcome::Duplicate {
                row,
                source: source_abs.display().to_string(),
            });
        }

        *state = IngestState::Naming;
        let row = self.store_new(
            &mut guard,
            request,
            &source_abs,
            &original_name,
            size_bytes,
            checksum,
            state,
        )?;
        *state = IngestState::Done;
        Ok(FileOutcome::Ingested { row })
    }

    fn duplicate_row(
        &self,
        request: &IngestRequest,
        source_abs: &Path,
        existing: &ManifestRow,
        size_bytes: u64,
    ) -> ManifestRow {
        let mut notes = format!(
            "duplicate of {}; source left at {}",
            existing.path,
            source_abs.display()
        );
        if !request.notes.trim().is_empty() {
            notes.push_str("; ");
            notes.push_str(request.notes.trim());
        }
        ManifestRow {
            project: request.project.clone(),
            stage: Stage::Raw,
            path: existing.path.clone(),
            timestamp: manifest_timestamp(&(self.clock)()),
            original_name: file_name_of(source_abs),
            size_bytes,
            checksum: existing.checksum.clone(),
            source: request.source_label.clone(),
            notes,
            action: Action::DuplicateSkipped,
            derived_from: String::new(),
            code_commit: String::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn store_new(
        &self,
        guard: &mut LedgerGuard<'_>,
        request: &IngestRequest,
        source_abs: &Path,
        original_name: &str,
        size_bytes: u64,
        checksum: String,
        state: &mut IngestState,
    ) -> Result<ManifestRow> {
        let now = (self.clock)();
        let target_dir = self.ledger(&request.project)?.project_dir().join(&request.subdir);
        fs::create_dir_all(&target_dir).map_err(|err| move_failure(source_abs, &target_dir, err))?;
        // Resolve only after the directory exists so every row stores the same real path.
        let dest_dir =
            fs::canonicalize(&target_dir).map_err(|err| move_failure(source_abs, &target_dir, err))?;
        let name = canonical_name(original_name, &now, &self.cfg.naming)?;
        let dest = resolve_collision(&dest_dir, &name);

        *state = IngestState::Moving;
        move_file(source_abs, &dest, &checksum)?;

        *state = IngestState::Recorded;
        let row = ManifestRow {
            project: request.project.clone(),
            stage: Stage::Raw,
            path: dest.display().to_string(),
            timestamp: manifest_timestamp(&now),
            original_name: original_name.to_string(),
            size_bytes,
            checksum,
            source: request.source_label.clone(),
            notes: request.notes.trim().to_string(),
            action: Action::Ingested,
            derived_from: String::new(),
            code_commit: String::new(),
        };
        guard
            .append(&row)
            .with_context(|| format!("{} was moved but not recorded", dest.display()))?;
        Ok(row)
    }
}
