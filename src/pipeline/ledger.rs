use crate::error::PipelineError;
use crate::pipeline::config::validate_target;
use crate::pipeline::paths::ProjectPaths;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// Column order of `manifest.csv`. Downstream readers depend on it.
pub const MANIFEST_COLUMNS: [&str; 12] = [
    "project",
    "stage",
    "path",
    "timestamp",
    "original_name",
    "size_bytes",
    "checksum",
    "source",
    "notes",
    "action",
    "derived_from",
    "code_commit",
];

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Raw,
    Clean,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Clean => "clean",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Ingested,
    DuplicateSkipped,
    Saved,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingested => "ingested",
            Self::DuplicateSkipped => "duplicate_skipped",
            Self::Saved => "saved",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable manifest record. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub project: String,
    pub stage: Stage,
    pub path: String,
    #[serde(alias = "ts")]
    pub timestamp: String,
    #[serde(default)]
    pub original_name: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(alias = "sha256", default)]
    pub checksum: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub notes: String,
    pub action: Action,
    #[serde(default)]
    pub derived_from: String,
    #[serde(default)]
    pub code_commit: String,
}

/// ISO-8601 local time with microseconds and no offset, e.g. `2024-03-09T14:05:07.123456`.
pub fn manifest_timestamp<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn read_rows(path: &Path) -> Result<Vec<ManifestRow>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open {}", path.display()));
        }
    };
    let mut reader = csv::ReaderBuilder::new().flexible(false).from_reader(file);
    let mut out = Vec::new();
    for (index, record) in reader.deserialize::<ManifestRow>().enumerate() {
        let row = record.with_context(|| {
            format!(
                "failed to parse manifest row {} in {}",
                index + 1,
                path.display()
            )
        })?;
        out.push(row);
    }
    Ok(out)
}

fn find_first<'a>(
    rows: &'a [ManifestRow],
    checksum: &str,
    stage: Stage,
) -> Option<&'a ManifestRow> {
    if checksum.is_empty() {
        return None;
    }
    rows.iter()
        .find(|row| row.stage == stage && row.checksum == checksum)
}

fn encode_row(row: &ManifestRow, with_header: bool) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    if with_header {
        writer.write_record(MANIFEST_COLUMNS)?;
    }
    writer.serialize(row)?;
    writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("failed to flush manifest row: {}", err.error()))
}

/// Per-project append-only manifest.
///
/// Writers serialize through an advisory lock on a sidecar file and replace
/// the manifest atomically, so readers never need the lock.
#[derive(Debug, Clone)]
pub struct Ledger {
    paths: ProjectPaths,
    lock_timeout: Duration,
}

impl Ledger {
    /// `project` must be a single directory name so the manifest stays
    /// inside its own project directory.
    pub fn open(
        projects_base: &Path,
        project: &str,
        lock_timeout: Duration,
    ) -> Result<Self, PipelineError> {
        validate_target(project, ".").map_err(PipelineError::ConfigInvalid)?;
        Ok(Self {
            paths: ProjectPaths::new(projects_base, project),
            lock_timeout,
        })
    }

    pub fn manifest_path(&self) -> &Path {
        &self.paths.manifest_file
    }

    pub fn project_dir(&self) -> &Path {
        &self.paths.project_dir
    }

    pub fn read_all(&self) -> Result<Vec<ManifestRow>> {
        read_rows(&self.paths.manifest_file)
    }

    pub fn query_by_checksum(&self, checksum: &str, stage: Stage) -> Result<Option<ManifestRow>> {
        let rows = self.read_all()?;
        Ok(find_first(&rows, checksum, stage).cloned())
    }

    /// Take the exclusive writer lock, waiting at most the configured timeout.
    pub fn lock(&self) -> Result<LedgerGuard<'_>> {
        fs::create_dir_all(&self.paths.catalog_dir)
            .with_context(|| format!("failed to create {}", self.paths.catalog_dir.display()))?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.paths.lock_file)
            .with_context(|| format!("failed to open {}", self.paths.lock_file.display()))?;

        let started = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    return Ok(LedgerGuard { ledger: self, file });
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if started.elapsed() >= self.lock_timeout {
                        return Err(PipelineError::LedgerLockTimeout {
                            path: self.paths.lock_file.display().to_string(),
                            waited_ms: started.elapsed().as_millis() as u64,
                        }
                        .into());
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to lock {}", self.paths.lock_file.display())
                    });
                }
            }
        }
    }

    /// Lock, append one row, unlock.
    pub fn append(&self, row: &ManifestRow) -> Result<PathBuf> {
        let mut guard = self.lock()?;
        guard.append(row)
    }
}

/// Exclusive writer access to one project's manifest. The lock is released on drop.
#[derive(Debug)]
pub struct LedgerGuard<'a> {
    ledger: &'a Ledger,
    file: File,
}

impl LedgerGuard<'_> {
    pub fn read_all(&self) -> Result<Vec<ManifestRow>> {
        self.ledger.read_all()
    }

    pub fn query_by_checksum(&self, checksum: &str, stage: Stage) -> Result<Option<ManifestRow>> {
        self.ledger.query_by_checksum(checksum, stage)
    }

    /// Rewrite the manifest as `existing bytes + row` through a temp file that
    /// is renamed over the original.
    pub fn append(&mut self, row: &ManifestRow) -> Result<PathBuf> {
        let manifest = &self.ledger.paths.manifest_file;
        let catalog = &self.ledger.paths.catalog_dir;

        let existing = match fs::read(manifest) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", manifest.display()));
            }
        };
        let needs_header = existing.iter().all(u8::is_ascii_whitespace);

        let mut tmp = NamedTempFile::new_in(catalog)
            .with_context(|| format!("failed to create temp file in {}", catalog.display()))?;
        if !needs_header {
            tmp.write_all(&existing)?;
            if existing.last() != Some(&b'\n') {
                tmp.write_all(b"\n")?;
            }
        }
        tmp.write_all(&encode_row(row, needs_header)?)?;
        tmp.as_file().sync_all()?;

        match fs::metadata(manifest) {
            Ok(meta) => fs::set_permissions(tmp.path(), meta.permissions())?,
            Err(_) => set_default_permissions(tmp.path())?,
        }

        tmp.persist(manifest)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to replace {}", manifest.display()))?;
        Ok(manifest.clone())
    }
}

impl Drop for LedgerGuard<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(unix)]
fn set_default_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_default_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
