use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

pub const MANIFEST_RELATIVE_PATH: &str = "catalog/manifest.csv";
const STATE_DIR_NAME: &str = ".datapipe";

#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub project_dir: PathBuf,
    pub catalog_dir: PathBuf,
    pub manifest_file: PathBuf,
    pub lock_file: PathBuf,
}

impl ProjectPaths {
    pub fn new(projects_base: &Path, project: &str) -> Self {
        let project_dir = projects_base.join(project);
        let manifest_file = project_dir.join(MANIFEST_RELATIVE_PATH);
        let catalog_dir = manifest_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project_dir.clone());
        let lock_file = manifest_file.with_extension("csv.lock");
        Self {
            project_dir,
            catalog_dir,
            manifest_file,
            lock_file,
        }
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

/// Expand a leading `~/` (or a bare `~`) against the home directory.
pub fn expand_home(raw: &str) -> Result<PathBuf> {
    let trimmed = raw.trim();
    if trimmed == "~" {
        return required_home_dir();
    }
    if let Some(rest) = trimmed.strip_prefix("~/") {
        return Ok(required_home_dir()?.join(rest));
    }
    Ok(PathBuf::from(trimmed))
}

/// Per-user directory holding the default config and `.env`.
pub fn app_home() -> Result<PathBuf> {
    match env::var("DATAPIPE_HOME") {
        Ok(v) if !v.trim().is_empty() => Ok(PathBuf::from(v.trim())),
        _ => Ok(required_home_dir()?.join(STATE_DIR_NAME)),
    }
}

pub fn audit_log_path(projects_base: &Path) -> PathBuf {
    projects_base.join(STATE_DIR_NAME).join("audit.log")
}
