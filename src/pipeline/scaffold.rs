use crate::error::PipelineError;
use crate::pipeline::config::validate_target;
use crate::pipeline::paths::{MANIFEST_RELATIVE_PATH, ProjectPaths};
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};

const PROJECT_DIRS: [&str; 3] = ["data/raw", "data/clean", "catalog"];
const GITKEEP: &str = "# Placeholder to preserve directory structure\n";

fn render_readme(name: &str) -> String {
    format!(
        "# {name}\n\n\
         Research project managed by the datapipe ingest pipeline.\n\n\
         ## Directory Structure\n\n\
         - `data/raw/`: raw files, populated by `datapipe add` / `datapipe route`\n\
         - `data/clean/`: cleaned files, registered with `datapipe record`\n\
         - `{MANIFEST_RELATIVE_PATH}`: append-only provenance manifest\n"
    )
}

/// Create a new project skeleton. Returns every path created.
pub fn init_project(projects_base: &Path, name: &str) -> Result<Vec<PathBuf>> {
    validate_target(name, ".").map_err(PipelineError::ConfigInvalid)?;
    let paths = ProjectPaths::new(projects_base, name);
    if paths.project_dir.exists() {
        bail!(
            "project `{name}` already exists at {}",
            paths.project_dir.display()
        );
    }

    let mut created = Vec::new();
    for dir in PROJECT_DIRS {
        let path = paths.project_dir.join(dir);
        fs::create_dir_all(&path).with_context(|| format!("failed to create {}", path.display()))?;
        created.push(path.clone());
        let keep = path.join(".gitkeep");
        fs::write(&keep, GITKEEP).with_context(|| format!("failed to write {}", keep.display()))?;
    }

    let readme = paths.project_dir.join("README.md");
    fs::write(&readme, render_readme(name))
        .with_context(|| format!("failed to write {}", readme.display()))?;
    created.push(readme);
    Ok(created)
}
