use anyhow::Result;

use crate::commands::CommandReport;
use crate::error::PipelineError;
use crate::pipeline::config::{PipelineConfig, validate_target};
use crate::pipeline::paths::ProjectPaths;
use crate::pipeline::query::latest_matching;

pub fn run(
    cfg: &PipelineConfig,
    project: &str,
    subdir: &str,
    pattern: &str,
) -> Result<CommandReport> {
    validate_target(project, subdir).map_err(PipelineError::ConfigInvalid)?;
    let mut report = CommandReport::new("latest");
    let dir = ProjectPaths::new(&cfg.projects_base, project)
        .project_dir
        .join(subdir);
    if !dir.is_dir() {
        report.issue(format!("directory not found: {}", dir.display()));
        return Ok(report);
    }
    match latest_matching(&dir, pattern)? {
        Some(path) => report.detail(path.display().to_string()),
        None => report.issue(format!("no file in {} matches `{pattern}`", dir.display())),
    }
    Ok(report)
}
