use anyhow::Result;

use crate::commands::CommandReport;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::scaffold;

pub fn run(cfg: &PipelineConfig, name: &str) -> Result<CommandReport> {
    let mut report = CommandReport::new("init-project");
    let created = scaffold::init_project(&cfg.projects_base, name)?;
    report.detail(format!(
        "project={name} location={}",
        cfg.projects_base.join(name).display()
    ));
    for path in created {
        report.detail(format!("created {}", path.display()));
    }
    Ok(report)
}
