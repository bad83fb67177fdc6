use anyhow::Result;
use std::time::Duration;

use crate::commands::{CommandReport, describe_row};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::ledger::Ledger;
use crate::pipeline::query;

pub fn run(cfg: &PipelineConfig, project: &str, checksum: &str) -> Result<CommandReport> {
    let mut report = CommandReport::new("lineage");
    let ledger = Ledger::open(
        &cfg.projects_base,
        project,
        Duration::from_millis(cfg.ledger.lock_timeout_ms),
    )?;
    let rows = ledger.read_all()?;
    let lineage = query::lineage(&rows, checksum.trim());

    if lineage.chain.is_empty() {
        report.issue(format!("checksum {checksum} not found in project {project}"));
        return Ok(report);
    }
    for (depth, row) in lineage.chain.iter().enumerate() {
        report.detail(format!("depth={depth} {}", describe_row(row)));
    }
    if let Some(missing) = lineage.dangling {
        report.issue(format!("derived_from {missing} has no matching row"));
    }
    Ok(report)
}
