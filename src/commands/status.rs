use anyhow::Result;
use std::time::Duration;

use crate::commands::{CommandReport, describe_row};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::ledger::{Ledger, Stage};
use crate::pipeline::query::{RowFilter, recent};

#[derive(Debug, Clone)]
pub struct StatusOptions {
    pub project: String,
    pub stage: Option<Stage>,
    pub limit: usize,
}

pub fn run(cfg: &PipelineConfig, opts: &StatusOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("status");
    let ledger = Ledger::open(
        &cfg.projects_base,
        &opts.project,
        Duration::from_millis(cfg.ledger.lock_timeout_ms),
    )?;
    report.detail(format!("project={}", opts.project));
    report.detail(format!("manifest={}", ledger.manifest_path().display()));

    if !ledger.manifest_path().exists() {
        report.detail("no manifest yet (nothing ingested)");
        return Ok(report);
    }

    let rows = ledger.read_all()?;
    let filter = RowFilter {
        project: None,
        stage: opts.stage,
    };
    let shown = recent(&rows, &filter, opts.limit);
    report.detail(format!("total_entries={}", rows.len()));
    report.detail(format!("showing={}", shown.len()));
    for row in &shown {
        report.detail(describe_row(row));
    }
    Ok(report)
}
