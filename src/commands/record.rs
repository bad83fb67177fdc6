use anyhow::Result;

use crate::commands::{CommandReport, describe_row};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::record::{RecordRequest, record_derived};

pub fn run(cfg: &PipelineConfig, request: &RecordRequest) -> Result<CommandReport> {
    let mut report = CommandReport::new("record");
    let row = record_derived(cfg, request)?;
    report.detail(format!("recorded {}", describe_row(&row)));
    Ok(report)
}
