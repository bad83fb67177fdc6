use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, expand_inputs, report_batch};
use crate::error::PipelineError;
use crate::pipeline::config::{PipelineConfig, validate_target};
use crate::pipeline::ingest::{IngestRequest, Ingestor};

#[derive(Debug, Clone)]
pub struct AddOptions {
    pub paths: Vec<PathBuf>,
    pub project: String,
    pub subdir: String,
    pub source: String,
    pub notes: String,
}

pub fn run(cfg: &PipelineConfig, opts: &AddOptions) -> Result<CommandReport> {
    validate_target(&opts.project, &opts.subdir).map_err(PipelineError::ConfigInvalid)?;
    let mut report = CommandReport::new("add");
    report.detail(format!("project={} subdir={}", opts.project, opts.subdir));

    let paths = expand_inputs(&opts.paths, &mut report)?;
    let mut requests = Vec::with_capacity(paths.len());
    for path in &paths {
        if path.is_dir() {
            report.detail(format!("skipping directory {}", path.display()));
            continue;
        }
        requests.push(IngestRequest {
            source: path.clone(),
            project: opts.project.clone(),
            subdir: opts.subdir.clone(),
            source_label: opts.source.clone(),
            notes: opts.notes.clone(),
        });
    }

    if requests.is_empty() {
        report.issue("no files to ingest");
        return Ok(report);
    }

    let summary = Ingestor::new(cfg).ingest_batch(&requests);
    report_batch(&mut report, &summary);
    Ok(report)
}
