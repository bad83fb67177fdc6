use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::commands::{CommandReport, expand_inputs, report_batch};
use crate::error::PipelineError;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::ingest::{IngestRequest, Ingestor};
use crate::pipeline::router::Router;

#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub paths: Vec<PathBuf>,
    pub from_downloads: bool,
}

fn downloads_files(cfg: &PipelineConfig) -> Result<Vec<PathBuf>> {
    let Some(dir) = cfg.downloads_dir.as_ref() else {
        return Err(PipelineError::ConfigInvalid("downloads_dir is not set".to_string()).into());
    };
    if !dir.is_dir() {
        return Err(PipelineError::ConfigInvalid(format!(
            "downloads_dir does not exist: {}",
            dir.display()
        ))
        .into());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Route every file first; a single unmatched name aborts before anything moves.
fn plan(router: &Router, files: &[PathBuf], source_label: &str) -> Result<Vec<IngestRequest>> {
    let mut requests = Vec::with_capacity(files.len());
    let mut unmatched = Vec::new();
    for file in files {
        let name = file
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match router.route(&name) {
            Some(target) => requests.push(IngestRequest {
                source: file.clone(),
                project: target.project.clone(),
                subdir: target.subdir.clone(),
                source_label: source_label.to_string(),
                notes: String::new(),
            }),
            None => unmatched.push(file.display().to_string()),
        }
    }
    if !unmatched.is_empty() {
        return Err(PipelineError::NoRouteMatched(unmatched.join(", ")).into());
    }
    Ok(requests)
}

pub fn run(cfg: &PipelineConfig, opts: &RouteOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("route");
    let router = Router::new(&cfg.routing)?;
    if router.is_empty() {
        return Err(PipelineError::NoRouteMatched("no routing rules configured".to_string()).into());
    }
    report.detail(format!("routing.rules={}", router.len()));

    let (files, source_label) = if opts.from_downloads {
        (downloads_files(cfg)?, "downloads")
    } else {
        let files = expand_inputs(&opts.paths, &mut report)?
            .into_iter()
            .filter(|p| !p.is_dir())
            .collect::<Vec<_>>();
        (files, "routed")
    };

    if files.is_empty() {
        if opts.from_downloads || !opts.paths.is_empty() {
            report.detail("no files to route");
        } else {
            report.issue("no files specified; pass paths or use --from-downloads");
        }
        return Ok(report);
    }

    let requests = plan(&router, &files, source_label)?;
    for request in &requests {
        report.detail(format!(
            "route {} -> {}/{}",
            request.source.display(),
            request.project,
            request.subdir
        ));
    }

    let summary = Ingestor::new(cfg).ingest_batch(&requests);
    report_batch(&mut report, &summary);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::RoutingRuleConfig;

    fn router() -> Router {
        Router::new(&[RoutingRuleConfig {
            pattern: r"^acs_.*\.csv$".into(),
            project: "census".into(),
            subdir: "data/raw".into(),
        }])
        .expect("router")
    }

    #[test]
    fn plan_maps_each_file_to_its_project() {
        let files = vec![PathBuf::from("/inbox/acs_2020.csv"), PathBuf::from("/inbox/ACS_2021.CSV")];
        let requests = plan(&router(), &files, "downloads").expect("plan");
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.project == "census" && r.source_label == "downloads"));
    }

    #[test]
    fn plan_fails_fast_when_any_file_is_unrouted() {
        let files = vec![PathBuf::from("/inbox/acs_2020.csv"), PathBuf::from("/inbox/notes.txt")];
        let err = plan(&router(), &files, "routed").expect_err("unrouted");
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::NoRouteMatched(names)) => assert!(names.contains("notes.txt")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
