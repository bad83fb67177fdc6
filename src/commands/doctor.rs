use anyhow::Result;
use std::env;
use std::path::Path;

use crate::commands::CommandReport;
use crate::pipeline::config::load_config;

include!(concat!(env!("OUT_DIR"), "/env_allowlist.rs"));

const ENV_PREFIX: &str = "DATAPIPE_";

fn unknown_env_keys<I>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out = keys
        .into_iter()
        .filter(|key| key.starts_with(ENV_PREFIX))
        .filter(|key| !GENERATED_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect::<Vec<_>>();
    out.sort();
    out
}

fn env_report() -> CommandReport {
    let mut report = CommandReport::new("doctor");
    for key in unknown_env_keys(env::vars_os().filter_map(|(k, _)| k.into_string().ok())) {
        report.issue(format!("unknown environment variable {key} (typo?)"));
    }
    report
}

pub fn run(config_path: Option<&Path>) -> Result<CommandReport> {
    let mut report = CommandReport::new("doctor");

    match load_config(config_path) {
        Ok(cfg) => {
            match &cfg.source_path {
                Some(path) => report.detail(format!("config={}", path.display())),
                None => report.detail("config=<defaults + environment>"),
            }
            report.detail(format!("projects_base={}", cfg.projects_base.display()));
            if !cfg.projects_base.is_dir() {
                report.issue(format!(
                    "projects_base does not exist: {}",
                    cfg.projects_base.display()
                ));
            }
            match &cfg.downloads_dir {
                Some(dir) if dir.is_dir() => {
                    report.detail(format!("downloads_dir={}", dir.display()))
                }
                Some(dir) => report.issue(format!("downloads_dir does not exist: {}", dir.display())),
                None => report.detail("downloads_dir=<unset> (route --from-downloads unavailable)"),
            }
            report.detail(format!("routing.rules={}", cfg.routing.len()));
            for (index, rule) in cfg.routing.iter().enumerate() {
                report.detail(format!(
                    "routing[{index}] pattern={} -> {}/{}",
                    rule.pattern, rule.project, rule.subdir
                ));
            }
            report.detail(format!(
                "naming.timestamp_format={} slug_maxlen={} lower_ext={} preserve_basename={}",
                cfg.naming.timestamp_format,
                cfg.naming.slug_maxlen,
                cfg.naming.lower_ext,
                cfg.naming.preserve_basename
            ));
        }
        Err(err) => report.issue(format!("{err:#}")),
    }

    report.merge(env_report());
    Ok(report)
}
