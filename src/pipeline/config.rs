use crate::error::PipelineError;
use crate::pipeline::naming;
use crate::pipeline::paths::{app_home, expand_home};
use anyhow::{Result, anyhow};
use chrono::{Local, TimeZone};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

const PLACEHOLDER: &str = "REPLACE_ME";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRuleConfig {
    pub pattern: String,
    pub project: String,
    pub subdir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub timestamp_format: String,
    pub slug_maxlen: usize,
    pub lower_ext: bool,
    pub preserve_basename: bool,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            timestamp_format: "%Y-%m-%dT%H%M%S".to_string(),
            slug_maxlen: 60,
            lower_ext: true,
            preserve_basename: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizeConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for StabilizeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_attempts: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub lock_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    pub downloads_dir: Option<PathBuf>,
    pub projects_base: PathBuf,
    pub routing: Vec<RoutingRuleConfig>,
    pub naming: NamingConfig,
    pub stabilize: StabilizeConfig,
    pub ledger: LedgerConfig,
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialPipelineConfig {
    downloads_dir: Option<String>,
    projects_base: Option<String>,
    routing: Option<Vec<RoutingRuleConfig>>,
    naming: Option<NamingConfig>,
    stabilize: Option<StabilizeConfig>,
    ledger: Option<LedgerConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_path(var: &str) -> Result<Option<PathBuf>> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(Some(expand_home(&v)?)),
        _ => Ok(None),
    }
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    PipelineError::ConfigInvalid(message.into()).into()
}

fn is_plain_relative(subdir: &str) -> bool {
    let path = Path::new(subdir);
    !subdir.trim().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// A project must be one directory name; a subdir must stay inside the project.
pub fn validate_target(project: &str, subdir: &str) -> std::result::Result<(), String> {
    let single = Path::new(project).components().count() == 1;
    if !is_plain_relative(project) || !single || project == "." {
        return Err(format!("project `{project}` must be a single directory name"));
    }
    if !is_plain_relative(subdir) {
        return Err(format!("subdir `{subdir}` must be relative without `..`"));
    }
    Ok(())
}

fn validate_rule(index: usize, rule: &RoutingRuleConfig) -> Result<()> {
    if rule.pattern.trim().is_empty()
        || rule.project.trim().is_empty()
        || rule.subdir.trim().is_empty()
    {
        return Err(invalid(format!(
            "routing[{index}] requires non-empty pattern, project and subdir"
        )));
    }
    validate_target(&rule.project, &rule.subdir)
        .map_err(|err| invalid(format!("routing[{index}]: {err}")))?;
    RegexBuilder::new(&rule.pattern)
        .case_insensitive(true)
        .build()
        .map_err(|err| invalid(format!("routing[{index}] pattern does not compile: {err}")))?;
    Ok(())
}

pub fn validate(cfg: &PipelineConfig) -> Result<()> {
    let base = cfg.projects_base.display().to_string();
    if base.trim().is_empty() {
        return Err(invalid("projects_base is not set"));
    }
    if base.contains(PLACEHOLDER) {
        return Err(invalid(format!(
            "projects_base still contains the {PLACEHOLDER} placeholder"
        )));
    }
    if let Some(downloads) = &cfg.downloads_dir
        && downloads.display().to_string().contains(PLACEHOLDER)
    {
        return Err(invalid(format!(
            "downloads_dir still contains the {PLACEHOLDER} placeholder"
        )));
    }
    for (index, rule) in cfg.routing.iter().enumerate() {
        validate_rule(index, rule)?;
    }
    if cfg.naming.slug_maxlen == 0 {
        return Err(invalid("naming.slug_maxlen must be >= 1"));
    }
    let sample = Local
        .with_ymd_and_hms(2000, 1, 2, 3, 4, 5)
        .single()
        .ok_or_else(|| anyhow!("failed to build sample timestamp"))?;
    let rendered = naming::format_timestamp(&cfg.naming.timestamp_format, &sample)
        .map_err(|err| invalid(format!("naming.timestamp_format: {err}")))?;
    if rendered.is_empty() || rendered.contains([':', '/', '\\']) {
        return Err(invalid(format!(
            "naming.timestamp_format must render a non-empty filesystem-safe stamp (got `{rendered}`)"
        )));
    }
    if cfg.stabilize.poll_interval_ms == 0 {
        return Err(invalid("stabilize.poll_interval_ms must be >= 1"));
    }
    if cfg.stabilize.max_attempts < 2 {
        return Err(invalid("stabilize.max_attempts must be >= 2"));
    }
    if cfg.ledger.lock_timeout_ms == 0 {
        return Err(invalid("ledger.lock_timeout_ms must be >= 1"));
    }
    Ok(())
}

fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(custom) = env::var("DATAPIPE_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return expand_home(trimmed);
        }
    }
    Ok(app_home()?.join("config.toml"))
}

fn merge_file_config(base: &mut PipelineConfig, path: &Path, required: bool) -> Result<()> {
    if !path.exists() {
        if required {
            return Err(invalid(format!("config file not found: {}", path.display())));
        }
        return Ok(());
    }

    let raw = fs::read_to_string(path)
        .map_err(|err| invalid(format!("failed to read {}: {err}", path.display())))?;
    let parsed: PartialPipelineConfig = toml::from_str(&raw)
        .map_err(|err| invalid(format!("failed to parse {}: {err}", path.display())))?;
    if let Some(downloads_dir) = parsed.downloads_dir
        && !downloads_dir.trim().is_empty()
    {
        base.downloads_dir = Some(expand_home(&downloads_dir)?);
    }
    if let Some(projects_base) = parsed.projects_base {
        base.projects_base = expand_home(&projects_base)?;
    }
    if let Some(routing) = parsed.routing {
        base.routing = routing;
    }
    if let Some(naming) = parsed.naming {
        base.naming = naming;
    }
    if let Some(stabilize) = parsed.stabilize {
        base.stabilize = stabilize;
    }
    if let Some(ledger) = parsed.ledger {
        base.ledger = ledger;
    }
    base.source_path = Some(path.to_path_buf());
    Ok(())
}

/// Load the config once: file first, then `DATAPIPE_*` overrides, then validation.
///
/// An explicitly requested file must exist; the default location is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    let mut cfg = PipelineConfig::default();
    let path = resolve_config_path(explicit)?;
    merge_file_config(&mut cfg, &path, explicit.is_some())?;

    if let Some(base) = env_path("DATAPIPE_PROJECTS_BASE")? {
        cfg.projects_base = base;
    }
    if let Some(downloads) = env_path("DATAPIPE_DOWNLOADS_DIR")? {
        cfg.downloads_dir = Some(downloads);
    }
    cfg.stabilize.poll_interval_ms =
        env_or_u64("DATAPIPE_STABILIZE_POLL_MS", cfg.stabilize.poll_interval_ms);
    cfg.stabilize.max_attempts =
        env_or_u32("DATAPIPE_STABILIZE_MAX_ATTEMPTS", cfg.stabilize.max_attempts);
    cfg.ledger.lock_timeout_ms =
        env_or_u64("DATAPIPE_LOCK_TIMEOUT_MS", cfg.ledger.lock_timeout_ms);

    validate(&cfg)?;
    Ok(cfg)
}
