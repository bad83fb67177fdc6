pub mod add;
pub mod doctor;
pub mod init_project;
pub mod latest;
pub mod lineage;
pub mod record;
pub mod route;
pub mod status;

use crate::pipeline::ingest::BatchSummary;
use crate::pipeline::ledger::ManifestRow;
use crate::pipeline::paths::expand_home;
use crate::pipeline::util::short_digest;
use anyhow::Result;
use std::path::PathBuf;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }
}

/// One line per file (failures as issues), the abort reason if the batch
/// stopped early, then the summary counts.
pub fn report_batch(report: &mut CommandReport, summary: &BatchSummary) {
    for outcome in &summary.outcomes {
        if outcome.is_failure() {
            report.issue(outcome.describe());
        } else {
            report.detail(outcome.describe());
        }
    }
    if let Some(abort) = &summary.aborted {
        report.issue(abort.describe());
    }
    report.detail(summary.summary_line());
}

fn has_glob_meta(text: &str) -> bool {
    text.contains(['*', '?', '['])
}

/// Expand `~` and glob patterns the shell left unexpanded (quoted args).
/// Existing paths and plain names pass through untouched.
pub fn expand_inputs(raw: &[PathBuf], report: &mut CommandReport) -> Result<Vec<PathBuf>> {
    let mut out = Vec::with_capacity(raw.len());
    for path in raw {
        let expanded = expand_home(&path.to_string_lossy())?;
        let text = expanded.to_string_lossy().into_owned();
        if expanded.exists() || !has_glob_meta(&text) {
            out.push(expanded);
            continue;
        }
        let Ok(entries) = glob::glob(&text) else {
            out.push(expanded);
            continue;
        };
        let mut matched = entries.filter_map(|entry| entry.ok()).collect::<Vec<_>>();
        if matched.is_empty() {
            report.detail(format!("no files match pattern {text}"));
        }
        matched.sort();
        out.extend(matched);
    }
    Ok(out)
}

pub fn describe_row(row: &ManifestRow) -> String {
    let mut line = format!(
        "{} stage={} action={} name={} size={} sha256={}",
        row.timestamp,
        row.stage,
        row.action,
        row.original_name,
        row.size_bytes,
        short_digest(&row.checksum)
    );
    if !row.derived_from.is_empty() {
        line.push_str(&format!(" derived_from={}", short_digest(&row.derived_from)));
    }
    line.push_str(&format!(" path={}", row.path));
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ingest::BatchAbort;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn issue_flips_ok_and_merge_keeps_it() {
        let mut outer = CommandReport::new("route");
        let mut inner = CommandReport::new("route");
        inner.issue("failed /inbox/a.csv");
        outer.detail("routed 1 file(s)");
        outer.merge(inner);
        assert!(!outer.ok);
        assert_eq!(outer.details.len(), 1);
        assert_eq!(outer.issues, vec!["failed /inbox/a.csv".to_string()]);
    }

    #[test]
    fn aborted_batch_is_reported_as_an_issue_with_summary() {
        let summary = BatchSummary {
            aborted: Some(BatchAbort {
                position: 2,
                total: 2,
                source: "/inbox/b.csv".into(),
                code: Some("E004_LEDGER_LOCK_TIMEOUT"),
                message: "timed out".into(),
            }),
            ..BatchSummary::default()
        };
        let mut report = CommandReport::new("route");
        report_batch(&mut report, &summary);
        assert!(!report.ok);
        assert_eq!(
            report.issues,
            vec![
                "batch aborted at file 2 of 2 (/inbox/b.csv) code=E004_LEDGER_LOCK_TIMEOUT: timed out"
                    .to_string()
            ]
        );
        assert_eq!(
            report.details.last().map(String::as_str),
            Some("summary ingested=0 duplicates=0 failed=0")
        );
    }

    #[test]
    fn quoted_globs_expand_and_plain_paths_pass_through() {
        let tmp = tempdir().expect("tempdir");
        for name in ["b.csv", "a.csv", "notes.txt"] {
            fs::write(tmp.path().join(name), "x").expect("write");
        }
        let mut report = CommandReport::new("add");
        let got = expand_inputs(
            &[
                tmp.path().join("*.csv"),
                tmp.path().join("missing-*.xlsx"),
                tmp.path().join("notes.txt"),
                tmp.path().join("absent.csv"),
            ],
            &mut report,
        )
        .expect("expand");
        assert_eq!(
            got,
            vec![
                tmp.path().join("a.csv"),
                tmp.path().join("b.csv"),
                tmp.path().join("notes.txt"),
                tmp.path().join("absent.csv"),
            ]
        );
        assert!(report.ok);
        assert!(report.details[0].starts_with("no files match pattern"));
    }
}
