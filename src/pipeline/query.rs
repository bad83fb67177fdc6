use crate::pipeline::ledger::{Action, ManifestRow, Stage};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use regex::RegexBuilder;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, Default)]
pub struct RowFilter<'a> {
    pub project: Option<&'a str>,
    pub stage: Option<Stage>,
}

impl RowFilter<'_> {
    fn matches(&self, row: &ManifestRow) -> bool {
        self.project.is_none_or(|p| row.project == p) && self.stage.is_none_or(|s| row.stage == s)
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

fn compare_timestamps(a: &str, b: &str) -> Ordering {
    match (parse_timestamp(a), parse_timestamp(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Newest rows first, at most `limit`. Rows with equal timestamps keep
/// reverse append order.
pub fn recent(rows: &[ManifestRow], filter: &RowFilter<'_>, limit: usize) -> Vec<ManifestRow> {
    let mut selected = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| filter.matches(row))
        .collect::<Vec<_>>();
    selected.sort_by(|(ia, a), (ib, b)| {
        compare_timestamps(&b.timestamp, &a.timestamp).then_with(|| ib.cmp(ia))
    });
    selected
        .into_iter()
        .take(limit)
        .map(|(_, row)| row.clone())
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct Lineage {
    /// The requested file first, then each ancestor.
    pub chain: Vec<ManifestRow>,
    /// A `derived_from` value that no row in the ledger carries.
    pub dangling: Option<String>,
}

fn stored_row<'a>(rows: &'a [ManifestRow], checksum: &str) -> Option<&'a ManifestRow> {
    rows.iter()
        .rev()
        .find(|row| row.checksum == checksum && row.action != Action::DuplicateSkipped)
}

/// Follow `derived_from` links from the newest stored row with `checksum`.
pub fn lineage(rows: &[ManifestRow], checksum: &str) -> Lineage {
    let mut out = Lineage::default();
    if checksum.is_empty() {
        return out;
    }
    let mut seen = BTreeSet::new();
    let mut next = checksum.to_string();
    loop {
        if !seen.insert(next.clone()) {
            break;
        }
        let Some(row) = stored_row(rows, &next) else {
            if !out.chain.is_empty() {
                out.dangling = Some(next);
            }
            break;
        };
        out.chain.push(row.clone());
        if row.derived_from.is_empty() {
            break;
        }
        next = row.derived_from.clone();
    }
    out
}

fn modified_epoch_nanos(path: &Path) -> u128 {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .unwrap_or(UNIX_EPOCH)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Most recently modified regular file in `dir` whose name matches `pattern`
/// (case-insensitive search).
pub fn latest_matching(dir: &Path, pattern: &str) -> Result<Option<PathBuf>> {
    let re = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("invalid file pattern `{pattern}`"))?;
    let mut latest: Option<(u128, PathBuf)> = None;
    let read_dir =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;

    for entry in read_dir {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !re.is_match(name) {
            continue;
        }
        let modified = modified_epoch_nanos(&path);
        match &latest {
            Some((best, best_path)) if (modified, &path) <= (*best, best_path) => {}
            _ => latest = Some((modified, path)),
        }
    }

    Ok(latest.map(|(_, p)| p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn row(ts: &str, stage: Stage, action: Action, checksum: &str, derived_from: &str) -> ManifestRow {
        ManifestRow {
            project: "demo".into(),
            stage,
            path: format!("/p/{checksum}-{ts}"),
            timestamp: ts.into(),
            original_name: format!("{checksum}.csv"),
            size_bytes: 1,
            checksum: checksum.into(),
            source: "manual".into(),
            notes: String::new(),
            action,
            derived_from: derived_from.into(),
            code_commit: String::new(),
        }
    }

    #[test]
    fn recent_orders_newest_first_filters_and_limits() {
        let rows = vec![
            row("2024-01-01T10:00:00.000000", Stage::Raw, Action::Ingested, "a", ""),
            row("2024-01-03T10:00:00.000000", Stage::Clean, Action::Saved, "c", "a"),
            row("2024-01-02T10:00:00.000000", Stage::Raw, Action::Ingested, "b", ""),
        ];
        let all = recent(&rows, &RowFilter::default(), 10);
        let order = all.iter().map(|r| r.checksum.as_str()).collect::<Vec<_>>();
        assert_eq!(order, vec!["c", "b", "a"]);

        let raw_only = recent(
            &rows,
            &RowFilter {
                stage: Some(Stage::Raw),
                ..RowFilter::default()
            },
            1,
        );
        assert_eq!(raw_only.len(), 1);
        assert_eq!(raw_only[0].checksum, "b");

        let other = recent(
            &rows,
            &RowFilter {
                project: Some("other"),
                ..RowFilter::default()
            },
            10,
        );
        assert!(other.is_empty());
    }

    #[test]
    fn recent_breaks_ties_by_append_order() {
        let ts = "2024-01-01T10:00:00.000000";
        let rows = vec![
            row(ts, Stage::Raw, Action::Ingested, "first", ""),
            row(ts, Stage::Raw, Action::Ingested, "second", ""),
        ];
        let got = recent(&rows, &RowFilter::default(), 10);
        assert_eq!(got[0].checksum, "second");
        assert_eq!(got[1].checksum, "first");
    }

    #[test]
    fn lineage_walks_back_to_raw() {
        let rows = vec![
            row("2024-01-01T10:00:00.000000", Stage::Raw, Action::Ingested, "raw", ""),
            row("2024-01-01T11:00:00.000000", Stage::Raw, Action::DuplicateSkipped, "raw", ""),
            row("2024-01-02T10:00:00.000000", Stage::Clean, Action::Saved, "mid", "raw"),
            row("2024-01-03T10:00:00.000000", Stage::Clean, Action::Saved, "top", "mid"),
        ];
        let got = lineage(&rows, "top");
        let chain = got.chain.iter().map(|r| r.checksum.as_str()).collect::<Vec<_>>();
        assert_eq!(chain, vec!["top", "mid", "raw"]);
        assert_eq!(got.chain[2].action, Action::Ingested);
        assert!(got.dangling.is_none());
    }

    #[test]
    fn lineage_reports_dangling_parent_and_survives_cycles() {
        let rows = vec![row("2024-01-02T10:00:00.000000", Stage::Clean, Action::Saved, "x", "ghost")];
        let got = lineage(&rows, "x");
        assert_eq!(got.chain.len(), 1);
        assert_eq!(got.dangling.as_deref(), Some("ghost"));

        let cyclic = vec![
            row("2024-01-02T10:00:00.000000", Stage::Clean, Action::Saved, "p", "q"),
            row("2024-01-02T11:00:00.000000", Stage::Clean, Action::Saved, "q", "p"),
        ];
        assert_eq!(lineage(&cyclic, "p").chain.len(), 2);
        assert!(lineage(&cyclic, "unknown").chain.is_empty());
    }

    #[test]
    fn latest_matching_picks_newest_matching_file() {
        let tmp = tempdir().expect("tempdir");
        let old = tmp.path().join("2024-01-01T000000_survey.csv");
        let new = tmp.path().join("2024-02-01T000000_survey.csv");
        let other = tmp.path().join("2024-03-01T000000_prices.csv");
        fs::write(&old, "1").expect("write");
        std::thread::sleep(Duration::from_millis(20));
        fs::write(&new, "2").expect("write");
        std::thread::sleep(Duration::from_millis(20));
        fs::write(&other, "3").expect("write");

        let got = latest_matching(tmp.path(), "SURVEY").expect("scan");
        assert_eq!(got, Some(new));
        assert_eq!(latest_matching(tmp.path(), r"\.parquet$").expect("scan"), None);
        assert!(latest_matching(tmp.path(), "(").is_err());
    }
}
