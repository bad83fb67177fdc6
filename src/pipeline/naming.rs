use crate::pipeline::config::NamingConfig;
use anyhow::{Result, anyhow};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeZone};
use deunicode::deunicode;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const FALLBACK_SLUG: &str = "file";
const LETTER_SUFFIXES: u32 = 26;

/// Render `at` with a strftime pattern, rejecting unknown specifiers instead of panicking.
pub fn format_timestamp<Tz>(pattern: &str, at: &DateTime<Tz>) -> Result<String>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let items = StrftimeItems::new(pattern).collect::<Vec<_>>();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(anyhow!("invalid strftime pattern `{pattern}`"));
    }
    let mut out = String::new();
    write!(out, "{}", at.format_with_items(items.iter()))
        .map_err(|_| anyhow!("strftime pattern `{pattern}` could not be rendered"))?;
    Ok(out)
}

/// Transliterate to ASCII, collapse every run of non-alphanumeric characters
/// into one `-`, cap the length and trim separators from both ends.
pub fn slugify(input: &str, max_len: usize, preserve_case: bool) -> String {
    let folded = deunicode(input);
    let mut out = String::with_capacity(folded.len());
    let mut prev_dash = false;
    for ch in folded.chars() {
        if ch.is_ascii_alphanumeric() {
            if preserve_case {
                out.push(ch);
            } else {
                out.push(ch.to_ascii_lowercase());
            }
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    // Output is pure ASCII, so byte slicing is char-safe.
    let capped = &trimmed[..trimmed.len().min(max_len)];
    capped.trim_end_matches('-').to_string()
}

fn split_original(original_name: &str) -> (String, Option<String>) {
    let path = Path::new(original_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|s| deunicode(&s.to_string_lossy()))
        .map(|s| s.chars().filter(char::is_ascii_alphanumeric).collect::<String>())
        .filter(|s| !s.is_empty());
    (stem, ext)
}

/// Canonical stored name: `TIMESTAMP_SLUG` plus an optional extension.
///
/// The extension is kept apart so collision suffixes never land inside a
/// timestamp that itself contains dots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalName {
    pub base: String,
    pub ext: Option<String>,
}

impl CanonicalName {
    pub fn file_name(&self) -> String {
        self.render(None)
    }

    fn render(&self, suffix: Option<&str>) -> String {
        let mut out = self.base.clone();
        if let Some(suffix) = suffix {
            out.push('-');
            out.push_str(suffix);
        }
        if let Some(ext) = &self.ext {
            out.push('.');
            out.push_str(ext);
        }
        out
    }
}

pub fn canonical_name<Tz>(
    original_name: &str,
    at: &DateTime<Tz>,
    cfg: &NamingConfig,
) -> Result<CanonicalName>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let (stem, ext) = split_original(original_name);
    let mut slug = slugify(&stem, cfg.slug_maxlen, cfg.preserve_basename);
    if slug.is_empty() {
        slug = FALLBACK_SLUG.to_string();
    }
    let stamp = format_timestamp(&cfg.timestamp_format, at)?;
    Ok(CanonicalName {
        base: format!("{stamp}_{slug}"),
        ext: ext.map(|ext| {
            if cfg.lower_ext {
                ext.to_ascii_lowercase()
            } else {
                ext
            }
        }),
    })
}

/// Collision suffix for the `attempt`-th retry: `a`..`z`, then `27`, `28`, ...
pub fn collision_suffix(attempt: u32) -> String {
    if attempt < LETTER_SUFFIXES {
        char::from(b'a' + attempt as u8).to_string()
    } else {
        (attempt + 1).to_string()
    }
}

/// First free path for `name` inside `dir`. Callers must hold the project
/// ledger lock so that the check and the subsequent move cannot interleave
/// with another writer.
pub fn resolve_collision(dir: &Path, name: &CanonicalName) -> PathBuf {
    let candidate = dir.join(name.file_name());
    if !candidate.exists() {
        return candidate;
    }
    let mut attempt = 0u32;
    loop {
        let candidate = dir.join(name.render(Some(&collision_suffix(attempt))));
        if !candidate.exists() {
            return candidate;
        }
        attempt += 1;
    }
}
