//! Path pattern router (spec §4.7): a compiled regex table exposing a
//! synthetic directory tree over a flat photo index (`media/by-year/2013`,
//! `album/<title>`, `upload/<sub>…`, and so on).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;

use crate::album::AlbumIndex;
use crate::error::{Error, Result};
use crate::vfs::{DirEntry, DirectoryEntry};

/// Adapter hook for rows whose listing can't be derived from the path alone
/// (album contents, search results, …). Captures are handed over already
/// owned so the call can cross an `await` freely.
#[async_trait]
pub trait EntryLister: Send + Sync {
    async fn list(&self, captures: &[Option<String>], prefix: &str) -> Result<Vec<DirEntry>>;
}

/// One compiled row of the path table (spec §3 `PathPattern`).
pub struct PathPatternRow {
    pub name: &'static str,
    pub regex: Regex,
    pub is_file: bool,
    pub can_mkdir: bool,
    pub can_upload: bool,
    pub is_upload: bool,
    pub to_entries: Option<Arc<dyn EntryLister>>,
}

/// The result of a successful match: the row plus its capture groups,
/// owned so callers can hold them across an `await`.
pub struct Matched<'a> {
    pub row: &'a PathPatternRow,
    pub captures: Vec<Option<String>>,
}

/// Compiled table + matcher (spec §4.7: "at most one pattern matches any
/// given (absolute path, isFile) pair").
pub struct PathRouter {
    rows: Vec<PathPatternRow>,
}

impl PathRouter {
    pub fn new(rows: Vec<PathPatternRow>) -> Self {
        Self { rows }
    }

    /// Normalizes `root`+`path` and returns the unique matching row.
    pub fn match_path(&self, root: &str, path: &str, is_file: bool) -> Option<Matched<'_>> {
        let full = join_trimmed(root, path);
        for row in &self.rows {
            if row.is_file != is_file {
                continue;
            }
            if let Some(caps) = row.regex.captures(&full) {
                let owned = caps
                    .iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_string()))
                    .collect();
                return Some(Matched { row, captures: owned });
            }
        }
        None
    }
}

fn join_trimmed(root: &str, path: &str) -> String {
    let root = root.trim_matches('/');
    let path = path.trim_matches('/');
    match (root.is_empty(), path.is_empty()) {
        (true, true) => String::new(),
        (true, false) => path.to_string(),
        (false, true) => root.to_string(),
        (false, false) => format!("{root}/{path}"),
    }
}

fn blank_dir(name: String) -> DirEntry {
    DirEntry::Directory(DirectoryEntry { name, ..Default::default() })
}

/// One directory per integer year from `start_year` through the current
/// year (spec §4.7).
pub fn years(start_year: i32) -> Vec<DirEntry> {
    let current = Utc::now().year();
    (start_year..=current).map(|y| blank_dir(y.to_string())).collect()
}

/// 12 "YYYY-MM" directories for the captured year.
pub fn months(year: i32) -> Vec<DirEntry> {
    (1..=12u32).map(|m| blank_dir(format!("{year:04}-{m:02}"))).collect()
}

/// Every day of `year` in "YYYY-MM-DD" form, handling leap years via
/// calendar arithmetic rather than a fixed 28/30/31 table.
pub fn days(year: i32) -> Vec<DirEntry> {
    let Some(mut date) = NaiveDate::from_ymd_opt(year, 1, 1) else { return Vec::new() };
    let mut out = Vec::new();
    while date.year() == year {
        out.push(blank_dir(date.format("%Y-%m-%d").to_string()));
        let Some(next) = date.succ_opt() else { break };
        date = next;
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct YearMonthDayFilter {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

/// Parses 1–3 captures (year, month, day) into a search filter, validating
/// each field independently (spec §4.7).
pub fn year_month_day_filter(captures: &[Option<String>]) -> Result<YearMonthDayFilter> {
    let mut filter = YearMonthDayFilter::default();
    if let Some(Some(y)) = captures.first() {
        let year: i32 = y.parse().map_err(|_| Error::BadYear(y.clone()))?;
        if !(1000..=3000).contains(&year) {
            return Err(Error::BadYear(y.clone()));
        }
        filter.year = Some(year);
    }
    if let Some(Some(m)) = captures.get(1) {
        let month: u32 = m.parse().map_err(|_| Error::BadMonth(m.clone()))?;
        if !(1..=12).contains(&month) {
            return Err(Error::BadMonth(m.clone()));
        }
        filter.month = Some(month);
    }
    if let Some(Some(d)) = captures.get(2) {
        let day: u32 = d.parse().map_err(|_| Error::BadDay(d.clone()))?;
        if !(1..=31).contains(&day) {
            return Err(Error::BadDay(d.clone()));
        }
        filter.day = Some(day);
    }
    Ok(filter)
}

/// Composes subdirectory entries (album titles that are parents of other
/// titles) with file entries from one album's contents (spec §4.7).
/// Returns `DirNotFound` if neither a subdirectory nor an album matches.
pub async fn albums_to_entries(
    index: &AlbumIndex,
    path_title: &str,
    contents: &dyn EntryLister,
) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    let mut matched = false;

    if let Some(children) = index.get_dirs(path_title) {
        matched = true;
        entries.extend(children.into_iter().map(blank_dir));
    }

    if let Some(album) = index.get(path_title) {
        matched = true;
        entries.extend(contents.list(&[Some(album.id.clone())], path_title).await?);
    }

    if !matched {
        return Err(Error::DirNotFound(path_title.to_string()));
    }
    Ok(entries)
}
