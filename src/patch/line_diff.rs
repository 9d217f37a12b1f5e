//! Line-level diff analysis and scoring.
//!
//! [`parse_diff`] extracts per-file changed line numbers from a unified diff.
//! [`evaluate_search`] and [`evaluate_diff`] score predicted locations or
//! edits against a reference diff.
//!
//! Line numbering follows the benchmark's historical scorer: input lines are
//! trimmed, and the text after a hunk header's closing `@@` occupies the
//! first line of the hunk. Scores are only comparable with numbers produced
//! the same way.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Changed lines of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChanges {
    /// Added line numbers, new-file numbering.
    pub addition: Vec<u32>,
    /// Deleted line numbers, old-file numbering.
    pub deletion: Vec<u32>,
    /// `(old_start, old_start + old_len)` per hunk.
    pub delete_windows: Vec<(u32, u32)>,
}

impl FileChanges {
    fn is_empty(&self) -> bool {
        self.addition.is_empty() && self.deletion.is_empty()
    }
}

/// Predicted edits for one file, as line numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictedChanges {
    #[serde(default)]
    pub addition: Vec<u32>,
    #[serde(default)]
    pub deletion: Vec<u32>,
}

/// A predicted search hit: file and half-open line window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchWindow {
    pub file: String,
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchScore {
    pub recall: f64,
    pub surplus_rate: f64,
    pub precision: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffScore {
    pub intersection: usize,
    pub union: usize,
    pub iou: f64,
}

fn header_path(line: &str, prefix: &str) -> Option<String> {
    let rest = line.strip_prefix(prefix)?.trim();
    // Drop a trailing timestamp (`--- a/x\t2020-01-01 ...`).
    let rest = rest.split('\t').next().unwrap_or(rest);
    if rest == "/dev/null" {
        return None;
    }
    let path = rest
        .strip_prefix("a/")
        .or_else(|| rest.strip_prefix("b/"))
        .unwrap_or(rest);
    Some(path.to_string())
}

/// Parse `-start,len` or `+start` into `(start, len)`; length defaults to 1.
fn parse_range(range: &str) -> Option<(u32, u32)> {
    let range = range.get(1..)?;
    match range.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

struct HunkHeader<'a> {
    old: (u32, u32),
    new_start: u32,
    trailing: &'a str,
}

fn parse_hunk_header(line: &str) -> Option<HunkHeader<'_>> {
    let mut parts = line.splitn(3, "@@");
    parts.next()?;
    let ranges = parts.next()?;
    let trailing = parts.next().unwrap_or("").trim();

    let mut ranges = ranges.split_whitespace();
    let old = parse_range(ranges.next()?)?;
    let (new_start, _) = parse_range(ranges.next()?)?;
    Some(HunkHeader {
        old,
        new_start,
        trailing,
    })
}

/// Extract changed line numbers per file from a unified diff.
///
/// Files with neither additions nor deletions are omitted.
pub fn parse_diff(diff: &str) -> BTreeMap<String, FileChanges> {
    let lines: Vec<&str> = diff.split('\n').map(str::trim).collect();
    let mut changes: BTreeMap<String, FileChanges> = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut old_line = 0u32;
    let mut new_line = 0u32;

    for (idx, raw) in lines.iter().enumerate() {
        let mut line = *raw;

        if line.starts_with("--- ")
            && lines.get(idx + 1).is_some_and(|next| next.starts_with("+++ "))
        {
            current = header_path(line, "--- ");
            if let Some(path) = &current {
                changes.entry(path.clone()).or_default();
            }
            continue;
        }
        if line.starts_with("+++ ") && idx > 0 && lines[idx - 1].starts_with("--- ") {
            if let Some(path) = header_path(line, "+++ ") {
                if !changes.contains_key(&path) {
                    changes.insert(path.clone(), FileChanges::default());
                    current = Some(path);
                }
            }
            continue;
        }

        if line.starts_with("@@") {
            let Some(header) = parse_hunk_header(line) else {
                continue;
            };
            let Some(file) = current.as_ref().and_then(|p| changes.get_mut(p)) else {
                continue;
            };
            let (old_start, old_len) = header.old;
            file.delete_windows.push((old_start, old_start + old_len));
            old_line = old_start;
            new_line = header.new_start;
            line = header.trailing;
        }

        let Some(file) = current.as_ref().and_then(|p| changes.get_mut(p)) else {
            continue;
        };
        if line.starts_with('+') {
            file.addition.push(new_line);
            new_line += 1;
        } else if line.starts_with('-') {
            file.deletion.push(old_line);
            old_line += 1;
        } else {
            old_line += 1;
            new_line += 1;
        }
    }

    changes.retain(|_, c| !c.is_empty());
    changes
}

/// Paths touched by a diff, in order of first appearance.
///
/// Takes the new-side path, or the old side for deletions.
pub fn files_touched(diff: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    let mut pending_old: Option<String> = None;

    for line in diff.lines() {
        if line.starts_with("--- ") {
            pending_old = header_path(line, "--- ");
        } else if line.starts_with("+++ ") {
            let path = header_path(line, "+++ ").or_else(|| pending_old.take());
            if let Some(p) = path {
                if !files.contains(&p) {
                    files.push(p);
                }
            }
            pending_old = None;
        }
    }
    files
}

/// Score predicted search windows against the delete windows of `diff`.
///
/// Predicted lines are counted once per reference window of the same file.
pub fn evaluate_search(diff: &str, predicted: &[SearchWindow]) -> SearchScore {
    let mut by_file: BTreeMap<&str, Vec<(u32, u32)>> = BTreeMap::new();
    for w in predicted {
        by_file.entry(w.file.as_str()).or_default().push((w.start, w.end));
    }

    let reference = parse_diff(diff);
    let mut actual_lines = 0u64;
    let mut predicted_lines = 0u64;
    let mut intersection = 0u64;

    for (file, windows) in &by_file {
        let Some(changes) = reference.get(*file) else {
            predicted_lines += windows
                .iter()
                .map(|(s, e)| u64::from(e.saturating_sub(*s)))
                .sum::<u64>();
            continue;
        };

        for &(dw_start, dw_end) in &changes.delete_windows {
            actual_lines += u64::from(dw_end.saturating_sub(dw_start));
            for &(sw_start, sw_end) in windows {
                predicted_lines += u64::from(sw_end.saturating_sub(sw_start));
                let lo = dw_start.max(sw_start);
                let hi = dw_end.min(sw_end);
                if lo < hi {
                    intersection += u64::from(hi - lo);
                }
            }
        }
    }

    let ratio = |num: u64, den: u64| if den > 0 { num as f64 / den as f64 } else { 0.0 };
    SearchScore {
        recall: ratio(intersection, actual_lines),
        surplus_rate: ratio(predicted_lines.saturating_sub(intersection), intersection),
        precision: ratio(intersection, predicted_lines),
    }
}

/// Intersection over union of predicted and actual changed lines.
pub fn evaluate_diff(diff: &str, predicted: &BTreeMap<String, PredictedChanges>) -> DiffScore {
    let actual = parse_diff(diff);
    let mut additions: BTreeMap<&str, BTreeSet<u32>> = BTreeMap::new();
    let mut deletions: BTreeMap<&str, BTreeSet<u32>> = BTreeMap::new();
    let mut intersection = 0usize;

    for (file, change) in predicted {
        let pred_add: BTreeSet<u32> = change.addition.iter().copied().collect();
        let pred_del: BTreeSet<u32> = change.deletion.iter().copied().collect();
        if let Some(act) = actual.get(file) {
            let act_add: BTreeSet<u32> = act.addition.iter().copied().collect();
            let act_del: BTreeSet<u32> = act.deletion.iter().copied().collect();
            intersection += act_add.intersection(&pred_add).count();
            intersection += act_del.intersection(&pred_del).count();
        }
        additions.entry(file.as_str()).or_default().extend(pred_add);
        deletions.entry(file.as_str()).or_default().extend(pred_del);
    }

    for (file, change) in &actual {
        additions
            .entry(file.as_str())
            .or_default()
            .extend(change.addition.iter().copied());
        deletions
            .entry(file.as_str())
            .or_default()
            .extend(change.deletion.iter().copied());
    }

    let union = additions.values().map(BTreeSet::len).sum::<usize>()
        + deletions.values().map(BTreeSet::len).sum::<usize>();
    DiffScore {
        intersection,
        union,
        iou: if union > 0 {
            intersection as f64 / union as f64
        } else {
            0.0
        },
    }
}

/// Predicted edits implied by a candidate diff, for [`evaluate_diff`].
pub fn predicted_from_diff(diff: &str) -> BTreeMap<String, PredictedChanges> {
    parse_diff(diff)
        .into_iter()
        .map(|(file, c)| {
            (
                file,
                PredictedChanges {
                    addition: c.addition,
                    deletion: c.deletion,
                },
            )
        })
        .collect()
}

/// Search windows implied by a candidate diff's hunks, for [`evaluate_search`].
pub fn windows_from_diff(diff: &str) -> Vec<SearchWindow> {
    parse_diff(diff)
        .into_iter()
        .flat_map(|(file, c)| {
            c.delete_windows
                .into_iter()
                .map(move |(start, end)| SearchWindow {
                    file: file.clone(),
                    start,
                    end,
                })
        })
        .collect()
}
