//! Selective find/replace across several copies of one document.
//!
//! A scan records every literal occurrence of the search string in each
//! source. Decisions default to accepted and may be flipped per match, per
//! source or globally. Applying rewrites each source independently, replacing
//! accepted matches from the highest offset down so that earlier replacements
//! never move the offsets of matches that are still pending.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use lore_logging::lore_info;
use serde::{Deserialize, Serialize};

use crate::WordCounter;

pub type SourceId = String;

/// Characters of context captured on each side of a match by default.
pub const DEFAULT_CONTEXT_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Published,
    Draft,
    Version(u32),
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Published => f.write_str("published"),
            SourceKind::Draft => f.write_str("draft"),
            SourceKind::Version(n) => write!(f, "version {n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSource {
    pub id: SourceId,
    pub kind: SourceKind,
    pub text: String,
}

impl TextSource {
    pub fn new(id: impl Into<SourceId>, kind: SourceKind, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MatchId {
    pub source_id: SourceId,
    pub ordinal: usize,
}

impl MatchId {
    pub fn new(source_id: impl Into<SourceId>, ordinal: usize) -> Self {
        Self {
            source_id: source_id.into(),
            ordinal,
        }
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source_id, self.ordinal)
    }
}

/// One literal occurrence of the search string, frozen at scan time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchInstance {
    pub id: MatchId,
    pub source_id: SourceId,
    /// Byte offset into the source; always on a char boundary.
    pub position: usize,
    pub char_position: usize,
    pub context_before: String,
    pub matched_text: String,
    pub context_after: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceMatches {
    pub source_id: SourceId,
    pub kind: SourceKind,
    pub matches: Vec<MatchInstance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileScan {
    pub search: String,
    pub groups: Vec<SourceMatches>,
}

impl ReconcileScan {
    pub fn total_matches(&self) -> usize {
        self.groups.iter().map(|group| group.matches.len()).sum()
    }

    pub fn group(&self, source_id: &str) -> Option<&SourceMatches> {
        self.groups.iter().find(|group| group.source_id == source_id)
    }

    pub fn matches(&self) -> impl Iterator<Item = &MatchInstance> {
        self.groups.iter().flat_map(|group| group.matches.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("search text must not be empty")]
    EmptySearch,
    #[error("source {0} appears more than once")]
    DuplicateSource(SourceId),
    #[error("source {0} was not part of the scan")]
    UnknownSource(SourceId),
    #[error("match {0} was not part of the scan")]
    UnknownMatch(MatchId),
    #[error("source {source_id} changed since the scan (offset {position})")]
    StaleMatch { source_id: SourceId, position: usize },
}

/// Locate every non-overlapping occurrence of `search` in each source.
pub fn scan(
    sources: &[TextSource],
    search: &str,
    context_chars: usize,
) -> Result<ReconcileScan, ReconcileError> {
    if search.is_empty() {
        return Err(ReconcileError::EmptySearch);
    }
    let mut seen = HashSet::new();
    for source in sources {
        if !seen.insert(source.id.as_str()) {
            return Err(ReconcileError::DuplicateSource(source.id.clone()));
        }
    }

    let groups = sources
        .iter()
        .map(|source| SourceMatches {
            source_id: source.id.clone(),
            kind: source.kind,
            matches: scan_source(source, search, context_chars),
        })
        .collect();

    Ok(ReconcileScan {
        search: search.to_string(),
        groups,
    })
}

fn scan_source(source: &TextSource, search: &str, context_chars: usize) -> Vec<MatchInstance> {
    let text = source.text.as_str();
    let mut matches = Vec::new();
    let mut from = 0;
    let mut chars_before_from = 0;

    while let Some(relative) = text[from..].find(search) {
        let position = from + relative;
        let end = position + search.len();
        let char_position = chars_before_from + text[from..position].chars().count();

        matches.push(MatchInstance {
            id: MatchId::new(source.id.clone(), matches.len()),
            source_id: source.id.clone(),
            position,
            char_position,
            context_before: context_before(text, position, context_chars).to_string(),
            matched_text: text[position..end].to_string(),
            context_after: context_after(text, end, context_chars).to_string(),
        });

        chars_before_from = char_position + search.chars().count();
        from = end;
    }

    matches
}

fn context_before(text: &str, end: usize, width: usize) -> &str {
    let head = &text[..end];
    let start = head
        .char_indices()
        .rev()
        .take(width)
        .last()
        .map_or(end, |(index, _)| index);
    &head[start..]
}

fn context_after(text: &str, start: usize, width: usize) -> &str {
    let tail = &text[start..];
    let end = tail
        .char_indices()
        .nth(width)
        .map_or(tail.len(), |(index, _)| index);
    &tail[..end]
}

/// Accept/reject choice per match; everything starts accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileDecisions {
    accepted: BTreeMap<MatchId, bool>,
}

impl ReconcileDecisions {
    pub fn accept_all(scan: &ReconcileScan) -> Self {
        Self {
            accepted: scan.matches().map(|m| (m.id.clone(), true)).collect(),
        }
    }

    pub fn is_accepted(&self, id: &MatchId) -> bool {
        self.accepted.get(id).copied().unwrap_or(false)
    }

    pub fn set(&mut self, id: &MatchId, accepted: bool) -> Result<(), ReconcileError> {
        match self.accepted.get_mut(id) {
            Some(slot) => {
                *slot = accepted;
                Ok(())
            }
            None => Err(ReconcileError::UnknownMatch(id.clone())),
        }
    }

    /// Flip one match; returns its new state.
    pub fn toggle(&mut self, id: &MatchId) -> Result<bool, ReconcileError> {
        let accepted = !self.is_accepted(id);
        self.set(id, accepted)?;
        Ok(accepted)
    }

    /// Accept or reject every match of one source; returns how many matched.
    pub fn set_source(&mut self, source_id: &str, accepted: bool) -> usize {
        let mut touched = 0;
        for (_, slot) in self
            .accepted
            .iter_mut()
            .filter(|(id, _)| id.source_id == source_id)
        {
            *slot = accepted;
            touched += 1;
        }
        touched
    }

    pub fn set_all(&mut self, accepted: bool) {
        for slot in self.accepted.values_mut() {
            *slot = accepted;
        }
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.values().filter(|accepted| **accepted).count()
    }

    pub fn accepted_in(&self, source_id: &str) -> usize {
        self.accepted
            .iter()
            .filter(|(id, accepted)| **accepted && id.source_id == source_id)
            .count()
    }
}

/// A source that was actually rewritten by [`apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledSource {
    pub source_id: SourceId,
    pub kind: SourceKind,
    pub text: String,
    pub replaced: usize,
    pub word_count: u32,
}

/// Replace `search` at each of `positions` (byte offsets) in `text`.
///
/// Positions are applied from the highest down. Every position must still
/// hold `search` and must not overlap another; the offending position is
/// returned otherwise.
pub fn replace_at(
    text: &str,
    search: &str,
    replacement: &str,
    positions: &[usize],
) -> Result<String, usize> {
    let mut ordered = positions.to_vec();
    ordered.sort_unstable_by(|a, b| b.cmp(a));
    ordered.dedup();

    let mut rewritten = text.to_string();
    let mut floor = text.len();
    for position in ordered {
        let end = position + search.len();
        if end > floor || text.get(position..end) != Some(search) {
            return Err(position);
        }
        rewritten.replace_range(position..end, replacement);
        floor = position;
    }
    Ok(rewritten)
}

/// Apply the accepted matches of `scan` to `sources`.
///
/// Sources without an accepted match are left out of the result entirely;
/// only rewritten sources get a recomputed word count.
pub fn apply(
    sources: &[TextSource],
    scan: &ReconcileScan,
    decisions: &ReconcileDecisions,
    replacement: &str,
    counter: &dyn WordCounter,
) -> Result<Vec<ReconciledSource>, ReconcileError> {
    let mut rewritten = Vec::new();

    for group in &scan.groups {
        let positions: Vec<usize> = group
            .matches
            .iter()
            .filter(|m| decisions.is_accepted(&m.id))
            .map(|m| m.position)
            .collect();
        if positions.is_empty() {
            continue;
        }

        let source = sources
            .iter()
            .find(|source| source.id == group.source_id)
            .ok_or_else(|| ReconcileError::UnknownSource(group.source_id.clone()))?;
        let text = replace_at(&source.text, &scan.search, replacement, &positions).map_err(
            |position| ReconcileError::StaleMatch {
                source_id: source.id.clone(),
                position,
            },
        )?;

        rewritten.push(ReconciledSource {
            source_id: source.id.clone(),
            kind: source.kind,
            word_count: counter.count(&text),
            replaced: positions.len(),
            text,
        });
    }

    lore_info!(
        "reconciled '{}': {} of {} matches across {} rewritten sources",
        scan.search,
        decisions.accepted_count(),
        scan.total_matches(),
        rewritten.len()
    );
    Ok(rewritten)
}
