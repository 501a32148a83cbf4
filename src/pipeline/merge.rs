//! Cross-window deduplicator and merger.
//!
//! Consecutive windows see overlapping context, so the model may render the
//! same logical fragment twice: once at the end of window N (a paragraph that
//! runs into the next unit, declared with `to="…"`) and again in window N+1,
//! or as an echo of head context. The merger walks the windows in order and
//! stitches each window onto the tail end of the merged stream.
//!
//! A fragment of the new window is a counterpart of a tail-end fragment when
//! both have the same tag, their index spans overlap (same index, or a span
//! declared with `to`) and one normalised text contains the other. Each new
//! fragment is paired with at most one tail-end fragment: the one with the
//! closest span, then the longest text, so a short heading never claims the
//! paragraph that starts with its words. Each tail-end fragment and its
//! counterparts are put to a containment vote: the one variant no other
//! variant contains wins and takes the position of the first occurrence. If
//! several variants survive the vote the merge fails with
//! [`InciseError::AmbiguousDuplicate`]; it never guesses.
//!
//! Citation references are reference-counted in a [`CitationLedger`]. Every
//! fragment that enters retains its refs, every fragment that loses a vote or
//! is dropped as an echo releases them, so a citation shared by two merged
//! duplicates is counted once and disappears only when its count hits zero.

use crate::error::InciseError;
use crate::pipeline::group::PageRange;
use crate::pipeline::response::{Fragment, FragmentKind};
use crate::xml::{Element, Node};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// The parsed reply of one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowOutput {
    pub range: PageRange,
    pub fragments: Vec<Fragment>,
}

/// A local problem the merger recovered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeIssue {
    /// The counterpart of a fragment was an asset; its duplicate chain was
    /// abandoned and both renderings kept.
    StructuralMismatch { index: usize, window: PageRange },
    /// A citation id is referenced but no window defined it.
    MissingCitation { id: u32 },
}

/// A resolved citation definition and its live reference count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub id: u32,
    pub element: Element,
    pub refs: usize,
}

/// The merged, deduplicated result of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub fragments: Vec<Fragment>,
    pub citations: Vec<Citation>,
    pub issues: Vec<MergeIssue>,
}

impl Document {
    pub fn citation(&self, id: u32) -> Option<&Citation> {
        self.citations.iter().find(|c| c.id == id)
    }

    pub fn to_element(&self) -> Element {
        let mut root = Element::new("document");
        root.children.extend(
            self.fragments
                .iter()
                .map(|f| Node::Element(f.element.clone())),
        );
        if !self.citations.is_empty() {
            let mut list = Element::new("citations");
            for c in &self.citations {
                list = list.with_child(c.element.clone().with_attr("refs", c.refs));
            }
            root = root.with_child(list);
        }
        root
    }

    pub fn to_xml(&self) -> String {
        self.to_element().to_xml()
    }
}

/// Reference counts and definition variants per citation id.
#[derive(Debug, Default)]
pub struct CitationLedger {
    counts: BTreeMap<u32, usize>,
    definitions: BTreeMap<u32, Vec<Fragment>>,
}

impl CitationLedger {
    pub fn retain(&mut self, refs: &[u32]) {
        for &id in refs {
            *self.counts.entry(id).or_default() += 1;
        }
    }

    pub fn release(&mut self, refs: &[u32]) {
        for &id in refs {
            match self.counts.get_mut(&id) {
                Some(n) if *n > 0 => *n -= 1,
                _ => warn!("Citation {} released more often than retained", id),
            }
        }
    }

    /// Record one rendering of a citation definition.
    pub fn define(&mut self, fragment: Fragment) {
        if let FragmentKind::Citation(id) = fragment.kind {
            self.definitions.entry(id).or_default().push(fragment);
        }
    }

    pub fn count(&self, id: u32) -> usize {
        self.counts.get(&id).copied().unwrap_or(0)
    }

    /// Elect one definition per live id. Ids with a zero count are dropped.
    pub fn resolve(self) -> Result<(Vec<Citation>, Vec<MergeIssue>), InciseError> {
        let mut citations = Vec::new();
        let mut issues = Vec::new();
        let mut definitions = self.definitions;

        for (&id, &refs) in self.counts.iter().filter(|&(_, &n)| n > 0) {
            let Some(mut variants) = definitions.remove(&id) else {
                warn!("Citation {} is referenced {} times but never defined", id, refs);
                issues.push(MergeIssue::MissingCitation { id });
                continue;
            };
            let texts: Vec<String> = variants.iter().map(Fragment::normalized_text).collect();
            let winner = elect(&texts).map_err(|candidates| InciseError::AmbiguousDuplicate {
                what: format!("citation {id}"),
                index: variants[0].index,
                candidates,
            })?;
            let element = variants.swap_remove(winner).element;
            citations.push(Citation { id, element, refs });
        }
        for id in definitions.keys() {
            debug!("Dropping unreferenced citation {}", id);
        }
        Ok((citations, issues))
    }
}

/// Containment vote. Returns the index of the unique maximal variant, or the
/// number of maximal variants when there is more than one.
///
/// A variant is beaten by any other variant that contains it and is longer,
/// or is equal to it and appears earlier.
pub fn elect(texts: &[String]) -> Result<usize, usize> {
    let maximal: Vec<usize> = (0..texts.len())
        .filter(|&i| {
            let t = texts[i].as_str();
            !texts
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && other.contains(t) && (other != t || j < i))
        })
        .collect();
    match maximal.as_slice() {
        [only] => Ok(*only),
        many => Err(many.len()),
    }
}

fn related(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

fn check_sequence(outputs: &[WindowOutput]) -> Result<(), InciseError> {
    for pair in outputs.windows(2) {
        let (previous, next) = (pair[0].range, pair[1].range);
        if next.begin <= previous.end || next.end < next.begin {
            return Err(InciseError::WindowSequence { previous, next });
        }
    }
    Ok(())
}

/// Merge all window outputs, in ordinal order, into one document.
pub fn merge(outputs: Vec<WindowOutput>) -> Result<Document, InciseError> {
    check_sequence(&outputs)?;

    let mut merged: Vec<Fragment> = Vec::new();
    let mut ledger = CitationLedger::default();
    let mut issues = Vec::new();

    for output in outputs {
        let range = output.range;
        let mut incoming: Vec<Option<Fragment>> = Vec::with_capacity(output.fragments.len());
        for fragment in output.fragments {
            match fragment.kind {
                FragmentKind::Citation(_) => ledger.define(fragment),
                FragmentKind::Text | FragmentKind::Asset => {
                    ledger.retain(&fragment.refs);
                    incoming.push(Some(fragment));
                }
            }
        }

        stitch(&mut merged, &mut incoming, range, &mut ledger, &mut issues)?;

        for fragment in incoming.into_iter().flatten() {
            if fragment.touches(range.begin, range.end) {
                merged.push(fragment);
            } else {
                debug!(
                    "Window {}: dropping context echo <{}> at index {}",
                    range, fragment.element.tag, fragment.index
                );
                ledger.release(&fragment.refs);
            }
        }
    }

    let (citations, missing) = ledger.resolve()?;
    issues.extend(missing);
    Ok(Document {
        fragments: merged,
        citations,
        issues,
    })
}

/// How closely `fragment` covers the same units as `anchor`; higher is closer.
fn span_affinity(anchor: &Fragment, fragment: &Fragment) -> u8 {
    match (
        fragment.index == anchor.index,
        fragment.span_end == anchor.span_end,
    ) {
        (true, true) => 2,
        (true, false) => 1,
        _ => 0,
    }
}

/// Pair every incoming text fragment with at most one anchor in
/// `merged[start..]`.
fn pair_counterparts(
    merged: &[Fragment],
    start: usize,
    anchors: &[String],
    incoming: &[Option<Fragment>],
    texts: &[String],
) -> Vec<Option<usize>> {
    incoming
        .iter()
        .zip(texts)
        .map(|(fragment, text)| {
            let fragment = fragment.as_ref().filter(|f| f.is_text())?;
            let mut best: Option<(usize, (u8, usize))> = None;
            for (offset, anchor) in merged[start..].iter().enumerate() {
                let anchor_text = &anchors[offset];
                if !anchor.is_text()
                    || anchor.element.tag != fragment.element.tag
                    || !fragment.touches(anchor.index, anchor.span_end)
                    || !related(anchor_text, text)
                {
                    continue;
                }
                let score = (span_affinity(anchor, fragment), anchor_text.len());
                if best.is_none_or(|(_, b)| score > b) {
                    best = Some((start + offset, score));
                }
            }
            best.map(|(pos, _)| pos)
        })
        .collect()
}

/// Deduplicate the tail end of `merged` against a new window's fragments.
fn stitch(
    merged: &mut [Fragment],
    incoming: &mut [Option<Fragment>],
    range: PageRange,
    ledger: &mut CitationLedger,
    issues: &mut Vec<MergeIssue>,
) -> Result<(), InciseError> {
    let low = incoming
        .iter()
        .flatten()
        .map(|f| f.index)
        .min()
        .map_or(range.begin, |i| i.min(range.begin));
    let start = merged
        .iter()
        .rposition(|f| f.span_end < low)
        .map_or(0, |p| p + 1);

    let anchors: Vec<String> = merged[start..]
        .iter()
        .map(Fragment::normalized_text)
        .collect();
    let texts: Vec<String> = incoming
        .iter()
        .map(|f| f.as_ref().map(Fragment::normalized_text).unwrap_or_default())
        .collect();
    let owners = pair_counterparts(merged, start, &anchors, incoming, &texts);

    for pos in start..merged.len() {
        if !merged[pos].is_text() {
            continue;
        }
        let anchor = &anchors[pos - start];
        let (begin, end) = (merged[pos].index, merged[pos].span_end);

        let mut found: Vec<usize> = Vec::new();
        let mut mismatch = false;
        for (slot, fragment) in incoming.iter().enumerate() {
            let Some(fragment) = fragment else { continue };
            if fragment.index > end {
                break;
            }
            if fragment.is_asset()
                && fragment.touches(begin, end)
                && related(anchor, &texts[slot])
            {
                mismatch = found.is_empty();
                break;
            }
            if owners[slot] == Some(pos) {
                found.push(slot);
            }
        }

        if mismatch {
            warn!(
                "Window {}: counterpart of fragment at index {} is an asset, keeping both",
                range, begin
            );
            issues.push(MergeIssue::StructuralMismatch {
                index: begin,
                window: range,
            });
            continue;
        }
        if found.is_empty() {
            continue;
        }

        let mut variants = vec![merged[pos].clone()];
        variants.extend(found.iter().filter_map(|&slot| incoming[slot].take()));
        let variant_texts: Vec<String> =
            variants.iter().map(Fragment::normalized_text).collect();
        let winner = elect(&variant_texts).map_err(|candidates| InciseError::AmbiguousDuplicate {
            what: format!("fragment <{}>", merged[pos].element.tag),
            index: begin,
            candidates,
        })?;
        debug!(
            "Window {}: merged {} renderings of index {} (variant {} kept)",
            range,
            variants.len(),
            begin,
            winner
        );
        for (i, variant) in variants.into_iter().enumerate() {
            if i == winner {
                merged[pos] = variant;
            } else {
                ledger.release(&variant.refs);
            }
        }
    }
    Ok(())
}
