//! Segment tree builder: nest units by the strength of their boundaries.
//!
//! Adjacent units whose join level is higher cohere more strongly and end up
//! deeper in the tree. The builder never looks ahead more than one item: it
//! reads through a [`Recoverable`] stream and hands items back whenever it
//! reads past the end of the group it is collecting.
//!
//! ```text
//! join:      2     0     2
//! units:  u0 ── u1 ── u2 ── u3
//!
//! tree:   S0 ─┬─ S2 ─┬─ u0
//!             │      └─ u1
//!             └─ S2 ─┬─ u2
//!                    └─ u3
//! ```
//!
//! Once built, the root's children are emitted as atomic items for the
//! window grouper; children larger than the token ceiling are split first.

use crate::incision::{Incision, FLOOR_LEVEL};
use crate::pipeline::recover::Recoverable;
use crate::unit::TextUnit;
use std::cmp::Ordering;
use tracing::debug;

/// A leaf unit or a nested segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Unit(TextUnit),
    Segment(Segment),
}

/// Internal tree node grouping children that cohere at `level`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Join level shared by adjacent children. For segments produced by
    /// splitting an oversized parent this is a lower bound.
    pub level: i32,
    pub tokens: usize,
    pub start_incision: Incision,
    pub end_incision: Incision,
    pub children: Vec<Item>,
}

impl Segment {
    pub fn new(level: i32, children: Vec<Item>) -> Self {
        let tokens = children.iter().map(Item::tokens).sum();
        let start_incision = children
            .first()
            .map_or(Incision::Impossible, Item::start_incision);
        let end_incision = children
            .last()
            .map_or(Incision::Impossible, Item::end_incision);
        Self {
            level,
            tokens,
            start_incision,
            end_incision,
            children,
        }
    }
}

impl Item {
    pub fn tokens(&self) -> usize {
        match self {
            Item::Unit(u) => u.tokens,
            Item::Segment(s) => s.tokens,
        }
    }

    pub fn start_incision(&self) -> Incision {
        match self {
            Item::Unit(u) => u.start_incision,
            Item::Segment(s) => s.start_incision,
        }
    }

    pub fn end_incision(&self) -> Incision {
        match self {
            Item::Unit(u) => u.end_incision,
            Item::Segment(s) => s.end_incision,
        }
    }

    /// Leaf units in document order.
    pub fn leaves(&self) -> Vec<&TextUnit> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a TextUnit>) {
        match self {
            Item::Unit(u) => out.push(u),
            Item::Segment(s) => {
                for child in &s.children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    pub fn first_index(&self) -> usize {
        match self {
            Item::Unit(u) => u.index,
            Item::Segment(s) => s.children.first().map_or(0, Item::first_index),
        }
    }

    pub fn last_index(&self) -> usize {
        match self {
            Item::Unit(u) => u.index,
            Item::Segment(s) => s.children.last().map_or(0, Item::last_index),
        }
    }
}

/// Build the full segment tree. `None` for an empty stream.
pub fn build_tree<I>(units: I) -> Option<Item>
where
    I: IntoIterator<Item = TextUnit>,
{
    let mut stream = Recoverable::new(units.into_iter().map(Item::Unit));
    let mut children = collect_level(&mut stream, FLOOR_LEVEL);
    match children.len() {
        0 => None,
        1 => children.pop(),
        _ => Some(Item::Segment(Segment::new(FLOOR_LEVEL, children))),
    }
}

/// Collect siblings joined at exactly `level`; deeper runs become sub-segments.
fn collect_level<I>(stream: &mut Recoverable<I>, level: i32) -> Vec<Item>
where
    I: Iterator<Item = Item>,
{
    let Some(first) = stream.get() else {
        return Vec::new();
    };
    let mut children = vec![first];

    while let Some(item) = stream.get() {
        let last = children.len() - 1;
        let join = Incision::join(children[last].end_incision(), item.start_incision());
        match join.cmp(&level) {
            Ordering::Less => {
                stream.recover(item);
                break;
            }
            Ordering::Greater => {
                let prev = children.remove(last);
                stream.recover(item);
                stream.recover(prev);
                let sub = collect_level(stream, join);
                children.push(wrap(join, sub));
            }
            Ordering::Equal => children.push(item),
        }
    }
    children
}

fn wrap(level: i32, mut items: Vec<Item>) -> Item {
    if items.len() == 1 {
        if let Some(item) = items.pop() {
            return item;
        }
    }
    Item::Segment(Segment::new(level, items))
}

/// Segment the stream and emit top-level items no larger than `max_tokens`.
///
/// Only a single atomic unit that on its own exceeds `max_tokens` is emitted
/// oversized; the request stage clips it.
pub fn build_segments<I>(units: I, max_tokens: usize) -> Vec<Item>
where
    I: IntoIterator<Item = TextUnit>,
{
    let top = match build_tree(units) {
        None => return Vec::new(),
        Some(Item::Segment(root)) if root.level == FLOOR_LEVEL => root.children,
        Some(other) => vec![other],
    };

    let mut out = Vec::with_capacity(top.len());
    for child in top {
        match child {
            Item::Segment(seg) if seg.tokens > max_tokens => {
                let tokens = seg.tokens;
                let pieces = split_segment(seg, max_tokens);
                debug!(
                    "Split segment of {} tokens into {} items (ceiling {})",
                    tokens,
                    pieces.len(),
                    max_tokens
                );
                out.extend(pieces);
            }
            Item::Segment(seg) if seg.children.len() == 1 => {
                out.extend(seg.children);
            }
            other => out.push(other),
        }
    }
    out
}

/// Split an oversized segment into token-bounded groups, depth first.
fn split_segment(seg: Segment, max_tokens: usize) -> Vec<Item> {
    let level = seg.level;
    let mut pieces = Vec::with_capacity(seg.children.len());
    for child in seg.children {
        match child {
            Item::Segment(inner) if inner.tokens > max_tokens => {
                pieces.extend(split_segment(inner, max_tokens));
            }
            other => pieces.push(other),
        }
    }

    let mut out = Vec::new();
    let mut group: Vec<Item> = Vec::new();
    let mut sum = 0usize;
    for piece in pieces {
        if !group.is_empty() && sum + piece.tokens() > max_tokens {
            out.push(wrap(level, std::mem::take(&mut group)));
            sum = 0;
        }
        sum += piece.tokens();
        group.push(piece);
    }
    if !group.is_empty() {
        out.push(wrap(level, group));
    }
    out
}
