//! Window grouper: cut the item stream into head/body/tail request windows.
//!
//! ## Buffers
//!
//! Each window owns three buffers with independent token ceilings:
//!
//! ```text
//!  ┌──────── head ────────┬──────────── body ────────────┬──── tail ────┐
//!  │ replayed from the    │ new content this window is   │ look-ahead,  │
//!  │ previous window      │ responsible for              │ re-read next │
//!  └──────────────────────┴──────────────────────────────┴──────────────┘
//! ```
//!
//! Items are appended head → body → tail. A buffer that already holds an item
//! seals itself as soon as the next candidate would overflow it; an empty
//! buffer always accepts, so an oversized atomic item can never starve the
//! grouper. When every buffer refuses, the window is emitted, the refused item
//! and the tail go back onto the stream, and the next window's head is seeded
//! with the trailing items of `head ++ body`.

use crate::error::InciseError;
use crate::pipeline::recover::Recoverable;
use crate::pipeline::segment::Item;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Inclusive range of source unit indices covered by a window body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageRange {
    pub begin: usize,
    pub end: usize,
}

impl PageRange {
    pub const fn new(begin: usize, end: usize) -> Self {
        Self { begin, end }
    }

    pub fn overlaps(&self, other: &PageRange) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.begin <= index && index <= self.end
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.begin, self.end)
    }
}

/// Token ceilings of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub total: usize,
    pub head: usize,
    pub body: usize,
    pub tail: usize,
}

impl Budget {
    /// `head = ⌊max·gap⌋`, `tail = ⌊max·gap·tail_rate⌋`, body gets the rest.
    pub fn new(max_tokens: usize, gap_rate: f64, tail_rate: f64) -> Result<Self, InciseError> {
        if max_tokens == 0 {
            return Err(InciseError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if !(0.0..=1.0).contains(&gap_rate) {
            return Err(InciseError::InvalidConfig(format!(
                "gap_rate must be within 0–1, got {gap_rate}"
            )));
        }
        if !(0.0..=1.0).contains(&tail_rate) {
            return Err(InciseError::InvalidConfig(format!(
                "tail_rate must be within 0–1, got {tail_rate}"
            )));
        }
        let head = (max_tokens as f64 * gap_rate).floor() as usize;
        let tail = (max_tokens as f64 * gap_rate * tail_rate).floor() as usize;
        let body = max_tokens.saturating_sub(head + tail);
        if body == 0 {
            return Err(InciseError::InvalidConfig(format!(
                "head ({head}) and tail ({tail}) ceilings leave no body budget out of {max_tokens} tokens"
            )));
        }
        Ok(Self {
            total: max_tokens,
            head,
            body,
            tail,
        })
    }
}

#[derive(Debug, Clone)]
struct Buffer {
    items: Vec<Item>,
    tokens: usize,
    ceiling: usize,
    sealed: bool,
}

impl Buffer {
    fn new(ceiling: usize) -> Self {
        Self {
            items: Vec::new(),
            tokens: 0,
            ceiling,
            sealed: ceiling == 0,
        }
    }

    fn sealed(ceiling: usize) -> Self {
        Self {
            sealed: true,
            ..Self::new(ceiling)
        }
    }

    /// Append unless sealed; seal instead when a non-empty buffer would overflow.
    fn try_push(&mut self, item: Item) -> Result<(), Item> {
        if self.sealed {
            return Err(item);
        }
        if !self.items.is_empty() && self.tokens + item.tokens() > self.ceiling {
            self.sealed = true;
            return Err(item);
        }
        self.tokens += item.tokens();
        self.items.push(item);
        Ok(())
    }
}

/// One LLM request unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub head: Vec<Item>,
    pub body: Vec<Item>,
    pub tail: Vec<Item>,
    pub budget: Budget,
}

impl Window {
    /// Source indices owned by this window.
    pub fn range(&self) -> PageRange {
        let begin = self.body.first().map_or(0, Item::first_index);
        let end = self.body.last().map_or(begin, Item::last_index);
        PageRange::new(begin, end)
    }

    pub fn head_tokens(&self) -> usize {
        self.head.iter().map(Item::tokens).sum()
    }

    pub fn body_tokens(&self) -> usize {
        self.body.iter().map(Item::tokens).sum()
    }

    pub fn tail_tokens(&self) -> usize {
        self.tail.iter().map(Item::tokens).sum()
    }
}

/// Window under construction.
struct Draft {
    head: Buffer,
    body: Buffer,
    tail: Buffer,
}

impl Draft {
    fn first(budget: &Budget) -> Self {
        Self {
            head: Buffer::sealed(budget.head),
            body: Buffer::new(budget.body),
            tail: Buffer::new(budget.tail),
        }
    }

    /// Seed the head from the end of `previous` (in document order), then seal it.
    fn after(previous: &[Item], budget: &Budget) -> Self {
        let mut head = Buffer::new(budget.head);
        let mut taken = 0;
        for item in previous.iter().rev() {
            if head.try_push(item.clone()).is_err() {
                break;
            }
            taken += 1;
        }
        head.items.reverse();
        head.sealed = true;
        debug!("Seeded head with {} items ({} tokens)", taken, head.tokens);
        Self {
            head,
            body: Buffer::new(budget.body),
            tail: Buffer::new(budget.tail),
        }
    }

    fn push(&mut self, item: Item) -> Result<(), Item> {
        let item = match self.head.try_push(item) {
            Ok(()) => return Ok(()),
            Err(item) => item,
        };
        let item = match self.body.try_push(item) {
            Ok(()) => return Ok(()),
            Err(item) => item,
        };
        self.tail.try_push(item)
    }

    /// Close the draft: the window, the tail to replay, and the next draft.
    fn close(self, budget: &Budget) -> (Option<Window>, Vec<Item>, Draft) {
        let carried: Vec<Item> = self
            .head
            .items
            .iter()
            .chain(self.body.items.iter())
            .cloned()
            .collect();
        let next = Draft::after(&carried, budget);
        let replay = self.tail.items.clone();
        let window = if self.body.items.is_empty() {
            None
        } else {
            Some(Window {
                head: self.head.items,
                body: self.body.items,
                tail: self.tail.items,
                budget: *budget,
            })
        };
        (window, replay, next)
    }
}

/// Lazy iterator of windows over a stream of items.
pub struct WindowGrouper<I: Iterator<Item = Item>> {
    stream: Recoverable<I>,
    budget: Budget,
    draft: Option<Draft>,
    finished: bool,
}

impl<I: Iterator<Item = Item>> WindowGrouper<I> {
    pub fn new<T>(items: T, budget: Budget) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            stream: Recoverable::new(items.into_iter()),
            budget,
            draft: Some(Draft::first(&budget)),
            finished: false,
        }
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }
}

impl<I: Iterator<Item = Item>> Iterator for WindowGrouper<I> {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        while !self.finished {
            let mut draft = self
                .draft
                .take()
                .unwrap_or_else(|| Draft::first(&self.budget));

            let (window, replay, next) = loop {
                match self.stream.get() {
                    None => {
                        let (window, replay, next) = draft.close(&self.budget);
                        if replay.is_empty() {
                            self.finished = true;
                        }
                        break (window, replay, next);
                    }
                    Some(item) => {
                        if let Err(rejected) = draft.push(item) {
                            self.stream.recover(rejected);
                            break draft.close(&self.budget);
                        }
                    }
                }
            };

            self.stream.recover_all(replay);
            self.draft = Some(next);
            if let Some(window) = window {
                debug!(
                    "Window {}: head {} / body {} / tail {} tokens",
                    window.range(),
                    window.head_tokens(),
                    window.body_tokens(),
                    window.tail_tokens()
                );
                return Some(window);
            }
        }
        None
    }
}

/// Group `items` into windows of at most `max_tokens` (see [`Budget::new`]).
pub fn group<T>(
    items: T,
    max_tokens: usize,
    gap_rate: f64,
    tail_rate: f64,
) -> Result<WindowGrouper<T::IntoIter>, InciseError>
where
    T: IntoIterator<Item = Item>,
{
    let budget = Budget::new(max_tokens, gap_rate, tail_rate)?;
    Ok(WindowGrouper::new(items, budget))
}
