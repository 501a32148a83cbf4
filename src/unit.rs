//! Text units: the atomic, immutable pieces of content fed into the engine.
//!
//! A [`TextUnit`] is whatever the upstream layout stage produced as one piece
//! (a page's main text, a citation block), together with its ordinal index,
//! its token cost and the incisions at both of its edges.

use crate::error::InciseError;
use crate::incision::Incision;
use crate::tokens::Tokenizer;
use crate::xml::Element;
use std::iter::Peekable;
use tracing::warn;

/// Attribute holding the ordinal index on every unit payload.
pub const INDEX_ATTR: &str = "index";
pub const START_INCISION_ATTR: &str = "start-incision";
pub const END_INCISION_ATTR: &str = "end-incision";

/// Atomic piece of content with a precomputed token cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUnit {
    pub index: usize,
    /// Cost of `payload.to_xml()` under the run's tokenizer.
    pub tokens: usize,
    pub start_incision: Incision,
    pub end_incision: Incision,
    pub payload: Element,
}

impl TextUnit {
    /// Build a unit, stamping `index` on the payload and counting its tokens.
    pub fn new(
        index: usize,
        mut payload: Element,
        start_incision: Incision,
        end_incision: Incision,
        tokenizer: &dyn Tokenizer,
    ) -> Self {
        payload.set_attr(INDEX_ATTR, index);
        let tokens = tokenizer.count(&payload.to_xml());
        Self {
            index,
            tokens,
            start_incision,
            end_incision,
            payload,
        }
    }

    /// Build a unit from an annotated element.
    ///
    /// `index` is required; `start-incision` / `end-incision` default to
    /// [`Incision::Uncertain`] and are removed from the payload.
    pub fn from_element(mut el: Element, tokenizer: &dyn Tokenizer) -> Result<Self, InciseError> {
        let index = el
            .attr(INDEX_ATTR)
            .ok_or_else(|| {
                InciseError::malformed(format!("<{}>", el.tag), "missing index attribute")
            })?
            .trim()
            .parse::<usize>()
            .map_err(|e| InciseError::malformed(format!("<{}> index", el.tag), e))?;
        let start = match el.remove_attr(START_INCISION_ATTR) {
            Some(v) => v.parse()?,
            None => Incision::default(),
        };
        let end = match el.remove_attr(END_INCISION_ATTR) {
            Some(v) => v.parse()?,
            None => Incision::default(),
        };
        Ok(Self::new(index, el, start, end, tokenizer))
    }
}

/// Parse a corpus document: every child element of the root is one unit.
pub fn load_units(xml: &str, tokenizer: &dyn Tokenizer) -> Result<Vec<TextUnit>, InciseError> {
    let root = Element::parse(xml)?;
    root.elements()
        .cloned()
        .map(|el| TextUnit::from_element(el, tokenizer))
        .collect()
}

/// Force [`Incision::Impossible`] at corpus edges and index discontinuities.
pub fn guard_boundaries<I>(units: I) -> BoundaryGuard<I::IntoIter>
where
    I: IntoIterator<Item = TextUnit>,
{
    BoundaryGuard {
        inner: units.into_iter().peekable(),
        prev_index: None,
    }
}

/// Iterator returned by [`guard_boundaries`].
pub struct BoundaryGuard<I: Iterator<Item = TextUnit>> {
    inner: Peekable<I>,
    prev_index: Option<usize>,
}

impl<I: Iterator<Item = TextUnit>> Iterator for BoundaryGuard<I> {
    type Item = TextUnit;

    fn next(&mut self) -> Option<TextUnit> {
        let mut unit = self.inner.next()?;

        let continues_prev = match self.prev_index {
            Some(prev) if unit.index <= prev => {
                warn!("Unit index {} does not increase after {}", unit.index, prev);
                false
            }
            Some(prev) => unit.index == prev + 1,
            None => false,
        };
        if !continues_prev {
            unit.start_incision = Incision::Impossible;
        }

        let continues_next = self
            .inner
            .peek()
            .is_some_and(|next| next.index == unit.index + 1);
        if !continues_next {
            unit.end_incision = Incision::Impossible;
        }

        self.prev_index = Some(unit.index);
        Some(unit)
    }
}
