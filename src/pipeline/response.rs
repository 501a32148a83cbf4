//! Window replies: response XML → ordered fragment list.
//!
//! A reply is one root element (its tag is not checked) whose element
//! children are fragments, in the order the model wrote them:
//!
//! ```text
//! <response>
//!   <p index="3">Body text that continues</p>
//!   <p index="3" to="4">a paragraph spanning two units<ref id="7"/></p>
//!   <figure index="4">…</figure>
//!   <citation id="7" index="4">J. Doe, 1999.</citation>
//! </response>
//! ```
//!
//! Models sometimes wrap the reply in a markdown fence or prefix it with a
//! sentence; both are stripped before parsing.

use crate::error::WindowError;
use crate::pipeline::group::PageRange;
use crate::xml::Element;
use once_cell::sync::Lazy;
use regex::Regex;

/// Tags treated as non-text assets. Closed set.
pub const ASSET_TAGS: [&str; 4] = ["figure", "table", "formula", "asset"];

pub const CITATION_TAG: &str = "citation";
pub const REF_TAG: &str = "ref";
pub const SPAN_END_ATTR: &str = "to";
pub const ID_ATTR: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    Text,
    Asset,
    /// A citation definition carrying its id.
    Citation(u32),
}

/// One top-level element of a window reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub kind: FragmentKind,
    /// Source unit the fragment starts in.
    pub index: usize,
    /// Last source unit the fragment covers (`index` unless `to` is given).
    pub span_end: usize,
    pub element: Element,
    /// Citation ids referenced from inside the fragment, in document order.
    pub refs: Vec<u32>,
}

impl Fragment {
    pub fn from_element(element: Element) -> Result<Self, String> {
        let index = numeric_attr(&element, crate::unit::INDEX_ATTR)?
            .ok_or_else(|| format!("<{}> has no index", element.tag))?;
        let span_end = numeric_attr(&element, SPAN_END_ATTR)?.unwrap_or(index);
        if span_end < index {
            return Err(format!(
                "<{}> spans backwards ({index} to {span_end})",
                element.tag
            ));
        }

        let kind = if element.tag == CITATION_TAG {
            let id = numeric_attr(&element, ID_ATTR)?
                .ok_or_else(|| "<citation> has no id".to_string())?;
            let id = u32::try_from(id).map_err(|e| format!("citation id {id}: {e}"))?;
            FragmentKind::Citation(id)
        } else if ASSET_TAGS.contains(&element.tag.as_str()) {
            FragmentKind::Asset
        } else {
            FragmentKind::Text
        };

        let refs = match kind {
            FragmentKind::Citation(_) => Vec::new(),
            _ => collect_refs(&element)?,
        };

        Ok(Self {
            kind,
            index,
            span_end,
            element,
            refs,
        })
    }

    pub fn is_text(&self) -> bool {
        self.kind == FragmentKind::Text
    }

    pub fn is_asset(&self) -> bool {
        self.kind == FragmentKind::Asset
    }

    /// Whitespace-normalised plain text, the form compared by the merger.
    pub fn normalized_text(&self) -> String {
        self.element.normalized_text()
    }

    /// Whether the fragment's unit span intersects `[begin, end]`.
    pub fn touches(&self, begin: usize, end: usize) -> bool {
        self.index <= end && begin <= self.span_end
    }
}

fn numeric_attr(element: &Element, key: &str) -> Result<Option<usize>, String> {
    element
        .attr(key)
        .map(|v| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| format!("<{}> has non-numeric {key}=\"{v}\"", element.tag))
        })
        .transpose()
}

fn collect_refs(element: &Element) -> Result<Vec<u32>, String> {
    element
        .descendants()
        .into_iter()
        .filter(|el| el.tag == REF_TAG)
        .map(|el| {
            let raw = el
                .attr(ID_ATTR)
                .ok_or_else(|| "<ref> has no id".to_string())?;
            raw.trim()
                .parse::<u32>()
                .map_err(|_| format!("<ref> has non-numeric id=\"{raw}\""))
        })
        .collect()
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:xml)?\s*\n(.*?)\n```\s*$").unwrap());

/// Strip a markdown fence and any prose before the first tag.
fn strip_wrapping(input: &str) -> &str {
    let trimmed = input.trim();
    let inner = match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps.get(1).map_or(trimmed, |m| m.as_str()),
        None => trimmed,
    };
    match inner.find('<') {
        Some(pos) => inner[pos..].trim_end(),
        None => inner,
    }
}

/// Parse one window reply into its fragments.
pub fn parse_response(xml: &str, range: PageRange) -> Result<Vec<Fragment>, WindowError> {
    let malformed = |detail: String| WindowError::MalformedResponse { range, detail };
    let root = Element::parse(strip_wrapping(xml)).map_err(|e| malformed(e.to_string()))?;
    root.elements()
        .cloned()
        .map(|el| Fragment::from_element(el).map_err(&malformed))
        .collect()
}
