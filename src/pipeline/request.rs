//! Window requests: what actually goes over the wire for one window.
//!
//! A [`Window`] holds whole items; a [`WindowRequest`] holds their payloads
//! clipped to the window budget. Head context keeps its end (it must stay
//! adjacent to the body), tail context and the body keep their start. The body
//! may use whatever of the total budget the clipped head and tail leave over.

use crate::pipeline::clip::clip_items;
use crate::pipeline::group::{PageRange, Window};
use crate::pipeline::segment::Item;
use crate::tokens::Tokenizer;
use crate::xml::{Element, Node};
use tracing::debug;

/// One window, clipped and ready to serialise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRequest {
    pub range: PageRange,
    pub head: Vec<Element>,
    pub body: Vec<Element>,
    pub tail: Vec<Element>,
}

impl WindowRequest {
    pub fn prepare(window: &Window, tokenizer: &dyn Tokenizer) -> Self {
        let budget = window.budget;
        let head = clip_buffer(&window.head, budget.head, false, tokenizer);
        let tail = clip_buffer(&window.tail, budget.tail, true, tokenizer);
        let used = cost(&head, tokenizer) + cost(&tail, tokenizer);
        let body_budget = budget.total.saturating_sub(used).max(budget.body);
        let body = clip_buffer(&window.body, body_budget, true, tokenizer);

        let request = Self {
            range: window.range(),
            head,
            body,
            tail,
        };
        let leaves = window.head.len() + window.body.len() + window.tail.len();
        let kept = request.head.len() + request.body.len() + request.tail.len();
        if kept < leaves {
            debug!(
                "Window {}: clipping dropped {} payloads",
                request.range,
                leaves - kept
            );
        }
        request
    }

    /// Payload token cost of all three buffers.
    pub fn tokens(&self, tokenizer: &dyn Tokenizer) -> usize {
        cost(&self.head, tokenizer) + cost(&self.body, tokenizer) + cost(&self.tail, tokenizer)
    }

    pub fn to_element(&self) -> Element {
        let section = |tag: &str, items: &[Element]| Element {
            tag: tag.to_string(),
            attrs: Vec::new(),
            children: items.iter().cloned().map(Node::Element).collect(),
        };
        Element::new("request")
            .with_attr("range", self.range)
            .with_child(section("head", &self.head))
            .with_child(section("body", &self.body))
            .with_child(section("tail", &self.tail))
    }

    /// `<request range="b-e"><head>…</head><body>…</body><tail>…</tail></request>`
    pub fn to_xml(&self) -> String {
        self.to_element().to_xml()
    }
}

fn clip_buffer(
    items: &[Item],
    budget: usize,
    clip_from_tail: bool,
    tokenizer: &dyn Tokenizer,
) -> Vec<Element> {
    let leaves: Vec<&Element> = items
        .iter()
        .flat_map(|item| item.leaves())
        .map(|unit| &unit.payload)
        .collect();
    let total: usize = items.iter().map(Item::tokens).sum();
    if total <= budget {
        return leaves.into_iter().cloned().collect();
    }
    clip_items(&leaves, budget, clip_from_tail, tokenizer)
}

fn cost(items: &[Element], tokenizer: &dyn Tokenizer) -> usize {
    items.iter().map(|el| tokenizer.count(&el.to_xml())).sum()
}
