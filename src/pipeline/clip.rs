//! Boundary clipper: structure-preserving truncation to an exact token budget.
//!
//! A head or tail buffer may hold a single unit that is larger than the
//! buffer's ceiling (the grouper always accepts one item). Before the request
//! is sent, such a unit is clipped: whole children are kept from the *kept
//! end* inward, the first child that does not fit is clipped recursively and
//! everything beyond it is dropped. Text is cut at token boundaries.
//!
//! `clip_from_tail = true` drops content from the end (keeps a prefix, used
//! for tail context and bodies); `false` drops from the start (keeps a suffix,
//! used for head context, which must stay adjacent to the body).
//!
//! The result is always a well-formed sub-tree whose serialised cost is at
//! most the requested budget.

use crate::tokens::Tokenizer;
use crate::xml::{Element, Node};
use quick_xml::escape::partial_escape;

/// Clip `element` to at most `remaining` tokens. `None` when nothing fits.
pub fn clip(
    element: &Element,
    remaining: usize,
    clip_from_tail: bool,
    tokenizer: &dyn Tokenizer,
) -> Option<Element> {
    let mut budget = remaining;
    loop {
        let candidate = clip_element(element, budget, clip_from_tail, tokenizer)?;
        let cost = tokenizer.count(&candidate.to_xml());
        if cost <= remaining {
            return Some(candidate);
        }
        // Token costs of siblings are not additive under BPE; tighten and retry.
        budget = budget.checked_sub((cost - remaining).max(1))?;
    }
}

/// Clip a run of sibling payloads, keeping whole items from the kept end.
pub fn clip_items(
    items: &[&Element],
    budget: usize,
    clip_from_tail: bool,
    tokenizer: &dyn Tokenizer,
) -> Vec<Element> {
    let mut kept = Vec::with_capacity(items.len());
    let mut left = budget;
    let ordered: Box<dyn Iterator<Item = &&Element>> = if clip_from_tail {
        Box::new(items.iter())
    } else {
        Box::new(items.iter().rev())
    };
    for el in ordered {
        let cost = tokenizer.count(&el.to_xml());
        if cost <= left {
            left -= cost;
            kept.push((*el).clone());
            continue;
        }
        if let Some(part) = clip(el, left, clip_from_tail, tokenizer) {
            kept.push(part);
        }
        break;
    }
    if !clip_from_tail {
        kept.reverse();
    }
    kept
}

fn clip_element(
    element: &Element,
    remaining: usize,
    clip_from_tail: bool,
    tokenizer: &dyn Tokenizer,
) -> Option<Element> {
    if tokenizer.count(&element.to_xml()) <= remaining {
        return Some(element.clone());
    }
    let shell = tokenizer.count(&element.shell_xml());
    let mut left = remaining.checked_sub(shell)?;

    let mut kept: Vec<Node> = Vec::new();
    let ordered: Box<dyn Iterator<Item = &Node>> = if clip_from_tail {
        Box::new(element.children.iter())
    } else {
        Box::new(element.children.iter().rev())
    };
    for child in ordered {
        let cost = tokenizer.count(&child.to_xml());
        if cost <= left {
            left -= cost;
            kept.push(child.clone());
            continue;
        }
        if let Some(part) = clip_node(child, left, clip_from_tail, tokenizer) {
            kept.push(part);
        }
        break;
    }
    if kept.is_empty() {
        return None;
    }
    if !clip_from_tail {
        kept.reverse();
    }
    Some(Element {
        tag: element.tag.clone(),
        attrs: element.attrs.clone(),
        children: kept,
    })
}

fn clip_node(
    node: &Node,
    remaining: usize,
    clip_from_tail: bool,
    tokenizer: &dyn Tokenizer,
) -> Option<Node> {
    match node {
        Node::Text(text) => clip_text(text, remaining, clip_from_tail, tokenizer).map(Node::Text),
        Node::Element(el) => {
            clip_element(el, remaining, clip_from_tail, tokenizer).map(Node::Element)
        }
    }
}

/// Keep a token prefix (or suffix) of `text` whose escaped cost fits.
fn clip_text(
    text: &str,
    remaining: usize,
    clip_from_tail: bool,
    tokenizer: &dyn Tokenizer,
) -> Option<String> {
    let tokens = tokenizer.encode(text);
    let mut take = remaining.min(tokens.len());
    while take > 0 {
        let slice = if clip_from_tail {
            &tokens[..take]
        } else {
            &tokens[tokens.len() - take..]
        };
        let Some(decoded) = tokenizer.decode(slice) else {
            take -= 1;
            continue;
        };
        let cost = tokenizer.count(&partial_escape(decoded.as_str()));
        if cost <= remaining {
            return (!decoded.is_empty()).then_some(decoded);
        }
        take -= (cost - remaining).min(take);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{CharTokenizer, TiktokenTokenizer};

    fn cost(el: &Element) -> usize {
        CharTokenizer.count(&el.to_xml())
    }

    #[test]
    fn fitting_node_is_returned_unchanged() {
        let el = Element::parse(r#"<page index="1"><p>alpha</p><p>beta</p></page>"#).unwrap();
        let full = cost(&el);
        assert_eq!(clip(&el, full, true, &CharTokenizer), Some(el.clone()));
        assert_eq!(clip(&el, full + 50, false, &CharTokenizer), Some(el));
    }

    #[test]
    fn text_leaf_keeps_prefix_or_suffix() {
        let el = Element::text("p", "hello world");
        // shell "<p></p>" costs 7, leaving 3 characters.
        let head = clip(&el, 10, true, &CharTokenizer).unwrap();
        assert_eq!(head.to_xml(), "<p>hel</p>");
        let tail = clip(&el, 10, false, &CharTokenizer).unwrap();
        assert_eq!(tail.to_xml(), "<p>rld</p>");
    }

    #[test]
    fn shell_alone_does_not_fit() {
        let el = Element::text("p", "hello");
        assert_eq!(clip(&el, 7, true, &CharTokenizer), None);
        assert_eq!(clip(&el, 3, true, &CharTokenizer), None);
    }

    #[test]
    fn keeps_whole_children_from_kept_end() {
        let el = Element::parse("<page><p>aaaa</p><p>bbbb</p><p>cccc</p></page>").unwrap();
        // shell 13 + one whole child 11 + partial "<p>cc</p>" 9 = 33
        let kept = clip(&el, 33, false, &CharTokenizer).unwrap();
        assert_eq!(kept.to_xml(), "<page><p>bb</p><p>cccc</p></page>");
        let kept = clip(&el, 33, true, &CharTokenizer).unwrap();
        assert_eq!(kept.to_xml(), "<page><p>aaaa</p><p>bb</p></page>");
    }

    #[test]
    fn partial_child_that_cannot_fit_is_dropped() {
        let el = Element::parse("<page><p>aaaa</p><p>bbbb</p></page>").unwrap();
        // 13 + 11 leaves 6: not enough for a "<p></p>" shell.
        let kept = clip(&el, 30, true, &CharTokenizer).unwrap();
        assert_eq!(kept.to_xml(), "<page><p>aaaa</p></page>");
    }

    #[test]
    fn escaped_text_respects_budget() {
        let el = Element::text("p", "a&b&c&d");
        for budget in 0..cost(&el) {
            if let Some(c) = clip(&el, budget, true, &CharTokenizer) {
                assert!(cost(&c) <= budget, "budget {budget}: {c}");
                assert!(Element::parse(&c.to_xml()).is_ok());
            }
        }
    }

    #[test]
    fn clip_is_bounded_under_bpe() {
        let tok = TiktokenTokenizer::cl100k().unwrap();
        let body = "It was the best of times, it was the worst of times. ".repeat(200);
        let el = Element::parse(&format!(
            r#"<page index="0"><p>{body}</p><p>{body}</p><table><row>1</row></table></page>"#
        ))
        .unwrap();
        for budget in [5, 40, 400, 1000] {
            for from_tail in [true, false] {
                if let Some(c) = clip(&el, budget, from_tail, &tok) {
                    assert!(tok.count(&c.to_xml()) <= budget);
                    assert_eq!(c.tag, "page");
                    assert!(Element::parse(&c.to_xml()).is_ok());
                }
            }
        }
    }

    #[test]
    fn clip_items_walks_from_kept_end() {
        let a = Element::text("p", "aaaa");
        let b = Element::text("p", "bbbb");
        let items = [&a, &b];
        let kept = clip_items(&items, 20, false, &CharTokenizer);
        let xml: Vec<String> = kept.iter().map(Element::to_xml).collect();
        assert_eq!(xml, vec!["<p>aa</p>", "<p>bbbb</p>"]);
    }
}
