//! Tree-shaped payloads: a minimal owned XML element model.
//!
//! Units, requests and replies are all small XML trees. The engine needs
//! three things from them: a canonical compact serialisation (the thing whose
//! tokens are counted), a "shell" serialisation (tag and attributes only, used
//! by the clipper), and structural access to children for clipping and merging.
//! Parsing goes through `quick-xml`. Whitespace-only text that carries a line
//! break between elements (or at a parent's edges) is layout and is dropped,
//! so pretty-printed input and compact output measure the same; any other
//! whitespace-only run becomes a single space.

use crate::error::InciseError;
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt;

/// A child of an [`Element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Element(Element),
}

impl Node {
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out);
        out
    }

    fn write_into(&self, out: &mut String) {
        match self {
            Node::Text(text) => out.push_str(&partial_escape(text.as_str())),
            Node::Element(el) => el.write_into(out),
        }
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                for child in &el.children {
                    child.collect_text(out);
                }
            }
        }
    }
}

/// An XML element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// `<tag>text</tag>`
    pub fn text(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(tag).with_text(text)
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing an existing value in place.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key, value)),
        }
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let pos = self.attrs.iter().position(|(k, _)| k == key)?;
        Some(self.attrs.remove(pos).1)
    }

    /// Append text, merging with a trailing text node.
    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        match self.children.last_mut() {
            Some(Node::Text(prev)) => prev.push_str(&text),
            _ => self.children.push(Node::Text(text)),
        }
    }

    /// Direct child elements, skipping text.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    /// Every descendant element in document order (self excluded).
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        let mut stack: Vec<&Element> = self.elements().collect();
        stack.reverse();
        while let Some(el) = stack.pop() {
            out.push(el);
            let mut kids: Vec<&Element> = el.elements().collect();
            kids.reverse();
            stack.extend(kids);
        }
        out
    }

    /// Concatenated text of all descendants.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.collect_text(&mut out);
        }
        out
    }

    /// Plain text with runs of whitespace collapsed to single spaces.
    pub fn normalized_text(&self) -> String {
        self.plain_text().split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Compact serialisation. Empty elements are self-closed.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out);
        out
    }

    /// Tag and attributes with no content: `<tag a="v"></tag>`.
    pub fn shell_xml(&self) -> String {
        let mut out = String::new();
        self.write_open(&mut out);
        out.push('>');
        self.write_close(&mut out);
        out
    }

    fn write_open(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag);
        for (k, v) in &self.attrs {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&escape(v.as_str()));
            out.push('"');
        }
    }

    fn write_close(&self, out: &mut String) {
        out.push_str("</");
        out.push_str(&self.tag);
        out.push('>');
    }

    fn write_into(&self, out: &mut String) {
        self.write_open(out);
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write_into(out);
        }
        self.write_close(out);
    }

    /// Parse a document with exactly one root element.
    pub fn parse(xml: &str) -> Result<Element, InciseError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        let mut blank: Option<String> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    settle_blank(&mut stack, blank.take(), true);
                    stack.push(open_element(&e)?);
                }
                Ok(Event::Empty(e)) => {
                    settle_blank(&mut stack, blank.take(), true);
                    let el = open_element(&e)?;
                    attach(&mut stack, &mut root, el)?;
                }
                Ok(Event::End(_)) => {
                    settle_blank(&mut stack, blank.take(), true);
                    let el = stack
                        .pop()
                        .ok_or_else(|| InciseError::malformed("xml", "unbalanced end tag"))?;
                    attach(&mut stack, &mut root, el)?;
                }
                Ok(Event::Text(t)) => {
                    let text = t.unescape().map_err(|e| InciseError::malformed("xml", e))?;
                    if text.trim().is_empty() {
                        blank.get_or_insert_with(String::new).push_str(&text);
                    } else {
                        settle_blank(&mut stack, blank.take(), false);
                        push_text(&mut stack, &text)?;
                    }
                }
                Ok(Event::CData(c)) => {
                    settle_blank(&mut stack, blank.take(), false);
                    let raw = c.into_inner();
                    push_text(&mut stack, &String::from_utf8_lossy(&raw))?;
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(InciseError::malformed(
                        "xml",
                        format!("at byte {}: {e}", reader.buffer_position()),
                    ))
                }
            }
        }

        if let Some(open) = stack.last() {
            return Err(InciseError::malformed(
                "xml",
                format!("unclosed element <{}>", open.tag),
            ));
        }
        root.ok_or_else(|| InciseError::malformed("xml", "document has no root element"))
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

fn open_element(e: &BytesStart<'_>) -> Result<Element, InciseError> {
    let mut el = Element::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr.map_err(|err| InciseError::malformed("xml attribute", err))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| InciseError::malformed("xml attribute", err))?;
        el.attrs.push((key, value.into_owned()));
    }
    Ok(el)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    el: Element,
) -> Result<(), InciseError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(el));
        return Ok(());
    }
    if root.is_some() {
        return Err(InciseError::malformed("xml", "more than one root element"));
    }
    *root = Some(el);
    Ok(())
}

fn push_text(stack: &mut [Element], text: &str) -> Result<(), InciseError> {
    if text.is_empty() {
        return Ok(());
    }
    match stack.last_mut() {
        Some(parent) => {
            parent.push_text(text);
            Ok(())
        }
        None => Err(InciseError::malformed("xml", "text outside the root element")),
    }
}

/// Resolve a pending whitespace-only run once the next event is known.
///
/// Line-broken whitespace with markup on both sides (a missing sibling counts
/// as markup) is indentation; everything else separates inline content.
fn settle_blank(stack: &mut [Element], blank: Option<String>, markup_follows: bool) {
    let (Some(blank), Some(parent)) = (blank, stack.last_mut()) else {
        return;
    };
    let markup_precedes = !matches!(parent.children.last(), Some(Node::Text(_)));
    if blank.contains('\n') && markup_precedes && markup_follows {
        return;
    }
    parent.push_text(" ");
}
