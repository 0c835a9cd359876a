//! Hardened XML-to-tree conversion
//!
//! Produces the [`XmlNode`] domain shape consumed by the feed and HTML
//! operators:
//!
//! ```text
//! XmlNode { attrs: map, text?, tail?, elem: { tag -> node | [node, ...] } }
//! ```
//!
//! Tags are namespace-expanded to `{uri}local` so vocabulary dictionaries
//! can match on the full name. Safety defaults: bounded input size and
//! depth, comments and processing instructions stripped, no entity
//! resolution beyond the predefined five, no network access.
//!
//! `relaxed` mode tolerates the tag soup of real-world HTML: mismatched
//! end tags close the innermost open element, unclosed elements are folded
//! up at end of input, and undecodable entities pass through verbatim.

use crate::error::{FlowError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One or several children under the same tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum XmlChildren {
    /// A single child element
    One(XmlNode),
    /// Repeated children, in document order
    Many(Vec<XmlNode>),
}

impl XmlChildren {
    /// View as a slice-like list regardless of arity
    pub fn iter(&self) -> Vec<&XmlNode> {
        match self {
            XmlChildren::One(node) => vec![node],
            XmlChildren::Many(nodes) => nodes.iter().collect(),
        }
    }
}

/// An XML element converted to the tree shape
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct XmlNode {
    /// Element attributes
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,

    /// Text before the first child
    pub text: Option<String>,

    /// Text between this element's end tag and the next sibling
    pub tail: Option<String>,

    /// Children grouped by expanded tag name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub elem: BTreeMap<String, XmlChildren>,
}

impl XmlNode {
    /// Children under `tag`, flattened to a list
    pub fn children(&self, tag: &str) -> Vec<&XmlNode> {
        self.elem.get(tag).map(XmlChildren::iter).unwrap_or_default()
    }

    /// First child under `tag`
    pub fn child(&self, tag: &str) -> Option<&XmlNode> {
        self.children(tag).into_iter().next()
    }

    /// Serialize to the JSON representation carried in envelopes
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Parser limits and mode
#[derive(Debug, Clone)]
pub struct XmlTreeOptions {
    /// Maximum input size in bytes
    pub max_size: usize,
    /// Maximum element nesting depth
    pub max_depth: usize,
    /// Trim whitespace around text and tail
    pub strip_whitespace: bool,
    /// Tolerate HTML tag soup
    pub relaxed: bool,
}

impl Default for XmlTreeOptions {
    fn default() -> Self {
        Self {
            max_size: 10 * 1024 * 1024,
            max_depth: 100,
            strip_whitespace: true,
            relaxed: false,
        }
    }
}

struct Frame {
    tag: String,
    node: XmlNode,
    children: Vec<(String, XmlNode)>,
}

impl Frame {
    fn new(tag: String, attrs: BTreeMap<String, String>) -> Self {
        Self {
            tag,
            node: XmlNode {
                attrs,
                ..XmlNode::default()
            },
            children: Vec::new(),
        }
    }

    fn finish(mut self) -> (String, XmlNode) {
        for (tag, child) in self.children {
            match self.node.elem.remove(&tag) {
                None => {
                    self.node.elem.insert(tag, XmlChildren::One(child));
                }
                Some(XmlChildren::One(first)) => {
                    self.node
                        .elem
                        .insert(tag, XmlChildren::Many(vec![first, child]));
                }
                Some(XmlChildren::Many(mut nodes)) => {
                    nodes.push(child);
                    self.node.elem.insert(tag, XmlChildren::Many(nodes));
                }
            }
        }
        (self.tag, self.node)
    }
}

/// Parse an XML (or, in relaxed mode, HTML) document into its root tag and
/// node
pub fn parse_xml(input: &str, opts: &XmlTreeOptions) -> Result<(String, XmlNode)> {
    if input.len() > opts.max_size {
        return Err(FlowError::validation(format!(
            "XML document of {} bytes exceeds limit of {}",
            input.len(),
            opts.max_size
        )));
    }

    let mut reader = NsReader::from_str(input);
    reader.config_mut().check_end_names = !opts.relaxed;

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<(String, XmlNode)> = None;

    loop {
        let event = match reader.read_resolved_event() {
            Ok(ev) => ev,
            Err(e) if opts.relaxed => {
                tracing::debug!(error = %e, "tolerating malformed markup");
                break;
            }
            Err(e) => return Err(FlowError::validation(format!("XML malformed: {}", e))),
        };

        match event {
            (resolve, Event::Start(start)) => {
                if stack.len() >= opts.max_depth {
                    return Err(FlowError::validation(format!(
                        "XML nesting exceeds maximum depth of {}",
                        opts.max_depth
                    )));
                }
                stack.push(Frame::new(expand_tag(&resolve, &start), read_attrs(&start)));
            }
            (resolve, Event::Empty(start)) => {
                let frame = Frame::new(expand_tag(&resolve, &start), read_attrs(&start));
                attach(frame.finish(), &mut stack, &mut root);
            }
            (_, Event::End(_)) => {
                if let Some(frame) = stack.pop() {
                    attach(frame.finish(), &mut stack, &mut root);
                }
            }
            (_, Event::Text(text)) => {
                let decoded = match text.unescape() {
                    Ok(cow) => cow.into_owned(),
                    Err(_) if opts.relaxed => String::from_utf8_lossy(&text).into_owned(),
                    Err(e) => {
                        return Err(FlowError::validation(format!("XML malformed: {}", e)))
                    }
                };
                push_text(decoded, opts, &mut stack);
            }
            (_, Event::CData(data)) => {
                let decoded = String::from_utf8_lossy(&data).into_owned();
                push_text(decoded, opts, &mut stack);
            }
            (_, Event::Eof) => break,
            // Comments, processing instructions, declarations, doctypes.
            _ => {}
        }
    }

    // Unclosed elements: fold up in relaxed mode, reject otherwise.
    if !stack.is_empty() {
        if !opts.relaxed {
            return Err(FlowError::validation(
                "XML malformed: unclosed element at end of input".to_string(),
            ));
        }
        while let Some(frame) = stack.pop() {
            attach(frame.finish(), &mut stack, &mut root);
        }
    }

    root.ok_or_else(|| FlowError::validation("XML document has no root element".to_string()))
}

fn expand_tag(resolve: &ResolveResult, start: &BytesStart) -> String {
    let local = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    match resolve {
        ResolveResult::Bound(ns) => {
            format!("{{{}}}{}", String::from_utf8_lossy(ns.0), local)
        }
        _ => local,
    }
}

fn read_attrs(start: &BytesStart) -> BTreeMap<String, String> {
    start
        .attributes()
        .filter_map(|attr| attr.ok())
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            (key, value)
        })
        .collect()
}

fn push_text(decoded: String, opts: &XmlTreeOptions, stack: &mut [Frame]) {
    let text = if opts.strip_whitespace {
        decoded.trim().to_string()
    } else {
        decoded
    };
    if text.is_empty() {
        return;
    }

    let Some(frame) = stack.last_mut() else {
        return;
    };
    // Text before the first child is the element's text; text after a
    // child's end tag is that child's tail.
    match frame.children.last_mut() {
        None => append(&mut frame.node.text, &text),
        Some((_, child)) => append(&mut child.tail, &text),
    }
}

fn append(slot: &mut Option<String>, text: &str) {
    match slot {
        Some(existing) => existing.push_str(text),
        None => *slot = Some(text.to_string()),
    }
}

fn attach(
    (tag, node): (String, XmlNode),
    stack: &mut Vec<Frame>,
    root: &mut Option<(String, XmlNode)>,
) {
    match stack.last_mut() {
        Some(parent) => parent.children.push((tag, node)),
        None => {
            if root.is_none() {
                *root = Some((tag, node));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> (String, XmlNode) {
        parse_xml(input, &XmlTreeOptions::default()).unwrap()
    }

    #[test]
    fn test_simple_document() {
        let (tag, node) = parse(r#"<rss version="2.0"><channel><title>T</title></channel></rss>"#);
        assert_eq!(tag, "rss");
        assert_eq!(node.attrs["version"], "2.0");

        let channel = node.child("channel").unwrap();
        assert_eq!(
            channel.child("title").unwrap().text.as_deref(),
            Some("T")
        );
    }

    #[test]
    fn test_repeated_children_become_list() {
        let (_, node) = parse("<l><i>1</i><i>2</i><i>3</i></l>");
        let items = node.children("i");
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].text.as_deref(), Some("3"));
    }

    #[test]
    fn test_namespace_expansion() {
        let (tag, node) = parse(
            r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>x</title></feed>"#,
        );
        assert_eq!(tag, "{http://www.w3.org/2005/Atom}feed");
        assert!(node
            .child("{http://www.w3.org/2005/Atom}title")
            .is_some());
    }

    #[test]
    fn test_tail_text() {
        let opts = XmlTreeOptions {
            strip_whitespace: false,
            ..XmlTreeOptions::default()
        };
        let (_, node) = parse_xml("<p><b>bold</b> tail</p>", &opts).unwrap();
        assert_eq!(node.child("b").unwrap().tail.as_deref(), Some(" tail"));
    }

    #[test]
    fn test_comments_are_stripped() {
        let (_, node) = parse("<a><!-- nope --><b>x</b></a>");
        assert_eq!(node.elem.len(), 1);
        assert!(node.child("b").is_some());
    }

    #[test]
    fn test_size_cap() {
        let big = format!("<a>{}</a>", "x".repeat(64));
        let opts = XmlTreeOptions {
            max_size: 16,
            ..XmlTreeOptions::default()
        };
        assert!(parse_xml(&big, &opts).is_err());
    }

    #[test]
    fn test_depth_cap() {
        let deep = format!("{}x{}", "<a>".repeat(20), "</a>".repeat(20));
        let opts = XmlTreeOptions {
            max_depth: 5,
            ..XmlTreeOptions::default()
        };
        assert!(parse_xml(&deep, &opts).is_err());
    }

    #[test]
    fn test_malformed_rejected_in_strict_mode() {
        assert!(parse_xml("<a><b></a>", &XmlTreeOptions::default()).is_err());
        assert!(parse_xml("<a>", &XmlTreeOptions::default()).is_err());
    }

    #[test]
    fn test_relaxed_mode_tolerates_tag_soup() {
        let opts = XmlTreeOptions {
            relaxed: true,
            ..XmlTreeOptions::default()
        };
        let (tag, node) = parse_xml("<html><body><p>one<p>two</body></html>", &opts).unwrap();
        assert_eq!(tag, "html");
        assert!(node.child("body").is_some());
    }

    #[test]
    fn test_empty_element() {
        let (_, node) = parse(r#"<a><hr class="x"/></a>"#);
        assert_eq!(node.child("hr").unwrap().attrs["class"], "x");
    }

    #[test]
    fn test_to_value_shape() {
        let (_, node) = parse(r#"<a k="v">t</a>"#);
        let value = node.to_value();
        assert_eq!(value["attrs"]["k"], "v");
        assert_eq!(value["text"], "t");
        assert!(value["tail"].is_null());
    }
}
