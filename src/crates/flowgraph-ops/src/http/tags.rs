//! Feed vocabulary dictionaries
//!
//! Each supported vocabulary (RSS 2.0 core, Atom, iTunes, Media-RSS,
//! RSS 1.0 and its content module, Dublin Core) is a table of
//! `tag -> extraction rule`. A rule names the child path to pick, the
//! extraction shape, and the normalized output field. Feed documents are
//! parsed by walking a node's children against the composed table for the
//! detected format and recursing on entry-valued fields.
//!
//! Namespaced tags are matched with any trailing slash in the namespace
//! URI stripped, so `{http://purl.org/rss/1.0/}title` and
//! `{http://purl.org/rss/1.0}title` are the same key.

use flowgraph_core::util::dates::parse_datetime;
use flowgraph_core::util::xmltree::XmlNode;
use serde_json::{json, Map, Value};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;

/// How a rule turns picked nodes into a value
#[derive(Debug, Clone, Copy)]
pub(crate) enum Shape {
    /// Text content; repeated tags become a list
    Text,
    /// Text content forced to a list, nulls dropped
    TextList,
    /// Text content through the relaxed date parser, as a UNIX timestamp
    Date,
    /// `[{href, rel: "alternate"}]` from text content
    LinkAlternate,
    /// `[{href, rel}]` from attributes (Atom links)
    AtomLink,
    /// `[{url, type}]` from attributes (enclosures, Media-RSS content)
    MediaContent,
    /// Recurse with the same table (items, entries, groups, channels)
    Entries,
}

/// One `tag -> field` extraction rule
pub(crate) struct TagRule {
    /// Expanded tag this rule fires on
    pub tag: &'static str,
    /// Output field; `None` merges the recursed mapping into the result
    pub out: Option<&'static str>,
    /// Child path from the node under inspection
    pub path: &'static [&'static str],
    pub shape: Shape,
}

pub(crate) type TagTable = HashMap<&'static str, &'static TagRule>;

const ATOM: &str = "{http://www.w3.org/2005/Atom}";
const ITUNES: &str = "{http://www.itunes.com/dtds/podcast-1.0.dtd}";
const MRSS: &str = "{http://search.yahoo.com/mrss}";
const RSS10: &str = "{http://purl.org/rss/1.0}";
const CONTENT: &str = "{http://purl.org/rss/1.0/modules/content}";
const DC: &str = "{http://purl.org/dc/elements/1.1}";

macro_rules! rule {
    ($tag:expr, $out:expr, $path:expr, $shape:expr) => {
        TagRule {
            tag: $tag,
            out: $out,
            path: $path,
            shape: $shape,
        }
    };
}

static RSS20_RULES: &[TagRule] = &[
    rule!("channel", None, &["channel"], Shape::Entries),
    rule!("item", Some("entry"), &["item"], Shape::Entries),
    rule!("title", Some("title"), &["title"], Shape::Text),
    rule!("link", Some("link"), &["link"], Shape::LinkAlternate),
    rule!(
        "description",
        Some("description"),
        &["description"],
        Shape::Text
    ),
    rule!("language", Some("language"), &["language"], Shape::Text),
    rule!("copyright", Some("copyright"), &["copyright"], Shape::Text),
    rule!(
        "managingEditor",
        Some("managingEditor"),
        &["managingEditor"],
        Shape::Text
    ),
    rule!("webMaster", Some("webMaster"), &["webMaster"], Shape::Text),
    rule!("pubDate", Some("published"), &["pubDate"], Shape::Date),
    rule!(
        "lastBuildDate",
        Some("updated"),
        &["lastBuildDate"],
        Shape::Date
    ),
    rule!("category", Some("category"), &["category"], Shape::Text),
    rule!("generator", Some("generator"), &["generator"], Shape::Text),
    rule!("docs", Some("docs"), &["docs"], Shape::Text),
    rule!("cloud", Some("cloud"), &["cloud"], Shape::Text),
    rule!("ttl", Some("ttl"), &["ttl"], Shape::Text),
    rule!("image", Some("image"), &["image"], Shape::Text),
    rule!(
        "enclosure",
        Some("media"),
        &["enclosure"],
        Shape::MediaContent
    ),
    rule!("rating", Some("rating"), &["rating"], Shape::Text),
    rule!("textInput", Some("textInput"), &["textInput"], Shape::Text),
    rule!("skipHours", Some("skipHours"), &["skipHours"], Shape::Text),
    rule!("skipDays", Some("skipDays"), &["skipDays"], Shape::Text),
    rule!("author", Some("author"), &["author"], Shape::TextList),
    rule!("comments", Some("comments"), &["comments"], Shape::Text),
    rule!("guid", Some("guid"), &["guid"], Shape::Text),
    rule!("source", Some("source"), &["source"], Shape::Text),
];

static ATOM_RULES: &[TagRule] = &[
    rule!(
        "{http://www.w3.org/2005/Atom}link",
        Some("link"),
        &["{http://www.w3.org/2005/Atom}link"],
        Shape::AtomLink
    ),
    rule!(
        "{http://www.w3.org/2005/Atom}id",
        Some("id"),
        &["{http://www.w3.org/2005/Atom}id"],
        Shape::Text
    ),
    rule!(
        "{http://www.w3.org/2005/Atom}title",
        Some("title"),
        &["{http://www.w3.org/2005/Atom}title"],
        Shape::Text
    ),
    rule!(
        "{http://www.w3.org/2005/Atom}content",
        Some("content"),
        &["{http://www.w3.org/2005/Atom}content"],
        Shape::Text
    ),
    rule!(
        "{http://www.w3.org/2005/Atom}author",
        Some("author"),
        &[
            "{http://www.w3.org/2005/Atom}author",
            "{http://www.w3.org/2005/Atom}name"
        ],
        Shape::TextList
    ),
    rule!(
        "{http://www.w3.org/2005/Atom}published",
        Some("published"),
        &["{http://www.w3.org/2005/Atom}published"],
        Shape::Date
    ),
    rule!(
        "{http://www.w3.org/2005/Atom}updated",
        Some("updated"),
        &["{http://www.w3.org/2005/Atom}updated"],
        Shape::Date
    ),
    rule!(
        "{http://www.w3.org/2005/Atom}entry",
        Some("entry"),
        &["{http://www.w3.org/2005/Atom}entry"],
        Shape::Entries
    ),
];

static ITUNES_RULES: &[TagRule] = &[
    rule!(
        "{http://www.itunes.com/dtds/podcast-1.0.dtd}author",
        Some("author"),
        &["{http://www.itunes.com/dtds/podcast-1.0.dtd}author"],
        Shape::TextList
    ),
    rule!(
        "{http://www.itunes.com/dtds/podcast-1.0.dtd}summary",
        Some("description"),
        &["{http://www.itunes.com/dtds/podcast-1.0.dtd}summary"],
        Shape::Text
    ),
    rule!(
        "{http://www.itunes.com/dtds/podcast-1.0.dtd}category",
        Some("category"),
        &["{http://www.itunes.com/dtds/podcast-1.0.dtd}category"],
        Shape::Text
    ),
    rule!(
        "{http://www.itunes.com/dtds/podcast-1.0.dtd}title",
        Some("title"),
        &["{http://www.itunes.com/dtds/podcast-1.0.dtd}title"],
        Shape::Text
    ),
];

static MEDIA_RULES: &[TagRule] = &[
    rule!(
        "{http://search.yahoo.com/mrss}group",
        Some("group"),
        &["{http://search.yahoo.com/mrss}group"],
        Shape::Entries
    ),
    rule!(
        "{http://search.yahoo.com/mrss}credit",
        Some("author"),
        &["{http://search.yahoo.com/mrss}credit"],
        Shape::TextList
    ),
    rule!(
        "{http://search.yahoo.com/mrss}description",
        Some("description"),
        &["{http://search.yahoo.com/mrss}description"],
        Shape::Text
    ),
    rule!(
        "{http://search.yahoo.com/mrss}content",
        Some("media"),
        &["{http://search.yahoo.com/mrss}content"],
        Shape::MediaContent
    ),
    rule!(
        "{http://search.yahoo.com/mrss}category",
        Some("category"),
        &["{http://search.yahoo.com/mrss}category"],
        Shape::Text
    ),
    rule!(
        "{http://search.yahoo.com/mrss}comments",
        Some("comments"),
        &["{http://search.yahoo.com/mrss}comments"],
        Shape::Text
    ),
    rule!(
        "{http://search.yahoo.com/mrss}title",
        Some("title"),
        &["{http://search.yahoo.com/mrss}title"],
        Shape::Text
    ),
];

static RSS10_RULES: &[TagRule] = &[
    rule!(
        "{http://purl.org/rss/1.0}channel",
        None,
        &["{http://purl.org/rss/1.0}channel"],
        Shape::Entries
    ),
    rule!(
        "{http://purl.org/rss/1.0}title",
        Some("title"),
        &["{http://purl.org/rss/1.0}title"],
        Shape::Text
    ),
    rule!(
        "{http://purl.org/rss/1.0}description",
        Some("description"),
        &["{http://purl.org/rss/1.0}description"],
        Shape::Text
    ),
    rule!(
        "{http://purl.org/rss/1.0}item",
        Some("entry"),
        &["{http://purl.org/rss/1.0}item"],
        Shape::Entries
    ),
    rule!(
        "{http://purl.org/rss/1.0}link",
        Some("link"),
        &["{http://purl.org/rss/1.0}link"],
        Shape::LinkAlternate
    ),
];

static CONTENT_RULES: &[TagRule] = &[rule!(
    "{http://purl.org/rss/1.0/modules/content}encoded",
    Some("content"),
    &["{http://purl.org/rss/1.0/modules/content}encoded"],
    Shape::Text
)];

static DC_RULES: &[TagRule] = &[
    rule!(
        "{http://purl.org/dc/elements/1.1}creator",
        Some("author"),
        &["{http://purl.org/dc/elements/1.1}creator"],
        Shape::TextList
    ),
    rule!(
        "{http://purl.org/dc/elements/1.1}date",
        Some("published"),
        &["{http://purl.org/dc/elements/1.1}date"],
        Shape::Date
    ),
    rule!(
        "{http://purl.org/dc/elements/1.1}description",
        Some("description"),
        &["{http://purl.org/dc/elements/1.1}description"],
        Shape::Text
    ),
    rule!(
        "{http://purl.org/dc/elements/1.1}type",
        Some("type"),
        &["{http://purl.org/dc/elements/1.1}type"],
        Shape::Text
    ),
    rule!(
        "{http://purl.org/dc/elements/1.1}language",
        Some("language"),
        &["{http://purl.org/dc/elements/1.1}language"],
        Shape::Text
    ),
    rule!(
        "{http://purl.org/dc/elements/1.1}publisher",
        Some("managingEditor"),
        &["{http://purl.org/dc/elements/1.1}publisher"],
        Shape::Text
    ),
    rule!(
        "{http://purl.org/dc/elements/1.1}rights",
        Some("copyright"),
        &["{http://purl.org/dc/elements/1.1}rights"],
        Shape::Text
    ),
    rule!(
        "{http://purl.org/dc/elements/1.1}source",
        Some("source"),
        &["{http://purl.org/dc/elements/1.1}source"],
        Shape::Text
    ),
    rule!(
        "{http://purl.org/dc/elements/1.1}title",
        Some("title"),
        &["{http://purl.org/dc/elements/1.1}title"],
        Shape::Text
    ),
    rule!(
        "{http://purl.org/dc/elements/1.1}subject",
        Some("category"),
        &["{http://purl.org/dc/elements/1.1}subject"],
        Shape::Text
    ),
];

fn compose(rule_sets: &[&'static [TagRule]]) -> TagTable {
    let mut table = TagTable::new();
    for rules in rule_sets {
        for rule in *rules {
            table.insert(rule.tag, rule);
        }
    }
    table
}

/// RSS 2.0 table: core tags enriched with iTunes, Media-RSS, the RSS 1.0
/// content module, and Dublin Core
pub(crate) fn rss20_table() -> &'static TagTable {
    static TABLE: OnceLock<TagTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        compose(&[
            RSS20_RULES,
            ITUNES_RULES,
            MEDIA_RULES,
            CONTENT_RULES,
            DC_RULES,
        ])
    })
}

/// Atom table enriched with Media-RSS
pub(crate) fn atom_table() -> &'static TagTable {
    static TABLE: OnceLock<TagTable> = OnceLock::new();
    TABLE.get_or_init(|| compose(&[ATOM_RULES, MEDIA_RULES]))
}

/// RDF (RSS 1.0) table with the content module and Dublin Core
pub(crate) fn rdf_table() -> &'static TagTable {
    static TABLE: OnceLock<TagTable> = OnceLock::new();
    TABLE.get_or_init(|| compose(&[RSS10_RULES, CONTENT_RULES, DC_RULES]))
}

/// Strip a trailing slash from a `{namespace}local` tag's namespace
pub(crate) fn normalize_tag(tag: &str) -> Cow<'_, str> {
    if let Some(rest) = tag.strip_prefix('{') {
        if let Some((ns, local)) = rest.split_once('}') {
            if let Some(ns) = ns.strip_suffix('/') {
                return Cow::Owned(format!("{{{}}}{}", ns, local));
            }
        }
    }
    Cow::Borrowed(tag)
}

/// Children of `node` under `tag`, matching with namespace normalization
fn lookup<'a>(node: &'a XmlNode, tag: &str) -> Vec<&'a XmlNode> {
    node.elem
        .iter()
        .filter(|(key, _)| normalize_tag(key) == tag)
        .flat_map(|(_, children)| children.iter())
        .collect()
}

/// Follow a child path, flattening repeated elements at every hop
fn walk<'a>(node: &'a XmlNode, path: &[&str]) -> Vec<&'a XmlNode> {
    let mut current = vec![node];
    for hop in path {
        current = current.into_iter().flat_map(|n| lookup(n, hop)).collect();
    }
    current
}

fn text_value(node: &XmlNode) -> Value {
    node.text
        .clone()
        .map(Value::String)
        .unwrap_or(Value::Null)
}

fn apply_rule(table: &TagTable, rule: &TagRule, node: &XmlNode) -> Option<Value> {
    let nodes = walk(node, rule.path);
    if nodes.is_empty() {
        return None;
    }

    match rule.shape {
        Shape::Text => {
            if nodes.len() == 1 {
                nodes[0].text.clone().map(Value::String)
            } else {
                Some(Value::Array(nodes.iter().map(|n| text_value(n)).collect()))
            }
        }
        Shape::TextList => {
            let items: Vec<Value> = nodes
                .iter()
                .filter_map(|n| n.text.clone())
                .map(Value::String)
                .collect();
            if items.is_empty() {
                None
            } else {
                Some(Value::Array(items))
            }
        }
        Shape::Date => {
            let text = nodes[0].text.as_deref()?;
            parse_datetime(text).map(|ts| json!(ts))
        }
        Shape::LinkAlternate => {
            let href = nodes[0].text.clone()?;
            Some(json!([{ "href": href, "rel": "alternate" }]))
        }
        Shape::AtomLink => Some(Value::Array(
            nodes
                .iter()
                .map(|n| {
                    json!({
                        "href": n.attrs.get("href"),
                        "rel": n.attrs.get("rel").cloned().unwrap_or_else(|| "alternate".to_string()),
                    })
                })
                .collect(),
        )),
        Shape::MediaContent => Some(Value::Array(
            nodes
                .iter()
                .map(|n| json!({ "url": n.attrs.get("url"), "type": n.attrs.get("type") }))
                .collect(),
        )),
        Shape::Entries => {
            if nodes.len() == 1 {
                Some(parse_node(table, nodes[0]))
            } else {
                Some(Value::Array(
                    nodes.iter().map(|n| parse_node(table, n)).collect(),
                ))
            }
        }
    }
}

/// Parse a feed node against a composed vocabulary table.
///
/// Childless nodes come back as their raw tree representation; everything
/// else is the mapping of normalized fields the matching rules produced.
pub(crate) fn parse_node(table: &TagTable, node: &XmlNode) -> Value {
    if node.elem.is_empty() {
        return node.to_value();
    }

    let mut out = Map::new();
    for tag in node.elem.keys() {
        let normalized = normalize_tag(tag);
        let Some(rule) = table.get(normalized.as_ref()) else {
            continue;
        };
        let Some(value) = apply_rule(table, rule, node) else {
            continue;
        };
        match rule.out {
            Some(field) => {
                out.insert(field.to_string(), value);
            }
            None => {
                if let Value::Object(map) = value {
                    out.extend(map);
                }
            }
        }
    }
    Value::Object(out)
}
