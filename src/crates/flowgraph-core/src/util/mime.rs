//! Content-Type classification for response decoding
//!
//! HTTP operators route response bodies on the media type: XML-ish types go
//! to the tree converter, JSON-ish types to the JSON decoder, `text/html`
//! to the relaxed HTML path. Structured-syntax suffixes (`+xml`, `+json`)
//! are recognized.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn xml_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(application|text)/([\w.\-]+\+)?xml($|;)").unwrap())
}

fn json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(application|text)/([\w.\-]+\+)?json($|;)").unwrap())
}

fn html_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(text/html|application/xhtml\+xml)($|;)").unwrap())
}

/// Whether the Content-Type denotes XML (including `+xml` suffixes)
pub fn is_xml(content_type: &str) -> bool {
    xml_re().is_match(content_type.trim())
}

/// Whether the Content-Type denotes JSON (including `+json` suffixes)
pub fn is_json(content_type: &str) -> bool {
    json_re().is_match(content_type.trim())
}

/// Whether the Content-Type denotes HTML or XHTML
pub fn is_html(content_type: &str) -> bool {
    html_re().is_match(content_type.trim())
}

/// Split a Content-Type header into its media type and parameters.
///
/// `"text/html; charset=ISO-8859-1"` becomes
/// `("text/html", {"charset": "ISO-8859-1"})`.
pub fn split_mime(content_type: &str) -> (String, HashMap<String, String>) {
    let mut parts = content_type.split(';');
    let media = parts.next().unwrap_or_default().trim().to_string();
    let params = parts
        .filter_map(|p| {
            let (k, v) = p.split_once('=')?;
            Some((k.trim().to_lowercase(), v.trim().trim_matches('"').to_string()))
        })
        .collect();
    (media, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_types() {
        assert!(is_xml("application/xml"));
        assert!(is_xml("text/xml; charset=utf-8"));
        assert!(is_xml("application/rss+xml"));
        assert!(is_xml("APPLICATION/ATOM+XML"));
        assert!(!is_xml("application/json"));
        assert!(!is_xml("text/xmlish"));
    }

    #[test]
    fn test_json_types() {
        assert!(is_json("application/json"));
        assert!(is_json("application/problem+json; charset=utf-8"));
        assert!(!is_json("text/plain"));
    }

    #[test]
    fn test_html_types() {
        assert!(is_html("text/html"));
        assert!(is_html("text/html; charset=ISO-8859-1"));
        assert!(is_html("application/xhtml+xml"));
        assert!(!is_html("text/plain"));
    }

    #[test]
    fn test_split_mime() {
        let (media, params) = split_mime("text/html; charset=ISO-8859-1");
        assert_eq!(media, "text/html");
        assert_eq!(params["charset"], "ISO-8859-1");

        let (media, params) = split_mime("application/json");
        assert_eq!(media, "application/json");
        assert!(params.is_empty());
    }
}
