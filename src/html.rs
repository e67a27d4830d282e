//! Regex-driven HTML extraction.
//!
//! Portal pages are old server-rendered markup; the handful of elements the
//! crate needs are located by tag name and attributes, with element bodies
//! balanced against nested tags of the same name.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Compiles a regex at static init; panics on invalid pattern.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#,
    )
});

static TAG_STRIP_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?s)<[^>]*>"));

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);"));

const VOID_TAGS: [&str; 8] = ["br", "hr", "img", "input", "meta", "link", "area", "base"];

/// Attribute condition used to select elements.
#[derive(Debug, Clone, Copy)]
pub enum AttrFilter<'a> {
    /// Every element of the tag.
    Any,
    /// Attribute equals the value exactly.
    Equals(&'a str, &'a str),
    /// The `class` attribute contains the class token.
    HasClass(&'a str),
    /// Attribute value matches the regex somewhere.
    Matches(&'a str, &'a Regex),
}

impl AttrFilter<'_> {
    fn accepts(&self, element: &Element) -> bool {
        match self {
            Self::Any => true,
            Self::Equals(name, value) => element.attr(name) == Some(*value),
            Self::HasClass(class) => element.has_class(class),
            Self::Matches(name, regex) => element.attr(name).is_some_and(|v| regex.is_match(v)),
        }
    }
}

/// An element located in a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    attrs: HashMap<String, String>,
    /// Raw markup between the opening and closing tag.
    pub inner_html: String,
    /// Byte offset just past the element in the scanned document.
    pub end: usize,
}

impl Element {
    /// Returns an attribute value (names are case-insensitive).
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns true if the `class` attribute contains `class` as a token.
    #[must_use]
    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|value| value.split_whitespace().any(|token| token == class))
    }

    /// Returns the element text with tags stripped and entities decoded.
    #[must_use]
    pub fn text(&self) -> String {
        decode_entities(&strip_tags(&self.inner_html))
    }
}

#[derive(Debug)]
struct Token<'h> {
    start: usize,
    end: usize,
    closing: bool,
    self_closing: bool,
    attrs: &'h str,
}

/// Finds every `tag` element accepted by `filter`, in document order.
#[must_use]
pub fn find_elements(html: &str, tag: &str, filter: AttrFilter<'_>) -> Vec<Element> {
    let tokens = tokenize(html, tag);
    let void = VOID_TAGS.contains(&tag.to_ascii_lowercase().as_str());
    let mut elements = Vec::new();

    for (index, token) in tokens.iter().enumerate() {
        if token.closing {
            continue;
        }

        let attrs = parse_attributes(token.attrs);
        let (inner_html, end) = if void || token.self_closing {
            (String::new(), token.end)
        } else {
            match matching_close(&tokens, index) {
                Some(close) => (html[token.end..close.start].to_string(), close.end),
                None => {
                    // Unterminated: the body runs until the next opening tag of
                    // the same name, or the end of the document.
                    let stop = tokens[index + 1..]
                        .iter()
                        .find(|t| !t.closing)
                        .map_or(html.len(), |t| t.start);
                    (html[token.end..stop].to_string(), stop)
                }
            }
        };

        let element = Element {
            attrs,
            inner_html,
            end,
        };
        if filter.accepts(&element) {
            elements.push(element);
        }
    }

    elements
}

/// Finds the first `tag` element accepted by `filter`.
#[must_use]
pub fn find_element(html: &str, tag: &str, filter: AttrFilter<'_>) -> Option<Element> {
    find_elements(html, tag, filter).into_iter().next()
}

fn tokenize<'h>(html: &'h str, tag: &str) -> Vec<Token<'h>> {
    let pattern = format!(
        r#"(?is)<(/?){}\b((?:[^>"']|"[^"]*"|'[^']*')*)>"#,
        regex::escape(tag)
    );
    let Ok(regex) = Regex::new(&pattern) else {
        return Vec::new();
    };

    regex
        .captures_iter(html)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let attrs = caps.get(2).map_or("", |m| m.as_str());
            Some(Token {
                start: whole.start(),
                end: whole.end(),
                closing: caps.get(1).is_some_and(|m| !m.as_str().is_empty()),
                self_closing: attrs.trim_end().ends_with('/'),
                attrs,
            })
        })
        .collect()
}

fn matching_close<'t, 'h>(tokens: &'t [Token<'h>], open: usize) -> Option<&'t Token<'h>> {
    let mut depth = 1usize;
    for token in &tokens[open + 1..] {
        if token.closing {
            depth -= 1;
            if depth == 0 {
                return Some(token);
            }
        } else if !token.self_closing {
            depth += 1;
        }
    }
    None
}

fn parse_attributes(raw: &str) -> HashMap<String, String> {
    ATTR_RE
        .captures_iter(raw.trim_end_matches('/'))
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str());
            Some((name, decode_entities(value)))
        })
        .collect()
}

/// Removes every tag from `html`, keeping text and whitespace.
#[must_use]
pub fn strip_tags(html: &str) -> String {
    TAG_STRIP_RE.replace_all(html, "").into_owned()
}

/// Decodes common named and numeric character references.
#[must_use]
pub fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match entity {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some('\u{a0}'),
                    _ => None,
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}
