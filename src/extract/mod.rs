//! Rule-driven extraction of article fields from fetched pages.
//!
//! Field policy:
//!
//! | Field | Override | Rule outcome | Failure |
//! |-------|----------|--------------|---------|
//! | headline | used verbatim when present | first match, trimmed text | `""` |
//! | author | used verbatim when present | first match, trimmed text | `""` |
//! | content | none | every match, outer HTML | `None`, article invalid |
//!
//! `clean_content` is derived from the content matches with `script`,
//! `iframe`, `img` and `form` subtrees removed and whitespace runs collapsed.
//! Plain string matches (XPath `@attr` / `text()`) carry no markup, so they
//! contribute nothing to the clean text.

pub mod selector;
pub mod xpath;

use crate::config::{SelectorRule, Source};
use crate::errors::{ExtractError, ParseError};
use crate::models::{Article, Overrides};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use selector::Match;
use tracing::{debug, instrument};

/// Subtrees dropped from the clean text.
const STRIPPED_ELEMENTS: [&str; 4] = ["script", "iframe", "img", "form"];

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Decode and parse an HTML page.
///
/// The HTML parser recovers from any malformed markup, so the only documents
/// rejected are empty bodies and bodies that are plainly binary.
pub fn parse_document(bytes: &[u8]) -> Result<Html, ParseError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::Empty);
    }
    let head = &bytes[..bytes.len().min(1024)];
    if head.contains(&0) {
        return Err(ParseError::Binary);
    }
    let text = String::from_utf8_lossy(bytes);
    Ok(Html::parse_document(&text))
}

/// Extract an [`Article`] from a fetched page.
///
/// Returns an error only when the page cannot be parsed. A missing content
/// match yields an invalid article rather than an error.
#[instrument(level = "debug", skip_all, fields(%url, source = %source.name))]
pub fn extract(
    url: &str,
    html: &[u8],
    source: &Source,
    overrides: &Overrides,
) -> Result<Article, ExtractError> {
    let doc = parse_document(html).map_err(|source| ExtractError::Parse {
        url: url.to_string(),
        source,
    })?;

    let headline = text_field(&doc, overrides.headline.as_ref(), source.rules.headline.as_ref());
    let author = text_field(&doc, overrides.author.as_ref(), source.rules.author.as_ref());

    let content = source
        .rules
        .content
        .as_ref()
        .map(|rule| selector::evaluate_all(&doc, rule))
        .filter(|matches| !matches.is_empty());

    let (raw_content, clean_content) = match content {
        Some(matches) => (Some(raw_markup(&matches)), clean_matches(&matches)),
        None => {
            debug!("Content rule matched nothing");
            (None, String::new())
        }
    };

    Ok(Article {
        author,
        url: url.to_string(),
        headline,
        raw_content,
        clean_content,
        source_name: source.name.clone(),
    })
}

fn text_field(doc: &Html, override_value: Option<&String>, rule: Option<&SelectorRule>) -> String {
    if let Some(value) = override_value {
        return value.clone();
    }
    rule.and_then(|rule| selector::evaluate(doc, rule))
        .map(|m| m.text())
        .unwrap_or_default()
}

fn raw_markup(matches: &[Match<'_>]) -> String {
    matches
        .iter()
        .map(|m| match m {
            Match::Element(el) => el.html(),
            Match::Text(text) => text.clone(),
        })
        .collect()
}

fn clean_matches(matches: &[Match<'_>]) -> String {
    matches
        .iter()
        .filter_map(|m| match m {
            Match::Element(el) => Some(clean_content(*el)),
            Match::Text(_) => None,
        })
        .collect()
}

/// Text of `el` with the stripped subtrees left out.
fn visible_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) if STRIPPED_ELEMENTS.contains(&element.name()) => {}
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    visible_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

/// Clean text of a single element.
pub fn clean_content(el: ElementRef<'_>) -> String {
    let mut text = String::new();
    visible_text(el, &mut text);
    collapse_whitespace(&text)
}

/// Replace every run of spaces, tabs and newlines with one space.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text, " ").into_owned()
}
