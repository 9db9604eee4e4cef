//! Evaluation of a single [`SelectorRule`] against a parsed document.
//!
//! Rule failures (malformed selector, unsupported kind, nothing matched) are
//! never raised to callers: [`evaluate`] yields `None` and [`evaluate_all`] an
//! empty list, and each field applies its own defaulting.

use super::xpath::{XPath, XPathError};
use crate::config::{RuleKind, SelectorRule};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::debug;

/// One result of a rule: an element subtree, or a plain string produced by an
/// XPath `@attr` / `text()` step.
#[derive(Debug, Clone)]
pub enum Match<'a> {
    Element(ElementRef<'a>),
    Text(String),
}

impl Match<'_> {
    /// Text content with leading and trailing whitespace trimmed.
    pub fn text(&self) -> String {
        match self {
            Match::Element(el) => el.text().collect::<String>().trim().to_string(),
            Match::Text(text) => text.trim().to_string(),
        }
    }

    /// Link target: the `href` of an element, or the string itself.
    pub fn href(&self) -> Option<String> {
        match self {
            Match::Element(el) => el.value().attr("href").map(|h| h.trim().to_string()),
            Match::Text(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid CSS selector `{0}`")]
    Css(String),
    #[error("invalid XPath `{path}`: {source}")]
    XPath { path: String, source: XPathError },
    #[error("unsupported rule type")]
    Unsupported,
}

/// All matches of `rule`, in document order, or the reason the rule could not
/// be applied.
pub fn try_evaluate_all<'a>(doc: &'a Html, rule: &SelectorRule) -> Result<Vec<Match<'a>>, RuleError> {
    match rule.kind {
        RuleKind::Css => {
            let selector =
                Selector::parse(&rule.path).map_err(|_| RuleError::Css(rule.path.clone()))?;
            Ok(doc.select(&selector).map(Match::Element).collect())
        }
        RuleKind::XPath => {
            let xpath = XPath::parse(&rule.path).map_err(|source| RuleError::XPath {
                path: rule.path.clone(),
                source,
            })?;
            Ok(xpath.select(doc))
        }
        RuleKind::Unsupported => Err(RuleError::Unsupported),
    }
}

/// All matches of `rule`; an unusable rule matches nothing.
pub fn evaluate_all<'a>(doc: &'a Html, rule: &SelectorRule) -> Vec<Match<'a>> {
    match try_evaluate_all(doc, rule) {
        Ok(matches) => matches,
        Err(e) => {
            debug!(error = %e, "Rule could not be applied");
            Vec::new()
        }
    }
}

/// The first match of `rule`, if any.
pub fn evaluate<'a>(doc: &'a Html, rule: &SelectorRule) -> Option<Match<'a>> {
    evaluate_all(doc, rule).into_iter().next()
}
