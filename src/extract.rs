//! Pulls tokens (valid times, image names, link targets) out of index pages.
//!
//! Everything here is a pure function of the page content and the rule.

use std::fmt;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

const SNIPPET_LEN: usize = 160;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExtractionRule {
    /// Search the text of each `container` element (or the whole page) with `pattern`.
    Text {
        #[serde(default)]
        container: Option<String>,
        pattern: String,
    },
    /// Search `attribute` of each element matching `selector` with `pattern`.
    Attribute {
        selector: String,
        attribute: String,
        #[serde(default)]
        filter: Option<AttributeFilter>,
        pattern: String,
    },
}

/// Only elements whose `attribute` matches `pattern` are candidates.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AttributeFilter {
    pub attribute: String,
    pub pattern: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ExtractionFailure {
    #[error("no match for {rule} in {snippet:?}")]
    NoMatch { rule: String, snippet: String },
    #[error("invalid rule {rule}: {reason}")]
    InvalidRule { rule: String, reason: String },
}

impl fmt::Display for ExtractionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionRule::Text { container, pattern } => match container {
                Some(container) => write!(f, "/{}/ in {}", pattern, container),
                None => write!(f, "/{}/", pattern),
            },
            ExtractionRule::Attribute {
                selector,
                attribute,
                filter,
                pattern,
            } => {
                write!(f, "/{}/ in {}[{}]", pattern, selector, attribute)?;
                if let Some(filter) = filter {
                    write!(f, " where {} =~ /{}/", filter.attribute, filter.pattern)?;
                }
                Ok(())
            }
        }
    }
}

impl ExtractionRule {
    /// Copy of the rule with every `{n}` replaced by `n`.
    pub fn for_index(&self, n: Option<u32>) -> ExtractionRule {
        let Some(n) = n else {
            return self.clone();
        };
        let n = n.to_string();
        let sub = |s: &String| s.replace("{n}", &n);

        match self {
            ExtractionRule::Text { container, pattern } => ExtractionRule::Text {
                container: container.as_ref().map(sub),
                pattern: sub(pattern),
            },
            ExtractionRule::Attribute {
                selector,
                attribute,
                filter,
                pattern,
            } => ExtractionRule::Attribute {
                selector: sub(selector),
                attribute: attribute.clone(),
                filter: filter.clone(),
                pattern: sub(pattern),
            },
        }
    }
}

/// Returns the first token the rule finds in `content`.
pub fn extract(rule: &ExtractionRule, content: &str) -> Result<String, ExtractionFailure> {
    candidates(rule, content, usize::MAX)?
        .into_iter()
        .flatten()
        .next()
        .ok_or_else(|| no_match(rule, content))
}

/// Returns one entry per candidate element, in document order, for at most
/// `limit` candidates. An entry is `None` when the candidate did not match the
/// pattern. Fails when the page has no candidate at all.
pub fn candidates(
    rule: &ExtractionRule,
    content: &str,
    limit: usize,
) -> Result<Vec<Option<String>>, ExtractionFailure> {
    let document = Html::parse_document(content);

    let found: Vec<Option<String>> = match rule {
        ExtractionRule::Text { container, pattern } => {
            let pattern = compile(rule, pattern)?;
            match container {
                Some(container) => {
                    let selector = selector(rule, container)?;
                    document
                        .select(&selector)
                        .take(limit)
                        .map(|element| capture(&pattern, &element_text(&element)))
                        .collect()
                }
                None => vec![capture(
                    &pattern,
                    &element_text(&document.root_element()),
                )],
            }
        }
        ExtractionRule::Attribute {
            selector: css,
            attribute,
            filter,
            pattern,
        } => {
            let pattern = compile(rule, pattern)?;
            let css = selector(rule, css)?;
            let filter = match filter {
                Some(filter) => Some((filter.attribute.as_str(), compile(rule, &filter.pattern)?)),
                None => None,
            };

            document
                .select(&css)
                .filter(|element| match &filter {
                    Some((name, re)) => element
                        .value()
                        .attr(name)
                        .is_some_and(|value| re.is_match(value)),
                    None => true,
                })
                .take(limit)
                .map(|element| {
                    element
                        .value()
                        .attr(attribute)
                        .and_then(|value| capture(&pattern, value))
                })
                .collect()
        }
    };

    if found.is_empty() {
        return Err(no_match(rule, content));
    }
    Ok(found)
}

/// Trimmed text of the first `<pre>` block.
pub fn pre_text(content: &str) -> Result<String, ExtractionFailure> {
    let rule = ExtractionRule::Text {
        container: Some("pre".to_string()),
        pattern: r"(?s)\S.*\S|\S".to_string(),
    };
    candidates(&rule, content, 1)?
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| no_match(&rule, content))
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect()
}

fn capture(pattern: &Regex, haystack: &str) -> Option<String> {
    let caps = pattern.captures(haystack)?;
    caps.get(1)
        .or_else(|| caps.get(0))
        .map(|m| m.as_str().to_string())
}

fn compile(rule: &ExtractionRule, pattern: &str) -> Result<Regex, ExtractionFailure> {
    Regex::new(pattern).map_err(|e| ExtractionFailure::InvalidRule {
        rule: rule.to_string(),
        reason: e.to_string(),
    })
}

fn selector(rule: &ExtractionRule, css: &str) -> Result<Selector, ExtractionFailure> {
    Selector::parse(css).map_err(|e| ExtractionFailure::InvalidRule {
        rule: rule.to_string(),
        reason: e.to_string(),
    })
}

fn no_match(rule: &ExtractionRule, content: &str) -> ExtractionFailure {
    ExtractionFailure::NoMatch {
        rule: rule.to_string(),
        snippet: content.chars().take(SNIPPET_LEN).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTLOOK_PAGE: &str = r#"<html><body><table>
        <tr><td class="zz">Updated: Mon Apr 6 1259 UTC 2020 (Print Version)</td></tr>
        <tr><td class="zz">  Valid 061300Z - 071200Z &nbsp; 1259 1300 UTC Day 1 Convective Outlook</td></tr>
        </table></body></html>"#;

    const SHORT_RANGE_PAGE: &str = r#"<html><body>
        <img src="/images/logo.gif" alt="NOAA logo">
        <img src="/basicwx/92fndfd_sm.gif" alt="6-hour fcst valid 18 or 00 UTC">
        <img src="/basicwx/94fndfd_sm.gif" alt="12-hour fcst valid 00 or 06 UTC">
        <img src="/basicwx/broken.gif" alt="18-hour fcst valid 06 or 12 UTC">
        <img src="/basicwx/98fndfd_sm.gif" alt="24-hour fcst valid 12 or 18 UTC">
        <img src="/basicwx/99fndfd_sm.gif" alt="30-hour fcst valid 18 or 00 UTC">
        </body></html>"#;

    fn timestamp_rule() -> ExtractionRule {
        ExtractionRule::Text {
            container: Some("td.zz".to_string()),
            pattern: r"\d{4} (\d{4}) UTC Day".to_string(),
        }
    }

    fn short_range_rule() -> ExtractionRule {
        ExtractionRule::Attribute {
            selector: "img".to_string(),
            attribute: "src".to_string(),
            filter: Some(AttributeFilter {
                attribute: "alt".to_string(),
                pattern: r"\d{1,2}-hour fcst valid \d{2} or \d{2} UTC".to_string(),
            }),
            pattern: r"/(\w+)_sm".to_string(),
        }
    }

    #[test]
    fn extracts_valid_time_from_outlook_page() {
        assert_eq!(
            extract(&timestamp_rule(), OUTLOOK_PAGE).expect("valid time found"),
            "1300"
        );
    }

    #[test]
    fn missing_valid_time_reports_rule_and_snippet() {
        let page = r#"<table><tr><td class="zz">No outlook issued</td></tr></table>"#;
        match extract(&timestamp_rule(), page) {
            Err(ExtractionFailure::NoMatch { rule, snippet }) => {
                assert!(rule.contains("td.zz"));
                assert!(snippet.contains("No outlook issued"));
            }
            other => panic!("expected no match, got {:?}", other),
        }
    }

    #[test]
    fn missing_container_is_a_failure() {
        assert!(matches!(
            candidates(&timestamp_rule(), "<html><p>moved</p></html>", 10),
            Err(ExtractionFailure::NoMatch { .. })
        ));
    }

    #[test]
    fn candidates_are_bounded_and_positional() {
        let found = candidates(&short_range_rule(), SHORT_RANGE_PAGE, 4).expect("candidates");
        assert_eq!(
            found,
            vec![
                Some("92fndfd".to_string()),
                Some("94fndfd".to_string()),
                None,
                Some("98fndfd".to_string()),
            ]
        );
    }

    #[test]
    fn whole_match_is_used_without_capture_group() {
        let rule = ExtractionRule::Attribute {
            selector: "img".to_string(),
            attribute: "src".to_string(),
            filter: None,
            pattern: r"/noaa/noaad\d\.gif\?\d+".to_string(),
        };
        let page = r#"<img src="/images/banner.png"><img src="/noaa/noaad1.gif?1586181600">"#;
        assert_eq!(
            extract(&rule, page).expect("chart found"),
            "/noaa/noaad1.gif?1586181600"
        );
    }

    #[test]
    fn index_placeholder_is_substituted() {
        let rule = ExtractionRule::Attribute {
            selector: "a#day{n}".to_string(),
            attribute: "href".to_string(),
            filter: None,
            pattern: ".+".to_string(),
        };
        let page = r#"<a id="day1" href="/qpf/fill_94qwbg.gif">Day 1</a>
                      <a id="day2" href="/qpf/fill_98qwbg.gif">Day 2</a>"#;
        assert_eq!(
            extract(&rule.for_index(Some(2)), page).expect("anchor found"),
            "/qpf/fill_98qwbg.gif"
        );
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let rule = ExtractionRule::Text {
            container: None,
            pattern: "(unclosed".to_string(),
        };
        assert!(matches!(
            extract(&rule, "<p>x</p>"),
            Err(ExtractionFailure::InvalidRule { .. })
        ));
    }

    #[test]
    fn pre_text_is_trimmed() {
        let page = "<html><body><pre>\n  ATCSCC ADVZY 001  \n\n</pre><pre>second</pre></body></html>";
        assert_eq!(pre_text(page).expect("pre found"), "ATCSCC ADVZY 001");
    }
}
