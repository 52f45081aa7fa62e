use anyhow::{Result, bail};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const SUMMARY_MAX_CHARS: usize = 500;

static BLANK_LINE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").unwrap());
static TEMPLATE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{\{.*?\}\}").unwrap());
static WIKI_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]").unwrap());

/// A way of turning wiki markup into prose.
pub trait MarkupStripper {
    fn name(&self) -> &'static str;
    fn strip(&self, wikitext: &str) -> Result<String>;
}

/// Removes `{{...}}` blocks and flattens `[[...]]` links to their last segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexStripper;

impl RegexStripper {
    pub fn strip_text(&self, wikitext: &str) -> String {
        let without_templates = TEMPLATE_BLOCK.replace_all(wikitext, "");
        WIKI_LINK
            .replace_all(&without_templates, |caps: &Captures| {
                let inner = &caps[1];
                inner.rsplit('|').next().unwrap_or(inner).to_string()
            })
            .into_owned()
    }
}

impl MarkupStripper for RegexStripper {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn strip(&self, wikitext: &str) -> Result<String> {
        Ok(self.strip_text(wikitext))
    }
}

#[cfg(feature = "markup-parser")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserStripper;

#[cfg(feature = "markup-parser")]
impl MarkupStripper for ParserStripper {
    fn name(&self) -> &'static str {
        "parser"
    }

    fn strip(&self, wikitext: &str) -> Result<String> {
        let nodes = crate::markup::parse(wikitext)?;
        Ok(crate::markup::strip_code(&nodes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizerKind {
    Parser,
    Regex,
}

impl SummarizerKind {
    pub fn parse(value: &str) -> Result<Self> {
        if value.eq_ignore_ascii_case("parser") {
            return Ok(Self::Parser);
        }
        if value.eq_ignore_ascii_case("regex") {
            return Ok(Self::Regex);
        }
        bail!("unsupported summarizer: {value} (expected parser|regex)")
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parser => "parser",
            Self::Regex => "regex",
        }
    }

    /// The strongest strategy compiled into this build.
    pub fn best_available() -> Self {
        if parser_available() {
            Self::Parser
        } else {
            Self::Regex
        }
    }
}

pub fn parser_available() -> bool {
    cfg!(feature = "markup-parser")
}

/// Produces bounded plain-text excerpts from page wikitext.
pub struct Summarizer {
    primary: Box<dyn MarkupStripper>,
    fallback: RegexStripper,
}

impl Summarizer {
    pub fn new(primary: Box<dyn MarkupStripper>) -> Self {
        Self {
            primary,
            fallback: RegexStripper,
        }
    }

    /// Picks the requested strategy, or the best available one when `None`.
    pub fn select(preference: Option<SummarizerKind>) -> Self {
        match preference.unwrap_or_else(SummarizerKind::best_available) {
            SummarizerKind::Parser => Self::with_parser(),
            SummarizerKind::Regex => Self::new(Box::new(RegexStripper)),
        }
    }

    #[cfg(feature = "markup-parser")]
    fn with_parser() -> Self {
        Self::new(Box::new(ParserStripper))
    }

    #[cfg(not(feature = "markup-parser"))]
    fn with_parser() -> Self {
        warn!("markup parser is not compiled in; using the regex summarizer");
        Self::new(Box::new(RegexStripper))
    }

    pub fn strategy(&self) -> &'static str {
        self.primary.name()
    }

    pub fn summarize(&self, wikitext: &str) -> String {
        if wikitext.is_empty() {
            return String::new();
        }
        let stripped = match self.primary.strip(wikitext) {
            Ok(text) => text,
            Err(error) => {
                warn!(
                    strategy = self.primary.name(),
                    "markup parse failed, using regex fallback: {error:#}"
                );
                self.fallback.strip_text(wikitext)
            }
        };
        finish_summary(&stripped)
    }
}

impl Default for Summarizer {
    fn default() -> Self {
        Self::select(None)
    }
}

/// Collapses blank-line runs, trims, and hard-cuts to [`SUMMARY_MAX_CHARS`].
pub fn finish_summary(text: &str) -> String {
    let collapsed = BLANK_LINE_RUNS.replace_all(text, "\n");
    collapsed.trim().chars().take(SUMMARY_MAX_CHARS).collect()
}
