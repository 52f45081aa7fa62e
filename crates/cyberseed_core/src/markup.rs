//! Small structured reader for MediaWiki markup.
//!
//! It does not try to render pages. It only recognizes enough structure to
//! throw away the non-prose parts (templates, tables, references, media) and
//! keep the readable text of links and headings.

use anyhow::{Result, bail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Heading(Vec<Node>),
    WikiLink {
        target: String,
        label: Option<Vec<Node>>,
    },
    ExternalLink {
        label: Option<Vec<Node>>,
    },
    /// Markup with no prose: templates, comments, tables, refs, tags, quotes,
    /// media and category links, behavior switches.
    Hidden,
}

const HIDDEN_LINK_PREFIXES: [&str; 3] = ["file:", "image:", "category:"];
const EXTERNAL_SCHEMES: [&str; 5] = ["http://", "https://", "//", "ftp://", "mailto:"];
const REF_CLOSE: &str = "</ref>";

pub fn parse(input: &str) -> Result<Vec<Node>> {
    Parser { input, pos: 0 }.parse_all()
}

/// Plain text of a parsed document.
pub fn strip_code(nodes: &[Node]) -> String {
    let mut output = String::new();
    render_into(nodes, &mut output);
    output
}

fn render_into(nodes: &[Node], output: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => output.push_str(&decode_entities(text)),
            Node::Heading(children) => render_into(children, output),
            Node::WikiLink { target, label } => match label {
                Some(label) => render_into(label, output),
                None => output.push_str(target.trim_start_matches(':')),
            },
            Node::ExternalLink { label } => {
                if let Some(label) = label {
                    render_into(label, output);
                }
            }
            Node::Hidden => {}
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_line_start(&self) -> bool {
        self.pos == 0 || self.input.as_bytes()[self.pos - 1] == b'\n'
    }

    fn parse_all(mut self) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        let mut text_start = self.pos;
        while self.pos < self.input.len() {
            let start = self.pos;
            match self.next_markup()? {
                Some(node) => {
                    if text_start < start {
                        nodes.push(Node::Text(self.input[text_start..start].to_string()));
                    }
                    nodes.push(node);
                    text_start = self.pos;
                }
                None => {
                    self.pos += self.rest().chars().next().map_or(1, char::len_utf8);
                }
            }
        }
        if text_start < self.input.len() {
            nodes.push(Node::Text(self.input[text_start..].to_string()));
        }
        Ok(nodes)
    }

    /// Consumes one markup construct at the cursor, if there is one.
    fn next_markup(&mut self) -> Result<Option<Node>> {
        let rest = self.rest();

        if rest.starts_with("<!--") {
            let Some(end) = rest.find("-->") else {
                bail!("unterminated comment at byte {}", self.pos);
            };
            self.pos += end + 3;
            return Ok(Some(Node::Hidden));
        }

        if rest.starts_with("{{") {
            let Some(len) = balanced_span(rest, "{{", "}}") else {
                bail!("unterminated template at byte {}", self.pos);
            };
            self.pos += len;
            return Ok(Some(Node::Hidden));
        }

        if rest.starts_with("{|") && self.at_line_start() {
            let Some(len) = balanced_span(rest, "{|", "|}") else {
                bail!("unterminated table at byte {}", self.pos);
            };
            self.pos += len;
            return Ok(Some(Node::Hidden));
        }

        if rest.starts_with("[[") {
            let Some(len) = balanced_span(rest, "[[", "]]") else {
                bail!("unterminated link at byte {}", self.pos);
            };
            let node = wiki_link(&rest[2..len - 2])?;
            self.pos += len;
            return Ok(Some(node));
        }

        if rest.starts_with('[')
            && EXTERNAL_SCHEMES
                .iter()
                .any(|scheme| starts_with_ignore_case(&rest[1..], scheme))
            && let Some(end) = rest.find(']')
        {
            let node = external_link(&rest[1..end])?;
            self.pos += end + 1;
            return Ok(Some(node));
        }

        if rest.starts_with("''") {
            self.pos += rest.bytes().take_while(|byte| *byte == b'\'').count();
            return Ok(Some(Node::Hidden));
        }

        if rest.starts_with('=')
            && self.at_line_start()
            && let Some((line_len, content)) = heading(rest)
        {
            let children = parse(content)?;
            self.pos += line_len;
            return Ok(Some(Node::Heading(children)));
        }

        if is_ref_open(rest) {
            let Some(len) = ref_span(rest) else {
                bail!("unterminated <ref> at byte {}", self.pos);
            };
            self.pos += len;
            return Ok(Some(Node::Hidden));
        }

        if let Some(len) = html_tag_len(rest) {
            self.pos += len;
            return Ok(Some(Node::Hidden));
        }

        if let Some(len) = behavior_switch_len(rest) {
            self.pos += len;
            return Ok(Some(Node::Hidden));
        }

        Ok(None)
    }
}

/// Byte length of the construct opened at the start of `text`, honoring nesting.
fn balanced_span(text: &str, open: &str, close: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut index = 0usize;
    while index < bytes.len() {
        if bytes[index..].starts_with(open.as_bytes()) {
            depth += 1;
            index += open.len();
        } else if bytes[index..].starts_with(close.as_bytes()) {
            depth = depth.saturating_sub(1);
            index += close.len();
            if depth == 0 {
                return Some(index);
            }
        } else {
            index += 1;
        }
    }
    None
}

fn wiki_link(inner: &str) -> Result<Node> {
    let (target, rest) = match inner.split_once('|') {
        Some((target, rest)) => (target.trim(), Some(rest)),
        None => (inner.trim(), None),
    };
    let lowered = target.to_ascii_lowercase();
    if HIDDEN_LINK_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
    {
        return Ok(Node::Hidden);
    }

    let label = match rest.and_then(|rest| rest.rsplit('|').next()) {
        Some(label) if !label.trim().is_empty() => Some(parse(label)?),
        _ => None,
    };
    Ok(Node::WikiLink {
        target: target.to_string(),
        label,
    })
}

fn external_link(inner: &str) -> Result<Node> {
    let label = match inner.split_once(char::is_whitespace) {
        Some((_, label)) if !label.trim().is_empty() => Some(parse(label.trim())?),
        _ => None,
    };
    Ok(Node::ExternalLink { label })
}

fn heading(text: &str) -> Option<(usize, &str)> {
    let line_len = text.find('\n').unwrap_or(text.len());
    let trimmed = text[..line_len].trim_end();
    let start_equals = trimmed.bytes().take_while(|byte| *byte == b'=').count();
    let end_equals = trimmed.bytes().rev().take_while(|byte| *byte == b'=').count();
    if start_equals == 0 || start_equals != end_equals || trimmed.len() <= start_equals * 2 {
        return None;
    }
    let content = trimmed[start_equals..trimmed.len() - end_equals].trim();
    if content.is_empty() {
        return None;
    }
    Some((line_len, content))
}

fn is_ref_open(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() > 4
        && bytes[..4].eq_ignore_ascii_case(b"<ref")
        && matches!(bytes[4], b'>' | b' ' | b'/')
}

fn ref_span(text: &str) -> Option<usize> {
    let head_end = text.find('>')?;
    if text[..head_end].ends_with('/') {
        return Some(head_end + 1);
    }
    let close = text[head_end..]
        .match_indices("</")
        .map(|(offset, _)| head_end + offset)
        .find(|&start| starts_with_ignore_case(&text[start..], REF_CLOSE))?;
    Some(close + REF_CLOSE.len())
}

/// ASCII case-insensitive prefix test that looks at no more than `prefix.len()` bytes.
fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.as_bytes()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
}

fn html_tag_len(text: &str) -> Option<usize> {
    let body = text.strip_prefix('<')?;
    let name = body.strip_prefix('/').unwrap_or(body);
    if !name.starts_with(|ch: char| ch.is_ascii_alphabetic()) {
        return None;
    }
    let end = text.find('>')?;
    if text[..end].contains('\n') || text[1..end].contains('<') {
        return None;
    }
    Some(end + 1)
}

fn behavior_switch_len(text: &str) -> Option<usize> {
    let body = text.strip_prefix("__")?;
    let word_len = body
        .bytes()
        .take_while(|byte| byte.is_ascii_uppercase())
        .count();
    if word_len == 0 || !body[word_len..].starts_with("__") {
        return None;
    }
    Some(word_len + 4)
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&nbsp;", " ")
        .replace("&ndash;", "\u{2013}")
        .replace("&mdash;", "\u{2014}")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
