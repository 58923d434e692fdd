//! Minimal wikitext tree: templates, wikilinks, template arguments and plain
//! text. Everything else (headings, formatting, tags, tables) is kept as
//! opaque text. All strings borrow from the parsed source.
//!
//! Unclosed `{{`, `{{{` and `[[` are treated as text, and so are openers
//! nested deeper than [`MAX_DEPTH`]. HTML comments and `<nowiki>` sections
//! never contribute structure.

use crate::error::WikitextError;
use std::borrow::Cow;
use std::collections::HashSet;

/// Openers nested deeper than this are left as text.
pub const MAX_DEPTH: usize = 64;

/// Construct attempts allowed per body before parsing gives up.
pub const MAX_CONSTRUCTS: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<'a> {
    Text(&'a str),
    Template(Template<'a>),
    Link(WikiLink<'a>),
    /// `{{{name|default}}}`
    Argument(Vec<Node<'a>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template<'a> {
    /// Raw name, untrimmed.
    pub name: &'a str,
    pub params: Vec<Parameter<'a>>,
    name_nodes: Vec<Node<'a>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter<'a> {
    /// Raw name before `=`, or `1`, `2`, ... for positional parameters.
    pub name: Cow<'a, str>,
    /// Raw value, unrendered and untrimmed.
    pub value: &'a str,
    nodes: Vec<Node<'a>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiLink<'a> {
    /// Raw target, the text before the first `|`.
    pub title: &'a str,
    nodes: Vec<Node<'a>>,
}

/// A parsed piece of wikitext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wikicode<'a> {
    pub nodes: Vec<Node<'a>>,
}

impl<'a> Wikicode<'a> {
    /// Every template, nested ones included, in order of appearance.
    pub fn templates(&self) -> Vec<&Template<'a>> {
        let mut out = Vec::new();
        walk(&self.nodes, &mut |node| {
            if let Node::Template(t) = node {
                out.push(t);
            }
        });
        out
    }

    /// Every wikilink, nested ones included, in order of appearance.
    pub fn wikilinks(&self) -> Vec<&WikiLink<'a>> {
        let mut out = Vec::new();
        walk(&self.nodes, &mut |node| {
            if let Node::Link(l) = node {
                out.push(l);
            }
        });
        out
    }
}

fn walk<'n, 'a, F>(nodes: &'n [Node<'a>], visit: &mut F)
where
    F: FnMut(&'n Node<'a>),
{
    for node in nodes {
        visit(node);
        match node {
            Node::Text(_) => {}
            Node::Template(t) => {
                walk(&t.name_nodes, visit);
                for param in &t.params {
                    walk(&param.nodes, visit);
                }
            }
            Node::Link(l) => walk(&l.nodes, visit),
            Node::Argument(nodes) => walk(nodes, visit),
        }
    }
}

/// Parses `src`. Fails only when the body needs more than
/// [`MAX_CONSTRUCTS`] construct attempts.
pub fn parse(src: &str) -> Result<Wikicode<'_>, WikitextError> {
    parse_with_limit(src, MAX_CONSTRUCTS)
}

pub(crate) fn parse_with_limit(src: &str, max_constructs: usize) -> Result<Wikicode<'_>, WikitextError> {
    let mut parser = Parser {
        src,
        failed: HashSet::new(),
        attempts: 0,
        max_constructs,
    };
    let seq = parser.parse_seq(0, 0, &[])?;
    Ok(Wikicode { nodes: seq.nodes })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Pipe,
    CloseTemplate,
    CloseLink,
    CloseArgument,
}

impl Stop {
    fn token(self) -> &'static [u8] {
        match self {
            Stop::Pipe => b"|",
            Stop::CloseTemplate => b"}}",
            Stop::CloseLink => b"]]",
            Stop::CloseArgument => b"}}}",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Construct {
    Template,
    Link,
    Argument,
}

/// A run of nodes up to a stop token.
struct Seq<'a> {
    nodes: Vec<Node<'a>>,
    /// Offset of the stop token (or end of input).
    end: usize,
    /// Offset just past the stop token.
    next: usize,
    stop: Option<Stop>,
    /// First top-level `=`.
    eq: Option<usize>,
}

struct Parser<'a> {
    src: &'a str,
    // An opener that fails to close fails the same way from any context.
    failed: HashSet<(usize, Construct)>,
    attempts: usize,
    max_constructs: usize,
}

impl<'a> Parser<'a> {
    /// Whether an opener at `open` is worth trying. Openers too deep are
    /// refused without being memoised: the same opener may still close when
    /// it is reached again from a shallower context.
    fn attempt(&mut self, open: usize, depth: usize, construct: Construct) -> Result<bool, WikitextError> {
        if depth >= MAX_DEPTH || self.failed.contains(&(open, construct)) {
            return Ok(false);
        }
        self.attempts += 1;
        if self.attempts > self.max_constructs {
            return Err(WikitextError::TooManyConstructs {
                limit: self.max_constructs,
                offset: open,
            });
        }
        Ok(true)
    }

    fn parse_seq(&mut self, start: usize, depth: usize, stops: &[Stop]) -> Result<Seq<'a>, WikitextError> {
        let src = self.src;
        let bytes = src.as_bytes();
        let mut nodes = Vec::new();
        let mut text_start = start;
        let mut eq = None;
        let mut i = start;

        while i < bytes.len() {
            let rest = &bytes[i..];

            if rest.starts_with(b"<!--") {
                i = find(bytes, i + 4, b"-->").map_or(bytes.len(), |p| p + 3);
                continue;
            }
            if starts_with_ignore_case(rest, b"<nowiki>") {
                if let Some(p) = find_ignore_case(bytes, i + 8, b"</nowiki>") {
                    i = p + 9;
                    continue;
                }
            }

            if let Some(stop) = stops.iter().copied().find(|s| rest.starts_with(s.token())) {
                push_text(&mut nodes, &src[text_start..i]);
                return Ok(Seq {
                    nodes,
                    end: i,
                    next: i + stop.token().len(),
                    stop: Some(stop),
                    eq,
                });
            }

            let parsed = if rest.starts_with(b"{{{") {
                self.parse_argument(i, depth)?
            } else if rest.starts_with(b"{{") {
                self.parse_template(i, depth)?
            } else if rest.starts_with(b"[[") {
                self.parse_link(i, depth)?
            } else {
                None
            };

            match parsed {
                Some((node, next)) => {
                    push_text(&mut nodes, &src[text_start..i]);
                    nodes.push(node);
                    i = next;
                    text_start = i;
                }
                None => {
                    if bytes[i] == b'=' && eq.is_none() {
                        eq = Some(i);
                    }
                    i += 1;
                }
            }
        }

        push_text(&mut nodes, &src[text_start..]);
        Ok(Seq {
            nodes,
            end: bytes.len(),
            next: bytes.len(),
            stop: None,
            eq,
        })
    }

    fn parse_template(&mut self, open: usize, depth: usize) -> Result<Option<(Node<'a>, usize)>, WikitextError> {
        if !self.attempt(open, depth, Construct::Template)? {
            return Ok(None);
        }

        let src = self.src;
        let mut segments: Vec<(usize, Seq<'a>)> = Vec::new();
        let mut pos = open + 2;
        let close = loop {
            let seq = self.parse_seq(pos, depth + 1, &[Stop::Pipe, Stop::CloseTemplate])?;
            match seq.stop {
                Some(Stop::Pipe) => {
                    let next = seq.next;
                    segments.push((pos, seq));
                    pos = next;
                }
                Some(_) => {
                    let next = seq.next;
                    segments.push((pos, seq));
                    break next;
                }
                None => {
                    self.failed.insert((open, Construct::Template));
                    return Ok(None);
                }
            }
        };

        let mut segments = segments.into_iter();
        let (name_start, name_seq) = match segments.next() {
            Some(first) => first,
            None => return Ok(None),
        };
        let name = &src[name_start..name_seq.end];
        if name.trim().is_empty() {
            self.failed.insert((open, Construct::Template));
            return Ok(None);
        }

        let mut params = Vec::new();
        let mut position = 0;
        for (start, seq) in segments {
            let param = match seq.eq {
                Some(eq) => Parameter {
                    name: Cow::Borrowed(&src[start..eq]),
                    value: &src[eq + 1..seq.end],
                    nodes: seq.nodes,
                },
                None => {
                    position += 1;
                    Parameter {
                        name: Cow::Owned(position.to_string()),
                        value: &src[start..seq.end],
                        nodes: seq.nodes,
                    }
                }
            };
            params.push(param);
        }

        let template = Template {
            name,
            params,
            name_nodes: name_seq.nodes,
        };
        Ok(Some((Node::Template(template), close)))
    }

    fn parse_link(&mut self, open: usize, depth: usize) -> Result<Option<(Node<'a>, usize)>, WikitextError> {
        if !self.attempt(open, depth, Construct::Link)? {
            return Ok(None);
        }

        let src = self.src;
        let title_start = open + 2;
        let title = self.parse_seq(title_start, depth + 1, &[Stop::Pipe, Stop::CloseLink])?;
        let link = match title.stop {
            Some(Stop::CloseLink) => Some((
                WikiLink {
                    title: &src[title_start..title.end],
                    nodes: title.nodes,
                },
                title.next,
            )),
            Some(_) => {
                let text_start = title.next;
                let text = self.parse_seq(text_start, depth + 1, &[Stop::CloseLink])?;
                match text.stop {
                    Some(_) => {
                        let mut nodes = title.nodes;
                        nodes.extend(text.nodes);
                        Some((
                            WikiLink {
                                title: &src[title_start..title.end],
                                nodes,
                            },
                            text.next,
                        ))
                    }
                    None => None,
                }
            }
            None => None,
        };

        match link {
            Some((link, next)) => Ok(Some((Node::Link(link), next))),
            None => {
                self.failed.insert((open, Construct::Link));
                Ok(None)
            }
        }
    }

    fn parse_argument(&mut self, open: usize, depth: usize) -> Result<Option<(Node<'a>, usize)>, WikitextError> {
        if !self.attempt(open, depth, Construct::Argument)? {
            return Ok(None);
        }

        let seq = self.parse_seq(open + 3, depth + 1, &[Stop::CloseArgument])?;
        if seq.stop.is_none() {
            self.failed.insert((open, Construct::Argument));
            return Ok(None);
        }
        Ok(Some((Node::Argument(seq.nodes), seq.next)))
    }
}

fn push_text<'a>(nodes: &mut Vec<Node<'a>>, text: &'a str) {
    if !text.is_empty() {
        nodes.push(Node::Text(text));
    }
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn find_ignore_case(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
        .map(|p| p + from)
}

fn starts_with_ignore_case(haystack: &[u8], prefix: &[u8]) -> bool {
    haystack.len() >= prefix.len() && haystack[..prefix.len()].eq_ignore_ascii_case(prefix)
}
