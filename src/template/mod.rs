//! # Query Template Engine
//!
//! A small mustache-like template language for query text:
//!
//! - `{{name}}` / `{{name.member}}` substitute a value
//! - `{{#name}}…{{/name}}` render a block for truthy values (once per
//!   element for lists)
//! - `{{^name}}…{{/name}}` render a block for falsy values
//! - `{{! comment }}` is dropped
//! - `{{{name}}}` and `{{&name}}` are plain placeholders; values are never
//!   escaped
//!
//! Parsing is a recursive descent over the raw text producing a tree of
//! [`Node`]s. Name discovery parses leniently and never fails: anything it
//! cannot recognise stays literal text. Rendering parses strictly and
//! reports malformed templates.

use std::collections::BTreeSet;
use std::convert::Infallible;

use crate::value::{ParamValue, ParamValues};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const TRIPLE_OPEN: &str = "{{{";
const TRIPLE_CLOSE: &str = "}}}";

/// Name of the implicit iterator (`{{.}}`).
const CURRENT: &str = ".";

/// Template errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Unclosed section '{name}'")]
    UnclosedSection { name: String },

    #[error("Unexpected closing tag '{name}'")]
    UnexpectedClose { name: String },

    #[error("Unclosed tag at byte {offset}")]
    UnclosedTag { offset: usize },

    #[error("Empty tag at byte {offset}")]
    EmptyTag { offset: usize },

    /// Lists must be joined by the parameter validator before rendering
    #[error("Placeholder '{name}' resolved to a list or map value")]
    NonScalarValue { name: String },
}

/// Parsed template node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Placeholder(String),
    Section {
        name: String,
        inverted: bool,
        children: Vec<Node>,
    },
}

/// A parsed query template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Parse strictly: unbalanced sections and unterminated tags are errors.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let nodes = Parser::new(source, true).parse_all()?;
        Ok(Template { nodes })
    }

    /// Parse leniently: unrecognised syntax is kept as literal text and open
    /// sections are closed at end of input.
    pub fn parse_lenient(source: &str) -> Self {
        let nodes = Parser::new(source, false)
            .parse_all()
            .unwrap_or_else(|_| vec![Node::Text(source.to_string())]);
        Template { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Every distinct placeholder and section name, including names nested in
    /// sections.
    pub fn parameter_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        collect_names(&self.nodes, &mut names);
        names
    }

    /// Substitute `values`. Missing names render as the empty string.
    pub fn render(&self, values: &ParamValues) -> Result<String, TemplateError> {
        let mut out = String::new();
        let mut stack = vec![Frame::Root(values)];
        render_nodes(&self.nodes, &mut stack, &mut out)?;
        Ok(out)
    }

    /// Render with every placeholder replaced by `marker` and every section
    /// body emitted exactly once.
    pub fn render_skeleton(&self, marker: &str) -> String {
        let mut out = String::new();
        skeleton_nodes(&self.nodes, marker, &mut out);
        out
    }

    /// Render with every placeholder replaced by `marker`, taking the same
    /// section decisions [`Template::render`] takes for `values`: falsy
    /// sections are skipped and list sections repeat once per element.
    pub fn render_skeleton_with(&self, values: &ParamValues, marker: &str) -> String {
        let mut out = String::new();
        let mut stack = vec![Frame::Root(values)];
        let walked: Result<(), Infallible> = walk(&self.nodes, &mut stack, &mut |piece| {
            out.push_str(match piece {
                Piece::Text(text) => text,
                Piece::Value { .. } => marker,
            });
            Ok(())
        });
        let Ok(()) = walked;
        out
    }
}

/// Collect placeholder names from raw template text. Never fails.
pub fn collect_parameter_names(template: &str) -> BTreeSet<String> {
    Template::parse_lenient(template).parameter_names()
}

/// Parse and render in one step.
pub fn render(template: &str, values: &ParamValues) -> Result<String, TemplateError> {
    Template::parse(template)?.render(values)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    strict: bool,
}

enum Tag {
    Placeholder(String),
    Open { name: String, inverted: bool },
    Close(String),
    Comment,
    /// Lenient mode only: a tag kept verbatim
    Literal,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, strict: bool) -> Self {
        Parser { src, pos: 0, strict }
    }

    fn parse_all(&mut self) -> Result<Vec<Node>, TemplateError> {
        self.parse_block(None)
    }

    /// Parse nodes until the closing tag for `open` (or end of input at the
    /// top level).
    fn parse_block(&mut self, open: Option<&str>) -> Result<Vec<Node>, TemplateError> {
        let src = self.src;
        let mut nodes = Vec::new();

        loop {
            let rest = &src[self.pos..];
            let Some(rel) = rest.find(OPEN) else {
                push_text(&mut nodes, rest);
                self.pos = src.len();
                return match open {
                    Some(name) if self.strict => Err(TemplateError::UnclosedSection {
                        name: name.to_string(),
                    }),
                    _ => Ok(nodes),
                };
            };

            push_text(&mut nodes, &rest[..rel]);
            let tag_start = self.pos + rel;

            let Some((tag, raw_end)) = self.read_tag(tag_start)? else {
                // Lenient mode: unterminated tag, the remainder is literal
                push_text(&mut nodes, &src[tag_start..]);
                self.pos = src.len();
                return Ok(nodes);
            };
            let raw = &src[tag_start..raw_end];
            self.pos = raw_end;

            match tag {
                Tag::Comment => {}
                Tag::Literal => push_text(&mut nodes, raw),
                Tag::Placeholder(name) => nodes.push(Node::Placeholder(name)),
                Tag::Open { name, inverted } => {
                    let children = self.parse_block(Some(&name))?;
                    nodes.push(Node::Section {
                        name,
                        inverted,
                        children,
                    });
                }
                Tag::Close(name) => {
                    if open == Some(name.as_str()) {
                        return Ok(nodes);
                    }
                    if self.strict {
                        return Err(TemplateError::UnexpectedClose { name });
                    }
                    push_text(&mut nodes, raw);
                }
            }
        }
    }

    /// Read the tag starting at `start`. Returns the tag and the byte offset
    /// just past it, or `None` in lenient mode when the tag never closes.
    fn read_tag(&self, start: usize) -> Result<Option<(Tag, usize)>, TemplateError> {
        let rest = &self.src[start..];
        let (inner, end) = if rest.starts_with(TRIPLE_OPEN) {
            match rest[TRIPLE_OPEN.len()..].find(TRIPLE_CLOSE) {
                Some(i) => {
                    let inner = &rest[TRIPLE_OPEN.len()..TRIPLE_OPEN.len() + i];
                    (format!("&{inner}"), start + TRIPLE_OPEN.len() + i + TRIPLE_CLOSE.len())
                }
                None => return self.unterminated(start),
            }
        } else {
            match rest[OPEN.len()..].find(CLOSE) {
                Some(i) => (
                    rest[OPEN.len()..OPEN.len() + i].to_string(),
                    start + OPEN.len() + i + CLOSE.len(),
                ),
                None => return self.unterminated(start),
            }
        };

        let inner = inner.trim();
        let mut chars = inner.chars();
        let tag = match chars.next() {
            None if self.strict => return Err(TemplateError::EmptyTag { offset: start }),
            None => Tag::Literal,
            Some('!') => Tag::Comment,
            Some(sigil @ ('#' | '^' | '/' | '&')) => {
                let name = chars.as_str().trim().to_string();
                if name.is_empty() {
                    if self.strict {
                        return Err(TemplateError::EmptyTag { offset: start });
                    }
                    return Ok(Some((Tag::Literal, end)));
                }
                match sigil {
                    '#' => Tag::Open { name, inverted: false },
                    '^' => Tag::Open { name, inverted: true },
                    '/' => Tag::Close(name),
                    _ => Tag::Placeholder(name),
                }
            }
            Some(_) => Tag::Placeholder(inner.to_string()),
        };

        Ok(Some((tag, end)))
    }

    fn unterminated<T>(&self, offset: usize) -> Result<Option<T>, TemplateError> {
        if self.strict {
            Err(TemplateError::UnclosedTag { offset })
        } else {
            Ok(None)
        }
    }
}

fn push_text(nodes: &mut Vec<Node>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Node::Text(prev)) = nodes.last_mut() {
        prev.push_str(text);
    } else {
        nodes.push(Node::Text(text.to_string()));
    }
}

fn collect_names(nodes: &[Node], names: &mut BTreeSet<String>) {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Placeholder(name) => {
                if name != CURRENT {
                    names.insert(name.clone());
                }
            }
            Node::Section { name, children, .. } => {
                if name != CURRENT {
                    names.insert(name.clone());
                }
                collect_names(children, names);
            }
        }
    }
}

/// Rendering context frame
#[derive(Clone, Copy)]
enum Frame<'v> {
    Root(&'v ParamValues),
    Value(&'v ParamValue),
}

fn lookup<'v>(stack: &[Frame<'v>], name: &str) -> Option<&'v ParamValue> {
    if name == CURRENT {
        return match stack.last() {
            Some(Frame::Value(v)) => Some(*v),
            _ => None,
        };
    }

    let mut segments = name.split('.');
    let head = segments.next()?;

    let mut found = stack.iter().rev().find_map(|frame| match frame {
        Frame::Root(values) => values.get(head),
        Frame::Value(v) => v.get(head),
    })?;

    for segment in segments {
        found = found.get(segment)?;
    }
    Some(found)
}

/// Output produced while walking the template against values
enum Piece<'n, 'v> {
    Text(&'n str),
    Value {
        name: &'n str,
        value: Option<&'v ParamValue>,
    },
}

/// Visit the template in render order, entering each section as many times
/// as its value dictates.
fn walk<'n, 'v, E>(
    nodes: &'n [Node],
    stack: &mut Vec<Frame<'v>>,
    emit: &mut dyn FnMut(Piece<'n, 'v>) -> Result<(), E>,
) -> Result<(), E> {
    for node in nodes {
        match node {
            Node::Text(text) => emit(Piece::Text(text))?,
            Node::Placeholder(name) => emit(Piece::Value {
                name,
                value: lookup(stack, name),
            })?,
            Node::Section {
                name,
                inverted,
                children,
            } => {
                let value = lookup(stack, name);
                let truthy = value.is_some_and(ParamValue::is_truthy);

                if *inverted {
                    if !truthy {
                        walk(children, stack, emit)?;
                    }
                    continue;
                }

                match value {
                    Some(ParamValue::List(items)) if truthy => {
                        for item in items {
                            stack.push(Frame::Value(item));
                            let result = walk(children, stack, emit);
                            stack.pop();
                            result?;
                        }
                    }
                    Some(value) if truthy => {
                        stack.push(Frame::Value(value));
                        let result = walk(children, stack, emit);
                        stack.pop();
                        result?;
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

fn render_nodes<'v>(
    nodes: &'v [Node],
    stack: &mut Vec<Frame<'v>>,
    out: &mut String,
) -> Result<(), TemplateError> {
    walk(nodes, stack, &mut |piece| {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Value { value: None, .. } => {}
            Piece::Value {
                name,
                value: Some(ParamValue::List(_) | ParamValue::Map(_)),
            } => {
                return Err(TemplateError::NonScalarValue {
                    name: name.to_string(),
                });
            }
            Piece::Value {
                value: Some(value), ..
            } => out.push_str(&value.to_string()),
        }
        Ok(())
    })
}

fn skeleton_nodes(nodes: &[Node], marker: &str, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Placeholder(_) => out.push_str(marker),
            Node::Section { children, .. } => skeleton_nodes(children, marker, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, ParamValue)]) -> ParamValues {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn names(template: &str) -> Vec<String> {
        collect_parameter_names(template).into_iter().collect()
    }

    #[test]
    fn test_collect_simple_names() {
        assert_eq!(names("SELECT {{param}} FROM {{table}}"), vec!["param", "table"]);
    }

    #[test]
    fn test_collect_deduplicates() {
        assert_eq!(names("{{a}} {{a}} {{ a }}"), vec!["a"]);
    }

    #[test]
    fn test_collect_compound_names() {
        assert_eq!(
            names("WHERE d BETWEEN '{{range.start}}' AND '{{range.end}}'"),
            vec!["range.end", "range.start"]
        );
    }

    #[test]
    fn test_collect_section_names_recursively() {
        assert_eq!(
            names("{{#filter}}AND x = {{x}} {{^y}}{{z}}{{/y}}{{/filter}}"),
            vec!["filter", "x", "y", "z"]
        );
    }

    #[test]
    fn test_collect_ignores_comments_and_current() {
        assert_eq!(names("{{! note }}{{#ids}}{{.}}{{/ids}}"), vec!["ids"]);
    }

    #[test]
    fn test_collect_never_fails_on_malformed() {
        assert_eq!(names("SELECT {{a"), Vec::<String>::new());
        assert_eq!(names("{{/stray}} {{b}}"), vec!["b"]);
        assert_eq!(names("{{#open}} {{c}}"), vec!["c", "open"]);
        assert_eq!(names("{{}} {{d}}"), vec!["d"]);
    }

    #[test]
    fn test_render_substitutes() {
        let v = values(&[("param", "value".into()), ("table", "value".into())]);
        assert_eq!(
            render("SELECT {{param}} FROM {{table}}", &v).unwrap(),
            "SELECT value FROM value"
        );
    }

    #[test]
    fn test_render_missing_is_empty() {
        assert_eq!(render("a{{missing}}b", &ParamValues::new()).unwrap(), "ab");
    }

    #[test]
    fn test_render_does_not_escape() {
        let v = values(&[("x", "<'&'>".into())]);
        assert_eq!(render("{{x}}|{{{x}}}|{{&x}}", &v).unwrap(), "<'&'>|<'&'>|<'&'>");
    }

    #[test]
    fn test_render_compound_member() {
        let v = values(&[("r", ParamValue::range("2024-01-01", "2024-01-31"))]);
        assert_eq!(
            render("{{r.start}}..{{r.end}}", &v).unwrap(),
            "2024-01-01..2024-01-31"
        );
    }

    #[test]
    fn test_render_rejects_list_placeholder() {
        let v = values(&[("ids", vec![1, 2].into())]);
        assert_eq!(
            render("IN ({{ids}})", &v),
            Err(TemplateError::NonScalarValue { name: "ids".into() })
        );
    }

    #[test]
    fn test_render_sections() {
        let v = values(&[
            ("on", true.into()),
            ("off", false.into()),
            ("ids", vec![1, 2, 3].into()),
        ]);
        assert_eq!(render("{{#on}}yes{{/on}}{{#off}}no{{/off}}", &v).unwrap(), "yes");
        assert_eq!(render("{{^off}}inv{{/off}}{{^on}}x{{/on}}", &v).unwrap(), "inv");
        assert_eq!(render("{{#ids}}{{.}};{{/ids}}", &v).unwrap(), "1;2;3;");
        assert_eq!(render("{{^nothing}}none{{/nothing}}", &v).unwrap(), "none");
    }

    #[test]
    fn test_render_section_scope_reaches_outer_names() {
        let v = values(&[
            ("f", ParamValue::range("a", "b")),
            ("col", "c".into()),
        ]);
        assert_eq!(render("{{#f}}{{col}}:{{start}}{{/f}}", &v).unwrap(), "c:a");
    }

    #[test]
    fn test_render_strict_errors() {
        let v = ParamValues::new();
        assert!(matches!(render("{{#a}}x", &v), Err(TemplateError::UnclosedSection { .. })));
        assert!(matches!(render("x{{/a}}", &v), Err(TemplateError::UnexpectedClose { .. })));
        assert!(matches!(render("{{a", &v), Err(TemplateError::UnclosedTag { offset: 0 })));
        assert!(matches!(render("{{#a}}{{/b}}", &v), Err(TemplateError::UnexpectedClose { .. })));
    }

    #[test]
    fn test_skeleton() {
        let t = Template::parse_lenient("SELECT {{a}} {{#s}}AND {{b}}{{/s}}{{! c }}");
        assert_eq!(t.render_skeleton("M"), "SELECT M AND M");
    }

    #[test]
    fn test_skeleton_with_values_follows_sections() {
        let t = Template::parse("WHERE a = {{a}}{{#s}} AND {{s}}{{/s}}{{^s}} OR {{b}}{{/s}}")
            .unwrap();
        assert_eq!(
            t.render_skeleton_with(&values(&[("s", "".into())]), "M"),
            "WHERE a = M OR M"
        );
        assert_eq!(
            t.render_skeleton_with(&values(&[("s", "x".into())]), "M"),
            "WHERE a = M AND M"
        );

        let list = Template::parse("IN ({{#ids}}{{.}},{{/ids}}0)").unwrap();
        assert_eq!(
            list.render_skeleton_with(&values(&[("ids", vec![1, 2].into())]), "M"),
            "IN (M,M,0)"
        );
    }
}
