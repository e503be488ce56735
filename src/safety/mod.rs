//! # Structural Safety Analysis
//!
//! Decides whether a rendered query differs from its template only by
//! literal value substitution. Both texts are tokenized and grouped with the
//! same grammar; the template is first rendered with every placeholder
//! replaced by a neutral marker name. The two trees must have the same shape:
//!
//! - groups match when they are the same kind with pairwise-matching children
//! - tokens match when they share a token class
//! - a marker matches any value-like token (never a keyword)
//! - inside a `WHERE` clause a marker may also become a flat list of values,
//!   which keeps `IN ({{ids}})` usable
//!
//! Anything else (an extra statement, a value that introduces `OR 1=1`, a
//! value that turns into a sub-query) is unsafe.
//!
//! The comparison runs once per string [`Dialect`] and must hold under
//! both: a value ending in `\'` closes the literal on engines that do not
//! treat the backslash as an escape.
//!
//! Sections follow the applied values when they are known
//! ([`is_safe_rendering`]), so an optional filter left out of the rendering
//! is also left out of the skeleton.

mod lexer;
mod tree;

pub use lexer::{tokenize, tokenize_with, Dialect, Token, TokenClass};
pub use tree::{GroupKind, SqlNode};

use crate::template::Template;
use crate::value::ParamValues;

/// Neutral identifier standing in for every placeholder.
pub const PLACEHOLDER_MARKER: &str = "__querygate_param__";

fn is_marker(token: &Token) -> bool {
    token.class == TokenClass::Name && token.text.contains(PLACEHOLDER_MARKER)
}

/// Parse query text into its comparison tree.
pub fn parse(sql: &str) -> SqlNode {
    parse_with(sql, Dialect::default())
}

pub fn parse_with(sql: &str, dialect: Dialect) -> SqlNode {
    tree::parse(sql, dialect, &is_marker)
}

/// Whether `rendered` could only have come from `template` by substituting
/// literal values for its placeholders. Every section body is expected
/// exactly once.
pub fn is_safe(template: &str, rendered: &str) -> bool {
    let skeleton = Template::parse_lenient(template).render_skeleton(PLACEHOLDER_MARKER);
    matches_skeleton(&skeleton, rendered)
}

/// Like [`is_safe`], with sections rendered or skipped (and repeated) the
/// way `values` decide.
pub fn is_safe_rendering(template: &str, values: &ParamValues, rendered: &str) -> bool {
    let parsed = Template::parse(template).unwrap_or_else(|_| Template::parse_lenient(template));
    let skeleton = parsed.render_skeleton_with(values, PLACEHOLDER_MARKER);
    matches_skeleton(&skeleton, rendered)
}

fn matches_skeleton(skeleton: &str, rendered: &str) -> bool {
    for dialect in Dialect::ALL {
        let expected = parse_with(skeleton, dialect);
        let actual = parse_with(rendered, dialect);
        if !equivalent(&expected, &actual, false) {
            tracing::debug!(?dialect, "rendered query changes the template structure");
            return false;
        }
    }
    true
}

fn equivalent(expected: &SqlNode, actual: &SqlNode, in_where: bool) -> bool {
    match (expected, actual) {
        (SqlNode::Token(e), SqlNode::Token(a)) => {
            if is_marker(e) {
                substitutable(a)
            } else {
                e.class == a.class
            }
        }
        (
            SqlNode::Token(e),
            SqlNode::Group {
                kind: GroupKind::IdentifierList,
                children,
            },
        ) => in_where && is_marker(e) && children.iter().all(is_flat_list_entry),
        (
            SqlNode::Group {
                kind: ek,
                children: ec,
            },
            SqlNode::Group {
                kind: ak,
                children: ac,
            },
        ) => {
            let in_where = in_where || *ek == GroupKind::Where;
            ek == ak
                && ec.len() == ac.len()
                && ec
                    .iter()
                    .zip(ac)
                    .all(|(e, a)| equivalent(e, a, in_where))
        }
        _ => false,
    }
}

/// Tokens a placeholder value may legitimately turn into.
fn substitutable(token: &Token) -> bool {
    !matches!(
        token.class,
        TokenClass::Keyword | TokenClass::Comma | TokenClass::Semicolon
    )
}

fn is_flat_list_entry(node: &SqlNode) -> bool {
    node.token().is_some_and(|t| {
        matches!(
            t.class,
            TokenClass::Name
                | TokenClass::String
                | TokenClass::Number
                | TokenClass::Literal
                | TokenClass::Comma
        )
    })
}
