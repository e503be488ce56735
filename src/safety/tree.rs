//! Grouping of SQL tokens into a shallow parse tree.
//!
//! The tree only needs enough structure for shape comparison:
//! statements, parenthesised groups, function calls, `WHERE` clauses and
//! comma-separated lists. Whitespace and comments are dropped up front.

use super::lexer::{tokenize_with, Dialect, Token, TokenClass};

/// Keywords that end a `WHERE` clause
const WHERE_TERMINATORS: &[&str] = &[
    "GROUP", "ORDER", "LIMIT", "HAVING", "UNION", "EXCEPT", "INTERSECT", "RETURNING", "WINDOW",
    "OFFSET", "FETCH",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Script,
    Statement,
    Parenthesis,
    Function,
    Where,
    IdentifierList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlNode {
    Token(Token),
    Group {
        kind: GroupKind,
        children: Vec<SqlNode>,
    },
}

impl SqlNode {
    fn group(kind: GroupKind, children: Vec<SqlNode>) -> Self {
        SqlNode::Group { kind, children }
    }

    pub fn token(&self) -> Option<&Token> {
        match self {
            SqlNode::Token(t) => Some(t),
            SqlNode::Group { .. } => None,
        }
    }

    fn is_class(&self, class: TokenClass) -> bool {
        self.token().is_some_and(|t| t.class == class)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        self.token().is_some_and(|t| t.is_keyword(keyword))
    }

    /// Something that can stand on its own between commas.
    fn is_list_item(&self) -> bool {
        match self {
            SqlNode::Token(t) => matches!(
                t.class,
                TokenClass::Name
                    | TokenClass::String
                    | TokenClass::Number
                    | TokenClass::Literal
                    | TokenClass::Operator
            ),
            SqlNode::Group { kind, .. } => {
                matches!(kind, GroupKind::Parenthesis | GroupKind::Function)
            }
        }
    }
}

/// Parse query text into a `Script` node holding one `Statement` per
/// `;`-separated statement. Empty statements are dropped.
///
/// `is_marker` identifies placeholder markers, which take part in unary
/// sign folding like numbers do.
pub fn parse(input: &str, dialect: Dialect, is_marker: &dyn Fn(&Token) -> bool) -> SqlNode {
    let tokens: Vec<Token> = tokenize_with(input, dialect)
        .into_iter()
        .filter(|t| !t.class.is_trivia())
        .collect();
    let tokens = fold_unary_signs(tokens, is_marker);

    let mut iter = tokens.into_iter();
    let nodes = group_parens(&mut iter, false);

    let mut statements = Vec::new();
    let mut current = Vec::new();
    for node in nodes {
        if node.is_class(TokenClass::Semicolon) {
            if !current.is_empty() {
                statements.push(SqlNode::group(
                    GroupKind::Statement,
                    group_sequence(std::mem::take(&mut current)),
                ));
            }
        } else {
            current.push(node);
        }
    }
    if !current.is_empty() {
        statements.push(SqlNode::group(GroupKind::Statement, group_sequence(current)));
    }

    SqlNode::group(GroupKind::Script, statements)
}

/// Merge a sign operator into the number (or marker) after it when the sign
/// cannot be a binary operator.
fn fold_unary_signs(tokens: Vec<Token>, is_marker: &dyn Fn(&Token) -> bool) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();

    while let Some(token) = iter.next() {
        let is_sign = token.class == TokenClass::Operator && (token.text == "-" || token.text == "+");
        let prefix_position = out.last().map_or(true, |prev| {
            matches!(
                prev.class,
                TokenClass::Operator
                    | TokenClass::Comparison
                    | TokenClass::Comma
                    | TokenClass::LParen
                    | TokenClass::Keyword
                    | TokenClass::Semicolon
            )
        });

        if is_sign && prefix_position {
            if let Some(next) = iter.peek() {
                if next.class == TokenClass::Number || is_marker(next) {
                    if let Some(next) = iter.next() {
                        out.push(Token::new(next.class, format!("{}{}", token.text, next.text)));
                        continue;
                    }
                }
            }
        }
        out.push(token);
    }
    out
}

/// Build parenthesis groups. Unbalanced closing parens stay as plain
/// tokens; unclosed groups extend to the end of input.
fn group_parens(iter: &mut impl Iterator<Item = Token>, nested: bool) -> Vec<SqlNode> {
    let mut nodes = Vec::new();
    while let Some(token) = iter.next() {
        match token.class {
            TokenClass::LParen => {
                let inner = group_parens(iter, true);
                nodes.push(SqlNode::group(GroupKind::Parenthesis, inner));
            }
            TokenClass::RParen if nested => return nodes,
            _ => nodes.push(SqlNode::Token(token)),
        }
    }
    nodes
}

/// Apply function, `WHERE` and list grouping to one level, recursing into
/// parenthesised groups.
fn group_sequence(nodes: Vec<SqlNode>) -> Vec<SqlNode> {
    let nodes: Vec<SqlNode> = nodes
        .into_iter()
        .map(|node| match node {
            SqlNode::Group {
                kind: GroupKind::Parenthesis,
                children,
            } => SqlNode::group(GroupKind::Parenthesis, group_sequence(children)),
            other => other,
        })
        .collect();

    let nodes = group_functions(nodes);
    let nodes = group_where(nodes);
    group_lists(nodes)
}

fn group_functions(nodes: Vec<SqlNode>) -> Vec<SqlNode> {
    let mut out: Vec<SqlNode> = Vec::with_capacity(nodes.len());
    for node in nodes {
        let is_call = matches!(
            node,
            SqlNode::Group {
                kind: GroupKind::Parenthesis,
                ..
            }
        ) && out.last().is_some_and(|prev| prev.is_class(TokenClass::Name));

        if is_call {
            if let Some(name) = out.pop() {
                out.push(SqlNode::group(GroupKind::Function, vec![name, node]));
                continue;
            }
        }
        out.push(node);
    }
    out
}

fn group_where(nodes: Vec<SqlNode>) -> Vec<SqlNode> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut iter = nodes.into_iter().peekable();

    while let Some(node) = iter.next() {
        if !node.is_keyword("WHERE") {
            out.push(node);
            continue;
        }

        let mut clause = vec![node];
        while let Some(next) = iter.peek() {
            if WHERE_TERMINATORS.iter().any(|kw| next.is_keyword(kw)) {
                break;
            }
            if let Some(next) = iter.next() {
                clause.push(next);
            }
        }
        out.push(SqlNode::group(GroupKind::Where, group_lists(clause)));
    }
    out
}

fn group_lists(nodes: Vec<SqlNode>) -> Vec<SqlNode> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut nodes = nodes.into_iter().peekable();
    let mut pending: Vec<SqlNode> = Vec::new();

    // `pending` holds an item followed by zero or more `, item` pairs, plus
    // possibly one trailing comma still waiting for its item.
    let flush = |pending: &mut Vec<SqlNode>, out: &mut Vec<SqlNode>| {
        let trailing_comma = pending
            .last()
            .is_some_and(|n| n.is_class(TokenClass::Comma));
        let comma = if trailing_comma { pending.pop() } else { None };

        if pending.len() >= 3 {
            out.push(SqlNode::group(GroupKind::IdentifierList, std::mem::take(pending)));
        } else {
            out.append(pending);
        }
        out.extend(comma);
    };

    while let Some(node) = nodes.next() {
        let expecting_item = pending
            .last()
            .is_some_and(|n| n.is_class(TokenClass::Comma));

        if expecting_item {
            if node.is_list_item() {
                pending.push(node);
                continue;
            }
            flush(&mut pending, &mut out);
        } else if !pending.is_empty() && node.is_class(TokenClass::Comma) {
            pending.push(node);
            continue;
        } else {
            flush(&mut pending, &mut out);
        }

        if node.is_list_item() && nodes.peek().is_some_and(|n| n.is_class(TokenClass::Comma)) {
            pending.push(node);
        } else {
            out.push(node);
        }
    }
    flush(&mut pending, &mut out);
    out
}
