//! SQL tokenizer.
//!
//! Uses a PEG grammar (`sql.pest`) to split query text into classified
//! tokens. Words are classified as keywords, literal keywords
//! (`NULL`/`TRUE`/`FALSE`) or names after matching.
//!
//! Engines disagree on whether a backslash escapes a quote inside a string
//! literal, so the tokenizer supports both readings through [`Dialect`].

use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "safety/sql.pest"]
struct SqlTokenizer;

/// Token classification used for structural comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Whitespace,
    Comment,
    Keyword,
    Name,
    String,
    Number,
    /// `NULL`, `TRUE`, `FALSE`
    Literal,
    Comparison,
    Operator,
    Comma,
    Semicolon,
    Dot,
    LParen,
    RParen,
    Unknown,
}

impl TokenClass {
    pub fn is_trivia(self) -> bool {
        matches!(self, TokenClass::Whitespace | TokenClass::Comment)
    }
}

/// A classified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub class: TokenClass,
    pub text: String,
}

impl Token {
    pub fn new(class: TokenClass, text: impl Into<String>) -> Self {
        Token {
            class,
            text: text.into(),
        }
    }

    /// Keyword comparison, case-insensitive.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.class == TokenClass::Keyword && self.text.eq_ignore_ascii_case(keyword)
    }
}

const LITERAL_KEYWORDS: &[&str] = &["NULL", "TRUE", "FALSE"];

const KEYWORDS: &[&str] = &[
    "ADD", "ALL", "ALTER", "ANALYZE", "AND", "ANY", "AS", "ASC", "ATTACH", "BEGIN", "BETWEEN",
    "BY", "CALL", "CASE", "CAST", "COMMIT", "COPY", "CREATE", "CROSS", "DATABASE", "DECLARE",
    "DEFAULT", "DELETE", "DESC", "DESCRIBE", "DETACH", "DISTINCT", "DO", "DROP", "ELSE", "END",
    "ESCAPE", "EXCEPT", "EXEC", "EXECUTE", "EXISTS", "EXPLAIN", "FETCH", "FILTER", "FIRST",
    "FOR", "FOREIGN", "FROM", "FULL", "FUNCTION", "GRANT", "GROUP", "HAVING", "IF", "ILIKE",
    "IN", "INDEX", "INNER", "INSERT", "INTERSECT", "INTERVAL", "INTO", "IS", "JOIN", "KEY",
    "LAST", "LATERAL", "LEFT", "LIKE", "LIMIT", "MERGE", "NATURAL", "NOT", "NULLS", "OFFSET",
    "ON", "OR", "ORDER", "OUTER", "OVER", "PARTITION", "PRAGMA", "PRIMARY", "PROCEDURE",
    "RECURSIVE", "REFERENCES", "RENAME", "REPLACE", "RETURNING", "REVOKE", "RIGHT", "ROLLBACK",
    "ROWS", "SCHEMA", "SELECT", "SET", "SHOW", "SIMILAR", "SOME", "TABLE", "THEN", "TO", "TOP",
    "TRUNCATE", "UNION", "UNIQUE", "UPDATE", "USE", "USING", "VALUES", "VIEW", "WHEN", "WHERE",
    "WINDOW", "WITH",
];

fn classify_word(text: &str) -> TokenClass {
    let upper = text.to_ascii_uppercase();
    if LITERAL_KEYWORDS.contains(&upper.as_str()) {
        TokenClass::Literal
    } else if KEYWORDS.contains(&upper.as_str()) {
        TokenClass::Keyword
    } else {
        TokenClass::Name
    }
}

/// How string literals treat a backslash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// `\'` escapes the quote (MySQL, Postgres `E''` strings)
    #[default]
    BackslashEscapes,
    /// A backslash is an ordinary character (Postgres, SQLite)
    Standard,
}

impl Dialect {
    pub const ALL: [Dialect; 2] = [Dialect::BackslashEscapes, Dialect::Standard];

    fn rule(self) -> Rule {
        match self {
            Dialect::BackslashEscapes => Rule::sql,
            Dialect::Standard => Rule::sql_standard,
        }
    }
}

/// Tokenize query text, whitespace and comments included, reading
/// backslashes in strings as escapes.
pub fn tokenize(input: &str) -> Vec<Token> {
    tokenize_with(input, Dialect::default())
}

/// Tokenize under the given string dialect.
///
/// The grammar accepts every input; should parsing still fail, the whole
/// input comes back as a single `Unknown` token.
pub fn tokenize_with(input: &str, dialect: Dialect) -> Vec<Token> {
    let pairs = match SqlTokenizer::parse(dialect.rule(), input) {
        Ok(pairs) => pairs,
        Err(_) => return vec![Token::new(TokenClass::Unknown, input)],
    };

    let mut tokens = Vec::new();

    for pair in pairs.flatten() {
        let class = match pair.as_rule() {
            Rule::whitespace => TokenClass::Whitespace,
            Rule::comment => TokenClass::Comment,
            Rule::string | Rule::string_standard => TokenClass::String,
            Rule::quoted_ident => TokenClass::Name,
            Rule::number => TokenClass::Number,
            Rule::word => classify_word(pair.as_str()),
            Rule::comparison => TokenClass::Comparison,
            Rule::operator => TokenClass::Operator,
            Rule::comma => TokenClass::Comma,
            Rule::semicolon => TokenClass::Semicolon,
            Rule::dot => TokenClass::Dot,
            Rule::lparen => TokenClass::LParen,
            Rule::rparen => TokenClass::RParen,
            Rule::any_char => TokenClass::Unknown,
            // sql and EOI are structural
            _ => continue,
        };
        tokens.push(Token::new(class, pair.as_str()));
    }

    tokens
}
