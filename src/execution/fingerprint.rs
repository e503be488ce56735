//! Query fingerprints: the cache and dedupe key of a rendered query.
//!
//! Two texts that differ only in comments, whitespace or the case of
//! keywords and unquoted names map to the same fingerprint on the same data
//! source. String literals and quoted identifiers are kept byte for byte.
//!
//! ## Design
//!
//! Normalization works on the SQL tokens, so a `--` or `/*` inside a string
//! literal is never taken for a comment. When the two string dialects
//! disagree on where literals end (a backslash before a quote), the text is
//! only trimmed: a missed cache hit is cheap, a shared key for two different
//! queries is not.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::safety::{tokenize_with, Dialect, Token, TokenClass};

pub type DataSourceId = u64;

/// Drop comments, separate the remaining tokens by single spaces and
/// lowercase keywords and unquoted names.
pub fn normalize_query(text: &str) -> String {
    let [escaped, standard] = Dialect::ALL.map(|dialect| tokenize_with(text, dialect));
    if escaped != standard {
        return text.trim().to_string();
    }

    escaped
        .iter()
        .filter(|token| !token.class.is_trivia())
        .map(normalize_token)
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_token(token: &Token) -> String {
    let case_insensitive = match token.class {
        TokenClass::Keyword | TokenClass::Literal => true,
        TokenClass::Name => !token.text.contains(['"', '`']),
        _ => false,
    };
    if case_insensitive {
        token.text.to_lowercase()
    } else {
        token.text.clone()
    }
}

/// SHA-256 hex digest of the normalized text.
pub fn query_hash(text: &str) -> String {
    let digest = Sha256::digest(normalize_query(text).as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Identity of a rendered query on one data source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint {
    pub data_source_id: DataSourceId,
    pub query_hash: String,
}

impl Fingerprint {
    pub fn new(data_source_id: DataSourceId, text: &str) -> Self {
        Fingerprint {
            data_source_id,
            query_hash: query_hash(text),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.data_source_id, self.query_hash)
    }
}
