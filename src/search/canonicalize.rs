//! Text preparation shared by training and inference.
//!
//! Every feature that tokenizes or truncates text goes through this module so
//! that training-time and serving-time inputs are produced by the same code.
//!
//! # Example
//!
//! ```ignore
//! use crate::search::canonicalize::{snippet, whitespace_tokens};
//!
//! let tokens = whitespace_tokens("Capital of FRANCE");
//! assert_eq!(tokens, vec!["capital", "of", "france"]);
//! let head = snippet("one two three four", 2);
//! assert_eq!(head, "one two");
//! ```

use std::collections::HashSet;

/// Default number of body words handed to the relevance scorer.
pub const SNIPPET_WORDS: usize = 500;

/// Lower-case, then split on Unicode whitespace.
pub fn whitespace_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Set of lower-cased title tokens.
pub fn title_token_set(title: &str) -> HashSet<String> {
    whitespace_tokens(title).into_iter().collect()
}

/// First `max_words` whitespace-delimited words of `body`, joined by single spaces.
pub fn snippet(body: &str, max_words: usize) -> String {
    let mut out = String::new();
    for word in body.split_whitespace().take(max_words) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}
