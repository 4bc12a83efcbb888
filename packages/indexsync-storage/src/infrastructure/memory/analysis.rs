//! Named analyzers
//!
//! `standard` lowercases and splits on anything that is not alphanumeric.
//! `best_bet_stemmed_match` additionally applies a light plural stemmer.
//! `keyword` keeps the input as a single token.

use crate::{Result, StorageError};

pub(super) fn analyze(analyzer: &str, text: &str) -> Result<Vec<String>> {
    match analyzer {
        "standard" | "default" => Ok(tokenize(text).collect()),
        "best_bet_stemmed_match" => Ok(tokenize(text).map(stem).collect()),
        "keyword" => Ok(if text.is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        }),
        other => Err(StorageError::invalid_request(format!(
            "failed to find analyzer [{}]",
            other
        ))),
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn stem(token: String) -> String {
    if token.len() > 4 && token.ends_with("ies") {
        format!("{}y", &token[..token.len() - 3])
    } else if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token
    }
}
