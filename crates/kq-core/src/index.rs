//! # Full-Text Index Planner
//!
//! The inverted index maps `cityHash64(token)` plus `cityHash64(column)` to
//! the timestamps of the rows containing the token. A lookup narrows the
//! candidate rows by timestamp; a residual substring check then removes rows
//! that only matched through a hash collision.

use crate::schema::INVERTED_INDEX_TABLE_PREFIX;
use crate::sql::{SelectRequest, SortOrder};
use std::collections::HashSet;

/// Timestamp column of inverted index tables.
pub const TS_COLUMN: &str = "ts";

const WORD_HASH_COLUMN: &str = "word_hash";
const COLUMN_HASH_COLUMN: &str = "column_hash";

/// Most frequent words of the indexed logs. They are never indexed, so they
/// must not be searched for either.
const STOPWORDS: [&str; 10] = ["", " ", "data", "php", "src", "logs", "pmx", "Eco", "eco", "vendor"];

/// Word characters are ASCII only, like the index builder's `\W+` split.
fn is_delimiter(c: char) -> bool {
    !(c.is_ascii_alphanumeric() || c == '_')
}

/// Search units of a text, in first-seen order.
///
/// Used both when building the index and when querying it.
pub fn tokens(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut seen = HashSet::new();
    lower
        .split(is_delimiter)
        .filter(|t| !STOPWORDS.contains(t))
        .filter(|t| seen.insert(*t))
        .map(str::to_string)
        .collect()
}

pub fn inverted_index_table_name(data_table: &str) -> String {
    format!("{}{}", INVERTED_INDEX_TABLE_PREFIX, data_table)
}

fn token_condition(tokens: &[String], column: &str) -> String {
    if tokens.is_empty() {
        return String::new();
    }
    let hashes: Vec<String> = tokens
        .iter()
        .map(|t| format!("cityHash64('{}')", t))
        .collect();
    format!(
        "({} IN ({}) AND {} = cityHash64('{}'))",
        WORD_HASH_COLUMN,
        hashes.join(","),
        COLUMN_HASH_COLUMN,
        column
    )
}

/// Timestamps of rows whose `column` contains every token.
///
/// `index_table` is the fully qualified inverted index table.
pub fn index_request(tokens: &[String], column: &str, index_table: &str) -> SelectRequest {
    let mut request = SelectRequest::new(index_table, TS_COLUMN);
    request
        .filter(&token_condition(tokens, column))
        .group_by(TS_COLUMN)
        .having(&format!("uniq({}) = {}", WORD_HASH_COLUMN, tokens.len()))
        .order_by(TS_COLUMN, Some(SortOrder::Desc));
    request
}

/// Case-insensitive re-check of every token against the real column.
pub fn residual_filter(tokens: &[String], column: &str) -> String {
    tokens
        .iter()
        .map(|t| format!("(positionCaseInsensitive({}, '{}') != 0)", column, t))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Both phases of a full-text lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullTextPlan {
    pub request: SelectRequest,
    pub residual: String,
}

/// Plans a lookup of `text` in `column`; `None` when the text has no tokens.
pub fn full_text_search(text: &str, column: &str, index_table: &str) -> Option<FullTextPlan> {
    let tokens = tokens(text);
    if tokens.is_empty() {
        return None;
    }
    Some(FullTextPlan {
        request: index_request(&tokens, column, index_table),
        residual: residual_filter(&tokens, column),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS_RANGE: &str = "(0 < ts) AND (ts <= 1542894389184806000)";

    fn planned(text: &str, column: &str, table: &str, range: &str) -> String {
        let mut request = index_request(&tokens(text), column, table);
        request.filter_and(range);
        request.build()
    }

    #[test]
    fn test_index_request_for_message() {
        assert_eq!(
            planned("Worker callback_0 ends handling", "message", "logs.inverted_index_logs_2p_gate", TS_RANGE),
            "SELECT ts FROM logs.inverted_index_logs_2p_gate WHERE (word_hash IN \
             (cityHash64('worker'),cityHash64('callback_0'),cityHash64('ends'),cityHash64('handling')) \
             AND column_hash = cityHash64('message')) AND ((0 < ts) AND (ts <= 1542894389184806000)) \
             GROUP BY ts HAVING uniq(word_hash) = 4 ORDER BY ts DESC"
        );
    }

    #[test]
    fn test_index_request_drops_duplicates() {
        assert_eq!(
            planned(
                "SQL : UPDATE Shard02.uniques00 SET status = 'update'",
                "message",
                "logs.inverted_index_logs_2p_gate",
                TS_RANGE
            ),
            "SELECT ts FROM logs.inverted_index_logs_2p_gate WHERE (word_hash IN \
             (cityHash64('sql'),cityHash64('update'),cityHash64('shard02'),cityHash64('uniques00'),\
             cityHash64('set'),cityHash64('status')) AND column_hash = cityHash64('message')) \
             AND ((0 < ts) AND (ts <= 1542894389184806000)) GROUP BY ts HAVING uniq(word_hash) = 6 \
             ORDER BY ts DESC"
        );
    }

    #[test]
    fn test_tokens_skip_stopwords() {
        assert_eq!(
            tokens("/data/pmx/vendor/eco/connection-manager/src/DB.php"),
            vec!["connection", "manager", "db"]
        );
        assert_eq!(
            tokens("#1197-62-1542894388|2117811957304647739"),
            vec!["1197", "62", "1542894388", "2117811957304647739"]
        );
        assert!(tokens("  ").is_empty());
    }

    #[test]
    fn test_tokens_split_on_non_ascii() {
        assert_eq!(tokens("Ошибка café"), vec!["caf"]);
        assert_eq!(tokens("naïve_user 42"), vec!["na", "ve_user", "42"]);
    }

    #[test]
    fn test_residual_filter() {
        let tokens = tokens("Connection DB");
        assert_eq!(
            residual_filter(&tokens, "file"),
            "(positionCaseInsensitive(file, 'connection') != 0) AND (positionCaseInsensitive(file, 'db') != 0)"
        );
    }

    #[test]
    fn test_full_text_search_without_tokens() {
        assert!(full_text_search("/data/src/", "file", "logs.inverted_index_gate").is_none());
        let plan = full_text_search("\"DB\"", "file", "logs.inverted_index_gate").unwrap();
        assert_eq!(plan.residual, "(positionCaseInsensitive(file, 'db') != 0)");
        assert_eq!(inverted_index_table_name("logs_gate"), "inverted_index_logs_gate");
    }
}
