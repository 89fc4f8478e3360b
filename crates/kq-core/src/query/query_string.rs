//! # query_string Parser
//!
//! Handles the subset of the Lucene syntax dashboards send:
//!
//! - short notation: one bare term, searched in every full-text column
//!   (`error`, `"connection reset"`, `*`);
//! - wide notation: `field:value` pairs with `AND`/`OR`/`NOT` and
//!   parenthesized groups (`message:("a" OR "b") AND file:"DB"`).
//!
//! Values of full-text columns are looked up through the inverted index;
//! everything else becomes a direct column check.

use super::RangeClause;
use crate::error::{QueryError, QueryResult};
use crate::index::{self, TS_COLUMN};
use crate::schema::{ColumnField, TableSchema};
use crate::sql::escape_literal;

const LOGICAL_OPERATORS: [&str; 4] = ["and", "or", "xor", "not"];
const WILDCARDS: [char; 3] = ['?', '&', '*'];

/// Splits a query into field names, `:`, parentheses, operators and values.
///
/// Quoted spans are kept whole. A query without any `:` is returned as a
/// single part.
pub fn split_query(query: &str) -> Vec<String> {
    let query = query.trim();
    if !query.contains(':') {
        return vec![query.to_string()];
    }

    let mut parts = Vec::new();
    let mut rest = 0;
    let mut quoted = false;
    for (i, c) in query.char_indices() {
        if c == '"' {
            quoted = !quoted;
        }
        if quoted {
            continue;
        }
        if matches!(c, ' ' | '(' | ')' | ':') {
            if rest < i {
                parts.push(query[rest..i].to_string());
            }
            rest = i + 1;
            if c != ' ' {
                parts.push(c.to_string());
            }
        }
    }
    if rest < query.len() {
        parts.push(query[rest..].to_string());
    }
    parts
}

fn is_logical_operator(token: &str) -> bool {
    LOGICAL_OPERATORS.contains(&token.to_lowercase().as_str())
}

/// Where the index lookup for a full-text column goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTarget {
    pub table: String,
    /// Timestamp column of the data table, matched against index timestamps.
    pub ts_column: String,
}

/// A value searched in one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatch {
    /// Logical operators preceding the match (`OR`, `AND NOT`, ...).
    pub operator: String,
    pub field: ColumnField,
    /// Raw value text, quotes included.
    pub expr: String,
    pub index: Option<IndexTarget>,
}

impl FieldMatch {
    fn condition(&self, wildcards: bool, time_range: Option<&RangeClause>) -> String {
        let column = &self.field.column;
        if let Some(target) = &self.index {
            if let Some(mut plan) = index::full_text_search(&self.expr, column, &target.table) {
                if let Some(range) = time_range {
                    plan.request.filter_and(&range.with_field(TS_COLUMN).render());
                }
                return format!(
                    "({} IN ({}) AND {})",
                    target.ts_column,
                    plan.request.build(),
                    plan.residual
                );
            }
        }

        let text = self.expr.trim_matches('"');
        if self.field.is_numeric() && self.expr.parse::<f64>().is_ok() {
            return format!("({} = {})", column, self.expr);
        }
        if wildcards && text.contains(&WILDCARDS[..]) {
            let pattern = escape_literal(text).replace('*', "%").replace('?', "_");
            return format!("(like({}, '%{}%'))", column, pattern);
        }
        format!("(position({}, '{}') != 0)", column, escape_literal(text))
    }

    fn render(&self, wildcards: bool, time_range: Option<&RangeClause>) -> String {
        let condition = self.condition(wildcards, time_range);
        if self.operator.is_empty() {
            condition
        } else {
            format!("{} {}", self.operator, condition)
        }
    }
}

/// One piece of a parsed query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryItem {
    /// Parenthesis or operator copied into the SQL as is.
    Literal(String),
    FieldMatch(FieldMatch),
}

impl QueryItem {
    fn render(&self, wildcards: bool, time_range: Option<&RangeClause>) -> String {
        match self {
            QueryItem::Literal(text) => text.clone(),
            QueryItem::FieldMatch(m) => m.render(wildcards, time_range),
        }
    }
}

/// A parsed `query_string` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchQueryClause {
    analyze_wildcard: bool,
    time_range: Option<RangeClause>,
    items: Vec<QueryItem>,
}

impl MatchQueryClause {
    /// Parses `query` against the columns of `schema`.
    ///
    /// Fails when a field named in the query is not part of the schema.
    pub fn parse(query: &str, analyze_wildcard: bool, schema: &TableSchema) -> QueryResult<Self> {
        let parts = split_query(query);
        let items = if parts.len() == 1 {
            parse_short_notation(&parts[0], schema)
        } else {
            parse_wide_notation(&parts, schema)?
        };
        Ok(Self {
            analyze_wildcard,
            time_range: None,
            items,
        })
    }

    pub fn items(&self) -> &[QueryItem] {
        &self.items
    }

    /// Time window bounding the index lookups.
    pub fn set_time_range(&mut self, range: RangeClause) {
        self.time_range = Some(range);
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            let fragment = item.render(self.analyze_wildcard, self.time_range.as_ref());
            if fragment.is_empty() {
                continue;
            }
            if !out.is_empty() && !out.ends_with('(') && fragment != ")" {
                out.push(' ');
            }
            out.push_str(&fragment);
        }
        if out.is_empty() {
            return out;
        }
        format!("({})", out)
    }
}

fn index_target(schema: &TableSchema) -> Option<IndexTarget> {
    schema.timestamp_field().map(|ts| IndexTarget {
        table: schema.inverted_index_table(),
        ts_column: ts.column.column.clone(),
    })
}

fn parse_short_notation(part: &str, schema: &TableSchema) -> Vec<QueryItem> {
    let value = part.trim_matches('"');
    if value == "*" {
        return vec![QueryItem::Literal(String::new())];
    }
    let Some(target) = index_target(schema) else {
        tracing::warn!("no timestamp field in '{}', full text search is unavailable", schema.name);
        return Vec::new();
    };

    schema
        .full_text_fields()
        .enumerate()
        .map(|(i, field)| {
            QueryItem::FieldMatch(FieldMatch {
                operator: if i == 0 { String::new() } else { "OR".to_string() },
                field: field.column.clone(),
                expr: value.to_string(),
                index: Some(target.clone()),
            })
        })
        .collect()
}

fn parse_wide_notation(parts: &[String], schema: &TableSchema) -> QueryResult<Vec<QueryItem>> {
    let target = index_target(schema);
    let mut items = Vec::new();
    let mut prev = "";
    let mut field = "";
    let mut depth: i32 = 0;
    let mut operator: Vec<String> = Vec::new();

    for part in parts {
        let part = part.as_str();
        let brace = match part {
            "(" => 1,
            ")" => -1,
            _ => 0,
        };

        if brace != 0 {
            if depth > 0 || prev == ":" {
                depth += brace;
            }
            if !operator.is_empty() {
                items.push(QueryItem::Literal(operator.join(" ")));
                operator.clear();
            }
            items.push(QueryItem::Literal(part.to_string()));
        } else if is_logical_operator(part) {
            operator.push(part.to_uppercase());
        } else if part == ":" {
            field = prev;
        } else if prev == ":" || (!field.is_empty() && depth > 0) {
            let spec = schema
                .field(field)
                .ok_or_else(|| QueryError::UnknownField(field.to_string()))?;
            items.push(QueryItem::FieldMatch(FieldMatch {
                operator: operator.join(" "),
                field: spec.column.clone(),
                expr: part.to_string(),
                index: if spec.full_text { target.clone() } else { None },
            }));
            operator.clear();
            if depth <= 0 {
                field = "";
            }
        }
        prev = part;
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;

    fn gate_schema() -> TableSchema {
        TableSchema::new(
            "logs_gate",
            vec![
                FieldSpec::new("ts", "UInt64").timestamp(),
                FieldSpec::new("message", "String").full_text(),
                FieldSpec::new("file", "String").full_text(),
                FieldSpec::new("host", "String"),
                FieldSpec::new("pid", "UInt64"),
            ],
        )
    }

    fn plain_schema() -> TableSchema {
        TableSchema::new(
            "logs_plain",
            vec![
                FieldSpec::new("message", "String"),
                FieldSpec::new("file", "String"),
            ],
        )
    }

    fn field_matches(clause: &MatchQueryClause) -> Vec<(&str, &str, &str)> {
        clause
            .items()
            .iter()
            .filter_map(|item| match item {
                QueryItem::FieldMatch(m) => {
                    Some((m.operator.as_str(), m.field.column.as_str(), m.expr.as_str()))
                }
                QueryItem::Literal(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_split_query() {
        assert_eq!(
            split_query(r#"message:("SQL update" OR "SQL select") AND file:"DB""#),
            vec![
                "message", ":", "(", "\"SQL update\"", "OR", "\"SQL select\"", ")", "AND", "file",
                ":", "\"DB\""
            ]
        );
        assert_eq!(split_query("  connection reset "), vec!["connection reset"]);
    }

    #[test]
    fn test_short_notation_match_all() {
        let clause = MatchQueryClause::parse("*", false, &gate_schema()).unwrap();
        assert_eq!(clause.items(), &[QueryItem::Literal(String::new())]);
        assert_eq!(clause.render(), "");
    }

    #[test]
    fn test_short_notation_searches_every_indexed_column() {
        let mut clause = MatchQueryClause::parse("error", false, &gate_schema()).unwrap();
        assert_eq!(
            field_matches(&clause),
            vec![("", "message", "error"), ("OR", "file", "error")]
        );

        let mut range = RangeClause::new("ts", false);
        range.add_lower(0_i64, true).add_upper(1542894389184806000_i64, false);
        clause.set_time_range(range);
        assert_eq!(
            clause.render(),
            "((ts IN (SELECT ts FROM logs.inverted_index_logs_gate WHERE (word_hash IN \
             (cityHash64('error')) AND column_hash = cityHash64('message')) AND \
             ((0 < ts AND ts <= 1542894389184806000)) GROUP BY ts HAVING uniq(word_hash) = 1 \
             ORDER BY ts DESC) AND (positionCaseInsensitive(message, 'error') != 0)) \
             OR (ts IN (SELECT ts FROM logs.inverted_index_logs_gate WHERE (word_hash IN \
             (cityHash64('error')) AND column_hash = cityHash64('file')) AND \
             ((0 < ts AND ts <= 1542894389184806000)) GROUP BY ts HAVING uniq(word_hash) = 1 \
             ORDER BY ts DESC) AND (positionCaseInsensitive(file, 'error') != 0)))"
        );
    }

    #[test]
    fn test_short_notation_without_timestamp_is_vacuous() {
        let mut schema = plain_schema();
        schema.fields[0].full_text = true;
        let clause = MatchQueryClause::parse("error", false, &schema).unwrap();
        assert!(clause.items().is_empty());
        assert_eq!(clause.render(), "");
    }

    #[test]
    fn test_wide_notation_grouped_values() {
        let query = r#"message:("SQL update" OR "SQL select") AND file:"DB""#;
        let clause = MatchQueryClause::parse(query, false, &gate_schema()).unwrap();
        assert_eq!(
            field_matches(&clause),
            vec![
                ("", "message", "\"SQL update\""),
                ("OR", "message", "\"SQL select\""),
                ("AND", "file", "\"DB\""),
            ]
        );
        assert!(clause
            .items()
            .iter()
            .filter_map(|item| match item {
                QueryItem::FieldMatch(m) => Some(m),
                QueryItem::Literal(_) => None,
            })
            .all(|m| m.index.is_some()));

        let sql = clause.render();
        assert!(sql.starts_with("(((ts IN (SELECT ts FROM logs.inverted_index_logs_gate"));
        assert!(sql.contains("cityHash64('sql'),cityHash64('update')"));
        assert!(sql.contains(") OR (ts IN ("));
        assert!(sql.contains(")) AND (ts IN ("));
        assert!(sql.ends_with("AND (positionCaseInsensitive(file, 'db') != 0)))"));
    }

    #[test]
    fn test_wide_notation_direct_checks() {
        let query = r#"message:("SQL update" OR "SQL select") AND file:"DB""#;
        let clause = MatchQueryClause::parse(query, false, &plain_schema()).unwrap();
        assert_eq!(
            clause.render(),
            "(((position(message, 'SQL update') != 0) OR (position(message, 'SQL select') != 0)) \
             AND (position(file, 'DB') != 0))"
        );
    }

    #[test]
    fn test_wide_notation_operator_before_group() {
        let clause =
            MatchQueryClause::parse("pid:41671 AND NOT (host:a OR host:b)", false, &gate_schema())
                .unwrap();
        assert_eq!(
            clause.render(),
            "((pid = 41671) AND NOT ((position(host, 'a') != 0) OR (position(host, 'b') != 0)))"
        );
    }

    #[test]
    fn test_wildcards() {
        let schema = gate_schema();
        let clause = MatchQueryClause::parse("host:web-*", true, &schema).unwrap();
        assert_eq!(clause.render(), "((like(host, '%web-%%')))");

        let clause = MatchQueryClause::parse("host:web-?", false, &schema).unwrap();
        assert_eq!(clause.render(), "((position(host, 'web-?') != 0))");
    }

    #[test]
    fn test_unknown_field_fails() {
        let err = MatchQueryClause::parse("nope:1", false, &gate_schema()).unwrap_err();
        assert!(matches!(err, QueryError::UnknownField(name) if name == "nope"));
    }

    #[test]
    fn test_field_context_resets_after_group() {
        let clause = MatchQueryClause::parse("host:(a b) c", false, &gate_schema()).unwrap();
        assert_eq!(
            field_matches(&clause),
            vec![("", "host", "a"), ("", "host", "b")]
        );
    }
}
