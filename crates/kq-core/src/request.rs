//! # Elasticsearch Request Parser
//!
//! Reads a search body (or an `_msearch` header line) into a condition tree
//! and an aggregation tree. Parts the adapter does not understand are logged
//! and ignored, the way Elasticsearch clients expect partial support to
//! behave; only problems that would change result correctness fail.

use crate::aggregation::{Aggregation, DateHistogram, FilterSettings, Filters};
use crate::error::{QueryError, QueryResult};
use crate::query::{
    BoolSection, Clause, ExistsClause, MatchClause, MatchQueryClause, RangeClause, RangeValue,
    Section, SectionKind, SortSection, TermsClause,
};
use crate::schema::{FieldSpec, TableSchema};
use crate::sql::SelectRequest;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Dashboards send time bounds in milliseconds; log rows store nanoseconds.
const EPOCH_MILLIS_FORMAT: &str = "epoch_millis";
const NS_PER_MS: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Allow date histograms to read the pre-aggregated table.
    pub histogram_fast_path: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            histogram_fast_path: true,
        }
    }
}

/// Storage does not know keyword sub-fields or `@` in column names.
pub fn correct_field_name(name: &str) -> String {
    name.replacen(".keyword", "", 1).replacen('@', "", 1)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Items of a JSON list; a single object counts as a one item list.
fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ElasticRequest {
    /// Set only for `_msearch` header lines, which carry nothing else.
    pub index: Option<String>,
    pub size: usize,
    pub query: Option<Clause>,
    pub sorting: SortSection,
    pub docvalue_fields: Vec<String>,
    pub aggregation: Option<Aggregation>,
    /// Range clauses of the query by client-facing field name.
    ranges: HashMap<String, RangeClause>,
    timestamp: Option<FieldSpec>,
}

impl ElasticRequest {
    pub fn parse(body: &str, schema: &TableSchema, options: ParseOptions) -> QueryResult<Self> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| QueryError::InvalidRequest(format!("malformed JSON: {}", e)))?;
        Self::from_value(&value, schema, options)
    }

    pub fn from_value(value: &Value, schema: &TableSchema, options: ParseOptions) -> QueryResult<Self> {
        let config = value
            .as_object()
            .ok_or_else(|| QueryError::InvalidRequest("request must be a JSON object".into()))?;

        let mut request = Self {
            timestamp: schema.timestamp_field().cloned(),
            ..Default::default()
        };
        if let Some(index) = fetch_index(config) {
            request.index = Some(index);
            return Ok(request);
        }

        let mut parser = Parser {
            schema,
            ranges: HashMap::new(),
        };
        request.size = config.get("size").and_then(Value::as_u64).unwrap_or(0) as usize;
        request.sorting = parser.parse_sorting(config.get("sort"));
        request.docvalue_fields = parse_docvalue_fields(config.get("docvalue_fields"));
        request.query = match config.get("query") {
            Some(query) => parser.parse_clause(query)?,
            None => None,
        };

        let optimization = request.size > 0 && options.histogram_fast_path;
        request.aggregation = parser.parse_aggregation(config, request.query.as_ref(), optimization)?;
        request.ranges = parser.ranges;
        request.attach_time_ranges();
        Ok(request)
    }

    /// True for `_msearch` header lines.
    pub fn is_index_header(&self) -> bool {
        self.index.is_some()
    }

    /// Client-facing names of the sort fields.
    pub fn sorting_fields(&self) -> Vec<String> {
        self.sorting.fields().map(str::to_string).collect()
    }

    pub fn time_range(&self) -> Option<&RangeClause> {
        self.timestamp
            .as_ref()
            .and_then(|ts| self.ranges.get(&ts.name))
    }

    fn visit_clauses_mut(&mut self, f: &mut dyn FnMut(&mut Clause)) {
        if let Some(query) = self.query.as_mut() {
            query.visit_mut(f);
        }
        if let Some(aggregation) = self.aggregation.as_mut() {
            aggregation.visit_clauses_mut(f);
        }
    }

    /// Full-text lookups need the time window to bound the index scan.
    fn attach_time_ranges(&mut self) {
        let Some(range) = self.time_range().cloned() else {
            return;
        };
        self.visit_clauses_mut(&mut |clause| {
            if let Clause::QueryString(query) = clause {
                query.set_time_range(range.clone());
            }
        });
    }

    /// Moves the lower bound of the time window up to `low` (exclusive).
    pub fn update_logs_lower_time_range(&mut self, low: DateTime<Utc>) {
        let Some(nanos) = low.timestamp_nanos_opt() else {
            tracing::warn!("time bound {} is out of the nanosecond range", low);
            return;
        };
        let Some(name) = self.timestamp.as_ref().map(|ts| ts.name.clone()) else {
            return;
        };
        let Some(range) = self.ranges.get_mut(&name) else {
            return;
        };
        range.add_lower(nanos, true);
        let column = range.field().to_string();

        self.visit_clauses_mut(&mut |clause| {
            if let Clause::Range(range) = clause {
                if range.field() == column {
                    range.add_lower(nanos, true);
                }
            }
        });
        self.attach_time_ranges();
    }

    /// Query returning the matching documents; `None` when none are wanted.
    pub fn hits_request(&self, database: &str, table: &str) -> Option<SelectRequest> {
        if self.size == 0 {
            return None;
        }
        let mut request = SelectRequest::merge_template(database, table);
        if let Some(query) = &self.query {
            request.filter(&query.render());
        }
        request
            .order_by(&self.sorting.render(), None)
            .limit(self.size);
        Some(request)
    }
}

fn fetch_index(config: &Map<String, Value>) -> Option<String> {
    match config.get("index")? {
        Value::String(index) => Some(index.clone()),
        Value::Array(indices) => indices.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// `["field", {"field": "x", "format": "..."}]`
fn parse_docvalue_fields(config: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(fields)) = config else {
        return Vec::new();
    };
    fields
        .iter()
        .filter_map(|f| match f {
            Value::String(name) => Some(name.as_str()),
            Value::Object(o) => o.get("field").and_then(Value::as_str),
            _ => None,
        })
        .map(correct_field_name)
        .collect()
}

struct Parser<'a> {
    schema: &'a TableSchema,
    ranges: HashMap<String, RangeClause>,
}

impl<'a> Parser<'a> {
    fn field(&self, name: &str) -> Option<&'a FieldSpec> {
        self.schema.field(&correct_field_name(name))
    }

    /// `"sort": [{"<field>": {"order": "desc"}}, ...]`; unknown fields are skipped.
    fn parse_sorting(&self, config: Option<&Value>) -> SortSection {
        let mut sorting = SortSection::default();
        let Some(Value::Array(items)) = config else {
            return sorting;
        };
        for (name, settings) in items.iter().filter_map(Value::as_object).flatten() {
            let Some(field) = self.field(name) else {
                continue;
            };
            let order = match settings {
                Value::Object(o) => o.get("order").and_then(Value::as_str),
                Value::String(s) => Some(s.as_str()),
                _ => None,
            };
            match order.unwrap_or("asc").parse() {
                Ok(order) => sorting.push(field.column.column.clone(), order),
                Err(e) => tracing::warn!("sorting by '{}' ignored: {}", name, e),
            }
        }
        sorting
    }

    /// `None` for clauses that do not constrain anything (`match_all`).
    fn parse_clause(&mut self, config: &Value) -> QueryResult<Option<Clause>> {
        let Some(clause) = config.as_object() else {
            tracing::warn!("query clause has incorrect format: {}", config);
            return Ok(Some(Clause::Unknown));
        };
        for (key, value) in clause {
            let parsed = match key.as_str() {
                "bool" => self.parse_bool(value)?,
                "match_phrase" => self.parse_match_phrase(value),
                "range" => self.parse_range(value),
                "exists" => self.parse_exists(value),
                "terms" | "term" => self.parse_terms(value),
                "query_string" => self.parse_query_string(value),
                "match_all" => return Ok(None),
                _ => continue,
            };
            return Ok(Some(parsed));
        }
        tracing::warn!("unsupported query clause ignored: {}", config);
        Ok(Some(Clause::Unknown))
    }

    fn parse_section(&mut self, config: Option<&Value>, kind: SectionKind) -> QueryResult<Section> {
        let mut section = Section::new(kind);
        for item in config.map(as_list).unwrap_or_default() {
            if let Some(clause) = self.parse_clause(item)? {
                section.append_child(clause);
            }
        }
        Ok(section)
    }

    fn parse_bool(&mut self, config: &Value) -> QueryResult<Clause> {
        let Some(config) = config.as_object() else {
            tracing::warn!("query 'bool' has incorrect format");
            return Ok(Clause::Section(Section::new(SectionKind::Empty)));
        };
        Ok(Clause::Bool(BoolSection {
            must: self.parse_section(config.get("must"), SectionKind::Must)?,
            must_not: self.parse_section(config.get("must_not"), SectionKind::MustNot)?,
            should: self.parse_section(config.get("should"), SectionKind::Should)?,
            filter: self.parse_section(config.get("filter"), SectionKind::Filter)?,
        }))
    }

    /// `{"name": "Bob"}` or `{"name": {"query": "Bob"}}`.
    fn parse_match_phrase(&self, config: &Value) -> Clause {
        let found = config.as_object().and_then(|fields| {
            fields
                .iter()
                .find_map(|(name, value)| self.field(name).map(|field| (field, value)))
        });
        match found {
            Some((field, Value::Object(settings))) => {
                let value = settings.get("query").cloned().unwrap_or(Value::Null);
                Clause::Match(MatchClause::new(field.column.clone(), value))
            }
            Some((field, value)) => Clause::Match(MatchClause::new(field.column.clone(), value.clone())),
            None => {
                tracing::warn!("couldn't parse query 'match_phrase' clause: {}", config);
                Clause::Unknown
            }
        }
    }

    fn parse_range(&mut self, config: &Value) -> Clause {
        let Some((name, Value::Object(params))) = config.as_object().and_then(|c| c.iter().next()) else {
            tracing::warn!("couldn't parse query 'range' clause: {}", config);
            return Clause::Unknown;
        };
        let Some(field) = self.field(name) else {
            tracing::warn!("range on unknown field '{}' ignored", name);
            return Clause::Unknown;
        };

        let mut range = RangeClause::new(field.column.column.clone(), field.column.is_array());
        if let Some(format) = params.get("format").and_then(Value::as_str) {
            range.set_format(format);
        }
        for (bound, value) in params {
            let Some(mut threshold) = RangeValue::from_json(value) else {
                if matches!(bound.as_str(), "gt" | "gte" | "lt" | "lte") {
                    tracing::warn!("non numeric range bound {}={} ignored", bound, value);
                }
                continue;
            };
            if range.format() == EPOCH_MILLIS_FORMAT {
                threshold = threshold.scaled(NS_PER_MS);
            }
            match bound.as_str() {
                "lt" => range.add_upper(threshold, true),
                "lte" => range.add_upper(threshold, false),
                "gt" => range.add_lower(threshold, true),
                "gte" => range.add_lower(threshold, false),
                _ => continue,
            };
        }

        self.ranges.insert(field.name.clone(), range.clone());
        Clause::Range(range)
    }

    fn parse_exists(&self, config: &Value) -> Clause {
        match config.get("field").and_then(Value::as_str) {
            Some(name) => {
                let field = self
                    .field(name)
                    .map(|f| f.column.column.clone())
                    .unwrap_or_else(|| correct_field_name(name));
                Clause::Exists(ExistsClause { field })
            }
            None => {
                tracing::warn!("couldn't parse query 'exists' clause");
                Clause::Unknown
            }
        }
    }

    /// `{"status": ["500", "502"]}`, `{"status": "500"}` or `{"status": {"value": "500"}}`.
    fn parse_terms(&self, config: &Value) -> Clause {
        let Some(fields) = config.as_object() else {
            tracing::warn!("couldn't parse query 'terms' clause");
            return Clause::Unknown;
        };
        let mut terms = TermsClause::new();
        for (name, values) in fields {
            let Some(field) = self.field(name) else {
                continue;
            };
            let column = &field.column.column;
            match values {
                Value::Array(values) => {
                    for value in values {
                        terms.add_term(column, value_text(value));
                    }
                }
                Value::Object(o) => match o.get("value") {
                    Some(value) => terms.add_term(column, value_text(value)),
                    None => tracing::warn!("couldn't parse values of '{}' in terms clause", name),
                },
                Value::Null => tracing::warn!("couldn't parse values of '{}' in terms clause", name),
                value => terms.add_term(column, value_text(value)),
            }
        }
        Clause::Terms(terms)
    }

    fn parse_query_string(&self, config: &Value) -> Clause {
        let Some(query) = config.get("query").and_then(Value::as_str) else {
            tracing::warn!("couldn't find condition for 'query_string' clause");
            return Clause::Unknown;
        };
        let analyze_wildcard = config
            .get("analyze_wildcard")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        match MatchQueryClause::parse(query, analyze_wildcard, self.schema) {
            Ok(clause) => Clause::QueryString(clause),
            Err(e) => {
                tracing::warn!("ignoring 'query_string' clause '{}': {}", query, e);
                Clause::Unknown
            }
        }
    }

    /// Reads the first aggregation of `config`; deeper levels become its
    /// sub-aggregation.
    fn parse_aggregation(
        &mut self,
        config: &Map<String, Value>,
        query: Option<&Clause>,
        optimization: bool,
    ) -> QueryResult<Option<Aggregation>> {
        let Some(aggs) = config
            .get("aggs")
            .or_else(|| config.get("aggregations"))
            .and_then(Value::as_object)
        else {
            return Ok(None);
        };
        if aggs.len() > 1 {
            tracing::warn!("more than one aggregation found on single nesting level");
        }
        let Some((name, Value::Object(settings))) = aggs.iter().next() else {
            return Ok(None);
        };

        let mut aggregation = None;
        for (kind, params) in settings {
            aggregation = match kind.as_str() {
                "date_histogram" => self.parse_date_histogram(params, optimization),
                "filters" => self.parse_filters(params)?,
                _ => continue,
            };
            break;
        }
        let Some(mut aggregation) = aggregation else {
            return Ok(None);
        };

        aggregation.set_name(name.clone());
        if let Some(sub) = self.parse_aggregation(settings, query, optimization)? {
            if let Err(e) = aggregation.set_sub_aggregation(sub) {
                tracing::warn!("sub aggregation of '{}' dropped: {}", name, e);
            }
        }
        if let Some(query) = query {
            aggregation.add_common_filter(query.clone());
        }
        Ok(Some(aggregation))
    }

    fn parse_date_histogram(&self, config: &Value, optimization: bool) -> Option<Aggregation> {
        let Some(name) = config.get("field").and_then(Value::as_str) else {
            tracing::warn!("couldn't find timestamp field for histogram aggregation");
            return None;
        };
        let interval = ["interval", "fixed_interval", "calendar_interval"]
            .iter()
            .find_map(|key| config.get(*key).and_then(Value::as_str));
        let Some(interval) = interval else {
            tracing::warn!("couldn't find interval field for histogram aggregation");
            return None;
        };
        let Some(field) = self.field(name) else {
            tracing::warn!("histogram on unknown field '{}' ignored", name);
            return None;
        };

        let range = self.ranges.get(&field.name);
        match DateHistogram::new(interval, field.column.column.clone(), range, optimization) {
            Ok(histogram) => Some(Aggregation::DateHistogram(histogram)),
            Err(e) => {
                tracing::warn!("histogram aggregation ignored: {}", e);
                None
            }
        }
    }

    /// `"filters": {"filters": {"<name>": <clause>, ...}}`, in declaration order.
    fn parse_filters(&mut self, config: &Value) -> QueryResult<Option<Aggregation>> {
        let Some(entries) = config.get("filters").and_then(Value::as_object) else {
            tracing::warn!("couldn't parse filters aggregation settings");
            return Ok(None);
        };
        let mut filters = Vec::with_capacity(entries.len());
        for (name, condition) in entries {
            filters.push(FilterSettings::new(name.clone(), self.parse_clause(condition)?));
        }
        Ok(Some(Aggregation::Filters(Filters::new(filters))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{reduce_logs_selection_time_range, Bucket, BucketKey};
    use crate::query::clauses_equivalent;
    use chrono::TimeZone;

    const LOW_MS: i64 = 1563191891606;
    const HIGH_MS: i64 = 1563192791606;

    fn gate_schema() -> TableSchema {
        TableSchema::new(
            "logs_gate",
            vec![
                FieldSpec::new("ts", "UInt64").timestamp(),
                FieldSpec::new("message", "String").full_text(),
                FieldSpec::new("file", "String").full_text(),
                FieldSpec::new("status", "String"),
                FieldSpec::new("host", "String"),
                FieldSpec::new("pid", "UInt64"),
                FieldSpec::new("tags", "Array(String)"),
            ],
        )
    }

    fn parse(body: &str) -> ElasticRequest {
        ElasticRequest::parse(body, &gate_schema(), ParseOptions::default()).unwrap()
    }

    fn discover_body(query: &str, interval: &str, size: usize) -> String {
        format!(
            r#"{{
                "size": {size},
                "sort": [{{"@ts": {{"order": "desc", "unmapped_type": "boolean"}}}}],
                "docvalue_fields": [{{"field": "@ts", "format": "date_time"}}],
                "query": {{"bool": {{
                    "must": [
                        {{"query_string": {{"query": "{query}", "analyze_wildcard": true}}}},
                        {{"range": {{"@ts": {{"gte": {LOW_MS}, "lte": {HIGH_MS}, "format": "epoch_millis"}}}}}}
                    ],
                    "filter": [],
                    "should": [],
                    "must_not": []
                }}}},
                "aggs": {{"2": {{"date_histogram": {{
                    "field": "@ts", "interval": "{interval}", "time_zone": "UTC", "min_doc_count": 1
                }}}}}}
            }}"#
        )
    }

    #[test]
    fn test_index_header() {
        let request = parse(r#"{"index":["logs_gate"],"ignore_unavailable":true}"#);
        assert!(request.is_index_header());
        assert_eq!(request.index.as_deref(), Some("logs_gate"));
        assert!(request.query.is_none());

        let request = parse(r#"{"index":"logs_*"}"#);
        assert_eq!(request.index.as_deref(), Some("logs_*"));
    }

    #[test]
    fn test_invalid_json() {
        let err = ElasticRequest::parse("{", &gate_schema(), ParseOptions::default()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest(_)));
        assert!(ElasticRequest::parse("[]", &gate_schema(), ParseOptions::default()).is_err());
    }

    #[test]
    fn test_discover_request() {
        let request = parse(&discover_body("pid:41671", "30s", 500));
        assert_eq!(request.size, 500);
        assert_eq!(request.sorting_fields(), vec!["ts"]);
        assert_eq!(request.docvalue_fields, vec!["ts"]);

        let hits = request.hits_request("logs", "logs_gate").unwrap();
        assert_eq!(
            hits.build(),
            format!(
                "SELECT *, _table FROM merge(logs, '^logs_gate') \
                 WHERE (((pid = 41671)) AND ({}000000 <= ts AND ts <= {}000000)) \
                 ORDER BY ts DESC LIMIT 500",
                LOW_MS, HIGH_MS
            )
        );

        let aggregation = request.aggregation.as_ref().unwrap();
        assert_eq!(aggregation.name(), "2");
        assert_eq!(
            aggregation.compile("logs", "logs_gate").build(),
            format!(
                "SELECT [ count() ] as results, toInt64((ts) / 30000000000) as cur_key \
                 FROM merge(logs, '^logs_gate') \
                 WHERE (((pid = 41671)) AND ({}000000 <= ts AND ts <= {}000000)) \
                 GROUP BY cur_key ORDER BY cur_key ASC",
                LOW_MS, HIGH_MS
            )
        );
    }

    #[test]
    fn test_query_string_gets_time_range() {
        let request = parse(&discover_body("connection", "30s", 500));
        let sql = request.query.as_ref().unwrap().render();
        assert!(sql.contains(&format!(
            "cityHash64('message')) AND (({}000000 <= ts AND ts <= {}000000)) GROUP BY ts",
            LOW_MS, HIGH_MS
        )));
        assert!(sql.contains("(positionCaseInsensitive(file, 'connection') != 0)"));
    }

    #[test]
    fn test_fast_path_needs_hits_and_option() {
        let request = parse(&discover_body("*", "10m", 500));
        let sql = request.aggregation.unwrap().compile("logs", "logs_gate").build();
        assert!(sql.contains("merge(logs, '^histogram_logs_gate')"));

        let request = parse(&discover_body("*", "10m", 0));
        let sql = request.aggregation.unwrap().compile("logs", "logs_gate").build();
        assert!(sql.contains("merge(logs, '^logs_gate')"));

        let options = ParseOptions {
            histogram_fast_path: false,
        };
        let request =
            ElasticRequest::parse(&discover_body("*", "10m", 500), &gate_schema(), options).unwrap();
        let sql = request.aggregation.unwrap().compile("logs", "logs_gate").build();
        assert!(sql.contains("merge(logs, '^logs_gate')"));
    }

    #[test]
    fn test_histogram_without_range_is_omitted() {
        let request = parse(
            r#"{"size":0,"aggs":{"2":{"date_histogram":{"field":"@ts","interval":"30s"}}}}"#,
        );
        assert!(request.aggregation.is_none());

        let request = parse(&discover_body("*", "30q", 0));
        assert!(request.aggregation.is_none());
        assert!(request.query.is_some());
    }

    #[test]
    fn test_filters_aggregation() {
        let request = parse(
            r#"{
                "size": 0,
                "query": {"match_all": {}},
                "aggs": {"types": {"filters": {"filters": {
                    "errors": {"match_phrase": {"status": "500"}},
                    "all": {"match_all": {}}
                }}}}
            }"#,
        );
        assert!(request.query.is_none());
        assert!(request.hits_request("logs", "logs_gate").is_none());
        let aggregation = request.aggregation.unwrap();
        assert_eq!(aggregation.name(), "types");
        assert_eq!(
            aggregation.compile("logs", "logs_gate").build(),
            "SELECT [ countIf((status = '500')),count() ] as results FROM merge(logs, '^logs_gate')"
        );
    }

    #[test]
    fn test_histogram_with_filters_and_unsupported_nesting() {
        let body = format!(
            r#"{{
                "size": 0,
                "query": {{"range": {{"ts": {{"gte": {LOW_MS}, "lt": {HIGH_MS}, "format": "epoch_millis"}}}}}},
                "aggs": {{"2": {{
                    "date_histogram": {{"field": "ts", "fixed_interval": "1m"}},
                    "aggs": {{"3": {{"filters": {{"filters": {{
                        "errors": {{"query_string": {{"query": "status:500"}}}}
                    }}}}}}}}
                }}}}
            }}"#
        );
        let request = parse(&body);
        let aggregation = request.aggregation.unwrap();
        assert_eq!(aggregation.sub_aggregation().map(Filters::len), Some(1));
        assert!(aggregation
            .compile("logs", "logs_gate")
            .build()
            .starts_with("SELECT [ countIf(((position(status, '500') != 0))),count() ] as results"));

        let nested_histogram = r#"{
            "query": {"range": {"ts": {"gte": 1, "lt": 2}}},
            "aggs": {"2": {
                "date_histogram": {"field": "ts", "interval": "1m"},
                "aggs": {"3": {"date_histogram": {"field": "ts", "interval": "1s"}}}
            }}
        }"#;
        let request = parse(nested_histogram);
        let aggregation = request.aggregation.unwrap();
        assert_eq!(aggregation.kind(), "date_histogram");
        assert!(aggregation.sub_aggregation().is_none());
    }

    #[test]
    fn test_leaf_clauses() {
        let request = parse(
            r#"{"query": {"bool": {
                "must": [
                    {"match_phrase": {"status.keyword": {"query": "500"}}},
                    {"terms": {"host": ["a", "b"]}},
                    {"exists": {"field": "tags"}},
                    {"geo_shape": {"location": {}}}
                ],
                "must_not": [{"match_phrase": {"tags": "debug"}}],
                "should": [{"range": {"pid": {"gt": 10}}}]
            }}}"#,
        );
        assert_eq!(
            request.query.unwrap().render(),
            "((status = '500') AND ((host = 'a') OR (host = 'b')) AND (isNotNull(tags))) \
             AND (NOT (has(tags, 'debug')))"
        );
    }

    #[test]
    fn test_parsed_tree_matches_hand_built_tree() {
        let request = parse(
            r#"{"query": {"bool": {"must": [
                {"match_phrase": {"host": "a"}},
                {"term": {"status": "500"}}
            ]}}}"#,
        );
        let mut expected = BoolSection::default();
        let mut terms = TermsClause::new();
        terms.add_term("status", "500");
        expected.must.append_child(Clause::Terms(terms));
        expected.must.append_child(Clause::Match(MatchClause::string("host", "a")));
        assert!(clauses_equivalent(
            request.query.as_ref().unwrap(),
            &Clause::Bool(expected)
        ));
    }

    #[test]
    fn test_unknown_query_string_field_is_ignored() {
        let request = ElasticRequest::parse(
            r#"{"size": 5, "query": {"query_string": {"query": "nope:1"}}}"#,
            &gate_schema(),
            ParseOptions::default(),
        )
        .unwrap();
        assert!(matches!(request.query, Some(Clause::Unknown)));
        assert_eq!(
            request.hits_request("logs", "logs_gate").unwrap().build(),
            "SELECT *, _table FROM merge(logs, '^logs_gate') LIMIT 5"
        );
    }

    #[test]
    fn test_malformed_bool_is_vacuous() {
        let request = ElasticRequest::parse(
            r#"{"size": 1, "query": {"bool": ["not", "an", "object"]}}"#,
            &gate_schema(),
            ParseOptions::default(),
        )
        .unwrap();
        assert!(matches!(
            &request.query,
            Some(Clause::Section(section)) if section.kind() == SectionKind::Empty
        ));
        assert_eq!(request.query.as_ref().unwrap().render(), "");
    }

    #[test]
    fn test_update_logs_lower_time_range() {
        let mut request = parse(&discover_body("connection", "30s", 500));
        let low = Utc.timestamp_opt(1563192000, 0).unwrap();
        request.update_logs_lower_time_range(low);

        let hits = request.hits_request("logs", "logs_gate").unwrap().build();
        assert!(hits.contains(&format!("(1563192000000000000 < ts AND ts <= {}000000)", HIGH_MS)));
        assert!(!hits.contains(&format!("{}000000 <= ts", LOW_MS)));
        assert_eq!(
            request.time_range().and_then(|r| r.lower()).map(|t| t.strict),
            Some(true)
        );

        let aggregation_sql = request.aggregation.unwrap().compile("logs", "logs_gate").build();
        assert!(aggregation_sql.contains("(1563192000000000000 < ts AND"));
    }

    #[test]
    fn test_reduce_then_tighten() {
        let mut request = parse(&discover_body("*", "1m", 7));
        let buckets: Vec<Bucket> = (0..3)
            .map(|m| {
                Bucket::new(
                    BucketKey::Time(Utc.timestamp_opt(1563192000 + m * 60, 0).unwrap()),
                    5,
                )
            })
            .collect();
        let cutoff = reduce_logs_selection_time_range(&buckets, request.size as u64).unwrap();
        request.update_logs_lower_time_range(cutoff);
        let hits = request.hits_request("logs", "logs_gate").unwrap().build();
        assert!(hits.contains("(1563192060000000000 < ts AND"));
    }

    #[test]
    fn test_correct_field_name() {
        assert_eq!(correct_field_name("@timestamp"), "timestamp");
        assert_eq!(correct_field_name("host.keyword"), "host");
        assert_eq!(correct_field_name("plain"), "plain");
    }
}
