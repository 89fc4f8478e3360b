//! # Search Pipeline
//!
//! Executes Elasticsearch searches against storage. The aggregation runs
//! first; its histogram tells how far back the latest `size` documents
//! reach, so the hits query only scans that window.

use axum::http::StatusCode;
use chrono::{SecondsFormat, TimeZone, Utc};
use kq_core::aggregation::{reduce_logs_selection_time_range, BucketAggregation, DataSource, Row};
use kq_core::request::{ElasticRequest, ParseOptions};
use kq_core::schema::{FieldSpec, TableSchema};
use kq_core::{QueryError, QueryResult, SourceError};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::time::Instant;
use thiserror::Error;

/// Pseudo index Kibana probes on startup; it never has data.
const ALL_INDICES: &str = "_all";

/// Column the `merge` table function adds with the source table name.
const TABLE_COLUMN: &str = "_table";

/// Opens storage connections for resolved indices.
pub trait Backend: Send + Sync {
    /// `table` is the data table name or pattern the index resolved to.
    fn open(&self, schema: &TableSchema, table: &str) -> Result<Box<dyn DataSource>, SourceError>;
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("no such index [{0}]")]
    IndexNotFound(String),

    #[error("storage is unavailable: {0}")]
    Backend(#[source] SourceError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("{0}")]
    BadRequest(String),
}

impl SearchError {
    pub fn status(&self) -> StatusCode {
        match self {
            SearchError::IndexNotFound(_) => StatusCode::NOT_FOUND,
            SearchError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SearchError::Query(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            SearchError::Query(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SearchError::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            SearchError::IndexNotFound(_) => "index_not_found_exception",
            SearchError::BadRequest(_) => "parsing_exception",
            SearchError::Query(e) if e.is_client_error() => "illegal_argument_exception",
            SearchError::Query(_) | SearchError::Backend(_) => "search_phase_execution_exception",
        }
    }

    /// Error document in the shape Elasticsearch clients parse.
    pub fn to_body(&self) -> Value {
        let mut cause = json!({"type": self.error_type(), "reason": self.to_string()});
        if let SearchError::IndexNotFound(index) = self {
            cause["index"] = Value::from(index.as_str());
            cause["resource.id"] = Value::from(index.as_str());
            cause["resource.type"] = Value::from("index_or_alias");
        }
        json!({
            "error": {
                "root_cause": [cause.clone()],
                "type": cause["type"],
                "reason": cause["reason"],
            },
            "status": self.status().as_u16(),
        })
    }
}

/// Finds the table an index name refers to.
///
/// A leading `.` is ignored. Patterns with `*` match configured table
/// names; the pattern itself is returned as the data table so the query
/// reads every matching table.
pub fn resolve_index<'a>(
    tables: &'a [TableSchema],
    index: &str,
) -> Result<(&'a TableSchema, String), SearchError> {
    let name = index.strip_prefix('.').unwrap_or(index);
    if !name.contains('*') {
        return tables
            .iter()
            .find(|t| t.name == name)
            .map(|t| (t, t.name.clone()))
            .ok_or_else(|| SearchError::IndexNotFound(index.to_string()));
    }

    let pattern: Vec<String> = name.split('*').map(regex::escape).collect();
    let pattern = Regex::new(&format!("^{}$", pattern.join(".*")))
        .map_err(|e| SearchError::BadRequest(format!("bad index pattern '{}': {}", index, e)))?;
    tables
        .iter()
        .find(|t| pattern.is_match(&t.name))
        .map(|t| (t, name.to_string()))
        .ok_or_else(|| SearchError::IndexNotFound(index.to_string()))
}

/// Everything a search needs besides the request.
pub struct SearchContext<'a> {
    pub backend: &'a dyn Backend,
    pub tables: &'a [TableSchema],
    pub options: ParseOptions,
}

impl SearchContext<'_> {
    /// Runs one search body against `index`.
    pub fn search(&self, index: &str, body: &Value) -> Result<Value, SearchError> {
        let started = Instant::now();
        if index == ALL_INDICES {
            return Ok(json!({"hits": {"total": 0}}));
        }
        let (schema, table) = resolve_index(self.tables, index)?;
        let source = self.backend.open(schema, &table).map_err(SearchError::Backend)?;

        let mut response = execute(source.as_ref(), schema, body, self.options)?;
        response["took"] = Value::from(started.elapsed().as_millis() as u64);
        Ok(response)
    }

    /// Runs an `_msearch` NDJSON body of header and body line pairs.
    ///
    /// Each pair runs independently; a failing pair puts its error document
    /// in its own slot. `path_index` takes precedence over header indices.
    pub fn multi_search(&self, path_index: Option<&str>, body: &str) -> Result<Value, SearchError> {
        let lines: Vec<&str> = body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.len() % 2 != 0 {
            return Err(SearchError::BadRequest(
                "msearch body must consist of header and body line pairs".into(),
            ));
        }

        let responses: Vec<Value> = lines
            .chunks(2)
            .map(|pair| match self.search_pair(path_index, pair[0], pair[1]) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!("msearch item failed: {}", e);
                    e.to_body()
                }
            })
            .collect();
        Ok(json!({ "responses": responses }))
    }

    fn search_pair(&self, path_index: Option<&str>, header: &str, body: &str) -> Result<Value, SearchError> {
        let header = ElasticRequest::parse(header, &TableSchema::empty(), self.options)?;
        let index = path_index
            .or(header.index.as_deref())
            .ok_or_else(|| SearchError::BadRequest("cannot fetch index from msearch header".into()))?;
        let body: Value = serde_json::from_str(body)
            .map_err(|e| QueryError::InvalidRequest(format!("malformed JSON: {}", e)))?;
        let mut response = self.search(index, &body)?;
        response["status"] = Value::from(200);
        Ok(response)
    }
}

/// Runs a parsed search against one data source and builds the response.
pub fn execute(
    source: &dyn DataSource,
    schema: &TableSchema,
    body: &Value,
    options: ParseOptions,
) -> QueryResult<Value> {
    let mut request = ElasticRequest::from_value(body, schema, options)?;

    let aggregation = match &request.aggregation {
        Some(aggregation) => Some(aggregation.aggregate(source)?),
        None => None,
    };
    if let Some(result) = &aggregation {
        if let Some(low) = reduce_logs_selection_time_range(&result.buckets, request.size as u64) {
            tracing::debug!("hits window reduced to start after {}", low);
            request.update_logs_lower_time_range(low);
        }
    }

    let hits = match request.hits_request(source.database(), source.data_table()) {
        Some(select) => {
            let sql = select.build();
            tracing::debug!("hits request: {}", sql);
            let rows = source
                .fetch_rows(&select)
                .map_err(|source| QueryError::Execution { sql, source })?;
            Some(rows)
        }
        None => None,
    };

    let envelope = Envelope {
        index: source.data_table(),
        schema,
        request: &request,
    };
    envelope.render(aggregation.as_ref(), hits)
}

struct Envelope<'a> {
    index: &'a str,
    schema: &'a TableSchema,
    request: &'a ElasticRequest,
}

impl Envelope<'_> {
    fn render(&self, aggregation: Option<&BucketAggregation>, rows: Option<Vec<Row>>) -> QueryResult<Value> {
        let total = match (&rows, aggregation) {
            (Some(rows), _) => rows.len() as u64,
            (None, Some(aggregation)) => aggregation.doc_count(),
            (None, None) => 0,
        };
        let hits: Vec<Value> = rows
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(position, row)| self.hit(position, row))
            .collect();

        let mut response = json!({
            "took": 0,
            "timed_out": false,
            "_shards": {"total": 1, "successful": 1, "skipped": 0, "failed": 0},
            "hits": {"total": total, "max_score": null, "hits": hits},
        });
        if let Some(aggregation) = aggregation {
            response["aggregations"] = aggregation
                .to_value()
                .map_err(|e| QueryError::MalformedRow(format!("bucket rendering failed: {}", e)))?;
        }
        Ok(response)
    }

    fn hit(&self, position: usize, mut row: Row) -> Value {
        let table = match row.remove(TABLE_COLUMN) {
            Some(Value::String(table)) => table,
            _ => self.index.to_string(),
        };
        let id = self
            .schema
            .uuid_field()
            .and_then(|f| row.get(&f.column.column))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| format!("{}-{}", table, position));

        let sort: Vec<Value> = self
            .request
            .sorting
            .fields()
            .filter_map(|column| row.get(column).cloned())
            .collect();

        let mut fields = Map::new();
        for name in &self.request.docvalue_fields {
            let Some(spec) = self.schema.field(name) else {
                continue;
            };
            if let Some(value) = row.get(&spec.column.column) {
                fields.insert(name.clone(), Value::Array(vec![doc_value(spec, value)]));
            }
        }

        let source: Map<String, Value> = row
            .into_iter()
            .map(|(column, value)| {
                let name = self
                    .schema
                    .fields
                    .iter()
                    .find(|f| f.column.column == column)
                    .map(|f| f.name.clone())
                    .unwrap_or(column);
                (name, value)
            })
            .collect();

        json!({
            "_index": self.index,
            "_type": table,
            "_version": 1,
            "_id": id,
            "_score": 1,
            "found": true,
            "_source": source,
            "sort": sort,
            "fields": fields,
        })
    }
}

/// Timestamps are stored as epoch nanoseconds; clients want dates.
fn doc_value(spec: &FieldSpec, value: &Value) -> Value {
    if !spec.timestamp {
        return value.clone();
    }
    let nanos = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    };
    match nanos {
        Some(nanos) => Value::String(Utc.timestamp_nanos(nanos).to_rfc3339_opts(SecondsFormat::Millis, true)),
        None => value.clone(),
    }
}

/// `_field_caps` document for a table.
pub fn field_caps(schema: &TableSchema) -> Value {
    let mut fields = Map::new();
    for (name, searchable, aggregatable) in [
        ("_index", true, true),
        ("_type", true, true),
        ("_source", false, false),
        ("_id", true, true),
    ] {
        fields.insert(
            name.to_string(),
            json!({ name: {"type": name, "searchable": searchable, "aggregatable": aggregatable} }),
        );
    }
    for field in &schema.fields {
        let kind = field.elastic_type();
        fields.insert(
            field.name.clone(),
            json!({ kind: {"type": kind, "searchable": true, "aggregatable": kind != "text"} }),
        );
    }
    json!({ "fields": fields })
}
