//! # Bucket Aggregations
//!
//! An aggregation goes through four steps for one request:
//!
//! 1. configured from the request settings;
//! 2. linked with the request query (common filter) and at most one
//!    sub-aggregation;
//! 3. compiled into a single `SELECT` whose `results` array column carries
//!    one count per bucket kind;
//! 4. materialized from the returned rows into a [`BucketAggregation`].
//!
//! Only single-level nesting is supported: a date histogram may carry a
//! filters aggregation, and filters are always leaves.

pub mod bucket;
pub mod filters;
pub mod histogram;

pub use bucket::{Bucket, BucketAggregation, BucketKey, BucketsLayout};
pub use filters::{FilterSettings, Filters};
pub use histogram::{parse_interval, DateHistogram};

use crate::error::{QueryError, QueryResult, SourceError};
use crate::query::Clause;
use crate::sql::{SelectRequest, RESULTS_COLUMN};
use chrono::{DateTime, Utc};

/// Width of the pre-aggregated histogram buckets, in nanoseconds.
pub const PREPARED_DATA_PERIOD_NS: i64 = 5 * 60 * 1_000_000_000;

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Storage able to execute compiled requests.
pub trait DataSource {
    fn database(&self) -> &str;

    /// Table (or table name pattern) holding the raw log rows.
    fn data_table(&self) -> &str;

    fn fetch_rows(&self, request: &SelectRequest) -> Result<Vec<Row>, SourceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    DateHistogram(DateHistogram),
    Filters(Filters),
}

impl Aggregation {
    pub fn kind(&self) -> &'static str {
        match self {
            Aggregation::DateHistogram(_) => "date_histogram",
            Aggregation::Filters(_) => "filters",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Aggregation::DateHistogram(h) => &h.name,
            Aggregation::Filters(f) => &f.name,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        match self {
            Aggregation::DateHistogram(h) => h.name = name,
            Aggregation::Filters(f) => f.name = name,
        }
    }

    /// Condition every aggregated row must satisfy (the request query).
    pub fn add_common_filter(&mut self, filter: Clause) {
        match self {
            Aggregation::DateHistogram(h) => h.common_filter = Some(filter),
            Aggregation::Filters(f) => f.common_filter = Some(filter),
        }
    }

    /// Visits every clause held by this aggregation and its sub-aggregation.
    pub fn visit_clauses_mut(&mut self, f: &mut dyn FnMut(&mut Clause)) {
        match self {
            Aggregation::DateHistogram(h) => {
                if let Some(filter) = h.common_filter.as_mut() {
                    filter.visit_mut(f);
                }
                if let Some(filters) = h.filters.as_mut() {
                    filters.visit_conditions_mut(f);
                }
            }
            Aggregation::Filters(filters) => {
                if let Some(filter) = filters.common_filter.as_mut() {
                    filter.visit_mut(f);
                }
                filters.visit_conditions_mut(f);
            }
        }
    }

    pub fn sub_aggregation(&self) -> Option<&Filters> {
        match self {
            Aggregation::DateHistogram(h) => h.filters.as_ref(),
            Aggregation::Filters(_) => None,
        }
    }

    /// Nests `sub` below this aggregation.
    ///
    /// Anything but filters under a date histogram is rejected.
    pub fn set_sub_aggregation(&mut self, sub: Aggregation) -> QueryResult<()> {
        match (self, sub) {
            (Aggregation::DateHistogram(h), Aggregation::Filters(f)) => {
                h.filters = Some(f);
                Ok(())
            }
            (parent, child) => Err(QueryError::UnsupportedSubAggregation {
                parent: parent.kind(),
                child: child.kind(),
            }),
        }
    }

    pub fn compile(&self, database: &str, table: &str) -> SelectRequest {
        match self {
            Aggregation::DateHistogram(h) => h.compile(database, table),
            Aggregation::Filters(f) => f.compile(database, table),
        }
    }

    pub fn materialize(&self, rows: &[Row]) -> QueryResult<BucketAggregation> {
        match self {
            Aggregation::DateHistogram(h) => h.materialize(rows),
            Aggregation::Filters(f) => f.materialize(rows),
        }
    }

    /// Compiles, executes against `source` and materializes the result.
    pub fn aggregate(&self, source: &dyn DataSource) -> QueryResult<BucketAggregation> {
        let table = source.data_table();
        if table.is_empty() {
            return Err(QueryError::MissingDataTable);
        }
        let request = self.compile(source.database(), table);
        let sql = request.build();
        tracing::debug!("aggregation '{}' request: {}", self.name(), sql);

        let rows = source
            .fetch_rows(&request)
            .map_err(|source| QueryError::Execution { sql, source })?;
        self.materialize(&rows)
    }
}

fn count_value(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn key_value(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Counts of the `results` column. 64-bit integers may arrive quoted.
pub(crate) fn decode_results(row: &Row) -> QueryResult<Vec<u64>> {
    let values = row
        .get(RESULTS_COLUMN)
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| QueryError::MalformedRow(format!("no '{}' array", RESULTS_COLUMN)))?;
    values
        .iter()
        .map(|v| {
            count_value(v).ok_or_else(|| QueryError::MalformedRow(format!("bad count value {}", v)))
        })
        .collect()
}

pub(crate) fn decode_histogram_row(row: &Row) -> QueryResult<(i64, Vec<u64>)> {
    let key = row
        .get("cur_key")
        .and_then(key_value)
        .ok_or_else(|| QueryError::MalformedRow("no integer 'cur_key' column".to_string()))?;
    Ok((key, decode_results(row)?))
}

/// Lower time bound that still yields more than `size` documents.
///
/// Dashboards only show the latest `size` entries, so the hits query can skip
/// everything older than the returned bucket. Walks the buckets from the
/// latest backwards and stops once the running count exceeds `size`.
pub fn reduce_logs_selection_time_range(buckets: &[Bucket], size: u64) -> Option<DateTime<Utc>> {
    let mut doc_count = 0;
    for bucket in buckets.iter().rev() {
        doc_count += bucket.doc_count;
        if doc_count > size {
            return bucket.key.time();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    struct FailingSource;

    impl DataSource for FailingSource {
        fn database(&self) -> &str {
            "logs"
        }

        fn data_table(&self) -> &str {
            "logs_gate"
        }

        fn fetch_rows(&self, _request: &SelectRequest) -> Result<Vec<Row>, SourceError> {
            Err("Code: 60. Table logs.logs_gate doesn't exist".into())
        }
    }

    fn minute(m: i64) -> Bucket {
        Bucket::new(
            BucketKey::Time(Utc.timestamp_opt(1563192000 + m * 60, 0).unwrap()),
            5,
        )
    }

    #[test]
    fn test_reduce_time_range() {
        let buckets = vec![minute(0), minute(1), minute(2)];
        assert_eq!(
            reduce_logs_selection_time_range(&buckets, 7),
            buckets[1].key.time()
        );
        // Reaching the size exactly is not enough.
        assert_eq!(
            reduce_logs_selection_time_range(&buckets, 10),
            buckets[0].key.time()
        );
        assert_eq!(reduce_logs_selection_time_range(&buckets, 15), None);
        assert_eq!(reduce_logs_selection_time_range(&[], 0), None);
    }

    #[test]
    fn test_execution_failure_names_sql() {
        let agg = Aggregation::Filters(Filters::new(vec![FilterSettings::new("all", None)]));
        let err = agg.aggregate(&FailingSource).unwrap_err();
        match err {
            QueryError::Execution { sql, source } => {
                assert_eq!(sql, "SELECT [ count() ] as results FROM merge(logs, '^logs_gate')");
                assert!(source.to_string().contains("Code: 60"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_decode_results() {
        let row = json!({"results": ["18446744073709551615", 3]});
        let row = row.as_object().cloned().unwrap_or_default();
        assert_eq!(decode_results(&row).unwrap(), vec![u64::MAX, 3]);

        let bad = json!({"results": [-1]}).as_object().cloned().unwrap_or_default();
        assert!(matches!(decode_results(&bad), Err(QueryError::MalformedRow(_))));
        assert!(decode_histogram_row(&Row::new()).is_err());
    }

    #[test]
    fn test_name_and_kind() {
        let mut agg = Aggregation::Filters(Filters::new(Vec::new()));
        agg.set_name("7");
        assert_eq!(agg.name(), "7");
        assert_eq!(agg.kind(), "filters");
        assert!(agg.sub_aggregation().is_none());
    }
}
