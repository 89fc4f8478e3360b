//! `date_histogram` aggregation.
//!
//! Counts rows per fixed-width time interval. Wide intervals over an
//! otherwise unfiltered time window are answered from the pre-aggregated
//! histogram table instead of the raw rows.

use super::{decode_histogram_row, Row, PREPARED_DATA_PERIOD_NS};
use crate::aggregation::bucket::{Bucket, BucketAggregation, BucketKey, BucketsLayout};
use crate::aggregation::filters::Filters;
use crate::error::{QueryError, QueryResult};
use crate::query::{Clause, RangeClause};
use crate::schema::PREPARED_HISTOGRAM_TABLE_PREFIX;
use crate::sql::{AggregateFunction, AggregateList, SelectRequest, SortOrder};
use chrono::{TimeZone, Utc};

const KEY_COLUMN: &str = "cur_key";

const NS_PER_MS: i64 = 1_000_000;
const NS_PER_SECOND: i64 = 1_000 * NS_PER_MS;
const NS_PER_MINUTE: i64 = 60 * NS_PER_SECOND;
const NS_PER_HOUR: i64 = 60 * NS_PER_MINUTE;
const NS_PER_DAY: i64 = 24 * NS_PER_HOUR;
const NS_PER_WEEK: i64 = 7 * NS_PER_DAY;

/// Unit suffixes in match order; `ms` must be tried before `s` and `m`.
const INTERVAL_UNITS: [(&str, i64); 6] = [
    ("ms", NS_PER_MS),
    ("s", NS_PER_SECOND),
    ("m", NS_PER_MINUTE),
    ("h", NS_PER_HOUR),
    ("d", NS_PER_DAY),
    ("w", NS_PER_WEEK),
];

/// Parses an interval such as `30s` or `2w` into nanoseconds.
pub fn parse_interval(interval: &str) -> QueryResult<i64> {
    let invalid = |reason: &str| QueryError::InvalidInterval {
        interval: interval.to_string(),
        reason: reason.to_string(),
    };

    let (magnitude, unit) = INTERVAL_UNITS
        .iter()
        .find_map(|(suffix, unit)| interval.strip_suffix(suffix).map(|m| (m, *unit)))
        .ok_or_else(|| invalid("unsupported histogram period units"))?;
    let magnitude: i64 = magnitude
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(&e.to_string()))?;
    if magnitude <= 0 {
        return Err(invalid("interval must be positive"));
    }
    magnitude
        .checked_mul(unit)
        .ok_or_else(|| invalid("interval is too large"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateHistogram {
    pub(crate) name: String,
    pub(crate) common_filter: Option<Clause>,
    pub(crate) filters: Option<Filters>,
    field: String,
    interval: i64,
    optimization: bool,
}

impl DateHistogram {
    /// Fails when the interval does not parse or `range` is not a range on
    /// `field`; a histogram is meaningless without its time window.
    pub fn new(
        interval: &str,
        field: impl Into<String>,
        range: Option<&RangeClause>,
        optimization: bool,
    ) -> QueryResult<Self> {
        let field = field.into();
        let interval = parse_interval(interval)?;
        match range {
            Some(range) if range.field() == field => {}
            _ => return Err(QueryError::MissingRange(field)),
        }
        Ok(Self {
            name: String::new(),
            common_filter: None,
            filters: None,
            field,
            interval,
            optimization,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Bucket width in nanoseconds.
    pub fn interval(&self) -> i64 {
        self.interval
    }

    pub fn optimization_required(&self) -> bool {
        self.optimization && self.interval >= PREPARED_DATA_PERIOD_NS
    }

    /// Time window for the pre-aggregated table, when it can answer this
    /// histogram: the interval must be a whole number of prepared periods
    /// and the common filter nothing but a time range.
    /// Clauses rendering empty (`*`, unknown) do not count.
    fn prepared_range(&self) -> Option<RangeClause> {
        if !self.optimization_required()
            || self.interval % PREPARED_DATA_PERIOD_NS != 0
            || self.filters.is_some()
        {
            return None;
        }
        let filter = self.common_filter.as_ref()?;
        let clauses: Vec<&Clause> = filter
            .simple_clauses()
            .into_iter()
            .filter(|c| !c.render().is_empty())
            .collect();
        let origin = match clauses.as_slice() {
            [Clause::Range(range)] => (*range).clone(),
            _ => return None,
        };

        // Prepared keys are interval lower edges, so the upper bound is exclusive.
        let mut range = RangeClause::new(format!("(key * {})", PREPARED_DATA_PERIOD_NS), false);
        if let Some(low) = origin.lower() {
            range.add_lower(low.value, low.strict);
        }
        if let Some(high) = origin.upper() {
            range.add_upper(high.value, true);
        }
        Some(range)
    }

    fn aggregate_functions(&self) -> AggregateList {
        let mut funcs = self
            .filters
            .as_ref()
            .map(Filters::aggregate_functions)
            .unwrap_or_default();
        funcs.push(AggregateFunction::count(""));
        funcs
    }

    pub(crate) fn compile(&self, database: &str, table: &str) -> SelectRequest {
        let mut request = match self.prepared_range() {
            Some(range) => {
                let prepared = format!("{}{}", PREPARED_HISTOGRAM_TABLE_PREFIX, table);
                let mut request = SelectRequest::merge_template(database, &prepared);
                let sum: AggregateList = std::iter::once(AggregateFunction::sum("count", "")).collect();
                request.what(&format!(
                    "{}, toInt64(key / {}) as {}",
                    sum.build(),
                    self.interval / PREPARED_DATA_PERIOD_NS,
                    KEY_COLUMN
                ));
                request.filter(&range.render());
                tracing::debug!("histogram '{}' uses the prepared table {}", self.name, prepared);
                request
            }
            None => {
                let mut request = SelectRequest::merge_template(database, table);
                request.what(&self.aggregate_functions().build()).append_to_what(&format!(
                    "toInt64(({}) / {}) as {}",
                    self.field, self.interval, KEY_COLUMN
                ));
                if let Some(filter) = &self.common_filter {
                    request.filter(&filter.render());
                }
                request
            }
        };
        request
            .group_by(KEY_COLUMN)
            .order_by(KEY_COLUMN, Some(SortOrder::Asc));
        request
    }

    pub(crate) fn materialize(&self, rows: &[Row]) -> QueryResult<BucketAggregation> {
        let mut decoded = rows
            .iter()
            .map(decode_histogram_row)
            .collect::<QueryResult<Vec<_>>>()?;
        decoded.sort_by_key(|(key, _)| *key);

        let filters_len = self.filters.as_ref().map_or(0, Filters::len);
        let mut histogram = BucketAggregation::new(self.name.clone(), BucketsLayout::Array);
        for (key, counts) in decoded {
            // The histogram's own count comes last, after the filters counts.
            let Some((&doc_count, filter_counts)) = counts.split_last() else {
                return Err(QueryError::BucketMismatch {
                    expected: filters_len + 1,
                    found: 0,
                });
            };
            if doc_count == 0 {
                continue;
            }
            if filter_counts.len() != filters_len {
                return Err(QueryError::BucketMismatch {
                    expected: filters_len + 1,
                    found: counts.len(),
                });
            }

            let nanos = key.checked_mul(self.interval).ok_or_else(|| {
                QueryError::MalformedRow(format!("histogram key {} is out of range", key))
            })?;
            let mut bucket = Bucket::new(BucketKey::Time(Utc.timestamp_nanos(nanos)), doc_count);
            if let Some(filters) = &self.filters {
                bucket.sub_aggregation = Some(filters.buckets(filter_counts)?);
            }
            histogram.buckets.push(bucket);
        }
        Ok(histogram)
    }
}
