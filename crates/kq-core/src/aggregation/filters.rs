//! `filters` aggregation: one named count per condition.

use super::{decode_results, Row};
use crate::aggregation::bucket::{Bucket, BucketAggregation, BucketKey, BucketsLayout};
use crate::error::{QueryError, QueryResult};
use crate::query::Clause;
use crate::sql::{AggregateFunction, AggregateList, SelectRequest};

/// One entry of a filters aggregation; no condition counts every row.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSettings {
    pub name: String,
    pub condition: Option<Clause>,
}

impl FilterSettings {
    pub fn new(name: impl Into<String>, condition: Option<Clause>) -> Self {
        Self {
            name: name.into(),
            condition,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filters {
    pub(crate) name: String,
    pub(crate) common_filter: Option<Clause>,
    filters: Vec<FilterSettings>,
}

impl Filters {
    pub fn new(filters: Vec<FilterSettings>) -> Self {
        Self {
            name: String::new(),
            common_filter: None,
            filters,
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub(crate) fn visit_conditions_mut(&mut self, f: &mut dyn FnMut(&mut Clause)) {
        for condition in self.filters.iter_mut().filter_map(|s| s.condition.as_mut()) {
            condition.visit_mut(f);
        }
    }

    /// `countIf` per entry, in declaration order.
    pub fn aggregate_functions(&self) -> AggregateList {
        self.filters
            .iter()
            .map(|f| {
                let cond = f.condition.as_ref().map(Clause::render).unwrap_or_default();
                AggregateFunction::count(cond)
            })
            .collect()
    }

    /// Named buckets filled from the counts of one result row.
    pub fn buckets(&self, counts: &[u64]) -> QueryResult<BucketAggregation> {
        if counts.len() != self.filters.len() {
            return Err(QueryError::BucketMismatch {
                expected: self.filters.len(),
                found: counts.len(),
            });
        }
        let mut aggregation = BucketAggregation::new(self.name.clone(), BucketsLayout::Object);
        aggregation.buckets = self
            .filters
            .iter()
            .zip(counts)
            .map(|(f, count)| Bucket::new(BucketKey::Name(f.name.clone()), *count))
            .collect();
        Ok(aggregation)
    }

    pub(crate) fn compile(&self, database: &str, table: &str) -> SelectRequest {
        let mut request = SelectRequest::merge_template(database, table);
        request.what(&self.aggregate_functions().build());
        if let Some(filter) = &self.common_filter {
            request.filter(&filter.render());
        }
        request
    }

    pub(crate) fn materialize(&self, rows: &[Row]) -> QueryResult<BucketAggregation> {
        match rows {
            [] => self.buckets(&vec![0; self.filters.len()]),
            [row] => self.buckets(&decode_results(row)?),
            _ => Err(QueryError::MalformedRow(format!(
                "filters aggregation expects a single row, got {}",
                rows.len()
            ))),
        }
    }
}
