//! # kq-core: The Compiler
//!
//! Turns Elasticsearch Query-DSL requests into ClickHouse SQL and turns the
//! rows that come back into Elasticsearch-shaped aggregation buckets.
//!
//! The pipeline for a single request:
//!
//! 1. [`request::ElasticRequest::parse`] builds a condition tree
//!    ([`query::Clause`]) and an aggregation tree ([`aggregation::Aggregation`]).
//! 2. Clauses render themselves into SQL boolean fragments; aggregations
//!    compile into a [`sql::SelectRequest`].
//! 3. A [`aggregation::DataSource`] executes the SQL; the aggregation
//!    materializes the rows into a [`aggregation::BucketAggregation`].
//!
//! Everything here is synchronous and owned by one request. Nothing is
//! shared between requests.

pub mod aggregation;
pub mod error;
pub mod index;
pub mod query;
pub mod request;
pub mod schema;
pub mod sql;

pub use error::{QueryError, QueryResult, SourceError};
