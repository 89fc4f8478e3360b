//! # SQL Request Builder
//!
//! Minimal `SELECT` builder for the ClickHouse dialect plus the aggregate
//! functions the bucket aggregations need.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order '{}'", other)),
        }
    }
}

/// A `SELECT` statement assembled piece by piece.
///
/// Setters ignore empty input so optional fragments can be passed through
/// without checks at every call site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectRequest {
    tables: String,
    what: String,
    condition: String,
    group: String,
    having: String,
    sorting: String,
    limit: Option<usize>,
}

impl SelectRequest {
    pub fn new(from: impl Into<String>, what: impl Into<String>) -> Self {
        Self {
            tables: from.into(),
            what: what.into(),
            ..Default::default()
        }
    }

    /// Reads every table of `database` whose name matches the index pattern.
    ///
    /// Elasticsearch index wildcards (`logs_*`) become regular expressions
    /// for the `merge` table function.
    pub fn merge_template(database: &str, index: &str) -> Self {
        Self::new(
            format!("merge({}, '^{}')", database, index.replacen('*', ".*", 1)),
            "*, _table",
        )
    }

    pub fn what(&mut self, required: &str) -> &mut Self {
        if !required.is_empty() {
            self.what = required.to_string();
        }
        self
    }

    pub fn append_to_what(&mut self, required: &str) -> &mut Self {
        if !self.what.is_empty() && !required.is_empty() {
            self.what.push_str(", ");
            self.what.push_str(required);
            self
        } else {
            self.what(required)
        }
    }

    /// Replaces the `WHERE` condition.
    pub fn filter(&mut self, cond: &str) -> &mut Self {
        if !cond.is_empty() {
            self.condition = cond.to_string();
        }
        self
    }

    /// Adds a mandatory condition to the existing `WHERE`.
    pub fn filter_and(&mut self, cond: &str) -> &mut Self {
        if !cond.is_empty() && !self.condition.is_empty() {
            self.condition = format!("{} AND ({})", self.condition, cond);
            return self;
        }
        self.filter(cond)
    }

    /// Adds an optional condition to the existing `WHERE`.
    pub fn filter_or(&mut self, cond: &str) -> &mut Self {
        if !cond.is_empty() && !self.condition.is_empty() {
            self.condition = format!("{} OR ({})", self.condition, cond);
            return self;
        }
        self.filter(cond)
    }

    pub fn group_by(&mut self, expr: &str) -> &mut Self {
        if !expr.is_empty() {
            self.group = expr.to_string();
        }
        self
    }

    pub fn having(&mut self, cond: &str) -> &mut Self {
        if !cond.is_empty() {
            self.having = cond.to_string();
        }
        self
    }

    pub fn order_by(&mut self, field: &str, order: Option<SortOrder>) -> &mut Self {
        if !field.is_empty() {
            self.sorting = match order {
                Some(order) => format!("{} {}", field, order.as_str()),
                None => field.to_string(),
            };
        }
        self
    }

    pub fn limit(&mut self, limit: usize) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(&self) -> String {
        let mut parts = vec![format!("SELECT {} FROM {}", self.what, self.tables)];
        if !self.condition.is_empty() {
            parts.push(format!("WHERE {}", self.condition));
        }
        if !self.group.is_empty() {
            parts.push(format!("GROUP BY {}", self.group));
        }
        if !self.having.is_empty() {
            parts.push(format!("HAVING {}", self.having));
        }
        if !self.sorting.is_empty() {
            parts.push(format!("ORDER BY {}", self.sorting));
        }
        if let Some(limit) = self.limit {
            parts.push(format!("LIMIT {}", limit));
        }
        parts.join(" ")
    }
}

impl fmt::Display for SelectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

/// Escapes a value for use inside a single-quoted SQL string literal.
pub fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// ClickHouse aggregate function with an optional `-If` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateFunction {
    Count { cond: String },
    Sum { column: String, cond: String },
}

impl AggregateFunction {
    /// `count()`, or `countIf(cond)` when the condition is not empty.
    pub fn count(cond: impl Into<String>) -> Self {
        AggregateFunction::Count { cond: cond.into() }
    }

    pub fn sum(column: impl Into<String>, cond: impl Into<String>) -> Self {
        AggregateFunction::Sum {
            column: column.into(),
            cond: cond.into(),
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunction::Count { cond } if cond.is_empty() => write!(f, "count()"),
            AggregateFunction::Count { cond } => write!(f, "countIf({})", cond),
            AggregateFunction::Sum { column, cond } if cond.is_empty() => {
                write!(f, "sum({})", column)
            }
            AggregateFunction::Sum { column, cond } => write!(f, "sumIf({}, {})", column, cond),
        }
    }
}

/// Alias of the array column carrying aggregate results.
pub const RESULTS_COLUMN: &str = "results";

/// Ordered aggregate functions collected into one `results` array column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateList(Vec<AggregateFunction>);

impl AggregateList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, func: AggregateFunction) {
        self.0.push(func);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn build(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let funcs: Vec<String> = self.0.iter().map(|f| f.to_string()).collect();
        format!("[ {} ] as {}", funcs.join(","), RESULTS_COLUMN)
    }
}

impl FromIterator<AggregateFunction> for AggregateList {
    fn from_iter<I: IntoIterator<Item = AggregateFunction>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
