//! # Condition AST
//!
//! Elasticsearch query clauses as a closed set of variants. Every variant
//! renders itself into a ClickHouse boolean fragment; an empty string means
//! the condition is vacuous and must be left out of the surrounding SQL.

pub mod equality;
pub mod query_string;
pub mod section;

pub use equality::clauses_equivalent;
pub use query_string::MatchQueryClause;
pub use section::{BoolSection, Section, SectionKind, SortClause, SortSection};

use crate::schema::ColumnField;
use crate::sql::escape_literal;
use std::fmt;

/// A single condition or a composite of conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Match(MatchClause),
    Range(RangeClause),
    Exists(ExistsClause),
    Terms(TermsClause),
    QueryString(MatchQueryClause),
    Section(Section),
    Bool(BoolSection),
    /// Placeholder for clauses that could not be understood; renders empty.
    Unknown,
}

impl Clause {
    pub fn render(&self) -> String {
        match self {
            Clause::Match(c) => c.render(),
            Clause::Range(c) => c.render(),
            Clause::Exists(c) => c.render(),
            Clause::Terms(c) => c.render(),
            Clause::QueryString(c) => c.render(),
            Clause::Section(s) => s.render(),
            Clause::Bool(b) => b.render(),
            Clause::Unknown => String::new(),
        }
    }

    /// Leaf clauses directly below this node.
    ///
    /// For a bool query this flattens must, must-not, filter and should (in
    /// that order); for a section its children; for a leaf the leaf itself.
    pub fn simple_clauses(&self) -> Vec<&Clause> {
        match self {
            Clause::Bool(b) => b
                .must
                .children()
                .iter()
                .chain(b.must_not.children())
                .chain(b.filter.children())
                .chain(b.should.children())
                .collect(),
            Clause::Section(s) => s.children().iter().collect(),
            leaf => vec![leaf],
        }
    }

    /// Visits this clause and every nested clause, parents first.
    pub fn visit_mut(&mut self, f: &mut dyn FnMut(&mut Clause)) {
        f(self);
        match self {
            Clause::Section(s) => {
                for child in s.children_mut() {
                    child.visit_mut(f);
                }
            }
            Clause::Bool(b) => {
                for section in [&mut b.must, &mut b.must_not, &mut b.should, &mut b.filter] {
                    for child in section.children_mut() {
                        child.visit_mut(f);
                    }
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Text of a JSON scalar as it should appear inside SQL.
fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `match_phrase`: equality on scalars, containment on arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchClause {
    pub field: ColumnField,
    pub value: serde_json::Value,
}

impl MatchClause {
    pub fn new(field: ColumnField, value: serde_json::Value) -> Self {
        Self { field, value }
    }

    /// Match on a scalar `String` column.
    pub fn string(column: &str, value: &str) -> Self {
        Self::new(ColumnField::string(column), serde_json::Value::from(value))
    }

    fn numeric_text(&self) -> Option<String> {
        match &self.value {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) if s.trim().parse::<f64>().is_ok() => {
                Some(s.trim().to_string())
            }
            _ => None,
        }
    }

    pub fn render(&self) -> String {
        let column = &self.field.column;
        if self.field.is_string() {
            let value = escape_literal(&value_text(&self.value));
            if self.field.is_array() {
                return format!("(has({}, '{}'))", column, value);
            }
            return format!("({} = '{}')", column, value);
        }

        if self.field.is_numeric() {
            let Some(value) = self.numeric_text() else {
                tracing::warn!(
                    "value {} in 'match_phrase' is not a number for column {}",
                    self.value,
                    column
                );
                return String::new();
            };
            if self.field.is_array() {
                return format!("(has({}, {}))", column, value);
            }
            return format!("({} = {})", column, value);
        }

        tracing::warn!(
            "column {} of type {} is not supported in 'match_phrase'",
            column,
            self.field.column_type
        );
        String::new()
    }
}

/// Numeric range threshold, keeping integers exact.
///
/// Nanosecond timestamps exceed the integer precision of `f64`, so integer
/// input never goes through floating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeValue {
    Int(i64),
    Float(f64),
}

impl RangeValue {
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(RangeValue::Int(i)),
                None => n.as_f64().map(RangeValue::Float),
            },
            serde_json::Value::String(s) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(i) => Some(RangeValue::Int(i)),
                    Err(_) => s.parse::<f64>().ok().map(RangeValue::Float),
                }
            }
            _ => None,
        }
    }

    /// Multiplies by an integer factor, e.g. milliseconds to nanoseconds.
    pub fn scaled(self, factor: i64) -> Self {
        match self {
            RangeValue::Int(i) => match i.checked_mul(factor) {
                Some(v) => RangeValue::Int(v),
                None => RangeValue::Float(i as f64 * factor as f64),
            },
            RangeValue::Float(f) => RangeValue::Float(f * factor as f64),
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            RangeValue::Int(i) => i as f64,
            RangeValue::Float(f) => f,
        }
    }
}

impl From<i64> for RangeValue {
    fn from(v: i64) -> Self {
        RangeValue::Int(v)
    }
}

impl From<f64> for RangeValue {
    fn from(v: f64) -> Self {
        RangeValue::Float(v)
    }
}

impl fmt::Display for RangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeValue::Int(i) => write!(f, "{}", i),
            RangeValue::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
                write!(f, "{}", *v as i64)
            }
            RangeValue::Float(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub value: RangeValue,
    pub strict: bool,
}

/// `range` on a single column; each bound is optional.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeClause {
    field: String,
    low: Option<Threshold>,
    high: Option<Threshold>,
    format: String,
    /// Ranges over array columns are unsupported and render empty.
    array_field: bool,
}

impl RangeClause {
    pub fn new(field: impl Into<String>, array_field: bool) -> Self {
        Self {
            field: field.into(),
            low: None,
            high: None,
            format: String::new(),
            array_field,
        }
    }

    pub fn add_lower(&mut self, value: impl Into<RangeValue>, strict: bool) -> &mut Self {
        self.low = Some(Threshold {
            value: value.into(),
            strict,
        });
        self
    }

    pub fn add_upper(&mut self, value: impl Into<RangeValue>, strict: bool) -> &mut Self {
        self.high = Some(Threshold {
            value: value.into(),
            strict,
        });
        self
    }

    pub fn lower(&self) -> Option<Threshold> {
        self.low
    }

    pub fn upper(&self) -> Option<Threshold> {
        self.high
    }

    /// Elasticsearch value format (`epoch_millis`, ...); a conversion hint only.
    pub fn set_format(&mut self, format: impl Into<String>) -> &mut Self {
        self.format = format.into();
        self
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn is_array_field(&self) -> bool {
        self.array_field
    }

    /// Same bounds applied to another column or expression.
    pub fn with_field(&self, field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..self.clone()
        }
    }

    fn build_low(&self, t: Threshold) -> String {
        let op = if t.strict { "<" } else { "<=" };
        format!("{} {} {}", t.value, op, self.field)
    }

    fn build_high(&self, t: Threshold) -> String {
        let op = if t.strict { "<" } else { "<=" };
        format!("{} {} {}", self.field, op, t.value)
    }

    pub fn render(&self) -> String {
        if self.array_field || self.field.is_empty() {
            return String::new();
        }
        let bounds: Vec<String> = [
            self.low.map(|t| self.build_low(t)),
            self.high.map(|t| self.build_high(t)),
        ]
        .into_iter()
        .flatten()
        .collect();
        if bounds.is_empty() {
            return String::new();
        }
        format!("({})", bounds.join(" AND "))
    }
}

/// `exists`: the column holds a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistsClause {
    pub field: String,
}

impl ExistsClause {
    pub fn render(&self) -> String {
        format!("(isNotNull({}))", self.field)
    }
}

/// `terms`: OR within a field, AND across fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermsClause {
    terms: Vec<(String, Vec<String>)>,
}

impl TermsClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_term(&mut self, field: &str, value: impl Into<String>) {
        let value = value.into();
        match self.terms.iter_mut().find(|(f, _)| f == field) {
            Some((_, values)) => values.push(value),
            None => self.terms.push((field.to_string(), vec![value])),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn render(&self) -> String {
        self.terms
            .iter()
            .map(|(field, values)| {
                let conds: Vec<String> = values
                    .iter()
                    .map(|v| format!("({} = '{}')", field, escape_literal(v)))
                    .collect();
                format!("({})", conds.join(" OR "))
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}
