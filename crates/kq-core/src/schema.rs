//! # Table Schema
//!
//! Maps client-facing (Kibana) field names onto ClickHouse columns and the
//! column type tags that decide how conditions on them are rendered.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of the inverted index table built for a data table.
pub const INVERTED_INDEX_TABLE_PREFIX: &str = "inverted_index_";

/// Prefix of the pre-aggregated histogram table built for a data table.
pub const PREPARED_HISTOGRAM_TABLE_PREFIX: &str = "histogram_";

pub const DEFAULT_DATABASE: &str = "logs";

const NUMERIC_TYPES: [&str; 11] = [
    "UInt8", "UInt16", "UInt32", "UInt64", "Int8", "Int16", "Int32", "Int64", "Float32", "Float64",
    "Decimal",
];

/// A storage column: name plus ClickHouse type tag (`String`, `Array(UInt64)`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnField {
    pub column: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

impl ColumnField {
    pub fn new(column: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            column_type: column_type.into(),
        }
    }

    /// Shorthand for a scalar `String` column.
    pub fn string(column: impl Into<String>) -> Self {
        Self::new(column, "String")
    }

    pub fn is_array(&self) -> bool {
        self.column_type.starts_with("Array")
    }

    /// Type tag with any `Array(...)` wrapper removed.
    pub fn base_type(&self) -> &str {
        self.column_type
            .strip_prefix("Array")
            .unwrap_or(&self.column_type)
            .trim_matches(|c| c == '(' || c == ')')
    }

    pub fn is_string(&self) -> bool {
        self.base_type() == "String"
    }

    pub fn is_numeric(&self) -> bool {
        NUMERIC_TYPES.contains(&self.base_type())
    }
}

impl fmt::Display for ColumnField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.column)
    }
}

/// One field of a log model as configured for the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Name used by the dashboard client.
    pub name: String,
    #[serde(flatten)]
    pub column: ColumnField,
    /// Column content is tokenized into the inverted index.
    #[serde(default)]
    pub full_text: bool,
    /// The model's event time, stored as epoch nanoseconds.
    #[serde(default)]
    pub timestamp: bool,
    #[serde(default)]
    pub uuid: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            column: ColumnField::new(name.clone(), column_type),
            name,
            full_text: false,
            timestamp: false,
            uuid: false,
        }
    }

    pub fn full_text(mut self) -> Self {
        self.full_text = true;
        self
    }

    pub fn timestamp(mut self) -> Self {
        self.timestamp = true;
        self
    }

    pub fn uuid(mut self) -> Self {
        self.uuid = true;
        self
    }

    /// Elasticsearch mapping type reported to clients for this field.
    pub fn elastic_type(&self) -> &'static str {
        if self.timestamp {
            return "date";
        }
        match self.column.base_type() {
            "String" => "text",
            "Bool" => "boolean",
            "Float32" | "Float64" => "float",
            "Date" | "DateTime" => "date",
            _ if self.column.is_numeric() => "long",
            _ => "keyword",
        }
    }
}

/// Storage description of one log table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

impl TableSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            database: default_database(),
            fields,
        }
    }

    /// Schema with no fields, used when a request only carries an index header.
    pub fn empty() -> Self {
        Self::new("", Vec::new())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// At most one field is flagged as the model timestamp; the first wins.
    pub fn timestamp_field(&self) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.timestamp)
    }

    pub fn uuid_field(&self) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.uuid)
    }

    /// Full-text indexed fields in declaration order.
    pub fn full_text_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.full_text)
    }

    /// Fully qualified name of this table's inverted index.
    pub fn inverted_index_table(&self) -> String {
        format!(
            "{}.{}",
            self.database,
            crate::index::inverted_index_table_name(&self.name)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_kinds() {
        let plain = ColumnField::new("pid", "UInt64");
        assert!(plain.is_numeric());
        assert!(!plain.is_array());
        assert!(!plain.is_string());

        let tags = ColumnField::new("tags", "Array(String)");
        assert!(tags.is_array());
        assert!(tags.is_string());
        assert_eq!(tags.base_type(), "String");

        let date = ColumnField::new("day", "Date");
        assert!(!date.is_numeric());
        assert!(!date.is_string());
    }

    #[test]
    fn test_schema_lookup() {
        let schema = TableSchema::new(
            "logs_gate",
            vec![
                FieldSpec::new("ts", "UInt64").timestamp(),
                FieldSpec::new("message", "String").full_text(),
                FieldSpec::new("status", "String"),
                FieldSpec::new("file", "String").full_text(),
            ],
        );

        assert_eq!(schema.timestamp_field().map(|f| f.name.as_str()), Some("ts"));
        let indexed: Vec<&str> = schema.full_text_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(indexed, vec!["message", "file"]);
        assert_eq!(schema.inverted_index_table(), "logs.inverted_index_logs_gate");
        assert!(schema.field("missing").is_none());
    }

    #[test]
    fn test_elastic_types() {
        assert_eq!(FieldSpec::new("ts", "UInt64").timestamp().elastic_type(), "date");
        assert_eq!(FieldSpec::new("message", "String").elastic_type(), "text");
        assert_eq!(FieldSpec::new("line", "UInt16").elastic_type(), "long");
        assert_eq!(FieldSpec::new("ratio", "Float64").elastic_type(), "float");
        assert_eq!(FieldSpec::new("day", "Date").elastic_type(), "date");
        assert_eq!(FieldSpec::new("id", "UUID").elastic_type(), "keyword");
    }

    #[test]
    fn test_schema_from_toml() {
        let schema: TableSchema = toml::from_str(
            r#"
            name = "logs_gate"

            [[fields]]
            name = "ts"
            column = "ts"
            type = "UInt64"
            timestamp = true

            [[fields]]
            name = "message"
            column = "message"
            type = "String"
            full_text = true
            "#,
        )
        .unwrap();

        assert_eq!(schema.database, "logs");
        assert_eq!(schema.fields.len(), 2);
        assert!(schema.fields[1].full_text);
        assert_eq!(schema.fields[0].column.column_type, "UInt64");
    }
}
