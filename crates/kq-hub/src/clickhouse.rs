//! ClickHouse HTTP interface as a [`DataSource`].

use crate::search::Backend;
use kq_core::aggregation::{DataSource, Row};
use kq_core::schema::{TableSchema, DEFAULT_DATABASE};
use kq_core::sql::SelectRequest;
use kq_core::SourceError;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

/// One JSON object per line; 64-bit integers may come back quoted.
const OUTPUT_FORMAT: &str = "JSONEachRow";

#[derive(Deserialize, Clone, Debug)]
pub struct ClickHouseConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Session default database; table schemas name their own database.
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            database: default_database(),
            user: default_user(),
            password: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_url() -> String {
    "http://127.0.0.1:8123".into()
}
fn default_database() -> String {
    DEFAULT_DATABASE.into()
}
fn default_user() -> String {
    "default".into()
}
fn default_timeout() -> u64 {
    30
}

pub struct ClickHouseBackend {
    config: ClickHouseConfig,
}

impl ClickHouseBackend {
    pub fn new(config: ClickHouseConfig) -> Self {
        Self { config }
    }
}

impl Backend for ClickHouseBackend {
    /// The blocking client owns a runtime of its own, so it is built (and
    /// dropped) on the blocking worker running the search.
    fn open(&self, schema: &TableSchema, table: &str) -> Result<Box<dyn DataSource>, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()?;
        Ok(Box::new(ClickHouseSource {
            client,
            config: self.config.clone(),
            database: schema.database.clone(),
            table: table.to_string(),
        }))
    }
}

pub struct ClickHouseSource {
    client: Client,
    config: ClickHouseConfig,
    database: String,
    table: String,
}

impl ClickHouseSource {
    fn execute(&self, sql: &str) -> Result<String, SourceError> {
        let response = self
            .client
            .post(&self.config.url)
            .query(&[("database", self.config.database.as_str())])
            .header("X-ClickHouse-User", &self.config.user)
            .header("X-ClickHouse-Key", &self.config.password)
            .body(format!("{} FORMAT {}", sql, OUTPUT_FORMAT))
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(format!("clickhouse returned {}: {}", status, body.trim()).into());
        }
        Ok(body)
    }
}

impl DataSource for ClickHouseSource {
    fn database(&self) -> &str {
        &self.database
    }

    fn data_table(&self) -> &str {
        &self.table
    }

    fn fetch_rows(&self, request: &SelectRequest) -> Result<Vec<Row>, SourceError> {
        parse_rows(&self.execute(&request.build())?)
    }
}

pub fn parse_rows(body: &str) -> Result<Vec<Row>, SourceError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| -> Result<Row, SourceError> { Ok(serde_json::from_str(line)?) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rows() {
        let rows = parse_rows("{\"results\":[\"3\"],\"cur_key\":\"26053198\"}\n\n{\"results\":[1],\"cur_key\":26053199}\n")
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["cur_key"], 26053199);
        assert!(parse_rows("").unwrap().is_empty());
        assert!(parse_rows("Code: 60. DB::Exception").is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config: ClickHouseConfig = toml::from_str("url = \"http://ch:8123\"").unwrap();
        assert_eq!(config.url, "http://ch:8123");
        assert_eq!(config.database, "logs");
        assert_eq!(config.user, "default");
        assert_eq!(config.timeout_secs, 30);
    }
}
