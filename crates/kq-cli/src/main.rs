//! # kq
//!
//! Command line companion of the adapter.
//!
//! - `kq compile --schema <toml> --table <name> <request.json>` prints the SQL
//!   a search request compiles to, without touching a database.
//! - `kq tokens <text>` shows how text is split for the inverted index.
//! - `kq schema --schema <toml>` lists the configured fields.
//! - `kq search --index <index> <request.json>` sends a search to a running hub.

use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use kq_core::index;
use kq_core::request::{ElasticRequest, ParseOptions};
use kq_core::schema::TableSchema;
use serde::Deserialize;
use tabled::{Table, Tabled};

#[derive(Parser)]
#[command(name = "kq", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an Elasticsearch search request into ClickHouse SQL.
    Compile {
        /// Hub config (or any TOML file with `[[tables]]`).
        #[arg(long, default_value = "kq-hub.toml")]
        schema: PathBuf,

        /// Table the request targets.
        #[arg(long)]
        table: String,

        /// Always aggregate histograms from raw rows.
        #[arg(long)]
        no_fast_path: bool,

        /// Request body file, `-` for stdin.
        request: PathBuf,
    },

    /// Print the inverted index tokens of a text.
    Tokens { text: String },

    /// List the fields of the configured tables.
    Schema {
        #[arg(long, default_value = "kq-hub.toml")]
        schema: PathBuf,
    },

    /// Send a search request to a running hub.
    Search {
        #[arg(long)]
        index: String,

        /// Request body file, `-` for stdin.
        request: PathBuf,
    },
}

#[derive(Deserialize, Default)]
struct SchemaFile {
    #[serde(default)]
    tables: Vec<TableSchema>,
}

#[derive(Tabled)]
struct FieldRow {
    table: String,
    field: String,
    column: String,
    #[tabled(rename = "type")]
    column_type: String,
    elastic: &'static str,
    flags: String,
}

fn load_tables(path: &Path) -> Result<Vec<TableSchema>, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let file: SchemaFile =
        toml::from_str(&content).map_err(|e| format!("cannot parse {}: {}", path.display(), e))?;
    Ok(file.tables)
}

fn read_request(path: &Path) -> Result<String, String> {
    if path == Path::new("-") {
        let mut body = String::new();
        std::io::stdin()
            .read_to_string(&mut body)
            .map_err(|e| format!("cannot read stdin: {}", e))?;
        return Ok(body);
    }
    std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))
}

/// Hits and aggregation SQL of a request, one labelled statement per line.
fn compile(schema: &TableSchema, body: &str, options: ParseOptions) -> Result<Vec<String>, String> {
    let request = ElasticRequest::parse(body, schema, options).map_err(|e| e.to_string())?;
    if let Some(index) = &request.index {
        return Err(format!("'{}' is an msearch header, not a search body", index));
    }

    let mut statements = Vec::new();
    if let Some(aggregation) = &request.aggregation {
        statements.push(format!(
            "-- aggregation '{}' ({})\n{}",
            aggregation.name(),
            aggregation.kind(),
            aggregation.compile(&schema.database, &schema.name)
        ));
    }
    if let Some(hits) = request.hits_request(&schema.database, &schema.name) {
        statements.push(format!("-- hits\n{}", hits));
    }
    Ok(statements)
}

fn field_rows(tables: &[TableSchema]) -> Vec<FieldRow> {
    tables
        .iter()
        .flat_map(|table| {
            table.fields.iter().map(move |field| {
                let flags: Vec<&str> = [
                    (field.timestamp, "timestamp"),
                    (field.full_text, "full_text"),
                    (field.uuid, "uuid"),
                ]
                .into_iter()
                .filter_map(|(set, flag)| set.then_some(flag))
                .collect();
                FieldRow {
                    table: table.name.clone(),
                    field: field.name.clone(),
                    column: field.column.column.clone(),
                    column_type: field.column.column_type.clone(),
                    elastic: field.elastic_type(),
                    flags: flags.join(","),
                }
            })
        })
        .collect()
}

fn run(command: Commands) -> Result<(), String> {
    match command {
        Commands::Compile {
            schema,
            table,
            no_fast_path,
            request,
        } => {
            let tables = load_tables(&schema)?;
            let table = tables
                .iter()
                .find(|t| t.name == table)
                .ok_or_else(|| format!("table '{}' is not in {}", table, schema.display()))?;
            let options = ParseOptions {
                histogram_fast_path: !no_fast_path,
            };
            for statement in compile(table, &read_request(&request)?, options)? {
                println!("{}\n", statement);
            }
        }

        Commands::Tokens { text } => {
            for token in index::tokens(&text) {
                println!("{}", token);
            }
        }

        Commands::Schema { schema } => {
            let tables = load_tables(&schema)?;
            println!("{}", Table::new(field_rows(&tables)));
        }

        Commands::Search { index, request } => {
            let body = read_request(&request)?;
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| format!("failed to build tokio runtime: {}", e))?;
            rt.block_on(search(&index, body))?;
        }
    }
    Ok(())
}

async fn search(index: &str, body: String) -> Result<(), String> {
    let base_url =
        std::env::var("KQ_HUB_URL").unwrap_or_else(|_| "http://127.0.0.1:9200".to_string());
    let url = format!("{}/{}/_search", base_url, index);

    let response = reqwest::Client::new()
        .post(&url)
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| format!("request to {} failed: {}", url, e))?;
    let status = response.status();
    let json = response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| format!("bad response from {}: {}", url, e))?;
    let pretty = serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?;
    if !status.is_success() {
        return Err(format!("hub answered {}:\n{}", status, pretty));
    }
    println!("{}", pretty);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
