use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use kq_core::request::ParseOptions;
use kq_core::schema::TableSchema;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod clickhouse;
mod search;

use clickhouse::{ClickHouseBackend, ClickHouseConfig};

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(
    name = "kq-hub",
    version,
    about = "Elasticsearch search endpoint for Kibana backed by ClickHouse"
)]
struct Args {
    /// Path to config file
    #[arg(long, default_value = "kq-hub.toml")]
    config: PathBuf,

    /// Server bind address (overrides the config file)
    #[arg(long)]
    bind: Option<String>,

    /// ClickHouse HTTP endpoint (overrides the config file)
    #[arg(long)]
    clickhouse_url: Option<String>,

    /// Always aggregate histograms from raw rows
    #[arg(long)]
    no_fast_path: bool,
}

// =============================================================================
// Config
// =============================================================================

#[derive(Deserialize, Default, Clone)]
struct Config {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    clickhouse: ClickHouseConfig,
    #[serde(default)]
    search: SearchConfig,
    #[serde(default)]
    tables: Vec<TableSchema>,
}

#[derive(Deserialize, Clone)]
struct ServerConfig {
    #[serde(default = "default_bind")]
    bind: String,
    /// Elasticsearch version reported to clients.
    #[serde(default = "default_version")]
    version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            version: default_version(),
        }
    }
}

#[derive(Deserialize, Clone)]
struct SearchConfig {
    #[serde(default = "default_fast_path")]
    histogram_fast_path: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            histogram_fast_path: default_fast_path(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:9200".into()
}
fn default_version() -> String {
    "5.6.8".into()
}
fn default_fast_path() -> bool {
    true
}

fn load_config(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        tracing::warn!("config {:?} not found, using defaults", path);
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    toml::from_str(&content).map_err(|e| e.to_string())
}

// =============================================================================
// Application State
// =============================================================================

struct AppState {
    tables: Vec<TableSchema>,
    backend: Box<dyn search::Backend>,
    options: ParseOptions,
    version: String,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(api::cluster_info))
        .route("/_msearch", post(api::multi_search))
        .route("/:index/_msearch", post(api::index_multi_search))
        .route("/:index/_search", get(api::index_search).post(api::index_search))
        .route("/:index/_field_caps", get(api::field_caps))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "kq_hub=info,kq_core=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load config {:?}: {}", args.config, e);
            std::process::exit(1);
        }
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(url) = args.clickhouse_url {
        config.clickhouse.url = url;
    }
    if args.no_fast_path {
        config.search.histogram_fast_path = false;
    }

    if config.tables.is_empty() {
        tracing::warn!("No tables configured, every search will report a missing index");
    }

    let addr: SocketAddr = match config.server.bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid bind address {}: {}", config.server.bind, e);
            std::process::exit(1);
        }
    };

    tracing::info!("kq-hub listening on http://{}", addr);
    tracing::info!("  ClickHouse: {}", config.clickhouse.url);
    for table in &config.tables {
        tracing::info!("  Table:      {}.{} ({} fields)", table.database, table.name, table.fields.len());
    }

    let state = Arc::new(AppState {
        tables: config.tables,
        backend: Box::new(ClickHouseBackend::new(config.clickhouse)),
        options: ParseOptions {
            histogram_fast_path: config.search.histogram_fast_path,
        },
        version: config.server.version,
    });

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, router(state)).await {
        tracing::error!("Server stopped: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_toml() {
        let config: Config = toml::from_str(
            r#"
            [server]
            bind = "0.0.0.0:9200"

            [search]
            histogram_fast_path = false

            [[tables]]
            name = "logs_gate"

            [[tables.fields]]
            name = "ts"
            column = "ts"
            type = "UInt64"
            timestamp = true
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:9200");
        assert_eq!(config.server.version, "5.6.8");
        assert!(!config.search.histogram_fast_path);
        assert_eq!(config.clickhouse.url, "http://127.0.0.1:8123");
        assert_eq!(config.tables[0].database, "logs");
        assert!(config.tables[0].timestamp_field().is_some());
    }

    #[test]
    fn test_empty_config_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.search.histogram_fast_path);
        assert!(config.tables.is_empty());
        assert!(load_config(Path::new("/nonexistent/kq-hub.toml")).is_ok());
    }
}
