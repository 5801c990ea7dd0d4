use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

mod collections;
mod handlers;
mod logic;
mod state;
mod storage;

use crate::collections::save_collection;
use crate::handlers::{health_handler, ws_handler};
use crate::state::AppState;
use crate::storage::{FileStorage, S3Storage, S3StorageConfig, Storage};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Directory holding one `<app_id>.bin` file per collection.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Static files for the browser shell.
    #[arg(long)]
    public_dir: Option<PathBuf>,
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,
    #[arg(long, default_value_t = 60)]
    backup_interval_secs: u64,
    /// Refuse sign-in without a custom token.
    #[arg(long)]
    no_anonymous: bool,
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,
    #[arg(long)]
    s3_bucket: Option<String>,
    #[arg(long)]
    s3_prefix: Option<String>,
    #[arg(long)]
    s3_region: Option<String>,
    #[arg(long)]
    s3_endpoint: Option<String>,
    #[arg(long)]
    s3_force_path_style: bool,
}

async fn build_storage(args: &Args) -> Arc<dyn Storage> {
    if let Some(bucket) = args.s3_bucket.clone() {
        let mut config = S3StorageConfig::new(bucket);
        config.prefix = args.s3_prefix.clone();
        config.region = args.s3_region.clone();
        config.endpoint_url = args.s3_endpoint.clone();
        config.force_path_style = args.s3_force_path_style;
        config.access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok();
        config.secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok();
        info!(bucket = %config.bucket, "using s3 storage");
        return Arc::new(S3Storage::new(config).await);
    }
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../data"));
    if let Err(error) = tokio::fs::create_dir_all(&data_dir).await {
        warn!(dir = %data_dir.display(), %error, "failed to create data dir");
    }
    info!(dir = %data_dir.display(), "using file storage");
    Arc::new(FileStorage::new(data_dir))
}

async fn backup_loop(state: AppState, interval: Duration) {
    let mut interval = tokio::time::interval(interval);
    loop {
        interval.tick().await;
        let collections = {
            let collections = state.collections.read().await;
            collections
                .iter()
                .map(|(app_id, collection)| (app_id.clone(), collection.clone()))
                .collect::<Vec<_>>()
        };
        for (app_id, collection) in collections {
            let maybe_data = {
                let mut collection = collection.write().await;
                if !collection.dirty {
                    None
                } else {
                    collection.dirty = false;
                    Some(collection.to_file_data())
                }
            };
            if let Some(data) = maybe_data {
                save_collection(&state, &app_id, &data).await;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkboard_server=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let state = AppState {
        collections: Arc::new(tokio::sync::RwLock::new(std::collections::HashMap::new())),
        storage: build_storage(&args).await,
        allow_anonymous: !args.no_anonymous,
    };

    let public_dir = args
        .public_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../public"));

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/ws/:app_id", get(ws_handler))
        .fallback_service(ServeDir::new(public_dir).append_index_html_on_directories(true))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    tokio::spawn(backup_loop(
        state,
        Duration::from_secs(args.backup_interval_secs.max(1)),
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    if let (Some(cert), Some(key)) = (args.tls_cert.as_ref(), args.tls_key.as_ref()) {
        let config = match axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await {
            Ok(config) => config,
            Err(error) => {
                error!("Failed to load TLS certificate: {error}");
                std::process::exit(1);
            }
        };
        info!("inkboard store listening on https://{addr}");
        if let Err(error) = axum_server::bind_rustls(addr, config)
            .serve(app.into_make_service())
            .await
        {
            error!("Server crashed: {error}");
            std::process::exit(1);
        }
        return;
    }

    info!("inkboard store listening on http://localhost:{}", args.port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!("Failed to bind {addr}: {error}");
            std::process::exit(1);
        }
    };
    if let Err(error) = axum::serve(listener, app).await {
        error!("Server crashed: {error}");
        std::process::exit(1);
    }
}
