// Copyright (c) 2026 Epistula Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use epistula_core::{Clock, LeasedBucketCache, SystemClock};
use epistula_daemon::config::DaemonConfig;
use epistula_daemon::http::{self, HttpState};
use epistula_daemon::store::SqliteStore;
use epistula_daemon::telemetry::Telemetry;

#[derive(Debug, Parser)]
#[command(name = "epistula-daemon")]
#[command(about = "Signed ingestion/query relay for the scoring pipeline")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:8091")]
    listen: String,

    #[arg(long, default_value = "./data")]
    data_dir: String,

    /// Address peers put in Epistula-Signed-For when targeting this service.
    /// Empty disables the recipient check.
    #[arg(long, default_value = "")]
    identity: String,

    #[arg(long, default_value_t = 1_200)]
    bucket_ttl_secs: u64,

    #[arg(long, default_value_t = 20)]
    bucket_page_size: usize,

    #[arg(long, default_value_t = 1_048_576)]
    max_body_bytes: usize,

    /// Local development only: admit unsigned requests.
    #[arg(long)]
    insecure_skip_verify: bool,

    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log))
        .init();

    std::fs::create_dir_all(&args.data_dir)?;
    let db_path = std::path::Path::new(&args.data_dir).join("epistula.db");

    let cfg = DaemonConfig {
        listen: args.listen,
        db_path: db_path.clone(),
        identity: args.identity,
        bucket_ttl: Duration::from_secs(args.bucket_ttl_secs),
        bucket_page_size: args.bucket_page_size,
        max_body_bytes: args.max_body_bytes,
        insecure_skip_verify: args.insecure_skip_verify,
    };
    if cfg.insecure_skip_verify {
        tracing::warn!("signature verification disabled; do not expose this instance");
    }

    let store = Arc::new(SqliteStore::open(&cfg.db_path)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = Arc::new(LeasedBucketCache::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        cfg.bucket_ttl,
        cfg.bucket_page_size,
    ));
    let state = HttpState {
        cfg: cfg.clone(),
        store,
        cache,
        telemetry: Arc::new(Telemetry::new()),
        clock,
    };

    let listener = tokio::net::TcpListener::bind(&cfg.listen).await?;
    tracing::info!(listen = %cfg.listen, db = %db_path.display(), "starting epistula daemon");

    http::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await?;

    Ok(())
}
