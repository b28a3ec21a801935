use bicimarket_api::{
    api::{self, AppState},
    catalog::publish::Publisher,
    config::MarketConfig,
    idempotency::ReceiptCache,
    security::TokenBuckets,
    session::SessionStore,
    supabase::SupabaseClient,
};
use eyre::{WrapErr, eyre};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "bicimarket.api", "server crashed: {err:?}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let client = Arc::new(
        SupabaseClient::from_env()
            .ok_or_else(|| eyre!("SUPABASE_URL and SUPABASE_ANON_KEY must be set"))?,
    );
    let market = MarketConfig::from_env();
    let sessions = Arc::new(SessionStore::start(client.clone()));
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing the Prometheus recorder")?;

    let state = AppState {
        backend: client.clone(),
        sessions: sessions.clone(),
        publisher: Publisher::new(client.clone(), market.max_images),
        market,
        receipts: Arc::new(ReceiptCache::from_env()),
        openapi: Arc::new(api::load_openapi()),
        prometheus,
    };
    let app = api::router(state, TokenBuckets::from_env(), body_limit_from_env());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "bicimarket.api", supabase = client.base_url(), "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    sessions.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target = "bicimarket.api", error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    info!(target = "bicimarket.api", "shutting down");
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(25 * 1024 * 1024)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
