use chain_pulse::{
    EngineConfig, FetchError, HttpSnapshotSource, SamplingScheduler, SignalEngine, SignalView,
    SnapshotPoller, feed::DEFAULT_FETCH_TIMEOUT,
};
use futures::FutureExt;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

const DEFAULT_SNAPSHOT_URL: &str = "http://127.0.0.1:8080/api/chain/snapshot";
const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(1_000);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize logging
    init_logging();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "invalid engine configuration");
            return;
        }
    };
    info!(?config, "starting chain monitor");

    // Configurable via CHAIN_SNAPSHOT_URL (default: local snapshot endpoint)
    let url = std::env::var("CHAIN_SNAPSHOT_URL").unwrap_or_else(|_| DEFAULT_SNAPSHOT_URL.to_string());
    let fetch_timeout = env_millis("CHAIN_FETCH_TIMEOUT_MS").unwrap_or(DEFAULT_FETCH_TIMEOUT);
    let render_interval = env_millis("CHAIN_RENDER_INTERVAL_MS").unwrap_or(DEFAULT_RENDER_INTERVAL);

    let source = match HttpSnapshotSource::new(&url, fetch_timeout) {
        Ok(source) => source,
        Err(error) => {
            error!(%error, "invalid snapshot source");
            return;
        }
    };

    let engine = match SignalEngine::new(config.clone()) {
        Ok(engine) => Arc::new(Mutex::new(engine)),
        Err(error) => {
            error!(%error, "failed to build signal engine");
            return;
        }
    };

    let poller = SnapshotPoller::new(source, Arc::clone(&engine)).with_auth_callback(Arc::new(
        |error: FetchError| {
            async move {
                warn!(%error, "snapshot endpoint rejected credentials, login required");
            }
            .boxed()
        },
    ));
    let stats = poller.stats();

    let mut scheduler = SamplingScheduler::new(poller);
    scheduler.start(config.poll_interval());
    info!(%url, "polling chain snapshots");

    let mut render = tokio::time::interval(render_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = render.tick() => {
                let view = engine.lock().view();
                render_view(&view, stats.applied(), stats.failed());
            }
            result = &mut shutdown => {
                if let Err(error) = result {
                    error!(%error, "failed to listen for shutdown signal");
                }
                break;
            }
        }
    }

    scheduler.stop();
    info!(applied = stats.applied(), failed = stats.failed(), "chain monitor stopped");
}

fn render_view(view: &SignalView, applied: u64, failed: u64) {
    let trend = view.trend;
    info!(
        underlying = %view.underlying,
        spot = ?view.spot_price,
        spot_direction = %view.spot_direction.direction,
        trend = %format_args!("{} {}", trend.classification.arrow(), trend.classification),
        score = %format_args!("{:.2}", trend.score),
        bullish = %format_args!("{:.2}", trend.bullish_blend),
        bearish = %format_args!("{:.2}", trend.bearish_blend),
        contracts = view.contracts.len(),
        applied,
        failed,
        "chain"
    );
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn init_logging() {
    tracing_subscriber::fmt()
        // Filter messages based on the INFO level
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        // Disable colours on release builds
        .with_ansi(cfg!(debug_assertions))
        // Install this Tracing subscriber as global default
        .init()
}
