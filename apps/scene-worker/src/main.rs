use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use uuid::Uuid;

use scene_worker::config::WorkerConfig;
use scene_worker::{
    metrics, stdio, telemetry, ChannelPort, Dispatcher, HostMessage, HttpFetcher, RequestHeaders,
    RequestScheduler, TileWidthTable,
};

/// Streams scene assets over a JSON-lines protocol on stdin/stdout.
#[derive(Parser, Debug)]
#[command(name = "scene-worker", version, about)]
struct Cli {
    /// Scene service base URL; initializes the connection at startup.
    #[arg(long, env = "SCENE_WORKER_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "SCENE_WORKER_CORRELATION_ID")]
    correlation_id: Option<String>,

    /// Maximum concurrent fetches.
    #[arg(long, env = "SCENE_WORKER_MAX_ACTIVE")]
    max_active: Option<usize>,

    #[arg(long, env = "SCENE_WORKER_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,

    /// Print Prometheus metrics to stderr on exit.
    #[arg(long)]
    dump_metrics: bool,
}

impl Cli {
    fn into_config(self) -> (WorkerConfig, bool) {
        let mut config = WorkerConfig::from_env();
        if let Some(base_url) = self.base_url {
            config.base_url = Some(base_url);
        }
        if let Some(correlation_id) = self.correlation_id {
            config.correlation_id = Some(correlation_id);
        }
        if let Some(max_active) = self.max_active.filter(|n| *n > 0) {
            config.max_active = max_active;
        }
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms);
        }
        (config, self.dump_metrics)
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let (config, dump_metrics) = Cli::parse().into_config();
    telemetry::init_tracing(&config.log_filter);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let result = runtime.block_on(run(config));
    // Stdin reads park a blocking thread that never returns once the host goes quiet.
    runtime.shutdown_timeout(Duration::from_millis(250));

    if dump_metrics {
        eprint!("{}", String::from_utf8_lossy(&metrics::gather()));
    }
    result
}

async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    let correlation_id = config
        .correlation_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let headers = RequestHeaders::shared(correlation_id.clone());
    let fetcher = HttpFetcher::new(config.request_timeout, headers.clone())
        .context("failed to build http client")?;
    let scheduler = RequestScheduler::new(
        Arc::new(fetcher),
        Arc::new(TileWidthTable::new()),
        config.max_active,
    );
    let (port, outbound) = ChannelPort::new();
    let mut dispatcher = Dispatcher::new(scheduler, headers, Arc::new(port));

    if let Some(base_url) = config.base_url {
        dispatcher.handle(HostMessage::InitializeConnection {
            base_url,
            correlation_id: Some(correlation_id),
            max_active_requests: None,
        });
    }

    info!(max_active = config.max_active, "scene worker ready");
    let reader = tokio::io::BufReader::new(tokio::io::stdin());
    stdio::serve(dispatcher, outbound, reader, tokio::io::stdout())
        .await
        .context("host bridge failed")?;
    info!("scene worker stopped");
    Ok(())
}
