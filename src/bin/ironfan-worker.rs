use anyhow::Context;
use ironfan::config::{ServiceConfig, init_worker_pool};
use ironfan::remoting::{OperationRegistry, RemoteService, serve};
use ironfan::{Count, Dataset, Max, Min, Sum};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Hosts a demo dataset of `i64` partitions over TCP.
///
/// Environment:
/// - `IRONFAN_BIND`: listen address (default `127.0.0.1:7070`)
/// - `IRONFAN_PARTITIONS`: number of leaves (default 4)
/// - `IRONFAN_CONFIG`: optional JSON service config
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bind_addr: SocketAddr = std::env::var("IRONFAN_BIND")
        .unwrap_or_else(|_| "127.0.0.1:7070".to_string())
        .parse()
        .context("invalid IRONFAN_BIND")?;
    let partitions: usize = std::env::var("IRONFAN_PARTITIONS")
        .unwrap_or_else(|_| "4".to_string())
        .parse()
        .context("invalid IRONFAN_PARTITIONS")?;
    let config = match std::env::var("IRONFAN_CONFIG") {
        Ok(path) => ServiceConfig::from_json_file(path)?,
        Err(_) => ServiceConfig::default(),
    };

    let threads = init_worker_pool(config.worker_threads);
    tracing::info!(threads, partitions, "worker pool ready");

    let registry = OperationRegistry::new();
    registry.register_sketch::<Vec<i64>, i64, Sum<i64>>();
    registry.register_sketch::<Vec<i64>, u64, Count>();
    registry.register_sketch::<Vec<i64>, Option<i64>, Min<i64>>();
    registry.register_sketch::<Vec<i64>, Option<i64>, Max<i64>>();
    registry.register_zip::<Vec<i64>, Vec<i64>>();

    let root = demo_dataset(partitions);
    let service = RemoteService::new(
        format!("tcp://{bind_addr}"),
        root,
        Arc::new(registry),
        config,
    )?;
    let server = serve(Arc::clone(&service), bind_addr).await?;
    tracing::info!("worker listening on {}", server.local_addr());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    service.shutdown();
    server.shutdown().await;
    Ok(())
}

/// Leaf `i` holds `i * 1000 .. (i + 1) * 1000`.
fn demo_dataset(partitions: usize) -> Dataset<Vec<i64>> {
    let leaves = (0..partitions as i64)
        .map(|i| Dataset::local((i * 1000..(i + 1) * 1000).collect::<Vec<_>>()))
        .collect();
    Dataset::parallel(leaves)
}
