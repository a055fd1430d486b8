//! Replog Server - master or secondary process
//!
//! Master:
//!   replog-server -m --hostname 127.0.0.1 --http-port 18080 -S 127.0.0.1:50051 -S 127.0.0.1:50052
//!
//! Secondary:
//!   replog-server -s --hostname 127.0.0.1 --http-port 28080 --rpc-port 50051

use anyhow::Context;
use clap::Parser;
use replog_core::replication::{Master, NodeRole, Secondary, TcpTransport};
use replog_server::{ReplogServer, config, logging};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn main() -> anyhow::Result<()> {
    let args = config::Args::parse();
    let config = config::Config::load(&args)?;

    logging::init_tracing(config.verbose, config.log_file.as_deref())?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .thread_name("replog-worker")
        .enable_all()
        .build()?;

    rt.block_on(async_main(config))
}

async fn async_main(config: config::Config) -> anyhow::Result<()> {
    info!(role = %config.role, "Starting replog server");

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    match config.role {
        NodeRole::Master => {
            let master = Arc::new(
                Master::new(
                    config.secondaries.clone(),
                    config.replication.clone(),
                    config.monitor.clone(),
                    Arc::new(TcpTransport::new()),
                )?
                .with_max_write_concern(config.effective_max_write_concern()),
            );
            master.start()?;

            serve_http(&config, ReplogServer::master(master), shutdown).await?;
        }
        NodeRole::Secondary => {
            let secondary = Arc::new(Secondary::with_apply_delay(config.apply_delay()));
            let rpc_addr = tokio::net::lookup_host(config.rpc_addr())
                .await?
                .next()
                .with_context(|| format!("Cannot resolve {}", config.rpc_addr()))?;
            secondary.start(rpc_addr).await?;

            serve_http(&config, ReplogServer::secondary(secondary), shutdown).await?;
        }
    }

    info!("Replog server stopped");
    Ok(())
}

async fn serve_http(
    config: &config::Config,
    server: ReplogServer,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = config.http_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", addr))?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    replog_server::serve(listener, server, shutdown).await?;
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}
