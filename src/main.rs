//! Swap Router - cross-chain swap detection, validation and MPC-signed replay
//!
//! The router reads swap transactions from a source ledger, checks them
//! against the token registry and the destination ledger, and drives a
//! threshold signer quorum to sign the matching destination transaction.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod api;
mod bridge;
mod cache;
mod config;
mod error;
mod metrics;
mod mpc;
mod pipeline;
mod registry;
mod rpc;
mod swap;
mod tx;
mod validate;

#[cfg(test)]
mod testing;

use bridge::{BridgeContext, BridgeRegistry, SignerBackend};
use config::Settings;
use metrics::MetricsServer;
use mpc::{MpcApi, MpcClient, SignAcceptor, SigningCoordinator};
use pipeline::SwapProcessor;
use registry::{StaticRegistry, TokenRegistry};
use rpc::{HttpTransport, RpcTransport};
use swap::SwapRouter;
use tx::Sequencer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Swap Router v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    let transport: Arc<dyn RpcTransport> = Arc::new(HttpTransport::new());
    let registry: Arc<dyn TokenRegistry> = Arc::new(StaticRegistry::from_settings(&settings)?);
    let sequencer = Arc::new(Sequencer::new());

    // MPC client, shared by the coordinator and the acceptor
    let mpc_client = Arc::new(MpcClient::new(&settings.mpc, transport.clone()));
    if !settings.signer.sign_with_private_key || settings.mpc.accept_enabled {
        check_signing_group(&mpc_client, &settings.mpc.group_id).await?;
    }
    let mpc_api: Arc<dyn MpcApi> = mpc_client;
    let signer = signer_backend(&settings, mpc_api.clone())?;

    // One bridge per enabled chain
    let bridges = Arc::new(BridgeRegistry::with_default_families());
    let ctx = BridgeContext {
        transport,
        registry: registry.clone(),
        sequencer: sequencer.clone(),
        signer,
        rpc_timeout: Duration::from_secs(settings.router.rpc_timeout_secs),
    };
    for (name, chain) in settings.enabled_chains() {
        bridges
            .add_chain(chain.clone(), ctx.clone())
            .with_context(|| format!("Failed to initialize chain {}", name))?;
    }
    info!("Bridges initialized for chains {:?}", bridges.chain_ids());

    let router = Arc::new(SwapRouter::new(
        bridges.clone(),
        registry,
        sequencer,
        settings.router.trade_deadline_secs,
    ));
    let processor = Arc::new(SwapProcessor::new(router.clone(), &settings.router));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start swap processor
    let processor_handle = tokio::spawn(processor.clone().run(shutdown_rx.clone()));

    // Start co-signer acceptor
    let acceptor_handle = if settings.mpc.accept_enabled {
        let acceptor = SignAcceptor::new(mpc_api, router.clone(), &settings.mpc);
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move { acceptor.run(shutdown).await }))
    } else {
        info!("Sign acceptor disabled");
        None
    };

    // Start API server
    let api_handle = tokio::spawn({
        let state = api::AppState {
            router: router.clone(),
            processor,
        };
        let config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let bridges = bridges.clone();
        let router = router.clone();
        let interval = settings.router.health_check_interval_secs.max(1);
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                let mut healthy = true;
                for chain_id in bridges.chain_ids() {
                    let latest = match bridges.get(chain_id) {
                        Ok(bridge) => bridge.latest_height().await.ok(),
                        Err(_) => None,
                    };
                    if latest.is_none() {
                        warn!("Chain {} health check failed", chain_id);
                        healthy = false;
                    }
                    metrics::record_chain_health(chain_id, latest);
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }

                // Drops pending sequences the ledgers have included
                router.sync_sequences().await;
            }
        }
    });

    info!("Swap Router is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown of the loops, abort the servers
    if shutdown_tx.send(true).is_err() {
        warn!("No task was listening for shutdown");
    }
    if let Err(e) = processor_handle.await {
        warn!("Swap processor task ended abnormally: {}", e);
    }
    if let Some(handle) = acceptor_handle {
        if let Err(e) = handle.await {
            warn!("Sign acceptor task ended abnormally: {}", e);
        }
    }

    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Swap Router stopped");
    Ok(())
}

/// Refuse to start outside the configured signing group; an unreachable
/// MPC node is only reported since signing retries later
async fn check_signing_group(client: &MpcClient, group_id: &str) -> Result<()> {
    match client.check_membership(group_id).await {
        Ok(enode) => {
            info!("MPC node {} is a member of signing group {}", enode, group_id);
            Ok(())
        }
        Err(e) if e.kind() == error::ErrorKind::Infrastructure => {
            warn!("Could not check signing group membership: {}", e);
            Ok(())
        }
        Err(e) => Err(e).context("MPC signing group check failed"),
    }
}

/// Threshold signing, or local keys when test mode allows it
fn signer_backend(settings: &Settings, mpc_api: Arc<dyn MpcApi>) -> Result<SignerBackend> {
    if !settings.signer.sign_with_private_key {
        return Ok(SignerBackend::Mpc(Arc::new(SigningCoordinator::new(
            mpc_api,
            &settings.mpc,
        ))));
    }

    warn!("Signing with local private keys; test mode only");
    let keys = settings
        .signer
        .private_keys
        .iter()
        .map(|(chain, key)| {
            chain
                .parse::<u64>()
                .map(|chain_id| (chain_id, key.clone()))
                .with_context(|| format!("Invalid private key chain id {}", chain))
        })
        .collect::<Result<HashMap<_, _>>>()?;
    Ok(SignerBackend::LocalKeys(Arc::new(keys)))
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,swap_router=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
