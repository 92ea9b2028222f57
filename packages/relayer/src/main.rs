use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use sp_core::{sr25519, Pair};
use tokio::sync::mpsc;
use tracing::{error, info};

use chainspan_relayer::blockstore::Blockstore;
use chainspan_relayer::config::Config;
use chainspan_relayer::evm::{EvmConnection, EvmListener, EvmWriter};
use chainspan_relayer::metrics::{ChainMetrics, UP};
use chainspan_relayer::router::Router;
use chainspan_relayer::substrate::{
    StorageEventRetriever, SubstrateConnection, SubstrateListener, SubstrateWriter,
};
use chainspan_relayer::{api, metrics};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    init_logging();

    info!("Starting Chainspan relayer");

    let config = Config::load()?;
    info!(
        substrate_chain_id = config.substrate.chain_id,
        evm_chain_id = config.evm.chain_id,
        "Configuration loaded"
    );

    // Blockstores share one file; each chain resumes one past its last
    // processed height.
    let substrate_store = Arc::new(
        Blockstore::open(
            &config.blockstore.path,
            &config.substrate.name,
            config.substrate.start_block,
        )
        .await?,
    );
    let substrate_start = substrate_store.resume_height().await?;
    let evm_store = Arc::new(
        Blockstore::open(&config.blockstore.path, &config.evm.name, config.evm.start_block).await?,
    );
    let evm_start = evm_store.resume_height().await?;
    info!(substrate_start, evm_start, "Blockstore opened");

    // Connections, shared by each chain's listener and writer.
    let signer = sr25519::Pair::from_string(&config.substrate.signer_seed, None)
        .map_err(|e| eyre!("Invalid substrate signer seed: {:?}", e))?;
    let substrate_conn =
        Arc::new(SubstrateConnection::connect(&config.substrate.ws_url, signer).await?);

    let evm_conn = Arc::new(EvmConnection::new(&config.evm.ws_url));
    evm_conn.connect().await?;
    let bridge_address = Address::from_str(&config.evm.bridge_address)
        .wrap_err("Invalid evm bridge address")?;

    // Writers are registered before any listener starts.
    let router = Arc::new(Router::new());
    router.register(
        config.evm.chain_id,
        Arc::new(EvmWriter::new(
            evm_conn.clone(),
            bridge_address,
            &config.evm.private_key,
            config.evm.network_id,
        )?),
    )?;
    router.register(
        config.substrate.chain_id,
        Arc::new(SubstrateWriter::new(
            substrate_conn.clone(),
            &config.substrate.bridge_pallet,
        )),
    )?;

    let (sys_err_tx, mut sys_err_rx) = mpsc::unbounded_channel();

    let retriever = Arc::new(StorageEventRetriever::new(substrate_conn.clone()));
    let mut substrate_listener = SubstrateListener::new(
        &config.substrate.name,
        config.substrate.chain_id,
        substrate_start,
        substrate_conn,
        retriever,
        substrate_store,
        router.clone(),
        sys_err_tx.clone(),
        Some(ChainMetrics::new(&config.substrate.name)),
    )
    .with_retry(
        config.relayer.block_retry_limit,
        config.relayer.block_retry_interval(),
    );
    substrate_listener.register_transfer_handlers(&config.substrate.bridge_pallet)?;
    let substrate_listener = Arc::new(substrate_listener);

    let evm_listener = Arc::new(EvmListener::new(
        &config.evm.name,
        config.evm.chain_id,
        evm_start,
        bridge_address,
        evm_conn.clone(),
        router,
        evm_store,
        sys_err_tx,
        Some(ChainMetrics::new(&config.evm.name)),
    ));

    // Shutdown plumbing: one channel per listener, fed by SIGINT/SIGTERM.
    let (substrate_stop_tx, substrate_stop_rx) = mpsc::channel::<()>(1);
    let (evm_stop_tx, evm_stop_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = substrate_stop_tx.send(()).await;
        let _ = evm_stop_tx.send(()).await;
    });

    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_addr).await {
            error!(error = %e, "API server error");
        }
    });

    UP.set(1.0);
    info!("Listeners starting");

    tokio::select! {
        result = substrate_listener.run(substrate_stop_rx) => {
            if let Err(e) = result {
                error!(error = %e, "Substrate listener stopped");
            }
        }
        result = evm_listener.run(evm_stop_rx) => {
            if let Err(e) = result {
                error!(error = %e, "EVM listener stopped");
            }
        }
        Some(fatal) = sys_err_rx.recv() => {
            metrics::record_error("relayer", "fatal");
            error!(error = %fatal, "Fatal relayer error, shutting down");
        }
    }

    UP.set(0.0);
    evm_conn.close();
    info!("Chainspan relayer stopped");
    Ok(())
}

/// Initialize tracing with structured output.
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chainspan_relayer=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM).
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
