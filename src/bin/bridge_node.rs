//! bridge-node
//!
//! Runs the attestation service, its HTTP API and optionally a relayer
//! against the chains configured through `BRIDGE_*` environment variables.
//!
//! Run with: `cargo run --bin bridge-node`

use std::collections::HashMap;
use std::sync::Arc;

use attestation_bridge::providers::{
    connect, AlloyAttesterRegistry, AlloyDestinationChain, AlloySourceChain,
    HttpAttestationClient, LocalKeySigner,
};
use attestation_bridge::relayer::Relayer;
use attestation_bridge::service::{self, AttestationService, JsonFileStore};
use attestation_bridge::{
    AttestationSource, AttesterSetProvider, AttesterSigner, DestinationChain, Domain, NodeConfig,
    Result, SourceChain,
};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("attestation_bridge=info,bridge_node=info")),
        )
        .init();

    let config = NodeConfig::from_env()?;
    info!(
        domains = config.domains.len(),
        listen_addr = %config.listen_addr,
        attesters = config.attester_keys.len(),
        relayer = config.relayer_key.is_some(),
        event = "node_config_loaded"
    );

    let mut sources: Vec<Arc<dyn SourceChain>> = Vec::new();
    let mut attester_sets: HashMap<Domain, Arc<dyn AttesterSetProvider>> = HashMap::new();
    let mut readers: HashMap<Domain, Arc<dyn DestinationChain>> = HashMap::new();
    for domain in config.domains.iter() {
        let provider = connect(domain, None)?;
        sources.push(Arc::new(AlloySourceChain::new(provider.clone(), domain)));
        attester_sets.insert(
            domain.domain,
            Arc::new(AlloyAttesterRegistry::new(provider.clone(), domain)),
        );
        readers.insert(
            domain.domain,
            Arc::new(AlloyDestinationChain::new(provider, domain)),
        );
    }

    let signers = config
        .attester_keys
        .iter()
        .map(|key| LocalKeySigner::from_hex(key).map(|s| Arc::new(s) as Arc<dyn AttesterSigner>))
        .collect::<Result<Vec<_>>>()?;

    let service = AttestationService::builder()
        .attester_sets(attester_sets)
        .destinations(readers)
        .signers(signers)
        .config(config.service)
        .maybe_store(config.store_path.clone().map(JsonFileStore::new))
        .build();
    service.restore().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    tasks.spawn({
        let service = service.clone();
        let shutdown = shutdown_rx.clone();
        async move { service.run(sources, shutdown).await }
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tasks.spawn(service::serve(service.clone(), listener, shutdown_rx.clone()));

    if let Some(key) = &config.relayer_key {
        let wallet = LocalKeySigner::from_hex(key)?;
        info!(relayer = %wallet.address(), event = "relayer_enabled");

        let mut destinations: HashMap<Domain, Arc<dyn DestinationChain>> = HashMap::new();
        for domain in config.domains.iter() {
            let provider = connect(domain, Some(wallet.clone().into_inner()))?;
            destinations.insert(
                domain.domain,
                Arc::new(AlloyDestinationChain::new(provider, domain)),
            );
        }
        let source: Arc<dyn AttestationSource> = match &config.attestation_url {
            Some(url) => Arc::new(HttpAttestationClient::with_timeout(
                url.clone(),
                config.relayer.call_timeout(),
            )?),
            None => Arc::new(service.clone()),
        };

        let relayer = Relayer::builder()
            .source(source)
            .destinations(destinations)
            .config(config.relayer)
            .build();
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            relayer.run(shutdown).await;
            Ok(())
        });
    }

    tokio::signal::ctrl_c().await?;
    info!(event = "shutdown_signal_received");
    shutdown_tx.send_replace(true);

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, event = "node_task_failed"),
            Err(e) => error!(error = %e, event = "node_task_panicked"),
        }
    }
    info!(event = "node_stopped");
    Ok(())
}
