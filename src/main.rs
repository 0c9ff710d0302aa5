use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use fractional_estate::admin::{serve_admin, AdminState, RelayState};
use fractional_estate::estate::clock::SystemClock;
use fractional_estate::estate::node::ProtocolNode;
use fractional_estate::estate::protocol::Protocol;
use fractional_estate::estate::scheduler::DistributionScheduler;
use fractional_estate::estate::transport::{
    LoopbackMessageTransport, PayoutLedger, RecordingValuationTransport, ValuationTransport,
};
use fractional_estate::valuation_http::{DispatcherConfig, ValuationDispatcher};
use fractional_estate::{init_tracing, NodeConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cfg = NodeConfig::from_env()?;
    let _log_guard = init_tracing(cfg.log_dir.as_deref());

    info!("═══════════════════════════════════════════════════");
    info!("  Fractional Estate — protocol node");
    info!("═══════════════════════════════════════════════════");
    info!(
        "📊 Config: {} owner={} peers={:?} tick={}s perf_fee={}",
        cfg.protocol.local_domain,
        cfg.protocol.owner,
        cfg.peers,
        cfg.scheduler.tick_secs,
        cfg.protocol.distribution.apply_performance_fee
    );

    let outbox = LoopbackMessageTransport::new(cfg.loopback());
    let (valuation, dispatch_rx) = match &cfg.valuation_endpoint {
        Some(_) => {
            let (transport, rx) = ValuationDispatcher::channel(cfg.queue_size);
            (Box::new(transport) as Box<dyn ValuationTransport>, Some(rx))
        }
        None => {
            warn!("📝 No ESTATE_VALUATION_URL — valuation queries are only recorded");
            (Box::new(RecordingValuationTransport::new()) as Box<dyn ValuationTransport>, None)
        }
    };

    let protocol = Protocol::new(
        cfg.protocol.clone(),
        valuation,
        Box::new(outbox.clone()),
        Box::new(PayoutLedger::new()),
        Arc::new(SystemClock),
    );
    let (node, handle) = ProtocolNode::new(protocol, cfg.queue_size);
    let node_task = tokio::spawn(node.run());

    if let (Some(endpoint), Some(rx)) = (cfg.valuation_endpoint.clone(), dispatch_rx) {
        let dispatcher = ValuationDispatcher::from_parts(
            DispatcherConfig {
                endpoint,
                callback_url: cfg.callback_url.clone(),
                oracle_identity: cfg.protocol.oracle_transport,
                timeout: Duration::from_secs(10),
            },
            cfg.callback_secret.clone(),
            handle.clone(),
            rx,
        )?;
        tokio::spawn(dispatcher.run());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = DistributionScheduler::new(cfg.scheduler.clone(), handle.clone(), shutdown_rx);
    let scheduler_task = tokio::spawn(scheduler.run());

    // Event log
    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ev) => match serde_json::to_string(&ev) {
                    Ok(line) => info!(target: "estate::events", "{}", line),
                    Err(e) => warn!("event not serializable: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("📉 event log lagged by {}", n),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if cfg.admin_secret.is_none() {
        warn!("🔒 No ESTATE_ADMIN_SECRET — /admin routes are disabled");
    }
    if cfg.callback_secret.is_none() {
        warn!("🔒 No ESTATE_CALLBACK_SECRET — valuation callbacks are disabled");
    }
    let relay = match cfg.relay_secret.clone() {
        Some(secret) => Some(RelayState {
            outbox,
            message_identity: cfg.protocol.message_transport,
            secret,
        }),
        None => {
            warn!("🔒 No ESTATE_RELAY_SECRET — /relay routes are disabled");
            None
        }
    };
    let admin = AdminState {
        node: handle.clone(),
        operator: cfg.protocol.owner,
        admin_secret: cfg.admin_secret.clone(),
        oracle_identity: cfg.protocol.oracle_transport,
        callback_secret: cfg.callback_secret.clone(),
        relay,
    };
    let admin_addr = cfg.admin_addr;
    let admin_task = tokio::spawn(async move {
        if let Err(e) = serve_admin(admin, admin_addr).await {
            error!("🌐 admin server failed: {:#}", e);
        }
    });

    info!("🚀 Node running — Ctrl+C to stop");
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("failed to listen for shutdown signal: {}", e);
            }
            info!("🛑 Shutdown requested");
        }
        _ = admin_task => {
            warn!("🌐 admin server exited");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    let stats = handle.stats();
    drop(handle);
    info!(
        "🏁 Stopped | committed={} rejected={} events={} assets={}",
        stats.committed, stats.rejected, stats.events, stats.assets
    );
    // Handles held by the dispatcher and event log keep the node alive; do
    // not wait on it.
    node_task.abort();
    Ok(())
}
