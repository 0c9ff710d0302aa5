//! Two-domain walkthrough: one asset lives on domain 1, shares are sold to
//! random buyers, income is distributed and claimed, then shares travel to
//! domain 2 and back through an in-process relayer. Ends with a replay of an
//! already delivered message, which domain 2 must refuse.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolValue;
use anyhow::{Context, Result};
use futures::future::join_all;
use rand::Rng;
use tokio::sync::watch;
use tracing::{info, warn};

use fractional_estate::estate::bridge::TransferRequest;
use fractional_estate::estate::clock::SystemClock;
use fractional_estate::estate::distribution::DistributionConfig;
use fractional_estate::estate::node::{NodeHandle, ProtocolNode};
use fractional_estate::estate::oracle::OracleParams;
use fractional_estate::estate::protocol::{Protocol, ProtocolConfig};
use fractional_estate::estate::registry::NewAsset;
use fractional_estate::estate::transport::{
    InboundMessage, LoopbackConfig, LoopbackMessageTransport, PayoutLedger, RecordingValuationTransport,
};
use fractional_estate::estate::types::{AssetId, DomainId, LocationDescriptors};
use fractional_estate::{init_tracing, protocol_account};

const OWNER: Address = Address::repeat_byte(0x01);
const BENEFICIARY: Address = Address::repeat_byte(0x02);

struct Domain {
    id: DomainId,
    node: NodeHandle,
    outbox: LoopbackMessageTransport,
    valuations: RecordingValuationTransport,
    payouts: PayoutLedger,
    oracle: Address,
    relay_identity: Address,
    sender: Address,
}

fn spawn_domain(id: u32, peer: u32) -> Domain {
    let label = |name: &str| protocol_account(&format!("d{}.{}", id, name));
    let cfg = ProtocolConfig {
        local_domain: DomainId(id),
        owner: OWNER,
        treasury: label("treasury"),
        sale_escrow: label("sale_escrow"),
        bridge_escrow: label("bridge_escrow"),
        oracle_transport: label("oracle"),
        message_transport: label("relay"),
        distribution: DistributionConfig::default(),
        oracle: OracleParams::default(),
    };
    let outbox = LoopbackMessageTransport::new(LoopbackConfig {
        local_domain: DomainId(id),
        local_sender: cfg.bridge_escrow,
        base_fee: U256::from(1_000u64),
        fee_per_byte: U256::from(2u64),
        destinations: [DomainId(peer)].into_iter().collect(),
    });
    let valuations = RecordingValuationTransport::new();
    let payouts = PayoutLedger::new();
    let protocol = Protocol::new(
        cfg.clone(),
        Box::new(valuations.clone()),
        Box::new(outbox.clone()),
        Box::new(payouts.clone()),
        Arc::new(SystemClock),
    );
    let (node, handle) = ProtocolNode::new(protocol, 64);
    tokio::spawn(node.run());
    Domain {
        id: DomainId(id),
        node: handle,
        outbox,
        valuations,
        payouts,
        oracle: cfg.oracle_transport,
        relay_identity: cfg.message_transport,
        sender: cfg.bridge_escrow,
    }
}

/// Moves queued messages `from → to` until shutdown. Returns everything it
/// delivered so the replay step has something to resend.
async fn relay(
    from: LoopbackMessageTransport,
    to: NodeHandle,
    to_domain: DomainId,
    identity: Address,
    mut shutdown: watch::Receiver<bool>,
) -> Vec<InboundMessage> {
    let mut delivered = Vec::new();
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let batch = from.drain_for(to_domain);
                if batch.is_empty() {
                    continue;
                }
                match to.deliver_inbound(identity, batch.clone()).await {
                    Ok(results) => {
                        for (msg, res) in batch.iter().zip(results) {
                            match res {
                                Ok(r) => info!("🔁 {} → {}: {} shares to {} (unlocked={}, minted={})",
                                    msg.source_domain, to_domain, r.unlocked + r.minted, r.recipient, r.unlocked, r.minted),
                                Err(e) => warn!("🔁 {} refused by {}: {}", msg.message_id, to_domain, e),
                            }
                        }
                        delivered.extend(batch);
                    }
                    Err(e) => {
                        warn!("🔁 relay to {} stopped: {}", to_domain, e);
                        break;
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    delivered
}

async fn wait_for_balance(node: &NodeHandle, asset: AssetId, holder: Address, expected: u64) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while node.balance_of(asset, holder).await? != expected {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::Ok(())
    })
    .await
    .context("relay did not deliver in time")?
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let _guard = init_tracing(None);

    info!("═══════════════════════════════════════════════════");
    info!("  Fractional Estate — two-domain bridge simulation");
    info!("═══════════════════════════════════════════════════");

    let home = spawn_domain(1, 2);
    let away = spawn_domain(2, 1);
    home.node.set_trusted_remote(OWNER, away.id, away.sender).await?;
    away.node.set_trusted_remote(OWNER, home.id, home.sender).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let to_away = tokio::spawn(relay(
        home.outbox.clone(),
        away.node.clone(),
        away.id,
        away.relay_identity,
        stop_rx.clone(),
    ));
    let to_home = tokio::spawn(relay(
        away.outbox.clone(),
        home.node.clone(),
        home.id,
        home.relay_identity,
        stop_rx,
    ));

    // ── Asset + valuation ──
    let asset = home
        .node
        .create_asset(
            OWNER,
            NewAsset {
                location: LocationDescriptors {
                    country: "PT".into(),
                    city: "Lisbon".into(),
                    address_line: "Rua Augusta 100".into(),
                    coordinates: "38.7100,-9.1366".into(),
                },
                initial_valuation: U256::from(2_000_000_000u64),
                periodic_income: U256::from(8_000_000u64),
                beneficiary: BENEFICIARY,
                metadata_uri: "ipfs://lisbon-augusta-100".into(),
            },
        )
        .await?;
    info!("🏠 created asset {} on {}", asset, home.id);

    let id = home.node.request_valuation(OWNER, asset).await?;
    let drift: i64 = rand::thread_rng().gen_range(-50..=80);
    let appraised = U256::from((2_000_000_000i64 + drift * 1_000_000) as u64);
    let outcome = home
        .node
        .valuation_response(home.oracle, id, Bytes::from(appraised.abi_encode()), None)
        .await?;
    info!("📡 valuation {} answered: {:?} ({} queries sent)", id, outcome, home.valuations.sent().len());

    // ── Primary sale ──
    let orders: Vec<(Address, u64)> = {
        let mut rng = rand::thread_rng();
        (0..5u8)
            .map(|i| (Address::repeat_byte(0x10 + i), rng.gen_range(50..=400)))
            .collect()
    };
    for (buyer, amount) in &orders {
        let quote = home
            .node
            .query({
                let amount = *amount;
                move |p| p.quote_purchase(asset, amount)
            })
            .await??;
        let receipt = home.node.purchase_shares(*buyer, asset, *amount, quote.total()).await?;
        info!("🛒 {} bought {} shares for {}", buyer, amount, receipt.quote.total());
    }

    // ── Income ──
    let deposit = home.node.deposit_income(BENEFICIARY, asset, U256::from(8_000_000u64)).await?;
    info!("💰 deposited {} (fee {}, net {})", deposit.gross, deposit.management_fee, deposit.net);
    let report = home.node.distribute(asset).await?;
    info!("📤 distributed {} to {} holders", report.credited, report.holders_credited);

    let claims = join_all(orders.iter().map(|(buyer, _)| {
        let node = home.node.clone();
        let buyer = *buyer;
        async move { (buyer, node.claim(buyer, asset).await) }
    }))
    .await;
    for (buyer, res) in claims {
        match res {
            Ok(amount) => info!("💸 {} claimed {} (paid out {})", buyer, amount, home.payouts.total_paid_to(&buyer)),
            Err(e) => warn!("💸 {} claim failed: {}", buyer, e),
        }
    }

    // ── Cross-domain round trip ──
    let (traveller, bought) = orders[0];
    let outbound = bought / 2;
    let fee = U256::from(10_000u64);
    let receipt = home
        .node
        .initiate_transfer(
            traveller,
            TransferRequest {
                asset,
                recipient: traveller,
                amount: outbound,
                destination: away.id,
                fee_paid: fee,
            },
        )
        .await?;
    info!("🌉 sent {} shares as {} (fee {}, refund {})", outbound, receipt.message_id, receipt.fee, receipt.refund);
    wait_for_balance(&away.node, asset, traveller, outbound).await?;

    let back = outbound / 2;
    away.node
        .initiate_transfer(
            traveller,
            TransferRequest {
                asset,
                recipient: traveller,
                amount: back,
                destination: home.id,
                fee_paid: fee,
            },
        )
        .await?;
    wait_for_balance(&home.node, asset, traveller, bought - outbound + back).await?;

    let _ = stop_tx.send(true);
    let delivered_away = to_away.await?;
    let _ = to_home.await?;

    // ── Replay ──
    let replay = away.node.deliver_inbound(away.relay_identity, delivered_away).await?;
    for res in replay {
        match res {
            Ok(r) => warn!("🚨 replay accepted: {:?}", r),
            Err(e) => info!("🛡️ replay refused: {}", e),
        }
    }

    let report = home.node.asset_report(asset).await?;
    info!("═══════════════════════════════════════════════════");
    info!(
        "📊 {} price/share={} minted={} locked={} in_sale={} roi={}%",
        asset, report.share_price, report.minted, report.locked, report.in_sale, report.roi_percent
    );
    info!(
        "📊 {} holds {} on {} and {} on {}",
        traveller,
        home.node.balance_of(asset, traveller).await?,
        home.id,
        away.node.balance_of(asset, traveller).await?,
        away.id
    );
    info!("📊 home stats {:?}", home.node.stats());
    info!("📊 away stats {:?}", away.node.stats());
    Ok(())
}
