//! Protocol node: single-writer actor around [`Protocol`].
//!
//! One task owns the protocol and drains an `mpsc` command queue, so every
//! operation runs to completion before the next one starts. Callers use a
//! cloneable [`NodeHandle`] and await a `oneshot` reply. Committed events fan
//! out on a `broadcast` channel; a `watch` channel carries [`NodeStats`].

use alloy_primitives::{Address, Bytes, U256};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::bridge::{BridgeError, InboundReceipt, TransferReceipt, TransferRequest};
use super::distribution::{DepositReceipt, DistributionReport};
use super::error::ProtocolError;
use super::messages::{NodeStats, ProtocolEvent};
use super::oracle::{OracleParams, ResponseOutcome};
use super::protocol::{AssetReport, Protocol, PurchaseReceipt};
use super::registry::{Asset, NewAsset};
use super::transport::InboundMessage;
use super::types::{AssetId, CorrelationId, DomainId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("protocol node is not running")]
    Closed,
}

/// Work item run on the node task. Returns `Some(committed)` for state
/// changing calls and `None` for reads.
type Job = Box<dyn FnOnce(&mut Protocol) -> Option<bool> + Send>;

type DistributionResults = Vec<(AssetId, Result<DistributionReport, ProtocolError>)>;

pub enum NodeCommand {
    Execute(Job),
    /// Deliver a batch of cross-domain messages. Each message is its own
    /// atomic operation; a rejected one does not stop the rest.
    DeliverInbound {
        caller: Address,
        messages: Vec<InboundMessage>,
        reply: oneshot::Sender<Vec<Result<InboundReceipt, ProtocolError>>>,
    },
    DistributeDue {
        reply: oneshot::Sender<DistributionResults>,
    },
}

// ─────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────

pub struct ProtocolNode {
    protocol: Protocol,
    cmd_rx: mpsc::Receiver<NodeCommand>,
    events_tx: broadcast::Sender<ProtocolEvent>,
    stats_tx: watch::Sender<NodeStats>,
    stats: NodeStats,
}

impl ProtocolNode {
    pub fn new(protocol: Protocol, queue: usize) -> (Self, NodeHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(queue.max(1));
        let (events_tx, _) = broadcast::channel(1024);
        let stats = NodeStats {
            assets: protocol.asset_count() as u64,
            paused: protocol.is_paused(),
            ..Default::default()
        };
        let (stats_tx, stats_rx) = watch::channel(stats);
        let handle = NodeHandle {
            tx: cmd_tx,
            events: events_tx.clone(),
            stats: stats_rx,
        };
        (
            Self {
                protocol,
                cmd_rx,
                events_tx,
                stats_tx,
                stats,
            },
            handle,
        )
    }

    /// Runs until every handle has been dropped.
    pub async fn run(mut self) {
        info!("🏛️ ProtocolNode started | {}", self.protocol.local_domain());

        while let Some(cmd) = self.cmd_rx.recv().await {
            self.handle(cmd);
            self.publish();
        }

        info!(
            "🏛️ ProtocolNode shutting down | committed={} rejected={} events={}",
            self.stats.committed, self.stats.rejected, self.stats.events
        );
    }

    fn handle(&mut self, cmd: NodeCommand) {
        match cmd {
            NodeCommand::Execute(job) => match job(&mut self.protocol) {
                Some(true) => self.stats.committed += 1,
                Some(false) => self.stats.rejected += 1,
                None => {}
            },
            NodeCommand::DeliverInbound {
                caller,
                messages,
                reply,
            } => {
                let mut results = Vec::with_capacity(messages.len());
                for msg in messages {
                    let id = msg.message_id;
                    let res = self.protocol.on_inbound_message(caller, msg);
                    match &res {
                        Ok(_) => self.stats.committed += 1,
                        Err(ProtocolError::Bridge(BridgeError::DuplicateMessage(_))) => {
                            warn!("🔁 duplicate delivery of {} dropped", id);
                            self.stats.rejected += 1;
                        }
                        Err(_) => self.stats.rejected += 1,
                    }
                    results.push(res);
                }
                let _ = reply.send(results);
            }
            NodeCommand::DistributeDue { reply } => {
                let results = self.protocol.distribute_due();
                for (asset, res) in &results {
                    match res {
                        Ok(_) => self.stats.committed += 1,
                        Err(e) => {
                            warn!("⏱️ scheduled distribution of {} failed: {}", asset, e);
                            self.stats.rejected += 1;
                        }
                    }
                }
                let _ = reply.send(results);
            }
        }
    }

    fn publish(&mut self) {
        for event in self.protocol.drain_events() {
            self.stats.events += 1;
            debug!("📣 {:?}", event);
            // No subscribers is fine.
            let _ = self.events_tx.send(event);
        }
        self.stats.assets = self.protocol.asset_count() as u64;
        self.stats.paused = self.protocol.is_paused();
        let _ = self.stats_tx.send(self.stats);
    }
}

// ─────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct NodeHandle {
    tx: mpsc::Sender<NodeCommand>,
    events: broadcast::Sender<ProtocolEvent>,
    stats: watch::Receiver<NodeStats>,
}

impl NodeHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> NodeStats {
        *self.stats.borrow()
    }

    /// Run a state-changing operation on the node.
    pub async fn call<T, F>(&self, f: F) -> Result<T, NodeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Protocol) -> Result<T, ProtocolError> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Job = Box::new(move |p| {
            let res = f(p);
            let ok = res.is_ok();
            let _ = reply.send(res);
            Some(ok)
        });
        self.tx
            .send(NodeCommand::Execute(job))
            .await
            .map_err(|_| NodeError::Closed)?;
        Ok(rx.await.map_err(|_| NodeError::Closed)??)
    }

    /// Read-only access to the protocol.
    pub async fn query<T, F>(&self, f: F) -> Result<T, NodeError>
    where
        T: Send + 'static,
        F: FnOnce(&Protocol) -> T + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Job = Box::new(move |p| {
            let _ = reply.send(f(p));
            None
        });
        self.tx
            .send(NodeCommand::Execute(job))
            .await
            .map_err(|_| NodeError::Closed)?;
        rx.await.map_err(|_| NodeError::Closed)
    }

    pub async fn deliver_inbound(
        &self,
        caller: Address,
        messages: Vec<InboundMessage>,
    ) -> Result<Vec<Result<InboundReceipt, ProtocolError>>, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(NodeCommand::DeliverInbound {
                caller,
                messages,
                reply,
            })
            .await
            .map_err(|_| NodeError::Closed)?;
        rx.await.map_err(|_| NodeError::Closed)
    }

    pub async fn distribute_due(&self) -> Result<DistributionResults, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(NodeCommand::DistributeDue { reply })
            .await
            .map_err(|_| NodeError::Closed)?;
        rx.await.map_err(|_| NodeError::Closed)
    }

    // ── Typed wrappers ──

    pub async fn create_asset(&self, caller: Address, params: NewAsset) -> Result<AssetId, NodeError> {
        self.call(move |p| p.create_asset(caller, params)).await
    }

    pub async fn purchase_shares(
        &self,
        caller: Address,
        asset: AssetId,
        amount: u64,
        payment: U256,
    ) -> Result<PurchaseReceipt, NodeError> {
        self.call(move |p| p.purchase_shares(caller, asset, amount, payment)).await
    }

    pub async fn transfer_shares(
        &self,
        caller: Address,
        asset: AssetId,
        to: Address,
        amount: u64,
    ) -> Result<(), NodeError> {
        self.call(move |p| p.transfer_shares(caller, asset, to, amount)).await
    }

    pub async fn deposit_income(
        &self,
        caller: Address,
        asset: AssetId,
        amount: U256,
    ) -> Result<DepositReceipt, NodeError> {
        self.call(move |p| p.deposit_income(caller, asset, amount)).await
    }

    pub async fn distribute(&self, asset: AssetId) -> Result<DistributionReport, NodeError> {
        self.call(move |p| p.distribute(asset)).await
    }

    pub async fn claim(&self, caller: Address, asset: AssetId) -> Result<U256, NodeError> {
        self.call(move |p| p.claim(caller, asset)).await
    }

    pub async fn request_valuation(&self, caller: Address, asset: AssetId) -> Result<CorrelationId, NodeError> {
        self.call(move |p| p.request_valuation(caller, asset)).await
    }

    pub async fn valuation_response(
        &self,
        caller: Address,
        id: CorrelationId,
        payload: Bytes,
        error: Option<String>,
    ) -> Result<ResponseOutcome, NodeError> {
        self.call(move |p| p.on_valuation_response(caller, id, payload, error)).await
    }

    pub async fn initiate_transfer(
        &self,
        caller: Address,
        req: TransferRequest,
    ) -> Result<TransferReceipt, NodeError> {
        self.call(move |p| p.initiate_transfer(caller, req)).await
    }

    pub async fn set_paused(&self, caller: Address, paused: bool) -> Result<(), NodeError> {
        self.call(move |p| p.set_paused(caller, paused)).await
    }

    pub async fn set_manager(&self, caller: Address, manager: Address, authorized: bool) -> Result<(), NodeError> {
        self.call(move |p| p.set_manager(caller, manager, authorized)).await
    }

    pub async fn set_trusted_remote(&self, caller: Address, domain: DomainId, remote: Address) -> Result<(), NodeError> {
        self.call(move |p| p.set_trusted_remote(caller, domain, remote)).await
    }

    pub async fn remove_trusted_remote(&self, caller: Address, domain: DomainId) -> Result<(), NodeError> {
        self.call(move |p| p.remove_trusted_remote(caller, domain)).await
    }

    pub async fn set_oracle_params(&self, caller: Address, params: OracleParams) -> Result<(), NodeError> {
        self.call(move |p| p.set_oracle_params(caller, params)).await
    }

    pub async fn set_asset_active(&self, caller: Address, asset: AssetId, active: bool) -> Result<(), NodeError> {
        self.call(move |p| p.set_asset_active(caller, asset, active)).await
    }

    pub async fn withdraw_refund(&self, caller: Address) -> Result<U256, NodeError> {
        self.call(move |p| p.withdraw_refund(caller)).await
    }

    pub async fn assets(&self) -> Result<Vec<Asset>, NodeError> {
        self.query(|p| p.assets()).await
    }

    pub async fn asset_report(&self, asset: AssetId) -> Result<AssetReport, NodeError> {
        self.query(move |p| p.asset_report(asset)).await?.map_err(NodeError::from)
    }

    pub async fn balance_of(&self, asset: AssetId, holder: Address) -> Result<u64, NodeError> {
        self.query(move |p| p.balance_of(asset, &holder)).await
    }

    pub async fn claimable_amount(&self, holder: Address, asset: AssetId) -> Result<U256, NodeError> {
        self.query(move |p| p.claimable_amount(&holder, asset)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::estate::clock::ManualClock;
    use crate::estate::distribution::DistributionConfig;
    use crate::estate::protocol::ProtocolConfig;
    use crate::estate::transport::{
        LoopbackConfig, LoopbackMessageTransport, PayoutLedger, RecordingValuationTransport,
    };
    use crate::estate::types::LocationDescriptors;
    use alloy_primitives::B256;
    use alloy_sol_types::SolValue;

    const OWNER: Address = Address::repeat_byte(0x01);
    const BENEFICIARY: Address = Address::repeat_byte(0x02);
    const ORACLE: Address = Address::repeat_byte(0xaa);
    const RELAYER: Address = Address::repeat_byte(0xbb);

    fn spawn_node() -> (NodeHandle, tokio::task::JoinHandle<()>) {
        let protocol = Protocol::new(
            ProtocolConfig {
                local_domain: DomainId(1),
                owner: OWNER,
                treasury: Address::repeat_byte(0x03),
                sale_escrow: Address::repeat_byte(0x04),
                bridge_escrow: Address::repeat_byte(0x07),
                oracle_transport: ORACLE,
                message_transport: RELAYER,
                distribution: DistributionConfig::default(),
                oracle: OracleParams::default(),
            },
            Box::new(RecordingValuationTransport::new()),
            Box::new(LoopbackMessageTransport::new(LoopbackConfig {
                local_domain: DomainId(1),
                local_sender: Address::repeat_byte(0x41),
                base_fee: U256::ZERO,
                fee_per_byte: U256::ZERO,
                destinations: Default::default(),
            })),
            Box::new(PayoutLedger::new()),
            Arc::new(ManualClock::new(1_000)),
        );
        let (node, handle) = ProtocolNode::new(protocol, 64);
        (handle, tokio::spawn(node.run()))
    }

    fn new_asset() -> NewAsset {
        NewAsset {
            location: LocationDescriptors {
                country: "PT".into(),
                city: "Porto".into(),
                address_line: "Rua das Flores 12".into(),
                coordinates: String::new(),
            },
            initial_valuation: U256::from(1_000_000u64),
            periodic_income: U256::ZERO,
            beneficiary: BENEFICIARY,
            metadata_uri: String::new(),
        }
    }

    #[tokio::test]
    async fn test_operations_publish_events_and_stats() {
        let (node, _task) = spawn_node();
        let mut events = node.subscribe();

        let asset = node.create_asset(OWNER, new_asset()).await.unwrap();
        assert_eq!(asset, AssetId::new(DomainId(1), 1));
        match events.recv().await.unwrap() {
            ProtocolEvent::AssetCreated { asset: a, beneficiary, .. } => {
                assert_eq!(a, asset);
                assert_eq!(beneficiary, BENEFICIARY);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let err = node.distribute(asset).await.unwrap_err();
        assert!(matches!(err, NodeError::Protocol(_)));

        node.deposit_income(BENEFICIARY, asset, U256::from(1_000_000u64)).await.unwrap();
        node.distribute(asset).await.unwrap();
        assert_eq!(
            node.claimable_amount(BENEFICIARY, asset).await.unwrap(),
            U256::from(99_000u64)
        );

        let stats = node.stats();
        assert_eq!(stats.committed, 3);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.assets, 1);
        // AssetCreated, IncomeDeposited, YieldDistributed
        assert_eq!(stats.events, 3);
    }

    #[tokio::test]
    async fn test_valuation_callback_through_node() {
        let (node, _task) = spawn_node();
        let asset = node.create_asset(OWNER, new_asset()).await.unwrap();
        let id = node.request_valuation(OWNER, asset).await.unwrap();

        let payload = Bytes::from(U256::from(2_500_000u64).abi_encode());
        let outcome = node.valuation_response(ORACLE, id, payload, None).await.unwrap();
        assert!(matches!(outcome, ResponseOutcome::Fulfilled(_)));
        let report = node.asset_report(asset).await.unwrap();
        assert_eq!(report.share_price, U256::from(250u64));

        let unknown = CorrelationId(B256::repeat_byte(0x99));
        let outcome = node
            .valuation_response(ORACLE, unknown, Bytes::new(), None)
            .await
            .unwrap();
        assert_eq!(outcome, ResponseOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_inbound_batch_continues_after_rejection() {
        let (node, _task) = spawn_node();
        let msg = InboundMessage {
            message_id: crate::estate::types::MessageId(B256::repeat_byte(1)),
            source_domain: DomainId(2),
            sender: Address::repeat_byte(0x42),
            payload: Bytes::new(),
        };
        // No trusted remote yet: both rejected, batch still answered.
        let results = node
            .deliver_inbound(RELAYER, vec![msg.clone(), msg])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_err()));
        assert_eq!(node.stats().rejected, 2);
    }

    #[tokio::test]
    async fn test_handle_reports_closed_node() {
        let (node, task) = spawn_node();
        task.abort();
        let _ = task.await;
        assert_eq!(node.assets().await.unwrap_err(), NodeError::Closed);
    }
}
