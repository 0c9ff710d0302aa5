//! Scheduler adapter: periodically distributes every asset that is due.
//!
//! Due means auto-distribution on, income pending and a full distribution
//! period elapsed. Failures are logged and picked up again on the next tick;
//! nothing is retried in between.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::node::NodeHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_secs: 3_600 }
    }
}

pub struct DistributionScheduler {
    cfg: SchedulerConfig,
    node: NodeHandle,
    shutdown: watch::Receiver<bool>,
}

impl DistributionScheduler {
    pub fn new(cfg: SchedulerConfig, node: NodeHandle, shutdown: watch::Receiver<bool>) -> Self {
        Self { cfg, node, shutdown }
    }

    pub async fn run(self) {
        let Self {
            cfg,
            node,
            mut shutdown,
        } = self;
        info!("⏱️ DistributionScheduler started | tick={}s", cfg.tick_secs);
        let mut interval = tokio::time::interval(Duration::from_secs(cfg.tick_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if run_due(&node).await.is_none() {
                        break; // node gone
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("⏱️ DistributionScheduler stopped");
    }

    /// One pass over the due assets. Returns the number distributed, or
    /// `None` when the node has stopped.
    pub async fn tick(&self) -> Option<usize> {
        run_due(&self.node).await
    }
}

async fn run_due(node: &NodeHandle) -> Option<usize> {
    let results = match node.distribute_due().await {
        Ok(r) => r,
        Err(e) => {
            warn!("⏱️ scheduler tick failed: {}", e);
            return None;
        }
    };
    if results.is_empty() {
        debug!("⏱️ nothing due");
        return Some(0);
    }
    let mut done = 0;
    for (asset, res) in results {
        match res {
            Ok(report) => {
                done += 1;
                info!("⏱️ distributed asset {} rate={}", asset, report.rate_per_share);
            }
            Err(e) => warn!("⏱️ asset {} not distributed: {}", asset, e),
        }
    }
    Some(done)
}
