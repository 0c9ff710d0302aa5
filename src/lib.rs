pub mod admin;
pub mod estate;
pub mod valuation_http;

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::{keccak256, Address, U256};
use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use estate::distribution::DistributionConfig;
use estate::oracle::OracleParams;
use estate::protocol::ProtocolConfig;
use estate::scheduler::SchedulerConfig;
use estate::transport::LoopbackConfig;
use estate::types::DomainId;

// --- Configuration Structs ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub protocol: ProtocolConfig,
    pub admin_addr: SocketAddr,
    /// Valuation service endpoint. Without one, queries are only recorded.
    #[serde(default)]
    pub valuation_endpoint: Option<Url>,
    /// URL the valuation service posts results back to.
    #[serde(default)]
    pub callback_url: Option<Url>,
    /// HMAC key for valuation callbacks. Required with `valuation_endpoint`.
    /// Secrets are never serialized.
    #[serde(skip)]
    pub callback_secret: Option<Arc<SecretString>>,
    /// HMAC key for `/admin/*`; without one those routes are not served.
    #[serde(skip)]
    pub admin_secret: Option<Arc<SecretString>>,
    /// HMAC key for `/relay/*`; without one those routes are not served.
    #[serde(skip)]
    pub relay_secret: Option<Arc<SecretString>>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Domains the message transport can reach.
    #[serde(default)]
    pub peers: BTreeSet<DomainId>,
    #[serde(default)]
    pub message_base_fee: U256,
    #[serde(default)]
    pub message_fee_per_byte: U256,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_queue_size() -> usize {
    256
}

/// Deterministic address for a protocol-held account, e.g. `"sale_escrow"`.
pub fn protocol_account(label: &str) -> Address {
    Address::from_word(keccak256(format!("fractional_estate.{}", label)))
}

impl NodeConfig {
    /// `ESTATE_CONFIG_JSON` (a full config document) wins; otherwise the
    /// individual `ESTATE_*` variables are read on top of defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg: NodeConfig = match get("ESTATE_CONFIG_JSON") {
            Some(json) => serde_json::from_str(&json).context("ESTATE_CONFIG_JSON is not a valid node config")?,
            None => Self::from_vars(&get)?,
        };
        cfg.callback_secret = secret(&get, "ESTATE_CALLBACK_SECRET");
        cfg.admin_secret = secret(&get, "ESTATE_ADMIN_SECRET");
        cfg.relay_secret = secret(&get, "ESTATE_RELAY_SECRET");
        if cfg.valuation_endpoint.is_some() && cfg.callback_secret.is_none() {
            anyhow::bail!("ESTATE_CALLBACK_SECRET must be set when a valuation endpoint is configured");
        }
        Ok(cfg)
    }

    fn from_vars(get: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let owner = parse_address(get, "ESTATE_OWNER")?.context("ESTATE_OWNER must be set")?;
        let account = |key: &str, label: &str| -> Result<Address> {
            Ok(parse_address(get, key)?.unwrap_or_else(|| protocol_account(label)))
        };

        let mut distribution = DistributionConfig::default();
        if let Some(v) = get("ESTATE_PERFORMANCE_FEE") {
            distribution.apply_performance_fee = v != "0" && v.to_lowercase() != "false";
        }
        let mut oracle = OracleParams::default();
        if let Some(v) = get("ESTATE_ORACLE_JOB_ID") {
            oracle.job_id = v;
        }
        if let Some(v) = get("ESTATE_ORACLE_GAS_LIMIT") {
            oracle.callback_gas_limit = v.parse().context("ESTATE_ORACLE_GAS_LIMIT")?;
        }

        let local_domain = match get("ESTATE_DOMAIN") {
            Some(v) => DomainId(v.parse().context("ESTATE_DOMAIN")?),
            None => DomainId(1),
        };

        let protocol = ProtocolConfig {
            local_domain,
            owner,
            treasury: parse_address(get, "ESTATE_TREASURY")?.unwrap_or(owner),
            sale_escrow: account("ESTATE_SALE_ESCROW", "sale_escrow")?,
            bridge_escrow: account("ESTATE_BRIDGE_ESCROW", "bridge_escrow")?,
            oracle_transport: account("ESTATE_ORACLE_TRANSPORT", "oracle_transport")?,
            message_transport: account("ESTATE_MESSAGE_TRANSPORT", "message_transport")?,
            distribution,
            oracle,
        };

        let mut c = Self {
            protocol,
            admin_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            valuation_endpoint: None,
            callback_url: None,
            callback_secret: None,
            admin_secret: None,
            relay_secret: None,
            scheduler: SchedulerConfig::default(),
            peers: BTreeSet::new(),
            message_base_fee: U256::ZERO,
            message_fee_per_byte: U256::ZERO,
            queue_size: default_queue_size(),
            log_dir: None,
        };
        if let Some(v) = get("ESTATE_ADMIN_ADDR") {
            c.admin_addr = v.parse().context("ESTATE_ADMIN_ADDR")?;
        }
        if let Some(v) = get("ESTATE_VALUATION_URL") {
            c.valuation_endpoint = Some(Url::parse(&v).context("ESTATE_VALUATION_URL")?);
        }
        if let Some(v) = get("ESTATE_CALLBACK_URL") {
            c.callback_url = Some(Url::parse(&v).context("ESTATE_CALLBACK_URL")?);
        }
        if let Some(v) = get("ESTATE_SCHEDULER_TICK_SECS") {
            c.scheduler.tick_secs = v.parse().context("ESTATE_SCHEDULER_TICK_SECS")?;
        }
        if let Some(v) = get("ESTATE_PEERS") {
            for part in v.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                c.peers.insert(DomainId(part.parse().context("ESTATE_PEERS")?));
            }
        }
        if let Some(v) = get("ESTATE_MESSAGE_BASE_FEE") {
            c.message_base_fee = U256::from_str(&v).context("ESTATE_MESSAGE_BASE_FEE")?;
        }
        if let Some(v) = get("ESTATE_MESSAGE_FEE_PER_BYTE") {
            c.message_fee_per_byte = U256::from_str(&v).context("ESTATE_MESSAGE_FEE_PER_BYTE")?;
        }
        if let Some(v) = get("ESTATE_QUEUE_SIZE") {
            c.queue_size = v.parse().context("ESTATE_QUEUE_SIZE")?;
        }
        if let Some(v) = get("ESTATE_LOG_DIR") {
            c.log_dir = Some(PathBuf::from(v));
        }
        Ok(c)
    }

    /// Loopback transport settings: this node's bridge escrow doubles as the
    /// sender identity peers must trust.
    pub fn loopback(&self) -> LoopbackConfig {
        LoopbackConfig {
            local_domain: self.protocol.local_domain,
            local_sender: self.protocol.bridge_escrow,
            base_fee: self.message_base_fee,
            fee_per_byte: self.message_fee_per_byte,
            destinations: self.peers.clone(),
        }
    }
}

fn secret(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Arc<SecretString>> {
    get(key)
        .filter(|s| !s.is_empty())
        .map(|s| Arc::new(SecretString::from(s)))
}

fn parse_address(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Address>> {
    get(key)
        .map(|v| Address::from_str(v.trim()).with_context(|| format!("{} is not an address", key)))
        .transpose()
}

// --- Logging ---

/// Stdout logging filtered by `RUST_LOG` (default `info`), plus a daily
/// rolling file under `log_dir` when given. Keep the guard alive for the
/// lifetime of the process.
pub fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "estate.log"));
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}
