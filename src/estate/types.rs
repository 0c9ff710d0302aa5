use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────
// Protocol constants
// ─────────────────────────────────────────────────────────

/// Fixed number of shares every asset is split into.
pub const TOTAL_SHARES: u64 = 10_000;

/// Initial allocation at asset creation: 10% beneficiary, 3% treasury, 87% public sale.
pub const BENEFICIARY_SHARES: u64 = 1_000;
pub const TREASURY_SHARES: u64 = 300;
pub const SALE_SHARES: u64 = TOTAL_SHARES - BENEFICIARY_SHARES - TREASURY_SHARES;

/// Minimum spacing between scheduled distributions (30 days).
pub const DISTRIBUTION_PERIOD_SECS: u64 = 30 * 24 * 60 * 60;

// ─────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────

/// Asset identifier, unique across domains: the originating domain sits in
/// the high 32 bits and that domain's creation sequence in the low 32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub u64);

impl AssetId {
    pub const fn new(origin: DomainId, index: u32) -> Self {
        AssetId(((origin.0 as u64) << 32) | index as u64)
    }

    /// Domain whose registry created the asset and minted its supply.
    pub const fn origin(self) -> DomainId {
        DomainId((self.0 >> 32) as u32)
    }

    pub const fn index(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.origin().0, self.index())
    }
}

/// Accepts `origin.index` (optionally `#`-prefixed) or the raw packed id.
impl FromStr for AssetId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('#');
        match s.split_once('.') {
            Some((origin, index)) => Ok(AssetId::new(DomainId(origin.parse()?), index.parse()?)),
            None => Ok(AssetId(s.parse()?)),
        }
    }
}

/// Identifier of an independent ledger participating in cross-domain transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(pub u32);

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain:{}", self.0)
    }
}

/// Links a valuation request to its single terminal response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub B256);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&short_hex(&self.0))
    }
}

/// Transport-assigned identifier of a cross-domain message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub B256);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&short_hex(&self.0))
    }
}

/// `0x1a2b3c4d…` rendering used in logs.
pub fn short_hex(id: &B256) -> String {
    format!("0x{}…", hex::encode(&id.as_slice()[..4]))
}

// ─────────────────────────────────────────────────────────
// Asset descriptors
// ─────────────────────────────────────────────────────────

/// Where the asset physically is. Forwarded verbatim to the valuation source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationDescriptors {
    pub country: String,
    pub city: String,
    pub address_line: String,
    /// "lat,lon" as supplied by the originator.
    pub coordinates: String,
}

impl LocationDescriptors {
    /// Nothing a valuation source could locate the asset by.
    pub fn is_empty(&self) -> bool {
        [&self.country, &self.city, &self.address_line]
            .iter()
            .all(|s| s.trim().is_empty())
    }
}
