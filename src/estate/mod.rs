// ─── Core accounting (pure, synchronous) ───
pub mod access;
pub mod fees;
pub mod registry;
pub mod shares;
pub mod types;

// ─── Yield, valuation and cross-domain state machines ───
pub mod bridge;
pub mod distribution;
pub mod oracle;

// ─── Façade, errors, collaborator interfaces ───
pub mod clock;
pub mod error;
pub mod messages;
pub mod protocol;
pub mod transport;

// ─── Async runtime: single-writer node + scheduler ───
pub mod node;
pub mod scheduler;
