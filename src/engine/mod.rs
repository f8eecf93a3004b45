//! Interface to the underlying blockchain/wallet engine.
//!
//! The engine owns the peer network, chain validation, and wallet key
//! management; this crate only orchestrates it. Queries are synchronous
//! snapshots of engine state, start/stop are async, and peer/wallet activity
//! arrives on event streams subscribed per listener.

/// Event and snapshot types shared with the engine
pub mod types;

pub use types::*;

use futures::stream::BoxStream;
use std::time::Duration;

/// Errors reported by the underlying engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine failed to start: {0}")]
    StartFailed(String),

    #[error("Wallet resync failed: {0}")]
    ResyncFailed(String),
}

/// Handle to the underlying blockchain/wallet engine.
///
/// The orchestrator owns one engine handle for its whole lifetime. Event
/// streams are independent subscriptions: the wallet stream is held for the
/// service lifetime, the peer stream is attached on the first healthy
/// resource transition and dropped again at shutdown.
#[async_trait::async_trait]
pub trait ChainEngine: Send + Sync {
    /// Current best-chain head, if the engine knows one yet.
    fn chain_head(&self) -> Option<ChainHead>;

    /// Height of the current best chain.
    fn best_chain_height(&self) -> u64;

    /// Whether the engine is currently connected to the peer network.
    fn is_connected(&self) -> bool;

    /// Whether the wallet was synchronized within `threshold_age`.
    fn wallet_is_up_to_date(&self, threshold_age: Duration) -> bool;

    /// Start peer network activity.
    async fn start(&self) -> Result<(), EngineError>;

    /// Stop peer network activity.
    async fn stop(&self);

    /// Ask the engine to re-synchronize wallet state from its backend.
    async fn request_wallet_resync(&self) -> Result<(), EngineError>;

    /// Subscribe to peer connect/disconnect and block-download events.
    fn peer_events(&self) -> BoxStream<'static, PeerEvent>;

    /// Subscribe to balance-changing wallet events.
    fn wallet_events(&self) -> BoxStream<'static, WalletEvent>;
}
