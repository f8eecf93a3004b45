//! Event and snapshot types exchanged with the underlying engine.

use serde::{Deserialize, Serialize};

/// Snapshot of the best-chain head.
///
/// Produced by the engine and replaced wholesale on every new best block;
/// there is no identity beyond the height/timestamp pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    /// Block timestamp in seconds since the Unix epoch.
    pub timestamp_seconds: u64,
    /// Height of the head block.
    pub height: u64,
}

/// Peer network events emitted by the engine while syncing
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A peer connection was established; `peer_count` is the new total.
    Connected { peer_count: u32 },
    /// A peer connection was lost; `peer_count` is the new total.
    Disconnected { peer_count: u32 },
    /// A block finished downloading; `blocks_left` remain in this batch.
    BlocksDownloaded { blocks_left: u64 },
}

/// Wallet events emitted by the engine
#[derive(Debug, Clone)]
pub enum WalletEvent {
    /// A confirmed transaction credited the wallet.
    ///
    /// Emitted exactly once per balance-changing incoming transaction.
    CoinsReceived {
        transaction: IncomingTransaction,
        previous_balance: u128,
        new_balance: u128,
    },
}

/// A confirmed incoming transaction as reported by the engine.
#[derive(Debug, Clone)]
pub struct IncomingTransaction {
    /// The transaction hash.
    pub hash: String,
    /// Net value credited to the wallet.
    pub value: u128,
    /// Transaction inputs in wire order.
    pub inputs: Vec<TransactionInput>,
}

/// A single transaction input.
#[derive(Debug, Clone)]
pub struct TransactionInput {
    /// Sender address recovered from the input script, when the script is
    /// standard enough to expose one.
    pub from_address: Option<String>,
}

impl IncomingTransaction {
    /// Derive the sender address from the first input.
    ///
    /// Fails structurally when the transaction carries no inputs or the input
    /// script exposes no address; callers record the event without a sender
    /// in that case instead of aborting the receive pipeline.
    pub fn sender_address(&self) -> Result<&str, AddressExtractionError> {
        let input = self
            .inputs
            .first()
            .ok_or_else(|| AddressExtractionError::MissingInputs(self.hash.clone()))?;

        input
            .from_address
            .as_deref()
            .ok_or_else(|| AddressExtractionError::NonstandardInputScript(self.hash.clone()))
    }
}

/// Structural failures while deriving a sender address from a transaction
#[derive(Debug, thiserror::Error)]
pub enum AddressExtractionError {
    #[error("Transaction {0} has no inputs")]
    MissingInputs(String),

    #[error("Input script of transaction {0} does not expose a sender address")]
    NonstandardInputScript(String),
}
