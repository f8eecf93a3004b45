//! Core service for synchronizing a wallet against a peer-to-peer
//! blockchain.
//!
//! The crate orchestrates an external chain/wallet engine: it gates network
//! activity on device resources (connectivity, power, storage), tracks the
//! best-chain position and peer activity, coalesces received-funds notices,
//! and publishes a single consistent, rate-limited stream of service events
//! to registered consumers.
//!
//! The underlying engine (peer protocol, validation, keys) is out of scope
//! and reached through the [`engine::ChainEngine`] trait.

pub mod engine;
pub mod sync;
pub mod utils;
