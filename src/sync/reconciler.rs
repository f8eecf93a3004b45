//! Received-funds reconciliation and notice coalescing.
//!
//! Every confirmed incoming transaction folds into an accumulator until the
//! consumer acknowledges the pending notice. Amount accounting is exact, and
//! the sender list is deduplicated in first-seen order. Senders that cannot
//! be derived are counted but contribute no address entry.

use crate::sync::events::ServiceEvent;
use crate::utils::format_value;
use itertools::Itertools;
use tracing::debug;

/// Decimal places used when rendering coin amounts in notices.
pub const COIN_DECIMALS: u32 = 8;

/// Accumulates received funds between acknowledgments and renders the
/// coalesced notice for each event.
#[derive(Debug, Default)]
pub struct WalletReconciler {
    count: u64,
    accumulated_amount: u128,
    sender_addresses: Vec<String>,
}

impl WalletReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one confirmed incoming transaction into the accumulator and
    /// render the combined notice.
    ///
    /// The ticker text describes just this transaction; the summary text
    /// carries the running total and every distinct sender recorded since
    /// the last acknowledgment.
    pub fn record_received(&mut self, sender: Option<String>, amount: u128) -> ServiceEvent {
        self.count += 1;
        self.accumulated_amount = self.accumulated_amount.saturating_add(amount);
        if let Some(sender) = sender {
            if !self.sender_addresses.contains(&sender) {
                self.sender_addresses.push(sender);
            }
        }

        let ticker_text = format!("Received {}", format_value(amount, COIN_DECIMALS));
        let from = if self.sender_addresses.is_empty() {
            "unknown".to_string()
        } else {
            self.sender_addresses.iter().join(", ")
        };
        let summary_text = format!(
            "Received {} from {}",
            format_value(self.accumulated_amount, COIN_DECIMALS),
            from
        );

        debug!(
            count = self.count,
            accumulated = %self.accumulated_amount,
            "recorded received funds"
        );

        ServiceEvent::CoinsReceivedNotice {
            ticker_text,
            summary_text,
            sender_count: self.sender_addresses.len(),
        }
    }

    /// Reset the accumulator once the consumer acknowledged the pending
    /// notice. Idempotent.
    pub fn acknowledge(&mut self) {
        self.count = 0;
        self.accumulated_amount = 0;
        self.sender_addresses.clear();
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn accumulated_amount(&self) -> u128 {
        self.accumulated_amount
    }

    pub fn sender_addresses(&self) -> &[String] {
        &self.sender_addresses
    }
}
