//! Outbound service events and the handler dispatch model.
//!
//! Consumers (notification UI, widget hosts, broadcast transports) register
//! handlers on the [`EventDispatcher`]; the orchestrator dispatches every
//! event to every handler in registration order. Handler errors are logged
//! and contained, so one failing consumer never starves the others.
//!
//! The dispatcher also retains the last peer-state and blockchain-state
//! payloads as sticky values for late-binding consumers; shutdown clears
//! them.

use crate::engine::EngineError;
use crate::sync::chain_state::DownloadStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Errors surfaced by the service and its event handlers
#[derive(Debug, thiserror::Error)]
pub enum SyncServiceError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Handler error: {0}")]
    Handler(String),
}

/// Events dispatched to external consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ServiceEvent {
    /// Authoritative connected-peer count changed. Never throttled.
    PeerStateChanged { num_peers: u32 },
    /// Consolidated chain position together with the current download
    /// impairments.
    BlockchainStateChanged {
        best_chain_date: DateTime<Utc>,
        best_chain_height: u64,
        download: DownloadStatus,
    },
    /// Coalesced received-funds notice.
    CoinsReceivedNotice {
        ticker_text: String,
        summary_text: String,
        sender_count: usize,
    },
    /// Opaque trigger asking widget hosts to refresh.
    WidgetRefreshRequested,
    /// Ongoing connected-indicator level, capped for display. `None` clears
    /// the indicator.
    ConnectedIndicatorChanged { level: Option<u8> },
    /// A recoverable sync problem worth surfacing to the owner.
    SyncErrorReported { error: String, recoverable: bool },
}

/// Trait for handling service events.
///
/// Implementors receive every dispatched event and perform their own side
/// effects (render a notification, refresh a widget, rebroadcast).
#[async_trait::async_trait]
pub trait ServiceEventHandler: Send + Sync {
    /// Handle one dispatched event.
    async fn handle(&mut self, event: &ServiceEvent) -> Result<(), SyncServiceError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
///
/// Handlers are called in the order they are registered for every event.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Box<dyn ServiceEventHandler>>,
    sticky_peer_state: Option<ServiceEvent>,
    sticky_blockchain_state: Option<ServiceEvent>,
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new event handler.
    pub fn register_handler(&mut self, handler: Box<dyn ServiceEventHandler>) {
        self.handlers.push(handler);
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from
    /// running.
    pub async fn dispatch(&mut self, event: &ServiceEvent) -> Result<(), SyncServiceError> {
        match event {
            ServiceEvent::PeerStateChanged { .. } => {
                self.sticky_peer_state = Some(event.clone());
            }
            ServiceEvent::BlockchainStateChanged { .. } => {
                self.sticky_blockchain_state = Some(event.clone());
            }
            _ => {}
        }

        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!("Handler {} failed to process event: {}", handler.name(), e);
                // Continue processing with other handlers
            }
        }
        Ok(())
    }

    /// Last dispatched peer state, for late-binding consumers.
    pub fn sticky_peer_state(&self) -> Option<&ServiceEvent> {
        self.sticky_peer_state.as_ref()
    }

    /// Last dispatched blockchain state, for late-binding consumers.
    pub fn sticky_blockchain_state(&self) -> Option<&ServiceEvent> {
        self.sticky_blockchain_state.as_ref()
    }

    /// Forget the sticky state. Called at service shutdown.
    pub fn clear_sticky(&mut self) {
        self.sticky_peer_state = None;
        self.sticky_blockchain_state = None;
    }
}
