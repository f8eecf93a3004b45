use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, BoxStream};
use tokio::sync::mpsc;
use tracing::info;

use wallet_sync_service::engine::{
    ChainEngine, ChainHead, EngineError, IncomingTransaction, PeerEvent, TransactionInput,
    WalletEvent,
};
use wallet_sync_service::sync::events::{
    EventDispatcher, ServiceEvent, ServiceEventHandler, SyncServiceError,
};
use wallet_sync_service::sync::{ServiceConfig, SyncService};

/// Scripted in-process engine demonstrating the service wiring.
///
/// Peer and wallet events are fed from the script below through channels,
/// standing in for a real chain/wallet engine.
struct DemoEngine {
    head: Mutex<Option<ChainHead>>,
    connected: AtomicBool,
    peer_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    wallet_rx: Mutex<Option<mpsc::UnboundedReceiver<WalletEvent>>>,
}

fn receiver_stream<T: Send + 'static>(
    rx: Option<mpsc::UnboundedReceiver<T>>,
) -> BoxStream<'static, T> {
    match rx {
        Some(rx) => Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })),
        None => Box::pin(stream::pending()),
    }
}

#[async_trait::async_trait]
impl ChainEngine for DemoEngine {
    fn chain_head(&self) -> Option<ChainHead> {
        *self.head.lock().unwrap()
    }

    fn best_chain_height(&self) -> u64 {
        self.head
            .lock()
            .unwrap()
            .map(|head| head.height)
            .unwrap_or(0)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn wallet_is_up_to_date(&self, _threshold_age: Duration) -> bool {
        false
    }

    async fn start(&self) -> Result<(), EngineError> {
        info!("demo engine starting peer discovery");
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        info!("demo engine stopped");
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn request_wallet_resync(&self) -> Result<(), EngineError> {
        info!("demo engine resynchronizing wallet");
        Ok(())
    }

    fn peer_events(&self) -> BoxStream<'static, PeerEvent> {
        receiver_stream(self.peer_rx.lock().unwrap().take())
    }

    fn wallet_events(&self) -> BoxStream<'static, WalletEvent> {
        receiver_stream(self.wallet_rx.lock().unwrap().take())
    }
}

/// Prints every dispatched service event.
struct LoggingHandler;

#[async_trait::async_trait]
impl ServiceEventHandler for LoggingHandler {
    async fn handle(&mut self, event: &ServiceEvent) -> Result<(), SyncServiceError> {
        info!(?event, "service event");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LoggingHandler"
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::DEBUG.into()),
        )
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("Starting wallet sync service demo");

    let (peer_tx, peer_rx) = mpsc::unbounded_channel();
    let (wallet_tx, wallet_rx) = mpsc::unbounded_channel();
    let engine = Arc::new(DemoEngine {
        head: Mutex::new(None),
        connected: AtomicBool::new(false),
        peer_rx: Mutex::new(Some(peer_rx)),
        wallet_rx: Mutex::new(Some(wallet_rx)),
    });

    let mut dispatcher = EventDispatcher::new();
    dispatcher.register_handler(Box::new(LoggingHandler));

    let config = ServiceConfig {
        throttle_window: Duration::from_millis(300),
        indicator_clear_delay: Duration::from_millis(500),
        ..Default::default()
    };
    let throttle_window = config.throttle_window;
    let indicator_clear_delay = config.indicator_clear_delay;

    let handle = SyncService::spawn(engine.clone(), dispatcher, config);

    // Environment comes up: plugged in, network available.
    handle.notify_battery(95, 100, true).await;
    handle
        .notify_connectivity(true, Some("wifi".to_string()))
        .await;

    // Peers connect and a burst of blocks downloads; the burst coalesces
    // into a single chain-state broadcast per throttle window.
    *engine.head.lock().unwrap() = Some(ChainHead {
        timestamp_seconds: 1_700_000_000,
        height: 810_000,
    });
    for peer_count in 1..=3 {
        let _ = peer_tx.send(PeerEvent::Connected { peer_count });
    }
    for blocks_left in (0..10).rev() {
        *engine.head.lock().unwrap() = Some(ChainHead {
            timestamp_seconds: 1_700_000_000 + (10 - blocks_left) * 600,
            height: 810_010 - blocks_left,
        });
        let _ = peer_tx.send(PeerEvent::BlocksDownloaded { blocks_left });
    }
    tokio::time::sleep(throttle_window * 2).await;

    // Incoming funds, one with a sender address and one where the input
    // script exposes none.
    let _ = wallet_tx.send(WalletEvent::CoinsReceived {
        transaction: IncomingTransaction {
            hash: "c0ffee".repeat(10),
            value: 150_000_000,
            inputs: vec![TransactionInput {
                from_address: Some("1BoatSLRHtKNngkdXEeobR76b53LETtpyT".to_string()),
            }],
        },
        previous_balance: 0,
        new_balance: 150_000_000,
    });
    let _ = wallet_tx.send(WalletEvent::CoinsReceived {
        transaction: IncomingTransaction {
            hash: "deadbeef".repeat(8),
            value: 25_000,
            inputs: Vec::new(),
        },
        previous_balance: 150_000_000,
        new_balance: 150_025_000,
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle.acknowledge_coins_received().await;

    // Storage runs low: sync degrades but the engine keeps running.
    handle.notify_storage_low(true).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle.shutdown().await;

    // Wait out the grace period to observe the delayed indicator clear.
    tokio::time::sleep(indicator_clear_delay * 2).await;

    info!("Demo complete");
}
