//! Sync orchestrator: the single owner of all mutable sync state.
//!
//! This module defines the `SyncService`, which composes the resource gate,
//! peer activity tracker, and wallet reconciler into one event-processing
//! task. Engine callbacks, environment signals, and consumer commands all
//! marshal into that task through channels and streams, so every mutation of
//! shared state is serialized by construction.
//!
//! The orchestrator is responsible for:
//! - Starting the engine on a healthy resource transition and requesting a
//!   wallet resync when the wallet state is stale
//! - Attaching the engine's peer listener exactly once per healthy
//!   transition and detaching it exactly once at shutdown
//! - Coalescing block-download progress into throttled chain-state
//!   broadcasts, and republishing consolidated state on every resource check
//! - Tearing down deterministically, leaving only the delayed
//!   connected-indicator clear behind
//!
//! Start/stop policy is deliberately asymmetric: partial resource loss only
//! degrades the download-status mask, it never stops the engine. The engine
//! is stopped at shutdown alone.

use crate::engine::{ChainEngine, PeerEvent, WalletEvent};
use crate::sync::chain_state::{ChainStateSnapshot, DownloadStatus};
use crate::sync::events::{EventDispatcher, ServiceEvent};
use crate::sync::peer_tracker::{PeerActivityTracker, ThrottleDecision};
use crate::sync::reconciler::WalletReconciler;
use crate::sync::resource_gate::ResourceGate;

use futures::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Configuration for the sync service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Minimum spacing between throttled blockchain-state broadcasts.
    pub throttle_window: Duration,
    /// Wallet age beyond which a resync is requested on a healthy check.
    pub wallet_freshness_threshold: Duration,
    /// Grace period before the connected indicator is cleared after
    /// shutdown, so quick restarts do not flicker.
    pub indicator_clear_delay: Duration,
    /// Cap for the connected-indicator display level.
    pub max_indicator_level: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            throttle_window: Duration::from_secs(2),
            wallet_freshness_threshold: Duration::from_secs(15 * 60),
            indicator_clear_delay: Duration::from_secs(5),
            max_indicator_level: 4,
        }
    }
}

/// Device environment signals the service subscribes to.
#[derive(Debug, Clone)]
pub enum EnvironmentEvent {
    ConnectivityChanged {
        connected: bool,
        reason: Option<String>,
    },
    BatteryChanged {
        level: i32,
        scale: i32,
        plugged_in: bool,
    },
    StorageLow {
        low: bool,
    },
}

/// Lifecycle of the orchestrator.
///
/// `Stopped -> Starting -> Running` on a healthy resource transition;
/// `ShutDown` is terminal. Partial resource loss never leaves `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    /// Engine not started; waiting for resources to become healthy.
    Stopped,
    /// Engine start in flight.
    Starting,
    /// Engine started; events flowing.
    Running,
    /// Terminal; listeners detached and engine stopped.
    ShutDown,
}

enum Command {
    AcknowledgeCoinsReceived,
    Shutdown,
}

/// Owning handle to a spawned sync service.
///
/// Environment notifications and commands are forwarded into the service
/// task; dropping the handle without calling [`shutdown`](Self::shutdown)
/// shuts the service down as well, but without waiting for teardown.
pub struct SyncServiceHandle {
    env_tx: mpsc::Sender<EnvironmentEvent>,
    cmd_tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl SyncServiceHandle {
    /// Forward a connectivity change from the environment.
    pub async fn notify_connectivity(&self, connected: bool, reason: Option<String>) {
        let _ = self
            .env_tx
            .send(EnvironmentEvent::ConnectivityChanged { connected, reason })
            .await;
    }

    /// Forward a battery change from the environment.
    pub async fn notify_battery(&self, level: i32, scale: i32, plugged_in: bool) {
        let _ = self
            .env_tx
            .send(EnvironmentEvent::BatteryChanged {
                level,
                scale,
                plugged_in,
            })
            .await;
    }

    /// Forward a low-storage signal (or its recovery) from the environment.
    pub async fn notify_storage_low(&self, low: bool) {
        let _ = self
            .env_tx
            .send(EnvironmentEvent::StorageLow { low })
            .await;
    }

    /// The consumer dismissed the received-funds notice; reset the
    /// accumulator.
    pub async fn acknowledge_coins_received(&self) {
        let _ = self.cmd_tx.send(Command::AcknowledgeCoinsReceived).await;
    }

    /// Stop the service: detach listeners, stop the engine, cancel pending
    /// deferred work, and schedule the delayed indicator clear.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            error!("sync service task ended abnormally: {e}");
        }
    }
}

/// The sync service event loop.
///
/// All fields are owned by the loop task; nothing outside it ever touches
/// them.
pub struct SyncService {
    engine: Arc<dyn ChainEngine>,
    dispatcher: EventDispatcher,
    config: ServiceConfig,
    state: ServiceState,
    gate: ResourceGate,
    peer_tracker: PeerActivityTracker,
    reconciler: WalletReconciler,
    peer_events: Option<BoxStream<'static, PeerEvent>>,
    wallet_events: Option<BoxStream<'static, WalletEvent>>,
    resync_task: Option<JoinHandle<()>>,
}

impl SyncService {
    /// Spawn the service event loop and return its handle.
    ///
    /// Handlers must already be registered on `dispatcher`. The wallet-event
    /// listener is attached immediately and held for the service lifetime;
    /// the peer-event listener is attached on the first healthy resource
    /// transition.
    pub fn spawn(
        engine: Arc<dyn ChainEngine>,
        dispatcher: EventDispatcher,
        config: ServiceConfig,
    ) -> SyncServiceHandle {
        let (env_tx, env_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let wallet_events = Some(engine.wallet_events());
        let peer_tracker = PeerActivityTracker::new(
            config.throttle_window,
            config.max_indicator_level,
            Instant::now(),
        );

        let service = SyncService {
            engine,
            dispatcher,
            config,
            state: ServiceState::Stopped,
            gate: ResourceGate::new(),
            peer_tracker,
            reconciler: WalletReconciler::new(),
            peer_events: None,
            wallet_events,
            resync_task: None,
        };

        let task = tokio::spawn(service.run(env_rx, cmd_rx));

        SyncServiceHandle {
            env_tx,
            cmd_tx,
            task,
        }
    }

    async fn run(
        mut self,
        mut env_rx: mpsc::Receiver<EnvironmentEvent>,
        mut cmd_rx: mpsc::Receiver<Command>,
    ) {
        info!("sync service started");

        // Seed the sticky peer-state broadcast.
        self.dispatch(ServiceEvent::PeerStateChanged { num_peers: 0 })
            .await;

        loop {
            let deadline = self.peer_tracker.pending_deadline();

            tokio::select! {
                event = Self::next_event(&mut self.wallet_events) => match event {
                    Some(event) => self.handle_wallet_event(event).await,
                    None => {
                        debug!("wallet event stream ended");
                        self.wallet_events = None;
                    }
                },
                event = Self::next_event(&mut self.peer_events) => match event {
                    Some(event) => self.handle_peer_event(event).await,
                    None => {
                        debug!("peer event stream ended");
                        self.peer_events = None;
                    }
                },
                Some(event) = env_rx.recv() => self.handle_environment_event(event).await,
                command = cmd_rx.recv() => match command {
                    Some(Command::AcknowledgeCoinsReceived) => {
                        debug!("received-funds notice acknowledged");
                        self.reconciler.acknowledge();
                    }
                    Some(Command::Shutdown) | None => {
                        self.shutdown().await;
                        return;
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                        if deadline.is_some() => {
                    self.peer_tracker.mark_emitted(Instant::now());
                    self.publish_chain_state().await;
                }
            }
        }
    }

    async fn next_event<T>(stream: &mut Option<BoxStream<'static, T>>) -> Option<T> {
        match stream {
            Some(stream) => stream.next().await,
            None => std::future::pending().await,
        }
    }

    async fn handle_wallet_event(&mut self, event: WalletEvent) {
        match event {
            WalletEvent::CoinsReceived {
                transaction,
                previous_balance,
                new_balance,
            } => {
                debug!(
                    hash = %transaction.hash,
                    previous_balance = %previous_balance,
                    new_balance = %new_balance,
                    "coins received"
                );

                let sender = match transaction.sender_address() {
                    Ok(address) => Some(address.to_owned()),
                    Err(e) => {
                        // Structural failure; record the event without a
                        // sender rather than dropping the notice.
                        debug!("could not derive sender address: {e}");
                        None
                    }
                };

                let notice = self.reconciler.record_received(sender, transaction.value);
                self.dispatch(notice).await;
                self.dispatch(ServiceEvent::WidgetRefreshRequested).await;
            }
        }
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Connected { peer_count } | PeerEvent::Disconnected { peer_count } => {
                self.peer_count_changed(peer_count).await;
            }
            PeerEvent::BlocksDownloaded { blocks_left } => {
                debug!(blocks_left, "block downloaded");
                match self.peer_tracker.on_block_downloaded(Instant::now()) {
                    ThrottleDecision::EmitNow => {
                        self.peer_tracker.mark_emitted(Instant::now());
                        self.publish_chain_state().await;
                    }
                    ThrottleDecision::Deferred(_) => {}
                }
            }
        }
    }

    /// Peer connects and disconnects route here. Count zero clears the
    /// connected indicator; peer-count broadcasts are never throttled.
    async fn peer_count_changed(&mut self, peer_count: u32) {
        let level = self.peer_tracker.indicator_level(peer_count);
        if level.is_none() {
            debug!("peer count dropped to zero, clearing connected indicator");
        }
        self.dispatch(ServiceEvent::ConnectedIndicatorChanged { level })
            .await;
        self.dispatch(ServiceEvent::PeerStateChanged {
            num_peers: peer_count,
        })
        .await;
    }

    async fn handle_environment_event(&mut self, event: EnvironmentEvent) {
        match event {
            EnvironmentEvent::ConnectivityChanged { connected, reason } => {
                info!(
                    connected,
                    reason = reason.as_deref().unwrap_or("unspecified"),
                    "network connectivity changed"
                );
                self.gate.on_connectivity_changed(connected);
            }
            EnvironmentEvent::BatteryChanged {
                level,
                scale,
                plugged_in,
            } => {
                debug!(level, scale, plugged_in, "battery changed");
                self.gate.on_power_changed(level, scale, plugged_in);
            }
            EnvironmentEvent::StorageLow { low } => {
                info!(low, "device storage signal");
                self.gate.on_storage_low(low);
            }
        }

        self.check().await;
    }

    /// One resource check cycle: start the engine when everything is
    /// available, then republish the consolidated chain state regardless of
    /// health so consumers always see the latest known position together
    /// with the reason sync may be impaired.
    async fn check(&mut self) {
        if self.gate.is_healthy() {
            self.attach_peer_listener();

            if !self
                .engine
                .wallet_is_up_to_date(self.config.wallet_freshness_threshold)
            {
                info!("wallet state is stale, requesting resync");
                let engine = Arc::clone(&self.engine);
                self.resync_task = Some(tokio::spawn(async move {
                    if let Err(e) = engine.request_wallet_resync().await {
                        warn!("wallet resync request failed: {e}");
                    }
                }));
            }

            if !self.engine.is_connected() {
                self.transition(ServiceState::Starting);
                match self.engine.start().await {
                    Ok(()) => {
                        self.transition(ServiceState::Running);
                        info!("engine started");
                    }
                    Err(e) => {
                        self.transition(ServiceState::Stopped);
                        error!("engine failed to start: {e}");
                        self.dispatch(ServiceEvent::SyncErrorReported {
                            error: e.to_string(),
                            recoverable: true,
                        })
                        .await;
                    }
                }
            } else if self.state != ServiceState::Running {
                self.transition(ServiceState::Running);
            }
        }

        self.publish_chain_state().await;
    }

    fn transition(&mut self, next: ServiceState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "service state transition");
            self.state = next;
        }
    }

    /// Idempotent: a second healthy transition must not duplicate event
    /// delivery.
    fn attach_peer_listener(&mut self) {
        if self.peer_events.is_none() {
            debug!("attaching peer event listener");
            self.peer_events = Some(self.engine.peer_events());
        }
    }

    async fn publish_chain_state(&mut self) {
        let download = DownloadStatus::from_resources(&self.gate.state());
        if let Some(snapshot) = ChainStateSnapshot::observe(self.engine.as_ref(), download) {
            debug!(
                height = snapshot.best_chain_height,
                download = %snapshot.download,
                "publishing chain state"
            );
            self.dispatch(ServiceEvent::BlockchainStateChanged {
                best_chain_date: snapshot.best_chain_date,
                best_chain_height: snapshot.best_chain_height,
                download: snapshot.download,
            })
            .await;
        }
    }

    async fn shutdown(&mut self) {
        info!("shutting down sync service");
        self.transition(ServiceState::ShutDown);

        // Detach both listeners; paired with their attach.
        self.peer_events = None;
        self.wallet_events = None;

        self.peer_tracker.cancel_pending();
        if let Some(resync) = self.resync_task.take() {
            resync.abort();
        }

        self.engine.stop().await;
        self.dispatcher.clear_sticky();

        // The one timer allowed to outlive shutdown: clear the connected
        // indicator after a grace period so quick restarts do not flicker.
        let delay = self.config.indicator_clear_delay;
        let mut dispatcher = std::mem::take(&mut self.dispatcher);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = dispatcher
                .dispatch(&ServiceEvent::ConnectedIndicatorChanged { level: None })
                .await
            {
                error!("failed to dispatch indicator clear: {e}");
            }
        });
    }

    async fn dispatch(&mut self, event: ServiceEvent) {
        if let Err(e) = self.dispatcher.dispatch(&event).await {
            error!("failed to dispatch service event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ChainHead, EngineError, IncomingTransaction, TransactionInput};
    use crate::sync::events::{ServiceEventHandler, SyncServiceError};
    use futures::stream;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockEngine {
        head: StdMutex<Option<ChainHead>>,
        connected: AtomicBool,
        wallet_fresh: AtomicBool,
        fail_start: AtomicBool,
        start_calls: AtomicUsize,
        stop_calls: AtomicUsize,
        resync_calls: AtomicUsize,
        peer_rx: StdMutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
        wallet_rx: StdMutex<Option<mpsc::UnboundedReceiver<WalletEvent>>>,
    }

    struct MockHandles {
        engine: Arc<MockEngine>,
        peer_tx: mpsc::UnboundedSender<PeerEvent>,
        wallet_tx: mpsc::UnboundedSender<WalletEvent>,
    }

    fn mock_engine() -> MockHandles {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (wallet_tx, wallet_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(MockEngine {
            head: StdMutex::new(None),
            connected: AtomicBool::new(false),
            wallet_fresh: AtomicBool::new(true),
            fail_start: AtomicBool::new(false),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            resync_calls: AtomicUsize::new(0),
            peer_rx: StdMutex::new(Some(peer_rx)),
            wallet_rx: StdMutex::new(Some(wallet_rx)),
        });
        MockHandles {
            engine,
            peer_tx,
            wallet_tx,
        }
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
    impl ChainEngine for MockEngine {
        fn chain_head(&self) -> Option<ChainHead> {
            *self.head.lock().unwrap()
        }

        fn best_chain_height(&self) -> u64 {
            self.head.lock().unwrap().map(|head| head.height).unwrap_or(0)
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn wallet_is_up_to_date(&self, _threshold_age: Duration) -> bool {
            self.wallet_fresh.load(Ordering::SeqCst)
        }

        async fn start(&self) -> Result<(), EngineError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(EngineError::StartFailed("no usable peers".to_string()));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
        }

        async fn request_wallet_resync(&self) -> Result<(), EngineError> {
            self.resync_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn peer_events(&self) -> BoxStream<'static, PeerEvent> {
            receiver_stream(self.peer_rx.lock().unwrap().take())
        }

        fn wallet_events(&self) -> BoxStream<'static, WalletEvent> {
            receiver_stream(self.wallet_rx.lock().unwrap().take())
        }
    }

    struct RecordingHandler {
        events: Arc<StdMutex<Vec<ServiceEvent>>>,
    }

    #[async_trait::async_trait]
    impl ServiceEventHandler for RecordingHandler {
        async fn handle(&mut self, event: &ServiceEvent) -> Result<(), SyncServiceError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "RecordingHandler"
        }
    }

    fn recording_dispatcher() -> (EventDispatcher, Arc<StdMutex<Vec<ServiceEvent>>>) {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(Box::new(RecordingHandler {
            events: events.clone(),
        }));
        (dispatcher, events)
    }

    /// Let the service task drain its queues. The clock is paused, so this
    /// only advances virtual time.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn make_healthy(handle: &SyncServiceHandle) {
        handle.notify_battery(90, 100, true).await;
        handle.notify_connectivity(true, None).await;
        settle().await;
    }

    fn coins_received(sender: Option<&str>, value: u128) -> WalletEvent {
        let inputs = match sender {
            Some(address) => vec![TransactionInput {
                from_address: Some(address.to_string()),
            }],
            None => Vec::new(),
        };
        WalletEvent::CoinsReceived {
            transaction: IncomingTransaction {
                hash: format!("{value:064x}"),
                value,
                inputs,
            },
            previous_balance: 0,
            new_balance: value,
        }
    }

    fn blockchain_states(events: &[ServiceEvent]) -> Vec<(u64, DownloadStatus)> {
        events
            .iter()
            .filter_map(|event| match event {
                ServiceEvent::BlockchainStateChanged {
                    best_chain_height,
                    download,
                    ..
                } => Some((*best_chain_height, *download)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_transition_starts_engine_exactly_once() {
        let mocks = mock_engine();
        let (dispatcher, _events) = recording_dispatcher();
        let handle = SyncService::spawn(
            mocks.engine.clone(),
            dispatcher,
            ServiceConfig::default(),
        );

        handle.notify_battery(90, 100, true).await;
        handle.notify_connectivity(false, None).await;
        settle().await;
        assert_eq!(mocks.engine.start_calls.load(Ordering::SeqCst), 0);

        handle
            .notify_connectivity(true, Some("wifi".to_string()))
            .await;
        settle().await;
        assert_eq!(mocks.engine.start_calls.load(Ordering::SeqCst), 1);

        // Further checks while connected must not start the engine again.
        handle.notify_battery(80, 100, true).await;
        settle().await;
        assert_eq!(mocks.engine.start_calls.load(Ordering::SeqCst), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_wallet_triggers_a_resync_request() {
        let mocks = mock_engine();
        mocks.engine.wallet_fresh.store(false, Ordering::SeqCst);
        let (dispatcher, _events) = recording_dispatcher();
        let handle = SyncService::spawn(
            mocks.engine.clone(),
            dispatcher,
            ServiceConfig::default(),
        );

        make_healthy(&handle).await;
        assert_eq!(mocks.engine.resync_calls.load(Ordering::SeqCst), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_wallet_is_not_resynced() {
        let mocks = mock_engine();
        let (dispatcher, _events) = recording_dispatcher();
        let handle = SyncService::spawn(
            mocks.engine.clone(),
            dispatcher,
            ServiceConfig::default(),
        );

        make_healthy(&handle).await;
        assert_eq!(mocks.engine.resync_calls.load(Ordering::SeqCst), 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_leaves_the_service_stopped_and_retryable() {
        let mocks = mock_engine();
        mocks.engine.fail_start.store(true, Ordering::SeqCst);
        let (dispatcher, events) = recording_dispatcher();
        let handle = SyncService::spawn(
            mocks.engine.clone(),
            dispatcher,
            ServiceConfig::default(),
        );

        make_healthy(&handle).await;
        assert_eq!(mocks.engine.start_calls.load(Ordering::SeqCst), 1);
        assert!(!mocks.engine.is_connected());
        assert!(events.lock().unwrap().iter().any(|event| matches!(
            event,
            ServiceEvent::SyncErrorReported { recoverable: true, .. }
        )));

        // The next check retries the start.
        mocks.engine.fail_start.store(false, Ordering::SeqCst);
        handle.notify_battery(85, 100, true).await;
        settle().await;
        assert_eq!(mocks.engine.start_calls.load(Ordering::SeqCst), 2);
        assert!(mocks.engine.is_connected());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn peer_transitions_update_indicator_and_broadcast_in_order() {
        let mocks = mock_engine();
        let (dispatcher, events) = recording_dispatcher();
        let handle = SyncService::spawn(
            mocks.engine.clone(),
            dispatcher,
            ServiceConfig::default(),
        );

        make_healthy(&handle).await;
        for event in [
            PeerEvent::Connected { peer_count: 1 },
            PeerEvent::Connected { peer_count: 2 },
            PeerEvent::Connected { peer_count: 7 },
            PeerEvent::Disconnected { peer_count: 0 },
        ] {
            mocks.peer_tx.send(event).unwrap();
        }
        settle().await;

        let events = events.lock().unwrap();
        let peer_counts: Vec<u32> = events
            .iter()
            .filter_map(|event| match event {
                ServiceEvent::PeerStateChanged { num_peers } => Some(*num_peers),
                _ => None,
            })
            .collect();
        // The leading zero is the sticky seed dispatched at startup.
        assert_eq!(peer_counts, [0, 1, 2, 7, 0]);

        let levels: Vec<Option<u8>> = events
            .iter()
            .filter_map(|event| match event {
                ServiceEvent::ConnectedIndicatorChanged { level } => Some(*level),
                _ => None,
            })
            .collect();
        assert_eq!(levels, [Some(1), Some(2), Some(4), None]);

        drop(events);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn block_download_burst_coalesces_into_one_broadcast() {
        let mocks = mock_engine();
        let (dispatcher, events) = recording_dispatcher();
        let config = ServiceConfig::default();
        let window = config.throttle_window;
        let handle = SyncService::spawn(mocks.engine.clone(), dispatcher, config);

        // No chain head during the environment phase, so the resource checks
        // publish nothing and the throttled path is observed in isolation.
        make_healthy(&handle).await;
        assert!(blockchain_states(&events.lock().unwrap()).is_empty());

        *mocks.engine.head.lock().unwrap() = Some(ChainHead {
            timestamp_seconds: 1_700_000_000,
            height: 100,
        });
        mocks
            .peer_tx
            .send(PeerEvent::BlocksDownloaded { blocks_left: 5 })
            .unwrap();
        settle().await;

        tokio::time::advance(window / 10).await;
        *mocks.engine.head.lock().unwrap() = Some(ChainHead {
            timestamp_seconds: 1_700_000_600,
            height: 102,
        });
        mocks
            .peer_tx
            .send(PeerEvent::BlocksDownloaded { blocks_left: 3 })
            .unwrap();
        settle().await;

        // Nothing may be emitted before the window has elapsed.
        assert!(blockchain_states(&events.lock().unwrap()).is_empty());

        tokio::time::sleep(window * 2).await;
        let states = blockchain_states(&events.lock().unwrap());
        // Exactly one emission, reflecting the latest head, not the first.
        assert_eq!(states, [(102, DownloadStatus::OK)]);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_block_download_is_broadcast_immediately() {
        let mocks = mock_engine();
        let (dispatcher, events) = recording_dispatcher();
        let config = ServiceConfig::default();
        let window = config.throttle_window;
        let handle = SyncService::spawn(mocks.engine.clone(), dispatcher, config);

        make_healthy(&handle).await;
        *mocks.engine.head.lock().unwrap() = Some(ChainHead {
            timestamp_seconds: 1_700_000_000,
            height: 100,
        });

        tokio::time::sleep(window * 2).await;
        mocks
            .peer_tx
            .send(PeerEvent::BlocksDownloaded { blocks_left: 0 })
            .unwrap();
        settle().await;

        assert_eq!(
            blockchain_states(&events.lock().unwrap()),
            [(100, DownloadStatus::OK)]
        );

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_resources_republish_state_without_stopping_the_engine() {
        let mocks = mock_engine();
        let (dispatcher, events) = recording_dispatcher();
        let handle = SyncService::spawn(
            mocks.engine.clone(),
            dispatcher,
            ServiceConfig::default(),
        );

        *mocks.engine.head.lock().unwrap() = Some(ChainHead {
            timestamp_seconds: 1_700_000_000,
            height: 500,
        });
        make_healthy(&handle).await;

        handle.notify_storage_low(true).await;
        settle().await;

        let states = blockchain_states(&events.lock().unwrap());
        assert_eq!(states.last(), Some(&(500, DownloadStatus::STORAGE_PROBLEM)));
        // Partial resource loss never stops the engine.
        assert_eq!(mocks.engine.stop_calls.load(Ordering::SeqCst), 0);
        assert!(mocks.engine.is_connected());

        handle.notify_connectivity(false, None).await;
        settle().await;
        let states = blockchain_states(&events.lock().unwrap());
        assert_eq!(
            states.last(),
            Some(&(
                500,
                DownloadStatus::STORAGE_PROBLEM | DownloadStatus::NETWORK_PROBLEM
            ))
        );

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn coins_received_flows_regardless_of_resource_health() {
        let mocks = mock_engine();
        let (dispatcher, events) = recording_dispatcher();
        let handle = SyncService::spawn(
            mocks.engine.clone(),
            dispatcher,
            ServiceConfig::default(),
        );

        // No environment events at all: the wallet listener is attached for
        // the whole service lifetime.
        mocks
            .wallet_tx
            .send(coins_received(Some("addressA"), 500))
            .unwrap();
        mocks
            .wallet_tx
            .send(coins_received(Some("addressA"), 300))
            .unwrap();
        mocks.wallet_tx.send(coins_received(None, 200)).unwrap();
        settle().await;

        let recorded = events.lock().unwrap();
        let notices: Vec<(String, String, usize)> = recorded
            .iter()
            .filter_map(|event| match event {
                ServiceEvent::CoinsReceivedNotice {
                    ticker_text,
                    summary_text,
                    sender_count,
                } => Some((ticker_text.clone(), summary_text.clone(), *sender_count)),
                _ => None,
            })
            .collect();
        assert_eq!(notices.len(), 3);

        let (ticker, summary, sender_count) = &notices[2];
        assert_eq!(ticker, "Received 0.00000200");
        assert_eq!(summary.matches("addressA").count(), 1);
        assert!(summary.contains("0.00001000"));
        assert_eq!(*sender_count, 1);

        // Every notice is followed by a widget refresh request.
        let refreshes = recorded
            .iter()
            .filter(|event| matches!(event, ServiceEvent::WidgetRefreshRequested))
            .count();
        assert_eq!(refreshes, 3);

        drop(recorded);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledge_resets_the_accumulated_notice() {
        let mocks = mock_engine();
        let (dispatcher, events) = recording_dispatcher();
        let handle = SyncService::spawn(
            mocks.engine.clone(),
            dispatcher,
            ServiceConfig::default(),
        );

        mocks
            .wallet_tx
            .send(coins_received(Some("addressA"), 500))
            .unwrap();
        settle().await;

        handle.acknowledge_coins_received().await;
        settle().await;

        mocks
            .wallet_tx
            .send(coins_received(Some("addressB"), 100))
            .unwrap();
        settle().await;

        let recorded = events.lock().unwrap();
        let last_summary = recorded
            .iter()
            .rev()
            .find_map(|event| match event {
                ServiceEvent::CoinsReceivedNotice { summary_text, .. } => {
                    Some(summary_text.clone())
                }
                _ => None,
            })
            .unwrap();
        assert!(last_summary.contains("addressB"));
        assert!(!last_summary.contains("addressA"));
        assert!(last_summary.contains("0.00000100"));

        drop(recorded);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_emits_only_the_single_delayed_indicator_clear() {
        let mocks = mock_engine();
        let (dispatcher, events) = recording_dispatcher();
        let config = ServiceConfig::default();
        let clear_delay = config.indicator_clear_delay;
        let handle = SyncService::spawn(mocks.engine.clone(), dispatcher, config);

        make_healthy(&handle).await;
        mocks
            .peer_tx
            .send(PeerEvent::Connected { peer_count: 1 })
            .unwrap();
        settle().await;

        handle.shutdown().await;
        assert_eq!(mocks.engine.stop_calls.load(Ordering::SeqCst), 1);
        let after_shutdown = events.lock().unwrap().len();

        // Detached listeners: the engine-side senders observe the drop.
        assert!(
            mocks
                .peer_tx
                .send(PeerEvent::Connected { peer_count: 2 })
                .is_err()
        );

        tokio::time::sleep(clear_delay * 2).await;
        let recorded = events.lock().unwrap();
        assert_eq!(recorded.len(), after_shutdown + 1);
        assert_eq!(
            recorded.last(),
            Some(&ServiceEvent::ConnectedIndicatorChanged { level: None })
        );
    }
}
