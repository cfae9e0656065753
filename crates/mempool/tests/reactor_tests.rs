//! End-to-end tests for the mempool gossip reactor.
//!
//! Each test drives the reactor through the transport-facing ends of its
//! channel and peer-update subscription: envelopes go in through the
//! router's inbound sender, gossip comes out of the router's outbound
//! receiver, and peer errors surface on the error side-band.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidepool_mempool::{
    MempoolConfig, PanicObserver, PeerManager, Reactor, TxMempool, MEMPOOL_CHANNEL_ID,
    UNKNOWN_SENDER_ID,
};
use tidepool_messages::{decode_message, encode_message, MempoolMessage, Txs};
use tidepool_p2p::sync::Closer;
use tidepool_p2p::{
    Channel, ChannelId, Envelope, PeerError, PeerStatus, PeerUpdate, PeerUpdates, RouterHandle,
};
use tidepool_types::test_utils::{test_node_id, test_transaction};
use tidepool_types::{BlockHeight, NodeId, Transaction};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Generous bound for things that should happen.
const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Observation window for things that should not happen.
const QUIET_WINDOW: Duration = Duration::from_millis(200);

#[derive(Default)]
struct StubPeerManager {
    heights: RwLock<HashMap<NodeId, BlockHeight>>,
}

impl StubPeerManager {
    fn set_height(&self, peer: &NodeId, height: BlockHeight) {
        self.heights.write().insert(peer.clone(), height);
    }
}

impl PeerManager for StubPeerManager {
    fn get_height(&self, peer: &NodeId) -> BlockHeight {
        self.heights.read().get(peer).copied().unwrap_or_default()
    }
}

struct Harness {
    reactor: Reactor,
    router: RouterHandle,
    updates_tx: mpsc::Sender<PeerUpdate>,
    mempool: Arc<TxMempool>,
    peer_mgr: Arc<StubPeerManager>,
    shutdown: Closer,
}

impl Harness {
    fn new(cfg: MempoolConfig) -> Self {
        let mempool = TxMempool::new(cfg.clone());
        Self::with_mempool(cfg, mempool, None)
    }

    fn with_mempool(
        cfg: MempoolConfig,
        mempool: TxMempool,
        observe_panic: Option<PanicObserver>,
    ) -> Self {
        let mempool = Arc::new(mempool);
        let (channel, router) = Channel::new(&Reactor::descriptor(&cfg));
        let (updates_tx, peer_updates) = PeerUpdates::channel(8);
        let peer_mgr = Arc::new(StubPeerManager::default());

        let mut reactor = Reactor::new(
            cfg,
            Arc::clone(&mempool),
            Some(Arc::clone(&peer_mgr) as Arc<dyn PeerManager>),
            channel,
            peer_updates,
        );
        if let Some(observer) = observe_panic {
            reactor = reactor.with_observe_panic(observer);
        }

        let shutdown = Closer::new();
        reactor.start(shutdown.clone());

        Harness {
            reactor,
            router,
            updates_tx,
            mempool,
            peer_mgr,
            shutdown,
        }
    }

    /// Bring a peer up and wait until its broadcaster has a sender ID.
    async fn connect(&self, peer: &NodeId) {
        self.send_update(peer, PeerStatus::Up).await;
        wait_until("peer id reserved", || {
            self.reactor.peer_sender_id(peer) != UNKNOWN_SENDER_ID
        })
        .await;
    }

    async fn send_update(&self, peer: &NodeId, status: PeerStatus) {
        self.updates_tx
            .send(PeerUpdate {
                node_id: peer.clone(),
                status,
            })
            .await
            .expect("peer update channel closed");
    }

    /// Inject an inbound envelope carrying the given payloads from `peer`.
    async fn send_txs(&self, peer: &NodeId, payloads: Vec<Vec<u8>>) {
        let message = MempoolMessage::Txs(Txs { txs: payloads });
        self.send_envelope(peer, MEMPOOL_CHANNEL_ID, &message).await;
    }

    async fn send_envelope(&self, peer: &NodeId, channel_id: ChannelId, message: &MempoolMessage) {
        let payload = encode_message(message).expect("encode");
        self.router
            .inbound
            .send(Envelope {
                from: Some(peer.clone()),
                to: None,
                channel_id,
                payload: payload.into(),
            })
            .await
            .expect("inbound channel closed");
    }

    /// Wait for the next outbound envelope.
    async fn expect_outbound(&mut self) -> Envelope {
        timeout(EVENT_TIMEOUT, self.router.outbound.recv())
            .await
            .expect("timed out waiting for outbound envelope")
            .expect("outbound channel closed")
    }

    /// Assert no outbound envelope shows up within the quiet window.
    async fn expect_no_outbound(&mut self) {
        if let Ok(envelope) = timeout(QUIET_WINDOW, self.router.outbound.recv()).await {
            panic!("unexpected outbound envelope: {:?}", envelope);
        }
    }

    /// Wait for the next peer error on the side-band.
    async fn expect_peer_error(&mut self) -> PeerError {
        timeout(EVENT_TIMEOUT, self.router.errors.recv())
            .await
            .expect("timed out waiting for peer error")
            .expect("error channel closed")
    }
}

/// Payloads carried by an outbound envelope.
fn payloads_of(envelope: &Envelope) -> Vec<Vec<u8>> {
    match decode_message(&envelope.payload).expect("decode outbound") {
        MempoolMessage::Txs(txs) => txs.txs,
    }
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > EVENT_TIMEOUT {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Broadcast path
// ============================================================================

#[tokio::test]
async fn test_single_tx_reaches_single_peer_exactly_once() {
    let mut harness = Harness::new(MempoolConfig::default());
    let p1 = test_node_id(1);

    harness.mempool.update(BlockHeight(10), &[]);
    let t1 = test_transaction(0xaa);
    harness
        .mempool
        .check_tx(&t1, Default::default())
        .expect("local submission");

    harness.peer_mgr.set_height(&p1, BlockHeight(10));
    harness.connect(&p1).await;

    let envelope = harness.expect_outbound().await;
    assert_eq!(envelope.to, Some(p1.clone()));
    assert_eq!(envelope.channel_id, MEMPOOL_CHANNEL_ID);
    assert_eq!(payloads_of(&envelope), vec![t1.to_vec()]);

    // The broadcaster must not forward the same tx to the peer again.
    harness.expect_no_outbound().await;

    harness.reactor.stop().await;
}

#[tokio::test]
async fn test_echo_suppression() {
    let mut harness = Harness::new(MempoolConfig::default());
    let p1 = test_node_id(1);
    let p2 = test_node_id(2);

    harness.connect(&p1).await;

    // P1 gossips the tx to us; its sender ID lands in the tx's sender set.
    let t1 = test_transaction(0xaa);
    harness.send_txs(&p1, vec![t1.to_vec()]).await;
    wait_until("tx admitted", || harness.mempool.size() == 1).await;

    // Nothing must be echoed back to P1.
    harness.expect_no_outbound().await;

    // A peer that has not sent the tx receives it.
    harness.peer_mgr.set_height(&p2, BlockHeight(10));
    harness.connect(&p2).await;

    let envelope = harness.expect_outbound().await;
    assert_eq!(envelope.to, Some(p2.clone()));
    assert_eq!(payloads_of(&envelope), vec![t1.to_vec()]);

    harness.reactor.stop().await;
}

#[tokio::test]
async fn test_catchup_lag_throttles_until_peer_is_close() {
    let mut harness = Harness::new(MempoolConfig::default());
    let p1 = test_node_id(1);

    harness.mempool.update(BlockHeight(10), &[]);
    let t1 = test_transaction(0xaa);
    harness.mempool.check_tx(&t1, Default::default()).unwrap();

    // Peer is five blocks behind: the broadcaster backs off.
    harness.peer_mgr.set_height(&p1, BlockHeight(5));
    harness.connect(&p1).await;
    harness.expect_no_outbound().await;

    // A lag of one block is allowed.
    harness.peer_mgr.set_height(&p1, BlockHeight(9));
    let envelope = harness.expect_outbound().await;
    assert_eq!(envelope.to, Some(p1.clone()));

    harness.reactor.stop().await;
}

#[tokio::test]
async fn test_peer_down_mid_broadcast_tears_down_and_reclaims() {
    let mut harness = Harness::new(MempoolConfig::default());
    let p1 = test_node_id(1);

    harness.mempool.check_tx(&test_transaction(1), Default::default()).unwrap();
    harness.connect(&p1).await;

    // The broadcaster is now parked in Advance, waiting for a successor.
    harness.expect_outbound().await;
    assert_eq!(harness.reactor.broadcaster_count(), 1);

    harness.send_update(&p1, PeerStatus::Down).await;

    wait_until("broadcaster exits", || {
        harness.reactor.broadcaster_count() == 0
    })
    .await;
    assert_eq!(harness.reactor.peer_sender_id(&p1), UNKNOWN_SENDER_ID);

    harness.reactor.stop().await;
}

#[tokio::test]
async fn test_duplicate_peer_up_spawns_single_broadcaster() {
    let mut harness = Harness::new(MempoolConfig::default());
    let p1 = test_node_id(1);

    harness.connect(&p1).await;
    harness.send_update(&p1, PeerStatus::Up).await;

    harness.mempool.check_tx(&test_transaction(1), Default::default()).unwrap();

    let envelope = harness.expect_outbound().await;
    assert_eq!(envelope.to, Some(p1.clone()));
    harness.expect_no_outbound().await;
    assert_eq!(harness.reactor.broadcaster_count(), 1);

    harness.reactor.stop().await;
}

#[tokio::test]
async fn test_broadcaster_resumes_after_cursor_detachment() {
    let mut harness = Harness::new(MempoolConfig::default());
    let p1 = test_node_id(1);

    let t1 = test_transaction(1);
    harness.mempool.check_tx(&t1, Default::default()).unwrap();
    harness.connect(&p1).await;
    harness.expect_outbound().await;

    // Evict the tx the broadcaster's cursor sits on; the cursor detaches
    // and the broadcaster falls back to waiting for the next tx.
    harness.mempool.update(BlockHeight(1), &[t1.hash()]);

    let t2 = test_transaction(2);
    harness.mempool.check_tx(&t2, Default::default()).unwrap();

    let envelope = harness.expect_outbound().await;
    assert_eq!(payloads_of(&envelope), vec![t2.to_vec()]);

    harness.reactor.stop().await;
}

#[tokio::test]
async fn test_broadcast_disabled_still_admits_but_never_sends() {
    let mut harness = Harness::new(MempoolConfig::default().with_broadcast(false));
    let p1 = test_node_id(1);

    harness.send_update(&p1, PeerStatus::Up).await;
    harness.mempool.check_tx(&test_transaction(1), Default::default()).unwrap();

    harness.send_txs(&p1, vec![test_transaction(2).to_vec()]).await;
    wait_until("inbound tx admitted", || harness.mempool.size() == 2).await;

    harness.expect_no_outbound().await;
    assert_eq!(harness.reactor.broadcaster_count(), 0);
    assert_eq!(harness.reactor.peer_sender_id(&p1), UNKNOWN_SENDER_ID);

    harness.reactor.stop().await;
}

// ============================================================================
// Receive path
// ============================================================================

#[tokio::test]
async fn test_empty_txs_is_a_peer_error_and_loop_survives() {
    let mut harness = Harness::new(MempoolConfig::default());
    let p1 = test_node_id(1);

    harness
        .send_envelope(&p1, MEMPOOL_CHANNEL_ID, &MempoolMessage::Txs(Txs { txs: vec![] }))
        .await;

    let peer_error = harness.expect_peer_error().await;
    assert_eq!(peer_error.peer, p1);
    assert_eq!(harness.mempool.size(), 0);

    // The receive loop is still alive and admits the next valid envelope.
    harness.send_txs(&p1, vec![test_transaction(1).to_vec()]).await;
    wait_until("tx admitted after error", || harness.mempool.size() == 1).await;

    harness.reactor.stop().await;
}

#[tokio::test]
async fn test_unknown_channel_is_a_peer_error() {
    let mut harness = Harness::new(MempoolConfig::default());
    let p1 = test_node_id(1);

    harness
        .send_envelope(
            &p1,
            ChannelId(0x99),
            &MempoolMessage::Txs(Txs::single(test_transaction(1).to_vec())),
        )
        .await;

    let peer_error = harness.expect_peer_error().await;
    assert_eq!(peer_error.peer, p1);
    assert_eq!(harness.mempool.size(), 0);

    harness.reactor.stop().await;
}

#[tokio::test]
async fn test_undecodable_payload_is_a_peer_error() {
    let mut harness = Harness::new(MempoolConfig::default());
    let p1 = test_node_id(1);

    harness
        .router
        .inbound
        .send(Envelope {
            from: Some(p1.clone()),
            to: None,
            channel_id: MEMPOOL_CHANNEL_ID,
            payload: vec![0xff, 0xfe, 0xfd].into(),
        })
        .await
        .unwrap();

    let peer_error = harness.expect_peer_error().await;
    assert_eq!(peer_error.peer, p1);

    harness.reactor.stop().await;
}

#[tokio::test]
async fn test_admission_rejection_does_not_penalize_peer() {
    let mut harness = Harness::new(MempoolConfig::default());
    let p1 = test_node_id(1);

    let t1 = test_transaction(1);
    harness.send_txs(&p1, vec![t1.to_vec()]).await;
    wait_until("tx admitted", || harness.mempool.size() == 1).await;

    // Resending the same tx fails admission (cache hit) but must not
    // produce a peer error.
    harness.send_txs(&p1, vec![t1.to_vec()]).await;
    tokio::time::sleep(QUIET_WINDOW).await;
    assert!(
        timeout(Duration::from_millis(10), harness.router.errors.recv())
            .await
            .is_err(),
        "admission rejection must not be reported as a peer error"
    );

    harness.reactor.stop().await;
}

#[tokio::test]
async fn test_panic_in_handler_is_observed_and_survived() {
    let panics = Arc::new(AtomicUsize::new(0));
    let observer: PanicObserver = {
        let panics = Arc::clone(&panics);
        Arc::new(move |_| {
            panics.fetch_add(1, Ordering::SeqCst);
        })
    };

    let cfg = MempoolConfig::default();
    let mempool = TxMempool::new(cfg.clone()).with_pre_check(Box::new(|tx| {
        if tx.as_bytes().first() == Some(&0x66) {
            panic!("poisoned tx shape");
        }
        Ok(())
    }));
    let mut harness = Harness::with_mempool(cfg, mempool, Some(observer));
    let p1 = test_node_id(1);

    harness.send_txs(&p1, vec![vec![0x66, 1, 2]]).await;

    let peer_error = harness.expect_peer_error().await;
    assert_eq!(peer_error.peer, p1);
    assert_eq!(panics.load(Ordering::SeqCst), 1);

    // The receive loop processes the next envelope normally.
    harness.send_txs(&p1, vec![test_transaction(1).to_vec()]).await;
    wait_until("tx admitted after panic", || harness.mempool.size() == 1).await;
    assert_eq!(panics.load(Ordering::SeqCst), 1);

    harness.reactor.stop().await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_graceful_shutdown_joins_all_broadcasters() {
    let harness = Harness::new(MempoolConfig::default());

    for seed in 1..=3 {
        harness.connect(&test_node_id(seed)).await;
    }
    assert_eq!(harness.reactor.broadcaster_count(), 3);

    timeout(EVENT_TIMEOUT, harness.reactor.stop())
        .await
        .expect("stop() should complete promptly");

    assert_eq!(harness.reactor.broadcaster_count(), 0);
    assert!(!harness.reactor.is_running());
}

#[tokio::test]
async fn test_peer_up_after_stop_is_dropped() {
    let harness = Harness::new(MempoolConfig::default());

    timeout(EVENT_TIMEOUT, harness.reactor.stop())
        .await
        .expect("stop() should complete promptly");

    // In-flight updates delivered after shutdown must not spawn anything.
    let _ = harness
        .updates_tx
        .send(PeerUpdate {
            node_id: test_node_id(1),
            status: PeerStatus::Up,
        })
        .await;

    tokio::time::sleep(QUIET_WINDOW).await;
    assert_eq!(harness.reactor.broadcaster_count(), 0);
}

#[tokio::test]
async fn test_external_shutdown_tears_everything_down() {
    let harness = Harness::new(MempoolConfig::default());
    let p1 = test_node_id(1);

    harness.connect(&p1).await;
    assert_eq!(harness.reactor.broadcaster_count(), 1);

    harness.shutdown.close();

    wait_until("broadcaster exits on shutdown", || {
        harness.reactor.broadcaster_count() == 0
    })
    .await;
}

#[tokio::test]
async fn test_ordered_delivery_per_peer() {
    let mut harness = Harness::new(MempoolConfig::default());
    let p1 = test_node_id(1);

    harness.connect(&p1).await;

    let txs: Vec<Transaction> = (1..=5).map(test_transaction).collect();
    for t in &txs {
        harness.mempool.check_tx(t, Default::default()).unwrap();
    }

    for expected in &txs {
        let envelope = harness.expect_outbound().await;
        assert_eq!(
            payloads_of(&envelope),
            vec![expected.to_vec()],
            "transactions must arrive in admission order"
        );
    }

    harness.reactor.stop().await;
}
