//! The mempool gossip reactor.
//!
//! The reactor runs two long-lived loops plus one broadcaster task per
//! connected peer:
//!
//! - the **receive loop** drains inbound envelopes and feeds every gossiped
//!   transaction through [`TxMempool::check_tx`]
//! - the **peer-update loop** starts a broadcaster on `PeerStatusUp` and
//!   fires its closer on `PeerStatusDown`
//! - each **broadcaster** walks the shared gossip log and forwards every
//!   transaction the peer is not already known to hold, in admission order
//!
//! Teardown is deterministic: [`Reactor::stop`] fires every per-peer closer
//! first (so broadcasters exit through their peer-specific path and run
//! their own accounting), waits for all of them to join, then fires the
//! reactor-wide stop signal and waits for the peer-update subscription to
//! wind down.

use crate::config::MempoolConfig;
use crate::error::ReactorError;
use crate::ids::{MempoolIds, SenderId, UNKNOWN_SENDER_ID};
use crate::pool::TxMempool;
use crate::tx::TxInfo;
use crate::txlog::LogEntry;
use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidepool_messages::{decode_message, encode_message, encoded_len, MempoolMessage, Txs};
use tidepool_p2p::sync::{Closer, TaskGroup};
use tidepool_p2p::{
    Channel, ChannelDescriptor, ChannelId, Envelope, PeerError, PeerStatus, PeerUpdate,
    PeerUpdates,
};
use tidepool_types::{BlockHeight, NodeId, Transaction};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Channel carrying mempool gossip.
pub const MEMPOOL_CHANNEL_ID: ChannelId = ChannelId(0x30);

/// How long a broadcaster backs off while its peer catches up on blocks.
pub const PEER_CATCHUP_SLEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Source of peer liveness information.
///
/// The transport's peer manager implements this; `BlockHeight(0)` means the
/// peer's height is not (yet) known and no catch-up throttling applies.
pub trait PeerManager: Send + Sync {
    /// Latest block height the peer is known to have reached.
    fn get_height(&self, peer: &NodeId) -> BlockHeight;
}

/// Observer for panics recovered at task boundaries.
///
/// Defaults to a no-op; tests install a counter to assert that message
/// handling never panicked.
pub type PanicObserver = Arc<dyn Fn(&(dyn Any + Send)) + Send + Sync>;

/// The mempool gossip reactor.
///
/// Owns the mempool channel endpoints and the peer-update subscription
/// until [`start`](Reactor::start) moves them into the spawned loops.
pub struct Reactor {
    inner: Arc<ReactorInner>,
    inbound: Option<mpsc::Receiver<Envelope>>,
    peer_updates: Option<PeerUpdates>,
    peer_updates_done: Closer,
}

struct ReactorInner {
    cfg: MempoolConfig,
    mempool: Arc<TxMempool>,
    ids: MempoolIds,
    peer_mgr: Option<Arc<dyn PeerManager>>,
    channel_id: ChannelId,
    outbound: mpsc::Sender<Envelope>,
    errors: mpsc::Sender<PeerError>,
    /// Fired by [`Reactor::stop`] after every broadcaster has joined.
    stop_signal: Closer,
    running: AtomicBool,
    /// One closer per live broadcaster, keyed by peer identity.
    peer_routines: Mutex<HashMap<NodeId, Closer>>,
    /// Join counter over broadcaster tasks.
    peer_tasks: TaskGroup,
    observe_panic: PanicObserver,
}

impl Reactor {
    /// Create a reactor over the given channel and peer-update subscription.
    pub fn new(
        cfg: MempoolConfig,
        mempool: Arc<TxMempool>,
        peer_mgr: Option<Arc<dyn PeerManager>>,
        channel: Channel,
        peer_updates: PeerUpdates,
    ) -> Self {
        let peer_updates_done = peer_updates.done_signal();
        Reactor {
            inner: Arc::new(ReactorInner {
                cfg,
                mempool,
                ids: MempoolIds::new(),
                peer_mgr,
                channel_id: channel.id,
                outbound: channel.outbound,
                errors: channel.errors,
                stop_signal: Closer::new(),
                running: AtomicBool::new(false),
                peer_routines: Mutex::new(HashMap::new()),
                peer_tasks: TaskGroup::new(),
                observe_panic: Arc::new(|_| {}),
            }),
            inbound: Some(channel.inbound),
            peer_updates: Some(peer_updates),
            peer_updates_done,
        }
    }

    /// The channel descriptor this reactor requires.
    ///
    /// The receive capacity is the serialized size of a batch carrying a
    /// single payload of `max_tx_bytes`, the largest message a conforming
    /// peer can send.
    pub fn descriptor(cfg: &MempoolConfig) -> ChannelDescriptor {
        let largest = MempoolMessage::Txs(Txs::single(vec![0u8; cfg.max_tx_bytes]));
        ChannelDescriptor {
            id: MEMPOOL_CHANNEL_ID,
            priority: 5,
            recv_message_capacity: encoded_len(&largest),
            recv_buffer_capacity: 128,
        }
    }

    /// Install a panic observer. Must be called before [`start`](Reactor::start).
    pub fn with_observe_panic(mut self, observe_panic: PanicObserver) -> Self {
        let inner =
            Arc::get_mut(&mut self.inner).expect("with_observe_panic called after start");
        inner.observe_panic = observe_panic;
        self
    }

    /// Whether the reactor has been started and not yet stopped.
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Number of live broadcaster tasks.
    pub fn broadcaster_count(&self) -> usize {
        self.inner.peer_routines.lock().len()
    }

    /// Compact sender ID currently reserved for a peer, or
    /// [`UNKNOWN_SENDER_ID`] if none.
    pub fn peer_sender_id(&self, peer: &NodeId) -> SenderId {
        self.inner.ids.get_for_peer(peer)
    }

    /// Spawn the receive loop and the peer-update loop.
    ///
    /// `shutdown` is the externally owned cancellation signal; firing it
    /// tears down every loop and broadcaster without the per-peer
    /// accounting that [`stop`](Reactor::stop) provides.
    pub fn start(&mut self, shutdown: Closer) {
        let inbound = self.inbound.take().expect("reactor already started");
        let peer_updates = self.peer_updates.take().expect("reactor already started");

        if !self.inner.cfg.broadcast {
            info!("tx broadcasting is disabled");
        }
        self.inner.running.store(true, Ordering::Release);

        tokio::spawn(process_mempool_channel(
            Arc::clone(&self.inner),
            inbound,
            shutdown.clone(),
        ));
        tokio::spawn(process_peer_updates(
            Arc::clone(&self.inner),
            peer_updates,
            shutdown,
        ));
    }

    /// Stop the reactor and wait for every spawned task to exit.
    ///
    /// The order matters: closers fire before the stop signal so each
    /// broadcaster exits through its peer-specific path and removes its own
    /// routine-map entry; only then does the generic stop signal end the
    /// two loops.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);

        {
            let routines = self.inner.peer_routines.lock();
            for closer in routines.values() {
                closer.close();
            }
        }

        self.inner.peer_tasks.wait().await;
        self.inner.stop_signal.close();
        self.peer_updates_done.done().await;
    }
}

impl ReactorInner {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Handle one inbound envelope, converting panics into an error.
    ///
    /// Message handling runs behind a panic barrier: a panicking handler
    /// must not take down the receive loop, and the recovered value is
    /// surfaced to the panic observer before the peer is reported.
    fn handle_message(&self, envelope: &Envelope) -> Result<(), ReactorError> {
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.route_message(envelope))) {
            Ok(result) => result,
            Err(panic) => {
                (self.observe_panic)(panic.as_ref());
                let message = panic_message(panic.as_ref());
                error!(
                    peer = ?envelope.from,
                    error = %message,
                    "recovered from panic while processing message"
                );
                Err(ReactorError::Handler(message))
            }
        }
    }

    fn route_message(&self, envelope: &Envelope) -> Result<(), ReactorError> {
        trace!(peer = ?envelope.from, "received message");

        if envelope.channel_id != self.channel_id {
            return Err(ReactorError::UnknownChannel(envelope.channel_id));
        }

        match decode_message(&envelope.payload)? {
            MempoolMessage::Txs(txs) => self.handle_txs(envelope.from.as_ref(), txs),
        }
    }

    /// Feed a batch of gossiped transactions through admission.
    ///
    /// Admission failures are logged and suppressed: a transaction can be
    /// rejected for benign reasons (already known, pool full) and the peer
    /// must not be penalized for them.
    fn handle_txs(&self, from: Option<&NodeId>, txs: Txs) -> Result<(), ReactorError> {
        if txs.txs.is_empty() {
            return Err(ReactorError::EmptyTxs);
        }

        let info = TxInfo {
            sender_id: from
                .map(|peer| self.ids.get_for_peer(peer))
                .unwrap_or(UNKNOWN_SENDER_ID),
            sender_node_id: from.cloned(),
        };

        for payload in txs.txs {
            let tx = Transaction::from(payload);
            if let Err(err) = self.mempool.check_tx(&tx, info.clone()) {
                debug!(
                    tx_hash = %tx.hash(),
                    peer = ?from,
                    error = %err,
                    "checktx failed for gossiped tx"
                );
            }
        }
        Ok(())
    }

    /// Handle one peer status transition. The routine-map mutex is held for
    /// the whole event so Up/Down for the same peer cannot interleave.
    fn process_peer_update(self: &Arc<Self>, update: PeerUpdate, shutdown: &Closer) {
        debug!(peer = %update.node_id, status = %update.status, "received peer update");

        let mut routines = self.peer_routines.lock();

        match update.status {
            PeerStatus::Up => {
                // Updates can still arrive after shutdown has begun; do not
                // start new broadcasters for them.
                if !self.is_running() || !self.cfg.broadcast {
                    return;
                }
                if routines.contains_key(&update.node_id) {
                    return;
                }

                let closer = Closer::new();
                routines.insert(update.node_id.clone(), closer.clone());
                self.peer_tasks.add();
                self.ids.reserve_for_peer(&update.node_id);

                tokio::spawn(broadcast_tx_routine(
                    Arc::clone(self),
                    update.node_id,
                    closer,
                    shutdown.clone(),
                ));
            }
            PeerStatus::Down => {
                // Reclaim unconditionally; a no-op when broadcast was
                // disabled and no id was ever reserved.
                self.ids.reclaim(&update.node_id);

                if let Some(closer) = routines.get(&update.node_id) {
                    closer.close();
                }
            }
        }
    }
}

/// Blocking event loop over the mempool channel's inbound side.
async fn process_mempool_channel(
    r: Arc<ReactorInner>,
    mut inbound: mpsc::Receiver<Envelope>,
    shutdown: Closer,
) {
    loop {
        tokio::select! {
            maybe_envelope = inbound.recv() => {
                let Some(envelope) = maybe_envelope else {
                    debug!("inbound mempool channel closed");
                    return;
                };

                if let Err(err) = r.handle_message(&envelope) {
                    warn!(
                        channel = %r.channel_id,
                        peer = ?envelope.from,
                        error = %err,
                        "failed to process message"
                    );
                    let Some(peer) = envelope.from else { continue };
                    let peer_error = PeerError {
                        peer,
                        error: err.to_string(),
                    };
                    tokio::select! {
                        _ = r.errors.send(peer_error) => {}
                        _ = shutdown.done() => return,
                        _ = r.stop_signal.done() => return,
                    }
                }
            }
            _ = shutdown.done() => return,
            _ = r.stop_signal.done() => {
                debug!("stopped listening on mempool channel; closing");
                return;
            }
        }
    }
}

/// Blocking event loop over the peer-update subscription.
async fn process_peer_updates(r: Arc<ReactorInner>, mut peer_updates: PeerUpdates, shutdown: Closer) {
    loop {
        tokio::select! {
            maybe_update = peer_updates.recv() => {
                match maybe_update {
                    Some(update) => r.process_peer_update(update, &shutdown),
                    None => break,
                }
            }
            _ = shutdown.done() => break,
            _ = r.stop_signal.done() => {
                debug!("stopped listening on peer updates; closing");
                break;
            }
        }
    }

    // Outstanding broadcasters are closed by Reactor::stop, not here.
    peer_updates.close();
}

/// Forward every admitted transaction the peer does not already hold,
/// in admission order, until told to stop.
async fn broadcast_tx_routine(
    r: Arc<ReactorInner>,
    peer_id: NodeId,
    closer: Closer,
    shutdown: Closer,
) {
    let panic = AssertUnwindSafe(broadcast_to_peer(&r, &peer_id, &closer, &shutdown))
        .catch_unwind()
        .await
        .err();

    r.peer_routines.lock().remove(&peer_id);
    r.peer_tasks.done();

    if let Some(panic) = panic {
        (r.observe_panic)(panic.as_ref());
        error!(
            peer = %peer_id,
            error = %panic_message(panic.as_ref()),
            "recovering from broadcast loop panic"
        );
    }
}

async fn broadcast_to_peer(
    r: &ReactorInner,
    peer_id: &NodeId,
    closer: &Closer,
    shutdown: &Closer,
) {
    let peer_mempool_id = r.ids.get_for_peer(peer_id);
    let mut next_gossip_tx: Option<Arc<LogEntry>> = None;

    loop {
        if !r.is_running() || shutdown.is_closed() {
            return;
        }

        // The cursor is empty on the first pass, and again whenever the
        // entry it pointed at was garbage collected out of the log. Wait
        // for a transaction and restart from the head.
        let Some(entry) = next_gossip_tx.clone() else {
            tokio::select! {
                _ = r.mempool.wait_for_next_tx() => {
                    next_gossip_tx = r.mempool.next_gossip_tx();
                }
                _ = closer.done() => {
                    // The peer was marked for removal via a PeerUpdate.
                    return;
                }
                _ = shutdown.done() => return,
                _ = r.stop_signal.done() => return,
            }
            continue;
        };

        let wtx = Arc::clone(entry.value());

        if let Some(peer_mgr) = &r.peer_mgr {
            let peer_height = peer_mgr.get_height(peer_id);
            if peer_height.0 > 0 && peer_height.0 + 1 < wtx.height().0 {
                // The peer lags by more than one block; give it time to
                // catch up instead of flooding it with txs it cannot check.
                tokio::select! {
                    _ = tokio::time::sleep(PEER_CATCHUP_SLEEP_INTERVAL) => {}
                    _ = closer.done() => return,
                    _ = shutdown.done() => return,
                    _ = r.stop_signal.done() => return,
                }
                continue;
            }
        }

        if !r.mempool.tx_has_peer(&wtx.hash(), peer_mempool_id) {
            // One transaction per envelope; batching stays disabled because
            // sender-set attribution is per-tx.
            let message = MempoolMessage::Txs(Txs::single(wtx.tx().to_vec()));
            match encode_message(&message) {
                Ok(payload) => {
                    let envelope = Envelope {
                        from: None,
                        to: Some(peer_id.clone()),
                        channel_id: r.channel_id,
                        payload: Bytes::from(payload),
                    };
                    // Past the peer-down checks the send either completes
                    // or is cancelled with the whole task tree; the peer
                    // closer deliberately does not interrupt it.
                    tokio::select! {
                        sent = r.outbound.send(envelope) => {
                            if sent.is_err() {
                                debug!(peer = %peer_id, "outbound channel closed");
                                return;
                            }
                            debug!(
                                tx_hash = %wtx.hash(),
                                peer = %peer_id,
                                "gossiped tx to peer"
                            );
                        }
                        _ = shutdown.done() => return,
                    }
                }
                Err(err) => {
                    error!(tx_hash = %wtx.hash(), error = %err, "failed to encode gossip message");
                }
            }
        }

        tokio::select! {
            _ = entry.next_wait() => {
                // A `None` successor means the entry was detached while we
                // held it; the cursor restarts from the head.
                next_gossip_tx = entry.next();
            }
            _ = closer.done() => return,
            _ = shutdown.done() => return,
            _ = r.stop_signal.done() => return,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
