// Leader - Coordinator electing the single synchronizer of a replica
// Principle: only the leader may hold the sync lock; leadership alone does not imply it

mod bus;
mod election;
mod message;

pub use bus::{BusError, InMemoryBus, MessageBus};
pub use election::{Effects, ElectionState, Role};
pub use message::{InstanceId, LeaderMessage, MessageKind};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::LeaderConfig;

struct Waiter {
    ticket: u64,
    grant: oneshot::Sender<bool>,
}

struct Inner {
    election: ElectionState,
    waiters: VecDeque<Waiter>,
    closed: bool,
}

/// Shared between the coordinator handle and its event loop
struct Shared {
    inner: Mutex<Inner>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn publish(&self, message: LeaderMessage) {
        if let Err(e) = self.bus.publish(message) {
            warn!("Election bus publish failed: {}", e);
        }
    }

    fn apply(&self, effects: Effects, inner: &mut Inner) {
        for message in effects.messages {
            self.publish(message);
        }
        if effects.lost_lock {
            warn!("🔓 Sync lock lost on step-down of {}", inner.election.id());
        }
        if effects.stepped_down {
            debug!("Lost leadership; {} waiter(s) stay queued", inner.waiters.len());
        }
        // A fresh claim serves waiters from the next tick on, after any rival
        // announce has been seen
        if !effects.became_leader {
            self.serve_waiters(inner);
        }
    }

    /// Hand the lock to the oldest live waiter, if we are an idle leader
    fn serve_waiters(&self, inner: &mut Inner) {
        if !inner.election.is_leader() || inner.election.is_syncing() {
            return;
        }

        while let Some(waiter) = inner.waiters.pop_front() {
            if waiter.grant.is_closed() {
                continue;
            }
            inner.election.set_syncing(true);
            if waiter.grant.send(true).is_ok() {
                let now = self.clock.now_ms();
                self.publish(inner.election.message(MessageKind::SyncStart, now));
                return;
            }
            inner.election.set_syncing(false);
        }
    }
}

/// Leader election and sync lock over a message bus
pub struct LeaderCoordinator {
    id: InstanceId,
    shared: Arc<Shared>,
    tickets: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderCoordinator {
    /// Join the election with a random instance id
    pub fn start(bus: Arc<dyn MessageBus>, clock: Arc<dyn Clock>, config: LeaderConfig) -> Self {
        Self::start_with_id(InstanceId::random(), bus, clock, config)
    }

    /// Join the election; must be called inside a tokio runtime
    pub fn start_with_id(
        id: InstanceId,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        config: LeaderConfig,
    ) -> Self {
        let now = clock.now_ms();
        let mut election = ElectionState::new(id, config, now);
        let opening = election.start_election(now);

        // Subscribe before the request goes out so no answer is missed
        let receiver = bus.subscribe();
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                election,
                waiters: VecDeque::new(),
                closed: false,
            }),
            bus,
            clock,
        });
        for message in opening.messages {
            shared.publish(message);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_event_loop(
            shared.clone(),
            receiver,
            shutdown_rx,
            config.tick_interval(),
        ));

        info!("🗳️ Instance {} joined leader election", id);

        Self {
            id,
            shared,
            tickets: AtomicU64::new(0),
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.id
    }

    pub async fn is_leader(&self) -> bool {
        self.shared.inner.lock().await.election.is_leader()
    }

    pub async fn has_lock(&self) -> bool {
        let inner = self.shared.inner.lock().await;
        inner.election.is_leader() && inner.election.is_syncing()
    }

    /// Wait up to `timeout` for the sync lock
    pub async fn acquire_lock(&self, timeout: Duration) -> bool {
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst);
        let mut grant = {
            let mut inner = self.shared.inner.lock().await;
            if inner.closed {
                return false;
            }

            let now = self.shared.clock.now_ms();
            if inner.election.is_leader() && !inner.election.is_syncing() {
                inner.election.set_syncing(true);
                self.shared
                    .publish(inner.election.message(MessageKind::SyncStart, now));
                debug!("Sync lock granted immediately to {}", self.id);
                return true;
            }

            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(Waiter { ticket, grant: tx });
            // Provoke a liveness answer from the current leader
            self.shared
                .publish(inner.election.message(MessageKind::Ping, now));
            rx
        };

        match tokio::time::timeout(timeout, &mut grant).await {
            Ok(Ok(granted)) => granted,
            Ok(Err(_)) => false,
            Err(_) => {
                let mut inner = self.shared.inner.lock().await;
                inner.waiters.retain(|w| w.ticket != ticket);
                // A grant may have landed between the deadline and this lock
                match grant.try_recv() {
                    Ok(granted) => granted,
                    Err(_) => {
                        debug!("Sync lock wait timed out on {}", self.id);
                        false
                    }
                }
            }
        }
    }

    /// Release the lock and pass it to the next waiter; a no-op when the lock
    /// was already lost to a step-down
    pub async fn release_lock(&self) {
        let mut inner = self.shared.inner.lock().await;
        if !inner.election.set_syncing(false) {
            return;
        }

        let now = self.shared.clock.now_ms();
        self.shared
            .publish(inner.election.message(MessageKind::SyncComplete, now));
        self.shared.serve_waiters(&mut inner);
    }

    /// Leave the election; a leader mid-sync announces `sync-complete` first
    pub async fn shutdown(&self) {
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.closed {
                return;
            }
            inner.closed = true;

            if inner.election.is_leader() && inner.election.is_syncing() {
                inner.election.set_syncing(false);
                let now = self.shared.clock.now_ms();
                self.shared
                    .publish(inner.election.message(MessageKind::SyncComplete, now));
            }

            for waiter in inner.waiters.drain(..) {
                let _ = waiter.grant.send(false);
            }
        }

        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Election loop ended abnormally: {}", e);
            }
        }
        info!("👋 Instance {} left leader election", self.id);
    }
}

async fn run_event_loop(
    shared: Arc<Shared>,
    mut receiver: broadcast::Receiver<LeaderMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
    tick_interval: Duration,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Ok(message) => {
                    let mut inner = shared.inner.lock().await;
                    let effects = inner.election.on_message(&message, shared.clock.now_ms());
                    shared.apply(effects, &mut inner);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Election loop lagged, {} message(s) skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            _ = ticker.tick() => {
                let mut inner = shared.inner.lock().await;
                let effects = inner.election.on_tick(shared.clock.now_ms());
                shared.apply(effects, &mut inner);
            }

            _ = shutdown_rx.changed() => break,
        }
    }
}
