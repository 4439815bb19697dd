use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::{stream::unfold, Stream};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::{
    metrics::{EVENTS_SKIPPED, LIVE_SUBSCRIBERS},
    settlement::Settlement,
    state::{Hunt, Outcome},
    utils::DerivedStats,
};

/// A committed change to a hunt, carrying full rows rather than diffs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HuntEvent {
    pub hunt_id: i64,
    pub revision: i64,
    pub change: Change,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Change {
    HuntUpdated { hunt: Hunt, stats: DerivedStats },
    OutcomeUpdated { outcome: Outcome },
    Settled { settlement: Settlement },
    /// The subscriber missed events and must refetch the hunt.
    Resync,
}

impl HuntEvent {
    pub fn hunt_updated(hunt: &Hunt, stats: DerivedStats) -> Self {
        Self {
            hunt_id: hunt.id,
            revision: hunt.revision,
            change: Change::HuntUpdated {
                hunt: hunt.clone(),
                stats,
            },
        }
    }

    pub fn outcome_updated(hunt: &Hunt, outcome: &Outcome) -> Self {
        Self {
            hunt_id: hunt.id,
            revision: hunt.revision,
            change: Change::OutcomeUpdated {
                outcome: outcome.clone(),
            },
        }
    }

    pub fn settled(hunt: &Hunt, settlement: &Settlement) -> Self {
        Self {
            hunt_id: hunt.id,
            revision: hunt.revision,
            change: Change::Settled {
                settlement: settlement.clone(),
            },
        }
    }

    pub fn resync(hunt_id: i64, revision: i64) -> Self {
        Self {
            hunt_id,
            revision,
            change: Change::Resync,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.change {
            Change::HuntUpdated { .. } => "hunt",
            Change::OutcomeUpdated { .. } => "outcome",
            Change::Settled { .. } => "settlement",
            Change::Resync => "resync",
        }
    }
}

struct HuntChannel {
    sender: broadcast::Sender<HuntEvent>,
    next_ticket: u64,
    next_release: u64,
    // released tickets waiting on an earlier one; empty vec = skipped ticket
    pending: BTreeMap<u64, Vec<HuntEvent>>,
}

impl HuntChannel {
    fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::Sender::new(capacity),
            next_ticket: 0,
            next_release: 0,
            pending: BTreeMap::new(),
        }
    }

    fn is_idle(&self) -> bool {
        self.next_release == self.next_ticket && self.sender.receiver_count() == 0
    }
}

/// Per-hunt fan-out of committed changes.
///
/// Writers reserve a [`PublishTicket`] while they still hold the store's write
/// lock on the hunt, so ticket order matches commit order. Tickets are
/// released to subscribers strictly in that order; a ticket dropped without
/// publishing (rollback, timeout, cancelled task) is skipped. Sending never
/// waits on subscribers.
pub struct Broadcaster {
    capacity: usize,
    hunts: Mutex<HashMap<i64, HuntChannel>>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            hunts: Mutex::new(HashMap::new()),
        })
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<i64, HuntChannel>> {
        self.hunts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reserve(self: &Arc<Self>, hunt_id: i64) -> PublishTicket {
        let mut channels = self.channels();
        let channel = channels
            .entry(hunt_id)
            .or_insert_with(|| HuntChannel::new(self.capacity));
        let seq = channel.next_ticket;
        channel.next_ticket += 1;
        PublishTicket {
            broadcaster: Arc::clone(self),
            hunt_id,
            seq,
            released: false,
        }
    }

    fn release(&self, hunt_id: i64, seq: u64, events: Vec<HuntEvent>) {
        let mut channels = self.channels();
        let Some(channel) = channels.get_mut(&hunt_id) else {
            return;
        };
        channel.pending.insert(seq, events);
        while let Some(events) = channel.pending.remove(&channel.next_release) {
            channel.next_release += 1;
            for event in events {
                // no live receivers is not an error
                let _ = channel.sender.send(event);
            }
        }
        let idle = channel.is_idle();
        if idle {
            channels.remove(&hunt_id);
        }
    }

    pub fn subscribe(&self, hunt_id: i64) -> broadcast::Receiver<HuntEvent> {
        self.channels()
            .entry(hunt_id)
            .or_insert_with(|| HuntChannel::new(self.capacity))
            .sender
            .subscribe()
    }

    /// Live event stream for one hunt. A subscriber that falls more than the
    /// channel capacity behind gets a `Resync` event and then continues with
    /// live events.
    pub fn subscribe_stream(&self, hunt_id: i64) -> impl Stream<Item = HuntEvent> + Send + 'static {
        let receiver = self.subscribe(hunt_id);
        unfold(
            (receiver, 0i64, SubscriberGuard::new()),
            move |(mut receiver, last_revision, guard)| async move {
                match receiver.recv().await {
                    Ok(event) => {
                        let revision = event.revision.max(last_revision);
                        Some((event, (receiver, revision, guard)))
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(hunt_id, missed, "subscriber lagged, requesting resync");
                        Some((
                            HuntEvent::resync(hunt_id, last_revision),
                            (receiver, last_revision, guard),
                        ))
                    }
                    Err(RecvError::Closed) => None,
                }
            },
        )
    }

    pub fn subscriber_count(&self, hunt_id: i64) -> usize {
        self.channels()
            .get(&hunt_id)
            .map(|channel| channel.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drop channels with no subscribers and no outstanding tickets.
    pub fn prune(&self) {
        let mut channels = self.channels();
        let before = channels.len();
        channels.retain(|_, channel| !channel.is_idle());
        let pruned = before - channels.len();
        if pruned > 0 {
            debug!(pruned, "pruned idle hunt channels");
        }
    }
}

/// A reserved slot in a hunt's event order.
#[must_use = "an unpublished ticket is skipped when dropped"]
pub struct PublishTicket {
    broadcaster: Arc<Broadcaster>,
    hunt_id: i64,
    seq: u64,
    released: bool,
}

impl PublishTicket {
    pub fn publish(mut self, events: Vec<HuntEvent>) {
        self.released = true;
        self.broadcaster.release(self.hunt_id, self.seq, events);
    }
}

impl Drop for PublishTicket {
    fn drop(&mut self) {
        if !self.released {
            debug!(hunt_id = self.hunt_id, seq = self.seq, "publish ticket skipped");
            EVENTS_SKIPPED.inc();
            self.broadcaster.release(self.hunt_id, self.seq, Vec::new());
        }
    }
}

struct SubscriberGuard;

impl SubscriberGuard {
    fn new() -> Self {
        LIVE_SUBSCRIBERS.inc();
        Self
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        LIVE_SUBSCRIBERS.dec();
    }
}
