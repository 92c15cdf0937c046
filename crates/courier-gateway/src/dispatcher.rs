use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use courier_types::events::{ChangeEvent, Envelope, ResumePoint};

/// Events buffered per conversation before a slow subscriber starts lagging.
const TOPIC_CAPACITY: usize = 256;

/// Fans persisted changes out to the sessions that have a conversation open.
///
/// One topic per booking, created by the first subscriber and dropped with
/// the last one. Publishing to a conversation nobody has open is a no-op.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    topics: Mutex<HashMap<Uuid, Topic>>,
}

struct Topic {
    epoch: Uuid,
    seq: u64,
    subscribers: usize,
    tx: broadcast::Sender<Envelope>,
}

impl Topic {
    fn position(&self) -> ResumePoint {
        ResumePoint {
            epoch: self.epoch,
            seq: self.seq,
        }
    }
}

/// What a subscription yields next.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(Envelope),
    /// The receiver fell behind and `missed` events were dropped.
    Lagged(u64),
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<Uuid, Topic>> {
        // A panic while holding the lock cannot leave a topic half-updated,
        // so a poisoned map is still usable.
        self.inner.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open the feed for one conversation. The returned handle must be kept
    /// for as long as the view is open; dropping it releases the slot.
    pub fn subscribe(&self, booking_id: Uuid) -> Subscription {
        let mut topics = self.topics();
        let topic = topics.entry(booking_id).or_insert_with(|| {
            debug!("Opening topic for booking {}", booking_id);
            let (tx, _) = broadcast::channel(TOPIC_CAPACITY);
            Topic {
                epoch: Uuid::new_v4(),
                seq: 0,
                subscribers: 0,
                tx,
            }
        });
        topic.subscribers += 1;

        // Receiver and start position are taken under the same lock that
        // stamps published events, so every event after `start` is received.
        Subscription {
            booking_id,
            start: topic.position(),
            rx: topic.tx.subscribe(),
            dispatcher: self.clone(),
        }
    }

    /// Stamp and fan out one change. Returns the stamped position, or `None`
    /// when no session has the conversation open.
    pub fn publish(&self, booking_id: Uuid, event: ChangeEvent) -> Option<ResumePoint> {
        let mut topics = self.topics();
        let topic = topics.get_mut(&booking_id)?;
        topic.seq += 1;

        let envelope = Envelope {
            booking_id,
            epoch: topic.epoch,
            seq: topic.seq,
            event,
        };
        let receivers = topic.tx.send(envelope).unwrap_or(0);
        trace!(
            "Published seq {} on booking {} to {} receivers",
            topic.seq, booking_id, receivers
        );
        Some(topic.position())
    }

    /// Current position of a conversation's topic, if it is open.
    pub fn position(&self, booking_id: Uuid) -> Option<ResumePoint> {
        self.topics().get(&booking_id).map(Topic::position)
    }

    pub fn open_topics(&self) -> usize {
        self.topics().len()
    }

    fn release(&self, booking_id: Uuid) {
        let mut topics = self.topics();
        let Some(topic) = topics.get_mut(&booking_id) else {
            return;
        };
        topic.subscribers = topic.subscribers.saturating_sub(1);
        if topic.subscribers == 0 {
            topics.remove(&booking_id);
            debug!("Closed topic for booking {}", booking_id);
        }
    }
}

/// Live handle on one conversation's feed.
pub struct Subscription {
    booking_id: Uuid,
    start: ResumePoint,
    rx: broadcast::Receiver<Envelope>,
    dispatcher: Dispatcher,
}

impl Subscription {
    pub fn booking_id(&self) -> Uuid {
        self.booking_id
    }

    /// Topic position at the moment of subscribing. The first event
    /// received is `start.seq + 1`.
    pub fn start(&self) -> ResumePoint {
        self.start
    }

    /// Where the topic is now. After a lag or a gap, a view re-anchors here
    /// before reloading, so every later event still arrives through `recv`.
    pub fn current(&self) -> ResumePoint {
        self.dispatcher
            .position(self.booking_id)
            .unwrap_or(self.start)
    }

    /// True when a client whose last applied event was `resume` has missed
    /// nothing, i.e. the topic has not moved or been recreated since.
    pub fn continues_from(&self, resume: ResumePoint) -> bool {
        resume == self.start
    }

    /// Next delivery, or `None` once the topic is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.rx.recv().await {
            Ok(envelope) => Some(Delivery::Event(envelope)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(Delivery::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Release the subscription. Equivalent to dropping it.
    pub fn close(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispatcher.release(self.booking_id);
    }
}
