//! Events reported to the client.
//!
//! Events are created by waves (a stop, a terminated command), enqueued on the process,
//! then popped by the client ([`EventQueue::next_pending`]) which marks them reported,
//! and finally acknowledged ([`EventQueue::processed`]).
//!
//! Enqueuing an event also signals the queue's notifier channel,
//! which a client thread can block on.

use std::collections::{BTreeMap, VecDeque};

use crossbeam_channel as cbc;

use crate::err::DbgErr;
use crate::ids::{EventId, WaveId};

/// What happened.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum EventKind {
    /// A wave stopped.
    WaveStop,
    /// A stop or single-step request finished without the wave reporting a stop.
    WaveCommandTerminated,
}

/// Progress of an event through the client.
///
/// States are ordered: `Created < Reported < Processed`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum EventState {
    /// The event exists but the client has not seen it.
    Created,
    /// The event was returned to the client.
    Reported,
    /// The client acknowledged the event.
    Processed,
}

/// An event.
#[derive(Clone, Debug)]
pub struct Event {
    id: EventId,
    kind: EventKind,
    wave: Option<WaveId>,
    state: EventState
}
impl Event {
    /// The event's id.
    pub fn id(&self) -> EventId {
        self.id
    }
    /// The event's kind.
    pub fn kind(&self) -> EventKind {
        self.kind
    }
    /// The wave the event is about.
    pub fn wave(&self) -> Option<WaveId> {
        self.wave
    }
    /// The event's state.
    pub fn state(&self) -> EventState {
        self.state
    }
}

/// The events of a process.
#[derive(Debug)]
pub struct EventQueue {
    events: BTreeMap<EventId, Event>,
    pending: VecDeque<EventId>,
    notify_tx: cbc::Sender<()>,
    notify_rx: cbc::Receiver<()>
}
impl Default for EventQueue {
    fn default() -> Self {
        let (notify_tx, notify_rx) = cbc::bounded(1);
        Self { events: BTreeMap::new(), pending: VecDeque::new(), notify_tx, notify_rx }
    }
}

impl EventQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates an event. It is not visible to the client until [enqueued](Self::enqueue).
    pub fn create(&mut self, id: EventId, kind: EventKind, wave: Option<WaveId>) -> EventId {
        log::debug!("created event_{} ({kind:?} on {wave:?})", id.0);
        self.events.insert(id, Event { id, kind, wave, state: EventState::Created });
        id
    }

    /// Makes an event pending and wakes up the notifier.
    pub fn enqueue(&mut self, id: EventId) {
        debug_assert!(self.events.contains_key(&id), "enqueueing unknown {id}");
        self.pending.push_back(id);

        // A full channel already carries a wake-up.
        let _ = self.notify_tx.try_send(());
    }

    /// Pops the oldest pending event and marks it reported.
    pub fn next_pending(&mut self) -> Option<&Event> {
        let id = self.pending.pop_front()?;
        if self.pending.is_empty() {
            let _ = self.notify_rx.try_recv();
        }

        let event = self.events.get_mut(&id)?;
        event.state = EventState::Reported;
        Some(event)
    }

    /// Marks an event processed by the client.
    pub fn processed(&mut self, id: EventId) -> Result<(), DbgErr> {
        let event = self.events.get_mut(&id).ok_or(DbgErr::InvalidEventId)?;
        event.state = EventState::Processed;
        Ok(())
    }

    /// Drops the processed events for which `keep` returns false.
    pub fn prune_processed(&mut self, mut keep: impl FnMut(EventId) -> bool) {
        self.events.retain(|&id, e| e.state < EventState::Processed || keep(id));
    }

    /// Gets an event by id.
    pub fn find(&self, id: EventId) -> Option<&Event> {
        self.events.get(&id)
    }

    /// Channel signaled when events are pending.
    pub fn notifier(&self) -> cbc::Receiver<()> {
        self.notify_rx.clone()
    }
}
