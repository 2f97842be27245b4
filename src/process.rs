//! Processes and the objects they own.
//!
//! A [`Process`] owns its waves and everything the waves depend on, the [`Substrate`]:
//! the driver, agents, queues, dispatches, displaced steps, events and watchpoints.
//! The two halves are split so that a wave can be borrowed mutably while it reaches into
//! the rest of its process.
//!
//! Waves are created and updated from context-save records, which only exist while
//! their queue is suspended. Queues are suspended and resumed through the process
//! ([`Process::suspend_queues`], [`Process::resume_queues`], [`Process::with_queue_suspended`]),
//! and resuming a queue writes back the dirty register caches of its waves.

pub mod event;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crossbeam_channel as cbc;

use crate::arch::{Architecture, CwsrRecord, RegNum};
use crate::displaced::{DisplacedSteppingRegistry, StepOutcome};
use crate::driver::Driver;
use crate::err::DbgErr;
use crate::flags::{Exceptions, OsExceptionMask, ResumeMode, StopReason, Visibility, WaveState};
use crate::ids::{AgentId, DispatchId, DisplacedSteppingId, EventId, IdAllocator, OsWatchId, ProcessId, QueueId, WatchpointId, WaveId};
use crate::wave::xfer::{AddressSpace, XferBuf};
use crate::wave::Wave;

use self::event::{Event, EventKind, EventQueue, EventState};

/// Configuration of a process.
///
/// Read the field descriptions for more details.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ProcessFlags {
    /// Whether the hardware initializes the trap temporary registers of new waves.
    ///
    /// If it does not, they are zeroed the first time a wave is observed,
    /// since some of them are inspected to tell why a wave entered the trap handler.
    ///
    /// By default, this flag is `false`.
    pub ttmps_setup_enabled: bool,

    /// Whether queues suspended for the duration of an operation are resumed afterwards.
    ///
    /// This is cleared when the client wants the whole process to stay frozen.
    ///
    /// By default, this flag is `true`.
    pub forward_progress_needed: bool,
}
impl Default for ProcessFlags {
    fn default() -> Self {
        Self {
            ttmps_setup_enabled: false,
            forward_progress_needed: true
        }
    }
}

/// A chunk of target memory an instruction can be copied to and executed from.
#[derive(Debug, PartialEq, Eq)]
pub struct InstructionBuffer {
    begin: u64,
    capacity: usize,
    size: usize
}
impl InstructionBuffer {
    /// Creates an empty buffer at `begin` that can hold `capacity` bytes.
    pub fn new(begin: u64, capacity: usize) -> Self {
        Self { begin, capacity, size: 0 }
    }
    /// Address of the buffer.
    pub fn begin(&self) -> u64 {
        self.begin
    }
    /// Number of bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    /// Number of bytes in use.
    pub fn size(&self) -> usize {
        self.size
    }
    /// Sets the number of bytes in use.
    ///
    /// # Panics
    /// Panics if `size` exceeds the capacity.
    pub fn resize(&mut self, size: usize) {
        assert!(size <= self.capacity, "instruction buffer overflow ({size} > {})", self.capacity);
        self.size = size;
    }
}

/// Client-provided services for the waves of a queue.
pub trait QueueCallbacks {
    /// Address of an immutable instruction parked waves point at.
    fn park_instruction_address(&self) -> u64;
    /// Address of an immutable instruction that ends a wave.
    fn terminating_instruction_address(&self) -> u64;
    /// Allocates a buffer to execute displaced instructions from.
    fn allocate_instruction_buffer(&mut self) -> Result<InstructionBuffer, DbgErr>;
    /// Returns a buffer obtained from [`QueueCallbacks::allocate_instruction_buffer`].
    fn release_instruction_buffer(&mut self, buffer: InstructionBuffer);
    /// Base address and size of the scratch memory of a wave.
    fn scratch_memory_region(&self, record: &dyn CwsrRecord) -> (u64, u64);
}

/// A GPU device.
pub struct Agent {
    id: AgentId,
    architecture: Arc<dyn Architecture>,
    exceptions: OsExceptionMask
}
impl Agent {
    /// The agent's id.
    pub fn id(&self) -> AgentId {
        self.id
    }
    /// The agent's architecture.
    pub fn architecture(&self) -> &Arc<dyn Architecture> {
        &self.architecture
    }
    /// Exceptions reported by the device and not yet cleared.
    pub fn exceptions(&self) -> OsExceptionMask {
        self.exceptions
    }
}

/// A hardware queue.
pub struct Queue {
    id: QueueId,
    agent: AgentId,
    suspended: bool,
    valid: bool,
    dirty_waves: BTreeSet<WaveId>,
    callbacks: Box<dyn QueueCallbacks>
}
impl Queue {
    /// The queue's id.
    pub fn id(&self) -> QueueId {
        self.id
    }
    /// The agent the queue feeds.
    pub fn agent(&self) -> AgentId {
        self.agent
    }
    /// Whether the queue is suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }
    /// Whether the queue still exists in the traced process.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// A kernel launch.
#[derive(Clone, Copy, Debug)]
pub struct Dispatch {
    id: DispatchId,
    queue: QueueId
}
impl Dispatch {
    /// The dispatch's id.
    pub fn id(&self) -> DispatchId {
        self.id
    }
    /// The queue the dispatch was submitted to.
    pub fn queue(&self) -> QueueId {
        self.queue
    }
}

/// Everything a process owns besides its waves.
pub struct Substrate {
    pub(crate) process_id: ProcessId,
    pub(crate) driver: Box<dyn Driver>,
    pub(crate) agents: BTreeMap<AgentId, Agent>,
    pub(crate) queues: BTreeMap<QueueId, Queue>,
    pub(crate) dispatches: BTreeMap<DispatchId, Dispatch>,
    pub(crate) displaced: DisplacedSteppingRegistry,
    pub(crate) events: EventQueue,
    pub(crate) watchpoints: BTreeMap<OsWatchId, WatchpointId>,
    pub(crate) flags: ProcessFlags,
    pub(crate) waves_changed: bool,
    pub(crate) ids: IdAllocator
}

impl Substrate {
    /// The id of the owning process.
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }
    /// The driver of the process.
    pub fn driver(&mut self) -> &mut dyn Driver {
        self.driver.as_mut()
    }
    /// The configuration of the process.
    pub fn flags(&self) -> ProcessFlags {
        self.flags
    }
    /// The events of the process.
    pub fn events(&self) -> &EventQueue {
        &self.events
    }
    /// The displaced steps of the process.
    pub fn displaced(&self) -> &DisplacedSteppingRegistry {
        &self.displaced
    }

    /// Gets a queue.
    ///
    /// # Panics
    /// Panics if the queue does not exist. Queues outlive their waves.
    pub fn queue(&self, id: QueueId) -> &Queue {
        self.queues.get(&id).unwrap_or_else(|| panic!("{id} does not exist"))
    }
    fn queue_mut(&mut self, id: QueueId) -> &mut Queue {
        self.queues.get_mut(&id).unwrap_or_else(|| panic!("{id} does not exist"))
    }
    /// Whether a queue is suspended.
    pub fn is_queue_suspended(&self, id: QueueId) -> bool {
        self.queues.get(&id).is_some_and(Queue::is_suspended)
    }
    /// Whether a queue still exists in the traced process.
    pub fn is_queue_valid(&self, id: QueueId) -> bool {
        self.queues.get(&id).is_some_and(Queue::is_valid)
    }
    /// The client callbacks of a queue.
    pub fn callbacks(&self, queue: QueueId) -> &dyn QueueCallbacks {
        self.queue(queue).callbacks.as_ref()
    }
    /// The client callbacks of a queue.
    pub fn callbacks_mut(&mut self, queue: QueueId) -> &mut dyn QueueCallbacks {
        self.queue_mut(queue).callbacks.as_mut()
    }

    /// Exceptions currently latched on an agent.
    pub fn agent_exceptions(&self, agent: AgentId) -> OsExceptionMask {
        self.agents.get(&agent).map_or(OsExceptionMask::NONE, Agent::exceptions)
    }

    /// Records that a wave's register cache must be flushed before its queue resumes.
    pub(crate) fn register_dirty_cache(&mut self, queue: QueueId, wave: WaveId) {
        self.queue_mut(queue).dirty_waves.insert(wave);
    }

    /// Creates and enqueues an event about a wave.
    pub(crate) fn raise_event(&mut self, kind: EventKind, wave: WaveId) -> EventId {
        let id = self.events.create(self.ids.next(), kind, Some(wave));
        self.events.enqueue(id);
        id
    }

    /// Drops a wave's reference to a displaced step,
    /// returning the instruction buffer to its queue if the step is destroyed.
    pub(crate) fn release_displaced_stepping(&mut self, id: DisplacedSteppingId) {
        let queue = self.displaced.get(id).map(|op| op.queue());
        if let (Some(buffer), Some(queue)) = (self.displaced.release(id), queue) {
            if let Some(q) = self.queues.get_mut(&queue) {
                q.callbacks.release_instruction_buffer(buffer);
            }
        }
    }

    /// The watchpoint registered for a driver watch slot.
    pub fn watchpoint(&self, os_watch_id: OsWatchId) -> Option<WatchpointId> {
        self.watchpoints.get(&os_watch_id).copied()
    }
}

/// An attached process.
pub struct Process {
    id: ProcessId,
    pub(crate) waves: BTreeMap<WaveId, Wave>,
    pub(crate) sub: Substrate
}

impl Process {
    /// Creates a process over a driver.
    ///
    /// Handles are drawn from `ids`, which can be shared among processes.
    pub fn new(id: ProcessId, driver: Box<dyn Driver>, flags: ProcessFlags, ids: IdAllocator) -> Self {
        Self {
            id,
            waves: BTreeMap::new(),
            sub: Substrate {
                process_id: id,
                driver,
                agents: BTreeMap::new(),
                queues: BTreeMap::new(),
                dispatches: BTreeMap::new(),
                displaced: DisplacedSteppingRegistry::new(),
                events: EventQueue::new(),
                watchpoints: BTreeMap::new(),
                flags,
                waves_changed: false,
                ids
            }
        }
    }

    /// The process's id.
    pub fn id(&self) -> ProcessId {
        self.id
    }
    /// The process's configuration.
    pub fn flags(&self) -> ProcessFlags {
        self.sub.flags
    }
    /// Sets the process's configuration.
    pub fn set_flags(&mut self, flags: ProcessFlags) {
        self.sub.flags = flags;
    }
    /// Everything the process owns besides its waves.
    pub fn substrate(&self) -> &Substrate {
        &self.sub
    }

    /// Gets a wave.
    pub fn wave(&self, id: WaveId) -> Option<&Wave> {
        self.waves.get(&id)
    }
    /// Iterates over every wave, including hidden ones.
    pub fn waves(&self) -> impl Iterator<Item = &Wave> {
        self.waves.values()
    }
    /// Gets a wave the client can see. Hidden waves are not reported, so they are unknown to the client.
    pub fn visible_wave(&self, id: WaveId) -> Option<&Wave> {
        self.waves.get(&id).filter(|w| w.visibility() == Visibility::Visible)
    }
    fn wave_ref(&self, id: WaveId) -> Result<&Wave, DbgErr> {
        self.visible_wave(id).ok_or(DbgErr::InvalidWaveId)
    }

    /// Gets an agent.
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.sub.agents.get(&id)
    }
    /// Gets a queue.
    pub fn queue(&self, id: QueueId) -> Option<&Queue> {
        self.sub.queues.get(&id)
    }
    /// Gets a dispatch.
    pub fn dispatch(&self, id: DispatchId) -> Option<&Dispatch> {
        self.sub.dispatches.get(&id)
    }

    /// Adds an agent of the given architecture.
    pub fn add_agent(&mut self, architecture: Arc<dyn Architecture>) -> AgentId {
        let id = self.sub.ids.next();
        self.sub.agents.insert(id, Agent { id, architecture, exceptions: OsExceptionMask::NONE });
        id
    }

    /// Adds a running queue to an agent.
    pub fn add_queue(&mut self, agent: AgentId, callbacks: Box<dyn QueueCallbacks>) -> Result<QueueId, DbgErr> {
        if !self.sub.agents.contains_key(&agent) {
            return Err(DbgErr::InvalidAgentId);
        }

        let id = self.sub.ids.next();
        self.sub.queues.insert(id, Queue {
            id, agent, suspended: false, valid: true, dirty_waves: BTreeSet::new(), callbacks
        });
        Ok(id)
    }

    /// Adds a dispatch to a queue.
    pub fn add_dispatch(&mut self, queue: QueueId) -> Result<DispatchId, DbgErr> {
        if !self.sub.queues.contains_key(&queue) {
            return Err(DbgErr::InvalidQueueId);
        }

        let id = self.sub.ids.next();
        self.sub.dispatches.insert(id, Dispatch { id, queue });
        Ok(id)
    }

    /// Creates a wave first observed in a context-save record.
    ///
    /// `group_leader` is the first wave of the wave's work-group,
    /// or `None` if this wave is the leader.
    ///
    /// # Panics
    /// Panics if the queue is not suspended.
    pub fn create_wave(
        &mut self,
        queue: QueueId,
        dispatch: Option<DispatchId>,
        group_leader: Option<WaveId>,
        visibility: Visibility,
        record: Box<dyn CwsrRecord>
    ) -> Result<WaveId, DbgErr> {
        let agent = self.sub.queues.get(&queue).ok_or(DbgErr::InvalidQueueId)?.agent;
        if dispatch.is_some_and(|d| !self.sub.dispatches.contains_key(&d)) {
            return Err(DbgErr::InvalidArgument);
        }
        if group_leader.is_some_and(|l| !self.waves.contains_key(&l)) {
            return Err(DbgErr::InvalidWaveId);
        }
        let architecture = Arc::clone(&self.sub.agents[&agent].architecture);

        let id = self.sub.ids.next();
        let mut wave = Wave::new(id, dispatch, queue, agent, architecture, visibility);
        wave.update(&mut self.sub, group_leader.unwrap_or(id), record)?;

        self.waves.insert(id, wave);
        self.sub.waves_changed = true;
        Ok(id)
    }

    /// Updates a wave with the context-save record of a new suspension.
    ///
    /// # Panics
    /// Panics if the wave's queue is not suspended.
    pub fn update_wave(&mut self, id: WaveId, group_leader: Option<WaveId>, record: Box<dyn CwsrRecord>) -> Result<(), DbgErr> {
        let leader = group_leader.unwrap_or(id);
        if !self.waves.contains_key(&leader) {
            return Err(DbgErr::InvalidWaveId);
        }

        let wave = self.waves.get_mut(&id).ok_or(DbgErr::InvalidWaveId)?;
        wave.update(&mut self.sub, leader, record)
    }

    /// Destroys a wave that exited.
    ///
    /// # Panics
    /// Panics if the wave is displaced stepping on a queue that still exists.
    pub fn destroy_wave(&mut self, id: WaveId) -> Result<(), DbgErr> {
        let wave = self.waves.remove(&id).ok_or(DbgErr::InvalidWaveId)?;

        if let Some(q) = self.sub.queues.get_mut(&wave.queue()) {
            q.dirty_waves.remove(&id);
        }
        if let Some(ds) = wave.displaced_stepping() {
            // Displaced steps of live queues are completed before their waves go away.
            assert!(!self.sub.is_queue_valid(wave.queue()), "destroying {id} while it is displaced stepping");
            self.sub.release_displaced_stepping(ds);
        }

        self.prune_events();
        log::trace!("destroyed {id}");
        self.sub.waves_changed = true;
        Ok(())
    }

    /// Changes whether a wave is reported to the client.
    pub fn set_wave_visibility(&mut self, id: WaveId, visibility: Visibility) -> Result<(), DbgErr> {
        let wave = self.waves.get_mut(&id).ok_or(DbgErr::InvalidWaveId)?;
        wave.set_visibility(&mut self.sub, visibility)
    }

    /// Moves a wave to a new state.
    ///
    /// When the wave leaves the stopped state and no stopped wave of its agent
    /// reports a memory violation anymore, the agent's latched device memory
    /// violation is cleared so that it is not attributed to another engine.
    ///
    /// # Panics
    /// Panics if the wave's queue is not suspended.
    pub fn set_wave_state(&mut self, id: WaveId, state: WaveState, exceptions: Exceptions) -> Result<(), DbgErr> {
        let wave = self.waves.get_mut(&id).ok_or(DbgErr::InvalidWaveId)?;
        assert!(self.sub.is_queue_suspended(wave.queue()), "changing the state of {id} while its queue is running");

        wave.set_state(&mut self.sub, state, exceptions)?;

        let agent = wave.agent();
        if state != WaveState::Stop {
            self.clear_device_memory_violation(agent);
        }
        Ok(())
    }

    fn clear_device_memory_violation(&mut self, agent: AgentId) {
        let Some(a) = self.sub.agents.get_mut(&agent) else { return };
        if !a.exceptions.contains(OsExceptionMask::DEVICE_MEMORY_VIOLATION) { return };

        let attributed = self.waves.values().any(|w| {
            w.agent() == agent
                && w.state() == WaveState::Stop
                && w.stop_reason().contains(StopReason::MEMORY_VIOLATION)
        });
        if !attributed {
            log::debug!("clearing device memory violation on {agent}");
            a.exceptions.remove(OsExceptionMask::DEVICE_MEMORY_VIOLATION);
        }
    }

    /// Latches exceptions reported by the device on an agent.
    pub fn latch_agent_exceptions(&mut self, agent: AgentId, exceptions: OsExceptionMask) -> Result<(), DbgErr> {
        let a = self.sub.agents.get_mut(&agent).ok_or(DbgErr::InvalidAgentId)?;
        a.exceptions |= exceptions;
        Ok(())
    }

    /// Associates a driver watch slot with a new watchpoint.
    pub fn register_watchpoint(&mut self, os_watch_id: OsWatchId) -> WatchpointId {
        let id = self.sub.ids.next();
        self.sub.watchpoints.insert(os_watch_id, id);
        id
    }

    /// Suspends the given queues. Queues that are already suspended or gone are skipped.
    pub fn suspend_queues(&mut self, queues: &[QueueId], reason: &str) -> Result<(), DbgErr> {
        let queues: Vec<_> = queues.iter()
            .copied()
            .filter(|q| self.sub.queues.get(q).is_some_and(|q| !q.suspended && q.valid))
            .collect();
        if queues.is_empty() { return Ok(()) };

        self.sub.driver.suspend_queues(&queues)?;
        for q in &queues {
            self.sub.queue_mut(*q).suspended = true;
        }
        log::info!("suspended {queues:?} ({reason})");
        Ok(())
    }

    /// Resumes the given queues, flushing the dirty register caches of their waves first.
    /// Queues that are running or gone are skipped.
    pub fn resume_queues(&mut self, queues: &[QueueId], reason: &str) -> Result<(), DbgErr> {
        let queues: Vec<_> = queues.iter()
            .copied()
            .filter(|q| self.sub.queues.get(q).is_some_and(|q| q.suspended && q.valid))
            .collect();
        if queues.is_empty() { return Ok(()) };

        for &q in &queues {
            let dirty = std::mem::take(&mut self.sub.queue_mut(q).dirty_waves);
            for w in dirty {
                if let Some(wave) = self.waves.get_mut(&w) {
                    wave.flush_register_cache(self.sub.driver.as_mut())?;
                }
            }
        }

        self.sub.driver.resume_queues(&queues)?;
        for q in &queues {
            self.sub.queue_mut(*q).suspended = false;
        }
        log::info!("resumed {queues:?} ({reason})");
        Ok(())
    }

    /// Runs `f` with a queue suspended.
    ///
    /// If this suspended the queue, it is resumed afterwards when the process
    /// needs forward progress and the queue still exists.
    /// Waves may exit while the queue is suspended, so `f` should look them up again.
    pub fn with_queue_suspended<T>(
        &mut self,
        queue: QueueId,
        reason: &str,
        f: impl FnOnce(&mut Self) -> Result<T, DbgErr>
    ) -> Result<T, DbgErr> {
        let was_suspended = self.sub.queues.get(&queue).ok_or(DbgErr::InvalidQueueId)?.suspended;
        if !was_suspended {
            self.suspend_queues(&[queue], reason)?;
        }

        let result = f(self);

        if !was_suspended && self.sub.flags.forward_progress_needed && self.sub.is_queue_valid(queue) {
            let resumed = self.resume_queues(&[queue], reason);
            let value = result?;
            resumed?;
            return Ok(value);
        }
        result
    }

    /// Marks a queue as gone from the traced process.
    pub fn invalidate_queue(&mut self, queue: QueueId) -> Result<(), DbgErr> {
        let q = self.sub.queues.get_mut(&queue).ok_or(DbgErr::InvalidQueueId)?;
        q.valid = false;
        Ok(())
    }

    /// Removes the queues that are gone, along with their waves.
    pub fn update_queues(&mut self) -> Result<(), DbgErr> {
        let gone: Vec<_> = self.sub.queues.values()
            .filter(|q| !q.valid)
            .map(Queue::id)
            .collect();

        for q in gone {
            let waves: Vec<_> = self.waves.values()
                .filter(|w| w.queue() == q)
                .map(Wave::id)
                .collect();
            for w in waves {
                self.destroy_wave(w)?;
            }

            self.sub.dispatches.retain(|_, d| d.queue != q);
            self.sub.queues.remove(&q);
            log::debug!("removed {q}");
        }
        Ok(())
    }

    /// Ids of the waves reported to the client.
    pub fn visible_wave_ids(&self) -> Vec<WaveId> {
        self.waves.values()
            .filter(|w| w.visibility() == Visibility::Visible)
            .map(Wave::id)
            .collect()
    }
    /// Returns whether the wave list changed since the last call, and clears the flag.
    pub fn take_waves_changed(&mut self) -> bool {
        std::mem::take(&mut self.sub.waves_changed)
    }

    /// Pops the oldest pending event, marking it reported.
    pub fn next_pending_event(&mut self) -> Option<Event> {
        self.sub.events.next_pending().cloned()
    }
    /// Marks an event processed by the client.
    ///
    /// Processed events are dropped once no wave refers to them as its last stop.
    pub fn event_processed(&mut self, id: EventId) -> Result<(), DbgErr> {
        self.sub.events.processed(id)?;
        self.prune_events();
        Ok(())
    }
    fn prune_events(&mut self) {
        let referenced: BTreeSet<EventId> = self.waves.values()
            .filter_map(Wave::last_stop_event_id)
            .collect();
        self.sub.events.prune_processed(|id| referenced.contains(&id));
    }
    /// Gets an event.
    pub fn event(&self, id: EventId) -> Option<&Event> {
        self.sub.events.find(id)
    }
    /// Channel signaled whenever events are pending.
    pub fn notifier(&self) -> cbc::Receiver<()> {
        self.sub.events.notifier()
    }

    /// The state of a wave as seen by the client.
    pub fn client_visible_state(&self, id: WaveId) -> Result<WaveState, DbgErr> {
        Ok(self.wave_ref(id)?.client_visible_state(&self.sub.events))
    }

    fn require_stopped(&self, id: WaveId) -> Result<&Wave, DbgErr> {
        let wave = self.wave_ref(id)?;
        match wave.client_visible_state(&self.sub.events) {
            WaveState::Stop => Ok(wave),
            _ => Err(DbgErr::WaveNotStopped)
        }
    }

    /// Requests a wave to stop.
    pub fn stop_wave(&mut self, id: WaveId) -> Result<(), DbgErr> {
        let wave = self.wave_ref(id)?;
        if wave.client_visible_state(&self.sub.events) == WaveState::Stop {
            return Err(DbgErr::WaveStopped);
        }
        if wave.stop_requested() {
            return Err(DbgErr::WaveOutstandingStop);
        }

        let queue = wave.queue();
        self.with_queue_suspended(queue, "stop wave", |p| {
            p.wave_ref(id)?;
            p.set_wave_state(id, WaveState::Stop, Exceptions::NONE)
        })
    }

    /// Resumes a stopped wave, optionally delivering exceptions to it.
    pub fn resume_wave(&mut self, id: WaveId, mode: ResumeMode, exceptions: Exceptions) -> Result<(), DbgErr> {
        let wave = self.wave_ref(id)?;
        if !exceptions.is_recognized() {
            return Err(DbgErr::InvalidArgument);
        }
        // A stop the client has not processed yet blocks the resume, even if it was not reported.
        if wave.state() == WaveState::Stop
            && wave.last_stop_event(&self.sub.events).is_some_and(|e| e.state() < EventState::Processed) {
            return Err(DbgErr::WaveNotResumable);
        }
        if wave.client_visible_state(&self.sub.events) != WaveState::Stop {
            return Err(DbgErr::WaveNotStopped);
        }
        if wave.displaced_stepping().is_some() && mode != ResumeMode::SingleStep {
            return Err(DbgErr::ResumeDisplacedStepping);
        }

        let queue = wave.queue();
        let state = match mode {
            ResumeMode::Normal => WaveState::Run,
            ResumeMode::SingleStep => WaveState::SingleStep,
        };
        self.with_queue_suspended(queue, "resume wave", |p| {
            p.wave_ref(id)?;
            p.set_wave_state(id, state, exceptions)
        })
    }

    /// Starts a displaced step over the breakpoint a stopped wave is halted at.
    ///
    /// `saved_instruction` holds the bytes the breakpoint marker replaced.
    pub fn displaced_stepping_start(&mut self, id: WaveId, saved_instruction: &[u8]) -> Result<DisplacedSteppingId, DbgErr> {
        let wave = self.require_stopped(id)?;
        if wave.displaced_stepping().is_some() {
            return Err(DbgErr::DisplacedSteppingActive);
        }

        let queue = wave.queue();
        self.with_queue_suspended(queue, "start displaced stepping", |p| {
            let wave = p.waves.get_mut(&id).ok_or(DbgErr::InvalidWaveId)?;
            wave.displaced_stepping_start(&mut p.sub, saved_instruction)
        })
    }

    /// Completes the displaced step of a stopped wave.
    pub fn displaced_stepping_complete(&mut self, id: WaveId, ds: DisplacedSteppingId) -> Result<StepOutcome, DbgErr> {
        let wave = self.require_stopped(id)?;
        if wave.displaced_stepping() != Some(ds) {
            return Err(DbgErr::InvalidDisplacedSteppingId);
        }

        let queue = wave.queue();
        self.with_queue_suspended(queue, "complete displaced stepping", |p| {
            let wave = p.waves.get_mut(&id).ok_or(DbgErr::InvalidWaveId)?;
            wave.displaced_stepping_complete(&mut p.sub)
        })
    }

    /// Reads `value.len()` bytes of a register of a stopped wave, starting at byte `offset`.
    pub fn read_register(&mut self, id: WaveId, regnum: RegNum, offset: usize, value: &mut [u8]) -> Result<(), DbgErr> {
        let wave = self.require_stopped(id)?;
        let queue = wave.queue();
        if wave.is_register_cached(regnum) {
            let wave = self.waves.get(&id).ok_or(DbgErr::InvalidWaveId)?;
            return wave.read_register(&mut self.sub, regnum, offset, value);
        }

        self.with_queue_suspended(queue, "read register", |p| {
            let wave = p.waves.get(&id).ok_or(DbgErr::InvalidWaveId)?;
            wave.read_register(&mut p.sub, regnum, offset, value)
        })
    }

    /// Writes `value.len()` bytes of a register of a stopped wave, starting at byte `offset`.
    pub fn write_register(&mut self, id: WaveId, regnum: RegNum, offset: usize, value: &[u8]) -> Result<(), DbgErr> {
        let wave = self.require_stopped(id)?;
        let queue = wave.queue();
        if wave.is_register_cached(regnum) {
            let wave = self.waves.get_mut(&id).ok_or(DbgErr::InvalidWaveId)?;
            return wave.write_register(&mut self.sub, regnum, offset, value);
        }

        self.with_queue_suspended(queue, "write register", |p| {
            let wave = p.waves.get_mut(&id).ok_or(DbgErr::InvalidWaveId)?;
            wave.write_register(&mut p.sub, regnum, offset, value)
        })
    }

    /// Transfers memory of a stopped wave's address space, returning the number of bytes moved.
    ///
    /// `lane` selects the lane for per-lane address spaces.
    pub fn xfer_segment_memory(
        &mut self,
        id: WaveId,
        space: &AddressSpace,
        lane: Option<usize>,
        address: u64,
        buf: XferBuf<'_>
    ) -> Result<usize, DbgErr> {
        let queue = self.require_stopped(id)?.queue();

        self.with_queue_suspended(queue, "xfer segment memory", |p| {
            let wave = p.waves.get(&id).ok_or(DbgErr::InvalidWaveId)?;
            // Local memory lives in the context-save record of the group leader.
            let lds_base = p.waves.get(&wave.group_leader())
                .and_then(|leader| leader.register_address(RegNum::LDS_0));
            wave.xfer_segment_memory(&mut p.sub, space, lane, address, buf, lds_base)
        })
    }
}
