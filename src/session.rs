//! The client-facing entry points.
//!
//! A [`Session`] holds every attached process. Operations address waves by id alone,
//! and the session finds the process owning the wave.
//!
//! ```
//! use wavectl::driver::host::HostMemory;
//! use wavectl::session::Session;
//!
//! let mut session = Session::new();
//! let pid = session.attach_process(Box::new(HostMemory::new()), Default::default());
//!
//! let (waves, changed) = session.process_wave_list(Some(pid)).unwrap();
//! assert!(waves.is_empty());
//! assert!(!changed);
//! ```

use std::collections::BTreeMap;

use crate::arch::RegNum;
use crate::displaced::StepOutcome;
use crate::driver::Driver;
use crate::err::DbgErr;
use crate::flags::{Exceptions, ResumeMode, WaveState};
use crate::ids::{DisplacedSteppingId, EventId, IdAllocator, ProcessId, QueueId, WaveId};
use crate::process::event::Event;
use crate::process::{Process, ProcessFlags};
use crate::wave::info::{WaveInfo, WaveInfoQuery};
use crate::wave::xfer::{AddressSpace, XferBuf};

/// A debugging session.
#[derive(Default)]
pub struct Session {
    processes: BTreeMap<ProcessId, Process>,
    ids: IdAllocator
}

impl Session {
    /// Creates a session with no process.
    pub fn new() -> Self {
        Default::default()
    }

    /// Attaches a process over its driver.
    pub fn attach_process(&mut self, driver: Box<dyn Driver>, flags: ProcessFlags) -> ProcessId {
        let id = self.ids.next();
        self.processes.insert(id, Process::new(id, driver, flags, self.ids.clone()));
        log::debug!("attached {id}");
        id
    }

    /// Detaches a process, dropping all of its state.
    pub fn detach_process(&mut self, id: ProcessId) -> Result<Process, DbgErr> {
        self.processes.remove(&id).ok_or(DbgErr::InvalidProcessId)
    }

    /// Gets a process.
    pub fn process(&self, id: ProcessId) -> Result<&Process, DbgErr> {
        self.processes.get(&id).ok_or(DbgErr::InvalidProcessId)
    }
    /// Gets a process mutably.
    pub fn process_mut(&mut self, id: ProcessId) -> Result<&mut Process, DbgErr> {
        self.processes.get_mut(&id).ok_or(DbgErr::InvalidProcessId)
    }
    /// Iterates over the attached processes.
    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    fn process_of(&mut self, wave: WaveId) -> Result<&mut Process, DbgErr> {
        self.processes.values_mut()
            .find(|p| p.visible_wave(wave).is_some())
            .ok_or(DbgErr::InvalidWaveId)
    }

    /// Requests a wave to stop.
    ///
    /// The stop is reported later by a [stop event](crate::process::event::EventKind::WaveStop).
    /// This fails with [`DbgErr::WaveStopped`] if the client already sees the wave stopped,
    /// and with [`DbgErr::WaveOutstandingStop`] if a stop was already requested.
    pub fn wave_stop(&mut self, wave: WaveId) -> Result<(), DbgErr> {
        self.process_of(wave)?.stop_wave(wave)
    }

    /// Resumes a stopped wave, normally or for a single instruction,
    /// delivering `exceptions` to it.
    ///
    /// The event that reported the wave's stop must have been processed.
    pub fn wave_resume(&mut self, wave: WaveId, mode: ResumeMode, exceptions: Exceptions) -> Result<(), DbgErr> {
        self.process_of(wave)?.resume_wave(wave, mode, exceptions)
    }

    /// Answers a query about a wave.
    ///
    /// Queries which [require a stop](WaveInfoQuery::requires_stop) fail with
    /// [`DbgErr::WaveNotStopped`] unless the client sees the wave stopped.
    pub fn wave_get_info(&mut self, wave: WaveId, query: WaveInfoQuery) -> Result<WaveInfo, DbgErr> {
        let process = self.process_of(wave)?;
        if query.requires_stop() && process.client_visible_state(wave)? != WaveState::Stop {
            return Err(DbgErr::WaveNotStopped);
        }

        let w = process.waves.get(&wave).ok_or(DbgErr::InvalidWaveId)?;
        w.get_info(&mut process.sub, query)
    }

    /// Lists the waves visible to the client, for one process or for all of them.
    ///
    /// Running queues are suspended to take a consistent snapshot, then resumed
    /// if their process needs forward progress.
    /// This returns the list and whether it changed since the last call.
    pub fn process_wave_list(&mut self, process: Option<ProcessId>) -> Result<(Vec<WaveId>, bool), DbgErr> {
        let selected: Vec<_> = match process {
            Some(id) => vec![self.process(id)?.id()],
            None => self.processes.keys().copied().collect(),
        };

        let mut waves = vec![];
        let mut changed = false;
        for id in selected {
            let p = self.process_mut(id)?;
            p.update_queues()?;

            let running: Vec<QueueId> = p.substrate().queues.values()
                .filter(|q| !q.is_suspended() && q.is_valid())
                .map(|q| q.id())
                .collect();
            p.suspend_queues(&running, "refresh wave list")?;

            waves.extend(p.visible_wave_ids());
            changed |= p.take_waves_changed();

            if p.flags().forward_progress_needed {
                p.resume_queues(&running, "refresh wave list")?;
            }
        }
        Ok((waves, changed))
    }

    /// Starts a displaced step for a stopped wave. See [`Process::displaced_stepping_start`].
    pub fn displaced_stepping_start(&mut self, wave: WaveId, saved_instruction: &[u8]) -> Result<DisplacedSteppingId, DbgErr> {
        self.process_of(wave)?.displaced_stepping_start(wave, saved_instruction)
    }
    /// Completes a displaced step. See [`Process::displaced_stepping_complete`].
    pub fn displaced_stepping_complete(&mut self, wave: WaveId, ds: DisplacedSteppingId) -> Result<StepOutcome, DbgErr> {
        self.process_of(wave)?.displaced_stepping_complete(wave, ds)
    }

    /// Transfers memory in an address space of a stopped wave, returning the number of bytes moved.
    pub fn xfer_segment_memory(
        &mut self,
        wave: WaveId,
        space: &AddressSpace,
        lane: Option<usize>,
        address: u64,
        buf: XferBuf<'_>
    ) -> Result<usize, DbgErr> {
        self.process_of(wave)?.xfer_segment_memory(wave, space, lane, address, buf)
    }

    /// Reads a register of a stopped wave.
    pub fn read_register(&mut self, wave: WaveId, regnum: RegNum, offset: usize, value: &mut [u8]) -> Result<(), DbgErr> {
        self.process_of(wave)?.read_register(wave, regnum, offset, value)
    }
    /// Writes a register of a stopped wave.
    pub fn write_register(&mut self, wave: WaveId, regnum: RegNum, offset: usize, value: &[u8]) -> Result<(), DbgErr> {
        self.process_of(wave)?.write_register(wave, regnum, offset, value)
    }

    /// Pops the oldest pending event of a process, marking it reported.
    pub fn next_pending_event(&mut self, process: ProcessId) -> Result<Option<Event>, DbgErr> {
        Ok(self.process_mut(process)?.next_pending_event())
    }
    /// Marks an event processed.
    pub fn event_processed(&mut self, event: EventId) -> Result<(), DbgErr> {
        self.processes.values_mut()
            .find(|p| p.event(event).is_some())
            .ok_or(DbgErr::InvalidEventId)?
            .event_processed(event)
    }
}

#[cfg(test)]
mod tests {
    use crate::flags::{StopReason, Visibility};
    use crate::test_support::*;

    use super::*;

    #[test]
    fn unknown_ids() {
        let mut session = Session::new();
        assert_eq!(session.wave_stop(WaveId(1)), Err(DbgErr::InvalidWaveId));
        assert_eq!(session.wave_get_info(WaveId(1), WaveInfoQuery::State), Err(DbgErr::InvalidWaveId));
        assert_eq!(session.process_wave_list(Some(ProcessId(1))), Err(DbgErr::InvalidProcessId));
        assert_eq!(session.event_processed(EventId(1)), Err(DbgErr::InvalidEventId));
        assert!(session.next_pending_event(ProcessId(1)).is_err());
    }

    #[test]
    fn ids_are_unique_across_processes() {
        let mut session = Session::new();
        let a = session.attach_process(Box::new(crate::driver::host::HostMemory::new()), Default::default());
        let b = session.attach_process(Box::new(crate::driver::host::HostMemory::new()), Default::default());
        assert_ne!(a, b);

        let qa = session.process_mut(a).unwrap().add_agent(std::sync::Arc::new(TestArch::default()));
        let qb = session.process_mut(b).unwrap().add_agent(std::sync::Arc::new(TestArch::default()));
        assert_ne!(qa, qb);
    }

    #[test]
    fn wave_list_snapshot() {
        let mut fx = Fixture::new();
        let pid = fx.pid;
        let a = fx.spawn_wave(0x1000, 0, 0);
        let hidden = fx.spawn_halted_at_launch(0x2000);
        fx.resume_queue();
        let suspends = fx.host.suspend_count();

        let (waves, changed) = fx.session.process_wave_list(Some(pid)).unwrap();
        assert_eq!(waves, [a]);
        assert!(changed);
        // the queue was suspended for the snapshot, then resumed
        assert_eq!(fx.host.suspend_count(), suspends + 1);
        assert!(!fx.host.is_suspended(fx.queue));

        let (waves, changed) = fx.session.process_wave_list(None).unwrap();
        assert_eq!(waves, [a]);
        assert!(!changed);

        fx.suspend_queue();
        fx.process_mut().set_wave_visibility(hidden, Visibility::Visible).unwrap();
        let (waves, changed) = fx.session.process_wave_list(Some(pid)).unwrap();
        assert_eq!(waves, [a, hidden]);
        assert!(changed);
        // already suspended queues stay suspended
        assert!(fx.host.is_suspended(fx.queue));
    }

    #[test]
    fn wave_list_without_forward_progress() {
        let mut fx = Fixture::with_flags(ProcessFlags { forward_progress_needed: false, ..Default::default() });
        let pid = fx.pid;
        fx.spawn_wave(0x1000, 0, 0);
        fx.resume_queue();

        fx.session.process_wave_list(Some(pid)).unwrap();
        assert!(fx.host.is_suspended(fx.queue));
    }

    #[test]
    fn wave_list_drops_waves_of_gone_queues() {
        let mut fx = Fixture::new();
        let pid = fx.pid;
        fx.spawn_wave(0x1000, 0, 0);
        fx.session.process_wave_list(Some(pid)).unwrap();

        let q = fx.queue;
        fx.process_mut().invalidate_queue(q).unwrap();
        let (waves, changed) = fx.session.process_wave_list(Some(pid)).unwrap();
        assert!(waves.is_empty());
        assert!(changed);
    }

    #[test]
    fn stop_and_resume_through_the_session() {
        let mut fx = Fixture::new();
        let pid = fx.pid;
        let w = fx.spawn_wave(0x1000, 0, 0);

        fx.session.wave_stop(w).unwrap();
        let event = fx.session.next_pending_event(pid).unwrap().unwrap();
        assert_eq!(event.wave(), Some(w));
        assert_eq!(fx.session.wave_resume(w, ResumeMode::Normal, Exceptions::NONE), Err(DbgErr::WaveNotResumable));

        fx.session.event_processed(event.id()).unwrap();
        assert_eq!(fx.session.wave_get_info(w, WaveInfoQuery::StopReason), Ok(WaveInfo::StopReason(StopReason::NONE)));
        fx.session.wave_resume(w, ResumeMode::Normal, Exceptions::NONE).unwrap();
        assert_eq!(fx.session.wave_get_info(w, WaveInfoQuery::State), Ok(WaveInfo::State(WaveState::Run)));
    }

    #[test]
    fn hidden_waves_are_unknown() {
        let mut fx = Fixture::new();
        let w = fx.spawn_stopped_wave(0x1000);
        fx.ack_events();
        fx.write_code(0x1000, &[OP_TERMINATE, 0, 0, 0]);
        fx.session.wave_resume(w, ResumeMode::SingleStep, Exceptions::NONE).unwrap();
        assert_eq!(
            fx.process().wave(w).unwrap().visibility(),
            Visibility::HiddenAtTerminatingInstruction
        );

        let space = AddressSpace::new("global", crate::wave::xfer::AddressSpaceKind::Global, 64);
        let mut buf = [0; 4];
        assert_eq!(fx.session.wave_stop(w), Err(DbgErr::InvalidWaveId));
        assert_eq!(fx.session.wave_resume(w, ResumeMode::Normal, Exceptions::NONE), Err(DbgErr::InvalidWaveId));
        assert_eq!(fx.session.wave_get_info(w, WaveInfoQuery::State), Err(DbgErr::InvalidWaveId));
        assert_eq!(fx.session.read_register(w, RegNum::PC, 0, &mut buf), Err(DbgErr::InvalidWaveId));
        assert_eq!(fx.session.write_register(w, RegNum::PC, 0, &buf), Err(DbgErr::InvalidWaveId));
        assert_eq!(fx.session.xfer_segment_memory(w, &space, None, 0x1000, XferBuf::Read(&mut buf)), Err(DbgErr::InvalidWaveId));
        assert_eq!(fx.session.displaced_stepping_start(w, &BREAKPOINT), Err(DbgErr::InvalidWaveId));
        assert_eq!(fx.session.displaced_stepping_complete(w, DisplacedSteppingId(1)), Err(DbgErr::InvalidWaveId));

        let launched = fx.spawn_halted_at_launch(0x2000);
        assert_eq!(fx.session.wave_stop(launched), Err(DbgErr::InvalidWaveId));
        fx.process_mut().set_wave_visibility(launched, Visibility::Visible).unwrap();
        fx.session.wave_stop(launched).unwrap();
    }

    #[test]
    fn notifier_signals_pending_events() {
        let mut fx = Fixture::new();
        let notifier = fx.process().notifier();
        assert!(notifier.try_recv().is_err());

        fx.spawn_stopped_wave(0x1000);
        assert!(notifier.try_recv().is_ok());
    }
}
