//! The wave state machine.
//!
//! A [`Wave`] is the debugger's model of one hardware wave. It is created the first time the
//! wave shows up in a context-save record and [updated](Wave::update) with a fresh record every
//! time its queue is suspended. Every state change and register or memory access of a wave
//! requires its queue to be suspended.
//!
//! The wave mediates every register access (see [`Wave::read_register`]):
//! 1. pseudo registers are computed by the architecture,
//! 2. out-of-range scalar and vector registers fold onto register 0 (reads) or are dropped (writes),
//! 3. trap temporaries read as zero and ignore writes outside of privileged mode,
//! 4. the pc of a parked wave lives in a shadow value,
//! 5. hardware and trap temporary registers are served from a write-back cache,
//! 6. anything else goes to the driver.
//!
//! This module also handles displaced stepping from the wave's side
//! ([`Wave::displaced_stepping_start`], [`Wave::displaced_stepping_complete`]).

pub mod info;
pub mod xfer;

use std::sync::Arc;

use crate::arch::{Architecture, CwsrRecord, Instruction, RegNum};
use crate::cache::{CachePolicy, MemoryCache};
use crate::displaced::StepOutcome;
use crate::driver::Driver;
use crate::err::DbgErr;
use crate::flags::{Exceptions, OsExceptionMask, StopReason, Visibility, WaveState};
use crate::ids::{AgentId, DispatchId, DisplacedSteppingId, EventId, QueueId, WaveId};
use crate::process::event::{Event, EventKind, EventQueue, EventState};
use crate::process::Substrate;

/// A snapshot of the displaced step a wave takes part in.
struct StepView {
    from: u64,
    simulated: bool,
    instruction: Instruction
}

/// A hardware wave.
pub struct Wave {
    id: WaveId,
    dispatch: Option<DispatchId>,
    queue: QueueId,
    agent: AgentId,
    arch: Arc<dyn Architecture>,

    state: WaveState,
    stop_reason: StopReason,
    stop_requested: bool,
    visibility: Visibility,
    group_leader: WaveId,

    cwsr_record: Option<Box<dyn CwsrRecord>>,
    register_cache: MemoryCache,
    displaced_stepping: Option<DisplacedSteppingId>,
    /// The real pc while the wave is parked.
    parked_pc: Option<u64>,
    last_stopped_pc: u64,

    group_ids: [u32; 3],
    wave_in_group: u32,
    last_stop_event: Option<EventId>
}

impl Wave {
    pub(crate) fn new(
        id: WaveId,
        dispatch: Option<DispatchId>,
        queue: QueueId,
        agent: AgentId,
        arch: Arc<dyn Architecture>,
        visibility: Visibility
    ) -> Self {
        Self {
            id, dispatch, queue, agent, arch,
            state: WaveState::Run,
            stop_reason: StopReason::NONE,
            stop_requested: false,
            visibility,
            group_leader: id,
            cwsr_record: None,
            register_cache: MemoryCache::new(CachePolicy::WriteBack),
            displaced_stepping: None,
            parked_pc: None,
            last_stopped_pc: 0,
            group_ids: [0; 3],
            wave_in_group: 0,
            last_stop_event: None
        }
    }

    /// The wave's id.
    pub fn id(&self) -> WaveId {
        self.id
    }
    /// The dispatch the wave belongs to, if known.
    pub fn dispatch(&self) -> Option<DispatchId> {
        self.dispatch
    }
    /// The wave's queue.
    pub fn queue(&self) -> QueueId {
        self.queue
    }
    /// The wave's agent.
    pub fn agent(&self) -> AgentId {
        self.agent
    }
    /// The wave's architecture.
    pub fn architecture(&self) -> &dyn Architecture {
        self.arch.as_ref()
    }
    /// The wave's state. See [`Wave::client_visible_state`] for the state reported to the client.
    pub fn state(&self) -> WaveState {
        self.state
    }
    /// Why the wave stopped. Empty unless the wave is stopped.
    pub fn stop_reason(&self) -> StopReason {
        self.stop_reason
    }
    /// Whether the last state change requested was a stop.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }
    /// Whether the wave is reported to the client.
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }
    /// The first wave of this wave's work-group.
    pub fn group_leader(&self) -> WaveId {
        self.group_leader
    }
    /// The displaced step the wave is taking part in.
    pub fn displaced_stepping(&self) -> Option<DisplacedSteppingId> {
        self.displaced_stepping
    }
    /// Whether the wave's pc is redirected to the park instruction.
    pub fn is_parked(&self) -> bool {
        self.parked_pc.is_some()
    }
    /// The pc of the wave when it was last resumed.
    pub fn last_stopped_pc(&self) -> u64 {
        self.last_stopped_pc
    }
    /// Work-group coordinates of the wave.
    pub fn group_ids(&self) -> [u32; 3] {
        self.group_ids
    }
    /// Position of the wave in its work-group.
    pub fn wave_in_group(&self) -> u32 {
        self.wave_in_group
    }

    /// The wave's current context-save record.
    ///
    /// # Panics
    /// Panics if the wave was never updated.
    pub fn cwsr_record(&self) -> &dyn CwsrRecord {
        match &self.cwsr_record {
            Some(record) => record.as_ref(),
            None => panic!("{} has no context-save record", self.id)
        }
    }
    /// Number of lanes in the wave.
    pub fn lane_count(&self) -> usize {
        self.cwsr_record().lane_count()
    }
    /// Address of a register in the wave's context-save record.
    pub fn register_address(&self, regnum: RegNum) -> Option<u64> {
        self.cwsr_record().register_address(regnum)
    }

    /// Changes whether the wave is reported to the client.
    ///
    /// A wave leaving [`Visibility::HiddenHaltedAtLaunch`] is released from its launch halt.
    pub fn set_visibility(&mut self, sub: &mut Substrate, visibility: Visibility) -> Result<(), DbgErr> {
        if self.visibility == visibility { return Ok(()) };

        if self.visibility == Visibility::HiddenHaltedAtLaunch {
            let arch = Arc::clone(&self.arch);
            let halted = arch.wave_get_halt(self, sub)?;
            assert!(self.state == WaveState::Run && halted, "{} is not halted at launch", self.id);

            arch.wave_set_halt(self, sub, false)?;
        }

        self.visibility = visibility;
        sub.waves_changed = true;
        Ok(())
    }

    /// The wave's pc.
    pub fn pc(&self, sub: &mut Substrate) -> Result<u64, DbgErr> {
        self.read_register_u64(sub, RegNum::PC)
    }

    /// The wave's execution mask, one bit per lane.
    ///
    /// # Panics
    /// Panics if the wave has neither 32 nor 64 lanes.
    pub fn exec_mask(&self, sub: &mut Substrate) -> Result<u64, DbgErr> {
        match self.lane_count() {
            32 => self.read_register_u32(sub, RegNum::EXEC_32).map(u64::from),
            64 => self.read_register_u64(sub, RegNum::EXEC_64),
            n  => panic!("not a valid lane count for the exec mask: {n}")
        }
    }

    /// The instruction at `pc + pc_adjust`, truncated if it crosses the end of mapped memory.
    pub fn instruction_at_pc(&self, sub: &mut Substrate, pc_adjust: u64) -> Option<Instruction> {
        let pc = self.pc(sub).ok()?;
        let mut bytes = vec![0; self.arch.largest_instruction_size()];

        let n = sub.driver.read_global_memory_partial(pc.wrapping_add(pc_adjust), &mut bytes).ok()?;
        bytes.truncate(n);
        Some(Instruction::new(bytes))
    }

    /// Redirects the pc of a stopped wave to the park instruction, keeping the real pc in a shadow value.
    pub(crate) fn park(&mut self, sub: &mut Substrate) -> Result<(), DbgErr> {
        assert!(self.state == WaveState::Stop, "Cannot park a running wave");
        assert!(self.parked_pc.is_none(), "already parked");

        let pc = self.pc(sub)?;
        let park_pc = sub.callbacks(self.queue).park_instruction_address();
        self.write_register_u64(sub, RegNum::PC, park_pc)?;
        self.parked_pc = Some(pc);

        log::trace!("parked {} (pc={pc:#x})", self.id);
        Ok(())
    }

    /// Writes the shadowed pc back to the context-save record.
    pub(crate) fn unpark(&mut self, sub: &mut Substrate) -> Result<(), DbgErr> {
        assert!(self.state != WaveState::Stop, "Cannot unpark a stopped wave");
        let Some(saved_pc) = self.parked_pc.take() else { panic!("not parked") };

        self.write_register_u64(sub, RegNum::PC, saved_pc)?;

        log::trace!("unparked {} (pc={saved_pc:#x})", self.id);
        Ok(())
    }

    /// Sends the wave to the terminating instruction and hides it from the client.
    fn terminate(&mut self, sub: &mut Substrate) -> Result<(), DbgErr> {
        if let Some(ds) = self.displaced_stepping.take() {
            sub.release_displaced_stepping(ds);
        }

        let terminate_pc = sub.callbacks(self.queue).terminating_instruction_address();
        self.write_register_u64(sub, RegNum::PC, terminate_pc)?;
        self.set_visibility(sub, Visibility::HiddenAtTerminatingInstruction)?;

        self.set_state(sub, WaveState::Run, Exceptions::NONE)
    }

    fn step_view(&self, sub: &Substrate) -> Option<StepView> {
        let ds = self.displaced_stepping?;
        let op = sub.displaced.get(ds).unwrap_or_else(|| panic!("{} holds a released {ds}", self.id));

        Some(StepView {
            from: op.from(),
            simulated: op.is_simulated(),
            instruction: op.original_instruction().clone()
        })
    }

    /// Starts a displaced step over the breakpoint the wave is stopped at.
    ///
    /// Waves of the same queue stopped at the same pc share a single operation.
    /// The instruction hidden by the breakpoint is rebuilt from `saved_instruction`
    /// (the bytes the marker replaced) and the bytes following the marker.
    /// Unless it can be simulated, it is copied into an instruction buffer and the wave's pc
    /// is moved there.
    ///
    /// This fails with [`DbgErr::IllegalInstruction`] if the instruction can be
    /// neither simulated nor executed out of line.
    ///
    /// # Panics
    /// Panics if the wave is not stopped or is already displaced stepping.
    pub fn displaced_stepping_start(&mut self, sub: &mut Substrate, saved_instruction: &[u8]) -> Result<DisplacedSteppingId, DbgErr> {
        assert!(self.displaced_stepping.is_none(), "already displaced stepping");
        assert!(self.state == WaveState::Stop, "not stopped");

        let arch = Arc::clone(&self.arch);
        let pc = self.pc(sub)?;

        let ds = match sub.displaced.find(self.queue, pc) {
            Some(ds) => {
                sub.displaced.retain(ds);
                ds
            },
            None => {
                let bp_size = arch.breakpoint_instruction().len();
                let saved = saved_instruction.get(..bp_size).ok_or(DbgErr::InvalidArgument)?;

                let mut bytes = vec![0; arch.largest_instruction_size().max(bp_size)];
                bytes[..bp_size].copy_from_slice(saved);
                let rest = pc.checked_add(bp_size as u64).ok_or(DbgErr::InvalidArgument)?;
                let n = sub.driver.read_global_memory_partial(rest, &mut bytes[bp_size..])?;
                bytes.truncate(bp_size + n);
                let instruction = Instruction::new(bytes);

                let simulate = arch.can_simulate(self, &instruction);
                if !simulate && !arch.can_execute_displaced(self, &instruction) {
                    return Err(DbgErr::IllegalInstruction);
                }

                let buffer = match simulate {
                    true  => None,
                    false => {
                        let mut buffer = sub.callbacks_mut(self.queue).allocate_instruction_buffer()?;
                        buffer.resize(instruction.size());
                        if let Err(e) = sub.driver.write_global_memory(buffer.begin(), instruction.data()) {
                            sub.callbacks_mut(self.queue).release_instruction_buffer(buffer);
                            return Err(e);
                        }
                        Some(buffer)
                    }
                };

                let ds = sub.ids.next();
                sub.displaced.create(ds, self.queue, pc, instruction, simulate, buffer);
                ds
            }
        };

        let (simulated, to) = match sub.displaced.get(ds) {
            Some(op) => (op.is_simulated(), op.to()),
            None => unreachable!("{ds} was just registered"),
        };
        if !simulated {
            assert_ne!(to, 0, "{ds} has no instruction buffer");
            if let Err(e) = self.write_register_u64(sub, RegNum::PC, to) {
                sub.release_displaced_stepping(ds);
                return Err(e);
            }
            log::info!("changing {}'s pc from {pc:#x} to {to:#x} (started {ds})", self.id);
        }

        self.displaced_stepping = Some(ds);
        Ok(ds)
    }

    /// Completes the wave's displaced step, moving its pc back next to the original instruction.
    ///
    /// The restored pc keeps the progress made inside the instruction buffer.
    /// A wave still at the start of the buffer never executed the instruction,
    /// and the step is reported [aborted](StepOutcome::Aborted).
    ///
    /// # Panics
    /// Panics if the wave is not stopped or not displaced stepping.
    pub fn displaced_stepping_complete(&mut self, sub: &mut Substrate) -> Result<StepOutcome, DbgErr> {
        let Some(ds) = self.displaced_stepping else { panic!("not displaced stepping") };
        assert!(self.state == WaveState::Stop, "not stopped");

        let (simulated, from, to) = match sub.displaced.get(ds) {
            Some(op) => (op.is_simulated(), op.from(), op.to()),
            None => panic!("{} holds a released {ds}", self.id),
        };

        let outcome = match simulated {
            true => StepOutcome::Simulated,
            false => {
                let displaced_pc = self.pc(sub)?;
                let restored_pc = displaced_pc.wrapping_add(from).wrapping_sub(to);
                self.write_register_u64(sub, RegNum::PC, restored_pc)?;

                let outcome = match displaced_pc == to {
                    true  => StepOutcome::Aborted,
                    false => StepOutcome::Completed,
                };
                log::info!("changing {}'s pc from {displaced_pc:#x} to {restored_pc:#x} ({outcome:?} {ds})", self.id);
                outcome
            }
        };

        sub.release_displaced_stepping(ds);
        self.displaced_stepping = None;
        Ok(outcome)
    }

    /// Ingests the context-save record of a new suspension.
    ///
    /// A wave that was running gets a fresh register cache and has its state derived from hardware.
    /// A wave that was stopped did not execute, so its cache is only moved to the new record.
    /// The first update also stores the wave's id in the wave and loads its work-group position.
    ///
    /// # Panics
    /// Panics if the wave's queue is not suspended.
    pub(crate) fn update(&mut self, sub: &mut Substrate, group_leader: WaveId, record: Box<dyn CwsrRecord>) -> Result<(), DbgErr> {
        assert!(sub.is_queue_suspended(self.queue), "updating {} while its queue is running", self.id);

        let first_update = self.cwsr_record.is_none();
        self.cwsr_record = Some(record);
        self.group_leader = group_leader;
        let arch = Arc::clone(&self.arch);

        let cache_begin = self.register_address(RegNum::FIRST_HWREG)
            .unwrap_or_else(|| panic!("{} has no hardware registers", self.id));

        let prev_state = self.state;
        if prev_state != WaveState::Stop {
            let last = self.register_address(RegNum::LAST_TTMP)
                .unwrap_or_else(|| panic!("{} has no trap temporaries", self.id));
            let cache_end = last + arch.register_size(RegNum::LAST_TTMP) as u64;
            assert!(cache_end > cache_begin, "empty register cache");

            self.register_cache.reset(cache_begin, (cache_end - cache_begin) as usize, sub.driver.as_mut())?;

            if first_update && !sub.flags.ttmps_setup_enabled {
                for regnum in RegNum::ttmps() {
                    self.write_register(sub, regnum, 0, &0u32.to_le_bytes())?;
                }
            }

            (self.state, self.stop_reason) = arch.wave_get_state(self, sub)?;
        } else {
            self.register_cache.relocate(cache_begin);
        }

        log::trace!(
            "{} {}{} (pc={:#x}, state={}) context_save:[{:#x}..{:#x})",
            if first_update { "created" } else { "updated" },
            if self.visibility != Visibility::Visible { "invisible " } else { "" },
            self.id,
            self.pc(sub)?,
            self.state,
            self.cwsr_record().begin(),
            self.cwsr_record().end()
        );

        if prev_state != WaveState::Stop && self.state == WaveState::Stop {
            if arch.park_stopped_waves() {
                self.park(sub)?;
            }
            if self.visibility == Visibility::Visible && !self.stop_reason.is_empty() {
                self.raise_event(sub, EventKind::WaveStop);
            }
        }

        if first_update {
            let id = self.id.0.to_le_bytes();
            self.write_register(sub, RegNum::WAVE_ID, 0, &id)?;

            let mut grid = [0; 12];
            self.read_register(sub, RegNum::DISPATCH_GRID, 0, &mut grid)?;
            for (id, word) in self.group_ids.iter_mut().zip(grid.chunks_exact(4)) {
                *id = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            }
            self.wave_in_group = self.read_register_u32(sub, RegNum::WAVE_IN_GROUP)?;
        }
        Ok(())
    }

    /// Moves the wave to a new state, delivering `exceptions` when it is resumed.
    ///
    /// Single-stepping a terminating instruction terminates the wave instead,
    /// since such an instruction does not trap after executing.
    /// Single-stepping an instruction the architecture can simulate completes the step immediately.
    ///
    /// # Panics
    /// Panics if exceptions are requested with [`WaveState::Stop`],
    /// or if a displaced-stepping wave is asked to run freely.
    pub fn set_state(&mut self, sub: &mut Substrate, state: WaveState, exceptions: Exceptions) -> Result<(), DbgErr> {
        assert!(
            exceptions.is_empty() || state != WaveState::Stop,
            "raising an exception requires the wave to be resumed"
        );

        let arch = Arc::clone(&self.arch);
        let prev_state = self.state;
        if state == prev_state { return Ok(()) };

        assert!(
            self.displaced_stepping.is_none() || state != WaveState::Run,
            "displaced-stepping waves can only be stopped or single-stepped"
        );
        self.stop_requested = state == WaveState::Stop;

        let instruction = match state {
            WaveState::SingleStep => self.instruction_at_pc(sub, 0),
            _ => None
        };
        let step = self.step_view(sub);

        if state == WaveState::SingleStep && exceptions.is_empty() {
            let terminating = match &step {
                Some(step) => arch.is_terminating_instruction(&step.instruction),
                None => instruction.as_ref().is_some_and(|i| arch.is_terminating_instruction(i)),
            };
            if terminating {
                self.terminate(sub)?;
                self.raise_event(sub, EventKind::WaveCommandTerminated);
                return Ok(());
            }
        }

        if self.visibility == Visibility::Visible {
            let with = match exceptions.is_empty() {
                true  => String::new(),
                false => format!("with {exceptions:?} "),
            };
            log::info!("changing {}'s state from {prev_state} to {state} {with}(pc={:#x})", self.id, self.pc(sub)?);
        }

        arch.wave_set_state(self, sub, state, exceptions)?;
        self.state = state;

        if arch.park_stopped_waves() {
            match state {
                WaveState::Stop => self.park(sub)?,
                _ => self.unpark(sub)?,
            }
        }

        if state != WaveState::Stop {
            assert!(prev_state == WaveState::Stop, "cannot resume an already running wave");

            // A single-step trap at this pc is spurious.
            self.last_stopped_pc = self.pc(sub)?;
            self.stop_reason = StopReason::NONE;
        } else if prev_state != WaveState::Stop {
            self.stop_reason = StopReason::NONE;

            assert!(self.visibility == Visibility::Visible, "cannot request a hidden wave to stop");
            self.raise_event(sub, match prev_state {
                WaveState::SingleStep => EventKind::WaveCommandTerminated,
                _ => EventKind::WaveStop,
            });
        }

        if state == WaveState::SingleStep && exceptions.is_empty() {
            let simulated = match &step {
                Some(step) => step.simulated && arch.simulate(self, sub, step.from, &step.instruction)?,
                None => match &instruction {
                    Some(i) if arch.can_simulate(self, i) => {
                        let pc = self.pc(sub)?;
                        arch.simulate(self, sub, pc, i)?
                    },
                    _ => false
                }
            };

            if simulated {
                (self.state, self.stop_reason) = arch.wave_get_state(self, sub)?;
                if arch.park_stopped_waves() && self.state == WaveState::Stop {
                    self.park(sub)?;
                }
                self.raise_event(sub, EventKind::WaveStop);
            }
        }

        if !exceptions.is_empty() {
            let os_exceptions = exceptions.to_os_exceptions(sub.agent_exceptions(self.agent));
            assert!(
                os_exceptions.intersects(OsExceptionMask::QUEUE_MASK),
                "{exceptions:?} did not translate to queue exceptions"
            );
            sub.driver.send_exceptions(os_exceptions, self.queue)?;
        }
        Ok(())
    }

    fn raise_event(&mut self, sub: &mut Substrate, kind: EventKind) {
        self.last_stop_event = Some(sub.raise_event(kind, self.id));
    }

    pub(crate) fn last_stop_event_id(&self) -> Option<EventId> {
        self.last_stop_event
    }

    /// The event raised when the wave last stopped, if it still exists.
    ///
    /// # Panics
    /// Panics if the wave is not stopped.
    pub fn last_stop_event<'e>(&self, events: &'e EventQueue) -> Option<&'e Event> {
        assert!(self.state == WaveState::Stop, "{} is not stopped", self.id);
        events.find(self.last_stop_event?)
    }

    /// The state of the wave as reported to the client.
    ///
    /// A stopped wave whose stop was not reported yet still appears to be in the state
    /// it was last resumed in.
    pub fn client_visible_state(&self, events: &EventQueue) -> WaveState {
        if self.state != WaveState::Stop { return self.state };

        match self.last_stop_event(events) {
            Some(e) if e.state() < EventState::Reported => match self.stop_reason.contains(StopReason::SINGLE_STEP) {
                true  => WaveState::SingleStep,
                false => WaveState::Run,
            },
            _ => WaveState::Stop
        }
    }

    /// How accesses to a register are cached.
    ///
    /// # Panics
    /// Panics if the register is a pseudo register or is not saved in the wave's record.
    pub fn register_cache_policy(&self, regnum: RegNum) -> CachePolicy {
        assert!(!regnum.is_pseudo(), "pseudo registers do not have a cache policy");
        let addr = self.register_address(regnum)
            .unwrap_or_else(|| panic!("invalid register {}", self.arch.register_name(regnum)));

        match self.register_cache.contains(addr, self.arch.register_size(regnum)) {
            true  => self.register_cache.policy(),
            false => CachePolicy::Uncached,
        }
    }

    /// Whether accesses to a register are served by the register cache.
    pub fn is_register_cached(&self, regnum: RegNum) -> bool {
        !regnum.is_pseudo()
            && self.register_address(regnum).is_some()
            && self.register_cache_policy(regnum) == CachePolicy::WriteBack
    }

    /// Whether a register can be accessed on this wave.
    pub fn is_register_available(&self, regnum: RegNum) -> bool {
        match regnum.is_pseudo() {
            true  => self.arch.is_pseudo_register_available(self, regnum),
            false => self.register_address(regnum).is_some(),
        }
    }

    fn check_register_access(&self, regnum: RegNum, offset: usize, size: usize) -> Result<(), DbgErr> {
        match size != 0 && offset + size <= self.arch.register_size(regnum) {
            true  => Ok(()),
            false => Err(DbgErr::InvalidArgumentCompatibility),
        }
    }

    /// Reads `value.len()` bytes of a register, starting at byte `offset` of the register.
    ///
    /// This fails with [`DbgErr::InvalidArgumentCompatibility`] if the range is empty
    /// or exceeds the register.
    ///
    /// # Panics
    /// Panics if the register is neither cached nor readable because the queue is running.
    pub fn read_register(&self, sub: &mut Substrate, regnum: RegNum, offset: usize, value: &mut [u8]) -> Result<(), DbgErr> {
        if regnum.is_pseudo() {
            return self.arch.read_pseudo_register(self, sub, regnum, offset, value);
        }
        self.check_register_access(regnum, offset, value.len())?;

        let reg_addr = self.register_address(regnum)
            .or_else(|| match regnum {
                r if r.is_sgpr() => self.register_address(RegNum::S0),
                r if r.is_vgpr() => self.register_address(self.v0()),
                _ => None
            })
            .unwrap_or_else(|| panic!("{} has no address in {}", self.arch.register_name(regnum), self.id));

        if regnum.is_ttmp() && !self.cwsr_record().is_priv() {
            value.fill(0);
            return Ok(());
        }

        if let (RegNum::PC, Some(parked_pc)) = (regnum, self.parked_pc) {
            value.copy_from_slice(&parked_pc.to_le_bytes()[offset..offset + value.len()]);
            return Ok(());
        }

        let addr = reg_addr + offset as u64;
        if self.register_cache.contains(addr, value.len()) {
            self.register_cache.read(addr, value);
            Ok(())
        } else {
            assert!(sub.is_queue_suspended(self.queue), "reading {} of {} while its queue is running", self.arch.register_name(regnum), self.id);
            sub.driver.read_global_memory(addr, value)
        }
    }

    /// Writes `value.len()` bytes of a register, starting at byte `offset` of the register.
    ///
    /// Writes to out-of-range scalar or vector registers, and to trap temporaries
    /// outside of privileged mode, are dropped.
    ///
    /// # Panics
    /// Panics if the register is neither cached nor writable because the queue is running.
    pub fn write_register(&mut self, sub: &mut Substrate, regnum: RegNum, offset: usize, value: &[u8]) -> Result<(), DbgErr> {
        if regnum.is_pseudo() {
            let arch = Arc::clone(&self.arch);
            return arch.write_pseudo_register(self, sub, regnum, offset, value);
        }
        self.check_register_access(regnum, offset, value.len())?;

        let reg_addr = match self.register_address(regnum) {
            Some(addr) => addr,
            None if regnum.is_sgpr() || regnum.is_vgpr() => return Ok(()),
            None => panic!("{} has no address in {}", self.arch.register_name(regnum), self.id),
        };

        if regnum.is_ttmp() && !self.cwsr_record().is_priv() {
            return Ok(());
        }

        if let (RegNum::PC, Some(parked_pc)) = (regnum, self.parked_pc.as_mut()) {
            let mut bytes = parked_pc.to_le_bytes();
            bytes[offset..offset + value.len()].copy_from_slice(value);
            *parked_pc = u64::from_le_bytes(bytes);
            return Ok(());
        }

        let addr = reg_addr + offset as u64;
        if self.register_cache.contains(addr, value.len()) {
            self.register_cache.write(addr, value);
            if self.register_cache.is_dirty() {
                sub.register_dirty_cache(self.queue, self.id);
            }
            Ok(())
        } else {
            assert!(sub.is_queue_suspended(self.queue), "writing {} of {} while its queue is running", self.arch.register_name(regnum), self.id);
            sub.driver.write_global_memory(addr, value)
        }
    }

    /// Reads the low 4 bytes of a register.
    pub fn read_register_u32(&self, sub: &mut Substrate, regnum: RegNum) -> Result<u32, DbgErr> {
        let mut buf = [0; 4];
        self.read_register(sub, regnum, 0, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
    /// Reads the low 8 bytes of a register.
    pub fn read_register_u64(&self, sub: &mut Substrate, regnum: RegNum) -> Result<u64, DbgErr> {
        let mut buf = [0; 8];
        self.read_register(sub, regnum, 0, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
    /// Writes the low 4 bytes of a register.
    pub fn write_register_u32(&mut self, sub: &mut Substrate, regnum: RegNum, value: u32) -> Result<(), DbgErr> {
        self.write_register(sub, regnum, 0, &value.to_le_bytes())
    }
    /// Writes the low 8 bytes of a register.
    pub fn write_register_u64(&mut self, sub: &mut Substrate, regnum: RegNum, value: u64) -> Result<(), DbgErr> {
        self.write_register(sub, regnum, 0, &value.to_le_bytes())
    }

    fn v0(&self) -> RegNum {
        match self.lane_count() {
            32 => RegNum::V0_32,
            _  => RegNum::V0_64,
        }
    }

    pub(crate) fn flush_register_cache(&mut self, driver: &mut dyn Driver) -> Result<(), DbgErr> {
        self.register_cache.flush(driver)
    }
}

impl std::fmt::Debug for Wave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wave")
            .field("id", &self.id)
            .field("queue", &self.queue)
            .field("state", &self.state)
            .field("stop_reason", &self.stop_reason)
            .field("visibility", &self.visibility)
            .field("displaced_stepping", &self.displaced_stepping)
            .field("parked", &self.is_parked())
            .finish_non_exhaustive()
    }
}
