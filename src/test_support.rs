//! Fixtures shared by the unit tests.
//!
//! [`TestArch`] is a small made-up ISA whose context-save record ([`TestRecord`]) looks like this:
//! - scalar registers at the start of the record,
//! - vector registers at [`VGPRS`],
//! - hardware registers and trap temporaries at [`HWREGS`] (the cached block),
//! - local memory at [`LDS`].
//!
//! Its hardware state lives in `STATUS` (halt bits), `MODE` (single step bit) and `TRAPSTS`
//! (stop reason in the low half, triggered watch slots in the high half).

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::arch::{Architecture, CwsrRecord, Instruction, RegNum};
use crate::driver::host::{HostMemory, MemoryInitStrategy};
use crate::err::DbgErr;
use crate::flags::{Exceptions, StopReason, Visibility, WaveState};
use crate::ids::{AgentId, ArchitectureId, DispatchId, OsWatchId, ProcessId, QueueId, WaveId};
use crate::process::{InstructionBuffer, Process, ProcessFlags, QueueCallbacks};
use crate::session::Session;
use crate::wave::Wave;

pub const CODE_BASE: u64 = 0;
pub const CODE_SIZE: usize = 0x10000;

pub const RECORD_BASE: u64 = 0x10_0000;
pub const RECORD_STRIDE: u64 = 0x1_0000;
pub const RECORD_SIZE: usize = 0xA000;
pub const VGPRS: u64 = 0x400;
pub const HWREGS: u64 = 0x8000;
pub const LDS: u64 = 0x9000;
pub const LDS_SIZE: u64 = 0x100;
pub const SGPR_COUNT: u32 = 102;
pub const VGPR_COUNT: u32 = 16;

pub const BUFFER_BASE: u64 = 0x20_0000;
pub const BUFFER_CAPACITY: usize = 16;
pub const SCRATCH_BASE: u64 = 0x30_0000;
pub const SCRATCH_SIZE: u64 = 0x1000;
pub const PARK_ADDRESS: u64 = 0xdead_0000;
pub const TERMINATE_ADDRESS: u64 = 0xdead_1000;

// offsets in the hardware register block
pub const PC: u64 = 0;
pub const EXEC: u64 = 8;
pub const STATUS: u64 = 16;
pub const MODE: u64 = 20;
pub const TRAPSTS: u64 = 24;
pub const HW_ID: u64 = 28;
pub const GPR_ALLOC: u64 = 32;
pub const LDS_ALLOC: u64 = 36;
pub const IB_STS: u64 = 40;
pub const TTMP0: u64 = 0x40;
pub fn ttmp(n: u64) -> u64 {
    TTMP0 + 4 * n
}

pub const STATUS_HALT: u32 = 1 << 0;
pub const STATUS_LAUNCH_HALT: u32 = 1 << 1;
pub const MODE_DEBUG: u32 = 1 << 0;
pub const STOP_REASON_MASK: u32 = 0xFFFF;
pub const WATCH_SHIFT: u32 = 16;

pub const BREAKPOINT: [u8; 4] = [0xBB; 4];
pub const OP_NOP: u8 = 0x10;
pub const OP_BRANCH: u8 = 0xB0;
pub const OP_TERMINATE: u8 = 0xE0;
pub const OP_ILLEGAL: u8 = 0xFF;

/// The context-save record of [`TestArch`].
#[derive(Clone, Debug)]
pub struct TestRecord {
    pub base: u64,
    pub privileged: bool,
    pub lanes: usize
}
impl TestRecord {
    /// Address of a hardware register block offset.
    pub fn hwreg(&self, offset: u64) -> u64 {
        self.base + HWREGS + offset
    }
}
impl CwsrRecord for TestRecord {
    fn begin(&self) -> u64 {
        self.base
    }
    fn end(&self) -> u64 {
        self.base + RECORD_SIZE as u64
    }
    fn register_address(&self, regnum: RegNum) -> Option<u64> {
        let addr = match regnum {
            r if r.is_sgpr() => match r.0 < SGPR_COUNT {
                true  => self.base + 4 * u64::from(r.0),
                false => return None,
            },
            r if r.is_vgpr() => {
                let v0 = match self.lanes {
                    32 => RegNum::V0_32,
                    _  => RegNum::V0_64,
                };
                let i = r.0.checked_sub(v0.0).filter(|&i| i < VGPR_COUNT)?;
                self.base + VGPRS + u64::from(i) * 4 * self.lanes as u64
            },
            r if r.is_ttmp() => self.hwreg(ttmp(u64::from(r.0 - RegNum::FIRST_TTMP.0))),
            RegNum::PC => self.hwreg(PC),
            RegNum::EXEC_32 if self.lanes == 32 => self.hwreg(EXEC),
            RegNum::EXEC_64 if self.lanes == 64 => self.hwreg(EXEC),
            RegNum::STATUS => self.hwreg(STATUS),
            RegNum::MODE => self.hwreg(MODE),
            RegNum::TRAPSTS => self.hwreg(TRAPSTS),
            RegNum::HW_ID => self.hwreg(HW_ID),
            RegNum::GPR_ALLOC => self.hwreg(GPR_ALLOC),
            RegNum::LDS_ALLOC => self.hwreg(LDS_ALLOC),
            RegNum::IB_STS => self.hwreg(IB_STS),
            RegNum::WAVE_ID => self.hwreg(ttmp(4)),
            RegNum::DISPATCH_GRID => self.hwreg(ttmp(8)),
            RegNum::WAVE_IN_GROUP => self.hwreg(ttmp(11)),
            RegNum::LDS_0 => self.base + LDS,
            _ => return None
        };
        Some(addr)
    }
    fn is_priv(&self) -> bool {
        self.privileged
    }
    fn lds_size(&self) -> u64 {
        LDS_SIZE
    }
    fn lane_count(&self) -> usize {
        self.lanes
    }
}

/// A made-up ISA.
#[derive(Debug, Default)]
pub struct TestArch {
    /// Whether stopped waves are parked.
    pub park: bool
}
impl TestArch {
    pub const ID: ArchitectureId = ArchitectureId(0x7e57);
}
impl Architecture for TestArch {
    fn id(&self) -> ArchitectureId {
        Self::ID
    }
    fn name(&self) -> &str {
        "test"
    }
    fn largest_instruction_size(&self) -> usize {
        8
    }
    fn breakpoint_instruction(&self) -> &[u8] {
        &BREAKPOINT
    }
    fn register_size(&self, regnum: RegNum) -> usize {
        match regnum {
            r if (RegNum::V0_32..=RegNum::V255_32).contains(&r) => 4 * 32,
            r if r.is_vgpr() => 4 * 64,
            RegNum::PC | RegNum::EXEC_64 | RegNum::WAVE_ID => 8,
            RegNum::DISPATCH_GRID => 12,
            _ => 4
        }
    }
    fn register_name(&self, regnum: RegNum) -> String {
        format!("r{}", regnum.0)
    }

    fn is_pseudo_register_available(&self, _wave: &Wave, regnum: RegNum) -> bool {
        regnum == RegNum::NULL
    }
    fn read_pseudo_register(&self, _wave: &Wave, _sub: &mut crate::process::Substrate, regnum: RegNum, offset: usize, value: &mut [u8]) -> Result<(), DbgErr> {
        if regnum != RegNum::NULL { return Err(DbgErr::InvalidArgument) };
        if value.is_empty() || offset + value.len() > 4 { return Err(DbgErr::InvalidArgumentCompatibility) };
        value.fill(0);
        Ok(())
    }
    fn write_pseudo_register(&self, _wave: &mut Wave, _sub: &mut crate::process::Substrate, regnum: RegNum, offset: usize, value: &[u8]) -> Result<(), DbgErr> {
        if regnum != RegNum::NULL { return Err(DbgErr::InvalidArgument) };
        if value.is_empty() || offset + value.len() > 4 { return Err(DbgErr::InvalidArgumentCompatibility) };
        Ok(())
    }

    fn can_simulate(&self, _wave: &Wave, instruction: &Instruction) -> bool {
        instruction.data().first() == Some(&OP_BRANCH)
    }
    fn can_execute_displaced(&self, _wave: &Wave, instruction: &Instruction) -> bool {
        matches!(instruction.data().first(), Some(&(OP_NOP | OP_TERMINATE)))
    }
    fn is_terminating_instruction(&self, instruction: &Instruction) -> bool {
        instruction.data().first() == Some(&OP_TERMINATE)
    }
    fn simulate(&self, wave: &mut Wave, sub: &mut crate::process::Substrate, pc: u64, instruction: &Instruction) -> Result<bool, DbgErr> {
        if !self.can_simulate(wave, instruction) { return Ok(false) };

        // pc-relative branch in words, then a single-step trap
        let imm = instruction.data().get(1).map_or(0, |&b| b as i8);
        let target = pc.wrapping_add(4).wrapping_add_signed(i64::from(imm) * 4);
        wave.write_register_u64(sub, RegNum::PC, target)?;

        let status = wave.read_register_u32(sub, RegNum::STATUS)?;
        wave.write_register_u32(sub, RegNum::STATUS, status | STATUS_HALT)?;
        wave.write_register_u32(sub, RegNum::TRAPSTS, StopReason::SINGLE_STEP.bits())?;
        Ok(true)
    }

    fn wave_get_state(&self, wave: &Wave, sub: &mut crate::process::Substrate) -> Result<(WaveState, StopReason), DbgErr> {
        let status = wave.read_register_u32(sub, RegNum::STATUS)?;
        let mode = wave.read_register_u32(sub, RegNum::MODE)?;

        if status & STATUS_HALT != 0 {
            let trapsts = wave.read_register_u32(sub, RegNum::TRAPSTS)?;
            Ok((WaveState::Stop, StopReason::from_bits(trapsts & STOP_REASON_MASK)))
        } else if mode & MODE_DEBUG != 0 {
            Ok((WaveState::SingleStep, StopReason::NONE))
        } else {
            Ok((WaveState::Run, StopReason::NONE))
        }
    }
    fn wave_set_state(&self, wave: &mut Wave, sub: &mut crate::process::Substrate, state: WaveState, _exceptions: Exceptions) -> Result<(), DbgErr> {
        let status = wave.read_register_u32(sub, RegNum::STATUS)?;
        let mode = wave.read_register_u32(sub, RegNum::MODE)?;

        let (status, mode) = match state {
            WaveState::Stop       => (status | STATUS_HALT, mode & !MODE_DEBUG),
            WaveState::Run        => (status & !STATUS_HALT, mode & !MODE_DEBUG),
            WaveState::SingleStep => (status & !STATUS_HALT, mode | MODE_DEBUG),
        };
        wave.write_register_u32(sub, RegNum::STATUS, status)?;
        wave.write_register_u32(sub, RegNum::MODE, mode)?;

        if state != WaveState::Stop {
            let trapsts = wave.read_register_u32(sub, RegNum::TRAPSTS)?;
            wave.write_register_u32(sub, RegNum::TRAPSTS, trapsts & !STOP_REASON_MASK)?;
        }
        Ok(())
    }
    fn wave_get_halt(&self, wave: &Wave, sub: &mut crate::process::Substrate) -> Result<bool, DbgErr> {
        Ok(wave.read_register_u32(sub, RegNum::STATUS)? & STATUS_LAUNCH_HALT != 0)
    }
    fn wave_set_halt(&self, wave: &mut Wave, sub: &mut crate::process::Substrate, halt: bool) -> Result<(), DbgErr> {
        let status = wave.read_register_u32(sub, RegNum::STATUS)?;
        let status = match halt {
            true  => status | STATUS_LAUNCH_HALT,
            false => status & !STATUS_LAUNCH_HALT,
        };
        wave.write_register_u32(sub, RegNum::STATUS, status)
    }

    fn park_stopped_waves(&self) -> bool {
        self.park
    }

    fn triggered_watchpoints(&self, wave: &Wave, sub: &mut crate::process::Substrate) -> Result<Vec<OsWatchId>, DbgErr> {
        let watches = wave.read_register_u32(sub, RegNum::TRAPSTS)? >> WATCH_SHIFT;
        Ok((0..16).filter(|i| watches & (1 << i) != 0).collect())
    }
}

/// Queue callbacks that count instruction buffer allocations.
#[derive(Clone, Debug, Default)]
pub struct TestCallbacks {
    allocated: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    exhausted: Arc<AtomicBool>
}
impl QueueCallbacks for TestCallbacks {
    fn park_instruction_address(&self) -> u64 {
        PARK_ADDRESS
    }
    fn terminating_instruction_address(&self) -> u64 {
        TERMINATE_ADDRESS
    }
    fn allocate_instruction_buffer(&mut self) -> Result<InstructionBuffer, DbgErr> {
        if self.exhausted.load(Ordering::Relaxed) {
            return Err(DbgErr::ClientCallback);
        }
        let n = self.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(InstructionBuffer::new(BUFFER_BASE + (n * BUFFER_CAPACITY) as u64, BUFFER_CAPACITY))
    }
    fn release_instruction_buffer(&mut self, _buffer: InstructionBuffer) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }
    fn scratch_memory_region(&self, _record: &dyn CwsrRecord) -> (u64, u64) {
        (SCRATCH_BASE, SCRATCH_SIZE)
    }
}

/// A session with one process, agent, queue and dispatch over [`HostMemory`].
///
/// The queue starts suspended.
pub struct Fixture {
    pub session: Session,
    pub host: HostMemory,
    pub pid: ProcessId,
    pub agent: AgentId,
    pub queue: QueueId,
    pub dispatch: DispatchId,
    callbacks: TestCallbacks,
    records: Cell<u64>
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(TestArch::default(), ProcessFlags::default())
    }
    pub fn parking() -> Self {
        Self::build(TestArch { park: true }, ProcessFlags::default())
    }
    pub fn with_flags(flags: ProcessFlags) -> Self {
        Self::build(TestArch::default(), flags)
    }

    fn build(arch: TestArch, flags: ProcessFlags) -> Self {
        let host = HostMemory::new();
        host.map(CODE_BASE, CODE_SIZE, MemoryInitStrategy::Known { value: 0 });
        host.map(BUFFER_BASE, 0x1000, MemoryInitStrategy::Known { value: 0 });
        host.map(SCRATCH_BASE, SCRATCH_SIZE as usize, MemoryInitStrategy::Known { value: 0 });

        let mut session = Session::new();
        let pid = session.attach_process(Box::new(host.clone()), flags);
        let callbacks = TestCallbacks::default();

        let p = session.process_mut(pid).unwrap();
        let agent = p.add_agent(Arc::new(arch));
        let queue = p.add_queue(agent, Box::new(callbacks.clone())).unwrap();
        let dispatch = p.add_dispatch(queue).unwrap();
        p.suspend_queues(&[queue], "fixture").unwrap();

        Self { session, host, pid, agent, queue, dispatch, callbacks, records: Cell::new(0) }
    }

    pub fn process(&self) -> &Process {
        self.session.process(self.pid).unwrap()
    }
    pub fn process_mut(&mut self) -> &mut Process {
        self.session.process_mut(self.pid).unwrap()
    }
    pub fn callbacks(&self) -> TestCallbacks {
        self.callbacks.clone()
    }
    pub fn allocated(&self) -> usize {
        self.callbacks.allocated.load(Ordering::Relaxed)
    }
    pub fn released(&self) -> usize {
        self.callbacks.released.load(Ordering::Relaxed)
    }
    /// Makes every following instruction buffer allocation fail.
    pub fn exhaust_instruction_buffers(&self) {
        self.callbacks.exhausted.store(true, Ordering::Relaxed);
    }

    pub fn suspend_queue(&mut self) {
        let q = self.queue;
        self.process_mut().suspend_queues(&[q], "test").unwrap();
    }
    pub fn resume_queue(&mut self) {
        let q = self.queue;
        self.process_mut().resume_queues(&[q], "test").unwrap();
    }

    /// Maps a new context-save record holding the given hardware state.
    pub fn new_record(&self, pc: u64, status: u32, trapsts: u32) -> TestRecord {
        let n = self.records.get();
        self.records.set(n + 1);

        let rec = TestRecord { base: RECORD_BASE + n * RECORD_STRIDE, privileged: true, lanes: 64 };
        self.host.map(rec.base, RECORD_SIZE, MemoryInitStrategy::Known { value: 0 });
        self.host.poke(rec.hwreg(PC), &pc.to_le_bytes()).unwrap();
        self.host.poke(rec.hwreg(STATUS), &status.to_le_bytes()).unwrap();
        self.host.poke(rec.hwreg(TRAPSTS), &trapsts.to_le_bytes()).unwrap();
        rec
    }
    pub fn record(&self, pc: u64, status: u32, trapsts: u32) -> Box<dyn CwsrRecord> {
        Box::new(self.new_record(pc, status, trapsts))
    }

    pub fn spawn_record(&mut self, rec: TestRecord, visibility: Visibility) -> WaveId {
        let (q, d) = (self.queue, self.dispatch);
        self.process_mut().create_wave(q, Some(d), None, visibility, Box::new(rec)).unwrap()
    }
    pub fn spawn_wave(&mut self, pc: u64, status: u32, trapsts: u32) -> WaveId {
        let rec = self.new_record(pc, status, trapsts);
        self.spawn_record(rec, Visibility::Visible)
    }
    pub fn spawn_stopped_wave(&mut self, pc: u64) -> WaveId {
        self.spawn_stopped_wave_with(pc, StopReason::BREAKPOINT)
    }
    pub fn spawn_stopped_wave_with(&mut self, pc: u64, reason: StopReason) -> WaveId {
        self.spawn_wave(pc, STATUS_HALT, reason.bits())
    }
    pub fn spawn_halted_at_launch(&mut self, pc: u64) -> WaveId {
        let rec = self.new_record(pc, STATUS_LAUNCH_HALT, 0);
        self.spawn_record(rec, Visibility::HiddenHaltedAtLaunch)
    }

    /// Reports and processes every pending event.
    pub fn ack_events(&mut self) {
        let p = self.process_mut();
        while let Some(event) = p.next_pending_event() {
            p.event_processed(event.id()).unwrap();
        }
    }

    pub fn write_code(&self, addr: u64, bytes: &[u8]) {
        self.host.poke(addr, bytes).unwrap();
    }
    pub fn breakpoint_at(&self, addr: u64) {
        self.write_code(addr, &BREAKPOINT);
    }

    /// The pc the debugger sees, regardless of the wave's state.
    pub fn pc(&mut self, w: WaveId) -> u64 {
        let p = self.process_mut();
        p.waves[&w].pc(&mut p.sub).unwrap()
    }
    /// Reads a register, regardless of the wave's state.
    pub fn read_raw(&mut self, w: WaveId, regnum: RegNum, buf: &mut [u8]) {
        let p = self.process_mut();
        p.waves[&w].read_register(&mut p.sub, regnum, 0, buf).unwrap();
    }

    /// Reads a dword of a wave's current record in target memory.
    pub fn peek_record(&self, w: WaveId, offset: u64) -> u32 {
        let base = self.process().wave(w).unwrap().cwsr_record().begin();
        let mut buf = [0; 4];
        self.host.peek(base + offset, &mut buf).unwrap();
        u32::from_le_bytes(buf)
    }
    pub fn hwreg_addr(&self, w: WaveId, offset: u64) -> u64 {
        self.process().wave(w).unwrap().cwsr_record().begin() + HWREGS + offset
    }
    pub fn peek_hwreg(&self, w: WaveId, offset: u64) -> u32 {
        self.peek_record(w, HWREGS + offset)
    }
    /// The pc saved in target memory.
    pub fn hw_pc(&self, w: WaveId) -> u64 {
        let mut buf = [0; 8];
        self.host.peek(self.hwreg_addr(w, PC), &mut buf).unwrap();
        u64::from_le_bytes(buf)
    }

    /// Saves the context of a wave again, as a new suspension would.
    pub fn context_save(&mut self, w: WaveId) {
        let rec = {
            let rec = self.process().wave(w).unwrap().cwsr_record();
            TestRecord { base: rec.begin(), privileged: rec.is_priv(), lanes: rec.lane_count() }
        };
        self.process_mut().update_wave(w, None, Box::new(rec)).unwrap();
    }
    /// Saves the context of a wave in a new record.
    pub fn relocate(&mut self, w: WaveId) {
        let rec = self.new_record(0, 0, 0);
        self.process_mut().update_wave(w, None, Box::new(rec)).unwrap();
    }

    /// Lets the queue run until the hardware stops the wave at `pc`.
    pub fn hardware_stop(&mut self, w: WaveId, pc: u64, reason: StopReason) {
        self.resume_queue();

        let status = self.peek_hwreg(w, STATUS);
        let mode = self.peek_hwreg(w, MODE);
        self.host.poke(self.hwreg_addr(w, PC), &pc.to_le_bytes()).unwrap();
        self.host.poke(self.hwreg_addr(w, STATUS), &(status | STATUS_HALT).to_le_bytes()).unwrap();
        self.host.poke(self.hwreg_addr(w, MODE), &(mode & !MODE_DEBUG).to_le_bytes()).unwrap();
        self.host.poke(self.hwreg_addr(w, TRAPSTS), &reason.bits().to_le_bytes()).unwrap();

        self.suspend_queue();
        self.context_save(w);
    }
}
