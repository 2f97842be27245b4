//! The per-ISA capability surface.
//!
//! An [`Architecture`] is selected once per agent and shared by every wave on that agent.
//! It knows where registers live in a context-save record ([`CwsrRecord`]), how to derive
//! a wave's state from hardware bits, and how to classify and simulate instructions.
//! Everything else in this crate is ISA-agnostic.

use crate::err::DbgErr;
use crate::flags::{Exceptions, StopReason, WaveState};
use crate::ids::{ArchitectureId, OsWatchId};
use crate::process::Substrate;
use crate::wave::Wave;

/// A register number.
///
/// Register numbers are grouped into contiguous ranges
/// (scalar registers, vector registers, hardware registers, trap temporaries, pseudo registers).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RegNum(pub u32);

impl RegNum {
    /// First scalar register.
    pub const S0: Self = Self(0);
    /// First scalar register.
    pub const FIRST_SGPR: Self = Self::S0;
    /// Last scalar register.
    pub const LAST_SGPR: Self = Self(111);

    /// First vector register of a 32-lane wave.
    pub const V0_32: Self = Self(128);
    /// Last vector register of a 32-lane wave.
    pub const V255_32: Self = Self(383);
    /// First vector register of a 64-lane wave.
    pub const V0_64: Self = Self(384);
    /// Last vector register of a 64-lane wave.
    pub const V255_64: Self = Self(639);
    /// First vector register.
    pub const FIRST_VGPR: Self = Self::V0_32;
    /// Last vector register.
    pub const LAST_VGPR: Self = Self::V255_64;

    /// Program counter.
    pub const PC: Self = Self(1024);
    /// First hardware register.
    pub const FIRST_HWREG: Self = Self::PC;
    /// Execution mask of a 32-lane wave.
    pub const EXEC_32: Self = Self(1025);
    /// Execution mask of a 64-lane wave.
    pub const EXEC_64: Self = Self(1026);
    /// Status register.
    pub const STATUS: Self = Self(1027);
    /// Mode register.
    pub const MODE: Self = Self(1028);
    /// Trap status register.
    pub const TRAPSTS: Self = Self(1029);
    /// Hardware id register.
    pub const HW_ID: Self = Self(1030);
    /// Register allocation register.
    pub const GPR_ALLOC: Self = Self(1031);
    /// Local memory allocation register.
    pub const LDS_ALLOC: Self = Self(1032);
    /// Instruction buffer status register.
    pub const IB_STS: Self = Self(1033);
    /// Last hardware register.
    pub const LAST_HWREG: Self = Self(1039);

    /// First trap temporary register.
    pub const FIRST_TTMP: Self = Self(1040);
    /// Last trap temporary register.
    pub const LAST_TTMP: Self = Self(1055);

    /// The wave's debugger id, stored in trap temporaries.
    pub const WAVE_ID: Self = Self(1056);
    /// Work-group coordinates of the wave, stored in trap temporaries.
    pub const DISPATCH_GRID: Self = Self(1057);
    /// Position of the wave in its work-group, stored in a trap temporary.
    pub const WAVE_IN_GROUP: Self = Self(1058);
    /// Start of the work-group's local memory in the context-save record.
    pub const LDS_0: Self = Self(1059);

    /// First pseudo register.
    pub const FIRST_PSEUDO: Self = Self(2048);
    /// A register that reads as zero and ignores writes.
    pub const NULL: Self = Self::FIRST_PSEUDO;

    /// Whether this register has no storage of its own and is computed by the architecture.
    pub fn is_pseudo(self) -> bool {
        self >= Self::FIRST_PSEUDO
    }
    /// Whether this is a scalar register.
    pub fn is_sgpr(self) -> bool {
        (Self::FIRST_SGPR..=Self::LAST_SGPR).contains(&self)
    }
    /// Whether this is a vector register.
    pub fn is_vgpr(self) -> bool {
        (Self::FIRST_VGPR..=Self::LAST_VGPR).contains(&self)
    }
    /// Whether this is a trap temporary register.
    pub fn is_ttmp(self) -> bool {
        (Self::FIRST_TTMP..=Self::LAST_TTMP).contains(&self)
    }
    /// Every trap temporary register, in order.
    pub fn ttmps() -> impl Iterator<Item = Self> {
        (Self::FIRST_TTMP.0..=Self::LAST_TTMP.0).map(Self)
    }
    /// The `n`-th scalar register.
    pub fn sgpr(n: u32) -> Self {
        Self(Self::FIRST_SGPR.0 + n)
    }
    /// The `n`-th trap temporary register.
    pub fn ttmp(n: u32) -> Self {
        Self(Self::FIRST_TTMP.0 + n)
    }
}

/// Raw bytes of an instruction.
///
/// The instruction may be truncated if it was read near the end of mapped memory.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Instruction {
    bytes: Vec<u8>
}
impl Instruction {
    /// Creates an instruction from its bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
    /// The instruction's size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
    /// The instruction's bytes.
    pub fn data(&self) -> &[u8] {
        &self.bytes
    }
}

/// A hardware-written context-save record of a wave.
///
/// The record is produced anew every time the wave's queue is suspended,
/// and its location in memory may change between suspensions.
pub trait CwsrRecord: std::fmt::Debug {
    /// First address of the record.
    fn begin(&self) -> u64;
    /// Address one past the end of the record.
    fn end(&self) -> u64;
    /// Address of a register in the record, if the register is saved.
    fn register_address(&self, regnum: RegNum) -> Option<u64>;
    /// Whether the wave was in privileged (trap handler) mode when saved.
    fn is_priv(&self) -> bool;
    /// Size of the work-group local memory saved with the record.
    fn lds_size(&self) -> u64;
    /// Number of lanes in the wave.
    fn lane_count(&self) -> usize;
}

/// The capability provider of an ISA.
///
/// Register accesses made by an implementation should go through [`Wave::read_register`]
/// and [`Wave::write_register`], so that caching and parking are honored.
pub trait Architecture: Send + Sync {
    /// Identifier of this architecture.
    fn id(&self) -> ArchitectureId;
    /// Name of this architecture.
    fn name(&self) -> &str;

    /// Size of the largest instruction, in bytes.
    fn largest_instruction_size(&self) -> usize;
    /// The bytes of the breakpoint marker.
    fn breakpoint_instruction(&self) -> &[u8];

    /// Size of a register, in bytes.
    fn register_size(&self, regnum: RegNum) -> usize;
    /// Name of a register.
    fn register_name(&self, regnum: RegNum) -> String;

    /// Whether a pseudo register can be accessed on this wave.
    fn is_pseudo_register_available(&self, wave: &Wave, regnum: RegNum) -> bool;
    /// Reads `value.len()` bytes of a pseudo register, starting at byte `offset`.
    fn read_pseudo_register(&self, wave: &Wave, sub: &mut Substrate, regnum: RegNum, offset: usize, value: &mut [u8]) -> Result<(), DbgErr>;
    /// Writes `value.len()` bytes of a pseudo register, starting at byte `offset`.
    fn write_pseudo_register(&self, wave: &mut Wave, sub: &mut Substrate, regnum: RegNum, offset: usize, value: &[u8]) -> Result<(), DbgErr>;

    /// Whether the instruction can be simulated instead of executed.
    fn can_simulate(&self, wave: &Wave, instruction: &Instruction) -> bool;
    /// Whether the instruction can be executed from a different address.
    fn can_execute_displaced(&self, wave: &Wave, instruction: &Instruction) -> bool;
    /// Whether the instruction ends the wave.
    fn is_terminating_instruction(&self, instruction: &Instruction) -> bool;
    /// Simulates the instruction located at `pc`.
    ///
    /// This returns whether the instruction was simulated.
    fn simulate(&self, wave: &mut Wave, sub: &mut Substrate, pc: u64, instruction: &Instruction) -> Result<bool, DbgErr>;

    /// Derives the wave's state and stop reason from its hardware registers.
    fn wave_get_state(&self, wave: &Wave, sub: &mut Substrate) -> Result<(WaveState, StopReason), DbgErr>;
    /// Programs the wave's hardware registers for a new state.
    fn wave_set_state(&self, wave: &mut Wave, sub: &mut Substrate, state: WaveState, exceptions: Exceptions) -> Result<(), DbgErr>;
    /// Whether the wave is halted by the launch halt bit.
    fn wave_get_halt(&self, wave: &Wave, sub: &mut Substrate) -> Result<bool, DbgErr>;
    /// Sets or clears the launch halt bit.
    fn wave_set_halt(&self, wave: &mut Wave, sub: &mut Substrate, halt: bool) -> Result<(), DbgErr>;

    /// Whether stopped waves must be parked because the hardware
    /// cannot halt at every instruction.
    fn park_stopped_waves(&self) -> bool;

    /// Driver watch slots that triggered on a stopped wave.
    fn triggered_watchpoints(&self, wave: &Wave, sub: &mut Substrate) -> Result<Vec<OsWatchId>, DbgErr>;
}
