//! Wave states and the bit sets describing stop reasons and exceptions.
//!
//! The bit sets are small `Copy` newtypes with named constants:
//!
//! ```
//! use wavectl::flags::StopReason;
//!
//! let reason = StopReason::BREAKPOINT | StopReason::SINGLE_STEP;
//! assert!(reason.contains(StopReason::SINGLE_STEP));
//! assert!(!reason.contains(StopReason::MEMORY_VIOLATION));
//! assert!(!reason.is_empty());
//! ```

/// Execution state of a wave.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum WaveState {
    /// The wave is executing freely.
    #[default]
    Run,
    /// The wave executes one instruction, then stops.
    SingleStep,
    /// The wave is halted.
    Stop,
}
impl std::fmt::Display for WaveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaveState::Run        => f.write_str("run"),
            WaveState::SingleStep => f.write_str("single_step"),
            WaveState::Stop       => f.write_str("stop"),
        }
    }
}

/// How a stopped wave is resumed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ResumeMode {
    /// Resume free execution.
    Normal,
    /// Execute a single instruction.
    SingleStep,
}

/// Whether a wave is reported to the client.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Visibility {
    /// The wave is reported to the client.
    #[default]
    Visible,
    /// The wave is halted at launch and must not be reported until it is released.
    HiddenHaltedAtLaunch,
    /// The wave was redirected to a terminating instruction and is about to exit.
    HiddenAtTerminatingInstruction,
}

macro_rules! bit_set {
    (
        $(#[$m:meta])*
        $Name:ident($Int:ty) {
            $($(#[$cm:meta])* $Const:ident = $value:expr),+ $(,)?
        }
    ) => {
        $(#[$m])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $Name($Int);

        impl $Name {
            /// The empty set.
            pub const NONE: Self = Self(0);
            $(
                $(#[$cm])*
                pub const $Const: Self = Self($value);
            )+
            const NAMED: &'static [(&'static str, Self)] = &[$((stringify!($Const), Self::$Const)),+];

            /// Creates a set from its raw bits. Unknown bits are preserved.
            pub const fn from_bits(bits: $Int) -> Self {
                Self(bits)
            }
            /// The raw bits of this set.
            pub const fn bits(&self) -> $Int {
                self.0
            }
            /// True if no bit is set.
            pub const fn is_empty(&self) -> bool {
                self.0 == 0
            }
            /// True if every bit of `other` is set in `self`.
            pub const fn contains(&self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
            /// True if `self` and `other` share at least one bit.
            pub const fn intersects(&self, other: Self) -> bool {
                self.0 & other.0 != 0
            }
            /// Removes the bits of `other` from this set.
            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }
        }
        impl std::ops::BitOr for $Name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self::Output {
                Self(self.0 | rhs.0)
            }
        }
        impl std::ops::BitOrAssign for $Name {
            fn bitor_assign(&mut self, rhs: Self) {
                *self = *self | rhs;
            }
        }
        impl std::ops::BitAnd for $Name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self::Output {
                Self(self.0 & rhs.0)
            }
        }
        impl std::fmt::Debug for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut set = f.debug_set();
                let mut rest = self.0;
                for (name, flag) in Self::NAMED {
                    if self.contains(*flag) {
                        set.entry(&format_args!("{name}"));
                        rest &= !flag.0;
                    }
                }
                if rest != 0 {
                    set.entry(&format_args!("{rest:#x}"));
                }
                set.finish()
            }
        }
    }
}

bit_set! {
    /// Why a wave stopped. Only meaningful while the wave is in [`WaveState::Stop`].
    StopReason(u32) {
        /// A breakpoint instruction was executed.
        BREAKPOINT = 1 << 0,
        /// A watchpoint triggered.
        WATCHPOINT = 1 << 1,
        /// A single-step completed.
        SINGLE_STEP = 1 << 2,
        /// A floating point input was denormal.
        FP_INPUT_DENORMAL = 1 << 3,
        /// A floating point division by zero.
        FP_DIVIDE_BY_0 = 1 << 4,
        /// A floating point overflow.
        FP_OVERFLOW = 1 << 5,
        /// A floating point underflow.
        FP_UNDERFLOW = 1 << 6,
        /// An inexact floating point result.
        FP_INEXACT = 1 << 7,
        /// An invalid floating point operation.
        FP_INVALID_OPERATION = 1 << 8,
        /// An integer division by zero.
        INT_DIVIDE_BY_0 = 1 << 9,
        /// A debug trap instruction was executed.
        DEBUG_TRAP = 1 << 10,
        /// An assert trap instruction was executed.
        ASSERT_TRAP = 1 << 11,
        /// A trap instruction was executed.
        TRAP = 1 << 12,
        /// A memory violation.
        MEMORY_VIOLATION = 1 << 13,
        /// An aperture violation.
        APERTURE_VIOLATION = 1 << 14,
        /// An illegal instruction was executed.
        ILLEGAL_INSTRUCTION = 1 << 15,
        /// An ECC error.
        ECC_ERROR = 1 << 16,
        /// A fatal halt.
        FATAL_HALT = 1 << 17,
    }
}

bit_set! {
    /// Exceptions that can be delivered to a wave when it is resumed.
    Exceptions(u32) {
        /// Abort the wave.
        WAVE_ABORT = 1 << 0,
        /// Trap the wave.
        WAVE_TRAP = 1 << 1,
        /// A math error.
        WAVE_MATH_ERROR = 1 << 2,
        /// An illegal instruction.
        WAVE_ILLEGAL_INSTRUCTION = 1 << 3,
        /// A memory violation.
        WAVE_MEMORY_VIOLATION = 1 << 4,
        /// An aperture violation.
        WAVE_APERTURE_VIOLATION = 1 << 5,
    }
}

bit_set! {
    /// Exception mask understood by the kernel driver.
    OsExceptionMask(u64) {
        /// Abort the waves of a queue.
        QUEUE_WAVE_ABORT = 1 << 1,
        /// Trap the waves of a queue.
        QUEUE_WAVE_TRAP = 1 << 2,
        /// Math error in a queue.
        QUEUE_WAVE_MATH_ERROR = 1 << 3,
        /// Illegal instruction in a queue.
        QUEUE_WAVE_ILLEGAL_INSTRUCTION = 1 << 4,
        /// Memory violation in a queue.
        QUEUE_WAVE_MEMORY_VIOLATION = 1 << 5,
        /// Aperture violation in a queue.
        QUEUE_WAVE_APERTURE_VIOLATION = 1 << 6,
        /// Memory violation reported by the device, not yet attributed to a wave.
        DEVICE_MEMORY_VIOLATION = 1 << 33,
    }
}

impl OsExceptionMask {
    /// Every queue-level exception.
    pub const QUEUE_MASK: Self = Self(
        Self::QUEUE_WAVE_ABORT.0
        | Self::QUEUE_WAVE_TRAP.0
        | Self::QUEUE_WAVE_MATH_ERROR.0
        | Self::QUEUE_WAVE_ILLEGAL_INSTRUCTION.0
        | Self::QUEUE_WAVE_MEMORY_VIOLATION.0
        | Self::QUEUE_WAVE_APERTURE_VIOLATION.0
    );
}

impl Exceptions {
    /// Every exception a wave can be resumed with, and its queue-level counterpart.
    const RECOGNIZED: [(Exceptions, OsExceptionMask); 6] = [
        (Exceptions::WAVE_ABORT,               OsExceptionMask::QUEUE_WAVE_ABORT),
        (Exceptions::WAVE_TRAP,                OsExceptionMask::QUEUE_WAVE_TRAP),
        (Exceptions::WAVE_MATH_ERROR,          OsExceptionMask::QUEUE_WAVE_MATH_ERROR),
        (Exceptions::WAVE_ILLEGAL_INSTRUCTION, OsExceptionMask::QUEUE_WAVE_ILLEGAL_INSTRUCTION),
        (Exceptions::WAVE_MEMORY_VIOLATION,    OsExceptionMask::QUEUE_WAVE_MEMORY_VIOLATION),
        (Exceptions::WAVE_APERTURE_VIOLATION,  OsExceptionMask::QUEUE_WAVE_APERTURE_VIOLATION),
    ];

    /// Union of every recognized wave exception.
    pub fn recognized() -> Self {
        Self::RECOGNIZED.iter().fold(Self::NONE, |acc, &(e, _)| acc | e)
    }

    /// True if every bit of this set is a recognized wave exception.
    pub fn is_recognized(&self) -> bool {
        Self::recognized().contains(*self)
    }

    /// Translates this set into the driver's exception mask.
    ///
    /// A memory violation also forwards the device memory violation
    /// currently latched on the agent (`agent_exceptions`).
    ///
    /// # Panics
    /// Panics if the set contains an unrecognized exception.
    pub fn to_os_exceptions(&self, agent_exceptions: OsExceptionMask) -> OsExceptionMask {
        assert!(self.is_recognized(), "not a valid exception: {self:?}");

        Self::RECOGNIZED.iter()
            .filter(|&&(e, _)| self.contains(e))
            .fold(OsExceptionMask::NONE, |acc, &(e, os)| match e {
                Exceptions::WAVE_MEMORY_VIOLATION => {
                    acc | os | (agent_exceptions & OsExceptionMask::DEVICE_MEMORY_VIOLATION)
                },
                _ => acc | os,
            })
    }
}
