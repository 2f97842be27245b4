//! Errors returned from the public operations.
//!
//! Every fallible operation in this crate returns [`DbgErr`]. Broken contracts between this crate
//! and its collaborators (parking twice, reference count underflow, touching a wave whose queue is
//! not suspended, ...) are not errors: they panic with a diagnostic.

use thiserror::Error;

/// Recoverable error conditions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DbgErr {
    /// The wave handle does not refer to an existing wave.
    #[error("invalid wave id")]
    InvalidWaveId,
    /// The process handle does not refer to an attached process.
    #[error("invalid process id")]
    InvalidProcessId,
    /// The queue handle does not refer to a queue of the process.
    #[error("invalid queue id")]
    InvalidQueueId,
    /// The agent handle does not refer to an agent of the process.
    #[error("invalid agent id")]
    InvalidAgentId,
    /// The event handle does not refer to an existing event.
    #[error("invalid event id")]
    InvalidEventId,
    /// An argument is outside of its accepted domain.
    #[error("invalid argument")]
    InvalidArgument,
    /// An argument is incompatible with the object it is applied to
    /// (for example, a register access wider than the register).
    #[error("argument is not compatible with the target")]
    InvalidArgumentCompatibility,
    /// The lane does not exist in the wave.
    #[error("invalid lane id")]
    InvalidLaneId,
    /// The wave is already stopped.
    #[error("wave is already stopped")]
    WaveStopped,
    /// A stop was already requested for this wave and has not been reported yet.
    #[error("wave has an outstanding stop request")]
    WaveOutstandingStop,
    /// The wave is not stopped.
    #[error("wave is not stopped")]
    WaveNotStopped,
    /// The stop event of the wave has not been processed yet.
    #[error("wave is not resumable until its stop event is processed")]
    WaveNotResumable,
    /// A displaced-stepping wave can only be resumed in single-step mode.
    #[error("a displaced-stepping wave can only be resumed in single-step mode")]
    ResumeDisplacedStepping,
    /// The wave is already displaced stepping.
    #[error("wave is already displaced stepping")]
    DisplacedSteppingActive,
    /// The wave is not displaced stepping.
    #[error("invalid displaced stepping id")]
    InvalidDisplacedSteppingId,
    /// A memory access could not be performed.
    #[error("memory access error")]
    MemoryAccess,
    /// The instruction can neither be executed out of line nor simulated.
    #[error("instruction cannot be displaced or simulated")]
    IllegalInstruction,
    /// A client callback reported a failure.
    #[error("client callback failed")]
    ClientCallback,
    /// The requested information is not available for this object.
    #[error("information not available")]
    NotAvailable,
}
