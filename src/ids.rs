//! Handles for the objects of a debugging session.
//!
//! Objects never point at each other directly. A wave knows its queue, agent, dispatch
//! and group leader by handle, and resolves them through the owning [`Process`].
//!
//! [`Process`]: crate::process::Process

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

macro_rules! handle_ids {
    ($($(#[$m:meta])* $Name:ident => $prefix:literal),+ $(,)?) => {
        $(
            $(#[$m])*
            #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
            pub struct $Name(pub u64);

            impl From<u64> for $Name {
                fn from(value: u64) -> Self {
                    Self(value)
                }
            }
            impl std::fmt::Display for $Name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, concat!($prefix, "_{}"), self.0)
                }
            }
        )+
    }
}

handle_ids! {
    /// Handle of a wave.
    WaveId => "wave",
    /// Handle of an attached process.
    ProcessId => "process",
    /// Handle of a hardware queue.
    QueueId => "queue",
    /// Handle of an agent (a GPU device).
    AgentId => "agent",
    /// Handle of a dispatch (a kernel launch).
    DispatchId => "dispatch",
    /// Handle of an event.
    EventId => "event",
    /// Handle of a displaced-stepping operation.
    DisplacedSteppingId => "displaced_stepping",
    /// Handle of a watchpoint.
    WatchpointId => "watchpoint",
    /// Identifier of an architecture.
    ArchitectureId => "architecture",
}

/// Watch slot number as known by the kernel driver.
pub type OsWatchId = u32;

/// Source of handle values.
///
/// Clones share the same counter, so every process of a session
/// hands out values that are unique across the session.
#[derive(Clone, Debug, Default)]
pub struct IdAllocator(Arc<AtomicU64>);
impl IdAllocator {
    /// Creates a new allocator.
    pub fn new() -> Self {
        Default::default()
    }

    /// Allocates the next handle. Handles start at 1.
    pub fn next<T: From<u64>>(&self) -> T {
        T::from(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
