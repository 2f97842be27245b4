//! Execution control for GPU debugger backends.
//!
//! This crate is the wave-control core of a GPU debugger:
//! it tracks hardware waves, stops and resumes them, single-steps them over breakpoints
//! without removing the breakpoint (displaced stepping), and gives access to their registers
//! and memory while they are saved in a context-save record.
//!
//! # Usage
//!
//! Everything starts from a [`Session`](session::Session), which holds the attached processes.
//! A process is attached over a [`Driver`](driver::Driver), the transport to the kernel driver
//! ([`HostMemory`](driver::host::HostMemory) is an in-memory driver):
//! ```
//! use wavectl::driver::host::{HostMemory, MemoryInitStrategy};
//! use wavectl::process::ProcessFlags;
//! use wavectl::session::Session;
//!
//! let memory = HostMemory::new();
//! memory.map(0x1000, 0x1000, MemoryInitStrategy::Known { value: 0 });
//!
//! let mut session = Session::new();
//! let pid = session.attach_process(Box::new(memory.clone()), ProcessFlags::default());
//! assert!(session.process(pid).is_ok());
//! ```
//!
//! Agents, queues and waves are then registered on the [`Process`](process::Process)
//! as they are discovered, with an [`Architecture`](arch::Architecture) describing the ISA of each agent.
//! Once waves exist, the client drives them through the session:
//! - [`Session::wave_stop`](session::Session::wave_stop) and
//!   [`Session::wave_resume`](session::Session::wave_resume),
//! - [`Session::wave_get_info`](session::Session::wave_get_info),
//! - [`Session::process_wave_list`](session::Session::process_wave_list),
//! - events, with [`Session::next_pending_event`](session::Session::next_pending_event)
//!   and [`Session::event_processed`](session::Session::event_processed).
//!
//! See the [`wave`] module for how register and memory accesses are routed.
#![warn(missing_docs)]

pub mod arch;
pub mod cache;
pub mod displaced;
pub mod driver;
pub mod err;
pub mod flags;
pub mod ids;
pub mod process;
pub mod session;
pub mod wave;

#[cfg(test)]
pub(crate) mod test_support;
