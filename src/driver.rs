//! The kernel driver transport.
//!
//! The [`Driver`] trait is how this crate reaches the traced process: raw global memory I/O,
//! suspension and resumption of hardware queues, and exception delivery.
//!
//! [`host::HostMemory`] is an in-memory implementation, useful when no real device is present.

pub mod host;

use crate::err::DbgErr;
use crate::flags::OsExceptionMask;
use crate::ids::QueueId;

/// Access to the traced process through the kernel driver.
pub trait Driver {
    /// Reads as much of `buf.len()` bytes starting at `addr` as is accessible.
    ///
    /// This returns the number of bytes read, which may be less than requested.
    /// An empty request always succeeds, otherwise reading zero bytes is an error.
    fn read_global_memory_partial(&mut self, addr: u64, buf: &mut [u8]) -> Result<usize, DbgErr>;

    /// Writes as much of `buf` starting at `addr` as is accessible.
    ///
    /// This returns the number of bytes written, which may be less than requested.
    /// An empty request always succeeds, otherwise writing zero bytes is an error.
    fn write_global_memory_partial(&mut self, addr: u64, buf: &[u8]) -> Result<usize, DbgErr>;

    /// Reads exactly `buf.len()` bytes starting at `addr`.
    fn read_global_memory(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), DbgErr> {
        match self.read_global_memory_partial(addr, buf)? {
            n if n == buf.len() => Ok(()),
            _ => Err(DbgErr::MemoryAccess)
        }
    }

    /// Writes all of `buf` starting at `addr`.
    fn write_global_memory(&mut self, addr: u64, buf: &[u8]) -> Result<(), DbgErr> {
        match self.write_global_memory_partial(addr, buf)? {
            n if n == buf.len() => Ok(()),
            _ => Err(DbgErr::MemoryAccess)
        }
    }

    /// Suspends the given queues, forcing their waves to be context-saved.
    fn suspend_queues(&mut self, queues: &[QueueId]) -> Result<(), DbgErr>;
    /// Resumes the given queues.
    fn resume_queues(&mut self, queues: &[QueueId]) -> Result<(), DbgErr>;
    /// Delivers exceptions to a queue.
    fn send_exceptions(&mut self, exceptions: OsExceptionMask, queue: QueueId) -> Result<(), DbgErr>;
}
impl dyn Driver {} // assert Driver is dyn safe
