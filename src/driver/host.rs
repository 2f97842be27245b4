//! An in-memory [`Driver`].
//!
//! [`HostMemory`] keeps a set of mapped regions in host memory and records every
//! queue and exception request made through it. It is a cheaply clonable handle,
//! so one clone can be handed to a process while another inspects what happened.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::rngs::StdRng;
use rand::Rng;

use crate::err::DbgErr;
use crate::flags::OsExceptionMask;
use crate::ids::QueueId;

use super::Driver;

/// Strategy used to initialize the bytes of a newly mapped region.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum MemoryInitStrategy {
    /// Initializes each byte randomly and non-deterministically.
    #[default]
    Unseeded,

    /// Initializes each byte randomly and deterministically.
    Seeded {
        /// The seed the RNG is initialized with.
        seed: u64
    },

    /// Initializes each byte to a known value.
    Known {
        /// The value to initialize each byte to.
        value: u8
    }
}
impl MemoryInitStrategy {
    fn fill(&self, buf: &mut [u8]) {
        use rand::SeedableRng;

        match self {
            MemoryInitStrategy::Unseeded => rand::thread_rng().fill(buf),
            MemoryInitStrategy::Seeded { seed } => StdRng::seed_from_u64(*seed).fill(buf),
            MemoryInitStrategy::Known { value } => buf.fill(*value),
        }
    }
}

/// Count of driver memory transfers.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct IoStats {
    /// Number of read requests.
    pub reads: usize,
    /// Number of write requests.
    pub writes: usize,
}

#[derive(Debug, Default)]
struct HostInner {
    regions: BTreeMap<u64, Vec<u8>>,
    suspended: BTreeSet<QueueId>,
    suspend_count: usize,
    sent_exceptions: Vec<(QueueId, OsExceptionMask)>,
    stats: IoStats
}
impl HostInner {
    /// Finds the region containing `addr`, returning the region and the offset of `addr` within it.
    fn region_mut(&mut self, addr: u64) -> Option<(&mut Vec<u8>, usize)> {
        let (&base, region) = self.regions.range_mut(..=addr).next_back()?;
        let offset = usize::try_from(addr - base).ok()?;
        (offset < region.len()).then_some((region, offset))
    }
}

/// Host-backed memory and queue state, usable as a [`Driver`].
#[derive(Debug, Clone, Default)]
pub struct HostMemory {
    inner: Arc<RwLock<HostInner>>
}
impl HostMemory {
    /// Creates an empty address space.
    pub fn new() -> Self {
        Default::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HostInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
    fn write(&self) -> RwLockWriteGuard<'_, HostInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maps `len` bytes at `base`, initializing them with the given strategy.
    ///
    /// # Panics
    /// Panics if the new region overlaps an existing one.
    pub fn map(&self, base: u64, len: usize, init: MemoryInitStrategy) {
        let mut inner = self.write();
        let end = base + len as u64;
        let overlaps = inner.regions.range(..end)
            .next_back()
            .is_some_and(|(&b, r)| b + r.len() as u64 > base);
        assert!(!overlaps, "region {base:#x}..{end:#x} overlaps an existing mapping");

        let mut data = vec![0; len];
        init.fill(&mut data);
        inner.regions.insert(base, data);
    }

    /// Copies bytes out of mapped memory without accounting for the transfer.
    pub fn peek(&self, addr: u64, buf: &mut [u8]) -> Result<(), DbgErr> {
        let mut inner = self.write();
        let (region, offset) = inner.region_mut(addr).ok_or(DbgErr::MemoryAccess)?;
        let src = region.get(offset..offset + buf.len()).ok_or(DbgErr::MemoryAccess)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    /// Copies bytes into mapped memory without accounting for the transfer.
    pub fn poke(&self, addr: u64, buf: &[u8]) -> Result<(), DbgErr> {
        let mut inner = self.write();
        let (region, offset) = inner.region_mut(addr).ok_or(DbgErr::MemoryAccess)?;
        let dst = region.get_mut(offset..offset + buf.len()).ok_or(DbgErr::MemoryAccess)?;
        dst.copy_from_slice(buf);
        Ok(())
    }

    /// Number of reads and writes performed through the [`Driver`] interface.
    pub fn io_stats(&self) -> IoStats {
        self.read().stats
    }
    /// Every exception delivered so far, in order.
    pub fn sent_exceptions(&self) -> Vec<(QueueId, OsExceptionMask)> {
        self.read().sent_exceptions.clone()
    }
    /// Whether a queue is currently suspended.
    pub fn is_suspended(&self, queue: QueueId) -> bool {
        self.read().suspended.contains(&queue)
    }
    /// Number of times any queue was suspended.
    pub fn suspend_count(&self) -> usize {
        self.read().suspend_count
    }
}

impl Driver for HostMemory {
    fn read_global_memory_partial(&mut self, addr: u64, buf: &mut [u8]) -> Result<usize, DbgErr> {
        if buf.is_empty() { return Ok(0) };

        let mut inner = self.write();
        inner.stats.reads += 1;
        let (region, offset) = inner.region_mut(addr).ok_or(DbgErr::MemoryAccess)?;
        let n = buf.len().min(region.len() - offset);
        buf[..n].copy_from_slice(&region[offset..offset + n]);
        Ok(n)
    }

    fn write_global_memory_partial(&mut self, addr: u64, buf: &[u8]) -> Result<usize, DbgErr> {
        if buf.is_empty() { return Ok(0) };

        let mut inner = self.write();
        inner.stats.writes += 1;
        let (region, offset) = inner.region_mut(addr).ok_or(DbgErr::MemoryAccess)?;
        let n = buf.len().min(region.len() - offset);
        region[offset..offset + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn suspend_queues(&mut self, queues: &[QueueId]) -> Result<(), DbgErr> {
        let mut inner = self.write();
        for &q in queues {
            if inner.suspended.insert(q) {
                inner.suspend_count += 1;
            }
        }
        Ok(())
    }

    fn resume_queues(&mut self, queues: &[QueueId]) -> Result<(), DbgErr> {
        let mut inner = self.write();
        for q in queues {
            inner.suspended.remove(q);
        }
        Ok(())
    }

    fn send_exceptions(&mut self, exceptions: OsExceptionMask, queue: QueueId) -> Result<(), DbgErr> {
        self.write().sent_exceptions.push((queue, exceptions));
        Ok(())
    }
}
