//! The write-back register cache.
//!
//! A [`MemoryCache`] mirrors a contiguous byte range of a context-save record
//! (the hardware and trap temporary register block). Reads and writes that fall entirely
//! in the range are served from host memory. Writes mark the cache dirty,
//! and a dirty cache is written back with [`MemoryCache::flush`] before its queue resumes.

use crate::driver::Driver;
use crate::err::DbgErr;

/// How register accesses to a range are handled.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CachePolicy {
    /// Accesses are served by the cache and written back on flush.
    WriteBack,
    /// Accesses go straight to the driver.
    Uncached,
}

/// A byte-range overlay over target memory.
#[derive(Debug)]
pub struct MemoryCache {
    begin: u64,
    data: Vec<u8>,
    dirty: bool,
    policy: CachePolicy
}

impl MemoryCache {
    /// Creates an empty cache with the given policy.
    pub fn new(policy: CachePolicy) -> Self {
        Self { begin: 0, data: vec![], dirty: false, policy }
    }

    /// Discards the cached content and loads `size` bytes from `begin`.
    ///
    /// # Panics
    /// Panics if the cache is dirty, since that content would be lost.
    pub fn reset(&mut self, begin: u64, size: usize, driver: &mut dyn Driver) -> Result<(), DbgErr> {
        assert!(!self.dirty, "resetting a dirty cache at {:#x}", self.begin);

        self.begin = begin;
        self.data.clear();
        self.data.resize(size, 0);
        if self.policy == CachePolicy::WriteBack {
            driver.read_global_memory(begin, &mut self.data)?;
        }
        Ok(())
    }

    /// Moves the cache to a new base address, keeping its content.
    pub fn relocate(&mut self, begin: u64) {
        self.begin = begin;
    }

    /// First cached address.
    pub fn begin(&self) -> u64 {
        self.begin
    }
    /// One past the last cached address.
    pub fn end(&self) -> u64 {
        self.begin + self.data.len() as u64
    }
    /// The cache policy.
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }
    /// Whether the cache holds writes not yet flushed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether `[addr, addr + size)` is entirely served by this cache.
    pub fn contains(&self, addr: u64, size: usize) -> bool {
        self.policy == CachePolicy::WriteBack
            && addr >= self.begin
            && addr.checked_add(size as u64).is_some_and(|end| end <= self.end())
    }

    fn range(&self, addr: u64, size: usize) -> std::ops::Range<usize> {
        assert!(self.contains(addr, size), "{addr:#x}+{size} is not in the cache");
        let start = (addr - self.begin) as usize;
        start..start + size
    }

    /// Reads `buf.len()` bytes at `addr` from the cache.
    ///
    /// # Panics
    /// Panics if the range is not [contained](Self::contains) in the cache.
    pub fn read(&self, addr: u64, buf: &mut [u8]) {
        buf.copy_from_slice(&self.data[self.range(addr, buf.len())]);
    }

    /// Writes `buf` at `addr` into the cache, marking it dirty.
    ///
    /// # Panics
    /// Panics if the range is not [contained](Self::contains) in the cache.
    pub fn write(&mut self, addr: u64, buf: &[u8]) {
        let range = self.range(addr, buf.len());
        self.data[range].copy_from_slice(buf);
        self.dirty = true;
    }

    /// Writes the cached content back to target memory if it is dirty.
    pub fn flush(&mut self, driver: &mut dyn Driver) -> Result<(), DbgErr> {
        if !self.dirty { return Ok(()) };

        log::debug!("flushing register cache [{:#x}..{:#x})", self.begin, self.end());
        driver.write_global_memory(self.begin, &self.data)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::driver::host::{HostMemory, IoStats, MemoryInitStrategy};

    use super::*;

    #[test]
    fn round_trip_without_io() {
        let mut mem = HostMemory::new();
        mem.map(0x1000, 0x100, MemoryInitStrategy::Known { value: 0x11 });

        let mut cache = MemoryCache::new(CachePolicy::WriteBack);
        cache.reset(0x1040, 0x40, &mut mem).unwrap();
        let loaded = mem.io_stats();

        let mut buf = [0; 4];
        cache.read(0x1040, &mut buf);
        assert_eq!(buf, [0x11; 4]);

        cache.write(0x1044, &[1, 2, 3, 4]);
        cache.read(0x1044, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert!(cache.is_dirty());
        assert_eq!(mem.io_stats(), loaded);

        // target memory is untouched until flush
        mem.peek(0x1044, &mut buf).unwrap();
        assert_eq!(buf, [0x11; 4]);

        cache.flush(&mut mem).unwrap();
        assert!(!cache.is_dirty());
        mem.peek(0x1044, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(mem.io_stats(), IoStats { reads: 1, writes: 1 });

        // nothing to do on a clean cache
        cache.flush(&mut mem).unwrap();
        assert_eq!(mem.io_stats(), IoStats { reads: 1, writes: 1 });
    }

    #[test]
    fn relocate_keeps_content() {
        let mut mem = HostMemory::new();
        mem.map(0x1000, 0x100, MemoryInitStrategy::Known { value: 0 });

        let mut cache = MemoryCache::new(CachePolicy::WriteBack);
        cache.reset(0x1000, 0x10, &mut mem).unwrap();
        cache.write(0x1000, &[9]);
        cache.relocate(0x1080);

        assert!(!cache.contains(0x1000, 1));
        assert!(cache.contains(0x1080, 0x10));
        assert!(!cache.contains(0x1088, 0x10));

        let mut buf = [0];
        cache.read(0x1080, &mut buf);
        assert_eq!(buf, [9]);

        cache.flush(&mut mem).unwrap();
        mem.peek(0x1080, &mut buf).unwrap();
        assert_eq!(buf, [9]);
    }

    #[test]
    fn uncached_contains_nothing() {
        let mut mem = HostMemory::new();
        mem.map(0x1000, 0x100, MemoryInitStrategy::Known { value: 0 });

        let mut cache = MemoryCache::new(CachePolicy::Uncached);
        cache.reset(0x1000, 0x10, &mut mem).unwrap();
        assert!(!cache.contains(0x1000, 4));
        assert_eq!(mem.io_stats().reads, 0);
    }
}
