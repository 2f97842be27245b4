//! Memory transfers in the address spaces of a wave.
//!
//! Each [`AddressSpaceKind`] maps a wave-relative address to global memory differently:
//! - private swizzled memory interleaves the lanes of a wave dword by dword in the wave's scratch region,
//! - private unswizzled memory is a linear view of the scratch region,
//! - local memory is saved with the context-save record of the work-group leader,
//! - global memory is accessed as is.
//!
//! Transfers into bounded regions are clamped with [`clamp_xfer`].

use std::ops::Range;

use crate::driver::Driver;
use crate::err::DbgErr;
use crate::flags::WaveState;
use crate::process::Substrate;

use super::Wave;

/// Size in bytes of a swizzled scratch unit.
const SWIZZLE_UNIT: u64 = 4;

/// How an address space maps to global memory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum AddressSpaceKind {
    /// Per-lane scratch memory, interleaved across lanes.
    PrivateSwizzled,
    /// Per-wave scratch memory.
    PrivateUnswizzled,
    /// Work-group local memory.
    Local,
    /// Global memory.
    Global,
    /// Memory shared across work-groups. Transfers are not supported.
    Region,
}

/// An address space of an architecture.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct AddressSpace {
    name: String,
    kind: AddressSpaceKind,
    address_size: u32
}
impl AddressSpace {
    /// Creates an address space whose addresses are `address_size` bits wide.
    ///
    /// # Panics
    /// Panics if `address_size` is not within `1..=64`.
    pub fn new(name: impl Into<String>, kind: AddressSpaceKind, address_size: u32) -> Self {
        assert!((1..=64).contains(&address_size), "invalid address size {address_size}");
        Self { name: name.into(), kind, address_size }
    }
    /// Name of the address space.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Kind of the address space.
    pub fn kind(&self) -> AddressSpaceKind {
        self.kind
    }
    /// Width of an address, in bits.
    pub fn address_size(&self) -> u32 {
        self.address_size
    }

    /// Zero-extends an address of this space.
    fn zero_extend(&self, address: u64) -> u64 {
        match self.address_size {
            64 => address,
            n  => address & ((1 << n) - 1)
        }
    }
}

/// The direction and buffer of a transfer.
#[derive(Debug)]
pub enum XferBuf<'a> {
    /// Read target memory into the buffer.
    Read(&'a mut [u8]),
    /// Write the buffer to target memory.
    Write(&'a [u8]),
}
impl XferBuf<'_> {
    /// Number of bytes requested.
    pub fn len(&self) -> usize {
        match self {
            XferBuf::Read(buf)  => buf.len(),
            XferBuf::Write(buf) => buf.len(),
        }
    }
    /// Whether no byte is requested.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn transfer(&mut self, driver: &mut dyn Driver, addr: u64, range: Range<usize>) -> Result<usize, DbgErr> {
        match self {
            XferBuf::Read(buf)  => driver.read_global_memory_partial(addr, &mut buf[range]),
            XferBuf::Write(buf) => driver.write_global_memory_partial(addr, &buf[range]),
        }
    }
}

/// Clamps a transfer of `requested` bytes at `address` into a region of `capacity` bytes.
///
/// The transfer is shortened to end at the end of the region.
/// A nonempty request that starts at or past the end of the region fails with [`DbgErr::MemoryAccess`].
///
/// # Example
/// ```
/// use wavectl::err::DbgErr;
/// use wavectl::wave::xfer::clamp_xfer;
///
/// assert_eq!(clamp_xfer(0x10, 8, 0x100), Ok(8));
/// assert_eq!(clamp_xfer(0xFC, 8, 0x100), Ok(4));
/// assert_eq!(clamp_xfer(0x100, 8, 0x100), Err(DbgErr::MemoryAccess));
/// assert_eq!(clamp_xfer(0x100, 0, 0x100), Ok(0));
/// ```
pub fn clamp_xfer(address: u64, requested: usize, capacity: u64) -> Result<usize, DbgErr> {
    let available = capacity.saturating_sub(address);
    let size = available.min(requested as u64) as usize;

    match requested != 0 && size == 0 {
        true  => Err(DbgErr::MemoryAccess),
        false => Ok(size),
    }
}

impl Wave {
    /// Transfers memory in one of the wave's address spaces, returning the number of bytes moved.
    ///
    /// Private swizzled memory requires a `lane`. Local memory is located at `lds_base`,
    /// the address of local memory in the context-save record of the wave's group leader.
    ///
    /// # Panics
    /// Panics if the wave is not stopped, or if local memory is accessed without `lds_base`.
    pub(crate) fn xfer_segment_memory(
        &self,
        sub: &mut Substrate,
        space: &AddressSpace,
        lane: Option<usize>,
        address: u64,
        mut buf: XferBuf<'_>,
        lds_base: Option<u64>
    ) -> Result<usize, DbgErr> {
        assert!(self.state() == WaveState::Stop, "the wave must be stopped to read/write memory");

        let address = space.zero_extend(address);
        let len = buf.len();

        match space.kind() {
            AddressSpaceKind::PrivateSwizzled => {
                let lane_count = self.lane_count();
                let lane = match lane {
                    Some(lane) if lane < lane_count => lane as u64,
                    _ => return Err(DbgErr::InvalidLaneId),
                };
                let (scratch_base, scratch_size) = sub.callbacks(self.queue()).scratch_memory_region(self.cwsr_record());

                let mut done = 0;
                while done < len {
                    let logical = address + done as u64;
                    let in_unit = logical % SWIZZLE_UNIT;
                    let offset = (logical / SWIZZLE_UNIT) * lane_count as u64 * SWIZZLE_UNIT
                        + lane * SWIZZLE_UNIT
                        + in_unit;
                    let request = ((SWIZZLE_UNIT - in_unit) as usize).min(len - done);

                    let size = clamp_xfer(offset, request, scratch_size)?;
                    let n = buf.transfer(sub.driver.as_mut(), scratch_base + offset, done..done + size)?;

                    done += n;
                    if n < request { break };
                }

                match len != 0 && done == 0 {
                    true  => Err(DbgErr::MemoryAccess),
                    false => Ok(done),
                }
            },
            AddressSpaceKind::PrivateUnswizzled => {
                let (scratch_base, scratch_size) = sub.callbacks(self.queue()).scratch_memory_region(self.cwsr_record());

                let size = clamp_xfer(address, len, scratch_size)?;
                if size == 0 { return Ok(0) };
                buf.transfer(sub.driver.as_mut(), scratch_base + address, 0..size)
            },
            AddressSpaceKind::Local => {
                assert!(sub.is_queue_suspended(self.queue()), "local memory of {} accessed while its queue is running", self.id());
                let Some(lds_base) = lds_base else {
                    panic!("local memory is not accessible for {}", self.id())
                };

                let size = clamp_xfer(address, len, self.cwsr_record().lds_size())?;
                if size == 0 { return Ok(0) };
                buf.transfer(sub.driver.as_mut(), lds_base + address, 0..size)
            },
            AddressSpaceKind::Global => {
                if len == 0 { return Ok(0) };
                buf.transfer(sub.driver.as_mut(), address, 0..len)
            },
            AddressSpaceKind::Region => {
                log::info!("{} address space is not supported", space.name());
                Err(DbgErr::MemoryAccess)
            }
        }
    }
}
