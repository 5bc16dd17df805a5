//! User-pointer write verification
//!
//! Before the kernel writes into user memory on a task's behalf (waitpid
//! status, time values), every page in the destination range must be
//! privately writable; a shared copy-on-write page gets resolved here
//! rather than via a fault the kernel could not take.

use super::frame_allocator::FrameMap;
use super::paging::AddressSpace;
use super::{VirtualAddress, PAGE_SIZE};
use crate::error::Result;

/// Make `[addr, addr+size)` in the segment based at `base` safely
/// writable by the kernel.
///
/// Rounds the range out to page boundaries and runs `write_verify` on each
/// page. Pages that are not mapped at all are left alone; a not-present
/// write from the kernel still resolves through the normal no-page path.
pub fn verify_area(
    space: &AddressSpace,
    mem: &mut FrameMap,
    base: VirtualAddress,
    addr: u64,
    size: usize,
) -> Result<()> {
    let mut size = size + (addr & 0xFFF) as usize;
    let mut start = base.as_u64() + (addr & !0xFFF);
    while size > 0 {
        space.write_verify(mem, VirtualAddress::new(start))?;
        size = size.saturating_sub(PAGE_SIZE);
        start += PAGE_SIZE as u64;
    }
    Ok(())
}
