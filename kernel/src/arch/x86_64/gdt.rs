//! Global Descriptor Table and the single long-mode TSS
//!
//! Layout, fixed by the switch and fork paths:
//! - 0: null
//! - 1: kernel code, 2: kernel data
//! - 3: user code, 4: user data
//! - 5–6: the global TSS (a 16-byte system descriptor spans two entries)
//! - 7 + 2·slot: the per-task LDT descriptor for task-table slot `slot`
//!
//! Long mode needs no per-task TSS; only `rsp0` of the one global TSS is
//! rewritten during each context switch so ring transitions land on the
//! incoming task's kernel stack.

use lazy_static::lazy_static;
use spin::Mutex;

/// GDT index of the TSS descriptor.
pub const FIRST_TSS_ENTRY: usize = 5;
/// GDT index of slot 0's LDT descriptor.
pub const FIRST_LDT_ENTRY: usize = 7;
/// Total GDT entries: fixed slots plus two per task.
pub const GDT_ENTRIES: usize = FIRST_LDT_ENTRY + 2 * crate::sched::NR_TASKS;

/// 64-bit kernel code segment.
const KERNEL_CODE: u64 = 0x00AF_9A00_0000_FFFF;
/// Kernel data segment.
const KERNEL_DATA: u64 = 0x00CF_9200_0000_FFFF;
/// 64-bit user code segment (DPL 3).
pub const USER_CODE: u64 = 0x00AF_FA00_0000_FFFF;
/// User data segment (DPL 3).
pub const USER_DATA: u64 = 0x00CF_F200_0000_FFFF;

/// System-descriptor types used here.
const DESC_TYPE_TSS: u8 = 0x9;
const DESC_TYPE_LDT: u8 = 0x2;

/// The in-memory GDT image.
pub struct GdtImage {
    entries: [u64; GDT_ENTRIES],
}

impl GdtImage {
    pub const fn new() -> Self {
        let mut entries = [0u64; GDT_ENTRIES];
        entries[1] = KERNEL_CODE;
        entries[2] = KERNEL_DATA;
        entries[3] = USER_CODE;
        entries[4] = USER_DATA;
        Self { entries }
    }

    /// Install the global TSS descriptor at entries 5–6.
    pub fn set_tss_desc(&mut self, base: u64, limit: u32) {
        let (low, high) = system_descriptor(base, limit, DESC_TYPE_TSS);
        self.entries[FIRST_TSS_ENTRY] = low;
        self.entries[FIRST_TSS_ENTRY + 1] = high;
    }

    /// Install the LDT descriptor for task-table slot `slot`.
    pub fn set_ldt_desc(&mut self, slot: usize, base: u64) {
        let idx = FIRST_LDT_ENTRY + 2 * slot;
        let (low, high) = system_descriptor(base, (3 * 8 - 1) as u32, DESC_TYPE_LDT);
        self.entries[idx] = low;
        self.entries[idx + 1] = high;
    }

    /// Clear the LDT descriptor pair for `slot` (task gone).
    pub fn clear_ldt_desc(&mut self, slot: usize) {
        let idx = FIRST_LDT_ENTRY + 2 * slot;
        self.entries[idx] = 0;
        self.entries[idx + 1] = 0;
    }

    pub fn entry(&self, idx: usize) -> u64 {
        self.entries[idx]
    }
}

impl Default for GdtImage {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a 16-byte long-mode system descriptor (TSS or LDT).
fn system_descriptor(base: u64, limit: u32, typ: u8) -> (u64, u64) {
    let limit = limit as u64;
    let low = (limit & 0xFFFF)
        | ((base & 0xFFFF) << 16)
        | (((base >> 16) & 0xFF) << 32)
        | ((typ as u64) << 40)
        | (1 << 47) // present
        | (((limit >> 16) & 0xF) << 48)
        | (((base >> 24) & 0xFF) << 56);
    let high = base >> 32;
    (low, high)
}

/// Selector loading the TSS descriptor.
pub const fn tss_selector() -> u16 {
    (FIRST_TSS_ENTRY as u16) << 3
}

/// Selector loading task slot `slot`'s LDT descriptor.
pub const fn ldt_selector(slot: usize) -> u16 {
    ((FIRST_LDT_ENTRY + 2 * slot) as u16) << 3
}

// --- 8-byte segment descriptor base/limit accessors (per-task LDTs) ---

/// Read the 32-bit base packed into a legacy segment descriptor.
pub const fn descriptor_base(desc: u64) -> u64 {
    ((desc >> 16) & 0xFFFF) | (((desc >> 32) & 0xFF) << 16) | (((desc >> 56) & 0xFF) << 24)
}

/// Rewrite the base field of a legacy segment descriptor.
pub fn set_descriptor_base(desc: &mut u64, base: u64) {
    *desc &= !((0xFFFFu64 << 16) | (0xFFu64 << 32) | (0xFFu64 << 56));
    *desc |= (base & 0xFFFF) << 16;
    *desc |= ((base >> 16) & 0xFF) << 32;
    *desc |= ((base >> 24) & 0xFF) << 56;
}

/// Raw 20-bit limit field of a legacy segment descriptor (page units when
/// the granularity bit is set).
pub const fn descriptor_limit(desc: u64) -> u64 {
    (desc & 0xFFFF) | (((desc >> 48) & 0xF) << 16)
}

lazy_static! {
    /// Global GDT image. Mutated when tasks come and go; reloaded lazily by
    /// the CPU on each descriptor use.
    pub static ref GDT: Mutex<GdtImage> = Mutex::new(GdtImage::new());
}

#[cfg(target_os = "none")]
mod hw {
    use core::mem::size_of;

    use x86_64::structures::tss::TaskStateSegment;
    use x86_64::VirtAddr;

    use super::*;

    static mut TSS: TaskStateSegment = TaskStateSegment::new();

    /// Point ring-0 stack transitions at `top` (the incoming task's kernel
    /// stack top). Called on every context switch, interrupts disabled.
    pub fn set_kernel_stack(top: u64) {
        // SAFETY: single CPU with interrupts disabled during switch; the
        // TSS is only read by the CPU on privilege transitions.
        unsafe {
            (*(&raw mut TSS)).privilege_stack_table[0] = VirtAddr::new(top);
        }
    }

    /// Load the GDT, task register and slot 0's LDT. Boot-time only.
    pub fn load() {
        use x86_64::instructions::tables::lgdt;
        use x86_64::structures::DescriptorTablePointer;

        let mut gdt = GDT.lock();
        let tss_base = (&raw const TSS) as u64;
        gdt.set_tss_desc(tss_base, (size_of::<TaskStateSegment>() - 1) as u32);

        let ptr = DescriptorTablePointer {
            limit: (GDT_ENTRIES * 8 - 1) as u16,
            base: VirtAddr::new(gdt.entries.as_ptr() as u64),
        };
        // SAFETY: the GDT image is 'static (behind the global Mutex) and
        // stays valid for the lifetime of the CPU's reference to it.
        unsafe {
            lgdt(&ptr);
            core::arch::asm!("ltr {0:x}", in(reg) tss_selector(), options(nostack, preserves_flags));
            core::arch::asm!("lldt {0:x}", in(reg) ldt_selector(0), options(nostack, preserves_flags));
        }
    }
}

#[cfg(target_os = "none")]
pub use hw::{load, set_kernel_stack};

/// Host build: the TSS update is recorded but has no hardware effect.
#[cfg(not(target_os = "none"))]
pub fn set_kernel_stack(_top: u64) {}

#[cfg(not(target_os = "none"))]
pub fn load() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_slots_are_populated() {
        let gdt = GdtImage::new();
        assert_eq!(gdt.entry(0), 0);
        assert_eq!(gdt.entry(1), KERNEL_CODE);
        assert_eq!(gdt.entry(2), KERNEL_DATA);
        assert_eq!(gdt.entry(3), USER_CODE);
        assert_eq!(gdt.entry(4), USER_DATA);
    }

    #[test]
    fn tss_descriptor_encoding() {
        let mut gdt = GdtImage::new();
        gdt.set_tss_desc(0x1234_5678_9ABC_DEF0, 0x67);
        let low = gdt.entry(FIRST_TSS_ENTRY);
        let high = gdt.entry(FIRST_TSS_ENTRY + 1);

        assert_eq!(low & 0xFFFF, 0x67); // limit
        assert_eq!((low >> 16) & 0xFFFF, 0xDEF0); // base 15:0
        assert_eq!((low >> 32) & 0xFF, 0xBC); // base 23:16
        assert_eq!((low >> 40) & 0xF, 0x9); // type: available 64-bit TSS
        assert_eq!((low >> 47) & 1, 1); // present
        assert_eq!((low >> 56) & 0xFF, 0x9A); // base 31:24
        assert_eq!(high, 0x1234_5678); // base 63:32
    }

    #[test]
    fn ldt_descriptors_land_at_slot_pairs() {
        let mut gdt = GdtImage::new();
        gdt.set_ldt_desc(3, 0xCAFE_0000);
        let idx = FIRST_LDT_ENTRY + 6;
        assert_ne!(gdt.entry(idx), 0);
        assert_eq!((gdt.entry(idx) >> 40) & 0xF, 0x2); // LDT type
        gdt.clear_ldt_desc(3);
        assert_eq!(gdt.entry(idx), 0);
        assert_eq!(gdt.entry(idx + 1), 0);
    }

    #[test]
    fn selectors_match_descriptor_layout() {
        assert_eq!(tss_selector(), 5 << 3);
        assert_eq!(ldt_selector(0), 7 << 3);
        // _LDT(n) in the 32-bit lineage: 16 bytes per task past entry 7.
        assert_eq!(ldt_selector(4), (7 << 3) + 4 * 16);
    }

    #[test]
    fn descriptor_base_roundtrip() {
        let mut desc = USER_DATA;
        set_descriptor_base(&mut desc, 0x0400_0000);
        assert_eq!(descriptor_base(desc), 0x0400_0000);
        // Limit field untouched by base rewrites.
        assert_eq!(descriptor_limit(desc), descriptor_limit(USER_DATA));

        set_descriptor_base(&mut desc, 0x0800_0000);
        assert_eq!(descriptor_base(desc), 0x0800_0000);
    }
}
