//! Hard-disk collaborator contract
//!
//! The block device, buffer cache and filesystem are external to the core;
//! the boot path only promises to call `hd_init` once, after the scheduler
//! is up and before interrupts are enabled.

/// Probe and initialize the disk controller. Contract-only stub.
pub fn hd_init() {
    log::info!("hd: controller init deferred to block-device collaborator");
}
