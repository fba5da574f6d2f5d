//! OpenRISC special purpose registers.
//!
//! SPR numbers are `group << 11 | register`. For more information, please
//! see the "Special-Purpose Registers" chapter of the OpenRISC 1000
//! Architecture Manual.

use core::arch::asm;

/// Supervision Register (group 0, register 17).
pub const SPR_SR: u32 = 0x0011;

/// Instruction cache enable bit of [`SPR_SR`].
pub const SR_ICE: u32 = 1 << 4;

/// Instruction Cache Block Invalidate Register (group 4, register 2).
pub const SPR_ICBIR: u32 = 0x2002;

/// Writes `val` into the special purpose register `spr`.
///
/// # Safety
///
/// Writing some registers changes how the CPU executes code, e.g. the
/// supervision register.
#[inline(always)]
pub unsafe fn mtspr(spr: u32, val: u32) {
    asm!("l.mtspr {0}, {1}, 0", in(reg) spr, in(reg) val);
}

/// Reads the special purpose register `spr`.
///
/// # Safety
///
/// `spr` must name an implemented register.
#[inline(always)]
pub unsafe fn mfspr(spr: u32) -> u32 {
    let val: u32;
    asm!("l.mfspr {0}, {1}, 0", out(reg) val, in(reg) spr);
    val
}
