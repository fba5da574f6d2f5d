//! Instruction cache.
//!
//! The firmware runs from SRAM A1 and A2. The cache is invalidated over that
//! window and enabled first thing on boot.

/// Size of the code window covered by the cache flush (SRAM A1 + A2).
pub const ICACHE_FLUSH_SIZE: usize = 16 * 1024 + 32 * 1024;

/// Instruction cache line size.
pub const ICACHE_LINE_SIZE: usize = 16;

/// Returns the address of every cache line in the code window.
pub fn icache_lines() -> impl Iterator<Item = usize> {
    (0..ICACHE_FLUSH_SIZE).step_by(ICACHE_LINE_SIZE)
}

/// Invalidates the code window and enables the instruction cache.
#[cfg(target_arch = "or1k")]
pub fn icache_enable() {
    use core::arch::asm;

    use crate::spr::{mfspr, mtspr, SPR_ICBIR, SPR_SR, SR_ICE};

    unsafe {
        for addr in icache_lines() {
            mtspr(SPR_ICBIR, addr as u32);
        }

        let sr = mfspr(SPR_SR);
        mtspr(SPR_SR, sr | SR_ICE);

        // Let the pipeline drain before fetching through the cache.
        asm!("l.nop", "l.nop", "l.nop", "l.nop", "l.nop");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_covers_code_window() {
        let lines: Vec<usize> = icache_lines().collect();

        assert_eq!(lines.len(), 3072);
        assert_eq!(lines.first(), Some(&0));
        assert_eq!(lines.last(), Some(&(ICACHE_FLUSH_SIZE - 16)));
        assert!(lines.windows(2).all(|w| w[1] - w[0] == ICACHE_LINE_SIZE));
    }
}
