//! Memory mapped I/O operations.
//!
//! The ARISC sees the H3 peripherals at their physical addresses, so register
//! addresses in this crate are absolute. For more information, please see the
//! [Allwinner H3 Datasheet].
//!
//! [Allwinner H3 Datasheet]: https://linux-sunxi.org/images/4/4b/Allwinner_H3_Datasheet_V1.2.pdf

use core::ptr::{read_volatile, write_volatile};

/// A 32-bit register bus.
///
/// Drivers are generic over the bus so they can run against the real
/// hardware ([`Mmio`]) or against a register file on the host.
pub trait Bus {
    /// Reads the register at `addr`.
    fn read(&self, addr: usize) -> u32;

    /// Writes `val` into the register at `addr`.
    fn write(&self, addr: usize, val: u32);

    /// Clears the bits in `clear` and then sets the bits in `set` of the
    /// register at `addr`.
    fn modify(&self, addr: usize, clear: u32, set: u32) {
        let reg = self.read(addr);
        self.write(addr, (reg & !clear) | set);
    }
}

impl<T: Bus + ?Sized> Bus for &T {
    fn read(&self, addr: usize) -> u32 {
        (**self).read(addr)
    }

    fn write(&self, addr: usize, val: u32) {
        (**self).write(addr, val)
    }
}

/// The physical register bus of the H3.
#[derive(Debug, Copy, Clone, Default)]
pub struct Mmio;

impl Bus for Mmio {
    fn read(&self, addr: usize) -> u32 {
        unsafe { read(addr) }
    }

    fn write(&self, addr: usize, val: u32) {
        unsafe { write(addr, val) }
    }
}

/// Read register at physical address `addr`.
///
/// # Safety
///
/// This function reads an arbitrary memory address, thus it is unsafe.
pub unsafe fn read(addr: usize) -> u32 {
    read_volatile(addr as *const u32)
}

/// Write value into register at physical address `addr`.
///
/// # Safety
///
/// This function writes to an arbitrary memory address, thus it is unsafe.
pub unsafe fn write(addr: usize, val: u32) {
    write_volatile(addr as *mut u32, val)
}

/// Returns `reg` with the `width` bits at `offset` replaced by `val`.
pub const fn set_bits_at(reg: u32, width: u32, offset: u32, val: u32) -> u32 {
    let mask = ((1 << width) - 1) << offset;
    (reg & !mask) | ((val << offset) & mask)
}

/// Returns the `width` bits at `offset` of `reg`.
pub const fn get_bits_at(reg: u32, width: u32, offset: u32) -> u32 {
    (reg >> offset) & ((1 << width) - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::RamBus;

    #[test]
    fn bit_fields() {
        let reg = set_bits_at(0xffff_ffff, 3, 4, 0b001);
        assert_eq!(reg, 0xffff_ff9f);
        assert_eq!(get_bits_at(reg, 3, 4), 0b001);
        assert_eq!(set_bits_at(0, 3, 28, 0b1111), 0x7000_0000);
    }

    #[test]
    fn modify_keeps_other_bits() {
        let bus = RamBus::new();
        bus.write(0x100, 0b1010);
        bus.modify(0x100, 0b0010, 0b0101);
        assert_eq!(bus.read(0x100), 0b1101);
    }
}
