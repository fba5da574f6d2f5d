//! UART0 driver.
//!
//! UART0 is a 16550 compatible UART wired to PA4 (TX) and PA5 (RX). For more
//! information, please see the "UART" section of the [Allwinner H3
//! Datasheet].
//!
//! [Allwinner H3 Datasheet]: https://linux-sunxi.org/images/4/4b/Allwinner_H3_Datasheet_V1.2.pdf

use crate::ccu::{self, Clock};
use crate::gpio::{Function, Gpio, Pin, Port};
use crate::mmio::Bus;

/// Base address of UART0.
const UART_BASE: usize = 0x01c2_8000;

/// Receiver buffer register (read) and transmit holding register (write).
const UART_RBR_THR: usize = UART_BASE;

/// Divisor latch low register. Accessible when LCR.DLAB is set.
const UART_DLL: usize = UART_BASE;

/// Divisor latch high register. Accessible when LCR.DLAB is set.
const UART_DLH: usize = UART_BASE + 0x4;

/// Interrupt enable register.
const UART_IER: usize = UART_BASE + 0x4;

/// FIFO control register.
const UART_FCR: usize = UART_BASE + 0x8;

/// Enable and reset both FIFOs.
const UART_FCR_FIFO_RESET: u32 = 0b111;

/// Line control register.
const UART_LCR: usize = UART_BASE + 0xc;

/// Divisor latch access bit.
const UART_LCR_DLAB: u32 = 1 << 7;

/// 8 data bits, no parity, 1 stop bit.
const UART_LCR_8N1: u32 = 0b11;

/// Line status register.
const UART_LSR: usize = UART_BASE + 0x14;

/// Data ready.
const UART_LSR_DR: u32 = 1 << 0;

/// Transmit holding register empty.
const UART_LSR_THRE: u32 = 1 << 5;

/// UART clock, APB2 fed by OSC24M.
const UART_CLK: u32 = 24_000_000;

/// Console baud rate.
pub const UART_BAUD: u32 = 115_200;

/// TX pin.
const UART_TX: (Port, u32) = (Port::PA, 4);

/// RX pin.
const UART_RX: (Port, u32) = (Port::PA, 5);

/// UART function of the TX and RX pins.
const UART_PIN_FUNCTION: Function = Function::Alt(2);

/// Initializes UART0 at [`UART_BAUD`], 8N1.
pub fn init<B: Bus>(gpio: &Gpio<B>) -> crate::Result<()> {
    let bus = gpio.bus();

    // Route PA4/PA5 to the UART.
    for (port, pin) in [UART_TX, UART_RX] {
        gpio.set_function(port, Pin::try_from(pin)?, UART_PIN_FUNCTION)?;
    }

    ccu::set_uart0_source_osc24m(bus);
    ccu::enable(bus, Clock::Uart0);

    // Divisor = UART_CLK / (16 * baud) = 24000000 / (16 * 115200) = 13.02
    let div = (UART_CLK + 8 * UART_BAUD) / (16 * UART_BAUD);
    bus.write(UART_IER, 0);
    bus.write(UART_LCR, UART_LCR_DLAB);
    bus.write(UART_DLL, div & 0xff);
    bus.write(UART_DLH, (div >> 8) & 0xff);
    bus.write(UART_LCR, UART_LCR_8N1);
    bus.write(UART_FCR, UART_FCR_FIFO_RESET);

    Ok(())
}

/// Transmits a byte.
pub fn send_byte<B: Bus + ?Sized>(bus: &B, b: u8) {
    // Wait while the transmit holding register is full.
    while bus.read(UART_LSR) & UART_LSR_THRE == 0 {}

    bus.write(UART_RBR_THR, b as u32);
}

/// Receives a byte, waiting for it.
pub fn recv_byte<B: Bus + ?Sized>(bus: &B) -> u8 {
    loop {
        if let Some(b) = try_recv_byte(bus) {
            return b;
        }
    }
}

/// Receives a byte if there is one.
pub fn try_recv_byte<B: Bus + ?Sized>(bus: &B) -> Option<u8> {
    if bus.read(UART_LSR) & UART_LSR_DR == 0 {
        return None;
    }
    Some(bus.read(UART_RBR_THR) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::RamBus;

    #[test]
    fn init_programs_divisor_and_pins() {
        let bus = RamBus::new();
        let gpio = Gpio::new(&bus);

        init(&gpio).unwrap();

        // DLL and THR share the address: the last write wins.
        assert_eq!(bus.read(UART_LCR), UART_LCR_8N1);
        assert_eq!(bus.read(UART_DLH), 0);
        assert_eq!(bus.read(UART_FCR), 0b111);
        assert_eq!(bus.read(UART_DLL), 13);

        let pa4 = Pin::try_from(4).unwrap();
        let pa5 = Pin::try_from(5).unwrap();
        assert_eq!(gpio.function(Port::PA, pa4), Function::Alt(2));
        assert_eq!(gpio.function(Port::PA, pa5), Function::Alt(2));

        // UART0 gate.
        assert_eq!(bus.read(0x01c2_006c), 1 << 16);
    }

    #[test]
    fn send_and_receive() {
        let bus = RamBus::new();

        bus.write(UART_LSR, UART_LSR_THRE);
        send_byte(&bus, b'x');
        assert_eq!(bus.read(UART_RBR_THR), b'x' as u32);

        bus.write(UART_LSR, 0);
        assert_eq!(try_recv_byte(&bus), None);

        bus.write(UART_LSR, UART_LSR_DR);
        bus.write(UART_RBR_THR, b'y' as u32);
        assert_eq!(try_recv_byte(&bus), Some(b'y'));
        assert_eq!(recv_byte(&bus), b'y');
    }
}
